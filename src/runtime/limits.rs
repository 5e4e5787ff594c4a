//! Runtime limits and defaults.

/// Default cap on orchestrator work items processed at once.
pub const DEFAULT_MAX_CONCURRENT_WORKFLOWS: usize = 100;

/// Default cap on activity work items executed at once.
pub const DEFAULT_MAX_CONCURRENT_ACTIVITIES: usize = 100;

/// Default fan-out width for `process_in_parallel`.
pub const DEFAULT_PARALLELISM: usize = 5;
