//! Work item handling for the Worker
//!
//! - `orchestration`: one replay pass per orchestrator request
//! - `worker`: activity execution

mod orchestration;
mod worker;

use std::time::Duration;

/// Milliseconds for log fields, saturating at `u64::MAX`.
fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
