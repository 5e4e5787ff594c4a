//! Replay-safe logging for workflow code.
//!
//! A workflow body runs again on every pass, so plain logging would repeat every
//! line once per replay. [`ReplaySafeLogger`] and the `replay_*!` macros stay
//! silent while the context is replaying history.

use crate::context::OrchestrationContext;
use std::fmt;
use std::sync::Arc;
use tracing::Level;

/// Destination for replay-safe log lines.
pub trait LogSink: Send + Sync {
    fn is_enabled(&self, level: Level) -> bool;
    fn log(&self, category: &str, level: Level, message: &str);
}

/// Default sink emitting `tracing` events under `replayflow::orchestration`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn is_enabled(&self, level: Level) -> bool {
        match level {
            Level::ERROR => tracing::enabled!(target: "replayflow::orchestration", Level::ERROR),
            Level::WARN => tracing::enabled!(target: "replayflow::orchestration", Level::WARN),
            Level::INFO => tracing::enabled!(target: "replayflow::orchestration", Level::INFO),
            Level::DEBUG => tracing::enabled!(target: "replayflow::orchestration", Level::DEBUG),
            _ => tracing::enabled!(target: "replayflow::orchestration", Level::TRACE),
        }
    }

    fn log(&self, category: &str, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!(target: "replayflow::orchestration", category, "{message}"),
            Level::WARN => tracing::warn!(target: "replayflow::orchestration", category, "{message}"),
            Level::INFO => tracing::info!(target: "replayflow::orchestration", category, "{message}"),
            Level::DEBUG => tracing::debug!(target: "replayflow::orchestration", category, "{message}"),
            _ => tracing::trace!(target: "replayflow::orchestration", category, "{message}"),
        }
    }
}

/// Logger whose `is_enabled` is false while replaying, regardless of the sink.
#[derive(Clone)]
pub struct ReplaySafeLogger {
    category: String,
    sink: Arc<dyn LogSink>,
    ctx: OrchestrationContext,
}

impl ReplaySafeLogger {
    pub(crate) fn new(category: impl Into<String>, sink: Arc<dyn LogSink>, ctx: OrchestrationContext) -> Self {
        Self {
            category: category.into(),
            sink,
            ctx,
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn is_enabled(&self, level: Level) -> bool {
        !self.ctx.is_replaying() && self.sink.is_enabled(level)
    }

    pub fn log(&self, level: Level, message: impl AsRef<str>) {
        if self.is_enabled(level) {
            self.sink.log(&self.category, level, message.as_ref());
        }
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(Level::ERROR, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(Level::WARN, message);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(Level::INFO, message);
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(Level::DEBUG, message);
    }
}

impl fmt::Debug for ReplaySafeLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplaySafeLogger")
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

#[macro_export]
macro_rules! replay_info {
    ($ctx:expr, $($arg:tt)+) => {{
        if $ctx.is_logging_enabled() {
            ::tracing::info!(target: "replayflow::orchestration", instance_id = %$ctx.instance_id(), $($arg)+);
        }
    }};
}

#[macro_export]
macro_rules! replay_warn {
    ($ctx:expr, $($arg:tt)+) => {{
        if $ctx.is_logging_enabled() {
            ::tracing::warn!(target: "replayflow::orchestration", instance_id = %$ctx.instance_id(), $($arg)+);
        }
    }};
}

#[macro_export]
macro_rules! replay_error {
    ($ctx:expr, $($arg:tt)+) => {{
        if $ctx.is_logging_enabled() {
            ::tracing::error!(target: "replayflow::orchestration", instance_id = %$ctx.instance_id(), $($arg)+);
        }
    }};
}

#[macro_export]
macro_rules! replay_debug {
    ($ctx:expr, $($arg:tt)+) => {{
        if $ctx.is_logging_enabled() {
            ::tracing::debug!(target: "replayflow::orchestration", instance_id = %$ctx.instance_id(), $($arg)+);
        }
    }};
}
