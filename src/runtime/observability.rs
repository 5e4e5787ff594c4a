//! Structured logging setup and in-process metrics for the worker.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Log format options for structured logging
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Structured JSON output for log aggregators
    Json,
    /// Human-readable format with all fields
    Pretty,
    /// timestamp level target message
    #[default]
    Compact,
}

/// Logging and metrics configuration.
///
/// ```rust,no_run
/// # use replayflow::runtime::{LogFormat, ObservabilityConfig};
/// let config = ObservabilityConfig {
///     log_format: LogFormat::Json,
///     log_level: "debug".to_string(),
///     ..Default::default()
/// };
/// replayflow::runtime::init_logging(&config).ok();
/// ```
///
/// Log lines carry `instance_id`, `workflow_name`, `activity_name` and
/// `task_id` where they apply.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// Level for the replayflow targets, e.g. "info" or "debug"
    pub log_level: String,
    pub service_name: String,
    /// Record counters into the worker's [`MetricsProvider`]
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            log_level: "info".to_string(),
            service_name: "replayflow".to_string(),
            metrics_enabled: true,
        }
    }
}

fn default_filter_expression(level: &str) -> String {
    format!(
        "warn,replayflow::orchestration={level},replayflow::activity={level},replayflow::worker={level}"
    )
}

/// Install a global `tracing` subscriber. `RUST_LOG` overrides the configured level.
///
/// # Errors
///
/// Fails when a global subscriber is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), String> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter_expression(&config.log_level)));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| format!("Failed to initialize JSON logging: {e}")),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| format!("Failed to initialize pretty logging: {e}")),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
            .map_err(|e| format!("Failed to initialize compact logging: {e}")),
    }
}

/// Snapshot of the worker counters for tests and diagnostics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub orch_completions: u64,
    pub orch_failures: u64,
    pub orch_continued_as_new: u64,
    pub orch_not_found: u64,
    pub activity_success: u64,
    pub activity_app_errors: u64,
    pub activity_not_found: u64,
}

/// Atomic counters recorded by the dispatchers.
#[derive(Debug, Default)]
pub struct MetricsProvider {
    enabled: bool,
    orch_completions: AtomicU64,
    orch_failures: AtomicU64,
    orch_continued_as_new: AtomicU64,
    orch_not_found: AtomicU64,
    activity_success: AtomicU64,
    activity_app_errors: AtomicU64,
    activity_not_found: AtomicU64,
}

impl MetricsProvider {
    pub fn new(config: &ObservabilityConfig) -> Self {
        Self {
            enabled: config.metrics_enabled,
            ..Self::default()
        }
    }

    #[inline]
    fn bump(&self, counter: &AtomicU64) {
        if self.enabled {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_orchestration_completion(&self) {
        self.bump(&self.orch_completions);
    }

    #[inline]
    pub fn record_orchestration_failure(&self) {
        self.bump(&self.orch_failures);
    }

    #[inline]
    pub fn record_continue_as_new(&self) {
        self.bump(&self.orch_continued_as_new);
    }

    #[inline]
    pub fn record_orchestration_not_found(&self) {
        self.bump(&self.orch_not_found);
    }

    #[inline]
    pub fn record_activity_success(&self) {
        self.bump(&self.activity_success);
    }

    #[inline]
    pub fn record_activity_app_error(&self) {
        self.bump(&self.activity_app_errors);
    }

    #[inline]
    pub fn record_activity_not_found(&self) {
        self.bump(&self.activity_not_found);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            orch_completions: self.orch_completions.load(Ordering::Relaxed),
            orch_failures: self.orch_failures.load(Ordering::Relaxed),
            orch_continued_as_new: self.orch_continued_as_new.load(Ordering::Relaxed),
            orch_not_found: self.orch_not_found.load(Ordering::Relaxed),
            activity_success: self.activity_success.load(Ordering::Relaxed),
            activity_app_errors: self.activity_app_errors.load(Ordering::Relaxed),
            activity_not_found: self.activity_not_found.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_expression_targets_replayflow() {
        let expr = default_filter_expression("debug");
        assert!(expr.starts_with("warn,"));
        assert!(expr.contains("replayflow::worker=debug"));
        assert!(EnvFilter::try_new(expr).is_ok());
    }

    #[test]
    fn disabled_metrics_stay_at_zero() {
        let off = MetricsProvider::new(&ObservabilityConfig {
            metrics_enabled: false,
            ..Default::default()
        });
        off.record_activity_success();
        assert_eq!(off.snapshot(), MetricsSnapshot::default());

        let on = MetricsProvider::new(&ObservabilityConfig::default());
        on.record_activity_success();
        on.record_orchestration_not_found();
        let snap = on.snapshot();
        assert_eq!(snap.activity_success, 1);
        assert_eq!(snap.orch_not_found, 1);
    }
}
