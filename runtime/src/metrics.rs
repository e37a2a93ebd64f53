//! Prometheus metrics for cancellation tracking.
//!
//! [`MetricsObserver`] turns lifecycle events into counters and a hook
//! latency histogram. [`PrometheusMetrics`] installs the global Prometheus
//! recorder and renders the scrape payload.
//!
//! # Example
//!
//! ```rust,no_run
//! use cancelkit_runtime::metrics::{MetricsObserver, PrometheusMetrics};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut metrics = PrometheusMetrics::new();
//! metrics.install()?;
//!
//! // registry.with_observer(MetricsObserver) ...
//!
//! let payload = metrics.render();
//! # Ok(())
//! # }
//! ```

use cancelkit_core::{LifecycleEvent, LifecycleObserver, Transition};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Counter of lifecycle transitions, labelled by `transition`.
pub const TRANSITIONS_TOTAL: &str = "cancelkit_transitions_total";

/// Counter of hook invocations, labelled by `success`.
pub const HOOK_INVOCATIONS_TOTAL: &str = "cancelkit_hook_invocations_total";

/// Histogram of time spent inside the cancellation hook.
pub const HOOK_DURATION_SECONDS: &str = "cancelkit_hook_duration_seconds";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Global Prometheus recorder.
#[derive(Default)]
pub struct PrometheusMetrics {
    handle: Option<PrometheusHandle>,
}

impl PrometheusMetrics {
    /// Create an uninstalled recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe the registry metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests) this logs a
    /// warning and leaves `handle()` empty.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(HOOK_DURATION_SECONDS.to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                describe_metrics();
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if the recorder was not installed by this instance.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn describe_metrics() {
    describe_counter!(
        TRANSITIONS_TOTAL,
        "Total number of request lifecycle transitions"
    );
    describe_counter!(
        HOOK_INVOCATIONS_TOTAL,
        "Total number of cancellation hook invocations"
    );
    describe_histogram!(
        HOOK_DURATION_SECONDS,
        "Time spent inside the cancellation hook"
    );
}

/// Observer that records lifecycle events as metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsObserver;

impl LifecycleObserver for MetricsObserver {
    fn on_event(&self, event: &LifecycleEvent) {
        counter!(TRANSITIONS_TOTAL, "transition" => event.transition.name()).increment(1);

        if let Transition::HookInvoked { success, elapsed } = &event.transition {
            let success = if *success { "true" } else { "false" };
            counter!(HOOK_INVOCATIONS_TOTAL, "success" => success).increment(1);
            histogram!(HOOK_DURATION_SECONDS).record(elapsed.as_secs_f64());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cancelkit_core::Utc;
    use std::time::Duration;

    #[test]
    fn test_uninstalled_recorder_renders_nothing() {
        let metrics = PrometheusMetrics::new();
        assert!(metrics.handle().is_none());
        assert!(metrics.render().is_none());
    }

    #[test]
    fn test_observer_records_hook_invocations() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            let observer = MetricsObserver;
            observer.on_event(&LifecycleEvent::new("r1", Transition::Registered, Utc::now()));
            observer.on_event(&LifecycleEvent::new(
                "r1",
                Transition::HookInvoked {
                    success: true,
                    elapsed: Duration::from_millis(3),
                },
                Utc::now(),
            ));
        });

        let rendered = handle.render();
        assert!(rendered.contains("cancelkit_transitions_total{transition=\"registered\"} 1"));
        assert!(rendered.contains("cancelkit_hook_invocations_total{success=\"true\"} 1"));
        assert!(rendered.contains(HOOK_DURATION_SECONDS));
    }
}
