//! Tracing observer.

use cancelkit_core::{LifecycleEvent, LifecycleObserver, Transition};

/// Emits one `tracing` event per lifecycle transition under the
/// `cancelkit::lifecycle` target.
///
/// Hook failures are logged at `WARN`, everything else at `INFO`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl LifecycleObserver for TracingObserver {
    fn on_event(&self, event: &LifecycleEvent) {
        match &event.transition {
            Transition::HookInvoked { success, elapsed } if !success => {
                tracing::warn!(
                    target: "cancelkit::lifecycle",
                    request_id = %event.request_id,
                    transition = event.transition.name(),
                    timestamp = %event.timestamp,
                    elapsed = ?elapsed,
                    metadata = ?event.metadata,
                    "Cancellation hook did not cancel the operation"
                );
            }
            Transition::HookInvoked { success, elapsed } => {
                tracing::info!(
                    target: "cancelkit::lifecycle",
                    request_id = %event.request_id,
                    transition = event.transition.name(),
                    timestamp = %event.timestamp,
                    success = success,
                    elapsed = ?elapsed,
                    "Cancellation hook invoked"
                );
            }
            transition => {
                tracing::info!(
                    target: "cancelkit::lifecycle",
                    request_id = %event.request_id,
                    transition = transition.name(),
                    timestamp = %event.timestamp,
                    metadata = ?event.metadata,
                    "Request lifecycle transition"
                );
            }
        }
    }
}
