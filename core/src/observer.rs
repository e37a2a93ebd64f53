//! Lifecycle observation.
//!
//! Observers receive a [`LifecycleEvent`] for every notable transition of a
//! tracked request. They are a side channel for tracing and metrics: the
//! registry never waits on them and never lets them influence state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// What happened to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    /// The request was registered.
    Registered,

    /// A disconnect (or other cancellation trigger) was reported.
    DisconnectDetected,

    /// An operation identifier was attached.
    OperationAssociated,

    /// The cancellation hook returned.
    HookInvoked {
        /// `true` only if the hook returned `Ok(true)`
        success: bool,
        /// Wall time spent inside the hook
        elapsed: Duration,
    },

    /// The request was finished and its entry removed.
    Completed,
}

impl Transition {
    /// Short stable name, suitable for metric labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::DisconnectDetected => "disconnect_detected",
            Self::OperationAssociated => "operation_associated",
            Self::HookInvoked { .. } => "hook_invoked",
            Self::Completed => "completed",
        }
    }
}

/// Notification delivered to a [`LifecycleObserver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleEvent {
    /// Request the event is about.
    pub request_id: String,

    /// What happened.
    pub transition: Transition,

    /// When it happened.
    pub timestamp: DateTime<Utc>,

    /// Free-form diagnostic details (previous status, hook error, ...).
    pub metadata: BTreeMap<String, String>,
}

impl LifecycleEvent {
    /// Create an event without metadata.
    #[must_use]
    pub fn new(request_id: &str, transition: Transition, timestamp: DateTime<Utc>) -> Self {
        Self {
            request_id: request_id.to_string(),
            transition,
            timestamp,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Receives lifecycle notifications.
///
/// Implementations must be cheap and must not block; they run inline on the
/// task that performed the transition.
pub trait LifecycleObserver: Send + Sync {
    /// Called after a transition happened.
    fn on_event(&self, event: &LifecycleEvent);
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl LifecycleObserver for NoopObserver {
    fn on_event(&self, _event: &LifecycleEvent) {}
}

impl<A, B> LifecycleObserver for (A, B)
where
    A: LifecycleObserver,
    B: LifecycleObserver,
{
    fn on_event(&self, event: &LifecycleEvent) {
        self.0.on_event(event);
        self.1.on_event(event);
    }
}

impl<O: LifecycleObserver + ?Sized> LifecycleObserver for std::sync::Arc<O> {
    fn on_event(&self, event: &LifecycleEvent) {
        (**self).on_event(event);
    }
}
