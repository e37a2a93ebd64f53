//! # Cancelkit Testing
//!
//! Test doubles for the cancellation registry.
//!
//! This crate provides:
//! - [`mocks::RecordingHook`]: counts and records hook invocations
//! - [`mocks::RecordingObserver`]: captures lifecycle events
//! - [`mocks::UnavailableStore`]: an entry store whose backend is always down
//! - [`mocks::FixedClock`]: deterministic event timestamps
//!
//! ## Example
//!
//! ```ignore
//! use cancelkit_testing::mocks::{HookBehavior, RecordingHook};
//!
//! #[tokio::test]
//! async fn test_disconnect_cancels_query() {
//!     let hook = RecordingHook::new(HookBehavior::Succeed);
//!     let registry = CancellationRegistry::new(LocalEntryStore::new(), hook.clone(), TTL);
//!
//!     registry.register("r1").await;
//!     registry.associate_operation("r1", 42).await.unwrap();
//!     registry.mark_for_cancellation("r1").await;
//!
//!     assert_eq!(hook.calls(), vec![("r1".to_string(), 42)]);
//! }
//! ```

use chrono::{DateTime, Utc};
use cancelkit_core::environment::Clock;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use cancelkit_core::{
        CancellationHook, Entry, EntryStore, HookError, LifecycleEvent, LifecycleObserver,
        StoreError, Transition,
    };
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making event timestamps reproducible.
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// How a [`RecordingHook`] answers.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum HookBehavior {
        /// Return `Ok(true)`.
        Succeed,
        /// Return `Ok(false)`.
        Decline,
        /// Return `Err(HookError::Failed(..))`.
        Fail(String),
        /// Panic inside the hook.
        Panic,
    }

    /// Cancellation hook that records every call.
    ///
    /// Clones share the same call log.
    #[derive(Debug, Clone)]
    pub struct RecordingHook<Op> {
        calls: Arc<Mutex<Vec<(String, Op)>>>,
        behavior: HookBehavior,
        delay: Duration,
    }

    impl<Op: Clone> RecordingHook<Op> {
        /// Create a hook that answers with `behavior`.
        #[must_use]
        pub fn new(behavior: HookBehavior) -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                behavior,
                delay: Duration::ZERO,
            }
        }

        /// Sleep for `delay` before answering, keeping the request in
        /// `cancelling` long enough for races to be observable.
        #[must_use]
        pub const fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        /// All `(request_id, operation)` pairs received so far.
        #[must_use]
        pub fn calls(&self) -> Vec<(String, Op)> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Number of invocations so far.
        #[must_use]
        pub fn call_count(&self) -> usize {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        }
    }

    impl<Op> CancellationHook<Op> for RecordingHook<Op>
    where
        Op: Clone + Send + Sync,
    {
        #[allow(clippy::panic)] // Panicking is the configured behavior
        async fn cancel(&self, request_id: &str, operation: &Op) -> Result<bool, HookError> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((request_id.to_string(), operation.clone()));

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            match &self.behavior {
                HookBehavior::Succeed => Ok(true),
                HookBehavior::Decline => Ok(false),
                HookBehavior::Fail(message) => Err(HookError::Failed(message.clone())),
                HookBehavior::Panic => panic!("cancellation hook panicked on purpose"),
            }
        }
    }

    /// Observer that keeps every event it receives.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingObserver {
        events: Arc<Mutex<Vec<LifecycleEvent>>>,
    }

    impl RecordingObserver {
        /// Create an empty observer.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// All events received so far.
        #[must_use]
        pub fn events(&self) -> Vec<LifecycleEvent> {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Transitions recorded for one request, in order.
        #[must_use]
        pub fn transitions(&self, request_id: &str) -> Vec<Transition> {
            self.events()
                .into_iter()
                .filter(|event| event.request_id == request_id)
                .map(|event| event.transition)
                .collect()
        }

        /// Transition names recorded for one request, in order.
        #[must_use]
        pub fn transition_names(&self, request_id: &str) -> Vec<&'static str> {
            self.transitions(request_id)
                .iter()
                .map(Transition::name)
                .collect()
        }
    }

    impl LifecycleObserver for RecordingObserver {
        fn on_event(&self, event: &LifecycleEvent) {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event.clone());
        }
    }

    /// Observer that panics on every event.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct PanickingObserver;

    impl LifecycleObserver for PanickingObserver {
        #[allow(clippy::panic)] // Panicking is the point of this observer
        fn on_event(&self, _event: &LifecycleEvent) {
            panic!("observer failure");
        }
    }

    /// Entry store whose backend is permanently unreachable.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct UnavailableStore;

    fn unavailable() -> StoreError {
        StoreError::Connection("store unavailable".to_string())
    }

    impl<Op: Send + Sync> EntryStore<Op> for UnavailableStore {
        async fn insert(
            &self,
            _request_id: &str,
            _entry: Entry<Op>,
            _ttl: Duration,
        ) -> Result<bool, StoreError> {
            Err(unavailable())
        }

        async fn load(&self, _request_id: &str) -> Result<Option<Entry<Op>>, StoreError> {
            Err(unavailable())
        }

        async fn compare_and_swap(
            &self,
            _request_id: &str,
            _current: &Entry<Op>,
            _next: Entry<Op>,
            _ttl: Duration,
        ) -> Result<bool, StoreError> {
            Err(unavailable())
        }

        async fn remove(&self, _request_id: &str) -> Result<bool, StoreError> {
            Err(unavailable())
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    /// Install a `tracing` subscriber that writes through the test harness.
    ///
    /// Safe to call from every test; only the first call installs.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cancelkit=debug")),
            )
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use helpers::init_tracing;
pub use mocks::{
    FixedClock, HookBehavior, PanickingObserver, RecordingHook, RecordingObserver,
    UnavailableStore, test_clock,
};
