//! # Cancelkit Core
//!
//! Core types and traits for propagating client cancellation to long-running
//! backend operations.
//!
//! A request is tracked from the moment it arrives until it finishes. While it
//! runs, application code may attach an opaque *operation identifier* (for
//! example a database backend pid). If the client goes away first, the
//! registry moves the request to `cancelling`, hands the identifier to a
//! caller-supplied [`CancellationHook`], and records the request as
//! `cancelled`.
//!
//! ## Core Concepts
//!
//! - **Entry**: the per-request record (`status`, optional operation, revision)
//! - **`EntryStore`**: where entries live (local map or `Redis`)
//! - **`CancellationHook`**: the strategy that kills an operation
//! - **`LifecycleObserver`**: side channel for tracing and metrics
//!
//! ## State Machine
//!
//! ```text
//! active ──► cancelling ──► cancelled
//!    │            │             │
//!    └────────────┴─────────────┴──► finished
//! ```
//!
//! The registry itself lives in `cancelkit-runtime`.

pub mod config;
pub mod entry;
pub mod error;
pub mod hook;
pub mod observer;
pub mod status;
pub mod store;

pub use config::{Backend, RegistryConfig};
pub use entry::Entry;
pub use error::{HookError, RegistryError, Result, StoreError};
pub use hook::{CancellationHook, FnHook, TimeoutHook, hook_fn};
pub use observer::{LifecycleEvent, LifecycleObserver, NoopObserver, Transition};
pub use status::RequestStatus;
pub use store::EntryStore;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Environment module - injected dependencies
///
/// All ambient dependencies of the registry are abstracted behind traits so
/// tests can substitute deterministic implementations.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Used to timestamp lifecycle events. Entry expiry is driven by the
    /// store's own timers, not by this clock.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
