//! # Cancelkit Runtime
//!
//! The cancellation registry and its entry stores.
//!
//! ## Core Components
//!
//! - **`CancellationRegistry`**: tracks requests and drives the state machine
//! - **Stores**: [`stores::LocalEntryStore`] for a single process,
//!   [`stores::RedisEntryStore`] for a fleet, [`stores::AnyEntryStore`] to
//!   choose at startup
//! - **Observers**: [`TracingObserver`] and [`metrics::MetricsObserver`]
//!
//! ## Example
//!
//! ```ignore
//! use cancelkit_core::{hook_fn, RegistryConfig};
//! use cancelkit_runtime::{ConfiguredRegistry, TracingObserver};
//!
//! let config = RegistryConfig::from_env()?;
//! let registry = ConfiguredRegistry::from_config(&config, redis_client, hook)?
//!     .with_observer(TracingObserver);
//!
//! registry.register(&request_id).await;
//! // ... on client disconnect
//! registry.mark_for_cancellation(&request_id).await;
//! // ... on normal completion
//! registry.mark_as_finished(&request_id).await;
//! ```

/// Prometheus metrics for observability
pub mod metrics;

/// Tracing observer
pub mod observers;

/// The registry facade
pub mod registry;

/// Entry store implementations
pub mod stores;

pub use observers::TracingObserver;
pub use registry::{CancellationOutcome, CancellationRegistry, ConfiguredRegistry};
