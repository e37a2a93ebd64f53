//! `PostgreSQL` cancellation hook for cancelkit.
//!
//! Cancels the query a request started by signalling the server process that
//! runs it. Application code records the process with [`backend_pid`] and
//! hands it to the registry:
//!
//! ```no_run
//! use cancelkit_postgres::{PostgresCancelHook, backend_pid};
//! use cancelkit_runtime::{CancellationRegistry, stores::LocalEntryStore};
//! use std::time::Duration;
//!
//! # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let registry = CancellationRegistry::new(
//!     LocalEntryStore::new(),
//!     PostgresCancelHook::new(pool.clone()),
//!     Duration::from_secs(600),
//! );
//!
//! registry.register("req-1").await;
//!
//! let mut conn = pool.acquire().await?;
//! registry.associate_operation("req-1", backend_pid(&mut conn).await?).await?;
//! // ... run the query on `conn`
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod hook;

pub use hook::{CancelMode, PgBackend, PostgresCancelHook, backend_pid};
