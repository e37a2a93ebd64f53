//! Axum integration for cancelkit.
//!
//! Wraps a router so that every request is tracked by a
//! [`CancellationRegistry`](cancelkit_runtime::CancellationRegistry): a client
//! disconnect cancels the backend work started for the request, a normal
//! response finishes it.
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives; [`CancellationLayer`] registers its id
//! 2. **Handler** extracts [`RequestId`] and associates the backend operation
//! 3. **Response** is sent; the request is marked finished
//! 4. **Disconnect** before step 3 drops the response future; the request is
//!    marked for cancellation and the hook stops the backend operation
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::get};
//! use cancelkit_web::CancellationLayer;
//!
//! let registry = Arc::new(ConfiguredRegistry::from_config(&config, redis, hook)?);
//!
//! let app = Router::new()
//!     .route("/report", get(report))
//!     .with_state(Arc::clone(&registry))
//!     .layer(CancellationLayer::new(registry));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod extractors;
pub mod middleware;

pub use extractors::RequestId;
pub use middleware::{CancellationLayer, CancellationMiddleware, REQUEST_ID_HEADER};
