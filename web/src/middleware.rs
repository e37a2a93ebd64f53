//! Request cancellation middleware.
//!
//! [`CancellationLayer`] ties the request lifecycle to a
//! [`CancellationRegistry`]:
//!
//! 1. **Identify** the request from the `X-Request-ID` header, or a new UUID
//!    if the header is missing or names a request that is still in flight
//! 2. **Register** it and store a [`RequestId`] in the request extensions
//! 3. **Run** the inner service
//! 4. **Finish** the request when the inner service completes, and echo the
//!    id in the response `X-Request-ID` header
//!
//! If the response future is dropped before step 4 (hyper drops it when the
//! client goes away), the request is marked for cancellation instead.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::get};
//! use cancelkit_web::{CancellationLayer, RequestId};
//!
//! let app = Router::new()
//!     .route("/report", get(report))
//!     .layer(CancellationLayer::new(Arc::clone(&registry)));
//! ```

use crate::extractors::RequestId;
use axum::{extract::Request, response::Response};
use cancelkit_core::{CancellationHook, EntryStore, LifecycleObserver};
use cancelkit_runtime::CancellationRegistry;
use http::HeaderValue;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Layer that registers every request with a [`CancellationRegistry`].
pub struct CancellationLayer<Op, S, H, O> {
    registry: Arc<CancellationRegistry<Op, S, H, O>>,
}

impl<Op, S, H, O> CancellationLayer<Op, S, H, O> {
    /// Create a layer backed by `registry`.
    #[must_use]
    pub const fn new(registry: Arc<CancellationRegistry<Op, S, H, O>>) -> Self {
        Self { registry }
    }
}

impl<Op, S, H, O> Clone for CancellationLayer<Op, S, H, O> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<Svc, Op, S, H, O> Layer<Svc> for CancellationLayer<Op, S, H, O> {
    type Service = CancellationMiddleware<Svc, Op, S, H, O>;

    fn layer(&self, inner: Svc) -> Self::Service {
        CancellationMiddleware {
            inner,
            registry: Arc::clone(&self.registry),
        }
    }
}

/// Middleware service produced by [`CancellationLayer`].
pub struct CancellationMiddleware<Svc, Op, S, H, O> {
    inner: Svc,
    registry: Arc<CancellationRegistry<Op, S, H, O>>,
}

impl<Svc: Clone, Op, S, H, O> Clone for CancellationMiddleware<Svc, Op, S, H, O> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<Svc, Op, S, H, O> Service<Request> for CancellationMiddleware<Svc, Op, S, H, O>
where
    Svc: Service<Request, Response = Response> + Clone + Send + 'static,
    Svc::Future: Send + 'static,
    Svc::Error: Send + 'static,
    Op: Clone + Send + Sync + 'static,
    S: EntryStore<Op> + 'static,
    H: CancellationHook<Op> + 'static,
    O: LifecycleObserver + 'static,
{
    type Response = Svc::Response;
    type Error = Svc::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let supplied = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(str::to_owned);

        let registry = Arc::clone(&self.registry);
        // The service that was polled ready is the one that gets called
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let request_id = register_unique(&registry, supplied).await;
            req.extensions_mut().insert(RequestId(request_id.clone()));

            let span = tracing::info_span!(
                "http_request",
                request_id = %request_id,
                method = %req.method(),
                uri = %req.uri(),
            );

            let mut guard = DisconnectGuard::new(Arc::clone(&registry), request_id.clone());
            let result = inner.call(req).instrument(span.clone()).await;

            guard.disarm();
            registry
                .mark_as_finished(&request_id)
                .instrument(span)
                .await;

            let mut response = result?;
            if let Ok(header_value) = HeaderValue::from_str(&request_id) {
                response
                    .headers_mut()
                    .insert(REQUEST_ID_HEADER, header_value);
            }

            Ok(response)
        })
    }
}

/// Register the request under the client's id, or under a fresh UUID v4 when
/// none was supplied or the supplied one is already tracked.
async fn register_unique<Op, S, H, O>(
    registry: &CancellationRegistry<Op, S, H, O>,
    supplied: Option<String>,
) -> String
where
    Op: Clone + Send + Sync + 'static,
    S: EntryStore<Op>,
    H: CancellationHook<Op>,
    O: LifecycleObserver,
{
    if let Some(request_id) = supplied {
        if registry.register(&request_id).await {
            return request_id;
        }
        tracing::warn!(
            supplied_id = %request_id,
            "Supplied request id not registered (already in flight or store unavailable); assigning a fresh one"
        );
    }

    let request_id = Uuid::new_v4().to_string();
    registry.register(&request_id).await;
    request_id
}

/// Marks the request for cancellation if dropped while still armed.
struct DisconnectGuard<Op, S, H, O>
where
    Op: Clone + Send + Sync + 'static,
    S: EntryStore<Op> + 'static,
    H: CancellationHook<Op> + 'static,
    O: LifecycleObserver + 'static,
{
    registry: Option<Arc<CancellationRegistry<Op, S, H, O>>>,
    request_id: String,
}

impl<Op, S, H, O> DisconnectGuard<Op, S, H, O>
where
    Op: Clone + Send + Sync + 'static,
    S: EntryStore<Op> + 'static,
    H: CancellationHook<Op> + 'static,
    O: LifecycleObserver + 'static,
{
    const fn new(registry: Arc<CancellationRegistry<Op, S, H, O>>, request_id: String) -> Self {
        Self {
            registry: Some(registry),
            request_id,
        }
    }

    fn disarm(&mut self) {
        self.registry = None;
    }
}

impl<Op, S, H, O> Drop for DisconnectGuard<Op, S, H, O>
where
    Op: Clone + Send + Sync + 'static,
    S: EntryStore<Op> + 'static,
    H: CancellationHook<Op> + 'static,
    O: LifecycleObserver + 'static,
{
    fn drop(&mut self) {
        let Some(registry) = self.registry.take() else {
            return;
        };
        let request_id = std::mem::take(&mut self.request_id);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::info!(
                    request_id = %request_id,
                    "Response dropped before completion; cancelling request"
                );
                handle.spawn(async move {
                    registry.mark_for_cancellation(&request_id).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    request_id = %request_id,
                    "No runtime to cancel abandoned request; it will expire"
                );
            }
        }
    }
}
