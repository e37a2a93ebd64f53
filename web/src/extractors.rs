//! Custom Axum extractors.
//!
//! - `RequestId`: the id [`CancellationLayer`](crate::CancellationLayer)
//!   registered the request under
//!
//! # Example
//!
//! ```ignore
//! use axum::extract::State;
//! use cancelkit_web::RequestId;
//!
//! async fn report(
//!     State(state): State<AppState>,
//!     RequestId(request_id): RequestId,
//! ) -> Result<Json<Report>, AppError> {
//!     let mut conn = state.pool.acquire().await?;
//!     let backend = backend_pid(&mut conn).await?;
//!     state.registry.associate_operation(&request_id, backend).await?;
//!     // ... run the query on `conn`
//! }
//! ```

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
};

/// Id under which the current request is tracked.
///
/// Inserted into the request extensions by
/// [`CancellationLayer`](crate::CancellationLayer). Extraction fails with
/// `500 Internal Server Error` if the layer is not installed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(pub String);

impl RequestId {
    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Self>().cloned().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "cancellation layer not installed",
        ))
    }
}
