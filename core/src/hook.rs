//! Cancellation hook trait and adapters.
//!
//! The hook is the caller-owned piece of code that actually terminates a
//! backend operation (kill a query, abort a job). The registry invokes it at
//! most once per cancelled request and never interprets the operation
//! identifier it passes along.
//!
//! # Example
//!
//! ```
//! use cancelkit_core::hook::{hook_fn, TimeoutHook};
//! use cancelkit_core::HookError;
//! use std::time::Duration;
//!
//! let hook = hook_fn(|request_id: String, pid: i32| async move {
//!     println!("terminating backend {pid} for {request_id}");
//!     Ok::<_, HookError>(true)
//! });
//!
//! // Timeouts are the caller's responsibility
//! let hook = TimeoutHook::new(hook, Duration::from_secs(5));
//! # let _ = hook;
//! ```

use crate::error::HookError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Strategy that cancels a backend operation.
///
/// # Returns
///
/// - `Ok(true)`: the operation was cancelled
/// - `Ok(false)`: nothing was cancelled (already finished, unknown id, ...)
/// - `Err(...)`: the attempt failed
///
/// The result is advisory. The registry records it for diagnostics and moves
/// the request to `Cancelled` either way.
pub trait CancellationHook<Op>: Send + Sync {
    /// Cancel `operation`, which belongs to request `request_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the cancellation attempt itself fails.
    fn cancel(
        &self,
        request_id: &str,
        operation: &Op,
    ) -> impl Future<Output = Result<bool, HookError>> + Send;
}

impl<Op, H> CancellationHook<Op> for Arc<H>
where
    Op: Sync,
    H: CancellationHook<Op>,
{
    fn cancel(
        &self,
        request_id: &str,
        operation: &Op,
    ) -> impl Future<Output = Result<bool, HookError>> + Send {
        (**self).cancel(request_id, operation)
    }
}

/// Hook backed by an async closure.
///
/// The closure receives owned copies of the request id and operation so the
/// returned future can be `'static`.
#[derive(Clone)]
pub struct FnHook<F> {
    f: F,
}

impl<F> std::fmt::Debug for FnHook<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHook").finish_non_exhaustive()
    }
}

/// Build a hook from an async closure.
#[must_use]
pub const fn hook_fn<F>(f: F) -> FnHook<F> {
    FnHook { f }
}

impl<Op, F, Fut> CancellationHook<Op> for FnHook<F>
where
    Op: Clone + Send + Sync,
    F: Fn(String, Op) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, HookError>> + Send,
{
    fn cancel(
        &self,
        request_id: &str,
        operation: &Op,
    ) -> impl Future<Output = Result<bool, HookError>> + Send {
        (self.f)(request_id.to_string(), operation.clone())
    }
}

/// Bounds the running time of another hook.
///
/// When the deadline passes the inner future is dropped and the call fails
/// with [`HookError::TimedOut`].
#[derive(Debug, Clone)]
pub struct TimeoutHook<H> {
    inner: H,
    timeout: Duration,
}

impl<H> TimeoutHook<H> {
    /// Wrap `inner` with a deadline.
    #[must_use]
    pub const fn new(inner: H, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// The configured deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl<Op, H> CancellationHook<Op> for TimeoutHook<H>
where
    Op: Sync,
    H: CancellationHook<Op>,
{
    async fn cancel(&self, request_id: &str, operation: &Op) -> Result<bool, HookError> {
        tokio::time::timeout(self.timeout, self.inner.cancel(request_id, operation))
            .await
            .map_err(|_| HookError::TimedOut(self.timeout))?
    }
}
