//! The cancellation registry.
//!
//! [`CancellationRegistry`] is the only component with business logic. It
//! composes an [`EntryStore`], a [`CancellationHook`] and an optional
//! [`LifecycleObserver`] into the request state machine:
//!
//! ```text
//! register ──► active ──mark_for_cancellation──► cancelling ──hook──► cancelled
//!                 │                                   │                  │
//!                 └────────────── mark_as_finished ───┴──────────────────┴──► (removed)
//! ```
//!
//! # Error policy
//!
//! Request handling must never fail because of cancellation bookkeeping:
//!
//! - store failures are logged and the operation becomes a no-op
//! - hook failures (errors and panics) are logged and the entry still moves to
//!   `cancelled`
//! - observer panics are contained
//!
//! The only runtime errors a caller sees come from
//! [`CancellationRegistry::associate_operation`]: [`RegistryError::NotFound`]
//! and, under sustained write contention, [`RegistryError::Contended`].

use crate::stores::AnyEntryStore;
use ::redis::aio::ConnectionManager;
use cancelkit_core::environment::{Clock, SystemClock};
use cancelkit_core::{
    CancellationHook, Entry, EntryStore, LifecycleEvent, LifecycleObserver, NoopObserver,
    RegistryConfig, RegistryError, RequestStatus, Result, Transition,
};
use futures::FutureExt;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound on compare-and-swap retries caused by concurrent writers.
const MAX_SWAP_ATTEMPTS: usize = 8;

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// What [`CancellationRegistry::mark_for_cancellation`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationOutcome {
    /// Nothing to do: the request is absent, finished, already being
    /// cancelled, or the store could not be reached.
    Skipped,

    /// Cancelled before any operation was attached; the hook was not called.
    NoOperation,

    /// The hook ran and returned `success`.
    HookCompleted {
        /// The hook's advisory result
        success: bool,
    },

    /// The hook returned an error or panicked.
    HookFailed,
}

impl CancellationOutcome {
    /// Returns `true` if this call invoked the hook.
    #[must_use]
    pub const fn invoked_hook(self) -> bool {
        matches!(self, Self::HookCompleted { .. } | Self::HookFailed)
    }
}

/// Tracks in-flight requests and cancels their backend operations.
///
/// `Op` is the opaque operation identifier handed to the hook. The registry
/// never looks inside it; only the `Redis` store needs it to be serializable.
///
/// # Example
///
/// ```
/// use cancelkit_core::{hook_fn, HookError, RequestStatus};
/// use cancelkit_runtime::{CancellationRegistry, stores::LocalEntryStore};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let hook = hook_fn(|request_id: String, pid: i32| async move {
///     println!("cancelling backend {pid} of {request_id}");
///     Ok::<_, HookError>(true)
/// });
///
/// let registry = CancellationRegistry::new(
///     LocalEntryStore::new(),
///     hook,
///     Duration::from_secs(600),
/// );
///
/// registry.register("req-1").await;
/// registry.associate_operation("req-1", 42).await.ok();
/// registry.mark_for_cancellation("req-1").await;
///
/// assert_eq!(registry.get_status("req-1").await, RequestStatus::Cancelled);
/// # }
/// ```
pub struct CancellationRegistry<Op, S, H, O = NoopObserver> {
    store: S,
    hook: H,
    observer: O,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    _operation: PhantomData<fn() -> Op>,
}

/// Registry whose store was selected from a [`RegistryConfig`].
pub type ConfiguredRegistry<Op, H, O = NoopObserver> =
    CancellationRegistry<Op, AnyEntryStore<Op>, H, O>;

impl<Op, S, H> CancellationRegistry<Op, S, H, NoopObserver> {
    /// Create a registry without an observer.
    ///
    /// # Arguments
    ///
    /// * `store` - Where entries live
    /// * `hook` - Strategy invoked to cancel an operation
    /// * `ttl` - Lifetime of an entry that is never finished
    #[must_use]
    pub fn new(store: S, hook: H, ttl: Duration) -> Self {
        Self {
            store,
            hook,
            observer: NoopObserver,
            ttl,
            clock: Arc::new(SystemClock),
            _operation: PhantomData,
        }
    }
}

impl<Op, H> ConfiguredRegistry<Op, H>
where
    Op: Clone + Send + Sync + 'static,
{
    /// Create a registry from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Configuration`] if the distributed backend is
    /// selected without a client.
    pub fn from_config(
        config: &RegistryConfig,
        client: Option<ConnectionManager>,
        hook: H,
    ) -> Result<Self> {
        let store = AnyEntryStore::from_config(config, client)?;

        tracing::info!(
            backend = %config.backend,
            ttl_ms = millis(config.ttl),
            "Cancellation registry configured"
        );

        Ok(Self::new(store, hook, config.ttl))
    }
}

impl<Op, S, H, O> CancellationRegistry<Op, S, H, O> {
    /// Replace the lifecycle observer.
    #[must_use]
    pub fn with_observer<O2>(self, observer: O2) -> CancellationRegistry<Op, S, H, O2> {
        CancellationRegistry {
            store: self.store,
            hook: self.hook,
            observer,
            ttl: self.ttl,
            clock: self.clock,
            _operation: PhantomData,
        }
    }

    /// Replace the clock used to timestamp lifecycle events.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Entry time-to-live.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The cancellation hook.
    #[must_use]
    pub const fn hook(&self) -> &H {
        &self.hook
    }

    /// The lifecycle observer.
    #[must_use]
    pub const fn observer(&self) -> &O {
        &self.observer
    }
}

impl<Op, S, H, O> CancellationRegistry<Op, S, H, O>
where
    Op: Clone + Send + Sync + 'static,
    S: EntryStore<Op>,
    H: CancellationHook<Op>,
    O: LifecycleObserver,
{
    /// Start tracking `request_id` as `active`.
    ///
    /// Returns `true` if this call created the entry. Registering an id that
    /// is already tracked leaves the existing entry untouched and returns
    /// `false`. Store failures are logged and also return `false`; the
    /// request then simply runs without cancellation support.
    pub async fn register(&self, request_id: &str) -> bool {
        match self.store.insert(request_id, Entry::new(), self.ttl).await {
            Ok(true) => {
                tracing::debug!(request_id = request_id, "Registered request");
                self.notify(self.event(request_id, Transition::Registered));
                true
            }
            Ok(false) => {
                tracing::debug!(
                    request_id = request_id,
                    "Request already registered; keeping existing entry"
                );
                false
            }
            Err(e) => {
                tracing::warn!(
                    request_id = request_id,
                    error = %e,
                    "Failed to register request; cancellation disabled for it"
                );
                false
            }
        }
    }

    /// Attach the operation identifier that the hook should receive.
    ///
    /// Replaces any identifier attached earlier. Refreshes the entry's expiry.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if no `active` entry exists for
    /// `request_id` (never registered, expired, finished or already being
    /// cancelled). Returns [`RegistryError::Contended`] if the entry kept
    /// changing underneath every retry, in which case the hook will not see
    /// `operation`. Store failures are logged and reported as success.
    pub async fn associate_operation(&self, request_id: &str, operation: Op) -> Result<()> {
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let current = match self.store.load(request_id).await {
                Ok(Some(entry)) if entry.is_active() => entry,
                Ok(_) => return Err(RegistryError::not_found(request_id)),
                Err(e) => {
                    tracing::warn!(
                        request_id = request_id,
                        error = %e,
                        "Failed to load request; operation not associated"
                    );
                    return Ok(());
                }
            };

            let next = current.with_operation(operation.clone());

            match self
                .store
                .compare_and_swap(request_id, &current, next, self.ttl)
                .await
            {
                Ok(true) => {
                    tracing::debug!(request_id = request_id, "Associated operation");
                    self.notify(self.event(request_id, Transition::OperationAssociated));
                    return Ok(());
                }
                Ok(false) => {
                    tracing::trace!(request_id = request_id, "Entry changed concurrently; retrying");
                }
                Err(e) => {
                    tracing::warn!(
                        request_id = request_id,
                        error = %e,
                        "Failed to store operation identifier"
                    );
                    return Ok(());
                }
            }
        }

        tracing::error!(
            request_id = request_id,
            attempts = MAX_SWAP_ATTEMPTS,
            "Gave up associating operation under contention"
        );
        Err(RegistryError::Contended {
            request_id: request_id.to_string(),
        })
    }

    /// Cancel the request: `active → cancelling → cancelled`.
    ///
    /// Idempotent. If the entry is absent or not `active` this is a no-op, so
    /// concurrent callers (a disconnect firing twice, a manual and an
    /// automatic cancellation racing) invoke the hook at most once. The hook
    /// only runs if an operation identifier is attached; its result is
    /// reported to the observer and returned, but never changes the outcome
    /// of the state machine.
    pub async fn mark_for_cancellation(&self, request_id: &str) -> CancellationOutcome {
        let Some(cancelling) = self.begin_cancellation(request_id).await else {
            return CancellationOutcome::Skipped;
        };

        let outcome = match &cancelling.operation_identifier {
            Some(operation) => self.invoke_hook(request_id, operation).await,
            None => {
                tracing::info!(
                    request_id = request_id,
                    "Request cancelled before an operation was associated"
                );
                CancellationOutcome::NoOperation
            }
        };

        let cancelled = cancelling.advance(RequestStatus::Cancelled);

        match self
            .store
            .compare_and_swap(request_id, &cancelling, cancelled, self.ttl)
            .await
        {
            Ok(true) => {
                tracing::info!(request_id = request_id, ?outcome, "Request cancelled");
            }
            Ok(false) => {
                tracing::debug!(
                    request_id = request_id,
                    "Request finished or expired while the hook was running"
                );
            }
            Err(e) => {
                tracing::warn!(
                    request_id = request_id,
                    error = %e,
                    "Failed to record cancellation; entry stays cancelling until it expires"
                );
            }
        }

        outcome
    }

    /// Finish the request and remove its entry.
    ///
    /// Idempotent and safe on ids that were never registered.
    pub async fn mark_as_finished(&self, request_id: &str) {
        match self.store.remove(request_id).await {
            Ok(true) => {
                tracing::debug!(request_id = request_id, "Request finished");
                self.notify(self.event(request_id, Transition::Completed));
            }
            Ok(false) => {
                tracing::trace!(request_id = request_id, "Finish on untracked request");
            }
            Err(e) => {
                tracing::warn!(
                    request_id = request_id,
                    error = %e,
                    "Failed to remove finished request; it will expire on its own"
                );
            }
        }
    }

    /// Current status of `request_id`.
    ///
    /// Absent, expired and never-registered requests all report
    /// [`RequestStatus::Finished`]; callers cannot tell them apart. This also
    /// means a mistyped id looks like a finished request. A store failure is
    /// logged and reported as `Finished` as well.
    pub async fn get_status(&self, request_id: &str) -> RequestStatus {
        match self.store.load(request_id).await {
            Ok(Some(entry)) => entry.status,
            Ok(None) => RequestStatus::Finished,
            Err(e) => {
                tracing::warn!(
                    request_id = request_id,
                    error = %e,
                    "Failed to read request status"
                );
                RequestStatus::Finished
            }
        }
    }

    /// Move an `active` entry to `cancelling`.
    ///
    /// Returns the `cancelling` entry if this call won the transition.
    async fn begin_cancellation(&self, request_id: &str) -> Option<Entry<Op>> {
        let mut reported = false;

        for _ in 0..MAX_SWAP_ATTEMPTS {
            let current = match self.store.load(request_id).await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    tracing::debug!(
                        request_id = request_id,
                        "Cancellation requested for untracked request"
                    );
                    return None;
                }
                Err(e) => {
                    tracing::warn!(
                        request_id = request_id,
                        error = %e,
                        "Failed to load request for cancellation"
                    );
                    return None;
                }
            };

            if !reported {
                reported = true;
                self.notify(
                    self.event(request_id, Transition::DisconnectDetected)
                        .with_metadata("status", current.status.as_str()),
                );
            }

            if !current.is_active() {
                tracing::debug!(
                    request_id = request_id,
                    status = %current.status,
                    "Request not active; cancellation already handled"
                );
                return None;
            }

            let cancelling = current.advance(RequestStatus::Cancelling);

            match self
                .store
                .compare_and_swap(request_id, &current, cancelling.clone(), self.ttl)
                .await
            {
                Ok(true) => return Some(cancelling),
                // Another writer got in between; re-read and decide again
                Ok(false) => continue,
                Err(e) => {
                    tracing::warn!(
                        request_id = request_id,
                        error = %e,
                        "Failed to mark request as cancelling"
                    );
                    return None;
                }
            }
        }

        tracing::warn!(
            request_id = request_id,
            attempts = MAX_SWAP_ATTEMPTS,
            "Gave up cancelling request under contention"
        );
        None
    }

    async fn invoke_hook(&self, request_id: &str, operation: &Op) -> CancellationOutcome {
        let started = Instant::now();
        let result = AssertUnwindSafe(self.hook.cancel(request_id, operation))
            .catch_unwind()
            .await;
        let elapsed = started.elapsed();

        let (outcome, error) = match result {
            Ok(Ok(success)) => (CancellationOutcome::HookCompleted { success }, None),
            Ok(Err(e)) => (CancellationOutcome::HookFailed, Some(e.to_string())),
            Err(_) => (
                CancellationOutcome::HookFailed,
                Some("cancellation hook panicked".to_string()),
            ),
        };

        let success = matches!(outcome, CancellationOutcome::HookCompleted { success: true });
        let mut event = self.event(request_id, Transition::HookInvoked { success, elapsed });

        match error {
            Some(error) => {
                tracing::warn!(
                    request_id = request_id,
                    error = %error,
                    elapsed_ms = millis(elapsed),
                    "Cancellation hook failed"
                );
                event = event.with_metadata("error", error);
            }
            None => {
                tracing::info!(
                    request_id = request_id,
                    success = success,
                    elapsed_ms = millis(elapsed),
                    "Cancellation hook returned"
                );
            }
        }

        self.notify(event);
        outcome
    }

    fn event(&self, request_id: &str, transition: Transition) -> LifecycleEvent {
        LifecycleEvent::new(request_id, transition, self.clock.now())
    }

    fn notify(&self, event: LifecycleEvent) {
        let delivered =
            std::panic::catch_unwind(AssertUnwindSafe(|| self.observer.on_event(&event)));

        if delivered.is_err() {
            tracing::warn!(
                request_id = %event.request_id,
                transition = event.transition.name(),
                "Lifecycle observer panicked; event dropped"
            );
        }
    }
}

impl<Op, S, H, O> std::fmt::Debug for CancellationRegistry<Op, S, H, O>
where
    S: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationRegistry")
            .field("store", &self.store)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
