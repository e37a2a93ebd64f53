//! Entry store trait.
//!
//! A store holds at most one [`Entry`] per request id and expires entries on
//! its own once their time-to-live elapses. The registry builds every state
//! transition out of four primitives:
//!
//! - `insert` (create only if absent)
//! - `load`
//! - `compare_and_swap` (replace only if status and revision still match)
//! - `remove`
//!
//! # Implementation Notes
//!
//! - `compare_and_swap` MUST be atomic per key. This is what guarantees the
//!   cancellation hook runs at most once when several tasks race to cancel the
//!   same request.
//! - Every successful write refreshes the entry's expiry to `now + ttl`.
//! - An expired entry must behave exactly like an absent one.

use crate::entry::Entry;
use crate::error::StoreError;
use std::future::Future;
use std::time::Duration;

/// Storage backend for registry entries.
pub trait EntryStore<Op>: Send + Sync {
    /// Create an entry unless one already exists for `request_id`.
    ///
    /// # Returns
    ///
    /// `true` if the entry was created, `false` if one was already present.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn insert(
        &self,
        request_id: &str,
        entry: Entry<Op>,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Read the current entry, `None` if absent or expired.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails or the stored record cannot be decoded.
    fn load(
        &self,
        request_id: &str,
    ) -> impl Future<Output = Result<Option<Entry<Op>>, StoreError>> + Send;

    /// Atomically replace `current` with `next`.
    ///
    /// The swap only happens if the stored entry still has the same `status`
    /// and `revision` as `current`.
    ///
    /// # Returns
    ///
    /// `true` if `next` was written, `false` if the entry is absent or changed.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn compare_and_swap(
        &self,
        request_id: &str,
        current: &Entry<Op>,
        next: Entry<Op>,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Delete the entry and cancel its expiry.
    ///
    /// # Returns
    ///
    /// `true` if an entry was removed.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn remove(&self, request_id: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;
}
