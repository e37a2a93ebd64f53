//! In-process entry store.
//!
//! Entries live in a sharded [`DashMap`], so writers of different request ids
//! never contend on a global lock and every compare-and-swap runs under the
//! shard lock of its key.
//!
//! # Expiry
//!
//! Each slot owns a tokio timer task that deletes the slot when its deadline
//! passes. Every write re-arms the timer and `remove` aborts it. Timers carry
//! the generation of the slot they were armed for, so a late timer can never
//! delete a newer slot for the same id. Reads treat a passed deadline as
//! absent even if the timer has not fired yet.
//!
//! Timer tasks hold only a weak reference to the map; dropping the last
//! clone of the store aborts every pending timer.

use cancelkit_core::{Entry, EntryStore, StoreError};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

// Used when `now + ttl` overflows `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

struct Slot<Op> {
    entry: Entry<Op>,
    deadline: Instant,
    generation: u64,
    timer: AbortHandle,
}

impl<Op> Slot<Op> {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

struct Slots<Op> {
    map: DashMap<String, Slot<Op>>,
    generations: AtomicU64,
}

impl<Op> Drop for Slots<Op> {
    fn drop(&mut self) {
        for slot in &self.map {
            slot.timer.abort();
        }
    }
}

/// Process-local [`EntryStore`].
///
/// Cheap to clone; clones share the same map.
///
/// # Example
///
/// ```
/// use cancelkit_core::{Entry, EntryStore};
/// use cancelkit_runtime::stores::LocalEntryStore;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), cancelkit_core::StoreError> {
/// let store: LocalEntryStore<u32> = LocalEntryStore::new();
///
/// assert!(store.insert("req-1", Entry::new(), Duration::from_secs(60)).await?);
/// assert!(store.load("req-1").await?.is_some());
/// # Ok(())
/// # }
/// ```
pub struct LocalEntryStore<Op> {
    slots: Arc<Slots<Op>>,
}

impl<Op> LocalEntryStore<Op>
where
    Op: Clone + Send + Sync + 'static,
{
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Slots {
                map: DashMap::new(),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Number of slots currently held, including expired ones not yet reaped.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.map.len()
    }

    /// Returns `true` if no slots are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.map.is_empty()
    }

    /// Drop every entry and abort all expiry timers.
    pub fn clear(&self) {
        self.slots.map.retain(|_, slot| {
            slot.timer.abort();
            false
        });
    }

    /// Build a fresh slot for `request_id` and start its expiry timer.
    fn arm(&self, request_id: &str, entry: Entry<Op>, ttl: Duration) -> Slot<Op> {
        let generation = self.slots.generations.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let deadline = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + FAR_FUTURE);

        let slots: Weak<Slots<Op>> = Arc::downgrade(&self.slots);
        let key = request_id.to_string();

        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;

            let Some(slots) = slots.upgrade() else {
                return;
            };

            let expired = slots
                .map
                .remove_if(&key, |_, slot| slot.generation == generation);

            if expired.is_some() {
                tracing::debug!(request_id = %key, "Local entry expired");
            }
        });

        Slot {
            entry,
            deadline,
            generation,
            timer: task.abort_handle(),
        }
    }
}

impl<Op> Default for LocalEntryStore<Op>
where
    Op: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Op> Clone for LocalEntryStore<Op> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<Op> std::fmt::Debug for LocalEntryStore<Op> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEntryStore")
            .field("slots", &self.slots.map.len())
            .finish()
    }
}

impl<Op> EntryStore<Op> for LocalEntryStore<Op>
where
    Op: Clone + Send + Sync + 'static,
{
    async fn insert(
        &self,
        request_id: &str,
        entry: Entry<Op>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        match self.slots.map.entry(request_id.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                if !occupied.get().is_expired() {
                    return Ok(false);
                }

                // Deadline passed but the timer has not reaped the slot yet
                let stale = occupied.insert(self.arm(request_id, entry, ttl));
                stale.timer.abort();
                Ok(true)
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(self.arm(request_id, entry, ttl));
                Ok(true)
            }
        }
    }

    async fn load(&self, request_id: &str) -> Result<Option<Entry<Op>>, StoreError> {
        let Some(slot) = self.slots.map.get(request_id) else {
            return Ok(None);
        };

        if slot.is_expired() {
            return Ok(None);
        }

        Ok(Some(slot.entry.clone()))
    }

    async fn compare_and_swap(
        &self,
        request_id: &str,
        current: &Entry<Op>,
        next: Entry<Op>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let Some(mut slot) = self.slots.map.get_mut(request_id) else {
            return Ok(false);
        };

        let unchanged = !slot.is_expired()
            && slot.entry.status == current.status
            && slot.entry.revision == current.revision;

        if !unchanged {
            return Ok(false);
        }

        let replacement = self.arm(request_id, next, ttl);
        let stale = std::mem::replace(&mut *slot, replacement);
        stale.timer.abort();

        Ok(true)
    }

    async fn remove(&self, request_id: &str) -> Result<bool, StoreError> {
        let Some((_, slot)) = self.slots.map.remove(request_id) else {
            return Ok(false);
        };

        slot.timer.abort();
        Ok(!slot.is_expired())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use cancelkit_core::RequestStatus;

    const LONG: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_insert_is_create_only() {
        let store: LocalEntryStore<u32> = LocalEntryStore::new();

        assert!(store.insert("r1", Entry::new(), LONG).await.unwrap());

        let cancelling = Entry::new().advance(RequestStatus::Cancelling);
        assert!(!store.insert("r1", cancelling, LONG).await.unwrap());

        let entry = store.load("r1").await.unwrap().unwrap();
        assert_eq!(entry.status, RequestStatus::Active);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_compare_and_swap_checks_revision() {
        let store: LocalEntryStore<u32> = LocalEntryStore::new();
        store.insert("r1", Entry::new(), LONG).await.unwrap();

        let current = store.load("r1").await.unwrap().unwrap();
        let with_op = current.with_operation(7);
        assert!(store
            .compare_and_swap("r1", &current, with_op.clone(), LONG)
            .await
            .unwrap());

        // Stale snapshot: same status, old revision
        let stale_next = current.advance(RequestStatus::Cancelling);
        assert!(!store
            .compare_and_swap("r1", &current, stale_next, LONG)
            .await
            .unwrap());

        let stored = store.load("r1").await.unwrap().unwrap();
        assert_eq!(stored, with_op);
    }

    #[tokio::test]
    async fn test_compare_and_swap_on_absent_entry() {
        let store: LocalEntryStore<u32> = LocalEntryStore::new();
        let current = Entry::new();

        let swapped = store
            .compare_and_swap("missing", &current, current.with_operation(1), LONG)
            .await
            .unwrap();

        assert!(!swapped);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let store: LocalEntryStore<u32> = LocalEntryStore::new();
        store
            .insert("r1", Entry::new(), Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(store.load("r1").await.unwrap().is_none());
        assert!(store.is_empty(), "timer should have reaped the slot");
    }

    #[tokio::test]
    async fn test_write_refreshes_expiry() {
        let store: LocalEntryStore<u32> = LocalEntryStore::new();
        store
            .insert("r1", Entry::new(), Duration::from_millis(30))
            .await
            .unwrap();

        let current = store.load("r1").await.unwrap().unwrap();
        store
            .compare_and_swap("r1", &current, current.with_operation(1), LONG)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(store.load("r1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_timer_does_not_remove_new_slot() {
        let store: LocalEntryStore<u32> = LocalEntryStore::new();
        store
            .insert("r1", Entry::new(), Duration::from_millis(20))
            .await
            .unwrap();

        assert!(store.remove("r1").await.unwrap());
        store.insert("r1", Entry::new(), LONG).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.load("r1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store: LocalEntryStore<u32> = LocalEntryStore::new();
        store.insert("r1", Entry::new(), LONG).await.unwrap();

        assert!(store.remove("r1").await.unwrap());
        assert!(!store.remove("r1").await.unwrap());
        assert!(!store.remove("never-registered").await.unwrap());
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let store: LocalEntryStore<u32> = LocalEntryStore::new();
        let clone = store.clone();

        store.insert("r1", Entry::new(), LONG).await.unwrap();
        assert!(clone.load("r1").await.unwrap().is_some());

        clone.clear();
        assert!(store.is_empty());
    }
}
