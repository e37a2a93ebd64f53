//! `Redis`-based entry store.
//!
//! # Architecture
//!
//! Entries are stored with:
//! - **Key**: `{key_prefix}{request_id}` → JSON-serialized [`Entry`]
//! - **TTL**: the registry TTL, re-applied on every write (`PX`, milliseconds)
//! - **Create**: `SET NX PX` so a second registration never clobbers an entry
//! - **Compare-and-swap**: a Lua script compares `status` and `revision`
//!   server-side and writes the new record in the same step
//!
//! Expired keys are dropped by `Redis` itself; a missing key reads as `None`.
//!
//! # Concurrency
//!
//! Several processes may mutate the same request (a disconnect observed by
//! one node, completion by another). Because every transition goes through
//! the compare-and-swap script, only one writer can move an entry out of
//! `active`, which keeps the cancellation hook at-most-once across the fleet.
//!
//! # Example
//!
//! ```no_run
//! use cancelkit_core::{Entry, EntryStore};
//! use cancelkit_runtime::stores::RedisEntryStore;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store: RedisEntryStore<serde_json::Value> =
//!     RedisEntryStore::new("redis://127.0.0.1:6379", "cancelkit:request:").await?;
//!
//! store.insert("req-1", Entry::new(), Duration::from_secs(600)).await?;
//! # Ok(())
//! # }
//! ```

use cancelkit_core::{Entry, EntryStore, StoreError};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Replace `KEYS[1]` with `ARGV[3]` (TTL `ARGV[4]` ms) only if the stored
/// record still has status `ARGV[1]` and revision `ARGV[2]`.
const COMPARE_AND_SWAP_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if not current then
    return 0
end

local decoded = cjson.decode(current)
local revision = tonumber(decoded['revision'] or 0)
if decoded['status'] ~= ARGV[1] or revision ~= tonumber(ARGV[2]) then
    return 0
end

redis.call('SET', KEYS[1], ARGV[3], 'PX', ARGV[4])
return 1
";

/// `Redis`-backed [`EntryStore`].
///
/// # Thread Safety
///
/// This type is `Clone` and can be safely shared across tasks. Each clone
/// shares the same `ConnectionManager` (multiplexed connection).
pub struct RedisEntryStore<Op> {
    /// Connection manager for connection reuse.
    conn_manager: ConnectionManager,

    /// Namespace prepended to every request id.
    key_prefix: String,

    cas_script: Arc<Script>,

    _operation: PhantomData<fn() -> Op>,
}

impl<Op> RedisEntryStore<Op> {
    /// Connect to `Redis`.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - `Redis` connection URL (e.g., "<redis://127.0.0.1:6379>")
    /// * `key_prefix` - Namespace for entry keys (e.g., `"cancelkit:request:"`)
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if:
    /// - `Redis` URL is malformed
    /// - Connection to `Redis` server fails
    /// - Authentication fails
    pub async fn new(redis_url: &str, key_prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = Client::open(redis_url).map_err(|e| {
            StoreError::Connection(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            StoreError::Connection(format!("Failed to create Redis connection manager: {e}"))
        })?;

        let store = Self::from_connection_manager(conn_manager, key_prefix);

        tracing::info!(key_prefix = %store.key_prefix, "RedisEntryStore initialized");

        Ok(store)
    }

    /// Build a store on top of an existing connection manager.
    #[must_use]
    pub fn from_connection_manager(
        conn_manager: ConnectionManager,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            conn_manager,
            key_prefix: key_prefix.into(),
            cas_script: Arc::new(Script::new(COMPARE_AND_SWAP_SCRIPT)),
            _operation: PhantomData,
        }
    }

    /// The configured key prefix.
    #[must_use]
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// `Redis` key holding the entry for `request_id`.
    #[must_use]
    pub fn entry_key(&self, request_id: &str) -> String {
        format!("{}{request_id}", self.key_prefix)
    }
}

/// TTL in whole milliseconds, at least 1 (`PX 0` is rejected by `Redis`).
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn encode<Op: Serialize>(entry: &Entry<Op>) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(entry).map_err(|e| StoreError::Serialization(e.to_string()))
}

impl<Op> Clone for RedisEntryStore<Op> {
    fn clone(&self) -> Self {
        Self {
            conn_manager: self.conn_manager.clone(),
            key_prefix: self.key_prefix.clone(),
            cas_script: Arc::clone(&self.cas_script),
            _operation: PhantomData,
        }
    }
}

impl<Op> std::fmt::Debug for RedisEntryStore<Op> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisEntryStore")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl<Op> EntryStore<Op> for RedisEntryStore<Op>
where
    Op: Serialize + DeserializeOwned + Send + Sync,
{
    async fn insert(
        &self,
        request_id: &str,
        entry: Entry<Op>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn_manager.clone();
        let key = self.entry_key(request_id);
        let payload = encode(&entry)?;
        let ttl_ms = ttl_millis(ttl);

        // SET NX replies nil when the key already exists
        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(payload)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to store entry: {e}")))?;

        let created = reply.is_some();

        tracing::trace!(
            request_id = request_id,
            ttl_ms = ttl_ms,
            created = created,
            "Redis SET NX entry"
        );

        Ok(created)
    }

    async fn load(&self, request_id: &str) -> Result<Option<Entry<Op>>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let key = self.entry_key(request_id);

        let bytes: Option<Vec<u8>> = conn
            .get(&key)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to load entry: {e}")))?;

        let Some(bytes) = bytes else {
            // Finished, expired by TTL, or never registered
            return Ok(None);
        };

        let entry = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(Some(entry))
    }

    async fn compare_and_swap(
        &self,
        request_id: &str,
        current: &Entry<Op>,
        next: Entry<Op>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn_manager.clone();
        let key = self.entry_key(request_id);
        let payload = encode(&next)?;

        let swapped: i32 = self
            .cas_script
            .key(&key)
            .arg(current.status.as_str())
            .arg(current.revision)
            .arg(payload)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                StoreError::Backend(format!("Failed to execute compare-and-swap: {e}"))
            })?;

        Ok(swapped == 1)
    }

    async fn remove(&self, request_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn_manager.clone();
        let key = self.entry_key(request_id);

        let deleted: i32 = conn
            .del(&key)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to delete entry: {e}")))?;

        if deleted == 0 {
            tracing::trace!(
                request_id = request_id,
                "Entry delete: key not found (finished, expired, or never registered)"
            );
        }

        Ok(deleted > 0)
    }
}
