//! Entry store implementations.
//!
//! - **Local** ([`LocalEntryStore`]) - in-process map with per-entry timers
//! - **Distributed** ([`RedisEntryStore`]) - shared `Redis` with TTL-on-write
//! - **Runtime-selected** ([`AnyEntryStore`]) - one of the above, picked from
//!   a [`RegistryConfig`]

pub mod local;
pub mod redis;

pub use local::LocalEntryStore;
pub use redis::RedisEntryStore;

use ::redis::aio::ConnectionManager;
use cancelkit_core::{Backend, Entry, EntryStore, RegistryConfig, RegistryError, StoreError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Entry store chosen at runtime from configuration.
#[derive(Debug, Clone)]
pub enum AnyEntryStore<Op> {
    /// Process-local store.
    Local(LocalEntryStore<Op>),

    /// `Redis` store.
    Distributed(RedisEntryStore<Op>),
}

impl<Op> AnyEntryStore<Op>
where
    Op: Clone + Send + Sync + 'static,
{
    /// Build the store named by `config.backend`.
    ///
    /// `client` is required for [`Backend::Distributed`] and ignored for
    /// [`Backend::Local`].
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Configuration`] if the distributed backend is
    /// selected without a client.
    pub fn from_config(
        config: &RegistryConfig,
        client: Option<ConnectionManager>,
    ) -> Result<Self, RegistryError> {
        match (config.backend, client) {
            (Backend::Local, client) => {
                if client.is_some() {
                    tracing::debug!("Redis client supplied for local backend; ignoring it");
                }
                Ok(Self::Local(LocalEntryStore::new()))
            }
            (Backend::Distributed, Some(conn_manager)) => Ok(Self::Distributed(
                RedisEntryStore::from_connection_manager(conn_manager, config.key_prefix.clone()),
            )),
            (Backend::Distributed, None) => Err(RegistryError::Configuration(
                "distributed backend selected without a Redis client".to_string(),
            )),
        }
    }

    /// Which backend this store uses.
    #[must_use]
    pub const fn backend(&self) -> Backend {
        match self {
            Self::Local(_) => Backend::Local,
            Self::Distributed(_) => Backend::Distributed,
        }
    }
}

impl<Op> EntryStore<Op> for AnyEntryStore<Op>
where
    Op: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn insert(
        &self,
        request_id: &str,
        entry: Entry<Op>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        match self {
            Self::Local(store) => store.insert(request_id, entry, ttl).await,
            Self::Distributed(store) => store.insert(request_id, entry, ttl).await,
        }
    }

    async fn load(&self, request_id: &str) -> Result<Option<Entry<Op>>, StoreError> {
        match self {
            Self::Local(store) => store.load(request_id).await,
            Self::Distributed(store) => store.load(request_id).await,
        }
    }

    async fn compare_and_swap(
        &self,
        request_id: &str,
        current: &Entry<Op>,
        next: Entry<Op>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        match self {
            Self::Local(store) => store.compare_and_swap(request_id, current, next, ttl).await,
            Self::Distributed(store) => {
                store.compare_and_swap(request_id, current, next, ttl).await
            }
        }
    }

    async fn remove(&self, request_id: &str) -> Result<bool, StoreError> {
        match self {
            Self::Local(store) => store.remove(request_id).await,
            Self::Distributed(store) => store.remove(request_id).await,
        }
    }
}
