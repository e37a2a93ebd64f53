//! Registry configuration.
//!
//! Configuration values should be provided by the application. The defaults
//! target a single-process deployment with a local store.

use crate::error::{RegistryError, Result};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default entry time-to-live: 10 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Default namespace prefix for distributed keys.
pub const DEFAULT_KEY_PREFIX: &str = "cancelkit:request:";

/// Which entry store backs the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// In-process concurrent map with per-entry timers.
    #[default]
    Local,

    /// Shared `Redis` instance with TTL-on-write.
    Distributed,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Distributed => f.write_str("distributed"),
        }
    }
}

impl FromStr for Backend {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "memory" => Ok(Self::Local),
            "distributed" | "redis" => Ok(Self::Distributed),
            other => Err(RegistryError::Configuration(format!(
                "unknown backend {other:?} (expected \"local\" or \"distributed\")"
            ))),
        }
    }
}

/// Registry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Storage backend.
    ///
    /// Default: `Local`
    pub backend: Backend,

    /// Lifetime of an entry that is never finished.
    ///
    /// Default: 10 minutes
    pub ttl: Duration,

    /// Prefix prepended to every request id in the distributed store.
    ///
    /// Default: `"cancelkit:request:"`
    pub key_prefix: String,
}

impl RegistryConfig {
    /// Configuration for `backend` with default TTL and prefix.
    #[must_use]
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }

    /// Set the entry time-to-live.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the entry time-to-live in (possibly fractional) seconds.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Configuration`] if `seconds` is negative, NaN or
    /// too large.
    pub fn with_ttl_seconds(self, seconds: f64) -> Result<Self> {
        let ttl = Duration::try_from_secs_f64(seconds).map_err(|e| {
            RegistryError::Configuration(format!("invalid ttl {seconds}: {e}"))
        })?;
        Ok(self.with_ttl(ttl))
    }

    /// Set the distributed key prefix.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Load configuration from environment variables.
    ///
    /// | Variable | Meaning | Default |
    /// |---|---|---|
    /// | `CANCELKIT_BACKEND` | `local` or `distributed` | `local` |
    /// | `CANCELKIT_TTL_SECONDS` | entry TTL, fractions allowed | `600` |
    /// | `CANCELKIT_KEY_PREFIX` | distributed key prefix | `cancelkit:request:` |
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Configuration`] if a variable is set but invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(backend) = lookup("CANCELKIT_BACKEND") {
            config.backend = backend.parse()?;
        }

        if let Some(ttl) = lookup("CANCELKIT_TTL_SECONDS") {
            let seconds: f64 = ttl.trim().parse().map_err(|e| {
                RegistryError::Configuration(format!("CANCELKIT_TTL_SECONDS={ttl:?}: {e}"))
            })?;
            config = config.with_ttl_seconds(seconds)?;
        }

        if let Some(prefix) = lookup("CANCELKIT_KEY_PREFIX") {
            config.key_prefix = prefix;
        }

        Ok(config)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Local,
            ttl: DEFAULT_TTL,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}
