//! Backend-signalling hook.

use cancelkit_core::{CancellationHook, HookError};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};

/// A `PostgreSQL` server process, identified by its pid.
///
/// Serializes as `{"pid": 42}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PgBackend {
    /// Value of `pg_backend_pid()` on the connection running the query
    pub pid: i32,
}

impl PgBackend {
    /// Wrap a backend pid.
    #[must_use]
    pub const fn new(pid: i32) -> Self {
        Self { pid }
    }
}

/// How the backend is signalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelMode {
    /// `pg_cancel_backend`: abort the running query, keep the session.
    #[default]
    Cancel,
    /// `pg_terminate_backend`: close the whole session.
    Terminate,
}

impl CancelMode {
    const fn query(self) -> &'static str {
        match self {
            Self::Cancel => "SELECT pg_cancel_backend($1)",
            Self::Terminate => "SELECT pg_terminate_backend($1)",
        }
    }
}

/// Cancellation hook that signals the backend process running a request's
/// query.
///
/// The signal is sent over `pool`, which must not be the pool the cancelled
/// query runs on if that pool can be exhausted.
#[derive(Debug, Clone)]
pub struct PostgresCancelHook {
    pool: PgPool,
    mode: CancelMode,
}

impl PostgresCancelHook {
    /// Create a hook using [`CancelMode::Cancel`].
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self {
            pool,
            mode: CancelMode::Cancel,
        }
    }

    /// Change how the backend is signalled.
    #[must_use]
    pub const fn with_mode(mut self, mode: CancelMode) -> Self {
        self.mode = mode;
        self
    }

    /// The signalling mode.
    #[must_use]
    pub const fn mode(&self) -> CancelMode {
        self.mode
    }
}

impl CancellationHook<PgBackend> for PostgresCancelHook {
    async fn cancel(&self, request_id: &str, operation: &PgBackend) -> Result<bool, HookError> {
        let signalled: bool = sqlx::query_scalar(self.mode.query())
            .bind(operation.pid)
            .fetch_one(&self.pool)
            .await
            .map_err(HookError::failed)?;

        if !signalled {
            // The process is gone, or belongs to a role we cannot signal
            tracing::debug!(
                request_id = request_id,
                pid = operation.pid,
                mode = ?self.mode,
                "Backend was not signalled"
            );
        }

        Ok(signalled)
    }
}

/// Read the pid of the server process behind `conn`.
///
/// # Errors
///
/// Returns the `sqlx` error if the query fails.
pub async fn backend_pid(conn: &mut PgConnection) -> Result<PgBackend, sqlx::Error> {
    let pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
        .fetch_one(&mut *conn)
        .await?;

    Ok(PgBackend { pid })
}
