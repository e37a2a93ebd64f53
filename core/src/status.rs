//! Request lifecycle status and the transitions allowed between statuses.
//!
//! ```text
//!             ┌────────────┐   hook done   ┌───────────┐
//!   ┌────────►│ cancelling ├──────────────►│ cancelled │
//!   │         └─────┬──────┘               └─────┬─────┘
//! ┌─┴──────┐        │                            │
//! │ active ├────────┼────────────────────────────┼──────► finished
//! └────────┘        └────────────────────────────┘
//! ```
//!
//! `Finished` is terminal and is also what absent or expired entries report.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a tracked request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Registered and running.
    Active,

    /// Cancellation detected; the hook is being invoked.
    Cancelling,

    /// Cancellation path completed.
    Cancelled,

    /// Completed normally, removed, expired, or never registered.
    Finished,
}

impl RequestStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 4] = [
        Self::Active,
        Self::Cancelling,
        Self::Cancelled,
        Self::Finished,
    ];

    /// Returns `true` if the state machine permits moving from `self` to `next`.
    ///
    /// # Examples
    ///
    /// ```
    /// use cancelkit_core::RequestStatus;
    ///
    /// assert!(RequestStatus::Active.can_transition_to(RequestStatus::Cancelling));
    /// assert!(!RequestStatus::Cancelled.can_transition_to(RequestStatus::Active));
    /// assert!(!RequestStatus::Finished.can_transition_to(RequestStatus::Cancelled));
    /// ```
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Cancelling | Self::Finished)
                | (Self::Cancelling, Self::Cancelled | Self::Finished)
                | (Self::Cancelled, Self::Finished)
        )
    }

    /// Returns `true` for statuses with no outgoing transition except to `Finished`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Finished)
    }

    /// Lowercase name, identical to the serialized form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Finished => "finished",
        }
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Cancelling => 1,
            Self::Cancelled => 2,
            Self::Finished => 3,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown request status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for RequestStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}
