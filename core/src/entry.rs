//! The per-request record held by an entry store.

use crate::status::RequestStatus;
use serde::{Deserialize, Deserializer, Serialize};

/// One tracked request.
///
/// This is also the distributed wire format:
///
/// ```json
/// {"status": "active", "operationIdentifier": {"pid": 42}, "revision": 1}
/// ```
///
/// `revision` increases by one on every write. Stores compare it (together
/// with `status`) before replacing an entry, which makes read-modify-write
/// sequences safe against concurrent writers of the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    rename_all = "camelCase",
    bound(deserialize = "Op: Deserialize<'de>")
)]
pub struct Entry<Op> {
    /// Current lifecycle status.
    pub status: RequestStatus,

    /// Opaque payload handed to the cancellation hook.
    ///
    /// A present key is always `Some`, even when the payload itself encodes
    /// as `null`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub operation_identifier: Option<Op>,

    /// Write counter used for compare-and-swap.
    #[serde(default)]
    pub revision: u64,
}

fn present<'de, D, Op>(deserializer: D) -> Result<Option<Op>, D::Error>
where
    D: Deserializer<'de>,
    Op: Deserialize<'de>,
{
    Op::deserialize(deserializer).map(Some)
}

impl<Op> Entry<Op> {
    /// A freshly registered entry: `Active`, no operation, revision 0.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            status: RequestStatus::Active,
            operation_identifier: None,
            revision: 0,
        }
    }

    /// Returns `true` if the entry is still `Active`.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == RequestStatus::Active
    }
}

impl<Op: Clone> Entry<Op> {
    /// Next revision of this entry with `status` replaced.
    #[must_use]
    pub fn advance(&self, status: RequestStatus) -> Self {
        Self {
            status,
            operation_identifier: self.operation_identifier.clone(),
            revision: self.revision + 1,
        }
    }

    /// Next revision of this entry with the operation identifier replaced.
    #[must_use]
    pub fn with_operation(&self, operation: Op) -> Self {
        Self {
            status: self.status,
            operation_identifier: Some(operation),
            revision: self.revision + 1,
        }
    }
}

impl<Op> Default for Entry<Op> {
    fn default() -> Self {
        Self::new()
    }
}
