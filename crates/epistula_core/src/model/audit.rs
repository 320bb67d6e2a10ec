//! Audit log read model.
//!
//! # Responsibility
//! - Name the closed set of logged operation kinds.
//! - Carry log rows back to callers inspecting history.
//!
//! # Invariants
//! - Log rows are append-only; nothing in core updates or deletes them.
//! - Version rows refer to log rows, never the other way around.

use crate::model::actor::ActorId;

/// Kind of operation recorded by one log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    /// A citizen or staff edit produced a new version row.
    Edit,
    /// A reviewer accepted or rejected a version.
    Review,
    /// A version was marked deleted.
    Delete,
    /// A corpus import created a new epoch.
    Import,
    /// An export batch was pushed to the corpus repository.
    Export,
}

impl LogKind {
    /// Stable name stored in `logs.kind`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Edit => "edit",
            Self::Review => "review",
            Self::Delete => "delete",
            Self::Import => "import",
            Self::Export => "export",
        }
    }

    /// Parses a stored kind name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "edit" => Some(Self::Edit),
            "review" => Some(Self::Review),
            "delete" => Some(Self::Delete),
            "import" => Some(Self::Import),
            "export" => Some(Self::Export),
            _ => None,
        }
    }
}

/// One persisted audit row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Monotonic log row id.
    pub log_id: i64,
    /// Operation kind.
    pub kind: LogKind,
    /// Account that performed the operation.
    pub actor_id: ActorId,
    /// Display name snapshot at operation time.
    pub actor_name: Option<String>,
    /// Free-form context, such as `letter:12` or a commit hash.
    pub detail: Option<String>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}
