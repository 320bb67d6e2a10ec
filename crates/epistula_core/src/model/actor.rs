//! Actor identity and role model.
//!
//! # Responsibility
//! - Identify who performed an operation, for audit rows and lock ownership.
//! - Gate review and corpus synchronization behind explicit roles.
//!
//! # Invariants
//! - `id` is stable for one account and never reused.
//! - Role checks are pure; authorization failures are raised by the calling
//!   service, not here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Stable identifier for one volunteer or staff account.
///
/// Kept as a type alias to make semantic intent explicit in signatures.
pub type ActorId = Uuid;

/// Capability grade attached to an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// May submit corrections; everything lands as `pending`.
    Contributor,
    /// May accept/reject versions and save with auto-accept.
    Reviewer,
    /// May additionally run corpus import and export.
    Administrator,
}

impl Role {
    /// Stable lowercase name used in logs and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contributor => "contributor",
            Self::Reviewer => "reviewer",
            Self::Administrator => "administrator",
        }
    }
}

/// One authenticated account acting on the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Stable account id, recorded on every log row and lock.
    pub id: ActorId,
    /// Display name shown in review queues and lock holder messages.
    pub name: String,
    /// Granted roles. Higher roles do not implicitly contain lower ones;
    /// accounts carry every role they hold.
    pub roles: BTreeSet<Role>,
}

impl Actor {
    /// Creates an actor with the given roles.
    pub fn new(
        id: ActorId,
        name: impl Into<String>,
        roles: impl IntoIterator<Item = Role>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            roles: roles.into_iter().collect(),
        }
    }

    /// Returns whether the actor holds one specific role.
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Returns whether the actor may accept or reject versions.
    pub fn can_review(&self) -> bool {
        self.has_role(Role::Reviewer) || self.has_role(Role::Administrator)
    }

    /// Returns whether the actor may run corpus import/export.
    pub fn can_administer(&self) -> bool {
        self.has_role(Role::Administrator)
    }
}
