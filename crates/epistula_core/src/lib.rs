//! Core domain logic for Epistula.
//! This crate is the single source of truth for business invariants.

pub mod db;
pub mod document;
pub mod logging;
pub mod model;
pub mod repo;
pub mod review;
pub mod service;
pub mod sync;

pub use logging::{default_log_level, init_logging, logging_status};
pub use model::actor::{Actor, ActorId, Role};
pub use model::entity::{EntityKind, EntityVersion, ImportEpoch, ReviewState, VersionPayload};
pub use repo::lock_repo::{EditLock, LockError, LockManager, LockResult};
pub use repo::version_repo::VersionStore;
pub use repo::{StoreError, StoreResult};
pub use review::gate::{ReviewError, ReviewGate, ReviewResult};
pub use service::edit_service::{EditService, SaveLetterRequest, ServiceError, ServiceResult};
pub use sync::export::{export_corpus, ExportOutcome};
pub use sync::import::{import_corpus, ImportOutcome};
pub use sync::{SyncConfig, SyncError, SyncResult};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
