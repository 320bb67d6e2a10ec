//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts over the version store.
//! - Isolate SQLite query details from service/business orchestration.
//!
//! # Invariants
//! - Version rows are append-only; repositories never update a persisted
//!   column other than `is_latest`, `export_batch_id` and the `_log_id`
//!   review/delete markers.
//! - Every write that creates a version row also creates its log row, in
//!   the same transaction.

pub mod hooks;
pub mod lock_repo;
pub mod log_repo;
pub mod reference_repo;
pub mod version_repo;

use crate::db::DbError;
use crate::model::entity::{EntityKind, MergeError};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from version store and reference repository operations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Target entity does not exist.
    NotFound { kind: EntityKind, entity_id: i64 },
    /// Target version row does not exist.
    VersionNotFound { kind: EntityKind, version_id: i64 },
    /// Someone else saved a newer version since the client loaded theirs.
    Conflict {
        kind: EntityKind,
        entity_id: i64,
        expected_version_id: Option<i64>,
        actual_version_id: Option<i64>,
    },
    /// No import epoch exists yet; the store is empty until a corpus import.
    NoCurrentEpoch,
    /// A bulk write API was called without an open transaction.
    OutsideTransaction,
    /// Patch could not be merged onto the base payload.
    Merge(MergeError),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Persisted data cannot be converted to valid read model.
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { kind, entity_id } => {
                write!(f, "{kind} not found: {entity_id}")
            }
            Self::VersionNotFound { kind, version_id } => {
                write!(f, "{kind} version not found: {version_id}")
            }
            Self::Conflict {
                kind,
                entity_id,
                expected_version_id,
                actual_version_id,
            } => write!(
                f,
                "concurrent edit on {kind} {entity_id}: parent version {}, latest is {}",
                format_version_id(*expected_version_id),
                format_version_id(*actual_version_id),
            ),
            Self::NoCurrentEpoch => {
                write!(f, "no current import epoch; run a corpus import first")
            }
            Self::OutsideTransaction => {
                write!(f, "bulk version writes require an open transaction")
            }
            Self::Merge(err) => write!(f, "{err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "version store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "version store requires table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted version data: {message}"),
        }
    }
}

fn format_version_id(value: Option<i64>) -> String {
    match value {
        Some(id) => id.to_string(),
        None => "none".to_string(),
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Merge(err) => Some(err),
            Self::NotFound { .. } => None,
            Self::VersionNotFound { .. } => None,
            Self::Conflict { .. } => None,
            Self::NoCurrentEpoch => None,
            Self::OutsideTransaction => None,
            Self::UninitializedConnection { .. } => None,
            Self::MissingRequiredTable(_) => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<MergeError> for StoreError {
    fn from(value: MergeError) -> Self {
        Self::Merge(value)
    }
}
