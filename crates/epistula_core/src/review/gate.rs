//! Accept/reject decisions on pending versions.
//!
//! # Responsibility
//! - Apply review decisions with role checks and full audit logging.
//! - On rejection of a head row, re-promote the newest surviving
//!   predecessor, or tombstone the row when nothing precedes it.
//!
//! # Invariants
//! - Only pending rows can be reviewed; decisions are final.
//! - A rejected head never stays the visible state of an entity: either a
//!   predecessor takes over or the row becomes a deletion tombstone.

use crate::db::DbError;
use crate::document::mentions::{Mention, MentionKind};
use crate::model::actor::{Actor, Role};
use crate::model::audit::LogKind;
use crate::model::entity::{EntityKind, EntityVersion, ReviewState, VersionPayload};
use crate::repo::{hooks, log_repo, reference_repo, version_repo, StoreError};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ReviewResult<T> = Result<T, ReviewError>;

/// Errors from review decisions.
#[derive(Debug)]
pub enum ReviewError {
    /// Underlying store error.
    Store(StoreError),
    /// Actor lacks the role required for the operation.
    Forbidden { required: Role },
    /// The version is not in a state the decision applies to.
    InvalidTransition { from: ReviewState, to: ReviewState },
    /// The version is a deletion tombstone and cannot be reviewed.
    Deleted { kind: EntityKind, version_id: i64 },
}

impl Display for ReviewError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Forbidden { required } => {
                write!(f, "operation requires the {} role", required.as_str())
            }
            Self::InvalidTransition { from, to } => write!(
                f,
                "cannot move review state from {} to {}",
                from.as_str(),
                to.as_str()
            ),
            Self::Deleted { kind, version_id } => {
                write!(f, "{kind} version {version_id} is a deletion tombstone")
            }
        }
    }
}

impl Error for ReviewError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Forbidden { .. } => None,
            Self::InvalidTransition { .. } => None,
            Self::Deleted { .. } => None,
        }
    }
}

impl From<StoreError> for ReviewError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<rusqlite::Error> for ReviewError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(StoreError::Db(DbError::Sqlite(value)))
    }
}

/// Review gate over a migrated connection.
pub struct ReviewGate<'conn> {
    conn: &'conn Connection,
}

impl<'conn> ReviewGate<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Accepts one pending version.
    pub fn accept(
        &self,
        kind: EntityKind,
        version_id: i64,
        actor: &Actor,
    ) -> ReviewResult<EntityVersion> {
        if !actor.can_review() {
            return Err(ReviewError::Forbidden {
                required: Role::Reviewer,
            });
        }
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let version = version_repo::require_version_row(&tx, kind, version_id)?;
        check_reviewable(&version, ReviewState::Accepted)?;

        let log_id = log_repo::append_log(
            &tx,
            LogKind::Review,
            actor,
            Some(&format!("accept {kind} {}", version.entity_id)),
        )?;
        tx.execute(
            &format!(
                "UPDATE {table}
                 SET review_state = 'accepted',
                     reviewed_log_id = ?2
                 WHERE version_id = ?1;",
                table = version_repo::version_table(kind),
            ),
            params![version_id, log_id],
        )?;
        let updated = version_repo::require_version_row(&tx, kind, version_id)?;
        tx.commit()?;
        Ok(updated)
    }

    /// Rejects one pending version.
    ///
    /// When the row is the head of its entity, the newest earlier
    /// non-rejected version in the same epoch takes over as head. Without
    /// such a predecessor the row becomes a deletion tombstone, which
    /// removes entities that only ever existed as the rejected submission.
    pub fn reject(
        &self,
        kind: EntityKind,
        version_id: i64,
        actor: &Actor,
    ) -> ReviewResult<EntityVersion> {
        if !actor.can_review() {
            return Err(ReviewError::Forbidden {
                required: Role::Reviewer,
            });
        }
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let version = version_repo::require_version_row(&tx, kind, version_id)?;
        check_reviewable(&version, ReviewState::Rejected)?;

        let log_id = log_repo::append_log(
            &tx,
            LogKind::Review,
            actor,
            Some(&format!("reject {kind} {}", version.entity_id)),
        )?;
        let table = version_repo::version_table(kind);
        tx.execute(
            &format!(
                "UPDATE {table}
                 SET review_state = 'rejected',
                     reviewed_log_id = ?2
                 WHERE version_id = ?1;"
            ),
            params![version_id, log_id],
        )?;

        if version.is_latest {
            let predecessor_id: Option<i64> = tx
                .query_row(
                    &format!(
                        "SELECT MAX(version_id)
                         FROM {table}
                         WHERE {id_column} = ?1
                           AND import_epoch_id = ?2
                           AND version_id < ?3
                           AND review_state <> 'rejected';",
                        id_column = version_repo::id_column(kind),
                    ),
                    params![version.entity_id, version.import_epoch_id, version_id],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();

            match predecessor_id {
                Some(predecessor_id) => {
                    tx.execute(
                        &format!(
                            "UPDATE {table} SET is_latest = 0 WHERE version_id = ?1;"
                        ),
                        [version_id],
                    )?;
                    tx.execute(
                        &format!(
                            "UPDATE {table} SET is_latest = 1 WHERE version_id = ?1;"
                        ),
                        [predecessor_id],
                    )?;
                    let promoted =
                        version_repo::require_version_row(&tx, kind, predecessor_id)?;
                    refresh_letter_state(&tx, &promoted)?;
                }
                None => {
                    // The entity never had an accepted state; the rejected
                    // submission tombs out.
                    tx.execute(
                        &format!(
                            "UPDATE {table}
                             SET deleted_log_id = COALESCE(deleted_log_id, ?2)
                             WHERE version_id = ?1;"
                        ),
                        params![version_id, log_id],
                    )?;
                    if kind == EntityKind::Letter {
                        reference_repo::replace_letter_references(&tx, version.entity_id, &[])?;
                    }
                }
            }
        }

        let updated = version_repo::require_version_row(&tx, kind, version_id)?;
        tx.commit()?;
        Ok(updated)
    }

    /// Decides whether a save may skip review. Auto-accept requires a
    /// reviewer actor and every mentioned entity to be accepted and alive
    /// in the current epoch; otherwise the save quietly stays pending.
    pub fn resolve_auto_accept(
        &self,
        actor: &Actor,
        requested: bool,
        mentions: &[Mention],
    ) -> ReviewResult<bool> {
        if !requested || !actor.can_review() {
            return Ok(false);
        }
        let Some(epoch) = version_repo::current_epoch_row(self.conn)? else {
            return Ok(false);
        };
        for mention in mentions {
            let kind = match mention.kind {
                MentionKind::Person => EntityKind::Person,
                MentionKind::Place => EntityKind::Place,
            };
            let Some(latest) = version_repo::latest_version_row(
                self.conn,
                kind,
                mention.target_id,
                epoch.epoch_id,
            )?
            else {
                return Ok(false);
            };
            if latest.review_state != ReviewState::Accepted || latest.is_deleted() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn check_reviewable(version: &EntityVersion, to: ReviewState) -> ReviewResult<()> {
    if version.is_deleted() {
        return Err(ReviewError::Deleted {
            kind: version.kind(),
            version_id: version.version_id,
        });
    }
    if version.review_state != ReviewState::Pending {
        return Err(ReviewError::InvalidTransition {
            from: version.review_state,
            to,
        });
    }
    Ok(())
}

fn refresh_letter_state(tx: &Connection, promoted: &EntityVersion) -> ReviewResult<()> {
    if let VersionPayload::Letter(_) = promoted.payload {
        hooks::run_after_save(tx, promoted.entity_id, &promoted.payload)?;
    }
    Ok(())
}
