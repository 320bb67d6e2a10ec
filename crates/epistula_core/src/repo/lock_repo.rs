//! Advisory edit locks with a fixed expiry.
//!
//! # Responsibility
//! - Let clients signal "someone is editing this entity" without blocking
//!   writes; saving never checks locks.
//! - Expire abandoned locks so a crashed client cannot hold an entity
//!   forever.
//!
//! # Invariants
//! - One lock row per (entity kind, entity id).
//! - Re-acquiring an own lock renews it; acquiring an expired foreign lock
//!   takes it over in place.

use crate::db::DbError;
use crate::model::actor::{Actor, ActorId};
use crate::model::entity::EntityKind;
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Lock lifetime. A client editing longer than this re-acquires on save.
pub const LOCK_TTL_MS: i64 = 30_000;

pub type LockResult<T> = Result<T, LockError>;

/// Errors from lock operations.
#[derive(Debug)]
pub enum LockError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Another actor holds an unexpired lock on the entity.
    AlreadyLocked {
        kind: EntityKind,
        entity_id: i64,
        holder_id: ActorId,
        holder_name: Option<String>,
        held_for_ms: i64,
    },
    /// Persisted lock row cannot be read back.
    InvalidData(String),
}

impl Display for LockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::AlreadyLocked {
                kind,
                entity_id,
                holder_id,
                holder_name,
                held_for_ms,
            } => {
                let holder = holder_name.as_deref().unwrap_or("unknown");
                write!(
                    f,
                    "{kind} {entity_id} is locked by {holder} ({holder_id}) since {held_for_ms} ms"
                )
            }
            Self::InvalidData(message) => write!(f, "invalid persisted lock data: {message}"),
        }
    }
}

impl Error for LockError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::AlreadyLocked { .. } => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for LockError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for LockError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// One held edit lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditLock {
    pub kind: EntityKind,
    pub entity_id: i64,
    pub holder_id: ActorId,
    pub holder_name: Option<String>,
    /// Unix epoch milliseconds of acquisition or last renewal.
    pub acquired_at: i64,
}

impl EditLock {
    /// Whether the lock has outlived its TTL at the given instant.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms - self.acquired_at > LOCK_TTL_MS
    }
}

/// SQLite-backed advisory lock table.
pub struct LockManager<'conn> {
    conn: &'conn Connection,
}

impl<'conn> LockManager<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Acquires or renews a lock for the actor.
    pub fn acquire(
        &self,
        kind: EntityKind,
        entity_id: i64,
        actor: &Actor,
    ) -> LockResult<EditLock> {
        self.acquire_at(kind, entity_id, actor, now_epoch_ms())
    }

    /// Acquire with an explicit clock, the deterministic variant `acquire`
    /// delegates to.
    pub fn acquire_at(
        &self,
        kind: EntityKind,
        entity_id: i64,
        actor: &Actor,
        now_ms: i64,
    ) -> LockResult<EditLock> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let existing = lock_row(&tx, kind, entity_id)?;
        match existing {
            None => {
                tx.execute(
                    "INSERT INTO edit_locks (entity_kind, entity_id, holder_id, holder_name, acquired_at)
                     VALUES (?1, ?2, ?3, ?4, ?5);",
                    params![
                        kind.as_str(),
                        entity_id,
                        actor.id.to_string(),
                        actor.name.as_str(),
                        now_ms,
                    ],
                )?;
            }
            Some(lock) if lock.holder_id == actor.id => {
                tx.execute(
                    "UPDATE edit_locks
                     SET acquired_at = ?3
                     WHERE entity_kind = ?1
                       AND entity_id = ?2;",
                    params![kind.as_str(), entity_id, now_ms],
                )?;
            }
            Some(lock) if lock.is_expired_at(now_ms) => {
                tx.execute(
                    "UPDATE edit_locks
                     SET holder_id = ?3,
                         holder_name = ?4,
                         acquired_at = ?5
                     WHERE entity_kind = ?1
                       AND entity_id = ?2;",
                    params![
                        kind.as_str(),
                        entity_id,
                        actor.id.to_string(),
                        actor.name.as_str(),
                        now_ms,
                    ],
                )?;
            }
            Some(lock) => {
                return Err(LockError::AlreadyLocked {
                    kind,
                    entity_id,
                    holder_id: lock.holder_id,
                    holder_name: lock.holder_name,
                    held_for_ms: now_ms - lock.acquired_at,
                });
            }
        }
        tx.commit()?;
        Ok(EditLock {
            kind,
            entity_id,
            holder_id: actor.id,
            holder_name: Some(actor.name.clone()),
            acquired_at: now_ms,
        })
    }

    /// Releases the actor's lock. Returns `false` when the actor held no
    /// lock on the entity; releasing someone else's lock is a no-op.
    pub fn release(&self, kind: EntityKind, entity_id: i64, actor: &Actor) -> LockResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM edit_locks
             WHERE entity_kind = ?1
               AND entity_id = ?2
               AND holder_id = ?3;",
            params![kind.as_str(), entity_id, actor.id.to_string()],
        )?;
        Ok(changed > 0)
    }

    /// Returns the current lock row, expired or not.
    pub fn current_holder(
        &self,
        kind: EntityKind,
        entity_id: i64,
    ) -> LockResult<Option<EditLock>> {
        lock_row(self.conn, kind, entity_id)
    }

    /// Deletes every expired lock row and returns how many went away.
    pub fn sweep_expired(&self) -> LockResult<usize> {
        self.sweep_expired_at(now_epoch_ms())
    }

    /// Sweep with an explicit clock.
    pub fn sweep_expired_at(&self, now_ms: i64) -> LockResult<usize> {
        let changed = self.conn.execute(
            "DELETE FROM edit_locks WHERE ?1 - acquired_at > ?2;",
            params![now_ms, LOCK_TTL_MS],
        )?;
        Ok(changed)
    }
}

fn lock_row(conn: &Connection, kind: EntityKind, entity_id: i64) -> LockResult<Option<EditLock>> {
    let mut stmt = conn.prepare(
        "SELECT entity_kind, entity_id, holder_id, holder_name, acquired_at
         FROM edit_locks
         WHERE entity_kind = ?1
           AND entity_id = ?2;",
    )?;
    let mut rows = stmt.query(params![kind.as_str(), entity_id])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_lock_row(row)?));
    }
    Ok(None)
}

fn parse_lock_row(row: &Row<'_>) -> LockResult<EditLock> {
    let kind_text: String = row.get("entity_kind")?;
    let kind = EntityKind::parse(&kind_text).ok_or_else(|| {
        LockError::InvalidData(format!(
            "invalid entity kind `{kind_text}` in edit_locks.entity_kind"
        ))
    })?;
    let holder_text: String = row.get("holder_id")?;
    let holder_id = Uuid::parse_str(&holder_text).map_err(|_| {
        LockError::InvalidData(format!("invalid uuid `{holder_text}` in edit_locks.holder_id"))
    })?;
    Ok(EditLock {
        kind,
        entity_id: row.get("entity_id")?,
        holder_id,
        holder_name: row.get("holder_name")?,
        acquired_at: row.get("acquired_at")?,
    })
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}
