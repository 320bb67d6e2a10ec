//! Versioned entity store over SQLite.
//!
//! # Responsibility
//! - Append version rows for letters, persons, person aliases and places.
//! - Enforce optimistic concurrency against the latest version per entity
//!   and import epoch.
//! - Provide the bulk write paths the corpus import/export pipeline runs
//!   inside its own transaction.
//!
//! # Invariants
//! - At most one `is_latest = 1` row per (entity, import epoch), enforced
//!   by partial unique indexes.
//! - Version rows are never rewritten; only `is_latest`, `export_batch_id`
//!   and the review/delete log markers change after insert.
//! - Every interactive write appends its own log row in the same
//!   transaction.

use crate::db::migrations::latest_version;
use crate::model::actor::Actor;
use crate::model::audit::LogKind;
use crate::model::entity::{
    merge_patch, EntityKind, EntityVersion, ImportEpoch, LetterPayload, MergeError,
    PersonAliasPayload, PersonPayload, PlacePayload, ReviewState, VersionPatch, VersionPayload,
};
use crate::repo::{hooks, log_repo, reference_repo, StoreError, StoreResult};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior,
};

const EPOCH_SELECT_SQL: &str = "SELECT
    epoch_id,
    revision,
    is_current,
    created_log_id,
    created_at
FROM import_epochs";

const REQUIRED_TABLES: [&str; 12] = [
    "logs",
    "import_epochs",
    "export_batches",
    "letters",
    "letter_versions",
    "persons",
    "person_versions",
    "person_aliases",
    "person_alias_versions",
    "places",
    "place_versions",
    "name_references",
];

/// Alias identity captured from an outgoing epoch, used to keep alias
/// entity ids stable across imports. Corpus index files carry no id for
/// alias entries, so (person, name) is the only join key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasIdentity {
    pub alias_id: i64,
    pub person_id: i64,
    pub name: String,
}

/// SQLite-backed version store.
pub struct VersionStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> VersionStore<'conn> {
    /// Creates the store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_store_connection_ready(conn)?;
        Ok(Self { conn })
    }

    /// Returns the current import epoch, if any import ran yet.
    pub fn current_epoch(&self) -> StoreResult<Option<ImportEpoch>> {
        current_epoch_row(self.conn)
    }

    /// Returns the current import epoch or fails when the store is empty.
    pub fn require_current_epoch(&self) -> StoreResult<ImportEpoch> {
        require_current_epoch_row(self.conn)
    }

    /// Loads one version row by id.
    pub fn get_version(
        &self,
        kind: EntityKind,
        version_id: i64,
    ) -> StoreResult<Option<EntityVersion>> {
        version_row(self.conn, kind, version_id)
    }

    /// Loads the latest version of one entity within the current epoch.
    /// Deletion tombstones are returned, not filtered; callers decide.
    ///
    /// `expected_version_id` is a staleness probe: when given and no longer
    /// the latest version, the read fails with `Conflict` so the client
    /// reloads before editing further.
    pub fn get_current_version(
        &self,
        kind: EntityKind,
        entity_id: i64,
        expected_version_id: Option<i64>,
    ) -> StoreResult<Option<EntityVersion>> {
        let Some(epoch) = current_epoch_row(self.conn)? else {
            return Ok(None);
        };
        let latest = latest_version_row(self.conn, kind, entity_id, epoch.epoch_id)?;
        if let Some(expected) = expected_version_id {
            let actual_version_id = latest.as_ref().map(|version| version.version_id);
            if actual_version_id != Some(expected) {
                return Err(StoreError::Conflict {
                    kind,
                    entity_id,
                    expected_version_id: Some(expected),
                    actual_version_id,
                });
            }
        }
        Ok(latest)
    }

    /// Full version history of one entity across epochs, oldest first.
    pub fn list_versions(
        &self,
        kind: EntityKind,
        entity_id: i64,
    ) -> StoreResult<Vec<EntityVersion>> {
        let sql = format!(
            "{select}
             WHERE {id_column} = ?1
             ORDER BY version_id ASC;",
            select = version_select_sql(kind),
            id_column = id_column(kind),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([entity_id])?;
        let mut versions = Vec::new();
        while let Some(row) = rows.next()? {
            versions.push(parse_version_row(kind, row)?);
        }
        Ok(versions)
    }

    /// Latest undeleted rows of one kind in the current epoch, by entity id.
    pub fn list_latest(&self, kind: EntityKind) -> StoreResult<Vec<EntityVersion>> {
        let Some(epoch) = current_epoch_row(self.conn)? else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "{select}
             WHERE import_epoch_id = ?1
               AND is_latest = 1
               AND deleted_log_id IS NULL
             ORDER BY {id_column} ASC;",
            select = version_select_sql(kind),
            id_column = id_column(kind),
        );
        self.query_versions(kind, &sql, epoch.epoch_id)
    }

    /// Review queue: latest pending rows of one kind in the current epoch.
    pub fn list_pending(&self, kind: EntityKind) -> StoreResult<Vec<EntityVersion>> {
        let Some(epoch) = current_epoch_row(self.conn)? else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "{select}
             WHERE import_epoch_id = ?1
               AND is_latest = 1
               AND review_state = 'pending'
               AND deleted_log_id IS NULL
             ORDER BY version_id ASC;",
            select = version_select_sql(kind),
        );
        self.query_versions(kind, &sql, epoch.epoch_id)
    }

    /// Export snapshot: the newest accepted version per entity in the
    /// current epoch. An entity whose newest accepted version is a deletion
    /// tombstone is omitted entirely.
    pub fn list_accepted_snapshot(&self, kind: EntityKind) -> StoreResult<Vec<EntityVersion>> {
        let Some(epoch) = current_epoch_row(self.conn)? else {
            return Ok(Vec::new());
        };
        let table = version_table(kind);
        let id_column = id_column(kind);
        let sql = format!(
            "{select}
             WHERE import_epoch_id = ?1
               AND review_state = 'accepted'
               AND version_id = (
                 SELECT MAX(v2.version_id)
                 FROM {table} v2
                 WHERE v2.{id_column} = {table}.{id_column}
                   AND v2.import_epoch_id = ?1
                   AND v2.review_state = 'accepted'
               )
               AND deleted_log_id IS NULL
             ORDER BY {id_column} ASC;",
            select = version_select_sql(kind),
        );
        self.query_versions(kind, &sql, epoch.epoch_id)
    }

    /// Rows of one kind that an export still has to ship: latest, accepted,
    /// not yet tagged with an export batch, and carrying a change (touched
    /// or deleted).
    pub fn list_export_eligible(&self, kind: EntityKind) -> StoreResult<Vec<EntityVersion>> {
        let Some(epoch) = current_epoch_row(self.conn)? else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "{select}
             WHERE import_epoch_id = ?1
               AND is_latest = 1
               AND review_state = 'accepted'
               AND export_batch_id IS NULL
               AND (is_touched = 1 OR deleted_log_id IS NOT NULL)
             ORDER BY {id_column} ASC;",
            select = version_select_sql(kind),
            id_column = id_column(kind),
        );
        self.query_versions(kind, &sql, epoch.epoch_id)
    }

    /// Appends a new version of an existing entity.
    ///
    /// `parent_version_id` is the version the client loaded before editing.
    /// When it no longer matches the latest version in the current epoch
    /// the write fails with `Conflict` and nothing is persisted.
    pub fn create_new_version(
        &self,
        kind: EntityKind,
        entity_id: i64,
        parent_version_id: Option<i64>,
        patch: VersionPatch,
        actor: &Actor,
        auto_accept: bool,
    ) -> StoreResult<EntityVersion> {
        if patch.kind() != kind {
            return Err(StoreError::Merge(MergeError::KindMismatch {
                expected: kind,
                found: patch.kind(),
            }));
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        if !entity_exists(&tx, kind, entity_id)? {
            return Err(StoreError::NotFound { kind, entity_id });
        }
        let epoch = require_current_epoch_row(&tx)?;
        let latest = latest_version_row(&tx, kind, entity_id, epoch.epoch_id)?;
        let actual_version_id = latest.as_ref().map(|version| version.version_id);
        if parent_version_id != actual_version_id {
            return Err(StoreError::Conflict {
                kind,
                entity_id,
                expected_version_id: parent_version_id,
                actual_version_id,
            });
        }

        let payload = merge_patch(latest.as_ref().map(|version| &version.payload), patch)?;
        validate_payload_targets(&tx, &payload)?;
        let version_id = append_version_row(
            &tx,
            entity_id,
            &payload,
            latest.as_ref(),
            epoch.epoch_id,
            actor,
            auto_accept,
        )?;
        hooks::run_after_save(&tx, entity_id, &payload)?;
        let version = require_version_row(&tx, kind, version_id)?;
        tx.commit()?;
        Ok(version)
    }

    /// Creates a brand-new entity with its first version. The row is marked
    /// `is_new` so exports and reviews can tell volunteer-created entities
    /// from imported ones.
    pub fn create_entity(
        &self,
        patch: VersionPatch,
        actor: &Actor,
        auto_accept: bool,
    ) -> StoreResult<EntityVersion> {
        let kind = patch.kind();
        let payload = merge_patch(None, patch)?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let epoch = require_current_epoch_row(&tx)?;
        validate_payload_targets(&tx, &payload)?;
        tx.execute(
            &format!("INSERT INTO {} DEFAULT VALUES;", entity_table(kind)),
            [],
        )?;
        let entity_id = tx.last_insert_rowid();
        let version_id = append_version_row(
            &tx,
            entity_id,
            &payload,
            None,
            epoch.epoch_id,
            actor,
            auto_accept,
        )?;
        hooks::run_after_save(&tx, entity_id, &payload)?;
        let version = require_version_row(&tx, kind, version_id)?;
        tx.commit()?;
        Ok(version)
    }

    /// Marks one version row as deleted. Returns `false` when the row was
    /// already a tombstone; repeated deletes do not pile up log rows.
    pub fn soft_delete_version(
        &self,
        kind: EntityKind,
        version_id: i64,
        actor: &Actor,
    ) -> StoreResult<bool> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let version = version_row(&tx, kind, version_id)?
            .ok_or(StoreError::VersionNotFound { kind, version_id })?;
        if version.deleted_log_id.is_some() {
            return Ok(false);
        }
        let log_id = log_repo::append_log(
            &tx,
            LogKind::Delete,
            actor,
            Some(&format!("{kind} {}", version.entity_id)),
        )?;
        tx.execute(
            &format!(
                "UPDATE {table}
                 SET deleted_log_id = ?2
                 WHERE version_id = ?1
                   AND deleted_log_id IS NULL;",
                table = version_table(kind),
            ),
            params![version_id, log_id],
        )?;
        // A deleted letter no longer counts toward link totals.
        if kind == EntityKind::Letter && version.is_latest {
            reference_repo::replace_letter_references(&tx, version.entity_id, &[])?;
        }
        tx.commit()?;
        Ok(true)
    }

    /// Bulk-import write path: inserts the entity row if missing and
    /// appends one accepted, untouched version in the given epoch. Must run
    /// inside the import transaction.
    pub fn import_versioned(
        &self,
        entity_id: i64,
        payload: &VersionPayload,
        epoch_id: i64,
        import_log_id: i64,
    ) -> StoreResult<i64> {
        if self.conn.is_autocommit() {
            return Err(StoreError::OutsideTransaction);
        }
        let kind = payload.kind();
        self.conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (id) VALUES (?1);",
                entity_table(kind)
            ),
            [entity_id],
        )?;
        // A duplicate id inside one corpus snapshot keeps the last entry.
        self.conn.execute(
            &format!(
                "UPDATE {table}
                 SET is_latest = 0
                 WHERE {id_column} = ?1
                   AND import_epoch_id = ?2
                   AND is_latest = 1;",
                table = version_table(kind),
                id_column = id_column(kind),
            ),
            params![entity_id, epoch_id],
        )?;
        insert_version_row(
            self.conn,
            entity_id,
            &NewVersionRow {
                is_latest: true,
                is_touched: false,
                is_new: false,
                review_state: ReviewState::Accepted,
                import_epoch_id: epoch_id,
                created_log_id: import_log_id,
                reviewed_log_id: None,
            },
            payload,
        )
    }

    /// Opens a new import epoch and makes it current. Must run inside the
    /// import transaction.
    pub fn begin_epoch(&self, revision: &str, created_log_id: i64) -> StoreResult<ImportEpoch> {
        if self.conn.is_autocommit() {
            return Err(StoreError::OutsideTransaction);
        }
        self.conn
            .execute("UPDATE import_epochs SET is_current = 0 WHERE is_current = 1;", [])?;
        self.conn.execute(
            "INSERT INTO import_epochs (revision, is_current, created_log_id)
             VALUES (?1, 1, ?2);",
            params![revision, created_log_id],
        )?;
        let epoch_id = self.conn.last_insert_rowid();
        let mut stmt = self
            .conn
            .prepare(&format!("{EPOCH_SELECT_SQL} WHERE epoch_id = ?1;"))?;
        let mut rows = stmt.query([epoch_id])?;
        match rows.next()? {
            Some(row) => parse_epoch_row(row),
            None => Err(StoreError::InvalidData(format!(
                "import epoch {epoch_id} vanished after insert"
            ))),
        }
    }

    /// Records one export batch row. Must run inside the export transaction.
    pub fn insert_export_batch(
        &self,
        epoch_id: i64,
        revision: &str,
        created_log_id: i64,
    ) -> StoreResult<i64> {
        if self.conn.is_autocommit() {
            return Err(StoreError::OutsideTransaction);
        }
        self.conn.execute(
            "INSERT INTO export_batches (epoch_id, revision, created_log_id)
             VALUES (?1, ?2, ?3);",
            params![epoch_id, revision, created_log_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Revision written by the newest export batch of the given epoch,
    /// if any export ran since that epoch was imported.
    pub fn latest_export_revision(&self, epoch_id: i64) -> StoreResult<Option<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT revision FROM export_batches
             WHERE epoch_id = ?1
             ORDER BY batch_id DESC
             LIMIT 1;",
        )?;
        let revision = stmt
            .query_row([epoch_id], |row| row.get::<_, String>(0))
            .optional()?;
        Ok(revision)
    }

    /// Tags exported version rows with their batch. Must run inside the
    /// export transaction.
    pub fn mark_exported(
        &self,
        kind: EntityKind,
        version_ids: &[i64],
        batch_id: i64,
    ) -> StoreResult<usize> {
        if self.conn.is_autocommit() {
            return Err(StoreError::OutsideTransaction);
        }
        if version_ids.is_empty() {
            return Ok(0);
        }
        let mut sql = format!(
            "UPDATE {} SET export_batch_id = ?1 WHERE export_batch_id IS NULL AND version_id IN (",
            version_table(kind)
        );
        let mut bind_values: Vec<Value> = Vec::with_capacity(version_ids.len() + 1);
        bind_values.push(Value::Integer(batch_id));
        for (position, version_id) in version_ids.iter().enumerate() {
            if position > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&format!("?{}", position + 2));
            bind_values.push(Value::Integer(*version_id));
        }
        sql.push_str(");");
        let changed = self.conn.execute(&sql, params_from_iter(bind_values))?;
        Ok(changed)
    }

    /// Counts latest rows carrying changes not yet shipped by an export.
    /// Zero when the store is empty.
    pub fn count_uncommitted_changes(&self) -> StoreResult<i64> {
        let Some(epoch) = current_epoch_row(self.conn)? else {
            return Ok(0);
        };
        let mut total = 0i64;
        for kind in EntityKind::ALL {
            let count: i64 = self.conn.query_row(
                &format!(
                    "SELECT COUNT(*)
                     FROM {table}
                     WHERE import_epoch_id = ?1
                       AND is_latest = 1
                       AND export_batch_id IS NULL
                       AND review_state <> 'rejected'
                       AND (is_touched = 1 OR deleted_log_id IS NOT NULL);",
                    table = version_table(kind),
                ),
                [epoch.epoch_id],
                |row| row.get(0),
            )?;
            total += count;
        }
        Ok(total)
    }

    /// Drops untouched latest rows from older epochs. Imported mirror rows
    /// nobody edited carry no history worth keeping once a fresh snapshot
    /// replaces them. Must run inside the import transaction.
    pub fn remove_nontouched_latest(&self, current_epoch_id: i64) -> StoreResult<usize> {
        if self.conn.is_autocommit() {
            return Err(StoreError::OutsideTransaction);
        }
        let mut removed = 0usize;
        for kind in EntityKind::ALL {
            removed += self.conn.execute(
                &format!(
                    "DELETE FROM {table}
                     WHERE is_latest = 1
                       AND is_touched = 0
                       AND deleted_log_id IS NULL
                       AND import_epoch_id <> ?1;",
                    table = version_table(kind),
                ),
                [current_epoch_id],
            )?;
        }
        Ok(removed)
    }

    /// Raises entity id sequences to at least the highest imported id, so
    /// entities created after an import never reuse a corpus id. Sequences
    /// are never lowered. Must run inside the import transaction.
    pub fn resequence_entity_ids(&self) -> StoreResult<()> {
        if self.conn.is_autocommit() {
            return Err(StoreError::OutsideTransaction);
        }
        for kind in EntityKind::ALL {
            let table = entity_table(kind);
            let max_id: i64 = self.conn.query_row(
                &format!("SELECT COALESCE(MAX(id), 0) FROM {table};"),
                [],
                |row| row.get(0),
            )?;
            if max_id == 0 {
                continue;
            }
            let current: Option<i64> = self
                .conn
                .query_row(
                    "SELECT seq FROM sqlite_sequence WHERE name = ?1;",
                    [table],
                    |row| row.get(0),
                )
                .optional()?;
            match current {
                None => {
                    self.conn.execute(
                        "INSERT INTO sqlite_sequence (name, seq) VALUES (?1, ?2);",
                        params![table, max_id],
                    )?;
                }
                Some(seq) if seq < max_id => {
                    self.conn.execute(
                        "UPDATE sqlite_sequence SET seq = ?2 WHERE name = ?1;",
                        params![table, max_id],
                    )?;
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Captures alias identities of one epoch before an import purges its
    /// rows, keyed by (person, name) on the caller side.
    pub fn person_alias_identity(&self, epoch_id: i64) -> StoreResult<Vec<AliasIdentity>> {
        let mut stmt = self.conn.prepare(
            "SELECT person_alias_id, person_id, name
             FROM person_alias_versions
             WHERE import_epoch_id = ?1
               AND is_latest = 1
               AND deleted_log_id IS NULL
             ORDER BY version_id ASC;",
        )?;
        let mut rows = stmt.query([epoch_id])?;
        let mut identities = Vec::new();
        while let Some(row) = rows.next()? {
            identities.push(AliasIdentity {
                alias_id: row.get(0)?,
                person_id: row.get(1)?,
                name: row.get(2)?,
            });
        }
        Ok(identities)
    }

    fn query_versions(
        &self,
        kind: EntityKind,
        sql: &str,
        epoch_id: i64,
    ) -> StoreResult<Vec<EntityVersion>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query([epoch_id])?;
        let mut versions = Vec::new();
        while let Some(row) = rows.next()? {
            versions.push(parse_version_row(kind, row)?);
        }
        Ok(versions)
    }
}

#[derive(Debug)]
struct NewVersionRow {
    is_latest: bool,
    is_touched: bool,
    is_new: bool,
    review_state: ReviewState,
    import_epoch_id: i64,
    created_log_id: i64,
    reviewed_log_id: Option<i64>,
}

fn append_version_row(
    tx: &Connection,
    entity_id: i64,
    payload: &VersionPayload,
    predecessor: Option<&EntityVersion>,
    epoch_id: i64,
    actor: &Actor,
    auto_accept: bool,
) -> StoreResult<i64> {
    let kind = payload.kind();
    let log_id = log_repo::append_log(
        tx,
        LogKind::Edit,
        actor,
        Some(&format!("{kind} {entity_id}")),
    )?;
    tx.execute(
        &format!(
            "UPDATE {table}
             SET is_latest = 0
             WHERE {id_column} = ?1
               AND import_epoch_id = ?2
               AND is_latest = 1;",
            table = version_table(kind),
            id_column = id_column(kind),
        ),
        params![entity_id, epoch_id],
    )?;
    let row = NewVersionRow {
        is_latest: true,
        is_touched: true,
        is_new: predecessor.map_or(true, |version| version.is_new),
        review_state: if auto_accept {
            ReviewState::Accepted
        } else {
            ReviewState::Pending
        },
        import_epoch_id: epoch_id,
        created_log_id: log_id,
        reviewed_log_id: auto_accept.then_some(log_id),
    };
    insert_version_row(tx, entity_id, &row, payload)
}

fn insert_version_row(
    conn: &Connection,
    entity_id: i64,
    row: &NewVersionRow,
    payload: &VersionPayload,
) -> StoreResult<i64> {
    match payload {
        VersionPayload::Letter(letter) => {
            let actions = serde_json::to_string(&letter.actions).map_err(|err| {
                StoreError::InvalidData(format!("letter actions failed to serialize: {err}"))
            })?;
            conn.execute(
                "INSERT INTO letter_versions (
                    letter_id,
                    is_latest,
                    is_touched,
                    is_new,
                    review_state,
                    import_epoch_id,
                    created_log_id,
                    reviewed_log_id,
                    document,
                    actions
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
                params![
                    entity_id,
                    bool_to_int(row.is_latest),
                    bool_to_int(row.is_touched),
                    bool_to_int(row.is_new),
                    row.review_state.as_str(),
                    row.import_epoch_id,
                    row.created_log_id,
                    row.reviewed_log_id,
                    letter.document.as_str(),
                    actions,
                ],
            )?;
        }
        VersionPayload::Person(person) => {
            conn.execute(
                "INSERT INTO person_versions (
                    person_id,
                    is_latest,
                    is_touched,
                    is_new,
                    review_state,
                    import_epoch_id,
                    created_log_id,
                    reviewed_log_id,
                    name,
                    forename,
                    surname,
                    gnd,
                    is_organization
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13);",
                params![
                    entity_id,
                    bool_to_int(row.is_latest),
                    bool_to_int(row.is_touched),
                    bool_to_int(row.is_new),
                    row.review_state.as_str(),
                    row.import_epoch_id,
                    row.created_log_id,
                    row.reviewed_log_id,
                    person.name.as_str(),
                    person.forename.as_deref(),
                    person.surname.as_deref(),
                    person.gnd.as_deref(),
                    bool_to_int(person.is_organization),
                ],
            )?;
        }
        VersionPayload::PersonAlias(alias) => {
            conn.execute(
                "INSERT INTO person_alias_versions (
                    person_alias_id,
                    is_latest,
                    is_touched,
                    is_new,
                    review_state,
                    import_epoch_id,
                    created_log_id,
                    reviewed_log_id,
                    person_id,
                    name
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
                params![
                    entity_id,
                    bool_to_int(row.is_latest),
                    bool_to_int(row.is_touched),
                    bool_to_int(row.is_new),
                    row.review_state.as_str(),
                    row.import_epoch_id,
                    row.created_log_id,
                    row.reviewed_log_id,
                    alias.person_id,
                    alias.name.as_str(),
                ],
            )?;
        }
        VersionPayload::Place(place) => {
            conn.execute(
                "INSERT INTO place_versions (
                    place_id,
                    is_latest,
                    is_touched,
                    is_new,
                    review_state,
                    import_epoch_id,
                    created_log_id,
                    reviewed_log_id,
                    name,
                    country,
                    latitude,
                    longitude
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12);",
                params![
                    entity_id,
                    bool_to_int(row.is_latest),
                    bool_to_int(row.is_touched),
                    bool_to_int(row.is_new),
                    row.review_state.as_str(),
                    row.import_epoch_id,
                    row.created_log_id,
                    row.reviewed_log_id,
                    place.name.as_str(),
                    place.country.as_deref(),
                    place.latitude,
                    place.longitude,
                ],
            )?;
        }
    }
    Ok(conn.last_insert_rowid())
}

fn validate_payload_targets(conn: &Connection, payload: &VersionPayload) -> StoreResult<()> {
    if let VersionPayload::PersonAlias(alias) = payload {
        if !entity_exists(conn, EntityKind::Person, alias.person_id)? {
            return Err(StoreError::NotFound {
                kind: EntityKind::Person,
                entity_id: alias.person_id,
            });
        }
    }
    Ok(())
}

pub(crate) fn entity_table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Letter => "letters",
        EntityKind::Person => "persons",
        EntityKind::PersonAlias => "person_aliases",
        EntityKind::Place => "places",
    }
}

pub(crate) fn version_table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Letter => "letter_versions",
        EntityKind::Person => "person_versions",
        EntityKind::PersonAlias => "person_alias_versions",
        EntityKind::Place => "place_versions",
    }
}

pub(crate) fn id_column(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Letter => "letter_id",
        EntityKind::Person => "person_id",
        EntityKind::PersonAlias => "person_alias_id",
        EntityKind::Place => "place_id",
    }
}

fn payload_columns(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Letter => "document, actions",
        EntityKind::Person => "name, forename, surname, gnd, is_organization",
        EntityKind::PersonAlias => "person_id, name",
        EntityKind::Place => "name, country, latitude, longitude",
    }
}

pub(crate) fn version_select_sql(kind: EntityKind) -> String {
    format!(
        "SELECT
            version_id,
            {id_column} AS entity_id,
            is_latest,
            is_touched,
            is_new,
            review_state,
            import_epoch_id,
            export_batch_id,
            created_log_id,
            reviewed_log_id,
            deleted_log_id,
            {payload}
         FROM {table}",
        id_column = id_column(kind),
        payload = payload_columns(kind),
        table = version_table(kind),
    )
}

pub(crate) fn version_row(
    conn: &Connection,
    kind: EntityKind,
    version_id: i64,
) -> StoreResult<Option<EntityVersion>> {
    let sql = format!(
        "{select} WHERE version_id = ?1;",
        select = version_select_sql(kind)
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([version_id])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_version_row(kind, row)?));
    }
    Ok(None)
}

pub(crate) fn require_version_row(
    conn: &Connection,
    kind: EntityKind,
    version_id: i64,
) -> StoreResult<EntityVersion> {
    version_row(conn, kind, version_id)?.ok_or(StoreError::VersionNotFound { kind, version_id })
}

pub(crate) fn latest_version_row(
    conn: &Connection,
    kind: EntityKind,
    entity_id: i64,
    epoch_id: i64,
) -> StoreResult<Option<EntityVersion>> {
    let sql = format!(
        "{select}
         WHERE {id_column} = ?1
           AND import_epoch_id = ?2
           AND is_latest = 1;",
        select = version_select_sql(kind),
        id_column = id_column(kind),
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![entity_id, epoch_id])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_version_row(kind, row)?));
    }
    Ok(None)
}

pub(crate) fn entity_exists(
    conn: &Connection,
    kind: EntityKind,
    entity_id: i64,
) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        &format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1);",
            entity_table(kind)
        ),
        [entity_id],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

pub(crate) fn current_epoch_row(conn: &Connection) -> StoreResult<Option<ImportEpoch>> {
    let mut stmt = conn.prepare(&format!("{EPOCH_SELECT_SQL} WHERE is_current = 1;"))?;
    let mut rows = stmt.query([])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_epoch_row(row)?));
    }
    Ok(None)
}

pub(crate) fn require_current_epoch_row(conn: &Connection) -> StoreResult<ImportEpoch> {
    current_epoch_row(conn)?.ok_or(StoreError::NoCurrentEpoch)
}

fn parse_epoch_row(row: &Row<'_>) -> StoreResult<ImportEpoch> {
    Ok(ImportEpoch {
        epoch_id: row.get("epoch_id")?,
        revision: row.get("revision")?,
        is_current: int_to_bool(row.get("is_current")?, "import_epochs.is_current")?,
        created_log_id: row.get("created_log_id")?,
        created_at: row.get("created_at")?,
    })
}

pub(crate) fn parse_version_row(kind: EntityKind, row: &Row<'_>) -> StoreResult<EntityVersion> {
    let review_text: String = row.get("review_state")?;
    let review_state = ReviewState::parse(&review_text).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid review state `{review_text}` in {}.review_state",
            version_table(kind)
        ))
    })?;

    let payload = match kind {
        EntityKind::Letter => {
            let actions_text: String = row.get("actions")?;
            let actions = serde_json::from_str(&actions_text).map_err(|err| {
                StoreError::InvalidData(format!(
                    "invalid action list in letter_versions.actions: {err}"
                ))
            })?;
            VersionPayload::Letter(LetterPayload {
                document: row.get("document")?,
                actions,
            })
        }
        EntityKind::Person => VersionPayload::Person(PersonPayload {
            name: row.get("name")?,
            forename: row.get("forename")?,
            surname: row.get("surname")?,
            gnd: row.get("gnd")?,
            is_organization: int_to_bool(
                row.get("is_organization")?,
                "person_versions.is_organization",
            )?,
        }),
        EntityKind::PersonAlias => VersionPayload::PersonAlias(PersonAliasPayload {
            person_id: row.get("person_id")?,
            name: row.get("name")?,
        }),
        EntityKind::Place => VersionPayload::Place(PlacePayload {
            name: row.get("name")?,
            country: row.get("country")?,
            latitude: row.get("latitude")?,
            longitude: row.get("longitude")?,
        }),
    };

    Ok(EntityVersion {
        version_id: row.get("version_id")?,
        entity_id: row.get("entity_id")?,
        is_latest: int_to_bool(row.get("is_latest")?, "is_latest")?,
        is_touched: int_to_bool(row.get("is_touched")?, "is_touched")?,
        is_new: int_to_bool(row.get("is_new")?, "is_new")?,
        review_state,
        import_epoch_id: row.get("import_epoch_id")?,
        export_batch_id: row.get("export_batch_id")?,
        created_log_id: row.get("created_log_id")?,
        reviewed_log_id: row.get("reviewed_log_id")?,
        deleted_log_id: row.get("deleted_log_id")?,
        payload,
    })
}

fn int_to_bool(value: i64, column: &str) -> StoreResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(StoreError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

fn ensure_store_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in REQUIRED_TABLES {
        if !table_exists(conn, table)? {
            return Err(StoreError::MissingRequiredTable(table));
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
