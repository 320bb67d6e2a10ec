//! Name reference rows and link counters.
//!
//! # Responsibility
//! - Persist which persons and places each letter's latest document
//!   mentions, with occurrence counts.
//! - Keep the denormalized `link_count` on persons and places in step.
//!
//! # Invariants
//! - Reference rows for a letter are replaced wholesale, never edited.
//! - `link_count` equals the number of letters referencing the entity, not
//!   the number of occurrences.

use crate::document::mentions::{Mention, MentionKind};
use crate::repo::{StoreError, StoreResult};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, BTreeSet};

/// One letter-to-entity reference row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameReference {
    pub letter_id: i64,
    pub target_kind: MentionKind,
    pub target_id: i64,
    /// How many times the letter mentions the entity.
    pub occurrences: i64,
}

/// Replaces all reference rows of one letter from freshly extracted
/// mentions and refreshes link counts for every entity involved, old or
/// new.
pub fn replace_letter_references(
    conn: &Connection,
    letter_id: i64,
    mentions: &[Mention],
) -> StoreResult<()> {
    let mut counts: BTreeMap<(MentionKind, i64), i64> = BTreeMap::new();
    for mention in mentions {
        *counts.entry((mention.kind, mention.target_id)).or_insert(0) += 1;
    }

    let mut affected: BTreeSet<(MentionKind, i64)> = counts.keys().copied().collect();
    let mut stmt = conn.prepare(
        "SELECT target_kind, target_id
         FROM name_references
         WHERE letter_id = ?1;",
    )?;
    let mut rows = stmt.query([letter_id])?;
    while let Some(row) = rows.next()? {
        let kind_text: String = row.get(0)?;
        affected.insert((parse_target_kind(&kind_text)?, row.get(1)?));
    }

    conn.execute(
        "DELETE FROM name_references WHERE letter_id = ?1;",
        [letter_id],
    )?;
    for ((kind, target_id), occurrences) in &counts {
        conn.execute(
            "INSERT INTO name_references (letter_id, target_kind, target_id, occurrences)
             VALUES (?1, ?2, ?3, ?4);",
            params![letter_id, kind.as_str(), target_id, occurrences],
        )?;
    }

    for kind in [MentionKind::Person, MentionKind::Place] {
        let ids: Vec<i64> = affected
            .iter()
            .filter(|(entry_kind, _)| *entry_kind == kind)
            .map(|(_, id)| *id)
            .collect();
        update_link_counts_for(conn, kind, &ids)?;
    }
    Ok(())
}

/// Lists reference rows of one letter, persons before places.
pub fn list_letter_references(
    conn: &Connection,
    letter_id: i64,
) -> StoreResult<Vec<NameReference>> {
    let mut stmt = conn.prepare(
        "SELECT letter_id, target_kind, target_id, occurrences
         FROM name_references
         WHERE letter_id = ?1
         ORDER BY target_kind ASC, target_id ASC;",
    )?;
    let mut rows = stmt.query([letter_id])?;
    collect_reference_rows(&mut rows)
}

/// Lists the letters referencing one entity.
pub fn list_references_to(
    conn: &Connection,
    kind: MentionKind,
    target_id: i64,
) -> StoreResult<Vec<NameReference>> {
    let mut stmt = conn.prepare(
        "SELECT letter_id, target_kind, target_id, occurrences
         FROM name_references
         WHERE target_kind = ?1
           AND target_id = ?2
         ORDER BY letter_id ASC;",
    )?;
    let mut rows = stmt.query(params![kind.as_str(), target_id])?;
    collect_reference_rows(&mut rows)
}

/// How many of a letter's referenced entities are not in an accepted,
/// undeleted latest version within the given epoch. A reference to an id
/// with no version row at all counts too.
pub fn unaccepted_reference_count(
    conn: &Connection,
    letter_id: i64,
    epoch_id: i64,
) -> StoreResult<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*)
         FROM name_references r
         LEFT JOIN person_versions pv
           ON r.target_kind = 'person'
          AND pv.person_id = r.target_id
          AND pv.import_epoch_id = ?2
          AND pv.is_latest = 1
         LEFT JOIN place_versions lv
           ON r.target_kind = 'place'
          AND lv.place_id = r.target_id
          AND lv.import_epoch_id = ?2
          AND lv.is_latest = 1
         WHERE r.letter_id = ?1
           AND (
             (r.target_kind = 'person'
               AND (pv.version_id IS NULL
                 OR pv.review_state <> 'accepted'
                 OR pv.deleted_log_id IS NOT NULL))
             OR
             (r.target_kind = 'place'
               AND (lv.version_id IS NULL
                 OR lv.review_state <> 'accepted'
                 OR lv.deleted_log_id IS NOT NULL))
           );",
        params![letter_id, epoch_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Current link count of one person or place. `None` when the entity row
/// does not exist.
pub fn link_count(
    conn: &Connection,
    kind: MentionKind,
    entity_id: i64,
) -> StoreResult<Option<i64>> {
    let value = conn
        .query_row(
            &format!("SELECT link_count FROM {} WHERE id = ?1;", link_table(kind)),
            [entity_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

/// Recomputes link counts for every person and place. The import pipeline
/// runs this once after rebuilding all reference rows.
pub fn update_all_link_counts(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "UPDATE persons
         SET link_count = (
            SELECT COUNT(*)
            FROM name_references r
            WHERE r.target_kind = 'person'
              AND r.target_id = persons.id
         );",
        [],
    )?;
    conn.execute(
        "UPDATE places
         SET link_count = (
            SELECT COUNT(*)
            FROM name_references r
            WHERE r.target_kind = 'place'
              AND r.target_id = places.id
         );",
        [],
    )?;
    Ok(())
}

/// Drops every reference row. Must run inside the import transaction; the
/// import rebuilds references letter by letter afterwards.
pub fn clear_all_references(conn: &Connection) -> StoreResult<()> {
    if conn.is_autocommit() {
        return Err(StoreError::OutsideTransaction);
    }
    conn.execute("DELETE FROM name_references;", [])?;
    Ok(())
}

fn update_link_counts_for(conn: &Connection, kind: MentionKind, ids: &[i64]) -> StoreResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let table = link_table(kind);
    let mut sql = format!(
        "UPDATE {table}
         SET link_count = (
            SELECT COUNT(*)
            FROM name_references r
            WHERE r.target_kind = '{kind}'
              AND r.target_id = {table}.id
         )
         WHERE id IN (",
        kind = kind.as_str(),
    );
    let mut bind_values: Vec<Value> = Vec::with_capacity(ids.len());
    for (position, id) in ids.iter().enumerate() {
        if position > 0 {
            sql.push_str(", ");
        }
        sql.push_str(&format!("?{}", position + 1));
        bind_values.push(Value::Integer(*id));
    }
    sql.push_str(");");
    conn.execute(&sql, params_from_iter(bind_values))?;
    Ok(())
}

fn collect_reference_rows(rows: &mut rusqlite::Rows<'_>) -> StoreResult<Vec<NameReference>> {
    let mut references = Vec::new();
    while let Some(row) = rows.next()? {
        references.push(parse_reference_row(row)?);
    }
    Ok(references)
}

fn parse_reference_row(row: &Row<'_>) -> StoreResult<NameReference> {
    let kind_text: String = row.get("target_kind")?;
    Ok(NameReference {
        letter_id: row.get("letter_id")?,
        target_kind: parse_target_kind(&kind_text)?,
        target_id: row.get("target_id")?,
        occurrences: row.get("occurrences")?,
    })
}

fn parse_target_kind(value: &str) -> StoreResult<MentionKind> {
    match value {
        "person" => Ok(MentionKind::Person),
        "place" => Ok(MentionKind::Place),
        other => Err(StoreError::InvalidData(format!(
            "invalid target kind `{other}` in name_references.target_kind"
        ))),
    }
}

fn link_table(kind: MentionKind) -> &'static str {
    match kind {
        MentionKind::Person => "persons",
        MentionKind::Place => "places",
    }
}
