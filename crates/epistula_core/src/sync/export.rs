//! Corpus export.
//!
//! # Responsibility
//! - Write accepted corrections back into the corpus checkout, commit them
//!   on the integration branch, push, and mark the shipped rows.
//!
//! # Invariants
//! - Rows are marked exported only after the push succeeded; a crash in
//!   between leaves a stranded commit that the next run rewinds and redoes.
//! - A failed push resets the checkout to the export base; the store is
//!   untouched either way.

use crate::model::actor::{Actor, Role};
use crate::model::audit::LogKind;
use crate::model::entity::{EntityKind, EntityVersion, VersionPayload};
use crate::repo::version_repo::VersionStore;
use crate::repo::{log_repo, reference_repo, StoreError};
use crate::sync::corpus::{self, PersonEntry, PlaceEntry};
use crate::sync::git::CorpusRepo;
use crate::sync::{SyncConfig, SyncError, SyncResult, SyncStage};
use log::{error, info, warn};
use rusqlite::{Connection, TransactionBehavior};
use std::collections::BTreeMap;
use std::fs;
use std::time::Instant;

/// What one export run did. `batch_id` and `revision` stay `None` when
/// nothing was eligible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutcome {
    pub batch_id: Option<i64>,
    /// Corpus commit hash of the export commit.
    pub revision: Option<String>,
    pub letters_exported: usize,
    pub letters_removed: usize,
    /// Letters held back because they still reference unaccepted entities.
    pub letters_skipped: Vec<i64>,
    pub persons: usize,
    pub person_aliases: usize,
    pub places: usize,
}

/// Exports accepted corrections to the corpus and pushes the integration
/// branch.
///
/// # Contract
/// - Requires the administrator role.
/// - Requires the checkout at the epoch's last export base (or the import
///   revision when nothing was exported yet) with a clean working tree.
/// - Letters referencing unaccepted entities are held back, not failed.
/// - Returns an empty outcome without committing when nothing is eligible.
///
/// # Side effects
/// - Emits `corpus_export` logging events with duration and status.
pub fn export_corpus(
    conn: &mut Connection,
    config: &SyncConfig,
    actor: &Actor,
) -> SyncResult<ExportOutcome> {
    let started_at = Instant::now();
    info!(
        "event=corpus_export module=sync status=start corpus_dir={}",
        config.corpus_dir.display()
    );
    match run_export(conn, config, actor) {
        Ok(outcome) => {
            let batch = outcome
                .batch_id
                .map_or_else(|| "none".to_string(), |id| id.to_string());
            let revision = outcome.revision.clone().unwrap_or_else(|| "none".to_string());
            info!(
                "event=corpus_export module=sync status=ok duration_ms={} batch_id={batch} revision={revision} letters_exported={} letters_removed={} letters_skipped={} persons={} person_aliases={} places={}",
                started_at.elapsed().as_millis(),
                outcome.letters_exported,
                outcome.letters_removed,
                outcome.letters_skipped.len(),
                outcome.persons,
                outcome.person_aliases,
                outcome.places,
            );
            Ok(outcome)
        }
        Err(err) => {
            error!(
                "event=corpus_export module=sync status=error duration_ms={} error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn run_export(
    conn: &mut Connection,
    config: &SyncConfig,
    actor: &Actor,
) -> SyncResult<ExportOutcome> {
    if !actor.can_administer() {
        return Err(SyncError::Forbidden {
            required: Role::Administrator,
        });
    }

    let repo = CorpusRepo::open(&config.corpus_dir)?;
    let corpus_root = repo.workdir()?.to_path_buf();

    let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
    let store = VersionStore::try_new(&tx)?;
    let epoch = store.require_current_epoch()?;
    let expected_base = store
        .latest_export_revision(epoch.epoch_id)?
        .unwrap_or_else(|| epoch.revision.clone());

    let head = repo.head_revision()?;
    if head != expected_base {
        // A crash between commit and push leaves the checkout one commit
        // ahead of the recorded base. Rewind and redo the export.
        let stranded = repo.parent_of_head()?.as_deref() == Some(expected_base.as_str())
            && repo.is_clean()?;
        if !stranded {
            return Err(SyncError::Precondition {
                stage: SyncStage::Export,
                message: format!("corpus checkout is at {head}, expected {expected_base}"),
            });
        }
        warn!(
            "event=corpus_export module=sync status=retry error_code=stranded_commit head={head} base={expected_base}"
        );
        repo.reset_hard_to(&expected_base)?;
    }
    if !repo.is_clean()? {
        return Err(SyncError::Precondition {
            stage: SyncStage::Export,
            message: "corpus working tree is not clean".to_string(),
        });
    }

    let mut letters = Vec::new();
    let mut letters_skipped = Vec::new();
    for version in store.list_export_eligible(EntityKind::Letter)? {
        // Deleted letters leave no references behind; ship them regardless.
        if !version.is_deleted()
            && reference_repo::unaccepted_reference_count(&tx, version.entity_id, epoch.epoch_id)?
                > 0
        {
            letters_skipped.push(version.entity_id);
            continue;
        }
        letters.push(version);
    }
    let persons = store.list_export_eligible(EntityKind::Person)?;
    let person_aliases = store.list_export_eligible(EntityKind::PersonAlias)?;
    let places = store.list_export_eligible(EntityKind::Place)?;

    if letters.is_empty() && persons.is_empty() && person_aliases.is_empty() && places.is_empty() {
        return Ok(ExportOutcome {
            batch_id: None,
            revision: None,
            letters_exported: 0,
            letters_removed: 0,
            letters_skipped,
            persons: 0,
            person_aliases: 0,
            places: 0,
        });
    }

    let mut letters_exported = 0usize;
    let mut letters_removed = 0usize;
    fs::create_dir_all(corpus_root.join(corpus::LETTERS_DIR))?;
    for version in &letters {
        let path = corpus::letter_path(&corpus_root, version.entity_id);
        if version.is_deleted() {
            if path.exists() {
                fs::remove_file(&path)?;
                letters_removed += 1;
            }
            continue;
        }
        let VersionPayload::Letter(payload) = &version.payload else {
            return Err(StoreError::InvalidData(format!(
                "letter {} carries a non-letter payload",
                version.entity_id
            ))
            .into());
        };
        fs::write(&path, payload.document.as_bytes())?;
        letters_exported += 1;
    }

    // Index files are rewritten whole from the accepted snapshot, so an
    // export of any kind refreshes all three.
    let mut alias_names: BTreeMap<i64, Vec<String>> = BTreeMap::new();
    for version in store.list_accepted_snapshot(EntityKind::PersonAlias)? {
        let entity_id = version.entity_id;
        let VersionPayload::PersonAlias(payload) = version.payload else {
            return Err(StoreError::InvalidData(format!(
                "person alias {entity_id} carries a non-alias payload"
            ))
            .into());
        };
        alias_names.entry(payload.person_id).or_default().push(payload.name);
    }
    let mut person_entries = Vec::new();
    let mut organization_entries = Vec::new();
    for version in store.list_accepted_snapshot(EntityKind::Person)? {
        let entity_id = version.entity_id;
        let VersionPayload::Person(payload) = version.payload else {
            return Err(StoreError::InvalidData(format!(
                "person {entity_id} carries a non-person payload"
            ))
            .into());
        };
        let aliases = alias_names.remove(&entity_id).unwrap_or_default();
        let entry = PersonEntry {
            id: entity_id,
            payload,
            aliases,
        };
        if entry.payload.is_organization {
            organization_entries.push(entry);
        } else {
            person_entries.push(entry);
        }
    }
    let mut place_entries = Vec::new();
    for version in store.list_accepted_snapshot(EntityKind::Place)? {
        let entity_id = version.entity_id;
        let VersionPayload::Place(payload) = version.payload else {
            return Err(StoreError::InvalidData(format!(
                "place {entity_id} carries a non-place payload"
            ))
            .into());
        };
        place_entries.push(PlaceEntry {
            id: entity_id,
            payload,
        });
    }

    fs::create_dir_all(corpus_root.join(corpus::INDEX_DIR))?;
    fs::write(
        corpus_root.join(corpus::PERSONS_INDEX),
        corpus::render_person_index(&person_entries, false),
    )?;
    fs::write(
        corpus_root.join(corpus::ORGANIZATIONS_INDEX),
        corpus::render_person_index(&organization_entries, true),
    )?;
    fs::write(
        corpus_root.join(corpus::LOCALITIES_INDEX),
        corpus::render_place_index(&place_entries),
    )?;

    let shipped = letters.len() + persons.len() + person_aliases.len() + places.len();
    let message = format!("Annotation export ({shipped} changes)");
    let revision = repo.commit_all(
        &config.branch,
        &message,
        &config.committer_name,
        &config.committer_email,
    )?;
    if let Err(err) = repo.force_push(&config.remote, &config.branch) {
        // Keep the checkout at the recorded base so the next run starts
        // from a known commit.
        let _ = repo.reset_hard_to(&expected_base);
        return Err(err.into());
    }

    let export_log_id = log_repo::append_log(&tx, LogKind::Export, actor, Some(&revision))?;
    let batch_id = store.insert_export_batch(epoch.epoch_id, &revision, export_log_id)?;
    store.mark_exported(EntityKind::Letter, &version_ids(&letters), batch_id)?;
    store.mark_exported(EntityKind::Person, &version_ids(&persons), batch_id)?;
    store.mark_exported(EntityKind::PersonAlias, &version_ids(&person_aliases), batch_id)?;
    store.mark_exported(EntityKind::Place, &version_ids(&places), batch_id)?;

    let outcome = ExportOutcome {
        batch_id: Some(batch_id),
        revision: Some(revision),
        letters_exported,
        letters_removed,
        letters_skipped,
        persons: persons.len(),
        person_aliases: person_aliases.len(),
        places: places.len(),
    };
    tx.commit()?;
    Ok(outcome)
}

fn version_ids(rows: &[EntityVersion]) -> Vec<i64> {
    rows.iter().map(|version| version.version_id).collect()
}
