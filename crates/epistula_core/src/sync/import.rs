//! Corpus import.
//!
//! # Responsibility
//! - Load the checked-out corpus revision into a fresh import epoch,
//!   replacing the untouched remains of the outgoing one.
//!
//! # Invariants
//! - Import writes nothing unless every corpus file parses and the store
//!   carries no unexported citizen changes.
//! - All store writes run in one exclusive transaction; a failure anywhere
//!   leaves the store byte-identical.

use crate::document::mentions::{extract_mentions, Mention};
use crate::document::tree::XmlTree;
use crate::model::actor::{Actor, Role};
use crate::model::audit::LogKind;
use crate::model::entity::{LetterPayload, PersonAliasPayload, VersionPayload};
use crate::repo::version_repo::VersionStore;
use crate::repo::{log_repo, reference_repo};
use crate::sync::corpus::{self, PersonEntry, PlaceEntry};
use crate::sync::git::CorpusRepo;
use crate::sync::{SyncConfig, SyncError, SyncResult, SyncStage};
use log::{error, info};
use rusqlite::{Connection, TransactionBehavior};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Instant;

/// What one import run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    pub epoch_id: i64,
    /// Corpus commit hash the epoch was created from.
    pub revision: String,
    pub letters: usize,
    pub persons: usize,
    pub organizations: usize,
    pub person_aliases: usize,
    pub places: usize,
    /// Never-touched latest rows purged from the outgoing epoch.
    pub removed_versions: usize,
}

/// Imports the checked-out corpus revision into a new epoch.
///
/// # Contract
/// - Requires the administrator role and a clean corpus working tree.
/// - Fails with `Precondition` before any write when unexported citizen
///   changes exist.
/// - On success exactly one epoch is current: the new one.
///
/// # Side effects
/// - Emits `corpus_import` logging events with duration and status.
pub fn import_corpus(
    conn: &mut Connection,
    config: &SyncConfig,
    actor: &Actor,
) -> SyncResult<ImportOutcome> {
    let started_at = Instant::now();
    info!(
        "event=corpus_import module=sync status=start corpus_dir={}",
        config.corpus_dir.display()
    );
    match run_import(conn, config, actor) {
        Ok(outcome) => {
            info!(
                "event=corpus_import module=sync status=ok duration_ms={} epoch_id={} revision={} letters={} persons={} organizations={} person_aliases={} places={} removed_versions={}",
                started_at.elapsed().as_millis(),
                outcome.epoch_id,
                outcome.revision,
                outcome.letters,
                outcome.persons,
                outcome.organizations,
                outcome.person_aliases,
                outcome.places,
                outcome.removed_versions,
            );
            Ok(outcome)
        }
        Err(err) => {
            error!(
                "event=corpus_import module=sync status=error duration_ms={} error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

struct ParsedLetter {
    letter_id: i64,
    document: String,
    mentions: Vec<Mention>,
}

fn run_import(
    conn: &mut Connection,
    config: &SyncConfig,
    actor: &Actor,
) -> SyncResult<ImportOutcome> {
    if !actor.can_administer() {
        return Err(SyncError::Forbidden {
            required: Role::Administrator,
        });
    }

    let repo = CorpusRepo::open(&config.corpus_dir)?;
    let corpus_root = repo.workdir()?.to_path_buf();
    if !repo.is_clean()? {
        return Err(SyncError::Precondition {
            stage: SyncStage::Import,
            message: "corpus working tree is not clean".to_string(),
        });
    }
    let revision = repo.head_revision()?;

    // Parse everything before touching the store; a bad file aborts with
    // zero writes.
    let persons = parse_person_file(&corpus_root, corpus::PERSONS_INDEX, false)?;
    let organizations = parse_person_file(&corpus_root, corpus::ORGANIZATIONS_INDEX, true)?;
    let places = parse_place_file(&corpus_root)?;
    let letters = read_letter_files(&corpus_root)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
    let store = VersionStore::try_new(&tx)?;

    if store.count_uncommitted_changes()? > 0 {
        return Err(SyncError::Precondition {
            stage: SyncStage::Import,
            message: "store carries citizen changes that were never exported".to_string(),
        });
    }

    let import_log_id = log_repo::append_log(&tx, LogKind::Import, actor, Some(&revision))?;

    // The corpus carries no alias ids; carry them over from the outgoing
    // epoch by (person, name) so alias history lines up across imports.
    let mut alias_ids: BTreeMap<(i64, String), i64> = BTreeMap::new();
    if let Some(outgoing) = store.current_epoch()? {
        for identity in store.person_alias_identity(outgoing.epoch_id)? {
            alias_ids.insert((identity.person_id, identity.name), identity.alias_id);
        }
    }

    let epoch = store.begin_epoch(&revision, import_log_id)?;
    let removed_versions = store.remove_nontouched_latest(epoch.epoch_id)?;
    reference_repo::clear_all_references(&tx)?;

    for entry in persons.iter().chain(&organizations) {
        store.import_versioned(
            entry.id,
            &VersionPayload::Person(entry.payload.clone()),
            epoch.epoch_id,
            import_log_id,
        )?;
    }

    let mut person_aliases = 0usize;
    for entry in persons.iter().chain(&organizations) {
        for alias in &entry.aliases {
            let key = (entry.id, alias.clone());
            let alias_id = match alias_ids.get(&key) {
                Some(alias_id) => *alias_id,
                None => {
                    tx.execute("INSERT INTO person_aliases DEFAULT VALUES;", [])?;
                    let fresh = tx.last_insert_rowid();
                    alias_ids.insert(key, fresh);
                    fresh
                }
            };
            store.import_versioned(
                alias_id,
                &VersionPayload::PersonAlias(PersonAliasPayload {
                    person_id: entry.id,
                    name: alias.clone(),
                }),
                epoch.epoch_id,
                import_log_id,
            )?;
            person_aliases += 1;
        }
    }

    for entry in &places {
        store.import_versioned(
            entry.id,
            &VersionPayload::Place(entry.payload.clone()),
            epoch.epoch_id,
            import_log_id,
        )?;
    }

    for letter in &letters {
        store.import_versioned(
            letter.letter_id,
            &VersionPayload::Letter(LetterPayload {
                document: letter.document.clone(),
                actions: Vec::new(),
            }),
            epoch.epoch_id,
            import_log_id,
        )?;
        reference_repo::replace_letter_references(&tx, letter.letter_id, &letter.mentions)?;
    }

    reference_repo::update_all_link_counts(&tx)?;
    store.resequence_entity_ids()?;

    let outcome = ImportOutcome {
        epoch_id: epoch.epoch_id,
        revision,
        letters: letters.len(),
        persons: persons.len(),
        organizations: organizations.len(),
        person_aliases,
        places: places.len(),
        removed_versions,
    };
    tx.commit()?;
    Ok(outcome)
}

fn parse_person_file(
    corpus_root: &Path,
    file: &str,
    organizations: bool,
) -> SyncResult<Vec<PersonEntry>> {
    let input = read_corpus_file(corpus_root, file)?;
    corpus::parse_person_index(&input, organizations).map_err(|err| SyncError::Corpus {
        file: file.to_string(),
        message: err.to_string(),
    })
}

fn parse_place_file(corpus_root: &Path) -> SyncResult<Vec<PlaceEntry>> {
    let input = read_corpus_file(corpus_root, corpus::LOCALITIES_INDEX)?;
    corpus::parse_place_index(&input).map_err(|err| SyncError::Corpus {
        file: corpus::LOCALITIES_INDEX.to_string(),
        message: err.to_string(),
    })
}

fn read_corpus_file(corpus_root: &Path, file: &str) -> SyncResult<String> {
    fs::read_to_string(corpus_root.join(file)).map_err(|err| SyncError::Corpus {
        file: file.to_string(),
        message: err.to_string(),
    })
}

fn read_letter_files(corpus_root: &Path) -> SyncResult<Vec<ParsedLetter>> {
    let dir = corpus_root.join(corpus::LETTERS_DIR);
    if !dir.is_dir() {
        return Err(SyncError::Corpus {
            file: corpus::LETTERS_DIR.to_string(),
            message: "letters directory is missing".to_string(),
        });
    }

    let mut letters = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().and_then(|extension| extension.to_str()) != Some("xml") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            return Err(SyncError::Corpus {
                file: path.display().to_string(),
                message: "letter file name is not valid UTF-8".to_string(),
            });
        };
        let file = format!("{}/{stem}.xml", corpus::LETTERS_DIR);
        let letter_id = stem
            .parse::<i64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| SyncError::Corpus {
                file: file.clone(),
                message: "letter file name is not a numeric id".to_string(),
            })?;
        let input = fs::read_to_string(&path)?;
        let tree = XmlTree::parse(&input).map_err(|err| SyncError::Corpus {
            file: file.clone(),
            message: err.to_string(),
        })?;
        letters.push(ParsedLetter {
            letter_id,
            document: tree.serialize(),
            mentions: extract_mentions(&tree),
        });
    }
    letters.sort_by_key(|letter| letter.letter_id);
    Ok(letters)
}
