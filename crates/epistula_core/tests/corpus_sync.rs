use epistula_core::db::open_db_in_memory;
use epistula_core::document::action::Action;
use epistula_core::document::mentions::MentionKind;
use epistula_core::document::path::NodePath;
use epistula_core::model::actor::{Actor, Role};
use epistula_core::model::audit::LogKind;
use epistula_core::model::entity::{
    EntityKind, PlacePatch, ReviewState, VersionPatch, VersionPayload,
};
use epistula_core::repo::{log_repo, reference_repo};
use epistula_core::repo::version_repo::VersionStore;
use epistula_core::review::gate::ReviewGate;
use epistula_core::service::edit_service::{EditService, SaveLetterRequest};
use epistula_core::sync::export::export_corpus;
use epistula_core::sync::import::{import_corpus, ImportOutcome};
use epistula_core::sync::{SyncConfig, SyncError, SyncStage};
use git2::{IndexAddOption, Repository, Signature};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uuid::Uuid;

const PERSONS_XML: &str = "<listPerson>\n  <person gnd=\"118517880\" xml:id=\"p17\">\n    <persName forename=\"Heinrich\" surname=\"Bullinger\">Heinrich Bullinger</persName>\n    <persName type=\"alias\">Bullingerus</persName>\n  </person>\n</listPerson>\n";
const ORGANIZATIONS_XML: &str = "<listOrg>\n  <org xml:id=\"p40\">\n    <orgName>Rat von Bern</orgName>\n  </org>\n</listOrg>\n";
const LOCALITIES_XML: &str = "<listPlace>\n  <place xml:id=\"l2\">\n    <placeName>Bern</placeName>\n    <country>CH</country>\n    <geo>46.948 7.4474</geo>\n  </place>\n</listPlace>\n";
const LETTER_ONE: &str =
    "<letter><p>Heinrich schrieb aus <placeName ref=\"l2\">Bern</placeName>.</p></letter>\n";
const LETTER_ONE_CERT: &str =
    "<letter><p>Heinrich schrieb aus <placeName cert=\"high\" ref=\"l2\">Bern</placeName>.</p></letter>\n";
const LETTER_TWO: &str =
    "<letter><p><persName cert=\"low\" ref=\"p17\">Bullinger</persName> an den <orgName ref=\"p40\">Rat von Bern</orgName>.</p></letter>\n";

const PERSONS_INDEX_CANONICAL: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<listPerson><person gnd=\"118517880\" xml:id=\"p17\"><persName forename=\"Heinrich\" surname=\"Bullinger\">Heinrich Bullinger</persName><persName type=\"alias\">Bullingerus</persName></person></listPerson>\n";

#[test]
fn import_loads_the_corpus_into_a_fresh_epoch() {
    let fixture = seed_corpus();
    let config = SyncConfig::new(&fixture.corpus_dir);
    let mut conn = open_db_in_memory().unwrap();

    let outcome = import_corpus(&mut conn, &config, &admin()).unwrap();
    assert_eq!(
        outcome,
        ImportOutcome {
            epoch_id: 1,
            revision: fixture.seed_revision.clone(),
            letters: 2,
            persons: 1,
            organizations: 1,
            person_aliases: 1,
            places: 1,
            removed_versions: 0,
        }
    );

    let service = EditService::try_new(&conn).unwrap();
    let person = service
        .current_version(EntityKind::Person, 17)
        .unwrap()
        .unwrap();
    assert_eq!(person.review_state, ReviewState::Accepted);
    assert!(!person.is_touched);
    match &person.payload {
        VersionPayload::Person(payload) => {
            assert_eq!(payload.name, "Heinrich Bullinger");
            assert!(!payload.is_organization);
        }
        other => panic!("unexpected payload: {other:?}"),
    }
    let organization = service
        .current_version(EntityKind::Person, 40)
        .unwrap()
        .unwrap();
    match &organization.payload {
        VersionPayload::Person(payload) => assert!(payload.is_organization),
        other => panic!("unexpected payload: {other:?}"),
    }

    assert_eq!(
        reference_repo::link_count(&conn, MentionKind::Person, 17).unwrap(),
        Some(1)
    );
    assert_eq!(
        reference_repo::link_count(&conn, MentionKind::Person, 40).unwrap(),
        Some(1)
    );
    assert_eq!(
        reference_repo::link_count(&conn, MentionKind::Place, 2).unwrap(),
        Some(1)
    );

    let imports = log_repo::list_logs(&conn, Some(LogKind::Import), 10).unwrap();
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].detail.as_deref(), Some(fixture.seed_revision.as_str()));
}

#[test]
fn import_requires_an_administrator() {
    let fixture = seed_corpus();
    let config = SyncConfig::new(&fixture.corpus_dir);
    let mut conn = open_db_in_memory().unwrap();

    let err = import_corpus(&mut conn, &config, &reviewer()).unwrap_err();
    assert!(matches!(
        err,
        SyncError::Forbidden {
            required: Role::Administrator,
        }
    ));
}

#[test]
fn import_rejects_a_dirty_working_tree() {
    let fixture = seed_corpus();
    let config = SyncConfig::new(&fixture.corpus_dir);
    let mut conn = open_db_in_memory().unwrap();
    fs::write(fixture.corpus_dir.join("stray.txt"), "not committed").unwrap();

    let err = import_corpus(&mut conn, &config, &admin()).unwrap_err();
    assert!(matches!(
        err,
        SyncError::Precondition {
            stage: SyncStage::Import,
            ..
        }
    ));
}

#[test]
fn import_carries_alias_ids_across_epochs() {
    let fixture = seed_corpus();
    let config = SyncConfig::new(&fixture.corpus_dir);
    let mut conn = open_db_in_memory().unwrap();

    import_corpus(&mut conn, &config, &admin()).unwrap();
    let first_alias_id = {
        let store = VersionStore::try_new(&conn).unwrap();
        let aliases = store
            .list_accepted_snapshot(EntityKind::PersonAlias)
            .unwrap();
        assert_eq!(aliases.len(), 1);
        aliases[0].entity_id
    };

    let next_revision = commit_everything(&fixture.corpus_dir, "editorial pass");
    assert_ne!(next_revision, fixture.seed_revision);
    let outcome = import_corpus(&mut conn, &config, &admin()).unwrap();
    assert_eq!(outcome.epoch_id, 2);
    assert_eq!(outcome.revision, next_revision);
    // Every latest row of the outgoing epoch was untouched: 2 letters,
    // 2 persons, 1 alias, 1 place.
    assert_eq!(outcome.removed_versions, 6);

    let store = VersionStore::try_new(&conn).unwrap();
    let aliases = store
        .list_accepted_snapshot(EntityKind::PersonAlias)
        .unwrap();
    assert_eq!(aliases.len(), 1);
    assert_eq!(aliases[0].entity_id, first_alias_id);
    let alias_rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM person_aliases;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(alias_rows, 1);
}

#[test]
fn import_refuses_while_unexported_changes_exist() {
    let fixture = seed_corpus();
    let config = SyncConfig::new(&fixture.corpus_dir);
    let mut conn = open_db_in_memory().unwrap();
    import_corpus(&mut conn, &config, &admin()).unwrap();

    let service = EditService::try_new(&conn).unwrap();
    let place = service
        .current_version(EntityKind::Place, 2)
        .unwrap()
        .unwrap();
    service
        .save_name_edit(
            EntityKind::Place,
            2,
            Some(place.version_id),
            VersionPatch::Place(PlacePatch {
                name: Some("Berne".to_string()),
                ..PlacePatch::default()
            }),
            &contributor(),
            false,
        )
        .unwrap();

    let rows_before = version_row_count(&conn, "place_versions");
    let err = import_corpus(&mut conn, &config, &admin()).unwrap_err();
    assert!(matches!(
        err,
        SyncError::Precondition {
            stage: SyncStage::Import,
            ..
        }
    ));
    assert_eq!(version_row_count(&conn, "place_versions"), rows_before);
    let epochs: i64 = conn
        .query_row("SELECT COUNT(*) FROM import_epochs;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(epochs, 1);
}

#[test]
fn export_without_eligible_changes_is_a_no_op() {
    let fixture = seed_corpus();
    let config = SyncConfig::new(&fixture.corpus_dir);
    let mut conn = open_db_in_memory().unwrap();
    import_corpus(&mut conn, &config, &admin()).unwrap();

    let outcome = export_corpus(&mut conn, &config, &admin()).unwrap();
    assert_eq!(outcome.batch_id, None);
    assert_eq!(outcome.revision, None);
    assert_eq!(outcome.letters_exported, 0);
    assert!(outcome.letters_skipped.is_empty());
    assert_eq!(head_revision(&fixture.corpus_dir), fixture.seed_revision);
}

#[test]
fn export_ships_accepted_letters_and_rewrites_indexes() {
    let fixture = seed_corpus();
    let config = SyncConfig::new(&fixture.corpus_dir);
    let mut conn = open_db_in_memory().unwrap();
    import_corpus(&mut conn, &config, &admin()).unwrap();
    save_accepted_cert_edit(&conn);

    let outcome = export_corpus(&mut conn, &config, &admin()).unwrap();
    assert_eq!(outcome.batch_id, Some(1));
    assert_eq!(outcome.letters_exported, 1);
    assert_eq!(outcome.letters_removed, 0);
    assert!(outcome.letters_skipped.is_empty());
    assert_eq!(outcome.persons, 0);
    let revision = outcome.revision.clone().unwrap();

    assert_eq!(
        fs::read_to_string(fixture.corpus_dir.join("data/letters/1.xml")).unwrap(),
        LETTER_ONE_CERT
    );
    assert_eq!(
        fs::read_to_string(fixture.corpus_dir.join("data/index/persons.xml")).unwrap(),
        PERSONS_INDEX_CANONICAL
    );

    let repo = Repository::open(&fixture.corpus_dir).unwrap();
    assert_eq!(head_revision(&fixture.corpus_dir), revision);
    let branch_tip = repo
        .find_reference("refs/heads/corrections")
        .unwrap()
        .target()
        .unwrap();
    assert_eq!(branch_tip.to_string(), revision);
    let remote = Repository::open(&fixture.remote_dir).unwrap();
    let remote_tip = remote
        .find_reference("refs/heads/corrections")
        .unwrap()
        .target()
        .unwrap();
    assert_eq!(remote_tip.to_string(), revision);

    // Everything shipped; the next run has nothing left.
    let second = export_corpus(&mut conn, &config, &admin()).unwrap();
    assert_eq!(second.batch_id, None);
    assert_eq!(head_revision(&fixture.corpus_dir), revision);
}

#[test]
fn export_holds_back_letters_with_pending_references() {
    let fixture = seed_corpus();
    let config = SyncConfig::new(&fixture.corpus_dir);
    let mut conn = open_db_in_memory().unwrap();
    import_corpus(&mut conn, &config, &admin()).unwrap();
    save_accepted_cert_edit(&conn);

    let service = EditService::try_new(&conn).unwrap();
    let place = service
        .current_version(EntityKind::Place, 2)
        .unwrap()
        .unwrap();
    let pending = service
        .save_name_edit(
            EntityKind::Place,
            2,
            Some(place.version_id),
            VersionPatch::Place(PlacePatch {
                name: Some("Berne".to_string()),
                ..PlacePatch::default()
            }),
            &contributor(),
            false,
        )
        .unwrap();

    let outcome = export_corpus(&mut conn, &config, &admin()).unwrap();
    assert_eq!(outcome.batch_id, None);
    assert_eq!(outcome.letters_skipped, vec![1]);
    assert_eq!(head_revision(&fixture.corpus_dir), fixture.seed_revision);

    // Accepting the place rename unblocks the letter.
    let gate = ReviewGate::new(&conn);
    gate.accept(EntityKind::Place, pending.version_id, &reviewer())
        .unwrap();
    let second = export_corpus(&mut conn, &config, &admin()).unwrap();
    assert_eq!(second.batch_id, Some(1));
    assert_eq!(second.letters_exported, 1);
    assert_eq!(second.places, 1);
    assert!(second.letters_skipped.is_empty());
    let localities =
        fs::read_to_string(fixture.corpus_dir.join("data/index/localities.xml")).unwrap();
    assert!(localities.contains("<placeName>Berne</placeName>"));
}

#[test]
fn export_removes_deleted_letters_from_the_corpus() {
    let fixture = seed_corpus();
    let config = SyncConfig::new(&fixture.corpus_dir);
    let mut conn = open_db_in_memory().unwrap();
    import_corpus(&mut conn, &config, &admin()).unwrap();

    let service = EditService::try_new(&conn).unwrap();
    service
        .delete_entity(EntityKind::Letter, 2, &reviewer())
        .unwrap();

    let outcome = export_corpus(&mut conn, &config, &admin()).unwrap();
    assert_eq!(outcome.batch_id, Some(1));
    assert_eq!(outcome.letters_exported, 0);
    assert_eq!(outcome.letters_removed, 1);
    assert!(!fixture.corpus_dir.join("data/letters/2.xml").exists());
    assert!(fixture.corpus_dir.join("data/letters/1.xml").exists());

    let second = export_corpus(&mut conn, &config, &admin()).unwrap();
    assert_eq!(second.batch_id, None);
}

#[test]
fn export_heals_a_stranded_commit() {
    let fixture = seed_corpus();
    let config = SyncConfig::new(&fixture.corpus_dir);
    let mut conn = open_db_in_memory().unwrap();
    import_corpus(&mut conn, &config, &admin()).unwrap();
    save_accepted_cert_edit(&conn);

    // A crash after commit but before push leaves the checkout one commit
    // ahead of the recorded base with a clean working tree.
    let stranded = commit_everything(&fixture.corpus_dir, "stranded export");
    assert_ne!(stranded, fixture.seed_revision);

    let outcome = export_corpus(&mut conn, &config, &admin()).unwrap();
    let revision = outcome.revision.unwrap();
    assert_ne!(revision, stranded);

    let repo = Repository::open(&fixture.corpus_dir).unwrap();
    let head = repo.head().unwrap().peel_to_commit().unwrap();
    assert_eq!(head.id().to_string(), revision);
    // The stranded commit was rewound; the export sits on the seed commit.
    assert_eq!(
        head.parent_id(0).unwrap().to_string(),
        fixture.seed_revision
    );
}

#[test]
fn export_rejects_a_checkout_on_foreign_commits() {
    let fixture = seed_corpus();
    let config = SyncConfig::new(&fixture.corpus_dir);
    let mut conn = open_db_in_memory().unwrap();
    import_corpus(&mut conn, &config, &admin()).unwrap();
    save_accepted_cert_edit(&conn);

    commit_everything(&fixture.corpus_dir, "foreign work");
    let foreign_head = commit_everything(&fixture.corpus_dir, "more foreign work");

    let err = export_corpus(&mut conn, &config, &admin()).unwrap_err();
    assert!(matches!(
        err,
        SyncError::Precondition {
            stage: SyncStage::Export,
            ..
        }
    ));
    assert_eq!(head_revision(&fixture.corpus_dir), foreign_head);
}

fn admin() -> Actor {
    Actor::new(Uuid::new_v4(), "Admin", [Role::Administrator])
}

fn reviewer() -> Actor {
    Actor::new(Uuid::new_v4(), "Regula", [Role::Reviewer])
}

fn contributor() -> Actor {
    Actor::new(Uuid::new_v4(), "Vera", [Role::Contributor])
}

struct CorpusFixture {
    _tmp: TempDir,
    corpus_dir: PathBuf,
    remote_dir: PathBuf,
    seed_revision: String,
}

/// Builds a corpus checkout with two letters, one person with an alias,
/// one organization and one place, plus a bare `origin` to push to.
fn seed_corpus() -> CorpusFixture {
    let tmp = tempfile::tempdir().unwrap();
    let remote_dir = tmp.path().join("remote.git");
    Repository::init_bare(&remote_dir).unwrap();

    let corpus_dir = tmp.path().join("corpus");
    let repo = Repository::init(&corpus_dir).unwrap();
    write_seed_files(&corpus_dir);
    let seed_revision = commit_everything(&corpus_dir, "seed corpus");
    repo.remote("origin", remote_dir.to_str().unwrap()).unwrap();

    CorpusFixture {
        _tmp: tmp,
        corpus_dir,
        remote_dir,
        seed_revision,
    }
}

fn write_seed_files(corpus_dir: &Path) {
    fs::create_dir_all(corpus_dir.join("data/index")).unwrap();
    fs::create_dir_all(corpus_dir.join("data/letters")).unwrap();
    fs::write(corpus_dir.join("data/index/persons.xml"), PERSONS_XML).unwrap();
    fs::write(
        corpus_dir.join("data/index/organizations.xml"),
        ORGANIZATIONS_XML,
    )
    .unwrap();
    fs::write(corpus_dir.join("data/index/localities.xml"), LOCALITIES_XML).unwrap();
    fs::write(corpus_dir.join("data/letters/1.xml"), LETTER_ONE).unwrap();
    fs::write(corpus_dir.join("data/letters/2.xml"), LETTER_TWO).unwrap();
}

/// Stages and commits the whole working tree on HEAD, allowing empty
/// commits, and returns the new commit hash.
fn commit_everything(repo_dir: &Path, message: &str) -> String {
    let repo = Repository::open(repo_dir).unwrap();
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"], IndexAddOption::DEFAULT, None)
        .unwrap();
    index.update_all(["*"], None).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let signature = Signature::now("fixture", "fixture@test.invalid").unwrap();
    let commit_id = match repo.head() {
        Ok(head) => {
            let parent = head.peel_to_commit().unwrap();
            repo.commit(
                Some("HEAD"),
                &signature,
                &signature,
                message,
                &tree,
                &[&parent],
            )
            .unwrap()
        }
        Err(_) => repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &[])
            .unwrap(),
    };
    commit_id.to_string()
}

fn head_revision(repo_dir: &Path) -> String {
    let repo = Repository::open(repo_dir).unwrap();
    let revision = repo
        .head()
        .unwrap()
        .peel_to_commit()
        .unwrap()
        .id()
        .to_string();
    revision
}

/// Reviewer marks the place reference in letter 1 as certain and the save
/// auto-accepts.
fn save_accepted_cert_edit(conn: &Connection) {
    let service = EditService::try_new(conn).unwrap();
    let current = service
        .current_version(EntityKind::Letter, 1)
        .unwrap()
        .unwrap();
    let request = SaveLetterRequest {
        letter_id: 1,
        parent_version_id: Some(current.version_id),
        document: LETTER_ONE_CERT.to_string(),
        actions: vec![Action::ChangeAttributes {
            target: NodePath::from_pairs([(0, "letter"), (0, "p"), (1, "placeName")]),
            attributes: BTreeMap::from([("cert".to_string(), Some("high".to_string()))]),
        }],
        auto_accept: true,
    };
    let saved = service.save_letter(&request, &reviewer()).unwrap();
    assert_eq!(saved.review_state, ReviewState::Accepted);
}

fn version_row_count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}
