use epistula_core::db::open_db_in_memory;
use epistula_core::document::mentions::extract_mentions;
use epistula_core::document::tree::XmlTree;
use epistula_core::model::actor::{Actor, Role};
use epistula_core::model::audit::LogKind;
use epistula_core::model::entity::{
    EntityKind, LetterPatch, LetterPayload, PersonPatch, PersonPayload, ReviewState, VersionPatch,
    VersionPayload,
};
use epistula_core::repo::version_repo::VersionStore;
use epistula_core::repo::{log_repo, reference_repo, StoreError};
use rusqlite::{Connection, TransactionBehavior};
use uuid::Uuid;

const LETTER_DOC: &str =
    "<letter><p>Heinrich schrieb aus <placeName ref=\"l2\">Bern</placeName>.</p></letter>\n";
const LETTER_DOC_EDITED: &str =
    "<letter><p>Heinrich schrieb aus <placeName cert=\"high\" ref=\"l2\">Bern</placeName>.</p></letter>\n";

#[test]
fn imported_rows_are_accepted_untouched_and_latest() {
    let mut conn = open_db_in_memory().unwrap();
    seed_epoch(&mut conn, "rev-a");

    let store = VersionStore::try_new(&conn).unwrap();
    let current = store
        .get_current_version(EntityKind::Person, 17, None)
        .unwrap()
        .unwrap();
    assert!(current.is_latest);
    assert!(!current.is_touched);
    assert!(!current.is_new);
    assert_eq!(current.review_state, ReviewState::Accepted);
    match current.payload {
        VersionPayload::Person(payload) => assert_eq!(payload.name, "Heinrich Bullinger"),
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[test]
fn contributor_edit_appends_pending_version() {
    let mut conn = open_db_in_memory().unwrap();
    seed_epoch(&mut conn, "rev-a");

    let store = VersionStore::try_new(&conn).unwrap();
    let imported = store
        .get_current_version(EntityKind::Person, 17, None)
        .unwrap()
        .unwrap();
    let edited = store
        .create_new_version(
            EntityKind::Person,
            17,
            Some(imported.version_id),
            person_name_patch("Heinrich Bullinger d. J."),
            &contributor(),
            false,
        )
        .unwrap();

    assert!(edited.is_latest);
    assert!(edited.is_touched);
    assert_eq!(edited.review_state, ReviewState::Pending);

    let history = store.list_versions(EntityKind::Person, 17).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].version_id, imported.version_id);
    assert!(!history[0].is_latest);
    assert_eq!(history[1].version_id, edited.version_id);
}

#[test]
fn stale_parent_is_rejected_with_conflict() {
    let mut conn = open_db_in_memory().unwrap();
    seed_epoch(&mut conn, "rev-a");

    let store = VersionStore::try_new(&conn).unwrap();
    let imported = store
        .get_current_version(EntityKind::Person, 17, None)
        .unwrap()
        .unwrap();
    let edited = store
        .create_new_version(
            EntityKind::Person,
            17,
            Some(imported.version_id),
            person_name_patch("Heinrich Bullinger d. J."),
            &contributor(),
            false,
        )
        .unwrap();

    let err = store
        .create_new_version(
            EntityKind::Person,
            17,
            Some(imported.version_id),
            person_name_patch("Heinrich Bullinger d. A."),
            &contributor(),
            false,
        )
        .unwrap_err();
    match err {
        StoreError::Conflict {
            kind,
            entity_id,
            expected_version_id,
            actual_version_id,
        } => {
            assert_eq!(kind, EntityKind::Person);
            assert_eq!(entity_id, 17);
            assert_eq!(expected_version_id, Some(imported.version_id));
            assert_eq!(actual_version_id, Some(edited.version_id));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.list_versions(EntityKind::Person, 17).unwrap().len(), 2);
}

#[test]
fn reads_with_an_expected_version_detect_staleness() {
    let mut conn = open_db_in_memory().unwrap();
    seed_epoch(&mut conn, "rev-a");

    let store = VersionStore::try_new(&conn).unwrap();
    let imported = store
        .get_current_version(EntityKind::Person, 17, None)
        .unwrap()
        .unwrap();
    let edited = store
        .create_new_version(
            EntityKind::Person,
            17,
            Some(imported.version_id),
            person_name_patch("Heinrich Bullinger d. J."),
            &contributor(),
            false,
        )
        .unwrap();

    let fresh = store
        .get_current_version(EntityKind::Person, 17, Some(edited.version_id))
        .unwrap()
        .unwrap();
    assert_eq!(fresh.version_id, edited.version_id);

    let err = store
        .get_current_version(EntityKind::Person, 17, Some(imported.version_id))
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::Conflict {
            kind: EntityKind::Person,
            entity_id: 17,
            ..
        }
    ));
}

#[test]
fn missing_entity_is_not_found() {
    let mut conn = open_db_in_memory().unwrap();
    seed_epoch(&mut conn, "rev-a");

    let store = VersionStore::try_new(&conn).unwrap();
    let err = store
        .create_new_version(
            EntityKind::Person,
            99,
            None,
            person_name_patch("Nobody"),
            &contributor(),
            false,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::NotFound {
            kind: EntityKind::Person,
            entity_id: 99,
        }
    ));
}

#[test]
fn history_spans_epochs_but_currency_does_not() {
    let mut conn = open_db_in_memory().unwrap();
    seed_epoch(&mut conn, "rev-a");

    {
        let store = VersionStore::try_new(&conn).unwrap();
        let imported = store
            .get_current_version(EntityKind::Person, 17, None)
            .unwrap()
            .unwrap();
        store
            .create_new_version(
                EntityKind::Person,
                17,
                Some(imported.version_id),
                person_name_patch("Heinrich Bullinger d. J."),
                &contributor(),
                false,
            )
            .unwrap();
    }
    seed_epoch(&mut conn, "rev-b");

    let store = VersionStore::try_new(&conn).unwrap();
    let current = store
        .get_current_version(EntityKind::Person, 17, None)
        .unwrap()
        .unwrap();
    assert!(!current.is_touched);
    assert_eq!(current.review_state, ReviewState::Accepted);
    match current.payload {
        VersionPayload::Person(payload) => assert_eq!(payload.name, "Heinrich Bullinger"),
        other => panic!("unexpected payload: {other:?}"),
    }

    let history = store.list_versions(EntityKind::Person, 17).unwrap();
    assert_eq!(history.len(), 3);
    assert!(history
        .windows(2)
        .all(|pair| pair[0].version_id < pair[1].version_id));
}

#[test]
fn new_entities_get_ids_above_the_imported_range() {
    let mut conn = open_db_in_memory().unwrap();
    seed_epoch(&mut conn, "rev-a");

    let store = VersionStore::try_new(&conn).unwrap();
    let created = store
        .create_entity(
            VersionPatch::Person(PersonPatch {
                name: Some("Anna Maria".to_string()),
                ..PersonPatch::default()
            }),
            &contributor(),
            false,
        )
        .unwrap();

    assert_eq!(created.entity_id, 18);
    assert!(created.is_new);
    assert!(created.is_touched);
    assert_eq!(created.review_state, ReviewState::Pending);
}

#[test]
fn soft_delete_is_idempotent_and_scrubs_references() {
    let mut conn = open_db_in_memory().unwrap();
    seed_epoch(&mut conn, "rev-a");

    let store = VersionStore::try_new(&conn).unwrap();
    assert_eq!(
        reference_repo::list_letter_references(&conn, 1).unwrap().len(),
        1
    );

    let current = store
        .get_current_version(EntityKind::Letter, 1, None)
        .unwrap()
        .unwrap();
    assert!(store
        .soft_delete_version(EntityKind::Letter, current.version_id, &reviewer())
        .unwrap());
    assert!(!store
        .soft_delete_version(EntityKind::Letter, current.version_id, &reviewer())
        .unwrap());

    let deleted = store
        .get_current_version(EntityKind::Letter, 1, None)
        .unwrap()
        .unwrap();
    assert!(deleted.is_deleted());
    assert!(reference_repo::list_letter_references(&conn, 1)
        .unwrap()
        .is_empty());
}

#[test]
fn count_uncommitted_changes_counts_latest_edits_once() {
    let mut conn = open_db_in_memory().unwrap();
    seed_epoch(&mut conn, "rev-a");

    let store = VersionStore::try_new(&conn).unwrap();
    assert_eq!(store.count_uncommitted_changes().unwrap(), 0);

    let current = store
        .get_current_version(EntityKind::Letter, 1, None)
        .unwrap()
        .unwrap();
    let edited = store
        .create_new_version(
            EntityKind::Letter,
            1,
            Some(current.version_id),
            letter_document_patch(LETTER_DOC_EDITED),
            &contributor(),
            false,
        )
        .unwrap();
    assert_eq!(store.count_uncommitted_changes().unwrap(), 1);

    store
        .create_new_version(
            EntityKind::Letter,
            1,
            Some(edited.version_id),
            letter_document_patch(LETTER_DOC),
            &contributor(),
            false,
        )
        .unwrap();
    assert_eq!(store.count_uncommitted_changes().unwrap(), 1);
}

#[test]
fn bulk_apis_require_an_open_transaction() {
    let mut conn = open_db_in_memory().unwrap();
    seed_epoch(&mut conn, "rev-a");

    let store = VersionStore::try_new(&conn).unwrap();
    let err = store.begin_epoch("rev-b", 1).unwrap_err();
    assert!(matches!(err, StoreError::OutsideTransaction));

    let err = store
        .import_versioned(
            5,
            &VersionPayload::Letter(LetterPayload {
                document: LETTER_DOC.to_string(),
                actions: Vec::new(),
            }),
            1,
            1,
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::OutsideTransaction));
}

#[test]
fn store_rejects_uninitialized_connection() {
    let conn = Connection::open_in_memory().unwrap();

    match VersionStore::try_new(&conn) {
        Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version: 0,
        }) => assert!(expected_version > 0),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected uninitialized connection error"),
    }
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

fn person_name_patch(name: &str) -> VersionPatch {
    VersionPatch::Person(PersonPatch {
        name: Some(name.to_string()),
        ..PersonPatch::default()
    })
}

fn letter_document_patch(document: &str) -> VersionPatch {
    VersionPatch::Letter(LetterPatch {
        document: Some(document.to_string()),
        actions: None,
    })
}

/// Imports person 17 and letter 1 under a fresh epoch, the way the corpus
/// import pipeline would.
fn seed_epoch(conn: &mut Connection, revision: &str) -> i64 {
    let admin = admin();
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Exclusive)
        .unwrap();
    let store = VersionStore::try_new(&tx).unwrap();
    let log_id = log_repo::append_log(&tx, LogKind::Import, &admin, Some(revision)).unwrap();
    let epoch = store.begin_epoch(revision, log_id).unwrap();
    store
        .import_versioned(
            17,
            &VersionPayload::Person(PersonPayload {
                name: "Heinrich Bullinger".to_string(),
                forename: Some("Heinrich".to_string()),
                surname: Some("Bullinger".to_string()),
                gnd: None,
                is_organization: false,
            }),
            epoch.epoch_id,
            log_id,
        )
        .unwrap();
    store
        .import_versioned(
            1,
            &VersionPayload::Letter(LetterPayload {
                document: LETTER_DOC.to_string(),
                actions: Vec::new(),
            }),
            epoch.epoch_id,
            log_id,
        )
        .unwrap();
    let tree = XmlTree::parse(LETTER_DOC).unwrap();
    reference_repo::replace_letter_references(&tx, 1, &extract_mentions(&tree)).unwrap();
    tx.commit().unwrap();
    epoch.epoch_id
}
