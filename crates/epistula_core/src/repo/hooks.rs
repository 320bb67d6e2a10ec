//! Post-save hooks run inside the saving transaction.

use crate::document::mentions::extract_mentions;
use crate::document::tree::XmlTree;
use crate::model::entity::VersionPayload;
use crate::repo::{reference_repo, StoreError, StoreResult};
use rusqlite::Connection;

/// Runs derived-data maintenance after a version row was inserted.
///
/// Letters get their reference rows and the affected link counts rebuilt
/// from the freshly saved document. Other kinds have no derived data.
pub fn run_after_save(
    conn: &Connection,
    entity_id: i64,
    payload: &VersionPayload,
) -> StoreResult<()> {
    match payload {
        VersionPayload::Letter(letter) => {
            let tree = XmlTree::parse(&letter.document).map_err(|err| {
                StoreError::InvalidData(format!(
                    "letter {entity_id} document failed to parse: {err}"
                ))
            })?;
            let mentions = extract_mentions(&tree);
            reference_repo::replace_letter_references(conn, entity_id, &mentions)
        }
        VersionPayload::Person(_)
        | VersionPayload::PersonAlias(_)
        | VersionPayload::Place(_) => Ok(()),
    }
}
