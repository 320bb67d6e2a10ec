//! Versioned entity read models, payloads and typed patches.
//!
//! # Responsibility
//! - Define the version-row shape shared by letters, persons, aliases and
//!   places.
//! - Merge typed patches onto base payloads when a new version is created.
//!
//! # Invariants
//! - A patch applies to exactly one entity kind; kind mismatches are errors,
//!   not coercions.
//! - Merging never mutates the base payload.

use crate::document::action::Action;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Closed set of correctable entity kinds.
///
/// Organizations are stored as persons with `is_organization` set, so the
/// kind set stays closed even though the corpus ships a separate index file
/// for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// One TEI letter document.
    Letter,
    /// One person or organization from the corpus indexes.
    Person,
    /// One alternate spelling of a person name.
    PersonAlias,
    /// One locality from the corpus index.
    Place,
}

impl EntityKind {
    /// All kinds, in bulk-processing order: persons come first so alias
    /// rows can reference them under `foreign_keys=ON`.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Person,
        EntityKind::PersonAlias,
        EntityKind::Place,
        EntityKind::Letter,
    ];

    /// Stable lowercase name used in lock rows, logs and errors.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Letter => "letter",
            Self::Person => "person",
            Self::PersonAlias => "person_alias",
            Self::Place => "place",
        }
    }

    /// Parses a stored kind name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "letter" => Some(Self::Letter),
            "person" => Some(Self::Person),
            "person_alias" => Some(Self::PersonAlias),
            "place" => Some(Self::Place),
            _ => None,
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review lifecycle state of one version row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    /// Awaiting a reviewer decision. Not exportable.
    Pending,
    /// Approved for export.
    Accepted,
    /// Refused; superseded by its predecessor where one exists.
    Rejected,
}

impl ReviewState {
    /// Stable name stored in `review_state` columns.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    /// Parses a stored state name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl Display for ReviewState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Letter version content: the canonical document plus the action list that
/// derived it from its parent version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LetterPayload {
    /// Stably-formatted TEI document text.
    pub document: String,
    /// Edits replayed against the parent document. Empty for imported rows.
    pub actions: Vec<Action>,
}

/// Person (or organization) version content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonPayload {
    /// Canonical display name.
    pub name: String,
    pub forename: Option<String>,
    pub surname: Option<String>,
    /// GND authority identifier, when known.
    pub gnd: Option<String>,
    /// Organizations share the person id space and reference element.
    pub is_organization: bool,
}

/// Alternate person name version content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonAliasPayload {
    /// Owning person entity id.
    pub person_id: i64,
    pub name: String,
}

/// Place version content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacePayload {
    pub name: String,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Full content of one version row, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VersionPayload {
    Letter(LetterPayload),
    Person(PersonPayload),
    PersonAlias(PersonAliasPayload),
    Place(PlacePayload),
}

impl VersionPayload {
    /// Returns the entity kind this payload belongs to.
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Letter(_) => EntityKind::Letter,
            Self::Person(_) => EntityKind::Person,
            Self::PersonAlias(_) => EntityKind::PersonAlias,
            Self::Place(_) => EntityKind::Place,
        }
    }
}

/// Letter patch. `None` keeps the base value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LetterPatch {
    pub document: Option<String>,
    /// Action list deriving the new document. Defaults to empty, not to the
    /// parent's list: actions describe one version's own derivation.
    pub actions: Option<Vec<Action>>,
}

/// Person patch. For nullable columns the outer `Option` distinguishes
/// "keep" (`None`) from "set or clear" (`Some(..)`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonPatch {
    pub name: Option<String>,
    pub forename: Option<Option<String>>,
    pub surname: Option<Option<String>>,
    pub gnd: Option<Option<String>>,
    pub is_organization: Option<bool>,
}

/// Person alias patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonAliasPatch {
    pub person_id: Option<i64>,
    pub name: Option<String>,
}

/// Place patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlacePatch {
    pub name: Option<String>,
    pub country: Option<Option<String>>,
    pub latitude: Option<Option<f64>>,
    pub longitude: Option<Option<f64>>,
}

/// Typed patch for one entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VersionPatch {
    Letter(LetterPatch),
    Person(PersonPatch),
    PersonAlias(PersonAliasPatch),
    Place(PlacePatch),
}

impl VersionPatch {
    /// Returns the entity kind this patch applies to.
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Letter(_) => EntityKind::Letter,
            Self::Person(_) => EntityKind::Person,
            Self::PersonAlias(_) => EntityKind::PersonAlias,
            Self::Place(_) => EntityKind::Place,
        }
    }
}

/// Patch merge failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    /// Patch kind does not match the base payload or requested kind.
    KindMismatch {
        expected: EntityKind,
        found: EntityKind,
    },
    /// First version of an entity must provide this field.
    MissingField {
        kind: EntityKind,
        field: &'static str,
    },
}

impl Display for MergeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KindMismatch { expected, found } => {
                write!(f, "patch kind `{found}` does not match `{expected}`")
            }
            Self::MissingField { kind, field } => {
                write!(f, "first {kind} version requires field `{field}`")
            }
        }
    }
}

impl Error for MergeError {}

/// Merges a typed patch onto an optional base payload.
///
/// With a base, unset patch fields keep the base value. Without a base the
/// patch must provide every required field.
pub fn merge_patch(
    base: Option<&VersionPayload>,
    patch: VersionPatch,
) -> Result<VersionPayload, MergeError> {
    match patch {
        VersionPatch::Letter(patch) => {
            let base = base_as_letter(base)?;
            let document = match (patch.document, base) {
                (Some(document), _) => document,
                (None, Some(base)) => base.document.clone(),
                (None, None) => {
                    return Err(MergeError::MissingField {
                        kind: EntityKind::Letter,
                        field: "document",
                    })
                }
            };
            Ok(VersionPayload::Letter(LetterPayload {
                document,
                actions: patch.actions.unwrap_or_default(),
            }))
        }
        VersionPatch::Person(patch) => {
            let base = base_as_person(base)?;
            let name = match (patch.name, base) {
                (Some(name), _) => name,
                (None, Some(base)) => base.name.clone(),
                (None, None) => {
                    return Err(MergeError::MissingField {
                        kind: EntityKind::Person,
                        field: "name",
                    })
                }
            };
            Ok(VersionPayload::Person(PersonPayload {
                name,
                forename: keep_or_set(patch.forename, base.map(|b| b.forename.clone())),
                surname: keep_or_set(patch.surname, base.map(|b| b.surname.clone())),
                gnd: keep_or_set(patch.gnd, base.map(|b| b.gnd.clone())),
                is_organization: patch
                    .is_organization
                    .unwrap_or_else(|| base.map(|b| b.is_organization).unwrap_or(false)),
            }))
        }
        VersionPatch::PersonAlias(patch) => {
            let base = base_as_person_alias(base)?;
            let person_id = match (patch.person_id, base) {
                (Some(person_id), _) => person_id,
                (None, Some(base)) => base.person_id,
                (None, None) => {
                    return Err(MergeError::MissingField {
                        kind: EntityKind::PersonAlias,
                        field: "person_id",
                    })
                }
            };
            let name = match (patch.name, base) {
                (Some(name), _) => name,
                (None, Some(base)) => base.name.clone(),
                (None, None) => {
                    return Err(MergeError::MissingField {
                        kind: EntityKind::PersonAlias,
                        field: "name",
                    })
                }
            };
            Ok(VersionPayload::PersonAlias(PersonAliasPayload {
                person_id,
                name,
            }))
        }
        VersionPatch::Place(patch) => {
            let base = base_as_place(base)?;
            let name = match (patch.name, base) {
                (Some(name), _) => name,
                (None, Some(base)) => base.name.clone(),
                (None, None) => {
                    return Err(MergeError::MissingField {
                        kind: EntityKind::Place,
                        field: "name",
                    })
                }
            };
            Ok(VersionPayload::Place(PlacePayload {
                name,
                country: keep_or_set(patch.country, base.map(|b| b.country.clone())),
                latitude: keep_or_set(patch.latitude, base.map(|b| b.latitude)),
                longitude: keep_or_set(patch.longitude, base.map(|b| b.longitude)),
            }))
        }
    }
}

fn keep_or_set<T>(patch_field: Option<Option<T>>, base_field: Option<Option<T>>) -> Option<T> {
    match patch_field {
        Some(value) => value,
        None => base_field.flatten(),
    }
}

fn base_as_letter(base: Option<&VersionPayload>) -> Result<Option<&LetterPayload>, MergeError> {
    match base {
        None => Ok(None),
        Some(VersionPayload::Letter(payload)) => Ok(Some(payload)),
        Some(other) => Err(MergeError::KindMismatch {
            expected: other.kind(),
            found: EntityKind::Letter,
        }),
    }
}

fn base_as_person(base: Option<&VersionPayload>) -> Result<Option<&PersonPayload>, MergeError> {
    match base {
        None => Ok(None),
        Some(VersionPayload::Person(payload)) => Ok(Some(payload)),
        Some(other) => Err(MergeError::KindMismatch {
            expected: other.kind(),
            found: EntityKind::Person,
        }),
    }
}

fn base_as_person_alias(
    base: Option<&VersionPayload>,
) -> Result<Option<&PersonAliasPayload>, MergeError> {
    match base {
        None => Ok(None),
        Some(VersionPayload::PersonAlias(payload)) => Ok(Some(payload)),
        Some(other) => Err(MergeError::KindMismatch {
            expected: other.kind(),
            found: EntityKind::PersonAlias,
        }),
    }
}

fn base_as_place(base: Option<&VersionPayload>) -> Result<Option<&PlacePayload>, MergeError> {
    match base {
        None => Ok(None),
        Some(VersionPayload::Place(payload)) => Ok(Some(payload)),
        Some(other) => Err(MergeError::KindMismatch {
            expected: other.kind(),
            found: EntityKind::Place,
        }),
    }
}

/// One persisted version row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityVersion {
    /// Monotonic version row id, unique within one entity kind.
    pub version_id: i64,
    /// Owning entity id.
    pub entity_id: i64,
    /// Head marker within (entity, import epoch).
    pub is_latest: bool,
    /// Set on citizen edits, clear on imported rows.
    pub is_touched: bool,
    /// Set when the entity was first created inside the store rather than
    /// imported from the corpus.
    pub is_new: bool,
    pub review_state: ReviewState,
    /// Import epoch this row belongs to.
    pub import_epoch_id: i64,
    /// Export batch that shipped this row, once exported.
    pub export_batch_id: Option<i64>,
    /// Log row recording the creating operation.
    pub created_log_id: i64,
    /// Log row recording the review decision, if any.
    pub reviewed_log_id: Option<i64>,
    /// Log row recording deletion; `Some` marks this row as a tombstone.
    pub deleted_log_id: Option<i64>,
    pub payload: VersionPayload,
}

impl EntityVersion {
    /// Returns the entity kind of this row.
    pub fn kind(&self) -> EntityKind {
        self.payload.kind()
    }

    /// Returns whether this row is a deletion tombstone.
    pub fn is_deleted(&self) -> bool {
        self.deleted_log_id.is_some()
    }
}

/// One import epoch row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEpoch {
    pub epoch_id: i64,
    /// Corpus commit hash this epoch was imported from.
    pub revision: String,
    pub is_current: bool,
    pub created_log_id: i64,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}
