//! Save and delete entry points for volunteer edits.
//!
//! # Responsibility
//! - Verify letter submissions byte-for-byte by replaying their action
//!   lists against the parent document.
//! - Route every write through the version store's optimistic concurrency
//!   and the review gate's auto-accept policy.
//!
//! # Invariants
//! - A letter version is only persisted when replaying its actions on the
//!   parent document reproduces the submitted document exactly.
//! - Auto-accept silently degrades to a pending save; it never fails a
//!   request on its own.

use crate::document::action::{replay_tree, Action, ReplayError};
use crate::document::mentions::extract_mentions;
use crate::document::tree::{ParseError, XmlTree};
use crate::model::actor::{Actor, Role};
use crate::model::entity::{EntityKind, EntityVersion, LetterPatch, VersionPatch, VersionPayload};
use crate::repo::version_repo::VersionStore;
use crate::repo::{StoreError, StoreResult};
use crate::review::gate::{ReviewError, ReviewGate};
use log::warn;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors from edit service operations.
#[derive(Debug)]
pub enum ServiceError {
    /// Underlying store error.
    Store(StoreError),
    /// Review gate error.
    Review(ReviewError),
    /// Submitted document does not parse.
    Document(ParseError),
    /// Submitted action list does not replay on the parent document.
    Replay(ReplayError),
    /// Replay succeeded but produced different bytes than submitted.
    ReplayMismatch { letter_id: i64 },
    /// Actor lacks the role required for the operation.
    Forbidden { required: Role },
    /// Operation does not apply to this entity kind.
    UnsupportedKind { kind: EntityKind },
    /// Target entity is deleted; edits would resurrect it unseen.
    Deleted { kind: EntityKind, entity_id: i64 },
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Review(err) => write!(f, "{err}"),
            Self::Document(err) => write!(f, "{err}"),
            Self::Replay(err) => write!(f, "{err}"),
            Self::ReplayMismatch { letter_id } => write!(
                f,
                "replaying the actions of letter {letter_id} does not reproduce the submitted document"
            ),
            Self::Forbidden { required } => {
                write!(f, "operation requires the {} role", required.as_str())
            }
            Self::UnsupportedKind { kind } => {
                write!(f, "operation does not apply to {kind} entities")
            }
            Self::Deleted { kind, entity_id } => {
                write!(f, "{kind} {entity_id} is deleted")
            }
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Review(err) => Some(err),
            Self::Document(err) => Some(err),
            Self::Replay(err) => Some(err),
            Self::ReplayMismatch { .. } => None,
            Self::Forbidden { .. } => None,
            Self::UnsupportedKind { .. } => None,
            Self::Deleted { .. } => None,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<ReviewError> for ServiceError {
    fn from(value: ReviewError) -> Self {
        Self::Review(value)
    }
}

/// One letter save submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveLetterRequest {
    pub letter_id: i64,
    /// Version the client loaded before editing.
    pub parent_version_id: Option<i64>,
    /// Edited document in canonical form, as the client rendered it.
    pub document: String,
    /// Actions that derived `document` from the parent version.
    pub actions: Vec<Action>,
    /// Ask to skip review. Honored only for reviewers whose referenced
    /// entities are all accepted.
    pub auto_accept: bool,
}

/// Edit entry points over a migrated connection.
pub struct EditService<'conn> {
    conn: &'conn Connection,
    store: VersionStore<'conn>,
}

impl<'conn> EditService<'conn> {
    /// Creates the service from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        let store = VersionStore::try_new(conn)?;
        Ok(Self { conn, store })
    }

    /// Saves a new letter version.
    ///
    /// # Contract
    /// - Replays `request.actions` on the parent version's document and
    ///   compares the result byte-for-byte with `request.document`; any
    ///   difference rejects the save before persistence.
    /// - Fails with `Conflict` when the parent version is no longer the
    ///   latest in the current epoch.
    pub fn save_letter(
        &self,
        request: &SaveLetterRequest,
        actor: &Actor,
    ) -> ServiceResult<EntityVersion> {
        let current = self
            .store
            .get_current_version(EntityKind::Letter, request.letter_id, None)?;
        let Some(current) = current else {
            return Err(ServiceError::Store(StoreError::NotFound {
                kind: EntityKind::Letter,
                entity_id: request.letter_id,
            }));
        };
        if current.is_deleted() {
            return Err(ServiceError::Deleted {
                kind: EntityKind::Letter,
                entity_id: request.letter_id,
            });
        }
        if request.parent_version_id != Some(current.version_id) {
            return Err(ServiceError::Store(StoreError::Conflict {
                kind: EntityKind::Letter,
                entity_id: request.letter_id,
                expected_version_id: request.parent_version_id,
                actual_version_id: Some(current.version_id),
            }));
        }

        let base_document = match &current.payload {
            VersionPayload::Letter(payload) => payload.document.as_str(),
            _ => {
                return Err(ServiceError::Store(StoreError::InvalidData(format!(
                    "letter {} version carries a non-letter payload",
                    request.letter_id
                ))))
            }
        };

        let tree = replay_tree(base_document, &request.actions).map_err(ServiceError::Replay)?;
        let replayed = tree.serialize();
        if replayed != request.document {
            warn!(
                "event=letter_save module=service status=error error_code=replay_mismatch letter_id={} parent_version_id={}",
                request.letter_id, current.version_id,
            );
            return Err(ServiceError::ReplayMismatch {
                letter_id: request.letter_id,
            });
        }

        let mentions = extract_mentions(&tree);
        let gate = ReviewGate::new(self.conn);
        let auto_accept = gate.resolve_auto_accept(actor, request.auto_accept, &mentions)?;

        let patch = VersionPatch::Letter(LetterPatch {
            document: Some(replayed),
            actions: Some(request.actions.clone()),
        });
        let version = self.store.create_new_version(
            EntityKind::Letter,
            request.letter_id,
            request.parent_version_id,
            patch,
            actor,
            auto_accept,
        )?;
        Ok(version)
    }

    /// Saves a new version of a person, person alias or place.
    pub fn save_name_edit(
        &self,
        kind: EntityKind,
        entity_id: i64,
        parent_version_id: Option<i64>,
        patch: VersionPatch,
        actor: &Actor,
        auto_accept: bool,
    ) -> ServiceResult<EntityVersion> {
        if kind == EntityKind::Letter {
            return Err(ServiceError::UnsupportedKind { kind });
        }
        if let Some(current) = self.store.get_current_version(kind, entity_id, None)? {
            if current.is_deleted() {
                return Err(ServiceError::Deleted { kind, entity_id });
            }
        }
        let gate = ReviewGate::new(self.conn);
        let auto_accept = gate.resolve_auto_accept(actor, auto_accept, &[])?;
        let version = self.store.create_new_version(
            kind,
            entity_id,
            parent_version_id,
            patch,
            actor,
            auto_accept,
        )?;
        Ok(version)
    }

    /// Creates a brand-new entity with its first version. Letter documents
    /// are parsed and stored in canonical form.
    pub fn create_entity(
        &self,
        patch: VersionPatch,
        actor: &Actor,
        auto_accept: bool,
    ) -> ServiceResult<EntityVersion> {
        let gate = ReviewGate::new(self.conn);
        let (patch, mentions) = match patch {
            VersionPatch::Letter(letter) => match letter.document {
                Some(document) => {
                    let tree = XmlTree::parse(&document).map_err(ServiceError::Document)?;
                    let mentions = extract_mentions(&tree);
                    let patch = VersionPatch::Letter(LetterPatch {
                        document: Some(tree.serialize()),
                        actions: letter.actions,
                    });
                    (patch, mentions)
                }
                // Missing document falls through to the merge layer's
                // missing-field error.
                None => (
                    VersionPatch::Letter(LetterPatch {
                        document: None,
                        actions: letter.actions,
                    }),
                    Vec::new(),
                ),
            },
            other => (other, Vec::new()),
        };
        let auto_accept = gate.resolve_auto_accept(actor, auto_accept, &mentions)?;
        let version = self.store.create_entity(patch, actor, auto_accept)?;
        Ok(version)
    }

    /// Soft-deletes the current version of an entity. Reviewer-only;
    /// deletion takes effect without a second review pass.
    pub fn delete_entity(
        &self,
        kind: EntityKind,
        entity_id: i64,
        actor: &Actor,
    ) -> ServiceResult<EntityVersion> {
        if !actor.can_review() {
            return Err(ServiceError::Forbidden {
                required: Role::Reviewer,
            });
        }
        let current = self
            .store
            .get_current_version(kind, entity_id, None)?
            .ok_or(StoreError::NotFound { kind, entity_id })?;
        self.store
            .soft_delete_version(kind, current.version_id, actor)?;
        let version = self
            .store
            .get_version(kind, current.version_id)?
            .ok_or(StoreError::VersionNotFound {
                kind,
                version_id: current.version_id,
            })?;
        Ok(version)
    }

    /// Latest version of one entity in the current epoch.
    pub fn current_version(
        &self,
        kind: EntityKind,
        entity_id: i64,
    ) -> ServiceResult<Option<EntityVersion>> {
        Ok(self.store.get_current_version(kind, entity_id, None)?)
    }

    /// Full version history of one entity, oldest first.
    pub fn history(&self, kind: EntityKind, entity_id: i64) -> ServiceResult<Vec<EntityVersion>> {
        Ok(self.store.list_versions(kind, entity_id)?)
    }

    /// Review queue of one kind.
    pub fn pending(&self, kind: EntityKind) -> ServiceResult<Vec<EntityVersion>> {
        Ok(self.store.list_pending(kind)?)
    }
}
