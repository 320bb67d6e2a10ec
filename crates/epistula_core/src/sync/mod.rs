//! Corpus synchronization pipeline.
//!
//! # Responsibility
//! - Import a checked-out corpus revision into a fresh epoch.
//! - Export accepted corrections back into the corpus working tree and
//!   push them to the integration branch.
//!
//! # Invariants
//! - Import and export run as administrators only, one at a time, inside
//!   one exclusive store transaction each.
//! - A failed import leaves the store byte-identical; a failed export may
//!   leave corpus-side effects but never store-side ones.
//! - All git access goes through [`git::CorpusRepo`]; no other module
//!   touches git2.

pub mod corpus;
pub mod export;
pub mod git;
pub mod import;

use crate::model::actor::Role;
use crate::repo::StoreError;
use git::GitError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub type SyncResult<T> = Result<T, SyncError>;

/// Which half of the pipeline an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Import,
    Export,
}

impl SyncStage {
    /// Stable lowercase name used in logs and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Export => "export",
        }
    }
}

impl Display for SyncStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the corpus checkout lives and how exports are committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Working tree of the corpus repository.
    pub corpus_dir: PathBuf,
    /// Remote exports push to.
    pub remote: String,
    /// Integration branch exports force-push. Its history is rewritten on
    /// every export; nothing else may build on it.
    pub branch: String,
    /// Committer identity on export commits.
    pub committer_name: String,
    pub committer_email: String,
}

impl SyncConfig {
    /// Configuration with the default remote, branch and committer.
    pub fn new(corpus_dir: impl Into<PathBuf>) -> Self {
        Self {
            corpus_dir: corpus_dir.into(),
            remote: "origin".to_string(),
            branch: "corrections".to_string(),
            committer_name: "epistula".to_string(),
            committer_email: "export@epistula.invalid".to_string(),
        }
    }
}

/// Errors from the import and export pipelines.
#[derive(Debug)]
pub enum SyncError {
    /// Underlying store error.
    Store(StoreError),
    /// Corpus repository error.
    Git(GitError),
    /// File read or write under the corpus working tree failed.
    Io(std::io::Error),
    /// A corpus file does not parse or carries unusable content.
    Corpus { file: String, message: String },
    /// Store or repository state blocks the run; nothing was written.
    Precondition { stage: SyncStage, message: String },
    /// Actor lacks the role required for the operation.
    Forbidden { required: Role },
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Git(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "corpus file access failed: {err}"),
            Self::Corpus { file, message } => {
                write!(f, "corpus file {file} is unusable: {message}")
            }
            Self::Precondition { stage, message } => {
                write!(f, "{stage} precondition failed: {message}")
            }
            Self::Forbidden { required } => {
                write!(f, "operation requires the {} role", required.as_str())
            }
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Git(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Corpus { .. } => None,
            Self::Precondition { .. } => None,
            Self::Forbidden { .. } => None,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<GitError> for SyncError {
    fn from(value: GitError) -> Self {
        Self::Git(value)
    }
}

impl From<std::io::Error> for SyncError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(value.into())
    }
}
