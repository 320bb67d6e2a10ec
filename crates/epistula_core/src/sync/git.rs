//! Corpus repository access.
//!
//! # Responsibility
//! - Wrap every git operation the pipeline needs: revision reads, status
//!   checks, committing the working tree and force-pushing the
//!   integration branch.
//!
//! # Invariants
//! - This module is the only doorway to git2; no other module touches the
//!   repository directly.
//! - Operations never switch the working tree to content the pipeline did
//!   not just write; the only history rewrite is `reset_hard_to`.

use git2::{IndexAddOption, Oid, Repository, ResetType, Signature, StatusOptions};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

pub type GitResult<T> = Result<T, GitError>;

/// Corpus repository failures.
#[derive(Debug)]
pub enum GitError {
    /// Underlying libgit2 error.
    Git(git2::Error),
    /// Repository shape blocks the operation.
    InvalidState(String),
}

impl Display for GitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Git(err) => write!(f, "git operation failed: {err}"),
            Self::InvalidState(message) => f.write_str(message),
        }
    }
}

impl Error for GitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Git(err) => Some(err),
            Self::InvalidState(_) => None,
        }
    }
}

impl From<git2::Error> for GitError {
    fn from(value: git2::Error) -> Self {
        Self::Git(value)
    }
}

/// Handle on the corpus checkout.
pub struct CorpusRepo {
    repo: Repository,
}

impl CorpusRepo {
    /// Opens an existing corpus checkout.
    pub fn open(path: &Path) -> GitResult<Self> {
        let repo = Repository::open(path)?;
        Ok(Self { repo })
    }

    /// Working tree root. Bare repositories are not usable as a corpus.
    pub fn workdir(&self) -> GitResult<&Path> {
        self.repo.workdir().ok_or_else(|| {
            GitError::InvalidState("corpus repository has no working tree".to_string())
        })
    }

    /// Commit hash the working tree is checked out at.
    pub fn head_revision(&self) -> GitResult<String> {
        Ok(self.head_commit()?.id().to_string())
    }

    /// First parent of the checked-out commit, `None` on a root commit.
    pub fn parent_of_head(&self) -> GitResult<Option<String>> {
        Ok(self
            .head_commit()?
            .parent_ids()
            .next()
            .map(|oid| oid.to_string()))
    }

    /// Whether the working tree carries no changes against the checked-out
    /// commit. Untracked files count as changes, ignored files do not.
    pub fn is_clean(&self) -> GitResult<bool> {
        let mut options = StatusOptions::new();
        options.include_untracked(true).include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut options))?;
        Ok(statuses.is_empty())
    }

    /// Stages everything in the working tree, commits it on top of the
    /// checked-out commit and moves `branch` plus the checkout to the new
    /// commit. Returns the new commit hash.
    pub fn commit_all(
        &self,
        branch: &str,
        message: &str,
        committer_name: &str,
        committer_email: &str,
    ) -> GitResult<String> {
        let mut index = self.repo.index()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"], None)?;
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let signature = Signature::now(committer_name, committer_email)?;
        let parent = self.head_commit()?;
        let commit_id = self
            .repo
            .commit(None, &signature, &signature, message, &tree, &[&parent])?;
        let refname = format!("refs/heads/{branch}");
        self.repo.reference(&refname, commit_id, true, message)?;
        // The working tree already matches the new commit; repointing HEAD
        // needs no checkout.
        self.repo.set_head(&refname)?;
        Ok(commit_id.to_string())
    }

    /// Force-pushes `branch` to the remote, rewriting its history there.
    pub fn force_push(&self, remote_name: &str, branch: &str) -> GitResult<()> {
        let mut remote = self.repo.find_remote(remote_name)?;
        let refspec = format!("+refs/heads/{branch}:refs/heads/{branch}");
        remote.push(&[refspec.as_str()], None)?;
        Ok(())
    }

    /// Hard-resets checkout and working tree to the given commit.
    pub fn reset_hard_to(&self, revision: &str) -> GitResult<()> {
        let oid = Oid::from_str(revision)?;
        let object = self.repo.find_object(oid, None)?;
        self.repo.reset(&object, ResetType::Hard, None)?;
        Ok(())
    }

    fn head_commit(&self) -> GitResult<git2::Commit<'_>> {
        let head = self.repo.head()?;
        Ok(head.peel_to_commit()?)
    }
}

#[cfg(test)]
mod tests {
    use super::CorpusRepo;
    use std::fs;
    use std::path::Path;

    fn init_with_commit(dir: &Path) -> String {
        let repo = git2::Repository::init(dir).expect("init repository");
        let tree_id = {
            let mut index = repo.index().expect("index");
            index.write_tree().expect("write tree")
        };
        let tree = repo.find_tree(tree_id).expect("find tree");
        let signature = git2::Signature::now("fixture", "fixture@example.com").expect("signature");
        let commit_id = repo
            .commit(Some("HEAD"), &signature, &signature, "seed", &tree, &[])
            .expect("initial commit");
        commit_id.to_string()
    }

    #[test]
    fn commit_all_advances_head_and_branch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let seed = init_with_commit(dir.path());
        fs::write(dir.path().join("note.txt"), "corrected").expect("write file");

        let corpus = CorpusRepo::open(dir.path()).expect("open");
        assert!(!corpus.is_clean().expect("status"));

        let exported = corpus
            .commit_all("corrections", "export", "epistula", "export@epistula.invalid")
            .expect("commit");

        assert_ne!(exported, seed);
        assert_eq!(corpus.head_revision().expect("head"), exported);
        assert_eq!(corpus.parent_of_head().expect("parent"), Some(seed));
        assert!(corpus.is_clean().expect("status after commit"));

        let repo = git2::Repository::open(dir.path()).expect("reopen");
        let branch_tip = repo
            .find_reference("refs/heads/corrections")
            .expect("branch ref")
            .target()
            .expect("branch target");
        assert_eq!(branch_tip.to_string(), exported);
    }

    #[test]
    fn is_clean_counts_untracked_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        init_with_commit(dir.path());
        let corpus = CorpusRepo::open(dir.path()).expect("open");

        assert!(corpus.is_clean().expect("fresh checkout"));
        fs::write(dir.path().join("stray.xml"), "<x/>").expect("write file");
        assert!(!corpus.is_clean().expect("untracked file"));
    }

    #[test]
    fn reset_hard_drops_a_committed_export() {
        let dir = tempfile::tempdir().expect("tempdir");
        let seed = init_with_commit(dir.path());
        let file = dir.path().join("letter.xml");
        fs::write(&file, "<TEI/>").expect("write file");

        let corpus = CorpusRepo::open(dir.path()).expect("open");
        corpus
            .commit_all("corrections", "export", "epistula", "export@epistula.invalid")
            .expect("commit");
        assert!(file.exists());

        corpus.reset_hard_to(&seed).expect("reset");
        assert_eq!(corpus.head_revision().expect("head"), seed);
        assert!(!file.exists());
        assert!(corpus.is_clean().expect("clean after reset"));
    }

    #[test]
    fn parent_of_head_is_none_on_root_commit() {
        let dir = tempfile::tempdir().expect("tempdir");
        init_with_commit(dir.path());
        let corpus = CorpusRepo::open(dir.path()).expect("open");
        assert_eq!(corpus.parent_of_head().expect("parent"), None);
    }
}
