//! Repository port: the contract the review core consumes from the VCS.
//!
//! Everything the aggregator, archive manager and sync protocol need from
//! git is behind the [`Repo`] trait. [`git::GitRepo`] wraps the command-line
//! tool; [`testing::MemRepo`] is a deterministic in-memory stand-in used by
//! the aggregation and state tests.

pub mod git;
pub mod testing;

use std::collections::BTreeMap;

use crate::error::{Error, Result};

// ============================================================================
// Annotation namespaces
// ============================================================================

/// Namespace holding review request records.
pub const REQUESTS_REF: &str = "refs/notes/devtools/reviews";
/// Namespace holding comment records.
pub const DISCUSS_REF: &str = "refs/notes/devtools/discuss";
/// Namespace holding analysis links and CI reports.
pub const ANALYSES_REF: &str = "refs/notes/devtools/analyses";

/// Archive ref whose history graph keeps review-referenced commits alive.
pub const ARCHIVE_REF: &str = "refs/devtools/archives/reviews";

/// Fetch/push pattern covering every annotation namespace.
pub const NOTES_REF_PATTERN: &str = "refs/notes/devtools/*";
/// Fetch/push pattern covering every archive ref.
pub const ARCHIVE_REF_PATTERN: &str = "refs/devtools/*";

const NOTES_REF_PREFIX: &str = "refs/notes/";
const DEVTOOLS_REF_PREFIX: &str = "refs/devtools/";
const REMOTE_DEVTOOLS_REF_PREFIX: &str = "refs/remoteDevtools/";

/// Remote-tracking name for a local notes ref.
///
/// The command-line tool requires all notes refs to live under `refs/notes/`,
/// so remote-tracking notes are a subtree of the local notes namespace
/// instead of a parallel tree: `refs/notes/X` -> `refs/notes/remotes/R/X`.
#[must_use]
pub fn remote_notes_ref(remote: &str, local: &str) -> String {
    let relative = local.strip_prefix(NOTES_REF_PREFIX).unwrap_or(local);
    format!("{NOTES_REF_PREFIX}remotes/{remote}/{relative}")
}

/// Inverse of [`remote_notes_ref`].
#[must_use]
pub fn local_notes_ref(remote: &str, remote_ref: &str) -> String {
    let prefix = format!("{NOTES_REF_PREFIX}remotes/{remote}/");
    let relative = remote_ref.strip_prefix(&prefix).unwrap_or(remote_ref);
    format!("{NOTES_REF_PREFIX}{relative}")
}

/// Remote-tracking name for a local devtools (archive) ref:
/// `refs/devtools/X` -> `refs/remoteDevtools/R/X`.
#[must_use]
pub fn remote_devtools_ref(remote: &str, local: &str) -> String {
    let relative = local.strip_prefix(DEVTOOLS_REF_PREFIX).unwrap_or(local);
    format!("{REMOTE_DEVTOOLS_REF_PREFIX}{remote}/{relative}")
}

/// Inverse of [`remote_devtools_ref`].
#[must_use]
pub fn local_devtools_ref(remote: &str, remote_ref: &str) -> String {
    let prefix = format!("{REMOTE_DEVTOOLS_REF_PREFIX}{remote}/");
    let relative = remote_ref.strip_prefix(&prefix).unwrap_or(remote_ref);
    format!("{DEVTOOLS_REF_PREFIX}{relative}")
}

// ============================================================================
// Port types
// ============================================================================

/// Classification of an object-store entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Commit,
    Tree,
    Blob,
    Missing,
}

/// Metadata of a single commit, as read from the object store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitDetails {
    pub tree: String,
    pub parents: Vec<String>,
    /// Commit time, seconds since the epoch.
    pub time: i64,
    pub author_email: String,
    pub summary: String,
}

/// Abstract contract over the version-control system.
///
/// Implementations may block on subprocess I/O in any method. All ref
/// mutations go through compare-and-swap so no partial update is observable.
pub trait Repo {
    // --- identity & configuration -------------------------------------
    fn user_email(&self) -> Result<String>;
    fn signing_key(&self) -> Result<Option<String>>;
    fn config_value(&self, key: &str) -> Result<Option<String>>;
    /// Opaque value that changes iff any ref changes; memoization key.
    fn state_fingerprint(&self) -> Result<String>;

    // --- refs & commits ------------------------------------------------
    /// The symbolic ref HEAD points at.
    fn head_ref(&self) -> Result<String>;
    fn has_ref(&self, name: &str) -> Result<bool>;
    fn resolve_ref(&self, name: &str) -> Result<String>;
    /// Like [`Repo::resolve_ref`], but falls back to a uniquely matching
    /// remote-tracking branch when the local ref does not exist.
    fn resolve_ref_commit(&self, name: &str) -> Result<String>;
    /// Compare-and-swap ref update; `expected_old` of `None` creates or
    /// overwrites unconditionally.
    fn update_ref(&self, name: &str, new: &str, expected_old: Option<&str>) -> Result<()>;
    fn verify_commit(&self, hash: &str) -> Result<()>;
    fn object_type(&self, hash: &str) -> Result<ObjectType>;
    fn commit_details(&self, reference: &str) -> Result<CommitDetails>;
    fn commit_parents(&self, reference: &str) -> Result<Vec<String>> {
        Ok(self.commit_details(reference)?.parents)
    }
    fn create_commit(&self, tree: &str, parents: &[String], message: &str) -> Result<String>;
    fn merge_base(&self, a: &str, b: &str) -> Result<String>;
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool>;
    /// Commits reachable from `reference`, oldest first. Unknown refs give
    /// an empty list.
    fn list_commits(&self, reference: &str) -> Result<Vec<String>>;
    /// Commits after `from` up to and including `to`, oldest first. When
    /// `from` is not an ancestor of `to` the merge base is the start point.
    fn list_commits_between(&self, from: &str, to: &str) -> Result<Vec<String>>;
    fn file_exists_at(&self, commit: &str, path: &str) -> Result<bool>;
    /// Raw diff text between two commits; consumed by front-ends only.
    fn diff(&self, left: &str, right: &str) -> Result<String>;

    // --- annotations ----------------------------------------------------
    /// Annotation lines attached to one revision (empty lines dropped).
    fn notes(&self, notes_ref: &str, revision: &str) -> Result<Vec<String>>;
    /// All annotation lines in a namespace, keyed by annotated commit.
    /// Non-commit annotated objects are skipped.
    fn all_notes(&self, notes_ref: &str) -> Result<BTreeMap<String, Vec<String>>>;
    /// Append one line; the store deduplicates identical content on merge.
    fn append_note(&self, notes_ref: &str, revision: &str, line: &str) -> Result<()>;

    // --- archives --------------------------------------------------------
    /// Graft `source`'s history under `archive` so it stays reachable.
    /// No-op when already archived.
    fn archive_ref(&self, source: &str, archive: &str) -> Result<()>;

    // --- synchronization -------------------------------------------------
    /// Fetch annotation and archive refs into their remote-tracking names,
    /// returning the ids of reviews whose annotations changed.
    fn fetch_annotations(
        &self,
        remote: &str,
        notes_pattern: &str,
        archive_pattern: &str,
    ) -> Result<Vec<String>>;
    /// Merge fetched remote-tracking refs into the local ones: line-union
    /// for annotations, graph merge for archives.
    fn merge_annotations(
        &self,
        remote: &str,
        notes_pattern: &str,
        archive_pattern: &str,
    ) -> Result<()>;
    /// Mirror local annotation and archive refs to the remote.
    fn push_annotations(
        &self,
        remote: &str,
        notes_pattern: &str,
        archive_pattern: &str,
    ) -> Result<()>;
}

/// Reject revision/ref arguments that could be mistaken for options or
/// smuggle control characters into a subprocess invocation.
pub fn validate_anchor(anchor: &str) -> Result<()> {
    if anchor.trim().is_empty() {
        return Err(Error::validation("revision/ref argument cannot be empty"));
    }
    if anchor.starts_with('-') {
        return Err(Error::validation(format!(
            "revision/ref argument cannot start with '-': {anchor}"
        )));
    }
    if anchor.contains('\0') || anchor.contains('\n') || anchor.contains('\r') {
        return Err(Error::validation(
            "revision/ref argument contains control characters",
        ));
    }
    Ok(())
}
