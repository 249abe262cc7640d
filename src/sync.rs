//! Pull/push synchronization of annotation and archive refs.
//!
//! Annotations merge with a commutative, associative, idempotent line union,
//! so the result of a pull is independent of peer order and never conflicts.
//! Archives merge at the graph level (create / fast-forward / two-parent
//! merge). A partial fetch is harmless: the next pull simply retries.

use tracing::debug;

use crate::error::Result;
use crate::scm::{Repo, ARCHIVE_REF_PATTERN, NOTES_REF_PATTERN};

/// Fetch a remote's annotation and archive refs and merge them into the
/// local ones. Returns the ids of reviews whose annotations changed.
pub fn pull(repo: &dyn Repo, remote: &str) -> Result<Vec<String>> {
    let changed = repo.fetch_annotations(remote, NOTES_REF_PATTERN, ARCHIVE_REF_PATTERN)?;
    debug!(remote, changed = changed.len(), "fetched annotation refs");
    repo.merge_annotations(remote, NOTES_REF_PATTERN, ARCHIVE_REF_PATTERN)?;
    Ok(changed)
}

/// Mirror the local annotation and archive refs to a remote. A rejected
/// push surfaces as a user-actionable error and leaves local state intact.
pub fn push(repo: &dyn Repo, remote: &str) -> Result<()> {
    repo.push_annotations(remote, NOTES_REF_PATTERN, ARCHIVE_REF_PATTERN)
}
