//! Review state derivation.
//!
//! There are no state-transition commands: each state is a pure function of
//! the current annotation set and ref topology, so two replicas that have
//! synchronized always agree.

use serde::Serialize;

use crate::config::Config;
use crate::error::Result;
use crate::records::{timestamp_seconds, Request};
use crate::review::Thread;
use crate::scm::{Repo, ARCHIVE_REF};

/// Lifecycle state of a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Open,
    Accepted,
    Submitted,
    Abandoned,
}

impl Status {
    /// Whether the review shows up in the default (open) listing.
    #[must_use]
    pub fn is_open_like(self) -> bool {
        matches!(self, Self::Open | Self::Accepted)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Accepted => "accepted",
            Self::Submitted => "submitted",
            Self::Abandoned => "abandoned",
        }
    }
}

/// Whether the review's head has landed in its target.
///
/// When the target ref has been deleted, the review only counts as
/// submitted if the archive graph records its history.
pub(crate) fn is_submitted(repo: &dyn Repo, request: &Request, head: &str) -> Result<bool> {
    if request.target_ref.is_empty() {
        return Ok(false);
    }
    if repo.has_ref(&request.target_ref)? {
        let target_tip = repo.resolve_ref(&request.target_ref)?;
        return repo.is_ancestor(head, &target_tip);
    }
    if repo.has_ref(ARCHIVE_REF)? {
        let archive_tip = repo.resolve_ref(ARCHIVE_REF)?;
        return repo.is_ancestor(head, &archive_tip);
    }
    Ok(false)
}

/// Derive the state from the active request and the top-level threads.
pub(crate) fn derive(
    repo: &dyn Repo,
    config: &Config,
    request: &Request,
    head: &str,
    threads: &[Thread],
) -> Result<Status> {
    if request.is_abandonment() {
        return Ok(Status::Abandoned);
    }
    if is_submitted(repo, request, head)? {
        return Ok(Status::Submitted);
    }
    if is_accepted(config, request, threads) {
        return Ok(Status::Accepted);
    }
    Ok(Status::Open)
}

fn acceptor_eligible(config: &Config, request: &Request, author: &str) -> bool {
    request.reviewers.iter().any(|reviewer| reviewer == author)
        || (config.allow_self_accept && author == request.requester)
}

/// Accepted iff an eligible reviewer's top-level LGTM exists with no newer
/// top-level NMW. Votes are compared by (timestamp, hash) so ties are
/// deterministic.
fn is_accepted(config: &Config, request: &Request, threads: &[Thread]) -> bool {
    let vote_key = |thread: &Thread| {
        (
            timestamp_seconds(&thread.comment.timestamp),
            thread.hash.clone(),
        )
    };

    let mut acceptance: Option<(i64, String)> = None;
    for thread in threads {
        if thread.comment.resolved == Some(true)
            && acceptor_eligible(config, request, &thread.comment.author)
        {
            let key = vote_key(thread);
            if acceptance.as_ref().map_or(true, |current| key > *current) {
                acceptance = Some(key);
            }
        }
    }
    let Some(acceptance) = acceptance else {
        return false;
    };

    !threads
        .iter()
        .any(|thread| thread.comment.resolved == Some(false) && vote_key(thread) > acceptance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Comment;
    use crate::scm::testing::MemRepo;

    fn request() -> Request {
        let mut request = Request::new(
            "author@example.com",
            "refs/heads/feature",
            "refs/heads/main",
            "",
        );
        request.set_reviewers(["reviewer@example.com"]);
        request
    }

    fn vote(author: &str, timestamp: &str, resolved: Option<bool>) -> Thread {
        let mut comment = Comment::new(author, "");
        comment.timestamp = timestamp.to_string();
        comment.resolved = resolved;
        Thread {
            hash: format!("hash-{author}-{timestamp}"),
            comment,
            commits: Vec::new(),
            children: Vec::new(),
            resolved,
            edited: false,
            verified: None,
        }
    }

    fn repo() -> MemRepo {
        let repo = MemRepo::new();
        repo.add_commit("base", &[], 1);
        repo.add_commit("tip", &["base"], 2);
        repo.set_ref("refs/heads/main", "base");
        repo.set_ref("refs/heads/feature", "tip");
        repo
    }

    #[test]
    fn test_open_without_votes() {
        let repo = repo();
        let status = derive(&repo, &Config::default(), &request(), "tip", &[]).unwrap();
        assert_eq!(status, Status::Open);
    }

    #[test]
    fn test_accepted_by_listed_reviewer() {
        let repo = repo();
        let threads = vec![vote("reviewer@example.com", "10", Some(true))];
        let status = derive(&repo, &Config::default(), &request(), "tip", &threads).unwrap();
        assert_eq!(status, Status::Accepted);
    }

    #[test]
    fn test_vote_by_stranger_does_not_accept() {
        let repo = repo();
        let threads = vec![vote("stranger@example.com", "10", Some(true))];
        let status = derive(&repo, &Config::default(), &request(), "tip", &threads).unwrap();
        assert_eq!(status, Status::Open);
    }

    #[test]
    fn test_self_accept_requires_config() {
        let repo = repo();
        let threads = vec![vote("author@example.com", "10", Some(true))];
        let status = derive(&repo, &Config::default(), &request(), "tip", &threads).unwrap();
        assert_eq!(status, Status::Open);

        let permissive = Config {
            allow_self_accept: true,
            ..Config::default()
        };
        let status = derive(&repo, &permissive, &request(), "tip", &threads).unwrap();
        assert_eq!(status, Status::Accepted);
    }

    #[test]
    fn test_newer_nmw_reopens() {
        let repo = repo();
        let threads = vec![
            vote("reviewer@example.com", "10", Some(true)),
            vote("reviewer@example.com", "20", Some(false)),
        ];
        let status = derive(&repo, &Config::default(), &request(), "tip", &threads).unwrap();
        assert_eq!(status, Status::Open);
    }

    #[test]
    fn test_older_nmw_does_not_block() {
        let repo = repo();
        let threads = vec![
            vote("reviewer@example.com", "10", Some(false)),
            vote("reviewer@example.com", "20", Some(true)),
        ];
        let status = derive(&repo, &Config::default(), &request(), "tip", &threads).unwrap();
        assert_eq!(status, Status::Accepted);
    }

    #[test]
    fn test_submitted_when_target_contains_head() {
        let repo = repo();
        repo.set_ref("refs/heads/main", "tip");
        let threads = vec![vote("reviewer@example.com", "10", Some(true))];
        let status = derive(&repo, &Config::default(), &request(), "tip", &threads).unwrap();
        assert_eq!(status, Status::Submitted);
    }

    #[test]
    fn test_abandonment_wins_over_votes() {
        let repo = repo();
        let mut abandoned = request();
        abandoned.target_ref = String::new();
        let threads = vec![vote("reviewer@example.com", "10", Some(true))];
        let status = derive(&repo, &Config::default(), &abandoned, "tip", &threads).unwrap();
        assert_eq!(status, Status::Abandoned);
    }

    #[test]
    fn test_deleted_target_needs_archive_entry() {
        let repo = repo();
        repo.delete_ref("refs/heads/main");
        assert!(!is_submitted(&repo, &request(), "tip").unwrap());

        repo.archive_ref("refs/heads/feature", ARCHIVE_REF).unwrap();
        assert!(is_submitted(&repo, &request(), "tip").unwrap());
    }
}
