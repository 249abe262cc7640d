//! Review aggregation: reconstructing logical reviews from raw annotations.
//!
//! The annotation store is an unordered, duplicated, append-only set of JSON
//! lines attached to commits. Everything here is a pure function of that set
//! plus the current ref topology: comments de-duplicate by content hash,
//! threads order by (timestamp, hash), and state derives from the result, so
//! replicas that have synchronized produce identical reviews no matter what
//! order their annotations arrived in.

pub mod cache;
pub mod state;

pub use cache::ReviewCache;
pub use state::Status;

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::config::Config;
use crate::error::Result;
use crate::gpg;
use crate::records::{
    self, timestamp_seconds, AnalysesNote, AnalysesRecord, CiReport, Comment, Request,
};
use crate::scm::{Repo, ANALYSES_REF, DISCUSS_REF, REQUESTS_REF};

/// One node in a comment thread forest.
#[derive(Debug, Clone, Serialize)]
pub struct Thread {
    /// Identity hash of the comment (canonical bytes, signature included).
    pub hash: String,
    pub comment: Comment,
    /// Commits this comment was found attached to.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub commits: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Thread>,
    /// Effective resolved value of the subtree: the vote of the latest
    /// descendant by (timestamp, hash).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<bool>,
    /// True when a reply by the same author at the same location supersedes
    /// this comment's text for display.
    pub edited: bool,
    /// `None` for unsigned comments, otherwise the verification outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
}

fn is_edit_of(parent: &Comment, child: &Comment) -> bool {
    child.author == parent.author
        && !child.description.is_empty()
        && child.location == parent.location
}

fn sort_key(thread: &Thread) -> (i64, &str) {
    (
        timestamp_seconds(&thread.comment.timestamp),
        thread.hash.as_str(),
    )
}

impl Thread {
    /// Text to display for this node: the newest qualifying edit's text,
    /// following chained edits, else the comment's own description. The
    /// tree itself always keeps the real parent links.
    #[must_use]
    pub fn display_description(&self) -> &str {
        let mut newest: Option<&Thread> = None;
        for child in &self.children {
            if is_edit_of(&self.comment, &child.comment)
                && newest.map_or(true, |current| sort_key(child) > sort_key(current))
            {
                newest = Some(child);
            }
        }
        match newest {
            Some(edit) => edit.display_description(),
            None => &self.comment.description,
        }
    }

    /// Total number of comments in this subtree.
    #[must_use]
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(Thread::len).sum::<usize>()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `hash` names this node or any descendant.
    #[must_use]
    pub fn contains(&self, hash: &str) -> bool {
        self.hash == hash || self.children.iter().any(|child| child.contains(hash))
    }
}

/// The (timestamp, hash) key and vote of the latest node in a subtree.
fn latest_vote(thread: &Thread) -> ((i64, String), Option<bool>) {
    let mut best = (
        (
            timestamp_seconds(&thread.comment.timestamp),
            thread.hash.clone(),
        ),
        thread.comment.resolved,
    );
    for child in &thread.children {
        let candidate = latest_vote(child);
        if candidate.0 > best.0 {
            best = candidate;
        }
    }
    best
}

/// A fully aggregated review. Derived, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct Review {
    /// Commit hash identifying the review.
    pub revision: String,
    /// Commit new comments attach to (tip of a live review ref).
    pub head: String,
    pub request: Request,
    pub comments: Vec<Thread>,
    /// Comments whose parent hash is unknown (or self-referential); kept,
    /// never dropped, excluded from the resolved roll-up.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub orphaned: Vec<Thread>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub analyses: Vec<AnalysesNote>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ci_reports: Vec<CiReport>,
    pub status: Status,
    pub submitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<bool>,
    /// Record-level problems encountered during aggregation; a bad line
    /// never hides the rest of the review.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parse_errors: Vec<String>,
}

impl Review {
    /// Whether `hash` names any comment in this review's set.
    #[must_use]
    pub fn has_comment(&self, hash: &str) -> bool {
        self.comments
            .iter()
            .chain(&self.orphaned)
            .any(|thread| thread.contains(hash))
    }
}

/// Listing entry for one review.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub revision: String,
    pub review_ref: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target_ref: String,
    pub requester: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub status: Status,
    pub submitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<bool>,
}

impl From<&Review> for Summary {
    fn from(review: &Review) -> Self {
        Self {
            revision: review.revision.clone(),
            review_ref: review.request.review_ref.clone(),
            target_ref: review.request.target_ref.clone(),
            requester: review.request.requester.clone(),
            description: review.request.description.clone(),
            status: review.status,
            submitted: review.submitted,
            resolved: review.resolved,
        }
    }
}

// ============================================================================
// Aggregation
// ============================================================================

/// One read of all three annotation namespaces; every query over it is then
/// a pure function.
struct Snapshot {
    requests: BTreeMap<String, Vec<String>>,
    discuss: BTreeMap<String, Vec<String>>,
    analyses: BTreeMap<String, Vec<String>>,
}

impl Snapshot {
    fn load(repo: &dyn Repo) -> Result<Self> {
        Ok(Self {
            requests: repo.all_notes(REQUESTS_REF)?,
            discuss: repo.all_notes(DISCUSS_REF)?,
            analyses: repo.all_notes(ANALYSES_REF)?,
        })
    }
}

/// Pick the active request among the lines attached to a review's commit:
/// latest timestamp wins, ties broken by the lexicographically largest
/// signature-less canonical hash.
fn select_request(lines: &[String], errors: &mut Vec<String>) -> Option<Request> {
    let mut best: Option<((i64, String), Request)> = None;
    for line in lines {
        match Request::from_line(line) {
            Ok(request) => {
                if let Err(err) = request.validate() {
                    errors.push(err.to_string());
                    continue;
                }
                let hash = records::signable_hash(&request).unwrap_or_default();
                let key = (timestamp_seconds(&request.timestamp), hash);
                if best.as_ref().map_or(true, |(current, _)| key > *current) {
                    best = Some((key, request));
                }
            }
            Err(err) => errors.push(err.to_string()),
        }
    }
    best.map(|(_, request)| request)
}

/// The commit new comments attach to: the current tip of the review ref
/// while it still exists, else the review's own commit.
fn head_commit(repo: &dyn Repo, request: &Request, revision: &str) -> String {
    if !request.review_ref.is_empty() {
        if let Ok(true) = repo.has_ref(&request.review_ref) {
            if let Ok(tip) = repo.resolve_ref(&request.review_ref) {
                return tip;
            }
        }
    }
    revision.to_string()
}

/// Commits whose annotations belong to this review: everything between the
/// base (explicit, or the merge base with the target) and the head,
/// inclusive, plus the review commit itself.
fn revision_set(
    repo: &dyn Repo,
    request: &Request,
    revision: &str,
    head: &str,
) -> Result<Vec<String>> {
    let base = if !request.base_commit.is_empty() {
        Some(request.base_commit.clone())
    } else if !request.target_ref.is_empty() && repo.has_ref(&request.target_ref)? {
        repo.merge_base(&request.target_ref, head).ok()
    } else {
        None
    };

    let mut commits = match base {
        Some(base) => repo.list_commits_between(&base, head).unwrap_or_default(),
        None => Vec::new(),
    };
    for extra in [revision, head] {
        if !commits.iter().any(|c| c == extra) {
            commits.push(extra.to_string());
        }
    }
    Ok(commits)
}

struct RawNode {
    comment: Comment,
    commits: BTreeSet<String>,
}

/// Parse and de-duplicate the comments attached to the given commits.
/// Identical comments on different commits collapse to one node that
/// remembers every commit it was attached to.
fn gather_comments(
    discuss: &BTreeMap<String, Vec<String>>,
    commits: &[String],
    errors: &mut Vec<String>,
) -> BTreeMap<String, RawNode> {
    let mut nodes: BTreeMap<String, RawNode> = BTreeMap::new();
    for commit in commits {
        for line in discuss.get(commit).into_iter().flatten() {
            let comment = match Comment::from_line(line) {
                Ok(comment) => comment,
                Err(err) => {
                    errors.push(format!("{commit}: {err}"));
                    continue;
                }
            };
            let hash = match records::record_hash(&comment) {
                Ok(hash) => hash,
                Err(err) => {
                    errors.push(format!("{commit}: {err}"));
                    continue;
                }
            };
            nodes
                .entry(hash)
                .or_insert_with(|| RawNode {
                    comment,
                    commits: BTreeSet::new(),
                })
                .commits
                .insert(commit.clone());
        }
    }
    nodes
}

fn build_node(
    hash: &str,
    nodes: &BTreeMap<String, RawNode>,
    children: &BTreeMap<String, Vec<String>>,
) -> Thread {
    let raw = &nodes[hash];
    let child_threads: Vec<Thread> = children
        .get(hash)
        .into_iter()
        .flatten()
        .map(|child| build_node(child, nodes, children))
        .collect();
    let verified = if raw.comment.signature.is_empty() {
        None
    } else {
        Some(gpg::verify(&raw.comment).unwrap_or(false))
    };
    let mut thread = Thread {
        hash: hash.to_string(),
        comment: raw.comment.clone(),
        commits: raw.commits.iter().cloned().collect(),
        children: child_threads,
        resolved: None,
        edited: false,
        verified,
    };
    thread.edited = thread
        .children
        .iter()
        .any(|child| is_edit_of(&thread.comment, &child.comment));
    thread.resolved = latest_vote(&thread).1;
    thread
}

/// Build the thread forest. Comments with an unknown (or self-referential)
/// parent become orphan roots rather than being dropped.
fn build_threads(nodes: &BTreeMap<String, RawNode>) -> (Vec<Thread>, Vec<Thread>) {
    let mut order: Vec<&String> = nodes.keys().collect();
    order.sort_by_key(|hash| {
        (
            timestamp_seconds(&nodes[*hash].comment.timestamp),
            (*hash).clone(),
        )
    });

    let mut children: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut root_hashes = Vec::new();
    let mut orphan_hashes = Vec::new();
    for hash in order {
        let parent = &nodes[hash].comment.parent;
        if parent.is_empty() {
            root_hashes.push(hash.clone());
        } else if parent == hash || !nodes.contains_key(parent) {
            orphan_hashes.push(hash.clone());
        } else {
            children.entry(parent.clone()).or_default().push(hash.clone());
        }
    }

    let roots = root_hashes
        .iter()
        .map(|hash| build_node(hash, nodes, &children))
        .collect();
    let orphans = orphan_hashes
        .iter()
        .map(|hash| build_node(hash, nodes, &children))
        .collect();
    (roots, orphans)
}

/// Roll the per-thread effective values up to the review: `false` beats
/// everything, `true` requires unanimity over at least one thread.
fn resolved_rollup(threads: &[Thread]) -> Option<bool> {
    if threads.iter().any(|thread| thread.resolved == Some(false)) {
        return Some(false);
    }
    if !threads.is_empty() && threads.iter().all(|thread| thread.resolved == Some(true)) {
        return Some(true);
    }
    None
}

/// Collect analyses links and CI reports for the revision set: analyses
/// de-duplicated by content, CI reduced to the latest report per agent.
fn gather_analyses(
    analyses_notes: &BTreeMap<String, Vec<String>>,
    commits: &[String],
    errors: &mut Vec<String>,
) -> (Vec<AnalysesNote>, Vec<CiReport>) {
    let mut seen = BTreeSet::new();
    let mut analyses = Vec::new();
    let mut ci_by_agent: BTreeMap<String, CiReport> = BTreeMap::new();
    for commit in commits {
        for line in analyses_notes.get(commit).into_iter().flatten() {
            match AnalysesRecord::from_line(line) {
                Ok(AnalysesRecord::Analyses(note)) => {
                    if let Ok(hash) = records::record_hash(&note) {
                        if seen.insert(hash) {
                            analyses.push(note);
                        }
                    }
                }
                Ok(AnalysesRecord::Ci(report)) => {
                    let newer = ci_by_agent.get(&report.agent).map_or(true, |current| {
                        timestamp_seconds(&report.timestamp)
                            >= timestamp_seconds(&current.timestamp)
                    });
                    if newer {
                        ci_by_agent.insert(report.agent.clone(), report);
                    }
                }
                Err(err) => errors.push(format!("{commit}: {err}")),
            }
        }
    }
    analyses.sort_by_key(|note| (timestamp_seconds(&note.timestamp), note.url.clone()));
    (analyses, ci_by_agent.into_values().collect())
}

fn aggregate(
    repo: &dyn Repo,
    config: &Config,
    snapshot: &Snapshot,
    revision: &str,
) -> Result<Option<Review>> {
    let Some(request_lines) = snapshot.requests.get(revision) else {
        return Ok(None);
    };
    let mut parse_errors = Vec::new();
    let Some(request) = select_request(request_lines, &mut parse_errors) else {
        return Ok(None);
    };

    let head = head_commit(repo, &request, revision);
    let commits = revision_set(repo, &request, revision, &head)?;
    let nodes = gather_comments(&snapshot.discuss, &commits, &mut parse_errors);
    let (comments, orphaned) = build_threads(&nodes);
    let (analyses, ci_reports) = gather_analyses(&snapshot.analyses, &commits, &mut parse_errors);

    let submitted = state::is_submitted(repo, &request, &head)?;
    let status = state::derive(repo, config, &request, &head, &comments)?;
    let resolved = resolved_rollup(&comments);

    Ok(Some(Review {
        revision: revision.to_string(),
        head,
        request,
        comments,
        orphaned,
        analyses,
        ci_reports,
        status,
        submitted,
        resolved,
        parse_errors,
    }))
}

// ============================================================================
// Queries
// ============================================================================

/// Load the review identified by the given commit, if one exists.
pub fn get(repo: &dyn Repo, config: &Config, id: &str) -> Result<Option<Review>> {
    let snapshot = Snapshot::load(repo)?;
    aggregate(repo, config, &snapshot, id)
}

/// Load the review whose `reviewRef` is the currently checked-out branch,
/// preferring the newest request when several match.
pub fn get_current(repo: &dyn Repo, config: &Config) -> Result<Option<Review>> {
    let head_ref = repo.head_ref()?;
    let snapshot = Snapshot::load(repo)?;

    let mut best: Option<((i64, String), String)> = None;
    for (revision, lines) in &snapshot.requests {
        let mut scratch = Vec::new();
        let Some(request) = select_request(lines, &mut scratch) else {
            continue;
        };
        if request.review_ref != head_ref {
            continue;
        }
        let key = (timestamp_seconds(&request.timestamp), revision.clone());
        if best.as_ref().map_or(true, |(current, _)| key > *current) {
            best = Some((key, revision.clone()));
        }
    }

    match best {
        Some((_, revision)) => aggregate(repo, config, &snapshot, &revision),
        None => Ok(None),
    }
}

/// Summaries of every review in the repository.
pub fn list_all(repo: &dyn Repo, config: &Config) -> Result<Vec<Summary>> {
    let snapshot = Snapshot::load(repo)?;
    let mut summaries = Vec::new();
    for revision in snapshot.requests.keys() {
        if let Some(review) = aggregate(repo, config, &snapshot, revision)? {
            summaries.push(Summary::from(&review));
        }
    }
    Ok(summaries)
}

/// Summaries of reviews still awaiting action (open or accepted).
pub fn list_open(repo: &dyn Repo, config: &Config) -> Result<Vec<Summary>> {
    Ok(list_all(repo, config)?
        .into_iter()
        .filter(|summary| summary.status.is_open_like())
        .collect())
}

/// Comment threads about a file, independent of any review: every comment
/// whose location names the path and a commit this repository knows.
pub fn get_detached_comments(repo: &dyn Repo, path: &str) -> Result<Vec<Thread>> {
    let discuss = repo.all_notes(DISCUSS_REF)?;
    let mut nodes: BTreeMap<String, RawNode> = BTreeMap::new();
    for (commit, lines) in &discuss {
        for line in lines {
            let Ok(comment) = Comment::from_line(line) else {
                continue;
            };
            let relevant = comment.location.as_ref().is_some_and(|location| {
                location.path == path
                    && (location.commit.is_empty()
                        || repo.verify_commit(&location.commit).is_ok())
            });
            if !relevant {
                continue;
            }
            let Ok(hash) = records::record_hash(&comment) else {
                continue;
            };
            nodes
                .entry(hash)
                .or_insert_with(|| RawNode {
                    comment,
                    commits: BTreeSet::new(),
                })
                .commits
                .insert(commit.clone());
        }
    }
    let (mut roots, orphans) = build_threads(&nodes);
    roots.extend(orphans);
    Ok(roots)
}

// ============================================================================
// Append paths
// ============================================================================

/// Record a (validated) request against the commit that identifies the
/// review.
pub fn add_request(repo: &dyn Repo, revision: &str, request: &Request) -> Result<()> {
    request.validate()?;
    repo.append_note(REQUESTS_REF, revision, &request.to_line()?)
}

/// Attach a comment to a review's head commit.
pub fn add_comment(repo: &dyn Repo, review: &Review, comment: &Comment) -> Result<()> {
    repo.append_note(DISCUSS_REF, &review.head, &comment.to_line()?)
}

/// Attach a comment to the commit a ref resolves to, outside any review.
pub fn add_detached_comment(
    repo: &dyn Repo,
    target_ref: &str,
    comment: &Comment,
) -> Result<()> {
    let commit = repo.resolve_ref_commit(target_ref)?;
    repo.append_note(DISCUSS_REF, &commit, &comment.to_line()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Location;
    use crate::scm::testing::MemRepo;
    use crate::scm::ARCHIVE_REF;

    const REVIEWER: &str = "reviewer@example.com";
    const AUTHOR: &str = "author@example.com";

    /// main at `base`; feature branch `base <- c1 <- c2` with a request on
    /// `c2` naming one reviewer.
    fn setup() -> MemRepo {
        let repo = MemRepo::new();
        repo.add_commit("base", &[], 10);
        repo.add_commit("c1", &["base"], 20);
        repo.add_commit("c2", &["c1"], 30);
        repo.set_ref("refs/heads/main", "base");
        repo.set_ref("refs/heads/feature", "c2");
        repo.set_head("refs/heads/feature");

        let mut request = Request::new(AUTHOR, "refs/heads/feature", "refs/heads/main", "Add!");
        request.timestamp = "100".to_string();
        request.set_reviewers([REVIEWER]);
        add_request(&repo, "c2", &request).unwrap();
        repo
    }

    fn comment(author: &str, timestamp: &str, description: &str) -> Comment {
        let mut comment = Comment::new(author, description);
        comment.timestamp = timestamp.to_string();
        comment
    }

    fn append(repo: &MemRepo, commit: &str, comment: &Comment) {
        repo.append_note(DISCUSS_REF, commit, &comment.to_line().unwrap())
            .unwrap();
    }

    fn get_review(repo: &MemRepo) -> Review {
        get(repo, &Config::default(), "c2").unwrap().expect("review")
    }

    #[test]
    fn test_missing_review_is_none() {
        let repo = setup();
        assert!(get(&repo, &Config::default(), "c1").unwrap().is_none());
    }

    #[test]
    fn test_single_lgtm_accepts_and_resolves() {
        let repo = setup();
        let mut lgtm = comment(REVIEWER, "200", "ship it");
        lgtm.resolved = Some(true);
        append(&repo, "c2", &lgtm);

        let review = get_review(&repo);
        assert_eq!(review.comments.len(), 1);
        assert!(review.comments[0].children.is_empty());
        assert_eq!(review.status, Status::Accepted);
        assert_eq!(review.resolved, Some(true));
        assert!(!review.submitted);
    }

    #[test]
    fn test_lgtm_then_nmw_reopens() {
        let repo = setup();
        let mut lgtm = comment(REVIEWER, "200", "");
        lgtm.resolved = Some(true);
        append(&repo, "c2", &lgtm);
        let mut nmw = comment(REVIEWER, "300", "wait, the tests fail");
        nmw.resolved = Some(false);
        append(&repo, "c2", &nmw);

        let review = get_review(&repo);
        assert_eq!(review.resolved, Some(false));
        assert_eq!(review.status, Status::Open);
    }

    #[test]
    fn test_edit_folds_for_display_but_keeps_the_chain() {
        let repo = setup();
        let mut original = comment(REVIEWER, "200", "tyop here");
        original.location = Some(Location {
            commit: "c2".to_string(),
            path: "src/lib.rs".to_string(),
            range: None,
        });
        append(&repo, "c2", &original);

        let mut edit = comment(REVIEWER, "210", "typo here");
        edit.location = original.location.clone();
        edit.parent = records::record_hash(&original).unwrap();
        append(&repo, "c2", &edit);

        let review = get_review(&repo);
        assert_eq!(review.comments.len(), 1);
        let root = &review.comments[0];
        assert!(root.edited);
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.comment.description, "tyop here");
        assert_eq!(root.display_description(), "typo here");
    }

    #[test]
    fn test_reply_by_someone_else_is_not_an_edit() {
        let repo = setup();
        let original = comment(REVIEWER, "200", "question?");
        append(&repo, "c2", &original);
        let mut reply = comment(AUTHOR, "210", "answer.");
        reply.parent = records::record_hash(&original).unwrap();
        append(&repo, "c2", &reply);

        let review = get_review(&repo);
        assert!(!review.comments[0].edited);
        assert_eq!(review.comments[0].display_description(), "question?");
    }

    #[test]
    fn test_orphans_are_kept_but_do_not_resolve() {
        let repo = setup();
        let mut lost = comment(REVIEWER, "200", "where is my parent");
        lost.parent = "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef".to_string();
        lost.resolved = Some(false);
        append(&repo, "c2", &lost);

        let review = get_review(&repo);
        assert!(review.comments.is_empty());
        assert_eq!(review.orphaned.len(), 1);
        assert_eq!(review.resolved, None);
        // Thread closure: every comment is reachable somewhere.
        assert_eq!(
            review.comments.iter().chain(&review.orphaned).map(Thread::len).sum::<usize>(),
            1
        );
    }

    #[test]
    fn test_abandonment_beats_comments() {
        let repo = setup();
        let mut lgtm = comment(REVIEWER, "200", "");
        lgtm.resolved = Some(true);
        append(&repo, "c2", &lgtm);

        let mut drop_request = Request::new(AUTHOR, "refs/heads/feature", "", "");
        drop_request.timestamp = "400".to_string();
        add_request(&repo, "c2", &drop_request).unwrap();

        let review = get_review(&repo);
        assert_eq!(review.status, Status::Abandoned);
    }

    #[test]
    fn test_submission_is_pure_over_refs() {
        let repo = setup();
        let review = get_review(&repo);
        assert!(!review.submitted);

        // The target catches up without any annotation append.
        repo.set_ref("refs/heads/main", "c2");
        let review = get_review(&repo);
        assert!(review.submitted);
        assert_eq!(review.status, Status::Submitted);
    }

    #[test]
    fn test_submission_after_target_deletion_requires_archive() {
        let repo = setup();
        repo.delete_ref("refs/heads/main");
        assert!(!get_review(&repo).submitted);

        repo.archive_ref("refs/heads/feature", ARCHIVE_REF).unwrap();
        assert!(get_review(&repo).submitted);
    }

    #[test]
    fn test_tampered_signature_marks_but_keeps_comment() {
        let repo = setup();
        let mut signed = comment(REVIEWER, "200", "looks good");
        signed.signature = "-----BEGIN PGP SIGNATURE-----\nnot a real one\n-----END PGP SIGNATURE-----".to_string();
        append(&repo, "c2", &signed);

        let review = get_review(&repo);
        assert_eq!(review.comments.len(), 1);
        assert_eq!(review.comments[0].verified, Some(false));
    }

    #[test]
    fn test_duplicate_lines_are_idempotent() {
        let repo = setup();
        let note = comment(REVIEWER, "200", "once");
        append(&repo, "c2", &note);
        append(&repo, "c2", &note);

        let review = get_review(&repo);
        assert_eq!(review.comments.len(), 1);
    }

    #[test]
    fn test_same_comment_on_two_commits_collapses() {
        let repo = setup();
        let note = comment(REVIEWER, "200", "applies to both");
        append(&repo, "c1", &note);
        append(&repo, "c2", &note);

        let review = get_review(&repo);
        assert_eq!(review.comments.len(), 1);
        assert_eq!(review.comments[0].commits, vec!["c1", "c2"]);
    }

    #[test]
    fn test_aggregation_is_order_insensitive() {
        let forward = setup();
        let reversed = setup();
        let notes = [
            comment(REVIEWER, "200", "first"),
            comment(REVIEWER, "300", "second"),
            comment(AUTHOR, "250", "third"),
        ];
        for note in &notes {
            append(&forward, "c2", note);
        }
        for note in notes.iter().rev() {
            append(&reversed, "c2", note);
        }

        let a = serde_json::to_string(&get_review(&forward)).unwrap();
        let b = serde_json::to_string(&get_review(&reversed)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_replicas_converge_after_exchange() {
        let a = setup();
        let b = a.clone();
        let c1 = comment(REVIEWER, "200", "only on a");
        let c2 = comment(REVIEWER, "210", "on both");
        let c3 = comment(AUTHOR, "220", "only on b");
        append(&a, "c2", &c1);
        append(&a, "c2", &c2);
        append(&b, "c2", &c2);
        append(&b, "c2", &c3);

        a.merge_notes_from(&b);
        b.merge_notes_from(&a);

        let merged_a = serde_json::to_string(&get_review(&a)).unwrap();
        let merged_b = serde_json::to_string(&get_review(&b)).unwrap();
        assert_eq!(merged_a, merged_b);
        assert_eq!(get_review(&a).comments.len(), 3);
    }

    #[test]
    fn test_nested_reply_decides_effective_resolved() {
        let repo = setup();
        let mut top = comment(REVIEWER, "200", "concern");
        top.resolved = Some(false);
        append(&repo, "c2", &top);
        let mut reply = comment(REVIEWER, "300", "addressed, thanks");
        reply.parent = records::record_hash(&top).unwrap();
        reply.resolved = Some(true);
        append(&repo, "c2", &reply);

        let review = get_review(&repo);
        assert_eq!(review.comments[0].resolved, Some(true));
        assert_eq!(review.resolved, Some(true));
    }

    #[test]
    fn test_latest_request_wins() {
        let repo = setup();
        let mut newer = Request::new(AUTHOR, "refs/heads/feature", "refs/heads/main", "v2");
        newer.timestamp = "150".to_string();
        add_request(&repo, "c2", &newer).unwrap();

        let review = get_review(&repo);
        assert_eq!(review.request.description, "v2");
    }

    #[test]
    fn test_bad_lines_become_parse_errors_not_failures() {
        let repo = setup();
        repo.append_note(DISCUSS_REF, "c2", "this is not json").unwrap();
        let good = comment(REVIEWER, "200", "still here");
        append(&repo, "c2", &good);

        let review = get_review(&repo);
        assert_eq!(review.comments.len(), 1);
        assert_eq!(review.parse_errors.len(), 1);
    }

    #[test]
    fn test_comments_on_intermediate_commits_are_gathered() {
        let repo = setup();
        let early = comment(REVIEWER, "200", "on the first commit");
        append(&repo, "c1", &early);

        let review = get_review(&repo);
        assert_eq!(review.comments.len(), 1);
        assert_eq!(review.comments[0].commits, vec!["c1"]);
    }

    #[test]
    fn test_ci_reports_keep_latest_per_agent() {
        let repo = setup();
        for line in [
            r#"{"timestamp":"100","url":"https://ci/1","agent":"builder","status":"pending"}"#,
            r#"{"timestamp":"200","url":"https://ci/2","agent":"builder","status":"success"}"#,
            r#"{"timestamp":"150","url":"https://ci/3","agent":"linter","status":"failure"}"#,
            r#"{"timestamp":"120","url":"https://analysis"}"#,
        ] {
            repo.append_note(ANALYSES_REF, "c2", line).unwrap();
        }

        let review = get_review(&repo);
        assert_eq!(review.analyses.len(), 1);
        assert_eq!(review.ci_reports.len(), 2);
        let builder = review
            .ci_reports
            .iter()
            .find(|r| r.agent == "builder")
            .unwrap();
        assert_eq!(builder.url, "https://ci/2");
    }

    #[test]
    fn test_get_current_uses_head_symbolic_ref() {
        let repo = setup();
        let review = get_current(&repo, &Config::default()).unwrap().unwrap();
        assert_eq!(review.revision, "c2");

        repo.set_head("refs/heads/main");
        assert!(get_current(&repo, &Config::default()).unwrap().is_none());
    }

    #[test]
    fn test_list_open_excludes_closed_states() {
        let repo = setup();

        // A second, abandoned review on c1.
        let mut request = Request::new(AUTHOR, "refs/heads/other", "", "dropped");
        request.timestamp = "100".to_string();
        add_request(&repo, "c1", &request).unwrap();

        let all = list_all(&repo, &Config::default()).unwrap();
        assert_eq!(all.len(), 2);
        let open = list_open(&repo, &Config::default()).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].revision, "c2");
    }

    #[test]
    fn test_detached_comments_filter_by_path() {
        let repo = setup();
        let mut on_file = comment(REVIEWER, "200", "about this file");
        on_file.location = Some(Location {
            commit: "base".to_string(),
            path: "README.md".to_string(),
            range: None,
        });
        append(&repo, "base", &on_file);
        let mut elsewhere = comment(REVIEWER, "210", "different file");
        elsewhere.location = Some(Location {
            commit: "base".to_string(),
            path: "src/lib.rs".to_string(),
            range: None,
        });
        append(&repo, "base", &elsewhere);

        let threads = get_detached_comments(&repo, "README.md").unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].comment.description, "about this file");
    }

    #[test]
    fn test_add_comment_lands_on_head() {
        let repo = setup();
        let review = get_review(&repo);
        let note = comment(REVIEWER, "200", "via the api");
        add_comment(&repo, &review, &note).unwrap();
        assert_eq!(repo.notes(DISCUSS_REF, "c2").unwrap().len(), 1);
    }

    #[test]
    fn test_head_follows_live_review_ref() {
        let repo = setup();
        repo.add_commit("c3", &["c2"], 40);
        repo.set_ref("refs/heads/feature", "c3");

        let review = get_review(&repo);
        assert_eq!(review.revision, "c2");
        assert_eq!(review.head, "c3");
    }
}
