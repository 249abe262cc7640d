//! Command implementations.

use serde::Serialize;
use serde_json::json;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::gpg;
use crate::output::Formatter;
use crate::records::{self, Comment, Location, Range, Request, Signed};
use crate::review::{self, Review};
use crate::scm::{Repo, ARCHIVE_REF};
use crate::sync;

/// Load a review by id, or the current branch's review when no id is given.
fn load_review(repo: &dyn Repo, config: &Config, id: Option<&str>) -> Result<Review> {
    let review = match id {
        Some(id) => review::get(repo, config, id)?,
        None => review::get_current(repo, config)?,
    };
    review.ok_or_else(|| match id {
        Some(id) => Error::not_found(format!("no review found for '{id}'")),
        None => Error::not_found("no review found for the current branch".to_string()),
    })
}

/// Sign a record with the key from git config, failing when none is set.
fn sign_with_configured_key<T: Serialize + Signed>(
    repo: &dyn Repo,
    record: &mut T,
) -> Result<()> {
    let key = repo.signing_key()?.ok_or_else(|| {
        Error::Signature("no signing key configured (set user.signingkey)".to_string())
    })?;
    gpg::sign(&key, record)
}

fn timestamp_from(date: Option<&str>) -> Result<String> {
    match date {
        Some(date) => records::parse_date_arg(date),
        None => Ok(records::now_timestamp()),
    }
}

pub fn run_list(repo: &dyn Repo, config: &Config, all: bool, formatter: Formatter) -> Result<()> {
    let summaries = if all {
        review::list_all(repo, config)?
    } else {
        review::list_open(repo, config)?
    };
    formatter.print_summaries(&summaries)
}

pub fn run_show(
    repo: &dyn Repo,
    config: &Config,
    review_id: Option<&str>,
    formatter: Formatter,
) -> Result<()> {
    let review = load_review(repo, config, review_id)?;
    formatter.print_review(&review)
}

pub struct RequestOpts {
    pub source: Option<String>,
    pub target: String,
    pub message: String,
    pub reviewers: Vec<String>,
    pub base: Option<String>,
    pub alias: Option<String>,
    pub sign: bool,
}

pub fn run_request(
    repo: &dyn Repo,
    opts: RequestOpts,
    formatter: Formatter,
) -> Result<()> {
    let source = match opts.source {
        Some(source) => source,
        None => repo.head_ref()?,
    };
    if !repo.has_ref(&source)? {
        return Err(Error::not_found(format!("unknown ref '{source}'")));
    }
    let revision = repo.resolve_ref(&source)?;

    let mut request = Request::new(repo.user_email()?, &source, &opts.target, opts.message);
    request.set_reviewers(opts.reviewers);
    if let Some(base) = opts.base {
        repo.verify_commit(&base)?;
        request.base_commit = base;
    }
    if let Some(alias) = opts.alias {
        request.alias = alias;
    }
    if opts.sign {
        sign_with_configured_key(repo, &mut request)?;
    }

    review::add_request(repo, &revision, &request)?;
    // The reviewed history must outlive the branch.
    repo.archive_ref(&source, ARCHIVE_REF)?;

    formatter.confirm(
        &format!("requested review of {source} ({revision})"),
        &json!({
            "revision": revision,
            "reviewRef": request.review_ref,
            "targetRef": request.target_ref,
            "reviewers": request.reviewers,
        }),
    )
}

pub struct CommentOpts {
    pub review_id: Option<String>,
    pub message: Option<String>,
    pub parent: Option<String>,
    pub file: Option<String>,
    pub line: Option<String>,
    pub lgtm: bool,
    pub nmw: bool,
    pub detached: bool,
    pub sign: bool,
    pub date: Option<String>,
}

pub fn run_comment(
    repo: &dyn Repo,
    config: &Config,
    opts: CommentOpts,
    formatter: Formatter,
) -> Result<()> {
    if opts.lgtm && opts.nmw {
        return Err(Error::validation(
            "--lgtm and --nmw cannot be combined".to_string(),
        ));
    }
    let resolved = if opts.lgtm {
        Some(true)
    } else if opts.nmw {
        Some(false)
    } else {
        None
    };
    let message = opts.message.unwrap_or_default();
    if message.is_empty() && resolved.is_none() {
        return Err(Error::validation(
            "no comment text; pass --message (or --lgtm / --nmw)".to_string(),
        ));
    }

    let range = match &opts.line {
        Some(spec) => {
            if opts.file.is_none() {
                return Err(Error::validation(
                    "--line requires --file".to_string(),
                ));
            }
            Some(spec.parse::<Range>()?)
        }
        None => None,
    };

    let mut comment = Comment::new(repo.user_email()?, message);
    comment.timestamp = timestamp_from(opts.date.as_deref())?;
    comment.resolved = resolved;
    comment.parent = opts.parent.clone().unwrap_or_default();

    if opts.detached {
        let path = opts.file.clone().ok_or_else(|| {
            Error::validation("--detached requires --file".to_string())
        })?;
        let target = opts.review_id.as_deref().unwrap_or("HEAD");
        let commit = repo.resolve_ref_commit(target)?;

        if let Some(parent) = &opts.parent {
            let threads = review::get_detached_comments(repo, &path)?;
            if !threads.iter().any(|thread| thread.contains(parent)) {
                return Err(Error::validation(
                    "there is no matching parent comment".to_string(),
                ));
            }
        }

        let location = Location {
            commit,
            path,
            range,
        };
        location.check(repo)?;
        comment.location = Some(location);
        if opts.sign {
            sign_with_configured_key(repo, &mut comment)?;
        }
        review::add_detached_comment(repo, target, &comment)?;
        let hash = records::record_hash(&comment)?;
        return formatter.confirm(
            &format!("added detached comment {hash}"),
            &json!({ "hash": hash }),
        );
    }

    let review = load_review(repo, config, opts.review_id.as_deref())?;
    if let Some(parent) = &opts.parent {
        if !review.has_comment(parent) {
            return Err(Error::validation(
                "there is no matching parent comment".to_string(),
            ));
        }
    }
    let location = Location {
        commit: review.head.clone(),
        path: opts.file.clone().unwrap_or_default(),
        range,
    };
    location.check(repo)?;
    comment.location = Some(location);
    if opts.sign {
        sign_with_configured_key(repo, &mut comment)?;
    }
    review::add_comment(repo, &review, &comment)?;
    let hash = records::record_hash(&comment)?;
    formatter.confirm(
        &format!("added comment {hash}"),
        &json!({ "hash": hash, "revision": review.revision }),
    )
}

/// Shared body of `accept` and `reject`: a vote comment on the review head.
#[allow(clippy::too_many_arguments)]
fn vote_on_review(
    repo: &dyn Repo,
    config: &Config,
    review_id: Option<&str>,
    message: Option<String>,
    resolved: bool,
    sign: bool,
    date: Option<&str>,
    formatter: Formatter,
) -> Result<()> {
    let review = load_review(repo, config, review_id)?;
    let mut comment = Comment::new(repo.user_email()?, message.unwrap_or_default());
    comment.timestamp = timestamp_from(date)?;
    comment.resolved = Some(resolved);
    comment.location = Some(Location {
        commit: review.head.clone(),
        ..Location::default()
    });
    if sign {
        sign_with_configured_key(repo, &mut comment)?;
    }
    review::add_comment(repo, &review, &comment)?;

    let verb = if resolved { "accepted" } else { "rejected" };
    formatter.confirm(
        &format!("{verb} review {}", review.revision),
        &json!({ "revision": review.revision, "resolved": resolved }),
    )
}

#[allow(clippy::too_many_arguments)]
pub fn run_accept(
    repo: &dyn Repo,
    config: &Config,
    review_id: Option<&str>,
    message: Option<String>,
    sign: bool,
    date: Option<&str>,
    formatter: Formatter,
) -> Result<()> {
    vote_on_review(repo, config, review_id, message, true, sign, date, formatter)
}

#[allow(clippy::too_many_arguments)]
pub fn run_reject(
    repo: &dyn Repo,
    config: &Config,
    review_id: Option<&str>,
    message: Option<String>,
    sign: bool,
    date: Option<&str>,
    formatter: Formatter,
) -> Result<()> {
    vote_on_review(repo, config, review_id, message, false, sign, date, formatter)
}

pub fn run_abandon(
    repo: &dyn Repo,
    config: &Config,
    review_id: Option<&str>,
    message: Option<String>,
    formatter: Formatter,
) -> Result<()> {
    let review = load_review(repo, config, review_id)?;
    let request = Request::new(
        repo.user_email()?,
        review.request.review_ref.clone(),
        "",
        message.unwrap_or_default(),
    );
    review::add_request(repo, &review.revision, &request)?;
    formatter.confirm(
        &format!("abandoned review {}", review.revision),
        &json!({ "revision": review.revision }),
    )
}

pub fn run_comments(repo: &dyn Repo, path: &str, formatter: Formatter) -> Result<()> {
    let threads = review::get_detached_comments(repo, path)?;
    formatter.print_threads(&threads)
}

pub fn run_pull(
    repo: &dyn Repo,
    config: &Config,
    remote: Option<&str>,
    formatter: Formatter,
) -> Result<()> {
    let remote = remote.unwrap_or(&config.default_remote);
    let changed = sync::pull(repo, remote)?;
    formatter.print_changed_reviews(&changed)
}

pub fn run_push(
    repo: &dyn Repo,
    config: &Config,
    remote: Option<&str>,
    formatter: Formatter,
) -> Result<()> {
    let remote = remote.unwrap_or(&config.default_remote);
    sync::push(repo, remote)?;
    formatter.confirm(
        &format!("pushed review data to {remote}"),
        &json!({ "remote": remote }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use crate::records::timestamp_seconds;
    use crate::review::Status;
    use crate::scm::testing::MemRepo;
    use crate::scm::{DISCUSS_REF, REQUESTS_REF};

    fn formatter() -> Formatter {
        Formatter::new(OutputFormat::Text)
    }

    fn setup() -> MemRepo {
        let repo = MemRepo::new();
        repo.add_commit("base", &[], 10);
        repo.add_commit("tip", &["base"], 20);
        repo.set_ref("refs/heads/main", "base");
        repo.set_ref("refs/heads/feature", "tip");
        repo.set_head("refs/heads/feature");
        repo
    }

    fn request_feature(repo: &MemRepo) {
        run_request(
            repo,
            RequestOpts {
                source: None,
                target: "refs/heads/main".to_string(),
                message: "Add feature".to_string(),
                reviewers: vec!["reviewer@example.com".to_string()],
                base: None,
                alias: None,
                sign: false,
            },
            formatter(),
        )
        .unwrap();
    }

    #[test]
    fn test_request_appends_and_archives() {
        let repo = setup();
        request_feature(&repo);

        assert_eq!(repo.notes(REQUESTS_REF, "tip").unwrap().len(), 1);
        let archive_tip = repo.resolve_ref(ARCHIVE_REF).unwrap();
        assert!(repo.is_ancestor("tip", &archive_tip).unwrap());
    }

    #[test]
    fn test_request_rejects_unknown_source() {
        let repo = setup();
        let result = run_request(
            &repo,
            RequestOpts {
                source: Some("refs/heads/nope".to_string()),
                target: "refs/heads/main".to_string(),
                message: String::new(),
                reviewers: Vec::new(),
                base: None,
                alias: None,
                sign: false,
            },
            formatter(),
        );
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(repo.all_notes(REQUESTS_REF).unwrap().is_empty());
    }

    #[test]
    fn test_comment_on_current_review() {
        let repo = setup();
        request_feature(&repo);

        run_comment(
            &repo,
            &Config::default(),
            CommentOpts {
                review_id: None,
                message: Some("a note".to_string()),
                parent: None,
                file: None,
                line: None,
                lgtm: false,
                nmw: false,
                detached: false,
                sign: false,
                date: Some("2024-01-01T00:00:00Z".to_string()),
            },
            formatter(),
        )
        .unwrap();

        let notes = repo.notes(DISCUSS_REF, "tip").unwrap();
        assert_eq!(notes.len(), 1);
        let comment = Comment::from_line(&notes[0]).unwrap();
        assert_eq!(comment.description, "a note");
        assert_eq!(timestamp_seconds(&comment.timestamp), 1_704_067_200);
        assert_eq!(comment.location.unwrap().commit, "tip");
    }

    #[test]
    fn test_comment_flag_validation() {
        let repo = setup();
        request_feature(&repo);
        let base_opts = |lgtm, nmw, message: Option<&str>| CommentOpts {
            review_id: None,
            message: message.map(str::to_string),
            parent: None,
            file: None,
            line: None,
            lgtm,
            nmw,
            detached: false,
            sign: false,
            date: None,
        };

        let conflicting = run_comment(
            &repo,
            &Config::default(),
            base_opts(true, true, Some("x")),
            formatter(),
        );
        assert!(matches!(conflicting, Err(Error::Validation(_))));

        let empty = run_comment(&repo, &Config::default(), base_opts(false, false, None), formatter());
        assert!(matches!(empty, Err(Error::Validation(_))));

        // No repository mutation happened.
        assert!(repo.all_notes(DISCUSS_REF).unwrap().is_empty());
    }

    #[test]
    fn test_comment_unknown_parent_rejected() {
        let repo = setup();
        request_feature(&repo);
        let result = run_comment(
            &repo,
            &Config::default(),
            CommentOpts {
                review_id: None,
                message: Some("reply".to_string()),
                parent: Some("deadbeef".to_string()),
                file: None,
                line: None,
                lgtm: false,
                nmw: false,
                detached: false,
                sign: false,
                date: None,
            },
            formatter(),
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_comment_with_file_checks_location() {
        let repo = setup();
        request_feature(&repo);
        let opts = |file: &str| CommentOpts {
            review_id: None,
            message: Some("about a line".to_string()),
            parent: None,
            file: Some(file.to_string()),
            line: Some("3:5".to_string()),
            lgtm: false,
            nmw: false,
            detached: false,
            sign: false,
            date: None,
        };

        let missing = run_comment(&repo, &Config::default(), opts("src/nope.rs"), formatter());
        assert!(matches!(missing, Err(Error::Validation(_))));

        repo.add_file("tip", "src/lib.rs");
        run_comment(&repo, &Config::default(), opts("src/lib.rs"), formatter()).unwrap();
        let notes = repo.notes(DISCUSS_REF, "tip").unwrap();
        let comment = Comment::from_line(&notes[0]).unwrap();
        let location = comment.location.unwrap();
        assert_eq!(location.path, "src/lib.rs");
        assert_eq!(location.range.unwrap().to_string(), "3:5");
    }

    #[test]
    fn test_accept_then_reject_flow() {
        let repo = setup();
        request_feature(&repo);
        repo.set_user_email("reviewer@example.com");

        run_accept(&repo, &Config::default(), None, None, false, None, formatter()).unwrap();
        let review = load_review(&repo, &Config::default(), Some("tip")).unwrap();
        assert_eq!(review.status, Status::Accepted);

        run_reject(
            &repo,
            &Config::default(),
            Some("tip"),
            Some("found a bug".to_string()),
            false,
            Some("2030-01-01T00:00:00Z"),
            formatter(),
        )
        .unwrap();
        let review = load_review(&repo, &Config::default(), Some("tip")).unwrap();
        assert_eq!(review.status, Status::Open);
        assert_eq!(review.resolved, Some(false));
    }

    #[test]
    fn test_abandon_marks_review() {
        let repo = setup();
        request_feature(&repo);
        run_abandon(&repo, &Config::default(), Some("tip"), None, formatter()).unwrap();
        let review = load_review(&repo, &Config::default(), Some("tip")).unwrap();
        assert_eq!(review.status, Status::Abandoned);
    }

    #[test]
    fn test_detached_comment_requires_file() {
        let repo = setup();
        let result = run_comment(
            &repo,
            &Config::default(),
            CommentOpts {
                review_id: None,
                message: Some("where does this go".to_string()),
                parent: None,
                file: None,
                line: None,
                lgtm: false,
                nmw: false,
                detached: true,
                sign: false,
                date: None,
            },
            formatter(),
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_detached_comment_round_trip() {
        let repo = setup();
        repo.add_file("tip", "README.md");
        run_comment(
            &repo,
            &Config::default(),
            CommentOpts {
                review_id: None,
                message: Some("docs nit".to_string()),
                parent: None,
                file: Some("README.md".to_string()),
                line: None,
                lgtm: false,
                nmw: false,
                detached: true,
                sign: false,
                date: None,
            },
            formatter(),
        )
        .unwrap();

        let threads = review::get_detached_comments(&repo, "README.md").unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].comment.description, "docs nit");
    }

    #[test]
    fn test_load_review_not_found() {
        let repo = setup();
        assert!(matches!(
            load_review(&repo, &Config::default(), Some("base")),
            Err(Error::NotFound(_))
        ));
        repo.set_head("refs/heads/main");
        assert!(matches!(
            load_review(&repo, &Config::default(), None),
            Err(Error::NotFound(_))
        ));
    }
}
