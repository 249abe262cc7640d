//! CLI command definitions.

use clap::{Parser, Subcommand};

pub mod commands;

/// Distributed code review stored in git notes
#[derive(Parser, Debug)]
#[command(name = "notecrit")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List reviews
    List {
        /// Include submitted and abandoned reviews
        #[arg(short, long)]
        all: bool,
    },

    /// Show a review in full
    Show {
        /// Review id (defaults to the current branch's review)
        review_id: Option<String>,
    },

    /// Request a review of a branch
    Request {
        /// Ref to review (defaults to the current branch)
        #[arg(long)]
        source: Option<String>,

        /// Ref the change should merge into
        #[arg(long, default_value = "refs/heads/main")]
        target: String,

        /// Description of the change
        #[arg(short, long, default_value = "")]
        message: String,

        /// Comma-separated reviewer emails
        #[arg(long, value_delimiter = ',')]
        reviewers: Vec<String>,

        /// Ancestor commit to diff against instead of the merge base
        #[arg(long)]
        base: Option<String>,

        /// Human-readable name for the review
        #[arg(long)]
        alias: Option<String>,

        /// Sign the request with the configured key
        #[arg(short = 'S', long)]
        sign: bool,
    },

    /// Comment on a review, or on a bare path with --detached
    Comment {
        /// Review id (or, with --detached, a ref; defaults to the current
        /// branch's review / HEAD)
        review_id: Option<String>,

        /// Comment text
        #[arg(short, long)]
        message: Option<String>,

        /// Hash of the comment being replied to
        #[arg(short, long)]
        parent: Option<String>,

        /// File being commented upon
        #[arg(short, long)]
        file: Option<String>,

        /// Location in the file: START_LINE[+START_COL][:END_LINE[+END_COL]]
        #[arg(short, long)]
        line: Option<String>,

        /// "Looks good to me": express approval
        #[arg(long, conflicts_with = "nmw")]
        lgtm: bool,

        /// "Needs more work": express disapproval
        #[arg(long)]
        nmw: bool,

        /// Comment on a path without attaching to a review
        #[arg(short, long)]
        detached: bool,

        /// Sign the comment with the configured key
        #[arg(short = 'S', long)]
        sign: bool,

        /// RFC 3339 timestamp to use instead of now
        #[arg(long)]
        date: Option<String>,
    },

    /// Accept a review (an LGTM comment on its head commit)
    Accept {
        /// Review id (defaults to the current branch's review)
        review_id: Option<String>,

        /// Message to attach to the acceptance
        #[arg(short, long)]
        message: Option<String>,

        /// Sign the acceptance with the configured key
        #[arg(short = 'S', long)]
        sign: bool,

        /// RFC 3339 timestamp to use instead of now
        #[arg(long)]
        date: Option<String>,
    },

    /// Reject a review (an NMW comment on its head commit)
    Reject {
        /// Review id (defaults to the current branch's review)
        review_id: Option<String>,

        /// Message explaining what needs more work
        #[arg(short, long)]
        message: Option<String>,

        /// Sign the rejection with the configured key
        #[arg(short = 'S', long)]
        sign: bool,

        /// RFC 3339 timestamp to use instead of now
        #[arg(long)]
        date: Option<String>,
    },

    /// Abandon a review
    Abandon {
        /// Review id (defaults to the current branch's review)
        review_id: Option<String>,

        /// Reason for abandoning
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Show detached comment threads for a file
    Comments {
        /// Repository-relative file path
        path: String,
    },

    /// Fetch and merge review data from a remote
    Pull {
        /// Remote name (defaults to origin)
        remote: Option<String>,
    },

    /// Mirror local review data to a remote
    Push {
        /// Remote name (defaults to origin)
        remote: Option<String>,
    },
}
