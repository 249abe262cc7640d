//! Typed error kinds for notecrit operations.
//!
//! Record-level problems (a malformed note line, a bad signature) are *not*
//! errors at this level: the aggregator collects them onto the `Review` so a
//! single bad line cannot hide the rest of the data. The kinds here are the
//! ones that abort an operation.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can abort a notecrit operation.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad flags, bad line spec, unknown parent hash, and similar user input
    /// problems. Never mutates the repository.
    #[error("{0}")]
    Validation(String),

    /// Unknown review id, unknown ref, or no current review.
    #[error("{0}")]
    NotFound(String),

    /// A store-level decode failure (line-level parse errors are collected
    /// on the `Review` instead).
    #[error("malformed record: {0}")]
    Parse(String),

    /// Signing failed. Verification failures never raise this; they mark the
    /// record and aggregation continues.
    #[error("signature operation failed: {0}")]
    Signature(String),

    /// A git subprocess failed; carries the command context verbatim.
    #[error(transparent)]
    RepoIo(#[from] anyhow::Error),

    /// A compare-and-swap ref update lost a race, even after one retry with
    /// a re-read old value.
    #[error("ref update lost a race on {reference}: {detail}")]
    Conflict { reference: String, detail: String },

    /// A push was rejected (non-fast-forward or permission).
    #[error("push to '{remote}' was rejected: {detail}\n  hint: run 'notecrit pull {remote}' first, then push again")]
    NetworkPush { remote: String, detail: String },
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Process exit code for this error: 1 for user errors, 2 for
    /// repository/IO failures.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) | Self::NotFound(_) => 1,
            _ => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::validation("bad flag").exit_code(), 1);
        assert_eq!(Error::not_found("no such review").exit_code(), 1);
        assert_eq!(Error::Parse("junk".into()).exit_code(), 2);
        assert_eq!(
            Error::NetworkPush {
                remote: "origin".into(),
                detail: "non-fast-forward".into(),
            }
            .exit_code(),
            2
        );
    }
}
