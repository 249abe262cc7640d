//! Review request records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::records::{is_well_formed_ref, now_timestamp, Signed};

/// A proposal to review (and eventually merge) one ref into another.
///
/// Requests live in the requests namespace, attached to the commit that was
/// the tip of `review_ref` when the request was made; that commit hash is the
/// review's id. A request with an empty `target_ref` records abandonment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Seconds since the epoch, as a decimal string.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    /// Fully qualified name of the ref being reviewed.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub review_ref: String,
    /// Fully qualified name of the ref to merge into; empty means abandoned.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_ref: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub requester: String,
    /// Ordered set of reviewer emails (duplicates collapsed, order kept).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reviewers: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Optional ancestor to diff against instead of the merge base.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_commit: String,
    /// Optional human-readable name for the review.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alias: String,
    /// Armored detached signature over the canonical bytes sans this field.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Request {
    /// Build a new request stamped with the current time.
    #[must_use]
    pub fn new(
        requester: impl Into<String>,
        review_ref: impl Into<String>,
        target_ref: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: now_timestamp(),
            review_ref: review_ref.into(),
            target_ref: target_ref.into(),
            requester: requester.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    /// Set the reviewer list, collapsing duplicates while preserving the
    /// first occurrence's position.
    pub fn set_reviewers<I, S>(&mut self, reviewers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reviewers.clear();
        for reviewer in reviewers {
            let reviewer = reviewer.into();
            if !reviewer.is_empty() && !self.reviewers.contains(&reviewer) {
                self.reviewers.push(reviewer);
            }
        }
    }

    /// An empty `target_ref` encodes abandonment of the review.
    #[must_use]
    pub fn is_abandonment(&self) -> bool {
        self.target_ref.is_empty()
    }

    /// Check the ref-name invariant: both refs must be empty or well formed.
    pub fn validate(&self) -> Result<()> {
        for name in [&self.review_ref, &self.target_ref] {
            if !name.is_empty() && !is_well_formed_ref(name) {
                return Err(Error::validation(format!("malformed ref name '{name}'")));
            }
        }
        Ok(())
    }

    /// Parse a single annotation line.
    pub fn from_line(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| Error::Parse(format!("request: {e}")))
    }

    /// Encode as a single annotation line.
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Parse(e.to_string()))
    }
}

impl Signed for Request {
    fn signature(&self) -> &str {
        &self.signature
    }

    fn set_signature(&mut self, signature: String) {
        self.signature = signature;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reviewers_deduplicate_in_order() {
        let mut request = Request::new("me@x.y", "refs/heads/f", "refs/heads/main", "");
        request.set_reviewers(["b@x.y", "a@x.y", "b@x.y", "", "c@x.y", "a@x.y"]);
        assert_eq!(request.reviewers, vec!["b@x.y", "a@x.y", "c@x.y"]);
    }

    #[test]
    fn test_abandonment() {
        let open = Request::new("me@x.y", "refs/heads/f", "refs/heads/main", "");
        assert!(!open.is_abandonment());
        let gone = Request::new("me@x.y", "refs/heads/f", "", "");
        assert!(gone.is_abandonment());
        gone.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_malformed_refs() {
        let mut request = Request::new("me@x.y", "feature", "refs/heads/main", "");
        assert!(request.validate().is_err());
        request.review_ref = "refs/heads/feature".to_string();
        request.validate().unwrap();
        request.target_ref = "refs/heads/a b".to_string();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_line_round_trip() {
        let mut request = Request::new("me@x.y", "refs/heads/f", "refs/heads/main", "Add thing");
        request.set_reviewers(["r@x.y"]);
        request.base_commit = "0123456789012345678901234567890123456789".to_string();
        let line = request.to_line().unwrap();
        let parsed = Request::from_line(&line).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_from_line_rejects_junk() {
        assert!(Request::from_line("not json").is_err());
    }
}
