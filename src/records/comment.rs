//! Comment records and their source locations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::records::{now_timestamp, Signed};
use crate::scm::Repo;

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// A line/column span inside a file.
///
/// The flag syntax is `START_LINE[+START_COL][:END_LINE[+END_COL]]`, so
/// `2+5:7+4` spans from line 2 column 5 through line 7 column 4. Zero
/// components are "unset" and stay off the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Range {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub start_line: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub start_column: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub end_line: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub end_column: u32,
}

fn parse_point(spec: &str) -> Result<(u32, u32)> {
    let bad = || Error::validation(format!("invalid line spec component '{spec}'"));
    let (line, column) = match spec.split_once('+') {
        Some((line, column)) => (line, Some(column)),
        None => (spec, None),
    };
    let line = line.parse().map_err(|_| bad())?;
    let column = match column {
        Some(column) => column.parse().map_err(|_| bad())?,
        None => 0,
    };
    Ok((line, column))
}

impl FromStr for Range {
    type Err = Error;

    fn from_str(spec: &str) -> Result<Self> {
        let (start, end) = match spec.split_once(':') {
            Some((start, end)) => (start, Some(end)),
            None => (spec, None),
        };
        let (start_line, start_column) = parse_point(start)?;
        let (end_line, end_column) = match end {
            Some(end) => parse_point(end)?,
            None => (0, 0),
        };
        if start_line == 0 {
            return Err(Error::validation(format!(
                "invalid line spec '{spec}': lines are 1-based"
            )));
        }
        if end_line != 0 && end_line < start_line {
            return Err(Error::validation(format!(
                "invalid line spec '{spec}': end before start"
            )));
        }
        Ok(Self {
            start_line,
            start_column,
            end_line,
            end_column,
        })
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start_line)?;
        if self.start_column != 0 {
            write!(f, "+{}", self.start_column)?;
        }
        if self.end_line != 0 {
            write!(f, ":{}", self.end_line)?;
            if self.end_column != 0 {
                write!(f, "+{}", self.end_column)?;
            }
        }
        Ok(())
    }
}

/// Where a comment applies: a commit, optionally a file, optionally a span.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

impl Location {
    /// Validate that the location names real repository state.
    pub fn check(&self, repo: &dyn Repo) -> Result<()> {
        if !self.commit.is_empty() {
            repo.verify_commit(&self.commit)?;
        }
        if !self.path.is_empty() {
            if self.commit.is_empty() {
                return Err(Error::validation(
                    "a file location requires a commit".to_string(),
                ));
            }
            if !repo.file_exists_at(&self.commit, &self.path)? {
                return Err(Error::validation(format!(
                    "no file '{}' at commit {}",
                    self.path, self.commit
                )));
            }
        }
        Ok(())
    }
}

/// A single comment event.
///
/// Comments are immutable once hashed: editing is a reply by the same author
/// at the same location, and deletion is impossible by design.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// Seconds since the epoch, as a decimal string.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// Identity hash of the comment this one replies to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent: String,
    /// May be empty when the comment is only an LGTM / NMW vote.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Tri-state vote: absent = plain comment, true = LGTM, false = NMW.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<bool>,
    /// Armored detached signature over the canonical bytes sans this field.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Comment {
    /// Build a new comment stamped with the current time.
    #[must_use]
    pub fn new(author: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            timestamp: now_timestamp(),
            author: author.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    /// Parse a single annotation line.
    pub fn from_line(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| Error::Parse(format!("comment: {e}")))
    }

    /// Encode as a single annotation line.
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Parse(e.to_string()))
    }
}

impl Signed for Comment {
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
    fn test_range_parse_full() {
        let range: Range = "2+5:7+4".parse().unwrap();
        assert_eq!(
            range,
            Range {
                start_line: 2,
                start_column: 5,
                end_line: 7,
                end_column: 4,
            }
        );
        assert_eq!(range.to_string(), "2+5:7+4");
    }

    #[test]
    fn test_range_parse_minimal() {
        let range: Range = "42".parse().unwrap();
        assert_eq!(range.start_line, 42);
        assert_eq!(range.start_column, 0);
        assert_eq!(range.end_line, 0);
        assert_eq!(range.to_string(), "42");
    }

    #[test]
    fn test_range_parse_line_span() {
        let range: Range = "10:20".parse().unwrap();
        assert_eq!((range.start_line, range.end_line), (10, 20));
    }

    #[test]
    fn test_range_parse_rejects_garbage() {
        assert!("".parse::<Range>().is_err());
        assert!("abc".parse::<Range>().is_err());
        assert!("0".parse::<Range>().is_err());
        assert!("7:3".parse::<Range>().is_err());
        assert!("1+x".parse::<Range>().is_err());
    }

    #[test]
    fn test_range_wire_format_omits_zeroes() {
        let range: Range = "3".parse().unwrap();
        let json = serde_json::to_string(&range).unwrap();
        assert_eq!(json, r#"{"startLine":3}"#);
    }

    #[test]
    fn test_comment_line_round_trip() {
        let mut comment = Comment::new("alice@example.com", "needs a test");
        comment.location = Some(Location {
            commit: "c1".to_string(),
            path: "src/lib.rs".to_string(),
            range: Some("12:14".parse().unwrap()),
        });
        comment.resolved = Some(false);
        let line = comment.to_line().unwrap();
        assert_eq!(Comment::from_line(&line).unwrap(), comment);
    }

    #[test]
    fn test_vote_only_comment_serializes_sparsely() {
        let mut comment = Comment::new("alice@example.com", "");
        comment.timestamp = "5".to_string();
        comment.resolved = Some(true);
        let line = comment.to_line().unwrap();
        assert_eq!(
            line,
            r#"{"timestamp":"5","author":"alice@example.com","resolved":true}"#
        );
    }
}
