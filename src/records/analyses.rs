//! Analysis and continuous-integration result records.
//!
//! Both kinds share the analyses namespace; a record with a `status` field
//! is a CI report, anything else is an analysis link.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// A pointer to externally hosted static-analysis results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysesNote {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// Outcome reported by a CI agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiStatus {
    Success,
    Failure,
    Pending,
}

/// A build/test result reported by a CI agent for one revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiReport {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CiStatus>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// One parsed line from the analyses namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysesRecord {
    Analyses(AnalysesNote),
    Ci(CiReport),
}

impl AnalysesRecord {
    /// Parse a single annotation line, classifying by `status` presence.
    pub fn from_line(line: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(line).map_err(|e| Error::Parse(format!("analyses: {e}")))?;
        if value.get("status").is_some() {
            let report =
                serde_json::from_value(value).map_err(|e| Error::Parse(format!("ci: {e}")))?;
            Ok(Self::Ci(report))
        } else {
            let note = serde_json::from_value(value)
                .map_err(|e| Error::Parse(format!("analyses: {e}")))?;
            Ok(Self::Analyses(note))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifies_by_status_presence() {
        let record = AnalysesRecord::from_line(
            r#"{"timestamp":"10","url":"https://ci/run/1","agent":"builder","status":"failure"}"#,
        )
        .unwrap();
        match record {
            AnalysesRecord::Ci(report) => {
                assert_eq!(report.agent, "builder");
                assert_eq!(report.status, Some(CiStatus::Failure));
            }
            AnalysesRecord::Analyses(_) => panic!("expected a CI report"),
        }

        let record = AnalysesRecord::from_line(r#"{"timestamp":"10","url":"https://lint"}"#).unwrap();
        assert!(matches!(record, AnalysesRecord::Analyses(_)));
    }

    #[test]
    fn test_rejects_unknown_status() {
        assert!(AnalysesRecord::from_line(r#"{"timestamp":"1","status":"exploded"}"#).is_err());
        assert!(AnalysesRecord::from_line("not json").is_err());
    }
}
