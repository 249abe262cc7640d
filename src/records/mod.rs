//! Record schema and canonical codec.
//!
//! One record per line of an annotation blob. Parsing is permissive: unknown
//! fields are captured and survive round-trips, and empty strings are
//! interchangeable with absent fields. The *canonical* form used for hashing
//! and signing is compact JSON with lexicographically sorted field names.

pub mod analyses;
pub mod comment;
pub mod request;

pub use analyses::{AnalysesNote, AnalysesRecord, CiReport, CiStatus};
pub use comment::{Comment, Location, Range};
pub use request::Request;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// Records that can carry a detached signature over their canonical bytes.
pub trait Signed {
    fn signature(&self) -> &str;
    fn set_signature(&mut self, signature: String);
}

/// Canonical encoding of a record: compact JSON, sorted field names,
/// signature included. Two records with the same canonical bytes are the
/// same record.
pub fn canonical_json<T: Serialize>(record: &T) -> Result<String> {
    let value = serde_json::to_value(record).map_err(|e| Error::Parse(e.to_string()))?;
    serde_json::to_string(&value).map_err(|e| Error::Parse(e.to_string()))
}

/// Canonical encoding with the `signature` field removed: the exact bytes
/// that get signed and verified.
pub fn signable_json<T: Serialize>(record: &T) -> Result<String> {
    let mut value = serde_json::to_value(record).map_err(|e| Error::Parse(e.to_string()))?;
    if let Some(object) = value.as_object_mut() {
        object.remove("signature");
    }
    serde_json::to_string(&value).map_err(|e| Error::Parse(e.to_string()))
}

/// Content-addressed hash of raw bytes, in the object store's blob form
/// (`"blob <len>\0"` header followed by the content).
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", bytes.len()).as_bytes());
    hasher.update(bytes);
    hex(&hasher.finalize())
}

/// Identity hash of a record: the content hash of its canonical bytes.
pub fn record_hash<T: Serialize>(record: &T) -> Result<String> {
    Ok(content_hash(canonical_json(record)?.as_bytes()))
}

/// Hash of the bytes that a signature covers (canonical form sans
/// signature). Used to break timestamp ties deterministically.
pub fn signable_hash<T: Serialize>(record: &T) -> Result<String> {
    Ok(content_hash(signable_json(record)?.as_bytes()))
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Current time as a seconds-since-epoch decimal string.
#[must_use]
pub fn now_timestamp() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    secs.to_string()
}

/// Numeric value of a record timestamp. Unparseable values sort first.
#[must_use]
pub fn timestamp_seconds(timestamp: &str) -> i64 {
    timestamp.trim().parse().unwrap_or(0)
}

/// Parse a user-supplied RFC 3339 date into the record timestamp format.
pub fn parse_date_arg(date: &str) -> Result<String> {
    let parsed = chrono::DateTime::parse_from_rfc3339(date)
        .map_err(|e| Error::validation(format!("invalid --date '{date}': {e}")))?;
    Ok(parsed.timestamp().to_string())
}

/// True when the name is usable as a fully qualified git ref.
#[must_use]
pub fn is_well_formed_ref(name: &str) -> bool {
    const FORBIDDEN: &[char] = &['~', '^', ':', '?', '*', '[', '\\'];
    name.starts_with("refs/")
        && !name.ends_with('/')
        && !name.contains("..")
        && !name.contains("//")
        && name
            .chars()
            .all(|c| !c.is_whitespace() && !c.is_control() && !FORBIDDEN.contains(&c))
}
