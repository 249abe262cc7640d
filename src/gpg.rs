//! Detached signing and verification of record bytes.
//!
//! The signed payload is always the record's canonical encoding with the
//! `signature` field removed, so verification is independent of how the
//! record was stored. Wraps the `gpg` command-line tool.

use std::io::Write;
use std::process::{Command, Stdio};

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::records::{self, Signed};

fn run_gpg(args: &[&str], input: &[u8]) -> Result<(bool, Vec<u8>, String)> {
    let mut child = Command::new("gpg")
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Signature(format!("failed to run gpg: {e}")))?;

    child
        .stdin
        .take()
        .ok_or_else(|| Error::Signature("gpg stdin unavailable".to_string()))?
        .write_all(input)
        .map_err(|e| Error::Signature(format!("failed writing to gpg: {e}")))?;

    let output = child
        .wait_with_output()
        .map_err(|e| Error::Signature(format!("failed waiting for gpg: {e}")))?;
    Ok((
        output.status.success(),
        output.stdout,
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}

/// Sign a record with the given key id, embedding the armored signature.
///
/// Fatal on failure: a record the user asked to sign is never appended
/// unsigned.
pub fn sign<T: Serialize + Signed>(key: &str, record: &mut T) -> Result<()> {
    let payload = records::signable_json(record)?;
    let (ok, stdout, stderr) = run_gpg(
        &["--armor", "--detach-sign", "--local-user", key, "--output", "-"],
        payload.as_bytes(),
    )?;
    if !ok {
        return Err(Error::Signature(format!(
            "gpg refused to sign: {}",
            stderr.trim()
        )));
    }
    let signature = String::from_utf8(stdout)
        .map_err(|_| Error::Signature("gpg emitted a non-UTF-8 signature".to_string()))?;
    record.set_signature(signature.trim_end().to_string());
    Ok(())
}

/// Verify a record's embedded signature against its canonical bytes.
///
/// Returns `Ok(true)` for unsigned records and for signatures that verify,
/// `Ok(false)` for signatures that do not. `Err` only when the signature
/// tool itself cannot run.
pub fn verify<T: Serialize + Signed>(record: &T) -> Result<bool> {
    let signature = record.signature();
    if signature.is_empty() {
        return Ok(true);
    }
    let payload = records::signable_json(record)?;

    let mut sig_file = NamedTempFile::new()
        .map_err(|e| Error::Signature(format!("failed to create temp file: {e}")))?;
    sig_file
        .write_all(signature.as_bytes())
        .and_then(|()| sig_file.flush())
        .map_err(|e| Error::Signature(format!("failed to write signature: {e}")))?;
    let sig_path = sig_file
        .path()
        .to_str()
        .ok_or_else(|| Error::Signature("non-UTF-8 temp path".to_string()))?
        .to_string();

    let (ok, _, _) = run_gpg(&["--verify", &sig_path, "-"], payload.as_bytes())?;
    Ok(ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Comment;

    #[test]
    fn test_unsigned_records_verify_trivially() {
        let comment = Comment::new("a@b.c", "no signature here");
        assert!(verify(&comment).unwrap());
    }
}
