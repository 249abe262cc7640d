//! Git-backed implementation of the repository port.
//!
//! Every operation shells out to the `git` command-line tool. Batch reads
//! (`cat-file --batch*`) keep the annotation scan at a constant number of
//! subprocess invocations regardless of how many reviews the repo holds.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{bail, Context};
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::scm::{
    local_devtools_ref, local_notes_ref, remote_devtools_ref, remote_notes_ref, validate_anchor,
    CommitDetails, ObjectType, Repo,
};

#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
}

impl GitRepo {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_git(&self, args: &[&str]) -> anyhow::Result<String> {
        let output = Command::new("git")
            .current_dir(&self.root)
            .args(args)
            .output()
            .with_context(|| {
                if let Err(e) = which::which("git") {
                    format!("git command not found. Please install git: {e}")
                } else {
                    format!("Failed to execute git command: {args:?}")
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "git {} failed with status {}: {}",
                args.first().copied().unwrap_or(""),
                output.status,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8(output.stdout).context("git output was not valid UTF-8")?;
        Ok(stdout.trim_end_matches('\n').to_string())
    }

    /// Like `run_git` but a non-zero exit is data, not an error.
    fn run_git_raw(&self, args: &[&str]) -> anyhow::Result<(bool, String, String)> {
        let output = Command::new("git")
            .current_dir(&self.root)
            .args(args)
            .output()
            .with_context(|| format!("Failed to execute git command: {args:?}"))?;
        Ok((
            output.status.success(),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }

    fn run_git_with_stdin(&self, args: &[&str], input: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut child = Command::new("git")
            .current_dir(&self.root)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn git command: {args:?}"))?;

        child
            .stdin
            .take()
            .context("child stdin unavailable")?
            .write_all(input)
            .context("failed writing to git stdin")?;

        let output = child
            .wait_with_output()
            .with_context(|| format!("Failed waiting for git command: {args:?}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {args:?} failed: {}", stderr.trim());
        }
        Ok(output.stdout)
    }

    /// All refs matching a `<prefix>/*` pattern, mapped to their hashes.
    fn ref_hashes(&self, pattern: &str) -> anyhow::Result<BTreeMap<String, String>> {
        let Some(prefix) = pattern.strip_suffix('*') else {
            bail!("unsupported ref pattern {pattern:?}");
        };
        let (ok, stdout, _) = self.run_git_raw(&["show-ref"])?;
        if !ok {
            return Ok(BTreeMap::new());
        }
        let mut refs = BTreeMap::new();
        for line in stdout.lines() {
            let Some((hash, name)) = line.split_once(' ') else {
                bail!("unexpected line in show-ref output: {line:?}");
            };
            if name.starts_with(prefix) {
                refs.insert(name.to_string(), hash.to_string());
            }
        }
        Ok(refs)
    }

    /// Merge a fetched remote-tracking archive into its local ref: create,
    /// fast-forward, or make a two-parent merge commit. One CAS retry.
    fn merge_one_archive(&self, local: &str, remote_ref: &str) -> Result<()> {
        let remote_hash = self.resolve_ref(remote_ref)?;
        for attempt in 0..2 {
            if !self.has_ref(local)? {
                self.update_ref(local, &remote_hash, None)?;
                return Ok(());
            }
            let local_hash = self.resolve_ref(local)?;
            if self.is_ancestor(&remote_hash, &local_hash)? {
                return Ok(());
            }
            let result = if self.is_ancestor(&local_hash, &remote_hash)? {
                self.update_ref(local, &remote_hash, Some(&local_hash))
            } else {
                let tree = self.commit_details(remote_ref)?.tree;
                let merged = self.create_commit(
                    &tree,
                    &[remote_hash.clone(), local_hash.clone()],
                    "Merge local and remote archives",
                )?;
                self.update_ref(local, &merged, Some(&local_hash))
            };
            match result {
                Ok(()) => return Ok(()),
                Err(Error::Conflict { .. }) if attempt == 0 => {
                    debug!(local, "archive ref moved during merge; retrying once");
                }
                Err(err) => return Err(err),
            }
        }
        Err(Error::Conflict {
            reference: local.to_string(),
            detail: "archive ref kept moving".to_string(),
        })
    }
}

/// Locate the repository root above `start_path`, if any.
#[must_use]
pub fn detect_git_root(start_path: &Path) -> Option<PathBuf> {
    let output = Command::new("git")
        .current_dir(start_path)
        .args(["rev-parse", "--show-toplevel"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8(output.stdout).ok()?;
    let root = stdout.trim();
    if root.is_empty() {
        None
    } else {
        Some(PathBuf::from(root))
    }
}

impl Repo for GitRepo {
    fn user_email(&self) -> Result<String> {
        Ok(self
            .run_git(&["config", "user.email"])
            .context("user.email is not configured")?)
    }

    fn signing_key(&self) -> Result<Option<String>> {
        self.config_value("user.signingkey")
    }

    fn config_value(&self, key: &str) -> Result<Option<String>> {
        let (ok, stdout, _) = self.run_git_raw(&["config", "--get", key])?;
        if !ok {
            return Ok(None);
        }
        let value = stdout.trim().to_string();
        Ok(if value.is_empty() { None } else { Some(value) })
    }

    fn state_fingerprint(&self) -> Result<String> {
        // An empty repo has no refs; hash the empty summary rather than fail.
        let (_, stdout, _) = self.run_git_raw(&["show-ref"])?;
        let mut hasher = Sha1::new();
        hasher.update(stdout.as_bytes());
        Ok(crate::records::hex(&hasher.finalize()))
    }

    fn head_ref(&self) -> Result<String> {
        Ok(self
            .run_git(&["symbolic-ref", "HEAD"])
            .context("HEAD is not a symbolic ref")?)
    }

    fn has_ref(&self, name: &str) -> Result<bool> {
        validate_anchor(name)?;
        let (ok, _, _) = self.run_git_raw(&["show-ref", "--verify", "--quiet", name])?;
        Ok(ok)
    }

    fn resolve_ref(&self, name: &str) -> Result<String> {
        validate_anchor(name)?;
        let rev = format!("{name}^{{commit}}");
        let hash = self
            .run_git(&["rev-parse", "--verify", "--end-of-options", &rev])
            .with_context(|| format!("failed to resolve ref {name}"))?;
        Ok(hash)
    }

    fn resolve_ref_commit(&self, name: &str) -> Result<String> {
        validate_anchor(name)?;
        if name == "HEAD" || self.has_ref(name)? {
            return self.resolve_ref(name);
        }
        if let Some(branch) = name.strip_prefix("refs/heads/") {
            // The branch may exist in exactly one remote.
            let pattern = format!("**/{branch}");
            let matches = self
                .run_git(&["for-each-ref", "--format=%(refname)", &pattern])
                .with_context(|| format!("failed listing refs matching {pattern}"))?;
            let matching: Vec<&str> = matches.lines().filter(|l| !l.is_empty()).collect();
            if let [only] = matching.as_slice() {
                return self.resolve_ref(only);
            }
            return Err(Error::not_found(format!(
                "unable to find a unique ref matching '{pattern}'"
            )));
        }
        Err(Error::not_found(format!("unknown ref '{name}'")))
    }

    fn update_ref(&self, name: &str, new: &str, expected_old: Option<&str>) -> Result<()> {
        validate_anchor(name)?;
        let mut args = vec!["update-ref", name, new];
        if let Some(old) = expected_old {
            args.push(old);
        }
        let (ok, _, stderr) = self.run_git_raw(&args)?;
        if ok {
            return Ok(());
        }
        if expected_old.is_some() {
            Err(Error::Conflict {
                reference: name.to_string(),
                detail: stderr.trim().to_string(),
            })
        } else {
            Err(anyhow::anyhow!("failed to update ref {name}: {}", stderr.trim()).into())
        }
    }

    fn verify_commit(&self, hash: &str) -> Result<()> {
        match self.object_type(hash)? {
            ObjectType::Commit => Ok(()),
            ObjectType::Missing => Err(Error::not_found(format!("no such commit: {hash}"))),
            other => Err(Error::validation(format!(
                "{hash} is a {other:?}, not a commit"
            ))),
        }
    }

    fn object_type(&self, hash: &str) -> Result<ObjectType> {
        validate_anchor(hash)?;
        let (ok, stdout, _) = self.run_git_raw(&["cat-file", "-t", hash])?;
        if !ok {
            return Ok(ObjectType::Missing);
        }
        Ok(match stdout.trim() {
            "commit" => ObjectType::Commit,
            "tree" => ObjectType::Tree,
            "blob" => ObjectType::Blob,
            _ => ObjectType::Missing,
        })
    }

    fn commit_details(&self, reference: &str) -> Result<CommitDetails> {
        validate_anchor(reference)?;
        let format = "--format=%T%x00%P%x00%ct%x00%ae%x00%s";
        let out = self
            .run_git(&["show", "-s", format, reference, "--"])
            .with_context(|| format!("failed to read commit details for {reference}"))?;
        let fields: Vec<&str> = out.splitn(5, '\0').collect();
        if fields.len() != 5 {
            return Err(anyhow::anyhow!("unexpected commit detail output: {out:?}").into());
        }
        Ok(CommitDetails {
            tree: fields[0].to_string(),
            parents: fields[1].split_whitespace().map(str::to_string).collect(),
            time: fields[2].trim().parse().unwrap_or(0),
            author_email: fields[3].to_string(),
            summary: fields[4].to_string(),
        })
    }

    fn create_commit(&self, tree: &str, parents: &[String], message: &str) -> Result<String> {
        validate_anchor(tree)?;
        let mut args = vec!["commit-tree".to_string(), tree.to_string()];
        for parent in parents {
            validate_anchor(parent)?;
            args.push("-p".to_string());
            args.push(parent.clone());
        }
        args.push("-m".to_string());
        args.push(message.to_string());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        Ok(self.run_git(&arg_refs)?)
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<String> {
        validate_anchor(a)?;
        validate_anchor(b)?;
        Ok(self.run_git(&["merge-base", a, b])?)
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        validate_anchor(ancestor)?;
        validate_anchor(descendant)?;
        let (ok, _, _) =
            self.run_git_raw(&["merge-base", "--is-ancestor", ancestor, descendant])?;
        Ok(ok)
    }

    fn list_commits(&self, reference: &str) -> Result<Vec<String>> {
        validate_anchor(reference)?;
        let (ok, stdout, _) = self.run_git_raw(&["rev-list", "--reverse", reference])?;
        if !ok {
            return Ok(Vec::new());
        }
        Ok(stdout
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn list_commits_between(&self, from: &str, to: &str) -> Result<Vec<String>> {
        validate_anchor(from)?;
        validate_anchor(to)?;
        let range = format!("{from}..{to}");
        let out = self
            .run_git(&["rev-list", "--reverse", &range])
            .with_context(|| format!("failed to list commits in {range}"))?;
        Ok(out
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn file_exists_at(&self, commit: &str, path: &str) -> Result<bool> {
        validate_anchor(commit)?;
        let spec = format!("{commit}:{path}");
        let (ok, _, _) = self.run_git_raw(&["cat-file", "-e", "--end-of-options", &spec])?;
        Ok(ok)
    }

    fn diff(&self, left: &str, right: &str) -> Result<String> {
        validate_anchor(left)?;
        validate_anchor(right)?;
        let range = format!("{left}..{right}");
        Ok(self
            .run_git(&["diff", "--no-color", "--no-ext-diff", &range])
            .with_context(|| format!("failed to diff {range}"))?)
    }

    fn notes(&self, notes_ref: &str, revision: &str) -> Result<Vec<String>> {
        validate_anchor(notes_ref)?;
        validate_anchor(revision)?;
        let (ok, stdout, _) =
            self.run_git_raw(&["notes", "--ref", notes_ref, "show", revision, "--"])?;
        if !ok {
            // No note attached to this revision.
            return Ok(Vec::new());
        }
        Ok(stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    fn all_notes(&self, notes_ref: &str) -> Result<BTreeMap<String, Vec<String>>> {
        validate_anchor(notes_ref)?;
        let (ok, listing, _) = self.run_git_raw(&["notes", "--ref", notes_ref, "list"])?;
        if !ok {
            return Ok(BTreeMap::new());
        }

        let mut mappings: Vec<(String, String)> = Vec::new();
        for line in listing.lines() {
            if let Some((note_hash, obj_hash)) = line.split_once(' ') {
                mappings.push((note_hash.to_string(), obj_hash.to_string()));
            }
        }
        if mappings.is_empty() {
            return Ok(BTreeMap::new());
        }

        // Pass 1: filter out annotated objects that are not commits.
        let obj_input: String = mappings
            .iter()
            .map(|(_, obj)| format!("{obj}\n"))
            .collect();
        let check_out = self.run_git_with_stdin(
            &["cat-file", "--batch-check=%(objectname) %(objecttype)"],
            obj_input.as_bytes(),
        )?;
        let mut is_commit: HashSet<String> = HashSet::new();
        for line in String::from_utf8_lossy(&check_out).lines() {
            if let Some((name, kind)) = line.split_once(' ') {
                if kind == "commit" {
                    is_commit.insert(name.to_string());
                }
            }
        }

        // Pass 2: read every note blob in one batch.
        let note_input: String = mappings
            .iter()
            .map(|(note, _)| format!("{note}\n"))
            .collect();
        let batch_out =
            self.run_git_with_stdin(&["cat-file", "--batch"], note_input.as_bytes())?;
        let blobs = parse_batch_output(&batch_out)?;

        let mut result: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (note_hash, obj_hash) in &mappings {
            if !is_commit.contains(obj_hash) {
                continue;
            }
            let Some(content) = blobs.get(note_hash) else {
                continue;
            };
            let lines = String::from_utf8_lossy(content)
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>();
            result.entry(obj_hash.clone()).or_default().extend(lines);
        }
        Ok(result)
    }

    fn append_note(&self, notes_ref: &str, revision: &str, line: &str) -> Result<()> {
        validate_anchor(notes_ref)?;
        validate_anchor(revision)?;
        self.run_git(&["notes", "--ref", notes_ref, "append", "-m", line, revision])
            .with_context(|| format!("failed to append a note to {revision}"))?;
        Ok(())
    }

    fn archive_ref(&self, source: &str, archive: &str) -> Result<()> {
        let source_hash = self.resolve_ref(source)?;
        let tree = self.commit_details(source)?.tree;
        for attempt in 0..2 {
            let archive_hash = if self.has_ref(archive)? {
                Some(self.resolve_ref(archive)?)
            } else {
                None
            };
            if let Some(tip) = &archive_hash {
                if self.is_ancestor(&source_hash, tip)? {
                    // Already archived.
                    return Ok(());
                }
            }
            let mut parents = Vec::new();
            if let Some(tip) = &archive_hash {
                parents.push(tip.clone());
            }
            parents.push(source_hash.clone());
            let new_hash =
                self.create_commit(&tree, &parents, &format!("Archive {source_hash}"))?;
            match self.update_ref(archive, &new_hash, archive_hash.as_deref()) {
                Ok(()) => return Ok(()),
                Err(Error::Conflict { .. }) if attempt == 0 => {
                    debug!(archive, "archive ref moved during update; retrying once");
                }
                Err(err) => return Err(err),
            }
        }
        Err(Error::Conflict {
            reference: archive.to_string(),
            detail: "archive ref kept moving".to_string(),
        })
    }

    fn fetch_annotations(
        &self,
        remote: &str,
        notes_pattern: &str,
        archive_pattern: &str,
    ) -> Result<Vec<String>> {
        validate_anchor(remote)?;
        let remote_notes_pattern = remote_notes_ref(remote, notes_pattern);
        let notes_spec = format!("+{notes_pattern}:{remote_notes_pattern}");
        let remote_archive_pattern = remote_devtools_ref(remote, archive_pattern);
        let archive_spec = format!("+{archive_pattern}:{remote_archive_pattern}");

        let prior = self.ref_hashes(&remote_notes_pattern)?;
        debug!(remote, "fetching annotation and archive refs");
        self.run_git(&["fetch", remote, &notes_spec, &archive_spec])
            .with_context(|| format!("failed fetching from the remote '{remote}'"))?;
        let updated = self.ref_hashes(&remote_notes_pattern)?;

        // Changed annotation tree paths name the commits they attach to,
        // with slashes inserted for fan-out; stripping them restores the id.
        let mut changed: BTreeSet<String> = BTreeSet::new();
        for (name, hash) in &updated {
            let listing = match prior.get(name) {
                Some(old) if old == hash => continue,
                Some(old) => {
                    self.run_git(&["diff", "--name-only", old.as_str(), hash.as_str()])?
                }
                None => self.run_git(&["ls-tree", "-r", "--name-only", hash.as_str()])?,
            };
            for path in listing.lines() {
                let id = path.replace('/', "");
                if !id.is_empty() {
                    changed.insert(id);
                }
            }
        }
        Ok(changed.into_iter().collect())
    }

    fn merge_annotations(
        &self,
        remote: &str,
        notes_pattern: &str,
        archive_pattern: &str,
    ) -> Result<()> {
        validate_anchor(remote)?;
        let remote_notes_pattern = remote_notes_ref(remote, notes_pattern);
        for remote_ref in self.ref_hashes(&remote_notes_pattern)?.keys() {
            let local = local_notes_ref(remote, remote_ref);
            debug!(%local, "merging annotations via line union");
            self.run_git(&[
                "notes",
                "--ref",
                &local,
                "merge",
                remote_ref.as_str(),
                "-s",
                "cat_sort_uniq",
            ])
            .with_context(|| format!("failed merging notes into {local}"))?;
        }

        let remote_archive_pattern = remote_devtools_ref(remote, archive_pattern);
        for remote_ref in self.ref_hashes(&remote_archive_pattern)?.keys() {
            let local = local_devtools_ref(remote, remote_ref);
            self.merge_one_archive(&local, remote_ref)?;
        }
        Ok(())
    }

    fn push_annotations(
        &self,
        remote: &str,
        notes_pattern: &str,
        archive_pattern: &str,
    ) -> Result<()> {
        validate_anchor(remote)?;
        let notes_spec = format!("{notes_pattern}:{notes_pattern}");
        let archive_spec = format!("{archive_pattern}:{archive_pattern}");
        let (ok, _, stderr) = self.run_git_raw(&["push", remote, &notes_spec, &archive_spec])?;
        if !ok {
            warn!(remote, "push rejected");
            return Err(Error::NetworkPush {
                remote: remote.to_string(),
                detail: stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Parse `git cat-file --batch` output: repeated `<oid> <type> <size>`
/// header lines, each followed by that many content bytes and a newline.
fn parse_batch_output(out: &[u8]) -> anyhow::Result<HashMap<String, Vec<u8>>> {
    let mut blobs = HashMap::new();
    let mut cursor = 0usize;
    while cursor < out.len() {
        let line_end = out[cursor..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| cursor + p)
            .context("truncated batch header")?;
        let header = std::str::from_utf8(&out[cursor..line_end]).context("bad batch header")?;
        cursor = line_end + 1;

        let fields: Vec<&str> = header.split(' ').collect();
        match fields.as_slice() {
            [_, "missing"] => continue,
            [oid, _, size] => {
                let size: usize = size.parse().context("bad batch object size")?;
                if cursor + size > out.len() {
                    bail!("truncated batch object {oid}");
                }
                blobs.insert((*oid).to_string(), out[cursor..cursor + size].to_vec());
                cursor += size;
                // Trailing separator newline.
                if out.get(cursor) == Some(&b'\n') {
                    cursor += 1;
                }
            }
            _ => bail!("unexpected batch header: {header:?}"),
        }
    }
    Ok(blobs)
}
