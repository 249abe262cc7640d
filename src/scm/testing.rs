//! Deterministic in-memory repository for tests.
//!
//! Implements the full port over plain maps so aggregation, state and
//! property tests can run without a git binary. Notes merging between two
//! `MemRepo`s uses the same line-union rule as the real store.

use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};
use crate::scm::{CommitDetails, ObjectType, Repo};

#[derive(Debug, Clone, Default)]
struct MemCommit {
    parents: Vec<String>,
    time: i64,
    tree: String,
}

#[derive(Debug, Clone, Default)]
struct Inner {
    commits: BTreeMap<String, MemCommit>,
    refs: BTreeMap<String, String>,
    head: String,
    /// namespace ref -> commit -> annotation lines
    notes: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    files: BTreeSet<(String, String)>,
    config: BTreeMap<String, String>,
    user_email: String,
    signing_key: Option<String>,
    synthetic: u32,
}

/// An in-memory [`Repo`] replica.
#[derive(Debug, Default)]
pub struct MemRepo {
    inner: RefCell<Inner>,
}

impl Clone for MemRepo {
    fn clone(&self) -> Self {
        Self {
            inner: RefCell::new(self.inner.borrow().clone()),
        }
    }
}

impl MemRepo {
    #[must_use]
    pub fn new() -> Self {
        let repo = Self::default();
        {
            let mut inner = repo.inner.borrow_mut();
            inner.user_email = "author@example.com".to_string();
            inner.head = "refs/heads/main".to_string();
        }
        repo
    }

    pub fn set_user_email(&self, email: &str) {
        self.inner.borrow_mut().user_email = email.to_string();
    }

    pub fn set_signing_key(&self, key: Option<&str>) {
        self.inner.borrow_mut().signing_key = key.map(str::to_string);
    }

    pub fn set_config(&self, key: &str, value: &str) {
        self.inner
            .borrow_mut()
            .config
            .insert(key.to_string(), value.to_string());
    }

    /// Add a commit with the given parents and commit time.
    pub fn add_commit(&self, id: &str, parents: &[&str], time: i64) {
        let mut inner = self.inner.borrow_mut();
        inner.commits.insert(
            id.to_string(),
            MemCommit {
                parents: parents.iter().map(|p| (*p).to_string()).collect(),
                time,
                tree: format!("tree-of-{id}"),
            },
        );
    }

    pub fn set_ref(&self, name: &str, commit: &str) {
        self.inner
            .borrow_mut()
            .refs
            .insert(name.to_string(), commit.to_string());
    }

    pub fn delete_ref(&self, name: &str) {
        self.inner.borrow_mut().refs.remove(name);
    }

    pub fn set_head(&self, name: &str) {
        self.inner.borrow_mut().head = name.to_string();
    }

    pub fn add_file(&self, commit: &str, path: &str) {
        self.inner
            .borrow_mut()
            .files
            .insert((commit.to_string(), path.to_string()));
    }

    /// Merge another replica's annotations into this one with the
    /// commutative line union (sorted, de-duplicated).
    pub fn merge_notes_from(&self, other: &Self) {
        let theirs = other.inner.borrow().notes.clone();
        let mut inner = self.inner.borrow_mut();
        for (namespace, by_commit) in theirs {
            let ours = inner.notes.entry(namespace).or_default();
            for (commit, lines) in by_commit {
                let merged: BTreeSet<String> = ours
                    .get(&commit)
                    .into_iter()
                    .flatten()
                    .cloned()
                    .chain(lines)
                    .collect();
                ours.insert(commit, merged.into_iter().collect());
            }
        }
    }

    fn ancestors(inner: &Inner, id: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(commit) = inner.commits.get(&current) {
                for parent in &commit.parents {
                    if seen.insert(parent.clone()) {
                        stack.push(parent.clone());
                    }
                }
            }
        }
        seen
    }

    fn sort_chronologically(inner: &Inner, set: BTreeSet<String>) -> Vec<String> {
        let mut commits: Vec<String> = set.into_iter().collect();
        commits.sort_by_key(|id| {
            let time = inner.commits.get(id).map_or(0, |c| c.time);
            (time, id.clone())
        });
        commits
    }

    fn resolve(inner: &Inner, name: &str) -> Result<String> {
        let name = if name == "HEAD" {
            inner.head.as_str()
        } else {
            name
        };
        if let Some(hash) = inner.refs.get(name) {
            return Ok(hash.clone());
        }
        if inner.commits.contains_key(name) {
            return Ok(name.to_string());
        }
        Err(Error::not_found(format!("unknown ref '{name}'")))
    }
}

impl Repo for MemRepo {
    fn user_email(&self) -> Result<String> {
        Ok(self.inner.borrow().user_email.clone())
    }

    fn signing_key(&self) -> Result<Option<String>> {
        Ok(self.inner.borrow().signing_key.clone())
    }

    fn config_value(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.borrow().config.get(key).cloned())
    }

    fn state_fingerprint(&self) -> Result<String> {
        let inner = self.inner.borrow();
        let mut hasher = DefaultHasher::new();
        inner.refs.hash(&mut hasher);
        inner.notes.hash(&mut hasher);
        Ok(format!("{:016x}", hasher.finish()))
    }

    fn head_ref(&self) -> Result<String> {
        Ok(self.inner.borrow().head.clone())
    }

    fn has_ref(&self, name: &str) -> Result<bool> {
        Ok(self.inner.borrow().refs.contains_key(name))
    }

    fn resolve_ref(&self, name: &str) -> Result<String> {
        Self::resolve(&self.inner.borrow(), name)
    }

    fn resolve_ref_commit(&self, name: &str) -> Result<String> {
        Self::resolve(&self.inner.borrow(), name)
    }

    fn update_ref(&self, name: &str, new: &str, expected_old: Option<&str>) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let current = inner.refs.get(name).cloned();
        if let Some(expected) = expected_old {
            if current.as_deref() != Some(expected) {
                return Err(Error::Conflict {
                    reference: name.to_string(),
                    detail: format!("expected {expected}, found {current:?}"),
                });
            }
        }
        inner.refs.insert(name.to_string(), new.to_string());
        Ok(())
    }

    fn verify_commit(&self, hash: &str) -> Result<()> {
        if self.inner.borrow().commits.contains_key(hash) {
            Ok(())
        } else {
            Err(Error::not_found(format!("no such commit: {hash}")))
        }
    }

    fn object_type(&self, hash: &str) -> Result<ObjectType> {
        if self.inner.borrow().commits.contains_key(hash) {
            Ok(ObjectType::Commit)
        } else {
            Ok(ObjectType::Missing)
        }
    }

    fn commit_details(&self, reference: &str) -> Result<CommitDetails> {
        let inner = self.inner.borrow();
        let hash = Self::resolve(&inner, reference)?;
        let commit = inner
            .commits
            .get(&hash)
            .ok_or_else(|| Error::not_found(format!("no such commit: {hash}")))?;
        Ok(CommitDetails {
            tree: commit.tree.clone(),
            parents: commit.parents.clone(),
            time: commit.time,
            author_email: String::new(),
            summary: String::new(),
        })
    }

    fn create_commit(&self, tree: &str, parents: &[String], _message: &str) -> Result<String> {
        let mut inner = self.inner.borrow_mut();
        inner.synthetic += 1;
        let id = format!("synthetic-{:07}", inner.synthetic);
        let time = inner.commits.values().map(|c| c.time).max().unwrap_or(0) + 1;
        inner.commits.insert(
            id.clone(),
            MemCommit {
                parents: parents.to_vec(),
                time,
                tree: tree.to_string(),
            },
        );
        Ok(id)
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<String> {
        let inner = self.inner.borrow();
        let a = Self::resolve(&inner, a)?;
        let b = Self::resolve(&inner, b)?;
        let mut reachable_a = Self::ancestors(&inner, &a);
        reachable_a.insert(a);
        let mut reachable_b = Self::ancestors(&inner, &b);
        reachable_b.insert(b);
        let common: BTreeSet<String> = reachable_a.intersection(&reachable_b).cloned().collect();
        Self::sort_chronologically(&inner, common)
            .pop()
            .ok_or_else(|| Error::not_found("no common ancestor".to_string()))
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let inner = self.inner.borrow();
        let ancestor = Self::resolve(&inner, ancestor)?;
        let descendant = match Self::resolve(&inner, descendant) {
            Ok(hash) => hash,
            Err(_) => return Ok(false),
        };
        Ok(ancestor == descendant
            || Self::ancestors(&inner, &descendant).contains(&ancestor))
    }

    fn list_commits(&self, reference: &str) -> Result<Vec<String>> {
        let inner = self.inner.borrow();
        let Ok(tip) = Self::resolve(&inner, reference) else {
            return Ok(Vec::new());
        };
        let mut set = Self::ancestors(&inner, &tip);
        set.insert(tip);
        Ok(Self::sort_chronologically(&inner, set))
    }

    fn list_commits_between(&self, from: &str, to: &str) -> Result<Vec<String>> {
        let inner = self.inner.borrow();
        let from = Self::resolve(&inner, from)?;
        let to = Self::resolve(&inner, to)?;
        let mut included = Self::ancestors(&inner, &to);
        included.insert(to);
        let mut excluded = Self::ancestors(&inner, &from);
        excluded.insert(from);
        let set: BTreeSet<String> = included.difference(&excluded).cloned().collect();
        Ok(Self::sort_chronologically(&inner, set))
    }

    fn file_exists_at(&self, commit: &str, path: &str) -> Result<bool> {
        Ok(self
            .inner
            .borrow()
            .files
            .contains(&(commit.to_string(), path.to_string())))
    }

    fn diff(&self, _left: &str, _right: &str) -> Result<String> {
        Ok(String::new())
    }

    fn notes(&self, notes_ref: &str, revision: &str) -> Result<Vec<String>> {
        Ok(self
            .inner
            .borrow()
            .notes
            .get(notes_ref)
            .and_then(|by_commit| by_commit.get(revision))
            .cloned()
            .unwrap_or_default())
    }

    fn all_notes(&self, notes_ref: &str) -> Result<BTreeMap<String, Vec<String>>> {
        Ok(self
            .inner
            .borrow()
            .notes
            .get(notes_ref)
            .cloned()
            .unwrap_or_default())
    }

    fn append_note(&self, notes_ref: &str, revision: &str, line: &str) -> Result<()> {
        self.inner
            .borrow_mut()
            .notes
            .entry(notes_ref.to_string())
            .or_default()
            .entry(revision.to_string())
            .or_default()
            .push(line.to_string());
        Ok(())
    }

    fn archive_ref(&self, source: &str, archive: &str) -> Result<()> {
        let source_hash = self.resolve_ref(source)?;
        let tree = self.commit_details(&source_hash)?.tree;
        let archive_tip = if self.has_ref(archive)? {
            Some(self.resolve_ref(archive)?)
        } else {
            None
        };
        if let Some(tip) = &archive_tip {
            if self.is_ancestor(&source_hash, tip)? {
                return Ok(());
            }
        }
        let mut parents = Vec::new();
        if let Some(tip) = &archive_tip {
            parents.push(tip.clone());
        }
        parents.push(source_hash.clone());
        let new_hash = self.create_commit(&tree, &parents, &format!("Archive {source_hash}"))?;
        self.update_ref(archive, &new_hash, archive_tip.as_deref())
    }

    fn fetch_annotations(
        &self,
        _remote: &str,
        _notes_pattern: &str,
        _archive_pattern: &str,
    ) -> Result<Vec<String>> {
        Err(Error::validation(
            "MemRepo has no network; use merge_notes_from".to_string(),
        ))
    }

    fn merge_annotations(
        &self,
        _remote: &str,
        _notes_pattern: &str,
        _archive_pattern: &str,
    ) -> Result<()> {
        Err(Error::validation(
            "MemRepo has no network; use merge_notes_from".to_string(),
        ))
    }

    fn push_annotations(
        &self,
        _remote: &str,
        _notes_pattern: &str,
        _archive_pattern: &str,
    ) -> Result<()> {
        Err(Error::validation(
            "MemRepo has no network; use merge_notes_from".to_string(),
        ))
    }
}
