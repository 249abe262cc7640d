//! Memoized review lookup, keyed by the repository state fingerprint.
//!
//! Aggregation is a pure function of the annotation set and ref topology,
//! so a cached result stays valid exactly until any ref changes.

use std::collections::HashMap;

use crate::config::Config;
use crate::error::Result;
use crate::review::{self, Review};
use crate::scm::Repo;

/// Cache of aggregated reviews for one repository.
#[derive(Debug, Default)]
pub struct ReviewCache {
    fingerprint: String,
    reviews: HashMap<String, Option<Review>>,
}

impl ReviewCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a review, reusing the cached aggregation while the repository
    /// fingerprint is unchanged.
    pub fn get(
        &mut self,
        repo: &dyn Repo,
        config: &Config,
        id: &str,
    ) -> Result<Option<Review>> {
        let fingerprint = repo.state_fingerprint()?;
        if fingerprint != self.fingerprint {
            self.reviews.clear();
            self.fingerprint = fingerprint;
        }
        if let Some(cached) = self.reviews.get(id) {
            return Ok(cached.clone());
        }
        let review = review::get(repo, config, id)?;
        self.reviews.insert(id.to_string(), review.clone());
        Ok(review)
    }

    /// Number of memoized entries (diagnostics).
    #[must_use]
    pub fn len(&self) -> usize {
        self.reviews.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reviews.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Comment, Request};
    use crate::review::Status;
    use crate::scm::testing::MemRepo;
    use crate::scm::DISCUSS_REF;

    fn setup() -> MemRepo {
        let repo = MemRepo::new();
        repo.add_commit("base", &[], 10);
        repo.add_commit("tip", &["base"], 20);
        repo.set_ref("refs/heads/main", "base");
        repo.set_ref("refs/heads/feature", "tip");
        let mut request = Request::new(
            "author@example.com",
            "refs/heads/feature",
            "refs/heads/main",
            "",
        );
        request.set_reviewers(["reviewer@example.com"]);
        review::add_request(&repo, "tip", &request).unwrap();
        repo
    }

    #[test]
    fn test_cache_hits_while_fingerprint_stable() {
        let repo = setup();
        let config = Config::default();
        let mut cache = ReviewCache::new();

        assert!(cache.get(&repo, &config, "tip").unwrap().is_some());
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&repo, &config, "tip").unwrap().is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_invalidated_by_ref_change() {
        let repo = setup();
        let config = Config::default();
        let mut cache = ReviewCache::new();

        let before = cache.get(&repo, &config, "tip").unwrap().unwrap();
        assert_eq!(before.status, Status::Open);

        let mut lgtm = Comment::new("reviewer@example.com", "");
        lgtm.timestamp = "50".to_string();
        lgtm.resolved = Some(true);
        repo.append_note(DISCUSS_REF, "tip", &lgtm.to_line().unwrap())
            .unwrap();

        let after = cache.get(&repo, &config, "tip").unwrap().unwrap();
        assert_eq!(after.status, Status::Accepted);
    }

    #[test]
    fn test_negative_lookups_are_cached_too() {
        let repo = setup();
        let config = Config::default();
        let mut cache = ReviewCache::new();
        assert!(cache.get(&repo, &config, "base").unwrap().is_none());
        assert_eq!(cache.len(), 1);
    }
}
