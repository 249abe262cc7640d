//! Run-time configuration, threaded through calls as an explicit value.

use crate::scm::Repo;

/// Settings that change review semantics, resolved once per invocation from
/// git config.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether a requester's own LGTM can move a review to the accepted
    /// state. Detached comments never check authorship.
    pub allow_self_accept: bool,
    /// Remote used by `pull`/`push` when none is given.
    pub default_remote: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            allow_self_accept: false,
            default_remote: "origin".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the repository's git config.
    ///
    /// Missing or unreadable keys fall back to the defaults.
    #[must_use]
    pub fn load(repo: &dyn Repo) -> Self {
        let allow_self_accept = repo
            .config_value("devtools.selfaccept")
            .ok()
            .flatten()
            .map(|v| parse_bool(&v))
            .unwrap_or(false);

        Self {
            allow_self_accept,
            default_remote: "origin".to_string(),
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "on" | "1"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool("Yes"));
        assert!(parse_bool("1"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool(""));
        assert!(!parse_bool("maybe"));
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.allow_self_accept);
        assert_eq!(config.default_remote, "origin");
    }
}
