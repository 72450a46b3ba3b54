//! Ambient run configuration: where state lives on disk and how long a
//! single agent/chairman call is allowed to run before it's treated as
//! failed, read from the environment with sane defaults.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub root: PathBuf,
    pub non_interactive: bool,
}

impl Config {
    /// Resolves the working root from `DER_ROOT`, falling back to `root`
    /// when unset, and `DER_NON_INTERACTIVE` for the prompting mode.
    pub fn from_env(root: impl AsRef<Path>) -> Config {
        let root = std::env::var("DER_ROOT")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| root.as_ref().to_path_buf());

        let non_interactive = std::env::var("DER_NON_INTERACTIVE")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Config { root, non_interactive }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_supplied_root_when_env_unset() {
        std::env::remove_var("DER_ROOT");
        std::env::remove_var("DER_NON_INTERACTIVE");
        let config = Config::from_env("/tmp/der-workspace");
        assert_eq!(config.root, PathBuf::from("/tmp/der-workspace"));
        assert!(!config.non_interactive);
    }
}
