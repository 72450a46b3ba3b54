//! Loads the five prompt text files (`architect`, `implementer`, `chairman`,
//! `overview`, `rules`) from `<cwd>/prompts/`. A missing file is left empty
//! rather than treated as an error — prompt content is explicitly out of
//! scope for this crate (see the spec's Non-goals).

use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompts {
    pub architect: String,
    pub implementer: String,
    pub chairman: String,
    pub overview: String,
    pub rules: String,
}

impl Prompts {
    pub fn role_prompt(&self, role: &str) -> &str {
        match role {
            "architect" => &self.architect,
            "implementer" => &self.implementer,
            _ => "",
        }
    }
}

const PROMPT_FILES: [(&str, &str); 5] = [
    ("architect", "architect.txt"),
    ("implementer", "implementer.txt"),
    ("chairman", "chairman.txt"),
    ("overview", "overview.txt"),
    ("rules", "rules.txt"),
];

/// The `prompts.load` pipeline stage.
pub fn load_prompts(prompts_root: &Path) -> Prompts {
    let prompts_dir = prompts_root.join("prompts");
    let _ = std::fs::create_dir_all(&prompts_dir);

    let mut loaded: std::collections::BTreeMap<&str, String> = std::collections::BTreeMap::new();
    for (key, filename) in PROMPT_FILES {
        if let Ok(content) = std::fs::read_to_string(prompts_dir.join(filename)) {
            loaded.insert(key, content);
        }
    }

    Prompts {
        architect: loaded.remove("architect").unwrap_or_default(),
        implementer: loaded.remove("implementer").unwrap_or_default(),
        chairman: loaded.remove("chairman").unwrap_or_default(),
        overview: loaded.remove("overview").unwrap_or_default(),
        rules: loaded.remove("rules").unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_prompt_files_load_as_empty() {
        let dir = tempdir().unwrap();
        let prompts = load_prompts(dir.path());
        assert_eq!(prompts.architect, "");
        assert_eq!(prompts.rules, "");
    }

    #[test]
    fn present_prompt_files_are_loaded_verbatim() {
        let dir = tempdir().unwrap();
        let prompts_dir = dir.path().join("prompts");
        std::fs::create_dir_all(&prompts_dir).unwrap();
        std::fs::write(prompts_dir.join("rules.txt"), "never break userspace").unwrap();
        let prompts = load_prompts(dir.path());
        assert_eq!(prompts.rules, "never break userspace");
        assert_eq!(prompts.architect, "");
    }
}
