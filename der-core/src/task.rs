//! Task intake: the four fields (`phase`, `goal`, `language`, `style`) that
//! describe what this run should build, collected once and then replayed
//! (with `phase` re-derived from memory) on every subsequent run.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{TaskError, TaskResult};
use crate::memory::Memory;

pub const LANGUAGES: [&str; 3] = ["python", "c++", "java"];
pub const STYLES: [&str; 3] = ["clean", "minimal", "performance"];
pub const PHASES: [&str; 2] = ["bootstrap", "iterate"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub phase: String,
    pub goal: String,
    pub language: String,
    pub style: String,
}

/// Collects the four task fields from some external source (a terminal, a
/// fixed answer set in tests, or "refuse" in non-interactive mode).
pub trait TaskPrompter {
    fn collect(&self) -> TaskResult<Task>;
}

/// Prompts on stdin/stdout, matching the original's four interactive
/// questions and defaulting any unrecognized answer to the first supported
/// option for that field.
pub struct StdinPrompter;

impl TaskPrompter for StdinPrompter {
    fn collect(&self) -> TaskResult<Task> {
        let phase = prompt_choice(
            "\nWhat phase is this program in?\nThe supported phases are bootstrap and iterate.\n",
            &PHASES,
            "bootstrap",
        );
        let goal = prompt_line("\nWhat's the overall goal of this program?\n");
        let language = prompt_choice(
            "\nWhat coding language should be used to compose this program?\nThe supported coding languages are python, java, c++\n",
            &LANGUAGES,
            "python",
        );
        let style = prompt_choice(
            "\nWhat style of programming do you prefer?\nThe supported styles are clean, minimal, performance\n",
            &STYLES,
            "clean",
        );

        Ok(Task {
            phase,
            goal,
            language,
            style,
        })
    }
}

/// Never prompts; used when `--non-interactive` is set and fields are
/// missing. Fails fast instead of blocking on stdin.
pub struct NonInteractivePrompter;

impl TaskPrompter for NonInteractivePrompter {
    fn collect(&self) -> TaskResult<Task> {
        Err(TaskError::MissingTaskFields)
    }
}

fn prompt_line(question: &str) -> String {
    print!("{question}");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);
    line.trim().to_string()
}

fn prompt_choice(question: &str, allowed: &[&str], default: &str) -> String {
    let answer = prompt_line(question).to_lowercase();
    if allowed.contains(&answer.as_str()) {
        answer
    } else {
        default.to_string()
    }
}

fn task_path(root: &Path) -> PathBuf {
    root.join("task").join("task.json")
}

pub fn load_task(path: &Path) -> Option<Task> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

pub fn write_task(path: &Path, task: &Task) -> bool {
    match crate::json_sorted::to_sorted_pretty(task) {
        Ok(content) => std::fs::write(path, content).is_ok(),
        Err(_) => false,
    }
}

/// Re-derives `phase` from memory's own warmup/runs-completed bookkeeping
/// (already range-validated by `repair_memory`) and validates the stored
/// `goal`/`language`/`style`. Returns `None` for any field that fails
/// validation, signalling the caller to re-collect.
pub fn parse_task(memory: &Memory, stored: &Task) -> (String, Option<String>, Option<String>, Option<String>) {
    let phase = if memory.exploration.runs_completed >= memory.exploration.warmup_runs {
        "iterate"
    } else {
        "bootstrap"
    }
    .to_string();

    let goal = Some(stored.goal.trim().to_string()).filter(|s| !s.is_empty());
    let language = Some(stored.language.to_lowercase())
        .filter(|s| LANGUAGES.contains(&s.as_str()));
    let style = Some(stored.style.to_lowercase()).filter(|s| STYLES.contains(&s.as_str()));

    (phase, goal, language, style)
}

/// The `task.normalize` pipeline stage: collects task fields on first run,
/// replays and re-validates them on every later run, and always re-writes
/// `task.json` (retrying once on failure).
pub fn normalize_task(
    root: &Path,
    memory: &Memory,
    first_run: bool,
    prompter: &dyn TaskPrompter,
) -> TaskResult<Task> {
    let task_dir = root.join("task");
    std::fs::create_dir_all(&task_dir).map_err(|e| TaskError::Io {
        path: task_dir.clone(),
        source: e,
    })?;
    let path = task_path(root);

    let task = if first_run {
        prompter.collect()?
    } else {
        match load_task(&path) {
            Some(stored) => {
                let (phase, goal, language, style) = parse_task(memory, &stored);
                match (goal, language, style) {
                    (Some(goal), Some(language), Some(style)) => Task {
                        phase,
                        goal,
                        language,
                        style,
                    },
                    _ => {
                        warn!("missing information from previous run, re-collecting task fields");
                        prompter.collect()?
                    }
                }
            }
            None => {
                warn!("previous task file could not be located, re-collecting task fields");
                prompter.collect()?
            }
        }
    };

    if !write_task(&path, &task) {
        if !write_task(&path, &task) {
            warn!(path = %path.display(), "failed to write task.json twice");
        }
    }

    info!(phase = %task.phase, language = %task.language, "task normalized");
    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::repair_memory;
    use serde_json::Value;
    use tempfile::tempdir;

    fn fixed_task() -> Task {
        Task {
            phase: "bootstrap".into(),
            goal: "build a thing".into(),
            language: "python".into(),
            style: "clean".into(),
        }
    }

    struct FixedPrompter(Task);
    impl TaskPrompter for FixedPrompter {
        fn collect(&self) -> TaskResult<Task> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn first_run_always_prompts() {
        let dir = tempdir().unwrap();
        let memory = repair_memory(&Value::Null, dir.path());
        let prompter = FixedPrompter(fixed_task());
        let task = normalize_task(dir.path(), &memory, true, &prompter).unwrap();
        assert_eq!(task.goal, "build a thing");
        assert!(task_path(dir.path()).exists());
    }

    #[test]
    fn later_run_rederives_phase_from_memory() {
        let dir = tempdir().unwrap();
        let mut memory = repair_memory(&Value::Null, dir.path());
        memory.exploration.warmup_runs = 1;
        memory.exploration.runs_completed = 1;
        write_task(&task_path(dir.path()), &fixed_task());
        std::fs::create_dir_all(dir.path().join("task")).unwrap();
        let prompter = NonInteractivePrompter;
        let task = normalize_task(dir.path(), &memory, false, &prompter).unwrap();
        assert_eq!(task.phase, "iterate");
        assert_eq!(task.goal, "build a thing");
    }

    #[test]
    fn non_interactive_fails_fast_with_no_prior_task() {
        let dir = tempdir().unwrap();
        let memory = repair_memory(&Value::Null, dir.path());
        let prompter = NonInteractivePrompter;
        let result = normalize_task(dir.path(), &memory, true, &prompter);
        assert!(result.is_err());
    }
}
