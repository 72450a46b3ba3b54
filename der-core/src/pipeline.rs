//! Wires the ten stages of a single run together: load memory, normalize
//! the task, load prompts, pick a route, build calls, run agents, merge
//! through the chairman, apply edits, reindex the directory, persist.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::Value;
use tracing::info;

use crate::calls::build_agent_inputs;
use crate::chairman::chairman_merge;
use crate::memory::load_or_create_memory;
use crate::persist::{update_directory_structure, update_files, write_memory};
use crate::prompts::load_prompts;
use crate::provider::Provider;
use crate::router::select_role_assignments;
use crate::runner::run_agents;
use crate::task::{normalize_task, Task, TaskPrompter};

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub phase: String,
    pub task: Task,
    pub runs_completed: u32,
}

/// Runs one full pass of the pipeline against `root`, using `prompter` to
/// collect task fields when needed and `provider` for every agent and
/// chairman call this run makes.
pub async fn run_once(root: &Path, prompter: &dyn TaskPrompter, provider: &dyn Provider) -> anyhow::Result<RunOutcome> {
    info!(root = %root.display(), "memory.load");
    let (mut memory, first_run) = load_or_create_memory(root).context("loading memory")?;

    info!("task.normalize");
    let task = normalize_task(root, &memory, first_run, prompter).context("normalizing task")?;

    info!("prompts.load");
    let prompts = load_prompts(root);

    info!(phase = %task.phase, "role.select");
    let role_assignments = select_role_assignments(&memory, &task.phase);

    info!("calls.build");
    let agent_calls = build_agent_inputs(&memory, &task, &prompts, &role_assignments);

    let base_path = PathBuf::from(memory.directory_structure.base_path.clone());
    let run_id = memory.current_run_id.clone();

    info!(calls = agent_calls.len(), "agents.run");
    let results = run_agents(agent_calls, &role_assignments, &run_id, &task.phase, &memory, &base_path, provider).await;

    let mut architect_results: BTreeMap<String, Value> = BTreeMap::new();
    let mut implementer_results: BTreeMap<String, Value> = BTreeMap::new();
    for (call_id, result) in &results {
        if result.agent_id == "architect" {
            architect_results.insert(call_id.clone(), result.output.clone());
        } else if result.agent_id == "implementer" {
            implementer_results.insert(call_id.clone(), result.output.clone());
        }
    }

    info!("chairman.merge");
    chairman_merge(
        &mut memory,
        &task,
        &architect_results,
        &implementer_results,
        &role_assignments,
        &run_id,
        &task.phase,
        &base_path,
        &prompts.rules,
        &prompts.chairman,
        provider,
    )
    .await;

    info!("files.apply");
    update_files(&memory, &task.phase, &base_path);

    info!("directory.reindex");
    update_directory_structure(&mut memory, &task.phase, &task.language);

    info!("memory.persist");
    let used_run_id = write_memory(root, &mut memory, &task, &prompts.rules, &prompts.overview, provider)
        .await
        .context("persisting memory")?;

    Ok(RunOutcome {
        run_id: used_run_id,
        phase: task.phase.clone(),
        runs_completed: memory.exploration.runs_completed,
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StubProvider;
    use crate::task::Task;
    use tempfile::tempdir;

    struct FixedPrompter(Task);
    impl TaskPrompter for FixedPrompter {
        fn collect(&self) -> crate::error::TaskResult<Task> {
            Ok(self.0.clone())
        }
    }

    fn fixed_task() -> Task {
        Task {
            phase: "bootstrap".into(),
            goal: "build a calculator".into(),
            language: "python".into(),
            style: "clean".into(),
        }
    }

    #[tokio::test]
    async fn first_run_bootstraps_and_advances_run_id() {
        let dir = tempdir().unwrap();
        let prompter = FixedPrompter(fixed_task());
        let provider = StubProvider::empty_architect();

        let outcome = run_once(dir.path(), &prompter, &provider).await.unwrap();
        assert_eq!(outcome.phase, "bootstrap");
        assert_eq!(outcome.runs_completed, 1);
        assert!(dir.path().join("memory").join("memory.json").exists());
        assert!(dir.path().join("task").join("task.json").exists());
    }

    #[tokio::test]
    async fn warmup_boundary_transitions_into_iterate_phase() {
        let dir = tempdir().unwrap();
        let prompter = FixedPrompter(fixed_task());
        let provider = StubProvider::empty_architect();

        for _ in 0..3 {
            run_once(dir.path(), &prompter, &provider).await.unwrap();
        }
        let outcome = run_once(dir.path(), &prompter, &provider).await.unwrap();
        assert_eq!(outcome.phase, "iterate");
    }
}
