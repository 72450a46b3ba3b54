//! Builds the list of agent calls to dispatch this run: every (role, model)
//! pair during `bootstrap` (calibration mode, to seed the bandit), or one
//! bandit-chosen model per role during `iterate`.

use std::collections::BTreeMap;

use crate::memory::{ChairmanSummary, Memory, ROLES};
use crate::prompts::Prompts;
use crate::task::Task;

#[derive(Debug, Clone, PartialEq)]
pub struct AgentCall {
    pub call_id: String,
    pub agent_id: String,
    pub model_id: String,
    pub task: Task,
    pub rules: String,
    pub role_prompt: String,
    pub agent_weight: f64,
    pub chairman_summary: ChairmanSummary,
}

/// Normalizes a role-weight map restricted to `active_agents`, falling back
/// to a uniform split when the supplied total is non-positive.
pub fn normalize_weights(weighted_inputs: &BTreeMap<String, f64>, active_agents: &[&str]) -> BTreeMap<String, f64> {
    if active_agents.is_empty() {
        return BTreeMap::new();
    }

    let mut weights = BTreeMap::new();
    for role in active_agents {
        let w = weighted_inputs
            .get(*role)
            .copied()
            .filter(|v| *v >= 0.0)
            .unwrap_or(0.5);
        weights.insert(role.to_string(), w);
    }
    let total: f64 = weights.values().sum();
    if total <= 0.0 {
        let uniform = 1.0 / active_agents.len() as f64;
        for role in active_agents {
            weights.insert(role.to_string(), uniform);
        }
    } else {
        for role in active_agents {
            let w = weights[*role] / total;
            weights.insert(role.to_string(), w);
        }
    }
    weights
}

#[allow(clippy::too_many_arguments)]
pub fn build_agent_calls(
    active_agents: &[&str],
    model_ids: &[String],
    prompts: &Prompts,
    rules: &str,
    task: &Task,
    active_weights: &BTreeMap<String, f64>,
    phase: &str,
    calibration_mode: bool,
    chairman_summary_store: &crate::memory::ChairmanSummaryStore,
    role_assignments: &BTreeMap<String, String>,
) -> Vec<AgentCall> {
    if active_agents.is_empty() {
        return Vec::new();
    }

    let model_ids_fallback: Vec<String>;
    let model_ids = if model_ids.is_empty() {
        model_ids_fallback = vec!["M1".to_string()];
        &model_ids_fallback
    } else {
        model_ids
    };
    let default_model_id = &model_ids[0];

    let mut calls = Vec::new();

    if calibration_mode {
        for role in active_agents {
            let role_prompt = prompts.role_prompt(role).to_string();
            for model_id in model_ids {
                let chairman_summary = if phase == "bootstrap" {
                    chairman_summary_store
                        .bootstrap
                        .get(model_id)
                        .cloned()
                        .unwrap_or_default()
                } else {
                    chairman_summary_store.iterate.clone()
                };
                calls.push(AgentCall {
                    call_id: format!("{role}_{model_id}"),
                    agent_id: role.to_string(),
                    model_id: model_id.clone(),
                    task: task.clone(),
                    rules: rules.to_string(),
                    role_prompt,
                    agent_weight: active_weights.get(*role).copied().unwrap_or(0.5),
                    chairman_summary,
                });
            }
        }
        return calls;
    }

    for role in active_agents {
        let model_id = role_assignments
            .get(*role)
            .filter(|m| model_ids.contains(m))
            .cloned()
            .unwrap_or_else(|| default_model_id.clone());

        let role_prompt = prompts.role_prompt(role).to_string();
        let chairman_summary = if phase == "bootstrap" {
            chairman_summary_store
                .bootstrap
                .get(&model_id)
                .cloned()
                .unwrap_or_default()
        } else {
            chairman_summary_store.iterate.clone()
        };

        calls.push(AgentCall {
            call_id: format!("{role}_{model_id}"),
            agent_id: role.to_string(),
            model_id,
            task: task.clone(),
            rules: rules.to_string(),
            role_prompt,
            agent_weight: active_weights.get(*role).copied().unwrap_or(0.5),
            chairman_summary,
        });
    }

    calls
}

/// The `calls.build` pipeline stage.
pub fn build_agent_inputs(
    memory: &Memory,
    task: &Task,
    prompts: &Prompts,
    role_assignments: &BTreeMap<String, String>,
) -> Vec<AgentCall> {
    let phase = if task.phase == "iterate" { "iterate" } else { "bootstrap" };
    let calibration_mode = phase == "bootstrap";

    let active_weights = normalize_weights(&memory.weighted_inputs, &ROLES);

    let model_ids: Vec<String> = memory.model_pool.keys().cloned().collect();

    build_agent_calls(
        &ROLES,
        &model_ids,
        prompts,
        &prompts.rules,
        task,
        &active_weights,
        phase,
        calibration_mode,
        &memory.chairman_summary_store,
        role_assignments,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::repair_memory;
    use serde_json::Value;
    use tempfile::tempdir;

    fn sample_task() -> Task {
        Task {
            phase: "bootstrap".into(),
            goal: "g".into(),
            language: "python".into(),
            style: "clean".into(),
        }
    }

    #[test]
    fn bootstrap_fans_out_every_role_model_pair() {
        let dir = tempdir().unwrap();
        let memory = repair_memory(&Value::Null, dir.path());
        let prompts = Prompts::default();
        let calls = build_agent_inputs(&memory, &sample_task(), &prompts, &BTreeMap::new());
        assert_eq!(calls.len(), 4);
        let call_ids: Vec<&str> = calls.iter().map(|c| c.call_id.as_str()).collect();
        assert!(call_ids.contains(&"architect_M1"));
        assert!(call_ids.contains(&"implementer_M2"));
    }

    #[test]
    fn iterate_uses_one_model_per_role_from_assignments() {
        let dir = tempdir().unwrap();
        let memory = repair_memory(&Value::Null, dir.path());
        let prompts = Prompts::default();
        let mut task = sample_task();
        task.phase = "iterate".to_string();
        let mut assignments = BTreeMap::new();
        assignments.insert("architect".to_string(), "M2".to_string());
        assignments.insert("implementer".to_string(), "M1".to_string());
        let calls = build_agent_inputs(&memory, &task, &prompts, &assignments);
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().any(|c| c.call_id == "architect_M2"));
        assert!(calls.iter().any(|c| c.call_id == "implementer_M1"));
    }

    #[test]
    fn invalid_assignment_falls_back_to_first_model_id() {
        let dir = tempdir().unwrap();
        let memory = repair_memory(&Value::Null, dir.path());
        let prompts = Prompts::default();
        let mut task = sample_task();
        task.phase = "iterate".to_string();
        let mut assignments = BTreeMap::new();
        assignments.insert("architect".to_string(), "not-a-real-model".to_string());
        let calls = build_agent_inputs(&memory, &task, &prompts, &assignments);
        let architect_call = calls.iter().find(|c| c.agent_id == "architect").unwrap();
        assert_eq!(architect_call.model_id, "M1");
    }
}
