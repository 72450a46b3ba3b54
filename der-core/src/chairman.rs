//! Adjudicates the architect/implementer outputs for a model (or pair of
//! models), turns the verdict into accepted file edits, and updates the
//! bandit statistics the router reads from next run.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{json, Value};
use tracing::info;

use crate::lenient_json::load_output;
use crate::memory::{Cell, ChairmanSummary, DesignMoveSummary, Edit, Memory, RejectedMove, ROLES};
use crate::pathsafe::{is_within_base, resolve_display_path};
use crate::provider::{InvokePayload, Provider};
use crate::runner::run_provider;
use crate::task::Task;

#[derive(Debug, Clone, Default)]
pub struct RoleScore {
    pub judge_score: f64,
    pub cost_score: f64,
}

fn parse_role_score(value: Option<&Value>) -> RoleScore {
    let obj = value.and_then(|v| v.as_object());
    let judge_score = obj
        .and_then(|o| o.get("judge_score"))
        .and_then(|v| v.as_f64())
        .filter(|v| (0.0..=1.0).contains(v))
        .unwrap_or(0.0);
    let cost_score = obj
        .and_then(|o| o.get("cost_score"))
        .and_then(|v| v.as_f64())
        .filter(|v| (0.0..=1.0).contains(v))
        .unwrap_or(0.5);
    RoleScore { judge_score, cost_score }
}

#[derive(Debug, Clone, Default)]
pub struct ChairmanVerdict {
    pub approved_edits: Vec<Edit>,
    pub chairman_summary: ChairmanSummary,
    pub scoring: BTreeMap<String, RoleScore>,
}

fn parse_design_move_summary(value: &Value) -> Option<DesignMoveSummary> {
    let obj = value.as_object()?;
    let proposal_id = obj.get("proposal_id")?.as_str()?.trim().to_string();
    if proposal_id.is_empty() {
        return None;
    }
    let goal = obj.get("goal").and_then(|v| v.as_str()).unwrap_or("").to_string();
    Some(DesignMoveSummary { proposal_id, goal })
}

fn parse_rejected_move(value: &Value) -> Option<RejectedMove> {
    let obj = value.as_object()?;
    let proposal_id = obj.get("proposal_id")?.as_str()?.trim().to_string();
    if proposal_id.is_empty() {
        return None;
    }
    let reason = obj.get("reason").and_then(|v| v.as_str()).unwrap_or("").to_string();
    Some(RejectedMove { proposal_id, reason })
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
        .unwrap_or_default()
}

/// Coerces the chairman's raw response into `approved_edits`, a
/// `chairman_summary` and a per-role `scoring` map.
pub fn parse_chairman_output(model_output: Option<&Value>) -> ChairmanVerdict {
    let Some(obj) = model_output.and_then(|v| v.as_object()) else {
        return ChairmanVerdict::default();
    };

    let approved_edits = obj
        .get("approved_edits")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|e| {
                    let e = e.as_object()?;
                    let path = e.get("path")?.as_str()?.trim().to_string();
                    let content = e.get("content")?.as_str().map(|s| s.to_string())?;
                    if path.is_empty() {
                        return None;
                    }
                    Some(Edit {
                        proposal_ids: string_list(e.get("proposal_ids")),
                        path,
                        content,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let summary_obj = obj.get("chairman_summary").and_then(|v| v.as_object());
    let chairman_summary = ChairmanSummary {
        accepted_design_moves: summary_obj
            .and_then(|s| s.get("accepted_design_moves"))
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(parse_design_move_summary).collect())
            .unwrap_or_default(),
        rejected_design_moves: summary_obj
            .and_then(|s| s.get("rejected_design_moves"))
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(parse_rejected_move).collect())
            .unwrap_or_default(),
        files_changed: string_list(summary_obj.and_then(|s| s.get("files_changed"))),
        files_created: string_list(summary_obj.and_then(|s| s.get("files_created"))),
        next_priorities: string_list(summary_obj.and_then(|s| s.get("next_priorities"))),
        added_design_moves: summary_obj
            .and_then(|s| s.get("added_design_moves"))
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(parse_design_move_summary).collect())
            .unwrap_or_default(),
    };

    let scoring_obj = obj.get("scoring").and_then(|v| v.as_object());
    let mut scoring = BTreeMap::new();
    for role in ROLES {
        scoring.insert(role.to_string(), parse_role_score(scoring_obj.and_then(|s| s.get(role))));
    }

    ChairmanVerdict {
        approved_edits,
        chairman_summary,
        scoring,
    }
}

/// The exact cost-penalized UCB incremental update. `run_id` is written into
/// `last_used_run_id` before this runs — the stored value ends up as the
/// *current* run's id rather than the run that produced the observation,
/// matching the order the original updates its bandit state in.
pub fn calculate_stats(cell: &Cell, run_id: &str, score: &RoleScore, total_runs: u32, ucb_c: f64, cost_penalty: f64) -> Cell {
    let n = cell.n + 1;
    let mean_reward = cell.mean_reward + (score.judge_score - cell.mean_reward) / n as f64;
    let mean_cost = cell.mean_cost + (score.cost_score - cell.mean_cost) / n as f64;
    let ucb = mean_reward - cost_penalty * mean_cost
        + ucb_c * ((total_runs.max(2) as f64).ln() / n.max(1) as f64).sqrt();

    Cell {
        n,
        mean_reward,
        mean_cost,
        last_used_run_id: Some(run_id.to_string()),
        ucb,
    }
}

/// Builds `{proposed_updates: [...]}` pairing each implementer module with
/// its pre-edit content (read from disk when the path already exists),
/// rejecting modules whose path escapes `base_path`.
pub fn generate_module_comparison(implementer_output: &Value, base_path: &Path) -> Value {
    let Some(modules) = implementer_output
        .get("modules_added_and_updated")
        .and_then(|v| v.as_array())
    else {
        return json!({"proposed_updates": []});
    };

    let mut proposed_updates = Vec::new();
    for module in modules {
        let Some(module) = module.as_object() else { continue };
        let Some(path_str) = module.get("path").and_then(|v| v.as_str()) else { continue };
        let path = base_path.join(path_str);
        if !is_within_base(&path, base_path) {
            continue;
        }
        let current_content = std::fs::read_to_string(&path).unwrap_or_default();
        let resolved_path = resolve_display_path(&path).to_string_lossy().to_string();
        proposed_updates.push(json!({
            "proposal_ids": module.get("proposal_ids").cloned().unwrap_or(json!([])),
            "path": resolved_path,
            "current_module_content": current_content,
            "updated_module_content": module.get("content").cloned().unwrap_or(Value::String(String::new())),
        }));
    }

    json!({"proposed_updates": proposed_updates})
}

fn chairman_active_model(memory: &Memory) -> Option<String> {
    memory
        .chairman_active
        .clone()
        .filter(|id| memory.chairman_pool.contains_key(id))
        .or_else(|| memory.chairman_pool.keys().next().cloned())
}

fn build_invoke_payload(
    call_id: String,
    run_id: &str,
    rules: &str,
    chairman_prompt: &str,
    user_text: String,
    memory: &Memory,
) -> Option<InvokePayload> {
    let chairman_id = chairman_active_model(memory)?;
    let spec = memory.chairman_pool.get(&chairman_id)?;
    let mut metadata = BTreeMap::new();
    metadata.insert("run_id".to_string(), json!(run_id));

    Some(InvokePayload {
        call_id,
        agent_id: "chairman".to_string(),
        model_id: chairman_id,
        provider: spec.provider.clone(),
        provider_model: spec.provider_model.clone(),
        system_text: format!("{rules}\n\n{chairman_prompt}").trim().to_string(),
        user_text,
        params: json!({"temperature": spec.params.temperature}),
        timeout_s: memory.timeout_defaults.chairman_timeout_s as u64,
        metadata,
    })
}

/// The `chairman.merge` pipeline stage. Mutates `memory.role_model_stats`,
/// `memory.chairman_summary_store` and `memory.chairman_edits` in place, and
/// returns the approved edits so the caller can write them to disk.
pub async fn chairman_merge(
    memory: &mut Memory,
    task: &Task,
    architect_results: &BTreeMap<String, Value>,
    implementer_results: &BTreeMap<String, Value>,
    role_assignments: &BTreeMap<String, String>,
    run_id: &str,
    phase: &str,
    base_path: &Path,
    rules: &str,
    chairman_prompt: &str,
    provider: &dyn Provider,
) {
    let ucb_c = memory.routing_policy.ucb_c;
    let cost_penalty = memory.routing_policy.cost_penalty;
    let task_json = crate::json_sorted::to_sorted_compact(task);

    if phase != "iterate" {
        let model_ids: Vec<String> = memory.model_pool.keys().cloned().collect();
        for model_id in model_ids {
            let architect_output = architect_results
                .get(&format!("architect_{model_id}"))
                .cloned()
                .unwrap_or(json!({}));
            let implementer_output = implementer_results
                .get(&format!("implementer_{model_id}"))
                .cloned()
                .unwrap_or(json!({}));

            let model_base = base_path.join(&model_id);
            let module_comparison = generate_module_comparison(&implementer_output, &model_base);
            let directory_structure_json = serde_json::to_string(
                memory.directory_structure.models.get(&model_id).cloned().unwrap_or_default(),
            )
            .unwrap_or_default();
            let architect_output_json = serde_json::to_string(&architect_output).unwrap_or_default();
            let module_comparison_json = serde_json::to_string(&module_comparison).unwrap_or_default();

            let user_text = format!(
                "TASK_JSON:\n{task_json}\n\nDIRECTORY_STRUCTURE_JSON:\n{directory_structure_json}\n\nARCHITECT_OUTPUT_JSON:\n{architect_output_json}\n\nMODULE_COMPARISON_JSON:\n{module_comparison_json}\n"
            );

            let Some(payload) = build_invoke_payload(
                format!("chairman_{model_id}"),
                run_id,
                rules,
                chairman_prompt,
                user_text,
                memory,
            ) else {
                continue;
            };

            let result = run_provider(provider, &payload).await;
            let raw = result.output.as_str().unwrap_or_default();
            let verdict = match load_output(raw) {
                Some(map) => parse_chairman_output(Some(&Value::Object(map))),
                None => ChairmanVerdict::default(),
            };

            for role in ROLES {
                let total_runs: u32 = memory
                    .role_model_stats
                    .get(role)
                    .map(|models| models.values().map(|c| c.n).sum::<u32>() + 1)
                    .unwrap_or(1);
                let score = verdict.scoring.get(role).cloned().unwrap_or_default();
                let cell = memory
                    .role_model_stats
                    .entry(role.to_string())
                    .or_default()
                    .entry(model_id.clone())
                    .or_default();
                cell.last_used_run_id = Some(run_id.to_string());
                let updated = calculate_stats(cell, run_id, &score, total_runs, ucb_c, cost_penalty);
                *cell = updated;
            }

            memory
                .chairman_summary_store
                .bootstrap
                .insert(model_id.clone(), verdict.chairman_summary.clone());
            memory
                .chairman_edits
                .bootstrap
                .insert(model_id, crate::memory::ApprovedEdits { approved_edits: verdict.approved_edits });
        }
        info!(phase, "chairman merge complete");
        return;
    }

    let final_model = memory.final_model.clone();
    let architect_model = role_assignments.get("architect").cloned().unwrap_or_else(|| final_model.clone());
    let implementer_model = role_assignments.get("implementer").cloned().unwrap_or_else(|| final_model.clone());

    let architect_output = architect_results
        .get(&format!("architect_{architect_model}"))
        .cloned()
        .unwrap_or(json!({}));
    let implementer_output = implementer_results
        .get(&format!("implementer_{implementer_model}"))
        .cloned()
        .unwrap_or(json!({}));

    let final_base = base_path.join(&final_model);
    let module_comparison = generate_module_comparison(&implementer_output, &final_base);
    let directory_structure_json = serde_json::to_string(
        memory.directory_structure.models.get(&final_model).cloned().unwrap_or_default(),
    )
    .unwrap_or_default();
    let architect_output_json = serde_json::to_string(&architect_output).unwrap_or_default();
    let module_comparison_json = serde_json::to_string(&module_comparison).unwrap_or_default();

    let user_text = format!(
        "TASK_JSON:\n{task_json}\n\nDIRECTORY_STRUCTURE_JSON:\n{directory_structure_json}\n\nARCHITECT_OUTPUT_JSON:\n{architect_output_json}\n\nMODULE_COMPARISON_JSON:\n{module_comparison_json}\n"
    );

    let Some(payload) = build_invoke_payload(
        "chairman_iterate".to_string(),
        run_id,
        rules,
        chairman_prompt,
        user_text,
        memory,
    ) else {
        info!(phase, "chairman merge skipped, no active chairman");
        return;
    };

    let result = run_provider(provider, &payload).await;
    let raw = result.output.as_str().unwrap_or_default();
    let verdict = match load_output(raw) {
        Some(map) => parse_chairman_output(Some(&Value::Object(map))),
        None => ChairmanVerdict::default(),
    };

    let role_models = [("architect", &architect_model), ("implementer", &implementer_model)];
    for (role, model_id) in role_models {
        let total_runs: u32 = memory
            .role_model_stats
            .get(role)
            .map(|models| models.values().map(|c| c.n).sum::<u32>() + 1)
            .unwrap_or(1);
        let score = verdict.scoring.get(role).cloned().unwrap_or_default();
        let cell = memory
            .role_model_stats
            .entry(role.to_string())
            .or_default()
            .entry(model_id.clone())
            .or_default();
        cell.last_used_run_id = Some(run_id.to_string());
        let updated = calculate_stats(cell, run_id, &score, total_runs, ucb_c, cost_penalty);
        *cell = updated;
    }

    memory.chairman_summary_store.iterate = verdict.chairman_summary;
    memory.chairman_edits.iterate = crate::memory::ApprovedEdits { approved_edits: verdict.approved_edits };

    info!(phase, "chairman merge complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_chairman_output_drops_edits_missing_content() {
        let raw = json!({"approved_edits": [
            {"path": "a.py", "content": "x = 1"},
            {"path": "b.py"},
        ]});
        let verdict = parse_chairman_output(Some(&raw));
        assert_eq!(verdict.approved_edits.len(), 1);
        assert_eq!(verdict.approved_edits[0].path, "a.py");
    }

    #[test]
    fn calculate_stats_matches_incremental_ucb_formula() {
        let cell = Cell::default();
        let score = RoleScore { judge_score: 0.8, cost_score: 0.4 };
        let updated = calculate_stats(&cell, "run_000002", &score, 2, 0.5, 0.4);
        assert_eq!(updated.n, 1);
        assert!((updated.mean_reward - 0.8).abs() < 1e-9);
        assert!((updated.mean_cost - 0.4).abs() < 1e-9);
        let expected_ucb = 0.8 - 0.4 * 0.4 + 0.5 * (2f64.ln() / 1.0).sqrt();
        assert!((updated.ucb - expected_ucb).abs() < 1e-9);
        assert_eq!(updated.last_used_run_id.as_deref(), Some("run_000002"));
    }

    #[test]
    fn generate_module_comparison_rejects_path_escape() {
        let dir = tempfile::tempdir().unwrap();
        let implementer_output = json!({"modules_added_and_updated": [
            {"path": "../escape.py", "content": "x = 1"},
        ]});
        let comparison = generate_module_comparison(&implementer_output, dir.path());
        assert!(comparison["proposed_updates"].as_array().unwrap().is_empty());
    }

    #[test]
    fn generate_module_comparison_stores_resolved_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let implementer_output = json!({"modules_added_and_updated": [
            {"path": "pkg/a.py", "content": "x = 1"},
        ]});
        let comparison = generate_module_comparison(&implementer_output, dir.path());
        let updates = comparison["proposed_updates"].as_array().unwrap();
        assert_eq!(updates.len(), 1);
        let expected = dir.path().canonicalize().unwrap().join("pkg").join("a.py");
        assert_eq!(updates[0]["path"].as_str().unwrap(), expected.to_string_lossy());
    }
}
