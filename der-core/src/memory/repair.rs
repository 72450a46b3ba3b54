//! `repair_memory` — the single entry point that turns whatever JSON happens
//! to be on disk (possibly empty, possibly hand-edited, possibly from an
//! older schema version) into a fully valid [`Memory`]. Every field has a
//! well-defined default; nothing here ever errors, it only substitutes.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{Map, Value};

use super::types::*;

fn obj(v: &Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap_or_default()
}

fn get_str(m: &Map<String, Value>, key: &str) -> Option<String> {
    m.get(key).and_then(|v| v.as_str()).map(|s| s.trim().to_string())
}

fn get_num(m: &Map<String, Value>, key: &str) -> Option<f64> {
    m.get(key).and_then(|v| v.as_f64())
}

fn clamp_default(value: Option<f64>, lo: f64, hi: f64, default: f64) -> f64 {
    match value {
        Some(v) if v >= lo && v <= hi => v,
        _ => default,
    }
}

/// Normalizes a role-weight map (`architect`/`implementer` -> non-negative
/// weight), falling back to a uniform split when the total is non-positive.
pub fn calculate_weights(weighted_inputs: &Value) -> BTreeMap<String, f64> {
    let raw = obj(weighted_inputs);
    let mut weights: BTreeMap<String, f64> = BTreeMap::new();
    for role in ROLES {
        let w = raw
            .get(role)
            .and_then(|v| v.as_f64())
            .filter(|v| *v >= 0.0)
            .unwrap_or(0.5);
        weights.insert(role.to_string(), w);
    }
    let total: f64 = weights.values().sum();
    if total <= 0.0 {
        let uniform = 1.0 / ROLES.len() as f64;
        for role in ROLES {
            weights.insert(role.to_string(), uniform);
        }
    } else {
        for role in ROLES {
            let w = weights[role] / total;
            weights.insert(role.to_string(), w);
        }
    }
    weights
}

pub fn repair_cell(value: Option<&Value>) -> Cell {
    let m = value.map(obj).unwrap_or_default();

    let n = m
        .get("n")
        .and_then(|v| v.as_f64())
        .filter(|v| *v >= 0.0)
        .map(|v| v as u32)
        .unwrap_or(0);

    let mean_reward = clamp_default(get_num(&m, "mean_reward"), 0.0, 1.0, 0.0);
    let mean_cost = clamp_default(get_num(&m, "mean_cost"), 0.0, 1.0, 0.0);

    let last_used_run_id = m
        .get("last_used_run_id")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let ucb = get_num(&m, "ucb").unwrap_or(0.0);

    Cell {
        n,
        mean_reward,
        mean_cost,
        last_used_run_id,
        ucb,
    }
}

fn model_defaults() -> BTreeMap<&'static str, ModelSpec> {
    let mut m = BTreeMap::new();
    m.insert(
        "M1",
        ModelSpec {
            label: "Gemini 2.5 Pro".into(),
            cost_tier: "mid".into(),
            provider: "gemini".into(),
            provider_model: "gemini-2.5-pro".into(),
            params: ModelParams { temperature: 0.0 },
        },
    );
    m.insert(
        "M2",
        ModelSpec {
            label: "Claude Sonnet 4.5".into(),
            cost_tier: "mid".into(),
            provider: "anthropic".into(),
            provider_model: "claude-sonnet-4-5-20250929".into(),
            params: ModelParams { temperature: 0.0 },
        },
    );
    m
}

fn chairman_defaults() -> BTreeMap<&'static str, ChairmanSpec> {
    let mut m = BTreeMap::new();
    m.insert(
        "C1",
        ChairmanSpec {
            label: "GPT-4.1 Chairman".into(),
            provider: "openai".into(),
            provider_model: "gpt-4.1".into(),
            params: ModelParams { temperature: 0.0 },
            cost_tier: "mid".into(),
        },
    );
    m
}

fn repair_model_spec(existing: Option<&Value>, default: &ModelSpec) -> ModelSpec {
    let m = existing.map(obj).unwrap_or_default();
    if m.is_empty() {
        return default.clone();
    }

    let label = get_str(&m, "label").unwrap_or_else(|| default.label.clone());

    let cost_tier = get_str(&m, "cost_tier")
        .map(|s| s.to_lowercase())
        .filter(|s| COST_TIERS.contains(&s.as_str()))
        .unwrap_or_else(|| default.cost_tier.clone());

    let provider = get_str(&m, "provider")
        .map(|s| s.to_lowercase())
        .filter(|s| PROVIDERS.contains(&s.as_str()))
        .unwrap_or_else(|| default.provider.clone());

    let provider_model = get_str(&m, "provider_model")
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.provider_model.clone());

    let params_obj = m.get("params").map(obj).unwrap_or_default();
    let temperature = clamp_default(
        get_num(&params_obj, "temperature"),
        0.0,
        1.0,
        default.params.temperature,
    );

    ModelSpec {
        label,
        cost_tier,
        provider,
        provider_model,
        params: ModelParams { temperature },
    }
}

fn repair_chairman_spec(existing: Option<&Value>, default: &ChairmanSpec) -> ChairmanSpec {
    let m = existing.map(obj).unwrap_or_default();
    if m.is_empty() {
        return default.clone();
    }

    let label = get_str(&m, "label").unwrap_or_else(|| default.label.clone());

    let cost_tier = get_str(&m, "cost_tier")
        .map(|s| s.to_lowercase())
        .filter(|s| COST_TIERS.contains(&s.as_str()))
        .unwrap_or_else(|| default.cost_tier.clone());

    let provider = get_str(&m, "provider")
        .map(|s| s.to_lowercase())
        .filter(|s| PROVIDERS.contains(&s.as_str()))
        .unwrap_or_else(|| default.provider.clone());

    let provider_model = get_str(&m, "provider_model")
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.provider_model.clone());

    let params_obj = m.get("params").map(obj).unwrap_or_default();
    // The chairman's temperature range is wider than a role model's in the
    // original implementation (0..=2 here vs 0..=1 for model_pool); preserved
    // as-is rather than unified, see DESIGN.md.
    let temperature = clamp_default(
        get_num(&params_obj, "temperature"),
        0.0,
        2.0,
        default.params.temperature,
    );

    ChairmanSpec {
        label,
        provider,
        provider_model,
        params: ModelParams { temperature },
        cost_tier,
    }
}

/// Rebuilds a full [`Memory`] from whatever `raw` JSON is on disk. `root`
/// anchors the default `directory_structure.base_path` (`<root>/code`) and is
/// only consulted when the stored base path is missing, relative, or absent.
pub fn repair_memory(raw: &Value, root: &Path) -> Memory {
    let m = obj(raw);

    let current_run_id = get_str(&m, "current_run_id").unwrap_or_else(|| "run_000001".to_string());
    let last_run_id = get_str(&m, "last_run_id").unwrap_or_else(|| "run_000000".to_string());

    let weighted_inputs =
        calculate_weights(m.get("weighted_inputs").unwrap_or(&Value::Null));

    let model_pool_raw = obj(m.get("model_pool").unwrap_or(&Value::Null));
    let defaults = model_defaults();
    let mut model_pool: BTreeMap<String, ModelSpec> = BTreeMap::new();
    for (id, default) in &defaults {
        let repaired = repair_model_spec(model_pool_raw.get(*id), default);
        model_pool.insert(id.to_string(), repaired);
    }
    let model_ids: Vec<String> = model_pool.keys().cloned().collect();

    let chairman_pool_raw = obj(m.get("chairman_pool").unwrap_or(&Value::Null));
    let chairman_defaults = chairman_defaults();
    let mut chairman_pool: BTreeMap<String, ChairmanSpec> = BTreeMap::new();
    for (id, default) in &chairman_defaults {
        let repaired = repair_chairman_spec(chairman_pool_raw.get(*id), default);
        chairman_pool.insert(id.to_string(), repaired);
    }
    let chairman_ids: Vec<String> = chairman_pool.keys().cloned().collect();

    let default_chairman = chairman_ids
        .first()
        .cloned()
        .or_else(|| model_ids.first().cloned());
    let chairman_active = get_str(&m, "chairman_active")
        .filter(|s| chairman_ids.contains(s))
        .or(default_chairman);

    let role_model_stats_raw = obj(m.get("role_model_stats").unwrap_or(&Value::Null));
    let mut role_model_stats: BTreeMap<String, BTreeMap<String, Cell>> = BTreeMap::new();
    for role in ROLES {
        let role_raw = obj(role_model_stats_raw.get(role).unwrap_or(&Value::Null));
        let mut models = BTreeMap::new();
        for model_id in &model_ids {
            models.insert(model_id.clone(), repair_cell(role_raw.get(model_id)));
        }
        role_model_stats.insert(role.to_string(), models);
    }

    let routing_policy_raw = obj(m.get("routing_policy").unwrap_or(&Value::Null));
    let routing_policy = RoutingPolicy {
        ucb_c: clamp_default(get_num(&routing_policy_raw, "ucb_c"), 0.0, 1.0, 0.5),
        cost_penalty: clamp_default(get_num(&routing_policy_raw, "cost_penalty"), 0.0, 1.0, 0.4),
    };

    let exploration_raw = obj(m.get("exploration").unwrap_or(&Value::Null));
    let warmup_runs = exploration_raw
        .get("warmup_runs")
        .and_then(|v| v.as_f64())
        .filter(|v| *v >= 0.0 && *v <= 5.0)
        .map(|v| v as u32)
        .unwrap_or(3);
    let runs_completed = exploration_raw
        .get("runs_completed")
        .and_then(|v| v.as_f64())
        .map(|v| v as u32)
        .unwrap_or(0);
    let exploration = Exploration {
        warmup_runs,
        runs_completed,
    };

    let css_raw = obj(m.get("chairman_summary_store").unwrap_or(&Value::Null));
    let bootstrap_css_raw = obj(css_raw.get("bootstrap").unwrap_or(&Value::Null));
    let mut bootstrap_css = BTreeMap::new();
    for model_id in &model_ids {
        let specs = bootstrap_css_raw.get(model_id).cloned().unwrap_or(Value::Null);
        let summary: ChairmanSummary = serde_json::from_value(specs).unwrap_or_default();
        bootstrap_css.insert(model_id.clone(), summary);
    }
    let iterate_css: ChairmanSummary =
        serde_json::from_value(css_raw.get("iterate").cloned().unwrap_or(Value::Null))
            .unwrap_or_default();
    let chairman_summary_store = ChairmanSummaryStore {
        bootstrap: bootstrap_css,
        iterate: iterate_css,
    };

    let timeout_raw = obj(m.get("timeout_defaults").unwrap_or(&Value::Null));
    let run_agents_timeout_s = timeout_raw
        .get("run_agents_timeout_s")
        .and_then(|v| v.as_f64())
        .filter(|v| *v >= 300.0 && *v <= 360.0)
        .map(|v| v as u32)
        .unwrap_or(300);
    let chairman_timeout_s = timeout_raw
        .get("chairman_timeout_s")
        .and_then(|v| v.as_f64())
        .filter(|v| *v >= 300.0 && *v <= 360.0)
        .map(|v| v as u32)
        .unwrap_or(360);
    let timeout_defaults = TimeoutDefaults {
        run_agents_timeout_s,
        chairman_timeout_s,
    };

    let ds_raw = obj(m.get("directory_structure").unwrap_or(&Value::Null));
    let base_path = get_str(&ds_raw, "base_path")
        .filter(|s| !s.is_empty())
        .map(std::path::PathBuf::from)
        .filter(|p| p.is_absolute() && p.exists() && p.is_dir())
        .unwrap_or_else(|| root.join("code"));
    let _ = std::fs::create_dir_all(&base_path);

    let mut models = BTreeMap::new();
    for model_id in &model_ids {
        let current = obj(ds_raw.get(model_id).unwrap_or(&Value::Null));
        let model_path = base_path.join(model_id);
        let _ = std::fs::create_dir_all(&model_path);
        let dirs: BTreeMap<String, CodeDirectoryNode> = current
            .get("dirs")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let files: Vec<FileRecord> = current
            .get("files")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        models.insert(
            model_id.clone(),
            CodeDirectoryNode {
                path: model_path.to_string_lossy().to_string(),
                dirs,
                files,
            },
        );
    }
    let directory_structure = DirectoryStructure {
        base_path: base_path.to_string_lossy().to_string(),
        models,
    };

    let default_final_model = "M1".to_string();
    let final_model = get_str(&m, "final_model")
        .filter(|s| model_ids.contains(s))
        .unwrap_or(default_final_model);

    let ce_raw = obj(m.get("chairman_edits").unwrap_or(&Value::Null));
    let bootstrap_ce_raw = obj(ce_raw.get("bootstrap").unwrap_or(&Value::Null));
    let mut bootstrap_ce = BTreeMap::new();
    for model_id in &model_ids {
        let specs = bootstrap_ce_raw.get(model_id).cloned().unwrap_or(Value::Null);
        let edits: ApprovedEdits = serde_json::from_value(specs).unwrap_or_default();
        bootstrap_ce.insert(model_id.clone(), edits);
    }
    let iterate_ce: ApprovedEdits =
        serde_json::from_value(ce_raw.get("iterate").cloned().unwrap_or(Value::Null))
            .unwrap_or_default();
    let chairman_edits = ChairmanEdits {
        bootstrap: bootstrap_ce,
        iterate: iterate_ce,
    };

    Memory {
        current_run_id,
        last_run_id,
        weighted_inputs,
        model_pool,
        chairman_pool,
        chairman_active,
        role_model_stats,
        routing_policy,
        exploration,
        chairman_summary_store,
        timeout_defaults,
        directory_structure,
        final_model,
        chairman_edits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn repairs_empty_memory_to_seeded_defaults() {
        let dir = tempdir().unwrap();
        let memory = repair_memory(&Value::Null, dir.path());
        assert_eq!(memory.current_run_id, "run_000001");
        assert_eq!(memory.last_run_id, "run_000000");
        assert_eq!(memory.model_pool.len(), 2);
        assert!(memory.model_pool.contains_key("M1"));
        assert!(memory.model_pool.contains_key("M2"));
        assert_eq!(memory.chairman_pool["C1"].provider, "openai");
        assert_eq!(memory.exploration.warmup_runs, 3);
        assert_eq!(memory.final_model, "M1");
        for role in ROLES {
            assert_eq!(memory.role_model_stats[role].len(), 2);
        }
    }

    #[test]
    fn clamps_out_of_range_values_to_defaults() {
        let dir = tempdir().unwrap();
        let raw = serde_json::json!({
            "routing_policy": {"ucb_c": 5.0, "cost_penalty": -1.0},
            "exploration": {"warmup_runs": 99, "runs_completed": 2},
        });
        let memory = repair_memory(&raw, dir.path());
        assert_eq!(memory.routing_policy.ucb_c, 0.5);
        assert_eq!(memory.routing_policy.cost_penalty, 0.4);
        assert_eq!(memory.exploration.warmup_runs, 3);
        assert_eq!(memory.exploration.runs_completed, 2);
    }

    #[test]
    fn preserves_valid_custom_model_pool_entry() {
        let dir = tempdir().unwrap();
        let raw = serde_json::json!({
            "model_pool": {
                "M1": {
                    "label": "Custom",
                    "cost_tier": "high",
                    "provider": "openai",
                    "provider_model": "gpt-5",
                    "params": {"temperature": 0.7}
                }
            }
        });
        let memory = repair_memory(&raw, dir.path());
        assert_eq!(memory.model_pool["M1"].label, "Custom");
        assert_eq!(memory.model_pool["M1"].cost_tier, "high");
        assert_eq!(memory.model_pool["M1"].params.temperature, 0.7);
    }

    #[test]
    fn weighted_inputs_falls_back_to_uniform_on_non_positive_total() {
        let weights = calculate_weights(&serde_json::json!({"architect": -1.0, "implementer": 0.0}));
        assert_eq!(weights["architect"], 0.5);
        assert_eq!(weights["implementer"], 0.5);
    }
}
