//! Dispatches the built agent calls to the provider, in the deterministic
//! order `(role, model_id, call_id)`, and coerces each raw text response
//! into the architect/implementer output schema.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::calls::AgentCall;
use crate::lenient_json::load_output;
use crate::memory::Memory;
use crate::pathsafe::is_within_base;
use crate::provider::{invoke_with_timeout, InvokePayload, Provider, TokenUsage};

const ROLE_ORDER: [(&str, u8); 2] = [("architect", 0), ("implementer", 1)];

fn role_order(role: &str) -> u8 {
    ROLE_ORDER
        .iter()
        .find(|(r, _)| *r == role)
        .map(|(_, o)| *o)
        .unwrap_or(u8::MAX)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentResult {
    pub agent_id: String,
    pub model_id: String,
    pub output: Value,
    pub tokens: Option<TokenUsage>,
    pub cost: Option<f64>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// Times and runs a single provider call, translating any timeout/error into
/// `AgentResult.error` rather than propagating it — a failed agent call does
/// not abort the run.
pub async fn run_provider(provider: &dyn Provider, payload: &InvokePayload) -> AgentResult {
    let start = Instant::now();
    let outcome = invoke_with_timeout(provider, payload).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    AgentResult {
        agent_id: payload.agent_id.clone(),
        model_id: payload.model_id.clone(),
        output: Value::String(outcome.output),
        tokens: outcome.tokens,
        cost: None,
        latency_ms,
        error: outcome.error,
    }
}

const IMPLEMENTER_MODULE_KEYS: [&str; 6] = [
    "proposal_ids",
    "path",
    "content",
    "included_functions",
    "included_imports",
    "included_constants",
];

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Coerces raw model output into `{modules_added_and_updated: [...]}`,
/// dropping any module missing a non-empty `path`/`content`.
pub fn parse_implementer_output(model_output: Option<&Value>) -> Value {
    let Some(Value::Object(obj)) = model_output else {
        return json!({"modules_added_and_updated": []});
    };

    let modules = obj
        .get("modules_added_and_updated")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut out_modules = Vec::new();
    for module in modules {
        let Value::Object(module) = module else { continue };
        let mut result = Map::new();

        for key in IMPLEMENTER_MODULE_KEYS {
            let Some(value) = module.get(key) else { continue };
            match key {
                "proposal_ids" | "included_functions" | "included_imports" => {
                    result.insert(key.to_string(), json!(string_list(Some(value))));
                }
                "path" | "content" => {
                    let Some(s) = value.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) else {
                        continue;
                    };
                    result.insert(key.to_string(), Value::String(s));
                }
                "included_constants" => {
                    let list = value
                        .as_array()
                        .map(|arr| {
                            arr.iter()
                                .filter_map(|c| {
                                    let c = c.as_object()?;
                                    let name = c.get("name")?.as_str()?.trim().to_string();
                                    if name.is_empty() {
                                        return None;
                                    }
                                    let value = c.get("value").cloned().unwrap_or(Value::Null);
                                    Some(json!({"name": name, "value": value}))
                                })
                                .collect::<Vec<_>>()
                        })
                        .unwrap_or_default();
                    result.insert(key.to_string(), Value::Array(list));
                }
                _ => {}
            }
        }
        out_modules.push(Value::Object(result));
    }

    json!({"modules_added_and_updated": out_modules})
}

const DESIGN_MOVE_KEYS: [&str; 5] = ["proposal_id", "path", "function", "goal", "constraints"];

/// Coerces raw model output into `{design_moves: [...]}`, dropping any move
/// missing a non-empty `proposal_id`/`path`/`function`.
pub fn parse_architect_output(model_output: Option<&Value>) -> Value {
    let Some(Value::Object(obj)) = model_output else {
        return json!({"design_moves": []});
    };

    let moves = obj
        .get("design_moves")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut out_moves = Vec::new();
    for mv in moves {
        let Value::Object(mv) = mv else { continue };
        let mut result = Map::new();
        let mut required_ok = true;

        for key in DESIGN_MOVE_KEYS {
            let Some(value) = mv.get(key) else { continue };
            match key {
                "proposal_id" | "path" | "function" => {
                    match value.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
                        Some(s) => {
                            result.insert(key.to_string(), Value::String(s));
                        }
                        None => {}
                    }
                }
                "goal" => {
                    let s = value.as_str().unwrap_or("").trim().to_string();
                    result.insert(key.to_string(), Value::String(s));
                }
                "constraints" => {
                    result.insert(key.to_string(), json!(string_list(Some(value))));
                }
                _ => {}
            }
        }

        for required in ["proposal_id", "path", "function"] {
            if !result.contains_key(required) {
                required_ok = false;
            }
        }
        if !result.contains_key("goal") {
            result.insert("goal".to_string(), Value::String(String::new()));
        }
        if !result.contains_key("constraints") {
            result.insert("constraints".to_string(), json!([]));
        }

        if required_ok {
            out_moves.push(Value::Object(result));
        }
    }

    json!({"design_moves": out_moves})
}

/// Groups an architect's `design_moves` by target path into `new_modules`
/// (path does not exist yet) and `module_patches` (path exists, its current
/// content is attached), rejecting moves whose path escapes `model_directory`
/// or carries an empty `function`.
pub fn upload_relevant_code(architect_output: &Value, model_directory: &Path) -> Value {
    let Some(design_moves) = architect_output.get("design_moves").and_then(|v| v.as_array()) else {
        return json!({});
    };

    let mut new_modules: Vec<Value> = Vec::new();
    let mut new_modules_paths: Vec<String> = Vec::new();
    let mut module_patches: Vec<Value> = Vec::new();
    let mut module_patches_paths: Vec<String> = Vec::new();

    for mv in design_moves {
        let Some(mv) = mv.as_object() else { continue };

        let proposal_id = mv.get("proposal_id").and_then(|v| v.as_str()).unwrap_or("").trim().to_string();
        let path_str = mv.get("path").and_then(|v| v.as_str()).unwrap_or("").trim().to_string();
        if path_str.is_empty() {
            continue;
        }
        let path = std::path::PathBuf::from(&path_str);
        if !is_within_base(&path, model_directory) {
            continue;
        }
        let new_file = !path.exists() || !path.is_file();

        let function = mv.get("function").and_then(|v| v.as_str()).unwrap_or("").trim().to_string();
        if function.is_empty() {
            continue;
        }
        let goal = mv.get("goal").and_then(|v| v.as_str()).unwrap_or("").trim().to_string();
        let constraints = string_list(mv.get("constraints"));

        let edit = json!({
            "proposal_id": proposal_id,
            "function": function,
            "goal": goal,
            "constraints": constraints,
        });

        let key = path.to_string_lossy().to_string();
        if !new_file {
            if let Some(idx) = module_patches_paths.iter().position(|p| p == &key) {
                if let Some(edits) = module_patches[idx].get_mut("edits").and_then(|v| v.as_array_mut()) {
                    edits.push(edit);
                }
            } else {
                let content = std::fs::read_to_string(&path).unwrap_or_default();
                module_patches.push(json!({
                    "module_path": key,
                    "edits": [edit],
                    "module_content": content,
                }));
                module_patches_paths.push(key);
            }
        } else if let Some(idx) = new_modules_paths.iter().position(|p| p == &key) {
            if let Some(edits) = new_modules[idx].get_mut("edits").and_then(|v| v.as_array_mut()) {
                edits.push(edit);
            }
        } else {
            new_modules.push(json!({
                "module_path": key,
                "edits": [edit],
            }));
            new_modules_paths.push(key);
        }
    }

    json!({"new_modules": new_modules, "module_patches": module_patches})
}

/// The `agents.run` pipeline stage.
pub async fn run_agents(
    mut agent_calls: Vec<AgentCall>,
    role_assignments: &BTreeMap<String, String>,
    run_id: &str,
    phase: &str,
    memory: &Memory,
    base_path: &Path,
    provider: &dyn Provider,
) -> BTreeMap<String, AgentResult> {
    let final_model = memory.final_model.as_str();
    let model_specs = &memory.model_pool;
    let directory_structure = &memory.directory_structure;
    let timeout_s = memory.timeout_defaults.run_agents_timeout_s as u64;

    agent_calls.sort_by(|a, b| {
        (role_order(&a.agent_id), &a.model_id, &a.call_id).cmp(&(role_order(&b.agent_id), &b.model_id, &b.call_id))
    });

    let mut results: BTreeMap<String, AgentResult> = BTreeMap::new();

    for call in agent_calls {
        let specs = model_specs.get(&call.model_id).cloned().unwrap_or(crate::memory::ModelSpec {
            label: String::new(),
            cost_tier: String::new(),
            provider: String::new(),
            provider_model: String::new(),
            params: crate::memory::ModelParams { temperature: 0.0 },
        });

        let model_directory = if phase == "bootstrap" {
            base_path.join(&call.model_id)
        } else {
            base_path.join(final_model)
        };
        let _ = std::fs::create_dir_all(&model_directory);

        let code_model_directory = if phase == "bootstrap" {
            directory_structure.models.get(&call.model_id).cloned().unwrap_or_default()
        } else {
            directory_structure.models.get(final_model).cloned().unwrap_or_default()
        };

        let task_json = serde_json::to_string(&call.task).unwrap_or_default();
        let directory_structure_json = serde_json::to_string(&code_model_directory).unwrap_or_default();
        let chairman_summary_json = serde_json::to_string(&call.chairman_summary).unwrap_or_default();

        let system_text = format!("{}\n\n{}", call.rules, call.role_prompt).trim().to_string();
        let mut user_text = format!(
            "TASK_JSON:\n{task_json}\n\nDIRECTORY_STRUCTURE_JSON:\n{directory_structure_json}\n"
        );

        if call.agent_id == "architect" {
            user_text.push_str(&format!("\nCHAIRMAN_SUMMARY_JSON:\n{chairman_summary_json}\n"));
        } else if call.agent_id == "implementer" {
            let architect_model = if phase == "iterate" {
                role_assignments.get("architect").cloned().unwrap_or_default()
            } else {
                call.model_id.clone()
            };
            let architect_call_id = format!("architect_{architect_model}");
            if let Some(architect_result) = results.get(&architect_call_id) {
                let current_code = upload_relevant_code(&architect_result.output, &model_directory);
                let current_code_json = serde_json::to_string(&current_code).unwrap_or_default();
                user_text.push_str(&format!("EXISTING_MODULE_CODE:\n{current_code_json}\n"));
            }
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("run_id".to_string(), json!(run_id));
        metadata.insert("agent_weight".to_string(), json!(call.agent_weight));
        metadata.insert("cost_tier".to_string(), json!(specs.cost_tier));
        metadata.insert("phase".to_string(), json!(phase));

        let payload = InvokePayload {
            call_id: call.call_id.clone(),
            agent_id: call.agent_id.clone(),
            model_id: call.model_id.clone(),
            provider: specs.provider.clone(),
            provider_model: specs.provider_model.clone(),
            system_text,
            user_text,
            params: json!({"temperature": specs.params.temperature}),
            timeout_s,
            metadata,
        };

        let mut result = run_provider(provider, &payload).await;
        let raw_output = result.output.as_str().map(|s| s.to_string()).unwrap_or_default();
        let loaded = load_output(&raw_output);
        let parsed = match (loaded, call.agent_id.as_str()) {
            (Some(map), "architect") => parse_architect_output(Some(&Value::Object(map))),
            (Some(map), "implementer") => parse_implementer_output(Some(&Value::Object(map))),
            _ => json!({}),
        };
        result.output = parsed;

        if result.error.is_some() {
            warn!(call_id = %call.call_id, error = ?result.error, "agent call failed");
        } else {
            info!(call_id = %call.call_id, latency_ms = result.latency_ms, "agent call completed");
        }

        results.insert(call.call_id.clone(), result);
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_implementer_output_drops_modules_missing_content() {
        let raw = json!({"modules_added_and_updated": [
            {"path": "a.py", "content": "x = 1"},
            {"path": "b.py"},
        ]});
        let parsed = parse_implementer_output(Some(&raw));
        let modules = parsed["modules_added_and_updated"].as_array().unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0]["path"], "a.py");
    }

    #[test]
    fn parse_architect_output_requires_proposal_path_function() {
        let raw = json!({"design_moves": [
            {"proposal_id": "p1", "path": "a.py", "function": "f"},
            {"proposal_id": "p2", "path": "a.py"},
        ]});
        let parsed = parse_architect_output(Some(&raw));
        let moves = parsed["design_moves"].as_array().unwrap();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0]["proposal_id"], "p1");
        assert_eq!(moves[0]["goal"], "");
    }

    #[test]
    fn upload_relevant_code_rejects_path_escaping_moves() {
        let dir = tempfile::tempdir().unwrap();
        let architect_output = json!({"design_moves": [
            {"proposal_id": "p1", "path": "/etc/passwd", "function": "f"},
        ]});
        let result = upload_relevant_code(&architect_output, dir.path());
        assert!(result["new_modules"].as_array().unwrap().is_empty());
        assert!(result["module_patches"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_agents_bootstrap_produces_one_result_per_call() {
        use crate::calls::build_agent_inputs;
        use crate::memory::repair_memory;
        use crate::prompts::Prompts;
        use crate::provider::StubProvider;
        use crate::task::Task;

        let dir = tempfile::tempdir().unwrap();
        let memory = repair_memory(&Value::Null, dir.path());
        let task = Task {
            phase: "bootstrap".into(),
            goal: "build a thing".into(),
            language: "python".into(),
            style: "clean".into(),
        };
        let prompts = Prompts::default();
        let role_assignments = BTreeMap::new();
        let calls = build_agent_inputs(&memory, &task, &prompts, &role_assignments);
        assert_eq!(calls.len(), 4);

        let architect_provider = StubProvider::empty_architect();
        let results = run_agents(
            calls,
            &role_assignments,
            "run_000001",
            "bootstrap",
            &memory,
            dir.path(),
            &architect_provider,
        )
        .await;

        assert_eq!(results.len(), 4);
        let architect_result = &results["architect_M1"];
        assert!(architect_result.error.is_none());
        assert!(architect_result.output["design_moves"].as_array().unwrap().is_empty());
    }
}
