//! Strongly-typed shape of `memory/memory.json`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ROLES: [&str; 2] = ["architect", "implementer"];
pub const COST_TIERS: [&str; 3] = ["low", "mid", "high"];
pub const PROVIDERS: [&str; 3] = ["gemini", "openai", "anthropic"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub n: u32,
    pub mean_reward: f64,
    pub mean_cost: f64,
    pub last_used_run_id: Option<String>,
    pub ucb: f64,
}

impl Default for Cell {
    fn default() -> Self {
        Cell {
            n: 0,
            mean_reward: 0.0,
            mean_cost: 0.0,
            last_used_run_id: None,
            ucb: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub temperature: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub label: String,
    pub cost_tier: String,
    pub provider: String,
    pub provider_model: String,
    pub params: ModelParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChairmanSpec {
    pub label: String,
    pub provider: String,
    pub provider_model: String,
    pub params: ModelParams,
    pub cost_tier: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    pub ucb_c: f64,
    pub cost_penalty: f64,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        RoutingPolicy {
            ucb_c: 0.5,
            cost_penalty: 0.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exploration {
    pub warmup_runs: u32,
    pub runs_completed: u32,
}

impl Default for Exploration {
    fn default() -> Self {
        Exploration {
            warmup_runs: 3,
            runs_completed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutDefaults {
    pub run_agents_timeout_s: u32,
    pub chairman_timeout_s: u32,
}

impl Default for TimeoutDefaults {
    fn default() -> Self {
        TimeoutDefaults {
            run_agents_timeout_s: 300,
            chairman_timeout_s: 360,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConstantRecord {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub module: String,
    #[serde(default)]
    pub functions: Vec<String>,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub constants: Vec<ConstantRecord>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CodeDirectoryNode {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub dirs: BTreeMap<String, CodeDirectoryNode>,
    #[serde(default)]
    pub files: Vec<FileRecord>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DirectoryStructure {
    pub base_path: String,
    #[serde(flatten)]
    pub models: BTreeMap<String, CodeDirectoryNode>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DesignMoveSummary {
    pub proposal_id: String,
    pub goal: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RejectedMove {
    pub proposal_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChairmanSummary {
    #[serde(default)]
    pub accepted_design_moves: Vec<DesignMoveSummary>,
    #[serde(default)]
    pub rejected_design_moves: Vec<RejectedMove>,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub files_created: Vec<String>,
    #[serde(default)]
    pub next_priorities: Vec<String>,
    #[serde(default)]
    pub added_design_moves: Vec<DesignMoveSummary>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChairmanSummaryStore {
    #[serde(default)]
    pub bootstrap: BTreeMap<String, ChairmanSummary>,
    #[serde(default)]
    pub iterate: ChairmanSummary,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Edit {
    #[serde(default)]
    pub proposal_ids: Vec<String>,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApprovedEdits {
    #[serde(default)]
    pub approved_edits: Vec<Edit>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChairmanEdits {
    #[serde(default)]
    pub bootstrap: BTreeMap<String, ApprovedEdits>,
    #[serde(default)]
    pub iterate: ApprovedEdits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub current_run_id: String,
    pub last_run_id: String,
    pub weighted_inputs: BTreeMap<String, f64>,
    pub model_pool: BTreeMap<String, ModelSpec>,
    pub chairman_pool: BTreeMap<String, ChairmanSpec>,
    pub chairman_active: Option<String>,
    pub role_model_stats: BTreeMap<String, BTreeMap<String, Cell>>,
    pub routing_policy: RoutingPolicy,
    pub exploration: Exploration,
    pub chairman_summary_store: ChairmanSummaryStore,
    pub timeout_defaults: TimeoutDefaults,
    pub directory_structure: DirectoryStructure,
    pub final_model: String,
    pub chairman_edits: ChairmanEdits,
}
