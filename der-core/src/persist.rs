//! Applies a run's approved edits to the filesystem, folds them back into
//! the in-memory directory index, periodically asks the chairman for a
//! standing-priorities overview, and performs the final atomic persistence
//! of `task.json`/`memory.json` for the run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::info;

use crate::analysis::extract_functions_imports_constants;
use crate::error::{PersistError, PersistResult};
use crate::lenient_json::load_output;
use crate::memory::{next_run_id, repair_memory, CodeDirectoryNode, Edit, FileRecord, Memory};
use crate::pathsafe::is_within_base;
use crate::provider::{InvokePayload, Provider};
use crate::runner::run_provider;
use crate::task::Task;

/// Collects every file path under a directory-structure node, sorted by
/// key at each level (children walked depth-first).
pub fn extract_file_paths(node: &CodeDirectoryNode) -> Vec<String> {
    let mut paths: Vec<String> = node.files.iter().map(|f| f.path.clone()).collect();
    for (_, child) in node.dirs.iter() {
        paths.extend(extract_file_paths(child));
    }
    paths.sort();
    paths
}

/// Parses a chairman overview response's `next_priorities` into a string
/// list, tolerating any non-array/non-string entries by dropping them.
pub fn parse_priorities(overview_output: &str) -> Vec<String> {
    let Some(map) = load_output(overview_output) else {
        return Vec::new();
    };
    map.get("next_priorities")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn dedupe_preserving_first(existing: &[String], fresh: &[String]) -> Vec<String> {
    let mut seen: std::collections::BTreeSet<String> = existing.iter().cloned().collect();
    let mut merged = existing.to_vec();
    for item in fresh {
        if seen.insert(item.clone()) {
            merged.push(item.clone());
        }
    }
    merged
}

fn build_current_code_json(final_model_dir: &Path, node: &CodeDirectoryNode) -> Value {
    let mut files = serde_json::Map::new();
    for path in extract_file_paths(node) {
        let content = std::fs::read_to_string(final_model_dir.join(&path)).unwrap_or_default();
        files.insert(path, Value::String(content));
    }
    Value::Object(files)
}

/// Invokes the chairman with an `overview` prompt over the final model's
/// whole tree, merging any new `next_priorities` into
/// `chairman_summary_store.iterate.next_priorities` (existing entries kept,
/// first occurrence wins on duplicates). Every other `iterate` field is left
/// untouched.
pub async fn chairman_overview(
    memory: &mut Memory,
    task: &Task,
    run_id: &str,
    base_path: &Path,
    rules: &str,
    overview_prompt: &str,
    provider: &dyn Provider,
) {
    let Some(chairman_id) = memory
        .chairman_active
        .clone()
        .filter(|id| memory.chairman_pool.contains_key(id))
        .or_else(|| memory.chairman_pool.keys().next().cloned())
    else {
        return;
    };
    let Some(spec) = memory.chairman_pool.get(&chairman_id).cloned() else {
        return;
    };

    let final_model_dir = base_path.join(&memory.final_model);
    let node = memory.directory_structure.models.get(&memory.final_model).cloned().unwrap_or_default();
    let current_code_json = serde_json::to_string(&build_current_code_json(&final_model_dir, &node)).unwrap_or_default();
    let task_json = crate::json_sorted::to_sorted_compact(task);

    let user_text = format!("TASK_JSON:\n{task_json}\n\nCURRENT_CODE_JSON:\n{current_code_json}\n");
    let mut metadata = BTreeMap::new();
    metadata.insert("run_id".to_string(), json!(run_id));

    let payload = InvokePayload {
        call_id: "chairman_overview".to_string(),
        agent_id: "chairman".to_string(),
        model_id: chairman_id,
        provider: spec.provider,
        provider_model: spec.provider_model,
        system_text: format!("{rules}\n\n{overview_prompt}").trim().to_string(),
        user_text,
        params: json!({"temperature": spec.params.temperature}),
        timeout_s: memory.timeout_defaults.chairman_timeout_s as u64,
        metadata,
    };

    let result = run_provider(provider, &payload).await;
    let fresh_priorities = parse_priorities(&result.output.as_str().unwrap_or_default());
    if fresh_priorities.is_empty() {
        return;
    }

    let merged = dedupe_preserving_first(&memory.chairman_summary_store.iterate.next_priorities, &fresh_priorities);
    memory.chairman_summary_store.iterate.next_priorities = merged;
}

fn rotate(path: &Path) -> PersistResult<()> {
    if !path.exists() {
        return Ok(());
    }
    let previous = path.with_file_name(format!("previous_{}", path.file_name().unwrap().to_string_lossy()));
    std::fs::rename(path, &previous).map_err(|e| PersistError::Rotate {
        path: path.to_path_buf(),
        source: e,
    })
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> PersistResult<()> {
    let content = crate::json_sorted::to_sorted_pretty(value).map_err(|e| PersistError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::Other, e),
    })?;
    std::fs::write(path, content).map_err(|e| PersistError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// The final `memory.persist` pipeline stage: rotates and rewrites
/// `task.json`, then advances run bookkeeping (`current_run_id`/
/// `last_run_id`/`runs_completed`), promotes `final_model` the run the
/// warmup period ends, re-repairs, optionally asks the chairman for an
/// overview every third completed run, and finally rotates and rewrites
/// `memory.json`. Returns the run id that was used for this run's calls.
pub async fn write_memory(
    root: &Path,
    memory: &mut Memory,
    task: &Task,
    rules: &str,
    overview_prompt: &str,
    provider: &dyn Provider,
) -> PersistResult<String> {
    let task_path = root.join("task").join("task.json");
    rotate(&task_path)?;
    write_json(&task_path, task)?;

    let used_run_id = memory.current_run_id.clone();
    let new_run_id = next_run_id(Some(&used_run_id));
    memory.last_run_id = used_run_id.clone();
    memory.current_run_id = new_run_id;
    memory.exploration.runs_completed += 1;

    let overview_required = memory.exploration.runs_completed % 3 == 0 && memory.exploration.runs_completed >= 3;

    if memory.exploration.runs_completed == memory.exploration.warmup_runs {
        if let Some(architect_stats) = memory.role_model_stats.get("architect") {
            let mut models: Vec<&String> = architect_stats.keys().collect();
            models.sort();
            if let Some(first) = models.first().cloned() {
                let mut best_model = first.clone();
                let mut best_ucb = architect_stats[&best_model].ucb;
                for model_id in &models[1..] {
                    let ucb = architect_stats[*model_id].ucb;
                    if ucb > best_ucb {
                        best_ucb = ucb;
                        best_model = (*model_id).clone();
                    }
                }
                memory.final_model = best_model;
            }
        }
    }

    let repaired = repair_memory(&serde_json::to_value(&*memory).unwrap_or(Value::Null), root);
    *memory = repaired;

    if overview_required {
        let base_path = PathBuf::from(memory.directory_structure.base_path.clone());
        chairman_overview(memory, task, &used_run_id, &base_path, rules, overview_prompt, provider).await;
    }

    let memory_path = root.join("memory").join("memory.json");
    rotate(&memory_path)?;
    if let Err(first_err) = write_json(&memory_path, memory) {
        tracing::warn!(path = %memory_path.display(), error = %first_err, "retrying memory write after failure");
        write_json(&memory_path, memory)?;
    }

    info!(run_id = %used_run_id, runs_completed = memory.exploration.runs_completed, "memory persisted");
    Ok(used_run_id)
}

/// Applies `chairman_edits` to the filesystem for the given `phase`,
/// skipping any edit whose resolved path escapes its model's base directory
/// or whose content is empty.
pub fn update_files(memory: &Memory, phase: &str, base_path: &Path) {
    let apply = |model_id: &str, edits: &[Edit]| {
        let model_dir = base_path.join(model_id);
        let _ = std::fs::create_dir_all(&model_dir);
        for edit in edits {
            if edit.content.is_empty() {
                continue;
            }
            let target = model_dir.join(&edit.path);
            if !is_within_base(&target, &model_dir) {
                continue;
            }
            if let Some(parent) = target.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let _ = std::fs::write(&target, &edit.content);
        }
    };

    if phase == "bootstrap" {
        for (model_id, bucket) in &memory.chairman_edits.bootstrap {
            apply(model_id, &bucket.approved_edits);
        }
    } else {
        apply(&memory.final_model, &memory.chairman_edits.iterate.approved_edits);
    }
}

/// Resolves `path` relative to `base`, returning `None` if it would escape.
pub fn safe_relpath(path: &Path, base: &Path) -> Option<PathBuf> {
    let candidate = if path.is_absolute() { path.to_path_buf() } else { base.join(path) };
    if !is_within_base(&candidate, base) {
        return None;
    }
    candidate.strip_prefix(base).ok().map(|p| p.to_path_buf())
}

/// Navigates (creating as needed) the nested `dirs` map by `relative_path`'s
/// components, then appends-or-updates the file record keyed by module name.
pub fn update_code_directory(root: &mut CodeDirectoryNode, relative_path: &Path, file: FileRecord) {
    let mut components: Vec<String> = relative_path
        .parent()
        .map(|p| p.components().map(|c| c.as_os_str().to_string_lossy().to_string()).collect())
        .unwrap_or_default();
    components.retain(|c| !c.is_empty() && c != ".");

    let mut node = root;
    let mut walked = PathBuf::new();
    for component in components {
        walked.push(&component);
        let child = node
            .dirs
            .entry(component.clone())
            .or_insert_with(|| CodeDirectoryNode {
                path: walked.to_string_lossy().to_string(),
                ..Default::default()
            });
        node = child;
    }

    if let Some(existing) = node.files.iter_mut().find(|f| f.module == file.module) {
        *existing = file;
    } else {
        node.files.push(file);
    }
}

/// Mirrors [`update_files`] but mutates `memory.directory_structure` instead
/// of writing to disk: re-runs static analysis over each approved edit's
/// content and folds the resulting `FileRecord` into the index.
pub fn update_directory_structure(memory: &mut Memory, phase: &str, language: &str) {
    let final_model = memory.final_model.clone();
    let base_path = memory.directory_structure.base_path.clone();

    let mut apply = |model_id: String, edits: Vec<Edit>, node: &mut CodeDirectoryNode| {
        let model_dir = PathBuf::from(&base_path).join(&model_id);
        for edit in edits {
            if edit.content.is_empty() {
                continue;
            }
            let Some(relative) = safe_relpath(Path::new(&edit.path), &model_dir) else {
                continue;
            };
            let module = relative
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| edit.path.clone());
            let analysis = extract_functions_imports_constants(language, &edit.content);
            let file = FileRecord {
                path: relative.to_string_lossy().to_string(),
                module,
                functions: analysis.functions,
                imports: analysis.imports,
                constants: analysis.constants,
            };
            update_code_directory(node, &relative, file);
        }
    };

    if phase == "bootstrap" {
        let model_ids: Vec<String> = memory.chairman_edits.bootstrap.keys().cloned().collect();
        for model_id in model_ids {
            let edits = memory
                .chairman_edits
                .bootstrap
                .get(&model_id)
                .map(|b| b.approved_edits.clone())
                .unwrap_or_default();
            let node = memory.directory_structure.models.entry(model_id.clone()).or_default();
            apply(model_id, edits, node);
        }
    } else {
        let edits = memory.chairman_edits.iterate.approved_edits.clone();
        let node = memory.directory_structure.models.entry(final_model.clone()).or_default();
        apply(final_model, edits, node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::repair_memory;
    use crate::provider::StubProvider;
    use tempfile::tempdir;

    #[test]
    fn extract_file_paths_walks_nested_dirs_sorted() {
        let mut root = CodeDirectoryNode::default();
        root.files.push(FileRecord {
            path: "b.py".into(),
            module: "b".into(),
            ..Default::default()
        });
        let mut child = CodeDirectoryNode::default();
        child.files.push(FileRecord {
            path: "sub/a.py".into(),
            module: "a".into(),
            ..Default::default()
        });
        root.dirs.insert("sub".into(), child);

        let paths = extract_file_paths(&root);
        assert_eq!(paths, vec!["b.py", "sub/a.py"]);
    }

    #[test]
    fn parse_priorities_extracts_string_list() {
        let raw = r#"{"next_priorities": ["add tests", "refactor io", 5]}"#;
        let priorities = parse_priorities(raw);
        assert_eq!(priorities, vec!["add tests", "refactor io"]);
    }

    #[test]
    fn update_files_skips_path_escaping_edits() {
        let dir = tempdir().unwrap();
        let mut memory = repair_memory(&Value::Null, dir.path());
        memory.chairman_edits.iterate.approved_edits.push(Edit {
            proposal_ids: vec![],
            path: "../escape.py".into(),
            content: "x = 1".into(),
        });
        memory.final_model = "M1".to_string();
        update_files(&memory, "iterate", dir.path());
        assert!(!dir.path().join("escape.py").exists());
    }

    #[test]
    fn update_files_writes_approved_edits_under_model_dir() {
        let dir = tempdir().unwrap();
        let mut memory = repair_memory(&Value::Null, dir.path());
        memory.final_model = "M1".to_string();
        memory.chairman_edits.iterate.approved_edits.push(Edit {
            proposal_ids: vec!["p1".into()],
            path: "main.py".into(),
            content: "print(1)".into(),
        });
        update_files(&memory, "iterate", dir.path());
        let written = std::fs::read_to_string(dir.path().join("M1").join("main.py")).unwrap();
        assert_eq!(written, "print(1)");
    }

    #[tokio::test]
    async fn write_memory_rotates_previous_files_and_advances_run_id() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("task")).unwrap();
        std::fs::create_dir_all(dir.path().join("memory")).unwrap();
        let task_path = dir.path().join("task").join("task.json");
        std::fs::write(&task_path, "{}").unwrap();

        let mut memory = repair_memory(&Value::Null, dir.path());
        let starting_run_id = memory.current_run_id.clone();
        let task = Task {
            phase: "bootstrap".into(),
            goal: "g".into(),
            language: "python".into(),
            style: "clean".into(),
        };
        let provider = StubProvider::empty_chairman();

        let used_run_id = write_memory(dir.path(), &mut memory, &task, "", "", &provider).await.unwrap();
        assert_eq!(used_run_id, starting_run_id);
        assert_eq!(memory.last_run_id, starting_run_id);
        assert_ne!(memory.current_run_id, starting_run_id);
        assert!(dir.path().join("task").join("previous_task.json").exists());
        assert_eq!(memory.exploration.runs_completed, 1);
    }
}
