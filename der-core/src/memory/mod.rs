//! The durable memory store: bandit statistics, model/chairman pools, the
//! code directory index, and chairman state — loaded, repaired and
//! persisted once per run.

mod repair;
mod run_id;
mod types;

pub use repair::{calculate_weights, repair_cell, repair_memory};
pub use run_id::next_run_id;
pub use types::*;

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{MemoryError, MemoryResult};

fn memory_path(root: &Path) -> PathBuf {
    root.join("memory").join("memory.json")
}

/// Reads `memory/memory.json`, returning `None` on any I/O or parse failure
/// (missing file, truncated JSON, permission error) — the caller treats a
/// `None` the same as "no memory yet" and repairs from empty.
pub fn load_memory_file(path: &Path) -> Option<Value> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Plain, non-atomic write of `memory.json` — used by [`load_or_create`] on
/// first run / after repair. The per-run persisted write goes through
/// [`crate::persist::write_memory`] instead, which rotates the previous file.
pub fn write_memory(memory: &Memory, path: &Path) -> MemoryResult<()> {
    let content = crate::json_sorted::to_sorted_pretty(memory).map_err(|e| MemoryError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::Other, e),
    })?;
    std::fs::write(path, content).map_err(|e| MemoryError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Loads memory for `root`, creating and repairing it if absent or invalid.
/// Returns the repaired memory plus whether this is the very first run
/// (no prior memory.json existed).
pub fn load_or_create_memory(root: &Path) -> MemoryResult<(Memory, bool)> {
    let memory_dir = root.join("memory");
    std::fs::create_dir_all(&memory_dir).map_err(|e| MemoryError::Io {
        path: memory_dir.clone(),
        source: e,
    })?;

    let path = memory_path(root);
    let raw = load_memory_file(&path);
    let first_run = raw.is_none();

    let repaired = repair_memory(raw.as_ref().unwrap_or(&Value::Null), root);

    let needs_write = match &raw {
        Some(existing) => serde_json::to_value(&repaired).ok().as_ref() != Some(existing),
        None => true,
    };

    if needs_write {
        if write_memory(&repaired, &path).is_err() {
            warn!(path = %path.display(), "retrying memory write after failure");
            if write_memory(&repaired, &path).is_err() {
                return Err(MemoryError::WriteFailed { path });
            }
        }
    }

    debug!(first_run, run_id = %repaired.current_run_id, "memory loaded");
    Ok((repaired, first_run))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn first_run_creates_seeded_memory_file() {
        let dir = tempdir().unwrap();
        let (memory, first_run) = load_or_create_memory(dir.path()).unwrap();
        assert!(first_run);
        assert!(memory_path(dir.path()).exists());
        assert_eq!(memory.model_pool.len(), 2);
    }

    #[test]
    fn subsequent_run_is_not_first_run() {
        let dir = tempdir().unwrap();
        load_or_create_memory(dir.path()).unwrap();
        let (_memory, first_run) = load_or_create_memory(dir.path()).unwrap();
        assert!(!first_run);
    }
}
