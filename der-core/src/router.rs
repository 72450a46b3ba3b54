//! Bandit-based role routing: picks one model per role for the `iterate`
//! phase by taking the model with the highest UCB score, breaking ties by
//! lexicographically-first model id (sorted model ids, first-match argmax).

use std::collections::BTreeMap;

use crate::memory::{Memory, ROLES};

/// `role.select` pipeline stage. Bootstrap phase never narrows to a single
/// model (every model in the pool is used), so it returns an empty map.
pub fn select_role_assignments(memory: &Memory, phase: &str) -> BTreeMap<String, String> {
    if phase != "iterate" {
        return BTreeMap::new();
    }

    let mut assignments = BTreeMap::new();
    for role in ROLES {
        let Some(model_stats) = memory.role_model_stats.get(role) else {
            continue;
        };
        let models: Vec<&String> = model_stats.keys().collect();
        if models.is_empty() {
            continue;
        }

        let mut best_model = models[0].clone();
        let mut best_ucb = model_stats[&best_model].ucb;
        for model_id in &models[1..] {
            let ucb = model_stats[*model_id].ucb;
            if ucb > best_ucb {
                best_ucb = ucb;
                best_model = (*model_id).clone();
            }
        }
        assignments.insert(role.to_string(), best_model);
    }

    assignments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::repair_memory;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    #[test]
    fn bootstrap_phase_has_no_assignments() {
        let dir = tempdir().unwrap();
        let memory = repair_memory(&Value::Null, dir.path());
        let assignments = select_role_assignments(&memory, "bootstrap");
        assert!(assignments.is_empty());
    }

    #[test]
    fn iterate_phase_picks_highest_ucb_model_per_role() {
        let dir = tempdir().unwrap();
        let raw = json!({
            "role_model_stats": {
                "architect": {"M1": {"ucb": 0.2}, "M2": {"ucb": 0.9}},
                "implementer": {"M1": {"ucb": 0.5}, "M2": {"ucb": 0.1}},
            }
        });
        let memory = repair_memory(&raw, dir.path());
        let assignments = select_role_assignments(&memory, "iterate");
        assert_eq!(assignments["architect"], "M2");
        assert_eq!(assignments["implementer"], "M1");
    }

    #[test]
    fn ties_break_toward_lexicographically_first_model_id() {
        let dir = tempdir().unwrap();
        let raw = json!({
            "role_model_stats": {
                "architect": {"M1": {"ucb": 0.5}, "M2": {"ucb": 0.5}},
                "implementer": {"M1": {"ucb": 0.5}, "M2": {"ucb": 0.5}},
            }
        });
        let memory = repair_memory(&raw, dir.path());
        let assignments = select_role_assignments(&memory, "iterate");
        assert_eq!(assignments["architect"], "M1");
    }
}
