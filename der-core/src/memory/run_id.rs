//! Monotonic run-id sequence: `run_000001`, `run_000002`, ...

pub fn next_run_id(last_run_id: Option<&str>) -> String {
    if let Some(id) = last_run_id {
        if let Some(rest) = id.strip_prefix("run_") {
            if let Ok(n) = rest.parse::<u64>() {
                return format!("run_{:06}", n + 1);
            }
        }
    }
    "run_000001".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_well_formed_id() {
        assert_eq!(next_run_id(Some("run_000001")), "run_000002");
        assert_eq!(next_run_id(Some("run_000099")), "run_000100");
    }

    #[test]
    fn falls_back_on_malformed_or_missing_id() {
        assert_eq!(next_run_id(Some("not-a-run-id")), "run_000001");
        assert_eq!(next_run_id(Some("run_abc")), "run_000001");
        assert_eq!(next_run_id(None), "run_000001");
    }
}
