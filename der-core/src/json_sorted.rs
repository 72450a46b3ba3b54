//! Sorted-key JSON serialization. `serde_json::Value::Object` is backed by a
//! `BTreeMap` (this crate doesn't enable the `preserve_order` feature), so
//! routing a typed value through `to_value` before serializing yields the
//! same sorted-key output as Python's `json.dumps(..., sort_keys=True)`.

use serde::Serialize;

/// Sorted, compact (no extra whitespace) JSON — matches
/// `json.dumps(value, sort_keys=True, separators=(",", ":"))`.
pub fn to_sorted_compact<T: Serialize>(value: &T) -> String {
    let sorted = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
    serde_json::to_string(&sorted).unwrap_or_default()
}

/// Sorted, two-space-indented JSON — matches
/// `json.dump(value, sort_keys=True, indent=2)`.
pub fn to_sorted_pretty<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let sorted = serde_json::to_value(value)?;
    serde_json::to_string_pretty(&sorted)
}
