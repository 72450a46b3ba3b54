//! Lenient extraction of a JSON object from raw agent output.
//!
//! Agents are asked to return a bare JSON object but routinely wrap it in
//! markdown fences or surround it with prose. `load_output` tries, in order:
//! a straight parse, a parse after stripping a leading/trailing ``` fence,
//! then a scan for the first balanced top-level `{...}` span.

use serde_json::Value;

pub fn load_output(output: &str) -> Option<serde_json::Map<String, Value>> {
    let text = output.trim();

    if let Some(obj) = try_parse_object(text) {
        return Some(obj);
    }

    if let Some(fenced) = strip_fence(text) {
        if let Some(obj) = try_parse_object(&fenced) {
            return Some(obj);
        }
    }

    scan_balanced_object(text)
}

fn try_parse_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn strip_fence(text: &str) -> Option<String> {
    if !text.starts_with("```") {
        return None;
    }
    let mut lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return None;
    }
    lines.remove(0);
    if let Some(last) = lines.last() {
        if last.trim().starts_with("```") {
            lines.pop();
        }
    }
    Some(lines.join("\n").trim().to_string())
}

fn scan_balanced_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.iter().position(|&c| c == '{')?;

    let mut depth = 0i32;
    let mut in_str = false;
    let mut esc = false;
    let mut obj_start: Option<usize> = None;

    for idx in start..chars.len() {
        let ch = chars[idx];

        if in_str {
            if esc {
                esc = false;
            } else if ch == '\\' {
                esc = true;
            } else if ch == '"' {
                in_str = false;
            }
            continue;
        }

        match ch {
            '"' => in_str = true,
            '{' => {
                if depth == 0 {
                    obj_start = Some(idx);
                }
                depth += 1;
            }
            '}' => {
                depth -= 1;
                if depth == 0 {
                    if let Some(os) = obj_start {
                        let candidate: String = chars[os..=idx].iter().collect();
                        if let Some(obj) = try_parse_object(&candidate) {
                            return Some(obj);
                        }
                        obj_start = None;
                    }
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_raw_object() {
        let obj = load_output(r#"{"a": 1}"#).unwrap();
        assert_eq!(obj.get("a").unwrap(), 1);
    }

    #[test]
    fn parses_fenced_object() {
        let text = "```json\n{\"a\": 1}\n```";
        let obj = load_output(text).unwrap();
        assert_eq!(obj.get("a").unwrap(), 1);
    }

    #[test]
    fn parses_object_embedded_in_prose() {
        let text = "Sure thing, here it is:\n{\"a\": {\"b\": 2}}\nHope that helps!";
        let obj = load_output(text).unwrap();
        assert_eq!(obj.get("a").unwrap().get("b").unwrap(), 2);
    }

    #[test]
    fn ignores_braces_inside_strings() {
        let text = r#"{"a": "contains } a brace", "b": 2}"#;
        let obj = load_output(text).unwrap();
        assert_eq!(obj.get("b").unwrap(), 2);
    }

    #[test]
    fn returns_none_for_non_object() {
        assert!(load_output("[1, 2, 3]").is_none());
        assert!(load_output("not json at all").is_none());
    }
}
