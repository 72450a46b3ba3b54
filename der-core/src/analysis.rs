//! Lightweight per-language static analysis: pulls top-level function names,
//! imports and constant declarations out of a source file's text so the
//! directory index can be rebuilt without re-reading every file on disk.
//!
//! The original walks a real language AST; this is a line-oriented scan
//! instead — good enough to keep the directory index human-browsable
//! without pulling in a parser per supported language.

use crate::memory::ConstantRecord;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Analysis {
    pub functions: Vec<String>,
    pub imports: Vec<String>,
    pub constants: Vec<ConstantRecord>,
}

/// A constant name: no leading underscores, all remaining characters
/// uppercase/digit/underscore, with at least one letter.
fn is_constant_name(name: &str) -> bool {
    let trimmed = name.trim_start_matches('_');
    if trimmed.is_empty() {
        return false;
    }
    let has_alpha = trimmed.chars().any(|c| c.is_ascii_alphabetic());
    has_alpha && trimmed.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn dedupe_str(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for item in items {
        if seen.insert(item.clone()) {
            out.push(item);
        }
    }
    out
}

fn dedupe_constants(items: Vec<ConstantRecord>) -> Vec<ConstantRecord> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for item in items {
        if seen.insert(item.name.clone()) {
            out.push(item);
        }
    }
    out
}

fn analyze_python(content: &str) -> Analysis {
    let mut functions = Vec::new();
    let mut imports = Vec::new();
    let mut constants = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("def ") || trimmed.starts_with("async def ") {
            let rest = trimmed.trim_start_matches("async ").trim_start_matches("def ").trim();
            if let Some(name) = rest.split(['(', ':']).next() {
                functions.push(name.trim().to_string());
            }
        } else if trimmed.starts_with("import ") || trimmed.starts_with("from ") {
            imports.push(trimmed.trim_end_matches(':').trim().to_string());
        } else if let Some(eq) = trimmed.find('=') {
            if !trimmed[..eq].contains(['(', ')']) {
                let name = trimmed[..eq].trim().trim_end_matches(':');
                let name = name.split(':').next().unwrap_or(name).trim();
                if is_constant_name(name) {
                    let value = trimmed[eq + 1..].trim().to_string();
                    constants.push(ConstantRecord { name: name.to_string(), value });
                }
            }
        }
    }

    Analysis {
        functions: dedupe_str(functions),
        imports: dedupe_str(imports),
        constants: dedupe_constants(constants),
    }
}

fn analyze_brace_language(content: &str, fn_keyword_check: impl Fn(&str) -> Option<String>) -> Analysis {
    let mut functions = Vec::new();
    let mut imports = Vec::new();
    let mut constants = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("import ") || trimmed.starts_with("#include ") || trimmed.starts_with("using ") {
            imports.push(trimmed.trim_end_matches(';').trim().to_string());
        } else if let Some(name) = fn_keyword_check(trimmed) {
            functions.push(name);
        } else if (trimmed.contains("static final") || trimmed.contains("constexpr") || trimmed.contains("const "))
            && trimmed.contains('=')
        {
            if let Some(eq) = trimmed.find('=') {
                let lhs = trimmed[..eq].trim();
                if let Some(name) = lhs.rsplit(' ').next() {
                    let name = name.trim();
                    if is_constant_name(name) {
                        let value = trimmed[eq + 1..].trim().trim_end_matches(';').to_string();
                        constants.push(ConstantRecord { name: name.to_string(), value });
                    }
                }
            }
        }
    }

    Analysis {
        functions: dedupe_str(functions),
        imports: dedupe_str(imports),
        constants: dedupe_constants(constants),
    }
}

fn java_function_name(line: &str) -> Option<String> {
    if !line.contains('(') || line.trim_end().ends_with(';') {
        return None;
    }
    let visible = ["public ", "private ", "protected ", "static "];
    if !visible.iter().any(|kw| line.contains(kw)) {
        return None;
    }
    let before_paren = line.split('(').next()?;
    before_paren.split_whitespace().last().map(|s| s.to_string())
}

fn cpp_function_name(line: &str) -> Option<String> {
    if !line.contains('(') || line.trim_end().ends_with(';') || line.contains('=') {
        return None;
    }
    if line.starts_with("if") || line.starts_with("for") || line.starts_with("while") || line.starts_with("switch") {
        return None;
    }
    let before_paren = line.split('(').next()?;
    let name = before_paren.trim().rsplit([' ', '*', '&']).next()?;
    if name.is_empty() || !name.chars().next().unwrap().is_ascii_alphabetic() {
        return None;
    }
    Some(name.to_string())
}

/// The `analysis.extract` helper: derives `functions`/`imports`/`constants`
/// for a file's content, dispatched by `language` (`"python"`, `"java"`,
/// `"c++"`). An unrecognized language yields an empty analysis.
pub fn extract_functions_imports_constants(language: &str, content: &str) -> Analysis {
    match language {
        "python" => analyze_python(content),
        "java" => analyze_brace_language(content, java_function_name),
        "c++" => analyze_brace_language(content, cpp_function_name),
        _ => Analysis::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_extracts_functions_imports_and_constants() {
        let content = "import os\nfrom sys import argv\n\nMAX_RETRIES = 3\n\ndef run(x):\n    return x\n";
        let analysis = extract_functions_imports_constants("python", content);
        assert_eq!(analysis.functions, vec!["run"]);
        assert_eq!(analysis.imports, vec!["import os", "from sys import argv"]);
        assert_eq!(analysis.constants[0].name, "MAX_RETRIES");
        assert_eq!(analysis.constants[0].value, "3");
    }

    #[test]
    fn java_extracts_public_methods() {
        let content = "import java.util.List;\n\npublic class Foo {\n    public int run(int x) {\n        return x;\n    }\n}\n";
        let analysis = extract_functions_imports_constants("java", content);
        assert!(analysis.functions.contains(&"run".to_string()));
        assert_eq!(analysis.imports, vec!["import java.util.List;"]);
    }

    #[test]
    fn unrecognized_language_yields_empty_analysis() {
        let analysis = extract_functions_imports_constants("rust", "fn main() {}");
        assert_eq!(analysis, Analysis::default());
    }

    #[test]
    fn is_constant_name_requires_uppercase_with_a_letter() {
        assert!(is_constant_name("MAX_RETRIES"));
        assert!(!is_constant_name("___"));
        assert!(!is_constant_name("maxRetries"));
    }
}
