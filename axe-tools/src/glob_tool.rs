//! `glob`: find files by name pattern.

use crate::{parse_input, skip_dir, Tool};
use axe_core::error::ToolError;
use glob::Pattern;
use serde::Deserialize;
use serde_json::{json, Value};
use walkdir::WalkDir;

const MAX_RESULTS: usize = 200;

pub struct GlobTool;

#[derive(Deserialize)]
struct Params {
    pattern: String,
    #[serde(default)]
    path: String,
}

#[async_trait::async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Search for files by name pattern (e.g. **/*.rs, *.yaml). Returns matching file paths."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "Glob pattern (e.g. **/*.rs, src/**/*.ts)"},
                "path": {"type": "string", "description": "Base directory to search in (default: current dir)"}
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, input: &Value) -> Result<String, ToolError> {
        let params: Params = parse_input(input)?;
        let pattern = Pattern::new(&params.pattern)
            .map_err(|e| ToolError::InvalidArguments(format!("bad pattern: {e}")))?;
        let base = if params.path.is_empty() {
            ".".to_string()
        } else {
            params.path
        };
        let raw = params.pattern.clone();
        tokio::task::spawn_blocking(move || Ok(glob_walk(&pattern, &raw, &base)))
            .await
            .map_err(|e| ToolError::execution(e.to_string()))?
    }
}

fn glob_walk(pattern: &Pattern, raw_pattern: &str, base: &str) -> String {
    // A `**/` prefix also matches bare names at any depth.
    let suffix_pattern = raw_pattern
        .strip_prefix("**/")
        .and_then(|s| Pattern::new(s).ok());

    let mut matches = Vec::new();
    let walker = WalkDir::new(base)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !skip_dir(&e.file_name().to_string_lossy()));

    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let path = entry.path().to_string_lossy();
        let matched = pattern.matches(&name)
            || pattern.matches(&path)
            || suffix_pattern
                .as_ref()
                .is_some_and(|p| p.matches(&name));
        if matched {
            matches.push(path.into_owned());
            if matches.len() >= MAX_RESULTS {
                break;
            }
        }
    }

    if matches.is_empty() {
        return "No files matched.".to_string();
    }
    let truncated = matches.len() >= MAX_RESULTS;
    let mut result = matches.join("\n");
    if truncated {
        result.push_str("\n... (truncated at 200 results)");
    }
    result
}
