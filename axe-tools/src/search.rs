//! `search_files`: line-number grep over source and doc files.

use crate::{parse_input, skip_dir, Tool};
use axe_core::error::ToolError;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use walkdir::WalkDir;

const MAX_MATCHES: usize = 50;

/// Extensions included in the search.
const INCLUDE_EXTENSIONS: [&str; 12] = [
    "rs", "go", "py", "js", "ts", "yaml", "yml", "json", "md", "txt", "toml", "mod",
];

pub struct SearchFiles;

#[derive(Deserialize)]
struct Params {
    pattern: String,
    path: String,
}

#[async_trait::async_trait]
impl Tool for SearchFiles {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search for a pattern in files using grep"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "Search pattern (regex)"},
                "path": {"type": "string", "description": "Directory to search in"}
            },
            "required": ["pattern", "path"]
        })
    }

    async fn execute(&self, input: &Value) -> Result<String, ToolError> {
        let params: Params = parse_input(input)?;
        let regex = Regex::new(&params.pattern)
            .map_err(|e| ToolError::InvalidArguments(format!("bad pattern: {e}")))?;
        tokio::task::spawn_blocking(move || search(&regex, &params.path))
            .await
            .map_err(|e| ToolError::execution(e.to_string()))?
    }
}

fn search(regex: &Regex, path: &str) -> Result<String, ToolError> {
    let mut matches = Vec::new();
    let walker = WalkDir::new(path)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !skip_dir(&e.file_name().to_string_lossy()));

    'walk: for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let included = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| INCLUDE_EXTENSIONS.contains(&ext));
        if !included {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        for (i, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                matches.push(format!("{}:{}:{}", entry.path().display(), i + 1, line));
                if matches.len() >= MAX_MATCHES {
                    break 'walk;
                }
            }
        }
    }

    if matches.is_empty() {
        return Ok("(no matches)".to_string());
    }
    let mut result = matches.join("\n");
    if matches.len() >= MAX_MATCHES {
        result.push_str("\n... (truncated, 50+ matches)");
    }
    Ok(result)
}
