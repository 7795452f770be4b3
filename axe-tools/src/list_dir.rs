//! `list_directory`: indented tree listing, three levels deep.

use crate::{parse_input, skip_dir, Tool};
use axe_core::error::ToolError;
use serde::Deserialize;
use serde_json::{json, Value};
use walkdir::WalkDir;

const MAX_DEPTH: usize = 3;

pub struct ListDir;

#[derive(Deserialize)]
struct Params {
    path: String,
}

#[async_trait::async_trait]
impl Tool for ListDir {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List files and directories in a path"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory path to list"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: &Value) -> Result<String, ToolError> {
        let params: Params = parse_input(input)?;
        let listing = tokio::task::spawn_blocking(move || list(&params.path))
            .await
            .map_err(|e| ToolError::execution(e.to_string()))?;
        Ok(listing)
    }
}

fn list(path: &str) -> String {
    let mut lines = Vec::new();
    let walker = WalkDir::new(path)
        .min_depth(1)
        .max_depth(MAX_DEPTH + 1)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !skip_dir(&e.file_name().to_string_lossy()));

    for entry in walker.flatten() {
        let depth = entry.depth() - 1;
        let indent = "  ".repeat(depth);
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_dir() {
            lines.push(format!("{indent}{name}/"));
        } else {
            lines.push(format!("{indent}{name}"));
        }
    }

    if lines.is_empty() {
        "(empty directory)".to_string()
    } else {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_with_indentation_and_skips_noise() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/nested/deep.rs"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();

        let out = ListDir
            .execute(&json!({"path": dir.path().to_string_lossy()}))
            .await
            .unwrap();

        assert!(out.contains("src/"));
        assert!(out.contains("  main.rs"));
        assert!(out.contains("    deep.rs"));
        assert!(out.contains("README.md"));
        assert!(!out.contains(".git"));
        assert!(!out.contains("node_modules"));
    }

    #[tokio::test]
    async fn depth_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b/c/d/e")).unwrap();
        std::fs::write(dir.path().join("a/b/c/d/e/too_deep.txt"), "").unwrap();
        std::fs::write(dir.path().join("a/b/c/d/edge.txt"), "").unwrap();

        let out = ListDir
            .execute(&json!({"path": dir.path().to_string_lossy()}))
            .await
            .unwrap();
        assert!(out.contains("d/"));
        assert!(!out.contains("edge.txt"));
        assert!(!out.contains("too_deep.txt"));
    }

    #[tokio::test]
    async fn empty_directory_message() {
        let dir = tempfile::tempdir().unwrap();
        let out = ListDir
            .execute(&json!({"path": dir.path().to_string_lossy()}))
            .await
            .unwrap();
        assert_eq!(out, "(empty directory)");
    }
}
