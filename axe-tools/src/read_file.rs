//! `read_file`: read a line range from a text file.

use crate::{parse_input, Tool};
use axe_core::error::ToolError;
use serde::Deserialize;
use serde_json::{json, Value};

const MAX_READ_LINES: usize = 2000;

pub struct ReadFile;

#[derive(Deserialize)]
struct Params {
    path: String,
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    limit: usize,
}

#[async_trait::async_trait]
impl Tool for ReadFile {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Use offset and limit to read specific line ranges for large files."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path to read"},
                "offset": {"type": "integer", "description": "Start line (1-indexed, default: 1)"},
                "limit": {"type": "integer", "description": "Max lines to read (default: all)"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: &Value) -> Result<String, ToolError> {
        let params: Params = parse_input(input)?;
        let data = tokio::fs::read_to_string(&params.path)
            .await
            .map_err(|e| ToolError::execution(format!("read {}: {e}", params.path)))?;

        let lines: Vec<&str> = data.split('\n').collect();
        let total = lines.len();

        let start = params.offset.saturating_sub(1).min(total);
        let mut end = if params.limit > 0 {
            start + params.limit
        } else {
            total
        };
        if end - start > MAX_READ_LINES {
            end = start + MAX_READ_LINES;
        }
        end = end.min(total);

        let mut result = lines[start..end].join("\n");
        if end < total {
            result.push_str(&format!(
                "\n... ({} more lines, use offset={} to continue)",
                total - end,
                end + 1
            ));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read(path: &str, extra: Value) -> Result<String, ToolError> {
        let mut input = json!({"path": path});
        if let (Some(obj), Some(extra)) = (input.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        ReadFile.execute(&input).await
    }

    fn fixture(lines: usize) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        let content: Vec<String> = (1..=lines).map(|i| format!("line {i}")).collect();
        std::fs::write(&path, content.join("\n")).unwrap();
        (dir, path.to_string_lossy().into_owned())
    }

    #[tokio::test]
    async fn reads_whole_file() {
        let (_dir, path) = fixture(3);
        let out = read(&path, json!({})).await.unwrap();
        assert_eq!(out, "line 1\nline 2\nline 3");
    }

    #[tokio::test]
    async fn offset_and_limit_with_hint() {
        let (_dir, path) = fixture(100);
        let out = read(&path, json!({"offset": 5, "limit": 3})).await.unwrap();
        let (content, hint) = out.split_once("\n...").expect("truncation hint");
        assert_eq!(content, "line 5\nline 6\nline 7");
        assert!(hint.contains("93 more lines"));
        assert!(hint.contains("offset=8"));
    }

    #[tokio::test]
    async fn offset_past_end_is_empty_not_error() {
        let (_dir, path) = fixture(5);
        let out = read(&path, json!({"offset": 50})).await.unwrap();
        assert_eq!(out, "");
    }

    #[tokio::test]
    async fn clamps_at_max_lines() {
        let (_dir, path) = fixture(2500);
        let out = read(&path, json!({})).await.unwrap();
        let content_lines = out.split("\n...").next().unwrap().lines().count();
        assert_eq!(content_lines, 2000);
        assert!(out.contains("500 more lines"));
        assert!(out.contains("offset=2001"));
    }

    #[tokio::test]
    async fn missing_file_errors() {
        let err = read("/no/such/file.txt", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("/no/such/file.txt"));
    }
}
