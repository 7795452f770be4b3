//! `write_file`: create or overwrite a file.

use crate::{parse_input, ConfirmOverwriteFn, Tool};
use axe_core::error::ToolError;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;

pub struct WriteFile {
    confirm: Option<ConfirmOverwriteFn>,
}

#[derive(Deserialize)]
struct Params {
    path: String,
    content: String,
}

impl WriteFile {
    pub fn new(confirm: Option<ConfirmOverwriteFn>) -> Self {
        Self { confirm }
    }
}

#[async_trait::async_trait]
impl Tool for WriteFile {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file with content"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path to write"},
                "content": {"type": "string", "description": "Content to write"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, input: &Value) -> Result<String, ToolError> {
        let params: Params = parse_input(input)?;

        if let Some(parent) = Path::new(&params.path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ToolError::execution(format!("mkdir: {e}")))?;
            }
        }

        if let (Ok(existing), Some(confirm)) =
            (tokio::fs::read_to_string(&params.path).await, &self.confirm)
        {
            let old_lines = existing.matches('\n').count() + 1;
            let new_lines = params.content.matches('\n').count() + 1;
            if !confirm(&params.path, old_lines, new_lines) {
                return Ok("canceled by user".to_string());
            }
        }

        tokio::fs::write(&params.path, &params.content)
            .await
            .map_err(|e| ToolError::execution(format!("write {}: {e}", params.path)))?;
        Ok(format!(
            "wrote {} bytes to {}",
            params.content.len(),
            params.path
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn creates_file_and_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/new.txt");
        let tool = WriteFile::new(None);
        let out = tool
            .execute(&json!({"path": path.to_string_lossy(), "content": "hello"}))
            .await
            .unwrap();
        assert!(out.contains("wrote 5 bytes"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }

    #[tokio::test]
    async fn overwrite_asks_and_respects_refusal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("existing.txt");
        std::fs::write(&path, "one\ntwo\nthree").unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let tool = WriteFile::new(Some(Arc::new(move |_path, old, new| {
            counter.fetch_add(1, Ordering::Relaxed);
            assert_eq!(old, 3);
            assert_eq!(new, 1);
            false
        })));

        let out = tool
            .execute(&json!({"path": path.to_string_lossy(), "content": "replacement"}))
            .await
            .unwrap();
        assert_eq!(out, "canceled by user");
        assert_eq!(seen.load(Ordering::Relaxed), 1);
        // Refusal leaves the file untouched.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\nthree");
    }

    #[tokio::test]
    async fn new_file_skips_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.txt");
        let tool = WriteFile::new(Some(Arc::new(|_, _, _| {
            panic!("confirm must not fire for a new file")
        })));
        tool.execute(&json!({"path": path.to_string_lossy(), "content": "x"}))
            .await
            .unwrap();
    }
}
