//! `edit_file`: replace one exact text occurrence in a file.

use crate::{parse_input, ConfirmEditFn, Tool};
use axe_core::error::ToolError;
use serde::Deserialize;
use serde_json::{json, Value};

pub struct EditFile {
    confirm: Option<ConfirmEditFn>,
}

#[derive(Deserialize)]
struct Params {
    path: String,
    old_text: String,
    new_text: String,
}

impl EditFile {
    pub fn new(confirm: Option<ConfirmEditFn>) -> Self {
        Self { confirm }
    }
}

#[async_trait::async_trait]
impl Tool for EditFile {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace exact text in a file"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path"},
                "old_text": {"type": "string", "description": "Exact text to find"},
                "new_text": {"type": "string", "description": "Replacement text"}
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, input: &Value) -> Result<String, ToolError> {
        let params: Params = parse_input(input)?;
        let content = tokio::fs::read_to_string(&params.path)
            .await
            .map_err(|e| ToolError::execution(format!("read {}: {e}", params.path)))?;

        if !content.contains(&params.old_text) {
            return Err(ToolError::execution(format!(
                "old_text not found in {}",
                params.path
            )));
        }

        if let Some(confirm) = &self.confirm {
            if !confirm(&params.path, &params.old_text, &params.new_text) {
                return Ok("canceled by user".to_string());
            }
        }

        let updated = content.replacen(&params.old_text, &params.new_text, 1);
        tokio::fs::write(&params.path, updated)
            .await
            .map_err(|e| ToolError::execution(format!("write {}: {e}", params.path)))?;
        Ok(format!("edited {}", params.path))
    }
}
