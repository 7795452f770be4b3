//! `think`: a no-op that lets the model externalize planning.

use crate::Tool;
use axe_core::error::ToolError;
use serde_json::{json, Value};

pub struct Think;

#[async_trait::async_trait]
impl Tool for Think {
    fn name(&self) -> &str {
        "think"
    }

    fn description(&self) -> &str {
        "Plan your approach before making changes. Use this to break down complex tasks into steps, reason about trade-offs, or organize your thoughts. This tool has no side effects."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "thought": {
                    "type": "string",
                    "description": "Your step-by-step plan or reasoning"
                }
            },
            "required": ["thought"]
        })
    }

    async fn execute(&self, _input: &Value) -> Result<String, ToolError> {
        Ok("Plan noted. Proceed with execution.".to_string())
    }
}
