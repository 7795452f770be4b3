//! `execute_command`: run a shell command after safety and confirmation
//! checks, capturing combined output.

use crate::{is_dangerous, parse_input, ConfirmFn, Tool};
use axe_core::error::ToolError;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;

pub struct ExecCmd {
    confirm: Option<ConfirmFn>,
}

#[derive(Deserialize)]
struct Params {
    command: String,
}

impl ExecCmd {
    pub fn new(confirm: Option<ConfirmFn>) -> Self {
        Self { confirm }
    }
}

#[async_trait::async_trait]
impl Tool for ExecCmd {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "Shell command to execute"}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: &Value) -> Result<String, ToolError> {
        let params: Params = parse_input(input)?;

        if is_dangerous(&params.command) {
            return Err(ToolError::DangerousCommand(params.command));
        }
        if let Some(confirm) = &self.confirm {
            if !confirm(&params.command) {
                return Err(ToolError::UserRejected);
            }
        }

        let output = Command::new("sh")
            .arg("-c")
            .arg(&params.command)
            .output()
            .await
            .map_err(|e| ToolError::execution(format!("spawn: {e}")))?;

        let mut result = String::from_utf8_lossy(&output.stdout).into_owned();
        result.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(ToolError::execution(format!(
                "command failed: {}\noutput: {result}",
                output.status
            )));
        }
        Ok(result)
    }
}
