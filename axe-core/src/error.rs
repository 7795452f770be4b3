//! Error types shared across the workspace.

/// Error returned by tool execution.
///
/// Tool errors are normally recovered inside the agent loop and reported to
/// the model as `tool_result` blocks with `is_error = true`; only a run of
/// consecutive failing rounds aborts the turn.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("command rejected by user")]
    UserRejected,

    #[error("blocked dangerous command: {0}")]
    DangerousCommand(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    ExecutionFailed(String),
}

impl ToolError {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::ExecutionFailed(message.into())
    }
}

/// Errors that abort an agent turn.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("llm: {0}")]
    Llm(String),

    #[error("budget exceeded: ${spent:.4} >= ${limit:.4} limit")]
    BudgetExceeded { spent: f64, limit: f64 },

    #[error("3 consecutive tool errors, stopping to avoid a retry loop")]
    RepeatedToolErrors,

    #[error("reached max iterations ({0}), task may be incomplete")]
    MaxIterations(usize),

    #[error("compact: {0}")]
    Compact(String),
}
