//! Tool registry and the built-in tool set.
//!
//! Tools are registered by name; the registry mediates confirmation
//! callbacks (with a turn-scoped batch-approval skip set) and an optional
//! post-execution hook whose output is appended to the tool result.

mod bg_command;
mod edit_file;
mod exec_cmd;
mod glob_tool;
mod ignore;
mod list_dir;
mod read_file;
mod registry;
mod search;
mod think;
mod write_file;

pub use bg_command::{BgCommand, CappedBuffer};
pub use edit_file::EditFile;
pub use exec_cmd::ExecCmd;
pub use glob_tool::GlobTool;
pub use ignore::{is_dangerous, skip_dir, DANGEROUS_PREFIXES};
pub use list_dir::ListDir;
pub use read_file::ReadFile;
pub use registry::{BatchConfirmItem, Registry, RegistryOpts};
pub use search::SearchFiles;
pub use think::Think;
pub use write_file::WriteFile;

use axe_core::error::ToolError;
use serde_json::Value;
use std::sync::Arc;

/// A callable tool: a name, a description, a JSON schema for its input,
/// and an async handler returning one text result.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> Value;
    async fn execute(&self, input: &Value) -> Result<String, ToolError>;
}

/// Confirmation callback for shell commands.
pub type ConfirmFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;
/// Confirmation callback for overwriting an existing file
/// `(path, old_lines, new_lines)`.
pub type ConfirmOverwriteFn = Arc<dyn Fn(&str, usize, usize) -> bool + Send + Sync>;
/// Confirmation callback for a surgical edit `(path, old_text, new_text)`.
pub type ConfirmEditFn = Arc<dyn Fn(&str, &str, &str) -> bool + Send + Sync>;
/// Batch approval for several same-kind mutating calls in one turn.
pub type BatchConfirmFn = Arc<dyn Fn(&str, &[BatchConfirmItem]) -> bool + Send + Sync>;
/// Called after a successful tool execution `(name, input, result)`; a
/// non-empty return is appended to the result.
pub type PostExecHook = Arc<dyn Fn(&str, &Value, &str) -> String + Send + Sync>;

pub(crate) fn parse_input<T: serde::de::DeserializeOwned>(input: &Value) -> Result<T, ToolError> {
    serde_json::from_value(input.clone()).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}
