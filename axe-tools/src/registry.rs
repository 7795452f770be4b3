//! Tool registry: dispatch, confirmation wiring, post-exec hook.

use crate::{
    BatchConfirmFn, BgCommand, ConfirmEditFn, ConfirmFn, ConfirmOverwriteFn, EditFile, ExecCmd,
    GlobTool, ListDir, PostExecHook, ReadFile, SearchFiles, Think, Tool, WriteFile,
};
use axe_core::agent::ToolDispatcher;
use axe_core::error::ToolError;
use axe_core::types::ToolDef;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// A pending mutating call shown to the user for batch approval.
#[derive(Debug, Clone)]
pub struct BatchConfirmItem {
    pub name: String,
    pub input: Value,
}

/// Confirmation callbacks supplied by the REPL layer.
#[derive(Default)]
pub struct RegistryOpts {
    pub confirm: Option<ConfirmFn>,
    pub confirm_overwrite: Option<ConfirmOverwriteFn>,
    pub confirm_edit: Option<ConfirmEditFn>,
}

/// Turn-scoped set of tools whose per-call confirmation short-circuits to
/// yes after a batch approval. Shared between the registry and the wrapped
/// confirm callbacks handed to tools.
#[derive(Default)]
struct SkipSet {
    inner: Mutex<HashSet<String>>,
}

impl SkipSet {
    fn contains(&self, name: &str) -> bool {
        self.inner
            .lock()
            .map(|set| set.contains(name))
            .unwrap_or(false)
    }

    fn set(&self, name: &str, skip: bool) {
        if let Ok(mut set) = self.inner.lock() {
            if skip {
                set.insert(name.to_string());
            } else {
                set.remove(name);
            }
        }
    }
}

pub struct Registry {
    tools: HashMap<String, Arc<dyn Tool>>,
    skip_confirm: Arc<SkipSet>,
    batch_confirm: Option<BatchConfirmFn>,
    post_hook: Option<PostExecHook>,
}

impl Registry {
    /// Build the registry with the nine built-in tools, wiring each confirm
    /// callback through the batch-approval skip set.
    pub fn new(opts: RegistryOpts) -> Self {
        let skip_confirm = Arc::new(SkipSet::default());

        let confirm: Option<ConfirmFn> = opts.confirm.map(|f| {
            let skip = Arc::clone(&skip_confirm);
            Arc::new(move |cmd: &str| {
                if skip.contains("execute_command") || skip.contains("bg_command") {
                    return true;
                }
                f(cmd)
            }) as ConfirmFn
        });
        let confirm_overwrite: Option<ConfirmOverwriteFn> = opts.confirm_overwrite.map(|f| {
            let skip = Arc::clone(&skip_confirm);
            Arc::new(move |path: &str, old: usize, new: usize| {
                if skip.contains("write_file") {
                    return true;
                }
                f(path, old, new)
            }) as ConfirmOverwriteFn
        });
        let confirm_edit: Option<ConfirmEditFn> = opts.confirm_edit.map(|f| {
            let skip = Arc::clone(&skip_confirm);
            Arc::new(move |path: &str, old: &str, new: &str| {
                if skip.contains("edit_file") {
                    return true;
                }
                f(path, old, new)
            }) as ConfirmEditFn
        });

        let mut registry = Self {
            tools: HashMap::new(),
            skip_confirm,
            batch_confirm: None,
            post_hook: None,
        };
        registry.register(Arc::new(ReadFile));
        registry.register(Arc::new(WriteFile::new(confirm_overwrite)));
        registry.register(Arc::new(EditFile::new(confirm_edit)));
        registry.register(Arc::new(ListDir));
        registry.register(Arc::new(ExecCmd::new(confirm.clone())));
        registry.register(Arc::new(SearchFiles));
        registry.register(Arc::new(Think));
        registry.register(Arc::new(GlobTool));
        registry.register(Arc::new(BgCommand::new(confirm)));
        registry
    }

    /// Register a tool. Re-registering a name overwrites, last wins.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn set_post_exec_hook(&mut self, hook: PostExecHook) {
        self.post_hook = Some(hook);
    }

    pub fn set_batch_confirm(&mut self, f: BatchConfirmFn) {
        self.batch_confirm = Some(f);
    }

    /// Mark a tool as batch-approved for the current turn.
    pub fn set_skip_confirm(&self, name: &str, skip: bool) {
        self.skip_confirm.set(name, skip);
    }

    pub fn is_skip_confirm(&self, name: &str) -> bool {
        self.skip_confirm.contains(name)
    }

    /// Whether a tool mutates state and requires user confirmation.
    pub fn needs_confirm(name: &str) -> bool {
        matches!(
            name,
            "write_file" | "edit_file" | "execute_command" | "bg_command"
        )
    }

    /// Ask the user to approve a group of same-kind calls at once. Without
    /// a batch callback the group is implicitly approved.
    pub fn batch_confirm(&self, tool_name: &str, items: &[BatchConfirmItem]) -> bool {
        match &self.batch_confirm {
            Some(f) => f(tool_name, items),
            None => true,
        }
    }

    pub async fn execute(&self, name: &str, input: &Value) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let mut result = tool.execute(input).await?;
        if let Some(hook) = &self.post_hook {
            let extra = hook(name, input, &result);
            if !extra.is_empty() {
                result.push_str("\n\n");
                result.push_str(&extra);
            }
        }
        Ok(result)
    }

    /// Tool definitions to advertise to the model.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools
            .values()
            .map(|t| ToolDef {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.schema(),
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl ToolDispatcher for Registry {
    async fn execute(&self, name: &str, input: &Value) -> Result<String, ToolError> {
        Registry::execute(self, name, input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn unknown_tool_fails() {
        let registry = Registry::new(RegistryOpts::default());
        let err = registry
            .execute("frobnicate", &json!({}))
            .await
            .expect_err("unknown");
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn post_hook_appends_to_result() {
        let mut registry = Registry::new(RegistryOpts::default());
        registry.set_post_exec_hook(Arc::new(|name, _input, _result| {
            if name == "think" {
                "verified".to_string()
            } else {
                String::new()
            }
        }));

        let result = registry
            .execute("think", &json!({"thought": "plan"}))
            .await
            .expect("think");
        assert!(result.ends_with("\n\nverified"));
    }

    #[tokio::test]
    async fn empty_hook_output_appends_nothing() {
        let mut registry = Registry::new(RegistryOpts::default());
        registry.set_post_exec_hook(Arc::new(|_, _, _| String::new()));
        let result = registry
            .execute("think", &json!({"thought": "plan"}))
            .await
            .expect("think");
        assert!(!result.contains("\n\n"));
    }

    #[test]
    fn needs_confirm_covers_mutating_tools() {
        for name in ["write_file", "edit_file", "execute_command", "bg_command"] {
            assert!(Registry::needs_confirm(name));
        }
        for name in ["read_file", "glob", "search_files", "think", "list_directory"] {
            assert!(!Registry::needs_confirm(name));
        }
    }

    #[test]
    fn last_registration_wins() {
        struct Fake(&'static str);
        #[async_trait::async_trait]
        impl Tool for Fake {
            fn name(&self) -> &str {
                "think"
            }
            fn description(&self) -> &str {
                self.0
            }
            fn schema(&self) -> Value {
                json!({"type": "object"})
            }
            async fn execute(&self, _input: &Value) -> Result<String, ToolError> {
                Ok(self.0.to_string())
            }
        }

        let mut registry = Registry::new(RegistryOpts::default());
        registry.register(Arc::new(Fake("replacement")));
        let def = registry
            .definitions()
            .into_iter()
            .find(|d| d.name == "think")
            .expect("think registered");
        assert_eq!(def.description, "replacement");
    }

    #[tokio::test]
    async fn skip_confirm_short_circuits_command_confirmation() {
        let asked = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&asked);
        let registry = Registry::new(RegistryOpts {
            confirm: Some(Arc::new(move |_cmd| {
                counter.fetch_add(1, Ordering::Relaxed);
                false
            })),
            ..Default::default()
        });

        // Denied while the skip flag is clear.
        let err = registry
            .execute("execute_command", &json!({"command": "echo hi"}))
            .await
            .expect_err("rejected");
        assert!(matches!(err, ToolError::UserRejected));
        assert_eq!(asked.load(Ordering::Relaxed), 1);

        // Batch approval set: the per-call confirm never fires.
        registry.set_skip_confirm("execute_command", true);
        let out = registry
            .execute("execute_command", &json!({"command": "echo hi"}))
            .await
            .expect("skip-confirmed");
        assert!(out.contains("hi"));
        assert_eq!(asked.load(Ordering::Relaxed), 1);

        // Scope ends at turn boundary.
        registry.set_skip_confirm("execute_command", false);
        assert!(!registry.is_skip_confirm("execute_command"));
    }

    #[test]
    fn batch_confirm_defaults_to_approved() {
        let registry = Registry::new(RegistryOpts::default());
        assert!(registry.batch_confirm("write_file", &[]));

        let mut registry = Registry::new(RegistryOpts::default());
        registry.set_batch_confirm(Arc::new(|_, _| false));
        assert!(!registry.batch_confirm("write_file", &[]));
    }

    #[test]
    fn definitions_cover_all_builtins() {
        let registry = Registry::new(RegistryOpts::default());
        let mut names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        names.sort();
        assert_eq!(
            names,
            [
                "bg_command",
                "edit_file",
                "execute_command",
                "glob",
                "list_directory",
                "read_file",
                "search_files",
                "think",
                "write_file",
            ]
        );
    }
}
