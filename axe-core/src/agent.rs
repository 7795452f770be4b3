//! The agent loop.
//!
//! One turn: append the user message, then iterate (stream a model round,
//! record the assistant message, execute any requested tools, feed the
//! results back) until the model answers without tool calls or a limit
//! trips: iteration cap, budget, repeated tool errors.

use crate::error::{AgentError, ToolError};
use crate::input::parse_image_blocks;
use crate::types::{ContentBlock, Message, Response, Role};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Rounds per turn before the loop gives up.
const MAX_ITERATIONS: usize = 40;

/// Tool results are clamped to this many characters (not bytes).
const MAX_RESULT_CHARS: usize = 10_000;

/// Tools safe to run concurrently: they only read the filesystem.
const READ_ONLY_TOOLS: [&str; 5] = [
    "read_file",
    "list_directory",
    "search_files",
    "glob",
    "think",
];

const COMPACT_PROMPT: &str = "Summarize the conversation above, preserving: \
the user's core goal, operations and decisions made, current progress, \
important paths and code context.";

const COMPACT_ACK: &str =
    "Understood. I have the summary of the previous conversation; please continue.";

/// Callbacks invoked while a provider streams a response.
#[derive(Default)]
pub struct StreamCallbacks {
    pub on_text_delta: Option<Box<dyn Fn(&str) + Send + Sync>>,
    pub on_block_start: Option<Box<dyn Fn(usize, &ContentBlock) + Send + Sync>>,
    pub on_input_json_delta: Option<Box<dyn Fn(usize, &str) + Send + Sync>>,
    pub on_block_stop: Option<Box<dyn Fn(usize) + Send + Sync>>,
    pub on_message_done: Option<Box<dyn Fn(&Response) + Send + Sync>>,
}

impl StreamCallbacks {
    pub fn text_delta(&self, text: &str) {
        if let Some(f) = &self.on_text_delta {
            f(text);
        }
    }

    pub fn block_start(&self, index: usize, block: &ContentBlock) {
        if let Some(f) = &self.on_block_start {
            f(index, block);
        }
    }

    pub fn input_json_delta(&self, index: usize, partial: &str) {
        if let Some(f) = &self.on_input_json_delta {
            f(index, partial);
        }
    }

    pub fn block_stop(&self, index: usize) {
        if let Some(f) = &self.on_block_stop {
            f(index);
        }
    }

    pub fn message_done(&self, response: &Response) {
        if let Some(f) = &self.on_message_done {
            f(response);
        }
    }
}

/// The model surface the agent drives. Implemented by the provider pool.
#[async_trait]
pub trait AgentLlmClient: Send + Sync {
    async fn send(&self, system: &str, messages: &[Message]) -> Result<Response, AgentError>;

    async fn send_stream(
        &self,
        system: &str,
        messages: &[Message],
        callbacks: &StreamCallbacks,
    ) -> Result<Response, AgentError>;

    fn model_name(&self) -> String;
}

/// The tool surface the agent drives. Implemented by the tool registry.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn execute(&self, name: &str, input: &Value) -> Result<String, ToolError>;
}

/// A USD spending cap with the cost model supplied by the caller.
pub struct Budget {
    pub max_usd: f64,
    pub cost: Box<dyn Fn(u64, u64) -> f64 + Send + Sync>,
}

type TextFn = Arc<dyn Fn(&str) + Send + Sync>;
type UnitFn = Arc<dyn Fn() + Send + Sync>;
type ToolFn = Arc<dyn Fn(&str, &str) + Send + Sync>;
type UsageFn = Arc<dyn Fn(u64, u64, u64, u64) + Send + Sync>;
type CompactFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

pub struct Agent {
    client: Arc<dyn AgentLlmClient>,
    tools: Arc<dyn ToolDispatcher>,
    messages: Vec<Message>,
    system: String,
    total_in: u64,
    total_out: u64,
    /// Estimated-token threshold before auto-compact. 0 disables.
    max_context: u64,
    budget: Option<Budget>,
    on_text_delta: Option<TextFn>,
    on_block_done: Option<UnitFn>,
    on_tool: Option<ToolFn>,
    on_usage: Option<UsageFn>,
    on_compact: Option<CompactFn>,
}

impl Agent {
    pub fn new(
        client: Arc<dyn AgentLlmClient>,
        tools: Arc<dyn ToolDispatcher>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            client,
            tools,
            messages: Vec::new(),
            system: system_prompt.into(),
            total_in: 0,
            total_out: 0,
            max_context: 100_000,
            budget: None,
            on_text_delta: None,
            on_block_done: None,
            on_tool: None,
            on_usage: None,
            on_compact: None,
        }
    }

    pub fn on_text_delta(&mut self, f: impl Fn(&str) + Send + Sync + 'static) {
        self.on_text_delta = Some(Arc::new(f));
    }

    pub fn on_block_done(&mut self, f: impl Fn() + Send + Sync + 'static) {
        self.on_block_done = Some(Arc::new(f));
    }

    pub fn on_tool(&mut self, f: impl Fn(&str, &str) + Send + Sync + 'static) {
        self.on_tool = Some(Arc::new(f));
    }

    pub fn on_usage(&mut self, f: impl Fn(u64, u64, u64, u64) + Send + Sync + 'static) {
        self.on_usage = Some(Arc::new(f));
    }

    pub fn on_compact(&mut self, f: impl Fn(u64, u64) + Send + Sync + 'static) {
        self.on_compact = Some(Arc::new(f));
    }

    pub fn set_budget(&mut self, max_usd: f64, cost: impl Fn(u64, u64) -> f64 + Send + Sync + 'static) {
        self.budget = Some(Budget {
            max_usd,
            cost: Box::new(cost),
        });
    }

    pub fn clear_budget(&mut self) {
        self.budget = None;
    }

    pub fn set_max_context(&mut self, tokens: u64) {
        self.max_context = tokens;
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Adopt a prior conversation, used for resume.
    pub fn set_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub fn total_usage(&self) -> (u64, u64) {
        (self.total_in, self.total_out)
    }

    pub fn reset(&mut self) {
        self.messages.clear();
        self.total_in = 0;
        self.total_out = 0;
    }

    /// Replace the system prompt for subsequent calls.
    pub fn refresh_system(&mut self, prompt: impl Into<String>) {
        self.system = prompt.into();
    }

    /// Append a user message without invoking the model, used to add
    /// reference material (skill content, file snippets) on demand.
    pub fn inject_context(&mut self, text: impl Into<String>) {
        self.messages.push(Message::user_text(text));
    }

    /// Remove the last user turn and everything after it; returns the user
    /// text so the caller can retry it.
    pub fn pop_last_round(&mut self) -> Option<String> {
        for i in (0..self.messages.len()).rev() {
            if self.messages[i].role != Role::User {
                continue;
            }
            let text = self.messages[i]
                .content
                .iter()
                .find(|b| b.block_type == "text" && !b.text.is_empty())
                .map(|b| b.text.clone());
            if let Some(text) = text {
                self.messages.truncate(i);
                return Some(text);
            }
        }
        None
    }

    /// Run one full turn for `user_input`.
    pub async fn run(&mut self, user_input: &str) -> Result<(), AgentError> {
        let (image_blocks, text_only) = parse_image_blocks(user_input);
        let content = if image_blocks.is_empty() {
            vec![ContentBlock::text(user_input)]
        } else {
            let mut content = image_blocks;
            if !text_only.is_empty() {
                content.push(ContentBlock::text(text_only));
            }
            content
        };
        self.messages.push(Message::user(content));

        self.auto_compact().await;

        let mut round_in: u64 = 0;
        let mut round_out: u64 = 0;
        let mut consecutive_errors = 0;

        for _iter in 0..MAX_ITERATIONS {
            let partials: Arc<Mutex<HashMap<usize, String>>> = Arc::default();
            let callbacks = self.stream_callbacks(Arc::clone(&partials));

            let mut resp = self
                .client
                .send_stream(&self.system, &self.messages, &callbacks)
                .await?;

            round_in += resp.usage.input_tokens;
            round_out += resp.usage.output_tokens;

            // Streamed tool-call JSON is only parsed once the round is over.
            // A fragment that fails to parse leaves the block's input as the
            // provider delivered it.
            for (idx, raw) in lock(&partials).drain() {
                if let Some(block) = resp.content.get_mut(idx) {
                    if block.is_tool_use() {
                        if let Ok(parsed) = serde_json::from_str::<Value>(&raw) {
                            block.input = parsed;
                        }
                    }
                }
            }

            self.messages.push(Message::assistant(resp.content.clone()));

            let projected = self.budget.as_ref().map(|b| {
                let spent = (b.cost)(self.total_in + round_in, self.total_out + round_out);
                (spent, b.max_usd)
            });
            if let Some((spent, limit)) = projected {
                if spent >= limit {
                    self.commit_usage(round_in, round_out);
                    return Err(AgentError::BudgetExceeded { spent, limit });
                }
            }

            let pending: Vec<ContentBlock> = resp.tool_uses().cloned().collect();
            if pending.is_empty() {
                self.commit_usage(round_in, round_out);
                return Ok(());
            }

            let (results, had_error) = self.execute_tools(pending).await;

            if had_error {
                consecutive_errors += 1;
            } else {
                consecutive_errors = 0;
            }
            if consecutive_errors >= 3 {
                self.commit_usage(round_in, round_out);
                return Err(AgentError::RepeatedToolErrors);
            }

            self.messages.push(Message::user(results));

            self.auto_compact().await;
        }

        self.commit_usage(round_in, round_out);
        Err(AgentError::MaxIterations(MAX_ITERATIONS))
    }

    /// Execute one round of tool calls; results come back in input order.
    async fn execute_tools(&self, pending: Vec<ContentBlock>) -> (Vec<ContentBlock>, bool) {
        let all_read_only = pending
            .iter()
            .all(|b| READ_ONLY_TOOLS.contains(&b.name.as_str()));

        let mut results = Vec::with_capacity(pending.len());
        let mut had_error = false;

        if all_read_only && pending.len() > 1 {
            let handles: Vec<_> = pending
                .into_iter()
                .map(|block| {
                    let tools = Arc::clone(&self.tools);
                    let on_tool = self.on_tool.clone();
                    let id = block.id.clone();
                    (id, tokio::spawn(exec_one(tools, on_tool, block)))
                })
                .collect();
            for (id, handle) in handles {
                match handle.await {
                    Ok((block, errored)) => {
                        had_error |= errored;
                        results.push(block);
                    }
                    Err(e) => {
                        had_error = true;
                        results.push(ContentBlock::tool_error(id, format!("Error: {e}")));
                    }
                }
            }
        } else {
            for block in pending {
                let (block, errored) = exec_one(
                    Arc::clone(&self.tools),
                    self.on_tool.clone(),
                    block,
                )
                .await;
                had_error |= errored;
                results.push(block);
            }
        }

        (results, had_error)
    }

    fn stream_callbacks(&self, partials: Arc<Mutex<HashMap<usize, String>>>) -> StreamCallbacks {
        let mut callbacks = StreamCallbacks {
            on_input_json_delta: Some(Box::new(move |index, partial: &str| {
                lock(&partials).entry(index).or_default().push_str(partial);
            })),
            ..Default::default()
        };
        if let Some(f) = self.on_text_delta.clone() {
            callbacks.on_text_delta = Some(Box::new(move |text: &str| f(text)));
        }
        if let Some(f) = self.on_block_done.clone() {
            callbacks.on_block_stop = Some(Box::new(move |_index| f()));
        }
        callbacks
    }

    fn commit_usage(&mut self, round_in: u64, round_out: u64) {
        self.total_in += round_in;
        self.total_out += round_out;
        if let Some(f) = &self.on_usage {
            f(round_in, round_out, self.total_in, self.total_out);
        }
    }

    async fn auto_compact(&mut self) {
        if self.max_context == 0 || self.messages.len() < 6 {
            return;
        }
        let estimate = estimate_tokens(&self.messages);
        if estimate > self.max_context * 80 / 100 {
            if let Err(e) = self.compact(None).await {
                tracing::warn!("auto-compact failed: {e}");
            }
        }
    }

    /// Replace the conversation with a model-written summary skeleton.
    pub async fn compact(&mut self, hint: Option<&str>) -> Result<(), AgentError> {
        if self.messages.len() < 4 {
            return Ok(());
        }
        let before = estimate_tokens(&self.messages);

        let mut prompt = COMPACT_PROMPT.to_string();
        if let Some(hint) = hint {
            prompt.push_str("\nFocus on: ");
            prompt.push_str(hint);
        }

        let mut summary_msgs = self.messages.clone();
        summary_msgs.push(Message::user_text(prompt));

        let resp = self
            .client
            .send(&self.system, &summary_msgs)
            .await
            .map_err(|e| AgentError::Compact(e.to_string()))?;

        let summary = resp.text();
        self.total_in += resp.usage.input_tokens;
        self.total_out += resp.usage.output_tokens;

        self.messages = vec![
            Message::user_text(format!("[summary]\n{summary}")),
            Message::assistant(vec![ContentBlock::text(COMPACT_ACK)]),
        ];

        let after = estimate_tokens(&self.messages);
        if let Some(f) = &self.on_compact {
            f(before, after);
        }
        Ok(())
    }
}

async fn exec_one(
    tools: Arc<dyn ToolDispatcher>,
    on_tool: Option<ToolFn>,
    block: ContentBlock,
) -> (ContentBlock, bool) {
    if let Some(f) = &on_tool {
        f(&block.name, &block.input.to_string());
    }
    match tools.execute(&block.name, &block.input).await {
        Ok(result) => (
            ContentBlock::tool_result(block.id, clamp_result(result)),
            false,
        ),
        Err(e) => (ContentBlock::tool_error(block.id, format!("Error: {e}")), true),
    }
}

/// Clamp a tool result to [`MAX_RESULT_CHARS`] characters, never splitting a
/// code point.
fn clamp_result(result: String) -> String {
    match result.char_indices().nth(MAX_RESULT_CHARS) {
        None => result,
        Some((byte_idx, _)) => {
            let mut out = result[..byte_idx].to_string();
            out.push_str("\n... (truncated)");
            out
        }
    }
}

/// Rough token estimate: total content bytes / 3. Pessimistic for CJK,
/// optimistic for ASCII, which biases compaction toward firing early on
/// dense scripts.
pub fn estimate_tokens(messages: &[Message]) -> u64 {
    let mut bytes = 0usize;
    for msg in messages {
        for block in &msg.content {
            bytes += block.text.len() + block.content.len();
            if !block.input.is_null() {
                bytes += block.input.to_string().len();
            }
        }
    }
    (bytes / 3) as u64
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    #[test]
    fn estimator_cjk_exceeds_ascii_per_char() {
        let ascii = vec![Message::user_text("abcdefghijkl")];
        let cjk = vec![Message::user_text("你好世界测试一二三四五六")];
        let ascii_tokens = estimate_tokens(&ascii);
        let cjk_tokens = estimate_tokens(&cjk);
        assert!(ascii_tokens > 0);
        assert!(
            cjk_tokens > ascii_tokens,
            "CJK ({cjk_tokens}) should estimate above ASCII ({ascii_tokens}) for equal char count"
        );
    }

    #[test]
    fn estimator_counts_tool_inputs() {
        let without = vec![Message::assistant(vec![ContentBlock::text("x")])];
        let with = vec![Message::assistant(vec![
            ContentBlock::text("x"),
            ContentBlock::tool_use("t", "read_file", serde_json::json!({"path": "/long/path/somewhere"})),
        ])];
        assert!(estimate_tokens(&with) > estimate_tokens(&without));
    }

    #[test]
    fn clamp_preserves_utf8() {
        let input: String = "中".repeat(MAX_RESULT_CHARS + 1);
        let clamped = clamp_result(input);
        assert!(clamped.ends_with("... (truncated)"));
        assert!(!clamped.contains('\u{FFFD}'));
        let content: Vec<char> = clamped.chars().collect();
        assert_eq!(
            content.iter().filter(|c| **c == '中').count(),
            MAX_RESULT_CHARS
        );
    }

    #[test]
    fn clamp_leaves_short_results_alone() {
        assert_eq!(clamp_result("short".to_string()), "short");
    }

    #[test]
    fn read_only_set_matches_tools() {
        assert!(READ_ONLY_TOOLS.contains(&"think"));
        assert!(!READ_ONLY_TOOLS.contains(&"write_file"));
        assert!(!READ_ONLY_TOOLS.contains(&"execute_command"));
    }
}
