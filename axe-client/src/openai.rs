//! OpenAI-style chat completions adapter.
//!
//! The conversation is rewritten into chat-completions shape on the way
//! out (system message, `tool_calls`, `role=tool` results) and normalized
//! back into content blocks on the way in. Streamed tool calls arrive as
//! fragments keyed by array index and are synthesized into full
//! `tool_use` blocks when the stream ends.

use crate::error::LlmError;
use crate::retry::RetryPolicy;
use crate::{Provider, ProviderConfig};
use async_trait::async_trait;
use axe_core::agent::StreamCallbacks;
use axe_core::types::{ContentBlock, Message, Response, Role, ToolDef, Usage};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub struct OpenAiProvider {
    config: ProviderConfig,
    tools: Vec<ToolDef>,
    http: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct OaiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OaiToolCall>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    tool_call_id: String,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct OaiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OaiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct OaiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct OaiTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: OaiFunction<'a>,
}

#[derive(Serialize)]
struct OaiFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Serialize)]
struct OaiRequest<'a> {
    model: &'a str,
    messages: Vec<OaiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct OaiResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    choices: Vec<OaiChoice>,
    #[serde(default)]
    usage: OaiUsage,
}

#[derive(Deserialize)]
struct OaiChoice {
    message: OaiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct OaiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct OaiStreamChunk {
    #[serde(default)]
    id: String,
    #[serde(default)]
    choices: Vec<OaiStreamChoice>,
    usage: Option<OaiUsage>,
}

#[derive(Deserialize)]
struct OaiStreamChoice {
    #[serde(default)]
    delta: OaiStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct OaiStreamDelta {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<OaiStreamToolDelta>,
}

#[derive(Deserialize)]
struct OaiStreamToolDelta {
    index: usize,
    #[serde(default)]
    id: String,
    #[serde(default)]
    function: OaiStreamFunctionDelta,
}

#[derive(Deserialize, Default)]
struct OaiStreamFunctionDelta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Default)]
struct ToolAcc {
    id: String,
    name: String,
    args: String,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig, tools: Vec<ToolDef>) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        Ok(Self {
            config,
            tools,
            http,
            retry: RetryPolicy::default(),
        })
    }

    fn convert_tools(&self) -> Vec<OaiTool<'_>> {
        self.tools
            .iter()
            .map(|t| OaiTool {
                tool_type: "function",
                function: OaiFunction {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.input_schema,
                },
            })
            .collect()
    }

    fn request<'a>(&'a self, system: &str, messages: &[Message], stream: bool) -> OaiRequest<'a> {
        OaiRequest {
            model: &self.config.model,
            messages: convert_messages(system, messages),
            tools: self.convert_tools(),
            stream,
            max_tokens: self.config.max_tokens,
        }
    }

    async fn post(&self, body: &OaiRequest<'_>) -> Result<reqwest::Response, LlmError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let mut attempt = 0;
        loop {
            let resp = self
                .http
                .post(&url)
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {}", self.config.api_key))
                .json(body)
                .send()
                .await
                .map_err(|e| LlmError::Transport(e.to_string()))?;

            let status = resp.status().as_u16();
            if resp.status().is_success() {
                return Ok(resp);
            }
            if self.retry.retryable_status(status) && attempt < self.retry.max_retries {
                let wait = self.retry.delay_for_attempt(attempt);
                tracing::warn!("API {status}, retrying in {wait:?}");
                tokio::time::sleep(wait).await;
                attempt += 1;
                continue;
            }
            let message = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, message });
        }
    }
}

/// Rewrite the block conversation into chat-completions messages.
fn convert_messages(system: &str, messages: &[Message]) -> Vec<OaiMessage> {
    let mut out = Vec::new();
    if !system.is_empty() {
        out.push(OaiMessage {
            role: "system".to_string(),
            content: Some(system.to_string()),
            ..Default::default()
        });
    }
    for msg in messages {
        // Tool-result messages become one role=tool message per result.
        if msg
            .content
            .first()
            .is_some_and(|b| b.block_type == "tool_result")
        {
            for block in &msg.content {
                out.push(OaiMessage {
                    role: "tool".to_string(),
                    content: Some(block.content.clone()),
                    tool_call_id: block.tool_id.clone(),
                    ..Default::default()
                });
            }
            continue;
        }

        let role = match msg.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();
        for block in &msg.content {
            match block.block_type.as_str() {
                "text" => {
                    if !block.text.is_empty() {
                        text_parts.push(block.text.as_str());
                    }
                }
                "tool_use" => tool_calls.push(OaiToolCall {
                    id: block.id.clone(),
                    call_type: "function".to_string(),
                    function: OaiFunctionCall {
                        name: block.name.clone(),
                        arguments: block.input.to_string(),
                    },
                }),
                _ => {}
            }
        }
        out.push(OaiMessage {
            role: role.to_string(),
            content: (!text_parts.is_empty()).then(|| text_parts.join("\n")),
            tool_calls,
            ..Default::default()
        });
    }
    out
}

fn convert_stop_reason(reason: &str) -> String {
    match reason {
        "stop" => "end_turn",
        "tool_calls" => "tool_use",
        "length" => "max_tokens",
        other => other,
    }
    .to_string()
}

fn parse_response(resp: OaiResponse) -> Response {
    let mut result = Response {
        id: resp.id,
        role: Some(Role::Assistant),
        usage: Usage {
            input_tokens: resp.usage.prompt_tokens,
            output_tokens: resp.usage.completion_tokens,
        },
        ..Default::default()
    };
    let Some(choice) = resp.choices.into_iter().next() else {
        return result;
    };
    result.stop_reason = choice.finish_reason.as_deref().map(convert_stop_reason);
    if let Some(content) = choice.message.content {
        if !content.is_empty() {
            result.content.push(ContentBlock::text(content));
        }
    }
    for tc in choice.message.tool_calls {
        let input = serde_json::from_str(&tc.function.arguments).unwrap_or(Value::Null);
        result
            .content
            .push(ContentBlock::tool_use(tc.id, tc.function.name, input));
    }
    result
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn send(&self, system: &str, messages: &[Message]) -> Result<Response, LlmError> {
        let body = self.request(system, messages, false);
        let resp = self.post(&body).await?;
        let raw = resp
            .text()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        let parsed: OaiResponse =
            serde_json::from_str(&raw).map_err(|e| LlmError::Parse(e.to_string()))?;
        Ok(parse_response(parsed))
    }

    async fn send_stream(
        &self,
        system: &str,
        messages: &[Message],
        callbacks: &StreamCallbacks,
    ) -> Result<Response, LlmError> {
        let body = self.request(system, messages, true);
        let resp = self.post(&body).await?;

        let mut result = Response {
            role: Some(Role::Assistant),
            ..Default::default()
        };
        let mut accs: BTreeMap<usize, ToolAcc> = BTreeMap::new();
        let mut text_idx: Option<usize> = None;
        let mut buffer = String::with_capacity(512);
        let mut stream = resp.bytes_stream();
        let mut done = false;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Stream(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer.drain(..=pos);
                if decode_chunk_line(&line, &mut result, &mut accs, &mut text_idx, callbacks) {
                    done = true;
                    break;
                }
            }
            if done {
                break;
            }
        }

        if let Some(idx) = text_idx {
            callbacks.block_stop(idx);
        }
        for (_, acc) in accs {
            let input = serde_json::from_str(&acc.args).unwrap_or(Value::Null);
            let block = ContentBlock::tool_use(acc.id, acc.name, input);
            let idx = result.content.len();
            result.content.push(block);
            callbacks.block_start(idx, &result.content[idx]);
            callbacks.block_stop(idx);
        }
        callbacks.message_done(&result);

        Ok(result)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Decode one SSE line into the accumulating response. Returns true on the
/// `[DONE]` sentinel.
fn decode_chunk_line(
    line: &str,
    result: &mut Response,
    accs: &mut BTreeMap<usize, ToolAcc>,
    text_idx: &mut Option<usize>,
    callbacks: &StreamCallbacks,
) -> bool {
    let Some(payload) = line.strip_prefix("data: ") else {
        return false;
    };
    if payload == "[DONE]" {
        return true;
    }
    let Ok(chunk) = serde_json::from_str::<OaiStreamChunk>(payload) else {
        return false;
    };

    if result.id.is_empty() {
        result.id = chunk.id;
    }
    if let Some(usage) = chunk.usage {
        result.usage.input_tokens = usage.prompt_tokens;
        result.usage.output_tokens = usage.completion_tokens;
    }

    for choice in chunk.choices {
        if let Some(reason) = &choice.finish_reason {
            result.stop_reason = Some(convert_stop_reason(reason));
        }

        if !choice.delta.content.is_empty() {
            let idx = *text_idx.get_or_insert_with(|| {
                let idx = result.content.len();
                result.content.push(ContentBlock::text(""));
                idx
            });
            if result.content[idx].text.is_empty() {
                callbacks.block_start(idx, &result.content[idx]);
            }
            result.content[idx].text.push_str(&choice.delta.content);
            callbacks.text_delta(&choice.delta.content);
        }

        for tc in choice.delta.tool_calls {
            let acc = accs.entry(tc.index).or_default();
            if !tc.id.is_empty() {
                acc.id = tc.id;
            }
            acc.name.push_str(&tc.function.name);
            if !tc.function.arguments.is_empty() {
                acc.args.push_str(&tc.function.arguments);
                // Content index: tool blocks sit after the text block when
                // one exists, so fragment indices line up with the final
                // block order the loop will see.
                let content_idx = match *text_idx {
                    Some(t) => t + 1 + tc.index,
                    None => tc.index,
                };
                callbacks.input_json_delta(content_idx, &tc.function.arguments);
            }
        }
    }
    false
}
