//! Anthropic messages API adapter.

use crate::error::LlmError;
use crate::retry::RetryPolicy;
use crate::{Provider, ProviderConfig};
use async_trait::async_trait;
use axe_core::agent::StreamCallbacks;
use axe_core::types::{ContentBlock, Message, Response, Role, ToolDef};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const SSE_BUFFER_CAPACITY: usize = 4096;

pub struct AnthropicProvider {
    config: ProviderConfig,
    tools: Vec<ToolDef>,
    http: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "<[ToolDef]>::is_empty")]
    tools: &'a [ToolDef],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[derive(Deserialize)]
struct SseEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    index: usize,
    message: Option<Response>,
    content_block: Option<ContentBlock>,
    delta: Option<SseDelta>,
    usage: Option<SseUsage>,
}

#[derive(Deserialize, Default)]
struct SseDelta {
    #[serde(rename = "type", default)]
    delta_type: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    partial_json: String,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct SseUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl AnthropicProvider {
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

    fn request<'a>(
        &'a self,
        system: &'a str,
        messages: &'a [Message],
        stream: bool,
    ) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system,
            messages,
            tools: &self.tools,
            stream,
        }
    }

    /// POST with the retry policy applied to retryable statuses.
    async fn post(&self, body: &MessagesRequest<'_>) -> Result<reqwest::Response, LlmError> {
        let url = format!(
            "{}/v1/messages",
            self.config.base_url.trim_end_matches('/')
        );
        let mut attempt = 0;
        loop {
            let resp = self
                .http
                .post(&url)
                .header("content-type", "application/json")
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
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
            let raw = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status,
                message: extract_error_message(&raw),
            });
        }
    }

    fn handle_sse_line(line: &str, result: &mut Response, callbacks: &StreamCallbacks) {
        let Some(data) = line
            .strip_prefix("data: ")
            .or_else(|| line.strip_prefix("data:"))
        else {
            return;
        };
        let Ok(event) = serde_json::from_str::<SseEvent>(data.trim_start()) else {
            return;
        };

        match event.event_type.as_str() {
            "message_start" => {
                if let Some(message) = event.message {
                    *result = message;
                    result.content.clear();
                }
            }
            "content_block_start" => {
                let block = event.content_block.unwrap_or_default();
                while result.content.len() <= event.index {
                    result.content.push(ContentBlock::default());
                }
                result.content[event.index] = block;
                callbacks.block_start(event.index, &result.content[event.index]);
            }
            "content_block_delta" => {
                let delta = event.delta.unwrap_or_default();
                match delta.delta_type.as_str() {
                    "text_delta" => {
                        if let Some(block) = result.content.get_mut(event.index) {
                            block.text.push_str(&delta.text);
                        }
                        callbacks.text_delta(&delta.text);
                    }
                    "input_json_delta" => {
                        // Not parsed here: the loop buffers fragments
                        // per index and parses once the stream ends.
                        callbacks.input_json_delta(event.index, &delta.partial_json);
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                callbacks.block_stop(event.index);
            }
            "message_delta" => {
                if let Some(reason) = event.delta.and_then(|d| d.stop_reason) {
                    result.stop_reason = Some(reason);
                }
                if let Some(usage) = event.usage {
                    if usage.output_tokens > 0 {
                        result.usage.output_tokens = usage.output_tokens;
                    }
                    if usage.input_tokens > 0 {
                        result.usage.input_tokens = usage.input_tokens;
                    }
                }
            }
            "message_stop" => {
                callbacks.message_done(result);
            }
            _ => {}
        }
    }
}

fn extract_error_message(raw: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(raw) {
        Ok(body) if !body.error.message.is_empty() => body.error.message,
        _ => raw.to_string(),
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn send(&self, system: &str, messages: &[Message]) -> Result<Response, LlmError> {
        let body = self.request(system, messages, false);
        let resp = self.post(&body).await?;
        let raw = resp
            .text()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| LlmError::Parse(e.to_string()))
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
        let mut buffer = String::with_capacity(SSE_BUFFER_CAPACITY);
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Stream(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer.drain(..=pos);
                Self::handle_sse_line(&line, &mut result, callbacks);
            }
        }
        for line in buffer.lines() {
            Self::handle_sse_line(line.trim(), &mut result, callbacks);
        }

        Ok(result)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProviderKind;
    use serde_json::json;

    fn config() -> ProviderConfig {
        ProviderConfig {
            kind: ProviderKind::Anthropic,
            api_key: "test-key".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 8192,
        }
    }

    #[test]
    fn request_body_shape() {
        let provider = AnthropicProvider::new(config(), vec![]).unwrap();
        let messages = vec![Message::user_text("hi")];
        let body = provider.request("sys", &messages, true);
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["model"], "claude-sonnet-4-20250514");
        assert_eq!(v["max_tokens"], 8192);
        assert_eq!(v["system"], "sys");
        assert_eq!(v["stream"], true);
        assert!(v.get("tools").is_none(), "empty tools are omitted");
    }

    #[test]
    fn request_body_without_stream_or_system() {
        let tools = vec![ToolDef {
            name: "think".to_string(),
            description: "noop".to_string(),
            input_schema: json!({"type": "object"}),
        }];
        let provider = AnthropicProvider::new(config(), tools).unwrap();
        let messages = vec![Message::user_text("hi")];
        let body = provider.request("", &messages, false);
        let v = serde_json::to_value(&body).unwrap();
        assert!(v.get("system").is_none());
        assert!(v.get("stream").is_none());
        assert_eq!(v["tools"][0]["name"], "think");
    }

    #[test]
    fn sse_stream_assembles_response() {
        let lines = [
            r#"data: {"type":"message_start","message":{"id":"msg_1","role":"assistant","model":"claude-sonnet-4-20250514","content":[],"usage":{"input_tokens":25,"output_tokens":1}}}"#,
            r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#,
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"lo"}}"#,
            r#"data: {"type":"content_block_stop","index":0}"#,
            r#"data: {"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"tu_1","name":"read_file","input":{}}}"#,
            r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"path\":"}}"#,
            r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"/tmp/x\"}"}}"#,
            r#"data: {"type":"content_block_stop","index":1}"#,
            r#"data: {"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":12}}"#,
            r#"data: {"type":"message_stop"}"#,
        ];

        let mut result = Response::default();
        let collected_text = std::sync::Arc::new(std::sync::Mutex::new(String::new()));
        let collected_json = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let stops = std::sync::Arc::new(std::sync::Mutex::new(0usize));

        let text_sink = collected_text.clone();
        let json_sink = collected_json.clone();
        let stop_sink = stops.clone();
        let callbacks = StreamCallbacks {
            on_text_delta: Some(Box::new(move |t: &str| {
                text_sink.lock().unwrap().push_str(t)
            })),
            on_input_json_delta: Some(Box::new(move |i, p: &str| {
                json_sink.lock().unwrap().push((i, p.to_string()))
            })),
            on_block_stop: Some(Box::new(move |_| *stop_sink.lock().unwrap() += 1)),
            ..Default::default()
        };

        for line in lines {
            AnthropicProvider::handle_sse_line(line, &mut result, &callbacks);
        }

        assert_eq!(result.id, "msg_1");
        assert_eq!(result.content.len(), 2);
        assert_eq!(result.content[0].text, "Hello");
        assert_eq!(result.content[1].block_type, "tool_use");
        assert_eq!(result.content[1].name, "read_file");
        assert_eq!(result.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(result.usage.input_tokens, 25);
        assert_eq!(result.usage.output_tokens, 12);

        assert_eq!(collected_text.lock().unwrap().as_str(), "Hello");
        let fragments = collected_json.lock().unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].0, 1);
        let joined: String = fragments.iter().map(|(_, p)| p.as_str()).collect();
        assert_eq!(joined, r#"{"path":"/tmp/x"}"#);
        assert_eq!(*stops.lock().unwrap(), 2);
    }

    #[test]
    fn garbage_and_comment_lines_are_skipped() {
        let mut result = Response::default();
        let callbacks = StreamCallbacks::default();
        AnthropicProvider::handle_sse_line(": keep-alive", &mut result, &callbacks);
        AnthropicProvider::handle_sse_line("event: message_start", &mut result, &callbacks);
        AnthropicProvider::handle_sse_line("data: not json", &mut result, &callbacks);
        assert!(result.content.is_empty());
    }

    #[test]
    fn error_message_extraction() {
        let raw = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        assert_eq!(extract_error_message(raw), "Overloaded");
        assert_eq!(extract_error_message("plain failure"), "plain failure");
    }
}
