//! Ordered provider pool with sticky failover.

use crate::error::LlmError;
use crate::{AnthropicProvider, OpenAiProvider, Provider, ProviderConfig, ProviderKind};
use async_trait::async_trait;
use axe_core::agent::{AgentLlmClient, StreamCallbacks};
use axe_core::error::AgentError;
use axe_core::types::{Message, Response, ToolDef};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Ordered list of configured providers. Calls start at the sticky active
/// index, rotate through the pool on error, and stick to the first
/// provider that succeeds.
pub struct ModelPool {
    providers: Vec<Box<dyn Provider>>,
    active: AtomicUsize,
}

impl ModelPool {
    /// Build the pool from config, skipping entries with no key or model.
    pub fn new(configs: &[ProviderConfig], tools: Vec<ToolDef>) -> Self {
        let mut providers: Vec<Box<dyn Provider>> = Vec::new();
        for config in configs {
            if config.api_key.is_empty() || config.model.is_empty() {
                continue;
            }
            let built: Result<Box<dyn Provider>, LlmError> = match config.kind {
                ProviderKind::Anthropic => {
                    AnthropicProvider::new(config.clone(), tools.clone())
                        .map(|p| Box::new(p) as Box<dyn Provider>)
                }
                ProviderKind::OpenAi => OpenAiProvider::new(config.clone(), tools.clone())
                    .map(|p| Box::new(p) as Box<dyn Provider>),
            };
            match built {
                Ok(provider) => providers.push(provider),
                Err(e) => tracing::warn!("skipping provider {}: {e}", config.model),
            }
        }
        Self::from_providers(providers)
    }

    pub fn from_providers(providers: Vec<Box<dyn Provider>>) -> Self {
        Self {
            providers,
            active: AtomicUsize::new(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub async fn send(&self, system: &str, messages: &[Message]) -> Result<Response, LlmError> {
        if self.providers.is_empty() {
            return Err(LlmError::NoProviders);
        }
        let start = self.active.load(Ordering::Relaxed);
        let mut last_err = LlmError::NoProviders;
        for i in 0..self.providers.len() {
            let idx = (start + i) % self.providers.len();
            match self.providers[idx].send(system, messages).await {
                Ok(resp) => {
                    self.active.store(idx, Ordering::Relaxed);
                    return Ok(resp);
                }
                Err(e) => {
                    tracing::warn!(
                        "provider {} failed: {e}",
                        self.providers[idx].model_name()
                    );
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    pub async fn send_stream(
        &self,
        system: &str,
        messages: &[Message],
        callbacks: &StreamCallbacks,
    ) -> Result<Response, LlmError> {
        if self.providers.is_empty() {
            return Err(LlmError::NoProviders);
        }
        let start = self.active.load(Ordering::Relaxed);
        let mut last_err = LlmError::NoProviders;
        for i in 0..self.providers.len() {
            let idx = (start + i) % self.providers.len();
            match self.providers[idx]
                .send_stream(system, messages, callbacks)
                .await
            {
                Ok(resp) => {
                    self.active.store(idx, Ordering::Relaxed);
                    return Ok(resp);
                }
                Err(e) => {
                    tracing::warn!(
                        "provider {} failed: {e}",
                        self.providers[idx].model_name()
                    );
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    pub fn model_name(&self) -> String {
        let idx = self.active.load(Ordering::Relaxed);
        self.providers
            .get(idx)
            .map(|p| p.model_name().to_string())
            .unwrap_or_else(|| "none".to_string())
    }

    /// Move the active index to the first provider with this model id.
    pub fn switch_model(&self, name: &str) -> bool {
        for (i, provider) in self.providers.iter().enumerate() {
            if provider.model_name() == name {
                self.active.store(i, Ordering::Relaxed);
                return true;
            }
        }
        false
    }

    pub fn list_models(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| p.model_name().to_string())
            .collect()
    }

    pub fn active_index(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AgentLlmClient for ModelPool {
    async fn send(&self, system: &str, messages: &[Message]) -> Result<Response, AgentError> {
        ModelPool::send(self, system, messages)
            .await
            .map_err(|e| AgentError::Llm(e.to_string()))
    }

    async fn send_stream(
        &self,
        system: &str,
        messages: &[Message],
        callbacks: &StreamCallbacks,
    ) -> Result<Response, AgentError> {
        ModelPool::send_stream(self, system, messages, callbacks)
            .await
            .map_err(|e| AgentError::Llm(e.to_string()))
    }

    fn model_name(&self) -> String {
        ModelPool::model_name(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axe_core::types::ContentBlock;

    struct FakeProvider {
        name: String,
        fail: bool,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        fn boxed(name: &str, fail: bool) -> Box<dyn Provider> {
            Box::new(Self {
                name: name.to_string(),
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Provider for FakeProvider {
        async fn send(&self, _system: &str, _messages: &[Message]) -> Result<Response, LlmError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                return Err(LlmError::Api {
                    status: 500,
                    message: "down".to_string(),
                });
            }
            Ok(Response {
                content: vec![ContentBlock::text(format!("from {}", self.name))],
                ..Default::default()
            })
        }

        async fn send_stream(
            &self,
            system: &str,
            messages: &[Message],
            _callbacks: &StreamCallbacks,
        ) -> Result<Response, LlmError> {
            self.send(system, messages).await
        }

        fn model_name(&self) -> &str {
            &self.name
        }
    }

    #[tokio::test]
    async fn failover_sticks_to_first_success() {
        let pool = ModelPool::from_providers(vec![
            FakeProvider::boxed("m0", true),
            FakeProvider::boxed("m1", true),
            FakeProvider::boxed("m2", false),
        ]);

        let resp = pool.send("", &[]).await.expect("third provider succeeds");
        assert_eq!(resp.text(), "from m2");
        assert_eq!(pool.active_index(), 2);
        assert_eq!(pool.model_name(), "m2");

        // The next call starts directly at the sticky index.
        let resp = pool.send("", &[]).await.expect("sticky provider");
        assert_eq!(resp.text(), "from m2");
    }

    #[tokio::test]
    async fn all_failing_returns_last_error() {
        let pool = ModelPool::from_providers(vec![
            FakeProvider::boxed("m0", true),
            FakeProvider::boxed("m1", true),
        ]);
        let err = pool.send("", &[]).await.expect_err("all fail");
        assert!(matches!(err, LlmError::Api { status: 500, .. }));
    }

    #[tokio::test]
    async fn empty_pool_errors() {
        let pool = ModelPool::from_providers(vec![]);
        let err = pool.send("", &[]).await.expect_err("no providers");
        assert!(matches!(err, LlmError::NoProviders));
        assert_eq!(pool.model_name(), "none");
    }

    #[test]
    fn switch_model_by_name() {
        let pool = ModelPool::from_providers(vec![
            FakeProvider::boxed("claude-sonnet-4-20250514", false),
            FakeProvider::boxed("gpt-4o", false),
        ]);
        assert_eq!(pool.list_models(), ["claude-sonnet-4-20250514", "gpt-4o"]);

        assert!(pool.switch_model("gpt-4o"));
        assert_eq!(pool.model_name(), "gpt-4o");
        assert!(!pool.switch_model("nonexistent"));
        assert_eq!(pool.model_name(), "gpt-4o");
    }
}
