//! Configuration: user file, environment fill, project override.
//!
//! User config lives at `~/.axe/config.yaml`. A project can override it
//! with `<cwd>/.axe/settings.yaml`; project models are prepended so they
//! take priority in the pool.

use anyhow::{bail, Context, Result};
use axe_client::{ProviderConfig, ProviderKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const DEFAULT_MAX_TOKENS: u32 = 8192;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: ProviderKind,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    #[serde(default)]
    pub auto_commit: bool,
    #[serde(default)]
    pub auto_verify: bool,
    #[serde(default)]
    pub ignore_files: Vec<String>,
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".axe")
}

fn config_path() -> PathBuf {
    config_dir().join("config.yaml")
}

fn default_base_url(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Anthropic => "https://api.anthropic.com",
        ProviderKind::OpenAi => "https://api.openai.com",
    }
}

fn env_fill(model: &mut ModelConfig) {
    let (key_var, url_var) = match model.provider {
        ProviderKind::Anthropic => ("ANTHROPIC_API_KEY", "ANTHROPIC_BASE_URL"),
        ProviderKind::OpenAi => ("OPENAI_API_KEY", "OPENAI_BASE_URL"),
    };
    if model.api_key.is_empty() {
        if let Ok(key) = std::env::var(key_var) {
            model.api_key = key;
        }
    }
    if model.base_url.is_empty() {
        model.base_url = std::env::var(url_var)
            .unwrap_or_else(|_| default_base_url(model.provider).to_string());
    }
    if model.max_tokens == 0 {
        model.max_tokens = DEFAULT_MAX_TOKENS;
    }
}

impl Config {
    /// Load the user config, fill gaps from the environment, and apply the
    /// project override from `project_dir` when present.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let mut config = match std::fs::read_to_string(config_path()) {
            Ok(data) => serde_yaml::from_str::<Config>(&data).context("parse config")?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(e).context("read config"),
        };

        // No configured models: synthesize one from the environment.
        if config.models.is_empty() {
            if std::env::var("ANTHROPIC_API_KEY").is_ok() {
                config.models.push(ModelConfig {
                    provider: ProviderKind::Anthropic,
                    api_key: String::new(),
                    base_url: String::new(),
                    model: "claude-sonnet-4-20250514".to_string(),
                    max_tokens: 0,
                });
            } else if std::env::var("OPENAI_API_KEY").is_ok() {
                config.models.push(ModelConfig {
                    provider: ProviderKind::OpenAi,
                    api_key: String::new(),
                    base_url: String::new(),
                    model: "gpt-4o".to_string(),
                    max_tokens: 0,
                });
            }
        }

        if let Some(project) = Self::load_project(project_dir) {
            config.merge_project(project);
        }

        for model in &mut config.models {
            env_fill(model);
        }
        config.models.retain(|m| !m.model.is_empty());

        if config.models.iter().all(|m| m.api_key.is_empty()) {
            bail!(
                "no usable model: set api_key in {} or export ANTHROPIC_API_KEY / OPENAI_API_KEY",
                config_path().display()
            );
        }
        Ok(config)
    }

    fn load_project(project_dir: &Path) -> Option<Config> {
        let path = project_dir.join(".axe").join("settings.yaml");
        let data = std::fs::read_to_string(path).ok()?;
        match serde_yaml::from_str::<Config>(&data) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!("ignoring invalid project settings: {e}");
                None
            }
        }
    }

    /// Project models are prepended so they take priority; servers and
    /// flags override.
    fn merge_project(&mut self, mut project: Config) {
        project.models.append(&mut self.models);
        self.models = project.models;
        self.mcp_servers.extend(project.mcp_servers);
        self.auto_commit |= project.auto_commit;
        self.auto_verify |= project.auto_verify;
        self.ignore_files.extend(project.ignore_files);
    }

    pub fn provider_configs(&self) -> Vec<ProviderConfig> {
        self.models
            .iter()
            .map(|m| ProviderConfig {
                kind: m.provider,
                api_key: m.api_key.clone(),
                base_url: m.base_url.clone(),
                model: m.model.clone(),
                max_tokens: m.max_tokens,
            })
            .collect()
    }

    /// Write a starter config; refuses to clobber an existing one.
    pub fn init() -> Result<PathBuf> {
        let dir = config_dir();
        std::fs::create_dir_all(&dir)?;
        let path = config_path();
        if path.exists() {
            bail!("config already exists: {}", path.display());
        }
        let starter = Config {
            models: vec![ModelConfig {
                provider: ProviderKind::Anthropic,
                api_key: "your-api-key-here".to_string(),
                base_url: "https://api.anthropic.com".to_string(),
                model: "claude-sonnet-4-20250514".to_string(),
                max_tokens: DEFAULT_MAX_TOKENS,
            }],
            ..Default::default()
        };
        std::fs::write(&path, serde_yaml::to_string(&starter)?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let data = r#"
models:
  - provider: anthropic
    api_key: sk-ant-1
    base_url: https://api.anthropic.com
    model: claude-sonnet-4-20250514
    max_tokens: 8192
  - provider: openai
    api_key: sk-oai-1
    model: gpt-4o
mcp_servers:
  files:
    command: mcp-files
    args: ["--root", "/tmp"]
"#;
        let config: Config = serde_yaml::from_str(data).unwrap();
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.models[0].provider, ProviderKind::Anthropic);
        assert_eq!(config.models[1].provider, ProviderKind::OpenAi);
        assert_eq!(config.mcp_servers["files"].command, "mcp-files");
        assert_eq!(config.mcp_servers["files"].args, ["--root", "/tmp"]);
    }

    #[test]
    fn project_models_are_prepended() {
        let mut user: Config = serde_yaml::from_str(
            "models:\n  - {provider: anthropic, api_key: k1, model: user-model}\n",
        )
        .unwrap();
        let project: Config = serde_yaml::from_str(
            "models:\n  - {provider: openai, api_key: k2, model: project-model}\nauto_commit: true\n",
        )
        .unwrap();

        user.merge_project(project);
        assert_eq!(user.models[0].model, "project-model");
        assert_eq!(user.models[1].model, "user-model");
        assert!(user.auto_commit);
        assert!(!user.auto_verify);
    }

    #[test]
    fn provider_configs_mirror_models() {
        let config: Config = serde_yaml::from_str(
            "models:\n  - {provider: openai, api_key: k, base_url: u, model: m, max_tokens: 64}\n",
        )
        .unwrap();
        let providers = config.provider_configs();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].kind, ProviderKind::OpenAi);
        assert_eq!(providers[0].max_tokens, 64);
    }

    #[test]
    fn settings_accept_project_extras() {
        let config: Config = serde_yaml::from_str(
            "auto_verify: true\nignore_files: ['*.lock', 'target/**']\n",
        )
        .unwrap();
        assert!(config.auto_verify);
        assert_eq!(config.ignore_files, ["*.lock", "target/**"]);
    }
}
