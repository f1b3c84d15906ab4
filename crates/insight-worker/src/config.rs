//! Worker configuration: core settings plus the provider list.
//!
//! Loaded from an optional TOML file, then overridden from the environment:
//!
//! ```toml
//! queue_capacity = 16
//! audit_log = "insights.jsonl"
//!
//! [orchestration]
//! strictness = "strict"
//! max_iterations = 3
//!
//! [[providers]]
//! name = "local"
//! kind = "openai"
//! base_url = "http://localhost:8080/v1"
//! model = "qwen2.5-14b-instruct"
//! priority = 0
//! capability = "cheap"
//!
//! [[providers]]
//! name = "claude"
//! kind = "anthropic"
//! base_url = "https://api.anthropic.com/v1"
//! model = "claude-sonnet-4-5"
//! api_key_env = "ANTHROPIC_API_KEY"
//! priority = 1
//! ```

use std::path::{Path, PathBuf};

use orchestration::{CapabilityTag, OrchestrationConfig, ProviderSpec};
use serde::{Deserialize, Serialize};

use crate::error::WorkerError;

const ENV_PROVIDER_ORDER: &str = "INSIGHT_PROVIDER_ORDER";
const ENV_QUEUE_CAPACITY: &str = "INSIGHT_QUEUE_CAPACITY";
const ENV_AUDIT_LOG: &str = "INSIGHT_AUDIT_LOG";
const ENV_LOCAL_URL: &str = "INSIGHT_LOCAL_URL";
const ENV_LOCAL_MODEL: &str = "INSIGHT_LOCAL_MODEL";

/// Wire protocol of a provider endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// `POST {base_url}/chat/completions`
    Openai,
    /// `POST {base_url}/messages`
    Anthropic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub name: String,
    pub kind: ProviderKind,
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key. Never the key itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_capability")]
    pub capability: CapabilityTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_capability() -> CapabilityTag {
    CapabilityTag::Expensive
}

impl ProviderEntry {
    pub fn spec(&self) -> ProviderSpec {
        ProviderSpec::new(&self.name, self.priority, self.capability)
    }

    /// Key from `api_key_env`; a named but unset variable is an error.
    pub fn resolve_api_key(&self) -> Result<Option<String>, WorkerError> {
        match &self.api_key_env {
            None => Ok(None),
            Some(var) => std::env::var(var).map(Some).map_err(|_| {
                WorkerError::Config(format!(
                    "provider '{}': environment variable {var} is not set",
                    self.name
                ))
            }),
        }
    }

    fn local_default() -> Self {
        Self {
            name: "local".to_string(),
            kind: ProviderKind::Openai,
            base_url: std::env::var(ENV_LOCAL_URL)
                .unwrap_or_else(|_| "http://localhost:8080/v1".into()),
            model: std::env::var(ENV_LOCAL_MODEL).unwrap_or_else(|_| "local-model".into()),
            api_key_env: None,
            priority: 0,
            capability: CapabilityTag::Cheap,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Bounded job queue size.
    pub queue_capacity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<PathBuf>,
    pub orchestration: OrchestrationConfig,
    pub providers: Vec<ProviderEntry>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            audit_log: None,
            orchestration: OrchestrationConfig::default(),
            providers: vec![ProviderEntry::local_default()],
        }
    }
}

impl WorkerConfig {
    /// File (if any) → environment overrides → validation.
    pub fn load(path: Option<&Path>) -> Result<Self, WorkerError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, WorkerError> {
        let raw = std::fs::read_to_string(path).map_err(|source| WorkerError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| WorkerError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn to_toml(&self) -> Result<String, WorkerError> {
        toml::to_string_pretty(self).map_err(|e| WorkerError::Config(e.to_string()))
    }

    pub fn apply_env(&mut self) -> Result<(), WorkerError> {
        self.orchestration.apply_env()?;
        if let Ok(raw) = std::env::var(ENV_QUEUE_CAPACITY) {
            self.queue_capacity = raw
                .trim()
                .parse()
                .map_err(|e| WorkerError::Config(format!("{ENV_QUEUE_CAPACITY}: {e}")))?;
        }
        if let Ok(raw) = std::env::var(ENV_AUDIT_LOG) {
            self.audit_log = (!raw.trim().is_empty()).then(|| PathBuf::from(raw.trim()));
        }
        if let Ok(raw) = std::env::var(ENV_PROVIDER_ORDER) {
            self.apply_provider_order(&raw)?;
        }
        Ok(())
    }

    /// Re-prioritise providers from a comma-separated name list. Listed
    /// providers come first in list order; unlisted ones keep their relative
    /// order after them.
    pub fn apply_provider_order(&mut self, order: &str) -> Result<(), WorkerError> {
        let names: Vec<&str> = order
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        for name in &names {
            if !self.providers.iter().any(|p| p.name == *name) {
                return Err(WorkerError::Config(format!(
                    "{ENV_PROVIDER_ORDER}: unknown provider '{name}'"
                )));
            }
        }

        self.providers.sort_by_key(|p| p.priority);
        let listed = names.len() as u32;
        let mut next_unlisted = listed;
        for provider in &mut self.providers {
            match names.iter().position(|n| *n == provider.name) {
                Some(idx) => provider.priority = idx as u32,
                None => {
                    provider.priority = next_unlisted;
                    next_unlisted += 1;
                }
            }
        }
        self.providers.sort_by_key(|p| p.priority);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), WorkerError> {
        self.orchestration.validate()?;
        if self.providers.is_empty() {
            return Err(WorkerError::Config("at least one provider is required".into()));
        }
        if self.queue_capacity == 0 {
            return Err(WorkerError::Config("queue_capacity must be > 0".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.name.as_str()) {
                return Err(WorkerError::Config(format!(
                    "duplicate provider name '{}'",
                    provider.name
                )));
            }
            if !(provider.base_url.starts_with("http://") || provider.base_url.starts_with("https://")) {
                return Err(WorkerError::Config(format!(
                    "provider '{}': base_url must be http(s), got {}",
                    provider.name, provider.base_url
                )));
            }
        }
        Ok(())
    }
}
