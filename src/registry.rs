//! Registry of AI service descriptors: built-in providers plus the ones a user
//! defines through the settings form.

use crate::constants::{KEY_CUSTOM_PROVIDERS, PROVIDER_EXPORT_VERSION};
use crate::store::{get_json, set_json, SharedStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOption {
    #[serde(alias = "value")]
    pub id: String,
    pub label: String,
}

impl ModelOption {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "name")]
    pub display_name: String,
    #[serde(alias = "endpoint")]
    pub endpoint_url: String,
    #[serde(default)]
    pub models: Vec<ModelOption>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
    #[serde(default)]
    pub is_user_defined: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ProviderConfig {
    pub fn default_model(&self) -> Option<&ModelOption> {
        self.models.first()
    }

    pub fn has_model(&self, model_id: &str) -> bool {
        self.models.iter().any(|m| m.id == model_id)
    }
}

/// A descriptor that has passed the registry boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderDescriptor {
    BuiltIn(ProviderConfig),
    UserDefined(ProviderConfig),
}

impl ProviderDescriptor {
    pub fn config(&self) -> &ProviderConfig {
        match self {
            ProviderDescriptor::BuiltIn(c) | ProviderDescriptor::UserDefined(c) => c,
        }
    }

    pub fn id(&self) -> &str {
        &self.config().id
    }

    pub fn is_user_defined(&self) -> bool {
        matches!(self, ProviderDescriptor::UserDefined(_))
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Invalid provider config: {}", .0.join("; "))]
    Invalid(Vec<String>),
    #[error("Import failed: {0}")]
    Import(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

struct StaticProvider {
    id: &'static str,
    name: &'static str,
    endpoint: &'static str,
    models: &'static [(&'static str, &'static str)],
    headers: &'static [(&'static str, &'static str)],
}

impl StaticProvider {
    fn to_config(&self, user_defined: bool) -> ProviderConfig {
        ProviderConfig {
            id: self.id.to_string(),
            display_name: self.name.to_string(),
            endpoint_url: self.endpoint.to_string(),
            models: self
                .models
                .iter()
                .map(|(id, label)| ModelOption::new(*id, *label))
                .collect(),
            headers: self
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            params: BTreeMap::new(),
            is_user_defined: user_defined,
            created_at: None,
        }
    }
}

const BUILT_IN: &[StaticProvider] = &[
    StaticProvider {
        id: "kimi",
        name: "Kimi (moonshot)",
        endpoint: "https://api.moonshot.cn/v1/chat/completions",
        models: &[
            ("moonshot-v1-32k", "moonshot-v1-32k (default)"),
            ("moonshot-v1-8k", "moonshot-v1-8k (8K fallback)"),
            ("moonshot-v1-128k", "moonshot-v1-128k (128K fallback)"),
        ],
        headers: &[],
    },
    StaticProvider {
        id: "glm",
        name: "Zhipu GLM",
        endpoint: "https://open.bigmodel.cn/api/paas/v4/chat/completions",
        models: &[
            ("glm-4-flash", "GLM-4-Flash (fast)"),
            ("glm-4-plus", "GLM-4-Plus (high quality)"),
        ],
        headers: &[],
    },
    StaticProvider {
        id: "baichuan",
        name: "Baichuan AI",
        endpoint: "https://api.baichuan-ai.com/v1/chat/completions",
        models: &[("Baichuan3-Turbo-128k", "Baichuan3-Turbo-128k")],
        headers: &[],
    },
    StaticProvider {
        id: "deepseek",
        name: "DeepSeek",
        endpoint: "https://api.deepseek.com/v1/chat/completions",
        models: &[("deepseek-chat", "deepseek-chat")],
        headers: &[],
    },
    StaticProvider {
        id: "openai",
        name: "OpenAI",
        endpoint: "https://api.openai.com/v1/chat/completions",
        models: &[
            ("gpt-4o-mini", "GPT-4o-mini"),
            ("gpt-4o-2024-11-20", "GPT-4o-2024-11-20"),
        ],
        headers: &[],
    },
    StaticProvider {
        id: "gemini",
        name: "Gemini-2.5-Flash",
        endpoint: "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions",
        models: &[("gemini-2.5-flash", "Gemini-2.5-Flash (fast)")],
        headers: &[],
    },
];

const TEMPLATES: &[StaticProvider] = &[
    StaticProvider {
        id: "anthropic",
        name: "Anthropic Claude",
        endpoint: "https://api.anthropic.com/v1/messages",
        models: &[
            ("claude-3-5-sonnet-20241022", "Claude-3.5-Sonnet"),
            ("claude-3-opus-20240229", "Claude-3-Opus"),
            ("claude-3-haiku-20240307", "Claude-3-Haiku"),
        ],
        headers: &[("anthropic-version", "2023-06-01")],
    },
    StaticProvider {
        id: "ollama",
        name: "Ollama (local)",
        endpoint: "http://localhost:11434/v1/chat/completions",
        models: &[
            ("llama3.2", "Llama 3.2"),
            ("mistral", "Mistral"),
            ("codellama", "Code Llama"),
        ],
        headers: &[],
    },
    StaticProvider {
        id: "groq",
        name: "Groq",
        endpoint: "https://api.groq.com/openai/v1/chat/completions",
        models: &[
            ("llama-3.1-70b-versatile", "Llama 3.1 70B"),
            ("mixtral-8x7b-32768", "Mixtral 8x7B"),
        ],
        headers: &[],
    },
    StaticProvider {
        id: "together",
        name: "Together AI",
        endpoint: "https://api.together.xyz/v1/chat/completions",
        models: &[
            ("meta-llama/Llama-3-70b-chat-hf", "Llama 3 70B Chat"),
            ("mistralai/Mixtral-8x7B-Instruct-v0.1", "Mixtral 8x7B"),
        ],
        headers: &[],
    },
    StaticProvider {
        id: "perplexity",
        name: "Perplexity",
        endpoint: "https://api.perplexity.ai/chat/completions",
        models: &[
            ("llama-3.1-sonar-small-128k-online", "Llama 3.1 Sonar Small (online)"),
            ("llama-3.1-sonar-large-128k-online", "Llama 3.1 Sonar Large (online)"),
        ],
        headers: &[],
    },
];

pub fn builtin_providers() -> Vec<ProviderConfig> {
    BUILT_IN.iter().map(|p| p.to_config(false)).collect()
}

pub fn is_builtin_id(id: &str) -> bool {
    BUILT_IN.iter().any(|p| p.id == id)
}

/// Starting points for the custom provider form.
pub fn templates() -> Vec<(&'static str, ProviderConfig)> {
    TEMPLATES.iter().map(|t| (t.id, t.to_config(true))).collect()
}

pub fn template(key: &str) -> Option<ProviderConfig> {
    TEMPLATES
        .iter()
        .find(|t| t.id == key)
        .map(|t| t.to_config(true))
}

/// Checks a submitted config. An empty list means the config is acceptable.
pub fn validate(config: &ProviderConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if config.display_name.trim().is_empty() {
        errors.push("Provider name must not be empty".to_string());
    }

    if config.endpoint_url.trim().is_empty() {
        errors.push("API endpoint must not be empty".to_string());
    } else if url::Url::parse(config.endpoint_url.trim()).is_err() {
        errors.push("API endpoint is not a valid URL".to_string());
    }

    if config.models.is_empty() {
        errors.push("At least one model is required".to_string());
    }
    for (index, model) in config.models.iter().enumerate() {
        if model.id.trim().is_empty() {
            errors.push(format!("Model {} needs an id", index + 1));
        }
        if model.label.trim().is_empty() {
            errors.push(format!("Model {} needs a display name", index + 1));
        }
    }

    errors
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportEnvelope {
    version: String,
    config: ProviderConfig,
    exported_at: DateTime<Utc>,
}

pub struct ProviderRegistry {
    store: SharedStore,
}

impl ProviderRegistry {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    fn load_custom(&self) -> BTreeMap<String, ProviderConfig> {
        get_json(self.store.as_ref(), KEY_CUSTOM_PROVIDERS).unwrap_or_default()
    }

    fn save_custom(&self, configs: &BTreeMap<String, ProviderConfig>) -> Result<(), StoreError> {
        set_json(self.store.as_ref(), KEY_CUSTOM_PROVIDERS, configs)
    }

    /// Built-ins followed by user-defined providers; a user-defined entry
    /// replaces a built-in with the same id in place.
    pub fn list_all(&self) -> Vec<ProviderDescriptor> {
        let mut all: Vec<ProviderDescriptor> = builtin_providers()
            .into_iter()
            .map(ProviderDescriptor::BuiltIn)
            .collect();

        for (id, mut config) in self.load_custom() {
            config.id = id;
            config.is_user_defined = true;
            match all.iter().position(|d| d.id() == config.id) {
                Some(pos) => all[pos] = ProviderDescriptor::UserDefined(config),
                None => all.push(ProviderDescriptor::UserDefined(config)),
            }
        }
        all
    }

    pub fn get(&self, id: &str) -> Option<ProviderDescriptor> {
        self.list_all().into_iter().find(|d| d.id() == id)
    }

    /// Persists a user-defined provider under a fresh id and returns the id.
    pub fn add(&self, mut config: ProviderConfig) -> Result<String, RegistryError> {
        let errors = validate(&config);
        if !errors.is_empty() {
            return Err(RegistryError::Invalid(errors));
        }

        let mut configs = self.load_custom();
        let mut stamp = Utc::now().timestamp_millis();
        let mut id = format!("custom_{}", stamp);
        while configs.contains_key(&id) || is_builtin_id(&id) {
            stamp += 1;
            id = format!("custom_{}", stamp);
        }

        config.id = id.clone();
        config.is_user_defined = true;
        config.created_at = Some(Utc::now());
        tracing::info!("Saving custom provider '{}' as {}", config.display_name, id);
        configs.insert(id.clone(), config);
        self.save_custom(&configs)?;
        Ok(id)
    }

    /// Removes a user-defined provider. Returns whether anything was removed.
    pub fn remove(&self, id: &str) -> Result<bool, RegistryError> {
        if is_builtin_id(id) {
            tracing::warn!("Refusing to remove built-in provider '{}'", id);
            return Ok(false);
        }
        let mut configs = self.load_custom();
        if configs.remove(id).is_none() {
            return Ok(false);
        }
        self.save_custom(&configs)?;
        Ok(true)
    }

    pub fn export_config(config: &ProviderConfig) -> Result<String, RegistryError> {
        let mut config = config.clone();
        config.id.clear();
        config.created_at = None;
        let envelope = ExportEnvelope {
            version: PROVIDER_EXPORT_VERSION.to_string(),
            config,
            exported_at: Utc::now(),
        };
        serde_json::to_string_pretty(&envelope).map_err(|e| RegistryError::Import(e.to_string()))
    }

    /// Parses and validates an exported envelope. The result still has to be
    /// passed to [`ProviderRegistry::add`] to be persisted.
    pub fn import_config(json: &str) -> Result<ProviderConfig, RegistryError> {
        let raw: Value =
            serde_json::from_str(json).map_err(|e| RegistryError::Import(e.to_string()))?;
        let config = raw
            .get("config")
            .cloned()
            .ok_or_else(|| RegistryError::Import("missing 'config' section".to_string()))?;
        let config: ProviderConfig =
            serde_json::from_value(config).map_err(|e| RegistryError::Import(e.to_string()))?;

        let errors = validate(&config);
        if !errors.is_empty() {
            return Err(RegistryError::Invalid(errors));
        }
        Ok(config)
    }
}
