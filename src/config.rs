use crate::constants::{
    AI_DEFAULT_MAX_TOKENS, AI_DEFAULT_TEMPERATURE, APP_DIR_NAME, KEY_AI_SETTINGS,
};
use crate::prompt::{FixKind, FixOptions};
use crate::store::{get_json, set_json, KeyValueStore, StoreError};
use crate::usage::Tier;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Active AI service selection, kept in the key-value store under `aiConfig`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiSettings {
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f64 {
    AI_DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    AI_DEFAULT_MAX_TOKENS
}

impl Default for AiSettings {
    fn default() -> Self {
        Self::preset("kimi").unwrap_or_else(|| Self {
            provider: "kimi".to_string(),
            model: "moonshot-v1-32k".to_string(),
            api_key: None,
            temperature: AI_DEFAULT_TEMPERATURE,
            max_tokens: AI_DEFAULT_MAX_TOKENS,
        })
    }
}

impl AiSettings {
    /// Preset settings for a built-in provider, using its first model.
    pub fn preset(provider: &str) -> Option<Self> {
        let config = crate::registry::builtin_providers()
            .into_iter()
            .find(|p| p.id == provider)?;
        let model = config.default_model()?.id.clone();
        Some(Self {
            provider: config.id,
            model,
            api_key: None,
            temperature: AI_DEFAULT_TEMPERATURE,
            max_tokens: AI_DEFAULT_MAX_TOKENS,
        })
    }

    /// Stored settings, or the preset when nothing usable is stored.
    pub fn load(store: &dyn KeyValueStore) -> Self {
        get_json(store, KEY_AI_SETTINGS).unwrap_or_default()
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<(), StoreError> {
        set_json(store, KEY_AI_SETTINGS, self)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub tier: Tier,
    /// Overrides the default location of the key-value store file.
    pub store_path: Option<PathBuf>,
    pub default_kind: FixKind,
    pub allow_raw_html: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tier: Tier::Basic,
            store_path: None,
            default_kind: FixKind::QuickFix,
            allow_raw_html: false,
        }
    }
}

impl AppConfig {
    pub fn config_dir() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(APP_DIR_NAME);
        path
    }

    pub fn config_file() -> PathBuf {
        let mut path = Self::config_dir();
        path.push("config.toml");
        path
    }

    pub fn store_file(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("store.json"))
    }

    pub fn load() -> Self {
        Self::load_from(&Self::config_file())
    }

    /// Reads `path`; a missing or corrupt file is replaced with defaults.
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path).map(|content| toml::from_str::<Self>(&content)) {
                Ok(Ok(config)) => return config,
                Ok(Err(e)) => tracing::warn!("Config file {:?} is invalid: {}", path, e),
                Err(e) => tracing::warn!("Config file {:?} is unreadable: {}", path, e),
            }
        }
        let default = Self::default();
        if let Err(e) = default.save_to(path) {
            tracing::warn!("Failed to write default config: {}", e);
        }
        default
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_file())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn fix_options(&self) -> FixOptions {
        FixOptions::for_kind(self.default_kind)
    }
}
