//! Model configuration and persistent settings.

use crate::error::ChatError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f64 {
    0.7
}

/// Static per-model configuration, looked up by name from [`Settings`].
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    /// Model name sent on the wire. May differ from the settings key.
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub stream: bool,
    /// Arbitrary extra request fields merged into the outgoing body.
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "Settings::default_system_message")]
    pub system_message: String,
    #[serde(default)]
    pub default_model: Option<String>,
    /// The only UI-driven state persisted globally.
    #[serde(default)]
    pub last_active_model: Option<String>,
    #[serde(default)]
    pub auto_resume: bool,
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            system_message: Self::default_system_message(),
            default_model: None,
            last_active_model: None,
            auto_resume: false,
            models: HashMap::new(),
        }
    }
}

impl Settings {
    fn default_system_message() -> String {
        "You are a helpful assistant.".to_string()
    }

    /// Loads settings from `path`, writing a default file on first run.
    pub fn load_or_init(path: &Path) -> Result<Self, ChatError> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let settings = Self::default();
            fs::write(path, serde_json::to_string_pretty(&settings)?)?;
            Ok(settings)
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ChatError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Resolves a model by settings key, validating that it is usable.
    pub fn model(&self, name: &str) -> Result<&ModelConfig, ChatError> {
        let config = self
            .models
            .get(name)
            .ok_or_else(|| ChatError::Config(format!("model '{}' not found in settings", name)))?;
        if config.api_key.is_empty() {
            return Err(ChatError::Config(format!(
                "API key not set for model '{}'",
                name
            )));
        }
        if config.url.is_empty() {
            return Err(ChatError::Config(format!("API URL not set for model '{}'", name)));
        }
        Ok(config)
    }

    /// The model to use when none was selected explicitly.
    pub fn resolve_model_name(&self, active: Option<&str>) -> Result<String, ChatError> {
        active
            .map(str::to_string)
            .or_else(|| self.default_model.clone())
            .ok_or_else(|| ChatError::Config("no model selected and no default_model set".into()))
    }

    /// Display form for the `/list` command.
    pub fn model_listing(&self) -> String {
        let mut names: Vec<_> = self.models.keys().collect();
        names.sort();
        let mut out = String::from("\n==== [Available Models]:\n");
        for name in names {
            let desc = self
                .models
                .get(name)
                .map(|m| m.description.as_str())
                .unwrap_or("");
            let desc = if desc.is_empty() { "..." } else { desc };
            out.push_str(&format!("- {}:   {}\n", name, desc));
        }
        out.push('\n');
        out
    }
}

/// Default location of the settings file.
pub fn default_settings_path() -> Result<PathBuf, ChatError> {
    let config_dir = dirs_next::config_dir()
        .ok_or_else(|| ChatError::Config("failed to find config directory".into()))?;
    Ok(config_dir.join("deepchat").join("settings.json"))
}

/// Default location of the data directory (sessions, snippets, scripts).
pub fn default_data_dir() -> Result<PathBuf, ChatError> {
    let data_dir = dirs_next::data_dir()
        .ok_or_else(|| ChatError::Config("failed to find data directory".into()))?;
    Ok(data_dir.join("deepchat").join("data"))
}
