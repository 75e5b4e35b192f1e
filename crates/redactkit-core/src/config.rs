//! Configuration management for redactkit

use crate::context::ContextSettings;
use crate::ollama::OllamaConfig;
use crate::redaction::RedactionPolicy;
use anyhow::Result;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub redaction: RedactionPolicy,
    #[serde(default)]
    pub exclusions: ExclusionConfig,
    #[serde(default)]
    pub llm: Option<LlmConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Characters inspected on each side of a context candidate.
    pub context_window: usize,
    pub acceptance_threshold: f64,
    /// Lower acceptance threshold used when the text is record-structured.
    pub structured_threshold: f64,
    pub structured_boost: f64,
    pub external_timeout_seconds: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let context = ContextSettings::default();
        Self {
            context_window: context.window,
            acceptance_threshold: context.acceptance_threshold,
            structured_threshold: context.structured_threshold,
            structured_boost: context.structured_boost,
            external_timeout_seconds: 10,
        }
    }
}

impl DetectionConfig {
    pub fn context_settings(&self) -> ContextSettings {
        ContextSettings {
            window: self.context_window,
            acceptance_threshold: self.acceptance_threshold,
            structured_threshold: self.structured_threshold,
            structured_boost: self.structured_boost,
        }
    }

    pub fn external_timeout(&self) -> Duration {
        Duration::from_secs(self.external_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionConfig {
    pub database_path: PathBuf,
}

impl Default for ExclusionConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("exclusions.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub enabled: bool,
    pub model: String,
    pub endpoint: String,
    pub timeout_seconds: u64,
    pub prompt_template: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let ollama = OllamaConfig::default();
        Self {
            enabled: false,
            model: ollama.model,
            endpoint: ollama.endpoint,
            timeout_seconds: ollama.timeout_seconds,
            prompt_template: None,
        }
    }
}

impl LlmConfig {
    pub fn ollama_config(&self) -> OllamaConfig {
        OllamaConfig {
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            timeout_seconds: self.timeout_seconds,
            enabled: self.enabled,
        }
    }
}

fn check_unit_interval(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow::anyhow!("{} must be between 0.0 and 1.0, got {}", name, value));
    }
    Ok(())
}

impl Config {
    pub fn get_app_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "redactkit", "redactkit")
            .ok_or_else(|| anyhow::anyhow!("Failed to determine application directories"))
    }

    pub fn resolve_paths(&mut self) -> Result<()> {
        let db_path = &self.exclusions.database_path;
        if db_path.is_relative() && db_path != Path::new(":memory:") {
            let project_dirs = Self::get_app_dirs()?;
            let data_dir = project_dirs.data_dir();
            std::fs::create_dir_all(data_dir)?;
            self.exclusions.database_path = data_dir.join(db_path);
        }

        Ok(())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", path, e))?;
        let mut config: Self = toml::from_str(&contents)?;
        config.resolve_paths()?;
        Ok(config)
    }

    pub fn get_default_config_path() -> Result<PathBuf> {
        let project_dirs = Self::get_app_dirs()?;
        let config_dir = project_dirs.config_dir();
        std::fs::create_dir_all(config_dir)?;
        Ok(config_dir.join("redactkit.toml"))
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let detection = &self.detection;
        check_unit_interval("Acceptance threshold", detection.acceptance_threshold)?;
        check_unit_interval("Structured threshold", detection.structured_threshold)?;
        check_unit_interval("Structured boost", detection.structured_boost)?;

        if detection.context_window == 0 {
            return Err(anyhow::anyhow!("Context window must be greater than zero"));
        }

        if let Some(llm) = &self.llm {
            if llm.enabled && llm.endpoint.trim().is_empty() {
                return Err(anyhow::anyhow!("LLM endpoint must be set when the LLM is enabled"));
            }
        }

        if let Some(parent) = self.exclusions.database_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Ok(())
    }
}
