// Required external crates for configuration management and serialization
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use config::{Config, ConfigError, Environment, File};

use crate::session::CatalogEntry;

/// Configuration for the selectable models
#[derive(Debug, Deserialize, Clone)]
pub struct ModelsConfig {
    /// Model to initialize on start when no selection was persisted
    #[serde(default)]
    pub default: Option<String>,
    /// Directory holding local GGUF files (llama backend only)
    pub directory: PathBuf,
    /// Models offered to the user
    #[serde(default)]
    pub catalog: Vec<CatalogEntry>,
}

/// Configuration for the inference engine backend
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Backend name: "http" or "llama"
    pub backend: String,
    /// API root of the OpenAI-compatible server (http backend)
    pub base_url: String,
}

/// Configuration for model inference parameters
#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    /// Controls randomness in generation
    pub temperature: f32,
    /// Maximum number of tokens to generate
    pub max_tokens: usize,
    /// Preamble sent before every conversation
    pub system_prompt: String,
    /// Size of the context window for inference (llama backend)
    pub context_size: usize,
    /// Number of layers to offload to the GPU (llama backend)
    pub n_gpu_layers: u32,
}

/// Configuration for the HTTP server
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

/// Configuration for application logging
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Optional log directory
    pub file: Option<PathBuf>,
}

/// Configuration for durable user preferences
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// JSON file holding the persisted preferences
    pub preferences: PathBuf,
}

/// Main settings struct that contains all configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub models: ModelsConfig,
    pub engine: EngineConfig,
    pub inference: InferenceConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
}

/// Implementation for loading and parsing configuration
impl Settings {
    /// Loads settings from `./config` in the current directory.
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = std::env::current_dir()
            .map_err(|e| ConfigError::Message(
                format!("Failed to get current directory: {}", e)
            ))?
            .join("config");

        Self::from_dir(&config_dir)
    }

    /// Creates a new Settings instance by loading config from multiple sources
    /// in the following order of precedence (highest to lowest):
    /// 1. Environment variables prefixed with LMCHAT__ (e.g. LMCHAT__SERVER__PORT)
    /// 2. Local config file (local.toml) if present
    /// 3. Default config file (default.toml)
    pub fn from_dir(config_dir: &Path) -> Result<Self, ConfigError> {
        if !config_dir.exists() {
            return Err(ConfigError::Message(
                format!("Config directory not found at: {}", config_dir.display())
            ));
        }

        let default_config = config_dir.join("default.toml");
        if !default_config.exists() {
            return Err(ConfigError::Message(
                format!("Default configuration file not found at: {}", default_config.display())
            ));
        }

        let local_config = config_dir.join("local.toml");

        let settings = Config::builder()
            .add_source(File::from(default_config))
            .add_source(File::from(local_config).required(false))
            .add_source(Environment::with_prefix("LMCHAT").prefix_separator("__").separator("__"))
            .build()?
            .try_deserialize::<Settings>()?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.inference.temperature) {
            return Err(ConfigError::Message(format!(
                "Temperature must be between 0.0 and 2.0, got: {}",
                self.inference.temperature
            )));
        }

        if self.inference.max_tokens == 0 {
            return Err(ConfigError::Message(
                "max_tokens must be greater than 0".to_string()
            ));
        }

        if self.inference.context_size == 0 {
            return Err(ConfigError::Message(
                "context_size must be greater than 0".to_string()
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::Message(
                "Port must be between 1 and 65535, got: 0".to_string()
            ));
        }

        match self.engine.backend.as_str() {
            "http" | "llama" => {}
            other => {
                return Err(ConfigError::Message(
                    format!("Unknown engine backend: {}. Must be one of: http, llama", other)
                ));
            }
        }

        let mut seen = HashSet::new();
        for entry in &self.models.catalog {
            if entry.id.trim().is_empty() {
                return Err(ConfigError::Message("Catalog entries need a non-empty id".to_string()));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(ConfigError::Message(
                    format!("Duplicate model id in catalog: {}", entry.id)
                ));
            }
        }

        match self.logging.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            _ => Err(ConfigError::Message(format!(
                "Invalid logging level: {}. Must be one of: error, warn, info, debug, trace",
                self.logging.level
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const DEFAULT_TOML: &str = r#"
[models]
directory = "models"

[[models.catalog]]
id = "llama-3.2-1b-instruct"
name = "Llama 3.2 1B"
size = "0.6GB"

[engine]
backend = "http"
base_url = "http://127.0.0.1:8080/v1"

[inference]
temperature = 0.7
max_tokens = 512
system_prompt = "You are a helpful AI assistant."
context_size = 4096
n_gpu_layers = 0

[server]
host = "127.0.0.1"
port = 3000

[logging]
level = "info"

[storage]
preferences = "data/preferences.json"
"#;

    fn write_config(dir: &Path, default: &str, local: Option<&str>) {
        fs::write(dir.join("default.toml"), default).unwrap();
        if let Some(local) = local {
            fs::write(dir.join("local.toml"), local).unwrap();
        }
    }

    #[test]
    fn test_loads_default_config() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), DEFAULT_TOML, None);

        let settings = Settings::from_dir(dir.path()).unwrap();
        assert_eq!(settings.engine.backend, "http");
        assert_eq!(settings.inference.max_tokens, 512);
        assert_eq!(settings.models.catalog.len(), 1);
        assert_eq!(settings.models.catalog[0].name, "Llama 3.2 1B");
        assert!(settings.models.default.is_none());
        assert!(settings.logging.file.is_none());
    }

    #[test]
    fn test_local_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), DEFAULT_TOML, Some("[server]\nport = 4100\n"));

        let settings = Settings::from_dir(dir.path()).unwrap();
        assert_eq!(settings.server.port, 4100);
        assert_eq!(settings.server.host, "127.0.0.1");
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(Settings::from_dir(&missing).is_err());
    }

    #[test]
    fn test_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), DEFAULT_TOML, None);
        let settings = Settings::from_dir(dir.path()).unwrap();

        let mut bad = settings.clone();
        bad.inference.temperature = 3.5;
        assert!(bad.validate().is_err());

        let mut bad = settings.clone();
        bad.inference.max_tokens = 0;
        assert!(bad.validate().is_err());

        let mut bad = settings.clone();
        bad.engine.backend = "cloud".to_string();
        assert!(bad.validate().is_err());

        let mut bad = settings.clone();
        bad.logging.level = "loud".to_string();
        assert!(bad.validate().is_err());

        let mut bad = settings;
        let duplicate = bad.models.catalog[0].clone();
        bad.models.catalog.push(duplicate);
        assert!(bad.validate().is_err());
    }
}
