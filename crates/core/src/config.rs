//! Configuration management for the dotprompt tools.
//!
//! Configuration is merged from several sources, later ones winning:
//! - Built-in defaults
//! - Environment variables (`DOTPROMPT_DIR`, `DOTPROMPT_CONFIG`)
//! - The YAML config file (`<prompt_dir>/dotprompt.yaml` by default)
//! - Environment overrides (`DOTPROMPT_MODEL`, `RUST_LOG`, `NO_COLOR`)
//! - Command-line flags via [`AppConfig::with_overrides`]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Name of the config file looked up inside the prompt directory.
pub const CONFIG_FILE_NAME: &str = "dotprompt.yaml";

/// Main configuration for the engine and the command-line front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding `.prompt` files and `_partial.prompt` files
    pub prompt_dir: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Model used when a prompt does not name one
    pub default_model: Option<String>,

    /// Per-model configuration applied during metadata merge
    pub model_configs: HashMap<String, Map<String, Value>>,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,
}

/// Full configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    default_model: Option<String>,
    #[serde(default)]
    model_configs: HashMap<String, Map<String, Value>>,
    prompts: Option<PromptsConfig>,
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PromptsConfig {
    dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            prompt_dir: PathBuf::from("prompts"),
            config_file: None,
            default_model: None,
            model_configs: HashMap::new(),
            log_level: None,
            verbose: false,
            no_color: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, the config file and defaults.
    ///
    /// A missing config file is not an error; a malformed one is.
    ///
    /// # Example
    /// ```no_run
    /// use dotprompt_core::config::AppConfig;
    ///
    /// let config = AppConfig::load().expect("Failed to load config");
    /// println!("Prompts: {:?}", config.prompt_dir);
    /// ```
    pub fn load() -> AppResult<Self> {
        Self::load_from(None, None)
    }

    /// Like [`AppConfig::load`], with a prompt directory and config file
    /// that take precedence over the environment.
    ///
    /// Both are applied before the config file is located, so the default
    /// `<prompt_dir>/dotprompt.yaml` follows an overridden directory.
    pub fn load_from(
        prompt_dir: Option<PathBuf>,
        config_file: Option<PathBuf>,
    ) -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("DOTPROMPT_DIR") {
            config.prompt_dir = PathBuf::from(dir);
        }

        if let Ok(config_file) = std::env::var("DOTPROMPT_CONFIG") {
            config.config_file = Some(PathBuf::from(config_file));
        }

        if let Some(prompt_dir) = prompt_dir {
            config.prompt_dir = prompt_dir;
        }

        if let Some(config_file) = config_file {
            config.config_file = Some(config_file);
        }

        let config_path = config
            .config_file
            .clone()
            .unwrap_or_else(|| config.prompt_dir.join(CONFIG_FILE_NAME));

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        } else if config.config_file.is_some() {
            return Err(AppError::Config(format!(
                "Config file does not exist: {:?}",
                config_path
            )));
        }

        if let Ok(model) = std::env::var("DOTPROMPT_MODEL") {
            config.default_model = Some(model);
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            config.log_level = Some(level);
        }

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }

        Ok(config)
    }

    /// Merge a YAML configuration file into this config.
    pub fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config_file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        let mut result = self.clone();

        if let Some(model) = config_file.default_model {
            result.default_model = Some(model);
        }

        // File entries replace same-named entries, others are kept
        result.model_configs.extend(config_file.model_configs);

        if let Some(dir) = config_file.prompts.and_then(|p| p.dir) {
            let dir = PathBuf::from(dir);
            // Relative directories are anchored at the config file
            result.prompt_dir = match path.parent() {
                Some(parent) if dir.is_relative() => parent.join(dir),
                _ => dir,
            };
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
        }

        tracing::debug!("Merged config file {:?}", path);

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// Command-line flags take precedence over the environment and the file.
    pub fn with_overrides(
        mut self,
        prompt_dir: Option<PathBuf>,
        config_file: Option<PathBuf>,
        model: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(prompt_dir) = prompt_dir {
            self.prompt_dir = prompt_dir;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(model) = model {
            self.default_model = Some(model);
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Per-model configuration for `model`, if any.
    pub fn model_config(&self, model: &str) -> Option<&Map<String, Value>> {
        self.model_configs.get(model)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> AppResult<()> {
        if !self.prompt_dir.is_dir() {
            return Err(AppError::Config(format!(
                "Prompt directory does not exist: {:?}",
                self.prompt_dir
            )));
        }

        if let Some(model) = &self.default_model {
            if model.trim().is_empty() {
                return Err(AppError::Config(
                    "Default model cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}
