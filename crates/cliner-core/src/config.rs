//! CliNER Configuration Management
//!
//! Handles configuration from environment variables, TOML files,
//! and command-line flags with defaults matching the reference setup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CliNerConfig {
    /// Pass selection and learner mode
    pub pipeline: PipelineConfig,

    /// Learner hyperparameters
    pub learner: LearnerConfig,

    /// Feature extraction options
    pub features: FeaturesConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl CliNerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_vars(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overwrite every field whose variable is set
    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(value) = var("CLINER_SEQUENCE_MODE") {
            self.pipeline.sequence_mode = parse_bool("CLINER_SEQUENCE_MODE", &value)?;
        }
        if let Some(value) = var("CLINER_GRID_SEARCH") {
            self.pipeline.grid_search = parse_bool("CLINER_GRID_SEARCH", &value)?;
        }
        if let Some(value) = var("CLINER_THIRD_PASS") {
            self.pipeline.third_pass = parse_bool("CLINER_THIRD_PASS", &value)?;
        }

        if let Some(epochs) = var("CLINER_EPOCHS") {
            self.learner.epochs = epochs.parse().map_err(|_| ConfigError::InvalidValue {
                key: "CLINER_EPOCHS".to_string(),
                value: epochs,
            })?;
        }

        if let Some(value) = var("CLINER_TAGGER") {
            self.features.tagger = parse_bool("CLINER_TAGGER", &value)?;
        }
        if let Some(path) = var("CLINER_LEXICON") {
            self.features.lexicon_path = Some(PathBuf::from(path));
        }

        // Logging
        if let Some(level) = var("LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())?;
        self.validate()?;
        Ok(self)
    }

    /// Reject values the learners cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.learner.epochs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "learner.epochs".to_string(),
                value: "0".to_string(),
            });
        }
        if self.learner.grid_epochs.iter().any(|e| *e == 0) {
            return Err(ConfigError::InvalidValue {
                key: "learner.grid_epochs".to_string(),
                value: format!("{:?}", self.learner.grid_epochs),
            });
        }
        if self.learner.grid_folds < 2 {
            return Err(ConfigError::InvalidValue {
                key: "learner.grid_folds".to_string(),
                value: self.learner.grid_folds.to_string(),
            });
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Pipeline-level switches consumed by `Model`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Use the sequence-aware learner for the first pass
    pub sequence_mode: bool,

    /// Tune learner hyperparameters by cross-validation
    pub grid_search: bool,

    /// Train the span-pair clustering pass
    pub third_pass: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sequence_mode: true,
            grid_search: false,
            third_pass: false,
        }
    }
}

/// Learner hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    /// Maximum passes over the training data
    pub epochs: usize,

    /// Average weights over all updates
    pub averaged: bool,

    /// Candidate epoch counts tried by grid search
    pub grid_epochs: Vec<usize>,

    /// Cross-validation folds used by grid search
    pub grid_folds: usize,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            epochs: 25,
            averaged: false,
            grid_epochs: vec![5, 10, 25],
            grid_folds: 3,
        }
    }
}

/// Feature extraction options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    /// Copy neighbouring token features into each token (`prev_*`, `next_*`)
    pub window: bool,

    /// Tag prose sentences with the built-in rule tagger
    pub tagger: bool,

    /// Tab-separated lexicon (term, semantic type)
    pub lexicon_path: Option<PathBuf>,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            window: true,
            tagger: true,
            lexicon_path: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

impl From<ConfigError> for crate::ClinerError {
    fn from(err: ConfigError) -> Self {
        crate::ClinerError::ConfigError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = CliNerConfig::default();
        assert!(config.pipeline.sequence_mode);
        assert!(!config.pipeline.third_pass);
        assert_eq!(config.learner.epochs, 25);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("K", "yes").unwrap());
        assert!(!parse_bool("K", "0").unwrap());
        assert!(parse_bool("K", "maybe").is_err());
    }

    #[test]
    fn test_partial_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pipeline]\nthird_pass = true\n\n[learner]\nepochs = 7").unwrap();

        let config = CliNerConfig::from_file(file.path()).unwrap();
        assert!(config.pipeline.third_pass);
        assert!(config.pipeline.sequence_mode);
        assert_eq!(config.learner.epochs, 7);
        assert_eq!(config.learner.grid_folds, 3);
    }

    #[test]
    fn test_invalid_epochs_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[learner]\nepochs = 0").unwrap();

        let err = CliNerConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = CliNerConfig::from_file("/nonexistent/cliner.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileReadError { .. }));
    }

    #[test]
    fn test_set_variables_win_even_at_default_values() {
        let mut config = CliNerConfig::default();
        config.pipeline.sequence_mode = false;
        config.learner.epochs = 7;
        config.features.tagger = false;
        config.logging.level = "debug".to_string();

        let vars: std::collections::HashMap<&str, &str> = [
            ("CLINER_SEQUENCE_MODE", "true"),
            ("CLINER_EPOCHS", "25"),
            ("CLINER_TAGGER", "on"),
            ("LOG_LEVEL", "info"),
        ]
        .into_iter()
        .collect();
        config.apply_vars(|key| vars.get(key).map(|v| v.to_string())).unwrap();

        assert!(config.pipeline.sequence_mode);
        assert_eq!(config.learner.epochs, 25);
        assert!(config.features.tagger);
        assert_eq!(config.logging.level, "info");
        assert!(!config.pipeline.grid_search);
    }

    #[test]
    fn test_bad_variable_rejected() {
        let mut config = CliNerConfig::default();
        let err = config
            .apply_vars(|key| (key == "CLINER_EPOCHS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
