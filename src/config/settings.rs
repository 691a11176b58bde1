//! TOML-based configuration for relquery.
//!
//! Supports a config file (relquery.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [compiler]
//! max_depth = 8
//! default_limit = 25
//! max_limit = 500
//! row_numbering = "window"   # or "session_variables"
//!
//! [logging]
//! filter = "relquery=info"
//!
//! [schema]
//! path = "${APP_ROOT}/schema.toml"
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Query compiler limits and strategies.
    pub compiler: CompilerSettings,

    /// Log filter used by the CLI.
    pub logging: LoggingSettings,

    /// Where the schema file lives.
    pub schema: SchemaSettings,
}

/// How per-parent row numbers are produced when paginating to-many relations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowNumbering {
    /// `ROW_NUMBER() OVER (PARTITION BY ... ORDER BY ...)`
    #[default]
    Window,
    /// Running counter in MySQL user variables, for servers without window functions.
    SessionVariables,
}

/// Compiler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompilerSettings {
    /// Deepest relationship nesting accepted in fields, filters and order-by.
    pub max_depth: usize,

    /// Page size when neither the request nor the entity names one.
    pub default_limit: u64,

    /// Upper bound for any requested page size.
    pub max_limit: u64,

    pub row_numbering: RowNumbering,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            max_depth: 8,
            default_limit: 25,
            max_limit: 500,
            row_numbering: RowNumbering::Window,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "relquery=info".to_string(),
        }
    }
}

/// Schema file location.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SchemaSettings {
    /// Path to a schema TOML file (supports ${ENV_VAR} expansion).
    pub path: Option<String>,
}

impl SchemaSettings {
    /// Get the schema path with environment variables expanded.
    pub fn resolved_path(&self) -> Result<Option<PathBuf>, SettingsError> {
        self.path
            .as_deref()
            .map(|p| expand_env_vars(p).map(PathBuf::from))
            .transpose()
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse settings from TOML text.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `RELQUERY_CONFIG`
    /// 2. `./relquery.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("RELQUERY_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("relquery.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        // Return defaults if no config file found
        Ok(Settings::default())
    }

    fn validate(&self) -> Result<(), SettingsError> {
        let compiler = &self.compiler;
        if compiler.max_depth == 0 {
            return Err(SettingsError::InvalidConfig(
                "compiler.max_depth must be at least 1".to_string(),
            ));
        }
        if compiler.max_limit == 0 {
            return Err(SettingsError::InvalidConfig(
                "compiler.max_limit must be at least 1".to_string(),
            ));
        }
        if compiler.default_limit > compiler.max_limit {
            return Err(SettingsError::InvalidConfig(format!(
                "compiler.default_limit ({}) exceeds compiler.max_limit ({})",
                compiler.default_limit, compiler.max_limit
            )));
        }
        Ok(())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            // $VAR (ends at non-alphanumeric/underscore)
            while let Some(&ch) = chars.peek() {
                if !(ch.is_alphanumeric() || ch == '_') {
                    break;
                }
                var_name.push(ch);
                chars.next();
            }
            if var_name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
        }

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
