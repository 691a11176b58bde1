//! Configuration module for relquery.
//!
//! Handles compiler limits, logging and schema location settings.

mod settings;

pub use settings::{
    expand_env_vars, CompilerSettings, LoggingSettings, RowNumbering, SchemaSettings, Settings,
    SettingsError,
};
