// src/error.rs
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Remote rejection from {source_name}: {message}")]
    RemoteRejection {
        source_name: String,
        message: String,
    },

    #[error("Parse failure: {0}")]
    Parse(String),

    #[error("Plugin error: {plugin} - {message}")]
    Plugin {
        plugin: String,
        message: String,
    },

    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown option '{key}' for plugin '{plugin}'")]
    UnknownOption {
        plugin: String,
        key: String,
    },

    #[error("File error: {path:?} - {message}")]
    File {
        path: PathBuf,
        message: String,
    },

    #[error("Timeout: {operation} exceeded {seconds} seconds")]
    Timeout {
        operation: String,
        seconds: u64,
    },

    #[error("Fatal scan error: {0}")]
    Fatal(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl From<anyhow::Error> for ScanError {
    fn from(error: anyhow::Error) -> Self {
        ScanError::Unexpected(error.to_string())
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(error: serde_json::Error) -> Self {
        ScanError::Parse(error.to_string())
    }
}

pub type ScanResult<T> = std::result::Result<T, ScanError>;
