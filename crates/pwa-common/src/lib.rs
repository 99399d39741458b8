//! # PWA Common
//!
//! Shared error type, logging setup and configuration for the offline agent crates.
//!
//! ## Features
//!
//! - Unified configuration error type
//! - Logging configuration and setup
//! - Agent/page/network configuration with the deployment version

use thiserror::Error;

pub mod config;
pub mod logging;

pub use config::{AgentConfig, NetworkConfig, PageConfig, PwaConfig};
pub use logging::{init_logging, LogConfig, LogFormat};

/// Errors raised while loading configuration or setting up the process.
#[derive(Error, Debug)]
pub enum PwaError {
    /// Invalid or inconsistent configuration.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Version string without a leading major component.
    #[error("Invalid version {0:?}: expected a leading integer major component")]
    InvalidVersion(String),

    /// Logging could not be installed.
    #[error("Logging error: {0}")]
    Logging(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed origin URL.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl PwaError {
    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get the error category for logs.
    pub fn category(&self) -> &'static str {
        match self {
            PwaError::Config { .. } => "config",
            PwaError::InvalidVersion(_) => "version",
            PwaError::Logging(_) => "logging",
            PwaError::Io(_) => "io",
            PwaError::Json(_) => "json",
            PwaError::Url(_) => "url",
        }
    }
}

/// Result type alias for configuration and setup operations.
pub type Result<T> = std::result::Result<T, PwaError>;
