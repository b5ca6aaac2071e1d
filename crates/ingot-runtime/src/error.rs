//! Runtime error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The requested configuration file does not exist.
    #[error("configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// The configuration could not be parsed or extracted.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration loading failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The engine refused an operation.
    #[error(transparent)]
    Engine(#[from] ingot_engine::EngineError),

    /// A service failed to load or unload.
    #[error(transparent)]
    Load(#[from] ingot_engine::LoadError),

    /// Signal handler installation failed.
    #[error("failed to install signal handler: {0}")]
    Signal(std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
