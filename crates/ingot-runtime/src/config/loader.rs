//! Configuration loader using figment.
//!
//! Sources are layered, later overriding earlier:
//!
//! 1. Built-in defaults
//! 2. Profile-specific config file (`ingot.{profile}.toml`)
//! 3. Main config file (`ingot.toml` / `config.toml`)
//! 4. Environment variables (`INGOT_*`, `__` as separator)
//!
//! # Environment Variable Mapping
//!
//! - `INGOT_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `INGOT_BOT__NICKNAME=rusty` → `bot.nickname = "rusty"`
//!
//! # Example
//!
//! ```rust,ignore
//! use ingot_runtime::config::ConfigLoader;
//!
//! // Search default locations
//! let config = ConfigLoader::new().load()?;
//!
//! // Load a specific file with env overrides
//! let config = ConfigLoader::new().file("./ingot.toml").load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use tracing::{debug, info, warn};

use super::schema::IngotConfig;
use crate::error::{ConfigError, ConfigResult};

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default)]
pub enum Profile {
    /// Development profile (default).
    #[default]
    Development,
    /// Production profile.
    Production,
    /// Custom profile name.
    Custom(String),
}

impl Profile {
    /// Returns the profile name as a string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Creates a profile from `INGOT_PROFILE` or defaults to Development.
    pub fn from_env() -> Self {
        std::env::var("INGOT_PROFILE")
            .map(|p| match p.to_lowercase().as_str() {
                "production" | "prod" => Self::Production,
                "development" | "dev" => Self::Development,
                other => Self::Custom(other.to_string()),
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration loader with figment-based multi-source support.
pub struct ConfigLoader {
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a new configuration loader with defaults.
    pub fn new() -> Self {
        Self {
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        let p = profile.into();
        self.profile = match p.to_lowercase().as_str() {
            "production" | "prod" => Profile::Production,
            "development" | "dev" => Profile::Development,
            _ => Profile::Custom(p),
        };
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Sets a specific configuration file to load instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Loads and returns the configuration.
    pub fn load(self) -> ConfigResult<IngotConfig> {
        let figment = self.build_figment()?;
        let config: IngotConfig = figment.extract().map_err(|e| {
            ConfigError::ParseError(format!("failed to extract configuration: {e}"))
        })?;

        debug!(
            logging_level = %config.logging.level,
            connections = config.connections.len(),
            services = config.services.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    fn build_figment(self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(IngotConfig::default()));

        if let Some(path) = &self.config_file {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            info!(path = %path.display(), "Loading configuration file");
            figment = figment.merge(Toml::file(path));
        } else {
            figment = self.search_config_files(figment);
        }

        if self.load_env {
            figment = figment.merge(
                Env::prefixed("INGOT_")
                    .split("__")
                    .map(|key| key.as_str().replace("__", ".").into()),
            );
        }

        Ok(figment)
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("ingot"));
        }
        paths
    }

    /// Searches `search_paths × base_names`; a profile-specific variant is
    /// merged before its base file, and the search stops at the first base
    /// file found.
    fn search_config_files(&self, mut figment: Figment) -> Figment {
        for search_path in self.resolve_search_paths() {
            for base_name in ["ingot.toml", "config.toml"] {
                let stem = base_name.trim_end_matches(".toml");
                let profile_path =
                    search_path.join(format!("{stem}.{}.toml", self.profile.as_str()));
                if profile_path.exists() {
                    debug!(path = %profile_path.display(), "Loading profile-specific config");
                    figment = figment.merge(Toml::file(&profile_path));
                }

                let base_path = search_path.join(base_name);
                if base_path.exists() {
                    info!(path = %base_path.display(), "Loading configuration file");
                    return figment.merge(Toml::file(&base_path));
                }
            }
        }
        warn!("No configuration file found, using defaults");
        figment
    }
}

// =============================================================================
// Tests
// =============================================================================
