//! Configuration schema definitions.
//!
//! The configuration file maps connection names to their connection-scope
//! settings (with nested channel-scope settings), plus a top-level `services`
//! table holding each service's global-scope fields. Unknown keys are
//! ignored; missing keys fall back to their defaults.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ingot_engine::SettingsStore;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IngotConfig {
    /// Core bot settings.
    #[serde(default)]
    pub bot: BotSection,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Global-scope settings per service, keyed by service name.
    #[serde(default)]
    pub services: HashMap<String, Value>,

    /// Connection definitions, keyed by connection name.
    #[serde(default)]
    pub connections: HashMap<String, ConnectionSection>,
}

impl IngotConfig {
    /// Converts the service/connection/channel tables into the engine's
    /// [`SettingsStore`].
    pub fn settings_store(&self) -> SettingsStore {
        let mut store = SettingsStore::new();
        for (service, value) in &self.services {
            store.set_global(service, value.clone());
        }
        for (conn, section) in &self.connections {
            for (service, value) in &section.services {
                store.set_connection(conn, service, value.clone());
            }
            for (channel, chan_section) in &section.channels {
                for (service, value) in &chan_section.services {
                    store.set_channel(conn, channel, service, value.clone());
                }
            }
        }
        store
    }
}

/// Core bot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSection {
    /// Default nickname adapters should register with.
    #[serde(default = "default_nickname")]
    pub nickname: String,

    /// Locale used when no config scope sets one.
    #[serde(default = "default_locale")]
    pub locale: String,
}

impl Default for BotSection {
    fn default() -> Self {
        Self {
            nickname: default_nickname(),
            locale: default_locale(),
        }
    }
}

fn default_nickname() -> String {
    "ingot".to_string()
}

fn default_locale() -> String {
    "en".to_string()
}

/// One connection definition.
///
/// Only the fields the engine itself needs are structured; everything else
/// (host, port, credentials, …) is host-specific and preserved in `extra`
/// for the adapter implementing the connection.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConnectionSection {
    /// Network identifier for access-control records.
    ///
    /// Defaults to the connection name when absent.
    #[serde(default)]
    pub network: Option<String>,

    /// Connection-scope settings per service.
    #[serde(default)]
    pub services: HashMap<String, Value>,

    /// Channel definitions, keyed by channel name.
    #[serde(default)]
    pub channels: HashMap<String, ChannelSection>,

    /// Adapter-specific fields, passed through untouched.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// One channel definition within a connection.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelSection {
    /// Channel-scope settings per service.
    #[serde(default)]
    pub services: HashMap<String, Value>,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level (default).
    #[default]
    Info,
    /// Warn level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// The level as a lowercase directive string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Converts to a `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Compact single-line output (default).
    #[default]
    Compact,
    /// Full output with all fields.
    Full,
    /// Multi-line human-friendly output.
    Pretty,
    /// JSON output (requires the `json-log` feature).
    Json,
}

/// Log output destination.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Standard output (default).
    #[default]
    Stdout,
    /// Standard error.
    Stderr,
    /// A log file; see [`LoggingConfig::file_path`].
    File,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Base log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Output destination.
    #[serde(default)]
    pub output: LogOutput,

    /// Path of the log file when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Per-module level overrides, e.g. `ingot_engine = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settings_store_covers_all_scopes() {
        let config: IngotConfig = serde_json::from_value(json!({
            "services": { "quote": { "x": 1 } },
            "connections": {
                "freenode": {
                    "network": "libera",
                    "host": "irc.libera.chat",
                    "services": { "quote": { "x": 2 } },
                    "channels": {
                        "#foo": { "services": { "quote": { "x": 3 } } }
                    }
                }
            }
        }))
        .unwrap();

        let store = config.settings_store();
        assert_eq!(store.resolve("quote", None, None).unwrap(), json!({ "x": 1 }));
        assert_eq!(
            store.resolve("quote", Some("freenode"), None).unwrap(),
            json!({ "x": 2 })
        );
        assert_eq!(
            store
                .resolve("quote", Some("freenode"), Some("#foo"))
                .unwrap(),
            json!({ "x": 3 })
        );

        // Adapter fields survive in `extra`.
        let conn = &config.connections["freenode"];
        assert_eq!(conn.network.as_deref(), Some("libera"));
        assert_eq!(conn.extra["host"], json!("irc.libera.chat"));
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let config: IngotConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config.bot.nickname, "ingot");
        assert_eq!(config.bot.locale, "en");
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.services.is_empty());
    }
}
