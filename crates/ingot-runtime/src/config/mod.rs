//! Configuration loading and schema.

mod loader;
mod schema;

pub use loader::{ConfigLoader, Profile};
pub use schema::{
    BotSection, ChannelSection, ConnectionSection, IngotConfig, LogFormat, LogLevel, LogOutput,
    LoggingConfig,
};
