//! # Ingot Runtime
//!
//! Orchestration layer for the Ingot bot engine: configuration file loading,
//! logging setup, and process lifecycle (signals, graceful shutdown).
//!
//! ## Example
//!
//! ```rust,ignore
//! use ingot_runtime::{Runtime, config::ConfigLoader, logging};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::new().load()?;
//!     logging::init_from_config(&config.logging);
//!
//!     let runtime = Runtime::new(config);
//!     runtime.engine().register_connection(my_connection);
//!     runtime.load_services([quote_service()?, games_service()?]).await?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ConfigLoader, IngotConfig};
pub use error::{ConfigError, ConfigResult, RuntimeError, RuntimeResult};
pub use runtime::Runtime;
