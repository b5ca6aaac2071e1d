//! # Ingot
//!
//! A plugin-based chat bot engine for Rust.
//!
//! ## Overview
//!
//! Ingot is the runtime core of a chat bot: services (plugins) register
//! hooks, commands, scheduled tasks, and configuration schemas against a
//! central engine; the engine routes protocol events through a
//! priority-ordered hook bus, resolves per-service configuration through a
//! cascading scope hierarchy, authorizes privileged commands against a
//! hostmask ACL, and runs deferred or recurring work on a background
//! scheduler. The wire protocol itself stays outside: hosts implement the
//! [`Connection`](ingot_core::Connection) trait and feed events in.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  events   ┌─────────────────┐  ordered hooks  ┌─────────┐
//! │ Connection │──────────▶│ Engine dispatch │────────────────▶│ Service │
//! │ (adapter)  │           │ loop (single)   │────────────────▶│ Service │
//! └────────────┘           └─────────────────┘                 └─────────┘
//!                              ▲        ▲
//!                   resumptions│        │due fires
//!                  (background)│        │(scheduler tick loop)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ingot::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().load()?;
//!     ingot::runtime::logging::init_from_config(&config.logging);
//!
//!     let runtime = Runtime::new(config);
//!     runtime.engine().register_connection(my_connection()?);
//!
//!     let greeter = Service::builder("greeter")
//!         .command(Command::new(r"!hello").handler(|ctx, _args| async move {
//!             ctx.respond("hi!").await?;
//!             Ok(())
//!         }))
//!         .build()?;
//!     runtime.load_services([greeter]).await?;
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub use ingot_core as core;
pub use ingot_engine as engine;
pub use ingot_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use ingot::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use ingot_runtime::{ConfigLoader, IngotConfig, Runtime};

    // Service system - primary unit of behaviour
    pub use ingot_engine::{Coerce, Command, Context, Engine, Service, SettingsStore};

    // Core vocabulary used by hooks and adapters
    pub use ingot_core::{Connection, Event, Outcome, topics};
}
