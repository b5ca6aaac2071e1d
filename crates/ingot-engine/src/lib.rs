//! # Ingot Engine
//!
//! The runtime engine of the Ingot chat bot: service registry, hook bus,
//! command router, configuration model, access control, and scheduler.
//!
//! ## Architecture
//!
//! Everything revolves around the [`Engine`]:
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
//! - Services are declared with [`Service::builder`] and loaded with
//!   [`Engine::load`]; unloading (or loading over the same name) tears the
//!   old instance down first.
//! - Hooks on one topic run in descending priority order; any hook can
//!   consume the event by returning [`Outcome::Eat`](ingot_core::Outcome).
//! - Commands are pattern-gated hooks on the message topics, with
//!   conversational-context, permission, and mention gates evaluated before
//!   the pattern.
//! - Per-service configuration resolves through the global → connection →
//!   channel scope chain of the [`SettingsStore`].
//! - The [`Scheduler`] runs deferred and repeating work with drift-free
//!   re-arming.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ingot_core::{Outcome, topics};
//! use ingot_engine::{Command, Engine, Service, SettingsStore};
//!
//! let engine = Engine::new(SettingsStore::new());
//!
//! let service = Service::builder("greeter")
//!     .command(Command::new(r"!hello").handler(|ctx, _args| async move {
//!         ctx.respond("hi!").await?;
//!         Ok(())
//!     }))
//!     .build()?;
//!
//! engine.load(service).await?;
//! engine.run().await?;
//! ```

pub mod acl;
pub mod command;
pub mod context;
pub mod engine;
pub mod error;
pub mod scheduler;
pub mod service;
pub mod settings;

pub use acl::{Acl, AclEntry, ADMIN_PERMISSION};
pub use command::{Coerce, Command};
pub use context::{Context, Storage};
pub use engine::{Engine, EngineOptions};
pub use error::{BuildError, ConfigError, EngineError, LoadError, ScheduleError};
pub use scheduler::Scheduler;
pub use service::{
    CommandFn, HookFn, HookResult, LifecycleFn, ProviderFn, Service, ServiceBuilder, TaskFn,
};
pub use settings::{SettingsStore, combine};
