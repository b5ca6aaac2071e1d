//! # Ingot Core
//!
//! Foundation types for the Ingot bot engine.
//!
//! This crate defines the small vocabulary shared by every other layer:
//!
//! - **Events**: the [`Event`] value dispatched through the hook bus, and the
//!   reserved topic names in [`topics`]
//! - **Hook results**: [`Outcome`], the explicit `Continue`/`Eat` result every
//!   hook callback returns
//! - **Connections**: the opaque [`Connection`] collaborator representing one
//!   link to a chat network
//! - **Hostmasks**: wildcard matching used by the access-control layer
//!
//! The engine itself (services, dispatch, scheduling, configuration) lives in
//! `ingot-engine`; orchestration (config files, logging, signals) lives in
//! `ingot-runtime`.

pub mod connection;
pub mod error;
pub mod event;
pub mod hostmask;

pub use connection::{Connection, ConnectionError, ConnectionResult, SharedConnection};
pub use error::BoxError;
pub use event::{Event, Outcome, topics};
pub use hostmask::{nick_of, wildcard_match};
