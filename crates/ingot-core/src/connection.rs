//! The opaque connection collaborator.
//!
//! The engine never speaks the wire protocol itself. A host embedding the
//! engine implements [`Connection`] for each link to a chat network and
//! registers it with the engine; services talk to the network exclusively
//! through this trait.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by a [`Connection`] implementation.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The connection is not currently established.
    #[error("connection '{0}' is not established")]
    NotConnected(String),

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// A shared handle to a connection.
pub type SharedConnection = Arc<dyn Connection>;

/// One link to a chat network, as seen by the engine.
///
/// Implementations own all protocol I/O and user/channel state. The engine
/// calls into them to deliver replies and joins, and queries them for the
/// routing facts the command router and ACL need.
#[async_trait]
pub trait Connection: Send + Sync {
    /// The connection's name as it appears in the configuration file.
    fn name(&self) -> &str;

    /// The network identifier used for access-control records.
    ///
    /// Distinct from [`name`](Self::name) so that ACL grants survive a
    /// connection being renamed or duplicated (e.g. via a bouncer).
    fn network(&self) -> &str;

    /// The bot's current nickname on this connection.
    fn nickname(&self) -> String;

    /// Whether `target` names a channel (as opposed to a user).
    fn is_channel(&self, target: &str) -> bool;

    /// Whether the bot currently knows (has joined) `channel`.
    fn has_channel(&self, channel: &str) -> bool;

    /// Sends `text` to `target` (channel or nick).
    async fn send(&self, target: &str, text: &str) -> ConnectionResult<()>;

    /// Joins `channel`.
    async fn join(&self, channel: &str) -> ConnectionResult<()>;
}
