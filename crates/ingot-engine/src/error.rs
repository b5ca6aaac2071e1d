//! Engine error types.

use ingot_core::BoxError;
use thiserror::Error;

/// Errors from building a [`Service`](crate::service::Service).
#[derive(Debug, Error)]
pub enum BuildError {
    /// A command pattern failed to compile.
    #[error("command pattern '{pattern}' failed to compile: {source}")]
    Pattern {
        /// The offending pattern source.
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Two tasks were registered under the same name.
    #[error("duplicate task name '{0}'")]
    DuplicateTask(String),

    /// A command was declared without a handler.
    #[error("command pattern '{0}' has no handler")]
    MissingHandler(String),
}

/// Errors from loading or unloading a service.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The named service is not loaded.
    #[error("service '{0}' is not loaded")]
    NotLoaded(String),

    /// The service's setup hook failed; the registration was rolled back.
    #[error("service '{service}' setup failed: {source}")]
    Setup {
        /// Name of the failed service.
        service: String,
        #[source]
        source: BoxError,
    },

    /// The service's shutdown hook failed. Its scheduler queues were already
    /// discarded and the service has been removed from the registry.
    #[error("service '{service}' shutdown failed: {source}")]
    Shutdown {
        /// Name of the failed service.
        service: String,
        #[source]
        source: BoxError,
    },

    /// The service rejected its resolved configuration at load time.
    #[error("service '{service}' rejects its configuration: {message}")]
    Schema {
        /// Name of the failed service.
        service: String,
        /// Deserialization failure description.
        message: String,
    },

    /// Configuration scopes could not be combined.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors from the configuration model.
///
/// A [`ConfigError::TypeMismatch`] signals a schema bug between scope levels
/// and is fatal at resolve time; it is not recoverable by retrying.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Two scope levels hold structurally incompatible values for the same key.
    #[error("config scopes disagree at '{path}': cannot combine {found} with {expected}")]
    TypeMismatch {
        /// Dotted path of the conflicting key.
        path: String,
        /// JSON kind found in the more specific scope.
        expected: &'static str,
        /// JSON kind found in the donor scope.
        found: &'static str,
    },

    /// The merged value did not deserialize into the service's config type.
    #[error("invalid configuration for service '{service}': {source}")]
    Deserialize {
        /// Service whose schema was violated.
        service: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from scheduling work.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The (service, task) pair was never registered.
    #[error("task '{task}' is not registered by service '{service}'")]
    UnknownTask {
        /// Owning service name.
        service: String,
        /// Task name.
        task: String,
    },

    /// A repeating schedule was requested with a zero interval.
    #[error("repeat interval must be non-zero")]
    ZeroInterval,
}

/// Errors from engine-level operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `run()` was called while the dispatch loop is already running.
    #[error("engine is already running")]
    AlreadyRunning,

    /// The dispatch loop has stopped; submissions are no longer accepted.
    #[error("engine is shut down")]
    Closed,

    /// No loaded service exposes the requested provider.
    #[error("no loaded service provides '{0}'")]
    ProviderNotFound(String),

    /// A reply was attempted from a context without a connection and target.
    #[error("context has no connection or target to reply to")]
    NoReplyTarget,

    /// The underlying connection failed.
    #[error(transparent)]
    Connection(#[from] ingot_core::ConnectionError),
}
