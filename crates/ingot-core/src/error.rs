//! Shared error plumbing.

/// Boxed error type returned by plugin-supplied callbacks.
///
/// Hook, command, task, and lifecycle callbacks can fail with any error type;
/// the engine only ever logs or wraps them, so a boxed trait object is enough.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
