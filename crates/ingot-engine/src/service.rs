//! Service definition and builder.
//!
//! A [`Service`] is one loadable plugin: a bundle of hooks, commands,
//! scheduled task definitions, lifecycle callbacks, providers, and an optional
//! config schema. Services are declared with explicit builder calls — the
//! result is an immutable record the [`Engine`](crate::Engine) binds at load
//! time:
//!
//! ```rust,ignore
//! let service = Service::builder("quote")
//!     .config_schema::<QuoteConfig>()
//!     .hook(topics::CONNECTION_READY, 0, |ctx| async move {
//!         // ...
//!         Ok(Outcome::Continue)
//!     })
//!     .command(
//!         Command::new(r"!quote (?P<id>\d+)")
//!             .permission("quote")
//!             .arg("id", Coerce::Int)
//!             .handler(|ctx, args| async move { /* ... */ Ok(()) }),
//!     )
//!     .task("announce", |ctx, args| async move { /* ... */ Ok(()) })
//!     .on_setup(|ctx| async move { Ok(()) })
//!     .build()?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use ingot_core::{BoxError, Outcome};

use crate::command::{Command, CommandSpec};
use crate::context::Context;
use crate::error::BuildError;

/// Result type returned by hook callbacks.
pub type HookResult = Result<Outcome, BoxError>;

/// A boxed hook callback.
pub type HookFn = Arc<dyn Fn(Context) -> BoxFuture<'static, HookResult> + Send + Sync>;

/// A boxed command callback. Receives the context and the coerced keyword
/// arguments from the pattern's named capture groups.
pub type CommandFn =
    Arc<dyn Fn(Context, Value) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// A boxed scheduled-task callback.
pub type TaskFn =
    Arc<dyn Fn(Context, Value) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// A boxed lifecycle (setup/shutdown) callback.
pub type LifecycleFn =
    Arc<dyn Fn(Context) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// A boxed provider: a named function one service exposes for others to call.
pub type ProviderFn =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;

pub(crate) type SchemaCheckFn = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// One hook registration as declared by the service.
///
/// The insertion-sequence half of the ordering key is assigned by the engine
/// at load time; declaration order within the service is preserved.
pub(crate) struct HookDef {
    pub(crate) topic: String,
    pub(crate) priority: i32,
    pub(crate) callback: HookFn,
}

/// An immutable, fully-built service definition.
///
/// Created by [`Service::builder`]; never mutated after
/// [`build`](ServiceBuilder::build) succeeds.
pub struct Service {
    name: String,
    hooks: Vec<HookDef>,
    commands: Vec<Arc<CommandSpec>>,
    tasks: HashMap<String, TaskFn>,
    providers: HashMap<String, ProviderFn>,
    setup: Option<LifecycleFn>,
    shutdown: Option<LifecycleFn>,
    schema_check: Option<SchemaCheckFn>,
}

impl Service {
    /// Starts building a service with the given unique name.
    pub fn builder(name: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder {
            name: name.into(),
            hooks: Vec::new(),
            commands: Vec::new(),
            tasks: Vec::new(),
            providers: HashMap::new(),
            setup: None,
            shutdown: None,
            schema_check: None,
        }
    }

    /// The service's unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn hooks(&self) -> &[HookDef] {
        &self.hooks
    }

    pub(crate) fn commands(&self) -> &[Arc<CommandSpec>] {
        &self.commands
    }

    pub(crate) fn tasks(&self) -> &HashMap<String, TaskFn> {
        &self.tasks
    }

    pub(crate) fn providers(&self) -> &HashMap<String, ProviderFn> {
        &self.providers
    }

    pub(crate) fn setup_hook(&self) -> Option<&LifecycleFn> {
        self.setup.as_ref()
    }

    pub(crate) fn shutdown_hook(&self) -> Option<&LifecycleFn> {
        self.shutdown.as_ref()
    }

    pub(crate) fn schema_check(&self) -> Option<&SchemaCheckFn> {
        self.schema_check.as_ref()
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("hooks", &self.hooks.len())
            .field("commands", &self.commands.len())
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Service`].
pub struct ServiceBuilder {
    name: String,
    hooks: Vec<HookDef>,
    commands: Vec<Command>,
    tasks: Vec<(String, TaskFn)>,
    providers: HashMap<String, ProviderFn>,
    setup: Option<LifecycleFn>,
    shutdown: Option<LifecycleFn>,
    schema_check: Option<SchemaCheckFn>,
}

impl ServiceBuilder {
    /// Registers a hook on `topic` with the given priority.
    ///
    /// Higher priorities run first; ties are broken by registration order.
    pub fn hook<F, Fut>(mut self, topic: impl Into<String>, priority: i32, f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.hooks.push(HookDef {
            topic: topic.into(),
            priority,
            callback: Arc::new(move |ctx| Box::pin(f(ctx))),
        });
        self
    }

    /// Registers a command.
    ///
    /// The command's pattern is compiled when [`build`](Self::build) runs.
    pub fn command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    /// Registers a named scheduled task.
    ///
    /// Work is queued against the task name via
    /// [`Context::schedule_after`](crate::Context::schedule_after) or
    /// [`Context::schedule_every`](crate::Context::schedule_every).
    pub fn task<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Context, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.tasks
            .push((name.into(), Arc::new(move |ctx, args| Box::pin(f(ctx, args)))));
        self
    }

    /// Exposes a named provider callable by other services.
    pub fn provide<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.providers
            .insert(name.into(), Arc::new(move |args| Box::pin(f(args))));
        self
    }

    /// Sets the setup callback, run once when the service loads.
    ///
    /// A setup failure rolls the registration back.
    pub fn on_setup<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.setup = Some(Arc::new(move |ctx| Box::pin(f(ctx))));
        self
    }

    /// Sets the shutdown callback, run once when the service unloads.
    pub fn on_shutdown<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.shutdown = Some(Arc::new(move |ctx| Box::pin(f(ctx))));
        self
    }

    /// Declares the service's configuration schema.
    ///
    /// At load time the engine resolves the service's global-scope settings
    /// and checks they deserialize into `T`; a mismatch fails the load before
    /// the service goes live. Use `#[serde(default)]` for optional fields.
    pub fn config_schema<T: DeserializeOwned>(mut self) -> Self {
        self.schema_check = Some(Arc::new(|value| {
            T::deserialize(value).map(|_| ()).map_err(|e| e.to_string())
        }));
        self
    }

    /// Compiles command patterns and produces the immutable [`Service`].
    pub fn build(self) -> Result<Service, BuildError> {
        let commands = self
            .commands
            .into_iter()
            .map(|c| c.compile().map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tasks = HashMap::with_capacity(self.tasks.len());
        for (name, callback) in self.tasks {
            if tasks.insert(name.clone(), callback).is_some() {
                return Err(BuildError::DuplicateTask(name));
            }
        }

        Ok(Service {
            name: self.name,
            hooks: self.hooks,
            commands,
            tasks,
            providers: self.providers,
            setup: self.setup,
            shutdown: self.shutdown,
            schema_check: self.schema_check,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Coerce;
    use ingot_core::topics;

    #[test]
    fn builder_collects_registrations() {
        let service = Service::builder("demo")
            .hook(topics::CONNECTION_READY, 0, |_ctx| async {
                Ok(Outcome::Continue)
            })
            .command(
                Command::new(r"!demo (?P<n>\d+)")
                    .arg("n", Coerce::Int)
                    .handler(|_ctx, _args| async { Ok(()) }),
            )
            .task("tick", |_ctx, _args| async { Ok(()) })
            .provide("lookup", |args| async move { Ok(args) })
            .build()
            .unwrap();

        assert_eq!(service.name(), "demo");
        assert_eq!(service.hooks().len(), 1);
        assert_eq!(service.commands().len(), 1);
        assert!(service.tasks().contains_key("tick"));
        assert!(service.providers().contains_key("lookup"));
    }

    #[test]
    fn bad_pattern_fails_build() {
        let err = Service::builder("demo")
            .command(Command::new(r"!demo (?P<broken").handler(|_ctx, _args| async { Ok(()) }))
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::Pattern { .. }));
    }

    #[test]
    fn schema_check_accepts_and_rejects() {
        #[derive(serde::Deserialize)]
        struct Cfg {
            #[allow(dead_code)]
            count: u32,
        }

        let service = Service::builder("demo")
            .config_schema::<Cfg>()
            .build()
            .unwrap();
        let check = service.schema_check().unwrap();

        assert!(check(&serde_json::json!({ "count": 3 })).is_ok());
        assert!(check(&serde_json::json!({ "count": "nope" })).is_err());
    }
}
