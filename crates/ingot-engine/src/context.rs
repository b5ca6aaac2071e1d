//! Per-dispatch context and per-service runtime state.
//!
//! A [`Context`] is created for every hook/command/task invocation and
//! discarded afterwards. It carries the owning service, the [`Engine`], the
//! event (when there is one) and its connection/target/origin triple, and
//! lazily resolves the service's effective configuration the first time it
//! is asked for.
//!
//! The per-service runtime state ([`Storage`] and the conversational context
//! tags) lives for the whole load/unload cycle of the service; contexts only
//! hold a shared handle to it, so work already in flight keeps a valid view
//! even if the service is unloaded underneath it.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use ingot_core::{Event, SharedConnection, hostmask};

use crate::engine::Engine;
use crate::error::{ConfigError, EngineError, ScheduleError};
use crate::service::ProviderFn;

/// Typed key-value storage private to one loaded service.
///
/// One value per type; setting a type again overwrites the previous value.
#[derive(Default)]
pub struct Storage {
    inner: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl Storage {
    /// Stores a value, replacing any previous value of the same type.
    pub fn set<T: Send + Sync + 'static>(&self, value: T) {
        self.inner.lock().insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Returns a clone of the stored value of type `T`, if any.
    pub fn get<T: Clone + 'static>(&self) -> Option<T> {
        self.inner
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// Removes and returns the stored value of type `T`, if any.
    pub fn take<T: 'static>(&self) -> Option<T> {
        self.inner
            .lock()
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    /// Whether a value of type `T` is stored.
    pub fn contains<T: 'static>(&self) -> bool {
        self.inner.lock().contains_key(&TypeId::of::<T>())
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("entries", &self.inner.lock().len())
            .finish()
    }
}

/// Runtime state bound to one loaded service: its private storage and its
/// conversational-context tags keyed by (connection, target).
#[derive(Default, Debug)]
pub(crate) struct ServiceState {
    pub(crate) storage: Storage,
    tags: Mutex<HashMap<(String, String), HashSet<String>>>,
}

impl ServiceState {
    fn add_tag(&self, connection: &str, target: &str, tag: &str) {
        self.tags
            .lock()
            .entry((connection.to_string(), target.to_string()))
            .or_default()
            .insert(tag.to_string());
    }

    fn remove_tag(&self, connection: &str, target: &str, tag: &str) {
        let mut tags = self.tags.lock();
        let key = (connection.to_string(), target.to_string());
        if let Some(set) = tags.get_mut(&key) {
            set.remove(tag);
            if set.is_empty() {
                tags.remove(&key);
            }
        }
    }

    fn has_tag(&self, connection: &str, target: &str, tag: &str) -> bool {
        self.tags
            .lock()
            .get(&(connection.to_string(), target.to_string()))
            .is_some_and(|set| set.contains(tag))
    }
}

struct ContextInner {
    engine: Engine,
    service: String,
    state: Arc<ServiceState>,
    event: Option<Arc<Event>>,
    connection: Option<SharedConnection>,
    target: Option<String>,
    origin: Option<String>,
    /// Effective config, resolved on first use.
    config: Mutex<Option<Value>>,
}

/// The per-invocation context handed to every hook, command, task, and
/// lifecycle callback.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Context for an event dispatch.
    pub(crate) fn for_event(
        engine: Engine,
        service: &str,
        state: Arc<ServiceState>,
        event: Arc<Event>,
    ) -> Self {
        let connection = event
            .connection
            .as_deref()
            .and_then(|name| engine.connection(name));
        Self {
            inner: Arc::new(ContextInner {
                engine,
                service: service.to_string(),
                state,
                target: event.target.clone(),
                origin: event.origin.clone(),
                event: Some(event),
                connection,
                config: Mutex::new(None),
            }),
        }
    }

    /// Context without an event: setup/shutdown hooks and scheduled tasks.
    pub(crate) fn background(engine: Engine, service: &str, state: Arc<ServiceState>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                engine,
                service: service.to_string(),
                state,
                event: None,
                connection: None,
                target: None,
                origin: None,
                config: Mutex::new(None),
            }),
        }
    }

    /// The engine this context belongs to.
    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// Name of the service owning this invocation.
    pub fn service_name(&self) -> &str {
        &self.inner.service
    }

    /// The dispatched event, when this context was created for one.
    pub fn event(&self) -> Option<&Arc<Event>> {
        self.inner.event.as_ref()
    }

    /// The originating connection, when known to the engine.
    pub fn connection(&self) -> Option<SharedConnection> {
        self.inner.connection.clone()
    }

    /// Delivery target of the event, if any.
    pub fn target(&self) -> Option<&str> {
        self.inner.target.as_deref()
    }

    /// Full hostmask of the originating user, if any.
    pub fn origin(&self) -> Option<&str> {
        self.inner.origin.as_deref()
    }

    // ─── Configuration ───────────────────────────────────────────────────────

    /// The effective configuration for this scope, as a raw value.
    ///
    /// Resolved once per context (global → connection → channel) and cached.
    pub fn raw_config(&self) -> Result<Value, ConfigError> {
        let mut cache = self.inner.config.lock();
        if let Some(value) = cache.as_ref() {
            return Ok(value.clone());
        }
        let resolved = self.inner.engine.resolve_settings(
            &self.inner.service,
            self.inner.connection.as_ref().map(|c| c.name().to_string()).as_deref(),
            self.inner.target.as_deref(),
        )?;
        *cache = Some(resolved.clone());
        Ok(resolved)
    }

    /// The effective configuration deserialized into `T`.
    ///
    /// Fields absent from every scope fall back to `T`'s serde defaults.
    pub fn config<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        let raw = self.raw_config()?;
        serde_json::from_value(raw).map_err(|source| ConfigError::Deserialize {
            service: self.inner.service.clone(),
            source,
        })
    }

    /// The locale in effect for this scope.
    ///
    /// Reads the `locale` field of the resolved config chain, falling back to
    /// the engine default.
    pub fn locale(&self) -> String {
        self.raw_config()
            .ok()
            .and_then(|v| v.get("locale").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| self.inner.engine.default_locale().to_string())
    }

    // ─── Replies ─────────────────────────────────────────────────────────────

    /// Sends `text` back where the event came from, addressing the sender by
    /// nick when replying into a channel.
    pub async fn respond(&self, text: &str) -> Result<(), EngineError> {
        let (Some(connection), Some(target), Some(origin)) =
            (self.connection(), self.target(), self.origin())
        else {
            return Err(EngineError::NoReplyTarget);
        };
        let nick = hostmask::nick_of(origin);
        if connection.is_channel(target) {
            Ok(connection.send(target, &format!("{nick}: {text}")).await?)
        } else {
            Ok(connection.send(nick, text).await?)
        }
    }

    /// Sends `text` to the event's target without addressing anyone.
    pub async fn message(&self, text: &str) -> Result<(), EngineError> {
        let (Some(connection), Some(target)) = (self.connection(), self.target()) else {
            return Err(EngineError::NoReplyTarget);
        };
        Ok(connection.send(target, text).await?)
    }

    // ─── Service storage and conversational contexts ─────────────────────────

    /// This service's private storage.
    pub fn storage(&self) -> &Storage {
        &self.inner.state.storage
    }

    /// Activates a conversational-context tag for this (connection, target).
    pub fn add_context(&self, tag: &str) {
        if let (Some(conn), Some(target)) = (self.connection(), self.target()) {
            self.inner.state.add_tag(conn.name(), target, tag);
        }
    }

    /// Deactivates a conversational-context tag for this (connection, target).
    pub fn remove_context(&self, tag: &str) {
        if let (Some(conn), Some(target)) = (self.connection(), self.target()) {
            self.inner.state.remove_tag(conn.name(), target, tag);
        }
    }

    /// Whether a conversational-context tag is active for this
    /// (connection, target).
    pub fn has_context(&self, tag: &str) -> bool {
        match (self.connection(), self.target()) {
            (Some(conn), Some(target)) => self.inner.state.has_tag(conn.name(), target, tag),
            _ => false,
        }
    }

    // ─── Scheduling ──────────────────────────────────────────────────────────

    /// Queues one-shot work for one of this service's tasks.
    pub fn schedule_after(
        &self,
        task: &str,
        delay: Duration,
        args: Value,
    ) -> Result<(), ScheduleError> {
        self.inner
            .engine
            .scheduler()
            .schedule_after(&self.inner.service, task, delay, args)
    }

    /// Queues repeating work for one of this service's tasks.
    pub fn schedule_every(
        &self,
        task: &str,
        every: Duration,
        args: Value,
    ) -> Result<(), ScheduleError> {
        self.inner
            .engine
            .scheduler()
            .schedule_every(&self.inner.service, task, every, args)
    }

    /// Drops all pending work for one of this service's tasks.
    ///
    /// The task stays registered and can be scheduled again.
    pub fn unschedule(&self, task: &str) {
        self.inner
            .engine
            .scheduler()
            .cancel_pending(&self.inner.service, task);
    }

    // ─── Providers ───────────────────────────────────────────────────────────

    /// Looks up a provider exposed by any loaded service.
    pub fn provider(&self, name: &str) -> Result<ProviderFn, EngineError> {
        self.inner
            .engine
            .provider(name)
            .ok_or_else(|| EngineError::ProviderNotFound(name.to_string()))
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("service", &self.inner.service)
            .field("target", &self.inner.target)
            .field("origin", &self.inner.origin)
            .finish_non_exhaustive()
    }
}
