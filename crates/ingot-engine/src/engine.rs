//! The engine core.
//!
//! [`Engine`] owns everything a running bot shares: the map of loaded
//! services, the scheduler, the ACL authority, the settings store, and the
//! registered connections. It is a cheap-clone handle (`Arc` inside) threaded
//! through every [`Context`]; there is no ambient global registry.
//!
//! # Dispatch model
//!
//! One dispatch loop ([`Engine::run`]) drains a single submission queue:
//! incoming [`Event`]s and resumptions posted by background work. Each unit
//! is processed to completion before the next, so engine state has a single
//! writer. Background commands and scheduled tasks run as independent spawned
//! units and must come back through [`Engine::submit`] to touch engine-owned
//! state — that boundary is load-bearing.
//!
//! For every dispatched event the hook chain is recomputed by merging each
//! loaded service's own sorted hook list; services may load or unload between
//! events, so no global order is cached.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ingot_core::{Event, Outcome, SharedConnection};

use crate::acl::Acl;
use crate::command;
use crate::context::{Context, ServiceState};
use crate::error::{ConfigError, EngineError, LoadError};
use crate::scheduler::{ScheduledFire, Scheduler};
use crate::service::{HookFn, ProviderFn, Service};
use crate::settings::SettingsStore;

/// One hook bound into the bus: the ordering key plus the callback.
///
/// `seq` is assigned from a monotonic counter at load time; the dispatch
/// ordering key is `(-priority, seq)`.
#[derive(Clone)]
struct BoundHook {
    priority: i32,
    seq: u64,
    service: String,
    callback: HookFn,
}

/// A loaded service with its bound runtime state.
#[derive(Clone)]
struct Loaded {
    service: Arc<Service>,
    state: Arc<ServiceState>,
    /// Topic → hooks, each list already sorted by `(-priority, seq)`.
    hooks: Arc<HashMap<String, Vec<BoundHook>>>,
}

type ResumeFn = Box<dyn FnOnce(Engine) -> BoxFuture<'static, ()> + Send>;

enum Submission {
    Event(Event),
    Resume(ResumeFn),
}

/// Engine construction options.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Locale reported by [`Context::locale`] when no scope sets one.
    pub default_locale: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            default_locale: "en".to_string(),
        }
    }
}

struct EngineInner {
    settings: RwLock<SettingsStore>,
    services: RwLock<HashMap<String, Loaded>>,
    connections: RwLock<HashMap<String, SharedConnection>>,
    providers: RwLock<HashMap<String, (String, ProviderFn)>>,
    acl: Acl,
    scheduler: Scheduler,
    tx: mpsc::UnboundedSender<Submission>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Submission>>>,
    hook_seq: AtomicU64,
    shutdown: CancellationToken,
    options: EngineOptions,
}

/// Handle to the bot engine. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Creates an engine over the given settings store.
    pub fn new(settings: SettingsStore) -> Self {
        Self::with_options(settings, EngineOptions::default())
    }

    /// Creates an engine with explicit options.
    pub fn with_options(settings: SettingsStore, options: EngineOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(EngineInner {
                settings: RwLock::new(settings),
                services: RwLock::new(HashMap::new()),
                connections: RwLock::new(HashMap::new()),
                providers: RwLock::new(HashMap::new()),
                acl: Acl::new(),
                scheduler: Scheduler::new(),
                tx,
                rx: Mutex::new(Some(rx)),
                hook_seq: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
                options,
            }),
        }
    }

    // ─── Component access ────────────────────────────────────────────────────

    /// The access-control authority.
    pub fn acl(&self) -> &Acl {
        &self.inner.acl
    }

    /// The scheduler.
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Locale used when no config scope sets one.
    pub fn default_locale(&self) -> &str {
        &self.inner.options.default_locale
    }

    /// Replaces the settings store, e.g. after a live config reload.
    pub fn replace_settings(&self, settings: SettingsStore) {
        *self.inner.settings.write() = settings;
    }

    pub(crate) fn resolve_settings(
        &self,
        service: &str,
        connection: Option<&str>,
        target: Option<&str>,
    ) -> Result<Value, ConfigError> {
        self.inner.settings.read().resolve(service, connection, target)
    }

    // ─── Connections ─────────────────────────────────────────────────────────

    /// Registers a connection under its own name.
    pub fn register_connection(&self, connection: SharedConnection) {
        let name = connection.name().to_string();
        self.inner.connections.write().insert(name.clone(), connection);
        info!(connection = %name, "Connection registered");
    }

    /// Removes a connection. Returns the handle if it was registered.
    pub fn unregister_connection(&self, name: &str) -> Option<SharedConnection> {
        self.inner.connections.write().remove(name)
    }

    /// Looks up a registered connection by name.
    pub fn connection(&self, name: &str) -> Option<SharedConnection> {
        self.inner.connections.read().get(name).cloned()
    }

    // ─── Service lifecycle ───────────────────────────────────────────────────

    /// Loads a service.
    ///
    /// If a service of the same name is already loaded it is unloaded first
    /// (replace semantics). The service's declared config schema is checked
    /// against its global-scope settings, its tasks are registered, and its
    /// setup hook runs with a fresh [`Context`]. A setup failure rolls the
    /// whole registration back and is returned to the caller.
    pub async fn load(&self, service: Service) -> Result<(), LoadError> {
        let name = service.name().to_string();

        if let Some(check) = service.schema_check() {
            let raw = self.resolve_settings(&name, None, None)?;
            check(&raw).map_err(|message| LoadError::Schema {
                service: name.clone(),
                message,
            })?;
        }

        if self.inner.services.read().contains_key(&name) {
            debug!(service = %name, "Replacing already-loaded service");
            if let Err(e) = self.unload(&name).await {
                warn!(service = %name, error = %e, "Shutdown of replaced service failed");
            }
        }

        let service = Arc::new(service);
        let state = Arc::new(ServiceState::default());

        // Bind hooks and commands with globally monotonic sequence numbers so
        // equal priorities keep registration order across services.
        let mut hooks: HashMap<String, Vec<BoundHook>> = HashMap::new();
        for def in service.hooks() {
            hooks.entry(def.topic.clone()).or_default().push(BoundHook {
                priority: def.priority,
                seq: self.next_seq(),
                service: name.clone(),
                callback: def.callback.clone(),
            });
        }
        for spec in service.commands() {
            let callback = command::bind(Arc::clone(spec));
            for topic in [
                ingot_core::topics::CHANNEL_MESSAGE,
                ingot_core::topics::PRIVATE_MESSAGE,
            ] {
                hooks.entry(topic.to_string()).or_default().push(BoundHook {
                    priority: spec.priority,
                    seq: self.next_seq(),
                    service: name.clone(),
                    callback: callback.clone(),
                });
            }
        }
        for list in hooks.values_mut() {
            list.sort_by_key(|h| (Reverse(h.priority), h.seq));
        }

        for (task, callback) in service.tasks() {
            self.inner
                .scheduler
                .register_task(&name, task, callback.clone());
        }

        self.inner.services.write().insert(
            name.clone(),
            Loaded {
                service: Arc::clone(&service),
                state: Arc::clone(&state),
                hooks: Arc::new(hooks),
            },
        );

        {
            let mut providers = self.inner.providers.write();
            for (pname, f) in service.providers() {
                if let Some((prev, _)) =
                    providers.insert(pname.clone(), (name.clone(), f.clone()))
                    && prev != name
                {
                    warn!(
                        provider = %pname,
                        prev_provider = %prev,
                        new_provider = %name,
                        "Duplicate provider — last registration wins"
                    );
                }
            }
        }

        if let Some(setup) = service.setup_hook() {
            let ctx = Context::background(self.clone(), &name, Arc::clone(&state));
            if let Err(source) = setup(ctx).await {
                // Roll the partial registration back before surfacing.
                self.inner.services.write().remove(&name);
                self.remove_providers_of(&name);
                self.inner.scheduler.unschedule_service(&name);
                return Err(LoadError::Setup {
                    service: name,
                    source,
                });
            }
        }

        info!(service = %name, "Service loaded");
        Ok(())
    }

    /// Unloads a service.
    ///
    /// Pending scheduler work is discarded *before* the shutdown hook runs,
    /// so a final scheduled fire can never race a torn-down service. The
    /// service is removed from the registry even when its shutdown hook
    /// fails; the failure is then returned to the caller.
    pub async fn unload(&self, name: &str) -> Result<(), LoadError> {
        let loaded = self
            .inner
            .services
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| LoadError::NotLoaded(name.to_string()))?;

        self.inner.scheduler.unschedule_service(name);

        let result = match loaded.service.shutdown_hook() {
            Some(shutdown) => {
                let ctx = Context::background(self.clone(), name, Arc::clone(&loaded.state));
                shutdown(ctx).await
            }
            None => Ok(()),
        };

        self.inner.services.write().remove(name);
        self.remove_providers_of(name);
        info!(service = %name, "Service unloaded");

        result.map_err(|source| LoadError::Shutdown {
            service: name.to_string(),
            source,
        })
    }

    /// Unloads every loaded service, logging shutdown failures.
    pub async fn unload_all(&self) {
        let names: Vec<String> = self.inner.services.read().keys().cloned().collect();
        for name in names {
            if let Err(e) = self.unload(&name).await {
                error!(service = %name, error = %e, "Unload failed");
            }
        }
    }

    /// Whether a service of this name is loaded.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.inner.services.read().contains_key(name)
    }

    /// Names of all loaded services.
    pub fn loaded(&self) -> Vec<String> {
        self.inner.services.read().keys().cloned().collect()
    }

    fn next_seq(&self) -> u64 {
        self.inner.hook_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn remove_providers_of(&self, service: &str) {
        self.inner
            .providers
            .write()
            .retain(|_, entry| entry.0 != service);
    }

    /// Looks up a provider exposed by any loaded service.
    pub fn provider(&self, name: &str) -> Option<ProviderFn> {
        self.inner.providers.read().get(name).map(|(_, f)| f.clone())
    }

    // ─── Dispatch ────────────────────────────────────────────────────────────

    /// Dispatches one event through the hook bus.
    ///
    /// The chain is the priority-merged sequence of hooks across all loaded
    /// services, recomputed for this call. Hooks run in order until one
    /// returns [`Outcome::Eat`]. A hook error is logged and the chain keeps
    /// going; nothing propagates to the caller.
    pub async fn dispatch(&self, event: Event) {
        let event = Arc::new(event);

        let mut chain: Vec<BoundHook> = {
            let services = self.inner.services.read();
            services
                .values()
                .flat_map(|loaded| {
                    loaded
                        .hooks
                        .get(&event.topic)
                        .into_iter()
                        .flatten()
                        .cloned()
                })
                .collect()
        };
        chain.sort_by_key(|h| (Reverse(h.priority), h.seq));

        debug!(topic = %event.topic, hooks = chain.len(), "Dispatching event");

        for hook in chain {
            // The owning service may have unloaded mid-chain; skip its hooks.
            let Some(state) = self
                .inner
                .services
                .read()
                .get(&hook.service)
                .map(|l| Arc::clone(&l.state))
            else {
                continue;
            };
            let ctx =
                Context::for_event(self.clone(), &hook.service, state, Arc::clone(&event));
            match (hook.callback)(ctx).await {
                Ok(Outcome::Eat) => {
                    debug!(topic = %event.topic, service = %hook.service, "Event eaten");
                    break;
                }
                Ok(Outcome::Continue) => {}
                Err(e) => {
                    error!(
                        topic = %event.topic,
                        service = %hook.service,
                        error = %e,
                        "Hook failed"
                    );
                }
            }
        }
    }

    // ─── Submission queue ────────────────────────────────────────────────────

    /// Enqueues an event for the dispatch loop.
    pub fn submit_event(&self, event: Event) -> Result<(), EngineError> {
        self.inner
            .tx
            .send(Submission::Event(event))
            .map_err(|_| EngineError::Closed)
    }

    /// Enqueues a resumption closure for the dispatch loop.
    ///
    /// This is the only sanctioned way for background work to reach
    /// engine-owned state: the closure runs on the dispatch loop, serialized
    /// with event processing.
    pub fn submit<F, Fut>(&self, f: F) -> Result<(), EngineError>
    where
        F: FnOnce(Engine) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.inner
            .tx
            .send(Submission::Resume(Box::new(move |engine| {
                Box::pin(f(engine))
            })))
            .map_err(|_| EngineError::Closed)
    }

    /// Runs the dispatch loop until [`shutdown`](Self::shutdown) is called.
    ///
    /// Also starts the scheduler's coordinator loop. Each submission — an
    /// event or a resumption — is processed to completion before the next.
    pub async fn run(&self) -> Result<(), EngineError> {
        let mut rx = self
            .inner
            .rx
            .lock()
            .take()
            .ok_or(EngineError::AlreadyRunning)?;

        let token = self.inner.shutdown.clone();
        let scheduler_engine = self.clone();
        let scheduler_token = token.clone();
        let scheduler = tokio::spawn(async move {
            let engine = scheduler_engine;
            engine
                .inner
                .scheduler
                .run(engine.clone(), scheduler_token)
                .await;
        });

        info!("Engine dispatch loop started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                submission = rx.recv() => match submission {
                    Some(Submission::Event(event)) => self.dispatch(event).await,
                    Some(Submission::Resume(resume)) => resume(self.clone()).await,
                    None => break,
                },
            }
        }

        let _ = scheduler.await;
        info!("Engine dispatch loop stopped");
        Ok(())
    }

    /// Stops the dispatch and scheduler loops.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Spawns one scheduled fire as an independent unit.
    ///
    /// Task errors are logged; the task's future queue is unaffected.
    pub(crate) fn spawn_scheduled(&self, fire: ScheduledFire) {
        let Some(state) = self
            .inner
            .services
            .read()
            .get(&fire.service)
            .map(|l| Arc::clone(&l.state))
        else {
            // Unloaded between the tick pass and the spawn.
            return;
        };
        let ctx = Context::background(self.clone(), &fire.service, state);
        tokio::spawn(async move {
            if let Err(e) = (fire.callback)(ctx, fire.args).await {
                error!(
                    service = %fire.service,
                    task = %fire.task,
                    error = %e,
                    "Scheduled task failed"
                );
            }
        });
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("services", &self.loaded())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Coerce, Command};
    use crate::service::HookResult;
    use async_trait::async_trait;
    use ingot_core::{Connection, ConnectionResult, topics};
    use parking_lot::Mutex as PlMutex;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct StubConnection {
        name: String,
        network: String,
        nick: String,
        channels: HashSet<String>,
        sent: PlMutex<Vec<(String, String)>>,
    }

    impl StubConnection {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                network: format!("{name}-net"),
                nick: "ingot".to_string(),
                channels: HashSet::from(["#foo".to_string(), "#bar".to_string()]),
                sent: PlMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Connection for StubConnection {
        fn name(&self) -> &str {
            &self.name
        }

        fn network(&self) -> &str {
            &self.network
        }

        fn nickname(&self) -> String {
            self.nick.clone()
        }

        fn is_channel(&self, target: &str) -> bool {
            target.starts_with('#')
        }

        fn has_channel(&self, channel: &str) -> bool {
            self.channels.contains(channel)
        }

        async fn send(&self, target: &str, text: &str) -> ConnectionResult<()> {
            self.sent.lock().push((target.to_string(), text.to_string()));
            Ok(())
        }

        async fn join(&self, _channel: &str) -> ConnectionResult<()> {
            Ok(())
        }
    }

    fn channel_message(text: &str) -> Event {
        Event::message(
            topics::CHANNEL_MESSAGE,
            "testconn",
            "alice!user@host",
            "#foo",
            text,
        )
    }

    fn recording_hook(
        log: Arc<PlMutex<Vec<&'static str>>>,
        label: &'static str,
        outcome: Outcome,
    ) -> impl Fn(Context) -> futures::future::BoxFuture<'static, HookResult> + Send + Sync + 'static
    {
        move |_ctx| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().push(label);
                Ok(outcome)
            })
        }
    }

    #[tokio::test]
    async fn hooks_run_in_descending_priority_order() {
        let engine = Engine::new(SettingsStore::new());
        let log = Arc::new(PlMutex::new(Vec::new()));

        let a = Service::builder("a")
            .hook("evt", 0, recording_hook(log.clone(), "a0", Outcome::Continue))
            .hook("evt", 10, recording_hook(log.clone(), "a10", Outcome::Continue))
            .build()
            .unwrap();
        let b = Service::builder("b")
            .hook("evt", 5, recording_hook(log.clone(), "b5", Outcome::Continue))
            .hook("evt", -1, recording_hook(log.clone(), "bneg", Outcome::Continue))
            .build()
            .unwrap();
        engine.load(a).await.unwrap();
        engine.load(b).await.unwrap();

        engine.dispatch(Event::bare("evt")).await;
        assert_eq!(*log.lock(), vec!["a10", "b5", "a0", "bneg"]);
    }

    #[tokio::test]
    async fn equal_priority_keeps_registration_order() {
        let engine = Engine::new(SettingsStore::new());
        let log = Arc::new(PlMutex::new(Vec::new()));

        let first = Service::builder("first")
            .hook("evt", 0, recording_hook(log.clone(), "first", Outcome::Continue))
            .build()
            .unwrap();
        let second = Service::builder("second")
            .hook("evt", 0, recording_hook(log.clone(), "second", Outcome::Continue))
            .build()
            .unwrap();
        engine.load(first).await.unwrap();
        engine.load(second).await.unwrap();

        engine.dispatch(Event::bare("evt")).await;
        engine.dispatch(Event::bare("evt")).await;
        assert_eq!(*log.lock(), vec!["first", "second", "first", "second"]);
    }

    #[tokio::test]
    async fn eat_short_circuits_the_chain() {
        let engine = Engine::new(SettingsStore::new());
        let log = Arc::new(PlMutex::new(Vec::new()));

        let service = Service::builder("eater")
            .hook("evt", 5, recording_hook(log.clone(), "high", Outcome::Eat))
            .hook("evt", 0, recording_hook(log.clone(), "low", Outcome::Continue))
            .build()
            .unwrap();
        engine.load(service).await.unwrap();

        engine.dispatch(Event::bare("evt")).await;
        assert_eq!(*log.lock(), vec!["high"]);
    }

    #[tokio::test]
    async fn hook_errors_do_not_break_the_chain() {
        let engine = Engine::new(SettingsStore::new());
        let log = Arc::new(PlMutex::new(Vec::new()));
        let log2 = Arc::clone(&log);

        let service = Service::builder("faulty")
            .hook("evt", 5, move |_ctx| {
                let log = Arc::clone(&log2);
                async move {
                    log.lock().push("boom");
                    Err("deliberate failure".into())
                }
            })
            .hook("evt", 0, recording_hook(log.clone(), "after", Outcome::Continue))
            .build()
            .unwrap();
        engine.load(service).await.unwrap();

        // Must not panic or propagate; the later hook still runs.
        engine.dispatch(Event::bare("evt")).await;
        assert_eq!(*log.lock(), vec!["boom", "after"]);
    }

    #[tokio::test]
    async fn failed_setup_rolls_back_registration() {
        let engine = Engine::new(SettingsStore::new());

        let service = Service::builder("broken")
            .task("tick", |_ctx, _args| async { Ok(()) })
            .on_setup(|_ctx| async { Err("setup exploded".into()) })
            .build()
            .unwrap();

        let err = engine.load(service).await.unwrap_err();
        assert!(matches!(err, LoadError::Setup { .. }));
        assert!(!engine.is_loaded("broken"));
        assert!(engine.loaded().is_empty());
        // Task registrations were rolled back too.
        assert!(
            engine
                .scheduler()
                .schedule_after("broken", "tick", std::time::Duration::from_secs(1), json!(null))
                .is_err()
        );
    }

    #[tokio::test]
    async fn replace_semantics_shut_down_the_old_instance() {
        let engine = Engine::new(SettingsStore::new());
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let shutdowns2 = Arc::clone(&shutdowns);

        let old = Service::builder("svc")
            .on_shutdown(move |_ctx| {
                let n = Arc::clone(&shutdowns2);
                async move {
                    n.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(())
                }
            })
            .build()
            .unwrap();
        engine.load(old).await.unwrap();

        let replacement = Service::builder("svc").build().unwrap();
        engine.load(replacement).await.unwrap();

        assert_eq!(shutdowns.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(engine.loaded(), vec!["svc".to_string()]);
    }

    #[tokio::test]
    async fn unload_removes_hooks_and_providers() {
        let engine = Engine::new(SettingsStore::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);

        let service = Service::builder("svc")
            .hook("evt", 0, move |_ctx| {
                let hits = Arc::clone(&hits2);
                async move {
                    hits.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(Outcome::Continue)
                }
            })
            .provide("lookup", |args| async move { Ok(args) })
            .build()
            .unwrap();
        engine.load(service).await.unwrap();

        engine.dispatch(Event::bare("evt")).await;
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 1);
        assert!(engine.provider("lookup").is_some());

        engine.unload("svc").await.unwrap();
        engine.dispatch(Event::bare("evt")).await;
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 1);
        assert!(engine.provider("lookup").is_none());
    }

    #[tokio::test]
    async fn unload_discards_pending_scheduler_work() {
        let engine = Engine::new(SettingsStore::new());

        let service = Service::builder("svc")
            .task("later", |_ctx, _args| async { Ok(()) })
            .on_setup(|ctx| async move {
                ctx.schedule_after("later", std::time::Duration::from_secs(60), json!(null))?;
                Ok(())
            })
            .build()
            .unwrap();
        engine.load(service).await.unwrap();
        assert_eq!(engine.scheduler().pending("svc", "later"), 1);

        engine.unload("svc").await.unwrap();
        assert_eq!(engine.scheduler().pending("svc", "later"), 0);
    }

    #[tokio::test]
    async fn shutdown_error_still_removes_the_service() {
        let engine = Engine::new(SettingsStore::new());
        let service = Service::builder("svc")
            .on_shutdown(|_ctx| async { Err("shutdown exploded".into()) })
            .build()
            .unwrap();
        engine.load(service).await.unwrap();

        let err = engine.unload("svc").await.unwrap_err();
        assert!(matches!(err, LoadError::Shutdown { .. }));
        assert!(!engine.is_loaded("svc"));
    }

    #[tokio::test]
    async fn schema_mismatch_fails_the_load() {
        #[derive(serde::Deserialize)]
        struct Cfg {
            #[allow(dead_code)]
            count: u32,
        }

        let mut settings = SettingsStore::new();
        settings.set_global("svc", json!({ "count": "not a number" }));
        let engine = Engine::new(settings);

        let service = Service::builder("svc").config_schema::<Cfg>().build().unwrap();
        let err = engine.load(service).await.unwrap_err();
        assert!(matches!(err, LoadError::Schema { .. }));
        assert!(!engine.is_loaded("svc"));
    }

    // ─── Command routing ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn command_matches_and_replies() {
        let engine = Engine::new(SettingsStore::new());
        let conn = StubConnection::new("testconn");
        engine.register_connection(conn.clone());

        let service = Service::builder("echo")
            .command(
                Command::new(r"!echo (?P<rest>.+)").handler(|ctx, args| async move {
                    let rest = args["rest"].as_str().unwrap_or_default().to_string();
                    ctx.respond(&rest).await?;
                    Ok(())
                }),
            )
            .build()
            .unwrap();
        engine.load(service).await.unwrap();

        engine.dispatch(channel_message("!echo hello world")).await;
        assert_eq!(
            *conn.sent.lock(),
            vec![("#foo".to_string(), "alice: hello world".to_string())]
        );
    }

    #[tokio::test]
    async fn command_match_eats_the_event_by_default() {
        let engine = Engine::new(SettingsStore::new());
        let conn = StubConnection::new("testconn");
        engine.register_connection(conn.clone());
        let log = Arc::new(PlMutex::new(Vec::new()));

        let service = Service::builder("svc")
            .command(
                Command::new(r"!ping")
                    .priority(1)
                    .handler(|_ctx, _args| async { Ok(()) }),
            )
            .hook(
                topics::CHANNEL_MESSAGE,
                0,
                recording_hook(log.clone(), "logger", Outcome::Continue),
            )
            .build()
            .unwrap();
        engine.load(service).await.unwrap();

        engine.dispatch(channel_message("!ping")).await;
        assert!(log.lock().is_empty());

        // A non-matching message is not consumed.
        engine.dispatch(channel_message("unrelated")).await;
        assert_eq!(*log.lock(), vec!["logger"]);
    }

    #[tokio::test]
    async fn permission_gate_skips_silently_until_granted() {
        let engine = Engine::new(SettingsStore::new());
        let conn = StubConnection::new("testconn");
        engine.register_connection(conn.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);

        let service = Service::builder("admin-tools")
            .command(
                Command::new(r"!kick (?P<who>\S+)")
                    .permission("kick")
                    .handler(move |_ctx, _args| {
                        let hits = Arc::clone(&hits2);
                        async move {
                            hits.fetch_add(1, AtomicOrdering::SeqCst);
                            Ok(())
                        }
                    }),
            )
            .build()
            .unwrap();
        engine.load(service).await.unwrap();

        engine.dispatch(channel_message("!kick bob")).await;
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 0);
        assert!(conn.sent.lock().is_empty());

        // A global grant on the right network opens the gate.
        engine.acl().grant("testconn-net", "alice!*@*", "kick", None);
        engine.dispatch(channel_message("!kick bob")).await;
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 1);

        // The admin permission implies everything.
        engine.acl().revoke("testconn-net", "alice!*@*", Some("kick"), None);
        engine.acl().grant("testconn-net", "alice!*@*", "admin", None);
        engine.dispatch(channel_message("!kick bob")).await;
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn channel_scoped_grant_only_works_in_that_channel() {
        let engine = Engine::new(SettingsStore::new());
        let conn = StubConnection::new("testconn");
        engine.register_connection(conn.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);

        let service = Service::builder("svc")
            .command(Command::new(r"!op").permission("op").handler(move |_ctx, _args| {
                let hits = Arc::clone(&hits2);
                async move {
                    hits.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(())
                }
            }))
            .build()
            .unwrap();
        engine.load(service).await.unwrap();
        engine.acl().grant("testconn-net", "alice!*@*", "op", Some("#bar"));

        engine.dispatch(channel_message("!op")).await; // lands in #foo
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 0);

        let mut in_bar = channel_message("!op");
        in_bar.target = Some("#bar".to_string());
        engine.dispatch(in_bar).await;
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mention_gate_requires_addressing_in_channels() {
        let engine = Engine::new(SettingsStore::new());
        let conn = StubConnection::new("testconn");
        engine.register_connection(conn.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);

        let service = Service::builder("svc")
            .command(Command::new(r"roll").mention(true).handler(move |_ctx, _args| {
                let hits = Arc::clone(&hits2);
                async move {
                    hits.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(())
                }
            }))
            .build()
            .unwrap();
        engine.load(service).await.unwrap();

        engine.dispatch(channel_message("roll")).await;
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 0);

        engine.dispatch(channel_message("ingot: roll")).await;
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 1);

        // Private messages are inherently addressed to the bot.
        let private = Event::message(
            topics::PRIVATE_MESSAGE,
            "testconn",
            "alice!user@host",
            "ingot",
            "roll",
        );
        engine.dispatch(private).await;
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn context_tag_gates_commands() {
        let engine = Engine::new(SettingsStore::new());
        let conn = StubConnection::new("testconn");
        engine.register_connection(conn.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);

        let service = Service::builder("game")
            .command(
                Command::new(r"!start").handler(|ctx, _args| async move {
                    ctx.add_context("game");
                    Ok(())
                }),
            )
            .command(
                Command::new(r"(?P<guess>\d+)")
                    .context("game")
                    .handler(move |ctx, _args| {
                        let hits = Arc::clone(&hits2);
                        async move {
                            hits.fetch_add(1, AtomicOrdering::SeqCst);
                            ctx.remove_context("game");
                            Ok(())
                        }
                    }),
            )
            .build()
            .unwrap();
        engine.load(service).await.unwrap();

        // No active game: the bare-number command is skipped silently.
        engine.dispatch(channel_message("42")).await;
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 0);

        engine.dispatch(channel_message("!start")).await;
        engine.dispatch(channel_message("42")).await;
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 1);

        // The handler closed the context again.
        engine.dispatch(channel_message("42")).await;
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn coerced_arguments_arrive_typed() {
        let engine = Engine::new(SettingsStore::new());
        let conn = StubConnection::new("testconn");
        engine.register_connection(conn.clone());
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);

        let service = Service::builder("svc")
            .command(
                Command::new(r"!add (?P<a>\d+) (?P<b>\d+)")
                    .arg("a", Coerce::Int)
                    .arg("b", Coerce::Int)
                    .handler(move |_ctx, args| {
                        let seen = Arc::clone(&seen2);
                        async move {
                            seen.lock().push(args);
                            Ok(())
                        }
                    }),
            )
            .build()
            .unwrap();
        engine.load(service).await.unwrap();

        engine.dispatch(channel_message("!add 2 40")).await;
        assert_eq!(seen.lock()[0], json!({ "a": 2, "b": 40 }));
    }

    #[tokio::test]
    async fn background_command_runs_off_the_dispatch_unit() {
        let engine = Engine::new(SettingsStore::new());
        let conn = StubConnection::new("testconn");
        engine.register_connection(conn.clone());
        let notify = Arc::new(tokio::sync::Notify::new());
        let notify2 = Arc::clone(&notify);

        let service = Service::builder("svc")
            .command(
                Command::new(r"!slow")
                    .background(true)
                    .handler(move |_ctx, _args| {
                        let notify = Arc::clone(&notify2);
                        async move {
                            notify.notify_one();
                            Ok(())
                        }
                    }),
            )
            .build()
            .unwrap();
        engine.load(service).await.unwrap();

        // Dispatch returns without waiting for the handler...
        engine.dispatch(channel_message("!slow")).await;
        // ...which still runs to completion on the pool.
        notify.notified().await;
    }

    #[tokio::test]
    async fn resumptions_drain_through_the_dispatch_loop() {
        let engine = Engine::new(SettingsStore::new());
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);

        engine
            .submit(move |_engine| {
                let ran = Arc::clone(&ran2);
                async move {
                    ran.fetch_add(1, AtomicOrdering::SeqCst);
                }
            })
            .unwrap();

        let runner = engine.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        // Give the loop a chance to drain the resumption, then stop it.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        engine.shutdown();
        handle.await.unwrap().unwrap();

        assert_eq!(ran.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn config_resolves_lazily_through_the_scope_chain() {
        #[derive(serde::Deserialize)]
        struct Cfg {
            x: i64,
            #[serde(default)]
            enabled: bool,
        }

        let mut settings = SettingsStore::new();
        settings.set_global("svc", json!({ "x": 1, "enabled": true }));
        settings.set_channel("testconn", "#foo", "svc", json!({ "x": 2 }));
        let engine = Engine::new(settings);
        let conn = StubConnection::new("testconn");
        engine.register_connection(conn.clone());
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);

        let service = Service::builder("svc")
            .command(Command::new(r"!show").handler(move |ctx, _args| {
                let seen = Arc::clone(&seen2);
                async move {
                    let cfg: Cfg = ctx.config()?;
                    seen.lock().push((cfg.x, cfg.enabled));
                    Ok(())
                }
            }))
            .build()
            .unwrap();
        engine.load(service).await.unwrap();

        engine.dispatch(channel_message("!show")).await;
        assert_eq!(*seen.lock(), vec![(2, true)]);
    }

    #[tokio::test]
    async fn providers_are_consumable_across_services() {
        let engine = Engine::new(SettingsStore::new());

        let provider = Service::builder("dictionary")
            .provide("define", |args| async move {
                let word = args.as_str().unwrap_or_default();
                Ok(json!(format!("definition of {word}")))
            })
            .build()
            .unwrap();
        engine.load(provider).await.unwrap();

        let f = engine.provider("define").expect("provider registered");
        let result = f(json!("ingot")).await.unwrap();
        assert_eq!(result, json!("definition of ingot"));
        assert!(engine.provider("missing").is_none());
    }
}
