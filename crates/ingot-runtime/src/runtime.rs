//! Runtime orchestration.
//!
//! [`Runtime`] wires an [`Engine`] together from an [`IngotConfig`], runs its
//! dispatch loop, and handles process-level concerns: SIGHUP is broadcast to
//! services as the `"sighup"` topic, and ctrl-c unloads every service before
//! stopping the loops.
//!
//! The runtime does not open connections itself — the host registers its
//! [`Connection`](ingot_core::Connection) implementations on the engine and
//! feeds their events in via [`Engine::submit_event`].

use tracing::{error, info};

use ingot_core::{Event, topics};
use ingot_engine::{Engine, EngineOptions, Service};

use crate::config::IngotConfig;
use crate::error::{RuntimeError, RuntimeResult};

/// The runtime: an engine plus process-level wiring.
pub struct Runtime {
    engine: Engine,
    config: IngotConfig,
}

impl Runtime {
    /// Builds a runtime from a loaded configuration.
    pub fn new(config: IngotConfig) -> Self {
        let engine = Engine::with_options(
            config.settings_store(),
            EngineOptions {
                default_locale: config.bot.locale.clone(),
            },
        );
        Self { engine, config }
    }

    /// The engine handle.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The configuration this runtime was built from.
    pub fn config(&self) -> &IngotConfig {
        &self.config
    }

    /// Loads a batch of services, stopping at the first failure.
    pub async fn load_services(
        &self,
        services: impl IntoIterator<Item = Service>,
    ) -> RuntimeResult<()> {
        for service in services {
            self.engine.load(service).await?;
        }
        Ok(())
    }

    /// Applies a freshly loaded configuration to the running engine and
    /// notifies services via the `"sighup"` topic.
    pub fn reload(&self, config: IngotConfig) -> RuntimeResult<()> {
        self.engine.replace_settings(config.settings_store());
        self.engine.submit_event(Event::bare(topics::SIGHUP))?;
        info!("Configuration reloaded");
        Ok(())
    }

    /// Runs until interrupted.
    ///
    /// Starts the dispatch and scheduler loops, forwards SIGHUP to services
    /// as the `"sighup"` topic (unix only), and on ctrl-c unloads all
    /// services before shutting the loops down.
    pub async fn run(&self) -> RuntimeResult<()> {
        let engine = self.engine.clone();
        let loop_handle = tokio::spawn(async move { engine.run().await });

        #[cfg(unix)]
        let sighup_handle = {
            use tokio::signal::unix::{SignalKind, signal};
            let mut stream = signal(SignalKind::hangup()).map_err(RuntimeError::Signal)?;
            let engine = self.engine.clone();
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    info!("SIGHUP received, notifying services");
                    if engine.submit_event(Event::bare(topics::SIGHUP)).is_err() {
                        break;
                    }
                }
            })
        };

        tokio::signal::ctrl_c().await.map_err(RuntimeError::Signal)?;
        info!("Interrupt received, shutting down");

        self.engine.unload_all().await;
        self.engine.shutdown();

        #[cfg(unix)]
        sighup_handle.abort();

        match loop_handle.await {
            Ok(result) => result?,
            Err(e) => error!(error = %e, "Dispatch loop panicked"),
        }
        Ok(())
    }
}
