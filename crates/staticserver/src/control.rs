//! Public control surface: start, stop, kill, origin, is_running

use std::sync::{Arc, OnceLock, Weak};

use tokio::sync::Mutex;

use crate::config::{ServerConfig, ServerSettings, StartOptions};
use crate::engine::ServerEngine;
use crate::error::Result;
use crate::lifecycle::{
    AppState, AppStateEvents, LifecycleAction, LifecycleController, LifecycleSubscription,
};

/// Process-wide facade instance
static GLOBAL: OnceLock<StaticServer> = OnceLock::new();

/// Everything guarded by the facade lock
struct ControlState {
    engine: ServerEngine,
    /// The user wants the server active
    intent: bool,
    /// Configuration of the last successful start, used to resume
    last_config: Option<ServerConfig>,
    /// Port bound by the last successful start; resume tries it first
    last_port: Option<u16>,
    subscription: Option<LifecycleSubscription>,
}

struct Inner {
    settings: ServerSettings,
    events: AppStateEvents,
    state: Mutex<ControlState>,
}

/// Idempotent control facade over the engine and lifecycle tracking
///
/// Cloning is cheap; clones share the same server.
#[derive(Clone)]
pub struct StaticServer {
    inner: Arc<Inner>,
}

impl StaticServer {
    /// Create a facade with its own engine
    pub fn new(settings: ServerSettings) -> Self {
        let engine = ServerEngine::new(settings.shutdown_grace);
        Self {
            inner: Arc::new(Inner {
                settings,
                events: AppStateEvents::new(),
                state: Mutex::new(ControlState {
                    engine,
                    intent: false,
                    last_config: None,
                    last_port: None,
                    subscription: None,
                }),
            }),
        }
    }

    /// The process-wide instance, configured from the environment on first use
    pub fn global() -> &'static StaticServer {
        GLOBAL.get_or_init(|| StaticServer::new(ServerSettings::from_env()))
    }

    /// Host settings this facade was created with
    pub fn settings(&self) -> &ServerSettings {
        &self.inner.settings
    }

    /// Notifier for publishing app state changes to this facade
    pub fn app_state_events(&self) -> AppStateEvents {
        self.inner.events.clone()
    }

    /// Start serving and return the origin
    ///
    /// Returns the current origin unchanged if already running. On failure
    /// the lifecycle intent is restored to its previous value.
    pub async fn start(&self, options: &StartOptions) -> Result<String> {
        let mut state = self.inner.state.lock().await;
        let prior_intent = state.intent;
        state.intent = true;

        let result = self.start_locked(&mut state, options).await;
        if let Err(e) = &result {
            tracing::error!("Failed to start static server: {}", e);
            state.intent = prior_intent;
        }
        result
    }

    async fn start_locked(&self, state: &mut ControlState, options: &StartOptions) -> Result<String> {
        if let Some(origin) = state.engine.origin() {
            tracing::debug!("Static server already running at {}", origin);
            return Ok(origin.to_string());
        }

        let config = ServerConfig::resolve(options, &self.inner.settings)?;

        let origin = state.engine.start(&config).await?;
        state.last_port = state.engine.local_addr().map(|addr| addr.port());

        // Lifecycle tracking follows the keep-alive flag of the latest start
        let track =
            LifecycleController::should_subscribe(self.inner.settings.platform, config.keep_alive);
        match state.subscription.take() {
            Some(subscription) if !track => {
                tracing::debug!("Keep-alive requested, no longer tracking app state changes");
                subscription.unsubscribe();
            }
            Some(subscription) => state.subscription = Some(subscription),
            None if track => {
                tracing::debug!("Subscribing to app state changes");
                state.subscription = Some(self.subscribe_lifecycle());
            }
            None => {}
        }

        state.last_config = Some(config);

        Ok(origin)
    }

    /// Stop serving; lifecycle intent and subscription are kept
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        state.engine.stop().await;
    }

    /// Stop serving and discard all lifecycle tracking
    pub async fn kill(&self) {
        let mut state = self.inner.state.lock().await;
        state.engine.stop().await;
        state.intent = false;
        state.last_config = None;
        state.last_port = None;

        if let Some(subscription) = state.subscription.take() {
            subscription.unsubscribe();
        }
        tracing::info!("Static server killed");
    }

    /// Current origin, or an empty string when not running
    pub async fn origin(&self) -> String {
        let state = self.inner.state.lock().await;
        state.engine.origin().unwrap_or_default().to_string()
    }

    /// Whether the engine is bound and serving
    pub async fn is_running(&self) -> bool {
        let state = self.inner.state.lock().await;
        state.engine.is_running()
    }

    /// Whether the user currently wants the server active
    pub async fn wants_running(&self) -> bool {
        let state = self.inner.state.lock().await;
        state.intent
    }

    /// Whether app state changes are being tracked
    pub async fn is_tracking_lifecycle(&self) -> bool {
        let state = self.inner.state.lock().await;
        state.subscription.as_ref().is_some_and(LifecycleSubscription::is_active)
    }

    fn subscribe_lifecycle(&self) -> LifecycleSubscription {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        LifecycleController::subscribe(&self.inner.events, move |app_state| {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => {
                        StaticServer { inner }.handle_app_state(app_state).await;
                        true
                    }
                    None => false,
                }
            }
        })
    }

    /// Apply an app state change
    async fn handle_app_state(&self, app_state: AppState) -> Option<LifecycleAction> {
        let mut state = self.inner.state.lock().await;
        let action =
            LifecycleController::decide(app_state, state.intent, state.engine.is_running())?;

        match action {
            LifecycleAction::Suspend => {
                if state.engine.config().is_some_and(|config| config.keep_alive) {
                    tracing::debug!("App is {}, keep-alive server stays up", app_state);
                    return None;
                }
                tracing::info!("App is {}, suspending static server", app_state);
                state.engine.stop().await;
            }
            LifecycleAction::Resume => {
                let Some(config) = state.last_config.clone() else {
                    tracing::warn!("No previous configuration to resume with");
                    return None;
                };
                resume(&mut state, config).await;
            }
        }

        Some(action)
    }
}

/// Restart with the previous configuration, preferring the previous port
async fn resume(state: &mut ControlState, config: ServerConfig) {
    let pinned = ServerConfig {
        port: config.port.or(state.last_port),
        ..config.clone()
    };

    let result = match state.engine.start(&pinned).await {
        Err(e) if config.port.is_none() => {
            tracing::warn!("Previous port unavailable ({}), picking a new one", e);
            state.engine.start(&config).await
        }
        result => result,
    };

    match result {
        Ok(origin) => {
            state.last_port = state.engine.local_addr().map(|addr| addr.port());
            tracing::info!("Resumed static server at {}", origin);
        }
        Err(e) => tracing::error!("Failed to resume static server: {}", e),
    }
}
