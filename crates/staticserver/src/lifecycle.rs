//! Foreground/background tracking
//!
//! The host publishes [`AppState`] changes through [`AppStateEvents`]. A
//! [`LifecycleSubscription`] listens to them and asks the control facade to
//! suspend or resume the server.

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Buffered app state changes before slow subscribers start lagging
const EVENT_CAPACITY: usize = 16;

/// Host application state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    /// In the foreground
    Active,
    /// Moved to the background
    Background,
    /// Transitioning or obscured (e.g., app switcher)
    Inactive,
}

impl FromStr for AppState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(AppState::Active),
            "background" => Ok(AppState::Background),
            "inactive" => Ok(AppState::Inactive),
            other => Err(format!("unknown app state: {}", other)),
        }
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppState::Active => write!(f, "active"),
            AppState::Background => write!(f, "background"),
            AppState::Inactive => write!(f, "inactive"),
        }
    }
}

/// Host platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Android,
    Ios,
    Desktop,
}

impl Platform {
    /// Platform of the current compile target
    pub fn current() -> Self {
        if cfg!(target_os = "android") {
            Platform::Android
        } else if cfg!(target_os = "ios") {
            Platform::Ios
        } else {
            Platform::Desktop
        }
    }

    /// Whether background execution is constrained, so the server should
    /// follow foreground/background transitions
    pub fn manages_lifecycle(&self) -> bool {
        matches!(self, Platform::Android | Platform::Ios)
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            "desktop" => Ok(Platform::Desktop),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

/// Notifier the host uses to publish app state changes
#[derive(Debug, Clone)]
pub struct AppStateEvents {
    tx: broadcast::Sender<AppState>,
}

impl Default for AppStateEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl AppStateEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publish a state change
    ///
    /// Returns the number of subscribers that will see it.
    pub fn notify(&self, state: AppState) -> usize {
        tracing::debug!("App state changed: {}", state);
        self.tx.send(state).unwrap_or(0)
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn receiver(&self) -> broadcast::Receiver<AppState> {
        self.tx.subscribe()
    }
}

/// What the controller wants done for an app state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Start again with the last configuration
    Resume,
    /// Stop the engine, keeping the intent
    Suspend,
}

/// Maps app state changes onto engine actions
pub struct LifecycleController;

impl LifecycleController {
    /// Decide what to do for `state`
    ///
    /// # Arguments
    /// * `state` - New app state
    /// * `intent` - Whether the user wants the server active
    /// * `running` - Whether the engine is currently running
    pub fn decide(state: AppState, intent: bool, running: bool) -> Option<LifecycleAction> {
        match state {
            AppState::Active if intent && !running => Some(LifecycleAction::Resume),
            AppState::Background | AppState::Inactive if running => Some(LifecycleAction::Suspend),
            _ => None,
        }
    }

    /// Whether a start with `keep_alive` on `platform` should subscribe
    pub fn should_subscribe(platform: Platform, keep_alive: bool) -> bool {
        platform.manages_lifecycle() && !keep_alive
    }

    /// Listen to `events` and pass each state to `handler`
    ///
    /// The receiver is created before this returns, so no event published
    /// afterwards is missed. The task ends when the subscription is dropped,
    /// when every sender is gone, or when `handler` returns `false`.
    pub fn subscribe<F, Fut>(events: &AppStateEvents, mut handler: F) -> LifecycleSubscription
    where
        F: FnMut(AppState) -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let mut rx = events.receiver();

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(state) => {
                        if !handler(state).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Lifecycle listener skipped {} app state events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("Lifecycle listener finished");
        });

        LifecycleSubscription { task: Some(task) }
    }
}

/// Handle to an active lifecycle listener
pub struct LifecycleSubscription {
    task: Option<JoinHandle<()>>,
}

impl LifecycleSubscription {
    /// Stop listening
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    /// Whether the listener task is still running
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for LifecycleSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
