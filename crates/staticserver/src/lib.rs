//! Embeddable static-content HTTP server
//!
//! This crate serves files from a local directory to same-device or
//! same-network HTTP clients. Start and stop follow the host application's
//! foreground/background transitions unless keep-alive is requested.

mod address;
mod config;
mod control;
mod engine;
mod error;
mod lifecycle;
mod path;
mod response;

pub use address::{parse_port, BindTarget};
pub use config::{ServerConfig, ServerSettings, StartOptions};
pub use control::StaticServer;
pub use engine::{router, ServerEngine};
pub use error::{Result, ServerError};
pub use lifecycle::{
    AppState, AppStateEvents, LifecycleAction, LifecycleController, LifecycleSubscription, Platform,
};
pub use path::{Classification, RequestMapping};
