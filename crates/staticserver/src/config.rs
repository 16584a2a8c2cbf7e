//! Start arguments, resolved server configuration and host settings

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::address::parse_port;
use crate::error::{Result, ServerError};
use crate::lifecycle::Platform;

/// Root alias for the private storage directory itself
const DOCUMENT_DIR_ALIAS: &str = "DocumentDir";

/// Root alias for the application bundle directory
const BUNDLE_DIR_ALIAS: &str = "BundleDir";

/// Default time `stop` waits for in-flight responses
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// Raw arguments of a `start` call, as received from the host bridge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Requested port; empty, zero or unparsable selects an ephemeral port
    pub port: String,
    /// Absolute path, `file://` URL, alias, or name under the storage directory
    pub root: String,
    /// Bind to loopback only
    pub local_only: bool,
    /// Keep serving while the application is in the background
    pub keep_alive: bool,
}

impl StartOptions {
    /// Create start options
    ///
    /// # Arguments
    /// * `port` - Requested port as text (e.g., "8080", "" or "0" for ephemeral)
    /// * `root` - Root directory (e.g., "/sdcard/www" or "www")
    pub fn new(port: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            root: root.into(),
            local_only: false,
            keep_alive: false,
        }
    }

    /// Set the local-only flag
    pub fn local_only(mut self, local_only: bool) -> Self {
        self.local_only = local_only;
        self
    }

    /// Set the keep-alive flag
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Read start options from `STATIC_SERVER_*` environment variables
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("STATIC_SERVER_PORT").unwrap_or_default(),
            root: std::env::var("STATIC_SERVER_ROOT").unwrap_or_default(),
            local_only: env_flag("STATIC_SERVER_LOCAL_ONLY"),
            keep_alive: env_flag("STATIC_SERVER_KEEP_ALIVE"),
        }
    }
}

/// Validated configuration for a single start call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Canonical root directory
    pub root: PathBuf,
    /// Explicit port, or `None` for an ephemeral one
    pub port: Option<u16>,
    pub local_only: bool,
    pub keep_alive: bool,
}

impl ServerConfig {
    /// Resolve raw start options against the host settings
    ///
    /// Fails when the root does not resolve to an existing directory.
    pub fn resolve(options: &StartOptions, settings: &ServerSettings) -> Result<Self> {
        let root = resolve_root(&options.root, settings)?;
        Ok(Self {
            root,
            port: parse_port(&options.port),
            local_only: options.local_only,
            keep_alive: options.keep_alive,
        })
    }
}

/// Host-level settings that stay fixed for the lifetime of a facade
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Application private storage; relative roots resolve beneath it
    pub storage_dir: PathBuf,
    /// Read-only application bundle, if the host has one
    pub bundle_dir: Option<PathBuf>,
    /// Host platform, decides whether lifecycle management applies
    pub platform: Platform,
    /// How long `stop` waits for in-flight responses to drain
    pub shutdown_grace: Duration,
}

impl ServerSettings {
    /// Create settings with the given storage directory and defaults otherwise
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            bundle_dir: None,
            platform: Platform::current(),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
        }
    }

    /// Set the bundle directory
    pub fn with_bundle_dir(mut self, bundle_dir: impl Into<PathBuf>) -> Self {
        self.bundle_dir = Some(bundle_dir.into());
        self
    }

    /// Set the platform
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Set the shutdown grace period
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Read settings from `STATIC_SERVER_*` environment variables
    ///
    /// Unset or invalid values fall back to defaults; the storage directory
    /// defaults to the current working directory.
    pub fn from_env() -> Self {
        let storage_dir = std::env::var("STATIC_SERVER_STORAGE_DIR")
            .map(PathBuf::from)
            .or_else(|_| std::env::current_dir())
            .unwrap_or_else(|_| PathBuf::from("."));

        let mut settings = Self::new(storage_dir);

        if let Ok(bundle) = std::env::var("STATIC_SERVER_BUNDLE_DIR") {
            if !bundle.is_empty() {
                settings.bundle_dir = Some(PathBuf::from(bundle));
            }
        }

        if let Ok(platform) = std::env::var("STATIC_SERVER_PLATFORM") {
            match platform.parse::<Platform>() {
                Ok(platform) => settings.platform = platform,
                Err(e) => tracing::warn!("Ignoring STATIC_SERVER_PLATFORM: {}", e),
            }
        }

        if let Some(secs) = std::env::var("STATIC_SERVER_SHUTDOWN_GRACE_SECS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            settings.shutdown_grace = Duration::from_secs(secs);
        }

        settings
    }
}

/// Map a root argument to a canonical directory
fn resolve_root(root: &str, settings: &ServerSettings) -> Result<PathBuf> {
    let root = root.strip_prefix("file://").unwrap_or(root);

    let candidate = match root {
        "" | DOCUMENT_DIR_ALIAS => settings.storage_dir.clone(),
        BUNDLE_DIR_ALIAS => settings
            .bundle_dir
            .clone()
            .ok_or(ServerError::BundleDirUnavailable)?,
        _ if Path::new(root).is_absolute() => PathBuf::from(root),
        _ => settings.storage_dir.join(root),
    };

    let canonical = candidate
        .canonicalize()
        .map_err(|e| root_error(candidate.clone(), e))?;

    if !canonical.is_dir() {
        return Err(ServerError::RootNotDirectory(canonical));
    }

    Ok(canonical)
}

fn root_error(path: PathBuf, e: io::Error) -> ServerError {
    if e.kind() == io::ErrorKind::NotFound {
        return ServerError::RootNotFound(path);
    }
    tracing::warn!("Cannot resolve root {}: {}", path.display(), e);
    ServerError::RootInaccessible { path, source: e }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}
