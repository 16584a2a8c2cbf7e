//! Error types for server start-up

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Errors surfaced from `start`
///
/// Per-request failures never show up here: they are answered with a 404
/// (or 416) and the accept loop keeps running.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The configured root does not exist
    #[error("root directory not found: {}", .0.display())]
    RootNotFound(PathBuf),
    /// The configured root could not be inspected (e.g., permission denied)
    #[error("cannot access root directory {}: {source}", .path.display())]
    RootInaccessible {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The configured root exists but is not a directory
    #[error("root is not a directory: {}", .0.display())]
    RootNotDirectory(PathBuf),
    /// `BundleDir` was requested but the host never configured one
    #[error("bundle directory is not configured")]
    BundleDirUnavailable,
    /// Could not obtain an ephemeral port from the OS
    #[error("failed to allocate an ephemeral port: {0}")]
    PortProbe(#[source] io::Error),
    /// Binding the listening socket failed
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

impl ServerError {
    /// Short stable code for rejecting a host-side promise
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::RootNotFound(_)
            | ServerError::RootInaccessible { .. }
            | ServerError::RootNotDirectory(_)
            | ServerError::BundleDirUnavailable => "config_error",
            ServerError::PortProbe(_) | ServerError::Bind { .. } => "server_error",
        }
    }

    /// Whether the error was caused by configuration rather than the network
    pub fn is_config_error(&self) -> bool {
        self.code() == "config_error"
    }
}

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, ServerError>;
