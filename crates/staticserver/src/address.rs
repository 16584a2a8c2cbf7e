//! Bind address and port selection

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::net::TcpListener;

use crate::error::{Result, ServerError};

/// Host name advertised in the origin for loopback-only servers
const LOCALHOST: &str = "localhost";

/// Where the engine should bind and how clients will address it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindTarget {
    /// Address to bind the listener on
    pub ip: IpAddr,
    /// Host part of the origin
    pub host: String,
    /// Port to bind; never zero
    pub port: u16,
}

impl BindTarget {
    /// Socket address for the listener
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// `scheme://host:port` for this target
    pub fn origin(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Parse a requested port
///
/// Returns `None` for empty, non-numeric, non-positive or out-of-range
/// input, which selects an ephemeral port.
pub fn parse_port(input: &str) -> Option<u16> {
    input
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|p| *p > 0)
        .and_then(|p| u16::try_from(p).ok())
}

/// Pick the bind address and port
///
/// # Arguments
/// * `local_only` - Bind to loopback instead of the first network interface
/// * `requested_port` - Explicit port, or `None` to ask the OS for one
pub async fn resolve(local_only: bool, requested_port: Option<u16>) -> Result<BindTarget> {
    let (ip, host) = if local_only {
        (IpAddr::V4(Ipv4Addr::LOCALHOST), LOCALHOST.to_string())
    } else {
        let ip = first_network_ipv4().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        (ip, ip.to_string())
    };

    let port = match requested_port {
        Some(port) => port,
        None => probe_ephemeral_port(ip).await?,
    };

    Ok(BindTarget { ip, host, port })
}

/// First non-loopback IPv4 interface address, if any
fn first_network_ipv4() -> Option<IpAddr> {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            tracing::error!("Failed to enumerate network interfaces: {}", e);
            return None;
        }
    };

    let ip = interfaces
        .iter()
        .filter(|iface| !iface.is_loopback())
        .map(|iface| iface.ip())
        .find(IpAddr::is_ipv4);

    if let Some(ip) = ip {
        tracing::debug!("Local IP: {}", ip);
    }
    ip
}

/// Ask the OS for a free port by binding port 0 and releasing it
///
/// Another process may grab the port before the real bind; that window is
/// accepted.
async fn probe_ephemeral_port(ip: IpAddr) -> Result<u16> {
    let probe = TcpListener::bind(SocketAddr::new(ip, 0))
        .await
        .map_err(ServerError::PortProbe)?;
    let port = probe.local_addr().map_err(ServerError::PortProbe)?.port();
    drop(probe);
    Ok(port)
}
