//! App server port and bind address resolution.

use crate::error::ConfigError;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::ops::Range;

/// Ports scanned when neither `--port` nor `PORT` is given.
pub const DEFAULT_PORT_RANGE: Range<u16> = 3000..3100;

/// The `PORT` and `HOST` variables, captured once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevEnvironment {
    pub port: Option<String>,
    pub host: Option<String>,
}

impl DevEnvironment {
    pub fn from_process() -> Self {
        Self {
            port: non_empty_var("PORT"),
            host: non_empty_var("HOST"),
        }
    }

    /// Parsed `PORT`, if set.
    pub fn port(&self) -> Result<Option<u16>, ConfigError> {
        match self.port.as_deref() {
            None => Ok(None),
            Some(raw) => match raw.trim().parse::<u16>() {
                Ok(port) if port != 0 => Ok(Some(port)),
                _ => Err(ConfigError::InvalidValue {
                    field: "PORT".to_string(),
                    value: raw.to_string(),
                    hint: "PORT must be a number between 1 and 65535".to_string(),
                }),
            },
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Answers whether a TCP port can be bound right now.
pub trait PortAllocator: Send + Sync {
    fn is_free(&self, port: u16) -> bool;
}

/// Probes ports by binding them on all interfaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpPortAllocator;

impl PortAllocator for TcpPortAllocator {
    fn is_free(&self, port: u16) -> bool {
        TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).is_ok()
    }
}

/// Pick the app server port.
///
/// Order: `explicit`, then `PORT`, then the first free port in
/// [`DEFAULT_PORT_RANGE`]. A busy preferred port falls back to the range
/// with a warning.
pub fn resolve_port(
    explicit: Option<u16>,
    env: &DevEnvironment,
    allocator: &dyn PortAllocator,
) -> Result<u16, ConfigError> {
    let preferred = match explicit {
        Some(port) => Some(port),
        None => env.port()?,
    };

    if let Some(port) = preferred {
        if allocator.is_free(port) {
            return Ok(port);
        }
        crate::ui::warning(&format!(
            "Port {} is busy, looking for a free port in {}-{}",
            port,
            DEFAULT_PORT_RANGE.start,
            DEFAULT_PORT_RANGE.end - 1
        ));
    }

    DEFAULT_PORT_RANGE
        .clone()
        .find(|port| Some(*port) != preferred && allocator.is_free(*port))
        .ok_or_else(|| ConfigError::NoFreePort {
            tried: match preferred {
                Some(port) => format!(
                    "{} and {}-{}",
                    port,
                    DEFAULT_PORT_RANGE.start,
                    DEFAULT_PORT_RANGE.end - 1
                ),
                None => format!("{}-{}", DEFAULT_PORT_RANGE.start, DEFAULT_PORT_RANGE.end - 1),
            },
        })
}

/// What the ready message shows once the app server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyInfo {
    pub port: u16,
    /// `HOST`, or the first LAN IPv4 address
    pub address: Option<String>,
}

impl ReadyInfo {
    pub fn resolve(host: Option<&str>, port: u16) -> Self {
        let address = match host {
            Some(host) => Some(host.to_string()),
            None => lan_ipv4().map(|ip| ip.to_string()),
        };
        Self { port, address }
    }

    pub fn local_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    pub fn message(&self) -> String {
        match &self.address {
            Some(address) => format!(
                "App server started at {} (http://{}:{})",
                self.local_url(),
                address,
                self.port
            ),
            None => format!("App server started at {}", self.local_url()),
        }
    }
}

/// First non-loopback IPv4 address among the host's interfaces.
fn lan_ipv4() -> Option<IpAddr> {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to list network interfaces");
            return None;
        }
    };
    first_external_ipv4(interfaces.iter().map(if_addrs::Interface::ip))
}

fn first_external_ipv4(addresses: impl IntoIterator<Item = IpAddr>) -> Option<IpAddr> {
    addresses.into_iter().find(|ip| match ip {
        IpAddr::V4(v4) => !v4.is_loopback() && !v4.is_unspecified(),
        IpAddr::V6(_) => false,
    })
}
