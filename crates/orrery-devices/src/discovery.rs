/*!
 * Alpaca server discovery.
 *
 * A probe datagram is sent to every local IPv4 broadcast address, the
 * limited broadcast address, the Alpaca IPv6 multicast group and any
 * configured unicast targets. Each server answers with its REST port.
 */
use std::collections::HashSet;
use std::fmt::Debug;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use serde::Deserialize;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use orrery_core::config::DiscoveryConfig;
use orrery_core::utils::{lock, read_lock, write_lock};

use crate::error::Result;

/// Probe payload
pub const DISCOVERY_MESSAGE: &[u8] = b"alpacadiscovery1";

/// Alpaca IPv6 multicast group
pub const DISCOVERY_MULTICAST_V6: Ipv6Addr = Ipv6Addr::new(0xff12, 0, 0, 0, 0, 0, 0xa1, 0x9aca);

const REPLY_BUFFER_SIZE: usize = 255;

/// An Alpaca server that answered the probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiscoveredServer {
    /// Address the reply came from
    pub address: IpAddr,
    /// Alpaca REST port
    pub port: u16,
}

impl std::fmt::Display for DiscoveredServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", SocketAddr::new(self.address, self.port))
    }
}

/// Receives discovered servers
pub trait DiscoveryListener: Send + Sync {
    /// Called once per matching reply
    fn on_server_found(&self, server: &DiscoveredServer);
}

impl<F> DiscoveryListener for F
where
    F: Fn(&DiscoveredServer) + Send + Sync,
{
    fn on_server_found(&self, server: &DiscoveredServer) {
        self(server)
    }
}

#[derive(Deserialize)]
struct DiscoveryReply {
    #[serde(rename = "AlpacaPort")]
    alpaca_port: u16,
}

/// Extract the REST port from a discovery reply
pub fn parse_reply(payload: &[u8]) -> Option<u16> {
    serde_json::from_slice::<DiscoveryReply>(payload)
        .ok()
        .map(|reply| reply.alpaca_port)
}

/// Alpaca UDP discovery
pub struct AlpacaDiscovery {
    config: DiscoveryConfig,
    listeners: RwLock<Vec<Arc<dyn DiscoveryListener>>>,
    token: CancellationToken,
}

impl Debug for AlpacaDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlpacaDiscovery")
            .field("config", &self.config)
            .field("closed", &self.token.is_cancelled())
            .finish()
    }
}

impl AlpacaDiscovery {
    /// Create a discovery run
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            listeners: RwLock::new(Vec::new()),
            token: CancellationToken::new(),
        }
    }

    /// Add a listener
    pub fn register_listener(&self, listener: Arc<dyn DiscoveryListener>) {
        write_lock(&self.listeners).push(listener);
    }

    /// Remove a listener
    pub fn unregister_listener(&self, listener: &Arc<dyn DiscoveryListener>) {
        write_lock(&self.listeners).retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Stop a running [`run`](Self::run)
    pub fn close(&self) {
        self.token.cancel();
    }

    /// Whether [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Probe and report replies until closed
    ///
    /// Only binding the IPv4 socket can fail.
    pub async fn run(&self) -> Result<()> {
        let v4 = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        if self.config.broadcast {
            v4.set_broadcast(true)?;
        }

        let v6 = if self.config.ipv6 {
            match UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0)).await {
                Ok(socket) => Some(socket),
                Err(e) => {
                    warn!("IPv6 discovery unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        self.probe(&v4, v6.as_ref()).await;

        let mut buf4 = [0u8; REPLY_BUFFER_SIZE];
        let mut buf6 = [0u8; REPLY_BUFFER_SIZE];

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                received = v4.recv_from(&mut buf4) => match received {
                    Ok((len, from)) => self.handle_reply(&buf4[..len], from),
                    Err(e) => warn!("Discovery receive failed: {}", e),
                },
                received = recv_optional(v6.as_ref(), &mut buf6) => match received {
                    Ok((len, from)) => self.handle_reply(&buf6[..len], from),
                    Err(e) => warn!("IPv6 discovery receive failed: {}", e),
                },
            }
        }

        debug!("Alpaca discovery closed");
        Ok(())
    }

    async fn probe(&self, v4: &UdpSocket, v6: Option<&UdpSocket>) {
        let port = self.config.port;
        let mut destinations: Vec<SocketAddr> = Vec::new();

        if self.config.broadcast {
            for address in broadcast_addresses() {
                destinations.push(SocketAddr::new(IpAddr::V4(address), port));
            }
            destinations.push(SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), port));
        }

        for target in &self.config.targets {
            match resolve_target(target, port).await {
                Some(address) => destinations.push(address),
                None => warn!(target = %target, "Cannot resolve discovery target"),
            }
        }

        if v6.is_some() {
            destinations.push(SocketAddr::new(IpAddr::V6(DISCOVERY_MULTICAST_V6), port));
        }

        for destination in destinations {
            let socket = match (destination, v6) {
                (SocketAddr::V6(_), Some(v6)) => v6,
                (SocketAddr::V6(_), None) => {
                    warn!(%destination, "No IPv6 socket for discovery target");
                    continue;
                }
                (SocketAddr::V4(_), _) => v4,
            };

            match socket.send_to(DISCOVERY_MESSAGE, destination).await {
                Ok(_) => trace!(%destination, "Discovery probe sent"),
                Err(e) => warn!(%destination, "Discovery probe failed: {}", e),
            }
        }
    }

    fn handle_reply(&self, payload: &[u8], from: SocketAddr) {
        let Some(port) = parse_reply(payload) else {
            debug!(%from, "Ignoring discovery reply");
            return;
        };

        let server = DiscoveredServer {
            address: from.ip(),
            port,
        };
        info!(server = %server, "Alpaca server discovered");

        let listeners = read_lock(&self.listeners).clone();
        for listener in listeners {
            listener.on_server_found(&server);
        }
    }
}

/// Probe for `timeout` and collect every distinct server that answered
pub async fn discover(config: DiscoveryConfig, timeout: Duration) -> Result<Vec<DiscoveredServer>> {
    let discovery = AlpacaDiscovery::new(config);
    let found = Arc::new(Mutex::new(Vec::new()));
    let sink = found.clone();
    discovery.register_listener(Arc::new(move |server: &DiscoveredServer| {
        lock(&sink).push(*server);
    }));

    tokio::select! {
        result = discovery.run() => result?,
        _ = tokio::time::sleep(timeout) => discovery.close(),
    }

    let mut seen = HashSet::new();
    let servers = lock(&found)
        .iter()
        .copied()
        .filter(|server| seen.insert(*server))
        .collect();
    Ok(servers)
}

async fn recv_optional(
    socket: Option<&UdpSocket>,
    buf: &mut [u8],
) -> std::io::Result<(usize, SocketAddr)> {
    match socket {
        Some(socket) => socket.recv_from(buf).await,
        None => std::future::pending().await,
    }
}

fn broadcast_addresses() -> Vec<Ipv4Addr> {
    let interfaces = match NetworkInterface::show() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!("Cannot list network interfaces: {}", e);
            return Vec::new();
        }
    };

    let mut addresses = Vec::new();
    for interface in interfaces {
        for addr in interface.addr {
            if let Addr::V4(v4) = addr {
                if let Some(broadcast) = v4.broadcast {
                    if !v4.ip.is_loopback() && !addresses.contains(&broadcast) {
                        addresses.push(broadcast);
                    }
                }
            }
        }
    }
    addresses
}

async fn resolve_target(target: &str, port: u16) -> Option<SocketAddr> {
    if let Ok(address) = target.parse::<SocketAddr>() {
        return Some(address);
    }
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Some(SocketAddr::new(ip, port));
    }

    let host = if target.contains(':') {
        target.to_string()
    } else {
        format!("{}:{}", target, port)
    };
    tokio::net::lookup_host(host).await.ok()?.next()
}
