//! Process-wide table of hosted servers, keyed by port.
//!
//! The registry remembers the last port it handed out so that a request
//! without an explicit port lands on the same server as the previous one.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;

use handyd_config::AppConfig;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::hosted::{HostError, HostedServer, MountTable};

/// Errors from resolving or creating a hosted server.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Bind(#[from] HostError),

    #[error("no port given, none used before, and no free port in {start}..={end}")]
    PortExhausted { start: u16, end: u16 },

    #[error("daemon is shutting down")]
    ShuttingDown,
}

/// All hosted servers of the daemon.
pub struct ServerRegistry {
    bind_addr: IpAddr,
    port_range: RangeInclusive<u16>,
    servers: BTreeMap<u16, HostedServer>,
    last_port: Option<u16>,
    closed: bool,
}

impl ServerRegistry {
    /// Create an empty registry whose servers bind on `bind_addr`.
    ///
    /// `port_range` is probed for a free port when a request names none
    /// and no port has been used yet.
    pub fn new(bind_addr: IpAddr, port_range: RangeInclusive<u16>) -> Self {
        Self {
            bind_addr,
            port_range,
            servers: BTreeMap::new(),
            last_port: None,
            closed: false,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.bind_addr(), config.port_range())
    }

    /// The port used by the most recent successful [`get_or_create`](Self::get_or_create).
    pub fn last_port(&self) -> Option<u16> {
        self.last_port
    }

    /// Resolve an optional port to the last used one.
    pub fn resolve_port(&self, port: Option<u16>) -> Option<u16> {
        port.or(self.last_port)
    }

    /// Look up the server for `port` (defaulting to the last used port).
    pub fn find(&self, port: Option<u16>) -> Option<&HostedServer> {
        self.resolve_port(port)
            .and_then(|port| self.servers.get(&port))
    }

    pub fn find_mut(&mut self, port: Option<u16>) -> Option<&mut HostedServer> {
        let port = self.resolve_port(port)?;
        self.servers.get_mut(&port)
    }

    /// Return the server for `port`, creating and starting it if needed.
    ///
    /// An unspecified port resolves to the last used port, or to the first
    /// free port in the configured range. A server is registered only once
    /// its listener is bound.
    pub fn get_or_create(&mut self, port: Option<u16>) -> Result<&mut HostedServer, RegistryError> {
        if self.closed {
            return Err(RegistryError::ShuttingDown);
        }
        let port = match self.resolve_port(port) {
            Some(port) => port,
            None => self.probe_free_port()?,
        };

        let server = match self.servers.entry(port) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let mut server = HostedServer::new(SocketAddr::new(self.bind_addr, port));
                server.ensure_listening()?;
                info!(port, "Registered file server");
                entry.insert(server)
            }
        };
        self.last_port = Some(port);
        Ok(server)
    }

    fn probe_free_port(&self) -> Result<u16, RegistryError> {
        let port = self
            .port_range
            .clone()
            .find(|port| !self.servers.contains_key(port) && port_is_available(self.bind_addr, *port))
            .ok_or(RegistryError::PortExhausted {
                start: *self.port_range.start(),
                end: *self.port_range.end(),
            })?;
        debug!(port, "Picked free port");
        Ok(port)
    }

    /// Copy every server's mount table, ordered by port.
    pub fn snapshot(&self) -> Listing {
        Listing(
            self.servers
                .iter()
                .map(|(port, server)| (*port, server.mounts()))
                .collect(),
        )
    }

    /// Stop every server, returning their accept-loop tasks to drain.
    ///
    /// The registry stays closed afterwards: [`get_or_create`](Self::get_or_create)
    /// refuses to start anything new.
    pub fn stop_all(&mut self) -> Vec<JoinHandle<()>> {
        self.closed = true;
        self.servers
            .values_mut()
            .filter_map(HostedServer::stop)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

fn port_is_available(host: IpAddr, port: u16) -> bool {
    std::net::TcpListener::bind((host, port)).is_ok()
}

/// Point-in-time copy of all mount tables, printable as the `list` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing(pub Vec<(u16, MountTable)>);

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return writeln!(f, "No directories are being served");
        }
        for (port, mounts) in &self.0 {
            if mounts.is_empty() {
                writeln!(f, "{port}: (no mounts)")?;
            }
            for (alias, root) in mounts {
                writeln!(f, "{port}: {alias} -> {}", root.display())?;
            }
        }
        Ok(())
    }
}
