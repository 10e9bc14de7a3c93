//! Connection-event dispatch loop
//!
//! The [`Dispatcher`] owns everything the master server knows: the transport
//! host, the self-connection, the shared secret (inside its [`AuthGate`]) and
//! the [`ServerRegistry`]. A driver calls [`Dispatcher::tick`] on a fixed
//! cadence; each tick takes exactly one event from the transport and handles
//! it to completion before returning.
//!
//! Nothing that happens inside a tick is fatal. Malformed messages are
//! dropped, unknown commands ignored, failed disconnects logged. Only
//! [`Dispatcher::initialize`] can fail.

use crate::auth::{AuthGate, AuthOutcome};
use crate::config::ServerConfig;
use crate::credentials::{CredentialError, CredentialStore};
use crate::logger::{LogLogger, Logger};
use crate::registry::ServerRegistry;
use crate::transport::{
    ChannelId, ConnectionConfig, ConnectionId, EventKind, HostId, HostTopology, NetworkEvent,
    QosType, Transport, TransportError,
};
use log::Level;
use shared::{decode_frame, ActionCode};
use std::collections::HashMap;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("failed to load shared secret: {0}")]
    Credentials(#[from] CredentialError),
    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

/// A connection the dispatcher has seen a connect event for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConnection {
    pub connection: ConnectionId,
    pub is_self: bool,
    pub address: Option<SocketAddr>,
}

pub struct Dispatcher<T: Transport, L: Logger = LogLogger> {
    transport: T,
    logger: L,
    auth: AuthGate,
    registry: ServerRegistry,
    host: HostId,
    channel: ChannelId,
    self_connection: Option<ConnectionId>,
    peers: HashMap<ConnectionId, PeerConnection>,
}

impl<T: Transport, L: Logger> Dispatcher<T, L> {
    /// Loads the secret, opens the host and dials the self-connection.
    ///
    /// Credential and host setup failures are fatal. A failed self-connection
    /// is only logged; the dispatcher then runs without one.
    pub fn initialize(
        mut transport: T,
        logger: L,
        config: &ServerConfig,
        store: &mut dyn CredentialStore,
    ) -> Result<Self, DispatcherError> {
        let credential = store.load()?;
        if credential.fresh {
            logger.log(Level::Info, "Generated a new shared secret.");
        } else {
            logger.log(Level::Info, "Loaded the existing shared secret.");
        }

        transport.init()?;

        let mut connection_config = ConnectionConfig::new();
        let channel = connection_config.add_channel(QosType::Reliable);
        let topology = HostTopology::new(connection_config, config.max_connections);

        let host = transport.create_host(&topology, config.port)?;
        let port = transport
            .local_addr(host)
            .map(|addr| addr.port())
            .unwrap_or(config.port);
        logger.log(
            Level::Info,
            &format!("Socket open on port {}: ID #{}", port, host),
        );

        let self_connection = match transport.connect(host, &config.self_address, port) {
            Ok(connection) => {
                logger.log(
                    Level::Info,
                    &format!(
                        "Connected to server ({}:{}): Connection ID #{}",
                        config.self_address, port, connection
                    ),
                );
                Some(connection)
            }
            Err(e) => {
                logger.log(Level::Error, &format!("Failed to connect because: {}", e));
                None
            }
        };

        Ok(Self {
            transport,
            logger,
            auth: AuthGate::new(credential.secret, config.max_failed_attempts),
            registry: ServerRegistry::new(),
            host,
            channel,
            self_connection,
            peers: HashMap::new(),
        })
    }

    /// Handles at most one transport event and reports what it was
    pub fn tick(&mut self) -> EventKind {
        let event = self.transport.poll_event();
        let kind = event.kind();

        match event {
            NetworkEvent::Data {
                connection,
                buffer,
                byte_count,
                ..
            } => self.handle_data(connection, &buffer, byte_count),
            NetworkEvent::Connect { connection, .. } => self.handle_connect(connection),
            NetworkEvent::Disconnect {
                connection, error, ..
            } => self.handle_disconnect(connection, error),
            NetworkEvent::BroadcastDiscovery { from, .. } => {
                self.logger.log(
                    Level::Info,
                    &format!("Broadcast discovery event received from {}.", from),
                );
            }
            NetworkEvent::Nothing => {}
        }

        kind
    }

    fn handle_data(&mut self, connection: ConnectionId, buffer: &[u8], byte_count: usize) {
        let command = match decode_frame(buffer, byte_count) {
            Ok(command) => command,
            Err(e) => {
                self.logger.log(
                    Level::Warn,
                    &format!(
                        "Dropping malformed message from connection #{}: {}",
                        connection, e
                    ),
                );
                return;
            }
        };

        // The payload may be the secret, so only its size is logged
        self.logger.log(
            Level::Debug,
            &format!(
                "Message received on connection #{}: code {} ({} bytes)",
                connection,
                command.code,
                command.payload.len()
            ),
        );

        match command.action() {
            Some(ActionCode::Debug) => {
                self.logger.log(
                    Level::Info,
                    &format!("Debugging socket: {}", command.payload),
                );
            }
            Some(ActionCode::Auth) => self.handle_auth(&command.payload, connection),
            None => {}
        }
    }

    fn handle_auth(&mut self, message: &str, connection: ConnectionId) {
        match self.auth.authenticate(message, connection) {
            AuthOutcome::Authenticated => {
                self.logger.log(
                    Level::Info,
                    &format!("Server on connection #{} has been authenticated.", connection),
                );
            }
            AuthOutcome::AlreadyAuthenticated => {
                self.logger.log(
                    Level::Debug,
                    &format!("Connection #{} is already authenticated.", connection),
                );
            }
            AuthOutcome::Retry { attempts_left } => {
                self.logger.log(
                    Level::Warn,
                    &format!(
                        "Server on connection #{} has failed authentication. ({} attempts left before added to blacklist)",
                        connection, attempts_left
                    ),
                );
            }
            AuthOutcome::Rejected => {
                self.logger.log(
                    Level::Warn,
                    &format!(
                        "Server on connection #{} has failed authentication. Disconnecting.",
                        connection
                    ),
                );
                self.disconnect_peer(connection);
            }
        }
    }

    fn handle_connect(&mut self, connection: ConnectionId) {
        let is_self = self.is_self(connection);
        if is_self {
            self.logger.log(Level::Info, "Self-connection approved.");
        } else {
            self.logger.log(
                Level::Info,
                &format!("Remote connection #{} incoming.", connection),
            );
        }

        self.peers.insert(
            connection,
            PeerConnection {
                connection,
                is_self,
                address: self.transport.peer_addr(connection),
            },
        );
    }

    fn handle_disconnect(&mut self, connection: ConnectionId, error: Option<TransportError>) {
        if self.is_self(connection) {
            let reason = match &error {
                Some(e) => e.to_string(),
                None => "closed by peer".to_string(),
            };
            self.logger.log(
                Level::Warn,
                &format!("Self-connection failed: {}", reason),
            );
            self.self_connection = None;
        } else {
            self.logger.log(
                Level::Info,
                &format!("Remote connection #{} closed.", connection),
            );
        }

        let address = self.untrack(connection).and_then(|peer| peer.address);
        if let Some(address) = address {
            let key = ServerRegistry::key_for(address);
            if self.registry.remove(&key).is_some() {
                self.logger.log(
                    Level::Info,
                    &format!("Removed server {} from the registry.", key),
                );
            }
        }
    }

    fn disconnect_peer(&mut self, connection: ConnectionId) {
        match self.transport.disconnect(self.host, connection) {
            Ok(()) => {
                self.untrack(connection);
            }
            Err(e) => {
                self.logger.log(
                    Level::Error,
                    &format!(
                        "Failed to disconnect remote connection #{} because: {}",
                        connection, e
                    ),
                );
            }
        }
    }

    fn untrack(&mut self, connection: ConnectionId) -> Option<PeerConnection> {
        self.auth.forget(connection);
        self.peers.remove(&connection)
    }

    fn is_self(&self, connection: ConnectionId) -> bool {
        self.self_connection == Some(connection)
    }

    /// Disconnects every known connection, the self-connection included
    pub fn shutdown(&mut self) {
        let mut connections: Vec<ConnectionId> = self.peers.keys().copied().collect();
        if let Some(own) = self.self_connection {
            if !connections.contains(&own) {
                connections.push(own);
            }
        }
        connections.sort_unstable();

        self.logger.log(
            Level::Info,
            &format!("Shutting down, closing {} connection(s).", connections.len()),
        );

        for connection in connections {
            if let Err(e) = self.transport.disconnect(self.host, connection) {
                self.logger.log(
                    Level::Warn,
                    &format!("Failed to close connection #{}: {}", connection, e),
                );
            }
            self.untrack(connection);
        }
        self.self_connection = None;
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ServerRegistry {
        &mut self.registry
    }

    pub fn is_authenticated(&self, connection: ConnectionId) -> bool {
        self.auth.is_authenticated(connection)
    }

    pub fn failed_attempts(&self, connection: ConnectionId) -> u32 {
        self.auth.failed_attempts(connection)
    }

    pub fn self_connection(&self) -> Option<ConnectionId> {
        self.self_connection
    }

    pub fn peer(&self, connection: ConnectionId) -> Option<&PeerConnection> {
        self.peers.get(&connection)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn host(&self) -> HostId {
        self.host
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
