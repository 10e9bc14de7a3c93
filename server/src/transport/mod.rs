//! Socket abstraction consumed by the dispatcher.
//!
//! The dispatcher never touches sockets directly. It drives a [`Transport`],
//! which hands back one [`NetworkEvent`] per [`Transport::poll_event`] call
//! and never blocks while doing so.
//!
//! # Implementations
//!
//! - [`TcpTransport`] (production): non-blocking TCP, one text line per data
//!   event, optional UDP socket for discovery broadcasts.
//! - [`MockTransport`] (testing): scripted events, records every call.
//!
//! # Lifecycle
//!
//! ```text
//! init() -> create_host(topology, port) -> connect(host, addr, port)
//!                                      \-> poll_event() ... poll_event()
//!                                      \-> disconnect(host, connection)
//! ```

pub mod mock;
pub mod tcp;

pub use mock::MockTransport;
pub use tcp::TcpTransport;

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

pub type HostId = u32;
pub type ConnectionId = u32;
pub type ChannelId = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosType {
    Reliable,
    Unreliable,
}

/// Ordered list of channels a host offers; a channel's id is its index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    channels: Vec<QosType>,
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&mut self, qos: QosType) -> ChannelId {
        self.channels.push(qos);
        (self.channels.len() - 1) as ChannelId
    }

    pub fn channels(&self) -> &[QosType] {
        &self.channels
    }

    pub fn first_reliable(&self) -> Option<ChannelId> {
        self.channels
            .iter()
            .position(|qos| *qos == QosType::Reliable)
            .map(|index| index as ChannelId)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTopology {
    pub config: ConnectionConfig,
    pub max_connections: usize,
}

impl HostTopology {
    pub fn new(config: ConnectionConfig, max_connections: usize) -> Self {
        Self {
            config,
            max_connections,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is already initialized")]
    AlreadyInitialized,
    #[error("transport is not initialized")]
    NotInitialized,
    #[error("a host already exists on this transport")]
    HostExists,
    #[error("unknown host #{0}")]
    WrongHost(HostId),
    #[error("unknown connection #{0}")]
    WrongConnection(ConnectionId),
    #[error("unknown channel #{0}")]
    WrongChannel(ChannelId),
    #[error("host topology has no reliable channel")]
    NoReliableChannel,
    #[error("all {0} connection slots are in use")]
    NoResources(usize),
    #[error("invalid address {0}")]
    InvalidAddress(String),
    #[error("{kind:?}: {message}")]
    Io { kind: io::ErrorKind, message: String },
}

impl From<io::Error> for TransportError {
    fn from(error: io::Error) -> Self {
        TransportError::Io {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Data,
    Connect,
    Disconnect,
    BroadcastDiscovery,
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// A message arrived. Only `buffer[..byte_count]` is meaningful.
    Data {
        host: HostId,
        connection: ConnectionId,
        channel: ChannelId,
        buffer: Vec<u8>,
        byte_count: usize,
    },
    Connect {
        host: HostId,
        connection: ConnectionId,
    },
    /// The connection is gone. `error` is set when it ended abnormally.
    Disconnect {
        host: HostId,
        connection: ConnectionId,
        error: Option<TransportError>,
    },
    BroadcastDiscovery {
        host: HostId,
        from: SocketAddr,
    },
    Nothing,
}

impl NetworkEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            NetworkEvent::Data { .. } => EventKind::Data,
            NetworkEvent::Connect { .. } => EventKind::Connect,
            NetworkEvent::Disconnect { .. } => EventKind::Disconnect,
            NetworkEvent::BroadcastDiscovery { .. } => EventKind::BroadcastDiscovery,
            NetworkEvent::Nothing => EventKind::Nothing,
        }
    }
}

/// Connection-oriented, message-framed socket layer.
pub trait Transport {
    /// One-time setup. Calling it twice fails with
    /// [`TransportError::AlreadyInitialized`].
    fn init(&mut self) -> Result<(), TransportError>;

    /// Binds a listening host on `port` with the given channels and capacity.
    fn create_host(&mut self, topology: &HostTopology, port: u16)
        -> Result<HostId, TransportError>;

    /// The address a host actually bound, useful when `port` was 0.
    fn local_addr(&self, host: HostId) -> Option<SocketAddr>;

    /// Opens an outbound connection from `host`.
    fn connect(
        &mut self,
        host: HostId,
        address: &str,
        port: u16,
    ) -> Result<ConnectionId, TransportError>;

    /// Returns the next pending event, or [`NetworkEvent::Nothing`]. Never blocks.
    fn poll_event(&mut self) -> NetworkEvent;

    fn send(
        &mut self,
        host: HostId,
        connection: ConnectionId,
        channel: ChannelId,
        data: &[u8],
    ) -> Result<(), TransportError>;

    fn disconnect(&mut self, host: HostId, connection: ConnectionId)
        -> Result<(), TransportError>;

    fn peer_addr(&self, connection: ConnectionId) -> Option<SocketAddr>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config_channels() {
        let mut config = ConnectionConfig::new();
        assert_eq!(config.first_reliable(), None);

        let unreliable = config.add_channel(QosType::Unreliable);
        let reliable = config.add_channel(QosType::Reliable);

        assert_eq!(unreliable, 0);
        assert_eq!(reliable, 1);
        assert_eq!(config.first_reliable(), Some(1));
        assert_eq!(config.channels().len(), 2);
    }

    #[test]
    fn test_event_kind() {
        assert_eq!(NetworkEvent::Nothing.kind(), EventKind::Nothing);
        assert_eq!(
            NetworkEvent::Connect {
                host: 0,
                connection: 1
            }
            .kind(),
            EventKind::Connect
        );
        assert_eq!(
            NetworkEvent::Disconnect {
                host: 0,
                connection: 1,
                error: Some(TransportError::WrongConnection(1)),
            }
            .kind(),
            EventKind::Disconnect
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let error: TransportError =
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into();
        match error {
            TransportError::Io { kind, message } => {
                assert_eq!(kind, io::ErrorKind::ConnectionRefused);
                assert_eq!(message, "refused");
            }
            _ => panic!("Unexpected error variant"),
        }
    }
}
