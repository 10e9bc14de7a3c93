//! Non-blocking TCP transport
//!
//! Every socket is switched to non-blocking mode, so `poll_event` only ever
//! looks at what the OS already has buffered. Each call surfaces at most one
//! event, checked in this order:
//!
//! 1. events queued by earlier calls (outbound connects)
//! 2. one pending inbound connection
//! 3. one complete line from a connected peer, peers visited round-robin
//! 4. one datagram on the discovery socket
//!
//! Framing is line based: a data event carries everything up to and including
//! `\n`, or the first [`MAX_MESSAGE_SIZE`] bytes if no newline shows up first.
//! Bytes left over once the socket has nothing more to read (an unterminated
//! message, or the tail before the peer closed) are delivered as one data
//! event of their own. A closing peer's last message always arrives before
//! its disconnect event.

use super::{
    ChannelId, ConnectionId, HostId, HostTopology, NetworkEvent, Transport, TransportError,
};
use log::{debug, info, warn};
use shared::MAX_MESSAGE_SIZE;
use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

const HOST_ID: HostId = 0;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

struct Host {
    id: HostId,
    listener: TcpListener,
    discovery: Option<UdpSocket>,
    max_connections: usize,
    channel: ChannelId,
}

enum PeerPoll {
    Idle,
    Line(Vec<u8>),
    Closed(Option<TransportError>),
}

struct Peer {
    stream: TcpStream,
    addr: SocketAddr,
    inbox: Vec<u8>,
    eof: bool,
}

impl Peer {
    fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        Self {
            stream,
            addr,
            inbox: Vec::new(),
            eof: false,
        }
    }

    fn poll(&mut self) -> PeerPoll {
        if let Some(line) = self.take_line() {
            return PeerPoll::Line(line);
        }
        if self.eof {
            return self.flush_or(PeerPoll::Closed(None));
        }

        let mut chunk = [0u8; MAX_MESSAGE_SIZE];
        match self.stream.read(&mut chunk) {
            Ok(0) => {
                self.eof = true;
                self.flush_or(PeerPoll::Closed(None))
            }
            Ok(len) => {
                self.inbox.extend_from_slice(&chunk[..len]);
                match self.take_line() {
                    Some(line) => PeerPoll::Line(line),
                    None => self.flush_or(PeerPoll::Idle),
                }
            }
            Err(e) if is_transient(&e) => self.flush_or(PeerPoll::Idle),
            Err(e) => PeerPoll::Closed(Some(e.into())),
        }
    }

    /// Hands out whatever is buffered as one message, or `otherwise` if empty
    fn flush_or(&mut self, otherwise: PeerPoll) -> PeerPoll {
        if self.inbox.is_empty() {
            return otherwise;
        }
        let end = self.inbox.len().min(MAX_MESSAGE_SIZE);
        PeerPoll::Line(self.inbox.drain(..end).collect())
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = match self.inbox.iter().position(|&b| b == b'\n') {
            Some(pos) => (pos + 1).min(MAX_MESSAGE_SIZE),
            None if self.inbox.len() >= MAX_MESSAGE_SIZE => MAX_MESSAGE_SIZE,
            None => return None,
        };
        Some(self.inbox.drain(..end).collect())
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

pub struct TcpTransport {
    initialized: bool,
    host: Option<Host>,
    connections: BTreeMap<ConnectionId, Peer>,
    pending: VecDeque<NetworkEvent>,
    next_connection: ConnectionId,
    poll_cursor: ConnectionId,
    discovery_port: Option<u16>,
    connect_timeout: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            initialized: false,
            host: None,
            connections: BTreeMap::new(),
            pending: VecDeque::new(),
            next_connection: 1,
            poll_cursor: 0,
            discovery_port: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Also listen for discovery datagrams on `port` once the host exists
    pub fn with_discovery_port(mut self, port: u16) -> Self {
        self.discovery_port = Some(port);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Number of open connections, inbound and outbound
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn host(&self, id: HostId) -> Result<&Host, TransportError> {
        match &self.host {
            Some(host) if host.id == id => Ok(host),
            _ => Err(TransportError::WrongHost(id)),
        }
    }

    fn allocate_connection_id(&mut self) -> ConnectionId {
        let id = self.next_connection;
        self.next_connection = self.next_connection.wrapping_add(1).max(1);
        id
    }

    fn accept_one(&mut self) -> Option<NetworkEvent> {
        let host = self.host.as_ref()?;
        let (host_id, max_connections) = (host.id, host.max_connections);

        let (stream, addr) = match host.listener.accept() {
            Ok(pair) => pair,
            Err(e) if is_transient(&e) => return None,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                return None;
            }
        };

        if self.connections.len() >= max_connections {
            warn!(
                "Refusing connection from {}: all {} slots in use",
                addr, max_connections
            );
            let _ = stream.shutdown(Shutdown::Both);
            return None;
        }

        if let Err(e) = stream.set_nonblocking(true) {
            warn!("Failed to configure connection from {}: {}", addr, e);
            return None;
        }
        let _ = stream.set_nodelay(true);

        let connection = self.allocate_connection_id();
        self.connections.insert(connection, Peer::new(stream, addr));
        debug!("Accepted connection #{} from {}", connection, addr);

        Some(NetworkEvent::Connect {
            host: host_id,
            connection,
        })
    }

    fn poll_connections(&mut self, host: HostId, channel: ChannelId) -> Option<NetworkEvent> {
        let ids: Vec<ConnectionId> = self
            .connections
            .range(self.poll_cursor..)
            .chain(self.connections.range(..self.poll_cursor))
            .map(|(id, _)| *id)
            .collect();

        for connection in ids {
            let outcome = match self.connections.get_mut(&connection) {
                Some(peer) => peer.poll(),
                None => continue,
            };

            match outcome {
                PeerPoll::Idle => continue,
                PeerPoll::Line(line) => {
                    self.poll_cursor = connection.wrapping_add(1);

                    let byte_count = line.len();
                    let mut buffer = vec![0u8; MAX_MESSAGE_SIZE];
                    buffer[..byte_count].copy_from_slice(&line);

                    return Some(NetworkEvent::Data {
                        host,
                        connection,
                        channel,
                        buffer,
                        byte_count,
                    });
                }
                PeerPoll::Closed(error) => {
                    self.connections.remove(&connection);
                    debug!("Connection #{} closed", connection);
                    return Some(NetworkEvent::Disconnect {
                        host,
                        connection,
                        error,
                    });
                }
            }
        }

        None
    }

    fn poll_discovery(&mut self) -> Option<NetworkEvent> {
        let host = self.host.as_ref()?;
        let socket = host.discovery.as_ref()?;

        let mut buffer = [0u8; MAX_MESSAGE_SIZE];
        match socket.recv_from(&mut buffer) {
            Ok((_, from)) => Some(NetworkEvent::BroadcastDiscovery {
                host: host.id,
                from,
            }),
            Err(e) if is_transient(&e) => None,
            Err(e) => {
                debug!("Discovery socket error: {}", e);
                None
            }
        }
    }
}

impl Transport for TcpTransport {
    fn init(&mut self) -> Result<(), TransportError> {
        if self.initialized {
            return Err(TransportError::AlreadyInitialized);
        }
        self.initialized = true;
        Ok(())
    }

    fn create_host(
        &mut self,
        topology: &HostTopology,
        port: u16,
    ) -> Result<HostId, TransportError> {
        if !self.initialized {
            return Err(TransportError::NotInitialized);
        }
        if self.host.is_some() {
            return Err(TransportError::HostExists);
        }

        let channel = topology
            .config
            .first_reliable()
            .ok_or(TransportError::NoReliableChannel)?;

        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        info!("Listening for connections on {}", listener.local_addr()?);

        let discovery = match self.discovery_port {
            Some(discovery_port) => {
                let socket = UdpSocket::bind(("0.0.0.0", discovery_port))?;
                socket.set_nonblocking(true)?;
                info!("Listening for discovery broadcasts on {}", socket.local_addr()?);
                Some(socket)
            }
            None => None,
        };

        self.host = Some(Host {
            id: HOST_ID,
            listener,
            discovery,
            max_connections: topology.max_connections,
            channel,
        });

        Ok(HOST_ID)
    }

    fn local_addr(&self, host: HostId) -> Option<SocketAddr> {
        self.host(host).ok()?.listener.local_addr().ok()
    }

    fn connect(
        &mut self,
        host: HostId,
        address: &str,
        port: u16,
    ) -> Result<ConnectionId, TransportError> {
        let max_connections = self.host(host)?.max_connections;
        if self.connections.len() >= max_connections {
            return Err(TransportError::NoResources(max_connections));
        }

        let target = format!("{}:{}", address, port);
        let addr = (address, port)
            .to_socket_addrs()
            .map_err(|_| TransportError::InvalidAddress(target.clone()))?
            .next()
            .ok_or(TransportError::InvalidAddress(target))?;

        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)?;
        stream.set_nonblocking(true)?;
        let _ = stream.set_nodelay(true);

        let connection = self.allocate_connection_id();
        self.connections.insert(connection, Peer::new(stream, addr));
        self.pending
            .push_back(NetworkEvent::Connect { host, connection });

        Ok(connection)
    }

    fn poll_event(&mut self) -> NetworkEvent {
        if let Some(event) = self.pending.pop_front() {
            return event;
        }

        let (host, channel) = match &self.host {
            Some(host) => (host.id, host.channel),
            None => return NetworkEvent::Nothing,
        };

        if let Some(event) = self.accept_one() {
            return event;
        }
        if let Some(event) = self.poll_connections(host, channel) {
            return event;
        }
        if let Some(event) = self.poll_discovery() {
            return event;
        }

        NetworkEvent::Nothing
    }

    fn send(
        &mut self,
        host: HostId,
        connection: ConnectionId,
        channel: ChannelId,
        data: &[u8],
    ) -> Result<(), TransportError> {
        if self.host(host)?.channel != channel {
            return Err(TransportError::WrongChannel(channel));
        }

        let peer = self
            .connections
            .get_mut(&connection)
            .ok_or(TransportError::WrongConnection(connection))?;
        peer.stream.write_all(data)?;
        Ok(())
    }

    fn disconnect(
        &mut self,
        host: HostId,
        connection: ConnectionId,
    ) -> Result<(), TransportError> {
        self.host(host)?;

        let peer = self
            .connections
            .remove(&connection)
            .ok_or(TransportError::WrongConnection(connection))?;

        match peer.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn peer_addr(&self, connection: ConnectionId) -> Option<SocketAddr> {
        self.connections.get(&connection).map(|peer| peer.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ConnectionConfig, EventKind, QosType};
    use std::thread;
    use std::time::Instant;

    fn topology(max_connections: usize) -> HostTopology {
        let mut config = ConnectionConfig::new();
        config.add_channel(QosType::Reliable);
        HostTopology::new(config, max_connections)
    }

    fn started_transport(max_connections: usize) -> (TcpTransport, HostId, SocketAddr) {
        let mut transport = TcpTransport::new();
        transport.init().unwrap();
        let host = transport.create_host(&topology(max_connections), 0).unwrap();
        let port = transport.local_addr(host).unwrap().port();
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        (transport, host, addr)
    }

    /// Polls until an event matching `predicate` shows up, skipping others
    fn poll_until<F>(transport: &mut TcpTransport, predicate: F) -> Option<NetworkEvent>
    where
        F: Fn(&NetworkEvent) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            let event = transport.poll_event();
            if predicate(&event) {
                return Some(event);
            }
            if event.kind() == EventKind::Nothing {
                thread::sleep(Duration::from_millis(2));
            }
        }
        None
    }

    fn payload(event: &NetworkEvent) -> String {
        match event {
            NetworkEvent::Data {
                buffer, byte_count, ..
            } => String::from_utf8_lossy(&buffer[..*byte_count]).into_owned(),
            _ => panic!("Expected a data event, got {:?}", event),
        }
    }

    #[test]
    fn test_init_twice_fails() {
        let mut transport = TcpTransport::new();
        assert!(transport.init().is_ok());
        assert_eq!(transport.init(), Err(TransportError::AlreadyInitialized));
    }

    #[test]
    fn test_create_host_requires_init() {
        let mut transport = TcpTransport::new();
        assert_eq!(
            transport.create_host(&topology(10), 0),
            Err(TransportError::NotInitialized)
        );
    }

    #[test]
    fn test_create_host_requires_reliable_channel() {
        let mut transport = TcpTransport::new();
        transport.init().unwrap();

        let mut config = ConnectionConfig::new();
        config.add_channel(QosType::Unreliable);
        let result = transport.create_host(&HostTopology::new(config, 10), 0);
        assert_eq!(result, Err(TransportError::NoReliableChannel));
    }

    #[test]
    fn test_poll_without_host_is_nothing() {
        let mut transport = TcpTransport::new();
        assert_eq!(transport.poll_event(), NetworkEvent::Nothing);
    }

    #[test]
    fn test_self_connection_loopback() {
        let (mut transport, host, addr) = started_transport(10);

        let outbound = transport.connect(host, "127.0.0.1", addr.port()).unwrap();
        assert_eq!(
            transport.poll_event(),
            NetworkEvent::Connect {
                host,
                connection: outbound
            }
        );

        let inbound = match poll_until(&mut transport, |e| e.kind() == EventKind::Connect) {
            Some(NetworkEvent::Connect { connection, .. }) => connection,
            other => panic!("Expected inbound connect, got {:?}", other),
        };
        assert_ne!(inbound, outbound);
        assert_eq!(transport.connection_count(), 2);

        transport.send(host, outbound, 0, b"0 ping\r\n").unwrap();
        let event = poll_until(&mut transport, |e| e.kind() == EventKind::Data).unwrap();
        match &event {
            NetworkEvent::Data { connection, .. } => assert_eq!(*connection, inbound),
            _ => unreachable!(),
        }
        assert_eq!(payload(&event), "0 ping\r\n");
    }

    #[test]
    fn test_lines_are_framed_in_order() {
        let (mut transport, _host, addr) = started_transport(10);

        let mut client = TcpStream::connect(addr).unwrap();
        let connect = poll_until(&mut transport, |e| e.kind() == EventKind::Connect).unwrap();
        let connection = match connect {
            NetworkEvent::Connect { connection, .. } => connection,
            _ => unreachable!(),
        };
        assert_eq!(
            transport.peer_addr(connection),
            Some(client.local_addr().unwrap())
        );

        client.write_all(b"1 first\r\n0 second\n").unwrap();

        let first = poll_until(&mut transport, |e| e.kind() == EventKind::Data).unwrap();
        let second = poll_until(&mut transport, |e| e.kind() == EventKind::Data).unwrap();
        assert_eq!(payload(&first), "1 first\r\n");
        assert_eq!(payload(&second), "0 second\n");

        match &first {
            NetworkEvent::Data { buffer, .. } => assert_eq!(buffer.len(), MAX_MESSAGE_SIZE),
            _ => unreachable!(),
        }

        drop(client);
        let closed = poll_until(&mut transport, |e| e.kind() == EventKind::Disconnect).unwrap();
        match closed {
            NetworkEvent::Disconnect {
                connection: closed_id,
                ..
            } => assert_eq!(closed_id, connection),
            _ => unreachable!(),
        }
        assert_eq!(transport.connection_count(), 0);
    }

    #[test]
    fn test_long_line_is_split_at_buffer_size() {
        let (mut transport, _host, addr) = started_transport(10);

        let mut client = TcpStream::connect(addr).unwrap();
        poll_until(&mut transport, |e| e.kind() == EventKind::Connect).unwrap();

        let mut line = vec![b'a'; MAX_MESSAGE_SIZE + 10];
        line.push(b'\n');
        client.write_all(&line).unwrap();

        let first = poll_until(&mut transport, |e| e.kind() == EventKind::Data).unwrap();
        let second = poll_until(&mut transport, |e| e.kind() == EventKind::Data).unwrap();
        assert_eq!(payload(&first).len(), MAX_MESSAGE_SIZE);
        assert_eq!(payload(&second).len(), 11);
    }

    #[test]
    fn test_unterminated_message_is_delivered() {
        let (mut transport, _host, addr) = started_transport(10);

        let mut client = TcpStream::connect(addr).unwrap();
        poll_until(&mut transport, |e| e.kind() == EventKind::Connect).unwrap();

        client.write_all(b"1 hunter2").unwrap();

        let event = poll_until(&mut transport, |e| e.kind() == EventKind::Data)
            .expect("Unterminated message was never delivered");
        assert_eq!(payload(&event), "1 hunter2");
        assert_eq!(transport.connection_count(), 1);
    }

    #[test]
    fn test_last_message_arrives_before_disconnect() {
        let (mut transport, _host, addr) = started_transport(10);

        let mut client = TcpStream::connect(addr).unwrap();
        poll_until(&mut transport, |e| e.kind() == EventKind::Connect).unwrap();

        client.write_all(b"0 bye").unwrap();
        client.shutdown(Shutdown::Write).unwrap();

        let event = poll_until(&mut transport, |e| {
            matches!(e.kind(), EventKind::Data | EventKind::Disconnect)
        })
        .unwrap();
        assert_eq!(event.kind(), EventKind::Data);
        assert_eq!(payload(&event), "0 bye");

        let closed = poll_until(&mut transport, |e| e.kind() == EventKind::Disconnect);
        assert!(closed.is_some());
        assert_eq!(transport.connection_count(), 0);
    }

    #[test]
    fn test_capacity_is_enforced() {
        let (mut transport, _host, addr) = started_transport(1);

        let _first = TcpStream::connect(addr).unwrap();
        poll_until(&mut transport, |e| e.kind() == EventKind::Connect).unwrap();

        let _second = TcpStream::connect(addr).unwrap();
        let extra = poll_until(&mut transport, |e| e.kind() == EventKind::Connect);
        assert!(extra.is_none());
        assert_eq!(transport.connection_count(), 1);
    }

    #[test]
    fn test_disconnect_unknown_connection() {
        let (mut transport, host, _addr) = started_transport(10);
        assert_eq!(
            transport.disconnect(host, 42),
            Err(TransportError::WrongConnection(42))
        );
        assert_eq!(
            transport.disconnect(host + 1, 42),
            Err(TransportError::WrongHost(host + 1))
        );
    }

    #[test]
    fn test_local_disconnect_closes_remote_side() {
        let (mut transport, host, addr) = started_transport(10);

        let mut client = TcpStream::connect(addr).unwrap();
        let connection = match poll_until(&mut transport, |e| e.kind() == EventKind::Connect) {
            Some(NetworkEvent::Connect { connection, .. }) => connection,
            other => panic!("Expected connect, got {:?}", other),
        };

        transport.disconnect(host, connection).unwrap();
        assert!(transport.peer_addr(connection).is_none());

        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut buf = [0u8; 16];
        let read = client.read(&mut buf).unwrap_or(0);
        assert_eq!(read, 0);
    }

    #[test]
    fn test_discovery_datagram() {
        let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
        let discovery_port = {
            let reserve = UdpSocket::bind("127.0.0.1:0").unwrap();
            reserve.local_addr().unwrap().port()
        };

        let mut transport = TcpTransport::new().with_discovery_port(discovery_port);
        transport.init().unwrap();
        transport.create_host(&topology(10), 0).unwrap();

        probe
            .send_to(b"hello", ("127.0.0.1", discovery_port))
            .unwrap();

        let event = poll_until(&mut transport, |e| {
            e.kind() == EventKind::BroadcastDiscovery
        })
        .unwrap();
        match event {
            NetworkEvent::BroadcastDiscovery { from, .. } => {
                assert_eq!(from, probe.local_addr().unwrap())
            }
            _ => unreachable!(),
        }
    }
}
