//! Scripted transport for unit and integration testing.
//!
//! Tests queue the events the dispatcher should see and inspect the calls it
//! made afterwards. Clones share state, so a test can keep a handle after
//! moving the transport into a dispatcher.

use super::{
    ChannelId, ConnectionId, HostId, HostTopology, NetworkEvent, Transport, TransportError,
};
use shared::MAX_MESSAGE_SIZE;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

pub const MOCK_HOST: HostId = 0;

#[derive(Debug, Default)]
struct MockState {
    initialized: bool,
    hosts: Vec<(HostTopology, u16)>,
    local_port: Option<u16>,
    next_connection: ConnectionId,
    events: VecDeque<NetworkEvent>,
    connects: Vec<(HostId, String, u16)>,
    connect_error: Option<TransportError>,
    disconnects: Vec<(HostId, ConnectionId)>,
    disconnect_error: Option<TransportError>,
    sent: Vec<(ConnectionId, ChannelId, Vec<u8>)>,
    peer_addrs: HashMap<ConnectionId, SocketAddr>,
    polls: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        let transport = Self::default();
        transport.state().next_connection = 1;
        transport
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queues an event for a later `poll_event`
    pub fn push_event(&self, event: NetworkEvent) {
        self.state().events.push_back(event);
    }

    /// Queues a data event carrying `line` in a zero-padded receive buffer
    pub fn push_data(&self, connection: ConnectionId, line: &str) {
        let bytes = line.as_bytes();
        let byte_count = bytes.len();
        let mut buffer = vec![0u8; MAX_MESSAGE_SIZE.max(byte_count)];
        buffer[..byte_count].copy_from_slice(bytes);

        self.push_event(NetworkEvent::Data {
            host: MOCK_HOST,
            connection,
            channel: 0,
            buffer,
            byte_count,
        });
    }

    pub fn push_connect(&self, connection: ConnectionId) {
        self.push_event(NetworkEvent::Connect {
            host: MOCK_HOST,
            connection,
        });
    }

    pub fn push_disconnect(&self, connection: ConnectionId, error: Option<TransportError>) {
        self.push_event(NetworkEvent::Disconnect {
            host: MOCK_HOST,
            connection,
            error,
        });
    }

    pub fn set_peer_addr(&self, connection: ConnectionId, addr: SocketAddr) {
        self.state().peer_addrs.insert(connection, addr);
    }

    /// Reports `port` from `local_addr` instead of the requested one
    pub fn set_local_port(&self, port: u16) {
        self.state().local_port = Some(port);
    }

    /// Makes every later `connect` fail with `error`
    pub fn fail_connects(&self, error: TransportError) {
        self.state().connect_error = Some(error);
    }

    /// Makes every later `disconnect` fail with `error`
    pub fn fail_disconnects(&self, error: TransportError) {
        self.state().disconnect_error = Some(error);
    }

    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    pub fn hosts(&self) -> Vec<(HostTopology, u16)> {
        self.state().hosts.clone()
    }

    pub fn connects(&self) -> Vec<(HostId, String, u16)> {
        self.state().connects.clone()
    }

    pub fn disconnects(&self) -> Vec<(HostId, ConnectionId)> {
        self.state().disconnects.clone()
    }

    pub fn sent(&self) -> Vec<(ConnectionId, ChannelId, Vec<u8>)> {
        self.state().sent.clone()
    }

    pub fn pending_events(&self) -> usize {
        self.state().events.len()
    }

    pub fn polls(&self) -> usize {
        self.state().polls
    }
}

impl Transport for MockTransport {
    fn init(&mut self) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.initialized {
            return Err(TransportError::AlreadyInitialized);
        }
        state.initialized = true;
        Ok(())
    }

    fn create_host(
        &mut self,
        topology: &HostTopology,
        port: u16,
    ) -> Result<HostId, TransportError> {
        let mut state = self.state();
        if !state.initialized {
            return Err(TransportError::NotInitialized);
        }
        if !state.hosts.is_empty() {
            return Err(TransportError::HostExists);
        }
        state.hosts.push((topology.clone(), port));
        Ok(MOCK_HOST)
    }

    fn local_addr(&self, host: HostId) -> Option<SocketAddr> {
        let state = self.state();
        if host != MOCK_HOST {
            return None;
        }
        let (_, port) = state.hosts.first()?;
        let port = state.local_port.unwrap_or(*port);
        Some(SocketAddr::from(([127, 0, 0, 1], port)))
    }

    fn connect(
        &mut self,
        host: HostId,
        address: &str,
        port: u16,
    ) -> Result<ConnectionId, TransportError> {
        let mut state = self.state();
        state.connects.push((host, address.to_string(), port));
        if let Some(error) = state.connect_error.clone() {
            return Err(error);
        }

        let connection = state.next_connection;
        state.next_connection += 1;
        Ok(connection)
    }

    fn poll_event(&mut self) -> NetworkEvent {
        let mut state = self.state();
        state.polls += 1;
        state.events.pop_front().unwrap_or(NetworkEvent::Nothing)
    }

    fn send(
        &mut self,
        _host: HostId,
        connection: ConnectionId,
        channel: ChannelId,
        data: &[u8],
    ) -> Result<(), TransportError> {
        self.state().sent.push((connection, channel, data.to_vec()));
        Ok(())
    }

    fn disconnect(
        &mut self,
        host: HostId,
        connection: ConnectionId,
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        state.disconnects.push((host, connection));
        match state.disconnect_error.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn peer_addr(&self, connection: ConnectionId) -> Option<SocketAddr> {
        self.state().peer_addrs.get(&connection).copied()
    }
}
