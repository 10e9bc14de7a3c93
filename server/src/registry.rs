//! In-memory directory of advertised game servers
//!
//! The registry maps a server's address to its latest metadata. It performs
//! no I/O and no validation: the dispatcher that owns it is the only writer,
//! and the directory lives exactly as long as the process.
//!
//! # Keys
//!
//! A record is keyed by the address of the connection that advertised it, as
//! the master server sees it: [`ServerRegistry::key_for`] of the peer's socket
//! address, i.e. `ip:port` with the peer's source port. It is not the game
//! port a server may advertise for players. This is what lets the dispatcher
//! drop a server's record when its connection closes.

use shared::ServerRecord;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Address-keyed collection of [`ServerRecord`]s
///
/// Holds at most one record per address. Adding a record for an address that
/// is already present replaces the old record in place.
#[derive(Debug, Default)]
pub struct ServerRegistry {
    servers: HashMap<String, ServerRecord>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self {
            servers: HashMap::new(),
        }
    }

    /// Inserts or overwrites the record keyed by `record.address()`
    ///
    /// Returns the record that was replaced, if any.
    pub fn add(&mut self, record: ServerRecord) -> Option<ServerRecord> {
        self.servers.insert(record.address().to_string(), record)
    }

    /// Registry key for a server reached over the connection from `peer`
    pub fn key_for(peer: SocketAddr) -> String {
        peer.to_string()
    }

    pub fn lookup(&self, address: &str) -> Option<&ServerRecord> {
        self.servers.get(address)
    }

    /// Drops the record for `address`, returning it if it existed
    pub fn remove(&mut self, address: &str) -> Option<ServerRecord> {
        self.servers.remove(address)
    }

    /// Addresses of every known server, in no particular order
    pub fn addresses(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &ServerRecord> {
        self.servers.values()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
