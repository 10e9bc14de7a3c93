//! Runtime settings for the master server.
//!
//! The defaults reproduce the fixed deployment the protocol was designed
//! around: port 20000, ten simultaneous connections, a loopback
//! self-connection and first-offense disconnects for bad secrets.

use shared::{DEFAULT_PORT, LOOPBACK_ADDRESS, MAX_CONNECTIONS};
use std::path::PathBuf;

/// Directory under the data dir holding credentials
pub const AUTH_DIR: &str = "auth";
/// File name of the persisted shared secret
pub const KEYPHRASE_FILE: &str = "keyphrase.passwd";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Root directory for persisted state
    pub data_dir: PathBuf,
    /// TCP port the host listens on
    pub port: u16,
    /// Maximum simultaneous connections, self-connection included
    pub max_connections: usize,
    /// Address the self-connection dials
    pub self_address: String,
    /// Failed secrets tolerated before a peer is dropped; 0 drops on the first
    pub max_failed_attempts: u32,
    /// Dispatcher ticks per second
    pub tick_rate: u32,
    /// UDP port for broadcast discovery, disabled when `None`
    pub discovery_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            port: DEFAULT_PORT,
            max_connections: MAX_CONNECTIONS,
            self_address: LOOPBACK_ADDRESS.to_string(),
            max_failed_attempts: 0,
            tick_rate: 60,
            discovery_port: None,
        }
    }
}

impl ServerConfig {
    /// Location of the shared secret: `<data_dir>/auth/keyphrase.passwd`
    pub fn keyphrase_path(&self) -> PathBuf {
        self.data_dir.join(AUTH_DIR).join(KEYPHRASE_FILE)
    }
}
