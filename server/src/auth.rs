//! Shared-secret authentication for connected peers.
//!
//! Every connection starts unauthenticated. Presenting the exact secret moves
//! it to authenticated, which is terminal. A wrong secret counts as a failed
//! attempt; once the count exceeds `max_failed_attempts` the gate answers
//! [`AuthOutcome::Rejected`] and the caller must drop the connection. With the
//! default limit of zero the very first mismatch is rejected.
//!
//! The gate only decides. Disconnecting and logging belong to the dispatcher.

use crate::transport::ConnectionId;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The secret matched; the connection is now authenticated
    Authenticated,
    /// The connection was already authenticated; the message was ignored
    AlreadyAuthenticated,
    /// Wrong secret, but the peer may try again
    Retry { attempts_left: u32 },
    /// Wrong secret and no attempts left; disconnect the peer
    Rejected,
}

#[derive(Debug, Default, Clone, Copy)]
struct PeerAuth {
    authenticated: bool,
    failed_attempts: u32,
}

pub struct AuthGate {
    secret: String,
    max_failed_attempts: u32,
    peers: HashMap<ConnectionId, PeerAuth>,
}

impl AuthGate {
    pub fn new(secret: impl Into<String>, max_failed_attempts: u32) -> Self {
        Self {
            secret: secret.into(),
            max_failed_attempts,
            peers: HashMap::new(),
        }
    }

    /// Checks `message` against the secret for `connection`
    pub fn authenticate(&mut self, message: &str, connection: ConnectionId) -> AuthOutcome {
        let peer = self.peers.entry(connection).or_default();

        if peer.authenticated {
            return AuthOutcome::AlreadyAuthenticated;
        }

        if message == self.secret {
            peer.authenticated = true;
            peer.failed_attempts = 0;
            return AuthOutcome::Authenticated;
        }

        peer.failed_attempts = peer.failed_attempts.saturating_add(1);
        if peer.failed_attempts > self.max_failed_attempts {
            AuthOutcome::Rejected
        } else {
            AuthOutcome::Retry {
                attempts_left: self.max_failed_attempts - peer.failed_attempts,
            }
        }
    }

    pub fn is_authenticated(&self, connection: ConnectionId) -> bool {
        self.peers
            .get(&connection)
            .map(|peer| peer.authenticated)
            .unwrap_or(false)
    }

    pub fn failed_attempts(&self, connection: ConnectionId) -> u32 {
        self.peers
            .get(&connection)
            .map(|peer| peer.failed_attempts)
            .unwrap_or(0)
    }

    /// Drops everything known about `connection`
    pub fn forget(&mut self, connection: ConnectionId) {
        self.peers.remove(&connection);
    }

    pub fn max_failed_attempts(&self) -> u32 {
        self.max_failed_attempts
    }
}

impl fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGate")
            .field("secret", &"<redacted>")
            .field("max_failed_attempts", &self.max_failed_attempts)
            .field("peers", &self.peers.len())
            .finish()
    }
}
