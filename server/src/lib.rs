//! # Master Server Library
//!
//! This library implements the listening side of a game-server master list.
//! Game servers connect to it, prove they hold the shared secret, and are then
//! trusted to advertise themselves in the server registry.
//!
//! ## Core Responsibilities
//!
//! ### Connection Handling
//! Opens one listening host with a single reliable channel and a fixed number
//! of connection slots. On startup the server also dials itself over the
//! loopback address, which exercises the full connect path before any remote
//! peer shows up.
//!
//! ### Authentication
//! The shared secret lives in `<data_dir>/auth/keyphrase.passwd`. When the file
//! does not exist a fresh 256-character secret is generated and written there.
//! A peer authenticates by sending `1 <secret>`; a wrong secret gets the peer
//! disconnected, after an optional grace period.
//!
//! ### Server Registry
//! Keeps one record per advertised game server, keyed by address. Records for
//! a peer are dropped when its connection closes.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Tick Loop
//! All state is owned by one [`dispatcher::Dispatcher`]. The [`driver`] calls
//! [`dispatcher::Dispatcher::tick`] at a fixed rate and each tick handles at
//! most one transport event, start to finish. There are no locks around the
//! registry or the auth state.
//!
//! ### Pluggable Transport
//! The dispatcher talks to a [`transport::Transport`] rather than to sockets.
//! [`transport::TcpTransport`] is the production implementation;
//! [`transport::MockTransport`] replays scripted events in tests.
//!
//! ### Wire Format
//! Every message is a text line `<code> <payload>`, optionally terminated by
//! `\r\n`. Codes are decimal bytes; see [`shared::ActionCode`].
//!
//! ## Module Organization
//!
//! ### Auth Module (`auth`)
//! Per-connection authentication state and the failed-attempt limit.
//!
//! ### Config Module (`config`)
//! Runtime settings and where the secret is stored.
//!
//! ### Credentials Module (`credentials`)
//! Loading, generating and persisting the shared secret.
//!
//! ### Dispatcher Module (`dispatcher`)
//! Startup sequence and per-event handling.
//!
//! ### Driver Module (`driver`)
//! The async fixed-rate loop and graceful shutdown.
//!
//! ### Logger Module (`logger`)
//! The logging seam, backed by the `log` crate in production.
//!
//! ### Registry Module (`registry`)
//! The address-keyed table of advertised servers.
//!
//! ### Transport Module (`transport`)
//! The socket abstraction and its TCP and mock implementations.

pub mod auth;
pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod driver;
pub mod logger;
pub mod registry;
pub mod transport;

pub use config::ServerConfig;
pub use dispatcher::{Dispatcher, DispatcherError};
