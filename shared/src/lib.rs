use thiserror::Error;

pub const DEFAULT_PORT: u16 = 20000;
pub const MAX_CONNECTIONS: usize = 10;
pub const MAX_MESSAGE_SIZE: usize = 1024;
pub const LOOPBACK_ADDRESS: &str = "127.0.0.1";

pub const SECRET_LENGTH: usize = 256;
pub const SECRET_ALPHABET: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ1234567890!@#$%^&*()_-+=[{}]|:;<>,.?";

/// Command selector carried in the leading byte of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ActionCode {
    Debug = 0,
    Auth = 1,
}

impl ActionCode {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ActionCode::Debug),
            1 => Some(ActionCode::Auth),
            _ => None,
        }
    }
}

impl From<ActionCode> for u8 {
    fn from(action: ActionCode) -> u8 {
        action as u8
    }
}

/// Field selectors for the server-list query protocol.
///
/// Numbered independently of [`ActionCode`]. No handler consumes these yet;
/// they reserve the values a list query/response exchange will use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ListData {
    Ip = 0x00,
    CurPlayers = 0x01,
    MaxPlayers = 0x02,
    Servers = 0x03,
}

impl ListData {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(ListData::Ip),
            0x01 => Some(ListData::CurPlayers),
            0x02 => Some(ListData::MaxPlayers),
            0x03 => Some(ListData::Servers),
            _ => None,
        }
    }
}

/// One advertised game server, keyed by its address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRecord {
    address: String,
    pub server_count: i32,
    pub current_players: i32,
    pub max_players: i32,
}

impl ServerRecord {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            server_count: 0,
            current_players: 0,
            max_players: 0,
        }
    }

    pub fn with_players(mut self, current_players: i32, max_players: i32) -> Self {
        self.current_players = current_players;
        self.max_players = max_players;
        self
    }

    pub fn with_server_count(mut self, server_count: i32) -> Self {
        self.server_count = server_count;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

/// A decoded `<code> <payload>` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub code: u8,
    pub payload: String,
}

impl Command {
    pub fn new(code: u8, payload: impl Into<String>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }

    /// Returns the action this command selects, if the code is one we handle.
    pub fn action(&self) -> Option<ActionCode> {
        ActionCode::from_code(self.code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("message has no space after the command code")]
    MissingSeparator,
    #[error("command code {0:?} is not a decimal byte")]
    InvalidCode(String),
}

/// Decodes one text line.
///
/// The line is split on its first space. The prefix must parse as a decimal
/// `u8`; everything after the space is the payload, with trailing `\r` and
/// `\n` removed. Inner spaces stay in the payload untouched.
pub fn decode(message: &str) -> Result<Command, CodecError> {
    let split = message.find(' ').ok_or(CodecError::MissingSeparator)?;
    let (prefix, rest) = message.split_at(split);

    let code = prefix
        .trim()
        .parse::<u8>()
        .map_err(|_| CodecError::InvalidCode(prefix.to_string()))?;
    let payload = rest[1..].trim_end_matches(&['\r', '\n'][..]);

    Ok(Command::new(code, payload))
}

/// Decodes the first `byte_count` bytes of a receive buffer.
///
/// Bytes past `byte_count` (zero padding, stale data) are never looked at.
/// Invalid UTF-8 is replaced rather than rejected.
pub fn decode_frame(buffer: &[u8], byte_count: usize) -> Result<Command, CodecError> {
    let len = byte_count.min(buffer.len());
    let text = String::from_utf8_lossy(&buffer[..len]);
    decode(&text)
}

pub fn encode(code: u8, payload: &str) -> String {
    format!("{} {}\r\n", code, payload)
}
