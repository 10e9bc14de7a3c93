//! Logging capability handed to the dispatcher.

use log::Level;
use std::sync::{Arc, Mutex};

pub const LOG_TARGET: &str = "master_server";

/// Side channel for protocol messages
pub trait Logger {
    fn log(&self, level: Level, message: &str);
}

/// Forwards everything to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogLogger;

impl Logger for LogLogger {
    fn log(&self, level: Level, message: &str) {
        log::log!(target: LOG_TARGET, level, "{}", message);
    }
}

/// Keeps every message in memory; clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct RecordingLogger {
    entries: Arc<Mutex<Vec<(Level, String)>>>,
}

impl RecordingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Level, String)> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries().into_iter().map(|(_, message)| message).collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if any recorded message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.entries()
            .iter()
            .any(|(_, message)| message.contains(needle))
    }
}

impl Logger for RecordingLogger {
    fn log(&self, level: Level, message: &str) {
        let entry = (level, message.to_string());
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}
