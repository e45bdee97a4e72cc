//! Status line and bounded diagnostic log.
//!
//! Every entry is mirrored to `tracing`; the ring only keeps what a
//! status display would show.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

/// Default number of retained log entries.
pub const DEFAULT_CAPACITY: usize = 20;

/// Messages longer than this are shortened before being stored.
const MAX_MESSAGE_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    /// Unix epoch milliseconds.
    pub timestamp: u64,
    pub message: String,
}

/// Coarse connection indicator, as an icon would show it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    Online,
    Offline,
    Disabled,
    Error,
}

/// Point-in-time view for a presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub status: String,
    pub indicator: Indicator,
    /// Oldest first.
    pub entries: Vec<LogEntry>,
}

#[derive(Debug)]
pub struct StatusLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    debug: bool,
    status: String,
}

impl StatusLog {
    /// A log keeping the newest `capacity` entries (at least one).
    pub fn new(capacity: usize, debug: bool) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            debug,
            status: String::new(),
        }
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
        tracing::info!(status = %self.status, "status");
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Warning, message.into());
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn debug_msg(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Debug, message.into());
    }

    fn push(&mut self, level: LogLevel, message: String) {
        match level {
            LogLevel::Error => tracing::error!("{message}"),
            LogLevel::Warning => tracing::warn!("{message}"),
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Debug => tracing::debug!("{message}"),
        }
        if level == LogLevel::Debug && !self.debug {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            level,
            timestamp: epoch_millis(),
            message: shorten(message),
        });
    }

    pub fn snapshot(&self, indicator: Indicator) -> StatusSnapshot {
        StatusSnapshot {
            status: self.status.clone(),
            indicator,
            entries: self.entries.iter().cloned().collect(),
        }
    }
}

fn shorten(message: String) -> String {
    if message.chars().count() <= MAX_MESSAGE_CHARS {
        return message;
    }
    let mut short: String = message.chars().take(MAX_MESSAGE_CHARS - 3).collect();
    short.push_str("...");
    short
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
