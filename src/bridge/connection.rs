//! Connection state machine: handshake gating, retry and update-check
//! bookkeeping.
//!
//! The manager owns [`ConnectionState`] and nothing else touches it.
//! It performs no I/O: the caller turns its answers into effects for the
//! socket driver.

use std::time::Duration;

use tokio::time::Instant;

use crate::ipc::protocol::{MAX_VERSION, MIN_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingVersion,
    Active,
}

/// Why a version frame was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("version frame while {0:?}")]
    Unexpected(ConnectionState),
    #[error("invalid version {0:?}")]
    NotANumber(String),
    #[error("unsupported version {0} (accepts {MIN_VERSION}..={MAX_VERSION})")]
    Unsupported(u32),
}

#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    negotiated: Option<u32>,
    /// A retry timer is outstanding.
    retry_pending: bool,
    /// The last connection ended in an error.
    error: bool,
    last_update_check: Option<Instant>,
    update_interval: Duration,
}

impl ConnectionManager {
    pub fn new(update_interval: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            negotiated: None,
            retry_pending: false,
            error: false,
            last_update_check: None,
            update_interval,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ConnectionState::Active
    }

    /// Active and negotiated at least `version`.
    pub fn supports(&self, version: u32) -> bool {
        self.is_active() && self.negotiated.is_some_and(|v| v >= version)
    }

    pub fn error(&self) -> bool {
        self.error
    }

    pub fn set_error(&mut self) {
        self.error = true;
    }

    /// Drop the outstanding retry, if any. Returns whether one existed.
    pub fn cancel_retry(&mut self) -> bool {
        std::mem::replace(&mut self.retry_pending, false)
    }

    /// The retry timer fired.
    pub fn retry_fired(&mut self) {
        self.retry_pending = false;
    }

    /// Begin connecting. Returns `false` if a socket already exists.
    pub fn begin_connect(&mut self) -> bool {
        if self.state != ConnectionState::Disconnected {
            return false;
        }
        self.state = ConnectionState::Connecting;
        self.error = false;
        true
    }

    pub fn opened(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::AwaitingVersion;
        }
    }

    /// Validate a version frame and go Active on success.
    pub fn accept_version(&mut self, payload: &str) -> Result<u32, VersionError> {
        if self.state != ConnectionState::AwaitingVersion {
            return Err(VersionError::Unexpected(self.state));
        }
        let version: u32 = payload
            .trim()
            .parse()
            .map_err(|_| VersionError::NotANumber(payload.to_string()))?;
        if !(MIN_VERSION..=MAX_VERSION).contains(&version) {
            return Err(VersionError::Unsupported(version));
        }
        self.negotiated = Some(version);
        self.state = ConnectionState::Active;
        Ok(version)
    }

    /// The socket closed. `was_open` is false if it was already closed.
    ///
    /// When `schedule_retry` is true the caller must arm a retry timer;
    /// at most one timer is outstanding at a time.
    pub fn closed(&mut self, enabled: bool) -> CloseOutcome {
        if self.state == ConnectionState::Disconnected {
            return CloseOutcome {
                was_open: false,
                schedule_retry: false,
            };
        }
        self.state = ConnectionState::Disconnected;
        self.negotiated = None;
        let schedule_retry = enabled && !self.retry_pending;
        if schedule_retry {
            self.retry_pending = true;
        }
        CloseOutcome {
            was_open: true,
            schedule_retry,
        }
    }

    /// Whether an update check should run now. Rate-limited unless forced.
    pub fn should_check_update(&mut self, now: Instant, force: bool) -> bool {
        let due = self
            .last_update_check
            .is_none_or(|last| now.duration_since(last) >= self.update_interval);
        if force || due {
            self.last_update_check = Some(now);
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseOutcome {
    pub was_open: bool,
    pub schedule_retry: bool,
}
