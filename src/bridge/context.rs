//! The session context: every piece of mutable bridge state in one
//! place, owned by the event loop.
//!
//! `Bridge` performs no socket I/O. Each entry point updates state,
//! calls host adapters, and queues [`Effect`]s that the driver in
//! [`super::Driver`] carries out in order.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use crate::host::{HostSet, NotificationId};
use crate::ipc::codec::DecodeResult;
use crate::ipc::protocol::{Command, MAX_VERSION, MIN_VERSION, Outbound, SESSION_LIST_VERSION};
use crate::prefs::{PrefStore, Preferences};

use super::clipboard::{ClipboardJob, ClipboardMirror};
use super::connection::{ConnectionManager, ConnectionState, VersionError};
use super::state::SessionRegistry;
use super::status::{self, Indicator, StatusLog, StatusSnapshot};

/// Default chroot-side daemon endpoint.
pub const DEFAULT_URL: &str = "ws://localhost:30001/";

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub url: String,
    /// Delay before reconnecting after a close.
    pub retry_interval: Duration,
    /// Minimum spacing of unforced session list refreshes.
    pub refresh_interval: Duration,
    /// Minimum spacing of unforced update checks.
    pub update_interval: Duration,
    pub connect_timeout: Duration,
    pub debug: bool,
    pub log_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            retry_interval: Duration::from_secs(5),
            refresh_interval: Duration::from_secs(15),
            update_interval: Duration::from_secs(15 * 60),
            connect_timeout: Duration::from_secs(5),
            debug: false,
            log_capacity: status::DEFAULT_CAPACITY,
        }
    }
}

/// Work the driver must perform on behalf of the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Open the socket; report back via `on_open` or `on_close`.
    Connect,
    Send(Outbound),
    /// Close the live socket (or abandon a pending connect), then call
    /// `on_close`.
    Close,
    ScheduleRetry(Duration),
    CancelRetry,
    CheckUpdate,
}

pub struct Bridge {
    pub(super) config: BridgeConfig,
    pub(super) prefs: PrefStore,
    pub(super) conn: ConnectionManager,
    pub(super) registry: SessionRegistry,
    pub(super) clipboard: ClipboardMirror,
    /// Clipboard operation the driver is awaiting. While one is in
    /// flight later commands wait in `deferred` so replies keep their
    /// order.
    pub(super) clipboard_job: Option<ClipboardJob>,
    pub(super) deferred: VecDeque<Command>,
    /// Live notifications and the session tag each one refers to.
    pub(super) notifications: HashMap<NotificationId, Option<String>>,
    pub(super) last_refresh: Option<Instant>,
    pub(super) log: StatusLog,
    pub(super) host: HostSet,
    effects: Vec<Effect>,
}

impl Bridge {
    pub fn new(config: BridgeConfig, prefs: PrefStore, host: HostSet) -> Self {
        let mut log = StatusLog::new(config.log_capacity, config.debug);
        log.debug_msg("Bridge running");
        log.set_status("Started...");
        Self {
            conn: ConnectionManager::new(config.update_interval),
            registry: SessionRegistry::new(),
            clipboard: ClipboardMirror::new(),
            clipboard_job: None,
            deferred: VecDeque::new(),
            notifications: HashMap::new(),
            last_refresh: None,
            log,
            config,
            prefs,
            host,
            effects: Vec::new(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn preferences(&self) -> Preferences {
        self.prefs.get()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.conn.state()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn indicator(&self) -> Indicator {
        if self.conn.error() {
            Indicator::Error
        } else if !self.prefs.get().enabled {
            Indicator::Disabled
        } else if self.conn.is_active() {
            Indicator::Online
        } else {
            Indicator::Offline
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.log.snapshot(self.indicator())
    }

    pub(super) fn send(&mut self, frame: Outbound) {
        self.effects.push(Effect::Send(frame));
    }

    // -- Connection lifecycle --

    /// Try to connect. Cancels any pending retry first.
    pub fn connect(&mut self) {
        if self.conn.cancel_retry() {
            self.effects.push(Effect::CancelRetry);
        }
        if !self.prefs.get().enabled {
            self.log.set_status("No connection (disabled).");
            self.log.info("Bridge is disabled.");
            return;
        }
        if !self.conn.begin_connect() {
            self.log.debug_msg("Socket already open");
            return;
        }
        self.log.debug_msg(format!("Opening a web socket to {}", self.config.url));
        self.log.set_status("Connecting...");
        self.effects.push(Effect::Connect);
    }

    pub fn on_open(&mut self) {
        self.conn.opened();
        self.log.info("Connection established.");
        self.log
            .set_status("Connection established: checking version...");
    }

    /// The socket closed, failed to open, or was closed by us.
    pub fn on_close(&mut self, now: Instant) {
        self.clipboard_job = None;
        self.deferred.clear();
        let enabled = self.prefs.get().enabled;
        let outcome = self.conn.closed(enabled);
        if !outcome.was_open {
            return;
        }
        if enabled {
            let secs = self.config.retry_interval.as_secs();
            self.log
                .set_status(format!("No connection (retrying in {secs} seconds)"));
            self.log.info(format!(
                "Connection is closed, trying again in {secs} seconds..."
            ));
            if outcome.schedule_retry {
                self.effects
                    .push(Effect::ScheduleRetry(self.config.retry_interval));
            }
        } else {
            self.log.set_status("No connection (disabled).");
            self.log
                .info("Connection is closed, bridge is disabled: not retrying.");
        }
        self.check_update(now, false);
    }

    pub fn on_retry_timer(&mut self) {
        self.conn.retry_fired();
        self.connect();
    }

    /// Handle one decoded socket message.
    pub fn on_frame(&mut self, frame: DecodeResult, now: Instant) {
        match frame {
            DecodeResult::Control | DecodeResult::Closed => {}
            DecodeResult::Malformed(reason) => {
                self.violation(format!("Malformed frame: {reason}"), now);
            }
            DecodeResult::Invalid { frame, reason } => {
                self.send(Outbound::Error(format!("Invalid packet: {reason}")));
                self.violation(format!("Invalid packet from server: {frame}"), now);
            }
            DecodeResult::Command(cmd) => {
                self.log.debug_msg(format!("Message received ({cmd:?})"));
                match (self.conn.state(), cmd) {
                    (ConnectionState::AwaitingVersion, Command::Version(payload)) => {
                        self.handle_version(&payload, now);
                    }
                    (ConnectionState::AwaitingVersion, _) => {
                        self.violation("Received frame while waiting for version.", now);
                    }
                    (ConnectionState::Active, cmd) => self.enqueue(cmd, now),
                    (state, cmd) => {
                        tracing::debug!(?state, ?cmd, "dropping frame without a session");
                    }
                }
            }
        }
    }

    fn enqueue(&mut self, cmd: Command, now: Instant) {
        if self.clipboard_job.is_some() {
            self.deferred.push_back(cmd);
        } else {
            self.dispatch(cmd, now);
        }
    }

    /// Dispatch held-back commands until another clipboard operation
    /// starts or the session goes away.
    pub(super) fn resume_deferred(&mut self, now: Instant) {
        while self.clipboard_job.is_none() {
            if !self.conn.is_active() || self.conn.error() {
                self.deferred.clear();
                return;
            }
            let Some(cmd) = self.deferred.pop_front() else {
                return;
            };
            self.dispatch(cmd, now);
        }
    }

    pub(super) fn handle_version(&mut self, payload: &str, now: Instant) {
        match self.conn.accept_version(payload) {
            Ok(version) => {
                self.send(Outbound::VersionOk);
                self.log.set_status("Connection established.");
                self.log
                    .info(format!("Protocol version {version} negotiated."));
                if version >= SESSION_LIST_VERSION {
                    self.refresh_sessions(true, now);
                }
            }
            Err(e @ VersionError::Unexpected(_)) => {
                self.violation(format!("Unexpected version frame: {e}"), now);
            }
            Err(e) => {
                self.send(Outbound::Error(format!(
                    "Invalid version ({} not in {MIN_VERSION}..={MAX_VERSION})",
                    payload.trim()
                )));
                self.violation(format!("Invalid server version: {e}"), now);
            }
        }
    }

    /// A fatal protocol error: disable, report, and drop the connection.
    pub(super) fn violation(&mut self, message: impl Into<String>, now: Instant) {
        self.log.error(message);
        self.conn.set_error();
        if let Err(e) = self.prefs.set_enabled(false) {
            self.log.error(format!("Cannot save preferences: {e}"));
        }
        self.effects.push(Effect::Close);
        self.check_update(now, true);
    }

    pub(super) fn check_update(&mut self, now: Instant, force: bool) {
        if self.conn.should_check_update(now, force) {
            self.effects.push(Effect::CheckUpdate);
        }
    }

    /// Ask the server for focus and session list, rate-limited unless
    /// forced. Requires an active version-2 session.
    pub fn refresh_sessions(&mut self, force: bool, now: Instant) {
        if !self.conn.supports(SESSION_LIST_VERSION) {
            return;
        }
        let due = self
            .last_refresh
            .is_none_or(|last| now.duration_since(last) >= self.config.refresh_interval);
        if !force && !due {
            return;
        }
        self.send(Outbound::ReportFocus(self.registry.focus().to_string()));
        self.send(Outbound::ListSessions);
        self.last_refresh = Some(now);
    }

    // -- Preferences --

    pub fn set_enabled(&mut self, enabled: bool) {
        let was = self.prefs.get().enabled;
        if let Err(e) = self.prefs.set_enabled(enabled) {
            self.log.error(format!("Cannot save preferences: {e}"));
        }
        self.enabled_changed(was, enabled);
    }

    pub fn set_hidpi(&mut self, hidpi: bool) {
        let was = self.prefs.get().hidpi;
        if let Err(e) = self.prefs.set_hidpi(hidpi) {
            self.log.error(format!("Cannot save preferences: {e}"));
        }
        if was != hidpi {
            self.hidpi_changed(hidpi);
        }
    }

    pub fn debug(&self) -> bool {
        self.log.debug()
    }

    /// Switch debug mode at runtime. Surfaces created afterwards start
    /// in the new mode.
    pub fn set_debug(&mut self, debug: bool) {
        if self.log.debug() == debug {
            return;
        }
        self.log.set_debug(debug);
        self.log.info(if debug {
            "Debug mode enabled."
        } else {
            "Debug mode disabled."
        });
    }

    /// Pick up preferences edited outside the daemon.
    pub fn reload_prefs(&mut self) {
        let before = self.prefs.get();
        match self.prefs.reload() {
            Ok(after) => {
                self.log.debug_msg("Preferences reloaded");
                self.enabled_changed(before.enabled, after.enabled);
                if before.hidpi != after.hidpi {
                    self.hidpi_changed(after.hidpi);
                }
            }
            Err(e) => self.log.error(format!("Cannot reload preferences: {e}")),
        }
    }

    fn enabled_changed(&mut self, was: bool, enabled: bool) {
        if was == enabled {
            return;
        }
        if enabled {
            self.log.info("Bridge enabled.");
            self.connect();
        } else if self.conn.state() == ConnectionState::Disconnected {
            // Clears a pending retry and updates the status line.
            self.connect();
        } else {
            self.effects.push(Effect::Close);
        }
    }

    fn hidpi_changed(&mut self, hidpi: bool) {
        let handles: Vec<_> = self.registry.live().map(|(_, h)| h).collect();
        for handle in handles {
            if let Err(e) = self.host.surfaces.set_hidpi(handle, hidpi) {
                self.log.error(format!("Cannot update surface {handle}: {e}"));
            }
        }
    }
}
