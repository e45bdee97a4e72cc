//! Command dispatch and host event handling.
//!
//! Each handler mutates the [`Bridge`] and queues replies; none of them
//! touch the socket.

use tokio::time::Instant;

use crate::host::{HostEvent, Notification, SurfaceHandle, SurfaceRequest, WindowState};
use crate::ipc::protocol::{
    self, Command, Outbound, RaiseRequest, SESSION_LIST_VERSION, SurfaceMode,
};

use super::clipboard::ClipboardOutcome;
use super::context::Bridge;
use super::state::{Liveness, SurfaceKind};

impl Bridge {
    /// Handle a command received on an Active connection.
    pub(super) fn dispatch(&mut self, cmd: Command, now: Instant) {
        match cmd {
            Command::Version(payload) => self.handle_version(&payload, now),
            Command::Write(payload) => self.handle_write(&payload),
            Command::Read => self.handle_read(),
            Command::OpenUrl(url) => self.handle_open_url(&url),
            Command::RaiseSurface(payload) => self.handle_raise(&payload, now),
            Command::Sessions(payload) => self.handle_sessions(&payload),
            Command::Notify(payload) => self.handle_notify(&payload),
            Command::Ping(payload) => self.send(Outbound::Pong(payload)),
            Command::ServerError(message) => {
                self.log.error(format!("Server error: {message}"));
                self.check_update(now, true);
            }
        }
    }

    fn handle_write(&mut self, payload: &str) {
        self.clipboard_job = Some(self.clipboard.write(&self.host.clipboard, payload));
    }

    fn handle_read(&mut self) {
        self.clipboard_job = Some(self.clipboard.read(&self.host.clipboard));
    }

    /// Reply to the clipboard command whose job just finished, then run
    /// whatever queued up behind it.
    pub fn on_clipboard_done(&mut self, outcome: ClipboardOutcome, now: Instant) {
        self.clipboard_job = None;
        match outcome {
            ClipboardOutcome::Written { empty, result } => {
                match self.clipboard.complete_write(empty, result) {
                    Ok(true) => self.log.debug_msg("Clipboard updated"),
                    Ok(false) => self.log.debug_msg("Clipboard unchanged"),
                    Err(e) => self.log.error(format!("Cannot write clipboard: {e}")),
                }
                self.send(Outbound::WriteOk);
            }
            ClipboardOutcome::Read(result) => match self.clipboard.complete_read(result) {
                Ok(text) => self.send(Outbound::Clipboard(text)),
                Err(e) => {
                    self.log.error(format!("Cannot read clipboard: {e}"));
                    self.send(Outbound::Error("Error: clipboard unavailable".into()));
                }
            },
        }
        self.resume_deferred(now);
    }

    fn handle_open_url(&mut self, url: &str) {
        if !protocol::is_absolute_url(url) {
            self.log.warn(format!("Refusing relative URL {url}"));
            self.send(Outbound::Error("Error: URL must be absolute".into()));
            return;
        }
        match self.host.surfaces.open_url(url) {
            Ok(()) => self.send(Outbound::UrlOk),
            Err(e) => {
                self.log.error(format!("Cannot open {url}: {e}"));
                self.send(Outbound::Error(format!("Error: {e}")));
            }
        }
    }

    fn handle_raise(&mut self, payload: &str, now: Instant) {
        let Some(request) = protocol::parse_raise(payload) else {
            self.log.warn(format!("Invalid display {payload:?}"));
            self.send(Outbound::Error("Error: invalid display".into()));
            return;
        };
        match request {
            RaiseRequest::Host => self.minimize_all(),
            RaiseRequest::Display {
                tag,
                mode,
                normalized_from,
            } => {
                if let Some(c) = normalized_from {
                    self.log
                        .warn(format!("Unknown display mode '{c}', using fullscreen"));
                }
                self.raise_display(&tag, mode);
            }
        }
        self.send(Outbound::RaiseOk);
        self.refresh_sessions(true, now);
    }

    /// Give focus back to the host by minimizing every managed window.
    fn minimize_all(&mut self) {
        let windows: Vec<SurfaceHandle> = self
            .registry
            .live()
            .filter(|(s, _)| s.kind == SurfaceKind::Window)
            .map(|(_, h)| h)
            .collect();
        for handle in windows {
            if let Err(e) = self.minimize(handle) {
                self.log.error(format!("Cannot minimize {handle}: {e}"));
            }
        }
    }

    fn minimize(&self, handle: SurfaceHandle) -> Result<(), crate::host::HostError> {
        let surfaces = &self.host.surfaces;
        if surfaces.window_state(handle)? == WindowState::Fullscreen {
            surfaces.set_window_state(handle, WindowState::Maximized)?;
        }
        surfaces.set_window_state(handle, WindowState::Minimized)
    }

    fn raise_display(&mut self, tag: &str, mode: SurfaceMode) {
        let existing = self
            .registry
            .get(tag)
            .map(|s| (s.liveness, s.handle, s.closing, s.kind));
        match existing {
            Some((Liveness::Live, Some(handle), false, kind)) => {
                if let Err(e) = self.focus_surface(handle, kind) {
                    self.log.error(format!("Cannot focus {tag}: {e}"));
                }
            }
            Some((Liveness::Pending(_), ..)) => {
                self.log
                    .debug_msg(format!("Surface for {tag} is already being created"));
            }
            _ => self.create_surface(tag, mode),
        }
    }

    fn focus_surface(
        &self,
        handle: SurfaceHandle,
        kind: SurfaceKind,
    ) -> Result<(), crate::host::HostError> {
        let surfaces = &self.host.surfaces;
        if kind == SurfaceKind::Window
            && surfaces.window_state(handle)? == WindowState::Maximized
        {
            surfaces.set_window_state(handle, WindowState::Fullscreen)?;
        }
        surfaces.focus(handle)
    }

    fn create_surface(&mut self, tag: &str, mode: SurfaceMode) {
        let request = self.registry.begin_surface(tag, mode.into());
        let surface = SurfaceRequest {
            request,
            tag: tag.to_string(),
            title: self.registry.display_name(tag),
            debug: self.log.debug(),
            hidpi: self.prefs.get().hidpi,
            mode,
        };
        self.log
            .debug_msg(format!("Creating {} surface for {tag}", mode.as_char()));
        if let Err(e) = self.host.surfaces.create(surface) {
            self.registry.fail_surface(request);
            self.log.error(format!("Cannot create surface for {tag}: {e}"));
        }
    }

    fn handle_sessions(&mut self, payload: &str) {
        if payload.is_empty() {
            self.log.debug_msg("Session cycle acknowledged");
            return;
        }
        let listing = protocol::parse_session_list(payload);
        for (handle, title) in self.registry.apply_listing(listing) {
            if let Err(e) = self.host.surfaces.set_title(handle, &title) {
                self.log.error(format!("Cannot retitle {handle}: {e}"));
            }
        }
    }

    fn handle_notify(&mut self, payload: &str) {
        let mut options = match serde_json::from_str::<serde_json::Value>(payload) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => {
                self.log.error("Invalid notification payload");
                self.send(Outbound::Error("Error: invalid notification".into()));
                return;
            }
        };
        options.remove("id");
        let tag = options
            .remove("display-tag")
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|t| protocol::is_allowed_tag(t));
        let context = tag
            .as_deref()
            .map(|t| format!("From {} ({t})", self.registry.display_name(t)));
        match self.host.notifier.show(&Notification { options, context }) {
            Ok(id) => {
                self.notifications.insert(id, tag);
                self.send(Outbound::NotifyOk);
            }
            Err(e) => {
                self.log.error(format!("Cannot show notification: {e}"));
                self.send(Outbound::Error("Error: notification failed".into()));
            }
        }
    }

    fn report_focus(&mut self, changed: Option<String>) {
        if let Some(tag) = changed {
            if self.conn.supports(SESSION_LIST_VERSION) {
                self.send(Outbound::ReportFocus(tag));
            }
        }
    }

    /// Apply an asynchronous host outcome.
    pub fn on_host_event(&mut self, event: HostEvent, now: Instant) {
        match event {
            HostEvent::SurfaceCreated { request, result } => match result {
                Ok(handle) => match self.registry.complete_surface(request, handle) {
                    Ok(tag) => {
                        self.log.debug_msg(format!("Surface {handle} is live for {tag}"));
                        self.registry.set_focus(tag.clone());
                        if self.conn.supports(SESSION_LIST_VERSION) {
                            self.send(Outbound::ReportFocus(tag));
                        }
                    }
                    Err(stale) => {
                        self.log.warn(format!("Closing orphan surface {handle}: {stale}"));
                        if let Err(e) = self.host.surfaces.close(handle) {
                            self.log.error(format!("Cannot close {handle}: {e}"));
                        }
                    }
                },
                Err(e) => {
                    let tag = self.registry.fail_surface(request);
                    self.log.error(format!(
                        "Surface creation failed for {}: {e}",
                        tag.as_deref().unwrap_or("unknown session")
                    ));
                }
            },
            HostEvent::FocusChanged(handle) => {
                let changed = self.registry.focus_handle(handle);
                self.report_focus(changed);
            }
            HostEvent::FocusLost(handle) => {
                let changed = self.registry.focus_lost(handle);
                self.report_focus(changed);
            }
            HostEvent::SurfaceRemoved(handle) => {
                let removed = self.registry.remove_handle(handle);
                if !removed.is_empty() {
                    self.log
                        .debug_msg(format!("Surface {handle} removed ({})", removed.join(", ")));
                    self.refresh_sessions(true, now);
                }
            }
            HostEvent::SurfaceDetached(handle) => {
                if let Some(tag) = self.registry.mark_closing(handle) {
                    self.log.debug_msg(format!("Session {tag} disconnected"));
                }
            }
            HostEvent::NotificationActivated(id) => {
                let tag = self.notifications.get(&id).cloned().flatten();
                if let Some(tag) = tag {
                    if self.conn.is_active() {
                        self.send(Outbound::RaiseSession(tag));
                    }
                }
                if let Err(e) = self.host.notifier.dismiss(&id) {
                    self.log.error(format!("Cannot dismiss notification: {e}"));
                }
            }
            HostEvent::NotificationClosed(id) => {
                self.notifications.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::clipboard::EMPTY_SENTINEL;
    use crate::bridge::context::Effect;
    use crate::bridge::context::tests::{active, frame, settle};
    use crate::host::RequestId;
    use crate::host::fake::{Call, FakeLog};
    use crate::ipc::protocol::HOST_TAG;

    fn sent(b: &mut Bridge) -> Vec<String> {
        b.take_effects()
            .into_iter()
            .filter_map(|e| match e {
                Effect::Send(frame) => Some(frame.to_string()),
                _ => None,
            })
            .collect()
    }

    fn feed(b: &mut Bridge, text: &str, now: Instant) -> Vec<String> {
        b.on_frame(frame(text), now);
        settle(b, now);
        sent(b)
    }

    /// Raise `:1` as a window and complete its creation with handle 10.
    fn live_window(b: &mut Bridge, host: &FakeLog, now: Instant) -> SurfaceHandle {
        feed(b, "X:1-w", now);
        let request = host
            .calls()
            .iter()
            .find_map(|c| match c {
                Call::Create(r) => Some(r.request),
                _ => None,
            })
            .unwrap();
        let handle = SurfaceHandle(10);
        b.on_host_event(
            HostEvent::SurfaceCreated {
                request,
                result: Ok(handle),
            },
            now,
        );
        b.take_effects();
        host.clear_calls();
        handle
    }

    // -- Clipboard --

    #[test]
    fn write_then_read_round_trip() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        assert_eq!(feed(&mut b, "Whello", now), vec!["WOK"]);
        assert_eq!(host.clipboard(), "hello");
        assert_eq!(feed(&mut b, "R", now), vec!["Rhello"]);
    }

    #[test]
    fn empty_write_uses_sentinel() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        assert_eq!(feed(&mut b, "W", now), vec!["WOK"]);
        assert_eq!(host.clipboard(), EMPTY_SENTINEL);
        assert_eq!(feed(&mut b, "R", now), vec!["R"]);
    }

    #[test]
    fn sentinel_set_by_someone_else_is_returned_verbatim() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        host.set_clipboard(EMPTY_SENTINEL);
        assert_eq!(feed(&mut b, "R", now), vec![format!("R{EMPTY_SENTINEL}")]);
    }

    #[test]
    fn identical_write_is_skipped() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        host.set_clipboard("same");
        assert_eq!(feed(&mut b, "Wsame", now), vec!["WOK"]);
        assert_eq!(host.clipboard_writes(), 0);
    }

    #[test]
    fn failing_read_keeps_later_commands_flowing() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        host.0.lock().unwrap().fail_clipboard = true;
        b.on_frame(frame("R"), now);
        b.on_frame(frame("Pnext"), now);
        settle(&mut b, now);
        assert_eq!(sent(&mut b), vec!["EError: clipboard unavailable", "Pnext"]);
    }

    #[test]
    fn failing_read_replies_error() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        host.0.lock().unwrap().fail_clipboard = true;
        assert_eq!(
            feed(&mut b, "R", now),
            vec!["EError: clipboard unavailable"]
        );
    }

    // -- URLs and pings --

    #[test]
    fn open_absolute_url() {
        let now = Instant::now();
        let (mut b, host) = active(1, now);
        assert_eq!(feed(&mut b, "Uhttps://example.com", now), vec!["UOK"]);
        assert_eq!(host.calls(), vec![Call::OpenUrl("https://example.com".into())]);
    }

    #[test]
    fn relative_url_is_refused() {
        let now = Instant::now();
        let (mut b, host) = active(1, now);
        assert_eq!(
            feed(&mut b, "Uexample.com", now),
            vec!["EError: URL must be absolute"]
        );
        assert!(host.calls().is_empty());
    }

    #[test]
    fn ping_echoes_payload() {
        let now = Instant::now();
        let (mut b, _) = active(1, now);
        assert_eq!(feed(&mut b, "Pabc\n123", now), vec!["Pabc\n123"]);
    }

    #[test]
    fn server_error_keeps_connection_and_checks_update() {
        let now = Instant::now();
        let (mut b, _) = active(1, now);
        b.on_frame(frame("Eoops"), now);
        let effects = b.take_effects();
        assert!(effects.contains(&Effect::CheckUpdate));
        assert!(!effects.contains(&Effect::Close));
        assert!(b.preferences().enabled);
    }

    #[test]
    fn unknown_code_is_answered_then_violation() {
        let now = Instant::now();
        let (mut b, _) = active(2, now);
        b.on_frame(frame("Zwhat"), now);
        let effects = b.take_effects();
        assert!(matches!(&effects[0], Effect::Send(Outbound::Error(m)) if m.starts_with("Invalid packet")));
        assert!(effects.contains(&Effect::Close));
        assert!(!b.preferences().enabled);
    }

    // -- Surfaces --

    #[test]
    fn raise_creates_then_reports_focus() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        let replies = feed(&mut b, "X:1-w", now);
        assert_eq!(replies[0], "XOK");
        let Call::Create(request) = &host.calls()[0] else {
            panic!("expected create");
        };
        assert_eq!(request.tag, ":1");
        assert_eq!(request.mode, SurfaceMode::Window);
        assert!(matches!(
            b.registry().get(":1").unwrap().liveness,
            Liveness::Pending(_)
        ));

        b.on_host_event(
            HostEvent::SurfaceCreated {
                request: request.request,
                result: Ok(SurfaceHandle(4)),
            },
            now,
        );
        assert_eq!(sent(&mut b), vec!["Cs:1"]);
        assert_eq!(b.registry().focus(), ":1");
    }

    #[test]
    fn raise_while_pending_does_not_create_twice() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        feed(&mut b, "X:1", now);
        feed(&mut b, "X:1-t", now);
        let creates = host
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Create(_)))
            .count();
        assert_eq!(creates, 1);
    }

    #[test]
    fn raise_live_focuses_and_promotes_maximized() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        let h = live_window(&mut b, &host, now);
        host.set_window_state(h, WindowState::Maximized);
        feed(&mut b, "X:1", now);
        assert_eq!(
            host.calls(),
            vec![
                Call::SetState(h, WindowState::Fullscreen),
                Call::Focus(h)
            ]
        );
    }

    #[test]
    fn raise_host_minimizes_windows() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        let h = live_window(&mut b, &host, now);
        host.set_window_state(h, WindowState::Fullscreen);
        let replies = feed(&mut b, "X", now);
        assert_eq!(replies[0], "XOK");
        assert_eq!(
            host.calls(),
            vec![
                Call::SetState(h, WindowState::Maximized),
                Call::SetState(h, WindowState::Minimized)
            ]
        );
    }

    #[test]
    fn raise_invalid_display_keeps_connection() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        b.on_frame(frame("Xevil"), now);
        let effects = b.take_effects();
        assert_eq!(
            effects,
            vec![Effect::Send(Outbound::Error("Error: invalid display".into()))]
        );
        assert!(host.calls().is_empty());
    }

    #[test]
    fn raise_forces_refresh() {
        let now = Instant::now();
        let (mut b, _) = active(2, now);
        let replies = feed(&mut b, "X:2-t", now + std::time::Duration::from_secs(1));
        assert_eq!(
            replies,
            vec!["XOK".to_string(), format!("Cs{HOST_TAG}"), "Cl".to_string()]
        );
    }

    #[test]
    fn unknown_mode_falls_back_to_fullscreen() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        feed(&mut b, "X:3-Q", now);
        let Call::Create(request) = &host.calls()[0] else {
            panic!("expected create");
        };
        assert_eq!(request.mode, SurfaceMode::Fullscreen);
    }

    #[test]
    fn failed_creation_marks_removed() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        host.0.lock().unwrap().fail_create = true;
        feed(&mut b, "X:1", now);
        assert_eq!(b.registry().get(":1").unwrap().liveness, Liveness::Removed);
    }

    #[test]
    fn stale_creation_closes_orphan() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        b.on_host_event(
            HostEvent::SurfaceCreated {
                request: RequestId(99),
                result: Ok(SurfaceHandle(7)),
            },
            now,
        );
        assert_eq!(host.calls(), vec![Call::Close(SurfaceHandle(7))]);
        assert!(sent(&mut b).is_empty());
    }

    #[test]
    fn creation_after_removal_is_not_resurrected() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        feed(&mut b, "X:1", now);
        let Call::Create(request) = host.calls()[0].clone() else {
            panic!("expected create");
        };
        b.on_host_event(
            HostEvent::SurfaceCreated {
                request: request.request,
                result: Err(crate::host::HostError::Surface("gone".into())),
            },
            now,
        );
        b.on_host_event(
            HostEvent::SurfaceCreated {
                request: request.request,
                result: Ok(SurfaceHandle(3)),
            },
            now,
        );
        assert_eq!(b.registry().get(":1").unwrap().liveness, Liveness::Removed);
        assert!(host.calls().contains(&Call::Close(SurfaceHandle(3))));
    }

    #[test]
    fn focus_changes_are_reported_once() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        let h = live_window(&mut b, &host, now);
        b.on_host_event(HostEvent::FocusChanged(None), now);
        assert_eq!(sent(&mut b), vec![format!("Cs{HOST_TAG}")]);
        b.on_host_event(HostEvent::FocusChanged(Some(h)), now);
        b.on_host_event(HostEvent::FocusChanged(Some(h)), now);
        assert_eq!(sent(&mut b), vec!["Cs:1"]);
    }

    #[test]
    fn blur_arriving_after_next_focus_is_ignored() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        let first = live_window(&mut b, &host, now);
        feed(&mut b, "X:2-w", now);
        let request = host
            .calls()
            .iter()
            .find_map(|c| match c {
                Call::Create(r) => Some(r.request),
                _ => None,
            })
            .unwrap();
        let second = SurfaceHandle(11);
        b.on_host_event(
            HostEvent::SurfaceCreated {
                request,
                result: Ok(second),
            },
            now,
        );
        b.on_host_event(HostEvent::FocusChanged(Some(first)), now);
        b.take_effects();

        b.on_host_event(HostEvent::FocusChanged(Some(second)), now);
        b.on_host_event(HostEvent::FocusLost(first), now);
        assert_eq!(sent(&mut b), vec!["Cs:2"]);
        assert_eq!(b.registry().focus(), ":2");

        b.on_host_event(HostEvent::FocusLost(second), now);
        assert_eq!(sent(&mut b), vec![format!("Cs{HOST_TAG}")]);
    }

    #[test]
    fn debug_mode_reaches_new_surfaces() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        b.set_debug(true);
        feed(&mut b, "X:4", now);
        let debug = host.calls().iter().find_map(|c| match c {
            Call::Create(r) => Some(r.debug),
            _ => None,
        });
        assert_eq!(debug, Some(true));
    }

    #[test]
    fn focus_not_reported_on_version_one() {
        let now = Instant::now();
        let (mut b, host) = active(1, now);
        let h = live_window(&mut b, &host, now);
        b.on_host_event(HostEvent::FocusChanged(None), now);
        b.on_host_event(HostEvent::FocusChanged(Some(h)), now);
        assert!(sent(&mut b).is_empty());
    }

    #[test]
    fn removal_forces_refresh() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        let h = live_window(&mut b, &host, now);
        b.on_host_event(HostEvent::SurfaceRemoved(h), now);
        assert_eq!(sent(&mut b), vec!["Cs:1", "Cl"]);
        assert_eq!(b.registry().get(":1").unwrap().liveness, Liveness::Removed);
    }

    #[test]
    fn closing_surface_is_recreated_on_raise() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        let h = live_window(&mut b, &host, now);
        b.on_host_event(HostEvent::SurfaceDetached(h), now);
        feed(&mut b, "X:1", now);
        assert!(host.calls().iter().any(|c| matches!(c, Call::Create(_))));
    }

    #[test]
    fn session_list_retitles_live_surfaces() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        let h = live_window(&mut b, &host, now);
        assert!(feed(&mut b, "C:1* Terminal\nevil Nope\n:2 Editor", now).is_empty());
        assert_eq!(host.calls(), vec![Call::SetTitle(h, "Terminal".into())]);
        assert_eq!(b.registry().listing().len(), 2);
    }

    #[test]
    fn empty_session_frame_is_cycle_ack() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        assert!(feed(&mut b, "C", now).is_empty());
        assert!(host.calls().is_empty());
    }

    #[test]
    fn hidpi_change_reaches_live_surfaces() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        let h = live_window(&mut b, &host, now);
        b.set_hidpi(true);
        assert_eq!(host.calls(), vec![Call::SetHidpi(h, true)]);
    }

    // -- Notifications --

    #[test]
    fn notification_strips_private_fields() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        feed(&mut b, "C:1 Terminal", now);
        let replies = feed(
            &mut b,
            r#"N{"id":"x","display-tag":":1","title":"Build done","message":"ok"}"#,
            now,
        );
        assert_eq!(replies, vec!["NOK"]);
        let state = host.0.lock().unwrap();
        let n = &state.notifications[0];
        assert!(!n.options.contains_key("id"));
        assert!(!n.options.contains_key("display-tag"));
        assert_eq!(n.options["title"], "Build done");
        assert_eq!(n.context.as_deref(), Some("From Terminal (:1)"));
    }

    #[test]
    fn notification_with_bad_tag_has_no_context() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        feed(&mut b, r#"N{"display-tag":"evil","title":"t"}"#, now);
        assert_eq!(host.calls(), vec![Call::Show(None)]);
    }

    #[test]
    fn invalid_notification_is_rejected() {
        let now = Instant::now();
        let (mut b, _) = active(2, now);
        assert_eq!(
            feed(&mut b, "Nnot json", now),
            vec!["EError: invalid notification"]
        );
        assert_eq!(
            feed(&mut b, "N[1,2]", now),
            vec!["EError: invalid notification"]
        );
    }

    #[test]
    fn activation_raises_session_and_dismisses() {
        let now = Instant::now();
        let (mut b, host) = active(2, now);
        feed(&mut b, r#"N{"display-tag":":2","title":"t"}"#, now);
        host.clear_calls();
        b.on_host_event(HostEvent::NotificationActivated("n1".into()), now);
        assert_eq!(sent(&mut b), vec!["X:2"]);
        assert_eq!(host.calls(), vec![Call::Dismiss("n1".into())]);
    }

    #[test]
    fn closed_notification_is_forgotten() {
        let now = Instant::now();
        let (mut b, _) = active(2, now);
        feed(&mut b, r#"N{"display-tag":":2","title":"t"}"#, now);
        b.on_host_event(HostEvent::NotificationClosed("n1".into()), now);
        b.on_host_event(HostEvent::NotificationActivated("n1".into()), now);
        assert!(sent(&mut b).is_empty());
    }
}
