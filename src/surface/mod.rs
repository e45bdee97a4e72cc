//! Per-surface sub-protocol between a host surface and the graphics
//! module embedded in it.
//!
//! [`SurfaceController`] is a pure state machine. It consumes module
//! messages and host window events and answers with [`SurfaceAction`]s;
//! whoever owns the surface performs them and drives its timers.
//!
//! Module messages are `type:payload` strings. A message without a colon
//! is debug text.

pub mod launch;

use std::fmt;
use std::time::Duration;

use crate::host::WindowState;
use crate::ipc::protocol::SurfaceMode;

use launch::LaunchParams;

/// Delay between a remote disconnect and the surface closing itself.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Minimum spacing of resize messages sent to the module.
pub const RESIZE_RATE_LIMIT: Duration = Duration::from_millis(300);

/// Module debug level used when debug mode is on.
pub const DEBUG_LEVEL: u8 = 2;

/// Messages sent to the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleMessage {
    Debug(u8),
    Hidpi(bool),
    /// Numeric display id. Sending it starts the remote session.
    Display(String),
    Resize { width: u32, height: u32 },
    Focus,
    Blur,
    Hide,
}

impl fmt::Display for ModuleMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleMessage::Debug(level) => write!(f, "debug:{level}"),
            ModuleMessage::Hidpi(on) => write!(f, "hidpi:{}", u8::from(*on)),
            ModuleMessage::Display(display) => write!(f, "display:{display}"),
            ModuleMessage::Resize { width, height } => write!(f, "resize:{width}/{height}"),
            ModuleMessage::Focus => f.write_str("focus:"),
            ModuleMessage::Blur => f.write_str("blur:"),
            ModuleMessage::Hide => f.write_str("hide:"),
        }
    }
}

/// Messages received from the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleEvent {
    Debug(String),
    Status(String),
    Warning(String),
    Error(String),
    Connected,
    Disconnected,
    ToggleFullscreen,
    Hide,
    /// The module switched to this resolution.
    Resized { width: u32, height: u32 },
    Unknown(String),
}

impl ModuleEvent {
    pub fn parse(message: &str) -> Self {
        let (kind, payload) = match message.find(':') {
            Some(i) if i > 0 => (&message[..i], &message[i + 1..]),
            _ => return ModuleEvent::Debug(message.to_string()),
        };
        match (kind, payload) {
            ("debug", p) => ModuleEvent::Debug(p.to_string()),
            ("status", p) => ModuleEvent::Status(p.to_string()),
            ("warning", p) => ModuleEvent::Warning(p.to_string()),
            ("error", p) => ModuleEvent::Error(p.to_string()),
            ("connected", _) => ModuleEvent::Connected,
            ("disconnected", _) => ModuleEvent::Disconnected,
            ("state", "fullscreen") => ModuleEvent::ToggleFullscreen,
            ("state", "hide") => ModuleEvent::Hide,
            ("resize", p) => match parse_size(p) {
                Some((width, height)) => ModuleEvent::Resized { width, height },
                None => ModuleEvent::Unknown(message.to_string()),
            },
            _ => ModuleEvent::Unknown(message.to_string()),
        }
    }
}

/// Parse `<w>/<h>`.
pub fn parse_size(payload: &str) -> Option<(u32, u32)> {
    let (w, h) = payload.split_once('/')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

/// Focus and visibility of the host surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Focused,
    Blurred,
    Hidden,
}

/// Work for the surface owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceAction {
    Post(ModuleMessage),
    SetWindowState(WindowState),
    /// Call [`SurfaceController::on_resize_timer`] after this delay.
    ArmResizeTimer(Duration),
    /// Call [`SurfaceController::on_close_timer`] after this delay.
    ScheduleClose(Duration),
    Close,
    /// The remote session ended; the surface no longer presents it.
    Unregister,
}

/// One trailing update per window: the first resize goes out at once,
/// later ones only remember the newest size until the timer fires.
#[derive(Debug, Default)]
struct ResizeLimiter {
    limited: bool,
    pending: Option<(u32, u32)>,
}

impl ResizeLimiter {
    /// Returns the size to send now, if any, and whether to arm the timer.
    fn offer(&mut self, size: (u32, u32)) -> Option<(u32, u32)> {
        if self.limited {
            self.pending = Some(size);
            return None;
        }
        self.limited = true;
        Some(size)
    }

    /// Timer fired. Returns a size to send, in which case the timer must
    /// be re-armed.
    fn fire(&mut self) -> Option<(u32, u32)> {
        let next = self.pending.take();
        self.limited = next.is_some();
        next
    }
}

#[derive(Debug)]
pub struct SurfaceController {
    params: LaunchParams,
    debug_level: u8,
    loaded: bool,
    connected: bool,
    closing: bool,
    error: bool,
    status: Option<String>,
    warnings: Vec<String>,
    errors: Vec<String>,
    state: WindowState,
    /// State to restore when leaving fullscreen.
    prev_state: WindowState,
    /// Last size reported by the host.
    size: Option<(u32, u32)>,
    /// Resolution the module last acknowledged.
    module_size: Option<(u32, u32)>,
    resize: ResizeLimiter,
}

impl SurfaceController {
    pub fn new(params: LaunchParams) -> Self {
        let debug_level = if params.debug { DEBUG_LEVEL } else { 0 };
        Self {
            params,
            debug_level,
            loaded: false,
            connected: false,
            closing: false,
            error: false,
            status: None,
            warnings: Vec::new(),
            errors: Vec::new(),
            state: WindowState::Normal,
            prev_state: WindowState::Maximized,
            size: None,
            module_size: None,
            resize: ResizeLimiter::default(),
        }
    }

    pub fn tag(&self) -> String {
        self.params.tag()
    }

    pub fn title(&self) -> String {
        format!("{} ({})", self.params.title, self.params.tag())
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn module_size(&self) -> Option<(u32, u32)> {
        self.module_size
    }

    /// The module finished loading. The display id goes last.
    pub fn on_load(&mut self) -> Vec<SurfaceAction> {
        self.loaded = true;
        self.set_status(Some("Starting...".into()));
        let mut actions = Vec::new();
        if self.params.mode == SurfaceMode::Fullscreen {
            actions.push(self.apply_state(WindowState::Fullscreen));
        }
        actions.extend([
            SurfaceAction::Post(ModuleMessage::Debug(self.debug_level)),
            SurfaceAction::Post(ModuleMessage::Hidpi(self.params.hidpi)),
            SurfaceAction::Post(ModuleMessage::Display(self.params.display.clone())),
        ]);
        actions
    }

    /// The module failed to load or crashed.
    pub fn on_crash(&mut self, message: &str) -> Vec<SurfaceAction> {
        self.show_error(message.to_string());
        vec![SurfaceAction::Unregister]
    }

    pub fn set_hidpi(&mut self, hidpi: bool) -> Vec<SurfaceAction> {
        self.params.hidpi = hidpi;
        self.resend(ModuleMessage::Hidpi(hidpi))
    }

    /// Returns the new window title.
    pub fn set_title(&mut self, title: &str) -> String {
        self.params.title = title.to_string();
        self.title()
    }

    /// A setting changed: tell the module, then ask for a fresh resolution.
    fn resend(&mut self, message: ModuleMessage) -> Vec<SurfaceAction> {
        if !self.loaded {
            return Vec::new();
        }
        let mut actions = vec![SurfaceAction::Post(message)];
        if let Some((width, height)) = self.size {
            actions.push(SurfaceAction::Post(ModuleMessage::Resize { width, height }));
        }
        actions
    }

    /// The host resized the surface.
    pub fn on_resize(&mut self, width: u32, height: u32) -> Vec<SurfaceAction> {
        self.size = Some((width, height));
        if !self.loaded {
            return Vec::new();
        }
        match self.resize.offer((width, height)) {
            Some((width, height)) => vec![
                SurfaceAction::Post(ModuleMessage::Resize { width, height }),
                SurfaceAction::ArmResizeTimer(RESIZE_RATE_LIMIT),
            ],
            None => Vec::new(),
        }
    }

    pub fn on_resize_timer(&mut self) -> Vec<SurfaceAction> {
        match self.resize.fire() {
            Some((width, height)) => vec![
                SurfaceAction::Post(ModuleMessage::Resize { width, height }),
                SurfaceAction::ArmResizeTimer(RESIZE_RATE_LIMIT),
            ],
            None => Vec::new(),
        }
    }

    pub fn on_visibility(&mut self, visibility: Visibility) -> Vec<SurfaceAction> {
        if !self.loaded {
            return Vec::new();
        }
        match visibility {
            Visibility::Focused => vec![SurfaceAction::Post(ModuleMessage::Focus)],
            _ if self.closing => vec![SurfaceAction::Close],
            Visibility::Blurred => vec![SurfaceAction::Post(ModuleMessage::Blur)],
            Visibility::Hidden => vec![SurfaceAction::Post(ModuleMessage::Hide)],
        }
    }

    pub fn on_close_timer(&mut self) -> Vec<SurfaceAction> {
        vec![SurfaceAction::Close]
    }

    /// The host changed the window state.
    pub fn on_window_state(&mut self, state: WindowState) {
        self.state = state;
    }

    /// Change the window state on request of the bridge.
    pub fn set_window_state(&mut self, state: WindowState) -> SurfaceAction {
        self.apply_state(state)
    }

    fn apply_state(&mut self, state: WindowState) -> SurfaceAction {
        self.state = state;
        SurfaceAction::SetWindowState(state)
    }

    pub fn on_module_message(&mut self, message: &str) -> Vec<SurfaceAction> {
        let tag = self.tag();
        match ModuleEvent::parse(message) {
            ModuleEvent::Debug(text) => {
                tracing::debug!(%tag, "module: {text}");
                Vec::new()
            }
            ModuleEvent::Status(text) => {
                self.set_status(Some(text));
                Vec::new()
            }
            ModuleEvent::Warning(text) => {
                tracing::warn!(%tag, "module warning: {text}");
                self.warnings.push(text);
                Vec::new()
            }
            ModuleEvent::Error(text) => {
                self.show_error(text);
                Vec::new()
            }
            ModuleEvent::Connected => {
                self.connected = true;
                self.set_status(None);
                Vec::new()
            }
            ModuleEvent::Disconnected => self.on_disconnected(),
            ModuleEvent::ToggleFullscreen => {
                let next = if self.state == WindowState::Fullscreen {
                    self.prev_state
                } else {
                    self.prev_state = self.state;
                    WindowState::Fullscreen
                };
                vec![self.apply_state(next)]
            }
            ModuleEvent::Hide => {
                let mut actions = Vec::new();
                if self.state == WindowState::Fullscreen {
                    actions.push(self.apply_state(WindowState::Maximized));
                }
                actions.push(self.apply_state(WindowState::Minimized));
                actions
            }
            ModuleEvent::Resized { width, height } => {
                self.module_size = Some((width, height));
                Vec::new()
            }
            ModuleEvent::Unknown(text) => {
                tracing::debug!(%tag, "ignoring module message {text:?}");
                Vec::new()
            }
        }
    }

    fn on_disconnected(&mut self) -> Vec<SurfaceAction> {
        self.connected = false;
        let mut actions = vec![SurfaceAction::Unregister];
        if self.debug_level == 0 && !self.error {
            self.closing = true;
            self.set_status(Some(format!(
                "Disconnected, closing window in {} seconds.",
                CLOSE_TIMEOUT.as_secs()
            )));
            actions.push(SurfaceAction::ScheduleClose(CLOSE_TIMEOUT));
        } else {
            self.set_status(Some("Disconnected, please close the window.".into()));
        }
        actions
    }

    fn set_status(&mut self, status: Option<String>) {
        if let Some(text) = &status {
            tracing::info!(tag = %self.params.tag(), "surface status: {text}");
        }
        self.status = status;
    }

    fn show_error(&mut self, message: String) {
        tracing::error!(tag = %self.params.tag(), "surface error: {message}");
        self.error = true;
        self.status = None;
        self.errors.push(message);
    }
}
