//! Host capability adapters: clipboard, surfaces, notifications.
//!
//! The protocol engine never touches the host directly. It calls these
//! traits and receives asynchronous outcomes as [`HostEvent`]s on the
//! bridge event channel. Calls are fire-and-continue: a method
//! returning `Ok` only means the request was issued. Clipboard access
//! is the exception; it hands back a future for the caller to await.

pub mod clipboard;
pub mod exec;
pub mod notify;

#[cfg(test)]
pub mod fake;

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::ipc::protocol::SurfaceMode;

pub use clipboard::XclipClipboard;
pub use exec::ExecSurfaceHost;
pub use notify::NotifySend;

/// Errors returned by host adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("clipboard: {0}")]
    Clipboard(String),

    #[error("surface: {0}")]
    Surface(String),

    #[error("unknown surface {0}")]
    UnknownSurface(SurfaceHandle),

    #[error("notification: {0}")]
    Notification(String),
}

/// Opaque identifier of a live host surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceHandle(pub u64);

impl fmt::Display for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a pending surface creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

/// Adapter-issued notification identifier.
pub type NotificationId = String;

/// Window state as reported by the host window system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowState {
    #[default]
    Normal,
    Maximized,
    Fullscreen,
    Minimized,
}

impl WindowState {
    pub fn as_str(self) -> &'static str {
        match self {
            WindowState::Normal => "normal",
            WindowState::Maximized => "maximized",
            WindowState::Fullscreen => "fullscreen",
            WindowState::Minimized => "minimized",
        }
    }
}

/// Everything a host needs to realize a new surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceRequest {
    pub request: RequestId,
    pub tag: String,
    pub title: String,
    pub debug: bool,
    pub hidpi: bool,
    pub mode: SurfaceMode,
}

/// A notification forwarded to the notification adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Server-provided options, minus the private fields.
    pub options: serde_json::Map<String, serde_json::Value>,
    /// Human-readable line naming the originating session.
    pub context: Option<String>,
}

/// Asynchronous outcomes reported by the host adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A creation request finished.
    SurfaceCreated {
        request: RequestId,
        result: Result<SurfaceHandle, HostError>,
    },
    /// Input focus moved; `None` means focus left every managed surface.
    FocusChanged(Option<SurfaceHandle>),
    /// One surface lost input focus. Unlike `FocusChanged(None)` this
    /// says nothing about where focus went.
    FocusLost(SurfaceHandle),
    /// A surface was closed by any means.
    SurfaceRemoved(SurfaceHandle),
    /// A surface's remote session ended; the surface is about to close.
    SurfaceDetached(SurfaceHandle),
    /// The user activated a notification.
    NotificationActivated(NotificationId),
    /// A notification was closed by any means.
    NotificationClosed(NotificationId),
}

/// Reads and writes the system clipboard.
///
/// Both calls may block on the selection owner, so they return futures
/// that the event loop polls alongside everything else.
pub trait ClipboardProvider: Send + Sync {
    fn read(&self) -> BoxFuture<'static, Result<String, HostError>>;

    fn write(&self, text: String) -> BoxFuture<'static, Result<(), HostError>>;
}

/// Host window/tab management.
pub trait SurfaceHost: Send + Sync {
    /// Start creating a surface. Completion arrives as
    /// [`HostEvent::SurfaceCreated`] carrying `request.request`.
    fn create(&self, request: SurfaceRequest) -> Result<(), HostError>;

    fn focus(&self, handle: SurfaceHandle) -> Result<(), HostError>;

    fn window_state(&self, handle: SurfaceHandle) -> Result<WindowState, HostError>;

    fn set_window_state(&self, handle: SurfaceHandle, state: WindowState)
    -> Result<(), HostError>;

    fn set_title(&self, handle: SurfaceHandle, title: &str) -> Result<(), HostError>;

    fn set_hidpi(&self, handle: SurfaceHandle, hidpi: bool) -> Result<(), HostError>;

    fn close(&self, handle: SurfaceHandle) -> Result<(), HostError>;

    /// Open a URL in the host's default handler.
    fn open_url(&self, url: &str) -> Result<(), HostError>;
}

/// Desktop notifications.
pub trait Notifier: Send + Sync {
    fn show(&self, notification: &Notification) -> Result<NotificationId, HostError>;

    fn dismiss(&self, id: &str) -> Result<(), HostError>;
}

/// The composed set of host adapters handed to the bridge.
pub struct HostSet {
    pub clipboard: Arc<dyn ClipboardProvider>,
    pub surfaces: Box<dyn SurfaceHost>,
    pub notifier: Box<dyn Notifier>,
}
