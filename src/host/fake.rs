//! In-memory host adapters for tests.
//!
//! Every call is recorded in a shared [`FakeLog`] so tests can assert on
//! the exact adapter traffic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::{self, BoxFuture};
use futures::FutureExt;

use super::{
    ClipboardProvider, HostError, HostSet, Notification, NotificationId, Notifier,
    SurfaceHandle, SurfaceHost, SurfaceRequest, WindowState,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ClipboardWrite(String),
    Create(SurfaceRequest),
    Focus(SurfaceHandle),
    SetState(SurfaceHandle, WindowState),
    SetTitle(SurfaceHandle, String),
    SetHidpi(SurfaceHandle, bool),
    Close(SurfaceHandle),
    OpenUrl(String),
    Show(Option<String>),
    Dismiss(String),
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub clipboard: String,
    pub calls: Vec<Call>,
    pub window_states: HashMap<SurfaceHandle, WindowState>,
    pub notifications: Vec<Notification>,
    pub fail_create: bool,
    pub fail_clipboard: bool,
    next_notification: u64,
}

/// Shared handle onto the fake host's state.
#[derive(Debug, Clone, Default)]
pub struct FakeLog(pub Arc<Mutex<FakeState>>);

impl FakeLog {
    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.0.lock().unwrap().calls.clear();
    }

    pub fn clipboard(&self) -> String {
        self.0.lock().unwrap().clipboard.clone()
    }

    pub fn set_clipboard(&self, text: &str) {
        self.0.lock().unwrap().clipboard = text.to_string();
    }

    pub fn set_window_state(&self, handle: SurfaceHandle, state: WindowState) {
        self.0.lock().unwrap().window_states.insert(handle, state);
    }

    pub fn clipboard_writes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::ClipboardWrite(_)))
            .count()
    }

    fn record(&self, call: Call) {
        self.0.lock().unwrap().calls.push(call);
    }
}

/// Completes every call on first poll.
struct FakeClipboard(FakeLog);

impl ClipboardProvider for FakeClipboard {
    fn read(&self) -> BoxFuture<'static, Result<String, HostError>> {
        let state = self.0.0.lock().unwrap();
        let result = if state.fail_clipboard {
            Err(HostError::Clipboard("unavailable".into()))
        } else {
            Ok(state.clipboard.clone())
        };
        future::ready(result).boxed()
    }

    fn write(&self, text: String) -> BoxFuture<'static, Result<(), HostError>> {
        let log = self.0.clone();
        async move {
            log.record(Call::ClipboardWrite(text.clone()));
            log.0.lock().unwrap().clipboard = text;
            Ok(())
        }
        .boxed()
    }
}

struct FakeSurfaces(FakeLog);

impl SurfaceHost for FakeSurfaces {
    fn create(&self, request: SurfaceRequest) -> Result<(), HostError> {
        let fail = self.0.0.lock().unwrap().fail_create;
        self.0.record(Call::Create(request));
        if fail {
            return Err(HostError::Surface("create refused".into()));
        }
        Ok(())
    }

    fn focus(&self, handle: SurfaceHandle) -> Result<(), HostError> {
        self.0.record(Call::Focus(handle));
        Ok(())
    }

    fn window_state(&self, handle: SurfaceHandle) -> Result<WindowState, HostError> {
        Ok(self
            .0
            .0
            .lock()
            .unwrap()
            .window_states
            .get(&handle)
            .copied()
            .unwrap_or_default())
    }

    fn set_window_state(
        &self,
        handle: SurfaceHandle,
        state: WindowState,
    ) -> Result<(), HostError> {
        self.0.record(Call::SetState(handle, state));
        self.0.set_window_state(handle, state);
        Ok(())
    }

    fn set_title(&self, handle: SurfaceHandle, title: &str) -> Result<(), HostError> {
        self.0.record(Call::SetTitle(handle, title.to_string()));
        Ok(())
    }

    fn set_hidpi(&self, handle: SurfaceHandle, hidpi: bool) -> Result<(), HostError> {
        self.0.record(Call::SetHidpi(handle, hidpi));
        Ok(())
    }

    fn close(&self, handle: SurfaceHandle) -> Result<(), HostError> {
        self.0.record(Call::Close(handle));
        Ok(())
    }

    fn open_url(&self, url: &str) -> Result<(), HostError> {
        self.0.record(Call::OpenUrl(url.to_string()));
        Ok(())
    }
}

struct FakeNotifier(FakeLog);

impl Notifier for FakeNotifier {
    fn show(&self, notification: &Notification) -> Result<NotificationId, HostError> {
        self.0.record(Call::Show(notification.context.clone()));
        let mut state = self.0.0.lock().unwrap();
        state.notifications.push(notification.clone());
        state.next_notification += 1;
        Ok(format!("n{}", state.next_notification))
    }

    fn dismiss(&self, id: &str) -> Result<(), HostError> {
        self.0.record(Call::Dismiss(id.to_string()));
        Ok(())
    }
}

/// Build a host set backed by one shared fake log.
pub fn host_set() -> (HostSet, FakeLog) {
    let log = FakeLog::default();
    let set = HostSet {
        clipboard: Arc::new(FakeClipboard(log.clone())),
        surfaces: Box::new(FakeSurfaces(log.clone())),
        notifier: Box::new(FakeNotifier(log.clone())),
    };
    (set, log)
}
