//! Surface host backed by external viewer processes.
//!
//! Each surface is one viewer process started as `<viewer...> <query>`,
//! where the query carries the launch parameters. The viewer's stdin and
//! stdout are newline-delimited text:
//!
//! - Plain lines are module messages (`type:payload`) in both directions.
//! - Lines starting with `host:` are window-system traffic. The viewer
//!   reports `focus`, `blur`, `hidden`, `resize <w>/<h>` and
//!   `state <state>`; we send `focus`, `title <text>`, `state <state>`
//!   and `close`.
//!
//! A [`SurfaceController`] per viewer runs the module sub-protocol.

use std::collections::HashMap;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::{SinkExt, StreamExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::Sleep;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use super::{HostError, HostEvent, SurfaceHandle, SurfaceHost, SurfaceRequest, WindowState};
use crate::surface::launch::LaunchParams;
use crate::surface::{SurfaceAction, SurfaceController, Visibility, parse_size};

/// Longest line accepted from a viewer.
const MAX_LINE: usize = 64 * 1024;

/// Requests from the bridge to one surface task.
#[derive(Debug)]
enum SurfaceCommand {
    Focus,
    SetTitle(String),
    SetHidpi(bool),
    SetState(WindowState),
    Close,
}

#[derive(Debug)]
struct SurfaceEntry {
    control: mpsc::UnboundedSender<SurfaceCommand>,
    state: WindowState,
}

type Surfaces = Arc<Mutex<HashMap<SurfaceHandle, SurfaceEntry>>>;

pub struct ExecSurfaceHost {
    viewer: Vec<String>,
    events: mpsc::UnboundedSender<HostEvent>,
    surfaces: Surfaces,
    next_handle: AtomicU64,
}

impl ExecSurfaceHost {
    /// `viewer` is the program and leading arguments; the launch query is
    /// appended as the final argument.
    pub fn new(viewer: Vec<String>, events: mpsc::UnboundedSender<HostEvent>) -> Self {
        Self {
            viewer,
            events,
            surfaces: Arc::new(Mutex::new(HashMap::new())),
            next_handle: AtomicU64::new(1),
        }
    }

    fn surfaces(&self) -> Result<MutexGuard<'_, HashMap<SurfaceHandle, SurfaceEntry>>, HostError> {
        self.surfaces
            .lock()
            .map_err(|_| HostError::Surface("surface table poisoned".into()))
    }

    fn command(&self, handle: SurfaceHandle, command: SurfaceCommand) -> Result<(), HostError> {
        let surfaces = self.surfaces()?;
        let entry = surfaces
            .get(&handle)
            .ok_or(HostError::UnknownSurface(handle))?;
        entry
            .control
            .send(command)
            .map_err(|_| HostError::UnknownSurface(handle))
    }
}

impl SurfaceHost for ExecSurfaceHost {
    fn create(&self, request: SurfaceRequest) -> Result<(), HostError> {
        let params =
            LaunchParams::from_request(&request).map_err(|e| HostError::Surface(e.to_string()))?;
        let (program, args) = self
            .viewer
            .split_first()
            .ok_or_else(|| HostError::Surface("no viewer configured".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .arg(params.to_query())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HostError::Surface(format!("failed to spawn {program}: {e}")))?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(HostError::Surface("viewer pipes unavailable".into()));
        };

        let handle = SurfaceHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        self.surfaces()?.insert(
            handle,
            SurfaceEntry {
                control: control_tx,
                state: WindowState::Normal,
            },
        );
        tracing::info!(%handle, tag = %params.tag(), "viewer started");

        let _ = self.events.send(HostEvent::SurfaceCreated {
            request: request.request,
            result: Ok(handle),
        });

        let task = SurfaceTask {
            handle,
            controller: SurfaceController::new(params),
            child,
            lines: FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE)),
            sink: FramedWrite::new(stdin, LinesCodec::new()),
            control_rx,
            resize_timer: None,
            close_timer: None,
            killed: false,
            events: self.events.clone(),
            surfaces: Arc::clone(&self.surfaces),
        };
        tokio::spawn(task.run());
        Ok(())
    }

    fn focus(&self, handle: SurfaceHandle) -> Result<(), HostError> {
        self.command(handle, SurfaceCommand::Focus)
    }

    fn window_state(&self, handle: SurfaceHandle) -> Result<WindowState, HostError> {
        self.surfaces()?
            .get(&handle)
            .map(|entry| entry.state)
            .ok_or(HostError::UnknownSurface(handle))
    }

    fn set_window_state(&self, handle: SurfaceHandle, state: WindowState) -> Result<(), HostError> {
        self.command(handle, SurfaceCommand::SetState(state))?;
        if let Some(entry) = self.surfaces()?.get_mut(&handle) {
            entry.state = state;
        }
        Ok(())
    }

    fn set_title(&self, handle: SurfaceHandle, title: &str) -> Result<(), HostError> {
        self.command(handle, SurfaceCommand::SetTitle(title.to_string()))
    }

    fn set_hidpi(&self, handle: SurfaceHandle, hidpi: bool) -> Result<(), HostError> {
        self.command(handle, SurfaceCommand::SetHidpi(hidpi))
    }

    fn close(&self, handle: SurfaceHandle) -> Result<(), HostError> {
        self.command(handle, SurfaceCommand::Close)
    }

    fn open_url(&self, url: &str) -> Result<(), HostError> {
        let mut child = Command::new("xdg-open")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| HostError::Surface(format!("failed to spawn xdg-open: {e}")))?;
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if !status.success() => {
                    tracing::warn!(%status, "xdg-open failed");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "failed to wait for xdg-open"),
            }
        });
        Ok(())
    }
}

/// Owns one viewer process until its stdout closes.
struct SurfaceTask {
    handle: SurfaceHandle,
    controller: SurfaceController,
    child: Child,
    lines: FramedRead<ChildStdout, LinesCodec>,
    sink: FramedWrite<ChildStdin, LinesCodec>,
    control_rx: mpsc::UnboundedReceiver<SurfaceCommand>,
    resize_timer: Option<Pin<Box<Sleep>>>,
    close_timer: Option<Pin<Box<Sleep>>>,
    /// We asked the viewer to go away; a non-zero exit is expected.
    killed: bool,
    events: mpsc::UnboundedSender<HostEvent>,
    surfaces: Surfaces,
}

impl SurfaceTask {
    async fn run(mut self) {
        let actions = self.controller.on_load();
        self.apply(actions).await;

        loop {
            tokio::select! {
                line = self.lines.next() => match line {
                    Some(Ok(line)) => {
                        let actions = match line.strip_prefix("host:") {
                            Some(event) => self.host_event(event),
                            None => self.controller.on_module_message(&line),
                        };
                        self.apply(actions).await;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(handle = %self.handle, error = %e, "bad viewer output");
                    }
                    None => break,
                },

                Some(command) = self.control_rx.recv() => {
                    let actions = self.command(command).await;
                    self.apply(actions).await;
                }

                () = wait_timer(&mut self.resize_timer) => {
                    self.resize_timer = None;
                    let actions = self.controller.on_resize_timer();
                    self.apply(actions).await;
                }

                () = wait_timer(&mut self.close_timer) => {
                    self.close_timer = None;
                    let actions = self.controller.on_close_timer();
                    self.apply(actions).await;
                }
            }
        }

        match self.child.wait().await {
            Ok(status) if !status.success() && !self.killed => {
                let actions = self.controller.on_crash(&format!("viewer exited: {status}"));
                self.apply(actions).await;
            }
            Ok(status) => tracing::info!(
                handle = %self.handle,
                %status,
                last_status = ?self.controller.status(),
                connected = self.controller.is_connected(),
                closing = self.controller.is_closing(),
                warnings = self.controller.warnings().len(),
                errors = self.controller.errors().len(),
                module_size = ?self.controller.module_size(),
                "viewer exited"
            ),
            Err(e) => tracing::warn!(handle = %self.handle, error = %e, "failed to reap viewer"),
        }
        if let Ok(mut surfaces) = self.surfaces.lock() {
            surfaces.remove(&self.handle);
        }
        let _ = self.events.send(HostEvent::SurfaceRemoved(self.handle));
    }

    /// Window-system event reported by the viewer.
    fn host_event(&mut self, event: &str) -> Vec<SurfaceAction> {
        let (kind, arg) = event.split_once(' ').unwrap_or((event, ""));
        match kind {
            "focus" => {
                let _ = self.events.send(HostEvent::FocusChanged(Some(self.handle)));
                self.controller.on_visibility(Visibility::Focused)
            }
            "blur" => {
                let _ = self.events.send(HostEvent::FocusLost(self.handle));
                self.controller.on_visibility(Visibility::Blurred)
            }
            "hidden" => self.controller.on_visibility(Visibility::Hidden),
            "resize" => match parse_size(arg) {
                Some((width, height)) => self.controller.on_resize(width, height),
                None => {
                    tracing::debug!(handle = %self.handle, arg, "bad resize event");
                    Vec::new()
                }
            },
            "state" => {
                if let Some(state) = parse_window_state(arg) {
                    self.controller.on_window_state(state);
                    self.record_state(state);
                }
                Vec::new()
            }
            _ => {
                tracing::debug!(handle = %self.handle, event, "unknown host event");
                Vec::new()
            }
        }
    }

    async fn command(&mut self, command: SurfaceCommand) -> Vec<SurfaceAction> {
        match command {
            SurfaceCommand::Focus => {
                self.write("host:focus".to_string()).await;
                Vec::new()
            }
            SurfaceCommand::SetTitle(title) => {
                let title = self.controller.set_title(&title);
                self.write(format!("host:title {title}")).await;
                Vec::new()
            }
            SurfaceCommand::SetHidpi(hidpi) => self.controller.set_hidpi(hidpi),
            SurfaceCommand::SetState(state) => vec![self.controller.set_window_state(state)],
            SurfaceCommand::Close => vec![SurfaceAction::Close],
        }
    }

    async fn apply(&mut self, actions: Vec<SurfaceAction>) {
        for action in actions {
            match action {
                SurfaceAction::Post(message) => self.write(message.to_string()).await,
                SurfaceAction::SetWindowState(state) => {
                    self.record_state(state);
                    self.write(format!("host:state {}", state.as_str())).await;
                }
                SurfaceAction::ArmResizeTimer(delay) => {
                    self.resize_timer = Some(Box::pin(tokio::time::sleep(delay)));
                }
                SurfaceAction::ScheduleClose(delay) => {
                    self.close_timer = Some(Box::pin(tokio::time::sleep(delay)));
                }
                SurfaceAction::Close => {
                    self.write("host:close".to_string()).await;
                    self.killed = true;
                    if let Err(e) = self.child.start_kill() {
                        tracing::debug!(handle = %self.handle, error = %e, "viewer already gone");
                    }
                }
                SurfaceAction::Unregister => {
                    let _ = self.events.send(HostEvent::SurfaceDetached(self.handle));
                }
            }
        }
    }

    async fn write(&mut self, line: String) {
        if let Err(e) = self.sink.send(line).await {
            tracing::debug!(handle = %self.handle, error = %e, "viewer stdin closed");
        }
    }

    fn record_state(&self, state: WindowState) {
        if let Ok(mut surfaces) = self.surfaces.lock() {
            if let Some(entry) = surfaces.get_mut(&self.handle) {
                entry.state = state;
            }
        }
    }
}

fn parse_window_state(s: &str) -> Option<WindowState> {
    match s {
        "normal" => Some(WindowState::Normal),
        "maximized" => Some(WindowState::Maximized),
        "fullscreen" => Some(WindowState::Fullscreen),
        "minimized" => Some(WindowState::Minimized),
        _ => None,
    }
}

async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer.as_mut() {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::host::RequestId;
    use crate::ipc::protocol::SurfaceMode;

    fn request(tag: &str) -> SurfaceRequest {
        SurfaceRequest {
            request: RequestId(7),
            tag: tag.into(),
            title: "Desktop".into(),
            debug: false,
            hidpi: false,
            mode: SurfaceMode::Window,
        }
    }

    fn viewer(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into(), "viewer".into()]
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<HostEvent>) -> HostEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no host event")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn viewer_lifecycle_reaches_bridge() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        // Wait for the display id, then report focus, blur and a remote
        // disconnect.
        let script = r#"while read line; do
            case "$line" in
                display:*) echo "host:focus"; echo "host:blur"; echo "disconnected:"; exit 0;;
            esac
        done"#;
        let host = ExecSurfaceHost::new(viewer(script), tx);
        host.create(request(":3")).unwrap();

        let HostEvent::SurfaceCreated { request, result } = next_event(&mut rx).await else {
            panic!("expected creation");
        };
        assert_eq!(request, RequestId(7));
        let handle = result.unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            HostEvent::FocusChanged(Some(handle))
        );
        assert_eq!(next_event(&mut rx).await, HostEvent::FocusLost(handle));
        assert_eq!(next_event(&mut rx).await, HostEvent::SurfaceDetached(handle));
        assert_eq!(next_event(&mut rx).await, HostEvent::SurfaceRemoved(handle));
        assert_eq!(
            host.focus(handle),
            Err(HostError::UnknownSurface(handle))
        );
    }

    #[tokio::test]
    async fn viewer_receives_launch_query() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("args");
        let script = format!("echo \"$1\" > {}", out.display());
        let host = ExecSurfaceHost::new(viewer(&script), tx);
        host.create(request(":5")).unwrap();

        let HostEvent::SurfaceCreated { result, .. } = next_event(&mut rx).await else {
            panic!("expected creation");
        };
        let handle = result.unwrap();
        assert_eq!(next_event(&mut rx).await, HostEvent::SurfaceRemoved(handle));
        let args = std::fs::read_to_string(out).unwrap();
        assert_eq!(
            args.trim(),
            "display=5&title=Desktop&debug=0&hidpi=0&mode=w"
        );
    }

    #[tokio::test]
    async fn close_kills_viewer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let host = ExecSurfaceHost::new(viewer("exec sleep 30"), tx);
        host.create(request(":1")).unwrap();
        let HostEvent::SurfaceCreated { result, .. } = next_event(&mut rx).await else {
            panic!("expected creation");
        };
        let handle = result.unwrap();
        host.close(handle).unwrap();
        assert_eq!(next_event(&mut rx).await, HostEvent::SurfaceRemoved(handle));
    }

    #[tokio::test]
    async fn crashed_viewer_is_detached_then_removed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let host = ExecSurfaceHost::new(viewer("exit 3"), tx);
        host.create(request(":2")).unwrap();
        let HostEvent::SurfaceCreated { result, .. } = next_event(&mut rx).await else {
            panic!("expected creation");
        };
        let handle = result.unwrap();
        assert_eq!(next_event(&mut rx).await, HostEvent::SurfaceDetached(handle));
        assert_eq!(next_event(&mut rx).await, HostEvent::SurfaceRemoved(handle));
    }

    #[tokio::test]
    async fn window_state_is_tracked() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let host = ExecSurfaceHost::new(viewer("exec sleep 30"), tx);
        host.create(request(":1")).unwrap();
        let HostEvent::SurfaceCreated { result, .. } = next_event(&mut rx).await else {
            panic!("expected creation");
        };
        let handle = result.unwrap();
        host.set_window_state(handle, WindowState::Maximized).unwrap();
        assert_eq!(host.window_state(handle), Ok(WindowState::Maximized));
        host.close(handle).unwrap();
    }

    #[test]
    fn invalid_tag_is_refused() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let host = ExecSurfaceHost::new(viewer("true"), tx);
        assert!(matches!(
            host.create(request("cros")),
            Err(HostError::Surface(_))
        ));
    }
}
