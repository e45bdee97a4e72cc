//! Bridge daemon: keeps one WebSocket session to the chroot-side server
//! and relays clipboard, URL, surface and notification requests to the
//! host adapters.
//!
//! Architecture: a single event loop owns all mutable state
//! ([`context::Bridge`]). Socket messages, timers, host adapter events
//! and control signals are serialized through one `select!`, so no two
//! handlers ever run concurrently. Handlers queue [`context::Effect`]s
//! which the [`Driver`] applies against the live socket.

pub mod clipboard;
pub mod connection;
pub mod context;
mod handler;
pub mod state;
pub mod status;

use std::future::Future;
use std::pin::Pin;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::host::HostEvent;
use crate::ipc::codec::{self, DecodeResult};
use crate::prefs::PrefsError;

use context::{Bridge, Effect};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ConnectFuture = Pin<Box<dyn Future<Output = Result<WsStream, String>> + Send>>;

/// Daemon startup/runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("preferences: {0}")]
    Prefs(#[from] PrefsError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Out-of-band requests for the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Shutdown,
    /// Re-read the preferences file.
    ReloadPrefs,
    /// Flip debug mode.
    ToggleDebug,
}

/// Run the bridge until SIGTERM or SIGINT. SIGHUP reloads preferences
/// and SIGUSR1 toggles debug mode.
///
/// # Errors
///
/// Returns `BridgeError::Io` if signal handlers cannot be installed.
pub async fn run(
    bridge: Bridge,
    host_rx: mpsc::UnboundedReceiver<HostEvent>,
) -> Result<(), BridgeError> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let control = tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM, shutting down");
                    Control::Shutdown
                }
                _ = sigint.recv() => {
                    tracing::info!("received SIGINT, shutting down");
                    Control::Shutdown
                }
                _ = sighup.recv() => {
                    tracing::info!("received SIGHUP, reloading preferences");
                    Control::ReloadPrefs
                }
                _ = sigusr1.recv() => Control::ToggleDebug,
            };
            if control_tx.send(control).is_err() || control == Control::Shutdown {
                break;
            }
        }
    });

    let bridge = Driver::new(bridge, host_rx, control_rx).run().await;
    let snapshot = bridge.snapshot();
    tracing::info!(status = %snapshot.status, indicator = ?snapshot.indicator, "bridge stopped");
    Ok(())
}

/// Owns the socket and timers on behalf of a [`Bridge`].
pub struct Driver {
    bridge: Bridge,
    ws: Option<WsStream>,
    connecting: Option<ConnectFuture>,
    retry: Option<Pin<Box<Sleep>>>,
    host_rx: mpsc::UnboundedReceiver<HostEvent>,
    control_rx: mpsc::UnboundedReceiver<Control>,
}

impl Driver {
    pub fn new(
        bridge: Bridge,
        host_rx: mpsc::UnboundedReceiver<HostEvent>,
        control_rx: mpsc::UnboundedReceiver<Control>,
    ) -> Self {
        Self {
            bridge,
            ws: None,
            connecting: None,
            retry: None,
            host_rx,
            control_rx,
        }
    }

    /// Run the event loop until shutdown, handing the bridge back.
    pub async fn run(mut self) -> Bridge {
        let period = self.bridge.config().refresh_interval;
        let mut refresh = tokio::time::interval_at(Instant::now() + period, period);

        self.bridge.connect();
        loop {
            self.flush().await;

            tokio::select! {
                // -- Pending connect finished --
                result = poll_slot(&mut self.connecting) => {
                    self.connecting = None;
                    match result {
                        Ok(ws) => {
                            self.ws = Some(ws);
                            self.bridge.on_open();
                        }
                        Err(e) => {
                            self.bridge.log.error(format!("Connection failed: {e}"));
                            self.bridge.on_close(Instant::now());
                        }
                    }
                }

                // -- Socket traffic --
                msg = next_message(&mut self.ws) => match msg {
                    Some(Ok(msg)) => match codec::decode_frame(msg) {
                        DecodeResult::Closed => self.drop_socket(),
                        frame => self.bridge.on_frame(frame, Instant::now()),
                    },
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "socket error");
                        self.drop_socket();
                    }
                    None => self.drop_socket(),
                },

                // -- Retry timer --
                () = poll_slot(&mut self.retry) => {
                    self.retry = None;
                    self.bridge.on_retry_timer();
                }

                // -- Periodic session refresh --
                _ = refresh.tick() => {
                    self.bridge.refresh_sessions(false, Instant::now());
                }

                // -- Clipboard operation finished --
                outcome = poll_slot(&mut self.bridge.clipboard_job) => {
                    self.bridge.on_clipboard_done(outcome, Instant::now());
                }

                // -- Host adapter outcome --
                Some(event) = self.host_rx.recv() => {
                    tracing::debug!(?event, "host event");
                    self.bridge.on_host_event(event, Instant::now());
                }

                control = self.control_rx.recv() => match control {
                    Some(Control::ReloadPrefs) => self.bridge.reload_prefs(),
                    Some(Control::ToggleDebug) => {
                        let debug = !self.bridge.debug();
                        self.bridge.set_debug(debug);
                    }
                    Some(Control::Shutdown) | None => break,
                },
            }
        }

        if let Some(mut ws) = self.ws.take() {
            let _ = ws.close(None).await;
        }
        self.bridge
    }

    /// Apply queued effects until the bridge stops producing them.
    async fn flush(&mut self) {
        loop {
            let effects = self.bridge.take_effects();
            if effects.is_empty() {
                return;
            }
            for effect in effects {
                self.apply(effect).await;
            }
        }
    }

    async fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Connect => self.start_connect(),
            Effect::Send(frame) => {
                let Some(ws) = self.ws.as_mut() else {
                    tracing::debug!(%frame, "no socket, dropping frame");
                    return;
                };
                if let Err(e) = ws.send(codec::encode_frame(&frame)).await {
                    tracing::warn!(error = %e, "send failed");
                    self.drop_socket();
                }
            }
            Effect::Close => {
                if let Some(mut ws) = self.ws.take() {
                    if let Err(e) = ws.close(None).await {
                        tracing::debug!(error = %e, "close failed");
                    }
                }
                self.connecting = None;
                self.bridge.on_close(Instant::now());
            }
            Effect::ScheduleRetry(delay) => {
                self.retry = Some(Box::pin(tokio::time::sleep(delay)));
            }
            Effect::CancelRetry => self.retry = None,
            Effect::CheckUpdate => {
                tracing::info!(url = %self.bridge.config().url, "checking for client updates");
            }
        }
    }

    fn start_connect(&mut self) {
        let url = self.bridge.config().url.clone();
        let limit = self.bridge.config().connect_timeout;
        self.connecting = Some(Box::pin(async move {
            match tokio::time::timeout(limit, connect_async(url)).await {
                Ok(Ok((ws, _response))) => Ok(ws),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("timed out after {} seconds", limit.as_secs())),
            }
        }));
    }

    fn drop_socket(&mut self) {
        self.ws = None;
        self.connecting = None;
        self.bridge.on_close(Instant::now());
    }
}

/// Await the future in `slot`, or never resolve if there is none.
async fn poll_slot<F: Future + Unpin>(slot: &mut Option<F>) -> F::Output {
    match slot.as_mut() {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_message(
    ws: &mut Option<WsStream>,
) -> Option<Result<tokio_tungstenite::tungstenite::Message, tokio_tungstenite::tungstenite::Error>>
{
    match ws.as_mut() {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}
