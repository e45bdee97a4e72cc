//! Desktop notifications via `notify-send --wait`.
//!
//! Each notification is one `notify-send` process. It prints the action
//! name when the user activates the notification and exits when the
//! notification closes. Dismissing kills the process.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, LinesCodec};

use super::{HostError, HostEvent, Notification, NotificationId, Notifier};

/// Action id `notify-send` prints on activation.
const DEFAULT_ACTION: &str = "default";

/// Title used when the server sent none.
const FALLBACK_TITLE: &str = "sessionlinkd";

type Pending = Arc<Mutex<HashMap<NotificationId, oneshot::Sender<()>>>>;

pub struct NotifySend {
    command: Vec<String>,
    events: mpsc::UnboundedSender<HostEvent>,
    next_id: AtomicU64,
    pending: Pending,
}

impl NotifySend {
    pub fn new(events: mpsc::UnboundedSender<HostEvent>) -> Self {
        Self::with_command(vec!["notify-send".into()], events)
    }

    /// Use `command` (program plus leading arguments) instead of
    /// `notify-send`.
    pub fn with_command(command: Vec<String>, events: mpsc::UnboundedSender<HostEvent>) -> Self {
        Self {
            command,
            events,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Build the `notify-send` arguments for a notification.
fn notify_args(notification: &Notification) -> Vec<String> {
    let text = |key: &str| notification.options.get(key).and_then(Value::as_str);
    let title = text("title").unwrap_or(FALLBACK_TITLE);
    let mut body = text("message").unwrap_or_default().to_string();
    if let Some(context) = &notification.context {
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str(context);
    }

    let mut args = vec![
        format!("--app-name={FALLBACK_TITLE}"),
        format!("--action={DEFAULT_ACTION}=Open"),
        "--wait".to_string(),
    ];
    if let Some(icon) = text("iconUrl") {
        args.push(format!("--icon={icon}"));
    }
    if notification.options.get("requireInteraction") == Some(&Value::Bool(true)) {
        args.push("--urgency=critical".to_string());
    }
    args.push(title.to_string());
    if !body.is_empty() {
        args.push(body);
    }
    args
}

impl Notifier for NotifySend {
    fn show(&self, notification: &Notification) -> Result<NotificationId, HostError> {
        let (program, leading) = self
            .command
            .split_first()
            .ok_or_else(|| HostError::Notification("no command configured".into()))?;
        let mut child = Command::new(program)
            .args(leading)
            .args(notify_args(notification))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HostError::Notification(format!("failed to spawn {program}: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HostError::Notification("stdout unavailable".into()))?;

        let id = format!("sessionlinkd-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let (dismiss_tx, mut dismiss_rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| HostError::Notification("notification table poisoned".into()))?
            .insert(id.clone(), dismiss_tx);

        let events = self.events.clone();
        let pending = Arc::clone(&self.pending);
        let task_id = id.clone();
        tokio::spawn(async move {
            let mut lines = FramedRead::new(stdout, LinesCodec::new());
            let mut dismissed = false;
            loop {
                tokio::select! {
                    line = lines.next() => match line {
                        Some(Ok(line)) if line.trim() == DEFAULT_ACTION => {
                            let _ = events.send(HostEvent::NotificationActivated(task_id.clone()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::debug!(id = %task_id, error = %e, "bad notify-send output");
                        }
                        None => break,
                    },
                    result = &mut dismiss_rx, if !dismissed => {
                        dismissed = true;
                        if result.is_ok() {
                            if let Err(e) = child.start_kill() {
                                tracing::debug!(id = %task_id, error = %e, "notification already gone");
                            }
                        }
                    }
                }
            }
            if let Err(e) = child.wait().await {
                tracing::warn!(id = %task_id, error = %e, "failed to reap notify-send");
            }
            if let Ok(mut pending) = pending.lock() {
                pending.remove(&task_id);
            }
            let _ = events.send(HostEvent::NotificationClosed(task_id));
        });
        Ok(id)
    }

    fn dismiss(&self, id: &str) -> Result<(), HostError> {
        let sender = self
            .pending
            .lock()
            .map_err(|_| HostError::Notification("notification table poisoned".into()))?
            .remove(id);
        match sender {
            Some(sender) => {
                let _ = sender.send(());
            }
            None => tracing::debug!(id, "notification already closed"),
        }
        Ok(())
    }
}
