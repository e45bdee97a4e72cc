//! X11 clipboard provider: read/write via `xclip`.

use std::process::Stdio;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{ClipboardProvider, HostError};

/// Upper bound on one `xclip` run. A selection owner that never answers
/// would otherwise hold the reply forever.
pub const XCLIP_TIMEOUT: Duration = Duration::from_secs(3);

/// `ClipboardProvider` backed by `xclip -selection clipboard`.
#[derive(Debug, Clone)]
pub struct XclipClipboard {
    read_cmd: Vec<String>,
    write_cmd: Vec<String>,
    timeout: Duration,
}

impl Default for XclipClipboard {
    fn default() -> Self {
        Self::new()
    }
}

impl XclipClipboard {
    pub fn new() -> Self {
        let base = ["xclip", "-selection", "clipboard"];
        let mut read_cmd: Vec<String> = base.iter().map(|s| s.to_string()).collect();
        read_cmd.push("-o".into());
        Self {
            read_cmd,
            write_cmd: base.iter().map(|s| s.to_string()).collect(),
            timeout: XCLIP_TIMEOUT,
        }
    }

    /// Use other programs (plus leading arguments) for reading and writing.
    pub fn with_commands(read_cmd: Vec<String>, write_cmd: Vec<String>, timeout: Duration) -> Self {
        Self {
            read_cmd,
            write_cmd,
            timeout,
        }
    }
}

fn command(argv: &[String]) -> Result<Command, HostError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| HostError::Clipboard("no command configured".into()))?;
    let mut cmd = Command::new(program);
    cmd.args(args).stderr(Stdio::null()).kill_on_drop(true);
    Ok(cmd)
}

async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, HostError>>,
) -> Result<T, HostError> {
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        HostError::Clipboard(format!("xclip timed out after {}ms", limit.as_millis()))
    })?
}

async fn write_selection(argv: Vec<String>, text: String) -> Result<(), HostError> {
    let mut child = command(&argv)?
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .spawn()
        .map_err(|e| HostError::Clipboard(format!("failed to spawn xclip: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(text.as_bytes())
            .await
            .map_err(|e| HostError::Clipboard(format!("failed to write to xclip: {e}")))?;
        // Drop stdin to close the pipe so xclip can finish.
    }

    let status = child
        .wait()
        .await
        .map_err(|e| HostError::Clipboard(format!("failed to wait for xclip: {e}")))?;

    if status.success() {
        Ok(())
    } else {
        Err(HostError::Clipboard(format!(
            "xclip exited with status {status}"
        )))
    }
}

async fn read_selection(argv: Vec<String>) -> Result<String, HostError> {
    let output = command(&argv)?
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| HostError::Clipboard(format!("failed to spawn xclip -o: {e}")))?;

    // xclip fails when the selection has no owner; that is an empty
    // clipboard, not an error.
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        tracing::debug!(status = %output.status, "xclip -o failed, treating clipboard as empty");
        Ok(String::new())
    }
}

impl ClipboardProvider for XclipClipboard {
    fn write(&self, text: String) -> BoxFuture<'static, Result<(), HostError>> {
        bounded(self.timeout, write_selection(self.write_cmd.clone(), text)).boxed()
    }

    fn read(&self) -> BoxFuture<'static, Result<String, HostError>> {
        bounded(self.timeout, read_selection(self.read_cmd.clone())).boxed()
    }
}
