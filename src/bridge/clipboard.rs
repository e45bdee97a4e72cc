//! Clipboard mirroring with an empty-value sentinel.
//!
//! The host clipboard cannot hold an empty string, so a reserved
//! sentinel stands in for "empty". `sentinel_is_empty` records whether
//! the sentinel currently on the clipboard was written by us to mean
//! empty, as opposed to arriving literally from the remote side.
//!
//! Host access is asynchronous: `write` and `read` build a
//! [`ClipboardJob`] and the matching `complete_*` call applies its
//! outcome once the event loop has driven it.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::host::{ClipboardProvider, HostError};

/// Stands in for an empty clipboard.
pub const EMPTY_SENTINEL: &str = "<crouton-empty-Y3JvdXRvbgo=>";

/// An in-flight clipboard operation.
pub type ClipboardJob = BoxFuture<'static, ClipboardOutcome>;

#[derive(Debug)]
pub enum ClipboardOutcome {
    /// A remote write finished; `Ok(true)` if the clipboard changed.
    Written {
        empty: bool,
        result: Result<bool, HostError>,
    },
    /// Raw host clipboard contents.
    Read(Result<String, HostError>),
}

#[derive(Debug, Default)]
pub struct ClipboardMirror {
    sentinel_is_empty: bool,
}

/// Put `wanted` on the clipboard unless it is already there.
async fn replace(clipboard: Arc<dyn ClipboardProvider>, wanted: String) -> Result<bool, HostError> {
    let current = clipboard.read().await?;
    if current == wanted {
        return Ok(false);
    }
    clipboard.write(wanted).await?;
    Ok(true)
}

impl ClipboardMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start applying a remote write.
    pub fn write(&self, clipboard: &Arc<dyn ClipboardProvider>, payload: &str) -> ClipboardJob {
        let empty = payload.is_empty();
        let wanted = if empty { EMPTY_SENTINEL } else { payload };
        replace(Arc::clone(clipboard), wanted.to_string())
            .map(move |result| ClipboardOutcome::Written { empty, result })
            .boxed()
    }

    /// Start reading the clipboard.
    pub fn read(&self, clipboard: &Arc<dyn ClipboardProvider>) -> ClipboardJob {
        clipboard.read().map(ClipboardOutcome::Read).boxed()
    }

    /// Record a finished write. Returns whether the clipboard was mutated.
    pub fn complete_write(
        &mut self,
        empty: bool,
        result: Result<bool, HostError>,
    ) -> Result<bool, HostError> {
        let mutated = result?;
        self.sentinel_is_empty = empty;
        Ok(mutated)
    }

    /// Map a finished read, turning our own sentinel back into empty.
    pub fn complete_read(&self, result: Result<String, HostError>) -> Result<String, HostError> {
        let current = result?;
        if self.sentinel_is_empty && current == EMPTY_SENTINEL {
            Ok(String::new())
        } else {
            Ok(current)
        }
    }

    pub fn sentinel_is_empty(&self) -> bool {
        self.sentinel_is_empty
    }
}
