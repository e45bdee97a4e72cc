//! Session registry and focus pointer.
//!
//! All methods are pure state transitions with no I/O. The registry is
//! keyed by tag, so a tab and a window can never both claim the same
//! display.

use std::collections::BTreeMap;

use crate::host::{RequestId, SurfaceHandle};
use crate::ipc::protocol::{HOST_TAG, SessionListing, SurfaceMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    Window,
    Tab,
}

impl From<SurfaceMode> for SurfaceKind {
    fn from(mode: SurfaceMode) -> Self {
        if mode.is_tab() {
            SurfaceKind::Tab
        } else {
            SurfaceKind::Window
        }
    }
}

/// Lifecycle of a session's surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Creation requested; only the matching request may complete it.
    Pending(RequestId),
    Live,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub tag: String,
    pub name: String,
    pub kind: SurfaceKind,
    pub liveness: Liveness,
    /// Valid only while `liveness == Live`.
    pub handle: Option<SurfaceHandle>,
    /// The surface's remote session ended and it is about to close.
    pub closing: bool,
}

impl Session {
    pub fn is_live(&self) -> bool {
        self.liveness == Liveness::Live
    }
}

/// Why a creation callback was not applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StaleCallback {
    #[error("no pending session for request {0:?}")]
    NoPending(RequestId),
}

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: BTreeMap<String, Session>,
    /// Last session list received from the server, in server order.
    listing: Vec<SessionListing>,
    focus: String,
    next_request: u64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: BTreeMap::new(),
            listing: Vec::new(),
            focus: HOST_TAG.to_string(),
            next_request: 1,
        }
    }

    pub fn get(&self, tag: &str) -> Option<&Session> {
        self.sessions.get(tag)
    }

    pub fn focus(&self) -> &str {
        &self.focus
    }

    pub fn listing(&self) -> &[SessionListing] {
        &self.listing
    }

    /// Display name for a tag: the server's name if known, else the tag.
    pub fn display_name(&self, tag: &str) -> String {
        self.sessions
            .get(tag)
            .map(|s| s.name.clone())
            .filter(|name| !name.is_empty())
            .or_else(|| {
                self.listing
                    .iter()
                    .find(|l| l.tag == tag && !l.name.is_empty())
                    .map(|l| l.name.clone())
            })
            .unwrap_or_else(|| tag.to_string())
    }

    /// Record a new pending session, replacing any Removed or closing
    /// entry for the same tag.
    pub fn begin_surface(&mut self, tag: &str, kind: SurfaceKind) -> RequestId {
        let request = RequestId(self.next_request);
        self.next_request += 1;
        let name = self.display_name(tag);
        self.sessions.insert(
            tag.to_string(),
            Session {
                tag: tag.to_string(),
                name,
                kind,
                liveness: Liveness::Pending(request),
                handle: None,
                closing: false,
            },
        );
        request
    }

    /// Apply a successful creation callback.
    ///
    /// Only an entry still pending on the same request is promoted; a
    /// callback for a replaced or removed entry is stale.
    pub fn complete_surface(
        &mut self,
        request: RequestId,
        handle: SurfaceHandle,
    ) -> Result<String, StaleCallback> {
        let session = self
            .sessions
            .values_mut()
            .find(|s| s.liveness == Liveness::Pending(request))
            .ok_or(StaleCallback::NoPending(request))?;
        session.liveness = Liveness::Live;
        session.handle = Some(handle);
        Ok(session.tag.clone())
    }

    /// Apply a failed creation callback. Returns the affected tag.
    pub fn fail_surface(&mut self, request: RequestId) -> Option<String> {
        let session = self
            .sessions
            .values_mut()
            .find(|s| s.liveness == Liveness::Pending(request))?;
        session.liveness = Liveness::Removed;
        session.handle = None;
        Some(session.tag.clone())
    }

    pub fn find_by_handle(&self, handle: SurfaceHandle) -> Option<&Session> {
        self.sessions
            .values()
            .find(|s| s.is_live() && s.handle == Some(handle))
    }

    /// Move focus to whatever session owns `handle`, or to the host.
    ///
    /// Returns the new focus tag if it changed.
    pub fn focus_handle(&mut self, handle: Option<SurfaceHandle>) -> Option<String> {
        let tag = handle
            .and_then(|h| self.find_by_handle(h))
            .map(|s| s.tag.clone())
            .unwrap_or_else(|| HOST_TAG.to_string());
        self.set_focus(tag)
    }

    /// `handle` lost focus. Focus returns to the host only if it still
    /// points at that surface's session; a later focus report for
    /// another surface wins.
    pub fn focus_lost(&mut self, handle: SurfaceHandle) -> Option<String> {
        let owns_focus = self
            .sessions
            .get(&self.focus)
            .is_some_and(|s| s.handle == Some(handle));
        if owns_focus {
            self.set_focus(HOST_TAG.to_string())
        } else {
            None
        }
    }

    /// Returns the new focus tag if it changed.
    pub fn set_focus(&mut self, tag: String) -> Option<String> {
        if self.focus == tag {
            return None;
        }
        self.focus = tag.clone();
        Some(tag)
    }

    /// Mark every session using `handle` as Removed. Returns their tags.
    pub fn remove_handle(&mut self, handle: SurfaceHandle) -> Vec<String> {
        let mut removed = Vec::new();
        for session in self.sessions.values_mut() {
            if session.handle == Some(handle) {
                session.liveness = Liveness::Removed;
                session.handle = None;
                session.closing = false;
                removed.push(session.tag.clone());
            }
        }
        removed
    }

    /// Flag the session using `handle` as closing.
    pub fn mark_closing(&mut self, handle: SurfaceHandle) -> Option<String> {
        let session = self
            .sessions
            .values_mut()
            .find(|s| s.is_live() && s.handle == Some(handle))?;
        session.closing = true;
        Some(session.tag.clone())
    }

    /// Live sessions with their handles.
    pub fn live(&self) -> impl Iterator<Item = (&Session, SurfaceHandle)> {
        self.sessions
            .values()
            .filter(|s| s.is_live())
            .filter_map(|s| s.handle.map(|h| (s, h)))
    }

    /// Store a fresh session list. Returns `(handle, title)` updates for
    /// live surfaces whose session appears in the list.
    pub fn apply_listing(&mut self, listing: Vec<SessionListing>) -> Vec<(SurfaceHandle, String)> {
        let mut titles = Vec::new();
        for entry in &listing {
            if let Some(session) = self.sessions.get_mut(&entry.tag) {
                session.name = entry.name.clone();
                if let (Liveness::Live, Some(handle)) = (session.liveness, session.handle) {
                    titles.push((handle, entry.name.clone()));
                }
            }
        }
        self.listing = listing;
        titles
    }
}
