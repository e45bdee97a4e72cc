//! Wire protocol frame types for the bridge socket.
//!
//! Every frame is a single text message: a one-character command code
//! followed by a raw payload that runs to the end of the message. There
//! is no delimiter and no escaping.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Lowest protocol version the client accepts.
pub const MIN_VERSION: u32 = 1;

/// Highest protocol version the client speaks.
pub const MAX_VERSION: u32 = 2;

/// Session listing and focus reports exist from this version onward.
pub const SESSION_LIST_VERSION: u32 = 2;

/// Maximum inbound frame size in bytes.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Reserved tag meaning "the host itself", i.e. focus is outside any
/// managed surface.
pub const HOST_TAG: &str = "cros";

static DISPLAY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^:[0-9]+$").expect("static regex"));

static ABSOLUTE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[a-z][a-z0-9+.\-]*:").expect("static regex"));

/// Errors raised when a text frame cannot be turned into a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("unknown command code {0:?}")]
    UnknownCode(char),
}

/// Inbound commands, one variant per command code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `V`: server protocol version (bare integer payload).
    Version(String),
    /// `W`: place the payload on the clipboard.
    Write(String),
    /// `R`: read the clipboard. The payload is ignored.
    Read,
    /// `U`: open an absolute URL on the host.
    OpenUrl(String),
    /// `X`: raise or create the surface for a display, or go to the host.
    RaiseSurface(String),
    /// `C`: session list (non-empty) or cycle acknowledgement (empty).
    Sessions(String),
    /// `N`: raise a notification (JSON object payload).
    Notify(String),
    /// `P`: ping; echoed verbatim.
    Ping(String),
    /// `E`: error reported by the server.
    ServerError(String),
}

impl Command {
    /// Split a frame into its command code and payload.
    pub fn parse(frame: &str) -> Result<Self, FrameError> {
        let mut chars = frame.chars();
        let code = chars.next().ok_or(FrameError::Empty)?;
        let payload = chars.as_str().to_string();
        let cmd = match code {
            'V' => Command::Version(payload),
            'W' => Command::Write(payload),
            'R' => Command::Read,
            'U' => Command::OpenUrl(payload),
            'X' => Command::RaiseSurface(payload),
            'C' => Command::Sessions(payload),
            'N' => Command::Notify(payload),
            'P' => Command::Ping(payload),
            'E' => Command::ServerError(payload),
            other => return Err(FrameError::UnknownCode(other)),
        };
        Ok(cmd)
    }
}

/// Outbound frames sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    VersionOk,
    WriteOk,
    Clipboard(String),
    UrlOk,
    RaiseOk,
    NotifyOk,
    Pong(String),
    Error(String),
    /// Report the focused session tag.
    ReportFocus(String),
    /// Ask the server for the session list.
    ListSessions,
    /// Ask the server to raise a session (notification activation).
    RaiseSession(String),
}

impl fmt::Display for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outbound::VersionOk => f.write_str("VOK"),
            Outbound::WriteOk => f.write_str("WOK"),
            Outbound::Clipboard(text) => write!(f, "R{text}"),
            Outbound::UrlOk => f.write_str("UOK"),
            Outbound::RaiseOk => f.write_str("XOK"),
            Outbound::NotifyOk => f.write_str("NOK"),
            Outbound::Pong(payload) => write!(f, "P{payload}"),
            Outbound::Error(text) => write!(f, "E{text}"),
            Outbound::ReportFocus(tag) => write!(f, "Cs{tag}"),
            Outbound::ListSessions => f.write_str("Cl"),
            Outbound::RaiseSession(tag) => write!(f, "X{tag}"),
        }
    }
}

/// How a newly created surface is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SurfaceMode {
    #[default]
    Fullscreen,
    Window,
    Tab,
}

impl SurfaceMode {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'f' => Some(SurfaceMode::Fullscreen),
            'w' => Some(SurfaceMode::Window),
            't' => Some(SurfaceMode::Tab),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            SurfaceMode::Fullscreen => 'f',
            SurfaceMode::Window => 'w',
            SurfaceMode::Tab => 't',
        }
    }

    pub fn is_tab(self) -> bool {
        self == SurfaceMode::Tab
    }
}

/// Parsed payload of an `X` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaiseRequest {
    /// Empty payload: give focus back to the host.
    Host,
    Display {
        tag: String,
        mode: SurfaceMode,
        /// Mode character that was not recognised and replaced by `f`.
        normalized_from: Option<char>,
    },
}

/// Parse `:<num>[-<mode>]` or an empty payload.
///
/// Returns `None` when the tag is not a display tag.
pub fn parse_raise(payload: &str) -> Option<RaiseRequest> {
    if payload.is_empty() {
        return Some(RaiseRequest::Host);
    }
    let (tag, suffix) = match payload.split_once('-') {
        Some((tag, suffix)) => (tag, Some(suffix)),
        None => (payload, None),
    };
    if !DISPLAY_TAG.is_match(tag) {
        return None;
    }
    let (mode, normalized_from) = match suffix.and_then(|s| s.chars().next()) {
        None => (SurfaceMode::Fullscreen, None),
        Some(c) => match SurfaceMode::from_char(c) {
            Some(mode) => (mode, None),
            None => (SurfaceMode::Fullscreen, Some(c)),
        },
    };
    Some(RaiseRequest::Display {
        tag: tag.to_string(),
        mode,
        normalized_from,
    })
}

/// One entry of a session list reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionListing {
    pub tag: String,
    pub name: String,
}

/// Whether a tag may appear in a session list.
pub fn is_allowed_tag(tag: &str) -> bool {
    tag == HOST_TAG || DISPLAY_TAG.is_match(tag)
}

/// Parse a newline-separated `"<tag>[*] <name>"` list.
///
/// The `*` marker is discarded and entries with tags outside the
/// allow-list are dropped. Order is preserved.
pub fn parse_session_list(payload: &str) -> Vec<SessionListing> {
    payload
        .lines()
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let (head, name) = line.split_once(' ').unwrap_or((line, ""));
            let tag = head.strip_suffix('*').unwrap_or(head);
            if !is_allowed_tag(tag) {
                tracing::debug!(tag, "dropping session list entry");
                return None;
            }
            Some(SessionListing {
                tag: tag.to_string(),
                name: name.to_string(),
            })
        })
        .collect()
}

/// Whether a `U` payload is an absolute URI (scheme followed by `:`).
pub fn is_absolute_url(payload: &str) -> bool {
    ABSOLUTE_URL.is_match(payload)
}
