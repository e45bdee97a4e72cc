//! Launch parameters handed to a viewer process as a query string.

use url::form_urlencoded;

use crate::host::SurfaceRequest;
use crate::ipc::protocol::SurfaceMode;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LaunchError {
    #[error("not a display tag: {0:?}")]
    InvalidTag(String),
}

/// Everything a viewer needs to attach to one display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchParams {
    /// Numeric display id (the tag without its leading `:`).
    pub display: String,
    pub title: String,
    pub debug: bool,
    pub hidpi: bool,
    pub mode: SurfaceMode,
}

impl LaunchParams {
    pub fn from_request(request: &SurfaceRequest) -> Result<Self, LaunchError> {
        let display = request
            .tag
            .strip_prefix(':')
            .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| LaunchError::InvalidTag(request.tag.clone()))?;
        Ok(Self {
            display: display.to_string(),
            title: request.title.clone(),
            debug: request.debug,
            hidpi: request.hidpi,
            mode: request.mode,
        })
    }

    /// The session tag this surface presents.
    pub fn tag(&self) -> String {
        format!(":{}", self.display)
    }

    pub fn to_query(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .append_pair("display", &self.display)
            .append_pair("title", &self.title)
            .append_pair("debug", flag(self.debug))
            .append_pair("hidpi", flag(self.hidpi))
            .append_pair("mode", &self.mode.as_char().to_string())
            .finish()
    }
}

fn flag(on: bool) -> &'static str {
    if on { "1" } else { "0" }
}
