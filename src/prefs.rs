//! User preferences: `enabled` and `hidpi`, persisted as TOML.
//!
//! Stored at `$XDG_CONFIG_HOME/sessionlinkd/prefs.toml` (falling back to
//! `$HOME/.config`). Every change is written immediately.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum PrefsError {
    #[error("neither $XDG_CONFIG_HOME nor $HOME is set")]
    NoConfigDir,
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid preferences file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize preferences: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Whether the bridge tries to stay connected.
    pub enabled: bool,
    /// Whether surfaces render at native device resolution.
    pub hidpi: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            enabled: true,
            hidpi: false,
        }
    }
}

/// Preferences plus where they are persisted.
///
/// A store without a path keeps changes in memory only.
#[derive(Debug)]
pub struct PrefStore {
    path: Option<PathBuf>,
    prefs: Preferences,
}

impl PrefStore {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: PathBuf) -> Result<Self, PrefsError> {
        let prefs = read_prefs(&path)?;
        Ok(Self {
            path: Some(path),
            prefs,
        })
    }

    pub fn in_memory(prefs: Preferences) -> Self {
        Self { path: None, prefs }
    }

    pub fn get(&self) -> Preferences {
        self.prefs
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns whether the value changed.
    pub fn set_enabled(&mut self, enabled: bool) -> Result<bool, PrefsError> {
        self.update(Preferences {
            enabled,
            ..self.prefs
        })
    }

    /// Returns whether the value changed.
    pub fn set_hidpi(&mut self, hidpi: bool) -> Result<bool, PrefsError> {
        self.update(Preferences {
            hidpi,
            ..self.prefs
        })
    }

    fn update(&mut self, prefs: Preferences) -> Result<bool, PrefsError> {
        if prefs == self.prefs {
            return Ok(false);
        }
        self.prefs = prefs;
        if let Some(path) = &self.path {
            write_prefs(path, &prefs)?;
        }
        Ok(true)
    }

    /// Re-read the file, returning the fresh values.
    pub fn reload(&mut self) -> Result<Preferences, PrefsError> {
        if let Some(path) = &self.path {
            self.prefs = read_prefs(path)?;
        }
        Ok(self.prefs)
    }
}

/// Default preferences location.
pub fn resolve_prefs_path() -> Result<PathBuf, PrefsError> {
    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".config"))
            .ok_or(PrefsError::NoConfigDir)?,
    };
    Ok(base.join("sessionlinkd").join("prefs.toml"))
}

fn read_prefs(path: &Path) -> Result<Preferences, PrefsError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Preferences::default()),
        Err(source) => Err(PrefsError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_prefs(path: &Path, prefs: &Preferences) -> Result<(), PrefsError> {
    let content = toml::to_string_pretty(prefs)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| PrefsError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, content).map_err(|source| PrefsError::Write {
        path: path.to_path_buf(),
        source,
    })
}
