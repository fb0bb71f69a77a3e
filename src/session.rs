use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Locally persisted session: bearer token plus cached display fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Session {
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    /// Cached display name, if one was stored at login.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }
}

pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file means an empty session.
    pub fn load(&self) -> anyhow::Result<Session> {
        if !self.path.exists() {
            return Ok(Session::default());
        }
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read session file {}", self.path.display()))?;
        let session = serde_json::from_str(&text)
            .with_context(|| format!("session file {} is not valid JSON", self.path.display()))?;
        Ok(session)
    }

    pub fn save(&self, session: &Session) -> anyhow::Result<()> {
        let text = serde_json::to_string_pretty(session)?;
        std::fs::write(&self.path, text)
            .with_context(|| format!("failed to write session file {}", self.path.display()))?;
        Ok(())
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).with_context(|| {
                format!("failed to remove session file {}", self.path.display())
            })?;
        }
        Ok(())
    }
}
