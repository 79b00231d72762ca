//! Session persistence: load a visitor's progress at the start of a request
//! and write it back at the end.
//!
//! [`FileSessionStore`] keeps one JSON document per session under a
//! directory, `<dir>/<id>.json`. Expired or missing sessions load as fresh
//! ones with the requested id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use shape_types::{FormSession, Result, ShapeError};

pub trait SessionStore: Send + Sync {
    /// The stored session, or a fresh one carrying `id` when absent.
    fn load(&self, id: &str) -> Result<FormSession>;
    fn save(&self, session: &FormSession) -> Result<()>;
    fn destroy(&self, id: &str) -> Result<()>;
}

/// Session ids end up in file names, so only a conservative alphabet is allowed.
fn check_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ShapeError::SessionToken(format!("invalid session id '{id}'")))
    }
}

// ---------------------------------------------------------------------------
// MemorySessionStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, FormSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, FormSession>>> {
        self.sessions
            .lock()
            .map_err(|_| ShapeError::Other("session store lock poisoned".into()))
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, id: &str) -> Result<FormSession> {
        check_id(id)?;
        Ok(self
            .lock()?
            .get(id)
            .cloned()
            .unwrap_or_else(|| FormSession::with_id(id)))
    }

    fn save(&self, session: &FormSession) -> Result<()> {
        self.lock()?.insert(session.id().to_string(), session.clone());
        Ok(())
    }

    fn destroy(&self, id: &str) -> Result<()> {
        self.lock()?.remove(id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileSessionStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
    ttl: Option<chrono::Duration>,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ttl: None,
        }
    }

    /// Sessions untouched for longer than `ttl` load as fresh ones.
    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn is_expired(&self, session: &FormSession) -> bool {
        match self.ttl {
            Some(ttl) => chrono::Utc::now() - session.updated_at > ttl,
            None => false,
        }
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self, id: &str) -> Result<FormSession> {
        check_id(id)?;
        let path = self.path(id);
        if !path.exists() {
            return Ok(FormSession::with_id(id));
        }
        let json = std::fs::read_to_string(&path)?;
        let session: FormSession = serde_json::from_str(&json)?;
        if self.is_expired(&session) {
            tracing::debug!(session = id, "Session expired; starting fresh");
            return Ok(FormSession::with_id(id));
        }
        Ok(session)
    }

    fn save(&self, session: &FormSession) -> Result<()> {
        check_id(session.id())?;
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(session.id());
        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(&path, json)?;
        tracing::debug!(path = %path.display(), "Session saved");
        Ok(())
    }

    fn destroy(&self, id: &str) -> Result<()> {
        check_id(id)?;
        let path = self.path(id);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}
