// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use manifold_model::{Error, Result, Session, SessionFilter, SessionSummary};

use crate::SessionStore;

/// File-backed store: one pretty-printed JSON document per session.
///
/// Writes go to a temp file in the same directory followed by an atomic
/// rename, so a crash mid-write never leaves a truncated session behind.
/// Whole-file rewrites are fine at the session sizes this store sees.
pub struct FileStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles across store calls.  Turn-level
    /// serialization is the lock registry's job; this only protects the
    /// files themselves.
    io: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Store(format!("creating {}: {e}", dir.display())))?;
        Ok(Self { dir, io: Mutex::new(()) })
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        // Ids are UUIDs in practice, but never trust them as path segments.
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(Error::BadParameter(format!("invalid session id '{id}'")));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    async fn read_session(&self, path: &Path) -> Result<Session> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("unknown session '{}'", stem(path)))
            } else {
                Error::Store(format!("reading {}: {e}", path.display()))
            }
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Store(format!("corrupt session file {}: {e}", path.display())))
    }

    async fn write_session(&self, path: &Path, session: &Session) -> Result<()> {
        let json = serde_json::to_string_pretty(session)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json.as_bytes())
            .await
            .map_err(|e| Error::Store(format!("writing {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::Store(format!("renaming {}: {e}", tmp.display())))?;
        debug!(path = %path.display(), "wrote session file");
        Ok(())
    }
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl SessionStore for FileStore {
    async fn create(&self, session: Session) -> Result<String> {
        let path = self.path_for(&session.id)?;
        let _io = self.io.lock().await;
        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Error::Store(e.to_string()))?
        {
            return Err(Error::Conflict(format!(
                "session '{}' already exists",
                session.id
            )));
        }
        self.write_session(&path, &session).await?;
        Ok(session.id)
    }

    async fn get(&self, id: &str) -> Result<Session> {
        let path = self.path_for(id)?;
        let _io = self.io.lock().await;
        self.read_session(&path).await
    }

    async fn update(
        &self,
        id: &str,
        mutate: &mut (dyn for<'a> FnMut(&'a mut Session) + Send),
    ) -> Result<Session> {
        let path = self.path_for(id)?;
        let _io = self.io.lock().await;
        let mut session = self.read_session(&path).await?;
        mutate(&mut session);
        self.write_session(&path, &session).await?;
        Ok(session)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id)?;
        let _io = self.io.lock().await;
        tokio::fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("unknown session '{id}'"))
            } else {
                Error::Store(format!("deleting {}: {e}", path.display()))
            }
        })
    }

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<SessionSummary>> {
        let _io = self.io.lock().await;
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| Error::Store(format!("listing {}: {e}", self.dir.display())))?;
        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Store(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // Skip files that do not parse rather than failing the listing;
            // a corrupt session is still reachable (and reported) via get().
            match self.read_session(&path).await {
                Ok(session) if filter.matches(&session) => {
                    out.push(SessionSummary::from(&session));
                }
                _ => {}
            }
        }
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
