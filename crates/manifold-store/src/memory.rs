// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use manifold_model::{Error, Result, Session, SessionFilter, SessionSummary};

use crate::SessionStore;

/// In-process store: a map behind a reader-writer lock.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(&self, session: Session) -> Result<String> {
        let id = session.id.clone();
        let mut map = self.sessions.write().expect("session map poisoned");
        if map.contains_key(&id) {
            return Err(Error::Conflict(format!("session '{id}' already exists")));
        }
        map.insert(id.clone(), session);
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Session> {
        self.sessions
            .read()
            .expect("session map poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("unknown session '{id}'")))
    }

    async fn update(
        &self,
        id: &str,
        mutate: &mut (dyn for<'a> FnMut(&'a mut Session) + Send),
    ) -> Result<Session> {
        let mut map = self.sessions.write().expect("session map poisoned");
        let session = map
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("unknown session '{id}'")))?;
        mutate(session);
        Ok(session.clone())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions
            .write()
            .expect("session map poisoned")
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("unknown session '{id}'")))
    }

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<SessionSummary>> {
        let map = self.sessions.read().expect("session map poisoned");
        let mut out: Vec<SessionSummary> = map
            .values()
            .filter(|s| filter.matches(s))
            .map(SessionSummary::from)
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
