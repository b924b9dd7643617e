// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Session persistence: a small storage capability with in-memory and
//! file-backed implementations, plus the per-session lock registry that
//! serializes turns on the same session.
//!
//! The store never interprets session contents; it maps id → session blob.

use async_trait::async_trait;

use manifold_model::{Result, Session, SessionFilter, SessionSummary};

mod file;
mod lock;
mod memory;

pub use file::FileStore;
pub use lock::{LockRegistry, SessionGuard, DEFAULT_LOCK_WAIT};
pub use memory::MemoryStore;

/// Minimum storage interface the orchestrator consumes.
///
/// All updates on one session are serialized by the caller holding that
/// session's lock; cross-session operations are independent.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session and return its id.
    async fn create(&self, session: Session) -> Result<String>;

    async fn get(&self, id: &str) -> Result<Session>;

    /// Load, mutate in place, and persist atomically with respect to other
    /// store calls.  Returns the updated session.
    async fn update(
        &self,
        id: &str,
        mutate: &mut (dyn for<'a> FnMut(&'a mut Session) + Send),
    ) -> Result<Session>;

    async fn delete(&self, id: &str) -> Result<()>;

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<SessionSummary>>;
}
