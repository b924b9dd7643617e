// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use manifold_model::{Ctx, Error, Result};

/// Default bounded wait for a session lock.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(30);

/// Per-session exclusive locks, keyed by session id.
///
/// A turn acquires its session's lock while resolving and releases it when
/// the guard drops at settle/failure/cancellation.  Holding the lock makes
/// turns on one session serializable; different sessions proceed
/// independently.
#[derive(Default)]
pub struct LockRegistry {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Held for the duration of one turn; dropping releases the session.
#[derive(Debug)]
pub struct SessionGuard {
    _guard: OwnedMutexGuard<()>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `id`, waiting at most `wait`.
    ///
    /// Fails with `session-busy` on timeout and `cancelled` when the context
    /// is cancelled while waiting.
    pub async fn acquire(&self, ctx: &Ctx, id: &str, wait: Duration) -> Result<SessionGuard> {
        let slot = {
            let mut locks = self.locks.lock().expect("lock map poisoned");
            Arc::clone(locks.entry(id.to_string()).or_default())
        };
        tokio::select! {
            biased;
            _ = ctx.done() => Err(Error::Cancelled),
            guard = slot.lock_owned() => {
                trace!(session = %id, "session lock acquired");
                Ok(SessionGuard { _guard: guard })
            }
            _ = tokio::time::sleep(wait) => Err(Error::SessionBusy(format!(
                "session '{id}' is locked by another turn (waited {wait:?})"
            ))),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_session_waits_for_release() {
        let locks = Arc::new(LockRegistry::new());
        let ctx = Ctx::background();
        let guard = locks.acquire(&ctx, "s1", DEFAULT_LOCK_WAIT).await.unwrap();

        let locks2 = Arc::clone(&locks);
        let ctx2 = ctx.clone();
        let waiter =
            tokio::spawn(async move { locks2.acquire(&ctx2, "s1", DEFAULT_LOCK_WAIT).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "second acquire must block");

        drop(guard);
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn different_sessions_do_not_contend() {
        let locks = LockRegistry::new();
        let ctx = Ctx::background();
        let _a = locks.acquire(&ctx, "a", DEFAULT_LOCK_WAIT).await.unwrap();
        let _b = locks.acquire(&ctx, "b", DEFAULT_LOCK_WAIT).await.unwrap();
    }

    #[tokio::test]
    async fn timeout_yields_session_busy() {
        let locks = LockRegistry::new();
        let ctx = Ctx::background();
        let _held = locks.acquire(&ctx, "busy", DEFAULT_LOCK_WAIT).await.unwrap();
        let err = locks
            .acquire(&ctx, "busy", Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionBusy(_)));
    }

    #[tokio::test]
    async fn cancellation_while_waiting_is_cancelled() {
        let locks = Arc::new(LockRegistry::new());
        let ctx = Ctx::background();
        let _held = locks.acquire(&ctx, "c", DEFAULT_LOCK_WAIT).await.unwrap();

        let waiter_ctx = ctx.child();
        let locks2 = Arc::clone(&locks);
        let cancel_ctx = waiter_ctx.clone();
        let waiter = tokio::spawn(async move {
            locks2.acquire(&cancel_ctx, "c", DEFAULT_LOCK_WAIT).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        waiter_ctx.cancel();
        assert!(matches!(waiter.await.unwrap(), Err(Error::Cancelled)));
    }
}
