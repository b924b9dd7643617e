// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-operation context: a cancellation signal plus an optional deadline,
//! threaded explicitly through every provider, tool, and store call.
//!
//! Suspension points (provider I/O, tool handler I/O, store I/O) race their
//! work against [`Ctx::done`] so cancellation and deadline expiry are both
//! observed at the next await.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct Ctx {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Ctx {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A root context that expires after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Derive a child: cancelling the parent cancels the child, not vice versa.
    /// The parent's deadline is inherited.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derive a child whose deadline is the tighter of the parent's and
    /// `now + timeout`.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        Self {
            cancel: self.cancel.child_token(),
            deadline: Some(match self.deadline {
                Some(d) => d.min(candidate),
                None => candidate,
            }),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Time left until the deadline.  `None` means no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Err(`Cancelled`) once the context is cancelled or past its deadline.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the context is cancelled or its deadline passes.
    /// Never resolves for a background context.
    pub async fn done(&self) {
        match self.deadline {
            Some(d) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(d) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }

    /// Race `fut` against cancellation/deadline, mapping loss to `Cancelled`.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.done() => Err(Error::Cancelled),
            res = fut => res,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_context_is_never_done() {
        let ctx = Ctx::background();
        assert!(!ctx.is_cancelled());
        assert!(ctx.check().is_ok());
        assert!(ctx.remaining().is_none());
    }

    #[tokio::test]
    async fn cancel_propagates_to_children_not_parents() {
        let parent = Ctx::background();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());

        let parent = Ctx::background();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn deadline_expiry_counts_as_cancelled() {
        tokio::time::pause();
        let ctx = Ctx::with_timeout(Duration::from_secs(5));
        assert!(ctx.check().is_ok());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(ctx.is_cancelled());
        assert!(matches!(ctx.check(), Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn child_with_timeout_takes_tighter_deadline() {
        tokio::time::pause();
        let parent = Ctx::with_timeout(Duration::from_secs(100));
        let child = parent.child_with_timeout(Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn run_maps_cancellation_to_error() {
        let ctx = Ctx::background();
        ctx.cancel();
        let res: Result<()> = ctx.run(async { Ok(()) }).await;
        assert!(matches!(res, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn run_passes_through_completed_work() {
        let ctx = Ctx::background();
        let res = ctx.run(async { Ok(7) }).await.unwrap();
        assert_eq!(res, 7);
    }
}
