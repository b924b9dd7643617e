// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-provider model catalogue: a bounded TTL cache over `Provider::models`
//! with coalesced refresh.
//!
//! The catalogue slot is an async mutex held across the upstream call, so
//! concurrent lookups that miss the TTL incur exactly one refresh; the
//! others wait on the slot and read the freshly cached result.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::context::Ctx;
use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::types::Model;

/// Default catalogue TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

struct CachedCatalog {
    fetched_at: Instant,
    models: Vec<Model>,
}

pub struct ModelCache {
    ttl: Duration,
    catalog: Mutex<Option<CachedCatalog>>,
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ModelCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, catalog: Mutex::new(None) }
    }

    /// All models, refreshing from the provider when the cache is stale.
    pub async fn list(&self, ctx: &Ctx, provider: &dyn Provider) -> Result<Vec<Model>> {
        let mut slot = self.catalog.lock().await;
        self.ensure_fresh(ctx, provider, &mut slot).await?;
        Ok(slot.as_ref().map(|c| c.models.clone()).unwrap_or_default())
    }

    /// Look up one model by id or alias, refreshing when stale.
    pub async fn get(&self, ctx: &Ctx, provider: &dyn Provider, name: &str) -> Result<Model> {
        let mut slot = self.catalog.lock().await;
        self.ensure_fresh(ctx, provider, &mut slot).await?;
        slot.as_ref()
            .and_then(|c| c.models.iter().find(|m| m.matches(name)).cloned())
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "model '{}' is not served by provider '{}'",
                    name,
                    provider.name()
                ))
            })
    }

    /// Drop the cached catalogue so the next lookup refreshes.
    pub async fn invalidate(&self) {
        *self.catalog.lock().await = None;
    }

    async fn ensure_fresh(
        &self,
        ctx: &Ctx,
        provider: &dyn Provider,
        slot: &mut Option<CachedCatalog>,
    ) -> Result<()> {
        let fresh = slot
            .as_ref()
            .is_some_and(|c| c.fetched_at.elapsed() < self.ttl);
        if !fresh {
            let models = provider.models(ctx).await?;
            *slot = Some(CachedCatalog { fetched_at: Instant::now(), models });
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::provider::{DeltaStream, GenerateRequest};
    use crate::types::Capabilities;

    struct CountingProvider {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Provider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        async fn models(&self, _ctx: &Ctx) -> Result<Vec<Model>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(vec![Model {
                id: "m1".into(),
                display_name: "M1".into(),
                provider: "counting".into(),
                aliases: vec!["one".into()],
                capabilities: Capabilities::chat(),
            }])
        }

        async fn generate(&self, _ctx: &Ctx, _req: &GenerateRequest) -> Result<DeltaStream> {
            unimplemented!("not exercised")
        }
    }

    #[tokio::test]
    async fn lookup_hits_cache_within_ttl() {
        let p = CountingProvider { calls: AtomicUsize::new(0), delay: Duration::ZERO };
        let cache = ModelCache::new(Duration::from_secs(3600));
        let ctx = Ctx::background();
        cache.get(&ctx, &p, "m1").await.unwrap();
        cache.get(&ctx, &p, "one").await.unwrap();
        cache.list(&ctx, &p).await.unwrap();
        assert_eq!(p.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_lookups_coalesce_to_one_refresh() {
        let p = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(50),
        });
        let cache = Arc::new(ModelCache::new(Duration::from_secs(3600)));
        let ctx = Ctx::background();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let (p, cache, ctx) = (Arc::clone(&p), Arc::clone(&cache), ctx.clone());
            tasks.push(tokio::spawn(async move {
                cache.get(&ctx, p.as_ref(), "m1").await.unwrap()
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(p.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_ttl_triggers_refresh() {
        let p = CountingProvider { calls: AtomicUsize::new(0), delay: Duration::ZERO };
        let cache = ModelCache::new(Duration::ZERO);
        let ctx = Ctx::background();
        cache.get(&ctx, &p, "m1").await.unwrap();
        cache.get(&ctx, &p, "m1").await.unwrap();
        assert_eq!(p.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_model_is_not_found() {
        let p = CountingProvider { calls: AtomicUsize::new(0), delay: Duration::ZERO };
        let cache = ModelCache::default();
        let err = cache
            .get(&Ctx::background(), &p, "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn invalidate_forces_refresh() {
        let p = CountingProvider { calls: AtomicUsize::new(0), delay: Duration::ZERO };
        let cache = ModelCache::new(Duration::from_secs(3600));
        let ctx = Ctx::background();
        cache.get(&ctx, &p, "m1").await.unwrap();
        cache.invalidate().await;
        cache.get(&ctx, &p, "m1").await.unwrap();
        assert_eq!(p.calls.load(Ordering::SeqCst), 2);
    }
}
