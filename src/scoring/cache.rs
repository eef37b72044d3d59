use crate::errors::CacheError;
use crate::scoring::request::{Fingerprint, ScoreResult, ScoreSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// A cached provider answer with its own expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: Fingerprint,
    /// Normalised applicant e-mail, kept for applicant-wide invalidation.
    pub applicant_email: String,
    pub result: ScoreResult,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Time-bounded score store keyed by request fingerprint.
///
/// Backends may be remote, so every operation can fail; callers treat a failed
/// read as a miss and a failed write as a no-op.
#[async_trait]
pub trait ScoreCache: Send + Sync {
    /// Returns the cached result, or `None` when absent or expired.
    async fn get(&self, key: &Fingerprint) -> Result<Option<ScoreResult>, CacheError>;

    /// Stores a FRESH result for `ttl`. Results from any other source are ignored.
    async fn put(
        &self,
        key: &Fingerprint,
        applicant_email: &str,
        result: ScoreResult,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    async fn invalidate(&self, key: &Fingerprint) -> Result<(), CacheError>;

    /// Drops every entry scored for this applicant. Returns how many were removed.
    async fn invalidate_applicant(&self, applicant_email: &str) -> Result<usize, CacheError>;

    /// Purges expired entries. Returns how many were removed.
    async fn sweep(&self) -> Result<usize, CacheError>;

    /// Approximate number of live entries.
    fn entry_count(&self) -> u64;
}

/// In-process `ScoreCache` on top of a moka future cache.
#[derive(Clone)]
pub struct MokaScoreCache {
    cache: Cache<String, CacheEntry>,
}

impl MokaScoreCache {
    /// # Arguments
    ///
    /// * `max_entries` - Capacity bound; moka evicts beyond it.
    /// * `max_ttl` - Hard upper bound on any entry's lifetime.
    pub fn new(max_entries: u64, max_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(max_ttl)
            .build();
        Self { cache }
    }
}

fn normalise_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[async_trait]
impl ScoreCache for MokaScoreCache {
    async fn get(&self, key: &Fingerprint) -> Result<Option<ScoreResult>, CacheError> {
        let Some(entry) = self.cache.get(key.as_str()).await else {
            return Ok(None);
        };

        if entry.is_expired_at(Utc::now()) {
            tracing::debug!("Score cache entry {} expired, purging", key);
            self.cache.invalidate(key.as_str()).await;
            return Ok(None);
        }

        Ok(Some(entry.result))
    }

    async fn put(
        &self,
        key: &Fingerprint,
        applicant_email: &str,
        result: ScoreResult,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if result.source != ScoreSource::Fresh {
            tracing::warn!(
                "Refusing to cache {} score for {}",
                result.source.as_str(),
                key
            );
            return Ok(());
        }

        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| CacheError(format!("TTL out of range: {}", e)))?;
        let entry = CacheEntry {
            key: key.clone(),
            applicant_email: normalise_email(applicant_email),
            result,
            expires_at: Utc::now() + ttl,
        };

        self.cache.insert(key.as_str().to_string(), entry).await;
        Ok(())
    }

    async fn invalidate(&self, key: &Fingerprint) -> Result<(), CacheError> {
        self.cache.invalidate(key.as_str()).await;
        Ok(())
    }

    async fn invalidate_applicant(&self, applicant_email: &str) -> Result<usize, CacheError> {
        let email = normalise_email(applicant_email);
        let keys: Vec<String> = self
            .cache
            .iter()
            .filter(|(_, entry)| entry.applicant_email == email)
            .map(|(key, _)| key.as_ref().clone())
            .collect();

        for key in &keys {
            self.cache.invalidate(key).await;
        }
        if !keys.is_empty() {
            tracing::info!("Invalidated {} cached score(s) for {}", keys.len(), email);
        }
        Ok(keys.len())
    }

    async fn sweep(&self) -> Result<usize, CacheError> {
        let now = Utc::now();
        let expired: Vec<String> = self
            .cache
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.as_ref().clone())
            .collect();

        for key in &expired {
            self.cache.invalidate(key).await;
        }
        self.cache.run_pending_tasks().await;
        Ok(expired.len())
    }

    fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

/// Runs `sweep` every `interval` until the runtime shuts down.
pub fn spawn_cache_sweeper(
    cache: Arc<dyn ScoreCache>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match cache.sweep().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!("Score cache sweep removed {} entries", removed),
                Err(e) => tracing::warn!("Score cache sweep failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::request::ScoringRequest;
    use bigdecimal::BigDecimal;

    fn key(email: &str, amount: i64) -> Fingerprint {
        ScoringRequest::new(email, BigDecimal::from(amount)).fingerprint()
    }

    fn cache() -> MokaScoreCache {
        MokaScoreCache::new(1_000, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_put_then_get_returns_result() {
        let cache = cache();
        let k = key("john@example.com", 15000);
        cache
            .put(&k, "john@example.com", ScoreResult::fresh(25), Duration::from_secs(60))
            .await
            .unwrap();

        let hit = cache.get(&k).await.unwrap().expect("cached entry");
        assert_eq!(hit.score, 25);
        assert_eq!(hit.source, ScoreSource::Fresh);
    }

    #[tokio::test]
    async fn test_miss_on_unknown_key() {
        let cache = cache();
        assert!(cache.get(&key("nobody@example.com", 1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss_and_purged() {
        let cache = cache();
        let k = key("john@example.com", 15000);
        cache
            .put(&k, "john@example.com", ScoreResult::fresh(25), Duration::from_millis(30))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(cache.get(&k).await.unwrap().is_none());
        cache.cache.run_pending_tasks().await;
        assert!(!cache.cache.contains_key(k.as_str()));
    }

    #[tokio::test]
    async fn test_fallback_results_are_not_cached() {
        let cache = cache();
        let k = key("john@example.com", 50000);
        cache
            .put(&k, "john@example.com", ScoreResult::fallback(50), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(cache.get(&k).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let cache = cache();
        let k = key("john@example.com", 15000);
        let ttl = Duration::from_secs(60);
        cache.put(&k, "john@example.com", ScoreResult::fresh(25), ttl).await.unwrap();
        cache.put(&k, "john@example.com", ScoreResult::fresh(35), ttl).await.unwrap();

        assert_eq!(cache.get(&k).await.unwrap().unwrap().score, 35);
    }

    #[tokio::test]
    async fn test_invalidate_applicant_drops_only_their_entries() {
        let cache = cache();
        let ttl = Duration::from_secs(60);
        let john_small = key("john@example.com", 1000);
        let john_large = key("john@example.com", 90000);
        let jane = key("jane@example.com", 1000);
        cache.put(&john_small, "John@Example.com", ScoreResult::fresh(20), ttl).await.unwrap();
        cache.put(&john_large, "john@example.com", ScoreResult::fresh(80), ttl).await.unwrap();
        cache.put(&jane, "jane@example.com", ScoreResult::fresh(40), ttl).await.unwrap();

        let removed = cache.invalidate_applicant("john@example.com").await.unwrap();

        assert_eq!(removed, 2);
        assert!(cache.get(&john_small).await.unwrap().is_none());
        assert!(cache.get(&john_large).await.unwrap().is_none());
        assert!(cache.get(&jane).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_entries() {
        let cache = cache();
        let short = key("a@example.com", 100);
        let long = key("b@example.com", 100);
        cache.put(&short, "a@example.com", ScoreResult::fresh(10), Duration::from_millis(20)).await.unwrap();
        cache.put(&long, "b@example.com", ScoreResult::fresh(10), Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let removed = cache.sweep().await.unwrap();

        assert_eq!(removed, 1);
        assert_eq!(cache.entry_count(), 1);
        assert!(cache.get(&long).await.unwrap().is_some());
    }
}
