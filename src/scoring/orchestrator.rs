use crate::config::ScoringSettings;
use crate::errors::ScoringError;
use crate::scoring::cache::ScoreCache;
use crate::scoring::decision::DecisionPolicy;
use crate::scoring::provider::ScoreProvider;
use crate::scoring::request::{Fingerprint, ScoreResult, ScoredDecision, ScoringRequest};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters of how scores were obtained since startup.
#[derive(Debug, Default)]
pub struct ScoringStats {
    fresh: AtomicU64,
    cached: AtomicU64,
    fallback: AtomicU64,
    invalid: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScoringStatsSnapshot {
    pub fresh: u64,
    pub cached: u64,
    pub fallback: u64,
    pub invalid: u64,
}

impl ScoringStats {
    pub fn snapshot(&self) -> ScoringStatsSnapshot {
        ScoringStatsSnapshot {
            fresh: self.fresh.load(Ordering::Relaxed),
            cached: self.cached.load(Ordering::Relaxed),
            fallback: self.fallback.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
        }
    }
}

enum ProviderOutcome {
    Answered(Result<u8, ScoringError>),
    Cancelled,
}

/// Resolves a score for a request (cache, then provider, then fallback) and
/// applies the decision policy.
///
/// Holds no durable state: the caller persists the returned [`ScoredDecision`].
pub struct ScoringOrchestrator {
    provider: Arc<dyn ScoreProvider>,
    cache: Arc<dyn ScoreCache>,
    policy: DecisionPolicy,
    settings: ScoringSettings,
    stats: ScoringStats,
}

impl ScoringOrchestrator {
    pub fn new(
        provider: Arc<dyn ScoreProvider>,
        cache: Arc<dyn ScoreCache>,
        settings: ScoringSettings,
    ) -> Self {
        Self {
            provider,
            cache,
            policy: DecisionPolicy::new(settings.thresholds),
            settings,
            stats: ScoringStats::default(),
        }
    }

    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }

    pub fn settings(&self) -> &ScoringSettings {
        &self.settings
    }

    pub fn stats(&self) -> ScoringStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn cache_entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Scores `request`. Fails only with `ScoringError::InvalidRequest`.
    pub async fn resolve(&self, request: &ScoringRequest) -> Result<ScoredDecision, ScoringError> {
        self.resolve_until(request, std::future::pending::<()>()).await
    }

    /// Like [`resolve`](Self::resolve), but gives up on the provider as soon as
    /// `cancelled` completes and returns the fallback result instead.
    pub async fn resolve_until<C>(
        &self,
        request: &ScoringRequest,
        cancelled: C,
    ) -> Result<ScoredDecision, ScoringError>
    where
        C: Future<Output = ()>,
    {
        if let Err(e) = request.validate() {
            self.stats.invalid.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }

        let fingerprint = request.fingerprint();

        match self.cache.get(&fingerprint).await {
            Ok(Some(hit)) => {
                tracing::debug!("Score cache HIT for {}", fingerprint);
                self.stats.cached.fetch_add(1, Ordering::Relaxed);
                return Ok(self.decide(fingerprint, hit.into_cached()));
            }
            Ok(None) => {
                tracing::debug!("Score cache MISS for {}", fingerprint);
            }
            Err(e) => {
                tracing::warn!("Score cache read failed, treating as miss: {}", e);
            }
        }

        let timeout = self.settings.provider_timeout;
        let outcome = tokio::select! {
            answered = tokio::time::timeout(timeout, self.provider.get_score(request)) => {
                ProviderOutcome::Answered(
                    answered.unwrap_or(Err(ScoringError::Timeout(timeout))),
                )
            }
            _ = cancelled => ProviderOutcome::Cancelled,
        };

        let result = match outcome {
            ProviderOutcome::Answered(Ok(score)) => {
                let result = ScoreResult::fresh(score);
                if let Err(e) = self
                    .cache
                    .put(
                        &fingerprint,
                        &request.applicant_email,
                        result.clone(),
                        self.settings.cache_ttl,
                    )
                    .await
                {
                    tracing::warn!("Score cache write failed, continuing: {}", e);
                }
                self.stats.fresh.fetch_add(1, Ordering::Relaxed);
                result
            }
            ProviderOutcome::Answered(Err(ScoringError::InvalidRequest(msg))) => {
                self.stats.invalid.fetch_add(1, Ordering::Relaxed);
                return Err(ScoringError::InvalidRequest(msg));
            }
            ProviderOutcome::Answered(Err(e)) => {
                tracing::warn!(
                    "Risk provider '{}' failed for {}, using fallback score {}: {}",
                    self.provider.name(),
                    fingerprint,
                    self.settings.fallback_score,
                    e
                );
                self.fallback()
            }
            ProviderOutcome::Cancelled => {
                tracing::warn!(
                    "Scoring for {} cancelled by caller, using fallback score {}",
                    fingerprint,
                    self.settings.fallback_score
                );
                self.fallback()
            }
        };

        Ok(self.decide(fingerprint, result))
    }

    /// Explicit re-score: drops any cached score for the request and resolves again.
    pub async fn rescore(&self, request: &ScoringRequest) -> Result<ScoredDecision, ScoringError> {
        if let Err(e) = self.cache.invalidate(&request.fingerprint()).await {
            tracing::warn!("Score cache invalidation failed before re-score: {}", e);
        }
        self.resolve(request).await
    }

    /// Forgets every cached score for an applicant whose data changed.
    pub async fn invalidate_applicant(&self, applicant_email: &str) -> usize {
        match self.cache.invalidate_applicant(applicant_email).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!("Score cache invalidation failed for {}: {}", applicant_email, e);
                0
            }
        }
    }

    fn fallback(&self) -> ScoreResult {
        self.stats.fallback.fetch_add(1, Ordering::Relaxed);
        ScoreResult::fallback(self.settings.fallback_score)
    }

    fn decide(&self, fingerprint: Fingerprint, result: ScoreResult) -> ScoredDecision {
        let outcome = self.policy.decide(result.score);
        tracing::info!(
            "Scored {}: score={} source={} outcome={}",
            fingerprint,
            result.score,
            result.source.as_str(),
            outcome.as_str()
        );
        ScoredDecision {
            fingerprint,
            result,
            outcome,
        }
    }
}
