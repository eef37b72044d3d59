use crate::errors::ScoringError;
use crate::scoring::provider::ScoreProvider;
use crate::scoring::request::ScoringRequest;
use async_trait::async_trait;
use failsafe::futures::CircuitBreaker;
use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::time::Duration;

/// Breaker type produced by [`create_provider_circuit_breaker`].
pub type ProviderBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// Creates a circuit breaker for the risk provider to prevent cascading timeouts.
///
/// # Configuration
///
/// - **Failure threshold**: `threshold` consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// # States
///
/// - **CLOSED**: Normal operation, requests pass through.
/// - **OPEN**: Too many failures, requests fail fast.
/// - **HALF_OPEN**: Testing if service recovered.
pub fn create_provider_circuit_breaker(threshold: u32) -> ProviderBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(threshold, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

/// `ScoreProvider` decorator that stops calling a provider that keeps failing.
///
/// Only timeouts and unavailability count as failures; an invalid request says
/// nothing about the provider's health.
pub struct CircuitBreakingProvider<P> {
    inner: P,
    breaker: ProviderBreaker,
}

impl<P: ScoreProvider> CircuitBreakingProvider<P> {
    pub fn new(inner: P, failure_threshold: u32) -> Self {
        Self {
            inner,
            breaker: create_provider_circuit_breaker(failure_threshold),
        }
    }

    pub fn is_call_permitted(&self) -> bool {
        self.breaker.is_call_permitted()
    }
}

#[async_trait]
impl<P: ScoreProvider> ScoreProvider for CircuitBreakingProvider<P> {
    async fn get_score(&self, request: &ScoringRequest) -> Result<u8, ScoringError> {
        let call = self.inner.get_score(request);
        match self
            .breaker
            .call_with(|e: &ScoringError| e.is_provider_failure(), call)
            .await
        {
            Ok(score) => Ok(score),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => {
                tracing::warn!(
                    "Circuit open for '{}' risk provider, skipping call",
                    self.inner.name()
                );
                Err(ScoringError::ProviderUnavailable(
                    "circuit breaker open".to_string(),
                ))
            }
        }
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
