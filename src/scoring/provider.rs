use crate::circuit_breaker::CircuitBreakingProvider;
use crate::config::{ProviderConfig, ScoringSettings};
use crate::errors::{AppError, ScoringError};
use crate::scoring::request::ScoringRequest;
use async_trait::async_trait;
use bigdecimal::ToPrimitive;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// The external risk-scoring dependency.
///
/// Implementations must not touch shared state beyond the outbound call and must
/// bound their own latency.
#[async_trait]
pub trait ScoreProvider: Send + Sync {
    /// Returns a risk score in `[0, 100]`.
    async fn get_score(&self, request: &ScoringRequest) -> Result<u8, ScoringError>;

    /// Short label used in logs.
    fn name(&self) -> &'static str;
}

#[derive(Debug, Deserialize)]
struct RiskScoreResponse {
    score: f64,
}

/// Client for the HTTP risk scoring service.
#[derive(Clone)]
pub struct RemoteScoreProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
    timeout: Duration,
}

impl RemoteScoreProvider {
    /// Creates a new `RemoteScoreProvider`.
    ///
    /// # Arguments
    ///
    /// * `url` - Endpoint receiving the scoring POST.
    /// * `api_key` - Bearer credential for the service.
    /// * `timeout` - Upper bound for one scoring call, connect included.
    pub fn new(url: String, api_key: String, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("LoanApplicationAPI/1.0")
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create risk service client: {}", e))
            })?;

        Ok(Self {
            client,
            url,
            api_key,
            timeout,
        })
    }
}

#[async_trait]
impl ScoreProvider for RemoteScoreProvider {
    async fn get_score(&self, request: &ScoringRequest) -> Result<u8, ScoringError> {
        request.validate()?;

        let amount = request.amount.to_f64().ok_or_else(|| {
            ScoringError::InvalidRequest("amount is not representable".to_string())
        })?;
        let fingerprint = request.fingerprint();
        let body = json!({
            "applicant": {
                "name": request.applicant_name,
                "email": request.applicant_email,
                "phone": request.applicant_phone,
            },
            "loan_amount": amount,
            "currency": request.currency,
            "term_months": request.term_months,
            "request_id": format!("loanapp_{}", &fingerprint.as_str()[..16]),
        });

        tracing::debug!("Requesting risk score from {}", self.url);

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScoringError::Timeout(self.timeout)
                } else {
                    ScoringError::ProviderUnavailable(format!("Risk service request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ScoringError::ProviderUnavailable(format!(
                "Risk service returned {}: {}",
                status, error_text
            )));
        }

        let parsed: RiskScoreResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ScoringError::Timeout(self.timeout)
            } else {
                ScoringError::ProviderUnavailable(format!(
                    "Failed to parse risk service response: {}",
                    e
                ))
            }
        })?;

        if !parsed.score.is_finite() || !(0.0..=100.0).contains(&parsed.score) {
            return Err(ScoringError::ProviderUnavailable(format!(
                "Risk service returned out-of-range score {}",
                parsed.score
            )));
        }

        Ok(parsed.score.round() as u8)
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

/// Reproducible pseudo-scoring for environments without the risk service.
#[derive(Debug, Clone, Default)]
pub struct MockScoreProvider;

const PERSONAL_DOMAINS: [&str; 3] = ["gmail.com", "yahoo.com", "hotmail.com"];
const INSTITUTIONAL_DOMAINS: [&str; 3] = [".edu", ".gov", ".org"];

/// Deterministic score for a request: base 50, loan size, e-mail domain and
/// name completeness, plus a jitter in `[-12, 12]` seeded from email and amount.
pub fn mock_score(request: &ScoringRequest) -> u8 {
    let email = request.applicant_email.trim().to_lowercase();
    let amount = request.amount.to_f64().unwrap_or(0.0).max(0.0);

    let mut score = 50.0;
    score += (amount / 10_000.0 * 12.0).min(25.0);

    if PERSONAL_DOMAINS.iter().any(|d| email.contains(d)) {
        score += 5.0;
    } else if INSTITUTIONAL_DOMAINS.iter().any(|d| email.contains(d)) {
        score -= 8.0;
    }

    if request.applicant_name.split_whitespace().count() >= 2 {
        score -= 4.0;
    }

    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    hasher.update(request.amount.with_scale(2).to_string().as_bytes());
    let digest = hasher.finalize();
    let seed = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    score += f64::from(seed % 25) - 12.0;

    score.round().clamp(0.0, 100.0) as u8
}

#[async_trait]
impl ScoreProvider for MockScoreProvider {
    async fn get_score(&self, request: &ScoringRequest) -> Result<u8, ScoringError> {
        request.validate()?;
        Ok(mock_score(request))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Builds the provider selected by configuration. The remote variant sits behind
/// a circuit breaker so a dead service fails fast instead of costing a timeout
/// per request.
pub fn build_provider(
    provider: &ProviderConfig,
    settings: &ScoringSettings,
) -> Result<Arc<dyn ScoreProvider>, AppError> {
    match provider {
        ProviderConfig::Mock => Ok(Arc::new(MockScoreProvider)),
        ProviderConfig::Remote { url, api_key } => {
            let remote =
                RemoteScoreProvider::new(url.clone(), api_key.clone(), settings.provider_timeout)?;
            Ok(Arc::new(CircuitBreakingProvider::new(
                remote,
                settings.breaker_failure_threshold,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn request(email: &str, amount: &str) -> ScoringRequest {
        ScoringRequest::new(email, BigDecimal::from_str(amount).unwrap())
    }

    #[test]
    fn test_mock_score_is_reproducible() {
        let a = request("john@example.com", "15000").with_name("John Doe");
        let b = request("john@example.com", "15000").with_name("John Doe");
        assert_eq!(mock_score(&a), mock_score(&b));
    }

    #[test]
    fn test_mock_score_domain_adjustment_bounds_difference() {
        // Domains differ by 13 points and jitters by at most 24.
        let personal = mock_score(&request("someone@gmail.com", "5000"));
        let institutional = mock_score(&request("someone@state.gov", "5000"));
        assert!(personal <= 100);
        assert!(institutional <= 100);
        assert!(i16::from(institutional) - i16::from(personal) <= 24 - 13);
    }

    #[test]
    fn test_mock_score_caps_amount_contribution() {
        let huge = request("a@b.co", "100000000");
        let score = mock_score(&huge);
        // 50 + 25 + jitter in [-12, 12]
        assert!((63..=87).contains(&score), "score {} out of band", score);
    }

    #[tokio::test]
    async fn test_mock_provider_rejects_invalid_request() {
        let provider = MockScoreProvider;
        let result = provider.get_score(&request("john@example.com", "0")).await;
        assert!(matches!(result, Err(ScoringError::InvalidRequest(_))));
    }

    #[test]
    fn test_build_mock_provider() {
        let provider = build_provider(&ProviderConfig::Mock, &ScoringSettings::default()).unwrap();
        assert_eq!(provider.name(), "mock");
    }

    #[tokio::test]
    async fn test_remote_client_creation() {
        let provider = RemoteScoreProvider::new(
            "https://risk.example.com/score".to_string(),
            "key".to_string(),
            Duration::from_secs(3),
        );
        assert!(provider.is_ok());
    }
}
