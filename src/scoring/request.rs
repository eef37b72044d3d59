use crate::errors::ScoringError;
use crate::scoring::decision::DecisionOutcome;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Immutable snapshot of the application fields the risk provider looks at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringRequest {
    pub applicant_email: String,
    pub applicant_name: String,
    pub applicant_phone: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub term_months: Option<u32>,
}

impl ScoringRequest {
    pub fn new(applicant_email: impl Into<String>, amount: BigDecimal) -> Self {
        Self {
            applicant_email: applicant_email.into(),
            applicant_name: String::new(),
            applicant_phone: None,
            amount,
            currency: "USD".to_string(),
            term_months: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.applicant_name = name.into();
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.applicant_phone = Some(phone.into());
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_term_months(mut self, term_months: u32) -> Self {
        self.term_months = Some(term_months);
        self
    }

    /// Rejects inputs no provider should ever see.
    pub fn validate(&self) -> Result<(), ScoringError> {
        if self.amount <= BigDecimal::zero() {
            return Err(ScoringError::InvalidRequest(
                "amount must be greater than 0".to_string(),
            ));
        }
        let email = self.applicant_email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(ScoringError::InvalidRequest(
                "applicant email is required".to_string(),
            ));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ScoringError::InvalidRequest(format!(
                "currency '{}' is not a 3-letter code",
                self.currency
            )));
        }
        if self.term_months == Some(0) {
            return Err(ScoringError::InvalidRequest(
                "term_months must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Cache key over the fields that stay constant for an applicant+amount
    /// combination. Name and phone are deliberately left out.
    pub fn fingerprint(&self) -> Fingerprint {
        let material = format!(
            "{}|{}|{}|{}",
            self.applicant_email.trim().to_lowercase(),
            self.amount.with_scale(4),
            self.currency.trim().to_uppercase(),
            self.term_months.map(|t| t.to_string()).unwrap_or_default()
        );
        let mut hasher = Sha256::new();
        hasher.update(material.as_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }
}

/// Hex SHA-256 digest identifying equivalent scoring requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a score came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoreSource {
    Fresh,
    Cached,
    Fallback,
}

impl ScoreSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreSource::Fresh => "FRESH",
            ScoreSource::Cached => "CACHED",
            ScoreSource::Fallback => "FALLBACK",
        }
    }
}

impl FromStr for ScoreSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FRESH" => Ok(ScoreSource::Fresh),
            "CACHED" => Ok(ScoreSource::Cached),
            "FALLBACK" => Ok(ScoreSource::Fallback),
            other => Err(format!("unknown score source '{}'", other)),
        }
    }
}

/// A risk score in `[0, 100]` and its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: u8,
    pub source: ScoreSource,
    pub obtained_at: DateTime<Utc>,
}

impl ScoreResult {
    pub fn fresh(score: u8) -> Self {
        Self {
            score: score.min(100),
            source: ScoreSource::Fresh,
            obtained_at: Utc::now(),
        }
    }

    pub fn fallback(score: u8) -> Self {
        Self {
            score: score.min(100),
            source: ScoreSource::Fallback,
            obtained_at: Utc::now(),
        }
    }

    /// The same score re-labelled as served from cache. `obtained_at` keeps the
    /// time the provider produced it.
    pub fn into_cached(self) -> Self {
        Self {
            source: ScoreSource::Cached,
            ..self
        }
    }
}

/// Everything the persistence layer stores for one scoring attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredDecision {
    pub fingerprint: Fingerprint,
    pub result: ScoreResult,
    pub outcome: DecisionOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amount(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_fingerprint_ignores_name_phone_and_email_case() {
        let a = ScoringRequest::new("John@Example.com", amount("15000"))
            .with_name("John Doe")
            .with_phone("+15551234567");
        let b = ScoringRequest::new("john@example.com ", amount("15000.00"));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_changes_with_amount_and_term() {
        let base = ScoringRequest::new("john@example.com", amount("15000"));
        let other_amount = ScoringRequest::new("john@example.com", amount("15000.01"));
        let with_term = base.clone().with_term_months(12);
        assert_ne!(base.fingerprint(), other_amount.fingerprint());
        assert_ne!(base.fingerprint(), with_term.fingerprint());
        assert_eq!(base.fingerprint().as_str().len(), 64);
    }

    #[test]
    fn test_validate_rejects_non_positive_amount() {
        let zero = ScoringRequest::new("john@example.com", amount("0"));
        let negative = ScoringRequest::new("john@example.com", amount("-10"));
        assert!(matches!(zero.validate(), Err(ScoringError::InvalidRequest(_))));
        assert!(matches!(negative.validate(), Err(ScoringError::InvalidRequest(_))));
    }

    #[test]
    fn test_validate_rejects_missing_email_and_bad_currency() {
        let no_email = ScoringRequest::new("  ", amount("100"));
        assert!(no_email.validate().is_err());

        let bad_currency =
            ScoringRequest::new("john@example.com", amount("100")).with_currency("DOLLARS");
        assert!(bad_currency.validate().is_err());

        let zero_term = ScoringRequest::new("john@example.com", amount("100")).with_term_months(0);
        assert!(zero_term.validate().is_err());
    }

    #[test]
    fn test_cached_result_keeps_score_and_timestamp() {
        let fresh = ScoreResult::fresh(42);
        let cached = fresh.clone().into_cached();
        assert_eq!(cached.score, 42);
        assert_eq!(cached.source, ScoreSource::Cached);
        assert_eq!(cached.obtained_at, fresh.obtained_at);
    }

    #[test]
    fn test_score_is_clamped() {
        assert_eq!(ScoreResult::fresh(250).score, 100);
        assert_eq!(ScoreResult::fallback(101).score, 100);
    }

    #[test]
    fn test_source_round_trips_through_str() {
        for source in [ScoreSource::Fresh, ScoreSource::Cached, ScoreSource::Fallback] {
            assert_eq!(source.as_str().parse::<ScoreSource>().unwrap(), source);
        }
    }
}
