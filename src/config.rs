use crate::scoring::decision::DecisionThresholds;
use bigdecimal::BigDecimal;
use phonenumber::country::Id as CountryId;
use std::str::FromStr;
use std::time::Duration;

/// Which `ScoreProvider` variant the service runs with.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderConfig {
    /// Deterministic in-process scoring, for environments without the risk service.
    Mock,
    /// HTTP(S) risk service.
    Remote { url: String, api_key: String },
}

/// Tunables consumed by the scoring core. Passed into constructors, never global.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringSettings {
    pub provider_timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_max_entries: u64,
    pub cache_sweep_interval: Duration,
    pub fallback_score: u8,
    pub thresholds: DecisionThresholds,
    /// Consecutive provider failures before the circuit opens.
    pub breaker_failure_threshold: u32,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_millis(3000),
            cache_ttl: Duration::from_secs(3600),
            cache_max_entries: 100_000,
            cache_sweep_interval: Duration::from_secs(60),
            fallback_score: 50,
            thresholds: DecisionThresholds::default(),
            breaker_failure_threshold: 5,
        }
    }
}

impl ScoringSettings {
    /// True when a provider outage would auto-approve or auto-reject instead of
    /// sending the application to manual review.
    pub fn fallback_auto_decides(&self) -> bool {
        !self.thresholds.is_manual_review(self.fallback_score)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.thresholds.validate()?;
        if self.fallback_score > 100 {
            anyhow::bail!("FALLBACK_SCORE must be between 0 and 100");
        }
        if self.provider_timeout.is_zero() {
            anyhow::bail!("RISK_SERVICE_TIMEOUT_MS must be greater than 0");
        }
        if self.cache_ttl.is_zero() {
            anyhow::bail!("SCORE_CACHE_TTL_SECS must be greater than 0");
        }
        if self.breaker_failure_threshold == 0 {
            anyhow::bail!("BREAKER_FAILURE_THRESHOLD must be greater than 0");
        }
        if self.fallback_auto_decides() {
            tracing::warn!(
                "FALLBACK_SCORE {} is outside the manual review band [{}, {}]; provider outages will auto-decide",
                self.fallback_score,
                self.thresholds.approve_below,
                self.thresholds.reject_above
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres URL; when absent the service keeps applications in memory.
    pub database_url: Option<String>,
    pub port: u16,
    pub provider: ProviderConfig,
    pub scoring: ScoringSettings,
    pub min_loan_amount: BigDecimal,
    pub default_currency: String,
    pub phone_region: CountryId,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = match std::env::var("DB_URL").or_else(|_| std::env::var("DATABASE_URL"))
        {
            Ok(url) => {
                if url.trim().is_empty() {
                    anyhow::bail!("DB_URL cannot be empty");
                }
                if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                    anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                }
                Some(url)
            }
            Err(_) => None,
        };

        let provider = match std::env::var("RISK_PROVIDER")
            .unwrap_or_else(|_| "mock".to_string())
            .trim()
            .to_lowercase()
            .as_str()
        {
            "mock" => ProviderConfig::Mock,
            "remote" => {
                let url = std::env::var("RISK_SERVICE_URL")
                    .map_err(|_| {
                        anyhow::anyhow!("RISK_SERVICE_URL required when RISK_PROVIDER=remote")
                    })
                    .and_then(|url| {
                        let parsed = url::Url::parse(url.trim()).map_err(|e| {
                            anyhow::anyhow!("RISK_SERVICE_URL is not a valid URL: {}", e)
                        })?;
                        if parsed.scheme() != "http" && parsed.scheme() != "https" {
                            anyhow::bail!("RISK_SERVICE_URL must start with http:// or https://");
                        }
                        Ok(url.trim().to_string())
                    })?;
                let api_key = std::env::var("RISK_SERVICE_API_KEY")
                    .map_err(|_| {
                        anyhow::anyhow!("RISK_SERVICE_API_KEY required when RISK_PROVIDER=remote")
                    })
                    .and_then(|key| {
                        if key.trim().is_empty() {
                            anyhow::bail!("RISK_SERVICE_API_KEY cannot be empty");
                        }
                        Ok(key)
                    })?;
                ProviderConfig::Remote { url, api_key }
            }
            other => anyhow::bail!("RISK_PROVIDER must be 'mock' or 'remote', got '{}'", other),
        };

        let scoring = ScoringSettings {
            provider_timeout: Duration::from_millis(env_or("RISK_SERVICE_TIMEOUT_MS", 3000u64)?),
            cache_ttl: Duration::from_secs(env_or("SCORE_CACHE_TTL_SECS", 3600u64)?),
            cache_max_entries: env_or("SCORE_CACHE_MAX_ENTRIES", 100_000u64)?,
            cache_sweep_interval: Duration::from_secs(env_or("SCORE_CACHE_SWEEP_SECS", 60u64)?),
            fallback_score: env_or("FALLBACK_SCORE", 50u8)?,
            thresholds: DecisionThresholds {
                approve_below: env_or("DECISION_APPROVE_BELOW", 30u8)?,
                reject_above: env_or("DECISION_REJECT_ABOVE", 70u8)?,
            },
            breaker_failure_threshold: env_or("BREAKER_FAILURE_THRESHOLD", 5u32)?,
        };
        scoring.validate()?;

        let min_loan_amount: BigDecimal = env_or("MIN_LOAN_AMOUNT", BigDecimal::from(100))?;

        let default_currency = std::env::var("DEFAULT_CURRENCY")
            .unwrap_or_else(|_| "USD".to_string())
            .trim()
            .to_uppercase();
        if default_currency.len() != 3 || !default_currency.chars().all(|c| c.is_ascii_alphabetic())
        {
            anyhow::bail!("DEFAULT_CURRENCY must be a 3-letter ISO code");
        }

        let phone_region = std::env::var("PHONE_REGION")
            .unwrap_or_else(|_| "US".to_string())
            .trim()
            .to_uppercase()
            .parse::<CountryId>()
            .map_err(|_| anyhow::anyhow!("PHONE_REGION must be an ISO 3166 alpha-2 code"))?;

        let config = Self {
            database_url,
            port: env_or("PORT", 3000u16)
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            provider,
            scoring,
            min_loan_amount,
            default_currency,
            phone_region,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        match &config.provider {
            ProviderConfig::Mock => tracing::info!("Risk provider: deterministic mock"),
            ProviderConfig::Remote { url, .. } => tracing::info!("Risk provider: remote ({})", url),
        }
        if config.database_url.is_none() {
            tracing::warn!("DB_URL not set, applications are kept in memory");
        }
        tracing::debug!(
            "Scoring: timeout={}ms ttl={}s fallback={} thresholds=<{}/>{}",
            config.scoring.provider_timeout.as_millis(),
            config.scoring.cache_ttl.as_secs(),
            config.scoring.fallback_score,
            config.scoring.thresholds.approve_below,
            config.scoring.thresholds.reject_above
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}

/// Reads and parses an optional environment variable, falling back to `default`.
fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", name, raw, e)),
        _ => Ok(default),
    }
}
