//! Input validation for application requests.
//!
//! Runs before any scoring attempt, so a malformed request never reaches the
//! risk provider.

use crate::config::Config;
use crate::errors::AppError;
use crate::models::{CreateApplicationRequest, NewApplicant, NewLoanApplication};
use bigdecimal::BigDecimal;
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use std::sync::OnceLock;

/// Limits applied to incoming applications.
#[derive(Debug, Clone)]
pub struct ApplicationRules {
    pub min_loan_amount: BigDecimal,
    pub default_currency: String,
    pub phone_region: CountryId,
}

impl ApplicationRules {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_loan_amount: config.min_loan_amount.clone(),
            default_currency: config.default_currency.clone(),
            phone_region: config.phone_region,
        }
    }
}

impl Default for ApplicationRules {
    fn default() -> Self {
        Self {
            min_loan_amount: BigDecimal::from(100),
            default_currency: "USD".to_string(),
            phone_region: CountryId::US,
        }
    }
}

/// Amounts are stored as `NUMERIC(12, 2)`: ten integer digits at most.
const MAX_AMOUNT_DIGITS: u64 = 12;

fn max_loan_amount() -> BigDecimal {
    BigDecimal::new(999_999_999_999u64.into(), 2)
}

fn email_regex() -> &'static Regex {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    // RFC 5322 simplified: local@domain.tld
    EMAIL_RE.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
        )
        .expect("email regex is valid")
    })
}

/// Trims and lowercases an e-mail address, rejecting malformed ones.
pub fn normalize_email(raw: &str) -> Result<String, String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        return Err("Email is required in applicant data".to_string());
    }
    if email.len() > 254 || !email_regex().is_match(&email) {
        tracing::warn!("Invalid email format: {}", email);
        return Err(format!("Invalid email address: {}", raw.trim()));
    }
    Ok(email)
}

/// Normalises a phone number to E.164. National numbers are read in `region`.
/// An empty input stays empty.
pub fn normalize_phone(raw: &str, region: CountryId) -> Result<String, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(String::new());
    }

    match phonenumber::parse(Some(region), raw) {
        Ok(number) if phonenumber::is_valid(&number) => {
            Ok(number.format().mode(Mode::E164).to_string())
        }
        Ok(_) => {
            tracing::warn!("Invalid phone number: {}", raw);
            Err(format!("Invalid phone number: {}", raw))
        }
        Err(e) => {
            tracing::warn!("Failed to parse phone '{}': {:?}", raw, e);
            Err(format!("Invalid phone number: {}", raw))
        }
    }
}

/// Checks a create request and splits it into applicant and loan parts.
pub fn validate_create_request(
    request: &CreateApplicationRequest,
    rules: &ApplicationRules,
) -> Result<(NewApplicant, NewLoanApplication), AppError> {
    let (Some(applicant), Some(amount)) = (request.applicant.as_ref(), request.amount.as_ref())
    else {
        return Err(AppError::BadRequest(
            "Applicant data and amount are required".to_string(),
        ));
    };

    let email = normalize_email(applicant.email.as_deref().unwrap_or_default())
        .map_err(AppError::BadRequest)?;
    let phone = applicant
        .phone
        .as_deref()
        .map(|raw| normalize_phone(raw, rules.phone_region))
        .transpose()
        .map_err(AppError::BadRequest)?;
    let name = applicant.name.as_deref().map(|n| n.trim().to_string());
    if name.as_ref().is_some_and(|n| n.chars().count() > 100) {
        return Err(AppError::BadRequest(
            "Applicant name must be at most 100 characters".to_string(),
        ));
    }

    if *amount < rules.min_loan_amount {
        return Err(AppError::BadRequest(format!(
            "Amount must be at least {}",
            rules.min_loan_amount
        )));
    }
    if amount.with_scale(2) != *amount {
        return Err(AppError::BadRequest(
            "Amount must have at most 2 decimal places".to_string(),
        ));
    }
    if *amount > max_loan_amount() {
        return Err(AppError::BadRequest(format!(
            "Amount must have at most {} digits (max {})",
            MAX_AMOUNT_DIGITS,
            max_loan_amount()
        )));
    }

    let currency = request
        .currency
        .as_deref()
        .map(|c| c.trim().to_uppercase())
        .unwrap_or_else(|| rules.default_currency.clone());
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::BadRequest(format!(
            "Currency '{}' is not a 3-letter code",
            currency
        )));
    }

    if request.term_months == Some(0) {
        return Err(AppError::BadRequest(
            "term_months must be greater than 0".to_string(),
        ));
    }

    Ok((
        NewApplicant { email, name, phone },
        NewLoanApplication {
            amount: amount.clone(),
            currency,
            term_months: request.term_months,
        },
    ))
}
