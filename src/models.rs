use crate::scoring::{DecisionOutcome, ScoreSource, ScoredDecision};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

// ============ Domain Models ============

/// A person applying for loans. Identified by e-mail.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Applicant {
    pub id: Uuid,
    pub name: String,
    /// Lowercased e-mail, unique per applicant.
    pub email: String,
    /// E.164 phone number, empty when not provided.
    pub phone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle status of a loan application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
    ManualReview,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::ManualReview => "manual_review",
        }
    }
}

impl FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ApplicationStatus::Pending),
            "approved" => Ok(ApplicationStatus::Approved),
            "rejected" => Ok(ApplicationStatus::Rejected),
            "manual_review" => Ok(ApplicationStatus::ManualReview),
            other => Err(format!("unknown application status '{}'", other)),
        }
    }
}

impl From<DecisionOutcome> for ApplicationStatus {
    fn from(outcome: DecisionOutcome) -> Self {
        match outcome {
            DecisionOutcome::AutoApproved => ApplicationStatus::Approved,
            DecisionOutcome::AutoRejected => ApplicationStatus::Rejected,
            DecisionOutcome::ManualReview => ApplicationStatus::ManualReview,
        }
    }
}

/// The persisted association between an application and the score that decided it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringRecord {
    pub risk_score: u8,
    pub score_source: ScoreSource,
    pub decision: DecisionOutcome,
    pub fingerprint: String,
    pub scored_at: DateTime<Utc>,
}

impl From<&ScoredDecision> for ScoringRecord {
    fn from(decision: &ScoredDecision) -> Self {
        Self {
            risk_score: decision.result.score,
            score_source: decision.result.source,
            decision: decision.outcome,
            fingerprint: decision.fingerprint.as_str().to_string(),
            scored_at: decision.result.obtained_at,
        }
    }
}

/// A loan application with its applicant and latest scoring record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanApplication {
    pub id: Uuid,
    pub applicant: Applicant,
    pub amount: BigDecimal,
    pub currency: String,
    pub term_months: Option<u32>,
    pub status: ApplicationStatus,
    pub scoring: Option<ScoringRecord>,
    pub external_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============ Database Rows ============

/// Flat row of `loan_applications` joined with `applicants`.
#[derive(Debug, Clone, FromRow)]
pub struct LoanApplicationRow {
    pub id: Uuid,
    pub applicant_id: Uuid,
    pub applicant_name: String,
    pub applicant_email: String,
    pub applicant_phone: String,
    pub applicant_created_at: DateTime<Utc>,
    pub applicant_updated_at: DateTime<Utc>,
    pub amount: BigDecimal,
    pub currency: String,
    pub term_months: Option<i32>,
    pub status: String,
    pub risk_score: Option<i16>,
    pub score_source: Option<String>,
    pub decision: Option<String>,
    pub fingerprint: Option<String>,
    pub scored_at: Option<DateTime<Utc>>,
    pub external_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn parse_decision(raw: &str) -> Result<DecisionOutcome, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| format!("unknown decision '{}'", raw))
}

impl TryFrom<LoanApplicationRow> for LoanApplication {
    type Error = String;

    fn try_from(row: LoanApplicationRow) -> Result<Self, Self::Error> {
        let scoring = match (row.risk_score, row.score_source, row.decision, row.scored_at) {
            (Some(score), Some(source), Some(decision), Some(scored_at)) => Some(ScoringRecord {
                risk_score: u8::try_from(score)
                    .map_err(|_| format!("stored risk score {} out of range", score))?,
                score_source: source.parse()?,
                decision: parse_decision(&decision)?,
                fingerprint: row.fingerprint.unwrap_or_default(),
                scored_at,
            }),
            _ => None,
        };

        Ok(LoanApplication {
            id: row.id,
            applicant: Applicant {
                id: row.applicant_id,
                name: row.applicant_name,
                email: row.applicant_email,
                phone: row.applicant_phone,
                created_at: row.applicant_created_at,
                updated_at: row.applicant_updated_at,
            },
            amount: row.amount,
            currency: row.currency,
            term_months: row.term_months.and_then(|t| u32::try_from(t).ok()),
            status: row.status.parse()?,
            scoring,
            external_reference: row.external_reference,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ============ Request / Response Payloads ============

/// Applicant block of a create request. Fields are optional so that missing
/// values produce a 400 with a useful message instead of a deserialization error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicantInput {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Body of `POST /api/v1/applications`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateApplicationRequest {
    #[serde(default)]
    pub applicant: Option<ApplicantInput>,
    pub amount: Option<BigDecimal>,
    pub currency: Option<String>,
    pub term_months: Option<u32>,
}

/// Body of `PATCH /api/v1/applications/:id/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: ApplicationStatus,
}

/// Validated applicant data ready to be upserted. `None` keeps the stored value
/// of an existing applicant (empty for a new one).
#[derive(Debug, Clone, PartialEq)]
pub struct NewApplicant {
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
}

impl NewApplicant {
    /// True when this input would change the stored applicant's details.
    pub fn differs_from(&self, stored: &Applicant) -> bool {
        self.name.as_ref().is_some_and(|name| *name != stored.name)
            || self.phone.as_ref().is_some_and(|phone| *phone != stored.phone)
    }
}

/// Validated loan data ready to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLoanApplication {
    pub amount: BigDecimal,
    pub currency: String,
    pub term_months: Option<u32>,
}
