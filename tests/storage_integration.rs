use bigdecimal::BigDecimal;
use std::env;
use uuid::Uuid;

use loan_scoring_api::db::Database;
use loan_scoring_api::db_storage::PgApplicationStore;
use loan_scoring_api::errors::AppError;
use loan_scoring_api::models::{ApplicationStatus, NewApplicant, NewLoanApplication};
use loan_scoring_api::scoring::{
    DecisionOutcome, ScoreResult, ScoreSource, ScoredDecision, ScoringRequest,
};
use loan_scoring_api::storage::ApplicationStore;

/// Integration smoke test for the Postgres application store.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn scored_application_round_trip_smoke_test() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    db.ensure_schema().await?;
    let store = PgApplicationStore::new(db.pool.clone());

    // Unique e-mail to avoid conflicts on repeated runs.
    let email = format!("smoke-{}@example.com", Uuid::new_v4().simple());
    let applicant = NewApplicant {
        email: email.clone(),
        name: Some("Smoke Test".to_string()),
        phone: None,
    };
    let loan = NewLoanApplication {
        amount: BigDecimal::from(15000),
        currency: "USD".to_string(),
        term_months: Some(12),
    };
    let fallback = ScoredDecision {
        fingerprint: ScoringRequest::new(email.clone(), BigDecimal::from(15000)).fingerprint(),
        result: ScoreResult::fallback(50),
        outcome: DecisionOutcome::ManualReview,
    };

    let created = store
        .create_scored_application(&applicant, &loan, &fallback)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(created.status, ApplicationStatus::ManualReview);
    assert_eq!(created.applicant.email, email);

    let fetched = store
        .get_application(created.id)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .ok_or_else(|| anyhow::anyhow!("application not found after insert"))?;
    let scoring = fetched
        .scoring
        .ok_or_else(|| anyhow::anyhow!("scoring record missing"))?;
    assert_eq!(scoring.risk_score, 50);
    assert_eq!(scoring.score_source, ScoreSource::Fallback);

    let fresh = ScoredDecision {
        result: ScoreResult::fresh(20),
        outcome: DecisionOutcome::AutoApproved,
        ..fallback
    };
    let rescored = store
        .record_rescore(created.id, &fresh)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(rescored.status, ApplicationStatus::Approved);

    let refused = store
        .update_status(created.id, ApplicationStatus::Rejected)
        .await;
    assert!(matches!(refused, Err(AppError::Conflict(_))));

    Ok(())
}
