use crate::errors::AppError;
use crate::models::{
    Applicant, ApplicationStatus, LoanApplication, NewApplicant, NewLoanApplication, ScoringRecord,
};
use crate::scoring::ScoredDecision;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Persistence of applicants and scored applications.
///
/// Every write that stores a score stores the matching status in the same
/// atomic step, so a record's status always reflects the score that produced it.
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn find_applicant_by_email(&self, email: &str) -> Result<Option<Applicant>, AppError>;

    /// Upserts the applicant (by e-mail) and inserts the scored application.
    async fn create_scored_application(
        &self,
        applicant: &NewApplicant,
        loan: &NewLoanApplication,
        decision: &ScoredDecision,
    ) -> Result<LoanApplication, AppError>;

    async fn get_application(&self, id: Uuid) -> Result<Option<LoanApplication>, AppError>;

    /// Sets a manual decision. Fails with `Conflict` unless the application is
    /// currently in manual review.
    async fn update_status(
        &self,
        id: Uuid,
        status: ApplicationStatus,
    ) -> Result<LoanApplication, AppError>;

    /// Overwrites the scoring record and status of an application in manual
    /// review. Fails with `Conflict` for any other status.
    async fn record_rescore(
        &self,
        id: Uuid,
        decision: &ScoredDecision,
    ) -> Result<LoanApplication, AppError>;
}

#[derive(Default)]
struct InMemoryState {
    applicants: HashMap<String, Applicant>,
    applications: HashMap<Uuid, LoanApplication>,
}

/// A thread-safe in-memory store, for tests and for running without Postgres.
///
/// A single `RwLock` guards applicants and applications together, so each
/// operation is atomic.
#[derive(Default, Clone)]
pub struct InMemoryApplicationStore {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryApplicationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn conflict_unless_manual_review(app: &LoanApplication) -> Result<(), AppError> {
    if app.status != ApplicationStatus::ManualReview {
        return Err(AppError::Conflict(format!(
            "Only manual review applications can be updated (application {} is {})",
            app.id,
            app.status.as_str()
        )));
    }
    Ok(())
}

#[async_trait]
impl ApplicationStore for InMemoryApplicationStore {
    async fn find_applicant_by_email(&self, email: &str) -> Result<Option<Applicant>, AppError> {
        let state = self.state.read().await;
        Ok(state.applicants.get(email).cloned())
    }

    async fn create_scored_application(
        &self,
        applicant: &NewApplicant,
        loan: &NewLoanApplication,
        decision: &ScoredDecision,
    ) -> Result<LoanApplication, AppError> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let stored = state
            .applicants
            .entry(applicant.email.clone())
            .and_modify(|existing| {
                if applicant.differs_from(existing) {
                    if let Some(name) = &applicant.name {
                        existing.name = name.clone();
                    }
                    if let Some(phone) = &applicant.phone {
                        existing.phone = phone.clone();
                    }
                    existing.updated_at = now;
                }
            })
            .or_insert_with(|| Applicant {
                id: Uuid::new_v4(),
                name: applicant.name.clone().unwrap_or_default(),
                email: applicant.email.clone(),
                phone: applicant.phone.clone().unwrap_or_default(),
                created_at: now,
                updated_at: now,
            })
            .clone();

        let application = LoanApplication {
            id: Uuid::new_v4(),
            applicant: stored,
            amount: loan.amount.clone(),
            currency: loan.currency.clone(),
            term_months: loan.term_months,
            status: decision.outcome.into(),
            scoring: Some(ScoringRecord::from(decision)),
            external_reference: None,
            created_at: now,
            updated_at: now,
        };
        state
            .applications
            .insert(application.id, application.clone());

        Ok(application)
    }

    async fn get_application(&self, id: Uuid) -> Result<Option<LoanApplication>, AppError> {
        let state = self.state.read().await;
        let Some(app) = state.applications.get(&id) else {
            return Ok(None);
        };
        // Applicant details may have changed since the application was filed
        let mut app = app.clone();
        if let Some(applicant) = state.applicants.get(&app.applicant.email) {
            app.applicant = applicant.clone();
        }
        Ok(Some(app))
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: ApplicationStatus,
    ) -> Result<LoanApplication, AppError> {
        let mut state = self.state.write().await;
        let app = state
            .applications
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Application {} not found", id)))?;
        conflict_unless_manual_review(app)?;

        app.status = status;
        app.updated_at = Utc::now();
        Ok(app.clone())
    }

    async fn record_rescore(
        &self,
        id: Uuid,
        decision: &ScoredDecision,
    ) -> Result<LoanApplication, AppError> {
        let mut state = self.state.write().await;
        let app = state
            .applications
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Application {} not found", id)))?;
        conflict_unless_manual_review(app)?;

        app.status = decision.outcome.into();
        app.scoring = Some(ScoringRecord::from(decision));
        app.updated_at = Utc::now();
        Ok(app.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{DecisionOutcome, ScoreResult, ScoreSource, ScoringRequest};
    use bigdecimal::BigDecimal;

    fn applicant(name: &str, phone: Option<&str>) -> NewApplicant {
        NewApplicant {
            email: "john@example.com".to_string(),
            name: Some(name.to_string()),
            phone: phone.map(str::to_string),
        }
    }

    fn loan() -> NewLoanApplication {
        NewLoanApplication {
            amount: BigDecimal::from(15000),
            currency: "USD".to_string(),
            term_months: Some(12),
        }
    }

    fn decision(score: u8, source: ScoreSource, outcome: DecisionOutcome) -> ScoredDecision {
        let result = match source {
            ScoreSource::Fallback => ScoreResult::fallback(score),
            ScoreSource::Cached => ScoreResult::fresh(score).into_cached(),
            ScoreSource::Fresh => ScoreResult::fresh(score),
        };
        ScoredDecision {
            fingerprint: ScoringRequest::new("john@example.com", BigDecimal::from(15000))
                .fingerprint(),
            result,
            outcome,
        }
    }

    #[tokio::test]
    async fn test_create_stores_score_and_matching_status() {
        let store = InMemoryApplicationStore::new();
        let app = store
            .create_scored_application(
                &applicant("John Doe", None),
                &loan(),
                &decision(25, ScoreSource::Fresh, DecisionOutcome::AutoApproved),
            )
            .await
            .unwrap();

        assert_eq!(app.status, ApplicationStatus::Approved);
        assert_eq!(app.scoring.as_ref().unwrap().risk_score, 25);

        let fetched = store.get_application(app.id).await.unwrap().unwrap();
        assert_eq!(fetched, app);
    }

    #[tokio::test]
    async fn test_existing_applicant_is_updated_not_duplicated() {
        let store = InMemoryApplicationStore::new();
        let d = decision(50, ScoreSource::Fallback, DecisionOutcome::ManualReview);
        let first = store
            .create_scored_application(&applicant("John", None), &loan(), &d)
            .await
            .unwrap();
        let second = store
            .create_scored_application(&applicant("John Doe", Some("+16502530000")), &loan(), &d)
            .await
            .unwrap();

        assert_eq!(first.applicant.id, second.applicant.id);
        assert_eq!(second.applicant.name, "John Doe");
        let stored = store
            .find_applicant_by_email("john@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.phone, "+16502530000");
    }

    #[tokio::test]
    async fn test_status_update_only_from_manual_review() {
        let store = InMemoryApplicationStore::new();
        let approved = store
            .create_scored_application(
                &applicant("John Doe", None),
                &loan(),
                &decision(10, ScoreSource::Fresh, DecisionOutcome::AutoApproved),
            )
            .await
            .unwrap();
        let result = store
            .update_status(approved.id, ApplicationStatus::Rejected)
            .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        let review = store
            .create_scored_application(
                &applicant("John Doe", None),
                &loan(),
                &decision(50, ScoreSource::Fallback, DecisionOutcome::ManualReview),
            )
            .await
            .unwrap();
        let updated = store
            .update_status(review.id, ApplicationStatus::Approved)
            .await
            .unwrap();
        assert_eq!(updated.status, ApplicationStatus::Approved);
        // Scoring record is kept for audit
        assert_eq!(
            updated.scoring.unwrap().score_source,
            ScoreSource::Fallback
        );
    }

    #[tokio::test]
    async fn test_rescore_overwrites_manual_review_record() {
        let store = InMemoryApplicationStore::new();
        let review = store
            .create_scored_application(
                &applicant("John Doe", None),
                &loan(),
                &decision(50, ScoreSource::Fallback, DecisionOutcome::ManualReview),
            )
            .await
            .unwrap();

        let rescored = store
            .record_rescore(
                review.id,
                &decision(80, ScoreSource::Fresh, DecisionOutcome::AutoRejected),
            )
            .await
            .unwrap();

        assert_eq!(rescored.status, ApplicationStatus::Rejected);
        let record = rescored.scoring.unwrap();
        assert_eq!(record.risk_score, 80);
        assert_eq!(record.score_source, ScoreSource::Fresh);

        // No longer in manual review, a second re-score is refused
        let again = store
            .record_rescore(
                review.id,
                &decision(10, ScoreSource::Fresh, DecisionOutcome::AutoApproved),
            )
            .await;
        assert!(matches!(again, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_missing_application() {
        let store = InMemoryApplicationStore::new();
        let id = Uuid::new_v4();
        assert!(store.get_application(id).await.unwrap().is_none());
        assert!(matches!(
            store.update_status(id, ApplicationStatus::Approved).await,
            Err(AppError::NotFound(_))
        ));
    }
}
