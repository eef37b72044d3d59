use crate::errors::{AppError, ResultExt};
use crate::models::{
    Applicant, ApplicationStatus, LoanApplication, LoanApplicationRow, NewApplicant,
    NewLoanApplication,
};
use crate::scoring::ScoredDecision;
use crate::storage::ApplicationStore;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

const SELECT_APPLICATION: &str = r#"
    SELECT
        la.id, la.applicant_id,
        a.name AS applicant_name, a.email AS applicant_email, a.phone AS applicant_phone,
        a.created_at AS applicant_created_at, a.updated_at AS applicant_updated_at,
        la.amount, la.currency, la.term_months, la.status,
        la.risk_score, la.score_source, la.decision, la.fingerprint, la.scored_at,
        la.external_reference, la.created_at, la.updated_at
    FROM loan_applications la
    JOIN applicants a ON a.id = la.applicant_id
    WHERE la.id = $1
"#;

/// Postgres-backed `ApplicationStore`.
///
/// Scores and statuses are written in a single transaction or a single
/// conditional `UPDATE`, never separately.
pub struct PgApplicationStore {
    pool: PgPool,
}

impl PgApplicationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<LoanApplication, AppError> {
        let row = sqlx::query_as::<_, LoanApplicationRow>(SELECT_APPLICATION)
            .bind(id)
            .fetch_one(&mut **tx)
            .await
            .context("loading stored application")?;
        LoanApplication::try_from(row).map_err(AppError::InternalError)
    }

    /// Resolves why a conditional update touched no row.
    async fn missing_or_conflict(&self, id: Uuid) -> AppError {
        let status = sqlx::query_scalar::<_, String>(
            "SELECT status FROM loan_applications WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await;

        match status {
            Ok(Some(status)) => AppError::Conflict(format!(
                "Only manual review applications can be updated (application {} is {})",
                id, status
            )),
            Ok(None) => AppError::NotFound(format!("Application {} not found", id)),
            Err(e) => AppError::DatabaseError(e),
        }
    }
}

fn term_to_db(term_months: Option<u32>) -> Result<Option<i32>, AppError> {
    term_months
        .map(i32::try_from)
        .transpose()
        .map_err(|_| AppError::BadRequest("term_months is too large".to_string()))
}

#[async_trait]
impl ApplicationStore for PgApplicationStore {
    async fn find_applicant_by_email(&self, email: &str) -> Result<Option<Applicant>, AppError> {
        let applicant = sqlx::query_as::<_, Applicant>(
            "SELECT id, name, email, phone, created_at, updated_at FROM applicants WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Database error in find_applicant_by_email for '{}': {:?}", email, e);
            AppError::DatabaseError(e)
        })?;

        Ok(applicant)
    }

    async fn create_scored_application(
        &self,
        applicant: &NewApplicant,
        loan: &NewLoanApplication,
        decision: &ScoredDecision,
    ) -> Result<LoanApplication, AppError> {
        let term_months = term_to_db(loan.term_months)?;
        let status: ApplicationStatus = decision.outcome.into();

        let mut tx = self.pool.begin().await.context("starting transaction")?;

        // Step 1: Upsert applicant by e-mail
        let applicant_id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO applicants (id, name, email, phone, created_at, updated_at)
            VALUES ($1, COALESCE($2, ''), $3, COALESCE($4, ''), now(), now())
            ON CONFLICT (email) DO UPDATE
            SET name = COALESCE($2, applicants.name),
                phone = COALESCE($4, applicants.phone),
                updated_at = CASE
                    WHEN applicants.name IS DISTINCT FROM COALESCE($2, applicants.name)
                      OR applicants.phone IS DISTINCT FROM COALESCE($4, applicants.phone)
                    THEN now()
                    ELSE applicants.updated_at
                END
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&applicant.name)
        .bind(&applicant.email)
        .bind(&applicant.phone)
        .fetch_one(&mut *tx)
        .await
        .context("upserting applicant")?;

        // Step 2: Insert the application together with its score and status
        let application_id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO loan_applications (
                id, applicant_id, amount, currency, term_months, status,
                risk_score, score_source, decision, fingerprint, scored_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, now(), now())
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(applicant_id.0)
        .bind(&loan.amount)
        .bind(&loan.currency)
        .bind(term_months)
        .bind(status.as_str())
        .bind(i16::from(decision.result.score))
        .bind(decision.result.source.as_str())
        .bind(decision.outcome.as_str())
        .bind(decision.fingerprint.as_str())
        .bind(decision.result.obtained_at)
        .fetch_one(&mut *tx)
        .await
        .context("inserting loan application")?;

        let application = Self::fetch_in_tx(&mut tx, application_id.0).await?;
        tx.commit().await.context("committing application")?;

        tracing::info!(
            "Stored application {} for {} with status {}",
            application.id,
            application.applicant.email,
            application.status.as_str()
        );
        Ok(application)
    }

    async fn get_application(&self, id: Uuid) -> Result<Option<LoanApplication>, AppError> {
        let row = sqlx::query_as::<_, LoanApplicationRow>(SELECT_APPLICATION)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(LoanApplication::try_from)
            .transpose()
            .map_err(AppError::InternalError)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: ApplicationStatus,
    ) -> Result<LoanApplication, AppError> {
        let mut tx = self.pool.begin().await.context("starting transaction")?;

        let updated = sqlx::query(
            r#"
            UPDATE loan_applications
            SET status = $2, updated_at = now()
            WHERE id = $1 AND status = 'manual_review'
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await
        .context("updating application status")?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.context("rolling back status update")?;
            return Err(self.missing_or_conflict(id).await);
        }

        let application = Self::fetch_in_tx(&mut tx, id).await?;
        tx.commit().await.context("committing status update")?;
        Ok(application)
    }

    async fn record_rescore(
        &self,
        id: Uuid,
        decision: &ScoredDecision,
    ) -> Result<LoanApplication, AppError> {
        let status: ApplicationStatus = decision.outcome.into();
        let mut tx = self.pool.begin().await.context("starting transaction")?;

        let updated = sqlx::query(
            r#"
            UPDATE loan_applications
            SET status = $2,
                risk_score = $3,
                score_source = $4,
                decision = $5,
                fingerprint = $6,
                scored_at = $7,
                updated_at = now()
            WHERE id = $1 AND status = 'manual_review'
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(i16::from(decision.result.score))
        .bind(decision.result.source.as_str())
        .bind(decision.outcome.as_str())
        .bind(decision.fingerprint.as_str())
        .bind(decision.result.obtained_at)
        .execute(&mut *tx)
        .await
        .context("recording re-score")?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.context("rolling back re-score")?;
            return Err(self.missing_or_conflict(id).await);
        }

        let application = Self::fetch_in_tx(&mut tx, id).await?;
        tx.commit().await.context("committing re-score")?;
        Ok(application)
    }
}
