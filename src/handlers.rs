use crate::errors::AppError;
use crate::models::*;
use crate::scoring::{ScoringOrchestrator, ScoringRequest};
use crate::storage::ApplicationStore;
use crate::validation::{validate_create_request, ApplicationRules};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Resolves scores and decisions. Stateless apart from its cache.
    pub orchestrator: Arc<ScoringOrchestrator>,
    /// Applicants and applications.
    pub store: Arc<dyn ApplicationStore>,
    /// Limits checked on every create request.
    pub rules: ApplicationRules,
}

/// Health check endpoint.
///
/// Returns the service status together with scoring counters and the current
/// number of cached scores.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "loan-scoring-api",
            "version": env!("CARGO_PKG_VERSION"),
            "scoring": state.orchestrator.stats(),
            "score_cache_entries": state.orchestrator.cache_entry_count(),
        })),
    )
}

/// Builds the scoring input for an applicant, filling fields the request left
/// out from the stored applicant.
fn scoring_request(
    applicant: &NewApplicant,
    stored: Option<&Applicant>,
    loan: &NewLoanApplication,
) -> ScoringRequest {
    let name = applicant
        .name
        .clone()
        .or_else(|| stored.map(|a| a.name.clone()))
        .unwrap_or_default();
    let phone = applicant
        .phone
        .clone()
        .or_else(|| stored.map(|a| a.phone.clone()))
        .unwrap_or_default();

    let mut request = ScoringRequest::new(applicant.email.clone(), loan.amount.clone())
        .with_name(name)
        .with_currency(loan.currency.clone());
    if !phone.is_empty() {
        request = request.with_phone(phone);
    }
    if let Some(term) = loan.term_months {
        request = request.with_term_months(term);
    }
    request
}

fn stored_scoring_request(app: &LoanApplication) -> ScoringRequest {
    let loan = NewLoanApplication {
        amount: app.amount.clone(),
        currency: app.currency.clone(),
        term_months: app.term_months,
    };
    let applicant = NewApplicant {
        email: app.applicant.email.clone(),
        name: None,
        phone: None,
    };
    scoring_request(&applicant, Some(&app.applicant), &loan)
}

/// POST /api/v1/applications
///
/// Validates the request, scores it and stores the application with the
/// decided status. Scoring never fails the request: when the risk provider is
/// unavailable the application is stored for manual review.
///
/// # Returns
///
/// * `Result<(StatusCode, Json<LoanApplication>), AppError>` - 201 with the stored application.
pub async fn create_application(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateApplicationRequest>,
) -> Result<(StatusCode, Json<LoanApplication>), AppError> {
    let (applicant, loan) = validate_create_request(&payload, &state.rules)?;
    tracing::info!(
        "POST /applications - applicant: {}, amount: {} {}",
        applicant.email,
        loan.amount,
        loan.currency
    );

    let stored = state.store.find_applicant_by_email(&applicant.email).await?;
    if let Some(existing) = &stored {
        if applicant.differs_from(existing) {
            // Scores computed from the old details must not be reused
            state
                .orchestrator
                .invalidate_applicant(&applicant.email)
                .await;
        }
    }

    let request = scoring_request(&applicant, stored.as_ref(), &loan);
    let decision = state.orchestrator.resolve(&request).await?;

    let application = state
        .store
        .create_scored_application(&applicant, &loan, &decision)
        .await?;

    Ok((StatusCode::CREATED, Json(application)))
}

/// GET /api/v1/applications/:id
pub async fn get_application(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<LoanApplication>, AppError> {
    tracing::info!("GET /applications/{}", id);

    let application = state
        .store
        .get_application(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Application {} not found", id)))?;

    Ok(Json(application))
}

/// PATCH /api/v1/applications/:id/status
///
/// Records a reviewer's decision. Only applications in manual review can be
/// updated, and only to `approved` or `rejected`.
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusUpdateRequest>,
) -> Result<Json<LoanApplication>, AppError> {
    tracing::info!("PATCH /applications/{}/status - {}", id, payload.status.as_str());

    if !matches!(
        payload.status,
        ApplicationStatus::Approved | ApplicationStatus::Rejected
    ) {
        return Err(AppError::BadRequest(format!(
            "Status must be 'approved' or 'rejected', got '{}'",
            payload.status.as_str()
        )));
    }

    let application = state.store.update_status(id, payload.status).await?;
    Ok(Json(application))
}

/// POST /api/v1/applications/:id/rescore
///
/// Discards the cached score for an application in manual review, asks the
/// provider again and stores the new score and decision.
pub async fn rescore_application(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<LoanApplication>, AppError> {
    tracing::info!("POST /applications/{}/rescore", id);

    let application = state
        .store
        .get_application(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Application {} not found", id)))?;

    if application.status != ApplicationStatus::ManualReview {
        return Err(AppError::Conflict(format!(
            "Only manual review applications can be re-scored (application {} is {})",
            id,
            application.status.as_str()
        )));
    }

    let request = stored_scoring_request(&application);
    let decision = state.orchestrator.rescore(&request).await?;

    let application = state.store.record_rescore(id, &decision).await?;
    Ok(Json(application))
}

/// Application routes without rate limiting, so they can be layered by the
/// caller.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/applications", post(create_application))
        .route("/api/v1/applications/:id", get(get_application))
        .route("/api/v1/applications/:id/status", patch(update_status))
        .route(
            "/api/v1/applications/:id/rescore",
            post(rescore_application),
        )
        // Request size limit: 1MB max payload
        .layer(ServiceBuilder::new().layer(RequestBodyLimitLayer::new(1024 * 1024)))
}

/// Full router with health check, tracing and CORS.
pub fn router(state: Arc<AppState>) -> Router {
    with_common_layers(api_routes(), state)
}

/// Adds the health check and the outer middleware to `routes`.
pub fn with_common_layers(routes: Router<Arc<AppState>>, state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::Utc;

    fn stored_applicant() -> Applicant {
        let now = Utc::now();
        Applicant {
            id: Uuid::new_v4(),
            name: "John Doe".into(),
            email: "john@example.com".into(),
            phone: "+16502530000".into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn loan() -> NewLoanApplication {
        NewLoanApplication {
            amount: BigDecimal::from(15000),
            currency: "USD".into(),
            term_months: Some(12),
        }
    }

    #[test]
    fn test_scoring_request_inherits_missing_fields() {
        let input = NewApplicant {
            email: "john@example.com".into(),
            name: None,
            phone: None,
        };
        let stored = stored_applicant();
        let request = scoring_request(&input, Some(&stored), &loan());

        assert_eq!(request.applicant_name, "John Doe");
        assert_eq!(request.applicant_phone.as_deref(), Some("+16502530000"));
        assert_eq!(request.term_months, Some(12));
    }

    #[test]
    fn test_scoring_request_prefers_new_details() {
        let input = NewApplicant {
            email: "john@example.com".into(),
            name: Some("Johnny Doe".into()),
            phone: None,
        };
        let request = scoring_request(&input, Some(&stored_applicant()), &loan());
        assert_eq!(request.applicant_name, "Johnny Doe");

        let fresh = scoring_request(&input, None, &loan());
        assert_eq!(fresh.applicant_phone, None);
    }

    #[test]
    fn test_rescore_uses_the_original_fingerprint() {
        let stored = stored_applicant();
        let now = Utc::now();
        let app = LoanApplication {
            id: Uuid::new_v4(),
            applicant: stored.clone(),
            amount: BigDecimal::from(15000),
            currency: "USD".into(),
            term_months: Some(12),
            status: ApplicationStatus::ManualReview,
            scoring: None,
            external_reference: None,
            created_at: now,
            updated_at: now,
        };
        let original = scoring_request(
            &NewApplicant {
                email: stored.email.clone(),
                name: Some(stored.name.clone()),
                phone: Some(stored.phone.clone()),
            },
            None,
            &loan(),
        );

        assert_eq!(
            stored_scoring_request(&app).fingerprint(),
            original.fingerprint()
        );
    }
}
