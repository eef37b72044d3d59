use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use loan_scoring_api::config::Config;
use loan_scoring_api::db::Database;
use loan_scoring_api::db_storage::PgApplicationStore;
use loan_scoring_api::handlers::{self, AppState};
use loan_scoring_api::scoring::{
    build_provider, spawn_cache_sweeper, MokaScoreCache, ScoreCache, ScoringOrchestrator,
};
use loan_scoring_api::storage::{ApplicationStore, InMemoryApplicationStore};
use loan_scoring_api::validation::ApplicationRules;

/// Main entry point for the application.
///
/// Initializes logging, configuration, the risk provider, the score cache and
/// its sweeper, the application store (Postgres or in-memory), then serves the
/// HTTP API with rate limiting.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loan_scoring_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    let provider = build_provider(&config.provider, &config.scoring)?;
    tracing::info!("Risk provider '{}' initialized", provider.name());

    let cache: Arc<dyn ScoreCache> = Arc::new(MokaScoreCache::new(
        config.scoring.cache_max_entries,
        config.scoring.cache_ttl,
    ));
    spawn_cache_sweeper(cache.clone(), config.scoring.cache_sweep_interval);
    tracing::info!(
        "Score cache initialized ({}s TTL, {} capacity)",
        config.scoring.cache_ttl.as_secs(),
        config.scoring.cache_max_entries
    );

    let store: Arc<dyn ApplicationStore> = match &config.database_url {
        Some(url) => {
            let db = Database::new(url).await?;
            db.ensure_schema().await?;
            tracing::info!("Database connection pool established");
            Arc::new(PgApplicationStore::new(db.pool))
        }
        None => Arc::new(InMemoryApplicationStore::new()),
    };

    let orchestrator = Arc::new(ScoringOrchestrator::new(
        provider,
        cache,
        config.scoring.clone(),
    ));

    let app_state = Arc::new(AppState {
        orchestrator,
        store,
        rules: ApplicationRules::from_config(&config),
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limiter configuration"))?,
    );

    // Health check bypasses rate limiting
    let protected_routes = handlers::api_routes().layer(ServiceBuilder::new().layer(GovernorLayer {
        config: governor_conf,
    }));
    let app = handlers::with_common_layers(protected_routes, app_state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
