use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use chaperone::classifier::SemanticClassifier;
use chaperone::config::ChaperoneConfig;
use chaperone::database::Database;
use chaperone::error::Result;
use chaperone::filter::PatternFilter;
use chaperone::ledger::WarningLedger;
use chaperone::pipeline::ModerationPipeline;
use chaperone::policy::EscalationPolicy;
use chaperone::reports::ReportService;
use chaperone::web::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT"),
        "starting chaperone"
    );

    let config = ChaperoneConfig::from_env()?;

    let db = Arc::new(Database::new(&config.database_path).await?);
    tracing::info!(path = %config.database_path, "database ready");

    let classifier = match &config.classifier {
        Some(cfg) => {
            tracing::info!(model = %cfg.model, "semantic classifier enabled");
            Some(Arc::new(SemanticClassifier::new(
                cfg.api_key.clone(),
                cfg.base_url.clone(),
                cfg.model.clone(),
                cfg.timeout_secs,
                cfg.requests_per_minute,
            )?))
        }
        None => {
            tracing::warn!("no classifier API key configured, running with pattern filtering only");
            None
        }
    };

    let ledger = Arc::new(WarningLedger::new(Arc::clone(&db)));
    let policy = Arc::new(EscalationPolicy::new(ledger));
    let pipeline = Arc::new(ModerationPipeline::new(
        PatternFilter::standard()?,
        classifier,
        policy,
        Arc::clone(&db),
    ));
    let reports = Arc::new(ReportService::new(Arc::clone(&db)));

    let state = AppState {
        db,
        pipeline,
        reports,
    };
    let router = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| chaperone::error::ChaperoneError::Config(format!("failed to bind {}: {}", addr, e)))?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, router)
        .await
        .map_err(|e| chaperone::error::ChaperoneError::Config(format!("server error: {}", e)))?;

    Ok(())
}
