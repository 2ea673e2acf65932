use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use updown_amm::handlers::{self, AppState};
use updown_amm::{
    CoindeskSource, Engine, EngineConfig, NoopDispatcher, PayoutDispatcher, PayoutScheduler,
    QuoteSource, SettlementEngine, SqliteStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db_path = std::env::var("UPDOWN_DB").unwrap_or_else(|_| "data/book.db".to_string());
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    let config = EngineConfig::default();
    let store = Arc::new(SqliteStore::open(&db_path)?);
    let engine = Arc::new(Engine::new(config, store)?);

    let quotes: Arc<dyn QuoteSource> = Arc::new(CoindeskSource::new());
    let dispatcher: Arc<dyn PayoutDispatcher> = Arc::new(NoopDispatcher);
    let settlement = Arc::new(SettlementEngine::new(engine.clone(), dispatcher));
    let scheduler = PayoutScheduler::spawn(engine.clone(), settlement.clone(), quotes.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = Arc::new(AppState { engine, settlement, quotes });
    let app = handlers::router(state).layer(cors);

    let addr = std::env::var("UPDOWN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    info!("🚀 up/down option maker listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    scheduler.shutdown().await;
    Ok(())
}
