use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use share_relay::{
    database, errors::AppError, handlers::share, relay, store, store::ShareStore, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with reduced SQL verbosity
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("share_relay=info,sqlx=warn,info")),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://share-relay.db".to_string());

    let pool = database::create_pool(&database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("✅ Migrations completed successfully");

    let retention = match std::env::var("SHARE_RETENTION_SECS") {
        Ok(value) => match value.parse::<u64>() {
            Ok(secs) => Duration::from_secs(secs),
            Err(_) => {
                warn!(
                    "Invalid SHARE_RETENTION_SECS {:?}, using default",
                    value
                );
                store::DEFAULT_RETENTION
            }
        },
        Err(_) => store::DEFAULT_RETENTION,
    };
    info!("Share retention window: {:?}", retention);

    let store = ShareStore::new(pool, retention);
    let relay = relay::spawn(store.clone());
    let state = AppState { store, relay };

    // The share endpoint is same-origin by nature; CORS only matters for
    // the health endpoint and local development
    let cors = if std::env::var("DEBUG_MODE").unwrap_or_default() == "true" {
        info!("🔓 Development mode: Using permissive CORS");
        CorsLayer::new().allow_origin(Any)
    } else {
        let allowed_origins = std::env::var("ALLOWED_ORIGINS").unwrap_or_default();
        let origins: Vec<HeaderValue> = allowed_origins
            .split(',')
            .filter_map(|origin| {
                let trimmed = origin.trim();
                if trimmed.is_empty() {
                    return None;
                }
                match trimmed.parse() {
                    Ok(origin) => Some(origin),
                    Err(e) => {
                        warn!("⚠️ Ignoring unparseable origin {:?}: {}", trimmed, e);
                        None
                    }
                }
            })
            .collect();
        info!("🔒 CORS configured for {} origin(s)", origins.len());
        CorsLayer::new().allow_origin(origins)
    };

    let app = Router::new()
        .route("/api/health", get(health_check))
        .merge(share::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state);

    // Server configuration
    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "3001".to_string())
        .parse::<u16>()
        .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?;

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;
    info!("🚀 Share relay listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(state.store.pool())
        .await?;

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "service": "share-relay",
            "timestamp": chrono::Utc::now(),
            "endpoints": {
                "share": "/share",
                "intake": "/add",
                "health": "/api/health"
            }
        })),
    ))
}
