use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{Json, Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use amora_api::{ApiStateInner, messages};
use amora_gateway::connection::{GatewayState, ws_upgrade};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "amora=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let bot_token = std::env::var("AMORA_BOT_TOKEN").unwrap_or_default();
    if bot_token.is_empty() {
        warn!("AMORA_BOT_TOKEN is not set; all connections will be rejected");
    }
    let auth_ttl_seconds: i64 = std::env::var("AMORA_AUTH_TTL_SECONDS")
        .unwrap_or_else(|_| "86400".into())
        .parse()?;
    let db_path = std::env::var("AMORA_DB_PATH").unwrap_or_else(|_| "amora.db".into());
    let host = std::env::var("AMORA_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("AMORA_PORT")
        .unwrap_or_else(|_| "3001".into())
        .parse()?;

    // Init database
    let db = Arc::new(amora_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let gateway_state = GatewayState::new(db.clone(), bot_token.clone(), auth_ttl_seconds);
    let api_state = Arc::new(ApiStateInner {
        db,
        bot_token,
        auth_ttl_seconds,
    });

    // Routes
    let api_routes = Router::new()
        .route("/messages/chats", get(messages::list_chats))
        .route("/messages/history", get(messages::chat_history))
        .with_state(api_state);

    let ws_route = Router::new()
        .route("/ws/messages", get(ws_upgrade))
        .with_state(gateway_state);

    let app = Router::new()
        .route("/ping", get(ping))
        .merge(api_routes.clone())
        .nest("/api", api_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Amora server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ping() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "pong": true,
        "ts": chrono::Utc::now().timestamp_millis(),
        "pid": std::process::id(),
    }))
}
