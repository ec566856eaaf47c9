//! HTTP server hosting the WebSocket endpoint

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::{routing::get, Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::Result;
use crate::hub::{Hub, HubOptions};

use super::ws::{ws_handler, WsRouter};

/// Application state shared across handlers
pub struct AppState {
    pub hub: Arc<Hub>,
    pub router: Arc<WsRouter>,
}

pub type SharedState = Arc<AppState>;

/// Run the hub server
pub async fn run_server(config: Config) -> Result<()> {
    let hub = Arc::new(Hub::new(HubOptions {
        debug: config.hub.debug,
        default_channel_limit: Some(config.hub.default_channel_limit),
        global_channel_limit: Some(config.hub.global_channel_limit),
        ..Default::default()
    }));

    let router = Arc::new(WsRouter::new());
    hub.set_transport_server(router.clone());

    for entry in &config.hub.channels {
        hub.create_channel(
            &entry.id,
            entry.name.as_deref().unwrap_or(&entry.id),
            entry.limit,
        );
    }

    let state = Arc::new(AppState { hub, router });
    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Hub listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the router with all routes
fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/stats", get(stats))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn stats(State(state): State<SharedState>) -> impl IntoResponse {
    let channels: Vec<_> = state
        .hub
        .get_channels()
        .iter()
        .map(|channel| {
            json!({
                "id": channel.id(),
                "name": channel.name(),
                "size": channel.size(),
                "limit": channel.limit(),
            })
        })
        .collect();
    Json(json!({
        "clients": state.hub.client_count(),
        "channels": channels,
    }))
}
