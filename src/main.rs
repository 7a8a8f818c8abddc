mod auth;
mod code;
mod config;
mod error;
mod keys;
mod registry;
mod room;
mod rooms;
mod saves;
mod stats;
mod store;
#[cfg(test)]
mod test_util;
mod types;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::registry::RoomRegistry;
use crate::stats::StatsHandle;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Store,
    pub stats: StatsHandle,
    pub registry: Arc<RoomRegistry>,
}

// ─── Routes ───────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
    }))
}

pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/saves", get(saves::list))
        .route(
            "/saves/{key}",
            post(saves::put).get(saves::get).delete(saves::remove),
        )
        .route("/rooms", post(rooms::create))
        .route("/rooms/{code}", get(rooms::info))
        .route("/rooms/{code}/join", post(rooms::join))
        .route("/rooms/{code}/ws", get(rooms::ws))
        .route("/stats", get(stats::game_stats))
        .route("/stats/track", post(stats::track))
        .route("/stats/player", get(stats::player_stats))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_player,
        ))
        .layer(DefaultBodyLimit::max(saves::MAX_SAVE_BYTES));

    let internal = Router::new()
        .route("/keys", post(keys::register))
        .route("/keys/{api_key}", get(keys::inspect).delete(keys::revoke))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_internal,
        ));

    Router::new()
        .route("/", get(health))
        .nest("/v1", public)
        .nest("/internal", internal)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("waygate=info,tower_http=info")),
        )
        .init();

    let config = Arc::new(Config::from_env());
    if config.internal_secret.is_empty() {
        tracing::warn!("WAYGATE_INTERNAL_SECRET is unset; the key admin plane will refuse all requests");
    }

    let store = Store::open(&config.data_dir).expect("Failed to open data directory");
    let stats = StatsHandle::spawn(store.clone());
    let registry = RoomRegistry::new(store.clone(), stats.clone(), config.room_idle());

    let state = AppState {
        config: config.clone(),
        store,
        stats,
        registry,
    };

    let listener = tokio::net::TcpListener::bind(config.socket_addr())
        .await
        .expect("Failed to bind");

    tracing::info!("Waygate relay listening on {}", config.socket_addr());

    axum::serve(listener, router(state)).await.unwrap();
}
