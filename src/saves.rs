use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};

use crate::error::ApiError;
use crate::store::layout;
use crate::types::AuthContext;
use crate::AppState;

/// Save bodies are capped at 25 MiB (enforced by the router body limit).
pub const MAX_SAVE_BYTES: usize = 25 * 1024 * 1024;

/// `POST /v1/saves/{key}` — store the JSON body verbatim, overwriting any
/// previous value.
pub async fn put(
    State(state): State<AppState>,
    Path(save_key): Path<String>,
    Extension(ctx): Extension<AuthContext>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    // Validate without re-encoding; the stored bytes are the caller's.
    if serde_json::from_slice::<serde_json::Value>(&body).is_err() {
        return Err(ApiError::BadJson);
    }
    let key = layout::save(&ctx.game_id, &ctx.player_id, &save_key);
    state.store.put_raw(&key, &body)?;
    Ok(Json(serde_json::json!({"success": true, "key": save_key})))
}

/// `GET /v1/saves/{key}`
pub async fn get(
    State(state): State<AppState>,
    Path(save_key): Path<String>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let key = layout::save(&ctx.game_id, &ctx.player_id, &save_key);
    let bytes = state.store.get_raw(&key)?.ok_or(ApiError::SaveNotFound)?;
    let data: serde_json::Value = serde_json::from_slice(&bytes).map_err(|err| {
        tracing::error!(key = %key, error = %err, "stored save is not valid JSON");
        ApiError::SaveNotFound
    })?;
    Ok(Json(serde_json::json!({"key": save_key, "data": data})))
}

/// `GET /v1/saves` — list this player's save keys.
pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let keys = state
        .store
        .list_prefix(&layout::save_prefix(&ctx.game_id, &ctx.player_id))?;
    Ok(Json(serde_json::json!({"keys": keys})))
}

/// `DELETE /v1/saves/{key}` — idempotent.
pub async fn remove(
    State(state): State<AppState>,
    Path(save_key): Path<String>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let key = layout::save(&ctx.game_id, &ctx.player_id, &save_key);
    state.store.remove(&key)?;
    Ok(Json(serde_json::json!({"success": true})))
}
