use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::error::ApiError;
use crate::store::{layout, Store, StoreError};
use crate::types::{now_ms, ApiKeyRecord};
use crate::AppState;

/// API keys carry this prefix; anything else is rejected up front.
pub const KEY_PREFIX: &str = "wt_";

fn validate_key(api_key: &str) -> Result<(), ApiError> {
    if api_key.is_empty() || !api_key.starts_with(KEY_PREFIX) {
        return Err(ApiError::BadFormat);
    }
    Ok(())
}

/// Store the mapping. Idempotent under equal input: re-registering an
/// unchanged key keeps the original `createdAt`.
pub fn put(
    store: &Store,
    api_key: &str,
    game_id: &str,
    project_id: &str,
) -> Result<(), ApiError> {
    validate_key(api_key)?;
    if game_id.is_empty() {
        return Err(ApiError::MissingField("gameId"));
    }
    if project_id.is_empty() {
        return Err(ApiError::MissingField("projectId"));
    }

    let key = layout::apikey(api_key);
    if let Some(existing) = store.get_json::<ApiKeyRecord>(&key)? {
        if existing.game_id == game_id && existing.project_id == project_id {
            return Ok(());
        }
    }
    let record = ApiKeyRecord {
        game_id: game_id.to_string(),
        project_id: project_id.to_string(),
        created_at: now_ms(),
    };
    store.put_json(&key, &record)?;
    Ok(())
}

/// Remove the mapping; no-op if absent.
pub fn delete(store: &Store, api_key: &str) -> Result<(), ApiError> {
    validate_key(api_key)?;
    store.remove(&layout::apikey(api_key))?;
    Ok(())
}

pub fn get(store: &Store, api_key: &str) -> Result<Option<ApiKeyRecord>, StoreError> {
    store.get_json(&layout::apikey(api_key))
}

// ─── Internal handlers ────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterKeyBody {
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    game_id: String,
    #[serde(default)]
    project_id: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterKeyBody>,
) -> Result<impl IntoResponse, ApiError> {
    put(&state.store, &body.api_key, &body.game_id, &body.project_id)?;
    tracing::info!(game_id = %body.game_id, "API key registered");
    Ok(Json(serde_json::json!({"success": true})))
}

pub async fn revoke(
    State(state): State<AppState>,
    Path(api_key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    delete(&state.store, &api_key)?;
    tracing::info!("API key revoked");
    Ok(Json(serde_json::json!({"success": true})))
}

pub async fn inspect(
    State(state): State<AppState>,
    Path(api_key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match get(&state.store, &api_key)? {
        Some(record) => Ok(Json(serde_json::json!({
            "exists": true,
            "gameId": record.game_id,
            "projectId": record.project_id,
            "createdAt": record.created_at,
        }))),
        None => Ok(Json(serde_json::json!({"exists": false}))),
    }
}
