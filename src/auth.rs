use std::collections::HashMap;

use axum::extract::{Query, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;
use crate::keys::{self, KEY_PREFIX};
use crate::types::AuthContext;
use crate::AppState;

/// Header carrying the client-asserted player id.
pub const PLAYER_ID_HEADER: &str = "x-player-id";

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

fn query_params(req: &Request) -> HashMap<String, String> {
    Query::<HashMap<String, String>>::try_from_uri(req.uri())
        .map(|Query(params)| params)
        .unwrap_or_default()
}

/// Resolve the public-surface credentials on a request. The query-parameter
/// fallbacks exist because browser WebSocket upgrades cannot carry custom
/// headers.
fn resolve_public(state: &AppState, req: &Request) -> Result<AuthContext, ApiError> {
    let params = query_params(req);

    let player_id = req
        .headers()
        .get(PLAYER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| params.get("playerId").cloned())
        .filter(|value| !value.is_empty())
        .ok_or(ApiError::PlayerIdRequired)?;

    let api_key = bearer(req.headers())
        .or_else(|| params.get("apiKey").cloned())
        .filter(|value| !value.is_empty())
        .ok_or(ApiError::AuthRequired)?;

    if !api_key.starts_with(KEY_PREFIX) {
        return Err(ApiError::InvalidKeyFormat);
    }

    let record = keys::get(&state.store, &api_key)?.ok_or(ApiError::InvalidKey)?;

    Ok(AuthContext {
        game_id: record.game_id,
        project_id: record.project_id,
        player_id,
        api_key,
    })
}

/// Public auth gate: every request under `/v1` resolves its API key to a
/// tenant and binds an [`AuthContext`] for downstream handlers.
pub async fn require_player(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    match resolve_public(&state, &req) {
        Ok(ctx) => {
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        Err(err) => err.into_response(),
    }
}

/// Internal gate for the key-registry admin plane: a shared deployment-time
/// secret, no user context.
pub async fn require_internal(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let presented = bearer(req.headers());
    let expected = &state.config.internal_secret;
    if expected.is_empty() || presented.as_deref() != Some(expected.as_str()) {
        return ApiError::InvalidInternalSecret.into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::middleware;
    use axum::routing::get;
    use axum::{Extension, Json, Router};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::test_util::seeded_state;
    use crate::types::AuthContext;

    async fn probe(Extension(ctx): Extension<AuthContext>) -> Json<serde_json::Value> {
        Json(serde_json::json!({
            "gameId": ctx.game_id,
            "playerId": ctx.player_id,
        }))
    }

    fn app() -> (tempfile::TempDir, Router) {
        let (dir, state) = seeded_state();
        let router = Router::new()
            .route("/probe", get(probe))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                super::require_player,
            ))
            .with_state(state);
        (dir, router)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn missing_player_id_is_rejected_first() {
        let (_dir, app) = app();
        let response = app
            .oneshot(
                Request::get("/probe")
                    .header("authorization", "Bearer wt_test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "PlayerIdRequired");
    }

    #[tokio::test]
    async fn missing_key_is_unauthorized() {
        let (_dir, app) = app();
        let response = app
            .oneshot(
                Request::get("/probe")
                    .header("x-player-id", "p1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "AuthRequired");
    }

    #[tokio::test]
    async fn wrong_prefix_is_flagged() {
        let (_dir, app) = app();
        let response = app
            .oneshot(
                Request::get("/probe")
                    .header("x-player-id", "p1")
                    .header("authorization", "Bearer sk_test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "InvalidKeyFormat");
    }

    #[tokio::test]
    async fn unknown_key_is_rejected() {
        let (_dir, app) = app();
        let response = app
            .oneshot(
                Request::get("/probe")
                    .header("x-player-id", "p1")
                    .header("authorization", "Bearer wt_BOGUS")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "InvalidKey");
    }

    #[tokio::test]
    async fn binds_context_from_headers() {
        let (_dir, app) = app();
        let response = app
            .oneshot(
                Request::get("/probe")
                    .header("x-player-id", "p1")
                    .header("authorization", "Bearer wt_test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["gameId"], "g1");
        assert_eq!(body["playerId"], "p1");
    }

    #[tokio::test]
    async fn query_parameters_are_a_fallback() {
        let (_dir, app) = app();
        let response = app
            .oneshot(
                Request::get("/probe?apiKey=wt_test&playerId=p2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["playerId"], "p2");
    }
}
