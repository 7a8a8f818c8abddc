use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use futures::{SinkExt, StreamExt};
use std::time::Instant;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

use crate::code;
use crate::error::ApiError;
use crate::room::{RoomCommand, RoomError, RoomEvent, RoomHandle};
use crate::stats::StatsEvent;
use crate::types::{AuthContext, ClientFrame};
use crate::AppState;

/// How many fresh codes `create` tries before giving up on collisions.
const CREATE_CODE_ATTEMPTS: usize = 5;

const REPLACED_REASON: &str = "Replaced by new connection";

/// `POST /v1/rooms` — allocate a code and create the room with the caller
/// as host.
pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    for _ in 0..CREATE_CODE_ATTEMPTS {
        let room_code = code::generate_code();
        match state
            .registry
            .create_room(&ctx.game_id, &room_code, ctx.player_id.clone())
            .await
        {
            Ok(()) => {
                return Ok(Json(serde_json::json!({
                    "code": room_code,
                    "wsUrl": state.config.ws_url(&room_code),
                })));
            }
            Err(RoomError::AlreadyExists) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(ApiError::RoomAlreadyExists)
}

/// `GET /v1/rooms/{code}`
pub async fn info(
    State(state): State<AppState>,
    Path(room_code): Path<String>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let room_code = canonical_code(&room_code)?;
    let info = state.registry.room_info(&ctx.game_id, &room_code).await?;
    Ok(Json(info))
}

/// `POST /v1/rooms/{code}/join` — idempotent roster add over HTTP.
pub async fn join(
    State(state): State<AppState>,
    Path(room_code): Path<String>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let room_code = canonical_code(&room_code)?;
    let outcome = state
        .registry
        .join_room(&ctx.game_id, &room_code, ctx.player_id.clone())
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "hostId": outcome.host_id,
        "players": outcome.players,
    })))
}

fn canonical_code(room_code: &str) -> Result<String, ApiError> {
    let room_code = code::canonical(room_code);
    if !code::is_valid_code(&room_code) {
        return Err(ApiError::RoomNotFound);
    }
    Ok(room_code)
}

/// `GET /v1/rooms/{code}/ws` — admit a WebSocket session into the room.
pub async fn ws(
    State(state): State<AppState>,
    Path(room_code): Path<String>,
    Extension(ctx): Extension<AuthContext>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(upgrade) = upgrade else {
        return ApiError::UpgradeRequired.into_response();
    };
    let room_code = match canonical_code(&room_code) {
        Ok(room_code) => room_code,
        Err(err) => return err.into_response(),
    };
    // The room must exist before we commit to the upgrade; afterwards there
    // is no HTTP status left to return.
    if let Err(err) = state.registry.room_info(&ctx.game_id, &room_code).await {
        return ApiError::from(err).into_response();
    }
    upgrade.on_upgrade(move |socket| handle_socket(socket, state, ctx, room_code))
}

async fn handle_socket(socket: WebSocket, state: AppState, ctx: AuthContext, room_code: String) {
    let session_id = Uuid::new_v4();
    let started = Instant::now();
    let (sender, mut receiver) = socket.split();

    tracing::info!(
        game_id = %ctx.game_id,
        code = %room_code,
        player_id = %ctx.player_id,
        session_id = %session_id,
        "websocket connected"
    );
    state.stats.record(StatsEvent::SessionStart {
        game_id: ctx.game_id.clone(),
        player_id: ctx.player_id.clone(),
    });

    let handle = state.registry.handle(&ctx.game_id, &room_code);

    // Subscribe before admission so the `connected` snapshot is not missed.
    let events = handle.event_tx.subscribe();
    let forward = tokio::spawn(forward_events(events, sender, session_id));

    let admitted = admit(&handle, session_id, &ctx.player_id).await;
    if !admitted {
        // The room vanished between the upgrade check and admission.
        forward.abort();
    } else {
        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else { continue };
            let frame: ClientFrame = match serde_json::from_str(&text) {
                Ok(frame) => frame,
                Err(err) => {
                    // Malformed JSON never escalates to a close.
                    tracing::warn!(session_id = %session_id, error = %err, "dropping malformed frame");
                    continue;
                }
            };
            let cmd = RoomCommand::Frame {
                session_id,
                player_id: ctx.player_id.clone(),
                frame,
            };
            if handle.cmd_tx.send(cmd).await.is_err() {
                break;
            }
        }

        let _ = handle
            .cmd_tx
            .send(RoomCommand::Disconnect {
                session_id,
                player_id: ctx.player_id.clone(),
            })
            .await;
        forward.abort();
    }

    state.stats.record(StatsEvent::SessionEnd {
        game_id: ctx.game_id.clone(),
        player_id: ctx.player_id.clone(),
        duration_ms: started.elapsed().as_millis() as u64,
    });
    tracing::info!(session_id = %session_id, "websocket disconnected");
}

async fn admit(handle: &RoomHandle, session_id: Uuid, player_id: &str) -> bool {
    let (reply_tx, reply_rx) = oneshot::channel();
    let cmd = RoomCommand::Connect {
        session_id,
        player_id: player_id.to_string(),
        reply: reply_tx,
    };
    if handle.cmd_tx.send(cmd).await.is_err() {
        return false;
    }
    matches!(reply_rx.await, Ok(Ok(())))
}

/// Pump room events into one socket, filtering by session id. Ends when the
/// socket dies, the actor hibernates, or this session is replaced.
async fn forward_events(
    mut events: broadcast::Receiver<RoomEvent>,
    mut sender: futures::stream::SplitSink<WebSocket, Message>,
    session_id: Uuid,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let frame = match event {
                    RoomEvent::SendTo {
                        session_id: target,
                        frame,
                    } if target == session_id => frame,
                    RoomEvent::Broadcast { frame } => frame,
                    RoomEvent::BroadcastExcept { exclude, frame } if exclude != session_id => frame,
                    RoomEvent::Replace {
                        session_id: target,
                    } if target == session_id => {
                        let _ = sender
                            .send(Message::Close(Some(CloseFrame {
                                code: close_code::NORMAL,
                                reason: REPLACED_REASON.into(),
                            })))
                            .await;
                        return;
                    }
                    _ => continue,
                };
                match serde_json::to_string(&frame) {
                    Ok(json) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "failed to encode server frame");
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(session_id = %session_id, skipped, "session event stream lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
