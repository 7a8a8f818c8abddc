use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Context bound into every authenticated request by the auth gate.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub game_id: String,
    pub project_id: String,
    pub player_id: String,
    pub api_key: String,
}

/// Stored record behind an API key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRecord {
    pub game_id: String,
    pub project_id: String,
    pub created_at: i64,
}

/// One roster entry. `joined_at` drives host-migration order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub joined_at: i64,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Durable shape of a room. Doubles as the actor's in-memory state; fields
/// added later default to their zero values so old snapshots keep loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub game_id: String,
    pub code: String,
    pub host_id: String,
    pub created_at: i64,
    #[serde(default)]
    pub roster: BTreeMap<String, RosterEntry>,
    #[serde(default)]
    pub player_states: BTreeMap<String, Value>,
    #[serde(default = "empty_object")]
    pub game_state: Value,
}

impl RoomSnapshot {
    pub fn players(&self) -> Vec<String> {
        self.roster.keys().cloned().collect()
    }

    pub fn player_count(&self) -> usize {
        self.roster.len()
    }
}

/// Room header carried inside the `connected` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub game_id: String,
    pub host_id: String,
    pub players: Vec<String>,
    pub player_count: usize,
}

/// `GET /v1/rooms/{code}` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub game_id: String,
    pub host_id: String,
    pub created_at: i64,
    pub player_count: usize,
    pub players: Vec<String>,
}

/// Result of an HTTP join: the roster after the (idempotent) add.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub host_id: String,
    pub players: Vec<String>,
}

/// Messages sent from server to clients over a room WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    /// Late-joiner snapshot, sent once on admission.
    Connected {
        player_id: String,
        room: RoomSummary,
        player_states: BTreeMap<String, Value>,
        game_state: Value,
    },
    /// Periodic batch of the whole per-player state map.
    PlayersSync { players: BTreeMap<String, Value> },
    /// Fast-path single-player delta.
    PlayerStateUpdate { player_id: String, state: Value },
    GameStateSync { state: Value },
    PlayerJoined { player_id: String, player_count: usize },
    PlayerLeft { player_id: String, player_count: usize },
    HostChanged { host_id: String },
    /// Relayed application payload from another player.
    Message { from: String, data: Value },
    Pong { timestamp: i64 },
}

/// Messages sent from clients to the room actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    PlayerState {
        state: Value,
    },
    /// Host only; silently ignored from anyone else.
    GameState {
        state: Value,
    },
    /// Host only; `new_host_id` must be in the roster.
    TransferHost {
        new_host_id: String,
    },
    Broadcast {
        data: Value,
        #[serde(default)]
        exclude_self: bool,
    },
    Send {
        to: String,
        data: Value,
    },
    Ping,
    /// Forward-compat: unrecognized `type` tags parse here and are dropped.
    #[serde(other)]
    Unknown,
}

/// Per-game rolling counters. Absent fields read as zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatsCounters {
    #[serde(default)]
    pub online: u64,
    #[serde(default)]
    pub in_rooms: u64,
    #[serde(default)]
    pub rooms: u64,
    /// Lifetime unique players.
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub today: u64,
    #[serde(default)]
    pub this_month: u64,
    #[serde(default)]
    pub updated_at: i64,
}

/// Per-player aggregate kept by the stats accumulator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStatsRecord {
    #[serde(default)]
    pub first_seen: i64,
    #[serde(default)]
    pub last_seen: i64,
    #[serde(default)]
    pub sessions: u64,
    /// Accumulated connected time in milliseconds.
    #[serde(default)]
    pub playtime: u64,
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_frames_use_wire_shapes() {
        let frame = ServerFrame::PlayerJoined {
            player_id: "bob".into(),
            player_count: 2,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "player_joined", "playerId": "bob", "playerCount": 2})
        );
    }

    #[test]
    fn client_frames_parse_wire_shapes() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"transfer_host","newHostId":"carol"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::TransferHost { new_host_id } if new_host_id == "carol"));

        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"broadcast","data":{"x":1},"excludeSelf":true}"#)
                .unwrap();
        assert!(matches!(frame, ClientFrame::Broadcast { exclude_self: true, .. }));
    }

    #[test]
    fn exclude_self_defaults_to_false() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"broadcast","data":null}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Broadcast { exclude_self: false, .. }));
    }

    #[test]
    fn unknown_types_fall_through() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"emote"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Unknown));
    }

    #[test]
    fn old_snapshots_load_with_zero_defaults() {
        // A snapshot written before playerStates/gameState existed.
        let snapshot: RoomSnapshot = serde_json::from_str(
            r#"{"gameId":"g1","code":"HQK3","hostId":"alice","createdAt":7}"#,
        )
        .unwrap();
        assert!(snapshot.roster.is_empty());
        assert!(snapshot.player_states.is_empty());
        assert_eq!(snapshot.game_state, serde_json::json!({}));
    }

    #[test]
    fn absent_counters_read_as_zero() {
        let counters: StatsCounters = serde_json::from_str(r#"{"online":3}"#).unwrap();
        assert_eq!(counters.online, 3);
        assert_eq!(counters.rooms, 0);
        assert_eq!(counters.total, 0);
    }
}
