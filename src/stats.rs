use axum::body::Bytes;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::{DateTime, Datelike, Utc};
use tokio::sync::mpsc;

use crate::error::ApiError;
use crate::store::{layout, Store, StoreError};
use crate::types::{AuthContext, PlayerStatsRecord, StatsCounters};

/// Events emitted by the transport adapter and the room actors.
#[derive(Debug, Clone)]
pub enum StatsEvent {
    SessionStart {
        game_id: String,
        player_id: String,
    },
    SessionEnd {
        game_id: String,
        player_id: String,
        duration_ms: u64,
    },
    RoomCreate {
        game_id: String,
    },
    RoomClose {
        game_id: String,
    },
    RoomJoin {
        game_id: String,
    },
    RoomLeave {
        game_id: String,
    },
}

/// Cheap handle to the accumulator. All updates funnel through one writer
/// task, so concurrent emitters cannot race counter read-modify-writes.
#[derive(Clone)]
pub struct StatsHandle {
    tx: mpsc::UnboundedSender<StatsEvent>,
}

impl StatsHandle {
    pub fn spawn(store: Store) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(stats_task(store, rx));
        Self { tx }
    }

    /// A handle whose events go nowhere. Test plumbing.
    #[cfg(test)]
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    pub fn record(&self, event: StatsEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!("stats accumulator is gone; dropping event");
        }
    }
}

async fn stats_task(store: Store, mut rx: mpsc::UnboundedReceiver<StatsEvent>) {
    while let Some(event) = rx.recv().await {
        if let Err(err) = apply_event(&store, &event) {
            tracing::error!(error = %err, ?event, "failed to apply stats event");
        }
    }
}

fn apply_event(store: &Store, event: &StatsEvent) -> Result<(), StoreError> {
    apply_event_at(store, event, Utc::now())
}

fn load_counters(store: &Store, game_id: &str) -> Result<StatsCounters, StoreError> {
    Ok(store
        .get_json(&layout::stats_counters(game_id))?
        .unwrap_or_default())
}

/// Insert into a stored unique set, returning its cardinality.
fn add_to_set(store: &Store, key: &str, member: &str) -> Result<u64, StoreError> {
    let mut set: Vec<String> = store.get_json(key)?.unwrap_or_default();
    if !set.iter().any(|existing| existing == member) {
        set.push(member.to_string());
        store.put_json(key, &set)?;
    }
    Ok(set.len() as u64)
}

fn set_len(store: &Store, key: &str) -> Result<u64, StoreError> {
    let set: Vec<String> = store.get_json(key)?.unwrap_or_default();
    Ok(set.len() as u64)
}

fn day_stamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

fn month_stamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// The store has no TTL, so expired unique sets are swept when a game's
/// stats are next written. Daily sets survive one extra day; monthly sets
/// survive five days into the next month.
fn sweep_expired(store: &Store, game_id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
    let yesterday = day_stamp(now - chrono::Days::new(1));
    let daily_prefix = layout::stats_daily_prefix(game_id);
    for stamp in store.list_prefix(&daily_prefix)? {
        if stamp.as_str() < yesterday.as_str() {
            store.remove(&format!("{daily_prefix}{stamp}"))?;
        }
    }

    let this_month = month_stamp(now);
    let last_month = month_stamp(now - chrono::Months::new(1));
    let monthly_prefix = layout::stats_monthly_prefix(game_id);
    for stamp in store.list_prefix(&monthly_prefix)? {
        let keep = stamp == this_month || (stamp == last_month && now.day() <= 5);
        if !keep {
            store.remove(&format!("{monthly_prefix}{stamp}"))?;
        }
    }
    Ok(())
}

fn apply_event_at(store: &Store, event: &StatsEvent, now: DateTime<Utc>) -> Result<(), StoreError> {
    match event {
        StatsEvent::SessionStart { game_id, player_id } => {
            let mut counters = load_counters(store, game_id)?;
            counters.online += 1;
            counters.today = add_to_set(
                store,
                &layout::stats_daily(game_id, &day_stamp(now)),
                player_id,
            )?;
            counters.this_month = add_to_set(
                store,
                &layout::stats_monthly(game_id, &month_stamp(now)),
                player_id,
            )?;

            let player_key = layout::stats_player(game_id, player_id);
            let existing: Option<PlayerStatsRecord> = store.get_json(&player_key)?;
            if existing.is_none() {
                counters.total += 1;
            }
            let mut record = existing.unwrap_or_default();
            if record.first_seen == 0 {
                record.first_seen = now.timestamp_millis();
            }
            record.last_seen = now.timestamp_millis();
            record.sessions += 1;
            store.put_json(&player_key, &record)?;

            counters.updated_at = now.timestamp_millis();
            store.put_json(&layout::stats_counters(game_id), &counters)?;
            sweep_expired(store, game_id, now)?;
        }
        StatsEvent::SessionEnd {
            game_id,
            player_id,
            duration_ms,
        } => {
            let mut counters = load_counters(store, game_id)?;
            counters.online = counters.online.saturating_sub(1);
            counters.updated_at = now.timestamp_millis();
            store.put_json(&layout::stats_counters(game_id), &counters)?;

            let player_key = layout::stats_player(game_id, player_id);
            if let Some(mut record) = store.get_json::<PlayerStatsRecord>(&player_key)? {
                record.last_seen = now.timestamp_millis();
                record.playtime += duration_ms;
                store.put_json(&player_key, &record)?;
            }
        }
        StatsEvent::RoomCreate { game_id } => {
            let mut counters = load_counters(store, game_id)?;
            counters.rooms += 1;
            counters.updated_at = now.timestamp_millis();
            store.put_json(&layout::stats_counters(game_id), &counters)?;
        }
        StatsEvent::RoomClose { game_id } => {
            let mut counters = load_counters(store, game_id)?;
            counters.rooms = counters.rooms.saturating_sub(1);
            counters.updated_at = now.timestamp_millis();
            store.put_json(&layout::stats_counters(game_id), &counters)?;
        }
        StatsEvent::RoomJoin { game_id } => {
            let mut counters = load_counters(store, game_id)?;
            counters.in_rooms += 1;
            counters.updated_at = now.timestamp_millis();
            store.put_json(&layout::stats_counters(game_id), &counters)?;
        }
        StatsEvent::RoomLeave { game_id } => {
            let mut counters = load_counters(store, game_id)?;
            counters.in_rooms = counters.in_rooms.saturating_sub(1);
            counters.updated_at = now.timestamp_millis();
            store.put_json(&layout::stats_counters(game_id), &counters)?;
        }
    }
    Ok(())
}

// ─── Handlers ─────────────────────────────────────────────────────

/// `GET /v1/stats` — rolling counters for the authenticated game; zeros
/// when nothing has been recorded yet.
pub async fn game_stats(
    State(state): State<crate::AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let mut counters = load_counters(&state.store, &ctx.game_id)?;
    // Sets may have been swept or rolled over since the last write.
    let now = Utc::now();
    counters.today = set_len(
        &state.store,
        &layout::stats_daily(&ctx.game_id, &day_stamp(now)),
    )?;
    counters.this_month = set_len(
        &state.store,
        &layout::stats_monthly(&ctx.game_id, &month_stamp(now)),
    )?;
    Ok(Json(counters))
}

/// `GET /v1/stats/player` — the authenticated player's aggregate.
pub async fn player_stats(
    State(state): State<crate::AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let record: PlayerStatsRecord = state
        .store
        .get_json(&layout::stats_player(&ctx.game_id, &ctx.player_id))?
        .unwrap_or_default();
    Ok(Json(record))
}

/// `POST /v1/stats/track` — client-reported session events. Unknown event
/// names are accepted and ignored.
pub async fn track(
    State(state): State<crate::AppState>,
    Extension(ctx): Extension<AuthContext>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let payload: serde_json::Value =
        serde_json::from_slice(&body).map_err(|_| ApiError::BadJson)?;
    match payload.get("event").and_then(|event| event.as_str()) {
        Some("session_start") => state.stats.record(StatsEvent::SessionStart {
            game_id: ctx.game_id.clone(),
            player_id: ctx.player_id.clone(),
        }),
        Some("session_end") => state.stats.record(StatsEvent::SessionEnd {
            game_id: ctx.game_id.clone(),
            player_id: ctx.player_id.clone(),
            duration_ms: 0,
        }),
        _ => {}
    }
    Ok(Json(serde_json::json!({"success": true})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn open_temp() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (dir, store)
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn start(game: &str, player: &str) -> StatsEvent {
        StatsEvent::SessionStart {
            game_id: game.into(),
            player_id: player.into(),
        }
    }

    fn end(game: &str, player: &str) -> StatsEvent {
        StatsEvent::SessionEnd {
            game_id: game.into(),
            player_id: player.into(),
            duration_ms: 1_000,
        }
    }

    #[test]
    fn online_tracks_unmatched_starts_and_clamps_at_zero() {
        let (_dir, store) = open_temp();
        let now = at(2026, 8, 2);

        // Unpaired end first: clamped, never negative.
        apply_event_at(&store, &end("g1", "a"), now).unwrap();
        assert_eq!(load_counters(&store, "g1").unwrap().online, 0);

        apply_event_at(&store, &start("g1", "a"), now).unwrap();
        apply_event_at(&store, &start("g1", "b"), now).unwrap();
        apply_event_at(&store, &start("g1", "c"), now).unwrap();
        apply_event_at(&store, &end("g1", "b"), now).unwrap();
        assert_eq!(load_counters(&store, "g1").unwrap().online, 2);
    }

    #[test]
    fn daily_set_counts_unique_players() {
        let (_dir, store) = open_temp();
        let now = at(2026, 8, 2);

        apply_event_at(&store, &start("g1", "a"), now).unwrap();
        apply_event_at(&store, &start("g1", "a"), now).unwrap();
        apply_event_at(&store, &start("g1", "b"), now).unwrap();

        let counters = load_counters(&store, "g1").unwrap();
        assert_eq!(counters.today, 2);
        assert_eq!(counters.this_month, 2);
        assert_eq!(counters.total, 2);

        let record: PlayerStatsRecord = store
            .get_json(&layout::stats_player("g1", "a"))
            .unwrap()
            .unwrap();
        assert_eq!(record.sessions, 2);
        assert!(record.first_seen > 0);
    }

    #[test]
    fn playtime_accumulates_on_session_end() {
        let (_dir, store) = open_temp();
        let now = at(2026, 8, 2);
        apply_event_at(&store, &start("g1", "a"), now).unwrap();
        apply_event_at(&store, &end("g1", "a"), now).unwrap();
        apply_event_at(&store, &start("g1", "a"), now).unwrap();
        apply_event_at(&store, &end("g1", "a"), now).unwrap();

        let record: PlayerStatsRecord = store
            .get_json(&layout::stats_player("g1", "a"))
            .unwrap()
            .unwrap();
        assert_eq!(record.playtime, 2_000);
    }

    #[test]
    fn room_counters_pair_and_clamp() {
        let (_dir, store) = open_temp();
        let now = at(2026, 8, 2);

        apply_event_at(&store, &StatsEvent::RoomClose { game_id: "g1".into() }, now).unwrap();
        assert_eq!(load_counters(&store, "g1").unwrap().rooms, 0);

        apply_event_at(&store, &StatsEvent::RoomCreate { game_id: "g1".into() }, now).unwrap();
        apply_event_at(&store, &StatsEvent::RoomJoin { game_id: "g1".into() }, now).unwrap();
        apply_event_at(&store, &StatsEvent::RoomJoin { game_id: "g1".into() }, now).unwrap();
        apply_event_at(&store, &StatsEvent::RoomLeave { game_id: "g1".into() }, now).unwrap();

        let counters = load_counters(&store, "g1").unwrap();
        assert_eq!(counters.rooms, 1);
        assert_eq!(counters.in_rooms, 1);
    }

    #[test]
    fn games_are_isolated() {
        let (_dir, store) = open_temp();
        let now = at(2026, 8, 2);
        apply_event_at(&store, &start("g1", "a"), now).unwrap();
        assert_eq!(load_counters(&store, "g2").unwrap(), StatsCounters::default());
    }

    #[test]
    fn expired_daily_sets_are_swept() {
        let (_dir, store) = open_temp();

        apply_event_at(&store, &start("g1", "a"), at(2026, 7, 30)).unwrap();
        apply_event_at(&store, &start("g1", "a"), at(2026, 7, 31)).unwrap();
        apply_event_at(&store, &start("g1", "b"), at(2026, 8, 1)).unwrap();

        // 7-30 is past the one-day grace; 7-31 is within it.
        let stamps = store
            .list_prefix(&layout::stats_daily_prefix("g1"))
            .unwrap();
        assert_eq!(stamps, vec!["2026-07-31".to_string(), "2026-08-01".to_string()]);

        // The new day starts its own set.
        assert_eq!(load_counters(&store, "g1").unwrap().today, 1);
    }

    #[test]
    fn monthly_sets_keep_a_five_day_grace() {
        let (_dir, store) = open_temp();

        apply_event_at(&store, &start("g1", "a"), at(2026, 6, 20)).unwrap();
        apply_event_at(&store, &start("g1", "a"), at(2026, 7, 31)).unwrap();

        // Day 3 of the new month: last month still within grace.
        apply_event_at(&store, &start("g1", "a"), at(2026, 8, 3)).unwrap();
        let stamps = store
            .list_prefix(&layout::stats_monthly_prefix("g1"))
            .unwrap();
        assert_eq!(stamps, vec!["2026-07".to_string(), "2026-08".to_string()]);

        // Day 6: grace over.
        apply_event_at(&store, &start("g1", "a"), at(2026, 8, 6)).unwrap();
        let stamps = store
            .list_prefix(&layout::stats_monthly_prefix("g1"))
            .unwrap();
        assert_eq!(stamps, vec!["2026-08".to_string()]);
    }
}
