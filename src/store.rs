use std::path::Path;

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::RoomSnapshot;

/// Key layout of the shared namespace. Disjoint prefixes keep the tenants'
/// concerns apart; saves use the bare `<gameId>:<playerId>:<saveKey>` form.
///
/// ```text
/// <gameId>:<playerId>:<saveKey>        JSON save value
/// apikey:<apiKey>                      ApiKeyRecord
/// stats:<gameId>                       StatsCounters
/// stats:<gameId>:daily:<YYYY-MM-DD>    unique-player set
/// stats:<gameId>:monthly:<YYYY-MM>     unique-player set
/// stats:<gameId>:player:<playerId>     PlayerStatsRecord
/// project:<projectId>:subdomain        subdomain string (hosting)
/// subdomain:<subdomain>                projectId
/// ```
pub mod layout {
    pub fn apikey(api_key: &str) -> String {
        format!("apikey:{api_key}")
    }

    pub fn save(game_id: &str, player_id: &str, save_key: &str) -> String {
        format!("{game_id}:{player_id}:{save_key}")
    }

    pub fn save_prefix(game_id: &str, player_id: &str) -> String {
        format!("{game_id}:{player_id}:")
    }

    pub fn stats_counters(game_id: &str) -> String {
        format!("stats:{game_id}")
    }

    pub fn stats_daily(game_id: &str, stamp: &str) -> String {
        format!("stats:{game_id}:daily:{stamp}")
    }

    pub fn stats_daily_prefix(game_id: &str) -> String {
        format!("stats:{game_id}:daily:")
    }

    pub fn stats_monthly(game_id: &str, stamp: &str) -> String {
        format!("stats:{game_id}:monthly:{stamp}")
    }

    pub fn stats_monthly_prefix(game_id: &str) -> String {
        format!("stats:{game_id}:monthly:")
    }

    pub fn stats_player(game_id: &str, player_id: &str) -> String {
        format!("stats:{game_id}:player:{player_id}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("keyspace error: {0}")]
    Backend(#[from] fjall::Error),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Durable storage: one partition for the shared prefix-disciplined
/// namespace, one for room snapshots (scoped per actor, keyed
/// `<gameId>:<CODE>`). Cheap to clone; fjall handles are internally shared.
#[derive(Clone)]
pub struct Store {
    _keyspace: Keyspace,
    namespace: PartitionHandle,
    rooms: PartitionHandle,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let keyspace = Config::new(path).open()?;
        let namespace =
            keyspace.open_partition("namespace", PartitionCreateOptions::default())?;
        let rooms = keyspace.open_partition("rooms", PartitionCreateOptions::default())?;
        Ok(Self {
            _keyspace: keyspace,
            namespace,
            rooms,
        })
    }

    // ─── Shared namespace ─────────────────────────────────────────────

    pub fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.namespace.get(key)?.map(|slice| slice.to_vec()))
    }

    pub fn put_raw(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.namespace.insert(key, value)?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.namespace.remove(key)?;
        Ok(())
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.namespace.get(key)? {
            Some(slice) => Ok(Some(serde_json::from_slice(&slice)?)),
            None => Ok(None),
        }
    }

    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.namespace.insert(key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    /// All keys under `prefix`, with the prefix stripped.
    pub fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for entry in self.namespace.prefix(prefix) {
            let (key, _) = entry?;
            let key = String::from_utf8_lossy(&key);
            keys.push(key[prefix.len()..].to_string());
        }
        Ok(keys)
    }

    // ─── Room snapshots ───────────────────────────────────────────────

    fn room_key(game_id: &str, code: &str) -> String {
        format!("{game_id}:{code}")
    }

    pub fn load_room(&self, game_id: &str, code: &str) -> Result<Option<RoomSnapshot>, StoreError> {
        match self.rooms.get(Self::room_key(game_id, code))? {
            Some(slice) => Ok(Some(serde_json::from_slice(&slice)?)),
            None => Ok(None),
        }
    }

    pub fn save_room(&self, snapshot: &RoomSnapshot) -> Result<(), StoreError> {
        let key = Self::room_key(&snapshot.game_id, &snapshot.code);
        self.rooms.insert(key, serde_json::to_vec(snapshot)?)?;
        Ok(())
    }

    pub fn delete_room(&self, game_id: &str, code: &str) -> Result<(), StoreError> {
        self.rooms.remove(Self::room_key(game_id, code))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RosterEntry, now_ms};

    fn open_temp() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn raw_roundtrip_and_idempotent_remove() {
        let (_dir, store) = open_temp();
        assert!(store.get_raw("g1:alice:progress").unwrap().is_none());

        store.put_raw("g1:alice:progress", br#"{"level":3}"#).unwrap();
        assert_eq!(
            store.get_raw("g1:alice:progress").unwrap().unwrap(),
            br#"{"level":3}"#.to_vec()
        );

        store.remove("g1:alice:progress").unwrap();
        store.remove("g1:alice:progress").unwrap();
        assert!(store.get_raw("g1:alice:progress").unwrap().is_none());
    }

    #[test]
    fn prefix_listing_respects_discipline() {
        let (_dir, store) = open_temp();
        store.put_raw(&layout::save("g1", "alice", "a"), b"1").unwrap();
        store.put_raw(&layout::save("g1", "alice", "b"), b"2").unwrap();
        store.put_raw(&layout::save("g1", "bob", "a"), b"3").unwrap();
        store.put_raw(&layout::save("g2", "alice", "a"), b"4").unwrap();
        store.put_raw(&layout::apikey("wt_k1"), b"{}").unwrap();

        let keys = store.list_prefix(&layout::save_prefix("g1", "alice")).unwrap();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn room_snapshot_roundtrip() {
        let (_dir, store) = open_temp();
        assert!(store.load_room("g1", "HQK3").unwrap().is_none());

        let mut snapshot = RoomSnapshot {
            game_id: "g1".into(),
            code: "HQK3".into(),
            host_id: "alice".into(),
            created_at: now_ms(),
            roster: Default::default(),
            player_states: Default::default(),
            game_state: serde_json::json!({"phase": "lobby"}),
        };
        snapshot.roster.insert("alice".into(), RosterEntry { joined_at: snapshot.created_at });
        store.save_room(&snapshot).unwrap();

        let loaded = store.load_room("g1", "HQK3").unwrap().unwrap();
        assert_eq!(loaded.host_id, "alice");
        assert_eq!(loaded.roster.len(), 1);
        assert_eq!(loaded.game_state, serde_json::json!({"phase": "lobby"}));

        store.delete_room("g1", "HQK3").unwrap();
        assert!(store.load_room("g1", "HQK3").unwrap().is_none());
    }
}
