//! Shared scaffolding for module tests.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::keys;
use crate::registry::RoomRegistry;
use crate::stats::StatsHandle;
use crate::store::Store;
use crate::AppState;

/// A fresh `AppState` over a temporary keyspace with one registered key:
/// `wt_test` → game `g1`, project `p1`. The tempdir guard comes back with
/// the state; keep it alive for the duration of the test.
pub fn seeded_state() -> (tempfile::TempDir, AppState) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();

    keys::put(&store, "wt_test", "g1", "p1").unwrap();

    let config = Arc::new(Config {
        bind_addr: "127.0.0.1".into(),
        port: 0,
        data_dir: dir.path().to_path_buf(),
        internal_secret: "internal-secret".into(),
        public_url: "http://localhost:8787".into(),
        room_idle_secs: 60,
    });
    let stats = StatsHandle::disabled();
    let registry = RoomRegistry::new(store.clone(), stats.clone(), Duration::from_secs(60));

    let state = AppState {
        config,
        store,
        stats,
        registry,
    };
    (dir, state)
}
