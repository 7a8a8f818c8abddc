use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::room::{self, RoomCommand, RoomError, RoomHandle};
use crate::stats::StatsHandle;
use crate::store::Store;
use crate::types::{JoinOutcome, RoomInfo};

/// Resolves `(gameId, code)` to the live room actor, spawning one cold when
/// none is running. Codes must already be canonical (uppercase) here.
pub struct RoomRegistry {
    rooms: DashMap<String, RoomHandle>,
    store: Store,
    stats: StatsHandle,
    idle: Duration,
}

impl RoomRegistry {
    pub fn new(store: Store, stats: StatsHandle, idle: Duration) -> Arc<Self> {
        Arc::new(Self {
            rooms: DashMap::new(),
            store,
            stats,
            idle,
        })
    }

    fn key(game_id: &str, code: &str) -> String {
        format!("{game_id}:{code}")
    }

    /// The handle for this room's actor; the same name always maps to the
    /// same actor instance while it lives.
    pub fn handle(self: &Arc<Self>, game_id: &str, code: &str) -> RoomHandle {
        let key = Self::key(game_id, code);
        if let Some(handle) = self.rooms.get(&key) {
            if !handle.cmd_tx.is_closed() {
                return handle.clone();
            }
        }
        match self.rooms.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().cmd_tx.is_closed() {
                    let handle = self.spawn_actor(key, game_id, code);
                    entry.insert(handle.clone());
                    handle
                } else {
                    entry.get().clone()
                }
            }
            Entry::Vacant(entry) => {
                let handle = self.spawn_actor(key.clone(), game_id, code);
                entry.insert(handle.clone());
                handle
            }
        }
    }

    fn spawn_actor(self: &Arc<Self>, key: String, game_id: &str, code: &str) -> RoomHandle {
        let actor_id = Uuid::new_v4();
        let registry = Arc::clone(self);
        room::spawn(
            actor_id,
            self.store.clone(),
            self.stats.clone(),
            game_id.to_string(),
            code.to_string(),
            self.idle,
            move || {
                // Only drop our own entry; a replacement actor may already
                // hold the slot.
                registry
                    .rooms
                    .remove_if(&key, |_, handle| handle.actor_id == actor_id);
            },
        )
    }

    /// Deliver a command, respawning once if the resolved actor has already
    /// hibernated between lookup and send.
    async fn deliver(self: &Arc<Self>, game_id: &str, code: &str, mut cmd: RoomCommand) {
        for _ in 0..2 {
            let handle = self.handle(game_id, code);
            match handle.cmd_tx.send(cmd).await {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => {
                    self.rooms
                        .remove_if(&Self::key(game_id, code), |_, stale| {
                            stale.actor_id == handle.actor_id
                        });
                    cmd = returned;
                }
            }
        }
        tracing::warn!(game_id = %game_id, code = %code, "room actor refused delivery twice");
    }

    pub async fn create_room(
        self: &Arc<Self>,
        game_id: &str,
        code: &str,
        host_id: String,
    ) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.deliver(game_id, code, RoomCommand::Create { host_id, reply: tx })
            .await;
        rx.await.map_err(|_| RoomError::Unavailable)?
    }

    pub async fn room_info(self: &Arc<Self>, game_id: &str, code: &str) -> Result<RoomInfo, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.deliver(game_id, code, RoomCommand::Info { reply: tx })
            .await;
        rx.await.map_err(|_| RoomError::Unavailable)?
    }

    pub async fn join_room(
        self: &Arc<Self>,
        game_id: &str,
        code: &str,
        player_id: String,
    ) -> Result<JoinOutcome, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.deliver(game_id, code, RoomCommand::Join { player_id, reply: tx })
            .await;
        rx.await.map_err(|_| RoomError::Unavailable)?
    }
}
