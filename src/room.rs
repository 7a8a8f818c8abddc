use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

use crate::stats::{StatsEvent, StatsHandle};
use crate::store::Store;
use crate::types::{
    now_ms, ClientFrame, JoinOutcome, RoomInfo, RoomSnapshot, RoomSummary, RosterEntry,
    ServerFrame,
};

/// Period of the batched `players_sync` broadcast (20 Hz).
pub const TICK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("room not found")]
    NotFound,
    #[error("room already exists")]
    AlreadyExists,
    #[error("room actor unavailable")]
    Unavailable,
}

/// Commands the transport sends to a room actor. The actor's inbox is the
/// serialization point: one command is handled at a time.
#[derive(Debug)]
pub enum RoomCommand {
    Create {
        host_id: String,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Info {
        reply: oneshot::Sender<Result<RoomInfo, RoomError>>,
    },
    Join {
        player_id: String,
        reply: oneshot::Sender<Result<JoinOutcome, RoomError>>,
    },
    Connect {
        session_id: Uuid,
        player_id: String,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Frame {
        session_id: Uuid,
        player_id: String,
        frame: ClientFrame,
    },
    Disconnect {
        session_id: Uuid,
        player_id: String,
    },
}

/// Events fanned out from the actor to the per-socket forwarding tasks.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    SendTo {
        session_id: Uuid,
        frame: ServerFrame,
    },
    Broadcast {
        frame: ServerFrame,
    },
    BroadcastExcept {
        exclude: Uuid,
        frame: ServerFrame,
    },
    /// The named session has been superseded by a newer socket for the same
    /// player and must close with code 1000.
    Replace {
        session_id: Uuid,
    },
}

#[derive(Clone)]
pub struct RoomHandle {
    pub actor_id: Uuid,
    pub cmd_tx: mpsc::Sender<RoomCommand>,
    pub event_tx: broadcast::Sender<RoomEvent>,
}

/// Spawn the actor task for one `(gameId, code)`. `on_exit` runs when the
/// task ends (hibernation or inbox closure) so the registry can drop its
/// handle.
pub fn spawn<F>(
    actor_id: Uuid,
    store: Store,
    stats: StatsHandle,
    game_id: String,
    code: String,
    idle: Duration,
    on_exit: F,
) -> RoomHandle
where
    F: FnOnce() + Send + 'static,
{
    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let (event_tx, _) = broadcast::channel(256);

    let actor = RoomActor {
        store,
        stats,
        game_id,
        code,
        event_tx: event_tx.clone(),
        room: None,
        sessions: Sessions::default(),
        dirty: false,
    };
    tokio::spawn(async move {
        actor.run(cmd_rx, idle).await;
        on_exit();
    });

    RoomHandle {
        actor_id,
        cmd_tx,
        event_tx,
    }
}

/// Live sockets bound to this room. At most one session per player; a new
/// socket for a connected player replaces the old one.
#[derive(Default)]
struct Sessions {
    players: HashMap<Uuid, String>,
    by_player: HashMap<String, Uuid>,
}

impl Sessions {
    fn insert(&mut self, session_id: Uuid, player_id: String) {
        self.by_player.insert(player_id.clone(), session_id);
        self.players.insert(session_id, player_id);
    }

    fn remove(&mut self, session_id: Uuid) -> Option<String> {
        let player_id = self.players.remove(&session_id)?;
        if self.by_player.get(&player_id) == Some(&session_id) {
            self.by_player.remove(&player_id);
        }
        Some(player_id)
    }

    fn session_for(&self, player_id: &str) -> Option<Uuid> {
        self.by_player.get(player_id).copied()
    }

    fn contains(&self, session_id: Uuid) -> bool {
        self.players.contains_key(&session_id)
    }

    fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

struct RoomActor {
    store: Store,
    stats: StatsHandle,
    game_id: String,
    code: String,
    event_tx: broadcast::Sender<RoomEvent>,
    room: Option<RoomSnapshot>,
    sessions: Sessions,
    dirty: bool,
}

impl RoomActor {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<RoomCommand>, idle: Duration) {
        // Cold boot: restore the last serialized shape before handling
        // anything. Commands queue in the inbox meanwhile.
        self.room = match self.store.load_room(&self.game_id, &self.code) {
            Ok(room) => room,
            Err(err) => {
                tracing::error!(code = %self.code, error = %err, "failed to load room snapshot");
                None
            }
        };

        let mut tick = tokio::time::interval_at(
            tokio::time::Instant::now() + TICK_INTERVAL,
            TICK_INTERVAL,
        );
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let idle_timer = tokio::time::sleep(idle);
        tokio::pin!(idle_timer);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    let hibernate = self.handle_command(cmd);
                    idle_timer.as_mut().reset(tokio::time::Instant::now() + idle);
                    if hibernate {
                        break;
                    }
                }
                _ = tick.tick(), if self.dirty && !self.sessions.is_empty() => {
                    self.flush_tick();
                }
                // An actor with no sockets holds no live resources worth
                // keeping; it exits and the next message cold-boots it from
                // its snapshot (if one still exists).
                () = idle_timer.as_mut(), if self.sessions.is_empty() => {
                    tracing::debug!(game_id = %self.game_id, code = %self.code, "room actor idle, hibernating");
                    break;
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: RoomCommand) -> bool {
        match cmd {
            RoomCommand::Create { host_id, reply } => {
                let _ = reply.send(self.handle_create(host_id));
            }
            RoomCommand::Info { reply } => {
                let _ = reply.send(self.handle_info());
            }
            RoomCommand::Join { player_id, reply } => {
                let _ = reply.send(self.handle_join(player_id));
            }
            RoomCommand::Connect {
                session_id,
                player_id,
                reply,
            } => {
                let _ = reply.send(self.handle_connect(session_id, player_id));
            }
            RoomCommand::Frame {
                session_id,
                player_id,
                frame,
            } => self.handle_frame(session_id, player_id, frame),
            RoomCommand::Disconnect {
                session_id,
                player_id,
            } => return self.handle_disconnect(session_id, player_id),
        }
        false
    }

    fn emit(&self, event: RoomEvent) {
        // Err just means no socket is listening right now.
        let _ = self.event_tx.send(event);
    }

    fn persist(&self) {
        if let Some(room) = &self.room {
            if let Err(err) = self.store.save_room(room) {
                // In-memory state stays authoritative; the next successful
                // persist supersedes this one.
                tracing::error!(code = %self.code, error = %err, "failed to persist room snapshot");
            }
        }
    }

    fn flush_tick(&mut self) {
        if let Some(room) = &self.room {
            self.emit(RoomEvent::Broadcast {
                frame: ServerFrame::PlayersSync {
                    players: room.player_states.clone(),
                },
            });
        }
        self.persist();
        self.dirty = false;
    }

    fn handle_create(&mut self, host_id: String) -> Result<(), RoomError> {
        if self.room.is_some() {
            return Err(RoomError::AlreadyExists);
        }
        let now = now_ms();
        let mut roster = BTreeMap::new();
        roster.insert(host_id.clone(), RosterEntry { joined_at: now });
        self.room = Some(RoomSnapshot {
            game_id: self.game_id.clone(),
            code: self.code.clone(),
            host_id,
            created_at: now,
            roster,
            player_states: BTreeMap::new(),
            game_state: Value::Object(serde_json::Map::new()),
        });
        self.persist();
        self.stats.record(StatsEvent::RoomCreate {
            game_id: self.game_id.clone(),
        });
        self.stats.record(StatsEvent::RoomJoin {
            game_id: self.game_id.clone(),
        });
        tracing::info!(game_id = %self.game_id, code = %self.code, "room created");
        Ok(())
    }

    fn handle_info(&self) -> Result<RoomInfo, RoomError> {
        let room = self.room.as_ref().ok_or(RoomError::NotFound)?;
        Ok(RoomInfo {
            game_id: room.game_id.clone(),
            host_id: room.host_id.clone(),
            created_at: room.created_at,
            player_count: room.player_count(),
            players: room.players(),
        })
    }

    fn handle_join(&mut self, player_id: String) -> Result<JoinOutcome, RoomError> {
        let room = self.room.as_mut().ok_or(RoomError::NotFound)?;
        let newly_added = !room.roster.contains_key(&player_id);
        if newly_added {
            room.roster
                .insert(player_id.clone(), RosterEntry { joined_at: now_ms() });
        }
        let outcome = JoinOutcome {
            host_id: room.host_id.clone(),
            players: room.players(),
        };
        let player_count = room.player_count();

        if newly_added {
            self.persist();
            self.emit(RoomEvent::Broadcast {
                frame: ServerFrame::PlayerJoined {
                    player_id,
                    player_count,
                },
            });
            self.stats.record(StatsEvent::RoomJoin {
                game_id: self.game_id.clone(),
            });
        }
        Ok(outcome)
    }

    fn handle_connect(&mut self, session_id: Uuid, player_id: String) -> Result<(), RoomError> {
        if self.room.is_none() {
            return Err(RoomError::NotFound);
        }

        // A second socket for a connected player supersedes the first.
        if let Some(old) = self.sessions.session_for(&player_id) {
            self.emit(RoomEvent::Replace { session_id: old });
            self.sessions.remove(old);
            tracing::debug!(player_id = %player_id, "session replaced by new connection");
        }
        self.sessions.insert(session_id, player_id.clone());

        let mut newly_added = false;
        if let Some(room) = self.room.as_mut() {
            if !room.roster.contains_key(&player_id) {
                room.roster
                    .insert(player_id.clone(), RosterEntry { joined_at: now_ms() });
                newly_added = true;
            }
        }
        if newly_added {
            self.persist();
            self.stats.record(StatsEvent::RoomJoin {
                game_id: self.game_id.clone(),
            });
        }

        if let Some(room) = &self.room {
            // Late-joiner snapshot goes to the newcomer first.
            self.emit(RoomEvent::SendTo {
                session_id,
                frame: ServerFrame::Connected {
                    player_id: player_id.clone(),
                    room: RoomSummary {
                        game_id: room.game_id.clone(),
                        host_id: room.host_id.clone(),
                        players: room.players(),
                        player_count: room.player_count(),
                    },
                    player_states: room.player_states.clone(),
                    game_state: room.game_state.clone(),
                },
            });
            if newly_added {
                self.emit(RoomEvent::BroadcastExcept {
                    exclude: session_id,
                    frame: ServerFrame::PlayerJoined {
                        player_id,
                        player_count: room.player_count(),
                    },
                });
            }
        }
        Ok(())
    }

    fn handle_frame(&mut self, session_id: Uuid, player_id: String, frame: ClientFrame) {
        // Frames from a replaced or unknown socket are stale.
        if !self.sessions.contains(session_id) {
            return;
        }
        if self.room.is_none() {
            return;
        }

        match frame {
            ClientFrame::PlayerState { state } => {
                let Some(room) = self.room.as_mut() else { return };
                if !room.roster.contains_key(&player_id) {
                    return;
                }
                room.player_states.insert(player_id.clone(), state.clone());
                self.dirty = true;
                // Fast path: a single-player delta right away; the tick
                // batch covers the rest.
                self.emit(RoomEvent::BroadcastExcept {
                    exclude: session_id,
                    frame: ServerFrame::PlayerStateUpdate { player_id, state },
                });
            }
            ClientFrame::GameState { state } => {
                let is_host = self
                    .room
                    .as_ref()
                    .is_some_and(|room| room.host_id == player_id);
                if !is_host {
                    tracing::debug!(player_id = %player_id, "ignoring game_state from non-host");
                    return;
                }
                if let Some(room) = self.room.as_mut() {
                    room.game_state = state.clone();
                }
                self.persist();
                // Everyone, including the sender as confirmation.
                self.emit(RoomEvent::Broadcast {
                    frame: ServerFrame::GameStateSync { state },
                });
            }
            ClientFrame::TransferHost { new_host_id } => {
                let allowed = self.room.as_ref().is_some_and(|room| {
                    room.host_id == player_id && room.roster.contains_key(&new_host_id)
                });
                if !allowed {
                    tracing::debug!(player_id = %player_id, "ignoring transfer_host");
                    return;
                }
                if let Some(room) = self.room.as_mut() {
                    room.host_id = new_host_id.clone();
                }
                self.persist();
                self.emit(RoomEvent::Broadcast {
                    frame: ServerFrame::HostChanged {
                        host_id: new_host_id,
                    },
                });
            }
            ClientFrame::Broadcast { data, exclude_self } => {
                let frame = ServerFrame::Message {
                    from: player_id,
                    data,
                };
                if exclude_self {
                    self.emit(RoomEvent::BroadcastExcept {
                        exclude: session_id,
                        frame,
                    });
                } else {
                    self.emit(RoomEvent::Broadcast { frame });
                }
            }
            ClientFrame::Send { to, data } => {
                if let Some(target) = self.sessions.session_for(&to) {
                    self.emit(RoomEvent::SendTo {
                        session_id: target,
                        frame: ServerFrame::Message {
                            from: player_id,
                            data,
                        },
                    });
                }
            }
            ClientFrame::Ping => {
                self.emit(RoomEvent::SendTo {
                    session_id,
                    frame: ServerFrame::Pong {
                        timestamp: now_ms(),
                    },
                });
            }
            ClientFrame::Unknown => {
                tracing::trace!("dropping frame with unknown type");
            }
        }
    }

    /// Returns true when the actor should hibernate right away (the room is
    /// gone and no sockets remain).
    fn handle_disconnect(&mut self, session_id: Uuid, _player_id: String) -> bool {
        let Some(player_id) = self.sessions.remove(session_id) else {
            // Already replaced; the close of the old socket is a no-op.
            return false;
        };

        let Some(room) = self.room.as_mut() else {
            return self.sessions.is_empty();
        };

        let was_host = room.host_id == player_id;
        let was_member = room.roster.remove(&player_id).is_some();
        room.player_states.remove(&player_id);

        if was_member {
            self.stats.record(StatsEvent::RoomLeave {
                game_id: self.game_id.clone(),
            });
        }

        if room.roster.is_empty() {
            // Last one out: the room and its snapshot are gone.
            if let Err(err) = self.store.delete_room(&self.game_id, &self.code) {
                tracing::error!(code = %self.code, error = %err, "failed to delete room snapshot");
            }
            self.room = None;
            self.dirty = false;
            self.stats.record(StatsEvent::RoomClose {
                game_id: self.game_id.clone(),
            });
            tracing::info!(game_id = %self.game_id, code = %self.code, "room closed");
            return self.sessions.is_empty();
        }

        let mut promoted = None;
        if was_host {
            // Earliest joiner wins; ties break on the lexicographically
            // smallest player id.
            let next_host = room
                .roster
                .iter()
                .min_by_key(|(id, entry)| (entry.joined_at, id.as_str().to_owned()))
                .map(|(id, _)| id.clone());
            if let Some(next_host) = next_host {
                room.host_id = next_host.clone();
                promoted = Some(next_host);
            }
        }
        let player_count = room.player_count();

        if let Some(host_id) = promoted {
            self.emit(RoomEvent::Broadcast {
                frame: ServerFrame::HostChanged { host_id },
            });
        }
        self.persist();
        self.emit(RoomEvent::Broadcast {
            frame: ServerFrame::PlayerLeft {
                player_id,
                player_count,
            },
        });
        false
    }
}
