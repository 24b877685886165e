//! Lobby task: the single writer of one game instance
//!
//! Admission, action intake, ticks, disconnects and the end of the game all
//! happen inside `LobbyTask::run`. Connection handlers reach it through a
//! cloneable `LobbyHandle` over a bounded command channel and get typed
//! results back on oneshot replies. Snapshots leave the task as shared
//! `Arc<str>` frames pushed into one bounded queue per connection.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ws::protocol::{ClientType, PlayerHello};

use super::actions::{Action, ActionQueue, SubmitOutcome};
use super::scheduler::TickScheduler;
use super::simulation::{self, SimulationError};
use super::snapshot::{self, SnapshotStats};
use super::world::{GameRules, LobbyStatus, Player, World, SPAWN_POINTS};

/// Capacity of the command channel into a lobby task
pub const COMMAND_BUFFER: usize = 256;

/// Connection id, unique within one lobby
pub type ConnId = u64;

/// Settings a lobby is created with
#[derive(Debug, Clone)]
pub struct LobbySettings {
    pub rules: GameRules,
    /// Frames buffered per connection before it counts as slow
    pub outbound_buffer: usize,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            rules: GameRules::default(),
            outbound_buffer: 16,
        }
    }
}

/// Admission refusals
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("lobby is full")]
    Full,

    #[error("lobby is not accepting players")]
    NotPending,

    #[error("lobby is closed")]
    Closed,
}

/// Why an explicit start was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StartError {
    #[error("lobby is not pending")]
    NotPending,

    #[error("need {needed} players, have {have}")]
    NoQuorum { needed: usize, have: usize },

    #[error("lobby is closed")]
    Closed,
}

/// Reason the lobby closed a connection from its side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Spectator fell behind the snapshot stream
    TooSlow,
    /// The simulation failed and the lobby shut down
    InternalError,
    /// The server is stopping
    ServerShutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::TooSlow => "too slow",
            CloseReason::InternalError => "internal error",
            CloseReason::ServerShutdown => "server shutting down",
        }
    }
}

/// What a connection gets back from a successful admission
#[derive(Debug)]
pub struct Admission {
    pub conn_id: ConnId,
    pub role: ClientType,
    pub player_id: Option<String>,
    /// Outbound text frames, in order; `None` once the lobby is done with us
    pub frames: mpsc::Receiver<Arc<str>>,
    /// Fires if the lobby drops this connection
    pub kicked: oneshot::Receiver<CloseReason>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSummary {
    pub name: String,
    pub color: String,
}

/// Read-only view of a lobby, published after every change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbySummary {
    pub id: Uuid,
    pub name: String,
    pub status: LobbyStatus,
    pub clients: Vec<ClientSummary>,
    pub spectators: u32,
}

impl LobbySummary {
    pub fn connected(&self) -> usize {
        self.clients.len() + self.spectators as usize
    }
}

#[derive(Debug)]
enum LobbyCommand {
    Admit {
        role: ClientType,
        name: String,
        reply: oneshot::Sender<Result<Admission, AdmissionError>>,
    },
    Submit {
        conn_id: ConnId,
        tick: u64,
        action: Action,
        reply: oneshot::Sender<SubmitOutcome>,
    },
    Disconnect {
        conn_id: ConnId,
    },
    Start {
        reply: oneshot::Sender<Result<(), StartError>>,
    },
    Shutdown,
}

/// Cloneable handle to a running lobby task
#[derive(Debug, Clone)]
pub struct LobbyHandle {
    id: Uuid,
    commands: mpsc::Sender<LobbyCommand>,
    summary: watch::Receiver<LobbySummary>,
}

impl LobbyHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Latest published summary; still readable after the task exits
    pub fn summary(&self) -> LobbySummary {
        self.summary.borrow().clone()
    }

    pub fn status(&self) -> LobbyStatus {
        self.summary.borrow().status
    }

    /// Subscribe to summary changes
    pub fn watch(&self) -> watch::Receiver<LobbySummary> {
        self.summary.clone()
    }

    pub async fn admit(
        &self,
        role: ClientType,
        name: String,
    ) -> Result<Admission, AdmissionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(LobbyCommand::Admit { role, name, reply })
            .await
            .map_err(|_| AdmissionError::Closed)?;
        rx.await.map_err(|_| AdmissionError::Closed)?
    }

    /// Queue an action; a closed lobby reports `NotRunning`
    pub async fn submit(&self, conn_id: ConnId, tick: u64, action: Action) -> SubmitOutcome {
        let (reply, rx) = oneshot::channel();
        let command = LobbyCommand::Submit {
            conn_id,
            tick,
            action,
            reply,
        };
        if self.commands.send(command).await.is_err() {
            return SubmitOutcome::NotRunning;
        }
        rx.await.unwrap_or(SubmitOutcome::NotRunning)
    }

    pub async fn disconnect(&self, conn_id: ConnId) {
        let _ = self
            .commands
            .send(LobbyCommand::Disconnect { conn_id })
            .await;
    }

    pub async fn start(&self) -> Result<(), StartError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(LobbyCommand::Start { reply })
            .await
            .map_err(|_| StartError::Closed)?;
        rx.await.map_err(|_| StartError::Closed)?
    }

    /// Close every connection and stop the task; resolves once it has exited
    pub async fn shutdown(&self) {
        if self.commands.send(LobbyCommand::Shutdown).await.is_ok() {
            self.closed().await;
        }
    }

    /// Resolves once the lobby task has exited
    pub async fn closed(&self) {
        self.commands.closed().await
    }
}

/// Spawn a PENDING lobby and return its handle
pub fn spawn_lobby(id: Uuid, name: String, settings: LobbySettings) -> LobbyHandle {
    let (task, handle) = LobbyTask::new(id, name, settings);
    tokio::spawn(task.run());
    handle
}

#[derive(Debug)]
struct Connection {
    role: ClientType,
    player_id: Option<String>,
    frames: mpsc::Sender<Arc<str>>,
    kick: oneshot::Sender<CloseReason>,
}

struct LobbyTask {
    id: Uuid,
    name: String,
    settings: LobbySettings,
    world: World,
    actions: ActionQueue,
    connections: BTreeMap<ConnId, Connection>,
    next_conn_id: ConnId,
    commands: mpsc::Receiver<LobbyCommand>,
    summary: watch::Sender<LobbySummary>,
    scheduler: Option<TickScheduler>,
    start_deadline: Option<Instant>,
    stats: SnapshotStats,
    /// Set by a shutdown command; the run loop exits after it
    stopping: bool,
}

impl LobbyTask {
    /// Build a PENDING lobby and the handle that reaches it
    fn new(id: Uuid, name: String, settings: LobbySettings) -> (Self, LobbyHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let world = World::new(settings.rules.tick_length_millis());
        let initial = LobbySummary {
            id,
            name: name.clone(),
            status: world.status,
            clients: Vec::new(),
            spectators: 0,
        };
        let (summary_tx, summary_rx) = watch::channel(initial);

        let task = LobbyTask {
            id,
            name,
            settings,
            world,
            actions: ActionQueue::new(),
            connections: BTreeMap::new(),
            next_conn_id: 1,
            commands: commands_rx,
            summary: summary_tx,
            scheduler: None,
            start_deadline: None,
            stats: SnapshotStats::default(),
            stopping: false,
        };
        let handle = LobbyHandle {
            id,
            commands: commands_tx,
            summary: summary_rx,
        };
        (task, handle)
    }

    async fn run(mut self) {
        info!(lobby_id = %self.id, name = %self.name, "lobby opened");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    // Every handle is gone; nobody can reach this lobby.
                    None => break,
                },
                _ = next_tick(&mut self.scheduler) => self.run_tick(),
                _ = wait_until(self.start_deadline) => {
                    self.start_deadline = None;
                    self.start_game("grace period elapsed");
                }
            }

            if self.stopping || self.world.status == LobbyStatus::Finished {
                break;
            }
        }

        self.shutdown();
    }

    fn handle_command(&mut self, command: LobbyCommand) {
        match command {
            LobbyCommand::Admit { role, name, reply } => {
                let result = self.admit(role, name);
                // Requester vanished before the reply arrived; undo.
                if let Err(Ok(admission)) = reply.send(result) {
                    self.disconnect(admission.conn_id);
                }
            }
            LobbyCommand::Submit {
                conn_id,
                tick,
                action,
                reply,
            } => {
                let outcome = self.submit(conn_id, tick, action);
                let _ = reply.send(outcome);
            }
            LobbyCommand::Disconnect { conn_id } => self.disconnect(conn_id),
            LobbyCommand::Start { reply } => {
                let result = self.request_start();
                let _ = reply.send(result);
            }
            LobbyCommand::Shutdown => {
                info!(lobby_id = %self.id, status = ?self.world.status, "lobby shutting down");
                self.stopping = true;
                self.kick_all(CloseReason::ServerShutdown);
            }
        }
    }

    fn admit(&mut self, role: ClientType, name: String) -> Result<Admission, AdmissionError> {
        let player = match role {
            ClientType::Player => {
                if self.world.status != LobbyStatus::Pending {
                    return Err(AdmissionError::NotPending);
                }
                let slot = self
                    .world
                    .free_slot(self.settings.rules.max_players)
                    .ok_or(AdmissionError::Full)?;
                let color = self.world.free_color().ok_or(AdmissionError::Full)?;
                let (x, y) = *SPAWN_POINTS.get(slot).ok_or(AdmissionError::Full)?;
                Some(Player::new(
                    Uuid::new_v4().to_string(),
                    name,
                    color.to_string(),
                    slot,
                    x,
                    y,
                ))
            }
            ClientType::Spectator => None,
        };

        let conn_id = self.next_conn_id;
        self.next_conn_id += 1;

        let (frames_tx, frames_rx) = mpsc::channel(self.settings.outbound_buffer.max(2));
        let (kick_tx, kick_rx) = oneshot::channel();
        let player_id = player.as_ref().map(|p| p.id.clone());

        match player {
            Some(player) => {
                info!(
                    lobby_id = %self.id,
                    player_id = %player.id,
                    name = %player.name,
                    color = %player.color,
                    slot = player.slot,
                    "player admitted"
                );
                let hello = PlayerHello {
                    success: true,
                    player_id: player.id.clone(),
                };
                match serde_json::to_string(&hello) {
                    Ok(text) => {
                        let _ = frames_tx.try_send(Arc::from(text));
                    }
                    Err(e) => warn!(lobby_id = %self.id, error = %e, "failed to encode hello"),
                }
                self.world.players.insert(player.id.clone(), player);
            }
            None => {
                self.world.spectators += 1;
                info!(
                    lobby_id = %self.id,
                    spectators = self.world.spectators,
                    "spectator admitted"
                );
            }
        }

        self.connections.insert(
            conn_id,
            Connection {
                role,
                player_id: player_id.clone(),
                frames: frames_tx,
                kick: kick_tx,
            },
        );

        let status_before = self.world.status;
        self.update_start_condition();
        match (status_before, self.world.status) {
            // Roster changed; everyone waiting sees it.
            (LobbyStatus::Pending, LobbyStatus::Pending) => self.broadcast_snapshot(),
            // start_game already sent tick 0 to everyone.
            (LobbyStatus::Pending, LobbyStatus::Running) => {}
            _ => self.send_snapshot(conn_id),
        }
        self.publish_summary();

        Ok(Admission {
            conn_id,
            role,
            player_id,
            frames: frames_rx,
            kicked: kick_rx,
        })
    }

    fn submit(&mut self, conn_id: ConnId, tick: u64, action: Action) -> SubmitOutcome {
        let Some(player_id) = self
            .connections
            .get(&conn_id)
            .and_then(|c| c.player_id.clone())
        else {
            return SubmitOutcome::NotAPlayer;
        };
        if self.world.status != LobbyStatus::Running {
            return SubmitOutcome::NotRunning;
        }
        let alive = self
            .world
            .players
            .get(&player_id)
            .is_some_and(|p| p.is_alive());
        if !alive {
            return SubmitOutcome::Eliminated;
        }

        let outcome = self.actions.submit(&player_id, self.world.tick, tick, action);
        if !outcome.is_queued() {
            debug!(
                lobby_id = %self.id,
                player_id = %player_id,
                current_tick = self.world.tick,
                action_tick = tick,
                ?outcome,
                "action dropped"
            );
        }
        outcome
    }

    fn disconnect(&mut self, conn_id: ConnId) {
        if self.remove_connection(conn_id).is_none() {
            return;
        }
        if self.world.status != LobbyStatus::Running {
            self.broadcast_snapshot();
        }
        self.publish_summary();
    }

    /// Drop a connection from the lobby, removing its player if it had one
    fn remove_connection(&mut self, conn_id: ConnId) -> Option<Connection> {
        let conn = self.connections.remove(&conn_id)?;

        match &conn.player_id {
            Some(player_id) => {
                self.world.players.remove(player_id);
                self.actions.remove(player_id);
                info!(lobby_id = %self.id, player_id = %player_id, "player left");

                match self.world.status {
                    LobbyStatus::Running if self.world.live_player_count() <= 1 => {
                        self.finish("players left");
                    }
                    LobbyStatus::Pending => self.update_start_condition(),
                    _ => {}
                }
            }
            None => {
                self.world.spectators = self.world.spectators.saturating_sub(1);
                debug!(lobby_id = %self.id, spectators = self.world.spectators, "spectator left");
            }
        }

        Some(conn)
    }

    fn kick(&mut self, conn_id: ConnId, reason: CloseReason) {
        if let Some(conn) = self.remove_connection(conn_id) {
            let _ = conn.kick.send(reason);
        }
    }

    fn update_start_condition(&mut self) {
        if self.world.status != LobbyStatus::Pending {
            return;
        }
        let players = self.world.players.len();
        let rules = &self.settings.rules;

        if players >= rules.max_players {
            self.start_game("lobby full");
        } else if players >= rules.min_players {
            if self.start_deadline.is_none() {
                self.start_deadline = Some(Instant::now() + rules.start_grace);
                info!(
                    lobby_id = %self.id,
                    players,
                    grace_secs = rules.start_grace.as_secs(),
                    "quorum reached, starting soon"
                );
            }
        } else if self.start_deadline.take().is_some() {
            info!(lobby_id = %self.id, players, "quorum lost, start cancelled");
        }
    }

    fn request_start(&mut self) -> Result<(), StartError> {
        if self.world.status != LobbyStatus::Pending {
            return Err(StartError::NotPending);
        }
        let have = self.world.players.len();
        let needed = self.settings.rules.min_players;
        if have < needed {
            return Err(StartError::NoQuorum { needed, have });
        }
        self.start_game("start requested");
        Ok(())
    }

    fn start_game(&mut self, trigger: &'static str) {
        if self.world.status != LobbyStatus::Pending {
            return;
        }
        self.start_deadline = None;
        self.world.status = LobbyStatus::Running;
        self.scheduler = Some(TickScheduler::new(self.settings.rules.tick_length));
        info!(
            lobby_id = %self.id,
            players = self.world.players.len(),
            tick_length_ms = self.world.tick_length_milli_seconds,
            trigger,
            "game started"
        );
        self.broadcast_snapshot();
        self.publish_summary();
    }

    fn run_tick(&mut self) {
        let started = Instant::now();
        let actions = self.actions.drain(self.world.tick);

        match simulation::step(&mut self.world, &self.settings.rules, actions) {
            Ok(report) => {
                if report.finished {
                    info!(
                        lobby_id = %self.id,
                        tick = report.tick,
                        winner = report.winner.as_deref().unwrap_or("none"),
                        "game finished"
                    );
                }
                self.broadcast_snapshot();
                if report.finished {
                    self.publish_summary();
                }
            }
            Err(err) => {
                self.fail(err);
                return;
            }
        }

        if let Some(scheduler) = &self.scheduler {
            scheduler.record_step(self.world.tick, started.elapsed());
        }
    }

    fn finish(&mut self, reason: &'static str) {
        self.world.status = LobbyStatus::Finished;
        self.scheduler = None;
        let winner = self
            .world
            .players
            .values()
            .find(|p| p.is_alive())
            .map(|p| p.id.clone());
        info!(
            lobby_id = %self.id,
            tick = self.world.tick,
            winner = winner.as_deref().unwrap_or("none"),
            reason,
            "game finished"
        );
    }

    fn fail(&mut self, err: SimulationError) {
        error!(
            lobby_id = %self.id,
            tick = self.world.tick,
            error = %err,
            "simulation invariant violated, closing lobby"
        );
        self.world.status = LobbyStatus::Finished;
        self.scheduler = None;
        self.kick_all(CloseReason::InternalError);
        self.publish_summary();
    }

    /// Close every connection with `reason`, leaving the world as it is
    fn kick_all(&mut self, reason: CloseReason) {
        for (_, conn) in std::mem::take(&mut self.connections) {
            let _ = conn.kick.send(reason);
        }
        self.world.spectators = 0;
    }

    fn broadcast_snapshot(&mut self) {
        let frame = match snapshot::encode(&self.world) {
            Ok(frame) => frame,
            Err(e) => {
                error!(lobby_id = %self.id, error = %e, "failed to encode snapshot");
                return;
            }
        };
        self.stats.record(self.world.players.len(), frame.len());

        let mut slow = Vec::new();
        for (conn_id, conn) in &self.connections {
            match conn.frames.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => match conn.role {
                    ClientType::Spectator => slow.push(*conn_id),
                    ClientType::Player => debug!(
                        lobby_id = %self.id,
                        conn_id,
                        tick = self.world.tick,
                        "player buffer full, snapshot skipped"
                    ),
                },
                // Session is on its way out; its disconnect follows.
                Err(TrySendError::Closed(_)) => {}
            }
        }

        if slow.is_empty() {
            return;
        }
        for conn_id in slow {
            warn!(lobby_id = %self.id, conn_id, "dropping slow spectator");
            self.kick(conn_id, CloseReason::TooSlow);
        }
        self.publish_summary();
    }

    fn send_snapshot(&mut self, conn_id: ConnId) {
        let Some(conn) = self.connections.get(&conn_id) else {
            return;
        };
        match snapshot::encode(&self.world) {
            Ok(frame) => {
                let _ = conn.frames.try_send(frame);
            }
            Err(e) => error!(lobby_id = %self.id, error = %e, "failed to encode snapshot"),
        }
    }

    fn publish_summary(&self) {
        let clients = self
            .world
            .players
            .values()
            .map(|p| ClientSummary {
                name: p.name.clone(),
                color: p.color.clone(),
            })
            .collect();
        let summary = LobbySummary {
            id: self.id,
            name: self.name.clone(),
            status: self.world.status,
            clients,
            spectators: self.world.spectators,
        };
        self.summary.send_if_modified(|current| {
            if *current == summary {
                false
            } else {
                *current = summary;
                true
            }
        });
    }

    fn shutdown(&mut self) {
        self.scheduler = None;
        self.start_deadline = None;
        // Dropping the frame senders ends every session with a normal close.
        self.connections.clear();
        self.world.spectators = 0;
        self.publish_summary();
        info!(
            lobby_id = %self.id,
            tick = self.world.tick,
            snapshots = self.stats.frames,
            snapshot_bytes = self.stats.bytes,
            mean_players = self.stats.mean_players(),
            "lobby closed"
        );
    }
}

async fn next_tick(scheduler: &mut Option<TickScheduler>) {
    match scheduler.as_mut() {
        Some(scheduler) => {
            scheduler.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
