//! World Session Management
//!
//! Binds connections to worlds. A [`WorldSession`] owns one world and the
//! outbound channel of every player in it; it is the single place world state
//! is mutated, so holding its lock serializes client messages with ticks.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::events::{GameEvent, LeaveReason, Recipient};
use crate::game::ground::TriangleMesh;
use crate::game::input::{MoveRejection, MoveValidator};
use crate::game::pickup::collect_pickup;
use crate::game::scenery::{SceneryError, SceneryProvider};
use crate::game::state::{PlayerId, WorldState};
use crate::game::tick::{build_snapshot, tick, TickResult, WorldConfig};
use crate::network::protocol::{ClientMessage, ServerMessage};

/// Unique world identifier.
pub type WorldId = Uuid;

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// World is at its player cap.
    #[error("World is full")]
    WorldFull,

    /// Connection already has a player.
    #[error("Already joined")]
    AlreadyJoined,

    /// Player not found.
    #[error("Player not found")]
    PlayerNotFound,

    /// World could not be built.
    #[error("Failed to build world: {0}")]
    Scenery(#[from] SceneryError),
}

impl SessionError {
    /// Wire code for join refusals.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::WorldFull => "worldFull",
            SessionError::AlreadyJoined => "alreadyJoined",
            SessionError::PlayerNotFound => "playerNotFound",
            SessionError::Scenery(_) => "worldUnavailable",
        }
    }
}

// =============================================================================
// WORLD SESSION
// =============================================================================

/// One world and its connections.
pub struct WorldSession {
    state: WorldState,
    validator: MoveValidator,
    connections: BTreeMap<PlayerId, mpsc::Sender<ServerMessage>>,
}

impl WorldSession {
    /// Wrap a freshly built world.
    pub fn new(state: WorldState) -> Self {
        Self {
            validator: MoveValidator::new(state.config.movement),
            state,
            connections: BTreeMap::new(),
        }
    }

    /// World identifier.
    pub fn id(&self) -> WorldId {
        self.state.world_id
    }

    /// Read access to the world.
    pub fn state(&self) -> &WorldState {
        &self.state
    }

    /// Connected players.
    pub fn player_count(&self) -> usize {
        self.connections.len()
    }

    /// Whether the player cap is reached.
    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.state.config.max_players
    }

    /// Whether a player belongs to this world.
    pub fn contains(&self, player_id: PlayerId) -> bool {
        self.connections.contains_key(&player_id)
    }

    /// Add a player at a random spawn point.
    ///
    /// The joiner gets `welcome` and the current `gameState`; everyone else
    /// gets `playerJoined`.
    pub fn join(
        &mut self,
        name: impl Into<String>,
        sender: mpsc::Sender<ServerMessage>,
        now_ms: u64,
    ) -> Result<PlayerId, SessionError> {
        if self.is_full() {
            return Err(SessionError::WorldFull);
        }

        let name = name.into();
        let player_id = self.state.add_player(name.clone(), now_ms);
        let position = self
            .state
            .get_player(player_id)
            .map(|p| p.position)
            .unwrap_or_default();

        send(
            &sender,
            player_id,
            ServerMessage::Welcome {
                player_id,
                world_id: self.state.world_id,
                tick_rate: self.state.config.tick_rate,
                position,
            },
        );
        send(
            &sender,
            player_id,
            ServerMessage::GameState(build_snapshot(&self.state, now_ms, Vec::new())),
        );
        self.connections.insert(player_id, sender);

        let tick = self.state.tick;
        self.state
            .push_event(GameEvent::player_joined(tick, player_id, name.clone(), position));
        self.flush();

        info!(player = %player_id, %name, world = %self.state.world_id, "Player joined");
        Ok(player_id)
    }

    /// Remove a player and close their channel.
    pub fn leave(&mut self, player_id: PlayerId, reason: LeaveReason) -> bool {
        let connected = self.connections.remove(&player_id).is_some();
        let present = self.state.remove_player(player_id).is_some();
        if !connected && !present {
            return false;
        }

        let tick = self.state.tick;
        self.state.push_event(GameEvent::player_left(tick, player_id, reason));
        self.flush();

        info!(player = %player_id, ?reason, "Player left");
        true
    }

    /// Apply one client message.
    ///
    /// Rejections are logged and otherwise dropped; any events the message
    /// produced are dispatched before this returns.
    pub fn handle_message(
        &mut self,
        player_id: PlayerId,
        message: ClientMessage,
        now_ms: u64,
    ) -> Result<(), SessionError> {
        if !self.contains(player_id) {
            return Err(SessionError::PlayerNotFound);
        }

        match message {
            ClientMessage::Join { .. } => {
                warn!(player = %player_id, "Join on an already joined connection");
                return Err(SessionError::AlreadyJoined);
            }
            ClientMessage::Move(command) => {
                match self.validator.process(&mut self.state, player_id, command, now_ms) {
                    Ok(_) => {}
                    Err(rejection @ MoveRejection::Malformed(_)) => {
                        warn!(player = %player_id, %rejection, "Dropping malformed move");
                    }
                    Err(rejection) => debug!(player = %player_id, %rejection, "Move rejected"),
                }
            }
            ClientMessage::ShootProjectile(command) => match command.process(&mut self.state, player_id, now_ms) {
                Ok(_) => {}
                Err(err) if !err.is_reported() => {
                    warn!(player = %player_id, weapon = %command.weapon_id, %err, "Shot ignored");
                }
                Err(err) => debug!(player = %player_id, weapon = %command.weapon_id, %err, "Shot rejected"),
            },
            ClientMessage::CollectPickup { pickup_id } => {
                collect_pickup(&mut self.state, player_id, pickup_id, now_ms);
            }
            ClientMessage::Ping { timestamp } => {
                if let Some(sender) = self.connections.get(&player_id) {
                    send(
                        sender,
                        player_id,
                        ServerMessage::Pong {
                            timestamp,
                            server_time: now_ms,
                        },
                    );
                }
            }
            ClientMessage::Leave => {
                self.leave(player_id, LeaveReason::Disconnected);
                return Ok(());
            }
        }

        self.flush();
        Ok(())
    }

    /// Run one tick and broadcast its events.
    ///
    /// Players evicted for inactivity lose their channel, which closes their
    /// connection.
    pub fn run_tick(&mut self, now_ms: u64) -> TickResult {
        let result = tick(&mut self.state, now_ms);
        self.dispatch(&result.events);

        for player_id in &result.evicted {
            self.connections.remove(player_id);
        }
        result
    }

    /// Send a message to every connection.
    pub fn broadcast(&self, message: ServerMessage) {
        for (player_id, sender) in &self.connections {
            send(sender, *player_id, message.clone());
        }
    }

    fn flush(&mut self) {
        let events = self.state.take_events();
        self.dispatch(&events);
    }

    fn dispatch(&self, events: &[GameEvent]) {
        for event in events {
            let message = ServerMessage::from(event.data.clone());
            match event.recipient() {
                Recipient::All => self.broadcast(message),
                Recipient::Player(id) => {
                    if let Some(sender) = self.connections.get(&id) {
                        send(sender, id, message);
                    }
                }
                Recipient::AllExcept(skip) => {
                    for (id, sender) in &self.connections {
                        if *id != skip {
                            send(sender, *id, message.clone());
                        }
                    }
                }
            }
        }
    }
}

/// Fire-and-forget send. A full queue drops the message.
fn send(sender: &mpsc::Sender<ServerMessage>, player_id: PlayerId, message: ServerMessage) {
    match sender.try_send(message) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => debug!(player = %player_id, "Outbound queue full, message dropped"),
        Err(TrySendError::Closed(_)) => debug!(player = %player_id, "Connection closed"),
    }
}

// =============================================================================
// SESSION MANAGER
// =============================================================================

/// Result of [`SessionManager::join`].
pub struct JoinedWorld {
    /// World joined.
    pub world: Arc<RwLock<WorldSession>>,
    /// New player id.
    pub player_id: PlayerId,
    /// Whether the world was created for this join.
    pub created: bool,
}

/// Manages all worlds of the process.
pub struct SessionManager {
    config: WorldConfig,
    mesh: TriangleMesh,
    scenery: Arc<dyn SceneryProvider + Send + Sync>,
    worlds: RwLock<BTreeMap<WorldId, Arc<RwLock<WorldSession>>>>,
}

impl SessionManager {
    /// Create a manager that builds worlds from `mesh` and `scenery`.
    pub fn new(config: WorldConfig, mesh: TriangleMesh, scenery: Arc<dyn SceneryProvider + Send + Sync>) -> Self {
        Self {
            config,
            mesh,
            scenery,
            worlds: RwLock::new(BTreeMap::new()),
        }
    }

    /// World configuration.
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Build and register a new world.
    fn insert_world(
        &self,
        worlds: &mut BTreeMap<WorldId, Arc<RwLock<WorldSession>>>,
    ) -> Result<Arc<RwLock<WorldSession>>, SessionError> {
        let state = WorldState::new(self.config, self.mesh.clone(), self.scenery.as_ref())?;
        let id = state.world_id;
        let world = Arc::new(RwLock::new(WorldSession::new(state)));
        worlds.insert(id, world.clone());
        info!(world = %id, "World created");
        Ok(world)
    }

    /// Join the first world with room, creating one if all are full.
    pub async fn join(
        &self,
        name: impl Into<String>,
        sender: mpsc::Sender<ServerMessage>,
        now_ms: u64,
    ) -> Result<JoinedWorld, SessionError> {
        let name = name.into();
        let mut worlds = self.worlds.write().await;

        for world in worlds.values() {
            let mut session = world.write().await;
            if !session.is_full() {
                let player_id = session.join(name, sender, now_ms)?;
                return Ok(JoinedWorld {
                    world: world.clone(),
                    player_id,
                    created: false,
                });
            }
        }

        let world = self.insert_world(&mut worlds)?;
        let player_id = world.write().await.join(name, sender, now_ms)?;
        Ok(JoinedWorld {
            world,
            player_id,
            created: true,
        })
    }

    /// Every world.
    pub async fn worlds(&self) -> Vec<Arc<RwLock<WorldSession>>> {
        let worlds = self.worlds.read().await;
        worlds.values().cloned().collect()
    }

    /// Number of worlds.
    pub async fn world_count(&self) -> usize {
        let worlds = self.worlds.read().await;
        worlds.len()
    }

    /// Send a message to every connection of every world.
    pub async fn broadcast_all(&self, message: ServerMessage) {
        for world in self.worlds().await {
            world.read().await.broadcast(message.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::input::{InputFlags, MoveCommand, ShootCommand};
    use crate::game::scenery::StaticLayout;
    use glam::{Quat, Vec3};

    fn session(max_players: usize) -> WorldSession {
        let config = WorldConfig {
            max_players,
            ..WorldConfig::default()
        };
        let state = WorldState::new(config, TriangleMesh::flat_ground(200.0, 0.0), &StaticLayout::default_arena()).unwrap();
        WorldSession::new(state)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_join_welcomes_and_announces() {
        let mut world = session(4);
        let (tx1, mut rx1) = mpsc::channel(64);
        let (tx2, mut rx2) = mpsc::channel(64);

        let a = world.join("a", tx1, 0).unwrap();
        let first = drain(&mut rx1);
        assert!(matches!(first[0], ServerMessage::Welcome { player_id, tick_rate: 60, .. } if player_id == a));
        assert!(matches!(first[1], ServerMessage::GameState(_)));
        assert_eq!(first.len(), 2);

        let b = world.join("b", tx2, 0).unwrap();
        assert!(matches!(
            drain(&mut rx1).as_slice(),
            [ServerMessage::PlayerJoined { player_id, .. }] if *player_id == b
        ));
        // Joiner does not see its own announcement
        assert!(!drain(&mut rx2)
            .iter()
            .any(|m| matches!(m, ServerMessage::PlayerJoined { .. })));
    }

    #[tokio::test]
    async fn test_world_full() {
        let mut world = session(1);
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);

        world.join("a", tx1, 0).unwrap();
        assert!(matches!(world.join("b", tx2, 0), Err(SessionError::WorldFull)));
        assert_eq!(world.player_count(), 1);
    }

    #[tokio::test]
    async fn test_bad_move_corrects_only_the_mover() {
        let mut world = session(4);
        let (tx1, mut rx1) = mpsc::channel(64);
        let (tx2, mut rx2) = mpsc::channel(64);
        let a = world.join("a", tx1, 0).unwrap();
        world.join("b", tx2, 0).unwrap();
        drain(&mut rx1);
        drain(&mut rx2);

        let start = world.state().get_player(a).unwrap().position;
        let teleport = MoveCommand {
            position: start + Vec3::new(500.0, 0.0, 0.0),
            rotation: Quat::IDENTITY,
            input_sequence_id: 1,
            input_flags: InputFlags::FORWARD,
        };
        world.handle_message(a, ClientMessage::Move(teleport), 100).unwrap();

        assert!(matches!(
            drain(&mut rx1).as_slice(),
            [ServerMessage::PositionCorrection { input_sequence_id: 1, .. }]
        ));
        assert!(drain(&mut rx2).is_empty());
        assert_eq!(world.state().get_player(a).unwrap().position, start);
    }

    #[tokio::test]
    async fn test_shot_broadcast_and_rejection() {
        let mut world = session(4);
        let (tx1, mut rx1) = mpsc::channel(64);
        let (tx2, mut rx2) = mpsc::channel(64);
        let a = world.join("a", tx1, 0).unwrap();
        world.join("b", tx2, 0).unwrap();
        drain(&mut rx1);
        drain(&mut rx2);

        let muzzle = world.state().get_player(a).unwrap().position;
        let shot = ShootCommand {
            weapon_id: "rocket".into(),
            position: muzzle,
            direction: Vec3::X,
        };
        world
            .handle_message(a, ClientMessage::ShootProjectile(shot.clone()), 5_000)
            .unwrap();
        assert!(matches!(drain(&mut rx2).as_slice(), [ServerMessage::ProjectileCreated(_)]));
        assert!(matches!(drain(&mut rx1).as_slice(), [ServerMessage::ProjectileCreated(_)]));

        // Still cooling down
        world
            .handle_message(a, ClientMessage::ShootProjectile(shot), 5_100)
            .unwrap();
        assert!(matches!(drain(&mut rx1).as_slice(), [ServerMessage::ShootError { .. }]));
        assert!(drain(&mut rx2).is_empty());
    }

    #[tokio::test]
    async fn test_ping_and_leave() {
        let mut world = session(4);
        let (tx1, mut rx1) = mpsc::channel(64);
        let (tx2, mut rx2) = mpsc::channel(64);
        let a = world.join("a", tx1, 0).unwrap();
        let b = world.join("b", tx2, 0).unwrap();
        drain(&mut rx1);
        drain(&mut rx2);

        world.handle_message(b, ClientMessage::Ping { timestamp: 7 }, 42).unwrap();
        assert!(matches!(
            drain(&mut rx2).as_slice(),
            [ServerMessage::Pong { timestamp: 7, server_time: 42 }]
        ));

        world.handle_message(b, ClientMessage::Leave, 50).unwrap();
        assert!(matches!(
            drain(&mut rx1).as_slice(),
            [ServerMessage::PlayerLeft { player_id, reason: LeaveReason::Disconnected }] if *player_id == b
        ));
        assert!(!world.contains(b));
        assert!(world.contains(a));
        assert!(matches!(
            world.handle_message(b, ClientMessage::Leave, 60),
            Err(SessionError::PlayerNotFound)
        ));
    }

    #[tokio::test]
    async fn test_tick_broadcasts_and_evicts() {
        let mut world = session(4);
        let (tx1, mut rx1) = mpsc::channel(64);
        let a = world.join("a", tx1, 0).unwrap();
        drain(&mut rx1);

        world.run_tick(16);
        assert!(matches!(drain(&mut rx1).as_slice(), [ServerMessage::GameState(_)]));

        let result = world.run_tick(40_000);
        assert_eq!(result.evicted, vec![a]);
        assert!(!world.contains(a));

        // Channel is closed once the pending messages are read
        assert!(matches!(rx1.recv().await, Some(ServerMessage::PlayerLeft { .. })));
        assert!(matches!(rx1.recv().await, Some(ServerMessage::GameState(_))));
        assert!(rx1.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_manager_fills_worlds_in_order() {
        let config = WorldConfig {
            max_players: 2,
            ..WorldConfig::default()
        };
        let manager = SessionManager::new(
            config,
            TriangleMesh::flat_ground(200.0, 0.0),
            Arc::new(StaticLayout::default_arena()),
        );

        let mut receivers = Vec::new();
        let mut joined = Vec::new();
        for name in ["a", "b", "c"] {
            let (tx, rx) = mpsc::channel(64);
            receivers.push(rx);
            joined.push(manager.join(name, tx, 0).await.unwrap());
        }

        assert!(joined[0].created);
        assert!(!joined[1].created);
        assert!(joined[2].created);
        assert_eq!(manager.world_count().await, 2);

        let first = joined[0].world.read().await.id();
        assert_eq!(joined[1].world.read().await.id(), first);
        assert_ne!(joined[2].world.read().await.id(), first);
    }
}
