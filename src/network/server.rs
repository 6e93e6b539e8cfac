//! WebSocket Game Server
//!
//! Async WebSocket server for multiplayer connections. Each connection joins
//! a world through the [`SessionManager`]; each world runs its own fixed-rate
//! tick task.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::game::events::LeaveReason;
use crate::game::ground::TriangleMesh;
use crate::game::scenery::SceneryProvider;
use crate::game::state::PlayerId;
use crate::game::tick::WorldConfig;
use crate::network::protocol::{ClientMessage, OutboundFrame, ServerMessage};
use crate::network::session::{SessionError, SessionManager, WorldId, WorldSession};

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Per-world tuning.
    pub world: WorldConfig,
    /// Ground mesh JSON; flat ground when unset.
    pub mesh_path: Option<PathBuf>,
    /// Scenery layout JSON; built-in arena when unset.
    pub scenery_path: Option<PathBuf>,
    /// Outbound queue length per connection.
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            world: WorldConfig::default(),
            mesh_path: None,
            scenery_path: None,
            outbound_queue: 256,
        }
    }
}

impl ServerConfig {
    /// Read `ARENA_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, GameServerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, GameServerError> {
        let mut config = Self::default();

        if let Some(addr) = parse_var::<SocketAddr>(&lookup, "ARENA_BIND_ADDR")? {
            config.bind_addr = addr;
        }
        if let Some(rate) = parse_var::<u32>(&lookup, "ARENA_TICK_RATE")? {
            if rate == 0 {
                return Err(GameServerError::InvalidConfig {
                    var: "ARENA_TICK_RATE",
                    value: rate.to_string(),
                });
            }
            config.world.tick_rate = rate;
        }
        if let Some(max) = parse_var::<usize>(&lookup, "ARENA_MAX_PLAYERS")? {
            config.world.max_players = max;
        }
        if let Some(timeout) = parse_var::<u64>(&lookup, "ARENA_INACTIVITY_TIMEOUT_MS")? {
            config.world.inactivity_timeout_ms = timeout;
        }
        config.mesh_path = lookup("ARENA_MESH_PATH").map(PathBuf::from);
        config.scenery_path = lookup("ARENA_SCENERY_PATH").map(PathBuf::from);

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, GameServerError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| GameServerError::InvalidConfig { var, value }),
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Bad environment variable.
    #[error("Invalid value for {var}: {value:?}")]
    InvalidConfig {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Connected client state.
struct ConnectedClient {
    /// Player in a world, once joined.
    player_id: Option<PlayerId>,
    /// World joined.
    world_id: Option<WorldId>,
    /// Connection time.
    connected_at: Instant,
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// World registry.
    sessions: Arc<SessionManager>,
    /// Connected clients.
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server whose worlds are built from `mesh` and `scenery`.
    pub fn new(config: ServerConfig, mesh: TriangleMesh, scenery: Arc<dyn SceneryProvider + Send + Sync>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            sessions: Arc::new(SessionManager::new(config.world, mesh, scenery)),
            config,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind and serve until [`GameServer::shutdown`].
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Game server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.sessions
            .broadcast_all(ServerMessage::Shutdown {
                reason: "Server shutting down".to_string(),
            })
            .await;

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let sessions = self.sessions.clone();
        let queue_len = self.config.outbound_queue;
        let shutdown_tx = self.shutdown_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(queue_len);
            let binary_snapshots = Arc::new(AtomicBool::new(false));
            let writer_binary = binary_snapshots.clone();

            // Register client
            {
                let mut clients = clients.write().await;
                clients.insert(
                    addr,
                    ConnectedClient {
                        player_id: None,
                        world_id: None,
                        connected_at: Instant::now(),
                    },
                );
            }

            // Spawn message sender task; it ends when every sender is gone
            let mut sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let frame = match msg.encode(writer_binary.load(Ordering::Relaxed)) {
                        Ok(OutboundFrame::Text(text)) => Message::Text(text),
                        Ok(OutboundFrame::Binary(bytes)) => Message::Binary(bytes),
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(frame).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            // Held only until the connection joins a world
            let mut lobby_tx = Some(msg_tx);
            let mut joined: Option<(Arc<RwLock<WorldSession>>, PlayerId)> = None;

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        let decoded = match msg {
                            Some(Ok(Message::Text(text))) => ClientMessage::from_json(&text),
                            Some(Ok(Message::Binary(bytes))) => ClientMessage::from_binary(&bytes),
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => continue,
                        };
                        let client_msg = match decoded {
                            Ok(m) => m,
                            Err(e) => {
                                warn!("Dropping malformed message from {}: {}", addr, e);
                                continue;
                            }
                        };

                        let keep_open = match joined.clone() {
                            Some((world, player_id)) => {
                                let result = world
                                    .write()
                                    .await
                                    .handle_message(player_id, client_msg, now_ms());
                                !matches!(result, Err(SessionError::PlayerNotFound))
                            }
                            None => {
                                Self::handle_lobby_message(
                                    addr,
                                    client_msg,
                                    &clients,
                                    &sessions,
                                    &shutdown_tx,
                                    &binary_snapshots,
                                    &mut lobby_tx,
                                    &mut joined,
                                )
                                .await
                            }
                        };
                        if !keep_open {
                            break;
                        }
                    }
                    _ = &mut sender_task => {
                        debug!("Outbound channel for {} closed", addr);
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            // Cleanup
            if let Some((world, player_id)) = joined {
                world.write().await.leave(player_id, LeaveReason::Disconnected);
            }
            drop(lobby_tx);

            {
                let mut clients = clients.write().await;
                if let Some(client) = clients.remove(&addr) {
                    info!(
                        "Client {} (player {:?}, world {:?}) cleaned up after {:?}",
                        addr,
                        client.player_id,
                        client.world_id,
                        client.connected_at.elapsed()
                    );
                }
            }
        });
    }

    /// Handle a message from a connection that has not joined yet.
    ///
    /// Returns false when the connection should close.
    async fn handle_lobby_message(
        addr: SocketAddr,
        msg: ClientMessage,
        clients: &Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
        sessions: &Arc<SessionManager>,
        shutdown_tx: &broadcast::Sender<()>,
        binary_snapshots: &AtomicBool,
        lobby_tx: &mut Option<mpsc::Sender<ServerMessage>>,
        joined: &mut Option<(Arc<RwLock<WorldSession>>, PlayerId)>,
    ) -> bool {
        let Some(tx) = lobby_tx.take() else {
            return false;
        };

        match msg {
            ClientMessage::Join {
                name,
                binary_snapshots: binary,
            } => {
                // Set before the world queues the first snapshot
                binary_snapshots.store(binary, Ordering::Relaxed);

                match sessions.join(name, tx.clone(), now_ms()).await {
                    Ok(world) => {
                        let world_id = world.world.read().await.id();
                        if world.created {
                            let config = *sessions.config();
                            let loop_world = world.world.clone();
                            let shutdown_rx = shutdown_tx.subscribe();
                            tokio::spawn(async move {
                                Self::run_world_loop(loop_world, config, shutdown_rx).await;
                            });
                        }

                        if let Some(client) = clients.write().await.get_mut(&addr) {
                            client.player_id = Some(world.player_id);
                            client.world_id = Some(world_id);
                        }
                        *joined = Some((world.world, world.player_id));
                        // The world now owns the only sender
                        return true;
                    }
                    Err(e) => {
                        warn!("Join from {} refused: {}", addr, e);
                        let _ = tx.try_send(ServerMessage::Error {
                            code: e.code().to_string(),
                            message: e.to_string(),
                        });
                    }
                }
            }
            ClientMessage::Ping { timestamp } => {
                let _ = tx.try_send(ServerMessage::Pong {
                    timestamp,
                    server_time: now_ms(),
                });
            }
            ClientMessage::Leave => return false,
            other => {
                debug!("Ignoring {:?} from {} before join", other, addr);
            }
        }

        *lobby_tx = Some(tx);
        true
    }

    /// Drive one world at its tick rate until shutdown.
    async fn run_world_loop(
        world: Arc<RwLock<WorldSession>>,
        config: WorldConfig,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let world_id = world.read().await.id();
        let mut tick_interval = interval(config.tick_interval());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(world = %world_id, tick_rate = config.tick_rate, "World loop started");

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    let result = world.write().await.run_tick(now_ms());
                    for player_id in &result.evicted {
                        info!(world = %world_id, player = %player_id, "Evicted for inactivity");
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }

        info!(world = %world_id, "World loop stopped");
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get world count.
    pub async fn world_count(&self) -> usize {
        self.sessions.world_count().await
    }
}
