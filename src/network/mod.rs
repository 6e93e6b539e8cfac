//! Network Layer
//!
//! WebSocket transport, the JSON wire contract, and the sessions that feed
//! client messages into worlds and tick events back out. All game logic runs
//! through `game/`.

pub mod prediction;
pub mod protocol;
pub mod server;
pub mod session;

pub use prediction::PredictionBuffer;
pub use protocol::{ClientMessage, OutboundFrame, ProtocolError, ServerMessage};
pub use server::{GameServer, GameServerError, ServerConfig};
pub use session::{SessionError, SessionManager, WorldId, WorldSession};
