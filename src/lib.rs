//! # Arena Game Server
//!
//! Authoritative simulation for a real-time multiplayer arena shooter.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ARENA SERVER                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Geometry                                 │
//! │  └── primitives.rs - AABB, sphere, cylinder, cuboid, rays    │
//! │                                                              │
//! │  game/            - Simulation (no I/O, no clock)            │
//! │  ├── grid.rs      - Uniform XZ spatial grid                  │
//! │  ├── collision.rs - Scenery queries and movement slide       │
//! │  ├── ground.rs    - Mesh ground snapping and wall checks     │
//! │  ├── weapon.rs    - Ballistics and cooldown/ammo gate        │
//! │  ├── projectile.rs- Swept projectile hit detection           │
//! │  ├── state.rs     - World and player state                   │
//! │  ├── input.rs     - Move and shoot validation                │
//! │  ├── combat.rs    - Damage, kills, respawns                  │
//! │  ├── pickup.rs    - Health packs                             │
//! │  ├── scenery.rs   - Static layout                            │
//! │  ├── events.rs    - Client-facing events                     │
//! │  └── tick.rs      - Authoritative simulation loop            │
//! │                                                              │
//! │  network/         - Networking                               │
//! │  ├── server.rs    - WebSocket server and world loops         │
//! │  ├── protocol.rs  - Message types                            │
//! │  ├── session.rs   - World sessions and routing               │
//! │  └── prediction.rs- Client prediction buffer                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Single Writer
//!
//! Each world is mutated only while its session lock is held: client
//! messages and ticks are serialized, so a snapshot never observes a
//! half-applied update. The simulation takes the current time as an
//! argument, which keeps every `game/` test deterministic.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::primitives::{Aabb, Shape};
pub use game::collision::CollisionEngine;
pub use game::state::{PlayerId, PlayerState, WorldState};
pub use game::tick::{tick, TickResult, WorldConfig};
pub use network::server::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default simulation tick rate (Hz)
pub const TICK_RATE: u32 = 60;
