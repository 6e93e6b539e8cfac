//! Game Logic Module
//!
//! Everything that runs inside a world's tick. No sockets, no clock: callers
//! pass the current time in milliseconds.
//!
//! ## Module Structure
//!
//! - `grid`: Uniform XZ grid over scenery bounds
//! - `collision`: Scenery registry, overlap and ray queries, movement slide
//! - `ground`: Triangle mesh ground snapping and wall checks
//! - `weapon`: Ballistics table and the cooldown/ammo gate
//! - `projectile`: Projectile flight and swept hit detection
//! - `state`: World and player state
//! - `input`: Move and shoot command validation
//! - `combat`: Damage, kills and respawns
//! - `pickup`: Health packs
//! - `scenery`: Static layout loading
//! - `events`: Events for clients
//! - `tick`: Authoritative simulation loop

pub mod collision;
pub mod combat;
pub mod events;
pub mod grid;
pub mod ground;
pub mod input;
pub mod pickup;
pub mod projectile;
pub mod scenery;
pub mod state;
pub mod tick;
pub mod weapon;

// Re-export key types
pub use collision::{Collider, ColliderId, ColliderKind, CollisionEngine};
pub use events::{GameEvent, GameEventData, Recipient, WorldSnapshot};
pub use ground::{GroundResolver, TriangleMesh};
pub use input::{MoveCommand, MoveValidator, ShootCommand};
pub use projectile::{ProjectileId, ProjectileSystem};
pub use scenery::{SceneryProvider, StaticLayout};
pub use state::{PlayerId, PlayerState, WorldState};
pub use tick::{tick, TickResult, WorldConfig};
pub use weapon::{ShootError, WeaponAuthority, WeaponType};
