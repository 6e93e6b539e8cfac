//! Weapons
//!
//! Ballistic parameters per weapon type and the cooldown/ammo gate that every
//! shot passes through before a projectile is spawned.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::game::state::PlayerId;

// =============================================================================
// WEAPON TYPES
// =============================================================================

/// Closed set of projectile weapon types.
///
/// `Default` is the explicit fallback for names this server does not know.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WeaponType {
    /// Fallback ballistics.
    #[default]
    Default,
    /// Heavy slug, no falloff.
    Cannon,
    /// Fast, light rounds.
    MachineGun,
    /// Slow, heavy projectile.
    Rocket,
    /// Mid-speed energy bolt.
    Plasma,
}

impl WeaponType {
    /// Every weapon type.
    pub const ALL: [WeaponType; 5] = [
        WeaponType::Default,
        WeaponType::Cannon,
        WeaponType::MachineGun,
        WeaponType::Rocket,
        WeaponType::Plasma,
    ];

    /// Ballistic parameters.
    pub const fn ballistics(self) -> Ballistics {
        match self {
            WeaponType::Default => Ballistics {
                speed: 200.0,
                radius: 0.2,
                max_range: 300.0,
                lifetime_ms: 3_000,
                damage: 10,
                falloff: DamageFalloff::new(40.0, 80.0, 5),
            },
            WeaponType::Cannon => Ballistics {
                speed: 300.0,
                radius: 0.15,
                max_range: 500.0,
                lifetime_ms: 3_000,
                damage: 20,
                falloff: DamageFalloff::new(50.0, 100.0, 20),
            },
            WeaponType::MachineGun => Ballistics {
                speed: 400.0,
                radius: 0.1,
                max_range: 300.0,
                lifetime_ms: 1_500,
                damage: 8,
                falloff: DamageFalloff::new(30.0, 80.0, 3),
            },
            WeaponType::Rocket => Ballistics {
                speed: 120.0,
                radius: 0.4,
                max_range: 400.0,
                lifetime_ms: 5_000,
                damage: 45,
                falloff: DamageFalloff::new(60.0, 120.0, 25),
            },
            WeaponType::Plasma => Ballistics {
                speed: 250.0,
                radius: 0.3,
                max_range: 350.0,
                lifetime_ms: 2_500,
                damage: 15,
                falloff: DamageFalloff::new(40.0, 90.0, 8),
            },
        }
    }

    /// Wire name.
    pub const fn name(self) -> &'static str {
        match self {
            WeaponType::Default => "default",
            WeaponType::Cannon => "cannon",
            WeaponType::MachineGun => "machineGun",
            WeaponType::Rocket => "rocket",
            WeaponType::Plasma => "plasma",
        }
    }

    /// Look up by wire name, falling back to [`WeaponType::Default`].
    pub fn from_name(name: &str) -> WeaponType {
        WeaponType::ALL
            .into_iter()
            .find(|w| w.name() == name)
            .unwrap_or_else(|| {
                debug!(name, "Unknown weapon type, using default ballistics");
                WeaponType::Default
            })
    }
}

impl fmt::Display for WeaponType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Linear damage falloff between two distances.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DamageFalloff {
    /// Full damage up to here.
    pub start: f32,
    /// Minimum damage from here on.
    pub end: f32,
    /// Damage floor.
    pub min_damage: i32,
}

impl DamageFalloff {
    /// Create a falloff curve.
    pub const fn new(start: f32, end: f32, min_damage: i32) -> Self {
        Self {
            start,
            end,
            min_damage,
        }
    }

    /// Damage dealt at `distance` for a weapon with `base` damage.
    ///
    /// Never increases with distance. The floor is capped at `base`.
    pub fn damage_at(&self, base: i32, distance: f32) -> i32 {
        let floor = self.min_damage.min(base);
        if distance.is_nan() || distance <= self.start {
            return base;
        }
        if distance >= self.end || self.end <= self.start {
            return floor;
        }

        let t = (distance - self.start) / (self.end - self.start);
        let damage = base as f32 + (floor - base) as f32 * t;
        (damage.round() as i32).clamp(floor, base)
    }
}

/// Everything a projectile needs to know about its weapon.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ballistics {
    /// Units per second.
    pub speed: f32,
    /// Projectile hit radius.
    pub radius: f32,
    /// Maximum travel distance.
    pub max_range: f32,
    /// Maximum age.
    pub lifetime_ms: u64,
    /// Base damage.
    pub damage: i32,
    /// Distance falloff.
    pub falloff: DamageFalloff,
}

impl Ballistics {
    /// Damage at a given travel distance.
    pub fn damage_at(&self, distance: f32) -> i32 {
        self.falloff.damage_at(self.damage, distance)
    }
}

// =============================================================================
// SHOT GATE
// =============================================================================

/// Reasons a shot is refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShootError {
    /// Weapon id not in the shooter's loadout.
    #[error("unknown weapon '{0}'")]
    UnknownWeapon(String),

    /// Shooter is not in the world.
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    /// Fired again before the cooldown elapsed.
    #[error("weapon on cooldown for {remaining_ms}ms")]
    OnCooldown {
        /// Time left.
        remaining_ms: u64,
    },

    /// Magazine empty.
    #[error("out of ammo")]
    OutOfAmmo,

    /// Dead players cannot shoot.
    #[error("shooter is dead")]
    ShooterDead,

    /// Claimed muzzle position is too far from the shooter.
    #[error("shot origin {distance:.2} units from shooter")]
    InvalidOrigin {
        /// Distance between claimed origin and player.
        distance: f32,
    },

    /// Direction is zero or not finite.
    #[error("invalid shot direction")]
    InvalidDirection,
}

impl ShootError {
    /// Short code sent to the client.
    pub fn code(&self) -> &'static str {
        match self {
            ShootError::UnknownWeapon(_) => "unknownWeapon",
            ShootError::UnknownPlayer(_) => "unknownPlayer",
            ShootError::OnCooldown { .. } => "cooldown",
            ShootError::OutOfAmmo => "noAmmo",
            ShootError::ShooterDead => "dead",
            ShootError::InvalidOrigin { .. } => "invalidOrigin",
            ShootError::InvalidDirection => "invalidDirection",
        }
    }

    /// Whether the client is told about the refusal.
    ///
    /// Unknown ids are logged and dropped; policy failures are answered.
    pub fn is_reported(&self) -> bool {
        !matches!(self, ShootError::UnknownWeapon(_) | ShootError::UnknownPlayer(_))
    }
}

/// Ownership, cooldown and ammo authority consulted before each shot.
pub trait WeaponAuthority: fmt::Debug + Send + Sync {
    /// Give a newly joined player their loadout.
    fn equip(&mut self, player: PlayerId);

    /// Refill after respawn.
    fn restock(&mut self, player: PlayerId);

    /// Drop a departed player's loadout.
    fn forget(&mut self, player: PlayerId);

    /// Check and consume one shot. Returns the weapon's ballistic type.
    fn authorize_shot(
        &mut self,
        player: PlayerId,
        weapon_id: &str,
        now_ms: u64,
    ) -> Result<WeaponType, ShootError>;
}

/// One weapon in a loadout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeaponSlot {
    /// Ballistics type.
    pub weapon: WeaponType,
    /// Minimum time between shots.
    pub cooldown_ms: u64,
    /// Magazine size; `None` for unlimited.
    pub capacity: Option<u32>,
    /// Rounds left (ignored when unlimited).
    pub ammo: u32,
    /// Time of the last accepted shot.
    pub last_fired_ms: Option<u64>,
}

impl WeaponSlot {
    /// New full slot.
    pub fn new(weapon: WeaponType, cooldown_ms: u64, capacity: Option<u32>) -> Self {
        Self {
            weapon,
            cooldown_ms,
            capacity,
            ammo: capacity.unwrap_or(0),
            last_fired_ms: None,
        }
    }

    fn refill(&mut self) {
        self.ammo = self.capacity.unwrap_or(0);
        self.last_fired_ms = None;
    }
}

/// Default per-player loadout keyed by weapon id.
pub fn default_loadout() -> BTreeMap<String, WeaponSlot> {
    BTreeMap::from([
        (
            "cannon".to_string(),
            WeaponSlot::new(WeaponType::Cannon, 500, None),
        ),
        (
            "machineGun".to_string(),
            WeaponSlot::new(WeaponType::MachineGun, 100, Some(200)),
        ),
        (
            "rocket".to_string(),
            WeaponSlot::new(WeaponType::Rocket, 1_500, Some(10)),
        ),
    ])
}

/// In-memory weapon authority with a fixed loadout for every player.
#[derive(Clone, Debug, Default)]
pub struct Armory {
    loadouts: BTreeMap<PlayerId, BTreeMap<String, WeaponSlot>>,
}

impl Armory {
    /// Empty armory.
    pub fn new() -> Self {
        Self::default()
    }

    /// A player's slot, if equipped.
    pub fn slot(&self, player: PlayerId, weapon_id: &str) -> Option<&WeaponSlot> {
        self.loadouts.get(&player)?.get(weapon_id)
    }
}

impl WeaponAuthority for Armory {
    fn equip(&mut self, player: PlayerId) {
        self.loadouts.insert(player, default_loadout());
    }

    fn restock(&mut self, player: PlayerId) {
        if let Some(loadout) = self.loadouts.get_mut(&player) {
            loadout.values_mut().for_each(WeaponSlot::refill);
        }
    }

    fn forget(&mut self, player: PlayerId) {
        self.loadouts.remove(&player);
    }

    fn authorize_shot(
        &mut self,
        player: PlayerId,
        weapon_id: &str,
        now_ms: u64,
    ) -> Result<WeaponType, ShootError> {
        let slot = self
            .loadouts
            .get_mut(&player)
            .ok_or(ShootError::UnknownPlayer(player))?
            .get_mut(weapon_id)
            .ok_or_else(|| ShootError::UnknownWeapon(weapon_id.to_string()))?;

        if let Some(last) = slot.last_fired_ms {
            let elapsed = now_ms.saturating_sub(last);
            if elapsed < slot.cooldown_ms {
                return Err(ShootError::OnCooldown {
                    remaining_ms: slot.cooldown_ms - elapsed,
                });
            }
        }

        if slot.capacity.is_some() {
            if slot.ammo == 0 {
                return Err(ShootError::OutOfAmmo);
            }
            slot.ammo -= 1;
        }

        slot.last_fired_ms = Some(now_ms);
        Ok(slot.weapon)
    }
}
