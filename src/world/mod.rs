//! Capability interface consumed from the host game.
//!
//! The orchestration pipeline never owns units. It reads and commands them
//! through the [`Unit`] and [`World`] traits; a game integration implements
//! both over its own entity storage. [`sandbox`] provides an in-memory
//! implementation for tests and the CLI simulator.

pub mod sandbox;
pub mod snapshot;

pub use sandbox::{CapabilityCall, Sandbox, SandboxUnit};
pub use snapshot::{UnitSnapshot, WorldSnapshot};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::schema::Archetype;

/// Distance a unit retreats from its nearest enemy when no point is given.
pub const DEFAULT_RETREAT_DISTANCE: f64 = 20.0;

/// Identifier of a controllable unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Team a unit fights for. Units on different teams are hostile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(pub u8);

/// Planar world position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// East-west coordinate.
    pub x: f64,
    /// North-south coordinate.
    pub y: f64,
}

impl Position {
    /// Construct a position.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1})", self.x, self.y)
    }
}

/// Failure reported by a capability call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CapabilityError {
    /// The unit was destroyed before or during the call.
    #[error("unit {0} is destroyed")]
    UnitDestroyed(UnitId),

    /// Attack or follow target is missing, dead, or not a valid target.
    #[error("invalid target {0}")]
    InvalidTarget(UnitId),

    /// The unit has no ability with this name.
    #[error("unknown ability: {0}")]
    UnknownAbility(String),

    /// The unit does not support this stance.
    #[error("unknown stance: {0}")]
    UnknownStance(String),

    /// Action parameters could not be interpreted.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// The unit refused the command for a host-specific reason.
    #[error("command rejected: {0}")]
    Rejected(String),
}

/// Result of a capability call.
pub type CapabilityResult = Result<(), CapabilityError>;

/// Capabilities and observations exposed by one controllable unit.
pub trait Unit {
    /// Stable identifier.
    fn id(&self) -> UnitId;
    /// Archetype, which decides the actions the unit may take.
    fn archetype(&self) -> Archetype;
    /// Team membership.
    fn team(&self) -> TeamId;

    /// Move to `position`.
    fn move_to(&mut self, position: Position) -> CapabilityResult;
    /// Engage `target`.
    fn attack_target(&mut self, target: UnitId) -> CapabilityResult;
    /// Activate the named ability.
    fn use_ability(&mut self, name: &str) -> CapabilityResult;
    /// Loop through `waypoints`.
    fn patrol(&mut self, waypoints: &[Position]) -> CapabilityResult;
    /// Disengage and fall back to `position`.
    fn retreat(&mut self, position: Position) -> CapabilityResult;
    /// Switch behaviour stance.
    fn set_stance(&mut self, stance: &str) -> CapabilityResult;

    /// Remaining health as a percentage in `[0, 100]`.
    fn health_percentage(&self) -> f64;
    /// Current position.
    fn position(&self) -> Position;
    /// Whether the unit has been destroyed.
    fn is_dead(&self) -> bool;
}

/// Read/write access to the units of a running game.
pub trait World {
    /// Concrete unit type.
    type Unit: Unit;

    /// Look up a unit.
    fn unit(&self, id: UnitId) -> Option<&Self::Unit>;
    /// Look up a unit for commanding.
    fn unit_mut(&mut self, id: UnitId) -> Option<&mut Self::Unit>;
    /// Identifiers of every unit currently in the world, dead or alive.
    fn unit_ids(&self) -> Vec<UnitId>;

    /// Living units hostile to `id`, paired with their distance to it.
    fn hostiles_of(&self, id: UnitId) -> Vec<(UnitId, f64)> {
        self.others_of(id, |mine, theirs| mine != theirs)
    }

    /// Living units friendly to `id` (excluding itself), with distances.
    fn allies_of(&self, id: UnitId) -> Vec<(UnitId, f64)> {
        self.others_of(id, |mine, theirs| mine == theirs)
    }

    /// Where `id` falls back to when a retreat names no position: directly
    /// away from the nearest hostile, or in place when none is visible.
    fn retreat_point(&self, id: UnitId) -> Option<Position> {
        let unit = self.unit(id)?;
        let here = unit.position();
        let nearest = self
            .hostiles_of(id)
            .into_iter()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .and_then(|(enemy, _)| self.unit(enemy).map(Unit::position));

        let Some(threat) = nearest else {
            return Some(here);
        };
        let (dx, dy) = (here.x - threat.x, here.y - threat.y);
        let len = (dx * dx + dy * dy).sqrt();
        if len < f64::EPSILON {
            return Some(Position::new(here.x + DEFAULT_RETREAT_DISTANCE, here.y));
        }
        Some(Position::new(
            here.x + dx / len * DEFAULT_RETREAT_DISTANCE,
            here.y + dy / len * DEFAULT_RETREAT_DISTANCE,
        ))
    }

    #[doc(hidden)]
    fn others_of(&self, id: UnitId, keep: fn(TeamId, TeamId) -> bool) -> Vec<(UnitId, f64)> {
        let Some(me) = self.unit(id) else {
            return Vec::new();
        };
        let (team, here) = (me.team(), me.position());
        self.unit_ids()
            .into_iter()
            .filter(|other| *other != id)
            .filter_map(|other| self.unit(other))
            .filter(|other| !other.is_dead() && keep(team, other.team()))
            .map(|other| (other.id(), here.distance(&other.position())))
            .collect()
    }
}
