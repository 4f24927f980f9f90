//! In-memory world used by tests and the CLI simulator.
//!
//! Capability calls take effect immediately (moves teleport, heals apply at
//! once) and every call is recorded so callers can assert on exactly what the
//! pipeline issued.

use std::collections::BTreeMap;

use super::{CapabilityError, CapabilityResult, Position, TeamId, Unit, UnitId, World};
use crate::schema::Archetype;

/// Health restored by the `heal` and `repair` abilities.
const RESTORE_AMOUNT: f64 = 25.0;

const STANCES: &[&str] = &["aggressive", "defensive", "hold_fire", "hold"];

/// One capability call recorded by a [`SandboxUnit`].
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityCall {
    /// `move_to`
    MoveTo(Position),
    /// `attack_target`
    Attack(UnitId),
    /// `use_ability`
    UseAbility(String),
    /// `patrol`
    Patrol(Vec<Position>),
    /// `retreat`
    Retreat(Position),
    /// `set_stance`
    SetStance(String),
}

/// Simple unit with health, position and a call log.
#[derive(Debug, Clone)]
pub struct SandboxUnit {
    id: UnitId,
    archetype: Archetype,
    team: TeamId,
    health: f64,
    position: Position,
    dead: bool,
    stance: String,
    calls: Vec<CapabilityCall>,
    fail_next: Option<CapabilityError>,
}

impl SandboxUnit {
    /// Full-health unit at `position`.
    pub fn new(id: UnitId, archetype: Archetype, team: TeamId, position: Position) -> Self {
        Self {
            id,
            archetype,
            team,
            health: 100.0,
            position,
            dead: false,
            stance: "defensive".to_string(),
            calls: Vec::new(),
            fail_next: None,
        }
    }

    /// Builder-style health override.
    pub fn with_health(mut self, health: f64) -> Self {
        self.health = health.clamp(0.0, 100.0);
        self
    }

    /// Capability calls received so far, oldest first.
    pub fn calls(&self) -> &[CapabilityCall] {
        &self.calls
    }

    /// Current stance.
    pub fn stance(&self) -> &str {
        &self.stance
    }

    /// Make the next capability call fail with `error`.
    pub fn fail_next(&mut self, error: CapabilityError) {
        self.fail_next = Some(error);
    }

    fn abilities(&self) -> &'static [&'static str] {
        match self.archetype {
            Archetype::Scout => &["stealth", "sprint"],
            Archetype::Tank => &["activate_shield", "taunt"],
            Archetype::Sniper => &["overwatch", "focus"],
            Archetype::Medic => &["heal", "revive"],
            Archetype::Engineer => &["repair", "scan"],
        }
    }

    fn record(&mut self, call: CapabilityCall) -> CapabilityResult {
        if self.dead {
            return Err(CapabilityError::UnitDestroyed(self.id));
        }
        if let Some(error) = self.fail_next.take() {
            return Err(error);
        }
        self.calls.push(call);
        Ok(())
    }
}

impl Unit for SandboxUnit {
    fn id(&self) -> UnitId {
        self.id
    }

    fn archetype(&self) -> Archetype {
        self.archetype
    }

    fn team(&self) -> TeamId {
        self.team
    }

    fn move_to(&mut self, position: Position) -> CapabilityResult {
        self.record(CapabilityCall::MoveTo(position))?;
        self.position = position;
        Ok(())
    }

    fn attack_target(&mut self, target: UnitId) -> CapabilityResult {
        self.record(CapabilityCall::Attack(target))
    }

    fn use_ability(&mut self, name: &str) -> CapabilityResult {
        if !self.abilities().contains(&name) {
            return Err(CapabilityError::UnknownAbility(name.to_string()));
        }
        self.record(CapabilityCall::UseAbility(name.to_string()))?;
        if matches!(name, "heal" | "repair") {
            self.health = (self.health + RESTORE_AMOUNT).min(100.0);
        }
        Ok(())
    }

    fn patrol(&mut self, waypoints: &[Position]) -> CapabilityResult {
        if waypoints.is_empty() {
            return Err(CapabilityError::InvalidParams("patrol needs waypoints".into()));
        }
        self.record(CapabilityCall::Patrol(waypoints.to_vec()))
    }

    fn retreat(&mut self, position: Position) -> CapabilityResult {
        self.record(CapabilityCall::Retreat(position))?;
        self.position = position;
        Ok(())
    }

    fn set_stance(&mut self, stance: &str) -> CapabilityResult {
        if !STANCES.contains(&stance) {
            return Err(CapabilityError::UnknownStance(stance.to_string()));
        }
        self.record(CapabilityCall::SetStance(stance.to_string()))?;
        self.stance = stance.to_string();
        Ok(())
    }

    fn health_percentage(&self) -> f64 {
        self.health
    }

    fn position(&self) -> Position {
        self.position
    }

    fn is_dead(&self) -> bool {
        self.dead
    }
}

/// World of [`SandboxUnit`]s keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    units: BTreeMap<UnitId, SandboxUnit>,
}

impl Sandbox {
    /// Empty world.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a unit.
    pub fn spawn(&mut self, unit: SandboxUnit) {
        self.units.insert(unit.id, unit);
    }

    /// Mark a unit destroyed.
    pub fn kill(&mut self, id: UnitId) {
        if let Some(unit) = self.units.get_mut(&id) {
            unit.dead = true;
            unit.health = 0.0;
        }
    }

    /// Overwrite a unit's health.
    pub fn set_health(&mut self, id: UnitId, health: f64) {
        if let Some(unit) = self.units.get_mut(&id) {
            unit.health = health.clamp(0.0, 100.0);
        }
    }

    /// Teleport a unit.
    pub fn set_position(&mut self, id: UnitId, position: Position) {
        if let Some(unit) = self.units.get_mut(&id) {
            unit.position = position;
        }
    }

    /// Calls recorded for `id`; empty for unknown units.
    pub fn calls(&self, id: UnitId) -> &[CapabilityCall] {
        self.units.get(&id).map(SandboxUnit::calls).unwrap_or(&[])
    }

    /// Iterate over all units.
    pub fn units(&self) -> impl Iterator<Item = &SandboxUnit> {
        self.units.values()
    }

    /// A small two-team skirmish used by the CLI simulator.
    pub fn skirmish() -> Self {
        let mut world = Self::new();
        let friendly = [
            (1, Archetype::Scout, 0.0, 0.0),
            (2, Archetype::Tank, 2.0, 0.0),
            (3, Archetype::Medic, 0.0, 2.0),
            (4, Archetype::Sniper, -4.0, 0.0),
            (5, Archetype::Engineer, 0.0, -3.0),
        ];
        for (id, archetype, x, y) in friendly {
            world.spawn(SandboxUnit::new(UnitId(id), archetype, TeamId(0), Position::new(x, y)));
        }
        let hostile = [(101, Archetype::Tank, 25.0, 5.0), (102, Archetype::Scout, 30.0, -5.0)];
        for (id, archetype, x, y) in hostile {
            world.spawn(SandboxUnit::new(UnitId(id), archetype, TeamId(1), Position::new(x, y)));
        }
        world
    }
}

impl World for Sandbox {
    type Unit = SandboxUnit;

    fn unit(&self, id: UnitId) -> Option<&SandboxUnit> {
        self.units.get(&id)
    }

    fn unit_mut(&mut self, id: UnitId) -> Option<&mut SandboxUnit> {
        self.units.get_mut(&id)
    }

    fn unit_ids(&self) -> Vec<UnitId> {
        self.units.keys().copied().collect()
    }
}
