//! Point-in-time world summaries sent to the external generator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Position, TeamId, Unit, UnitId, World};
use crate::schema::Archetype;

/// Observable state of one unit at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    /// Unit identifier.
    pub id: UnitId,
    /// Unit archetype.
    pub archetype: Archetype,
    /// Team membership.
    pub team: TeamId,
    /// Health percentage.
    pub health_pct: f64,
    /// Position at capture time.
    pub position: Position,
    /// Whether the unit was addressed by the command.
    pub selected: bool,
}

/// World state captured when a command is submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Wall-clock capture time.
    pub captured_at: DateTime<Utc>,
    /// Every living unit.
    pub units: Vec<UnitSnapshot>,
}

impl WorldSnapshot {
    /// Capture all living units, flagging the ones in `selected`.
    pub fn capture<W: World>(world: &W, selected: &[UnitId]) -> Self {
        let mut units: Vec<UnitSnapshot> = world
            .unit_ids()
            .into_iter()
            .filter_map(|id| world.unit(id))
            .filter(|unit| !unit.is_dead())
            .map(|unit| UnitSnapshot {
                id: unit.id(),
                archetype: unit.archetype(),
                team: unit.team(),
                health_pct: unit.health_percentage(),
                position: unit.position(),
                selected: selected.contains(&unit.id()),
            })
            .collect();
        units.sort_by_key(|unit| unit.id);

        Self {
            captured_at: Utc::now(),
            units,
        }
    }

    /// Snapshot entry for `id`, if it was alive at capture time.
    pub fn unit(&self, id: UnitId) -> Option<&UnitSnapshot> {
        self.units.iter().find(|unit| unit.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Sandbox, SandboxUnit};

    #[test]
    fn capture_skips_dead_units_and_marks_selection() {
        let mut world = Sandbox::new();
        world.spawn(SandboxUnit::new(
            UnitId(2),
            Archetype::Tank,
            TeamId(0),
            Position::new(0.0, 0.0),
        ));
        world.spawn(SandboxUnit::new(
            UnitId(1),
            Archetype::Scout,
            TeamId(0),
            Position::new(5.0, 0.0),
        ));
        world.spawn(SandboxUnit::new(
            UnitId(9),
            Archetype::Sniper,
            TeamId(1),
            Position::new(50.0, 0.0),
        ));
        world.kill(UnitId(9));

        let snapshot = WorldSnapshot::capture(&world, &[UnitId(2)]);
        let ids: Vec<_> = snapshot.units.iter().map(|unit| unit.id).collect();
        assert_eq!(ids, vec![UnitId(1), UnitId(2)]);
        assert!(snapshot.unit(UnitId(2)).unwrap().selected);
        assert!(!snapshot.unit(UnitId(1)).unwrap().selected);
    }
}
