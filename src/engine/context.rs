use crate::trigger::{ExecutionContext, Variable};
use crate::world::{Unit, UnitId, World};

/// Resolves trigger variables for one unit by querying the world on every
/// call.
pub struct UnitContext<'w, W: World> {
    world: &'w W,
    unit: UnitId,
    elapsed_secs: f64,
    awareness_radius: f64,
}

impl<'w, W: World> UnitContext<'w, W> {
    /// Context for `unit`, whose plan has been running `elapsed_secs`.
    pub fn new(world: &'w W, unit: UnitId, elapsed_secs: f64, awareness_radius: f64) -> Self {
        Self {
            world,
            unit,
            elapsed_secs,
            awareness_radius,
        }
    }

    fn nearest(units: &[(UnitId, f64)]) -> f64 {
        units
            .iter()
            .map(|(_, dist)| *dist)
            .min_by(f64::total_cmp)
            .unwrap_or(f64::INFINITY)
    }

    fn within_radius(&self, units: &[(UnitId, f64)]) -> f64 {
        units
            .iter()
            .filter(|(_, dist)| *dist <= self.awareness_radius)
            .count() as f64
    }
}

impl<W: World> ExecutionContext for UnitContext<'_, W> {
    fn resolve(&self, variable: Variable) -> f64 {
        match variable {
            Variable::HealthPct => self
                .world
                .unit(self.unit)
                .map(Unit::health_percentage)
                .unwrap_or(0.0),
            Variable::EnemyDist => Self::nearest(&self.world.hostiles_of(self.unit)),
            Variable::AllyDist => Self::nearest(&self.world.allies_of(self.unit)),
            Variable::Time => self.elapsed_secs,
            Variable::EnemyCount => self.within_radius(&self.world.hostiles_of(self.unit)),
            Variable::AllyCount => self.within_radius(&self.world.allies_of(self.unit)),
        }
    }
}
