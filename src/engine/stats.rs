use serde::Serialize;

/// Counters kept by the engine. Observation only; nothing reads them back
/// to make decisions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStats {
    /// Plans accepted by `execute_plan`.
    pub plans_started: u64,
    /// Plans that reached the end.
    pub plans_completed: u64,
    /// Plans that failed.
    pub plans_failed: u64,
    /// Plans interrupted or superseded.
    pub plans_interrupted: u64,
    /// Capability calls issued for plan steps.
    pub steps_executed: u64,
    /// Capability calls that failed.
    pub steps_failed: u64,
    /// Mean wall time of plans that completed or failed.
    pub average_plan_duration_ms: f64,
    finished_with_duration: u64,
}

impl EngineStats {
    pub(crate) fn record_duration(&mut self, duration_ms: u64) {
        self.finished_with_duration += 1;
        let n = self.finished_with_duration as f64;
        self.average_plan_duration_ms += (duration_ms as f64 - self.average_plan_duration_ms) / n;
    }
}
