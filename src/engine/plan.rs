use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::error::SchemaValidationError;
use crate::schema::{ActionDescriptor, Archetype, Validator};
use crate::world::UnitId;

/// Identifier of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(pub Uuid);

impl PlanId {
    /// Fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    /// Built but not handed to the engine.
    Pending,
    /// Running or about to run its current step.
    Active,
    /// Current step's trigger was false on the last tick.
    WaitingOnTrigger,
    /// Every step finished.
    Completed,
    /// A step failed under the abort policy, or the unit was lost.
    Failed,
    /// Stopped early, e.g. superseded by a newer plan.
    Interrupted,
}

impl PlanState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, PlanState::Completed | PlanState::Failed | PlanState::Interrupted)
    }
}

/// Steps that passed validation for a particular archetype.
///
/// The engine only accepts plans built from this type, so unvalidated
/// descriptors cannot reach it.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPlan {
    steps: Vec<ActionDescriptor>,
}

impl ValidatedPlan {
    /// Validate raw plan JSON for `archetype`.
    pub fn from_json(
        validator: &Validator,
        data: &Value,
        archetype: Archetype,
    ) -> Result<Self, SchemaValidationError> {
        let steps = validator.validate_plan_for(data, archetype)?;
        Ok(Self { steps })
    }

    /// Validated steps.
    pub fn steps(&self) -> &[ActionDescriptor] {
        &self.steps
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether there are no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Progress of the step currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RunningStep {
    pub(crate) started_at_ms: u64,
    pub(crate) started_tick: u64,
}

/// A unit's plan. Only the engine advances it.
#[derive(Debug, Clone)]
pub struct Plan {
    id: PlanId,
    unit: UnitId,
    generation: u64,
    pub(crate) steps: Vec<ActionDescriptor>,
    pub(crate) state: PlanState,
    pub(crate) current_step: usize,
    pub(crate) running: Option<RunningStep>,
    pub(crate) started_at_ms: Option<u64>,
    pub(crate) completed_steps: usize,
    pub(crate) failed_steps: usize,
}

impl Plan {
    /// Pending plan for `unit` at `generation`.
    pub fn new(unit: UnitId, plan: ValidatedPlan, generation: u64) -> Self {
        Self {
            id: PlanId::new(),
            unit,
            generation,
            steps: plan.steps,
            state: PlanState::Pending,
            current_step: 0,
            running: None,
            started_at_ms: None,
            completed_steps: 0,
            failed_steps: 0,
        }
    }

    /// Plan identifier.
    pub fn id(&self) -> PlanId {
        self.id
    }

    /// Owning unit.
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// Generation of the command that produced the plan.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Steps in order.
    pub fn steps(&self) -> &[ActionDescriptor] {
        &self.steps
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PlanState {
        self.state
    }

    /// Index of the step being evaluated or run.
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub(crate) fn status(&self) -> PlanStatus {
        PlanStatus {
            plan: self.id,
            generation: self.generation,
            state: self.state,
            step: self.current_step,
            steps: self.steps.len(),
            running: self.running.is_some(),
        }
    }
}

/// Read-only view of an active plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanStatus {
    /// Plan identifier.
    pub plan: PlanId,
    /// Command generation.
    pub generation: u64,
    /// Lifecycle state.
    pub state: PlanState,
    /// Current step index.
    pub step: usize,
    /// Total steps.
    pub steps: usize,
    /// Whether the current step's action has been issued.
    pub running: bool,
}

/// Record kept for a unit's most recent finished plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanOutcome {
    /// Plan identifier.
    pub plan: PlanId,
    /// Command generation.
    pub generation: u64,
    /// Terminal state.
    pub state: PlanState,
    /// Steps that ran to completion.
    pub steps_completed: usize,
    /// Interruption reason or failure message.
    pub reason: Option<String>,
    /// When the plan ended.
    pub finished_at: DateTime<Utc>,
}
