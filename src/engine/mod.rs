//! Plan execution engine
//!
//! The engine owns every unit's active plan and advances them from a single
//! discrete tick loop. All transitions happen synchronously inside
//! [`ExecutionEngine::tick`], [`ExecutionEngine::execute_plan`] or
//! [`ExecutionEngine::interrupt_plan`]; nothing else mutates plan state.
//!
//! Per tick, for each active plan in ascending unit-id order:
//!
//! - a missing or dead unit fails the plan;
//! - a step that has not started has its trigger evaluated against a fresh
//!   [`UnitContext`]. False leaves the plan waiting without touching the
//!   unit. True issues the step's capability call once and starts the step;
//! - a running step finishes once its duration has elapsed, or on the next
//!   tick when it has none, and the following step is evaluated in the same
//!   tick.

mod context;
mod plan;
mod stats;

pub use context::UnitContext;
pub use plan::{Plan, PlanId, PlanOutcome, PlanState, PlanStatus, ValidatedPlan};
pub use stats::EngineStats;

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, StepFailurePolicy};
use crate::events::{CommandEvent, EventSink};
use crate::translator::dispatch;
use crate::world::{Unit, UnitId, World};
use plan::RunningStep;

/// Interruption reason used when a newer plan replaces an active one.
pub const SUPERSEDED: &str = "superseded";

/// Runs at most one plan per unit.
pub struct ExecutionEngine {
    config: EngineConfig,
    events: Arc<dyn EventSink>,
    active: BTreeMap<UnitId, Plan>,
    outcomes: HashMap<UnitId, PlanOutcome>,
    stats: EngineStats,
    ticks: u64,
}

impl ExecutionEngine {
    /// Empty engine reporting to `events`.
    pub fn new(config: EngineConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            events,
            active: BTreeMap::new(),
            outcomes: HashMap::new(),
            stats: EngineStats::default(),
            ticks: 0,
        }
    }

    /// Make `plan` its unit's active plan, interrupting any plan it already
    /// had with reason `superseded`. Returns `false`, starting nothing, when
    /// the plan has no steps.
    pub fn execute_plan(&mut self, mut plan: Plan) -> bool {
        if plan.steps.is_empty() {
            warn!(unit = %plan.unit(), "refusing to start an empty plan");
            return false;
        }

        let unit = plan.unit();
        self.interrupt_plan(unit, SUPERSEDED);

        plan.state = PlanState::Active;
        plan.current_step = 0;
        self.stats.plans_started += 1;
        info!(
            unit = %unit,
            plan = %plan.id(),
            generation = plan.generation(),
            steps = plan.steps.len(),
            "plan started"
        );
        self.events.emit(CommandEvent::PlanStarted {
            unit,
            plan: plan.id(),
            steps: plan.steps.len(),
        });
        self.active.insert(unit, plan);
        true
    }

    /// Stop `unit`'s active plan. Returns whether a plan was stopped; calling
    /// it again, or for a unit without a plan, does nothing.
    pub fn interrupt_plan(&mut self, unit: UnitId, reason: &str) -> bool {
        let Some(mut plan) = self.active.remove(&unit) else {
            return false;
        };
        plan.state = PlanState::Interrupted;
        self.stats.plans_interrupted += 1;
        info!(unit = %unit, plan = %plan.id(), reason, "plan interrupted");
        self.events.emit(CommandEvent::PlanInterrupted {
            unit,
            plan: plan.id(),
            reason: reason.to_string(),
        });
        self.record_outcome(&plan, Some(reason.to_string()));
        true
    }

    /// Interrupt every active plan. Returns how many were stopped.
    pub fn interrupt_all(&mut self, reason: &str) -> usize {
        let units: Vec<UnitId> = self.active.keys().copied().collect();
        units
            .into_iter()
            .filter(|unit| self.interrupt_plan(*unit, reason))
            .count()
    }

    /// Advance every active plan against `world` at time `now_ms`.
    pub fn tick<W: World>(&mut self, world: &mut W, now_ms: u64) {
        self.ticks += 1;
        let units: Vec<UnitId> = self.active.keys().copied().collect();
        for unit in units {
            self.advance(world, unit, now_ms);
        }
    }

    fn advance<W: World>(&mut self, world: &mut W, unit: UnitId, now_ms: u64) {
        loop {
            let alive = world.unit(unit).is_some_and(|u| !u.is_dead());
            let Some(plan) = self.active.get_mut(&unit) else {
                return;
            };
            if !alive {
                let reason = format!("unit {unit} is missing or destroyed");
                self.finish(unit, PlanState::Failed, Some(reason), now_ms);
                return;
            }

            let started = *plan.started_at_ms.get_or_insert(now_ms);
            let index = plan.current_step;
            let Some(step) = plan.steps.get(index) else {
                self.finish(unit, PlanState::Completed, None, now_ms);
                return;
            };

            if let Some(running) = plan.running {
                let done = if step.duration_ms == 0 {
                    self.ticks > running.started_tick
                } else {
                    now_ms.saturating_sub(running.started_at_ms) >= step.duration_ms
                };
                if !done {
                    return;
                }
                debug!(unit = %unit, step = index, "step finished");
                plan.running = None;
                plan.completed_steps += 1;
                plan.current_step += 1;
                if plan.current_step >= plan.steps.len() {
                    self.finish(unit, PlanState::Completed, None, now_ms);
                    return;
                }
                continue;
            }

            let elapsed_secs = now_ms.saturating_sub(started) as f64 / 1000.0;
            let context =
                UnitContext::new(&*world, unit, elapsed_secs, self.config.awareness_radius);
            let fired = step.trigger.evaluate(&context);
            if !step.trigger.is_always() {
                self.events.emit(CommandEvent::TriggerEvaluated {
                    unit,
                    plan: plan.id(),
                    step: index,
                    expr: step.trigger.source().to_string(),
                    result: fired,
                });
            }
            if !fired {
                plan.state = PlanState::WaitingOnTrigger;
                return;
            }

            plan.state = PlanState::Active;
            match dispatch(world, unit, step) {
                Ok(()) => {
                    self.stats.steps_executed += 1;
                    plan.running = Some(RunningStep {
                        started_at_ms: now_ms,
                        started_tick: self.ticks,
                    });
                    info!(unit = %unit, step = index, action = %step.kind, "step executed");
                    self.events.emit(CommandEvent::StepExecuted {
                        unit,
                        plan: plan.id(),
                        step: index,
                        action: step.kind,
                        speech: step.speech.clone(),
                    });
                    return;
                }
                Err(err) => {
                    self.stats.steps_failed += 1;
                    plan.failed_steps += 1;
                    warn!(unit = %unit, step = index, error = %err, "step failed");
                    self.events.emit(CommandEvent::StepFailed {
                        unit,
                        plan: plan.id(),
                        step: index,
                        error: err.to_string(),
                    });
                    match self.config.step_failure_policy {
                        StepFailurePolicy::Abort => {
                            self.finish(unit, PlanState::Failed, Some(err.to_string()), now_ms);
                            return;
                        }
                        StepFailurePolicy::Skip => {
                            plan.current_step += 1;
                            if plan.current_step >= plan.steps.len() {
                                self.finish(unit, PlanState::Completed, None, now_ms);
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Remove a plan that completed or failed and report it.
    fn finish(&mut self, unit: UnitId, state: PlanState, reason: Option<String>, now_ms: u64) {
        let Some(mut plan) = self.active.remove(&unit) else {
            return;
        };
        plan.state = state;
        let success = state == PlanState::Completed && plan.failed_steps == 0;
        match state {
            PlanState::Completed => self.stats.plans_completed += 1,
            _ => self.stats.plans_failed += 1,
        }
        if let Some(started) = plan.started_at_ms {
            self.stats.record_duration(now_ms.saturating_sub(started));
        }

        if success {
            info!(unit = %unit, plan = %plan.id(), "plan completed");
        } else {
            warn!(
                unit = %unit,
                plan = %plan.id(),
                ?state,
                reason = reason.as_deref().unwrap_or(""),
                "plan did not succeed"
            );
        }
        self.events.emit(CommandEvent::PlanCompleted {
            unit,
            plan: plan.id(),
            success,
        });
        self.record_outcome(&plan, reason);
    }

    fn record_outcome(&mut self, plan: &Plan, reason: Option<String>) {
        self.outcomes.insert(
            plan.unit(),
            PlanOutcome {
                plan: plan.id(),
                generation: plan.generation(),
                state: plan.state,
                steps_completed: plan.completed_steps,
                reason,
                finished_at: Utc::now(),
            },
        );
    }

    /// Status of `unit`'s active plan.
    pub fn plan_status(&self, unit: UnitId) -> Option<PlanStatus> {
        self.active.get(&unit).map(Plan::status)
    }

    /// `unit`'s active plan.
    pub fn plan(&self, unit: UnitId) -> Option<&Plan> {
        self.active.get(&unit)
    }

    /// Units that currently have a plan, ascending.
    pub fn active_units(&self) -> Vec<UnitId> {
        self.active.keys().copied().collect()
    }

    /// Number of active plans.
    pub fn active_plan_count(&self) -> usize {
        self.active.len()
    }

    /// How `unit`'s most recent finished plan ended.
    pub fn last_outcome(&self, unit: UnitId) -> Option<&PlanOutcome> {
        self.outcomes.get(&unit)
    }

    /// Execution counters.
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Engine settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
