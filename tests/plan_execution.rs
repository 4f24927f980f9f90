//! Integration tests for plan execution
//!
//! Drives validated plans through the engine against the sandbox world and
//! checks capability calls, events and terminal outcomes.

use orderly::config::{EngineConfig, StepFailurePolicy};
use orderly::engine::{ExecutionEngine, Plan, PlanState, SUPERSEDED, ValidatedPlan};
use orderly::events::{CommandEvent, RecordingSink};
use orderly::schema::{Archetype, Validator};
use orderly::world::{CapabilityCall, Position, Sandbox, UnitId};
use serde_json::{Value, json};
use std::sync::Arc;

const MEDIC: UnitId = UnitId(3);
const TANK: UnitId = UnitId(2);

fn engine(policy: StepFailurePolicy) -> (ExecutionEngine, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let config = EngineConfig {
        step_failure_policy: policy,
        ..EngineConfig::default()
    };
    (ExecutionEngine::new(config, sink.clone()), sink)
}

fn step(action: &str, params: Value, trigger: &str, duration_ms: u64) -> Value {
    json!({
        "action": action,
        "params": params,
        "trigger": trigger,
        "speech": "",
        "duration_ms": duration_ms
    })
}

fn plan_for(unit: UnitId, archetype: Archetype, steps: Value, generation: u64) -> Plan {
    let validated =
        ValidatedPlan::from_json(&Validator::default(), &json!({ "steps": steps }), archetype)
            .unwrap();
    Plan::new(unit, validated, generation)
}

#[test]
fn test_retreat_then_heal_when_already_wounded() {
    let (mut engine, sink) = engine(StepFailurePolicy::Abort);
    let mut world = Sandbox::skirmish();
    world.set_health(MEDIC, 15.0);

    let plan = plan_for(
        MEDIC,
        Archetype::Medic,
        json!([
            {
                "action": "retreat",
                "params": {"position": {"x": -20, "y": 0}},
                "trigger": "health_pct<20",
                "speech": "Falling back!",
                "duration_ms": 0
            },
            {
                "action": "heal",
                "params": {},
                "trigger": "",
                "speech": "Patching up.",
                "duration_ms": 0
            },
        ]),
        1,
    );
    assert!(engine.execute_plan(plan));

    engine.tick(&mut world, 0);
    assert_eq!(
        world.calls(MEDIC),
        &[CapabilityCall::Retreat(Position::new(-20.0, 0.0))],
        "retreat fires on the first tick"
    );

    engine.tick(&mut world, 100);
    engine.tick(&mut world, 200);
    assert_eq!(world.calls(MEDIC).len(), 2);
    assert_eq!(world.calls(MEDIC)[1], CapabilityCall::UseAbility("heal".into()));
    assert_eq!(engine.active_plan_count(), 0);

    let names = sink.names();
    assert_eq!(
        names,
        vec![
            "plan_started",
            "trigger_evaluated",
            "step_executed",
            "step_executed",
            "plan_completed"
        ]
    );
    let events = sink.events();
    assert!(matches!(
        events.last(),
        Some(CommandEvent::PlanCompleted { unit, success: true, .. }) if *unit == MEDIC
    ));
    assert_eq!(engine.last_outcome(MEDIC).unwrap().state, PlanState::Completed);
    assert_eq!(engine.stats().plans_completed, 1);
    assert_eq!(engine.stats().steps_executed, 2);
}

#[test]
fn test_untriggered_step_waits_for_world_change() {
    let (mut engine, sink) = engine(StepFailurePolicy::Abort);
    let mut world = Sandbox::skirmish();

    engine.execute_plan(plan_for(
        MEDIC,
        Archetype::Medic,
        json!([step("heal", json!({}), "health_pct < 20", 0)]),
        1,
    ));

    for tick in 0..5 {
        engine.tick(&mut world, tick * 100);
    }
    assert!(world.calls(MEDIC).is_empty());
    assert_eq!(
        engine.plan_status(MEDIC).unwrap().state,
        PlanState::WaitingOnTrigger
    );
    assert_eq!(sink.count("trigger_evaluated"), 5);

    world.set_health(MEDIC, 10.0);
    engine.tick(&mut world, 500);
    assert_eq!(
        world.calls(MEDIC),
        &[CapabilityCall::UseAbility("heal".into())]
    );
}

#[test]
fn test_newer_plan_supersedes_and_starts_at_step_zero() {
    let (mut engine, sink) = engine(StepFailurePolicy::Abort);
    let mut world = Sandbox::skirmish();

    let first = plan_for(
        TANK,
        Archetype::Tank,
        json!([
            step("move_to", json!({"position": [10, 0]}), "", 5000),
            step("activate_shield", json!({}), "", 0),
        ]),
        1,
    );
    let first_id = first.id();
    engine.execute_plan(first);
    engine.tick(&mut world, 0);
    engine.tick(&mut world, 200);

    let second = plan_for(
        TANK,
        Archetype::Tank,
        json!([step("hold_position", json!({}), "", 0)]),
        2,
    );
    let second_id = second.id();
    engine.execute_plan(second);

    let outcome = engine.last_outcome(TANK).unwrap();
    assert_eq!(outcome.plan, first_id);
    assert_eq!(outcome.state, PlanState::Interrupted);
    assert_eq!(outcome.reason.as_deref(), Some(SUPERSEDED));

    let status = engine.plan_status(TANK).unwrap();
    assert_eq!(status.plan, second_id);
    assert_eq!(status.step, 0);
    assert_eq!(status.generation, 2);

    // Interrupting the replaced plan again has no effect.
    engine.interrupt_plan(TANK, "player cancelled");
    assert!(!engine.interrupt_plan(TANK, "player cancelled"));
    assert_eq!(sink.count("plan_interrupted"), 2);
    assert_eq!(sink.count("plan_completed"), 0);
}

#[test]
fn test_failure_in_one_plan_does_not_touch_another() {
    let (mut engine, _sink) = engine(StepFailurePolicy::Abort);
    let mut world = Sandbox::skirmish();

    engine.execute_plan(plan_for(
        TANK,
        Archetype::Tank,
        json!([step("attack", json!({"target_id": 999}), "", 0)]),
        1,
    ));
    engine.execute_plan(plan_for(
        MEDIC,
        Archetype::Medic,
        json!([step("heal", json!({}), "", 0)]),
        1,
    ));

    engine.tick(&mut world, 0);
    engine.tick(&mut world, 100);

    assert_eq!(engine.last_outcome(TANK).unwrap().state, PlanState::Failed);
    assert_eq!(engine.last_outcome(MEDIC).unwrap().state, PlanState::Completed);
    assert_eq!(engine.stats().plans_failed, 1);
    assert_eq!(engine.stats().plans_completed, 1);
}

#[test]
fn test_skip_policy_continues_but_reports_failure() {
    let (mut engine, sink) = engine(StepFailurePolicy::Skip);
    let mut world = Sandbox::skirmish();

    engine.execute_plan(plan_for(
        TANK,
        Archetype::Tank,
        json!([
            step("attack", json!({"target_id": 999}), "", 0),
            step("activate_shield", json!({}), "", 0),
        ]),
        1,
    ));

    engine.tick(&mut world, 0);
    assert_eq!(
        world.calls(TANK),
        &[CapabilityCall::UseAbility("activate_shield".into())]
    );
    engine.tick(&mut world, 100);

    assert_eq!(sink.count("step_failed"), 1);
    assert!(matches!(
        sink.events().last(),
        Some(CommandEvent::PlanCompleted { success: false, .. })
    ));
    assert_eq!(engine.last_outcome(TANK).unwrap().state, PlanState::Completed);
}

#[test]
fn test_dead_unit_fails_its_plan() {
    let (mut engine, sink) = engine(StepFailurePolicy::Abort);
    let mut world = Sandbox::skirmish();

    engine.execute_plan(plan_for(
        MEDIC,
        Archetype::Medic,
        json!([step("heal", json!({}), "health_pct < 5", 0)]),
        1,
    ));
    engine.tick(&mut world, 0);
    world.kill(MEDIC);
    engine.tick(&mut world, 100);

    assert_eq!(engine.active_plan_count(), 0);
    assert_eq!(engine.last_outcome(MEDIC).unwrap().state, PlanState::Failed);
    assert_eq!(sink.count("plan_completed"), 1);
    assert!(world.calls(MEDIC).is_empty());
}
