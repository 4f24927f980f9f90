//! Integration tests for command orchestration
//!
//! Runs the full pipeline (orchestrator, engine, translator) against the
//! sandbox world with a scripted generator. Tokio time is paused so
//! timeouts, backoff and rate limits resolve instantly and deterministically.

use orderly::config::{EngineConfig, OrchestratorConfig};
use orderly::engine::{ExecutionEngine, PlanState, SUPERSEDED};
use orderly::error::ExternalServiceError;
use orderly::events::{CommandEvent, RecordingSink};
use async_trait::async_trait;
use orderly::orchestrator::{
    CommandOrchestrator, GeneratorClient, GeneratorRequest, ScriptedGenerator, ScriptedReply,
};
use orderly::translator::CommandTranslator;
use orderly::world::{CapabilityCall, Sandbox, UnitId, WorldSnapshot};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const TANK: UnitId = UnitId(2);
const MEDIC: UnitId = UnitId(3);

struct Session {
    world: Sandbox,
    engine: ExecutionEngine,
    translator: CommandTranslator,
    orchestrator: CommandOrchestrator,
    generator: Arc<ScriptedGenerator>,
    sink: Arc<RecordingSink>,
}

impl Session {
    fn new(config: OrchestratorConfig) -> Self {
        let sink = Arc::new(RecordingSink::new());
        let generator = Arc::new(ScriptedGenerator::new());
        let client: Arc<dyn GeneratorClient> = generator.clone();
        Self {
            world: Sandbox::skirmish(),
            engine: ExecutionEngine::new(EngineConfig::default(), sink.clone()),
            translator: CommandTranslator::new(sink.clone()),
            orchestrator: CommandOrchestrator::new(config, client, sink.clone()).unwrap(),
            generator,
            sink,
        }
    }

    fn submit(&mut self, text: &str, units: &[UnitId]) {
        let snapshot = WorldSnapshot::capture(&self.world, units);
        self.orchestrator.process_command(text, units, &snapshot).unwrap();
    }

    /// Wait for the next reply and apply it.
    async fn settle(&mut self) -> usize {
        assert!(self.orchestrator.wait_for_completion().await, "no reply arrived");
        self.orchestrator
            .poll(&mut self.engine, &mut self.translator, &mut self.world)
    }

    fn tick(&mut self, now_ms: u64) {
        self.engine.tick(&mut self.world, now_ms);
    }

    fn failures(&self) -> Vec<String> {
        self.sink
            .events()
            .into_iter()
            .filter_map(|event| match event {
                CommandEvent::CommandFailed { error, .. } => Some(error),
                _ => None,
            })
            .collect()
    }
}

fn step(action: &str, params: Value, trigger: &str) -> Value {
    json!({"action": action, "params": params, "trigger": trigger, "speech": "", "duration_ms": 0})
}

fn plan_reply(steps: Value) -> ScriptedReply {
    ScriptedReply::json(json!({
        "commands": null,
        "plans": [{ "steps": steps }],
        "message": "On it.",
        "error": null,
    }))
}

#[tokio::test(start_paused = true)]
async fn test_unknown_action_fails_the_command() {
    let mut session = Session::new(OrchestratorConfig::default());
    session
        .generator
        .push(plan_reply(json!([step("fly_away", json!({}), "")])));

    session.submit("fly away", &[MEDIC]);
    assert_eq!(session.settle().await, 1);

    assert_eq!(session.failures(), vec!["unknown action: fly_away".to_string()]);
    assert_eq!(
        session.sink.names(),
        vec!["processing_started", "processing_finished", "command_failed"]
    );
    assert_eq!(session.engine.active_plan_count(), 0);
    assert!(session.world.calls(MEDIC).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_conditional_order_runs_as_plan() {
    let mut session = Session::new(OrchestratorConfig::default());
    session.world.set_health(MEDIC, 15.0);
    session.generator.push(plan_reply(json!([
        step("retreat", json!({"position": [-20, 0]}), "health_pct<20"),
        step("heal", json!({}), ""),
    ])));

    session.submit("Retreat if health drops below 20%", &[MEDIC]);
    session.settle().await;
    assert_eq!(session.engine.active_plan_count(), 1);

    for tick in 0..3 {
        session.tick(tick * 100);
    }
    assert!(matches!(session.world.calls(MEDIC)[0], CapabilityCall::Retreat(_)));
    assert_eq!(session.world.calls(MEDIC)[1], CapabilityCall::UseAbility("heal".into()));
    assert!(matches!(
        session.sink.events().last(),
        Some(CommandEvent::PlanCompleted { success: true, .. })
    ));
    assert_eq!(session.sink.count("plan_processed"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_second_command_supersedes_first() {
    let mut session = Session::new(OrchestratorConfig::default());
    session
        .generator
        .when(
            "hold the line",
            plan_reply(json!([step("hold_position", json!({}), "enemy_dist < 5")])),
        )
        .when("fall back", plan_reply(json!([step("retreat", json!({}), "")])));

    session.submit("hold the line", &[MEDIC]);
    session.settle().await;
    session.tick(0);
    let first = session.engine.plan_status(MEDIC).unwrap();
    assert_eq!(first.generation, 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    session.submit("fall back", &[MEDIC]);
    session.settle().await;

    let outcome = session.engine.last_outcome(MEDIC).unwrap();
    assert_eq!(outcome.plan, first.plan);
    assert_eq!(outcome.state, PlanState::Interrupted);
    assert_eq!(outcome.reason.as_deref(), Some(SUPERSEDED));

    let second = session.engine.plan_status(MEDIC).unwrap();
    assert_ne!(second.plan, first.plan);
    assert!(second.generation > first.generation);
    assert_eq!(second.step, 0);
    assert_eq!(session.orchestrator.generation(MEDIC), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stale_reply_is_dropped_silently() {
    let mut session = Session::new(OrchestratorConfig::default());
    session
        .generator
        .when(
            "advance slowly",
            ScriptedReply::Delayed(
                Duration::from_secs(1),
                json!({
                    "commands": null,
                    "plans": [{"steps": [step("move_to", json!({"position": [5, 5]}), "")]}],
                    "message": "",
                    "error": null
                })
                .to_string(),
            ),
        )
        .when("hold the line", plan_reply(json!([step("hold_position", json!({}), "")])));

    session.submit("advance slowly", &[MEDIC]);
    session.submit("hold the line", &[MEDIC]);

    session.settle().await;
    assert_eq!(session.engine.plan(MEDIC).unwrap().generation(), 2);
    let before = session.sink.events().len();

    assert_eq!(session.settle().await, 1, "stale reply is still consumed");
    assert_eq!(session.sink.events().len(), before, "stale reply emits nothing");
    assert_eq!(session.engine.plan(MEDIC).unwrap().generation(), 2);
    assert_eq!(session.sink.count("processing_started"), 2);
    assert_eq!(session.sink.count("processing_finished"), 1);
    assert_eq!(session.orchestrator.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_without_retries_fails_the_command() {
    let config = OrchestratorConfig {
        request_timeout_ms: 30_000,
        max_retries: 0,
        ..OrchestratorConfig::default()
    };
    let mut session = Session::new(config);
    session.generator.push(ScriptedReply::Hang);

    let started = Instant::now();
    session.submit("scout ahead", &[MEDIC]);
    session.settle().await;

    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(session.failures(), vec!["timeout".to_string()]);
    assert_eq!(session.engine.active_plan_count(), 0);
    assert!(session.engine.plan_status(MEDIC).is_none());
    assert_eq!(session.generator.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_is_retried_with_backoff() {
    let config = OrchestratorConfig {
        max_retries: 2,
        retry_base_delay_ms: 500,
        ..OrchestratorConfig::default()
    };
    let mut session = Session::new(config);
    session
        .generator
        .push(ScriptedReply::Fail(ExternalServiceError::Status {
            status: 503,
            body: "busy".into(),
        }))
        .push(ScriptedReply::Content("not json at all".into()))
        .push(plan_reply(json!([step("heal", json!({}), "")])));

    session.submit("heal up", &[MEDIC]);
    session.settle().await;

    let times = session.generator.call_times();
    assert_eq!(times.len(), 3);
    assert!(times[1] - times[0] >= Duration::from_millis(500));
    assert!(times[2] - times[1] >= Duration::from_millis(1000));
    assert!(session.failures().is_empty());
    assert_eq!(session.sink.count("plan_processed"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_reports_last_error() {
    let config = OrchestratorConfig {
        max_retries: 1,
        ..OrchestratorConfig::default()
    };
    let mut session = Session::new(config);
    session
        .generator
        .push(ScriptedReply::Fail(ExternalServiceError::Timeout))
        .push(ScriptedReply::Fail(ExternalServiceError::Status {
            status: 500,
            body: "boom".into(),
        }));

    session.submit("heal up", &[MEDIC]);
    session.settle().await;

    assert_eq!(session.generator.requests().len(), 2);
    assert_eq!(session.failures(), vec!["service returned status 500: boom".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_generator_refusal_is_reported() {
    let mut session = Session::new(OrchestratorConfig::default());
    session.generator.push(ScriptedReply::json(json!({
        "commands": null,
        "plans": null,
        "message": "",
        "error": "there is nothing to repair"
    })));

    session.submit("repair the bridge", &[MEDIC]);
    session.settle().await;

    assert_eq!(session.failures(), vec!["there is nothing to repair".to_string()]);
    assert_eq!(session.generator.requests().len(), 1, "refusals are not retried");
}

#[tokio::test(start_paused = true)]
async fn test_direct_command_interrupts_running_plan() {
    let mut session = Session::new(OrchestratorConfig::default());
    session
        .generator
        .when("guard", plan_reply(json!([step("hold_position", json!({}), "enemy_dist < 5")])))
        .when(
            "shields",
            ScriptedReply::json(json!({
                "commands": [{"action": "activate_shield", "params": {}, "speech": "Shields up!"}],
                "plans": null,
                "message": "Shielding.",
                "error": null,
            })),
        );

    session.submit("guard this spot", &[TANK]);
    session.settle().await;
    session.tick(0);

    session.submit("shields now", &[TANK]);
    session.settle().await;

    assert_eq!(session.engine.active_plan_count(), 0);
    assert_eq!(session.engine.last_outcome(TANK).unwrap().reason.as_deref(), Some(SUPERSEDED));
    assert_eq!(
        session.world.calls(TANK),
        &[CapabilityCall::UseAbility("activate_shield".into())]
    );
    let processed = session.sink.events().into_iter().find_map(|event| match event {
        CommandEvent::CommandProcessed { commands, message, .. } => Some((commands, message)),
        _ => None,
    });
    let (commands, message) = processed.unwrap();
    assert_eq!(message, "Shielding.");
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].speech, "Shields up!");
    assert_eq!(session.sink.count("command_executed"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_mixed_selection_uses_group_replies() {
    let mut session = Session::new(OrchestratorConfig::default());
    session.generator.push(ScriptedReply::json(json!({
        "commands": null,
        "plans": [
            {"unit_id": 2, "steps": [step("activate_shield", json!({}), "")]},
            {"unit_id": 3, "steps": [step("heal", json!({}), "")]},
        ],
        "message": "Formation.",
        "error": null,
    })));

    session.submit("shield and heal", &[MEDIC, TANK]);
    session.settle().await;

    let request = &session.generator.requests()[0];
    assert!(request.schema_name.starts_with("orderly_group_"));
    assert!(request.system_prompt.contains("unit_id"));
    assert_eq!(session.engine.active_units(), vec![TANK, MEDIC]);

    session.tick(0);
    assert_eq!(session.world.calls(TANK), &[CapabilityCall::UseAbility("activate_shield".into())]);
    assert_eq!(session.world.calls(MEDIC), &[CapabilityCall::UseAbility("heal".into())]);
}

#[tokio::test(start_paused = true)]
async fn test_group_reply_with_wrong_ability_routes_nothing() {
    let mut session = Session::new(OrchestratorConfig::default());
    session.generator.push(ScriptedReply::json(json!({
        "commands": null,
        "plans": [
            {"unit_id": 2, "steps": [step("activate_shield", json!({}), "")]},
            {"unit_id": 3, "steps": [step("activate_shield", json!({}), "")]},
        ],
        "message": "",
        "error": null,
    })));

    session.submit("shields everyone", &[MEDIC, TANK]);
    session.settle().await;

    assert_eq!(session.engine.active_plan_count(), 0);
    assert_eq!(
        session.failures(),
        vec!["action activate_shield is not allowed for medic".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limit_serialises_requests() {
    let config = OrchestratorConfig {
        max_concurrent_requests: 1,
        ..OrchestratorConfig::default()
    };
    let mut session = Session::new(config);
    let reply = |action: &str| {
        ScriptedReply::Delayed(
            Duration::from_secs(1),
            json!({"commands": [{"action": action, "params": {}, "speech": ""}], "plans": null,
                   "message": "", "error": null})
            .to_string(),
        )
    };
    session
        .generator
        .when("Order: shield", reply("activate_shield"))
        .when("Order: heal", reply("heal"));

    session.submit("shield", &[TANK]);
    session.submit("heal", &[MEDIC]);
    session.settle().await;
    session.settle().await;

    let times = session.generator.call_times();
    assert_eq!(times.len(), 2);
    assert!(times[1] - times[0] >= Duration::from_secs(1));
    assert_eq!(session.sink.count("command_processed"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_all_discards_outstanding_requests() {
    let mut session = Session::new(OrchestratorConfig::default());
    session.generator.push(ScriptedReply::Hang);

    session.submit("wait for orders", &[MEDIC]);
    tokio::task::yield_now().await;
    assert_eq!(session.orchestrator.pending_count(), 1);

    assert_eq!(session.orchestrator.cancel_all(), 1);
    assert_eq!(session.orchestrator.pending_count(), 0);
    assert!(!session.orchestrator.wait_for_completion().await);
    assert_eq!(session.sink.names(), vec!["processing_started"]);
}

#[tokio::test(start_paused = true)]
async fn test_blank_error_field_still_runs_the_plan() {
    let mut session = Session::new(OrchestratorConfig::default());
    session.generator.push(ScriptedReply::json(json!({
        "commands": null,
        "plans": [{"steps": [step("heal", json!({}), "")]}],
        "message": "ok",
        "error": "",
    })));

    session.submit("heal up", &[MEDIC]);
    session.settle().await;

    assert!(session.failures().is_empty());
    assert_eq!(session.engine.active_plan_count(), 1);
    assert_eq!(
        session.sink.names(),
        vec!["processing_started", "processing_finished", "plan_started", "plan_processed"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_partly_stale_group_reply_reaches_current_units_only() {
    let mut session = Session::new(OrchestratorConfig::default());
    let group = json!({
        "commands": null,
        "plans": [
            {"unit_id": 2, "steps": [step("activate_shield", json!({}), "enemy_dist < 5")]},
            {"unit_id": 3, "steps": [step("heal", json!({}), "health_pct < 5")]},
        ],
        "message": "",
        "error": null,
    });
    session
        .generator
        .when(
            "Order: advance together",
            ScriptedReply::Delayed(Duration::from_secs(1), group.to_string()),
        )
        .when(
            "Order: hold the line",
            plan_reply(json!([step("hold_position", json!({}), "enemy_dist < 5")])),
        );

    session.submit("advance together", &[MEDIC, TANK]);
    session.submit("hold the line", &[MEDIC]);

    session.settle().await;
    let medic_plan = session.engine.plan(MEDIC).unwrap().id();
    assert_eq!(session.engine.plan(MEDIC).unwrap().generation(), 2);
    assert!(session.engine.plan(TANK).is_none());

    session.settle().await;
    let tank = session.engine.plan(TANK).unwrap();
    assert_eq!(tank.generation(), 1);
    assert_eq!(tank.steps()[0].kind.name(), "activate_shield");

    let medic = session.engine.plan(MEDIC).unwrap();
    assert_eq!(medic.id(), medic_plan);
    assert_eq!(medic.generation(), 2);
    assert_eq!(session.sink.count("plan_interrupted"), 0);

    let routed: Vec<Vec<UnitId>> = session
        .sink
        .events()
        .into_iter()
        .filter_map(|event| match event {
            CommandEvent::PlanProcessed { plans, .. } => {
                Some(plans.iter().map(|plan| plan.unit).collect())
            }
            _ => None,
        })
        .collect();
    assert_eq!(routed, vec![vec![MEDIC], vec![TANK]]);
}

struct PanickingGenerator;

#[async_trait]
impl GeneratorClient for PanickingGenerator {
    async fn generate(&self, _request: &GeneratorRequest) -> Result<String, ExternalServiceError> {
        panic!("generator exploded");
    }
}

#[tokio::test(start_paused = true)]
async fn test_panicking_generator_fails_the_command() {
    let sink = Arc::new(RecordingSink::new());
    let mut world = Sandbox::skirmish();
    let mut engine = ExecutionEngine::new(EngineConfig::default(), sink.clone());
    let mut translator = CommandTranslator::new(sink.clone());
    let mut orchestrator = CommandOrchestrator::new(
        OrchestratorConfig::default(),
        Arc::new(PanickingGenerator),
        sink.clone(),
    )
    .unwrap();

    let snapshot = WorldSnapshot::capture(&world, &[MEDIC]);
    orchestrator.process_command("heal up", &[MEDIC], &snapshot).unwrap();

    let ready = tokio::time::timeout(Duration::from_secs(3600), orchestrator.wait_for_completion())
        .await
        .unwrap();
    assert!(ready);
    assert_eq!(orchestrator.poll(&mut engine, &mut translator, &mut world), 1);
    assert_eq!(orchestrator.pending_count(), 0);

    assert_eq!(
        sink.names(),
        vec!["processing_started", "processing_finished", "command_failed"]
    );
    let error = sink.events().into_iter().find_map(|event| match event {
        CommandEvent::CommandFailed { error, .. } => Some(error),
        _ => None,
    });
    assert!(error.unwrap().contains("generator exploded"));
    assert_eq!(engine.active_plan_count(), 0);
}
