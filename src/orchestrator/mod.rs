//! Command orchestration
//!
//! [`CommandOrchestrator`] turns player text into generator requests and
//! routes validated replies to the translator or the engine. Each request
//! runs as a tokio task; its completion travels back through a channel and
//! is only applied when the tick loop calls [`CommandOrchestrator::poll`],
//! so plan state is never touched from another task.
//!
//! Every addressed unit gets a new generation number when a command is
//! submitted. A reply is routed only to units whose generation still equals
//! the one recorded at submission; a reply with no such unit left is
//! dropped without any event.

pub mod generator;
pub mod limiter;
pub mod prompt;
pub mod response;

pub use generator::{
    GeneratorClient, GeneratorRequest, HttpGeneratorClient, ScriptedGenerator, ScriptedReply,
};
pub use limiter::RequestLimiter;
pub use response::{StructuredResponse, ValidatedResponse};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::engine::{ExecutionEngine, Plan, SUPERSEDED};
use crate::error::{ExternalServiceError, OrchestratorError};
use crate::events::{CommandEvent, DispatchedCommand, EventSink, PlanSummary};
use crate::schema::{Archetype, OutputSchema, SchemaVariant, Validator};
use crate::translator::CommandTranslator;
use crate::world::{UnitId, UnitSnapshot, World, WorldSnapshot};

/// Identifier of one submitted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A finished request waiting to be applied by `poll`.
struct Completion {
    request: RequestId,
    variant: SchemaVariant,
    /// Addressed units with archetype and the generation assigned at submission.
    units: Vec<(UnitId, Archetype, u64)>,
    outcome: Result<Value, ExternalServiceError>,
}

/// Submits commands to the generator and routes the replies.
pub struct CommandOrchestrator {
    config: OrchestratorConfig,
    validator: Validator,
    client: Arc<dyn GeneratorClient>,
    events: Arc<dyn EventSink>,
    limiter: Arc<RequestLimiter>,
    runtime: Handle,
    generations: HashMap<UnitId, u64>,
    tasks: HashMap<RequestId, JoinHandle<()>>,
    ready: VecDeque<Completion>,
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
}

impl CommandOrchestrator {
    /// Must be called from within a tokio runtime; requests are spawned on it.
    pub fn new(
        config: OrchestratorConfig,
        client: Arc<dyn GeneratorClient>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, OrchestratorError> {
        let runtime =
            Handle::try_current().map_err(|err| OrchestratorError::NoRuntime(err.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            validator: Validator::new(config.max_steps_per_plan),
            limiter: Arc::new(RequestLimiter::new(
                config.max_concurrent_requests,
                config.requests_per_minute,
            )),
            config,
            client,
            events,
            runtime,
            generations: HashMap::new(),
            tasks: HashMap::new(),
            ready: VecDeque::new(),
            tx,
            rx,
        })
    }

    /// Submit `text` for `selection`, described by `snapshot`.
    ///
    /// Bumps the generation of every addressed unit, so any reply still in
    /// flight for them becomes stale, and starts exactly one generator
    /// request.
    pub fn process_command(
        &mut self,
        text: &str,
        selection: &[UnitId],
        snapshot: &WorldSnapshot,
    ) -> Result<RequestId, OrchestratorError> {
        if text.trim().is_empty() {
            return Err(OrchestratorError::EmptyCommand);
        }
        let mut ids = selection.to_vec();
        ids.sort();
        ids.dedup();
        if ids.is_empty() {
            return Err(OrchestratorError::EmptySelection);
        }
        let selected: Vec<UnitSnapshot> = ids
            .iter()
            .map(|id| snapshot.unit(*id).cloned().ok_or(OrchestratorError::UnitNotInSnapshot(*id)))
            .collect::<Result<_, _>>()?;

        let archetypes: Vec<Archetype> = selected.iter().map(|unit| unit.archetype).collect();
        let variant = SchemaVariant::for_archetypes(&archetypes);
        let schema = OutputSchema::build(variant, &archetypes);
        let max_steps = self.validator.max_steps();
        let request = prompt::build_request(text, &selected, snapshot, &schema, max_steps);

        let units: Vec<(UnitId, Archetype, u64)> = selected
            .iter()
            .map(|unit| {
                let generation = self.generations.entry(unit.id).or_insert(0);
                *generation += 1;
                (unit.id, unit.archetype, *generation)
            })
            .collect();

        let request_id = RequestId::new();
        info!(
            request = %request_id,
            units = ?ids,
            variant = %variant,
            schema = %schema.name,
            "command submitted"
        );
        self.events.emit(CommandEvent::ProcessingStarted {
            request: request_id,
            units: ids,
            text: text.trim().to_string(),
        });

        let client = self.client.clone();
        let limiter = self.limiter.clone();
        let config = self.config.clone();
        let tx = self.tx.clone();
        let handle = self.runtime.spawn(async move {
            let attempt = run_request(client.as_ref(), &limiter, &config, &request, request_id);
            let outcome = match AssertUnwindSafe(attempt).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    error!(request = %request_id, %reason, "generator client panicked");
                    Err(ExternalServiceError::Transport(format!(
                        "generator client panicked: {reason}"
                    )))
                }
            };
            let completion = Completion {
                request: request_id,
                variant,
                units,
                outcome,
            };
            if tx.send(completion).is_err() {
                debug!(request = %request_id, "orchestrator dropped before reply arrived");
            }
        });
        self.tasks.insert(request_id, handle);
        Ok(request_id)
    }

    /// Apply every reply that has arrived. Returns how many replies were
    /// consumed, stale ones included. Call from the tick loop.
    pub fn poll<W: World>(
        &mut self,
        engine: &mut ExecutionEngine,
        translator: &mut CommandTranslator,
        world: &mut W,
    ) -> usize {
        while let Ok(completion) = self.rx.try_recv() {
            self.ready.push_back(completion);
        }
        let mut handled = 0;
        while let Some(completion) = self.ready.pop_front() {
            self.tasks.remove(&completion.request);
            self.apply(completion, engine, translator, world);
            handled += 1;
        }
        handled
    }

    /// Wait until at least one reply is ready for [`poll`](Self::poll).
    /// Returns `false` immediately when nothing is outstanding.
    pub async fn wait_for_completion(&mut self) -> bool {
        if !self.ready.is_empty() {
            return true;
        }
        if self.tasks.is_empty() {
            return false;
        }
        match self.rx.recv().await {
            Some(completion) => {
                self.ready.push_back(completion);
                true
            }
            None => false,
        }
    }

    /// Abort every outstanding request and discard replies not yet applied.
    /// Returns how many requests were dropped.
    pub fn cancel_all(&mut self) -> usize {
        let mut cancelled = 0;
        for (request, handle) in self.tasks.drain() {
            handle.abort();
            debug!(request = %request, "request cancelled");
            cancelled += 1;
        }
        self.ready.clear();
        while self.rx.try_recv().is_ok() {}
        if cancelled > 0 {
            info!(cancelled, "cancelled outstanding requests");
        }
        cancelled
    }

    /// Requests submitted but not yet applied.
    pub fn pending_count(&self) -> usize {
        self.tasks.len()
    }

    /// Current generation of `unit`; 0 if it was never addressed.
    pub fn generation(&self, unit: UnitId) -> u64 {
        self.generations.get(&unit).copied().unwrap_or(0)
    }

    fn apply<W: World>(
        &mut self,
        completion: Completion,
        engine: &mut ExecutionEngine,
        translator: &mut CommandTranslator,
        world: &mut W,
    ) {
        let Completion {
            request,
            variant,
            units,
            outcome,
        } = completion;

        let current: Vec<(UnitId, Archetype, u64)> = units
            .iter()
            .copied()
            .filter(|(unit, _, generation)| self.generation(*unit) == *generation)
            .collect();
        if current.is_empty() {
            debug!(request = %request, "dropping stale reply");
            return;
        }

        self.events.emit(CommandEvent::ProcessingFinished { request });

        let addressed: Vec<(UnitId, Archetype)> = units
            .iter()
            .map(|(unit, archetype, _)| (*unit, *archetype))
            .collect();
        let validated = outcome
            .map_err(|err| err.to_string())
            .and_then(|value| response::classify(value).map_err(|err| err.to_string()))
            .and_then(|structured| match structured {
                StructuredResponse::Error(reason) => {
                    Err(ExternalServiceError::Refused(reason).to_string())
                }
                structured => response::validate(structured, variant, &addressed, &self.validator)
                    .map_err(|err| err.to_string()),
            });

        let validated = match validated {
            Ok(validated) => validated,
            Err(error) => {
                warn!(request = %request, %error, "command failed");
                self.events.emit(CommandEvent::CommandFailed {
                    request: Some(request),
                    command: None,
                    error,
                });
                return;
            }
        };

        let generation_of = |unit: UnitId| {
            current
                .iter()
                .find(|(id, _, _)| *id == unit)
                .map(|(_, _, generation)| *generation)
        };

        match validated {
            ValidatedResponse::Commands { commands, message } => {
                let mut dispatched = Vec::new();
                for (unit, descriptor) in commands {
                    if generation_of(unit).is_none() {
                        continue;
                    }
                    engine.interrupt_plan(unit, SUPERSEDED);
                    let command = translator.execute_command(world, unit, &descriptor);
                    dispatched.push(DispatchedCommand {
                        unit,
                        command,
                        action: descriptor.kind,
                        speech: descriptor.speech,
                    });
                }
                info!(request = %request, commands = dispatched.len(), "commands processed");
                self.events.emit(CommandEvent::CommandProcessed {
                    request,
                    commands: dispatched,
                    message,
                });
            }
            ValidatedResponse::Plans { plans, message } => {
                let mut started = Vec::new();
                for (unit, validated) in plans {
                    let Some(generation) = generation_of(unit) else {
                        continue;
                    };
                    let plan = Plan::new(unit, validated, generation);
                    let summary = PlanSummary {
                        unit,
                        plan: plan.id(),
                        steps: plan.steps().len(),
                    };
                    if engine.execute_plan(plan) {
                        started.push(summary);
                    }
                }
                info!(request = %request, plans = started.len(), "plans processed");
                self.events.emit(CommandEvent::PlanProcessed {
                    request,
                    plans: started,
                    message,
                });
            }
        }
    }
}

impl Drop for CommandOrchestrator {
    fn drop(&mut self) {
        for handle in self.tasks.values() {
            handle.abort();
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run one request to completion: limiter, per-attempt timeout, JSON check,
/// retries with capped exponential backoff.
async fn run_request(
    client: &dyn GeneratorClient,
    limiter: &RequestLimiter,
    config: &OrchestratorConfig,
    request: &GeneratorRequest,
    request_id: RequestId,
) -> Result<Value, ExternalServiceError> {
    let mut attempt = 0u32;
    loop {
        let permit = limiter
            .acquire()
            .await
            .map_err(|err| {
                ExternalServiceError::Transport(format!("request limiter closed: {err}"))
            })?;
        let generate = tokio::time::timeout(config.request_timeout(), client.generate(request));
        let result = match generate.await {
            Ok(result) => result,
            Err(_) => Err(ExternalServiceError::Timeout),
        };
        drop(permit);

        match result.and_then(|content| response::parse_json(&content)) {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < config.max_retries => {
                let delay = config.backoff(attempt);
                warn!(
                    request = %request_id,
                    attempt = attempt + 1,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "generator request failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                warn!(
                    request = %request_id,
                    attempts = attempt + 1,
                    error = %err,
                    "generator request failed"
                );
                return Err(err);
            }
        }
    }
}
