//! Events reported to external observers.
//!
//! Components never talk to a global bus. Each one is handed an
//! [`EventSink`] at construction and reports every externally visible
//! transition through it.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::engine::PlanId;
use crate::orchestrator::RequestId;
use crate::schema::ActionKind;
use crate::translator::CommandId;
use crate::world::UnitId;

/// Direct command dispatched to one unit as part of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchedCommand {
    /// Addressed unit.
    pub unit: UnitId,
    /// Translator-assigned id.
    pub command: CommandId,
    /// Action performed.
    pub action: ActionKind,
    /// Speech line, possibly empty.
    pub speech: String,
}

/// Plan handed to the engine as part of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    /// Owning unit.
    pub unit: UnitId,
    /// Plan identifier.
    pub plan: PlanId,
    /// Number of steps.
    pub steps: usize,
}

/// Everything the pipeline reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CommandEvent {
    /// A command was accepted and sent to the generator.
    ProcessingStarted {
        /// Request identifier.
        request: RequestId,
        /// Addressed units.
        units: Vec<UnitId>,
        /// Command text.
        text: String,
    },
    /// The generator's reply for a current request is being handled.
    ProcessingFinished {
        /// Request identifier.
        request: RequestId,
    },
    /// Direct commands from a reply were executed.
    CommandProcessed {
        /// Request identifier.
        request: RequestId,
        /// One entry per dispatched command.
        commands: Vec<DispatchedCommand>,
        /// Generator's message to the player.
        message: String,
    },
    /// Plans from a reply were handed to the engine.
    PlanProcessed {
        /// Request identifier.
        request: RequestId,
        /// One entry per started plan.
        plans: Vec<PlanSummary>,
        /// Generator's message to the player.
        message: String,
    },
    /// A request or a single direct command failed.
    CommandFailed {
        /// Request, when the failure concerns a whole reply.
        request: Option<RequestId>,
        /// Command, when a single direct command failed.
        command: Option<CommandId>,
        /// Rendered error.
        error: String,
    },
    /// A direct command's capability call succeeded.
    CommandExecuted {
        /// Command identifier.
        command: CommandId,
        /// Addressed unit.
        unit: UnitId,
        /// Action performed.
        action: ActionKind,
    },
    /// A plan became active.
    PlanStarted {
        /// Owning unit.
        unit: UnitId,
        /// Plan identifier.
        plan: PlanId,
        /// Number of steps.
        steps: usize,
    },
    /// A step's trigger was evaluated.
    TriggerEvaluated {
        /// Owning unit.
        unit: UnitId,
        /// Plan identifier.
        plan: PlanId,
        /// Step index.
        step: usize,
        /// Trigger source text.
        expr: String,
        /// Evaluation result.
        result: bool,
    },
    /// A step's capability call was issued successfully.
    StepExecuted {
        /// Owning unit.
        unit: UnitId,
        /// Plan identifier.
        plan: PlanId,
        /// Step index.
        step: usize,
        /// Action performed.
        action: ActionKind,
        /// Speech line, possibly empty.
        speech: String,
    },
    /// A step's capability call failed.
    StepFailed {
        /// Owning unit.
        unit: UnitId,
        /// Plan identifier.
        plan: PlanId,
        /// Step index.
        step: usize,
        /// Rendered error.
        error: String,
    },
    /// A plan ran to the end or failed.
    PlanCompleted {
        /// Owning unit.
        unit: UnitId,
        /// Plan identifier.
        plan: PlanId,
        /// Whether every step completed.
        success: bool,
    },
    /// A plan was stopped before finishing.
    PlanInterrupted {
        /// Owning unit.
        unit: UnitId,
        /// Plan identifier.
        plan: PlanId,
        /// Why it was stopped.
        reason: String,
    },
}

impl CommandEvent {
    /// Snake-case event name.
    pub fn name(&self) -> &'static str {
        match self {
            CommandEvent::ProcessingStarted { .. } => "processing_started",
            CommandEvent::ProcessingFinished { .. } => "processing_finished",
            CommandEvent::CommandProcessed { .. } => "command_processed",
            CommandEvent::PlanProcessed { .. } => "plan_processed",
            CommandEvent::CommandFailed { .. } => "command_failed",
            CommandEvent::CommandExecuted { .. } => "command_executed",
            CommandEvent::PlanStarted { .. } => "plan_started",
            CommandEvent::TriggerEvaluated { .. } => "trigger_evaluated",
            CommandEvent::StepExecuted { .. } => "step_executed",
            CommandEvent::StepFailed { .. } => "step_failed",
            CommandEvent::PlanCompleted { .. } => "plan_completed",
            CommandEvent::PlanInterrupted { .. } => "plan_interrupted",
        }
    }

    /// Unit the event concerns, if it concerns exactly one.
    pub fn unit(&self) -> Option<UnitId> {
        match self {
            CommandEvent::CommandExecuted { unit, .. }
            | CommandEvent::PlanStarted { unit, .. }
            | CommandEvent::TriggerEvaluated { unit, .. }
            | CommandEvent::StepExecuted { unit, .. }
            | CommandEvent::StepFailed { unit, .. }
            | CommandEvent::PlanCompleted { unit, .. }
            | CommandEvent::PlanInterrupted { unit, .. } => Some(*unit),
            _ => None,
        }
    }
}

/// Receiver of pipeline events.
pub trait EventSink: Send + Sync {
    /// Deliver one event. Must not block.
    fn emit(&self, event: CommandEvent);
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<CommandEvent>>,
}

impl RecordingSink {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn events(&self) -> Vec<CommandEvent> {
        self.events.lock().clone()
    }

    /// Drain the recorded events.
    pub fn take(&self) -> Vec<CommandEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Names of the recorded events, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(CommandEvent::name).collect()
    }

    /// Number of recorded events named `name`.
    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|event| event.name() == name).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: CommandEvent) {
        self.events.lock().push(event);
    }
}

/// Forwards events into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<CommandEvent>,
}

impl ChannelSink {
    /// Sink and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CommandEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: CommandEvent) {
        if self.tx.send(event).is_err() {
            warn!("event receiver dropped");
        }
    }
}

/// Logs every event at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: CommandEvent) {
        let name = event.name();
        match serde_json::to_string(&event) {
            Ok(payload) => info!(event = name, %payload, "pipeline event"),
            Err(err) => warn!(event = name, error = %err, "failed to encode event"),
        }
    }
}

/// Delivers every event to several sinks in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<std::sync::Arc<dyn EventSink>>,
}

impl FanoutSink {
    /// Fan out to `sinks`.
    pub fn new(sinks: Vec<std::sync::Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: CommandEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn completed(success: bool) -> CommandEvent {
        CommandEvent::PlanCompleted {
            unit: UnitId(3),
            plan: PlanId::new(),
            success,
        }
    }

    #[test]
    fn events_serialize_with_snake_case_tag() {
        let value = serde_json::to_value(completed(true)).unwrap();
        assert_eq!(value["event"], "plan_completed");
        assert_eq!(value["unit"], 3);
        assert_eq!(completed(false).unit(), Some(UnitId(3)));
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let a = Arc::new(RecordingSink::new());
        let b = Arc::new(RecordingSink::new());
        let fanout = FanoutSink::new(vec![a.clone(), b.clone()]);
        fanout.emit(completed(true));
        assert_eq!(a.names(), vec!["plan_completed"]);
        assert_eq!(b.count("plan_completed"), 1);
        assert_eq!(a.take().len(), 1);
        assert!(a.events().is_empty());
    }

    #[test]
    fn channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(completed(false));
        assert_eq!(rx.try_recv().unwrap().name(), "plan_completed");
    }
}
