//! Mapping from validated actions to capability calls.
//!
//! [`dispatch`] is the only place an [`ActionKind`] becomes a call on a
//! [`Unit`]; the plan engine and [`CommandTranslator`] both go through it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ActionExecutionError;
use crate::events::{CommandEvent, EventSink};
use crate::schema::{ActionDescriptor, ActionKind};
use crate::world::{CapabilityError, Position, Unit, UnitId, World};

/// Identifier assigned to each direct command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(pub u64);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd-{}", self.0)
    }
}

type DispatchResult = Result<(), ActionExecutionError>;
type Handler<W> = fn(&mut W, UnitId, &ActionDescriptor) -> DispatchResult;

/// Handler for `kind`. The match is exhaustive so a new action kind cannot
/// be added without deciding how it is performed.
fn handler<W: World>(kind: ActionKind) -> Handler<W> {
    match kind {
        ActionKind::MoveTo => move_to::<W>,
        ActionKind::Attack => attack::<W>,
        ActionKind::Retreat => retreat::<W>,
        ActionKind::Patrol => patrol::<W>,
        ActionKind::SetStance => set_stance::<W>,
        ActionKind::UseAbility => use_ability::<W>,
        ActionKind::Follow => follow::<W>,
        ActionKind::HoldPosition => hold_position::<W>,
        ActionKind::Stealth
        | ActionKind::ActivateShield
        | ActionKind::Overwatch
        | ActionKind::Heal
        | ActionKind::Repair => named_ability::<W>,
    }
}

/// Perform `descriptor` on `unit` with exactly one capability call.
/// `hold_position` is the exception: it sets the stance and then stops in place.
pub fn dispatch<W: World>(
    world: &mut W,
    unit: UnitId,
    descriptor: &ActionDescriptor,
) -> DispatchResult {
    match world.unit(unit) {
        None => return Err(ActionExecutionError::UnitNotFound(unit)),
        Some(u) if u.is_dead() => return Err(ActionExecutionError::UnitDestroyed(unit)),
        Some(_) => {}
    }
    debug!(unit = %unit, action = %descriptor.kind, "dispatching action");
    handler::<W>(descriptor.kind)(world, unit, descriptor)
}

fn move_to<W: World>(world: &mut W, unit: UnitId, descriptor: &ActionDescriptor) -> DispatchResult {
    let position = required_position(descriptor)?;
    call(world, unit, descriptor.kind, |u| u.move_to(position))
}

fn attack<W: World>(world: &mut W, unit: UnitId, descriptor: &ActionDescriptor) -> DispatchResult {
    let target = required_target(descriptor)?;
    let hostile = world
        .hostiles_of(unit)
        .into_iter()
        .any(|(id, _)| id == target);
    if !hostile {
        return Err(invalid_target(unit, descriptor.kind, target));
    }
    call(world, unit, descriptor.kind, |u| u.attack_target(target))
}

fn retreat<W: World>(world: &mut W, unit: UnitId, descriptor: &ActionDescriptor) -> DispatchResult {
    let position = match optional_position(descriptor)? {
        Some(position) => position,
        None => world
            .retreat_point(unit)
            .ok_or(ActionExecutionError::UnitNotFound(unit))?,
    };
    call(world, unit, descriptor.kind, |u| u.retreat(position))
}

fn patrol<W: World>(world: &mut W, unit: UnitId, descriptor: &ActionDescriptor) -> DispatchResult {
    let waypoints = match descriptor.params.get("waypoints") {
        Some(Value::Array(points)) => points
            .iter()
            .map(parse_position)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| bad_params(descriptor.kind, "waypoints must be positions"))?,
        _ => return Err(bad_params(descriptor.kind, "missing waypoints")),
    };
    if waypoints.is_empty() {
        return Err(bad_params(descriptor.kind, "waypoints is empty"));
    }
    call(world, unit, descriptor.kind, |u| u.patrol(&waypoints))
}

fn set_stance<W: World>(
    world: &mut W,
    unit: UnitId,
    descriptor: &ActionDescriptor,
) -> DispatchResult {
    let stance = required_str(descriptor, "stance")?;
    call(world, unit, descriptor.kind, |u| u.set_stance(stance))
}

fn use_ability<W: World>(
    world: &mut W,
    unit: UnitId,
    descriptor: &ActionDescriptor,
) -> DispatchResult {
    let ability = required_str(descriptor, "ability")?;
    call(world, unit, descriptor.kind, |u| u.use_ability(ability))
}

fn follow<W: World>(world: &mut W, unit: UnitId, descriptor: &ActionDescriptor) -> DispatchResult {
    let target = required_target(descriptor)?;
    let destination = match world.unit(target) {
        Some(t) if target != unit && !t.is_dead() => t.position(),
        _ => return Err(invalid_target(unit, descriptor.kind, target)),
    };
    call(world, unit, descriptor.kind, |u| u.move_to(destination))
}

fn hold_position<W: World>(
    world: &mut W,
    unit: UnitId,
    descriptor: &ActionDescriptor,
) -> DispatchResult {
    call(world, unit, descriptor.kind, |u| {
        u.set_stance("hold")?;
        let here = u.position();
        u.move_to(here)
    })
}

fn named_ability<W: World>(
    world: &mut W,
    unit: UnitId,
    descriptor: &ActionDescriptor,
) -> DispatchResult {
    let name = descriptor.kind.name();
    call(world, unit, descriptor.kind, |u| u.use_ability(name))
}

fn call<W, F>(world: &mut W, unit: UnitId, action: ActionKind, f: F) -> DispatchResult
where
    W: World,
    F: FnOnce(&mut W::Unit) -> Result<(), CapabilityError>,
{
    let target = world
        .unit_mut(unit)
        .ok_or(ActionExecutionError::UnitNotFound(unit))?;
    f(target).map_err(|source| ActionExecutionError::Capability { unit, action, source })
}

fn invalid_target(unit: UnitId, action: ActionKind, target: UnitId) -> ActionExecutionError {
    ActionExecutionError::Capability {
        unit,
        action,
        source: CapabilityError::InvalidTarget(target),
    }
}

fn bad_params(action: ActionKind, message: &str) -> ActionExecutionError {
    ActionExecutionError::InvalidParams {
        action,
        message: message.to_string(),
    }
}

fn params(descriptor: &ActionDescriptor) -> &Map<String, Value> {
    &descriptor.params
}

fn required_str<'d>(
    descriptor: &'d ActionDescriptor,
    key: &str,
) -> Result<&'d str, ActionExecutionError> {
    params(descriptor)
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| bad_params(descriptor.kind, &format!("missing {key}")))
}

fn required_target(descriptor: &ActionDescriptor) -> Result<UnitId, ActionExecutionError> {
    params(descriptor)
        .get("target_id")
        .and_then(Value::as_u64)
        .map(UnitId)
        .ok_or_else(|| bad_params(descriptor.kind, "missing target_id"))
}

fn required_position(descriptor: &ActionDescriptor) -> Result<Position, ActionExecutionError> {
    optional_position(descriptor)?.ok_or_else(|| bad_params(descriptor.kind, "missing position"))
}

fn optional_position(
    descriptor: &ActionDescriptor,
) -> Result<Option<Position>, ActionExecutionError> {
    match params(descriptor).get("position") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => parse_position(value)
            .map(Some)
            .ok_or_else(|| bad_params(descriptor.kind, "position must be [x, y] or {x, y}")),
    }
}

/// Accepts `[x, y]` or `{"x": .., "y": ..}`.
fn parse_position(value: &Value) -> Option<Position> {
    match value {
        Value::Array(pair) if pair.len() == 2 => {
            Some(Position::new(pair[0].as_f64()?, pair[1].as_f64()?))
        }
        Value::Object(map) => Some(Position::new(map.get("x")?.as_f64()?, map.get("y")?.as_f64()?)),
        _ => None,
    }
}

/// Executes single validated commands outside of any plan.
pub struct CommandTranslator {
    next_id: u64,
    events: Arc<dyn EventSink>,
}

impl CommandTranslator {
    /// Translator reporting to `events`.
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self { next_id: 1, events }
    }

    /// Perform `descriptor` on `unit`, reporting the outcome as
    /// `command_executed` or `command_failed`.
    pub fn execute_command<W: World>(
        &mut self,
        world: &mut W,
        unit: UnitId,
        descriptor: &ActionDescriptor,
    ) -> CommandId {
        let id = CommandId(self.next_id);
        self.next_id += 1;

        match dispatch(world, unit, descriptor) {
            Ok(()) => {
                debug!(command = %id, unit = %unit, action = %descriptor.kind, "command executed");
                self.events.emit(CommandEvent::CommandExecuted {
                    command: id,
                    unit,
                    action: descriptor.kind,
                });
            }
            Err(err) => {
                warn!(command = %id, unit = %unit, error = %err, "command failed");
                self.events.emit(CommandEvent::CommandFailed {
                    request: None,
                    command: Some(id),
                    error: err.to_string(),
                });
            }
        }
        id
    }
}
