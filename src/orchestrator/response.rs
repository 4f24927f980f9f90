//! Parsing and validation of generator replies.
//!
//! A reply is first parsed into a [`StructuredResponse`] and then validated
//! as a whole for the addressed units. Nothing is routed unless every entry
//! passes.

use serde_json::Value;
use std::collections::HashSet;

use crate::engine::ValidatedPlan;
use crate::error::{ExternalServiceError, SchemaValidationError};
use crate::schema::{ActionDescriptor, Archetype, SchemaVariant, Validator};
use crate::world::UnitId;

/// Top-level reply shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredResponse {
    /// Immediate actions.
    DirectCommandSet {
        /// Raw command objects.
        commands: Vec<Value>,
        /// Message for the player.
        message: String,
    },
    /// Conditional multi-step plans.
    MultiStepPlanSet {
        /// Raw plan objects.
        plans: Vec<Value>,
        /// Message for the player.
        message: String,
    },
    /// The generator declined.
    Error(String),
}

/// A reply whose every entry passed validation, keyed by unit.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedResponse {
    /// Direct commands in reply order.
    Commands {
        /// `(unit, command)` pairs.
        commands: Vec<(UnitId, ActionDescriptor)>,
        /// Message for the player.
        message: String,
    },
    /// One plan per unit.
    Plans {
        /// `(unit, plan)` pairs.
        plans: Vec<(UnitId, ValidatedPlan)>,
        /// Message for the player.
        message: String,
    },
}

/// Parse reply text into JSON, tolerating code fences or prose around the
/// object.
pub fn parse_json(content: &str) -> Result<Value, ExternalServiceError> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }
    let candidate = extract_json(trimmed).ok_or_else(|| {
        ExternalServiceError::MalformedJson("reply contains no JSON object".into())
    })?;
    serde_json::from_str(candidate)
        .map_err(|err| ExternalServiceError::MalformedJson(err.to_string()))
}

fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Classify a parsed reply.
pub fn classify(value: Value) -> Result<StructuredResponse, SchemaValidationError> {
    let Value::Object(mut root) = value else {
        return Err(SchemaValidationError::MalformedResponse("reply is not an object".into()));
    };

    // A blank error is what strict schemas produce for "no error".
    let error = root.get("error").and_then(Value::as_str).map(str::trim);
    if let Some(error) = error.filter(|error| !error.is_empty()) {
        return Ok(StructuredResponse::Error(error.to_string()));
    }

    let message = match root.remove("message") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(message)) => message,
        Some(_) => {
            return Err(SchemaValidationError::InvalidField {
                field: "message".into(),
                expected: "a string",
            });
        }
    };

    let commands = take_entries(&mut root, "commands")?;
    let plans = take_entries(&mut root, "plans")?;
    match (commands, plans) {
        (Some(commands), None) => Ok(StructuredResponse::DirectCommandSet { commands, message }),
        (None, Some(plans)) => Ok(StructuredResponse::MultiStepPlanSet { plans, message }),
        (Some(_), Some(_)) => Err(SchemaValidationError::MalformedResponse(
            "reply contains both commands and plans".into(),
        )),
        (None, None) => Err(SchemaValidationError::MalformedResponse(
            "reply contains neither commands nor plans".into(),
        )),
    }
}

/// Remove `key`, treating null and an empty array as absent.
fn take_entries(
    root: &mut serde_json::Map<String, Value>,
    key: &str,
) -> Result<Option<Vec<Value>>, SchemaValidationError> {
    match root.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(entries)) if entries.is_empty() => Ok(None),
        Some(Value::Array(entries)) => Ok(Some(entries)),
        Some(_) => Err(SchemaValidationError::InvalidField {
            field: key.to_string(),
            expected: "an array or null",
        }),
    }
}

/// Validate every entry of `response` for `units`, the addressed units with
/// their archetypes.
///
/// In the group variant each entry names its `unit_id`; in the individual
/// variant each command, and the single plan, applies to every unit.
pub fn validate(
    response: StructuredResponse,
    variant: SchemaVariant,
    units: &[(UnitId, Archetype)],
    validator: &Validator,
) -> Result<ValidatedResponse, SchemaValidationError> {
    match response {
        StructuredResponse::Error(reason) => Err(SchemaValidationError::MalformedResponse(format!(
            "generator declined: {reason}"
        ))),
        StructuredResponse::DirectCommandSet { commands, message } => {
            let mut validated = Vec::new();
            for command in &commands {
                for (unit, archetype) in targets(command, variant, units)? {
                    validated.push((unit, validator.validate_command(command, archetype)?));
                }
            }
            Ok(ValidatedResponse::Commands {
                commands: validated,
                message,
            })
        }
        StructuredResponse::MultiStepPlanSet { plans, message } => {
            if variant == SchemaVariant::Individual && plans.len() > 1 {
                return Err(SchemaValidationError::MalformedResponse(format!(
                    "expected one plan, got {}",
                    plans.len()
                )));
            }
            let mut seen = HashSet::new();
            let mut validated = Vec::new();
            for plan in &plans {
                for (unit, archetype) in targets(plan, variant, units)? {
                    if !seen.insert(unit) {
                        return Err(SchemaValidationError::MalformedResponse(format!(
                            "more than one plan for unit {unit}"
                        )));
                    }
                    validated.push((unit, ValidatedPlan::from_json(validator, plan, archetype)?));
                }
            }
            Ok(ValidatedResponse::Plans {
                plans: validated,
                message,
            })
        }
    }
}

/// Units an entry applies to.
fn targets(
    entry: &Value,
    variant: SchemaVariant,
    units: &[(UnitId, Archetype)],
) -> Result<Vec<(UnitId, Archetype)>, SchemaValidationError> {
    match variant {
        SchemaVariant::Individual => Ok(units.to_vec()),
        SchemaVariant::Group => {
            let id = match entry.get("unit_id") {
                None | Some(Value::Null) => {
                    return Err(SchemaValidationError::MissingField("unit_id".into()));
                }
                Some(value) => value
                    .as_u64()
                    .map(UnitId)
                    .ok_or(SchemaValidationError::InvalidField {
                        field: "unit_id".into(),
                        expected: "a unit id",
                    })?,
            };
            units
                .iter()
                .find(|(unit, _)| *unit == id)
                .map(|target| vec![*target])
                .ok_or(SchemaValidationError::UnknownUnit(id))
        }
    }
}
