//! Validation of generated plans and commands
//!
//! Everything the generator returns passes through [`Validator`] before it can
//! reach the engine or the translator. Validation is all-or-nothing: a single
//! bad step rejects the whole plan and nothing is created.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::action::{ActionDescriptor, ActionKind, Archetype};
use crate::error::SchemaValidationError;
use crate::trigger::{self, Trigger};

/// Default upper bound on steps in one plan.
pub const DEFAULT_MAX_STEPS_PER_PLAN: usize = 10;

type ValidationResult<T> = Result<T, SchemaValidationError>;

/// Checks generated JSON against the action schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validator {
    max_steps: usize,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STEPS_PER_PLAN)
    }
}

impl Validator {
    /// Validator accepting plans of at most `max_steps` steps.
    pub fn new(max_steps: usize) -> Self {
        Self { max_steps }
    }

    /// Configured step limit.
    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Validate a plan object `{"steps": [...]}` independent of archetype.
    ///
    /// Checks the step count, the presence and type of every required field,
    /// that every action is known to some archetype, and that every trigger
    /// compiles.
    pub fn validate_plan(&self, plan: &Value) -> ValidationResult<Vec<ActionDescriptor>> {
        let plan = as_object(plan, "plan")?;
        let steps = match plan.get("steps") {
            None | Some(Value::Null) => {
                return Err(SchemaValidationError::MissingField("steps".into()));
            }
            Some(Value::Array(steps)) => steps,
            Some(_) => return Err(invalid("steps", "an array")),
        };

        if steps.is_empty() {
            return Err(SchemaValidationError::EmptyPlan);
        }
        if steps.len() > self.max_steps {
            debug!(count = steps.len(), max = self.max_steps, "plan rejected: too many steps");
            return Err(SchemaValidationError::TooManySteps {
                count: steps.len(),
                max: self.max_steps,
            });
        }

        steps
            .iter()
            .enumerate()
            .map(|(index, step)| parse_step(step, &format!("steps[{index}]")))
            .collect()
    }

    /// Check that `action` names an action `archetype` may perform and that
    /// its `params` is an object.
    pub fn validate_action(
        &self,
        action: &Value,
        archetype: Archetype,
    ) -> ValidationResult<ActionKind> {
        let object = as_object(action, "action")?;
        let kind = parse_kind(object, "action")?;
        if !archetype.allows(kind) {
            return Err(SchemaValidationError::ActionNotAllowed {
                action: kind,
                archetype,
            });
        }
        match object.get("params") {
            None => Err(SchemaValidationError::MissingField("params".into())),
            Some(Value::Object(_)) => Ok(kind),
            Some(_) => Err(invalid("params", "an object")),
        }
    }

    /// [`validate_plan`](Self::validate_plan) followed by an allow-list check
    /// of every step for `archetype`.
    pub fn validate_plan_for(
        &self,
        plan: &Value,
        archetype: Archetype,
    ) -> ValidationResult<Vec<ActionDescriptor>> {
        let steps = self.validate_plan(plan)?;
        for step in &steps {
            if !archetype.allows(step.kind) {
                return Err(SchemaValidationError::ActionNotAllowed {
                    action: step.kind,
                    archetype,
                });
            }
        }
        Ok(steps)
    }

    /// Validate a direct command for `archetype`.
    ///
    /// Direct commands have `action`, `params` and `speech`; they carry no
    /// trigger and no duration.
    pub fn validate_command(
        &self,
        command: &Value,
        archetype: Archetype,
    ) -> ValidationResult<ActionDescriptor> {
        let kind = self.validate_action(command, archetype)?;
        let object = as_object(command, "command")?;
        let params = parse_params(object, "command")?;
        let speech = parse_speech(object, "command")?;
        Ok(ActionDescriptor {
            kind,
            params,
            trigger: Trigger::always(),
            speech,
            duration_ms: 0,
        })
    }
}

/// Boolean view of a validation outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Whether validation passed.
    pub valid: bool,
    /// Rendered error when it did not.
    pub error: Option<String>,
}

impl ValidationReport {
    /// Summarize `result`.
    pub fn from_result<T>(result: &ValidationResult<T>) -> Self {
        match result {
            Ok(_) => Self {
                valid: true,
                error: None,
            },
            Err(err) => Self {
                valid: false,
                error: Some(err.to_string()),
            },
        }
    }
}

fn parse_step(step: &Value, path: &str) -> ValidationResult<ActionDescriptor> {
    let object = as_object(step, path)?;
    let kind = parse_kind(object, path)?;
    let params = parse_params(object, path)?;

    let trigger_path = format!("{path}.trigger");
    let trigger = match object.get("trigger") {
        None => return Err(SchemaValidationError::MissingField(trigger_path)),
        Some(Value::String(source)) => {
            trigger::compile(source).map_err(|source| SchemaValidationError::InvalidTrigger {
                field: trigger_path,
                source,
            })?
        }
        Some(_) => return Err(invalid(&trigger_path, "a string")),
    };

    let speech = parse_speech(object, path)?;

    let duration_path = format!("{path}.duration_ms");
    let duration_ms = match object.get("duration_ms") {
        None => return Err(SchemaValidationError::MissingField(duration_path)),
        Some(value) => parse_duration(value)
            .ok_or_else(|| invalid(&duration_path, "a non-negative number"))?,
    };

    Ok(ActionDescriptor {
        kind,
        params,
        trigger,
        speech,
        duration_ms,
    })
}

fn parse_kind(object: &Map<String, Value>, path: &str) -> ValidationResult<ActionKind> {
    match object.get("action") {
        None => Err(SchemaValidationError::MissingField(format!("{path}.action"))),
        Some(Value::String(name)) => name
            .parse()
            .map_err(|()| SchemaValidationError::UnknownAction(name.clone())),
        Some(_) => Err(invalid(&format!("{path}.action"), "a string")),
    }
}

/// Copy `params`, dropping the explicit nulls strict output schemas produce.
fn parse_params(object: &Map<String, Value>, path: &str) -> ValidationResult<Map<String, Value>> {
    match object.get("params") {
        None => Err(SchemaValidationError::MissingField(format!("{path}.params"))),
        Some(Value::Object(params)) => Ok(params
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()),
        Some(_) => Err(invalid(&format!("{path}.params"), "an object")),
    }
}

fn parse_speech(object: &Map<String, Value>, path: &str) -> ValidationResult<String> {
    match object.get("speech") {
        None => Err(SchemaValidationError::MissingField(format!("{path}.speech"))),
        Some(Value::String(speech)) => Ok(speech.clone()),
        Some(_) => Err(invalid(&format!("{path}.speech"), "a string")),
    }
}

fn parse_duration(value: &Value) -> Option<u64> {
    if let Some(ms) = value.as_u64() {
        return Some(ms);
    }
    let ms = value.as_f64()?;
    (ms.is_finite() && ms >= 0.0).then(|| ms.round() as u64)
}

fn as_object<'v>(value: &'v Value, path: &str) -> ValidationResult<&'v Map<String, Value>> {
    value.as_object().ok_or_else(|| invalid(path, "an object"))
}

fn invalid(field: &str, expected: &'static str) -> SchemaValidationError {
    SchemaValidationError::InvalidField {
        field: field.to_string(),
        expected,
    }
}
