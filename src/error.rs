//! Error types for the orchestration pipeline
//!
//! Every layer has its own thiserror enum. Configuration loading and the CLI
//! use anyhow on top of these.

use thiserror::Error;

use crate::schema::{ActionKind, Archetype};
use crate::world::{CapabilityError, UnitId};

pub use crate::trigger::CompileError;

/// Reasons generated content is rejected before anything executes
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaValidationError {
    /// Action name is not known to any archetype
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// Action exists but this archetype may not perform it
    #[error("action {action} is not allowed for {archetype}")]
    ActionNotAllowed {
        /// Requested action
        action: ActionKind,
        /// Archetype of the addressed unit
        archetype: Archetype,
    },

    /// Plan contains no steps
    #[error("plan has no steps")]
    EmptyPlan,

    /// Plan is longer than the configured maximum
    #[error("plan has {count} steps, at most {max} allowed")]
    TooManySteps {
        /// Steps in the rejected plan
        count: usize,
        /// Configured maximum
        max: usize,
    },

    /// A required field is absent
    #[error("missing field: {0}")]
    MissingField(String),

    /// A field has the wrong JSON type or an out-of-range value
    #[error("field {field} must be {expected}")]
    InvalidField {
        /// Path of the field, e.g. `steps[2].duration_ms`
        field: String,
        /// Description of what was expected
        expected: &'static str,
    },

    /// Trigger text does not compile
    #[error("invalid trigger in {field}: {source}")]
    InvalidTrigger {
        /// Path of the trigger field
        field: String,
        /// Compiler diagnostic
        #[source]
        source: CompileError,
    },

    /// Response names a unit that was not addressed by the command
    #[error("response addresses unit {0}, which was not selected")]
    UnknownUnit(UnitId),

    /// Response does not have the expected top-level shape
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Failures talking to the external generator
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExternalServiceError {
    /// No reply within the per-attempt timeout
    #[error("timeout")]
    Timeout,

    /// Connection-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("service returned status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// Reply content is not JSON
    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    /// The generator explicitly declined the command
    #[error("{0}")]
    Refused(String),
}

impl ExternalServiceError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExternalServiceError::Refused(_))
    }
}

/// Failures while performing an action on a unit
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionExecutionError {
    /// Addressed unit does not exist
    #[error("unit {0} not found")]
    UnitNotFound(UnitId),

    /// Addressed unit is dead
    #[error("unit {0} is destroyed")]
    UnitDestroyed(UnitId),

    /// Parameters could not be turned into a capability call
    #[error("{action}: {message}")]
    InvalidParams {
        /// Action being dispatched
        action: ActionKind,
        /// What was wrong
        message: String,
    },

    /// The unit reported a failure
    #[error("{action} failed on unit {unit}: {source}")]
    Capability {
        /// Unit that was commanded
        unit: UnitId,
        /// Action being dispatched
        action: ActionKind,
        /// Failure reported by the unit
        #[source]
        source: CapabilityError,
    },
}

/// Problems with a command before it is sent anywhere
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestratorError {
    /// Command text is blank
    #[error("command text is empty")]
    EmptyCommand,

    /// No units were addressed
    #[error("no units selected")]
    EmptySelection,

    /// An addressed unit is not in the snapshot
    #[error("unit {0} is not in the world snapshot")]
    UnitNotInSnapshot(UnitId),

    /// Orchestrator was built outside a tokio runtime
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),
}
