//! Action vocabulary, validation and generator output schemas.
//!
//! Nothing produced by the external generator is trusted: plans and commands
//! are parsed from raw JSON by the [`Validator`] into [`ActionDescriptor`]s,
//! and only those descriptors can reach the engine or the translator.

/// Action kinds, archetypes and descriptors.
pub mod action;
/// Strict JSON schemas requested from the generator.
pub mod output;
/// JSON validation into descriptors.
pub mod validator;

pub use action::{ActionDescriptor, ActionKind, Archetype};
pub use output::{OutputSchema, SchemaVariant};
pub use validator::{DEFAULT_MAX_STEPS_PER_PLAN, ValidationReport, Validator};
