//! Orderly – natural-language unit command orchestration
//!
//! Player orders are sent to an external structured-output generator, and
//! everything it returns is treated as untrusted input:
//! - Replies are parsed and validated against per-archetype action
//!   allow-lists before anything runs
//! - Multi-step plans gate each step on a compiled trigger expression over
//!   live game state
//! - A tick-driven engine runs one plan per unit with supersession,
//!   interruption and a configurable failure policy
//! - Generator calls run asynchronously with concurrency and per-minute
//!   limits, timeouts, retries and a stale-reply guard
//!
//! The host game is reached only through the [`world::Unit`] and
//! [`world::World`] traits.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Deployment configuration.
pub mod config;
/// Plan execution engine.
pub mod engine;
/// Error types.
pub mod error;
/// Events reported to observers.
pub mod events;
/// Command orchestration and generator clients.
pub mod orchestrator;
/// Action vocabulary and validation.
pub mod schema;
/// Direct command execution.
pub mod translator;
/// Trigger expressions.
pub mod trigger;
/// Capability interface to the host game.
pub mod world;

// Re-export key types for convenience
pub use config::Config;
pub use engine::{ExecutionEngine, Plan, PlanState, ValidatedPlan};
pub use events::{CommandEvent, EventSink};
pub use orchestrator::{CommandOrchestrator, GeneratorClient, RequestId};
pub use schema::{ActionDescriptor, ActionKind, Archetype, Validator};
pub use translator::CommandTranslator;
pub use trigger::{Trigger, compile};

/// Current version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
