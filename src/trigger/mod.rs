//! Trigger expressions gating plan steps.
//!
//! A trigger is a short boolean condition such as
//! `health_pct < 20 AND enemy_dist < 15` over a fixed vocabulary of live
//! game-state variables. Triggers are compiled once, when a plan is validated,
//! and the engine evaluates the resulting AST every tick against a freshly
//! built [`ExecutionContext`].

/// Trigger AST definitions.
pub mod ast;
/// Evaluation against live execution contexts.
pub mod eval;
/// Parser for trigger source text.
pub mod parser;

pub use ast::{Combinator, CompareOp, Comparison, TriggerAst, Variable};
pub use eval::{ExecutionContext, StaticContext, evaluate};
pub use parser::parse_trigger;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Errors raised while compiling trigger source text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// The left operand is not part of the vocabulary.
    #[error("unknown trigger variable '{name}' at byte {offset}")]
    UnknownVariable {
        /// Name as written in the source.
        name: String,
        /// Byte offset of the name.
        offset: usize,
    },

    /// The right operand is not a finite number.
    #[error("malformed numeric literal '{literal}' at byte {offset}")]
    MalformedLiteral {
        /// Offending text.
        literal: String,
        /// Byte offset of the literal.
        offset: usize,
    },

    /// Any other structural problem.
    #[error("{message} at byte {offset}")]
    Syntax {
        /// What the parser expected.
        message: String,
        /// Byte offset where parsing stopped.
        offset: usize,
    },
}

/// A compiled trigger together with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    source: String,
    ast: TriggerAst,
}

impl Trigger {
    /// Trigger that is always satisfied.
    pub fn always() -> Self {
        Self {
            source: String::new(),
            ast: TriggerAst::Always,
        }
    }

    /// Source text as supplied to [`compile`].
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Compiled AST.
    pub fn ast(&self) -> &TriggerAst {
        &self.ast
    }

    /// Whether the trigger is unconditional.
    pub fn is_always(&self) -> bool {
        matches!(self.ast, TriggerAst::Always)
    }

    /// Variables referenced by the trigger, deduplicated, in vocabulary order.
    pub fn variables(&self) -> Vec<Variable> {
        let mut vars: Vec<Variable> = self.ast.comparisons().map(|cmp| cmp.variable).collect();
        vars.sort();
        vars.dedup();
        vars
    }

    /// Evaluate against `context`.
    pub fn evaluate(&self, context: &dyn ExecutionContext) -> bool {
        evaluate(&self.ast, context)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_always() {
            f.write_str("<always>")
        } else {
            f.write_str(&self.source)
        }
    }
}

impl Serialize for Trigger {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Trigger {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        compile(&source).map_err(serde::de::Error::custom)
    }
}

/// Compile trigger source text.
pub fn compile(source: &str) -> Result<Trigger, CompileError> {
    let ast = parse_trigger(source)?;
    Ok(Trigger {
        source: source.trim().to_string(),
        ast,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn health(value: f64) -> StaticContext {
        StaticContext::new().with(Variable::HealthPct, value)
    }

    #[test]
    fn health_threshold_tracks_live_value() {
        let trigger = compile("health_pct < 20").unwrap();
        assert!(trigger.evaluate(&health(15.0)));
        assert!(!trigger.evaluate(&health(25.0)));
    }

    #[test]
    fn and_requires_both_clauses() {
        let trigger = compile("health_pct < 50 AND enemy_dist < 10").unwrap();
        let both = health(40.0).with(Variable::EnemyDist, 5.0);
        let one = health(40.0).with(Variable::EnemyDist, 20.0);
        let none = health(90.0).with(Variable::EnemyDist, 20.0);
        assert!(trigger.evaluate(&both));
        assert!(!trigger.evaluate(&one));
        assert!(!trigger.evaluate(&none));
    }

    #[test]
    fn or_requires_one_clause() {
        let trigger = compile("health_pct < 50 OR enemy_dist < 10").unwrap();
        assert!(trigger.evaluate(&health(40.0).with(Variable::EnemyDist, 20.0)));
        assert!(trigger.evaluate(&health(90.0).with(Variable::EnemyDist, 5.0)));
        assert!(!trigger.evaluate(&health(90.0).with(Variable::EnemyDist, 20.0)));
    }

    #[test]
    fn mixed_chain_is_left_to_right() {
        // (true OR false) AND false == false; algebraic precedence would give true.
        let trigger = compile("health_pct < 50 OR time > 100 AND enemy_count > 3").unwrap();
        let ctx = health(10.0).with(Variable::Time, 0.0).with(Variable::EnemyCount, 0.0);
        assert!(!trigger.evaluate(&ctx));
    }

    #[test]
    fn empty_trigger_is_always_true() {
        let trigger = compile("").unwrap();
        assert!(trigger.is_always());
        assert!(trigger.evaluate(&StaticContext::new()));
        assert_eq!(trigger.to_string(), "<always>");
    }

    #[test]
    fn context_is_reread_on_every_evaluation() {
        use std::cell::Cell;

        let trigger = compile("health_pct < 20").unwrap();
        let hp = Cell::new(80.0);
        let reads = Cell::new(0);
        let ctx = |_var: Variable| {
            reads.set(reads.get() + 1);
            hp.get()
        };
        assert!(!trigger.evaluate(&ctx));
        hp.set(10.0);
        assert!(trigger.evaluate(&ctx));
        assert_eq!(reads.get(), 2);
    }

    #[test]
    fn variables_are_deduplicated() {
        let trigger = compile("time > 1 AND health_pct < 3 OR time < 9").unwrap();
        assert_eq!(trigger.variables(), vec![Variable::HealthPct, Variable::Time]);
    }

    #[test]
    fn deserializing_compiles() {
        let trigger: Trigger = serde_json::from_str("\"enemy_count >= 2\"").unwrap();
        assert_eq!(trigger.source(), "enemy_count >= 2");
        assert!(serde_json::from_str::<Trigger>("\"morale > 2\"").is_err());
    }

    proptest! {
        #[test]
        fn less_than_matches_float_comparison(
            threshold in -1000i32..1000,
            value in -1000.0f64..1000.0,
        ) {
            let trigger = compile(&format!("health_pct < {threshold}")).unwrap();
            prop_assert_eq!(trigger.evaluate(&health(value)), value < threshold as f64);
        }

        #[test]
        fn arbitrary_text_never_panics(source in "\\PC{0,40}") {
            let _ = compile(&source);
        }
    }
}
