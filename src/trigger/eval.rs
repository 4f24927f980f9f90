use std::collections::HashMap;

use super::ast::{Combinator, Comparison, TriggerAst, Variable};

/// Resolves vocabulary variables to their current values.
///
/// Implementations must read live state on every call; the evaluator never
/// caches a resolved value.
pub trait ExecutionContext {
    /// Current value of `variable`.
    fn resolve(&self, variable: Variable) -> f64;
}

impl<F> ExecutionContext for F
where
    F: Fn(Variable) -> f64,
{
    fn resolve(&self, variable: Variable) -> f64 {
        self(variable)
    }
}

/// Fixed variable bindings. Unbound variables resolve to `0.0`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticContext {
    values: HashMap<Variable, f64>,
}

impl StaticContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `variable` to `value`, returning the updated context.
    pub fn with(mut self, variable: Variable, value: f64) -> Self {
        self.values.insert(variable, value);
        self
    }

    /// Bind `variable` to `value` in place.
    pub fn set(&mut self, variable: Variable, value: f64) {
        self.values.insert(variable, value);
    }
}

impl ExecutionContext for StaticContext {
    fn resolve(&self, variable: Variable) -> f64 {
        self.values.get(&variable).copied().unwrap_or(0.0)
    }
}

/// Evaluate a compiled trigger against `context`.
pub fn evaluate(ast: &TriggerAst, context: &dyn ExecutionContext) -> bool {
    match ast {
        TriggerAst::Always => true,
        TriggerAst::Chain { head, tail } => {
            let mut result = check(head, context);
            for (combinator, comparison) in tail {
                result = match combinator {
                    Combinator::And => result && check(comparison, context),
                    Combinator::Or => result || check(comparison, context),
                };
            }
            result
        }
    }
}

fn check(comparison: &Comparison, context: &dyn ExecutionContext) -> bool {
    let lhs = context.resolve(comparison.variable);
    comparison.op.apply(lhs, comparison.value)
}
