use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Live game-state variables a trigger may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variable {
    /// Health of the plan's unit, 0–100.
    HealthPct,
    /// Distance to the nearest living hostile unit.
    EnemyDist,
    /// Distance to the nearest living friendly unit.
    AllyDist,
    /// Seconds elapsed since the plan started.
    Time,
    /// Number of hostiles within awareness range.
    EnemyCount,
    /// Number of friendlies within awareness range.
    AllyCount,
}

impl Variable {
    /// Every variable in the vocabulary, in declaration order.
    pub const ALL: [Variable; 6] = [
        Variable::HealthPct,
        Variable::EnemyDist,
        Variable::AllyDist,
        Variable::Time,
        Variable::EnemyCount,
        Variable::AllyCount,
    ];

    /// Name used in trigger source text.
    pub fn name(self) -> &'static str {
        match self {
            Variable::HealthPct => "health_pct",
            Variable::EnemyDist => "enemy_dist",
            Variable::AllyDist => "ally_dist",
            Variable::Time => "time",
            Variable::EnemyCount => "enemy_count",
            Variable::AllyCount => "ally_count",
        }
    }
}

impl FromStr for Variable {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Variable::ALL
            .into_iter()
            .find(|var| var.name() == s)
            .ok_or(())
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Comparison operator between a variable and a literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `>=`
    Ge,
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

impl CompareOp {
    /// Apply the operator to a resolved left operand and the literal.
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Lt => lhs < rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
        }
    }

    /// Source-text symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::Le => "<=",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }
}

/// Boolean combinator joining two clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Combinator {
    /// Both sides must hold.
    And,
    /// At least one side must hold.
    Or,
}

/// A single `<var> <op> <number>` clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// Variable resolved against the execution context.
    pub variable: Variable,
    /// Operator applied to the resolved value.
    pub op: CompareOp,
    /// Numeric literal on the right-hand side.
    pub value: f64,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.variable, self.op.symbol(), self.value)
    }
}

/// Compiled trigger expression.
///
/// Clauses are combined strictly in textual order: `a OR b AND c` means
/// `(a OR b) AND c`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TriggerAst {
    /// Empty source text; always satisfied.
    Always,
    /// One or more clauses chained left to right.
    Chain {
        /// First clause.
        head: Comparison,
        /// Remaining clauses with the combinator that precedes each.
        tail: Vec<(Combinator, Comparison)>,
    },
}

impl TriggerAst {
    /// Iterate over every clause in textual order.
    pub fn comparisons(&self) -> impl Iterator<Item = &Comparison> {
        let (head, tail) = match self {
            TriggerAst::Always => (None, &[][..]),
            TriggerAst::Chain { head, tail } => (Some(head), tail.as_slice()),
        };
        head.into_iter().chain(tail.iter().map(|(_, cmp)| cmp))
    }
}
