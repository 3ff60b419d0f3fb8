//! User reduction functions and the decomposition compiler.
//!
//! A user reduction is decomposable when it can be expressed as
//! `(init, update, combine, eval)` over a fixed, finite set of scalar
//! accumulators, each updated through a recognized associative-commutative
//! fold. Decomposition runs over a small constrained DSL
//! ([`ReduceScript`]) rather than arbitrary imperative code; users who want
//! full control implement the narrow [`Reduction`] interface directly.
//!
//! A script that fails decomposition runs in general mode (one sequential
//! pass per fully-materialized group, no combine step) only when the caller
//! supplied a general callable; there is no silent fallback.

use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Accumulator row for one group. Four slots cover every built-in program.
pub type AccRow = SmallVec<[f64; 4]>;

/// The narrow reduction interface the engine compiles against.
///
/// `update` and `combine` must be order-independent: the driver folds rows
/// in partition-local arrival order and merges partials in partition order,
/// and the result may not depend on either.
pub trait Reduction: Send + Sync {
    fn n_accumulators(&self) -> usize;

    /// Identity element per accumulator.
    fn init(&self) -> AccRow;

    /// Fold one input row into the accumulator row. `row` is the row's
    /// original position (used by position-tracking reductions).
    fn update(&self, acc: &mut [f64], value: f64, row: i64);

    /// Merge another partial accumulator row for the same group, using the
    /// same idiom as `update`.
    fn combine(&self, acc: &mut [f64], other: &[f64]);

    /// Map the finished accumulator row to the output value; `None` is null.
    fn eval(&self, acc: &[f64]) -> Option<f64>;
}

/// Per-group callable for non-decomposable reductions. Receives the group's
/// values (skip-na already applied) in group-local row order.
pub type GeneralFn = Arc<dyn Fn(&[f64]) -> Option<f64> + Send + Sync>;

/// A pure term over one input value.
#[derive(Clone, Debug, PartialEq)]
pub enum Term {
    Input,
    Const(f64),
    Add(Box<Term>, Box<Term>),
    Sub(Box<Term>, Box<Term>),
    Mul(Box<Term>, Box<Term>),
    Div(Box<Term>, Box<Term>),
    Neg(Box<Term>),
}

impl Term {
    pub fn add(a: Term, b: Term) -> Term {
        Term::Add(Box::new(a), Box::new(b))
    }

    pub fn mul(a: Term, b: Term) -> Term {
        Term::Mul(Box::new(a), Box::new(b))
    }

    fn eval(&self, x: f64) -> f64 {
        match self {
            Term::Input => x,
            Term::Const(c) => *c,
            Term::Add(a, b) => a.eval(x) + b.eval(x),
            Term::Sub(a, b) => a.eval(x) - b.eval(x),
            Term::Mul(a, b) => a.eval(x) * b.eval(x),
            Term::Div(a, b) => a.eval(x) / b.eval(x),
            Term::Neg(a) => -a.eval(x),
        }
    }
}

/// How an accumulator absorbs one term per row.
///
/// `Add`, `Mul`, `Min` and `Max` are the recognized associative-commutative
/// idioms; `Replace` (overwrite with the newest term) is expressible but
/// order-dependent and therefore not decomposable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fold {
    Add,
    Mul,
    Min,
    Max,
    Replace,
}

impl Fold {
    /// Identity element. `Min`/`Max` use NaN as the "nothing folded yet"
    /// state, which `f64::min`/`f64::max` absorb on first contact.
    fn identity(self) -> f64 {
        match self {
            Fold::Add => 0.0,
            Fold::Mul => 1.0,
            Fold::Min | Fold::Max | Fold::Replace => f64::NAN,
        }
    }

    fn apply(self, acc: f64, term: f64) -> f64 {
        match self {
            Fold::Add => acc + term,
            Fold::Mul => acc * term,
            Fold::Min => acc.min(term),
            Fold::Max => acc.max(term),
            Fold::Replace => term,
        }
    }
}

/// One scripted accumulator: a fold idiom applied to a term of the input.
#[derive(Clone, Debug)]
pub struct Accumulator {
    pub fold: Fold,
    pub term: Term,
}

/// Expression over the finished accumulators producing the output value.
#[derive(Clone, Debug)]
pub enum EvalExpr {
    Acc(usize),
    Const(f64),
    Add(Box<EvalExpr>, Box<EvalExpr>),
    Sub(Box<EvalExpr>, Box<EvalExpr>),
    Mul(Box<EvalExpr>, Box<EvalExpr>),
    Div(Box<EvalExpr>, Box<EvalExpr>),
    Sqrt(Box<EvalExpr>),
}

impl EvalExpr {
    pub fn div(a: EvalExpr, b: EvalExpr) -> EvalExpr {
        EvalExpr::Div(Box::new(a), Box::new(b))
    }

    fn eval(&self, acc: &[f64]) -> f64 {
        match self {
            EvalExpr::Acc(i) => acc[*i],
            EvalExpr::Const(c) => *c,
            EvalExpr::Add(a, b) => a.eval(acc) + b.eval(acc),
            EvalExpr::Sub(a, b) => a.eval(acc) - b.eval(acc),
            EvalExpr::Mul(a, b) => a.eval(acc) * b.eval(acc),
            EvalExpr::Div(a, b) => a.eval(acc) / b.eval(acc),
            EvalExpr::Sqrt(a) => a.eval(acc).sqrt(),
        }
    }

    fn max_acc_index(&self) -> Option<usize> {
        match self {
            EvalExpr::Acc(i) => Some(*i),
            EvalExpr::Const(_) => None,
            EvalExpr::Add(a, b)
            | EvalExpr::Sub(a, b)
            | EvalExpr::Mul(a, b)
            | EvalExpr::Div(a, b) => a.max_acc_index().max(b.max_acc_index()),
            EvalExpr::Sqrt(a) => a.max_acc_index(),
        }
    }
}

/// A user reduction in the constrained DSL: a fixed accumulator list plus an
/// eval expression over the finished accumulators.
#[derive(Clone, Debug)]
pub struct ReduceScript {
    pub name: String,
    pub accumulators: Vec<Accumulator>,
    pub eval: EvalExpr,
}

/// A decomposed script: implements [`Reduction`] by interpreting the
/// recognized folds, with `combine` reusing the exact idiom `update` used.
#[derive(Clone, Debug)]
pub struct ScriptReduction {
    script: ReduceScript,
}

impl ScriptReduction {
    pub fn name(&self) -> &str {
        &self.script.name
    }
}

impl Reduction for ScriptReduction {
    fn n_accumulators(&self) -> usize {
        self.script.accumulators.len()
    }

    fn init(&self) -> AccRow {
        self.script
            .accumulators
            .iter()
            .map(|a| a.fold.identity())
            .collect()
    }

    fn update(&self, acc: &mut [f64], value: f64, _row: i64) {
        for (slot, a) in acc.iter_mut().zip(&self.script.accumulators) {
            *slot = a.fold.apply(*slot, a.term.eval(value));
        }
    }

    fn combine(&self, acc: &mut [f64], other: &[f64]) {
        for ((slot, a), o) in acc.iter_mut().zip(&self.script.accumulators).zip(other) {
            // Same idiom as update; Min/Max absorb the NaN identity of a
            // partial that never saw a row.
            *slot = a.fold.apply(*slot, *o);
        }
    }

    fn eval(&self, acc: &[f64]) -> Option<f64> {
        let v = self.script.eval.eval(acc);
        (!v.is_nan()).then_some(v)
    }
}

/// Attempt to express a script as `(init, update, combine, eval)`.
///
/// Succeeds when every accumulator is updated through a recognized
/// associative-commutative idiom and the eval expression only reads declared
/// accumulators. The error string names the first offending accumulator.
pub fn decompose(script: &ReduceScript) -> Result<ScriptReduction, String> {
    if script.accumulators.is_empty() {
        return Err("no accumulators".to_string());
    }
    for (i, acc) in script.accumulators.iter().enumerate() {
        if acc.fold == Fold::Replace {
            return Err(format!("accumulator {i} uses an order-dependent update"));
        }
    }
    if let Some(max) = script.eval.max_acc_index() {
        if max >= script.accumulators.len() {
            return Err(format!(
                "eval reads accumulator {max}, but only {} are declared",
                script.accumulators.len()
            ));
        }
    }
    Ok(ScriptReduction {
        script: script.clone(),
    })
}

/// A user-supplied reduction, in one of three forms.
#[derive(Clone)]
pub enum UserFunction {
    /// Script in the reduction DSL, with an optional general-mode fallback
    /// used only when decomposition fails.
    Scripted {
        script: ReduceScript,
        fallback: Option<GeneralFn>,
    },
    /// Direct implementation of the reduction interface.
    Program {
        name: String,
        program: Arc<dyn Reduction>,
    },
    /// Per-group callable; requires colocation, has no combine step.
    General(GeneralFn),
}

impl UserFunction {
    pub fn scripted(script: ReduceScript) -> Self {
        UserFunction::Scripted {
            script,
            fallback: None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            UserFunction::Scripted { script, .. } => &script.name,
            UserFunction::Program { name, .. } => name,
            UserFunction::General(_) => "<general>",
        }
    }
}

impl fmt::Debug for UserFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserFunction::Scripted { script, fallback } => f
                .debug_struct("Scripted")
                .field("script", &script.name)
                .field("fallback", &fallback.is_some())
                .finish(),
            UserFunction::Program { name, .. } => {
                f.debug_struct("Program").field("name", name).finish()
            }
            UserFunction::General(_) => f.write_str("General"),
        }
    }
}
