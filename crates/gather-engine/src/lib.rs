//! Compiler and execution engine for grouped aggregation over columnar
//! tables.
//!
//! Given key columns, value columns and a list of aggregate-function specs,
//! the engine compiles a three-phase distributed reduction program (per-row
//! `update` into partition-local accumulators, a `combine` exchange merging
//! partial accumulators for the same logical group across partitions, and a
//! final `eval` into output columns) and executes it over partitioned data,
//! producing one output row per distinct key combination, or one row per
//! input row for the cumulative/window-style kinds.
//!
//! The physical hash grouping and inter-partition transport are external
//! collaborators: the engine consumes per-row group bucket ids
//! ([`PartitionGroups`]) and a [`PartitionExchange`] primitive, and exposes
//! its compiled entry points through a session-owned [`CallbackRegistry`] so
//! the grouping engine can invoke them by address alone.

mod bridge;
mod descriptor;
mod distribution;
mod driver;
mod error;
mod exchange;
mod parallel;
mod programs;
mod prune;
mod reduce;
mod spec;

pub use crate::bridge::{
    CallbackAddr, CallbackEntry, CallbackPhase, CallbackRegistry, CallbackTarget,
};
pub use crate::descriptor::{CallDescriptor, UdfCallbacks};
pub use crate::distribution::{propagate, Distribution, OperatorDistribution};
pub use crate::driver::{CompiledOperator, GroupbySession, OperatorState};
pub use crate::error::{AggError, AggResult};
pub use crate::exchange::{
    build_group_layout, GroupLayout, InProcessExchange, PartialRow, PartitionExchange,
    PartitionGroups, RoutedRow,
};
pub use crate::programs::{builtin_reduction, output_kind, NullPolicy};
pub use crate::prune::prune;
pub use crate::reduce::{
    decompose, AccRow, Accumulator, EvalExpr, Fold, GeneralFn, ReduceScript, Reduction,
    ScriptReduction, Term, UserFunction,
};
pub use crate::spec::{
    AggregateCall, AggregateKind, AggregationOperator, SpecEntry, TransformKind,
};
