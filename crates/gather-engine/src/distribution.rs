//! Parallelization-distribution analysis for operator inputs and outputs.
//!
//! Every table/column carries a three-point tag describing how its rows are
//! spread across worker partitions. Tags merge along dataflow edges with
//! `meet`, which returns the weakest common guarantee; the analysis therefore
//! never claims a stronger distribution than any input actually provides.

/// Distribution tag lattice, ordered by guarantee strength:
/// `Replicated < VariableBlock < FixedBlock`.
///
/// - `Replicated`: every partition holds the full data.
/// - `VariableBlock`: partitioned into one block per partition with
///   partition-dependent row counts (the shape of a group-by output).
/// - `FixedBlock`: partitioned into equal-size blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Distribution {
    Replicated,
    VariableBlock,
    FixedBlock,
}

impl Distribution {
    /// Weakest common guarantee of two tags.
    pub fn meet(self, other: Distribution) -> Distribution {
        self.min(other)
    }
}

/// Tags assigned to one aggregation operator's dataflow edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperatorDistribution {
    /// Tag assigned to every live input.
    pub input: Distribution,
    /// Tag assigned to every live output.
    pub output: Distribution,
}

impl OperatorDistribution {
    /// The operator runs its parallel (multi-partition) protocol only when
    /// both sides are partitioned.
    pub fn is_parallel(&self) -> bool {
        self.input != Distribution::Replicated && self.output != Distribution::Replicated
    }
}

/// Propagate distribution tags through one aggregation operator.
///
/// The input side meets all live input tags, seeded with `FixedBlock`. The
/// output side is clipped to `VariableBlock` (group counts per partition are
/// data-dependent) and then met with any tags already assigned to the
/// outputs. If the outputs collapse to `Replicated`, the inputs are pulled
/// down with them: a replicated result can only be produced from replicated
/// inputs.
pub fn propagate(inputs: &[Distribution], existing_outputs: &[Distribution]) -> OperatorDistribution {
    let mut input = Distribution::FixedBlock;
    for tag in inputs {
        input = input.meet(*tag);
    }

    let mut output = input.meet(Distribution::VariableBlock);
    for tag in existing_outputs {
        output = output.meet(*tag);
    }

    if output != Distribution::VariableBlock {
        input = output;
    }

    OperatorDistribution { input, output }
}
