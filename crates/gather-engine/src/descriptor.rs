//! The compiled call descriptor handed to the external grouping engine.

use crate::bridge::CallbackAddr;

/// Entry-point addresses for one user-defined spec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UdfCallbacks {
    /// Decomposable: three-phase protocol.
    Regular {
        update: CallbackAddr,
        combine: CallbackAddr,
        eval: CallbackAddr,
    },
    /// Non-decomposable: one sequential pass per materialized group.
    General { general: CallbackAddr },
}

/// Everything the external engine needs to drive a compiled operator.
///
/// `function_type_codes` carries one aggregate-kind code per output spec plus
/// the `0` terminal sentinel. `output_offsets` delimits, per spec, how many
/// native output sub-columns it produces (a multi-accumulator UDF exposes its
/// accumulator columns after the result column); `accumulator_counts` lists
/// the accumulator arity of each UDF spec.
#[derive(Clone, Debug)]
pub struct CallDescriptor {
    pub function_type_codes: Vec<i32>,
    pub output_offsets: Vec<i32>,
    pub accumulator_counts: Vec<i32>,
    pub udf_callbacks: Vec<UdfCallbacks>,
    pub n_keys: usize,
    pub num_shuffle_keys: usize,
    pub drop_na_keys: bool,
    pub return_key: bool,
    pub keep_original_index: bool,
    /// Live input column indices (post-pruning) for the table interchange.
    pub live_in_inds: Vec<usize>,
    /// Live output spec indices (post-pruning).
    pub live_out_inds: Vec<usize>,
    /// Total output row count, filled in by the engine after execution.
    pub total_rows: Option<usize>,
}

impl CallDescriptor {
    pub fn n_specs(&self) -> usize {
        // Exclude the terminal sentinel.
        self.function_type_codes.len().saturating_sub(1)
    }
}
