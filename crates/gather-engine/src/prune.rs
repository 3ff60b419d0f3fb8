//! Column-liveness pruning for aggregation operators.
//!
//! Given the caller's live-output set, marks dead output specs and every
//! input column no remaining spec reads. Spec slots keep their positions so
//! output indices stay stable across passes; the compiler simply skips dead
//! slots. Key columns required for bucketing are never pruned, even when
//! unused as output values.

use crate::spec::AggregationOperator;
use std::collections::HashSet;

/// Prune `op` against the caller's live-output set.
///
/// `live_out` holds the spec output indices some downstream consumer reads;
/// `index_live` says whether the row-identity index is needed downstream;
/// `input_has_index` whether the input table carries one at all.
///
/// Returns `false` when every output is dead, in which case the operator
/// should be deleted outright. Re-running with the same live set is a no-op.
pub fn prune(
    op: &mut AggregationOperator,
    live_out: &HashSet<usize>,
    index_live: bool,
    input_has_index: bool,
) -> bool {
    for out in 0..op.specs.len() {
        if !live_out.contains(&out) {
            op.dead_out_inds.insert(out);
        }
    }

    if !input_has_index || !index_live {
        op.index_dead = true;
    }

    // An input column stays live only while some live spec still reads it or
    // it is a bucketing key.
    let keys: HashSet<usize> = op.key_inds.iter().copied().collect();
    let mut read_by_live: HashSet<usize> = HashSet::new();
    for (out, spec) in op.specs.iter().enumerate() {
        if op.dead_out_inds.contains(&out) {
            continue;
        }
        if let Some(input) = spec.input {
            read_by_live.insert(input);
        }
    }
    for spec in &op.specs {
        if let Some(input) = spec.input {
            if !keys.contains(&input) && !read_by_live.contains(&input) {
                op.dead_in_inds.insert(input);
            }
        }
    }

    let alive = op.dead_out_inds.len() < op.specs.len();
    if !alive {
        log::debug!("aggregation operator eliminated: every output is dead");
    }
    alive
}
