//! The boundary to the external grouping/shuffle engine.
//!
//! The core never hashes keys or moves bytes between partitions itself: it
//! consumes a per-row group bucket id ([`PartitionGroups`]) and a
//! partition-exchange primitive ([`PartitionExchange`]). A single-process
//! reference implementation ships alongside the trait for tests and
//! non-distributed callers.

use crate::reduce::AccRow;
use ahash::RandomState;
use gather_columnar::{Table, Value};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};

/// Per-partition grouping produced by the external engine.
#[derive(Clone, Debug)]
pub struct PartitionGroups {
    /// Local bucket id per row; `-1` drops the row (NA key under
    /// `drop_na_keys`).
    pub row_to_group: Vec<i64>,
    /// Number of local buckets.
    pub n_groups: usize,
    /// Per local bucket: the partition owning the logical group and the slot
    /// in that partition's owned-group table.
    pub owner: Vec<(usize, usize)>,
    /// A representative local row per bucket.
    pub repr_row: Vec<usize>,
}

/// Grouping for a whole operator across all partitions.
#[derive(Clone, Debug)]
pub struct GroupLayout {
    pub partitions: Vec<PartitionGroups>,
    /// Owned-group count per partition.
    pub owned_counts: Vec<usize>,
    /// Key tuple per owned slot, per partition.
    pub owned_keys: Vec<Vec<Vec<Value>>>,
}

impl GroupLayout {
    pub fn n_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn total_groups(&self) -> usize {
        self.owned_counts.iter().sum()
    }

    /// Global group ordinal base per partition (prefix sums of owned
    /// counts), used by `ngroup`.
    pub fn ordinal_bases(&self) -> Vec<usize> {
        let mut bases = Vec::with_capacity(self.owned_counts.len());
        let mut base = 0;
        for count in &self.owned_counts {
            bases.push(base);
            base += count;
        }
        bases
    }
}

/// One group's partial accumulator row in flight during the combine
/// exchange.
#[derive(Clone, Debug)]
pub struct PartialRow {
    /// Owner-side slot the row combines into.
    pub slot: usize,
    /// Concatenated accumulator values across the operator's specs.
    pub accs: AccRow,
    /// Per-spec poisoned flags (a null row seen without skip-na).
    pub poisoned: SmallVec<[bool; 4]>,
}

/// One input row in flight during the pre-aggregation (colocation) exchange.
#[derive(Clone, Debug)]
pub struct RoutedRow {
    pub slot: usize,
    /// Original row identity (index value, or the global row position).
    pub index: Value,
    /// Original row position, for position-tracking reductions.
    pub position: i64,
    /// One lane value per spec.
    pub values: SmallVec<[Option<f64>; 4]>,
}

/// The inter-partition data movement primitive.
///
/// Both operations are collective barriers: no partition reads its inbound
/// rows until every partition has contributed its outbound rows. Inbound
/// rows are delivered in (source partition, emit order); implementations
/// must preserve that order, which `first`/`last` depend on.
pub trait PartitionExchange {
    /// Route partial accumulator rows to their owning partitions.
    /// `outbound[src]` is a list of `(dest_partition, row)`.
    fn exchange_partials(&self, outbound: Vec<Vec<(usize, PartialRow)>>) -> Vec<Vec<PartialRow>>;

    /// Route whole input rows so every logical group lands on one partition.
    fn colocate_rows(&self, outbound: Vec<Vec<(usize, RoutedRow)>>) -> Vec<Vec<RoutedRow>>;
}

/// Single-process reference exchange: moves rows between in-memory buffers,
/// preserving (source partition, emit order).
#[derive(Clone, Copy, Debug, Default)]
pub struct InProcessExchange;

impl InProcessExchange {
    fn route<T>(n_partitions: usize, outbound: Vec<Vec<(usize, T)>>) -> Vec<Vec<T>> {
        let mut inbound: Vec<Vec<T>> = (0..n_partitions).map(|_| Vec::new()).collect();
        for rows in outbound {
            for (dest, row) in rows {
                inbound[dest].push(row);
            }
        }
        inbound
    }
}

impl PartitionExchange for InProcessExchange {
    fn exchange_partials(&self, outbound: Vec<Vec<(usize, PartialRow)>>) -> Vec<Vec<PartialRow>> {
        let n = outbound.len();
        Self::route(n, outbound)
    }

    fn colocate_rows(&self, outbound: Vec<Vec<(usize, RoutedRow)>>) -> Vec<Vec<RoutedRow>> {
        let n = outbound.len();
        Self::route(n, outbound)
    }
}

// Deterministic seeds so bucket assignment is stable across runs.
fn shuffle_hasher() -> RandomState {
    RandomState::with_seeds(
        0x7e41_19c3_0a5d_2f86,
        0x1b6d_92e4_5c03_77aa,
        0x94c7_e0fa_3d21_8b5c,
        0x52a8_6f1d_c490_e337,
    )
}

/// Reference grouping engine: assign every row a local bucket and every
/// logical group an owning partition.
///
/// Group identity is the full key tuple; the owning partition is chosen by
/// hashing the first `n_shuffle_keys` key values, so groups sharing a
/// shuffle-key prefix colocate. With `drop_na_keys`, rows with any null key
/// get bucket `-1` and never participate.
pub fn build_group_layout(
    tables: &[Table],
    key_inds: &[usize],
    n_shuffle_keys: usize,
    drop_na_keys: bool,
) -> GroupLayout {
    let n_partitions = tables.len();
    let hasher = shuffle_hasher();

    let mut owned_counts = vec![0usize; n_partitions];
    let mut owned_keys: Vec<Vec<Vec<Value>>> = vec![Vec::new(); n_partitions];
    // Full key tuple -> (owner partition, owner slot).
    let mut global: HashMap<Vec<Value>, (usize, usize), RandomState> =
        HashMap::with_hasher(shuffle_hasher());

    let mut partitions = Vec::with_capacity(n_partitions);
    for table in tables {
        let mut row_to_group = Vec::with_capacity(table.row_count());
        let mut local: HashMap<Vec<Value>, usize, RandomState> =
            HashMap::with_hasher(shuffle_hasher());
        let mut owner = Vec::new();
        let mut repr_row = Vec::new();

        for row in 0..table.row_count() {
            let key: Vec<Value> = key_inds
                .iter()
                .map(|&k| table.column(k).map_or(Value::Null, |c| c.value(row)))
                .collect();
            if drop_na_keys && key.iter().any(Value::is_null) {
                row_to_group.push(-1);
                continue;
            }

            let bucket = match local.get(&key) {
                Some(bucket) => *bucket,
                None => {
                    let bucket = owner.len();
                    let (owner_part, owner_slot) = match global.get(&key) {
                        Some(assigned) => *assigned,
                        None => {
                            let mut h = hasher.build_hasher();
                            for v in key.iter().take(n_shuffle_keys) {
                                v.hash(&mut h);
                            }
                            let part = (h.finish() % n_partitions as u64) as usize;
                            let slot = owned_counts[part];
                            owned_counts[part] += 1;
                            owned_keys[part].push(key.clone());
                            global.insert(key.clone(), (part, slot));
                            (part, slot)
                        }
                    };
                    owner.push((owner_part, owner_slot));
                    repr_row.push(row);
                    local.insert(key, bucket);
                    bucket
                }
            };
            row_to_group.push(bucket as i64);
        }

        partitions.push(PartitionGroups {
            row_to_group,
            n_groups: owner.len(),
            owner,
            repr_row,
        });
    }

    GroupLayout {
        partitions,
        owned_counts,
        owned_keys,
    }
}
