//! Built-in reduction programs and sequential group kernels.
//!
//! Decomposable kinds compile to a [`Reduction`] with the accumulator
//! layouts of the reference engine (`var`/`std` carry (count, mean, M2),
//! `idxmin`/`idxmax` carry (extreme, position), plain folds carry one slot).
//! Kinds with no combine step (`median`, `nunique`, the cumulative family,
//! `shift`, `head`, `transform`, `ngroup`) run as sequential kernels over a
//! fully-colocated group.

use crate::reduce::{AccRow, Reduction};
use crate::spec::AggregateKind;
use gather_columnar::ElemKind;
use ordered_float::OrderedFloat;
use smallvec::smallvec;
use std::collections::HashSet;
use std::sync::Arc;

/// How a reduction treats a missing (null/NaN) input row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NullPolicy {
    /// Missing rows are always skipped (`count`).
    SkipAlways,
    /// Every row participates, value ignored (`size`).
    IncludeAll,
    /// Skip under skip-na, otherwise poison the group's output.
    SkipOrPoison,
}

pub fn null_policy(kind: AggregateKind, skip_na: bool) -> NullPolicy {
    match kind {
        AggregateKind::Count => NullPolicy::SkipAlways,
        AggregateKind::Size => NullPolicy::IncludeAll,
        _ if skip_na => NullPolicy::SkipAlways,
        _ => NullPolicy::SkipOrPoison,
    }
}

/// Output column kind per aggregate kind.
pub fn output_kind(kind: AggregateKind) -> ElemKind {
    match kind {
        AggregateKind::Count
        | AggregateKind::Size
        | AggregateKind::Nunique
        | AggregateKind::Ngroup
        | AggregateKind::IdxMin
        | AggregateKind::IdxMax => ElemKind::Int64,
        AggregateKind::BoolorAgg => ElemKind::Bool,
        _ => ElemKind::Float64,
    }
}

struct SumAgg;
struct ProdAgg;
struct CountAgg;
struct MeanAgg;
struct MinAgg;
struct MaxAgg;
struct VarAgg;
struct StdAgg;
struct FirstAgg;
struct LastAgg;
struct IdxExtremeAgg {
    take_min: bool,
}
struct BoolorAgg;

impl Reduction for SumAgg {
    fn n_accumulators(&self) -> usize {
        1
    }
    fn init(&self) -> AccRow {
        smallvec![0.0]
    }
    fn update(&self, acc: &mut [f64], value: f64, _row: i64) {
        acc[0] += value;
    }
    fn combine(&self, acc: &mut [f64], other: &[f64]) {
        acc[0] += other[0];
    }
    fn eval(&self, acc: &[f64]) -> Option<f64> {
        Some(acc[0])
    }
}

impl Reduction for ProdAgg {
    fn n_accumulators(&self) -> usize {
        1
    }
    fn init(&self) -> AccRow {
        smallvec![1.0]
    }
    fn update(&self, acc: &mut [f64], value: f64, _row: i64) {
        acc[0] *= value;
    }
    fn combine(&self, acc: &mut [f64], other: &[f64]) {
        acc[0] *= other[0];
    }
    fn eval(&self, acc: &[f64]) -> Option<f64> {
        Some(acc[0])
    }
}

impl Reduction for CountAgg {
    fn n_accumulators(&self) -> usize {
        1
    }
    fn init(&self) -> AccRow {
        smallvec![0.0]
    }
    fn update(&self, acc: &mut [f64], _value: f64, _row: i64) {
        acc[0] += 1.0;
    }
    fn combine(&self, acc: &mut [f64], other: &[f64]) {
        acc[0] += other[0];
    }
    fn eval(&self, acc: &[f64]) -> Option<f64> {
        Some(acc[0])
    }
}

impl Reduction for MeanAgg {
    fn n_accumulators(&self) -> usize {
        2
    }
    fn init(&self) -> AccRow {
        smallvec![0.0, 0.0]
    }
    fn update(&self, acc: &mut [f64], value: f64, _row: i64) {
        acc[0] += value;
        acc[1] += 1.0;
    }
    fn combine(&self, acc: &mut [f64], other: &[f64]) {
        acc[0] += other[0];
        acc[1] += other[1];
    }
    fn eval(&self, acc: &[f64]) -> Option<f64> {
        (acc[1] > 0.0).then(|| acc[0] / acc[1])
    }
}

impl Reduction for MinAgg {
    fn n_accumulators(&self) -> usize {
        1
    }
    fn init(&self) -> AccRow {
        // NaN is the "nothing folded yet" state; f64::min absorbs it.
        smallvec![f64::NAN]
    }
    fn update(&self, acc: &mut [f64], value: f64, _row: i64) {
        acc[0] = acc[0].min(value);
    }
    fn combine(&self, acc: &mut [f64], other: &[f64]) {
        acc[0] = acc[0].min(other[0]);
    }
    fn eval(&self, acc: &[f64]) -> Option<f64> {
        (!acc[0].is_nan()).then_some(acc[0])
    }
}

impl Reduction for MaxAgg {
    fn n_accumulators(&self) -> usize {
        1
    }
    fn init(&self) -> AccRow {
        smallvec![f64::NAN]
    }
    fn update(&self, acc: &mut [f64], value: f64, _row: i64) {
        acc[0] = acc[0].max(value);
    }
    fn combine(&self, acc: &mut [f64], other: &[f64]) {
        acc[0] = acc[0].max(other[0]);
    }
    fn eval(&self, acc: &[f64]) -> Option<f64> {
        (!acc[0].is_nan()).then_some(acc[0])
    }
}

// (count, mean, M2) with Welford updates; combine is the pairwise merge, so
// partials from different partitions reconcile exactly.
fn var_update(acc: &mut [f64], value: f64) {
    acc[0] += 1.0;
    let delta = value - acc[1];
    acc[1] += delta / acc[0];
    acc[2] += delta * (value - acc[1]);
}

fn var_combine(acc: &mut [f64], other: &[f64]) {
    let (na, nb) = (acc[0], other[0]);
    if nb == 0.0 {
        return;
    }
    if na == 0.0 {
        acc.copy_from_slice(&other[..3]);
        return;
    }
    let n = na + nb;
    let delta = other[1] - acc[1];
    acc[1] += delta * nb / n;
    acc[2] += other[2] + delta * delta * na * nb / n;
    acc[0] = n;
}

fn var_eval(acc: &[f64]) -> Option<f64> {
    if acc[0] < 1.0 {
        return None;
    }
    // Sample variance (ddof 1); a single observation has no spread to report.
    (acc[0] >= 2.0).then(|| acc[2] / (acc[0] - 1.0))
}

impl Reduction for VarAgg {
    fn n_accumulators(&self) -> usize {
        3
    }
    fn init(&self) -> AccRow {
        smallvec![0.0, 0.0, 0.0]
    }
    fn update(&self, acc: &mut [f64], value: f64, _row: i64) {
        var_update(acc, value);
    }
    fn combine(&self, acc: &mut [f64], other: &[f64]) {
        var_combine(acc, other);
    }
    fn eval(&self, acc: &[f64]) -> Option<f64> {
        var_eval(acc)
    }
}

impl Reduction for StdAgg {
    fn n_accumulators(&self) -> usize {
        3
    }
    fn init(&self) -> AccRow {
        smallvec![0.0, 0.0, 0.0]
    }
    fn update(&self, acc: &mut [f64], value: f64, _row: i64) {
        var_update(acc, value);
    }
    fn combine(&self, acc: &mut [f64], other: &[f64]) {
        var_combine(acc, other);
    }
    fn eval(&self, acc: &[f64]) -> Option<f64> {
        var_eval(acc).map(f64::sqrt)
    }
}

// (value, seen). Partials combine in partition order, so "first" is first by
// (partition, row) and "last" is last by the same order.
impl Reduction for FirstAgg {
    fn n_accumulators(&self) -> usize {
        2
    }
    fn init(&self) -> AccRow {
        smallvec![0.0, 0.0]
    }
    fn update(&self, acc: &mut [f64], value: f64, _row: i64) {
        if acc[1] == 0.0 {
            acc[0] = value;
            acc[1] = 1.0;
        }
    }
    fn combine(&self, acc: &mut [f64], other: &[f64]) {
        if acc[1] == 0.0 && other[1] != 0.0 {
            acc[0] = other[0];
            acc[1] = 1.0;
        }
    }
    fn eval(&self, acc: &[f64]) -> Option<f64> {
        (acc[1] != 0.0).then_some(acc[0])
    }
}

impl Reduction for LastAgg {
    fn n_accumulators(&self) -> usize {
        2
    }
    fn init(&self) -> AccRow {
        smallvec![0.0, 0.0]
    }
    fn update(&self, acc: &mut [f64], value: f64, _row: i64) {
        acc[0] = value;
        acc[1] = 1.0;
    }
    fn combine(&self, acc: &mut [f64], other: &[f64]) {
        if other[1] != 0.0 {
            acc[0] = other[0];
            acc[1] = 1.0;
        }
    }
    fn eval(&self, acc: &[f64]) -> Option<f64> {
        (acc[1] != 0.0).then_some(acc[0])
    }
}

// (extreme value, original row position); position -1 means unseen. Ties keep
// the first occurrence (lowest original position).
impl Reduction for IdxExtremeAgg {
    fn n_accumulators(&self) -> usize {
        2
    }
    fn init(&self) -> AccRow {
        smallvec![0.0, -1.0]
    }
    fn update(&self, acc: &mut [f64], value: f64, row: i64) {
        let better = if self.take_min {
            value < acc[0]
        } else {
            value > acc[0]
        };
        if acc[1] < 0.0 || better {
            acc[0] = value;
            acc[1] = row as f64;
        }
    }
    fn combine(&self, acc: &mut [f64], other: &[f64]) {
        if other[1] < 0.0 {
            return;
        }
        let better = if self.take_min {
            other[0] < acc[0]
        } else {
            other[0] > acc[0]
        };
        let tie_earlier = other[0] == acc[0] && other[1] < acc[1];
        if acc[1] < 0.0 || better || tie_earlier {
            acc[0] = other[0];
            acc[1] = other[1];
        }
    }
    fn eval(&self, acc: &[f64]) -> Option<f64> {
        (acc[1] >= 0.0).then_some(acc[1])
    }
}

// (any, seen).
impl Reduction for BoolorAgg {
    fn n_accumulators(&self) -> usize {
        2
    }
    fn init(&self) -> AccRow {
        smallvec![0.0, 0.0]
    }
    fn update(&self, acc: &mut [f64], value: f64, _row: i64) {
        if value != 0.0 {
            acc[0] = 1.0;
        }
        acc[1] = 1.0;
    }
    fn combine(&self, acc: &mut [f64], other: &[f64]) {
        if other[0] != 0.0 {
            acc[0] = 1.0;
        }
        if other[1] != 0.0 {
            acc[1] = 1.0;
        }
    }
    fn eval(&self, acc: &[f64]) -> Option<f64> {
        (acc[1] != 0.0).then_some(acc[0])
    }
}

/// The reduction program for a decomposable built-in kind, if it has one.
pub fn builtin_reduction(kind: AggregateKind) -> Option<Arc<dyn Reduction>> {
    match kind {
        AggregateKind::Sum => Some(Arc::new(SumAgg)),
        AggregateKind::Prod => Some(Arc::new(ProdAgg)),
        AggregateKind::Count | AggregateKind::Size => Some(Arc::new(CountAgg)),
        AggregateKind::Mean => Some(Arc::new(MeanAgg)),
        AggregateKind::Min => Some(Arc::new(MinAgg)),
        AggregateKind::Max => Some(Arc::new(MaxAgg)),
        AggregateKind::Var => Some(Arc::new(VarAgg)),
        AggregateKind::Std => Some(Arc::new(StdAgg)),
        AggregateKind::First => Some(Arc::new(FirstAgg)),
        AggregateKind::Last => Some(Arc::new(LastAgg)),
        AggregateKind::IdxMin => Some(Arc::new(IdxExtremeAgg { take_min: true })),
        AggregateKind::IdxMax => Some(Arc::new(IdxExtremeAgg { take_min: false })),
        AggregateKind::BoolorAgg => Some(Arc::new(BoolorAgg)),
        _ => None,
    }
}

/// Median of one group's values. With skip-na, missing values are excluded;
/// otherwise any missing value nulls the group. Even-sized groups average
/// the two middle values.
pub fn median(values: &[Option<f64>], skip_na: bool) -> Option<f64> {
    if !skip_na && values.iter().any(|v| v.is_none()) {
        return None;
    }
    let mut valid: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    if valid.is_empty() {
        return None;
    }
    valid.sort_unstable_by(|a, b| a.total_cmp(b));
    let mid = valid.len() / 2;
    if valid.len() % 2 == 1 {
        Some(valid[mid])
    } else {
        Some((valid[mid - 1] + valid[mid]) / 2.0)
    }
}

/// Distinct-value count of one group. With `dropna`, missing values are
/// excluded; otherwise missing counts as one extra distinct value.
pub fn nunique(values: &[Option<f64>], dropna: bool) -> i64 {
    let mut distinct: HashSet<OrderedFloat<f64>> = HashSet::new();
    let mut saw_null = false;
    for v in values {
        match v {
            Some(v) => {
                distinct.insert(OrderedFloat(*v));
            }
            None => saw_null = true,
        }
    }
    distinct.len() as i64 + i64::from(saw_null && !dropna)
}

/// Running fold over one group's rows in group-local order. A missing input
/// yields a missing output at that slot; with skip-na the running value
/// carries past it, otherwise everything after the first missing value is
/// missing too.
pub fn cumulative(kind: AggregateKind, values: &[Option<f64>], skip_na: bool) -> Vec<Option<f64>> {
    let mut acc: Option<f64> = None;
    let mut poisoned = false;
    values
        .iter()
        .map(|v| {
            if poisoned {
                return None;
            }
            match v {
                None => {
                    if !skip_na {
                        poisoned = true;
                    }
                    None
                }
                Some(v) => {
                    let next = match (acc, kind) {
                        (None, _) => *v,
                        (Some(a), AggregateKind::Cumsum) => a + v,
                        (Some(a), AggregateKind::Cumprod) => a * v,
                        (Some(a), AggregateKind::Cummin) => a.min(*v),
                        (Some(a), AggregateKind::Cummax) => a.max(*v),
                        _ => unreachable!("not a cumulative kind"),
                    };
                    acc = Some(next);
                    Some(next)
                }
            }
        })
        .collect()
}

/// Shift one group's values by `periods` within group-local row order;
/// vacated slots are missing.
pub fn shift_group(values: &[Option<f64>], periods: i64) -> Vec<Option<f64>> {
    let len = values.len() as i64;
    (0..len)
        .map(|i| {
            let src = i - periods;
            if src < 0 || src >= len {
                None
            } else {
                values[src as usize]
            }
        })
        .collect()
}
