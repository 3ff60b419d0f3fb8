use crate::error::{AggError, AggResult};
use crate::reduce::UserFunction;
use gather_columnar::{ElemKind, Table};
use std::collections::HashSet;
use std::fmt;

/// Aggregate function kinds.
///
/// The numeric wire codes (see [`AggregateKind::code`]) are stable and appear
/// in the call descriptor's `function_type_codes`, with `0` reserved as the
/// terminal sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    Ngroup,
    Head,
    Transform,
    Size,
    Shift,
    Sum,
    Count,
    Nunique,
    Median,
    Cumsum,
    Cumprod,
    Cummin,
    Cummax,
    Mean,
    Min,
    Max,
    Prod,
    First,
    Last,
    IdxMin,
    IdxMax,
    Var,
    Std,
    BoolorAgg,
    Udf,
    GenUdf,
}

impl AggregateKind {
    /// Wire code in the call descriptor. `0` is the terminal sentinel and is
    /// never a valid kind.
    pub fn code(self) -> i32 {
        match self {
            AggregateKind::Ngroup => 1,
            AggregateKind::Head => 2,
            AggregateKind::Transform => 3,
            AggregateKind::Size => 4,
            AggregateKind::Shift => 5,
            AggregateKind::Sum => 6,
            AggregateKind::Count => 7,
            AggregateKind::Nunique => 8,
            AggregateKind::Median => 9,
            AggregateKind::Cumsum => 10,
            AggregateKind::Cumprod => 11,
            AggregateKind::Cummin => 12,
            AggregateKind::Cummax => 13,
            AggregateKind::Mean => 14,
            AggregateKind::Min => 15,
            AggregateKind::Max => 16,
            AggregateKind::Prod => 17,
            AggregateKind::First => 18,
            AggregateKind::Last => 19,
            AggregateKind::IdxMin => 20,
            AggregateKind::IdxMax => 21,
            AggregateKind::Var => 22,
            AggregateKind::Std => 23,
            AggregateKind::BoolorAgg => 24,
            AggregateKind::Udf => 25,
            AggregateKind::GenUdf => 26,
        }
    }

    pub fn is_cumulative(self) -> bool {
        matches!(
            self,
            AggregateKind::Cumsum
                | AggregateKind::Cumprod
                | AggregateKind::Cummin
                | AggregateKind::Cummax
        )
    }

    /// Kinds producing one output row per input row (or, for `head`, a row
    /// subset) rather than one row per group.
    pub fn is_row_shaped(self) -> bool {
        self.is_cumulative()
            || matches!(
                self,
                AggregateKind::Shift
                    | AggregateKind::Head
                    | AggregateKind::Transform
                    | AggregateKind::Ngroup
            )
    }

    /// Kinds with no combine step: every row of a logical group must be
    /// colocated on one partition before they run.
    pub fn needs_colocation(self) -> bool {
        self.is_row_shaped()
            || matches!(
                self,
                AggregateKind::Median | AggregateKind::Nunique | AggregateKind::GenUdf
            )
    }

    /// Kinds taking no input column.
    pub fn takes_no_input(self) -> bool {
        matches!(self, AggregateKind::Size | AggregateKind::Ngroup)
    }

    /// Kinds that tolerate a `Utf8` value column (everything else folds the
    /// value through the numeric lane).
    pub fn accepts_utf8_values(self) -> bool {
        matches!(self, AggregateKind::Count | AggregateKind::Nunique)
    }

    pub fn name(self) -> &'static str {
        match self {
            AggregateKind::Ngroup => "ngroup",
            AggregateKind::Head => "head",
            AggregateKind::Transform => "transform",
            AggregateKind::Size => "size",
            AggregateKind::Shift => "shift",
            AggregateKind::Sum => "sum",
            AggregateKind::Count => "count",
            AggregateKind::Nunique => "nunique",
            AggregateKind::Median => "median",
            AggregateKind::Cumsum => "cumsum",
            AggregateKind::Cumprod => "cumprod",
            AggregateKind::Cummin => "cummin",
            AggregateKind::Cummax => "cummax",
            AggregateKind::Mean => "mean",
            AggregateKind::Min => "min",
            AggregateKind::Max => "max",
            AggregateKind::Prod => "prod",
            AggregateKind::First => "first",
            AggregateKind::Last => "last",
            AggregateKind::IdxMin => "idxmin",
            AggregateKind::IdxMax => "idxmax",
            AggregateKind::Var => "var",
            AggregateKind::Std => "std",
            AggregateKind::BoolorAgg => "boolor_agg",
            AggregateKind::Udf => "udf",
            AggregateKind::GenUdf => "gen_udf",
        }
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inner aggregations supported by `transform`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransformKind {
    Sum,
    Count,
    Nunique,
    Median,
    Mean,
    Min,
    Max,
    Prod,
    First,
    Last,
    Var,
    Std,
}

impl TransformKind {
    pub fn as_aggregate(self) -> AggregateKind {
        match self {
            TransformKind::Sum => AggregateKind::Sum,
            TransformKind::Count => AggregateKind::Count,
            TransformKind::Nunique => AggregateKind::Nunique,
            TransformKind::Median => AggregateKind::Median,
            TransformKind::Mean => AggregateKind::Mean,
            TransformKind::Min => AggregateKind::Min,
            TransformKind::Max => AggregateKind::Max,
            TransformKind::Prod => AggregateKind::Prod,
            TransformKind::First => AggregateKind::First,
            TransformKind::Last => AggregateKind::Last,
            TransformKind::Var => AggregateKind::Var,
            TransformKind::Std => AggregateKind::Std,
        }
    }
}

/// One aggregate function invocation: a kind plus its parameters.
#[derive(Clone, Debug)]
pub struct AggregateCall {
    pub kind: AggregateKind,
    /// Exclude NaN/null rows from the reduction. When unset, a null row
    /// poisons its group's output (the value propagates as null).
    pub skip_na: bool,
    /// `shift` offset; may be negative.
    pub periods: i64,
    /// `head` row count per group; must be non-negative.
    pub head_n: i64,
    pub transform_inner: Option<TransformKind>,
    pub user: Option<UserFunction>,
}

impl AggregateCall {
    pub fn new(kind: AggregateKind) -> Self {
        Self {
            kind,
            skip_na: true,
            periods: 1,
            head_n: 5,
            transform_inner: None,
            user: None,
        }
    }

    pub fn shift(periods: i64) -> Self {
        Self {
            periods,
            ..Self::new(AggregateKind::Shift)
        }
    }

    pub fn head(n: i64) -> Self {
        Self {
            head_n: n,
            ..Self::new(AggregateKind::Head)
        }
    }

    pub fn transform(inner: TransformKind) -> Self {
        Self {
            transform_inner: Some(inner),
            ..Self::new(AggregateKind::Transform)
        }
    }

    pub fn user(function: UserFunction) -> Self {
        let kind = match &function {
            UserFunction::General(_) => AggregateKind::GenUdf,
            _ => AggregateKind::Udf,
        };
        Self {
            user: Some(function),
            ..Self::new(kind)
        }
    }

    pub fn with_skip_na(mut self, skip_na: bool) -> Self {
        self.skip_na = skip_na;
        self
    }
}

/// One output column of a group-by: the input column it reads (if any) and
/// the aggregate call producing it.
#[derive(Clone, Debug)]
pub struct SpecEntry {
    pub input: Option<usize>,
    pub call: AggregateCall,
}

impl SpecEntry {
    pub fn new(input: usize, call: AggregateCall) -> Self {
        Self {
            input: Some(input),
            call,
        }
    }

    pub fn without_input(call: AggregateCall) -> Self {
        Self { input: None, call }
    }
}

/// Describes one group-by instance: key columns, one spec per output column,
/// flags, and the live-index sets maintained by the pruner.
#[derive(Clone, Debug)]
pub struct AggregationOperator {
    pub key_inds: Vec<usize>,
    pub specs: Vec<SpecEntry>,
    pub return_key: bool,
    pub keep_original_index: bool,
    pub drop_na_keys: bool,
    /// Number of leading key columns used for bucketing/shuffle; defaults to
    /// all of them.
    pub num_shuffle_keys: Option<usize>,
    pub dead_in_inds: HashSet<usize>,
    pub dead_out_inds: HashSet<usize>,
    /// Set by the pruner when no consumer needs the row-identity index.
    pub index_dead: bool,
}

impl AggregationOperator {
    pub fn new(key_inds: Vec<usize>, specs: Vec<SpecEntry>) -> Self {
        Self {
            key_inds,
            specs,
            return_key: true,
            keep_original_index: false,
            drop_na_keys: true,
            num_shuffle_keys: None,
            dead_in_inds: HashSet::new(),
            dead_out_inds: HashSet::new(),
            index_dead: false,
        }
    }

    pub fn n_keys(&self) -> usize {
        self.key_inds.len()
    }

    pub fn shuffle_keys(&self) -> usize {
        self.num_shuffle_keys.unwrap_or_else(|| self.n_keys())
    }

    /// Live input column indices (keys first, then the value columns of live
    /// specs), deduplicated, for the table-interchange boundary.
    pub fn live_in_inds(&self) -> Vec<usize> {
        let mut out: Vec<usize> = Vec::new();
        for &k in &self.key_inds {
            if !out.contains(&k) {
                out.push(k);
            }
        }
        for spec in &self.specs {
            if let Some(input) = spec.input {
                if !self.dead_in_inds.contains(&input) && !out.contains(&input) {
                    out.push(input);
                }
            }
        }
        out
    }

    /// Live output spec indices.
    pub fn live_out_inds(&self) -> Vec<usize> {
        (0..self.specs.len())
            .filter(|i| !self.dead_out_inds.contains(i))
            .collect()
    }

    /// Eager configuration-shape validation; runs before any row is read.
    pub fn validate(&self, table: &Table) -> AggResult<()> {
        if self.specs.is_empty() {
            return Err(AggError::EmptyGroupSet);
        }
        for &k in &self.key_inds {
            if k >= table.column_count() {
                return Err(AggError::UnknownColumn(k));
            }
        }
        if let Some(n) = self.num_shuffle_keys {
            if n == 0 || n > self.n_keys() {
                return Err(AggError::InvalidParameter {
                    what: format!("num_shuffle_keys {n} outside 1..={}", self.n_keys()),
                });
            }
        }

        let n_cumulative = self
            .specs
            .iter()
            .filter(|s| s.call.kind.is_cumulative())
            .count();
        if n_cumulative > 0 && n_cumulative != self.specs.len() {
            return Err(AggError::IncompatibleMixedKinds {
                func: "agg".to_string(),
            });
        }

        // The row-shaped kinds are whole-operator operations: every spec in
        // the instance must carry the same kind.
        if let Some(row_shaped) = self
            .specs
            .iter()
            .map(|s| s.call.kind)
            .find(|k| k.is_row_shaped())
        {
            if self.specs.iter().any(|s| s.call.kind != row_shaped) {
                return Err(AggError::IncompatibleMixedKinds {
                    func: row_shaped.name().to_string(),
                });
            }
        }

        for spec in &self.specs {
            let call = &spec.call;
            match spec.input {
                None => {
                    if !call.kind.takes_no_input() {
                        return Err(AggError::InvalidParameter {
                            what: format!("{} requires an input column", call.kind),
                        });
                    }
                }
                Some(input) => {
                    if input >= table.column_count() {
                        return Err(AggError::UnknownColumn(input));
                    }
                    let elem = table.kind(input).ok_or(AggError::UnknownColumn(input))?;
                    if elem == ElemKind::Utf8 && !call.kind.accepts_utf8_values() {
                        return Err(AggError::InvalidAggregateForColumnType {
                            kind: call.kind.name().to_string(),
                            column: table.name(input).unwrap_or("?").to_string(),
                            elem,
                        });
                    }
                }
            }

            match call.kind {
                AggregateKind::Head => {
                    if call.head_n < 0 {
                        return Err(AggError::InvalidParameter {
                            what: "groupby.head does not work with negative values".to_string(),
                        });
                    }
                }
                AggregateKind::Transform => {
                    if call.transform_inner.is_none() {
                        return Err(AggError::UnsupportedTransform {
                            name: "<missing>".to_string(),
                        });
                    }
                }
                AggregateKind::Udf | AggregateKind::GenUdf => {
                    if call.user.is_none() {
                        return Err(AggError::UnsupportedUserFunction {
                            name: call.kind.name().to_string(),
                            reason: "no user function supplied".to_string(),
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gather_columnar::{Column, TableBuilder};
    use std::sync::Arc;

    fn table() -> Table {
        let mut builder = TableBuilder::new();
        builder
            .push_column("k", Arc::new(Column::from_strs(["a", "b"])))
            .push_column("x", Arc::new(Column::from_f64s(vec![1.0, 2.0])));
        builder.build().unwrap()
    }

    #[test]
    fn negative_head_is_rejected_before_any_row() {
        let op = AggregationOperator::new(
            vec![0],
            vec![SpecEntry::new(1, AggregateCall::head(-1))],
        );
        let err = op.validate(&table()).unwrap_err();
        assert!(matches!(err, AggError::InvalidParameter { .. }));
    }

    #[test]
    fn cumulative_kinds_do_not_mix() {
        let op = AggregationOperator::new(
            vec![0],
            vec![
                SpecEntry::new(1, AggregateCall::new(AggregateKind::Cumsum)),
                SpecEntry::new(1, AggregateCall::new(AggregateKind::Sum)),
            ],
        );
        let err = op.validate(&table()).unwrap_err();
        assert!(matches!(err, AggError::IncompatibleMixedKinds { .. }));
    }

    #[test]
    fn var_on_string_column_is_rejected() {
        let op = AggregationOperator::new(
            vec![1],
            vec![SpecEntry::new(0, AggregateCall::new(AggregateKind::Var))],
        );
        let err = op.validate(&table()).unwrap_err();
        assert!(matches!(
            err,
            AggError::InvalidAggregateForColumnType { .. }
        ));
    }

    #[test]
    fn median_mixes_with_decomposable_kinds() {
        let op = AggregationOperator::new(
            vec![0],
            vec![
                SpecEntry::new(1, AggregateCall::new(AggregateKind::Median)),
                SpecEntry::new(1, AggregateCall::new(AggregateKind::Sum)),
            ],
        );
        op.validate(&table()).unwrap();
    }

    #[test]
    fn wire_codes_are_stable() {
        assert_eq!(AggregateKind::Sum.code(), 6);
        assert_eq!(AggregateKind::BoolorAgg.code(), 24);
        assert_eq!(AggregateKind::GenUdf.code(), 26);
    }

    #[test]
    fn live_inds_track_dead_sets() {
        let mut op = AggregationOperator::new(
            vec![0],
            vec![
                SpecEntry::new(1, AggregateCall::new(AggregateKind::Sum)),
                SpecEntry::new(1, AggregateCall::new(AggregateKind::Mean)),
            ],
        );
        assert_eq!(op.live_in_inds(), vec![0, 1]);
        assert_eq!(op.live_out_inds(), vec![0, 1]);
        op.dead_out_inds.insert(1);
        assert_eq!(op.live_out_inds(), vec![0]);
    }
}
