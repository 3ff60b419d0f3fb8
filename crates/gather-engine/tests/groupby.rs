//! End-to-end group-by tests driving the compile → lower → execute → dispose
//! pipeline through the in-process reference grouping engine.

use gather_columnar::{Column, Table, TableBuilder, Value};
use gather_engine::{
    build_group_layout, AggError, AggregateCall, AggregateKind, AggregationOperator, Accumulator,
    Distribution, EvalExpr, Fold, GroupbySession, InProcessExchange, ReduceScript, SpecEntry,
    Term, TransformKind, UserFunction,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

fn keyed_table(keys: &[&str], xs: &[f64]) -> Table {
    let mut builder = TableBuilder::new();
    builder
        .push_column("k", Arc::new(Column::from_strs(keys.iter().copied())))
        .push_column("x", Arc::new(Column::from_f64s(xs.to_vec())));
    builder.build().unwrap()
}

fn keyed_table_opt(keys: &[&str], xs: Vec<Option<f64>>) -> Table {
    let mut builder = TableBuilder::new();
    builder
        .push_column("k", Arc::new(Column::from_strs(keys.iter().copied())))
        .push_column("x", Arc::new(Column::from_opt_f64s(xs)));
    builder.build().unwrap()
}

/// Flatten per-partition outputs into rows sorted by the leading columns.
fn sorted_rows(outputs: &[Table]) -> Vec<Vec<Value>> {
    let mut rows = Vec::new();
    for table in outputs {
        for row in 0..table.row_count() {
            rows.push(
                (0..table.column_count())
                    .map(|c| table.column(c).unwrap().value(row))
                    .collect::<Vec<_>>(),
            );
        }
    }
    rows.sort_by(|a, b| {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| x.total_cmp(y))
            .find(|o| !o.is_eq())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rows
}

/// Map group key -> output value for a single-spec, single-key operator.
fn by_key(outputs: &[Table]) -> HashMap<String, Value> {
    let mut map = HashMap::new();
    for table in outputs {
        for row in 0..table.row_count() {
            let key = table.column(0).unwrap().value(row).to_string();
            map.insert(key, table.column(1).unwrap().value(row));
        }
    }
    map
}

fn run_one(op: AggregationOperator, partitions: &[Table]) -> Vec<Table> {
    GroupbySession::new().run(op, partitions).unwrap()
}

#[test]
fn sum_over_two_groups() {
    // keys ["a","a","b"], values [1,2,10], sum -> keys ["a","b"], values [3,10]
    let table = keyed_table(&["a", "a", "b"], &[1.0, 2.0, 10.0]);
    let op = AggregationOperator::new(
        vec![0],
        vec![SpecEntry::new(1, AggregateCall::new(AggregateKind::Sum))],
    );
    let rows = sorted_rows(&run_one(op, &[table]));
    assert_eq!(
        rows,
        vec![
            vec![Value::from("a"), Value::Number(3.0)],
            vec![Value::from("b"), Value::Number(10.0)],
        ]
    );
}

#[test]
fn mean_over_two_groups() {
    let table = keyed_table(&["a", "a", "b"], &[1.0, 2.0, 10.0]);
    let op = AggregationOperator::new(
        vec![0],
        vec![SpecEntry::new(1, AggregateCall::new(AggregateKind::Mean))],
    );
    let rows = sorted_rows(&run_one(op, &[table]));
    assert_eq!(
        rows,
        vec![
            vec![Value::from("a"), Value::Number(1.5)],
            vec![Value::from("b"), Value::Number(10.0)],
        ]
    );
}

#[test]
fn mean_across_two_partitions_combines_partials() {
    // P1 = {("a",1)}, P2 = {("a",2),("b",10)}. The "a" partials
    // (sum=1,count=1) and (sum=2,count=1) combine to (sum=3,count=2),
    // eval -> a:1.5, b:10.
    let partitions = [
        keyed_table(&["a"], &[1.0]),
        keyed_table(&["a", "b"], &[2.0, 10.0]),
    ];
    let op = AggregationOperator::new(
        vec![0],
        vec![SpecEntry::new(1, AggregateCall::new(AggregateKind::Mean))],
    );
    let by_key = by_key(&run_one(op, &partitions));
    assert_eq!(by_key["a"], Value::Number(1.5));
    assert_eq!(by_key["b"], Value::Number(10.0));
}

#[test]
fn negative_head_rejected_before_any_row() {
    let table = keyed_table(&["a"], &[1.0]);
    let op = AggregationOperator::new(vec![0], vec![SpecEntry::new(1, AggregateCall::head(-1))]);
    let err = GroupbySession::new().run(op, &[table]).unwrap_err();
    assert!(matches!(err, AggError::InvalidParameter { .. }));
}

#[test]
fn cumsum_cannot_mix_with_sum() {
    let table = keyed_table(&["a"], &[1.0]);
    let op = AggregationOperator::new(
        vec![0],
        vec![
            SpecEntry::new(1, AggregateCall::new(AggregateKind::Cumsum)),
            SpecEntry::new(1, AggregateCall::new(AggregateKind::Sum)),
        ],
    );
    let err = GroupbySession::new().run(op, &[table]).unwrap_err();
    assert!(matches!(err, AggError::IncompatibleMixedKinds { .. }));
}

#[test]
fn partitioned_results_match_single_pass() {
    let keys = [
        "a", "b", "c", "a", "b", "c", "a", "b", "c", "a", "b", "a", "c", "a",
    ];
    let values: Vec<f64> = (0..keys.len()).map(|i| (i as f64) * 1.25 - 3.0).collect();

    for kind in [
        AggregateKind::Sum,
        AggregateKind::Count,
        AggregateKind::Mean,
        AggregateKind::Min,
        AggregateKind::Max,
        AggregateKind::Var,
        AggregateKind::Std,
        AggregateKind::Prod,
        AggregateKind::First,
        AggregateKind::Last,
        AggregateKind::IdxMin,
        AggregateKind::IdxMax,
    ] {
        let op = || {
            AggregationOperator::new(vec![0], vec![SpecEntry::new(1, AggregateCall::new(kind))])
        };

        let whole = keyed_table(&keys, &values);
        let single = by_key(&run_one(op(), &[whole]));

        for split in [1usize, 5, 9] {
            let p1 = keyed_table(&keys[..split], &values[..split]);
            let p2 = keyed_table(&keys[split..], &values[split..]);
            // Positions in partition 2 continue the global row numbering, so
            // idxmin/idxmax agree with the single-partition run.
            let multi = by_key(&run_one(op(), &[p1, p2]));

            assert_eq!(single.len(), multi.len(), "{kind} split {split}");
            for (key, expected) in &single {
                let actual = &multi[key];
                match (actual, expected) {
                    (Value::Number(a), Value::Number(b)) => assert!(
                        (a - b).abs() <= 1e-9 * b.abs().max(1.0),
                        "{kind} split {split} key {key}: {a} vs {b}"
                    ),
                    _ => assert_eq!(actual, expected, "{kind} split {split} key {key}"),
                }
            }
        }
    }
}

#[test]
fn pruning_unused_outputs_preserves_live_values() {
    let table = keyed_table(&["a", "b", "a", "b"], &[1.0, 2.0, 3.0, 4.0]);
    let mut session = GroupbySession::new();

    let op = AggregationOperator::new(
        vec![0],
        vec![
            SpecEntry::new(1, AggregateCall::new(AggregateKind::Sum)),
            SpecEntry::new(1, AggregateCall::new(AggregateKind::Mean)),
        ],
    );

    let full = session.run(op.clone(), std::slice::from_ref(&table)).unwrap();
    let full_rows = sorted_rows(&full);

    // Keep only the sum output live; the mean spec and nothing else goes.
    let live: HashSet<usize> = [0].into_iter().collect();
    let mut compiled = session
        .compile(op, &table, &live, true, &[Distribution::FixedBlock])
        .unwrap()
        .unwrap();
    assert_eq!(compiled.descriptor.live_out_inds, vec![0]);

    let layout = build_group_layout(std::slice::from_ref(&table), &[0], 1, true);
    let pruned = session
        .execute(
            &mut compiled,
            std::slice::from_ref(&table),
            &layout,
            &InProcessExchange,
        )
        .unwrap();
    let pruned_rows = sorted_rows(&pruned);

    // key + sum survive unchanged; only the mean column is gone.
    for (full_row, pruned_row) in full_rows.iter().zip(&pruned_rows) {
        assert_eq!(&full_row[..2], &pruned_row[..]);
    }
    session.dispose(&mut compiled);
}

#[test]
fn operator_with_no_live_outputs_is_eliminated() {
    let table = keyed_table(&["a"], &[1.0]);
    let op = AggregationOperator::new(
        vec![0],
        vec![SpecEntry::new(1, AggregateCall::new(AggregateKind::Sum))],
    );
    let compiled = GroupbySession::new()
        .compile(op, &table, &HashSet::new(), true, &[Distribution::FixedBlock])
        .unwrap();
    assert!(compiled.is_none());
}

#[test]
fn median_and_nunique_mix_with_sum_via_colocation() {
    let partitions = [
        keyed_table(&["a", "b", "a"], &[1.0, 5.0, 3.0]),
        keyed_table(&["a", "b", "b"], &[2.0, 5.0, 7.0]),
    ];
    let op = AggregationOperator::new(
        vec![0],
        vec![
            SpecEntry::new(1, AggregateCall::new(AggregateKind::Median)),
            SpecEntry::new(1, AggregateCall::new(AggregateKind::Nunique)),
            SpecEntry::new(1, AggregateCall::new(AggregateKind::Sum)),
        ],
    );
    let rows = sorted_rows(&run_one(op, &partitions));
    assert_eq!(
        rows,
        vec![
            // a: values {1,3,2} -> median 2, nunique 3, sum 6
            vec![
                Value::from("a"),
                Value::Number(2.0),
                Value::Int(3),
                Value::Number(6.0),
            ],
            // b: values {5,5,7} -> median 5, nunique 2, sum 17
            vec![
                Value::from("b"),
                Value::Number(5.0),
                Value::Int(2),
                Value::Number(17.0),
            ],
        ]
    );
}

/// Realign a row-shaped output by its original index.
fn by_index(outputs: &[Table]) -> Vec<(i64, Value)> {
    let mut rows = Vec::new();
    for table in outputs {
        let index = table.index().expect("row-shaped output keeps the index");
        for row in 0..table.row_count() {
            let Value::Int(pos) = index.value(row) else {
                panic!("integer index expected");
            };
            rows.push((pos, table.column(0).unwrap().value(row)));
        }
    }
    rows.sort_by_key(|(pos, _)| *pos);
    rows
}

#[test]
fn cumsum_runs_within_group_row_order() {
    let table = keyed_table(&["a", "b", "a", "b"], &[1.0, 10.0, 2.0, 20.0]);
    let mut op = AggregationOperator::new(
        vec![0],
        vec![SpecEntry::new(1, AggregateCall::new(AggregateKind::Cumsum))],
    );
    op.keep_original_index = true;

    let rows = by_index(&run_one(op, &[table]));
    assert_eq!(
        rows,
        vec![
            (0, Value::Number(1.0)),
            (1, Value::Number(10.0)),
            (2, Value::Number(3.0)),
            (3, Value::Number(30.0)),
        ]
    );
}

#[test]
fn shift_moves_within_groups_both_directions() {
    let table = keyed_table(&["a", "a", "a", "b"], &[1.0, 2.0, 3.0, 9.0]);

    let mut op = AggregationOperator::new(
        vec![0],
        vec![SpecEntry::new(1, AggregateCall::shift(1))],
    );
    op.keep_original_index = true;
    let rows = by_index(&run_one(op.clone(), std::slice::from_ref(&table)));
    assert_eq!(
        rows,
        vec![
            (0, Value::Null),
            (1, Value::Number(1.0)),
            (2, Value::Number(2.0)),
            (3, Value::Null),
        ]
    );

    op.specs[0].call = AggregateCall::shift(-1);
    let rows = by_index(&run_one(op, &[table]));
    assert_eq!(
        rows,
        vec![
            (0, Value::Number(2.0)),
            (1, Value::Number(3.0)),
            (2, Value::Null),
            (3, Value::Null),
        ]
    );
}

#[test]
fn head_keeps_the_first_n_rows_per_group() {
    let table = keyed_table(&["a", "a", "a", "b", "b"], &[1.0, 2.0, 3.0, 4.0, 5.0]);
    let mut op = AggregationOperator::new(
        vec![0],
        vec![SpecEntry::new(1, AggregateCall::head(2))],
    );
    op.keep_original_index = true;

    let rows = by_index(&run_one(op, &[table]));
    assert_eq!(
        rows,
        vec![
            (0, Value::Number(1.0)),
            (1, Value::Number(2.0)),
            (3, Value::Number(4.0)),
            (4, Value::Number(5.0)),
        ]
    );
}

#[test]
fn transform_broadcasts_the_group_aggregate() {
    let table = keyed_table(&["a", "b", "a"], &[1.0, 10.0, 3.0]);
    let mut op = AggregationOperator::new(
        vec![0],
        vec![SpecEntry::new(1, AggregateCall::transform(TransformKind::Mean))],
    );
    op.keep_original_index = true;

    let rows = by_index(&run_one(op, &[table]));
    assert_eq!(
        rows,
        vec![
            (0, Value::Number(2.0)),
            (1, Value::Number(10.0)),
            (2, Value::Number(2.0)),
        ]
    );
}

#[test]
fn ngroup_numbers_groups_globally() {
    let partitions = [
        keyed_table(&["a", "b"], &[0.0, 0.0]),
        keyed_table(&["b", "c", "a"], &[0.0, 0.0, 0.0]),
    ];
    let mut op = AggregationOperator::new(
        vec![0],
        vec![SpecEntry::without_input(AggregateCall::new(
            AggregateKind::Ngroup,
        ))],
    );
    op.keep_original_index = true;

    let rows = by_index(&run_one(op, &partitions));
    assert_eq!(rows.len(), 5);
    // Rows of the same key share an ordinal; ordinals are dense over groups.
    let by_pos: HashMap<i64, Value> = rows.into_iter().collect();
    assert_eq!(by_pos[&1], by_pos[&2], "both 'b' rows");
    assert_eq!(by_pos[&0], by_pos[&4], "both 'a' rows");
    let mut ordinals: Vec<i64> = by_pos
        .values()
        .map(|v| match v {
            Value::Int(v) => *v,
            other => panic!("ngroup output must be integral, got {other}"),
        })
        .collect();
    ordinals.sort_unstable();
    ordinals.dedup();
    assert_eq!(ordinals, vec![0, 1, 2]);
}

#[test]
fn size_counts_all_rows_count_skips_nulls() {
    let table = keyed_table_opt(&["a", "a", "b"], vec![Some(1.0), None, Some(2.0)]);
    let op = AggregationOperator::new(
        vec![0],
        vec![
            SpecEntry::without_input(AggregateCall::new(AggregateKind::Size)),
            SpecEntry::new(1, AggregateCall::new(AggregateKind::Count)),
        ],
    );
    let rows = sorted_rows(&run_one(op, &[table]));
    assert_eq!(
        rows,
        vec![
            vec![Value::from("a"), Value::Int(2), Value::Int(1)],
            vec![Value::from("b"), Value::Int(1), Value::Int(1)],
        ]
    );
}

#[test]
fn null_rows_poison_without_skip_na() {
    let table = keyed_table_opt(
        &["a", "a", "b"],
        vec![Some(1.0), None, Some(2.0)],
    );
    let op = AggregationOperator::new(
        vec![0],
        vec![SpecEntry::new(
            1,
            AggregateCall::new(AggregateKind::Sum).with_skip_na(false),
        )],
    );
    let by_key = by_key(&run_one(op, &[table]));
    assert_eq!(by_key["a"], Value::Null);
    assert_eq!(by_key["b"], Value::Number(2.0));
}

#[test]
fn poisoning_survives_the_combine_exchange() {
    let partitions = [
        keyed_table_opt(&["a"], vec![None]),
        keyed_table_opt(&["a", "b"], vec![Some(2.0), Some(10.0)]),
    ];
    let op = AggregationOperator::new(
        vec![0],
        vec![SpecEntry::new(
            1,
            AggregateCall::new(AggregateKind::Sum).with_skip_na(false),
        )],
    );
    let by_key = by_key(&run_one(op, &partitions));
    assert_eq!(by_key["a"], Value::Null);
    assert_eq!(by_key["b"], Value::Number(10.0));
}

#[test]
fn idx_extremes_report_original_positions() {
    let partitions = [
        keyed_table(&["a", "b"], &[5.0, 1.0]),
        keyed_table(&["a", "b", "a"], &[2.0, 8.0, 2.0]),
    ];
    let op = AggregationOperator::new(
        vec![0],
        vec![
            SpecEntry::new(1, AggregateCall::new(AggregateKind::IdxMin)),
            SpecEntry::new(1, AggregateCall::new(AggregateKind::IdxMax)),
        ],
    );
    let rows = sorted_rows(&run_one(op, &partitions));
    assert_eq!(
        rows,
        vec![
            // a: values 5@0, 2@2, 2@4 -> idxmin 2 (first tie), idxmax 0
            vec![Value::from("a"), Value::Int(2), Value::Int(0)],
            // b: values 1@1, 8@3
            vec![Value::from("b"), Value::Int(1), Value::Int(3)],
        ]
    );
}

#[test]
fn boolor_first_last_over_groups() {
    let mut builder = TableBuilder::new();
    builder
        .push_column("k", Arc::new(Column::from_strs(["a", "a", "b"])))
        .push_column("f", Arc::new(Column::from_bools(&[false, true, false])))
        .push_column("x", Arc::new(Column::from_f64s(vec![7.0, 8.0, 9.0])));
    let table = builder.build().unwrap();

    let op = AggregationOperator::new(
        vec![0],
        vec![
            SpecEntry::new(1, AggregateCall::new(AggregateKind::BoolorAgg)),
            SpecEntry::new(2, AggregateCall::new(AggregateKind::First)),
            SpecEntry::new(2, AggregateCall::new(AggregateKind::Last)),
        ],
    );
    let rows = sorted_rows(&run_one(op, &[table]));
    assert_eq!(
        rows,
        vec![
            vec![
                Value::from("a"),
                Value::Boolean(true),
                Value::Number(7.0),
                Value::Number(8.0),
            ],
            vec![
                Value::from("b"),
                Value::Boolean(false),
                Value::Number(9.0),
                Value::Number(9.0),
            ],
        ]
    );
}

fn sum_of_squares_script() -> ReduceScript {
    ReduceScript {
        name: "sum_sq".to_string(),
        accumulators: vec![Accumulator {
            fold: Fold::Add,
            term: Term::mul(Term::Input, Term::Input),
        }],
        eval: EvalExpr::Acc(0),
    }
}

#[test]
fn scripted_udf_runs_three_phase_across_partitions() {
    let partitions = [
        keyed_table(&["a"], &[1.0]),
        keyed_table(&["a", "b"], &[2.0, 3.0]),
    ];
    let op = AggregationOperator::new(
        vec![0],
        vec![SpecEntry::new(
            1,
            AggregateCall::user(UserFunction::scripted(sum_of_squares_script())),
        )],
    );
    let by_key = by_key(&run_one(op, &partitions));
    assert_eq!(by_key["a"], Value::Number(5.0));
    assert_eq!(by_key["b"], Value::Number(9.0));
}

#[test]
fn descriptor_reports_udf_layout_and_sentinel() {
    let table = keyed_table(&["a", "b"], &[1.0, 2.0]);
    let mut session = GroupbySession::new();
    let op = AggregationOperator::new(
        vec![0],
        vec![
            SpecEntry::new(1, AggregateCall::new(AggregateKind::Sum)),
            SpecEntry::new(
                1,
                AggregateCall::user(UserFunction::scripted(sum_of_squares_script())),
            ),
        ],
    );
    let live: HashSet<usize> = [0, 1].into_iter().collect();
    let mut compiled = session
        .compile(op, &table, &live, true, &[Distribution::FixedBlock])
        .unwrap()
        .unwrap();

    let d = &compiled.descriptor;
    assert_eq!(d.function_type_codes, vec![6, 25, 0]);
    // sum exposes 1 output sub-column; the 1-accumulator UDF exposes 1 + 1.
    assert_eq!(d.output_offsets, vec![0, 1, 3]);
    assert_eq!(d.accumulator_counts, vec![1]);
    assert_eq!(d.udf_callbacks.len(), 1);
    assert_eq!(d.n_keys, 1);
    assert!(d.total_rows.is_none());

    // update/combine/eval registered under distinct addresses.
    assert_eq!(session.registry().len(), 3);

    let layout = build_group_layout(std::slice::from_ref(&table), &[0], 1, true);
    session
        .execute(
            &mut compiled,
            std::slice::from_ref(&table),
            &layout,
            &InProcessExchange,
        )
        .unwrap();
    assert_eq!(compiled.descriptor.total_rows, Some(2));

    // Disposal releases the operator's registrations and further execution
    // is refused.
    session.dispose(&mut compiled);
    assert!(session.registry().is_empty());
    let err = session
        .execute(
            &mut compiled,
            std::slice::from_ref(&table),
            &layout,
            &InProcessExchange,
        )
        .unwrap_err();
    assert!(matches!(err, AggError::OperatorDisposed));
}

#[test]
fn general_udf_sees_whole_groups() {
    let partitions = [
        keyed_table(&["a", "b"], &[1.0, 5.0]),
        keyed_table(&["a"], &[9.0]),
    ];
    let range = UserFunction::General(Arc::new(|values: &[f64]| {
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (!values.is_empty()).then(|| max - min)
    }));
    let op = AggregationOperator::new(
        vec![0],
        vec![SpecEntry::new(1, AggregateCall::user(range))],
    );
    let by_key = by_key(&run_one(op, &partitions));
    assert_eq!(by_key["a"], Value::Number(8.0));
    assert_eq!(by_key["b"], Value::Number(0.0));
}

#[test]
fn failed_decomposition_needs_an_explicit_fallback() {
    let latest = ReduceScript {
        name: "latest".to_string(),
        accumulators: vec![Accumulator {
            fold: Fold::Replace,
            term: Term::Input,
        }],
        eval: EvalExpr::Acc(0),
    };
    let table = keyed_table(&["a", "a"], &[1.0, 2.0]);

    // Without a fallback the operator fails to compile.
    let op = AggregationOperator::new(
        vec![0],
        vec![SpecEntry::new(
            1,
            AggregateCall::user(UserFunction::scripted(latest.clone())),
        )],
    );
    let err = GroupbySession::new()
        .run(op, std::slice::from_ref(&table))
        .unwrap_err();
    assert!(matches!(err, AggError::UnsupportedUserFunction { .. }));

    // With one, the spec runs in general mode over colocated groups.
    let with_fallback = UserFunction::Scripted {
        script: latest,
        fallback: Some(Arc::new(|values: &[f64]| values.last().copied())),
    };
    let op = AggregationOperator::new(
        vec![0],
        vec![SpecEntry::new(1, AggregateCall::user(with_fallback))],
    );
    let by_key = by_key(&run_one(op, &[table]));
    assert_eq!(by_key["a"], Value::Number(2.0));
}

#[test]
fn dropped_na_keys_never_reach_any_group() {
    let keys = vec![Value::from("a"), Value::Null, Value::from("a")];
    let mut builder = TableBuilder::new();
    builder
        .push_column(
            "k",
            Arc::new(Column::from_values(gather_columnar::ElemKind::Utf8, &keys)),
        )
        .push_column("x", Arc::new(Column::from_f64s(vec![1.0, 100.0, 2.0])));
    let table = builder.build().unwrap();

    let op = AggregationOperator::new(
        vec![0],
        vec![SpecEntry::new(1, AggregateCall::new(AggregateKind::Sum))],
    );
    let rows = sorted_rows(&run_one(op, &[table]));
    assert_eq!(rows, vec![vec![Value::from("a"), Value::Number(3.0)]]);
}

#[test]
fn return_key_false_emits_value_columns_only() {
    let table = keyed_table(&["a", "b"], &[1.0, 2.0]);
    let mut op = AggregationOperator::new(
        vec![0],
        vec![SpecEntry::new(1, AggregateCall::new(AggregateKind::Sum))],
    );
    op.return_key = false;
    let outputs = run_one(op, &[table]);
    for table in &outputs {
        assert_eq!(table.column_count(), 1);
    }
    let total: usize = outputs.iter().map(Table::row_count).sum();
    assert_eq!(total, 2);
}

#[test]
fn multi_key_grouping_with_shuffle_key_subset() {
    let mut builder = TableBuilder::new();
    builder
        .push_column("k1", Arc::new(Column::from_strs(["x", "x", "y", "x"])))
        .push_column("k2", Arc::new(Column::from_i64s(vec![1, 2, 1, 1])))
        .push_column("v", Arc::new(Column::from_f64s(vec![1.0, 2.0, 3.0, 4.0])));
    let table = builder.build().unwrap();

    let mut op = AggregationOperator::new(
        vec![0, 1],
        vec![SpecEntry::new(2, AggregateCall::new(AggregateKind::Sum))],
    );
    op.num_shuffle_keys = Some(1);

    let rows = sorted_rows(&run_one(op, &[table]));
    assert_eq!(
        rows,
        vec![
            vec![Value::from("x"), Value::Int(1), Value::Number(5.0)],
            vec![Value::from("x"), Value::Int(2), Value::Number(2.0)],
            vec![Value::from("y"), Value::Int(1), Value::Number(3.0)],
        ]
    );
}
