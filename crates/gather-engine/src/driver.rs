//! The execution driver: compiles an [`AggregationOperator`] into a runnable
//! program and drives it across worker partitions.
//!
//! Decomposable operators run the three-phase protocol: a pure-local update
//! pass folds rows into per-bucket accumulators, the combine exchange routes
//! partial accumulator rows to each group's owning partition and merges them
//! (the only synchronization barrier), and eval turns finished accumulators
//! into output columns. Operators containing any kind with no combine step
//! instead colocate whole rows by group first and run one sequential pass
//! per group.

use crate::bridge::{CallbackAddr, CallbackEntry, CallbackPhase, CallbackRegistry, CallbackTarget};
use crate::descriptor::{CallDescriptor, UdfCallbacks};
use crate::distribution::{propagate, Distribution, OperatorDistribution};
use crate::error::{AggError, AggResult};
use crate::exchange::{
    build_group_layout, GroupLayout, InProcessExchange, PartialRow, PartitionExchange, RoutedRow,
};
use crate::parallel::map_partitions;
use crate::programs::{builtin_reduction, median, null_policy, nunique, output_kind, NullPolicy};
use crate::programs::{cumulative, shift_group};
use crate::prune::prune;
use crate::reduce::{decompose, GeneralFn, Reduction, UserFunction};
use crate::spec::{AggregateCall, AggregateKind, AggregationOperator, TransformKind};
use gather_columnar::{BitVec, Column, ElemKind, Table, TableBuilder, Value};
use smallvec::SmallVec;
use std::collections::HashSet;
use std::sync::Arc;

/// Operator lifecycle. Compilation walks the states in order; `execute`
/// requires `Lowered` and `dispose` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatorState {
    Declared,
    Pruned,
    DistributionTagged,
    Compiled,
    Lowered,
    Executing,
    Disposed,
}

impl OperatorState {
    fn name(self) -> &'static str {
        match self {
            OperatorState::Declared => "declared",
            OperatorState::Pruned => "pruned",
            OperatorState::DistributionTagged => "distribution-tagged",
            OperatorState::Compiled => "compiled",
            OperatorState::Lowered => "lowered",
            OperatorState::Executing => "executing",
            OperatorState::Disposed => "disposed",
        }
    }
}

enum SpecProgram {
    /// Built-in decomposable kind; executed directly.
    Builtin(Arc<dyn Reduction>),
    /// Decomposed user reduction; invoked through its registered addresses.
    Udf {
        update: CallbackAddr,
        combine: CallbackAddr,
        eval: CallbackAddr,
    },
    /// `median` / `nunique`: one scalar per materialized group.
    GroupScalar,
    /// Cumulatives, `shift`, `head`, `transform`, `ngroup`: one output row
    /// per input row (or a row subset).
    RowShaped,
    /// General user function, invoked through its registered address.
    General(CallbackAddr),
}

struct CompiledSpec {
    input: Option<usize>,
    call: AggregateCall,
    program: SpecProgram,
    policy: NullPolicy,
    out_kind: ElemKind,
    acc_offset: usize,
    n_accs: usize,
    name: String,
}

/// A compiled, lowered aggregation operator.
pub struct CompiledOperator {
    id: u64,
    pub op: AggregationOperator,
    state: OperatorState,
    specs: Vec<CompiledSpec>,
    colocated: bool,
    pub distribution: OperatorDistribution,
    pub descriptor: CallDescriptor,
    total_accs: usize,
}

impl CompiledOperator {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> OperatorState {
        self.state
    }

    /// Whether execution uses the pre-aggregation (colocate-by-key)
    /// protocol instead of the three-phase protocol.
    pub fn is_colocated(&self) -> bool {
        self.colocated
    }
}

// Runtime view of one spec with callbacks resolved to callables.
enum RuntimeProg {
    Reduction {
        update: Arc<dyn Reduction>,
        combine: Arc<dyn Reduction>,
        eval: Arc<dyn Reduction>,
    },
    GroupScalar,
    RowShaped,
    General(GeneralFn),
}

struct RuntimeSpec<'a> {
    spec: &'a CompiledSpec,
    prog: RuntimeProg,
}

/// An execution session: owns the callback registry and operator ids.
#[derive(Default)]
pub struct GroupbySession {
    registry: CallbackRegistry,
    next_operator_id: u64,
}

impl GroupbySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    /// Run the full compilation pipeline: validate, prune, distribution-tag,
    /// compile each spec, and lower to a call descriptor.
    ///
    /// Returns `Ok(None)` when pruning finds every output dead and the
    /// operator is eliminated outright.
    pub fn compile(
        &mut self,
        mut op: AggregationOperator,
        input: &Table,
        live_out: &HashSet<usize>,
        index_live: bool,
        input_tags: &[Distribution],
    ) -> AggResult<Option<CompiledOperator>> {
        op.validate(input)?;

        if !prune(&mut op, live_out, index_live, input.index().is_some()) {
            return Ok(None);
        }

        let distribution = propagate(input_tags, &[]);
        log::debug!(
            "operator distribution: input={:?} output={:?}",
            distribution.input,
            distribution.output
        );

        self.next_operator_id += 1;
        let id = self.next_operator_id;

        let mut specs = Vec::new();
        let mut total_accs = 0usize;
        let mut colocated = false;
        for (out, entry) in op.specs.iter().enumerate() {
            if op.dead_out_inds.contains(&out) {
                continue;
            }
            let call = entry.call.clone();
            let name = match entry.input {
                Some(input_idx) => input
                    .name(input_idx)
                    .unwrap_or(call.kind.name())
                    .to_string(),
                None => call.kind.name().to_string(),
            };

            let mut compiled = self.compile_spec(id, out, entry.input, call, name)?;
            if compiled.call.kind.needs_colocation() {
                colocated = true;
            }
            compiled.acc_offset = total_accs;
            total_accs += compiled.n_accs;
            specs.push(compiled);
        }

        let descriptor = lower(&op, &specs);
        log::debug!(
            "operator {id} lowered: {} specs, {} accumulator columns, {} protocol",
            specs.len(),
            total_accs,
            if colocated { "colocated" } else { "three-phase" }
        );

        Ok(Some(CompiledOperator {
            id,
            op,
            state: OperatorState::Lowered,
            specs,
            colocated,
            distribution,
            descriptor,
            total_accs,
        }))
    }

    fn compile_spec(
        &mut self,
        operator_id: u64,
        out: usize,
        input: Option<usize>,
        mut call: AggregateCall,
        name: String,
    ) -> AggResult<CompiledSpec> {
        let mut n_accs = 0usize;
        let program = match call.kind {
            AggregateKind::Median | AggregateKind::Nunique => SpecProgram::GroupScalar,
            k if k.is_row_shaped() => SpecProgram::RowShaped,
            AggregateKind::Udf | AggregateKind::GenUdf => {
                let user = call
                    .user
                    .clone()
                    .expect("validate() guarantees a user function");
                match self.compile_user(operator_id, out, user)? {
                    CompiledUser::Regular {
                        program,
                        update,
                        combine,
                        eval,
                    } => {
                        n_accs = program.n_accumulators();
                        call.kind = AggregateKind::Udf;
                        SpecProgram::Udf {
                            update,
                            combine,
                            eval,
                        }
                    }
                    CompiledUser::General(addr) => {
                        call.kind = AggregateKind::GenUdf;
                        SpecProgram::General(addr)
                    }
                }
            }
            kind => {
                let program = builtin_reduction(kind)
                    .expect("every remaining kind has a built-in reduction");
                n_accs = program.n_accumulators();
                SpecProgram::Builtin(program)
            }
        };

        Ok(CompiledSpec {
            input,
            policy: null_policy(call.kind, call.skip_na),
            out_kind: output_kind(call.kind),
            acc_offset: 0,
            n_accs,
            name,
            program,
            call,
        })
    }

    fn compile_user(
        &mut self,
        operator_id: u64,
        out: usize,
        user: UserFunction,
    ) -> AggResult<CompiledUser> {
        let (program, name): (Arc<dyn Reduction>, String) = match user {
            UserFunction::Scripted { script, fallback } => match decompose(&script) {
                Ok(reduction) => (Arc::new(reduction), script.name),
                Err(reason) => {
                    let Some(general) = fallback else {
                        return Err(AggError::UnsupportedUserFunction {
                            name: script.name,
                            reason,
                        });
                    };
                    log::debug!(
                        "user function {} runs in general mode: {reason}",
                        script.name
                    );
                    let addr = self.register_general(operator_id, out, general)?;
                    return Ok(CompiledUser::General(addr));
                }
            },
            UserFunction::Program { name, program } => (program, name),
            UserFunction::General(general) => {
                let addr = self.register_general(operator_id, out, general)?;
                return Ok(CompiledUser::General(addr));
            }
        };

        let acc_kinds = vec![ElemKind::Float64; program.n_accumulators()];
        let mut register = |phase: CallbackPhase, suffix: &str| {
            self.registry.register(CallbackEntry {
                symbol: format!("gb_udf_{suffix}_{operator_id}_{out}_{name}"),
                phase,
                operator_id,
                acc_kinds: acc_kinds.clone(),
                target: CallbackTarget::Reduction(program.clone()),
            })
        };
        let update = register(CallbackPhase::Update, "update")?;
        let combine = register(CallbackPhase::Combine, "combine")?;
        let eval = register(CallbackPhase::Eval, "eval")?;

        Ok(CompiledUser::Regular {
            program,
            update,
            combine,
            eval,
        })
    }

    fn register_general(
        &mut self,
        operator_id: u64,
        out: usize,
        general: GeneralFn,
    ) -> AggResult<CallbackAddr> {
        self.registry.register(CallbackEntry {
            symbol: format!("gb_general_{operator_id}_{out}"),
            phase: CallbackPhase::General,
            operator_id,
            acc_kinds: Vec::new(),
            target: CallbackTarget::General(general),
        })
    }

    /// Execute a lowered operator over partitioned data, producing one output
    /// table per partition.
    pub fn execute(
        &self,
        compiled: &mut CompiledOperator,
        partitions: &[Table],
        layout: &GroupLayout,
        exchange: &dyn PartitionExchange,
    ) -> AggResult<Vec<Table>> {
        match compiled.state {
            OperatorState::Lowered => {}
            OperatorState::Disposed => return Err(AggError::OperatorDisposed),
            other => {
                return Err(AggError::InvalidState {
                    expected: OperatorState::Lowered.name(),
                    found: other.name(),
                })
            }
        }
        if partitions.is_empty() {
            return Err(AggError::EmptyGroupSet);
        }
        debug_assert_eq!(layout.n_partitions(), partitions.len());
        for (table, pg) in partitions.iter().zip(&layout.partitions) {
            debug_assert_eq!(table.row_count(), pg.row_to_group.len());
        }

        compiled.state = OperatorState::Executing;
        let runtime = self.resolve_runtime(compiled)?;
        let result = if compiled.colocated {
            execute_colocated(compiled, &runtime, partitions, layout, exchange)
        } else {
            execute_three_phase(compiled, &runtime, partitions, layout, exchange)
        };
        compiled.state = OperatorState::Lowered;

        let outputs = result?;
        compiled.descriptor.total_rows = Some(outputs.iter().map(Table::row_count).sum());
        Ok(outputs)
    }

    /// Convenience entry point: group each partition with the in-process
    /// reference engine and execute with the in-process exchange.
    pub fn run(
        &mut self,
        op: AggregationOperator,
        partitions: &[Table],
    ) -> AggResult<Vec<Table>> {
        let first = partitions.first().ok_or(AggError::EmptyGroupSet)?;
        let live_out: HashSet<usize> = (0..op.specs.len()).collect();
        let tags = vec![Distribution::FixedBlock; partitions.len()];
        let mut compiled = self
            .compile(op, first, &live_out, true, &tags)?
            .expect("no outputs are dead");

        let layout = build_group_layout(
            partitions,
            &compiled.op.key_inds,
            compiled.op.shuffle_keys(),
            compiled.op.drop_na_keys,
        );
        let outputs = self.execute(&mut compiled, partitions, &layout, &InProcessExchange)?;
        self.dispose(&mut compiled);
        Ok(outputs)
    }

    /// Release the operator's native buffers and callback registrations.
    pub fn dispose(&mut self, compiled: &mut CompiledOperator) {
        if compiled.state == OperatorState::Disposed {
            return;
        }
        self.registry.release_operator(compiled.id);
        compiled.state = OperatorState::Disposed;
        log::debug!("operator {} disposed", compiled.id);
    }

    fn resolve_runtime<'a>(&self, compiled: &'a CompiledOperator) -> AggResult<Vec<RuntimeSpec<'a>>> {
        let resolve_reduction = |addr: CallbackAddr| -> AggResult<Arc<dyn Reduction>> {
            self.registry
                .resolve(addr)
                .and_then(|entry| entry.reduction().cloned())
                .ok_or(AggError::OperatorDisposed)
        };

        compiled
            .specs
            .iter()
            .map(|spec| {
                let prog = match &spec.program {
                    SpecProgram::Builtin(program) => RuntimeProg::Reduction {
                        update: program.clone(),
                        combine: program.clone(),
                        eval: program.clone(),
                    },
                    SpecProgram::Udf {
                        update,
                        combine,
                        eval,
                    } => RuntimeProg::Reduction {
                        update: resolve_reduction(*update)?,
                        combine: resolve_reduction(*combine)?,
                        eval: resolve_reduction(*eval)?,
                    },
                    SpecProgram::GroupScalar => RuntimeProg::GroupScalar,
                    SpecProgram::RowShaped => RuntimeProg::RowShaped,
                    SpecProgram::General(addr) => RuntimeProg::General(
                        self.registry
                            .resolve(*addr)
                            .and_then(|entry| entry.general().cloned())
                            .ok_or(AggError::OperatorDisposed)?,
                    ),
                };
                Ok(RuntimeSpec { spec, prog })
            })
            .collect()
    }
}

enum CompiledUser {
    Regular {
        program: Arc<dyn Reduction>,
        update: CallbackAddr,
        combine: CallbackAddr,
        eval: CallbackAddr,
    },
    General(CallbackAddr),
}

fn lower(op: &AggregationOperator, specs: &[CompiledSpec]) -> CallDescriptor {
    let mut function_type_codes = Vec::with_capacity(specs.len() + 1);
    let mut output_offsets = vec![0i32];
    let mut accumulator_counts = Vec::new();
    let mut udf_callbacks = Vec::new();

    for spec in specs {
        function_type_codes.push(spec.call.kind.code());
        let sub_cols = match &spec.program {
            // A decomposed UDF exposes its accumulator columns after the
            // result column.
            SpecProgram::Udf { .. } => 1 + spec.n_accs as i32,
            _ => 1,
        };
        output_offsets.push(output_offsets.last().unwrap() + sub_cols);

        match &spec.program {
            SpecProgram::Udf {
                update,
                combine,
                eval,
            } => {
                accumulator_counts.push(spec.n_accs as i32);
                udf_callbacks.push(UdfCallbacks::Regular {
                    update: *update,
                    combine: *combine,
                    eval: *eval,
                });
            }
            SpecProgram::General(general) => {
                accumulator_counts.push(0);
                udf_callbacks.push(UdfCallbacks::General { general: *general });
            }
            _ => {}
        }
    }
    function_type_codes.push(0);

    CallDescriptor {
        function_type_codes,
        output_offsets,
        accumulator_counts,
        udf_callbacks,
        n_keys: op.n_keys(),
        num_shuffle_keys: op.shuffle_keys(),
        drop_na_keys: op.drop_na_keys,
        return_key: op.return_key,
        keep_original_index: op.keep_original_index,
        live_in_inds: op.live_in_inds(),
        live_out_inds: op.live_out_inds(),
        total_rows: None,
    }
}

fn row_bases(partitions: &[Table]) -> Vec<usize> {
    let mut bases = Vec::with_capacity(partitions.len());
    let mut base = 0;
    for table in partitions {
        bases.push(base);
        base += table.row_count();
    }
    bases
}

// Original row identity: the index column when the table has one, otherwise
// the global row position.
fn row_index_value(table: &Table, row: usize, base: usize) -> Value {
    match table.index() {
        Some(index) => index.value(row),
        None => Value::Int((base + row) as i64),
    }
}

fn row_position(table: &Table, row: usize, base: usize) -> i64 {
    match row_index_value(table, row, base) {
        Value::Int(v) => v,
        _ => (base + row) as i64,
    }
}

// Numeric lane read for one spec. String columns surface their dictionary
// code (valid for counting kinds only; validate() rejects the rest).
fn read_lane(table: &Table, input: Option<usize>, row: usize) -> Option<f64> {
    let Some(col) = input.and_then(|i| table.column(i)) else {
        // Input-less kinds (`size`, `ngroup`) fold a placeholder.
        return Some(0.0);
    };
    match col.kind() {
        ElemKind::Utf8 => col.dict_code(row).map(|code| code as f64),
        _ => col.lane_f64(row),
    }
}

fn column_from_lane(kind: ElemKind, values: Vec<Option<f64>>) -> Column {
    match kind {
        ElemKind::Int64 => {
            Column::from_opt_i64s(values.into_iter().map(|v| v.map(|v| v as i64)).collect())
        }
        ElemKind::Bool => {
            Column::from_opt_bools(values.into_iter().map(|v| v.map(|v| v != 0.0)).collect())
        }
        _ => Column::from_opt_f64s(values),
    }
}

struct LocalState {
    accs: Vec<f64>,
    poisoned: Vec<BitVec>,
}

fn init_accs(runtime: &[RuntimeSpec<'_>], n_groups: usize, total_accs: usize) -> Vec<f64> {
    let mut accs = vec![0.0; n_groups * total_accs];
    for rs in runtime {
        let RuntimeProg::Reduction { update, .. } = &rs.prog else {
            continue;
        };
        let init = update.init();
        for g in 0..n_groups {
            let at = g * total_accs + rs.spec.acc_offset;
            accs[at..at + rs.spec.n_accs].copy_from_slice(&init);
        }
    }
    accs
}

fn execute_three_phase(
    compiled: &CompiledOperator,
    runtime: &[RuntimeSpec<'_>],
    partitions: &[Table],
    layout: &GroupLayout,
    exchange: &dyn PartitionExchange,
) -> AggResult<Vec<Table>> {
    let n_parts = partitions.len();
    let total_accs = compiled.total_accs;
    let bases = row_bases(partitions);

    // Phase 1: pure-local update, no synchronization.
    let local: Vec<LocalState> = map_partitions(n_parts, |p| {
        let table = &partitions[p];
        let pg = &layout.partitions[p];
        let mut state = LocalState {
            accs: init_accs(runtime, pg.n_groups, total_accs),
            poisoned: runtime
                .iter()
                .map(|_| BitVec::with_len_all_false(pg.n_groups))
                .collect(),
        };

        for row in 0..table.row_count() {
            let g = pg.row_to_group[row];
            if g < 0 {
                continue;
            }
            let g = g as usize;
            let pos = row_position(table, row, bases[p]);
            for (si, rs) in runtime.iter().enumerate() {
                let RuntimeProg::Reduction { update, .. } = &rs.prog else {
                    continue;
                };
                let at = g * total_accs + rs.spec.acc_offset;
                let acc = &mut state.accs[at..at + rs.spec.n_accs];
                match read_lane(table, rs.spec.input, row) {
                    Some(v) => update.update(acc, v, pos),
                    None => match rs.spec.policy {
                        NullPolicy::SkipAlways => {}
                        NullPolicy::IncludeAll => update.update(acc, 0.0, pos),
                        NullPolicy::SkipOrPoison => state.poisoned[si].set(g, true),
                    },
                }
            }
        }
        state
    });

    // Phase 2: the combine barrier. Every bucket's partial accumulator row is
    // routed to the group's owner and merged there; a group is final only
    // after every partition's contribution arrived.
    let outbound: Vec<Vec<(usize, PartialRow)>> = local
        .iter()
        .enumerate()
        .map(|(p, state)| {
            let pg = &layout.partitions[p];
            (0..pg.n_groups)
                .map(|g| {
                    let (dest, slot) = pg.owner[g];
                    let at = g * total_accs;
                    (
                        dest,
                        PartialRow {
                            slot,
                            accs: SmallVec::from_slice(&state.accs[at..at + total_accs]),
                            poisoned: runtime
                                .iter()
                                .enumerate()
                                .map(|(si, _)| state.poisoned[si].get(g))
                                .collect(),
                        },
                    )
                })
                .collect()
        })
        .collect();
    let inbound = exchange.exchange_partials(outbound);

    let owned: Vec<LocalState> = map_partitions(n_parts, |p| {
        let n_owned = layout.owned_counts[p];
        let mut state = LocalState {
            accs: init_accs(runtime, n_owned, total_accs),
            poisoned: runtime
                .iter()
                .map(|_| BitVec::with_len_all_false(n_owned))
                .collect(),
        };
        for partial in &inbound[p] {
            let at = partial.slot * total_accs;
            for (si, rs) in runtime.iter().enumerate() {
                let RuntimeProg::Reduction { combine, .. } = &rs.prog else {
                    continue;
                };
                let off = rs.spec.acc_offset;
                let acc = &mut state.accs[at + off..at + off + rs.spec.n_accs];
                combine.combine(acc, &partial.accs[off..off + rs.spec.n_accs]);
                if partial.poisoned[si] {
                    state.poisoned[si].set(partial.slot, true);
                }
            }
        }
        state
    });

    // Phase 3: eval finished accumulators into output columns.
    let tables: Vec<Result<Table, gather_columnar::ColumnarError>> = map_partitions(n_parts, |p| {
        let n_owned = layout.owned_counts[p];
        let state = &owned[p];

        let mut builder = TableBuilder::new();
        push_key_columns(&mut builder, compiled, partitions, layout, p);
        for (si, rs) in runtime.iter().enumerate() {
            let RuntimeProg::Reduction { eval, .. } = &rs.prog else {
                continue;
            };
            let values: Vec<Option<f64>> = (0..n_owned)
                .map(|s| {
                    if state.poisoned[si].get(s) {
                        return None;
                    }
                    let at = s * total_accs + rs.spec.acc_offset;
                    eval.eval(&state.accs[at..at + rs.spec.n_accs])
                })
                .collect();
            builder.push_column(
                rs.spec.name.clone(),
                Arc::new(column_from_lane(rs.spec.out_kind, values)),
            );
        }
        builder.build()
    });

    tables
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .map_err(AggError::from)
}

fn push_key_columns(
    builder: &mut TableBuilder,
    compiled: &CompiledOperator,
    partitions: &[Table],
    layout: &GroupLayout,
    p: usize,
) {
    if !compiled.op.return_key {
        return;
    }
    let input = &partitions[0];
    for (k, &key_ind) in compiled.op.key_inds.iter().enumerate() {
        let kind = input.kind(key_ind).unwrap_or(ElemKind::Int64);
        let values: Vec<Value> = layout.owned_keys[p]
            .iter()
            .map(|key| key[k].clone())
            .collect();
        let name = input.name(key_ind).unwrap_or("key").to_string();
        builder.push_column(name, Arc::new(Column::from_values(kind, &values)));
    }
}

fn execute_colocated(
    compiled: &CompiledOperator,
    runtime: &[RuntimeSpec<'_>],
    partitions: &[Table],
    layout: &GroupLayout,
    exchange: &dyn PartitionExchange,
) -> AggResult<Vec<Table>> {
    let n_parts = partitions.len();
    let bases = row_bases(partitions);

    // Pre-aggregation exchange: every row of a logical group moves to the
    // group's owner before any aggregation runs.
    let outbound: Vec<Vec<(usize, RoutedRow)>> = map_partitions(n_parts, |p| {
        let table = &partitions[p];
        let pg = &layout.partitions[p];
        let mut rows = Vec::new();
        for row in 0..table.row_count() {
            let g = pg.row_to_group[row];
            if g < 0 {
                continue;
            }
            let (dest, slot) = pg.owner[g as usize];
            rows.push((
                dest,
                RoutedRow {
                    slot,
                    index: row_index_value(table, row, bases[p]),
                    position: row_position(table, row, bases[p]),
                    values: runtime
                        .iter()
                        .map(|rs| read_lane(table, rs.spec.input, row))
                        .collect(),
                },
            ));
        }
        rows
    });
    let inbound = exchange.colocate_rows(outbound);

    let row_shaped = compiled
        .specs
        .iter()
        .any(|spec| spec.call.kind.is_row_shaped());
    let ordinal_bases = layout.ordinal_bases();
    let index_kind = partitions
        .iter()
        .find_map(|t| t.index().map(|c| c.kind()))
        .unwrap_or(ElemKind::Int64);

    let tables: Vec<Result<Table, gather_columnar::ColumnarError>> = map_partitions(n_parts, |p| {
        // Materialize groups in owner-slot order, preserving arrival order
        // within each group.
        let n_owned = layout.owned_counts[p];
        let mut groups: Vec<Vec<&RoutedRow>> = vec![Vec::new(); n_owned];
        for row in &inbound[p] {
            groups[row.slot].push(row);
        }

        if row_shaped {
            build_row_shaped_output(compiled, runtime, &groups, ordinal_bases[p], index_kind)
        } else {
            build_group_shaped_output(compiled, runtime, partitions, layout, p, &groups)
        }
    });

    tables
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .map_err(AggError::from)
}

// One sequential pass per group, no combine step: the group is whole on this
// partition.
fn group_scalar(
    rs: &RuntimeSpec<'_>,
    rows: &[&RoutedRow],
    si: usize,
) -> Option<f64> {
    let spec = rs.spec;
    let values: Vec<Option<f64>> = rows.iter().map(|r| r.values[si]).collect();
    match &rs.prog {
        RuntimeProg::Reduction { update, eval, .. } => {
            let mut acc = update.init();
            for row in rows {
                match row.values[si] {
                    Some(v) => update.update(&mut acc, v, row.position),
                    None => match spec.policy {
                        NullPolicy::SkipAlways => {}
                        NullPolicy::IncludeAll => update.update(&mut acc, 0.0, row.position),
                        NullPolicy::SkipOrPoison => return None,
                    },
                }
            }
            eval.eval(&acc)
        }
        RuntimeProg::GroupScalar => match spec.call.kind {
            AggregateKind::Median => median(&values, spec.call.skip_na),
            AggregateKind::Nunique => Some(nunique(&values, spec.call.skip_na) as f64),
            _ => unreachable!("not a group-scalar kind"),
        },
        RuntimeProg::General(f) => {
            if !spec.call.skip_na && values.iter().any(|v| v.is_none()) {
                return None;
            }
            let valid: Vec<f64> = values.into_iter().flatten().collect();
            f(&valid)
        }
        RuntimeProg::RowShaped => unreachable!("row-shaped specs build whole columns"),
    }
}

fn build_group_shaped_output(
    compiled: &CompiledOperator,
    runtime: &[RuntimeSpec<'_>],
    partitions: &[Table],
    layout: &GroupLayout,
    p: usize,
    groups: &[Vec<&RoutedRow>],
) -> Result<Table, gather_columnar::ColumnarError> {
    let mut builder = TableBuilder::new();
    push_key_columns(&mut builder, compiled, partitions, layout, p);
    for (si, rs) in runtime.iter().enumerate() {
        let values: Vec<Option<f64>> = groups
            .iter()
            .map(|rows| group_scalar(rs, rows, si))
            .collect();
        builder.push_column(
            rs.spec.name.clone(),
            Arc::new(column_from_lane(rs.spec.out_kind, values)),
        );
    }
    builder.build()
}

fn transform_scalar(
    inner: TransformKind,
    values: &[Option<f64>],
    positions: &[i64],
    skip_na: bool,
) -> Option<f64> {
    match inner {
        TransformKind::Median => median(values, skip_na),
        TransformKind::Nunique => Some(nunique(values, skip_na) as f64),
        _ => {
            let kind = inner.as_aggregate();
            let program = builtin_reduction(kind).expect("transform inner is decomposable");
            let policy = null_policy(kind, skip_na);
            let mut acc = program.init();
            for (v, pos) in values.iter().zip(positions) {
                match v {
                    Some(v) => program.update(&mut acc, *v, *pos),
                    None => match policy {
                        NullPolicy::SkipAlways => {}
                        NullPolicy::IncludeAll => program.update(&mut acc, 0.0, *pos),
                        NullPolicy::SkipOrPoison => return None,
                    },
                }
            }
            program.eval(&acc)
        }
    }
}

fn build_row_shaped_output(
    compiled: &CompiledOperator,
    runtime: &[RuntimeSpec<'_>],
    groups: &[Vec<&RoutedRow>],
    ordinal_base: usize,
    index_kind: ElemKind,
) -> Result<Table, gather_columnar::ColumnarError> {
    // All specs share one row-shaped kind (validate() enforces this), so one
    // keep-mask applies to every column and the index.
    let head_n = compiled.specs.first().map_or(0, |s| s.call.head_n) as usize;
    let is_head = compiled
        .specs
        .first()
        .is_some_and(|s| s.call.kind == AggregateKind::Head);
    let keep = |row_in_group: usize| !is_head || row_in_group < head_n;

    let mut builder = TableBuilder::new();
    for (si, rs) in runtime.iter().enumerate() {
        let spec = rs.spec;
        let mut out: Vec<Option<f64>> = Vec::new();
        for (slot, rows) in groups.iter().enumerate() {
            let values: Vec<Option<f64>> = rows.iter().map(|r| r.values[si]).collect();
            let positions: Vec<i64> = rows.iter().map(|r| r.position).collect();
            let group_out: Vec<Option<f64>> = match spec.call.kind {
                k if k.is_cumulative() => cumulative(k, &values, spec.call.skip_na),
                AggregateKind::Shift => shift_group(&values, spec.call.periods),
                AggregateKind::Head => values.clone(),
                AggregateKind::Ngroup => {
                    vec![Some((ordinal_base + slot) as f64); rows.len()]
                }
                AggregateKind::Transform => {
                    let inner = spec
                        .call
                        .transform_inner
                        .expect("validate() guarantees a transform inner");
                    let scalar = transform_scalar(inner, &values, &positions, spec.call.skip_na);
                    vec![scalar; rows.len()]
                }
                _ => unreachable!("not a row-shaped kind"),
            };
            out.extend(
                group_out
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| keep(*i))
                    .map(|(_, v)| v),
            );
        }
        builder.push_column(
            spec.name.clone(),
            Arc::new(column_from_lane(spec.out_kind, out)),
        );
    }

    if compiled.op.keep_original_index {
        let mut index_values = Vec::new();
        for rows in groups {
            for (i, row) in rows.iter().enumerate() {
                if keep(i) {
                    index_values.push(row.index.clone());
                }
            }
        }
        builder.set_index(Arc::new(Column::from_values(index_kind, &index_values)));
    }

    builder.build()
}
