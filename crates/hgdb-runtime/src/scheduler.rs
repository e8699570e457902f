//! Breakpoint scheduling: ordering, batching, and evaluation.
//!
//! The scheduler owns the in-memory inserted breakpoints, keeps them sorted
//! by the persisted execution order, and produces the next batch to evaluate
//! for the active mode. Peer instances of the same source statement coalesce
//! into one batch and evaluate in parallel; each inserted breakpoint carries
//! its own compiled expressions, so the only shared resource during a batch
//! is the signal value cache.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use rayon::prelude::*;
use tracing::{debug, error};

use crate::expr::{DebugExpression, INSTANCE_VAR_NAME, TIME_VAR_NAME};
use crate::monitor::{Monitor, WatchKind};
use crate::rtl::{RtlClient, SignalHandle};
use crate::symbol::{Breakpoint, SymbolTable};

// ── Value cache ───────────────────────────────────────────────────────────────

/// Per-sweep signal value cache.
///
/// Every simulator read during evaluation goes through [`get`](Self::get);
/// the internal mutex doubles as the serialization point for the VPI surface,
/// which is not assumed thread-safe. Caching itself is switchable at runtime.
pub struct ValueCache {
    values: Mutex<(bool, HashMap<String, i64>)>,
}

impl ValueCache {
    pub fn new() -> Self {
        Self {
            values: Mutex::new((false, HashMap::new())),
        }
    }

    /// Clear the cache and set whether reads are memoized this sweep.
    pub fn start_sweep(&self, enabled: bool) {
        let mut inner = self.values.lock().unwrap();
        inner.0 = enabled;
        inner.1.clear();
    }

    pub fn get(&self, name: &str, rtl: &RtlClient) -> Option<i64> {
        let mut inner = self.values.lock().unwrap();
        if inner.0 {
            if let Some(value) = inner.1.get(name) {
                return Some(*value);
            }
        }
        // the read happens under the lock: the simulator surface is
        // single-reader
        let value = rtl.get_value_by_name(name)?;
        if inner.0 {
            inner.1.insert(name.to_string(), value);
        }
        Some(value)
    }
}

impl Default for ValueCache {
    fn default() -> Self {
        Self::new()
    }
}

// ── Inserted breakpoints ──────────────────────────────────────────────────────

/// How the scheduler selects breakpoints each clock edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvaluationMode {
    #[default]
    None,
    BreakPointOnly,
    StepOver,
    StepBack,
    ReverseBreakpointOnly,
}

/// An inserted breakpoint with its compiled predicates.
#[derive(Debug)]
pub struct DebugBreakpoint {
    pub id: u32,
    pub instance_id: u32,
    /// Innate condition AND the user condition.
    pub expr: DebugExpression,
    /// Innate condition only; its source text is the batch group key.
    pub enable_expr: DebugExpression,
    pub filename: String,
    pub line_num: u32,
    pub column_num: u32,
    /// Symbols whose value change gates the hit (always-comb semantics).
    pub trigger_symbols: Vec<String>,
    pub trigger_values: HashMap<String, i64>,
}

/// A value-change breakpoint over an RTL variable; distinct id space.
pub struct DataBreakpoint {
    pub id: u64,
    pub breakpoint: Arc<Mutex<DebugBreakpoint>>,
    pub full_rtl_name: String,
    pub watch_id: u64,
}

// ── Scheduler ─────────────────────────────────────────────────────────────────

pub struct Scheduler {
    rtl: Arc<RtlClient>,
    db: Arc<SymbolTable>,
    value_cache: Arc<ValueCache>,

    breakpoints: Vec<Arc<Mutex<DebugBreakpoint>>>,
    inserted_ids: HashSet<u32>,
    /// breakpoint id → position in the execution order
    ordering_table: HashMap<u32, usize>,
    ordering: Vec<u32>,

    evaluated_ids: HashSet<u32>,
    current_id: Option<u32>,
    mode: EvaluationMode,
    /// A refused rewind clamps at the first breakpoint once; repeating the
    /// clamp within the same sweep would spin the evaluation loop.
    rewind_refused: bool,

    data_breakpoints: BTreeMap<u64, DataBreakpoint>,
    next_data_id: u64,

    clock_names: Vec<String>,
    clock_handles: Vec<SignalHandle>,

    /// instance id → mapped full instance name
    instance_names: Mutex<HashMap<u32, String>>,
}

impl Scheduler {
    pub fn new(rtl: Arc<RtlClient>, db: Arc<SymbolTable>, value_cache: Arc<ValueCache>) -> Self {
        debug!("computing breakpoint ordering table");
        let ordering = db.execution_bp_order();
        let ordering_table = ordering
            .iter()
            .enumerate()
            .map(|(position, id)| (*id, position))
            .collect();

        let clock_names = clock_signals(&rtl, &db);
        let clock_handles = clock_names
            .iter()
            .filter_map(|name| rtl.get_handle(name))
            .collect();

        Self {
            rtl,
            db,
            value_cache,
            breakpoints: Vec::new(),
            inserted_ids: HashSet::new(),
            ordering_table,
            ordering,
            evaluated_ids: HashSet::new(),
            current_id: None,
            mode: EvaluationMode::default(),
            rewind_refused: false,
            data_breakpoints: BTreeMap::new(),
            next_data_id: 0,
            clock_names,
            clock_handles,
            instance_names: Mutex::new(HashMap::new()),
        }
    }

    pub fn clock_handles(&self) -> &[SignalHandle] {
        &self.clock_handles
    }

    pub fn clock_names(&self) -> &[String] {
        &self.clock_names
    }

    pub fn evaluation_mode(&self) -> EvaluationMode {
        self.mode
    }

    /// Change the scheduling semantics; resets the sweep when it differs.
    pub fn set_evaluation_mode(&mut self, mode: EvaluationMode) {
        if self.mode != mode {
            self.evaluated_ids.clear();
            self.rewind_refused = false;
            self.mode = mode;
        }
    }

    pub fn breakpoint_only(&self) -> bool {
        matches!(
            self.mode,
            EvaluationMode::BreakPointOnly | EvaluationMode::ReverseBreakpointOnly
        )
    }

    /// Reset per-sweep state at the start of a clock edge.
    pub fn start_breakpoint_evaluation(&mut self) {
        self.evaluated_ids.clear();
        self.current_id = None;
        self.rewind_refused = false;
    }

    // ── Insertion and removal ─────────────────────────────────────────────────

    /// Insert (or update) a breakpoint. `client_condition` is the user's
    /// condition from the request; `db_bp` is the persisted breakpoint.
    pub fn add_breakpoint(&mut self, client_condition: &str, db_bp: &Breakpoint) {
        let innate = if db_bp.condition.is_empty() {
            "1"
        } else {
            &db_bp.condition
        };
        let mut cond = innate.to_string();
        if !client_condition.is_empty() {
            cond = format!("{cond} && {client_condition}");
        }
        debug!(
            filename = %db_bp.filename,
            line = db_bp.line_num,
            "breakpoint inserted"
        );
        let Some(instance_id) = db_bp.instance_id else {
            error!(id = db_bp.id, "breakpoint has no owning instance");
            return;
        };
        if self.inserted_ids.contains(&db_bp.id) {
            // update the existing entry's condition
            for entry in &self.breakpoints {
                let mut bp = entry.lock().unwrap();
                if bp.id == db_bp.id {
                    let mut expr = DebugExpression::new(&cond);
                    self.validate_expr(&mut expr, Some(db_bp.id), Some(instance_id));
                    if !expr.correct() {
                        error!(condition = %cond, "unable to validate breakpoint expression");
                    }
                    bp.expr = expr;
                    return;
                }
            }
            return;
        }

        let mut expr = DebugExpression::new(&cond);
        let mut enable_expr = DebugExpression::new(innate);
        self.validate_expr(&mut expr, Some(db_bp.id), Some(instance_id));
        if !expr.correct() {
            error!(condition = %cond, "unable to validate breakpoint expression");
        }
        self.validate_expr(&mut enable_expr, Some(db_bp.id), Some(instance_id));
        if !enable_expr.correct() {
            error!(condition = %innate, "unable to validate breakpoint expression");
        }
        self.breakpoints
            .push(Arc::new(Mutex::new(DebugBreakpoint {
                id: db_bp.id,
                instance_id,
                expr,
                enable_expr,
                filename: db_bp.filename.clone(),
                line_num: db_bp.line_num,
                column_num: db_bp.column_num,
                trigger_symbols: trigger_symbols(&db_bp.trigger),
                trigger_values: HashMap::new(),
            })));
        self.inserted_ids.insert(db_bp.id);
    }

    /// Re-sort after insertions. The ordering table is the single source of
    /// truth; breakpoints missing from it sort last.
    pub fn reorder_breakpoints(&mut self) {
        let table = &self.ordering_table;
        self.breakpoints.sort_by_key(|entry| {
            let id = entry.lock().unwrap().id;
            table.get(&id).copied().unwrap_or(usize::MAX)
        });
    }

    /// Removal preserves order.
    pub fn remove_breakpoint(&mut self, id: u32) {
        self.breakpoints.retain(|entry| entry.lock().unwrap().id != id);
        self.inserted_ids.remove(&id);
    }

    pub fn clear(&mut self) {
        self.breakpoints.clear();
        self.inserted_ids.clear();
        self.data_breakpoints.clear();
    }

    /// The inserted breakpoints as persisted rows, in scheduler order.
    pub fn current_breakpoints(&self) -> Vec<Breakpoint> {
        self.breakpoints
            .iter()
            .filter_map(|entry| self.db.breakpoint(entry.lock().unwrap().id))
            .collect()
    }

    // ── Batch selection ───────────────────────────────────────────────────────

    /// Produce the next batch to evaluate for the current mode.
    pub fn next_breakpoints(&mut self, single_thread: bool) -> Vec<Arc<Mutex<DebugBreakpoint>>> {
        match self.mode {
            EvaluationMode::BreakPointOnly => self.next_normal_breakpoints(single_thread),
            EvaluationMode::StepOver => self.next_step_over_breakpoint().into_iter().collect(),
            EvaluationMode::StepBack => self.next_step_back_breakpoint().into_iter().collect(),
            EvaluationMode::ReverseBreakpointOnly => self.next_reverse_breakpoints(single_thread),
            EvaluationMode::None => Vec::new(),
        }
    }

    fn next_normal_breakpoints(&mut self, single_thread: bool) -> Vec<Arc<Mutex<DebugBreakpoint>>> {
        if self.breakpoints.is_empty() {
            return Vec::new();
        }
        // breakpoints inserted mid-sweep with higher priority are skipped
        // until the next evaluation cycle
        let mut index = 0;
        let mut last_evaluated = None;
        for (i, entry) in self.breakpoints.iter().enumerate() {
            if self.evaluated_ids.contains(&entry.lock().unwrap().id) {
                last_evaluated = Some(i);
            }
        }
        if let Some(pos) = last_evaluated {
            if pos + 1 < self.breakpoints.len() {
                index = pos + 1;
            } else {
                // sweep done
                return Vec::new();
            }
        }

        let mut result = vec![Arc::clone(&self.breakpoints[index])];
        if !single_thread {
            self.scan_breakpoints(index, true, &mut result);
        }

        self.current_id = Some(result[0].lock().unwrap().id);
        for entry in &result {
            self.evaluated_ids.insert(entry.lock().unwrap().id);
        }
        result
    }

    fn next_step_over_breakpoint(&mut self) -> Option<Arc<Mutex<DebugBreakpoint>>> {
        let next_id = match self.current_id {
            None => self.ordering.first().copied()?,
            Some(current) => {
                let position = self.ordering_table.get(&current)?;
                self.ordering.get(position + 1).copied()?
            }
        };
        self.current_id = Some(next_id);
        self.evaluated_ids.insert(next_id);
        self.create_step_breakpoint(next_id)
    }

    fn next_step_back_breakpoint(&mut self) -> Option<Arc<Mutex<DebugBreakpoint>>> {
        // cannot roll back without a cursor
        let current = self.current_id?;
        let position = *self.ordering_table.get(&current)?;
        let next_id = if position != 0 {
            self.ordering[position - 1]
        } else if self.rtl.reverse_last_posedge(&self.clock_handles) {
            // one cycle earlier now: resume from the last statement
            *self.ordering.last()?
        } else {
            // the simulator cannot time-travel: clamp at the first, once
            if self.rewind_refused {
                return None;
            }
            self.rewind_refused = true;
            self.ordering[0]
        };
        self.current_id = Some(next_id);
        self.evaluated_ids.insert(next_id);
        self.create_step_breakpoint(next_id)
    }

    fn next_reverse_breakpoints(&mut self, single_thread: bool) -> Vec<Arc<Mutex<DebugBreakpoint>>> {
        if self.breakpoints.is_empty() {
            return Vec::new();
        }
        let target_index = match self.current_id {
            None => self.breakpoints.len() - 1,
            Some(current) => {
                let front_id = self.breakpoints[0].lock().unwrap().id;
                if front_id == current {
                    // exhausted this pseudo-cycle
                    if self.rtl.reverse_last_posedge(&self.clock_handles) {
                        self.current_id = None;
                        self.breakpoints.len() - 1
                    } else if self.rewind_refused {
                        // already clamped once: end the sweep so the edge
                        // loop can move forward
                        return Vec::new();
                    } else {
                        // cannot rewind: clamp at the first
                        self.rewind_refused = true;
                        0
                    }
                } else {
                    match self
                        .breakpoints
                        .iter()
                        .rposition(|entry| entry.lock().unwrap().id == current)
                    {
                        Some(position) if position > 0 => position - 1,
                        _ => return Vec::new(),
                    }
                }
            }
        };

        let mut result = vec![Arc::clone(&self.breakpoints[target_index])];
        if !single_thread {
            self.scan_breakpoints(target_index, false, &mut result);
        }
        // the cursor is the last element: the earliest of the batch
        self.current_id = Some(result[result.len() - 1].lock().unwrap().id);
        for entry in &result {
            self.evaluated_ids.insert(entry.lock().unwrap().id);
        }
        result
    }

    /// Collect peer instances of the same source statement around
    /// `ref_index`: same (filename, line, column), identical innate condition
    /// text, different instance.
    fn scan_breakpoints(
        &self,
        ref_index: usize,
        forward: bool,
        result: &mut Vec<Arc<Mutex<DebugBreakpoint>>>,
    ) {
        let (ref_file, ref_line, ref_col, ref_instance, ref_enable) = {
            let bp = self.breakpoints[ref_index].lock().unwrap();
            (
                bp.filename.clone(),
                bp.line_num,
                bp.column_num,
                bp.instance_id,
                bp.enable_expr.source().to_string(),
            )
        };
        let mut check = |i: usize| -> bool {
            let entry = &self.breakpoints[i];
            let bp = entry.lock().unwrap();
            if bp.line_num != ref_line || bp.filename != ref_file || bp.column_num != ref_col {
                return false;
            }
            if bp.instance_id != ref_instance && bp.enable_expr.source() == ref_enable {
                drop(bp);
                result.push(Arc::clone(entry));
            }
            true
        };
        if forward {
            for i in ref_index + 1..self.breakpoints.len() {
                if !check(i) {
                    break;
                }
            }
        } else {
            for i in (0..ref_index).rev() {
                if !check(i) {
                    break;
                }
            }
        }
    }

    /// Materialize a temporary breakpoint for step modes; only the innate
    /// condition is compiled.
    fn create_step_breakpoint(&self, id: u32) -> Option<Arc<Mutex<DebugBreakpoint>>> {
        let bp_info = self.db.breakpoint(id)?;
        let instance_id = bp_info.instance_id?;
        let innate = if bp_info.condition.is_empty() {
            "1"
        } else {
            &bp_info.condition
        };
        let mut enable_expr = DebugExpression::new(innate);
        self.validate_expr(&mut enable_expr, Some(id), Some(instance_id));
        Some(Arc::new(Mutex::new(DebugBreakpoint {
            id,
            instance_id,
            expr: DebugExpression::new(innate),
            enable_expr,
            filename: bp_info.filename,
            line_num: bp_info.line_num,
            column_num: bp_info.column_num,
            trigger_symbols: Vec::new(),
            trigger_values: HashMap::new(),
        })))
    }

    // ── Evaluation ────────────────────────────────────────────────────────────

    /// Evaluate a batch; parallel when it has more than one element and
    /// single-thread mode is off.
    pub fn eval_batch(
        &self,
        batch: &[Arc<Mutex<DebugBreakpoint>>],
        single_thread: bool,
    ) -> Vec<bool> {
        if batch.len() > 1 && !single_thread {
            batch
                .par_iter()
                .map(|entry| self.eval_breakpoint(&mut entry.lock().unwrap()))
                .collect()
        } else {
            batch
                .iter()
                .map(|entry| self.eval_breakpoint(&mut entry.lock().unwrap()))
                .collect()
        }
    }

    /// Evaluate one breakpoint: read the resolved symbols, run the
    /// predicate, and consult the trigger gate.
    pub fn eval_breakpoint(&self, bp: &mut DebugBreakpoint) -> bool {
        let expr = if self.mode == EvaluationMode::BreakPointOnly {
            &bp.expr
        } else {
            &bp.enable_expr
        };
        let eval_result = match self.eval_expr(expr, bp.instance_id) {
            Some(result) => result,
            None => {
                error!(id = bp.id, "unable to evaluate breakpoint");
                return false;
            }
        };
        let trigger_result = self.should_trigger(bp);
        eval_result && trigger_result
    }

    /// Read the resolved symbols and evaluate; `None` when a read fails.
    /// An incorrect expression never hits.
    fn eval_expr(&self, expr: &DebugExpression, instance_id: u32) -> Option<bool> {
        if !expr.correct() {
            return Some(false);
        }
        let mut values = HashMap::new();
        for (symbol, full_name) in expr.resolved_symbols() {
            let value = match symbol.as_str() {
                TIME_VAR_NAME => Some(self.rtl.time() as i64),
                INSTANCE_VAR_NAME => Some(i64::from(instance_id)),
                _ => self.value_cache.get(full_name, &self.rtl),
            };
            values.insert(symbol.clone(), value?);
        }
        Some(expr.eval(&values) != 0)
    }

    /// The trigger gate: with trigger symbols present, the breakpoint hits
    /// only if at least one of them changed since the last evaluation. The
    /// first evaluation always triggers.
    fn should_trigger(&self, bp: &mut DebugBreakpoint) -> bool {
        if bp.trigger_symbols.is_empty() {
            return true;
        }
        let mut triggered = false;
        let symbols = bp.trigger_symbols.clone();
        for symbol in symbols {
            let full_name = self.full_instance_var(bp.instance_id, &symbol);
            let Some(value) = self.value_cache.get(&full_name, &self.rtl) else {
                error!(
                    signal = %full_name,
                    id = bp.id,
                    "unable to find trigger signal for breakpoint"
                );
                return true;
            };
            if bp.trigger_values.get(&symbol) != Some(&value) {
                triggered = true;
            }
            bp.trigger_values.insert(symbol, value);
        }
        triggered
    }

    /// Hits among the data breakpoints: the watched variable changed and the
    /// mixed predicate holds.
    pub fn eval_data_breakpoints(
        &self,
        monitor: &mut Monitor,
    ) -> Vec<Arc<Mutex<DebugBreakpoint>>> {
        let mut hits = Vec::new();
        for data_bp in self.data_breakpoints.values() {
            let (changed, _) = monitor.var_changed(data_bp.watch_id);
            if !changed {
                continue;
            }
            let bp = data_bp.breakpoint.lock().unwrap();
            if self.eval_expr(&bp.enable_expr, bp.instance_id) == Some(true) {
                drop(bp);
                hits.push(Arc::clone(&data_bp.breakpoint));
            }
        }
        hits
    }

    // ── Data breakpoints ──────────────────────────────────────────────────────

    /// Register a data breakpoint pairing a value-change watch on `var_name`
    /// with the location of `db_bp`.
    pub fn add_data_breakpoint(
        &mut self,
        var_name: &str,
        expression: &str,
        db_bp: &Breakpoint,
        monitor: &mut Monitor,
    ) -> Result<u64, String> {
        debug!(
            expression,
            filename = %db_bp.filename,
            line = db_bp.line_num,
            "data breakpoint inserted"
        );
        let instance_id = db_bp
            .instance_id
            .ok_or_else(|| "breakpoint has no owning instance".to_string())?;
        let mut cond = if expression.is_empty() {
            "1".to_string()
        } else {
            expression.to_string()
        };
        if !db_bp.condition.is_empty() {
            cond = format!("{cond} && {}", db_bp.condition);
        }
        let mut enable_expr = DebugExpression::new(&cond);
        self.validate_expr(&mut enable_expr, Some(db_bp.id), Some(instance_id));
        if !enable_expr.correct() {
            return Err(format!("unable to validate breakpoint expression {cond}"));
        }

        let mut var_expr = DebugExpression::new(var_name);
        self.validate_expr(&mut var_expr, Some(db_bp.id), Some(instance_id));
        if !var_expr.correct() {
            return Err(format!("unable to validate data breakpoint variable {var_name}"));
        }
        let full_rtl_name = var_expr
            .resolved_symbols()
            .values()
            .next()
            .cloned()
            .ok_or_else(|| format!("{var_name} does not name an RTL variable"))?;

        let watch_id = monitor.add(&full_rtl_name, WatchKind::Data);
        let id = self.next_data_id;
        self.next_data_id += 1;
        self.data_breakpoints.insert(
            id,
            DataBreakpoint {
                id,
                breakpoint: Arc::new(Mutex::new(DebugBreakpoint {
                    id: db_bp.id,
                    instance_id,
                    expr: DebugExpression::new(&cond),
                    enable_expr,
                    filename: db_bp.filename.clone(),
                    line_num: db_bp.line_num,
                    column_num: db_bp.column_num,
                    trigger_symbols: trigger_symbols(&db_bp.trigger),
                    trigger_values: HashMap::new(),
                })),
                full_rtl_name,
                watch_id,
            },
        );
        Ok(id)
    }

    pub fn remove_data_breakpoint(&mut self, id: u64, monitor: &mut Monitor) {
        if let Some(data_bp) = self.data_breakpoints.remove(&id) {
            monitor.remove(data_bp.watch_id);
        }
    }

    pub fn clear_data_breakpoints(&mut self, monitor: &mut Monitor) {
        for data_bp in self.data_breakpoints.values() {
            monitor.remove(data_bp.watch_id);
        }
        self.data_breakpoints.clear();
    }

    /// (id, watched RTL name, breakpoint id) of the registered data
    /// breakpoints.
    pub fn data_breakpoint_info(&self) -> Vec<(u64, String, u32)> {
        self.data_breakpoints
            .values()
            .map(|data_bp| {
                (
                    data_bp.id,
                    data_bp.full_rtl_name.clone(),
                    data_bp.breakpoint.lock().unwrap().id,
                )
            })
            .collect()
    }

    // ── Symbol resolution ─────────────────────────────────────────────────────

    /// Resolve every required symbol of an expression to a full RTL name:
    /// breakpoint scope, then instance scope, then `instance_name.symbol`,
    /// then the raw name. An invalid signal kills the expression.
    pub fn validate_expr(
        &self,
        expr: &mut DebugExpression,
        breakpoint_id: Option<u32>,
        instance_id: Option<u32>,
    ) {
        let static_values = breakpoint_id
            .map(|id| self.db.context_static_values(id))
            .unwrap_or_default();
        expr.set_static_values(static_values);
        let mut instance_id = instance_id;
        for symbol in expr.required_symbols() {
            if symbol == TIME_VAR_NAME || symbol == INSTANCE_VAR_NAME {
                expr.set_resolved_symbol(&symbol, &symbol);
                continue;
            }
            let mut name = None;
            if let Some(bp_id) = breakpoint_id {
                name = self.db.resolve_scoped_name_breakpoint(&symbol, bp_id);
                if name.is_none() && instance_id.is_none() {
                    // elevate to an instance-based query
                    instance_id = self.db.instance_id_from_bp(bp_id);
                }
            }
            if name.is_none() {
                if let Some(inst_id) = instance_id {
                    name = self.db.resolve_scoped_name_instance(&symbol, inst_id);
                    if name.is_none() {
                        if let Some(inst_name) = self.db.instance_name(inst_id) {
                            name = Some(format!("{inst_name}.{symbol}"));
                        }
                    }
                }
            }
            let full_name = match name {
                Some(name) => self.rtl.get_full_name(&name),
                // best effort
                None => self.rtl.get_full_name(&symbol),
            };
            if !self.rtl.is_valid_signal(&full_name) {
                expr.set_error();
                return;
            }
            expr.set_resolved_symbol(&symbol, &full_name);
        }
    }

    /// Mapped full RTL name of an instance-scoped variable, cached per
    /// instance.
    pub fn full_instance_var(&self, instance_id: u32, var_name: &str) -> String {
        let instance_name = {
            let mut cache = self.instance_names.lock().unwrap();
            match cache.get(&instance_id) {
                Some(name) => name.clone(),
                None => {
                    let name = self
                        .db
                        .instance_name(instance_id)
                        .map(|name| self.rtl.get_full_name(&name))
                        .unwrap_or_default();
                    cache.insert(instance_id, name.clone());
                    name
                }
            }
        };
        format!("{instance_name}.{var_name}")
    }
}

/// Clock signal names: the symbol table's `clock` annotation mapped through
/// the instance mapping, with a design heuristic as fallback.
pub fn clock_signals(rtl: &RtlClient, db: &SymbolTable) -> Vec<String> {
    let mut result: Vec<String> = db
        .annotation_values("clock")
        .into_iter()
        .map(|name| rtl.get_full_name(&name))
        .collect();
    if result.is_empty() {
        result = rtl.clocks_from_design();
    }
    result
}

fn trigger_symbols(trigger: &str) -> Vec<String> {
    trigger
        .split_whitespace()
        .map(str::to_string)
        .collect()
}
