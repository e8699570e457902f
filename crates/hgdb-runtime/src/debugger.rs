//! Runtime orchestration.
//!
//! [`Debugger`] owns the simulator client, the symbol table, the scheduler,
//! the monitor, and the transport, and glues them together under the pause
//! lock: the simulator thread runs [`eval`](Debugger::eval) on each rising
//! clock edge and parks on hits; the server thread dispatches client
//! requests and releases the lock on resume commands. The simulator thread
//! never surfaces errors; it logs and keeps going.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::expr::DebugExpression;
use crate::lock::RuntimeLock;
use crate::monitor::{Monitor, WatchKind};
use crate::options::Options;
use crate::perf::{self, PerfCount};
use crate::proto::{
    self, monitor_topic, BpLocationEntry, BreakpointLocationResponse, BreakpointResponse,
    BreakpointScope, CommandKind, ConnectionPayload, DataBreakpointAction, DataBreakpointPayload,
    DebuggerInfoKind, DebuggerInfoResponse, EvaluationPayload, EvaluationResponse,
    GenericResponse, MonitorAction, MonitorPayload, Request, RequestBody, RequestType,
    SetValuePayload, SymbolQuery, SymbolReply, SymbolResponse,
};
use crate::scheduler::{DebugBreakpoint, EvaluationMode, Scheduler, ValueCache};
use crate::rtl::{CallbackKind, RtlClient, Simulator};
use crate::server::Transport;
use crate::symbol::{SymbolTable, Variable};

/// Default transport port, overridable with `+DEBUG_PORT=<n>`.
pub const DEFAULT_PORT: u16 = 8888;
/// Reported for values the simulator refuses to read.
pub const ERROR_VALUE_STR: &str = "ERROR";

const PLUSARG_PORT: &str = "+DEBUG_PORT=";
const PLUSARG_LOG: &str = "+DEBUG_LOG";
const PLUSARG_NO_DB: &str = "+DEBUG_NO_DB";

type ConnectedCallback = Box<dyn Fn(&SymbolTable) + Send + Sync>;

pub struct Debugger {
    rtl: Arc<RtlClient>,
    server: Arc<dyn Transport>,
    db: Mutex<Option<Arc<SymbolTable>>>,
    scheduler: Mutex<Option<Scheduler>>,
    monitor: Mutex<Monitor>,
    lock: RuntimeLock,
    options: Mutex<Options>,
    value_cache: Arc<ValueCache>,
    is_running: AtomicBool,
    on_client_connected: Mutex<Option<ConnectedCallback>>,
}

impl Debugger {
    pub fn new(sim: Arc<dyn Simulator>, server: Arc<dyn Transport>) -> Arc<Self> {
        let rtl = Arc::new(RtlClient::new(sim));
        let value_cache = Arc::new(ValueCache::new());
        let monitor = {
            let rtl = Arc::clone(&rtl);
            let cache = Arc::clone(&value_cache);
            Monitor::new(Box::new(move |name: &str| cache.get(name, &rtl)))
        };
        let mut options = Options::default();
        options.log_enabled = has_plus_arg(&rtl, PLUSARG_LOG);
        if options.log_enabled {
            // keep RUST_LOG overrides working while defaulting to info
            let filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("hgdb_runtime=info"));
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        }
        Arc::new(Self {
            rtl,
            server,
            db: Mutex::new(None),
            scheduler: Mutex::new(None),
            monitor: Mutex::new(monitor),
            lock: RuntimeLock::new(),
            options: Mutex::new(options),
            value_cache,
            is_running: AtomicBool::new(false),
            on_client_connected: Mutex::new(None),
        })
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn rtl_client(&self) -> &Arc<RtlClient> {
        &self.rtl
    }

    pub fn symbol_table(&self) -> Option<Arc<SymbolTable>> {
        self.db.lock().unwrap().clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// The pause lock; exposed so embedding shims can park or release the
    /// simulator thread themselves.
    pub fn pause_lock(&self) -> &RuntimeLock {
        &self.lock
    }

    /// Run a closure against the scheduler, if a symbol table is loaded.
    pub fn with_scheduler<R>(&self, f: impl FnOnce(&mut Scheduler) -> R) -> Option<R> {
        self.scheduler.lock().unwrap().as_mut().map(f)
    }

    /// Set an option from the embedding API instead of through the wire.
    pub fn set_option(&self, name: &str, value: bool) {
        self.options.lock().unwrap().set_bool(name, value);
    }

    pub fn set_on_client_connected(&self, callback: ConnectedCallback) {
        *self.on_client_connected.lock().unwrap() = Some(callback);
    }

    fn pretty(&self) -> bool {
        self.options.lock().unwrap().log_enabled
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Register the simulation lifecycle callbacks: start-of-simulation
    /// starts the server and parks, end-of-simulation tears down.
    pub fn attach(self: &Arc<Self>) {
        let sim = self.rtl.simulator();
        {
            let debugger = Arc::clone(self);
            sim.register_cb(
                CallbackKind::StartOfSim,
                None,
                Box::new(move |_| debugger.run()),
            );
        }
        {
            let debugger = Arc::clone(self);
            sim.register_cb(
                CallbackKind::EndOfSim,
                None,
                Box::new(move |_| debugger.stop()),
            );
        }
    }

    /// Start the transport and block the simulator thread until a client
    /// connects and issues `continue`.
    pub fn run(self: &Arc<Self>) {
        {
            let debugger = Arc::clone(self);
            self.server
                .set_on_message(Arc::new(move |message, conn_id| {
                    debugger.on_message(message, conn_id);
                }));
        }
        {
            let debugger = Arc::clone(self);
            self.server
                .set_on_disconnect(Arc::new(move |conn_id| debugger.on_disconnect(conn_id)));
        }
        let port = self.port();
        if let Err(e) = self.server.start(port) {
            error!(error = %e, "failed to start debug server");
            return;
        }
        self.is_running.store(true, Ordering::SeqCst);
        info!(port, "debug server started");
        // park until the client finishes the connection handshake
        self.lock.wait();
    }

    pub fn stop(&self) {
        self.lock.ready();
        self.server.stop();
        self.is_running.store(false, Ordering::SeqCst);
        if self.options.lock().unwrap().perf_count {
            perf::report();
        }
    }

    /// Load a symbol table from a path or URI.
    pub fn initialize_db_from_path(self: &Arc<Self>, uri: &str) -> bool {
        match SymbolTable::open(uri) {
            Ok(table) => {
                info!(uri, "debug symbol table loaded");
                self.initialize_db(table);
                true
            }
            Err(e) => {
                error!(error = %e, uri, "cannot load symbol table");
                false
            }
        }
    }

    /// Install a symbol table: compute the instance mapping, rebuild the
    /// scheduler, and hook the clock edges. The most recently loaded table
    /// is authoritative.
    pub fn initialize_db(self: &Arc<Self>, table: SymbolTable) {
        let table = Arc::new(table);
        debug!("computing instance mapping");
        self.rtl.map_instances(&table.instance_names());
        let scheduler = Scheduler::new(
            Arc::clone(&self.rtl),
            Arc::clone(&table),
            Arc::clone(&self.value_cache),
        );
        let clock_names = scheduler.clock_names().to_vec();
        *self.db.lock().unwrap() = Some(table);
        *self.scheduler.lock().unwrap() = Some(scheduler);
        if clock_names.is_empty() {
            error!("no clock signals found; breakpoints will not be evaluated");
            return;
        }
        self.add_clock_callbacks(&clock_names);
    }

    /// Evaluate on every rising clock edge; `pause_at_posedge` controls
    /// whether evaluation happens right at the edge or is deferred to the
    /// next simulation time slot.
    fn add_clock_callbacks(self: &Arc<Self>, clock_names: &[String]) {
        let sim = self.rtl.simulator();
        for name in clock_names {
            let Some(handle) = self.rtl.get_handle(name) else {
                error!(clock = %name, "failed to register evaluation callback");
                continue;
            };
            let debugger = Arc::clone(self);
            sim.register_cb(
                CallbackKind::ValueChange,
                Some(handle),
                Box::new(move |value| {
                    if value == 0 {
                        return;
                    }
                    if debugger.options.lock().unwrap().pause_at_posedge {
                        debugger.eval();
                    } else {
                        let deferred = Arc::clone(&debugger);
                        // NextSimTime callbacks are one-shot
                        debugger.rtl.simulator().register_cb(
                            CallbackKind::NextSimTime,
                            None,
                            Box::new(move |_| deferred.eval()),
                        );
                    }
                }),
            );
        }
    }

    // ── Evaluation loop (simulator thread) ────────────────────────────────────

    /// One evaluation sweep; called on each rising clock edge.
    pub fn eval(&self) {
        let (single_thread, use_cache, perf_count) = {
            let options = self.options.lock().unwrap();
            (
                options.single_thread_mode,
                options.use_signal_cache,
                options.perf_count,
            )
        };
        let _perf = PerfCount::new("eval", perf_count);
        debug!("start breakpoint evaluation");
        {
            let mut scheduler = self.scheduler.lock().unwrap();
            let Some(scheduler) = scheduler.as_mut() else {
                return;
            };
            self.value_cache.start_sweep(use_cache);
            scheduler.start_breakpoint_evaluation();
        }
        loop {
            let batch = {
                let mut scheduler = self.scheduler.lock().unwrap();
                match scheduler.as_mut() {
                    Some(scheduler) => scheduler.next_breakpoints(single_thread),
                    None => return,
                }
            };
            if batch.is_empty() {
                break;
            }
            let hits = {
                let scheduler = self.scheduler.lock().unwrap();
                match scheduler.as_ref() {
                    Some(scheduler) => scheduler.eval_batch(&batch, single_thread),
                    None => return,
                }
            };
            let hit_bps: Vec<_> = batch
                .iter()
                .zip(hits)
                .filter(|(_, hit)| *hit)
                .map(|(bp, _)| Arc::clone(bp))
                .collect();
            if !hit_bps.is_empty() {
                self.send_breakpoint_hit(&hit_bps);
                self.send_monitor_values(WatchKind::Breakpoint);
                // park until the client resumes
                self.lock.wait();
            }
        }

        // data breakpoints piggyback on the monitor's change detection
        let data_hits = {
            let scheduler = self.scheduler.lock().unwrap();
            let mut monitor = self.monitor.lock().unwrap();
            match scheduler.as_ref() {
                Some(scheduler) => scheduler.eval_data_breakpoints(&mut monitor),
                None => Vec::new(),
            }
        };
        if !data_hits.is_empty() {
            self.send_breakpoint_hit(&data_hits);
            self.send_monitor_values(WatchKind::Breakpoint);
            self.lock.wait();
        }

        self.send_monitor_values(WatchKind::ClockEdge);
        self.send_monitor_values(WatchKind::Changed);
        self.send_monitor_values(WatchKind::DelayClockEdge);
    }

    fn send_breakpoint_hit(&self, bps: &[Arc<Mutex<DebugBreakpoint>>]) {
        let Some(db) = self.symbol_table() else {
            return;
        };
        let use_hex = self.options.lock().unwrap().use_hex_str;
        let mut response = {
            let first = bps[0].lock().unwrap();
            BreakpointResponse::new(
                self.rtl.time(),
                first.filename.clone(),
                first.line_num,
                first.column_num,
            )
        };
        for entry in bps {
            let (bp_id, instance_id) = {
                let bp = entry.lock().unwrap();
                (bp.id, bp.instance_id)
            };
            let instance_name = db.instance_name_from_bp(bp_id).unwrap_or_default();
            let mut scope = BreakpointScope::new(instance_id, instance_name, bp_id);
            for (gen_var, var) in db.generator_variables(instance_id) {
                scope.add_generator_value(gen_var.name, self.get_value_str(&var, use_hex));
            }
            for (context_var, var) in db.context_variables(bp_id) {
                scope.add_local_value(context_var.name, self.get_value_str(&var, use_hex));
            }
            response.add_scope(scope);
        }
        self.server.send(&response.to_json(self.pretty()));
    }

    fn send_monitor_values(&self, kind: WatchKind) {
        let values = {
            let mut monitor = self.monitor.lock().unwrap();
            if monitor.is_empty() {
                return;
            }
            monitor.collect(kind)
        };
        let use_hex = self.options.lock().unwrap().use_hex_str;
        for (id, value) in values {
            let value_str = match value {
                Some(value) => format_value(value, use_hex),
                None => continue,
            };
            let response = proto::MonitorResponse::new(id, value_str);
            self.server
                .publish(&monitor_topic(id), &response.to_json(self.pretty()));
        }
    }

    /// Render a variable for the client: literals verbatim, RTL signals read
    /// through the cache, unreadable signals as [`ERROR_VALUE_STR`].
    fn get_value_str(&self, var: &Variable, use_hex: bool) -> String {
        if !var.is_rtl {
            return var.value.clone();
        }
        let full_name = self.rtl.get_full_name(&var.value);
        match self.value_cache.get(&full_name, &self.rtl) {
            Some(value) => format_value(value, use_hex),
            None => ERROR_VALUE_STR.to_string(),
        }
    }

    fn read_signal(&self, design_name: &str) -> Option<i64> {
        let full_name = self.rtl.get_full_name(design_name);
        self.value_cache.get(&full_name, &self.rtl)
    }

    // ── Message dispatch (server thread) ──────────────────────────────────────

    /// Entry point for one inbound frame.
    pub fn on_message(self: &Arc<Self>, message: &str, conn_id: u64) {
        let request = match proto::parse_request(message) {
            Ok(request) => request,
            Err(e) => {
                let response = GenericResponse::error(e.request_type, &e.reason)
                    .with_token(e.token.as_deref());
                self.server.send_to(conn_id, &response.to_json(self.pretty()));
                return;
            }
        };
        let token = request.token.clone();
        match &request.body {
            RequestBody::Connection(payload) => {
                self.handle_connection(payload.clone(), &request, conn_id)
            }
            RequestBody::Breakpoint(_) => self.handle_breakpoint(&request, conn_id),
            RequestBody::BreakpointId(_) => self.handle_breakpoint_id(&request, conn_id),
            RequestBody::BpLocation(payload) => {
                self.handle_bp_location(payload.clone(), token.as_deref(), conn_id)
            }
            RequestBody::Command(payload) => self.handle_command(payload.command, &request, conn_id),
            RequestBody::DebuggerInfo(payload) => {
                self.handle_debug_info(payload.command, token.as_deref(), conn_id)
            }
            RequestBody::PathMapping(payload) => {
                self.handle_path_mapping(payload.path_mapping.clone(), &request, conn_id)
            }
            RequestBody::Evaluation(payload) => {
                self.handle_evaluation(payload.clone(), token.as_deref(), conn_id)
            }
            RequestBody::OptionChange(payload) => {
                let mut options = self.options.lock().unwrap();
                for (name, value) in &payload.bool_values {
                    options.set_bool(name, *value);
                }
                drop(options);
                self.respond_success(RequestType::OptionChange, &request, conn_id);
            }
            RequestBody::Monitor(payload) => {
                self.handle_monitor(payload.clone(), &request, conn_id)
            }
            RequestBody::SetValue(payload) => {
                self.handle_set_value(payload.clone(), &request, conn_id)
            }
            RequestBody::DataBreakpoint(payload) => {
                self.handle_data_breakpoint(payload.clone(), &request, conn_id)
            }
            RequestBody::Symbol(query) => {
                self.handle_symbol(query.clone(), token.as_deref(), conn_id)
            }
            RequestBody::Error(_) => {}
        }
    }

    fn respond_success(&self, request_type: RequestType, request: &Request, conn_id: u64) {
        let response =
            GenericResponse::success(request_type).with_token(request.token.as_deref());
        self.server.send_to(conn_id, &response.to_json(self.pretty()));
    }

    fn respond_error(
        &self,
        request_type: RequestType,
        reason: impl Into<String>,
        request: &Request,
        conn_id: u64,
    ) {
        let response = GenericResponse::error(request_type, reason)
            .with_token(request.token.as_deref());
        self.server.send_to(conn_id, &response.to_json(self.pretty()));
    }

    /// `status=error` on every request that needs the symbol table before it
    /// is loaded; not fatal.
    fn check_db(&self, request_type: RequestType, request: &Request, conn_id: u64) -> bool {
        if self.db.lock().unwrap().is_some() {
            return true;
        }
        self.respond_error(
            request_type,
            "Database is not initialized or is initialized incorrectly",
            request,
            conn_id,
        );
        false
    }

    fn handle_connection(
        self: &Arc<Self>,
        payload: ConnectionPayload,
        request: &Request,
        conn_id: u64,
    ) {
        let mut success = true;
        if !has_plus_arg(&self.rtl, PLUSARG_NO_DB) {
            success = self.initialize_db_from_path(&payload.db_filename);
        }
        if success {
            if let Some(db) = self.symbol_table() {
                db.set_src_mapping(payload.path_mapping);
                if let Some(callback) = self.on_client_connected.lock().unwrap().as_ref() {
                    callback(&db);
                }
            }
            self.respond_success(RequestType::Connection, request, conn_id);
        } else {
            self.respond_error(
                RequestType::Connection,
                format!("Unable to find {}", payload.db_filename),
                request,
                conn_id,
            );
        }
        debug!("handle_connection finished");
    }

    fn handle_breakpoint(&self, request: &Request, conn_id: u64) {
        if !self.check_db(RequestType::Breakpoint, request, conn_id) {
            return;
        }
        let RequestBody::Breakpoint(payload) = &request.body else {
            return;
        };
        let Some(db) = self.symbol_table() else {
            return;
        };
        let bps = match payload.line_num {
            Some(line) => {
                db.breakpoints_at(&payload.filename, line, payload.column_num.unwrap_or(0))
            }
            None => db.breakpoints_in_file(&payload.filename),
        };
        match payload.action {
            proto::BreakpointAction::Add => {
                // a location with no known breakpoint is a client error
                if bps.is_empty() {
                    self.respond_error(
                        RequestType::Breakpoint,
                        format!(
                            "{}:{} is not a valid breakpoint",
                            payload.filename,
                            payload.line_num.unwrap_or(0)
                        ),
                        request,
                        conn_id,
                    );
                    return;
                }
                let condition = payload.condition.clone().unwrap_or_default();
                let mut scheduler = self.scheduler.lock().unwrap();
                if let Some(scheduler) = scheduler.as_mut() {
                    for bp in &bps {
                        scheduler.add_breakpoint(&condition, bp);
                    }
                    scheduler.reorder_breakpoints();
                }
            }
            proto::BreakpointAction::Remove => {
                let mut scheduler = self.scheduler.lock().unwrap();
                if let Some(scheduler) = scheduler.as_mut() {
                    for bp in &bps {
                        scheduler.remove_breakpoint(bp.id);
                    }
                }
            }
        }
        self.respond_success(RequestType::Breakpoint, request, conn_id);
    }

    fn handle_breakpoint_id(&self, request: &Request, conn_id: u64) {
        if !self.check_db(RequestType::BreakpointId, request, conn_id) {
            return;
        }
        let RequestBody::BreakpointId(payload) = &request.body else {
            return;
        };
        let Some(db) = self.symbol_table() else {
            return;
        };
        match payload.action {
            proto::BreakpointAction::Add => {
                let Some(bp) = db.breakpoint(payload.id) else {
                    self.respond_error(
                        RequestType::BreakpointId,
                        format!("BP ({}) is not a valid breakpoint", payload.id),
                        request,
                        conn_id,
                    );
                    return;
                };
                let condition = payload.condition.clone().unwrap_or_default();
                let mut scheduler = self.scheduler.lock().unwrap();
                if let Some(scheduler) = scheduler.as_mut() {
                    scheduler.add_breakpoint(&condition, &bp);
                    scheduler.reorder_breakpoints();
                }
            }
            proto::BreakpointAction::Remove => {
                let mut scheduler = self.scheduler.lock().unwrap();
                if let Some(scheduler) = scheduler.as_mut() {
                    scheduler.remove_breakpoint(payload.id);
                }
            }
        }
        self.respond_success(RequestType::BreakpointId, request, conn_id);
    }

    fn handle_bp_location(
        &self,
        payload: proto::BpLocationPayload,
        token: Option<&str>,
        conn_id: u64,
    ) {
        let Some(db) = self.symbol_table() else {
            let response = GenericResponse::error(
                RequestType::BpLocation,
                "Database is not initialized or is initialized incorrectly",
            )
            .with_token(token);
            self.server.send_to(conn_id, &response.to_json(self.pretty()));
            return;
        };
        let bps = match payload.line_num {
            None => db.breakpoints_in_file(&payload.filename),
            Some(line) => {
                db.breakpoints_at(&payload.filename, line, payload.column_num.unwrap_or(0))
            }
        };
        let entries: Vec<BpLocationEntry> = bps.iter().map(BpLocationEntry::from).collect();
        let response = BreakpointLocationResponse::new(entries).with_token(token);
        self.server.send_to(conn_id, &response.to_json(self.pretty()));
    }

    fn handle_command(&self, command: CommandKind, request: &Request, conn_id: u64) {
        match command {
            CommandKind::Continue => {
                debug!("handle_command: continue");
                self.set_mode(EvaluationMode::BreakPointOnly);
                self.lock.ready();
            }
            CommandKind::Stop => {
                debug!("handle_command: stop");
                self.respond_success(RequestType::Command, request, conn_id);
                self.lock.ready();
                self.rtl.finish_sim();
                self.stop();
                return;
            }
            CommandKind::StepOver => {
                debug!("handle_command: step over");
                self.set_mode(EvaluationMode::StepOver);
                self.lock.ready();
            }
            CommandKind::StepBack => {
                debug!("handle_command: step back");
                self.set_mode(EvaluationMode::StepBack);
                self.lock.ready();
            }
            CommandKind::ReverseContinue => {
                debug!("handle_command: reverse continue");
                self.set_mode(EvaluationMode::ReverseBreakpointOnly);
                self.lock.ready();
            }
        }
        self.respond_success(RequestType::Command, request, conn_id);
    }

    fn set_mode(&self, mode: EvaluationMode) {
        let mut scheduler = self.scheduler.lock().unwrap();
        if let Some(scheduler) = scheduler.as_mut() {
            scheduler.set_evaluation_mode(mode);
        }
    }

    fn handle_debug_info(&self, kind: DebuggerInfoKind, token: Option<&str>, conn_id: u64) {
        let response = match kind {
            DebuggerInfoKind::Breakpoints => {
                let bps = self
                    .with_scheduler(|scheduler| scheduler.current_breakpoints())
                    .unwrap_or_default();
                DebuggerInfoResponse::Breakpoints(
                    bps.iter().map(BpLocationEntry::from).collect(),
                )
            }
            DebuggerInfoKind::Options => {
                DebuggerInfoResponse::Options(self.options.lock().unwrap().to_map())
            }
            DebuggerInfoKind::Status => {
                let argv = self.rtl.argv().join(" ");
                DebuggerInfoResponse::Status(format!(
                    "Runtime: hgdb-runtime {}\nCommand line arguments: {}\nSimulation running: {}",
                    crate::VERSION,
                    argv,
                    self.is_running()
                ))
            }
        };
        self.server
            .send_to(conn_id, &response.to_json(token, self.pretty()));
    }

    fn handle_path_mapping(
        &self,
        mapping: std::collections::BTreeMap<String, String>,
        request: &Request,
        conn_id: u64,
    ) {
        if let Some(db) = self.symbol_table() {
            db.set_src_mapping(mapping);
            self.respond_success(RequestType::PathMapping, request, conn_id);
        } else {
            self.respond_error(
                RequestType::PathMapping,
                "Database is not initialized or is initialized incorrectly",
                request,
                conn_id,
            );
        }
    }

    fn handle_evaluation(&self, payload: EvaluationPayload, token: Option<&str>, conn_id: u64) {
        let result = self.evaluate_expression(&payload);
        match result {
            Ok(value) => {
                let response = EvaluationResponse::new(&payload.scope, value.to_string());
                self.server
                    .send_to(conn_id, &response.to_json(token, self.pretty()));
            }
            Err(reason) => {
                let response =
                    GenericResponse::error(RequestType::Evaluation, reason).with_token(token);
                self.server.send_to(conn_id, &response.to_json(self.pretty()));
            }
        }
    }

    /// Evaluate an ad-hoc expression in a scope: an instance name, a
    /// breakpoint id, or empty for raw RTL names.
    fn evaluate_expression(&self, payload: &EvaluationPayload) -> Result<i64, String> {
        let db = self
            .symbol_table()
            .ok_or_else(|| "Database is not initialized or is initialized incorrectly".to_string())?;
        let expr = DebugExpression::new(&payload.expression);
        if !expr.correct() {
            return Err("Invalid expression".to_string());
        }
        let symbols = expr.symbols();
        let mut values: HashMap<String, i64> = HashMap::new();
        let scope = payload.scope.as_str();
        if let Some(instance_id) = db.instance_id(scope) {
            let variables = db.generator_variables(instance_id);
            self.collect_symbol_values(
                &mut values,
                symbols,
                scope,
                variables.into_iter().map(|(gv, var)| (gv.name, var)),
            )?;
        } else if scope.is_empty() {
            self.collect_symbol_values(&mut values, symbols, "", std::iter::empty())?;
        } else {
            let breakpoint_id: u32 = scope
                .parse()
                .map_err(|_| format!("Invalid scope {scope}"))?;
            let instance_name = db
                .instance_name_from_bp(breakpoint_id)
                .ok_or_else(|| format!("Invalid scope {scope}"))?;
            let variables = db.context_variables(breakpoint_id);
            self.collect_symbol_values(
                &mut values,
                symbols,
                &instance_name,
                variables.into_iter().map(|(cv, var)| (cv.name, var)),
            )?;
        }
        if values.len() != symbols.len() {
            return Err("Cannot find all required symbols".to_string());
        }
        Ok(expr.eval(&values))
    }

    /// Resolve symbol values from the scope's variables first, then fall
    /// back to reading `scope.symbol` from the simulator.
    fn collect_symbol_values(
        &self,
        values: &mut HashMap<String, i64>,
        symbols: &std::collections::HashSet<String>,
        scope: &str,
        variables: impl Iterator<Item = (String, Variable)>,
    ) -> Result<(), String> {
        for (name, var) in variables {
            if !symbols.contains(&name) {
                continue;
            }
            let value = if var.is_rtl {
                self.read_signal(&var.value)
            } else {
                var.value.parse::<i64>().ok()
            };
            let value = value.ok_or_else(|| format!("Unable to get value for {name}"))?;
            values.insert(name, value);
        }
        for name in symbols {
            if values.contains_key(name) {
                continue;
            }
            let full_name = if scope.is_empty() {
                name.clone()
            } else {
                format!("{scope}.{name}")
            };
            let value = self
                .read_signal(&full_name)
                .ok_or_else(|| format!("Unable to get value for {name}"))?;
            values.insert(name.clone(), value);
        }
        Ok(())
    }

    fn handle_monitor(&self, payload: MonitorPayload, request: &Request, conn_id: u64) {
        if !self.check_db(RequestType::Monitor, request, conn_id) {
            return;
        }
        match payload.action_type {
            MonitorAction::Add => {
                let Some(db) = self.symbol_table() else {
                    return;
                };
                let scoped_name = payload.scoped_name.as_deref().unwrap_or_default();
                let name = match (payload.breakpoint_id, payload.instance_id) {
                    (Some(breakpoint_id), _) => {
                        db.resolve_scoped_name_breakpoint(scoped_name, breakpoint_id)
                    }
                    (None, Some(instance_id)) => {
                        db.resolve_scoped_name_instance(scoped_name, instance_id)
                    }
                    (None, None) => None,
                };
                let full_name = name.map(|name| self.rtl.get_full_name(&name));
                let Some(full_name) =
                    full_name.filter(|full_name| self.rtl.is_valid_signal(full_name))
                else {
                    self.respond_error(
                        RequestType::Monitor,
                        format!("Unable to resolve {scoped_name}"),
                        request,
                        conn_id,
                    );
                    return;
                };
                let kind = payload.monitor_type.unwrap_or(WatchKind::Breakpoint);
                let track_id = {
                    let mut monitor = self.monitor.lock().unwrap();
                    match kind {
                        WatchKind::DelayClockEdge => {
                            monitor.add_delayed(&full_name, payload.depth.unwrap_or(1))
                        }
                        _ => monitor.add(&full_name, kind),
                    }
                };
                self.server.add_to_topic(&monitor_topic(track_id), conn_id);
                let mut response = GenericResponse::success(RequestType::Monitor)
                    .with_token(request.token.as_deref());
                response.set_value("track_id", track_id);
                self.server.send_to(conn_id, &response.to_json(self.pretty()));
            }
            MonitorAction::Remove => {
                let track_id = payload.track_id.unwrap_or_default();
                self.monitor.lock().unwrap().remove(track_id);
                self.server
                    .remove_from_topic(&monitor_topic(track_id), conn_id);
                self.respond_success(RequestType::Monitor, request, conn_id);
            }
        }
    }

    fn handle_set_value(&self, payload: SetValuePayload, request: &Request, conn_id: u64) {
        if !self.check_db(RequestType::SetValue, request, conn_id) {
            return;
        }
        let Some(db) = self.symbol_table() else {
            return;
        };
        let name = match (payload.breakpoint_id, payload.instance_id) {
            (Some(breakpoint_id), _) => {
                db.resolve_scoped_name_breakpoint(&payload.scoped_name, breakpoint_id)
            }
            (None, Some(instance_id)) => {
                db.resolve_scoped_name_instance(&payload.scoped_name, instance_id)
            }
            (None, None) => Some(payload.scoped_name.clone()),
        };
        let full_name = name.map(|name| self.rtl.get_full_name(&name));
        let ok = full_name
            .map(|full_name| self.rtl.set_value_by_name(&full_name, payload.value))
            .unwrap_or(false);
        if ok {
            self.respond_success(RequestType::SetValue, request, conn_id);
        } else {
            self.respond_error(
                RequestType::SetValue,
                format!("Unable to set {} to {}", payload.scoped_name, payload.value),
                request,
                conn_id,
            );
        }
    }

    fn handle_data_breakpoint(
        &self,
        payload: DataBreakpointPayload,
        request: &Request,
        conn_id: u64,
    ) {
        if !self.check_db(RequestType::DataBreakpoint, request, conn_id) {
            return;
        }
        let Some(db) = self.symbol_table() else {
            return;
        };
        match payload.action {
            DataBreakpointAction::Clear => {
                let mut scheduler = self.scheduler.lock().unwrap();
                if let Some(scheduler) = scheduler.as_mut() {
                    scheduler.clear_data_breakpoints(&mut self.monitor.lock().unwrap());
                }
                self.respond_success(RequestType::DataBreakpoint, request, conn_id);
            }
            DataBreakpointAction::Remove => {
                let id = payload.data_bp_id.unwrap_or_default();
                let mut scheduler = self.scheduler.lock().unwrap();
                if let Some(scheduler) = scheduler.as_mut() {
                    scheduler.remove_data_breakpoint(id, &mut self.monitor.lock().unwrap());
                }
                self.respond_success(RequestType::DataBreakpoint, request, conn_id);
            }
            DataBreakpointAction::Info => {
                let info = self
                    .with_scheduler(|scheduler| scheduler.data_breakpoint_info())
                    .unwrap_or_default();
                let entries: Vec<serde_json::Value> = info
                    .into_iter()
                    .map(|(id, var, breakpoint_id)| {
                        serde_json::json!({
                            "id": id,
                            "var": var,
                            "breakpoint_id": breakpoint_id,
                        })
                    })
                    .collect();
                let mut response = GenericResponse::success(RequestType::DataBreakpoint)
                    .with_token(request.token.as_deref());
                response.set_value("data-breakpoints", entries);
                self.server.send_to(conn_id, &response.to_json(self.pretty()));
            }
            DataBreakpointAction::Add => {
                let var_name = payload.var_name.clone().unwrap_or_default();
                let breakpoint_id = payload.breakpoint_id.unwrap_or_default();
                // data breakpoints watch the assignment sites of the variable
                let assignments = db.assigned_breakpoints(&var_name, breakpoint_id);
                if assignments.is_empty() {
                    self.respond_error(
                        RequestType::DataBreakpoint,
                        format!("{var_name} is not assigned in the scope of BP ({breakpoint_id})"),
                        request,
                        conn_id,
                    );
                    return;
                }
                let client_condition = payload.condition.clone().unwrap_or_default();
                let mut ids = Vec::new();
                let mut failure = None;
                {
                    let mut scheduler = self.scheduler.lock().unwrap();
                    let mut monitor = self.monitor.lock().unwrap();
                    if let Some(scheduler) = scheduler.as_mut() {
                        for (bp_id, name, assign_condition) in &assignments {
                            let Some(db_bp) = db.breakpoint(*bp_id) else {
                                continue;
                            };
                            let condition = match (
                                assign_condition.is_empty(),
                                client_condition.is_empty(),
                            ) {
                                (true, _) => client_condition.clone(),
                                (false, true) => assign_condition.clone(),
                                (false, false) => {
                                    format!("{assign_condition} && {client_condition}")
                                }
                            };
                            match scheduler.add_data_breakpoint(
                                name,
                                &condition,
                                &db_bp,
                                &mut monitor,
                            ) {
                                Ok(id) => ids.push(id),
                                Err(reason) => {
                                    failure = Some(reason);
                                    break;
                                }
                            }
                        }
                    }
                }
                match failure {
                    Some(reason) => {
                        self.respond_error(RequestType::DataBreakpoint, reason, request, conn_id);
                    }
                    None => {
                        let mut response = GenericResponse::success(RequestType::DataBreakpoint)
                            .with_token(request.token.as_deref());
                        response.set_value("ids", ids);
                        self.server.send_to(conn_id, &response.to_json(self.pretty()));
                    }
                }
            }
        }
    }

    /// Serve the symbol table to a remote runtime (the other side of the
    /// network pass-through provider).
    fn handle_symbol(&self, query: SymbolQuery, token: Option<&str>, conn_id: u64) {
        let Some(db) = self.symbol_table() else {
            let response = GenericResponse::error(
                RequestType::Symbol,
                "Database is not initialized or is initialized incorrectly",
            )
            .with_token(token);
            self.server.send_to(conn_id, &response.to_json(self.pretty()));
            return;
        };
        let reply = serve_symbol_query(&db, query);
        let response = SymbolResponse { reply };
        self.server
            .send_to(conn_id, &response.to_json(token, self.pretty()));
    }

    fn on_disconnect(&self, _conn_id: u64) {
        let detach = self.options.lock().unwrap().detach_after_disconnect;
        if detach && self.server.num_connections() == 0 {
            self.detach();
        }
    }

    /// Drop all inserted breakpoints and resume the simulation
    /// unconditionally.
    fn detach(&self) {
        info!("last client disconnected; detaching");
        let mut scheduler = self.scheduler.lock().unwrap();
        if let Some(scheduler) = scheduler.as_mut() {
            scheduler.clear();
            scheduler.set_evaluation_mode(EvaluationMode::None);
        }
        drop(scheduler);
        self.lock.ready();
    }

    // ── Plusargs ──────────────────────────────────────────────────────────────

    fn port(&self) -> u16 {
        get_plus_arg_value(&self.rtl, PLUSARG_PORT)
            .and_then(|text| text.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }
}

/// Answer one tunnelled symbol query from the loaded table.
pub fn serve_symbol_query(db: &SymbolTable, query: SymbolQuery) -> SymbolReply {
    match query {
        SymbolQuery::BreakpointsAt {
            filename,
            line_num,
            column_num,
        } => {
            let breakpoints = match line_num {
                None => db.breakpoints_in_file(&filename),
                Some(line) => db.breakpoints_at(&filename, line, column_num.unwrap_or(0)),
            };
            SymbolReply::Breakpoints { breakpoints }
        }
        SymbolQuery::Breakpoint { id } => SymbolReply::OneBreakpoint {
            breakpoint: db.breakpoint(id),
        },
        SymbolQuery::InstanceName { instance_id } => SymbolReply::Name {
            name: db.instance_name(instance_id),
        },
        SymbolQuery::InstanceNameFromBp { breakpoint_id } => SymbolReply::Name {
            name: db.instance_name_from_bp(breakpoint_id),
        },
        SymbolQuery::InstanceId { name } => SymbolReply::Id {
            id: db.instance_id(&name),
        },
        SymbolQuery::InstanceIdFromBp { breakpoint_id } => SymbolReply::Id {
            id: db.instance_id_from_bp(breakpoint_id),
        },
        SymbolQuery::InstanceNames => SymbolReply::Names {
            names: db.instance_names(),
        },
        SymbolQuery::Filenames => SymbolReply::Names {
            names: db.filenames(),
        },
        SymbolQuery::ContextVariables { breakpoint_id } => SymbolReply::ContextVariables {
            variables: db.context_variables(breakpoint_id),
        },
        SymbolQuery::GeneratorVariables { instance_id } => SymbolReply::GeneratorVariables {
            variables: db.generator_variables(instance_id),
        },
        SymbolQuery::AnnotationValues { name } => SymbolReply::Values {
            values: db.annotation_values(&name),
        },
        SymbolQuery::ResolveScopedBreakpoint {
            name,
            breakpoint_id,
        } => SymbolReply::Name {
            name: db.resolve_scoped_name_breakpoint(&name, breakpoint_id),
        },
        SymbolQuery::ResolveScopedInstance { name, instance_id } => SymbolReply::Name {
            name: db.resolve_scoped_name_instance(&name, instance_id),
        },
        SymbolQuery::AssignedBreakpoints {
            name,
            breakpoint_id,
        } => SymbolReply::Assignments {
            assignments: db.assigned_breakpoints(&name, breakpoint_id),
        },
        SymbolQuery::ExecutionOrder => SymbolReply::Order {
            order: db.execution_bp_order(),
        },
    }
}

fn format_value(value: i64, use_hex: bool) -> String {
    if use_hex {
        format!("0x{value:x}")
    } else {
        value.to_string()
    }
}

fn has_plus_arg(rtl: &RtlClient, flag: &str) -> bool {
    rtl.argv().iter().any(|arg| arg == flag)
}

fn get_plus_arg_value(rtl: &RtlClient, prefix: &str) -> Option<String> {
    rtl.argv()
        .iter()
        .find_map(|arg| arg.strip_prefix(prefix).map(str::to_string))
}
