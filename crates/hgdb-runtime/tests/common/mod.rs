//! Shared fixtures: an in-memory mock simulator, an in-process transport,
//! and SQLite symbol table builders.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use hgdb_runtime::rtl::{
    CallbackId, CallbackKind, ChildKind, SignalHandle, SimCallback, SimControl, Simulator,
};
use hgdb_runtime::server::{DisconnectHandler, MessageHandler, ServerError, Transport};
use hgdb_runtime::symbol::sqlite::{create_schema, SqliteSymbolTableProvider};
use hgdb_runtime::symbol::{SymbolTable, SymbolTableProvider};
use rusqlite::Connection;

// ── Mock simulator ────────────────────────────────────────────────────────────

struct MockState {
    time: u64,
    /// full name → value; insertion order doubles as the handle space
    values: HashMap<String, i64>,
    names: Vec<String>,
    modules: HashSet<String>,
    finished: bool,
}

struct RegisteredCallback {
    kind: CallbackKind,
    handle: Option<SignalHandle>,
    callback: SimCallback,
}

/// A scriptable [`Simulator`]: tests add modules and signals, poke values,
/// and step the clock to fire callbacks the way a live simulator would.
pub struct MockSimulator {
    state: Mutex<MockState>,
    callbacks: Mutex<HashMap<u64, RegisteredCallback>>,
    next_cb_id: AtomicU64,
    argv: Vec<String>,
    rewindable: bool,
}

impl MockSimulator {
    pub fn new() -> Arc<Self> {
        Self::with_argv(Vec::new())
    }

    pub fn with_argv(argv: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                time: 0,
                values: HashMap::new(),
                names: Vec::new(),
                modules: HashSet::new(),
                finished: false,
            }),
            callbacks: Mutex::new(HashMap::new()),
            next_cb_id: AtomicU64::new(1),
            argv,
            rewindable: false,
        })
    }

    pub fn rewindable(argv: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                time: 0,
                values: HashMap::new(),
                names: Vec::new(),
                modules: HashSet::new(),
                finished: false,
            }),
            callbacks: Mutex::new(HashMap::new()),
            next_cb_id: AtomicU64::new(1),
            argv,
            rewindable: true,
        })
    }

    pub fn add_module(&self, path: &str) {
        let mut state = self.state.lock().unwrap();
        if state.modules.insert(path.to_string()) {
            state.names.push(path.to_string());
        }
    }

    pub fn add_signal(&self, full_name: &str, value: i64) {
        let mut state = self.state.lock().unwrap();
        if !state.values.contains_key(full_name) {
            state.names.push(full_name.to_string());
        }
        state.values.insert(full_name.to_string(), value);
    }

    pub fn poke(&self, full_name: &str, value: i64) {
        self.state
            .lock()
            .unwrap()
            .values
            .insert(full_name.to_string(), value);
    }

    pub fn set_time(&self, time: u64) {
        self.state.lock().unwrap().time = time;
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().unwrap().finished
    }

    /// Drive one rising clock edge: advance time, raise the clock, fire the
    /// value-change callbacks, then the one-shot next-sim-time callbacks,
    /// then lower the clock.
    pub fn step_clock(&self, clock: &str) {
        {
            let mut state = self.state.lock().unwrap();
            state.time += 1;
            state.values.insert(clock.to_string(), 1);
        }
        let clock_handle = self.handle_by_name(clock);
        self.fire_value_change(clock_handle, 1);
        self.fire_next_sim_time();
        {
            let mut state = self.state.lock().unwrap();
            state.time += 1;
            state.values.insert(clock.to_string(), 0);
        }
        self.fire_value_change(clock_handle, 0);
    }

    fn fire_value_change(&self, handle: Option<SignalHandle>, value: i64) {
        let mut taken = std::mem::take(&mut *self.callbacks.lock().unwrap());
        for cb in taken.values_mut() {
            if cb.kind == CallbackKind::ValueChange && cb.handle == handle {
                (cb.callback)(value);
            }
        }
        self.restore(taken);
    }

    /// Fire and drop: next-sim-time callbacks are one-shot.
    fn fire_next_sim_time(&self) {
        let taken = std::mem::take(&mut *self.callbacks.lock().unwrap());
        let (mut one_shot, keep): (Vec<_>, Vec<_>) = taken
            .into_iter()
            .partition(|(_, cb)| cb.kind == CallbackKind::NextSimTime);
        self.restore(keep.into_iter().collect());
        for (_, cb) in &mut one_shot {
            (cb.callback)(0);
        }
    }

    pub fn fire_start_of_sim(&self) {
        let mut taken = std::mem::take(&mut *self.callbacks.lock().unwrap());
        for cb in taken.values_mut() {
            if cb.kind == CallbackKind::StartOfSim {
                (cb.callback)(0);
            }
        }
        self.restore(taken);
    }

    fn restore(&self, taken: HashMap<u64, RegisteredCallback>) {
        let mut callbacks = self.callbacks.lock().unwrap();
        for (id, cb) in taken {
            callbacks.entry(id).or_insert(cb);
        }
    }
}

impl Simulator for MockSimulator {
    fn handle_by_name(&self, name: &str) -> Option<SignalHandle> {
        let state = self.state.lock().unwrap();
        state
            .names
            .iter()
            .position(|n| n == name)
            .map(|i| SignalHandle(i as u64))
    }

    fn name_of(&self, handle: SignalHandle) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.names.get(handle.0 as usize).cloned()
    }

    fn get_value(&self, handle: SignalHandle) -> Option<i64> {
        let state = self.state.lock().unwrap();
        let name = state.names.get(handle.0 as usize)?;
        state.values.get(name).copied()
    }

    fn set_value(&self, handle: SignalHandle, value: i64) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(name) = state.names.get(handle.0 as usize).cloned() else {
            return false;
        };
        if !state.values.contains_key(&name) {
            return false;
        }
        state.values.insert(name, value);
        true
    }

    fn iter_children(&self, parent: Option<SignalHandle>, kind: ChildKind) -> Vec<SignalHandle> {
        let state = self.state.lock().unwrap();
        let parent_path = match parent {
            Some(handle) => match state.names.get(handle.0 as usize) {
                Some(path) => path.clone(),
                None => return Vec::new(),
            },
            None => String::new(),
        };
        let is_direct_child = |candidate: &str| -> bool {
            if parent_path.is_empty() {
                !candidate.contains('.')
            } else {
                candidate
                    .strip_prefix(&format!("{parent_path}."))
                    .is_some_and(|rest| !rest.contains('.'))
            }
        };
        state
            .names
            .iter()
            .enumerate()
            .filter(|(_, name)| {
                let is_module = state.modules.contains(*name);
                match kind {
                    ChildKind::Module => is_module,
                    ChildKind::Net => !is_module,
                }
            })
            .filter(|(_, name)| is_direct_child(name))
            .map(|(i, _)| SignalHandle(i as u64))
            .collect()
    }

    fn register_cb(
        &self,
        kind: CallbackKind,
        handle: Option<SignalHandle>,
        callback: SimCallback,
    ) -> CallbackId {
        let id = self.next_cb_id.fetch_add(1, Ordering::SeqCst);
        self.callbacks.lock().unwrap().insert(
            id,
            RegisteredCallback {
                kind,
                handle,
                callback,
            },
        );
        CallbackId(id)
    }

    fn remove_cb(&self, id: CallbackId) -> bool {
        self.callbacks.lock().unwrap().remove(&id.0).is_some()
    }

    fn control(&self, op: SimControl) {
        if matches!(op, SimControl::Finish | SimControl::Stop) {
            self.state.lock().unwrap().finished = true;
        }
    }

    fn time(&self) -> u64 {
        self.state.lock().unwrap().time
    }

    fn argv(&self) -> Vec<String> {
        self.argv.clone()
    }

    fn rewind(&self, _target_time: u64, _clocks: &[SignalHandle]) -> bool {
        if !self.rewindable {
            return false;
        }
        let mut state = self.state.lock().unwrap();
        // one cycle is two time units
        state.time = state.time.saturating_sub(2);
        true
    }
}

// ── In-process transport ──────────────────────────────────────────────────────

/// Records everything the debugger sends; tests inject inbound frames by
/// calling `Debugger::on_message` directly.
pub struct ChannelTransport {
    sent: Mutex<Vec<SentMessage>>,
    topics: Mutex<HashMap<String, HashSet<u64>>>,
    connections: Mutex<HashSet<u64>>,
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    /// `None` for broadcasts.
    pub conn_id: Option<u64>,
    pub topic: Option<String>,
    pub text: String,
}

impl ChannelTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            topics: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashSet::from([0])),
        })
    }

    pub fn take_sent(&self) -> Vec<SentMessage> {
        std::mem::take(&mut self.sent.lock().unwrap())
    }

    pub fn sent_of_type(&self, kind: &str) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|message| serde_json::from_str::<serde_json::Value>(&message.text).ok())
            .filter(|value| value.get("type").and_then(|t| t.as_str()) == Some(kind))
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Transport for ChannelTransport {
    fn start(&self, _port: u16) -> Result<(), ServerError> {
        Ok(())
    }

    fn stop(&self) {}

    fn send(&self, message: &str) {
        self.sent.lock().unwrap().push(SentMessage {
            conn_id: None,
            topic: None,
            text: message.to_string(),
        });
    }

    fn send_to(&self, conn_id: u64, message: &str) {
        self.sent.lock().unwrap().push(SentMessage {
            conn_id: Some(conn_id),
            topic: None,
            text: message.to_string(),
        });
    }

    fn publish(&self, topic: &str, message: &str) {
        let subscribers: Vec<u64> = self
            .topics
            .lock()
            .unwrap()
            .get(topic)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for conn_id in subscribers {
            self.sent.lock().unwrap().push(SentMessage {
                conn_id: Some(conn_id),
                topic: Some(topic.to_string()),
                text: message.to_string(),
            });
        }
    }

    fn add_to_topic(&self, topic: &str, conn_id: u64) {
        self.topics
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .insert(conn_id);
    }

    fn remove_from_topic(&self, topic: &str, conn_id: u64) {
        if let Some(subscribers) = self.topics.lock().unwrap().get_mut(topic) {
            subscribers.remove(&conn_id);
        }
    }

    fn set_on_message(&self, _handler: MessageHandler) {}

    fn set_on_disconnect(&self, _handler: DisconnectHandler) {}

    fn num_connections(&self) -> usize {
        self.connections.lock().unwrap().len()
    }
}

// ── SQLite fixtures ───────────────────────────────────────────────────────────

pub fn store_instance(conn: &Connection, id: u32, name: &str) {
    conn.execute(
        "INSERT INTO instance (id, name) VALUES (?1, ?2)",
        rusqlite::params![id, name],
    )
    .unwrap();
}

pub fn store_breakpoint(
    conn: &Connection,
    id: u32,
    instance_id: u32,
    filename: &str,
    line_num: u32,
    column_num: u32,
    condition: &str,
    trigger: &str,
) {
    conn.execute(
        "INSERT INTO breakpoint (id, filename, line_num, column_num, condition, \"trigger\", instance_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![id, filename, line_num, column_num, condition, trigger, instance_id],
    )
    .unwrap();
}

pub fn store_scope(conn: &Connection, id: u32, breakpoints: &str) {
    conn.execute(
        "INSERT INTO scope (id, breakpoints) VALUES (?1, ?2)",
        rusqlite::params![id, breakpoints],
    )
    .unwrap();
}

pub fn store_variable(conn: &Connection, id: u32, value: &str, is_rtl: bool) {
    conn.execute(
        "INSERT INTO variable (id, value, is_rtl) VALUES (?1, ?2, ?3)",
        rusqlite::params![id, value, is_rtl],
    )
    .unwrap();
}

pub fn store_context_variable(conn: &Connection, name: &str, breakpoint_id: u32, variable_id: u32) {
    conn.execute(
        "INSERT INTO context_variable (name, breakpoint_id, variable_id) VALUES (?1, ?2, ?3)",
        rusqlite::params![name, breakpoint_id, variable_id],
    )
    .unwrap();
}

pub fn store_generator_variable(
    conn: &Connection,
    name: &str,
    instance_id: u32,
    variable_id: u32,
) {
    conn.execute(
        "INSERT INTO generator_variable (name, instance_id, variable_id) VALUES (?1, ?2, ?3)",
        rusqlite::params![name, instance_id, variable_id],
    )
    .unwrap();
}

pub fn store_annotation(conn: &Connection, name: &str, value: &str) {
    conn.execute(
        "INSERT INTO annotation (name, value) VALUES (?1, ?2)",
        rusqlite::params![name, value],
    )
    .unwrap();
}

pub fn store_assignment(conn: &Connection, id: u32, name: &str, breakpoint_id: u32, condition: &str) {
    conn.execute(
        "INSERT INTO assignment (id, name, breakpoint_id, condition) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![id, name, breakpoint_id, condition],
    )
    .unwrap();
}

/// In-memory symbol table built by `populate`.
pub fn memory_symbol_table(populate: impl FnOnce(&Connection)) -> SymbolTable {
    let conn = Connection::open_in_memory().unwrap();
    create_schema(&conn).unwrap();
    populate(&conn);
    SymbolTable::new(Box::new(SqliteSymbolTableProvider::from_connection(conn)))
}

/// Same, but returning the provider for direct trait-level access.
pub fn memory_provider(populate: impl FnOnce(&Connection)) -> impl SymbolTableProvider {
    let conn = Connection::open_in_memory().unwrap();
    create_schema(&conn).unwrap();
    populate(&conn);
    SqliteSymbolTableProvider::from_connection(conn)
}
