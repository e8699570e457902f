//! RTL simulator interface.
//!
//! [`Simulator`] is the capability surface the debugger consumes from the
//! host simulator (the VPI boundary). The raw C callback shape is wrapped
//! here once and never surfaces to the rest of the system. [`RtlClient`]
//! layers a handle cache and the testbench instance mapping on top.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::warn;

/// Opaque handle to a named object inside the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalHandle(pub u64);

/// Identifier of a registered simulator callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(pub u64);

/// What kind of children to iterate under a hierarchy handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    Module,
    Net,
}

/// Callback registration points offered by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    ValueChange,
    StartOfSim,
    EndOfSim,
    NextSimTime,
}

/// Simulation control operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimControl {
    Stop,
    Finish,
}

/// Callback invoked by the simulator; the argument is the new value for
/// `ValueChange`, 0 otherwise.
pub type SimCallback = Box<dyn FnMut(i64) + Send>;

/// Abstract simulator capability surface.
///
/// Implementations use interior mutability; the debugger serialises value
/// reads through its per-sweep cache, so implementations may assume calls
/// arrive one at a time.
pub trait Simulator: Send + Sync {
    /// Look up a handle by full hierarchical name.
    fn handle_by_name(&self, name: &str) -> Option<SignalHandle>;
    /// Full hierarchical name of a handle.
    fn name_of(&self, handle: SignalHandle) -> Option<String>;
    /// Integer value of a signal, `None` on an invalid handle.
    fn get_value(&self, handle: SignalHandle) -> Option<i64>;
    /// Deposit a value onto a signal.
    fn set_value(&self, handle: SignalHandle, value: i64) -> bool;
    /// Children of a hierarchy handle; `None` iterates the design tops.
    fn iter_children(&self, parent: Option<SignalHandle>, kind: ChildKind) -> Vec<SignalHandle>;
    /// Register a callback. `NextSimTime` callbacks are one-shot: they fire
    /// at the next time step and are removed.
    fn register_cb(
        &self,
        kind: CallbackKind,
        handle: Option<SignalHandle>,
        callback: SimCallback,
    ) -> CallbackId;
    fn remove_cb(&self, id: CallbackId) -> bool;
    fn control(&self, op: SimControl);
    /// Current simulation time.
    fn time(&self) -> u64;
    /// Simulator command line, used for plusargs.
    fn argv(&self) -> Vec<String>;
    /// Move the clock back to the last rising edge before `target_time`.
    /// Simulators without time travel refuse without error.
    fn rewind(&self, _target_time: u64, _clocks: &[SignalHandle]) -> bool {
        false
    }
}

// ── RtlClient ─────────────────────────────────────────────────────────────────

/// Simulator access with handle caching and design-to-testbench name mapping.
pub struct RtlClient {
    sim: Arc<dyn Simulator>,
    handles: Mutex<HashMap<String, SignalHandle>>,
    /// design top definition name → testbench hierarchy prefix
    mapping: Mutex<HashMap<String, String>>,
}

impl RtlClient {
    pub fn new(sim: Arc<dyn Simulator>) -> Self {
        Self {
            sim,
            handles: Mutex::new(HashMap::new()),
            mapping: Mutex::new(HashMap::new()),
        }
    }

    pub fn simulator(&self) -> &Arc<dyn Simulator> {
        &self.sim
    }

    /// Cached handle lookup; the second call for a name is O(1).
    pub fn get_handle(&self, name: &str) -> Option<SignalHandle> {
        if let Some(handle) = self.handles.lock().unwrap().get(name) {
            return Some(*handle);
        }
        let handle = self.sim.handle_by_name(name)?;
        self.handles
            .lock()
            .unwrap()
            .insert(name.to_string(), handle);
        Some(handle)
    }

    pub fn get_value(&self, handle: SignalHandle) -> Option<i64> {
        self.sim.get_value(handle)
    }

    pub fn get_value_by_name(&self, name: &str) -> Option<i64> {
        let handle = self.get_handle(name)?;
        self.sim.get_value(handle)
    }

    pub fn set_value_by_name(&self, name: &str, value: i64) -> bool {
        match self.get_handle(name) {
            Some(handle) => self.sim.set_value(handle, value),
            None => false,
        }
    }

    pub fn is_valid_signal(&self, name: &str) -> bool {
        self.get_handle(name).is_some()
    }

    pub fn time(&self) -> u64 {
        self.sim.time()
    }

    pub fn argv(&self) -> Vec<String> {
        self.sim.argv()
    }

    pub fn finish_sim(&self) {
        self.sim.control(SimControl::Finish);
    }

    pub fn stop_sim(&self) {
        self.sim.control(SimControl::Stop);
    }

    /// Ask the simulator to step back one clock cycle.
    pub fn reverse_last_posedge(&self, clocks: &[SignalHandle]) -> bool {
        self.sim.rewind(self.sim.time(), clocks)
    }

    // ── Instance mapping ──────────────────────────────────────────────────────

    /// Discover the testbench wrapper prefix for the design tops the symbol
    /// table expects.
    ///
    /// For each definition name (the first token of the expected instance
    /// names) the hierarchy is walked for module instances whose path ends
    /// with that name; ambiguity is resolved towards the candidate with the
    /// most signals underneath. The resulting mapping translates
    /// `def_name.x` → `prefix.x`.
    pub fn map_instances(&self, instance_names: &[String]) {
        let mut def_names: Vec<String> = instance_names
            .iter()
            .filter_map(|name| name.split('.').next())
            .map(str::to_string)
            .collect();
        def_names.sort();
        def_names.dedup();

        let paths = self.module_paths();
        let mut mapping = self.mapping.lock().unwrap();
        for def_name in def_names {
            let candidates: Vec<&(String, SignalHandle)> = paths
                .iter()
                .filter(|(path, _)| {
                    path == &def_name || path.ends_with(&format!(".{def_name}"))
                })
                .collect();
            let chosen = match candidates.len() {
                0 => {
                    warn!(%def_name, "no testbench instance found; using identity mapping");
                    None
                }
                1 => Some(candidates[0]),
                _ => {
                    warn!(
                        %def_name,
                        count = candidates.len(),
                        "multiple testbench instances match; picking the one with most signals"
                    );
                    candidates.iter().copied().max_by_key(|(_, handle)| {
                        self.sim.iter_children(Some(*handle), ChildKind::Net).len()
                    })
                }
            };
            let prefix = chosen
                .map(|(path, _)| path.clone())
                .unwrap_or_else(|| def_name.clone());
            mapping.insert(def_name, prefix);
        }
    }

    /// Apply the instance mapping: `def_name.x` → `prefix.x`.
    pub fn get_full_name(&self, name: &str) -> String {
        let mapping = self.mapping.lock().unwrap();
        let head = name.split('.').next().unwrap_or(name);
        match mapping.get(head) {
            Some(prefix) => {
                let rest = &name[head.len()..];
                format!("{prefix}{rest}")
            }
            None => name.to_string(),
        }
    }

    /// The discovered `def_name → prefix` pairs.
    pub fn instance_mapping(&self) -> HashMap<String, String> {
        self.mapping.lock().unwrap().clone()
    }

    /// All module instance paths in the design, depth first.
    fn module_paths(&self) -> Vec<(String, SignalHandle)> {
        let mut result = Vec::new();
        let mut stack: Vec<SignalHandle> = self.sim.iter_children(None, ChildKind::Module);
        while let Some(handle) = stack.pop() {
            if let Some(name) = self.sim.name_of(handle) {
                result.push((name, handle));
            }
            stack.extend(self.sim.iter_children(Some(handle), ChildKind::Module));
        }
        result
    }

    /// Clock discovery fallback when the symbol table carries no `clock`
    /// annotation: top-level signals named `clk` or `clock`.
    pub fn clocks_from_design(&self) -> Vec<String> {
        let mut result = Vec::new();
        for top in self.sim.iter_children(None, ChildKind::Module) {
            for net in self.sim.iter_children(Some(top), ChildKind::Net) {
                let Some(name) = self.sim.name_of(net) else {
                    continue;
                };
                let base = name.rsplit('.').next().unwrap_or(&name);
                if base == "clk" || base == "clock" {
                    result.push(name);
                }
            }
        }
        result
    }
}
