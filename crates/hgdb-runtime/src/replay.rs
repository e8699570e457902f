//! Replay shim: a [`Simulator`] driven from a pre-captured waveform.
//!
//! For post-mortem debugging the runtime can run against a recorded trace
//! instead of a live simulator. The concrete waveform parsers (VCD, FSDB)
//! stay outside the crate; they feed in through [`WaveformSource`]. Unlike a
//! live simulator, a replay client supports `rewind`, so step-back and
//! reverse-continue work for real.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::rtl::{
    CallbackId, CallbackKind, ChildKind, SignalHandle, SimCallback, SimControl, Simulator,
};

/// Surface consumed from an external waveform parser.
pub trait WaveformSource: Send + Sync {
    /// Full hierarchical names of all recorded signals.
    fn signals(&self) -> Vec<String>;
    /// Value of a signal at a time, `None` for unknown signals.
    fn value_at(&self, signal: &str, time: u64) -> Option<i64>;
    /// Sorted times of the recorded rising clock edges.
    fn edge_times(&self) -> Vec<u64>;
    /// The last recorded time.
    fn end_time(&self) -> u64;
}

struct RegisteredCallback {
    kind: CallbackKind,
    handle: Option<SignalHandle>,
    callback: SimCallback,
}

/// A [`Simulator`] implementation backed by a waveform.
///
/// Signal and module handles are derived from the recorded signal names.
/// Time moves via [`advance`](ReplayClient::advance), which fires the
/// registered value-change and next-sim-time callbacks the way a live
/// simulator would.
pub struct ReplayClient {
    source: Box<dyn WaveformSource>,
    time: AtomicU64,
    /// index into `names` doubles as the handle value
    names: Vec<String>,
    index: HashMap<String, usize>,
    /// module paths derived from signal name prefixes
    modules: Vec<String>,
    callbacks: Mutex<HashMap<u64, RegisteredCallback>>,
    next_cb_id: AtomicU64,
    argv: Vec<String>,
}

impl ReplayClient {
    pub fn new(source: Box<dyn WaveformSource>, argv: Vec<String>) -> Self {
        let names = source.signals();
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let mut modules: Vec<String> = names
            .iter()
            .filter_map(|name| name.rsplit_once('.').map(|(prefix, _)| prefix.to_string()))
            .flat_map(|prefix| {
                // every prefix of a module path is itself a module path
                let mut paths = Vec::new();
                let mut acc = String::new();
                for part in prefix.split('.') {
                    if !acc.is_empty() {
                        acc.push('.');
                    }
                    acc.push_str(part);
                    paths.push(acc.clone());
                }
                paths
            })
            .collect();
        modules.sort();
        modules.dedup();
        Self {
            source,
            time: AtomicU64::new(0),
            names,
            index,
            modules,
            callbacks: Mutex::new(HashMap::new()),
            next_cb_id: AtomicU64::new(1),
            argv,
        }
    }

    /// Move to the next recorded clock edge and fire callbacks. Returns the
    /// new time, or `None` at the end of the trace.
    pub fn advance(&self) -> Option<u64> {
        let now = self.time.load(Ordering::SeqCst);
        let next = self.source.edge_times().into_iter().find(|t| *t > now)?;
        let previous = now;
        self.time.store(next, Ordering::SeqCst);
        self.fire_value_change(previous, next);
        self.fire_next_sim_time();
        Some(next)
    }

    /// Fire the start-of-simulation callbacks.
    pub fn start(&self) {
        self.fire(CallbackKind::StartOfSim);
    }

    fn fire(&self, kind: CallbackKind) {
        // callbacks re-enter the client for value reads, so they run with
        // the registry unlocked
        let mut taken = std::mem::take(&mut *self.callbacks.lock().unwrap());
        for cb in taken.values_mut() {
            if cb.kind == kind {
                (cb.callback)(0);
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

    fn fire_value_change(&self, from: u64, to: u64) {
        // a clock reads high at every sampled rising edge, so a level diff
        // between edges would miss it; a dip at the midpoint is a real pair
        // of transitions (fall, then the rise we are delivering)
        let midpoint = from + (to - from) / 2;
        let mut taken = std::mem::take(&mut *self.callbacks.lock().unwrap());
        for cb in taken.values_mut() {
            if cb.kind != CallbackKind::ValueChange {
                continue;
            }
            let Some(handle) = cb.handle else { continue };
            let Some(name) = self.names.get(handle.0 as usize) else {
                continue;
            };
            let old = self.source.value_at(name, from);
            let new = self.source.value_at(name, to);
            if old != new {
                (cb.callback)(new.unwrap_or(0));
            } else if let (Some(mid), Some(new_value)) =
                (self.source.value_at(name, midpoint), new)
            {
                if mid != new_value {
                    (cb.callback)(mid);
                    (cb.callback)(new_value);
                }
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

impl Simulator for ReplayClient {
    fn handle_by_name(&self, name: &str) -> Option<SignalHandle> {
        if let Some(i) = self.index.get(name) {
            return Some(SignalHandle(*i as u64));
        }
        // module handles sit above the signal range
        self.modules
            .iter()
            .position(|m| m == name)
            .map(|i| SignalHandle((self.names.len() + i) as u64))
    }

    fn name_of(&self, handle: SignalHandle) -> Option<String> {
        let i = handle.0 as usize;
        if i < self.names.len() {
            return Some(self.names[i].clone());
        }
        self.modules.get(i - self.names.len()).cloned()
    }

    fn get_value(&self, handle: SignalHandle) -> Option<i64> {
        let name = self.names.get(handle.0 as usize)?;
        self.source.value_at(name, self.time.load(Ordering::SeqCst))
    }

    fn set_value(&self, _handle: SignalHandle, _value: i64) -> bool {
        // a recorded trace is immutable
        false
    }

    fn iter_children(&self, parent: Option<SignalHandle>, kind: ChildKind) -> Vec<SignalHandle> {
        let parent_path = match parent {
            Some(handle) => match self.name_of(handle) {
                Some(path) => path,
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
        match kind {
            ChildKind::Module => self
                .modules
                .iter()
                .filter(|path| is_direct_child(path))
                .filter_map(|path| self.handle_by_name(path))
                .collect(),
            ChildKind::Net => self
                .names
                .iter()
                .filter(|name| is_direct_child(name))
                .filter_map(|name| self.handle_by_name(name))
                .collect(),
        }
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

    fn control(&self, _op: SimControl) {
        // nothing to stop; the driver observes the end of the trace
    }

    fn time(&self) -> u64 {
        self.time.load(Ordering::SeqCst)
    }

    fn argv(&self) -> Vec<String> {
        self.argv.clone()
    }

    fn rewind(&self, target_time: u64, _clocks: &[SignalHandle]) -> bool {
        let edges = self.source.edge_times();
        match edges.into_iter().rev().find(|t| *t < target_time) {
            Some(t) => {
                self.time.store(t, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory waveform: per-signal (time, value) steps.
    struct TestWave {
        signals: HashMap<String, Vec<(u64, i64)>>,
        edges: Vec<u64>,
    }

    impl WaveformSource for TestWave {
        fn signals(&self) -> Vec<String> {
            let mut names: Vec<String> = self.signals.keys().cloned().collect();
            names.sort();
            names
        }

        fn value_at(&self, signal: &str, time: u64) -> Option<i64> {
            let steps = self.signals.get(signal)?;
            let mut value = 0;
            for (t, v) in steps {
                if *t > time {
                    break;
                }
                value = *v;
            }
            Some(value)
        }

        fn edge_times(&self) -> Vec<u64> {
            self.edges.clone()
        }

        fn end_time(&self) -> u64 {
            self.edges.last().copied().unwrap_or(0)
        }
    }

    fn wave() -> TestWave {
        let mut signals = HashMap::new();
        signals.insert(
            "top.clk".to_string(),
            vec![(0, 0), (10, 1), (15, 0), (20, 1), (25, 0), (30, 1)],
        );
        signals.insert(
            "top.child.a".to_string(),
            vec![(0, 1), (20, 2), (30, 3)],
        );
        TestWave {
            signals,
            edges: vec![10, 20, 30],
        }
    }

    #[test]
    fn test_handles_and_hierarchy() {
        let client = ReplayClient::new(Box::new(wave()), vec![]);
        let clk = client.handle_by_name("top.clk").unwrap();
        assert_eq!(client.name_of(clk).as_deref(), Some("top.clk"));
        let tops = client.iter_children(None, ChildKind::Module);
        assert_eq!(tops.len(), 1);
        assert_eq!(client.name_of(tops[0]).as_deref(), Some("top"));
        let nets = client.iter_children(Some(tops[0]), ChildKind::Net);
        assert_eq!(nets.len(), 1);
    }

    #[test]
    fn test_advance_reads_values_at_edges() {
        let client = ReplayClient::new(Box::new(wave()), vec![]);
        let a = client.handle_by_name("top.child.a").unwrap();
        assert_eq!(client.get_value(a), Some(1));
        assert_eq!(client.advance(), Some(10));
        assert_eq!(client.get_value(a), Some(1));
        assert_eq!(client.advance(), Some(20));
        assert_eq!(client.get_value(a), Some(2));
        assert_eq!(client.advance(), Some(30));
        assert_eq!(client.get_value(a), Some(3));
        assert_eq!(client.advance(), None);
    }

    #[test]
    fn test_value_change_callback_fires() {
        let client = ReplayClient::new(Box::new(wave()), vec![]);
        let a = client.handle_by_name("top.child.a").unwrap();
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let seen_cb = std::sync::Arc::clone(&seen);
        client.register_cb(
            CallbackKind::ValueChange,
            Some(a),
            Box::new(move |v| seen_cb.lock().unwrap().push(v)),
        );
        client.advance(); // 10: a unchanged
        client.advance(); // 20: a 1 -> 2
        client.advance(); // 30: a 2 -> 3
        assert_eq!(*seen.lock().unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_clock_callback_fires_on_every_edge() {
        let client = ReplayClient::new(Box::new(wave()), vec![]);
        let clk = client.handle_by_name("top.clk").unwrap();
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let seen_cb = std::sync::Arc::clone(&seen);
        client.register_cb(
            CallbackKind::ValueChange,
            Some(clk),
            Box::new(move |v| seen_cb.lock().unwrap().push(v)),
        );
        client.advance(); // 10: 0 -> 1
        client.advance(); // 20: fell at 15, rises again
        client.advance(); // 30: fell at 25, rises again
        // the clock reads 1 at every sampled edge; the dips between edges
        // must still be delivered as transitions
        assert_eq!(*seen.lock().unwrap(), vec![1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_next_sim_time_callback_is_one_shot() {
        let client = ReplayClient::new(Box::new(wave()), vec![]);
        let count = std::sync::Arc::new(Mutex::new(0));
        let count_cb = std::sync::Arc::clone(&count);
        client.register_cb(
            CallbackKind::NextSimTime,
            None,
            Box::new(move |_| *count_cb.lock().unwrap() += 1),
        );
        client.advance();
        client.advance();
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_rewind_moves_to_previous_edge() {
        let client = ReplayClient::new(Box::new(wave()), vec![]);
        client.advance();
        client.advance();
        assert_eq!(client.time(), 20);
        assert!(client.rewind(20, &[]));
        assert_eq!(client.time(), 10);
        // no edge before the first one
        assert!(!client.rewind(10, &[]));
    }
}
