//! Watched-value tracking between stops.
//!
//! The monitor does not know how to resolve names or read the simulator; the
//! value-reading closure comes in through the constructor. It holds no thread
//! of its own: the orchestrator calls [`collect`](Monitor::collect) with
//! `Breakpoint` after a stop, with `ClockEdge`/`DelayClockEdge` on every
//! registered clock edge, and with `Changed`/`Data` opportunistically around
//! stops.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

/// How a watched value is scheduled for emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchKind {
    /// Sample when a breakpoint pauses the simulation.
    Breakpoint,
    /// Sample on every clock edge.
    ClockEdge,
    /// Emit only when the sampled value differs from the last one.
    Changed,
    /// Value-change detection backing a data breakpoint.
    Data,
    /// Sample on every clock edge, emit delayed by a FIFO of fixed depth.
    DelayClockEdge,
}

/// Reads the current value of a full RTL name.
pub type GetValueFn = Box<dyn Fn(&str) -> Option<i64> + Send + Sync>;
/// Optional gate on sampling a watched value.
pub type EnableFn = Box<dyn Fn() -> bool + Send + Sync>;

enum ValueStore {
    Scalar(Option<i64>),
    Fifo {
        depth: usize,
        values: VecDeque<Option<i64>>,
    },
}

impl ValueStore {
    fn get(&self) -> Option<i64> {
        match self {
            ValueStore::Scalar(value) => *value,
            // the FIFO reports nothing until it has filled up
            ValueStore::Fifo { depth, values } => {
                if values.len() == *depth {
                    values.front().copied().flatten()
                } else {
                    None
                }
            }
        }
    }

    fn set(&mut self, value: Option<i64>) {
        match self {
            ValueStore::Scalar(slot) => *slot = value,
            ValueStore::Fifo { depth, values } => {
                values.push_back(value);
                if values.len() > *depth {
                    values.pop_front();
                }
            }
        }
    }
}

struct WatchVariable {
    kind: WatchKind,
    full_name: String,
    store: ValueStore,
    enable: Option<EnableFn>,
}

/// Tracks named signals with the four watch policies.
pub struct Monitor {
    get_value: GetValueFn,
    watches: HashMap<u64, WatchVariable>,
    next_id: u64,
}

impl Monitor {
    pub fn new(get_value: GetValueFn) -> Self {
        Self {
            get_value,
            watches: HashMap::new(),
            next_id: 0,
        }
    }

    /// Add a watch, deduplicating on (name, kind): re-adding an existing
    /// watch returns its id.
    pub fn add(&mut self, full_name: impl Into<String>, kind: WatchKind) -> u64 {
        let full_name = full_name.into();
        if let Some(id) = self.is_monitored(&full_name, kind) {
            return id;
        }
        self.insert(WatchVariable {
            kind,
            full_name,
            store: ValueStore::Scalar(None),
            enable: None,
        })
    }

    /// Add a delayed watch reporting values `depth` clock edges late.
    /// Delayed watches are buffers, so they are never deduplicated.
    pub fn add_delayed(&mut self, full_name: impl Into<String>, depth: u32) -> u64 {
        self.insert(WatchVariable {
            kind: WatchKind::DelayClockEdge,
            full_name: full_name.into(),
            store: ValueStore::Fifo {
                depth: depth.max(1) as usize,
                values: VecDeque::new(),
            },
            enable: None,
        })
    }

    fn insert(&mut self, watch: WatchVariable) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.watches.insert(id, watch);
        id
    }

    pub fn remove(&mut self, id: u64) {
        self.watches.remove(&id);
    }

    pub fn set_enable(&mut self, id: u64, enable: EnableFn) {
        if let Some(watch) = self.watches.get_mut(&id) {
            watch.enable = Some(enable);
        }
    }

    pub fn is_monitored(&self, full_name: &str, kind: WatchKind) -> Option<u64> {
        self.watches
            .iter()
            .find(|(_, watch)| watch.full_name == full_name && watch.kind == kind)
            .map(|(id, _)| *id)
    }

    pub fn num(&self, full_name: &str, kind: WatchKind) -> u64 {
        self.watches
            .values()
            .filter(|watch| watch.full_name == full_name && watch.kind == kind)
            .count() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    pub fn full_name(&self, id: u64) -> Option<&str> {
        self.watches.get(&id).map(|watch| watch.full_name.as_str())
    }

    /// Sample, update the stored value, and report whether it changed.
    pub fn var_changed(&mut self, id: u64) -> (bool, Option<i64>) {
        let Some(watch) = self.watches.get_mut(&id) else {
            return (false, None);
        };
        let Some(value) = (self.get_value)(&watch.full_name) else {
            return (false, None);
        };
        let changed = watch.store.get() != Some(value);
        if changed {
            watch.store.set(Some(value));
        }
        (changed, Some(value))
    }

    /// Values to emit for one watch kind, per that kind's policy.
    pub fn collect(&mut self, kind: WatchKind) -> Vec<(u64, Option<i64>)> {
        let mut result = Vec::new();
        let ids: Vec<u64> = self
            .watches
            .iter()
            .filter(|(_, watch)| watch.kind == kind)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            match kind {
                WatchKind::Breakpoint | WatchKind::ClockEdge => {
                    let watch = &self.watches[&id];
                    let enabled = watch.enable.as_ref().is_none_or(|enable| enable());
                    let value = if enabled {
                        (self.get_value)(&watch.full_name)
                    } else {
                        // gated off: report the last sampled value
                        watch.store.get()
                    };
                    if let Some(watch) = self.watches.get_mut(&id) {
                        watch.store.set(value);
                    }
                    result.push((id, value));
                }
                WatchKind::Changed | WatchKind::Data => {
                    let (changed, value) = self.var_changed(id);
                    if changed {
                        result.push((id, value));
                    }
                }
                WatchKind::DelayClockEdge => {
                    let watch = &self.watches[&id];
                    let new_value = (self.get_value)(&watch.full_name);
                    let old_value = watch.store.get();
                    if let Some(watch) = self.watches.get_mut(&id) {
                        watch.store.set(new_value);
                    }
                    result.push((id, old_value));
                }
            }
        }
        result.sort_by_key(|(id, _)| *id);
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    use super::*;

    fn monitor_with(counter: Arc<AtomicI64>) -> Monitor {
        Monitor::new(Box::new(move |_| Some(counter.load(Ordering::SeqCst))))
    }

    #[test]
    fn test_add_dedup() {
        let mut monitor = monitor_with(Arc::new(AtomicI64::new(0)));
        let a = monitor.add("a", WatchKind::Breakpoint);
        let b = monitor.add("a", WatchKind::Breakpoint);
        assert_eq!(a, b);
        // different kind allocates a new id
        let c = monitor.add("a", WatchKind::ClockEdge);
        assert_ne!(a, c);
        monitor.remove(a);
        assert_eq!(monitor.num("a", WatchKind::Breakpoint), 0);
        assert_eq!(monitor.num("a", WatchKind::ClockEdge), 1);
    }

    #[test]
    fn test_breakpoint_kind_always_samples() {
        let value = Arc::new(AtomicI64::new(1));
        let mut monitor = monitor_with(Arc::clone(&value));
        let id = monitor.add("a", WatchKind::Breakpoint);
        assert_eq!(monitor.collect(WatchKind::Breakpoint), vec![(id, Some(1))]);
        // unchanged value still emits
        assert_eq!(monitor.collect(WatchKind::Breakpoint), vec![(id, Some(1))]);
    }

    #[test]
    fn test_enable_condition_reports_prior_value() {
        let value = Arc::new(AtomicI64::new(1));
        let mut monitor = monitor_with(Arc::clone(&value));
        let id = monitor.add("a", WatchKind::ClockEdge);
        monitor.collect(WatchKind::ClockEdge);
        monitor.set_enable(id, Box::new(|| false));
        value.store(5, Ordering::SeqCst);
        // the gate is off: the stale sample is reported instead
        assert_eq!(monitor.collect(WatchKind::ClockEdge), vec![(id, Some(1))]);
    }

    #[test]
    fn test_changed_kind_emits_on_change_only() {
        let value = Arc::new(AtomicI64::new(1));
        let mut monitor = monitor_with(Arc::clone(&value));
        let id = monitor.add("a", WatchKind::Changed);
        assert_eq!(monitor.collect(WatchKind::Changed), vec![(id, Some(1))]);
        assert!(monitor.collect(WatchKind::Changed).is_empty());
        value.store(2, Ordering::SeqCst);
        assert_eq!(monitor.collect(WatchKind::Changed), vec![(id, Some(2))]);
    }

    #[test]
    fn test_delayed_fifo() {
        let value = Arc::new(AtomicI64::new(0));
        let mut monitor = monitor_with(Arc::clone(&value));
        let id = monitor.add_delayed("a", 2);
        value.store(10, Ordering::SeqCst);
        assert_eq!(monitor.collect(WatchKind::DelayClockEdge), vec![(id, None)]);
        value.store(20, Ordering::SeqCst);
        assert_eq!(monitor.collect(WatchKind::DelayClockEdge), vec![(id, None)]);
        value.store(30, Ordering::SeqCst);
        // two edges later the first sample surfaces
        assert_eq!(
            monitor.collect(WatchKind::DelayClockEdge),
            vec![(id, Some(10))]
        );
        assert_eq!(
            monitor.collect(WatchKind::DelayClockEdge),
            vec![(id, Some(20))]
        );
    }
}
