//! Process-wide performance counters for the evaluation hot path.
//!
//! Enabled with the `perf-count` feature; otherwise every item here compiles
//! to a no-op. Counters accumulate wall time per label and are reported once
//! at teardown.

#[cfg(feature = "perf-count")]
mod imp {
    use std::collections::HashMap;
    use std::sync::{LazyLock, Mutex};
    use std::time::{Duration, Instant};

    static COUNTS: LazyLock<Mutex<HashMap<&'static str, Duration>>> =
        LazyLock::new(|| Mutex::new(HashMap::new()));

    /// RAII guard that adds its lifetime to the labelled counter on drop.
    pub struct PerfCount {
        label: &'static str,
        start: Instant,
        collect: bool,
    }

    impl PerfCount {
        pub fn new(label: &'static str, collect: bool) -> Self {
            Self {
                label,
                start: Instant::now(),
                collect,
            }
        }
    }

    impl Drop for PerfCount {
        fn drop(&mut self) {
            if self.collect {
                // measure outside the locked section
                let elapsed = self.start.elapsed();
                let mut counts = COUNTS.lock().unwrap();
                *counts.entry(self.label).or_default() += elapsed;
            }
        }
    }

    /// Log the accumulated totals.
    pub fn report() {
        let counts = COUNTS.lock().unwrap();
        for (label, total) in counts.iter() {
            tracing::info!(label = *label, seconds = total.as_secs_f64(), "perf counter");
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_counter_accumulates() {
            {
                let _guard = PerfCount::new("unit", true);
            }
            let counts = COUNTS.lock().unwrap();
            assert!(counts.contains_key("unit"));
        }

        #[test]
        fn test_disabled_guard_records_nothing() {
            {
                let _guard = PerfCount::new("disabled-unit", false);
            }
            let counts = COUNTS.lock().unwrap();
            assert!(!counts.contains_key("disabled-unit"));
        }
    }
}

#[cfg(not(feature = "perf-count"))]
mod imp {
    /// No-op stand-in when the `perf-count` feature is off.
    pub struct PerfCount;

    impl PerfCount {
        #[inline(always)]
        pub fn new(_label: &'static str, _collect: bool) -> Self {
            Self
        }
    }

    #[inline(always)]
    pub fn report() {}
}

pub use imp::{report, PerfCount};
