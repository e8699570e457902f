//! Runtime-togglable debugger options.

use std::collections::BTreeMap;

use serde_json::Value;

/// Options the client can flip at runtime through an `option-change` request.
#[derive(Debug, Clone)]
pub struct Options {
    /// Evaluate same-location breakpoints one at a time instead of as a batch.
    pub single_thread_mode: bool,
    /// Emit info-level logging (errors always log).
    pub log_enabled: bool,
    /// Resume the simulation unconditionally when the last client disconnects.
    pub detach_after_disconnect: bool,
    /// Report values as hex strings instead of decimal.
    pub use_hex_str: bool,
    /// Run the evaluation loop directly on the clock posedge instead of
    /// deferring to the next simulation time slot.
    pub pause_at_posedge: bool,
    /// Collect performance counters (only effective with the `perf-count`
    /// feature).
    pub perf_count: bool,
    /// Reuse signal reads within one evaluation sweep.
    pub use_signal_cache: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            single_thread_mode: false,
            log_enabled: false,
            detach_after_disconnect: false,
            use_hex_str: false,
            pause_at_posedge: false,
            perf_count: false,
            use_signal_cache: false,
        }
    }
}

impl Options {
    /// Set a boolean option by name. Unknown names are ignored and reported
    /// as `false`.
    pub fn set_bool(&mut self, name: &str, value: bool) -> bool {
        let slot = match name {
            "single_thread_mode" => &mut self.single_thread_mode,
            "log_enabled" => &mut self.log_enabled,
            "detach_after_disconnect" => &mut self.detach_after_disconnect,
            "use_hex_str" => &mut self.use_hex_str,
            "pause_at_posedge" => &mut self.pause_at_posedge,
            "perf_count" => &mut self.perf_count,
            "use_signal_cache" => &mut self.use_signal_cache,
            _ => return false,
        };
        *slot = value;
        true
    }

    /// All options with their current values, for the `debugger-info` reply.
    pub fn to_map(&self) -> BTreeMap<String, Value> {
        [
            ("single_thread_mode", self.single_thread_mode),
            ("log_enabled", self.log_enabled),
            ("detach_after_disconnect", self.detach_after_disconnect),
            ("use_hex_str", self.use_hex_str),
            ("pause_at_posedge", self.pause_at_posedge),
            ("perf_count", self.perf_count),
            ("use_signal_cache", self.use_signal_cache),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), Value::Bool(value)))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_known_option() {
        let mut options = Options::default();
        assert!(options.set_bool("use_hex_str", true));
        assert!(options.use_hex_str);
    }

    #[test]
    fn test_set_unknown_option() {
        let mut options = Options::default();
        assert!(!options.set_bool("no_such_option", true));
    }

    #[test]
    fn test_to_map_lists_all_options() {
        let options = Options::default();
        let map = options.to_map();
        assert_eq!(map.len(), 7);
        assert_eq!(map["single_thread_mode"], Value::Bool(false));
    }
}
