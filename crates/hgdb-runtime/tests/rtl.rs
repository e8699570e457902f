//! Simulator client tests: handle caching, the instance mapper, and clock
//! discovery.

use std::sync::Arc;

use hgdb_runtime::rtl::{RtlClient, Simulator};
use pretty_assertions::assert_eq;

mod common;
use common::*;

fn client(sim: &Arc<MockSimulator>) -> RtlClient {
    RtlClient::new(Arc::clone(sim) as Arc<dyn Simulator>)
}

#[test]
fn test_handle_cache() {
    let sim = MockSimulator::new();
    sim.add_module("top");
    sim.add_signal("top.a", 1);
    let rtl = client(&sim);
    let first = rtl.get_handle("top.a").unwrap();
    let second = rtl.get_handle("top.a").unwrap();
    assert_eq!(first, second);
    assert!(rtl.get_handle("top.zz").is_none());
    assert!(rtl.is_valid_signal("top.a"));
    assert!(!rtl.is_valid_signal("top.zz"));
}

#[test]
fn test_value_access() {
    let sim = MockSimulator::new();
    sim.add_module("top");
    sim.add_signal("top.a", 7);
    let rtl = client(&sim);
    assert_eq!(rtl.get_value_by_name("top.a"), Some(7));
    assert!(rtl.set_value_by_name("top.a", 9));
    assert_eq!(rtl.get_value_by_name("top.a"), Some(9));
    assert!(!rtl.set_value_by_name("top.zz", 1));
}

#[test]
fn test_instance_mapping_simple() {
    let sim = MockSimulator::new();
    sim.add_module("tb");
    sim.add_module("tb.dut");
    sim.add_module("tb.dut.mod");
    sim.add_signal("tb.dut.mod.a", 0);
    let rtl = client(&sim);
    rtl.map_instances(&["mod".to_string(), "mod.sub".to_string()]);
    assert_eq!(rtl.get_full_name("mod.a"), "tb.dut.mod.a");
    assert_eq!(rtl.get_full_name("mod"), "tb.dut.mod");
    // unknown heads pass through untouched
    assert_eq!(rtl.get_full_name("other.a"), "other.a");
}

#[test]
fn test_instance_mapping_ambiguous_prefers_more_signals() {
    let sim = MockSimulator::new();
    sim.add_module("tb");
    sim.add_module("tb.a");
    sim.add_module("tb.b");
    sim.add_module("tb.a.mod");
    sim.add_module("tb.b.mod");
    sim.add_signal("tb.a.mod.x", 0);
    sim.add_signal("tb.b.mod.x", 0);
    sim.add_signal("tb.b.mod.y", 0);
    let rtl = client(&sim);
    rtl.map_instances(&["mod".to_string()]);
    // both candidates match; the one with more signals wins
    assert_eq!(rtl.get_full_name("mod.x"), "tb.b.mod.x");
}

#[test]
fn test_instance_mapping_missing_is_identity() {
    let sim = MockSimulator::new();
    sim.add_module("tb");
    let rtl = client(&sim);
    rtl.map_instances(&["mod".to_string()]);
    assert_eq!(rtl.get_full_name("mod.a"), "mod.a");
}

#[test]
fn test_clocks_from_design() {
    let sim = MockSimulator::new();
    sim.add_module("top");
    sim.add_signal("top.clk", 0);
    sim.add_signal("top.data", 0);
    sim.add_module("top.sub");
    sim.add_signal("top.sub.clk", 0);
    let rtl = client(&sim);
    // only top-level clocks are picked up by the heuristic
    assert_eq!(rtl.clocks_from_design(), vec!["top.clk"]);
}

#[test]
fn test_reverse_refused_by_default() {
    let sim = MockSimulator::new();
    let rtl = client(&sim);
    assert!(!rtl.reverse_last_posedge(&[]));
}
