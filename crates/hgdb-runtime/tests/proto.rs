//! Wire-format tests: frame parsing, validation, and the exact JSON layout
//! of every response type.

use std::collections::BTreeMap;

use hgdb_runtime::monitor::WatchKind;
use hgdb_runtime::proto::{
    parse_request, BpLocationEntry, BreakpointAction, BreakpointLocationResponse,
    BreakpointResponse, BreakpointScope, CommandKind, DataBreakpointAction, DebuggerInfoKind,
    DebuggerInfoResponse, EvaluationResponse, GenericResponse, MonitorAction, MonitorResponse,
    RequestBody, RequestType,
};
use pretty_assertions::assert_eq;
use serde_json::Value;

#[test]
fn test_token_passing() {
    let request = parse_request(
        r#"{
    "request": true,
    "type": "breakpoint",
    "token": "TEST_TOKEN",
    "payload": {
        "filename": "/tmp/abc",
        "line_num": 123,
        "action": "add"
    }
}"#,
    )
    .unwrap();
    let response =
        GenericResponse::success(RequestType::Breakpoint).with_token(request.token.as_deref());
    assert_eq!(
        response.to_json(false),
        r#"{"request":false,"type":"generic","token":"TEST_TOKEN","status":"success","payload":{"request-type":"breakpoint"}}"#
    );
}

#[test]
fn test_breakpoint_request() {
    let request = parse_request(
        r#"{
    "request": true,
    "type": "breakpoint",
    "payload": {
        "filename": "/tmp/abc",
        "line_num": 123,
        "action": "add",
        "column_num": 42,
        "condition": "a"
    }
}"#,
    )
    .unwrap();
    let RequestBody::Breakpoint(payload) = request.body else {
        panic!("expected breakpoint request");
    };
    assert_eq!(payload.filename, "/tmp/abc");
    assert_eq!(payload.line_num, Some(123));
    assert_eq!(payload.column_num, Some(42));
    assert_eq!(payload.condition.as_deref(), Some("a"));
    assert_eq!(payload.action, BreakpointAction::Add);
}

#[test]
fn test_breakpoint_request_remove_no_line_num() {
    let request = parse_request(
        r#"{
    "request": true,
    "type": "breakpoint",
    "payload": {
        "filename": "/tmp/abc",
        "action": "remove",
        "column_num": 42
    }
}"#,
    )
    .unwrap();
    let RequestBody::Breakpoint(payload) = request.body else {
        panic!("expected breakpoint request");
    };
    assert_eq!(payload.filename, "/tmp/abc");
    assert_eq!(payload.action, BreakpointAction::Remove);
}

#[test]
fn test_breakpoint_request_malformed() {
    // missing filename
    let error = parse_request(
        r#"{
    "request": true,
    "type": "breakpoint",
    "payload": {
        "line_num": 123,
        "column_num": 42,
        "action": "remove",
        "condition": "a"
    }
}"#,
    )
    .unwrap_err();
    assert!(!error.reason.is_empty());
    // unknown action
    assert!(parse_request(
        r#"{
    "request": true,
    "type": "breakpoint",
    "payload": {
        "filename": "/tmp/abc",
        "action": "remove_all"
    }
}"#,
    )
    .is_err());
    // add without a line number
    assert!(parse_request(
        r#"{
    "request": true,
    "type": "breakpoint",
    "payload": {
        "filename": "/tmp/abc",
        "action": "add"
    }
}"#,
    )
    .is_err());
}

#[test]
fn test_breakpoint_id_request() {
    let request = parse_request(
        r#"{
    "request": true,
    "type": "breakpoint-id",
    "payload": {
        "id": 42,
        "action": "add",
        "condition": "a"
    }
}"#,
    )
    .unwrap();
    let RequestBody::BreakpointId(payload) = request.body else {
        panic!("expected breakpoint-id request");
    };
    assert_eq!(payload.id, 42);
    assert_eq!(payload.condition.as_deref(), Some("a"));
    assert_eq!(payload.action, BreakpointAction::Add);
}

#[test]
fn test_connection_request() {
    let request = parse_request(
        r#"{
    "request": true,
    "type": "connection",
    "payload": {
        "db_filename": "/tmp/abc.db",
        "path-mapping": {
            "a": "/tmp/a",
            "b": "/tmp/b"
        }
    }
}"#,
    )
    .unwrap();
    let RequestBody::Connection(payload) = request.body else {
        panic!("expected connection request");
    };
    assert_eq!(payload.db_filename, "/tmp/abc.db");
    assert_eq!(payload.path_mapping.len(), 2);
    assert_eq!(payload.path_mapping["a"], "/tmp/a");
    assert_eq!(payload.path_mapping["b"], "/tmp/b");
}

#[test]
fn test_bp_location_request() {
    let request = parse_request(
        r#"{
    "request": true,
    "type": "bp-location",
    "payload": {
        "filename": "/tmp/abc",
        "line_num": 42
    }
}"#,
    )
    .unwrap();
    let RequestBody::BpLocation(payload) = request.body else {
        panic!("expected bp-location request");
    };
    assert_eq!(payload.filename, "/tmp/abc");
    assert_eq!(payload.line_num, Some(42));
    assert!(payload.column_num.is_none());
}

#[test]
fn test_command_request() {
    let request = parse_request(
        r#"{
    "request": true,
    "type": "command",
    "payload": {
        "command": "continue"
    }
}"#,
    )
    .unwrap();
    let RequestBody::Command(payload) = request.body else {
        panic!("expected command request");
    };
    assert_eq!(payload.command, CommandKind::Continue);
}

#[test]
fn test_debugger_info_request() {
    let request = parse_request(
        r#"{
    "request": true,
    "type": "debugger-info",
    "payload": {
        "command": "breakpoints"
    }
}"#,
    )
    .unwrap();
    let RequestBody::DebuggerInfo(payload) = request.body else {
        panic!("expected debugger-info request");
    };
    assert_eq!(payload.command, DebuggerInfoKind::Breakpoints);
}

#[test]
fn test_path_mapping_request() {
    let request = parse_request(
        r#"{
    "request": true,
    "type": "path-mapping",
    "payload": {
        "path-mapping": {
            "/tmp/a": "/workspace/a",
            "/tmp/b": "/workspace/b"
        }
    }
}"#,
    )
    .unwrap();
    let RequestBody::PathMapping(payload) = request.body else {
        panic!("expected path-mapping request");
    };
    assert_eq!(payload.path_mapping.len(), 2);
    assert_eq!(payload.path_mapping["/tmp/a"], "/workspace/a");
    assert_eq!(payload.path_mapping["/tmp/b"], "/workspace/b");
}

#[test]
fn test_evaluation_request() {
    let request = parse_request(
        r#"{
    "request": true,
    "type": "evaluation",
    "payload": {
        "scope": "test.scope",
        "expression": "a + 1",
        "is_context": true
    }
}"#,
    )
    .unwrap();
    let RequestBody::Evaluation(payload) = request.body else {
        panic!("expected evaluation request");
    };
    assert_eq!(payload.scope, "test.scope");
    assert_eq!(payload.expression, "a + 1");
    assert!(payload.is_context);
}

#[test]
fn test_option_change_request() {
    let request = parse_request(
        r#"{
    "request": true,
    "type": "option-change",
    "payload": {
        "a": true,
        "b": 42,
        "c": "d"
    }
}"#,
    )
    .unwrap();
    let RequestBody::OptionChange(payload) = request.body else {
        panic!("expected option-change request");
    };
    assert_eq!(payload.bool_values["a"], true);
    assert_eq!(payload.int_values["b"], 42);
    assert_eq!(payload.str_values["c"], "d");
}

#[test]
fn test_monitor_request() {
    let request = parse_request(
        r#"{
    "request": true,
    "type": "monitor",
    "payload": {
        "action_type": "add",
        "monitor_type": "breakpoint",
        "scoped_name": "hgdb",
        "breakpoint_id": 42
    }
}"#,
    )
    .unwrap();
    let RequestBody::Monitor(payload) = request.body else {
        panic!("expected monitor request");
    };
    assert_eq!(payload.scoped_name.as_deref(), Some("hgdb"));
    assert_eq!(payload.breakpoint_id, Some(42));
    assert_eq!(payload.monitor_type, Some(WatchKind::Breakpoint));

    let request = parse_request(
        r#"{
    "request": true,
    "type": "monitor",
    "payload": {
        "action_type": "add",
        "monitor_type": "clock_edge",
        "scoped_name": "hgdb",
        "instance_id": 42
    }
}"#,
    )
    .unwrap();
    let RequestBody::Monitor(payload) = request.body else {
        panic!("expected monitor request");
    };
    assert_eq!(payload.instance_id, Some(42));
    assert_eq!(payload.monitor_type, Some(WatchKind::ClockEdge));

    let request = parse_request(
        r#"{
    "request": true,
    "type": "monitor",
    "payload": {
        "action_type": "remove",
        "track_id": 42
    }
}"#,
    )
    .unwrap();
    let RequestBody::Monitor(payload) = request.body else {
        panic!("expected monitor request");
    };
    assert_eq!(payload.action_type, MonitorAction::Remove);
    assert_eq!(payload.track_id, Some(42));

    // both breakpoint_id and instance_id is ambiguous
    assert!(parse_request(
        r#"{
    "request": true,
    "type": "monitor",
    "payload": {
        "action_type": "add",
        "monitor_type": "breakpoint",
        "scoped_name": "hgdb",
        "breakpoint_id": 42,
        "instance_id": 42
    }
}"#,
    )
    .is_err());

    // neither is given
    assert!(parse_request(
        r#"{
    "request": true,
    "type": "monitor",
    "payload": {
        "action_type": "add",
        "monitor_type": "breakpoint",
        "scoped_name": "hgdb"
    }
}"#,
    )
    .is_err());
}

#[test]
fn test_data_breakpoint_request() {
    let request = parse_request(
        r#"{
    "request": true,
    "type": "data-breakpoint",
    "payload": {
        "action": "add",
        "var_name": "a",
        "breakpoint_id": 3,
        "condition": "a == 5"
    }
}"#,
    )
    .unwrap();
    let RequestBody::DataBreakpoint(payload) = request.body else {
        panic!("expected data-breakpoint request");
    };
    assert_eq!(payload.action, DataBreakpointAction::Add);
    assert_eq!(payload.var_name.as_deref(), Some("a"));
    assert_eq!(payload.breakpoint_id, Some(3));

    // remove without an id
    assert!(parse_request(
        r#"{
    "request": true,
    "type": "data-breakpoint",
    "payload": {
        "action": "remove"
    }
}"#,
    )
    .is_err());
}

#[test]
fn test_unknown_request_type() {
    let error = parse_request(
        r#"{"request": true, "type": "no-such-request", "payload": {}}"#,
    )
    .unwrap_err();
    assert_eq!(error.request_type, RequestType::Error);
}

// ── Responses ─────────────────────────────────────────────────────────────────

#[test]
fn test_generic_response() {
    let response = GenericResponse::error(RequestType::Error, "TEST_ERROR");
    assert_eq!(
        response.to_json(false),
        r#"{"request":false,"type":"generic","status":"error","payload":{"request-type":"error","reason":"TEST_ERROR"}}"#
    );
    let response = GenericResponse::success(RequestType::Breakpoint);
    assert_eq!(
        response.to_json(false),
        r#"{"request":false,"type":"generic","status":"success","payload":{"request-type":"breakpoint"}}"#
    );
    // extra fields keep their insertion order
    let mut response = GenericResponse::success(RequestType::Monitor);
    response.set_value("a", false);
    response.set_value("b", 42);
    response.set_value("c", "42");
    let expected = r#"{
    "request": false,
    "type": "generic",
    "status": "success",
    "payload": {
        "request-type": "monitor",
        "a": false,
        "b": 42,
        "c": "42"
    }
}"#;
    assert_eq!(response.to_json(true), expected);
}

#[test]
fn test_bp_location_response() {
    let entries: Vec<BpLocationEntry> = (0..2)
        .map(|i| BpLocationEntry {
            id: i,
            filename: "/tmp/a".to_string(),
            line_num: i,
            column_num: 0,
        })
        .collect();
    let response = BreakpointLocationResponse::new(entries);
    let expected = r#"{
    "request": false,
    "type": "bp-location",
    "status": "success",
    "payload": [
        {
            "id": 0,
            "filename": "/tmp/a",
            "line_num": 0,
            "column_num": 0
        },
        {
            "id": 1,
            "filename": "/tmp/a",
            "line_num": 1,
            "column_num": 0
        }
    ]
}"#;
    assert_eq!(response.to_json(true), expected);
}

#[test]
fn test_breakpoint_response() {
    let mut response = BreakpointResponse::new(1, "a", 2, 3);
    let mut scope = BreakpointScope::new(42, "mod", 43);
    scope.add_generator_value("c", "4");
    scope.add_local_value("d", "5");
    response.add_scope(scope);
    let expected = r#"{
    "request": false,
    "type": "breakpoint",
    "status": "success",
    "payload": {
        "time": 1,
        "filename": "a",
        "line_num": 2,
        "column_num": 3,
        "instances": [
            {
                "instance_id": 42,
                "instance_name": "mod",
                "breakpoint_id": 43,
                "local": {
                    "d": "5"
                },
                "generator": {
                    "c": "4"
                }
            }
        ]
    }
}"#;
    assert_eq!(response.to_json(true), expected);
}

#[test]
fn test_debugger_info_response_breakpoints() {
    let entry = BpLocationEntry {
        id: 42,
        filename: "/tmp/a".to_string(),
        line_num: 1,
        column_num: 1,
    };
    let response = DebuggerInfoResponse::Breakpoints(vec![entry]);
    let expected = r#"{
    "request": false,
    "type": "debugger-info",
    "status": "success",
    "payload": {
        "command": "breakpoints",
        "breakpoints": [
            {
                "id": 42,
                "filename": "/tmp/a",
                "line_num": 1,
                "column_num": 1
            }
        ]
    }
}"#;
    assert_eq!(response.to_json(None, true), expected);
}

#[test]
fn test_debugger_info_response_options() {
    let options = BTreeMap::from([
        ("a".to_string(), Value::Bool(true)),
        ("b".to_string(), Value::from(1)),
        ("c".to_string(), Value::from("d")),
    ]);
    let response = DebuggerInfoResponse::Options(options);
    let expected = r#"{
    "request": false,
    "type": "debugger-info",
    "status": "success",
    "payload": {
        "command": "options",
        "options": {
            "a": true,
            "b": 1,
            "c": "d"
        }
    }
}"#;
    assert_eq!(response.to_json(None, true), expected);
}

#[test]
fn test_debugger_info_response_status() {
    let response =
        DebuggerInfoResponse::Status("With great power comes great responsibility".to_string());
    let expected = r#"{
    "request": false,
    "type": "debugger-info",
    "status": "success",
    "payload": {
        "command": "status",
        "status": "With great power comes great responsibility"
    }
}"#;
    assert_eq!(response.to_json(None, true), expected);
}

#[test]
fn test_evaluation_response() {
    let response = EvaluationResponse::new("test.scope", "42");
    let expected = r#"{
    "request": false,
    "type": "evaluation",
    "status": "success",
    "payload": {
        "scope": "test.scope",
        "result": "42"
    }
}"#;
    assert_eq!(response.to_json(None, true), expected);
}

#[test]
fn test_monitor_response() {
    let response = MonitorResponse::new(42, "42");
    let expected = r#"{
    "request": false,
    "type": "monitor",
    "status": "success",
    "payload": {
        "track_id": 42,
        "value": "42"
    }
}"#;
    assert_eq!(response.to_json(true), expected);
}
