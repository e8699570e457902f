//! Client protocol: framed JSON requests and responses.
//!
//! Every frame is an object with `request: bool`, `type: string`, an
//! optional correlation `token`, a `status` on responses, and a `payload`.
//! Requests parse into [`Request`]; responses render through their `to_json`
//! with optional pretty printing (enabled together with logging so captured
//! traffic stays readable).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::monitor::WatchKind;
use crate::symbol::{AssignmentInfo, Breakpoint, ContextVariableInfo, GeneratorVariableInfo};

// ── Shared pieces ─────────────────────────────────────────────────────────────

/// Response status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Error,
}

impl Status {
    fn as_str(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Error => "error",
        }
    }
}

/// All request type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Connection,
    Breakpoint,
    BreakpointId,
    BpLocation,
    Command,
    DebuggerInfo,
    PathMapping,
    Evaluation,
    OptionChange,
    Monitor,
    SetValue,
    DataBreakpoint,
    Symbol,
    Error,
}

impl RequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::Connection => "connection",
            RequestType::Breakpoint => "breakpoint",
            RequestType::BreakpointId => "breakpoint-id",
            RequestType::BpLocation => "bp-location",
            RequestType::Command => "command",
            RequestType::DebuggerInfo => "debugger-info",
            RequestType::PathMapping => "path-mapping",
            RequestType::Evaluation => "evaluation",
            RequestType::OptionChange => "option-change",
            RequestType::Monitor => "monitor",
            RequestType::SetValue => "set-value",
            RequestType::DataBreakpoint => "data-breakpoint",
            RequestType::Symbol => "symbol",
            RequestType::Error => "error",
        }
    }

    fn from_str(tag: &str) -> Option<Self> {
        Some(match tag {
            "connection" => RequestType::Connection,
            "breakpoint" => RequestType::Breakpoint,
            "breakpoint-id" => RequestType::BreakpointId,
            "bp-location" => RequestType::BpLocation,
            "command" => RequestType::Command,
            "debugger-info" => RequestType::DebuggerInfo,
            "path-mapping" => RequestType::PathMapping,
            "evaluation" => RequestType::Evaluation,
            "option-change" => RequestType::OptionChange,
            "monitor" => RequestType::Monitor,
            "set-value" => RequestType::SetValue,
            "data-breakpoint" => RequestType::DataBreakpoint,
            "symbol" => RequestType::Symbol,
            "error" => RequestType::Error,
            _ => return None,
        })
    }
}

/// A request that failed to parse; carries enough context for the error
/// response.
#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct RequestError {
    pub reason: String,
    pub request_type: RequestType,
    pub token: Option<String>,
}

impl RequestError {
    fn new(reason: impl Into<String>, request_type: RequestType, token: Option<String>) -> Self {
        Self {
            reason: reason.into(),
            request_type,
            token,
        }
    }
}

// ── Request payloads ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakpointAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionPayload {
    pub db_filename: String,
    #[serde(rename = "path-mapping", default)]
    pub path_mapping: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakpointPayload {
    pub action: BreakpointAction,
    pub filename: String,
    #[serde(default)]
    pub line_num: Option<u32>,
    #[serde(default)]
    pub column_num: Option<u32>,
    #[serde(default)]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakpointIdPayload {
    pub action: BreakpointAction,
    pub id: u32,
    #[serde(default)]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BpLocationPayload {
    pub filename: String,
    #[serde(default)]
    pub line_num: Option<u32>,
    #[serde(default)]
    pub column_num: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    Continue,
    Stop,
    StepOver,
    StepBack,
    ReverseContinue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandPayload {
    pub command: CommandKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebuggerInfoKind {
    Breakpoints,
    Options,
    Status,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DebuggerInfoPayload {
    pub command: DebuggerInfoKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathMappingPayload {
    #[serde(rename = "path-mapping")]
    pub path_mapping: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationPayload {
    pub scope: String,
    pub expression: String,
    #[serde(default)]
    pub is_context: bool,
}

/// Typed views over the free-form `option-change` payload.
#[derive(Debug, Clone, Default)]
pub struct OptionChangePayload {
    pub bool_values: BTreeMap<String, bool>,
    pub int_values: BTreeMap<String, i64>,
    pub str_values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorPayload {
    pub action_type: MonitorAction,
    #[serde(default)]
    pub monitor_type: Option<WatchKind>,
    #[serde(default)]
    pub scoped_name: Option<String>,
    #[serde(default)]
    pub breakpoint_id: Option<u32>,
    #[serde(default)]
    pub instance_id: Option<u32>,
    #[serde(default)]
    pub track_id: Option<u64>,
    /// FIFO depth for delayed watches.
    #[serde(default)]
    pub depth: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetValuePayload {
    pub scoped_name: String,
    pub value: i64,
    #[serde(default)]
    pub breakpoint_id: Option<u32>,
    #[serde(default)]
    pub instance_id: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataBreakpointAction {
    Add,
    Remove,
    Clear,
    Info,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataBreakpointPayload {
    pub action: DataBreakpointAction,
    #[serde(default)]
    pub var_name: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub breakpoint_id: Option<u32>,
    #[serde(default)]
    pub data_bp_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub reason: Option<String>,
}

// ── Symbol tunnelling ─────────────────────────────────────────────────────────

/// Symbol table queries tunnelled by the network provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "kebab-case")]
pub enum SymbolQuery {
    BreakpointsAt {
        filename: String,
        #[serde(default)]
        line_num: Option<u32>,
        #[serde(default)]
        column_num: Option<u32>,
    },
    Breakpoint {
        id: u32,
    },
    InstanceName {
        instance_id: u32,
    },
    InstanceNameFromBp {
        breakpoint_id: u32,
    },
    InstanceId {
        name: String,
    },
    InstanceIdFromBp {
        breakpoint_id: u32,
    },
    InstanceNames,
    Filenames,
    ContextVariables {
        breakpoint_id: u32,
    },
    GeneratorVariables {
        instance_id: u32,
    },
    AnnotationValues {
        name: String,
    },
    ResolveScopedBreakpoint {
        name: String,
        breakpoint_id: u32,
    },
    ResolveScopedInstance {
        name: String,
        instance_id: u32,
    },
    AssignedBreakpoints {
        name: String,
        breakpoint_id: u32,
    },
    ExecutionOrder,
}

/// Replies to the tunnelled queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum SymbolReply {
    Breakpoints { breakpoints: Vec<Breakpoint> },
    OneBreakpoint { breakpoint: Option<Breakpoint> },
    Name { name: Option<String> },
    Id { id: Option<u32> },
    Names { names: Vec<String> },
    ContextVariables { variables: Vec<ContextVariableInfo> },
    GeneratorVariables { variables: Vec<GeneratorVariableInfo> },
    Values { values: Vec<String> },
    Assignments { assignments: Vec<AssignmentInfo> },
    Order { order: Vec<u32> },
}

// ── Request parsing ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum RequestBody {
    Connection(ConnectionPayload),
    Breakpoint(BreakpointPayload),
    BreakpointId(BreakpointIdPayload),
    BpLocation(BpLocationPayload),
    Command(CommandPayload),
    DebuggerInfo(DebuggerInfoPayload),
    PathMapping(PathMappingPayload),
    Evaluation(EvaluationPayload),
    OptionChange(OptionChangePayload),
    Monitor(MonitorPayload),
    SetValue(SetValuePayload),
    DataBreakpoint(DataBreakpointPayload),
    Symbol(SymbolQuery),
    Error(ErrorPayload),
}

impl RequestBody {
    pub fn request_type(&self) -> RequestType {
        match self {
            RequestBody::Connection(_) => RequestType::Connection,
            RequestBody::Breakpoint(_) => RequestType::Breakpoint,
            RequestBody::BreakpointId(_) => RequestType::BreakpointId,
            RequestBody::BpLocation(_) => RequestType::BpLocation,
            RequestBody::Command(_) => RequestType::Command,
            RequestBody::DebuggerInfo(_) => RequestType::DebuggerInfo,
            RequestBody::PathMapping(_) => RequestType::PathMapping,
            RequestBody::Evaluation(_) => RequestType::Evaluation,
            RequestBody::OptionChange(_) => RequestType::OptionChange,
            RequestBody::Monitor(_) => RequestType::Monitor,
            RequestBody::SetValue(_) => RequestType::SetValue,
            RequestBody::DataBreakpoint(_) => RequestType::DataBreakpoint,
            RequestBody::Symbol(_) => RequestType::Symbol,
            RequestBody::Error(_) => RequestType::Error,
        }
    }
}

/// A parsed, validated request frame.
#[derive(Debug, Clone)]
pub struct Request {
    pub token: Option<String>,
    pub body: RequestBody,
}

/// Parse and validate one request frame.
pub fn parse_request(text: &str) -> Result<Request, RequestError> {
    let frame: Value = serde_json::from_str(text)
        .map_err(|e| RequestError::new(format!("invalid JSON: {e}"), RequestType::Error, None))?;
    let token = frame
        .get("token")
        .and_then(Value::as_str)
        .map(str::to_string);
    if frame.get("request").and_then(Value::as_bool) != Some(true) {
        return Err(RequestError::new(
            "not a request frame",
            RequestType::Error,
            token,
        ));
    }
    let tag = frame
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| RequestError::new("missing request type", RequestType::Error, token.clone()))?;
    let request_type = RequestType::from_str(tag).ok_or_else(|| {
        RequestError::new(
            format!("unknown request type `{tag}`"),
            RequestType::Error,
            token.clone(),
        )
    })?;
    let payload = frame.get("payload").cloned().unwrap_or(Value::Null);
    let body = parse_payload(request_type, payload)
        .map_err(|reason| RequestError::new(reason, request_type, token.clone()))?;
    Ok(Request { token, body })
}

fn parse_payload(request_type: RequestType, payload: Value) -> Result<RequestBody, String> {
    fn typed<T: for<'de> Deserialize<'de>>(payload: Value) -> Result<T, String> {
        serde_json::from_value(payload).map_err(|e| format!("malformed payload: {e}"))
    }

    Ok(match request_type {
        RequestType::Connection => RequestBody::Connection(typed(payload)?),
        RequestType::Breakpoint => {
            let parsed: BreakpointPayload = typed(payload)?;
            if parsed.action == BreakpointAction::Add && parsed.line_num.is_none() {
                return Err("line_num is required to add a breakpoint".to_string());
            }
            RequestBody::Breakpoint(parsed)
        }
        RequestType::BreakpointId => RequestBody::BreakpointId(typed(payload)?),
        RequestType::BpLocation => RequestBody::BpLocation(typed(payload)?),
        RequestType::Command => RequestBody::Command(typed(payload)?),
        RequestType::DebuggerInfo => RequestBody::DebuggerInfo(typed(payload)?),
        RequestType::PathMapping => RequestBody::PathMapping(typed(payload)?),
        RequestType::Evaluation => RequestBody::Evaluation(typed(payload)?),
        RequestType::OptionChange => {
            let Value::Object(map) = payload else {
                return Err("option-change payload must be an object".to_string());
            };
            let mut parsed = OptionChangePayload::default();
            for (name, value) in map {
                match value {
                    Value::Bool(v) => {
                        parsed.bool_values.insert(name, v);
                    }
                    Value::Number(v) => match v.as_i64() {
                        Some(v) => {
                            parsed.int_values.insert(name, v);
                        }
                        None => return Err(format!("option `{name}` is not an integer")),
                    },
                    Value::String(v) => {
                        parsed.str_values.insert(name, v);
                    }
                    _ => return Err(format!("unsupported option value for `{name}`")),
                }
            }
            RequestBody::OptionChange(parsed)
        }
        RequestType::Monitor => {
            let parsed: MonitorPayload = typed(payload)?;
            match parsed.action_type {
                MonitorAction::Add => {
                    if parsed.monitor_type.is_none() || parsed.scoped_name.is_none() {
                        return Err("monitor add needs monitor_type and scoped_name".to_string());
                    }
                    if parsed.breakpoint_id.is_some() == parsed.instance_id.is_some() {
                        return Err(
                            "monitor add needs exactly one of breakpoint_id and instance_id"
                                .to_string(),
                        );
                    }
                }
                MonitorAction::Remove => {
                    if parsed.track_id.is_none() {
                        return Err("monitor remove needs track_id".to_string());
                    }
                }
            }
            RequestBody::Monitor(parsed)
        }
        RequestType::SetValue => RequestBody::SetValue(typed(payload)?),
        RequestType::DataBreakpoint => {
            let parsed: DataBreakpointPayload = typed(payload)?;
            match parsed.action {
                DataBreakpointAction::Add => {
                    if parsed.var_name.is_none() || parsed.breakpoint_id.is_none() {
                        return Err(
                            "data-breakpoint add needs var_name and breakpoint_id".to_string()
                        );
                    }
                }
                DataBreakpointAction::Remove => {
                    if parsed.data_bp_id.is_none() {
                        return Err("data-breakpoint remove needs data_bp_id".to_string());
                    }
                }
                DataBreakpointAction::Clear | DataBreakpointAction::Info => {}
            }
            RequestBody::DataBreakpoint(parsed)
        }
        RequestType::Symbol => RequestBody::Symbol(typed(payload)?),
        RequestType::Error => RequestBody::Error(typed(payload)?),
    })
}

// ── Frame rendering ───────────────────────────────────────────────────────────

fn envelope(kind: &str, token: Option<&str>, status: Option<Status>, payload: Value) -> Value {
    let mut map = Map::new();
    map.insert("request".to_string(), Value::Bool(status.is_none()));
    map.insert("type".to_string(), Value::String(kind.to_string()));
    if let Some(token) = token {
        map.insert("token".to_string(), Value::String(token.to_string()));
    }
    if let Some(status) = status {
        map.insert(
            "status".to_string(),
            Value::String(status.as_str().to_string()),
        );
    }
    map.insert("payload".to_string(), payload);
    Value::Object(map)
}

fn render(frame: &Value, pretty: bool) -> String {
    if pretty {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        if frame.serialize(&mut ser).is_err() {
            return frame.to_string();
        }
        String::from_utf8_lossy(&buf).into_owned()
    } else {
        frame.to_string()
    }
}

/// Encode an outbound request frame (used by the remote symbol provider).
pub fn encode_request(
    request_type: RequestType,
    token: Option<&str>,
    payload: &impl Serialize,
) -> String {
    let payload = serde_json::to_value(payload).unwrap_or(Value::Null);
    render(
        &envelope(request_type.as_str(), token, None, payload),
        false,
    )
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// Catch-all acknowledgement response; carries the originating request type
/// and optional extra fields.
#[derive(Debug, Clone)]
pub struct GenericResponse {
    status: Status,
    request_type: RequestType,
    reason: Option<String>,
    token: Option<String>,
    extras: Map<String, Value>,
}

impl GenericResponse {
    pub fn success(request_type: RequestType) -> Self {
        Self {
            status: Status::Success,
            request_type,
            reason: None,
            token: None,
            extras: Map::new(),
        }
    }

    pub fn error(request_type: RequestType, reason: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            request_type,
            reason: Some(reason.into()),
            token: None,
            extras: Map::new(),
        }
    }

    pub fn with_token(mut self, token: Option<&str>) -> Self {
        self.token = token.map(str::to_string);
        self
    }

    pub fn set_value(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.extras.insert(name.into(), value.into());
    }

    pub fn to_json(&self, pretty: bool) -> String {
        let mut payload = Map::new();
        payload.insert(
            "request-type".to_string(),
            Value::String(self.request_type.as_str().to_string()),
        );
        if let Some(reason) = &self.reason {
            payload.insert("reason".to_string(), Value::String(reason.clone()));
        }
        for (key, value) in &self.extras {
            payload.insert(key.clone(), value.clone());
        }
        render(
            &envelope(
                "generic",
                self.token.as_deref(),
                Some(self.status),
                Value::Object(payload),
            ),
            pretty,
        )
    }
}

/// One row of a `bp-location` or `debugger-info breakpoints` payload.
#[derive(Debug, Clone, Serialize)]
pub struct BpLocationEntry {
    pub id: u32,
    pub filename: String,
    pub line_num: u32,
    pub column_num: u32,
}

impl From<&Breakpoint> for BpLocationEntry {
    fn from(bp: &Breakpoint) -> Self {
        Self {
            id: bp.id,
            filename: bp.filename.clone(),
            line_num: bp.line_num,
            column_num: bp.column_num,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakpointLocationResponse {
    breakpoints: Vec<BpLocationEntry>,
    token: Option<String>,
}

impl BreakpointLocationResponse {
    pub fn new(breakpoints: Vec<BpLocationEntry>) -> Self {
        Self {
            breakpoints,
            token: None,
        }
    }

    pub fn with_token(mut self, token: Option<&str>) -> Self {
        self.token = token.map(str::to_string);
        self
    }

    pub fn to_json(&self, pretty: bool) -> String {
        let payload = serde_json::to_value(&self.breakpoints).unwrap_or(Value::Null);
        render(
            &envelope(
                "bp-location",
                self.token.as_deref(),
                Some(Status::Success),
                payload,
            ),
            pretty,
        )
    }
}

/// Per-instance variable scope inside a breakpoint-hit notification.
#[derive(Debug, Clone, Serialize)]
pub struct BreakpointScope {
    pub instance_id: u32,
    pub instance_name: String,
    pub breakpoint_id: u32,
    pub local: BTreeMap<String, String>,
    pub generator: BTreeMap<String, String>,
}

impl BreakpointScope {
    pub fn new(instance_id: u32, instance_name: impl Into<String>, breakpoint_id: u32) -> Self {
        Self {
            instance_id,
            instance_name: instance_name.into(),
            breakpoint_id,
            local: BTreeMap::new(),
            generator: BTreeMap::new(),
        }
    }

    pub fn add_local_value(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.local.insert(name.into(), value.into());
    }

    pub fn add_generator_value(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.generator.insert(name.into(), value.into());
    }
}

/// Breakpoint-hit stop notification.
#[derive(Debug, Clone, Serialize)]
pub struct BreakpointResponse {
    pub time: u64,
    pub filename: String,
    pub line_num: u32,
    pub column_num: u32,
    pub instances: Vec<BreakpointScope>,
}

impl BreakpointResponse {
    pub fn new(time: u64, filename: impl Into<String>, line_num: u32, column_num: u32) -> Self {
        Self {
            time,
            filename: filename.into(),
            line_num,
            column_num,
            instances: Vec::new(),
        }
    }

    pub fn add_scope(&mut self, scope: BreakpointScope) {
        self.instances.push(scope);
    }

    pub fn to_json(&self, pretty: bool) -> String {
        let payload = serde_json::to_value(self).unwrap_or(Value::Null);
        render(
            &envelope("breakpoint", None, Some(Status::Success), payload),
            pretty,
        )
    }
}

/// Reply to the three `debugger-info` commands.
#[derive(Debug, Clone)]
pub enum DebuggerInfoResponse {
    Breakpoints(Vec<BpLocationEntry>),
    Options(BTreeMap<String, Value>),
    Status(String),
}

impl DebuggerInfoResponse {
    pub fn to_json(&self, token: Option<&str>, pretty: bool) -> String {
        let mut payload = Map::new();
        match self {
            DebuggerInfoResponse::Breakpoints(bps) => {
                payload.insert(
                    "command".to_string(),
                    Value::String("breakpoints".to_string()),
                );
                payload.insert(
                    "breakpoints".to_string(),
                    serde_json::to_value(bps).unwrap_or(Value::Null),
                );
            }
            DebuggerInfoResponse::Options(options) => {
                payload.insert("command".to_string(), Value::String("options".to_string()));
                payload.insert(
                    "options".to_string(),
                    Value::Object(options.clone().into_iter().collect()),
                );
            }
            DebuggerInfoResponse::Status(status) => {
                payload.insert("command".to_string(), Value::String("status".to_string()));
                payload.insert("status".to_string(), Value::String(status.clone()));
            }
        }
        render(
            &envelope(
                "debugger-info",
                token,
                Some(Status::Success),
                Value::Object(payload),
            ),
            pretty,
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResponse {
    pub scope: String,
    pub result: String,
}

impl EvaluationResponse {
    pub fn new(scope: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            result: result.into(),
        }
    }

    pub fn to_json(&self, token: Option<&str>, pretty: bool) -> String {
        let payload = serde_json::to_value(self).unwrap_or(Value::Null);
        render(
            &envelope("evaluation", token, Some(Status::Success), payload),
            pretty,
        )
    }
}

/// A monitored value published on its `watch-<id>` topic.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorResponse {
    pub track_id: u64,
    pub value: String,
}

impl MonitorResponse {
    pub fn new(track_id: u64, value: impl Into<String>) -> Self {
        Self {
            track_id,
            value: value.into(),
        }
    }

    pub fn to_json(&self, pretty: bool) -> String {
        let payload = serde_json::to_value(self).unwrap_or(Value::Null);
        render(
            &envelope("monitor", None, Some(Status::Success), payload),
            pretty,
        )
    }
}

/// Reply frame for tunnelled symbol queries.
#[derive(Debug, Clone)]
pub struct SymbolResponse {
    pub reply: SymbolReply,
}

impl SymbolResponse {
    pub fn to_json(&self, token: Option<&str>, pretty: bool) -> String {
        let payload = serde_json::to_value(&self.reply).unwrap_or(Value::Null);
        render(
            &envelope("symbol", token, Some(Status::Success), payload),
            pretty,
        )
    }

    /// Parse a `symbol` response frame received by the network provider.
    pub fn parse(text: &str) -> Result<(Option<String>, SymbolReply), String> {
        let frame: Value =
            serde_json::from_str(text).map_err(|e| format!("invalid JSON: {e}"))?;
        if frame.get("type").and_then(Value::as_str) != Some("symbol") {
            return Err("not a symbol response".to_string());
        }
        if frame.get("status").and_then(Value::as_str) != Some("success") {
            return Err("symbol query failed".to_string());
        }
        let token = frame
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_string);
        let payload = frame.get("payload").cloned().unwrap_or(Value::Null);
        let reply =
            serde_json::from_value(payload).map_err(|e| format!("malformed payload: {e}"))?;
        Ok((token, reply))
    }
}

/// Convenience: encode the monitor topic name for a watch id.
pub fn monitor_topic(track_id: u64) -> String {
    format!("watch-{track_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_key_order() {
        let resp = GenericResponse::success(RequestType::Breakpoint);
        assert_eq!(
            resp.to_json(false),
            r#"{"request":false,"type":"generic","status":"success","payload":{"request-type":"breakpoint"}}"#
        );
    }

    #[test]
    fn test_json_value_order() {
        // sanity check that serde_json preserves insertion order
        let value = json!({"b": 1, "a": 2});
        assert_eq!(value.to_string(), r#"{"b":1,"a":2}"#);
    }
}
