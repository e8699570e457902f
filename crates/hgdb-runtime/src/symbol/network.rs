//! Network pass-through symbol table.
//!
//! Hosts the symbol table out-of-process: every query is tunnelled as a
//! `symbol` protocol frame to a remote provider over TCP (newline-delimited
//! JSON) or a websocket. The execution order is fetched once and cached to
//! avoid a round trip per scheduler rebuild.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use tracing::error;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::proto::{encode_request, RequestType, SymbolQuery, SymbolReply, SymbolResponse};

use super::{
    AssignmentInfo, Breakpoint, ContextVariableInfo, GeneratorVariableInfo, SymbolError,
    SymbolTableProvider,
};

/// Framed request/response link to the remote provider.
trait NetworkLink: Send {
    fn send(&mut self, message: &str) -> Result<(), SymbolError>;
    fn receive(&mut self) -> Result<String, SymbolError>;
}

struct TcpLink {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl TcpLink {
    fn connect(host: &str, port: u16) -> Result<Self, SymbolError> {
        let stream = TcpStream::connect((host, port))
            .map_err(|e| SymbolError::Network(format!("{host}:{port}: {e}")))?;
        let reader = BufReader::new(
            stream
                .try_clone()
                .map_err(|e| SymbolError::Network(e.to_string()))?,
        );
        Ok(Self {
            writer: stream,
            reader,
        })
    }
}

impl NetworkLink for TcpLink {
    fn send(&mut self, message: &str) -> Result<(), SymbolError> {
        self.writer
            .write_all(message.as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .map_err(|e| SymbolError::Network(e.to_string()))
    }

    fn receive(&mut self) -> Result<String, SymbolError> {
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .map_err(|e| SymbolError::Network(e.to_string()))?;
        Ok(line.trim_end().to_string())
    }
}

struct WsLink {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl WsLink {
    fn connect(uri: &str) -> Result<Self, SymbolError> {
        let (socket, _) =
            tungstenite::connect(uri).map_err(|e| SymbolError::Network(format!("{uri}: {e}")))?;
        Ok(Self { socket })
    }
}

impl NetworkLink for WsLink {
    fn send(&mut self, message: &str) -> Result<(), SymbolError> {
        self.socket
            .send(Message::text(message))
            .map_err(|e| SymbolError::Network(e.to_string()))
    }

    fn receive(&mut self) -> Result<String, SymbolError> {
        loop {
            match self.socket.read() {
                Ok(Message::Text(text)) => return Ok(text.to_string()),
                Ok(Message::Close(_)) => {
                    return Err(SymbolError::Network("connection closed".to_string()))
                }
                Ok(_) => continue,
                Err(e) => return Err(SymbolError::Network(e.to_string())),
            }
        }
    }
}

// ── Provider ──────────────────────────────────────────────────────────────────

pub struct NetworkSymbolTableProvider {
    link: Mutex<Box<dyn NetworkLink>>,
    token_counter: AtomicU64,
    cached_order: OnceLock<Vec<u32>>,
}

impl NetworkSymbolTableProvider {
    pub fn tcp(host: &str, port: u16) -> Result<Self, SymbolError> {
        Ok(Self::new(Box::new(TcpLink::connect(host, port)?)))
    }

    pub fn ws(uri: &str) -> Result<Self, SymbolError> {
        Ok(Self::new(Box::new(WsLink::connect(uri)?)))
    }

    fn new(link: Box<dyn NetworkLink>) -> Self {
        Self {
            link: Mutex::new(link),
            token_counter: AtomicU64::new(0),
            cached_order: OnceLock::new(),
        }
    }

    /// One blocking round trip. Failures log and surface as `None`; callers
    /// degrade to empty results the way a missing table would.
    fn query(&self, query: &SymbolQuery) -> Option<SymbolReply> {
        let token = self.token_counter.fetch_add(1, Ordering::SeqCst).to_string();
        let frame = encode_request(RequestType::Symbol, Some(&token), query);
        let mut link = self.link.lock().unwrap();
        if let Err(e) = link.send(&frame) {
            error!(error = %e, "symbol query send failed");
            return None;
        }
        loop {
            let text = match link.receive() {
                Ok(text) => text,
                Err(e) => {
                    error!(error = %e, "symbol query receive failed");
                    return None;
                }
            };
            match SymbolResponse::parse(&text) {
                Ok((reply_token, reply)) => {
                    // stale replies from earlier timed-out queries are dropped
                    if reply_token.as_deref() == Some(token.as_str()) {
                        return Some(reply);
                    }
                }
                Err(e) => {
                    error!(error = %e, "malformed symbol reply");
                    return None;
                }
            }
        }
    }
}

impl SymbolTableProvider for NetworkSymbolTableProvider {
    fn breakpoints_in_file(&self, filename: &str) -> Vec<Breakpoint> {
        match self.query(&SymbolQuery::BreakpointsAt {
            filename: filename.to_string(),
            line_num: None,
            column_num: None,
        }) {
            Some(SymbolReply::Breakpoints { breakpoints }) => breakpoints,
            _ => Vec::new(),
        }
    }

    fn breakpoints_at(&self, filename: &str, line_num: u32, column_num: u32) -> Vec<Breakpoint> {
        match self.query(&SymbolQuery::BreakpointsAt {
            filename: filename.to_string(),
            line_num: Some(line_num),
            column_num: Some(column_num),
        }) {
            Some(SymbolReply::Breakpoints { breakpoints }) => breakpoints,
            _ => Vec::new(),
        }
    }

    fn breakpoint(&self, id: u32) -> Option<Breakpoint> {
        match self.query(&SymbolQuery::Breakpoint { id }) {
            Some(SymbolReply::OneBreakpoint { breakpoint }) => breakpoint,
            _ => None,
        }
    }

    fn instance_name(&self, instance_id: u32) -> Option<String> {
        match self.query(&SymbolQuery::InstanceName { instance_id }) {
            Some(SymbolReply::Name { name }) => name,
            _ => None,
        }
    }

    fn instance_name_from_bp(&self, breakpoint_id: u32) -> Option<String> {
        match self.query(&SymbolQuery::InstanceNameFromBp { breakpoint_id }) {
            Some(SymbolReply::Name { name }) => name,
            _ => None,
        }
    }

    fn instance_id(&self, name: &str) -> Option<u32> {
        match self.query(&SymbolQuery::InstanceId {
            name: name.to_string(),
        }) {
            Some(SymbolReply::Id { id }) => id,
            _ => None,
        }
    }

    fn instance_id_from_bp(&self, breakpoint_id: u32) -> Option<u32> {
        match self.query(&SymbolQuery::InstanceIdFromBp { breakpoint_id }) {
            Some(SymbolReply::Id { id }) => id,
            _ => None,
        }
    }

    fn instance_names(&self) -> Vec<String> {
        match self.query(&SymbolQuery::InstanceNames) {
            Some(SymbolReply::Names { names }) => names,
            _ => Vec::new(),
        }
    }

    fn filenames(&self) -> Vec<String> {
        match self.query(&SymbolQuery::Filenames) {
            Some(SymbolReply::Names { names }) => names,
            _ => Vec::new(),
        }
    }

    fn context_variables(&self, breakpoint_id: u32) -> Vec<ContextVariableInfo> {
        match self.query(&SymbolQuery::ContextVariables { breakpoint_id }) {
            Some(SymbolReply::ContextVariables { variables }) => variables,
            _ => Vec::new(),
        }
    }

    fn generator_variables(&self, instance_id: u32) -> Vec<GeneratorVariableInfo> {
        match self.query(&SymbolQuery::GeneratorVariables { instance_id }) {
            Some(SymbolReply::GeneratorVariables { variables }) => variables,
            _ => Vec::new(),
        }
    }

    fn annotation_values(&self, name: &str) -> Vec<String> {
        match self.query(&SymbolQuery::AnnotationValues {
            name: name.to_string(),
        }) {
            Some(SymbolReply::Values { values }) => values,
            _ => Vec::new(),
        }
    }

    fn resolve_scoped_name_breakpoint(
        &self,
        scoped_name: &str,
        breakpoint_id: u32,
    ) -> Option<String> {
        match self.query(&SymbolQuery::ResolveScopedBreakpoint {
            name: scoped_name.to_string(),
            breakpoint_id,
        }) {
            Some(SymbolReply::Name { name }) => name,
            _ => None,
        }
    }

    fn resolve_scoped_name_instance(&self, scoped_name: &str, instance_id: u32) -> Option<String> {
        match self.query(&SymbolQuery::ResolveScopedInstance {
            name: scoped_name.to_string(),
            instance_id,
        }) {
            Some(SymbolReply::Name { name }) => name,
            _ => None,
        }
    }

    fn assigned_breakpoints(&self, var_name: &str, breakpoint_id: u32) -> Vec<AssignmentInfo> {
        match self.query(&SymbolQuery::AssignedBreakpoints {
            name: var_name.to_string(),
            breakpoint_id,
        }) {
            Some(SymbolReply::Assignments { assignments }) => assignments,
            _ => Vec::new(),
        }
    }

    fn execution_bp_order(&self) -> Vec<u32> {
        self.cached_order
            .get_or_init(|| match self.query(&SymbolQuery::ExecutionOrder) {
                Some(SymbolReply::Order { order }) => order,
                _ => Vec::new(),
            })
            .clone()
    }
}
