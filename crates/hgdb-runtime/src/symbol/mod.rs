//! Symbol table: the mapping between generator source and RTL.
//!
//! The table is produced by an upstream compiler and read-only at runtime.
//! Three providers sit behind [`SymbolTableProvider`]: an embedded SQLite
//! store, an in-memory tree parsed from a JSON document, and a network
//! pass-through that tunnels queries to a remote provider. The
//! [`SymbolTable`] wrapper owns the client↔db source path remapping and is
//! what the rest of the runtime talks to.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod json;
pub mod network;
pub mod sqlite;

pub use json::JsonSymbolTableProvider;
pub use network::NetworkSymbolTableProvider;
pub use sqlite::SqliteSymbolTableProvider;

const TCP_SCHEME: &str = "tcp://";
const WS_SCHEME: &str = "ws://";
const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SymbolError {
    #[error("symbol table `{0}` does not exist")]
    NotFound(String),
    #[error("invalid symbol table URI `{0}`")]
    InvalidUri(String),
    #[error("malformed symbol table: {0}")]
    Malformed(String),
    #[error("network error: {0}")]
    Network(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

// ── Persisted entities ────────────────────────────────────────────────────────

/// A persisted breakpoint: a source location plus the innate condition the
/// generator captured during SSA transformation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub id: u32,
    pub filename: String,
    /// 1-based line number.
    pub line_num: u32,
    /// 1-based column number; 0 means "don't care".
    #[serde(default)]
    pub column_num: u32,
    /// Innate enable condition; empty means always valid to break.
    #[serde(default)]
    pub condition: String,
    /// Whitespace-separated trigger symbols gating the check.
    #[serde(default)]
    pub trigger: String,
    /// Owning instance.
    #[serde(default)]
    pub instance_id: Option<u32>,
}

/// A module instantiation in the RTL hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: u32,
    /// Fully qualified hierarchical name, e.g. `top.cpu.alu`.
    pub name: String,
}

/// Either an RTL signal reference or a compile-time constant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub id: u32,
    /// Full RTL hierarchical name when `is_rtl`, otherwise a literal string.
    pub value: String,
    pub is_rtl: bool,
}

/// What the generator called a variable at a particular breakpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextVariable {
    pub name: String,
    pub breakpoint_id: u32,
    pub variable_id: u32,
}

/// A field of an instance, visible at any breakpoint within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorVariable {
    pub name: String,
    pub instance_id: u32,
    pub variable_id: u32,
}

pub type ContextVariableInfo = (ContextVariable, Variable);
pub type GeneratorVariableInfo = (GeneratorVariable, Variable);
/// (breakpoint id, variable name, condition) of an assignment site.
pub type AssignmentInfo = (u32, String, String);

// ── Provider trait ────────────────────────────────────────────────────────────

/// Query surface every symbol table backend implements.
///
/// Variable values returned from the variable queries are already resolved
/// with the owning instance prefix when they refer to RTL signals.
pub trait SymbolTableProvider: Send + Sync {
    /// Whether the backing store is usable.
    fn ready(&self) -> bool {
        true
    }

    /// All breakpoints in a file.
    fn breakpoints_in_file(&self, filename: &str) -> Vec<Breakpoint>;
    /// Breakpoints at a location; column 0 matches any column.
    fn breakpoints_at(&self, filename: &str, line_num: u32, column_num: u32) -> Vec<Breakpoint>;
    fn breakpoint(&self, id: u32) -> Option<Breakpoint>;

    fn instance_name(&self, instance_id: u32) -> Option<String>;
    fn instance_name_from_bp(&self, breakpoint_id: u32) -> Option<String>;
    fn instance_id(&self, name: &str) -> Option<u32>;
    fn instance_id_from_bp(&self, breakpoint_id: u32) -> Option<u32>;
    fn instance_names(&self) -> Vec<String>;
    fn filenames(&self) -> Vec<String>;

    fn context_variables(&self, breakpoint_id: u32) -> Vec<ContextVariableInfo>;
    fn generator_variables(&self, instance_id: u32) -> Vec<GeneratorVariableInfo>;

    fn annotation_values(&self, name: &str) -> Vec<String>;

    /// Breakpoints at which `var_name` is assigned, scoped to the instance
    /// owning `breakpoint_id`. Used by data breakpoints.
    fn assigned_breakpoints(&self, var_name: &str, breakpoint_id: u32) -> Vec<AssignmentInfo>;

    /// The step-through ordering of all breakpoint ids.
    fn execution_bp_order(&self) -> Vec<u32>;

    /// Integer literals among a breakpoint's context variables, used to fold
    /// constants into predicates.
    fn context_static_values(&self, breakpoint_id: u32) -> HashMap<String, i64> {
        let mut result = HashMap::new();
        for (context_var, var) in self.context_variables(breakpoint_id) {
            if var.is_rtl {
                continue;
            }
            if let Ok(value) = var.value.parse::<i64>() {
                result.insert(context_var.name, value);
            }
        }
        result
    }

    /// Resolve a scoped name against a breakpoint's context variables.
    fn resolve_scoped_name_breakpoint(&self, scoped_name: &str, breakpoint_id: u32) -> Option<String> {
        resolve_in_variables(
            scoped_name,
            self.context_variables(breakpoint_id)
                .into_iter()
                .map(|(cv, v)| (cv.name, v)),
        )
    }

    /// Resolve a scoped name against an instance's generator variables.
    fn resolve_scoped_name_instance(&self, scoped_name: &str, instance_id: u32) -> Option<String> {
        resolve_in_variables(
            scoped_name,
            self.generator_variables(instance_id)
                .into_iter()
                .map(|(gv, v)| (gv.name, v)),
        )
    }
}

/// Walk the declared variables for a scoped name: exact match first, then the
/// leading component with the remaining selects re-attached.
fn resolve_in_variables(
    scoped_name: &str,
    variables: impl Iterator<Item = (String, Variable)>,
) -> Option<String> {
    let head_len = scoped_name
        .find(['.', '['])
        .unwrap_or(scoped_name.len());
    let head = &scoped_name[..head_len];
    let suffix = &scoped_name[head_len..];
    let mut head_match = None;
    for (name, var) in variables {
        if !var.is_rtl {
            continue;
        }
        if name == scoped_name {
            return Some(var.value);
        }
        if name == head && head_match.is_none() {
            head_match = Some(format!("{}{}", var.value, suffix));
        }
    }
    head_match
}

// ── SymbolTable ───────────────────────────────────────────────────────────────

/// A provider plus the client↔db source path remapping.
///
/// The remapping is a pure longest-prefix string rewrite applied to incoming
/// filenames before lookups (client → db) and to outgoing breakpoint
/// filenames (db → client).
pub struct SymbolTable {
    provider: Box<dyn SymbolTableProvider>,
    /// client directory → db directory
    remap: Mutex<BTreeMap<String, String>>,
}

impl std::fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolTable").finish_non_exhaustive()
    }
}

impl SymbolTable {
    pub fn new(provider: Box<dyn SymbolTableProvider>) -> Self {
        Self {
            provider,
            remap: Mutex::new(BTreeMap::new()),
        }
    }

    /// Open a symbol table from a URI: `tcp://host:port` and `ws://…` select
    /// the network pass-through; anything else is a local path, sniffed for
    /// the SQLite magic and otherwise parsed as a JSON document.
    pub fn open(uri: &str) -> Result<Self, SymbolError> {
        if let Some(rest) = uri.strip_prefix(TCP_SCHEME) {
            let (host, port) = rest
                .rsplit_once(':')
                .ok_or_else(|| SymbolError::InvalidUri(uri.to_string()))?;
            let port: u16 = port
                .parse()
                .map_err(|_| SymbolError::InvalidUri(uri.to_string()))?;
            let provider = NetworkSymbolTableProvider::tcp(host, port)?;
            return Ok(Self::new(Box::new(provider)));
        }
        if uri.starts_with(WS_SCHEME) {
            let provider = NetworkSymbolTableProvider::ws(uri)?;
            return Ok(Self::new(Box::new(provider)));
        }
        let path = Path::new(uri);
        if !path.is_file() {
            return Err(SymbolError::NotFound(uri.to_string()));
        }
        let mut magic = [0u8; 16];
        let count = std::fs::File::open(path)?.read(&mut magic)?;
        if count >= SQLITE_MAGIC.len() && magic.starts_with(SQLITE_MAGIC) {
            let provider = SqliteSymbolTableProvider::open(uri)?;
            Ok(Self::new(Box::new(provider)))
        } else {
            let provider = JsonSymbolTableProvider::from_file(uri)?;
            Ok(Self::new(Box::new(provider)))
        }
    }

    pub fn ready(&self) -> bool {
        self.provider.ready()
    }

    // ── Source path remapping ─────────────────────────────────────────────────

    pub fn set_src_mapping(&self, mapping: BTreeMap<String, String>) {
        *self.remap.lock().unwrap() = mapping;
    }

    /// Rewrite a client-side filename to the db side via longest prefix.
    pub fn resolve_filename_to_db(&self, filename: &str) -> String {
        let remap = self.remap.lock().unwrap();
        remap_longest_prefix(filename, remap.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Rewrite a db-side filename back to the client side.
    pub fn resolve_filename_to_client(&self, filename: &str) -> String {
        let remap = self.remap.lock().unwrap();
        remap_longest_prefix(filename, remap.iter().map(|(k, v)| (v.as_str(), k.as_str())))
    }

    // ── Queries (remap-aware) ─────────────────────────────────────────────────

    pub fn breakpoints_in_file(&self, filename: &str) -> Vec<Breakpoint> {
        let filename = self.resolve_filename_to_db(filename);
        let mut bps = self.provider.breakpoints_in_file(&filename);
        self.remap_to_client(&mut bps);
        bps
    }

    pub fn breakpoints_at(&self, filename: &str, line_num: u32, column_num: u32) -> Vec<Breakpoint> {
        let filename = self.resolve_filename_to_db(filename);
        let mut bps = self.provider.breakpoints_at(&filename, line_num, column_num);
        self.remap_to_client(&mut bps);
        bps
    }

    pub fn breakpoint(&self, id: u32) -> Option<Breakpoint> {
        let mut bp = self.provider.breakpoint(id)?;
        bp.filename = self.resolve_filename_to_client(&bp.filename);
        Some(bp)
    }

    pub fn instance_name(&self, instance_id: u32) -> Option<String> {
        self.provider.instance_name(instance_id)
    }

    pub fn instance_name_from_bp(&self, breakpoint_id: u32) -> Option<String> {
        self.provider.instance_name_from_bp(breakpoint_id)
    }

    pub fn instance_id(&self, name: &str) -> Option<u32> {
        self.provider.instance_id(name)
    }

    pub fn instance_id_from_bp(&self, breakpoint_id: u32) -> Option<u32> {
        self.provider.instance_id_from_bp(breakpoint_id)
    }

    pub fn instance_names(&self) -> Vec<String> {
        self.provider.instance_names()
    }

    pub fn filenames(&self) -> Vec<String> {
        self.provider.filenames()
    }

    pub fn context_variables(&self, breakpoint_id: u32) -> Vec<ContextVariableInfo> {
        self.provider.context_variables(breakpoint_id)
    }

    pub fn generator_variables(&self, instance_id: u32) -> Vec<GeneratorVariableInfo> {
        self.provider.generator_variables(instance_id)
    }

    pub fn context_static_values(&self, breakpoint_id: u32) -> HashMap<String, i64> {
        self.provider.context_static_values(breakpoint_id)
    }

    pub fn annotation_values(&self, name: &str) -> Vec<String> {
        self.provider.annotation_values(name)
    }

    pub fn resolve_scoped_name_breakpoint(
        &self,
        scoped_name: &str,
        breakpoint_id: u32,
    ) -> Option<String> {
        self.provider
            .resolve_scoped_name_breakpoint(scoped_name, breakpoint_id)
    }

    pub fn resolve_scoped_name_instance(
        &self,
        scoped_name: &str,
        instance_id: u32,
    ) -> Option<String> {
        self.provider
            .resolve_scoped_name_instance(scoped_name, instance_id)
    }

    pub fn assigned_breakpoints(&self, var_name: &str, breakpoint_id: u32) -> Vec<AssignmentInfo> {
        self.provider.assigned_breakpoints(var_name, breakpoint_id)
    }

    pub fn execution_bp_order(&self) -> Vec<u32> {
        self.provider.execution_bp_order()
    }

    fn remap_to_client(&self, bps: &mut [Breakpoint]) {
        for bp in bps {
            bp.filename = self.resolve_filename_to_client(&bp.filename);
        }
    }
}

fn remap_longest_prefix<'a>(
    filename: &str,
    pairs: impl Iterator<Item = (&'a str, &'a str)>,
) -> String {
    let mut best: Option<(&str, &str)> = None;
    for (from, to) in pairs {
        if filename.starts_with(from) && best.is_none_or(|(b, _)| from.len() > b.len()) {
            best = Some((from, to));
        }
    }
    match best {
        Some((from, to)) => {
            let rest = &filename[from.len()..];
            if rest.is_empty() || rest.starts_with('/') || to.ends_with('/') {
                format!("{to}{rest}")
            } else {
                format!("{to}/{rest}")
            }
        }
        None => filename.to_string(),
    }
}

/// Split a whitespace- or comma-separated id list (the `scope.breakpoints`
/// column format).
pub(crate) fn parse_id_list(text: &str) -> Vec<u32> {
    text.split([' ', ',', '\t'])
        .filter(|token| !token.is_empty())
        .filter_map(|token| token.parse().ok())
        .collect()
}
