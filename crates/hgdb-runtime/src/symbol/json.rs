//! In-memory symbol table parsed from a JSON scope tree.
//!
//! The document nests scope nodes of four kinds sharing a serialization
//! skeleton: `module`, `block`, `decl`, `assign`. Modules own their variable
//! lists and reference child modules by name, so the tree stays acyclic and
//! instances are instantiated by walking from the document's `top` module.

use std::collections::HashMap;

use serde::Deserialize;

use super::{
    AssignmentInfo, Breakpoint, ContextVariable, ContextVariableInfo, GeneratorVariable,
    GeneratorVariableInfo, SymbolError, SymbolTableProvider, Variable,
};

// ── Document shape ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Document {
    #[serde(default)]
    #[allow(dead_code)]
    generator: Option<String>,
    top: String,
    table: Vec<ScopeNode>,
    #[serde(default)]
    annotations: Vec<AnnotationNode>,
}

#[derive(Debug, Deserialize)]
struct AnnotationNode {
    name: String,
    value: String,
}

/// Shared header of every scope node.
#[derive(Debug, Default, Deserialize)]
struct Header {
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    column: Option<u32>,
    #[serde(default)]
    scope: Vec<ScopeNode>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ScopeNode {
    Module(ModuleNode),
    Block(BlockNode),
    Decl(VarStmtNode),
    Assign(VarStmtNode),
}

#[derive(Debug, Deserialize)]
struct ModuleNode {
    #[serde(flatten)]
    header: Header,
    name: String,
    #[serde(default)]
    instances: Vec<InstanceRef>,
    #[serde(default)]
    variables: Vec<JsonVariable>,
}

#[derive(Debug, Deserialize)]
struct BlockNode {
    #[serde(flatten)]
    header: Header,
}

#[derive(Debug, Deserialize)]
struct VarStmtNode {
    #[serde(flatten)]
    header: Header,
    variable: JsonVariable,
    #[serde(default)]
    condition: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstanceRef {
    name: String,
    module: String,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonVariable {
    name: String,
    value: String,
    #[serde(default)]
    rtl: bool,
}

// ── Provider ──────────────────────────────────────────────────────────────────

/// Fully materialized tables built from the document.
#[derive(Debug)]
pub struct JsonSymbolTableProvider {
    breakpoints: Vec<Breakpoint>,
    instances: Vec<super::Instance>,
    variables: Vec<Variable>,
    context_variables: Vec<ContextVariable>,
    generator_variables: Vec<GeneratorVariable>,
    annotations: Vec<(String, String)>,
    assignments: Vec<(u32, String, String)>,
    execution_order: Vec<u32>,
}

impl JsonSymbolTableProvider {
    pub fn from_file(path: &str) -> Result<Self, SymbolError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_str(&text)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Result<Self, SymbolError> {
        let document: Document = serde_json::from_str(text)?;
        Builder::default().build(document)
    }
}

/// One source statement discovered inside a module definition, with the
/// context variables lexically visible at it.
struct ModuleStmt {
    filename: String,
    line: u32,
    column: u32,
    condition: String,
    /// (generator name, value, is_rtl) visible at this statement
    context: Vec<(String, String, bool)>,
}

#[derive(Default)]
struct Builder {
    stmts_per_module: HashMap<String, Vec<ModuleStmt>>,
}

impl Builder {
    fn build(mut self, document: Document) -> Result<JsonSymbolTableProvider, SymbolError> {
        let modules: HashMap<String, &ModuleNode> = document
            .table
            .iter()
            .filter_map(|node| match node {
                ScopeNode::Module(module) => Some((module.name.clone(), module)),
                _ => None,
            })
            .collect();
        let top = modules.get(&document.top).ok_or_else(|| {
            SymbolError::Malformed(format!("top module `{}` not defined", document.top))
        })?;

        // collect each module's statements once
        for module in modules.values() {
            let mut stmts = Vec::new();
            let mut context = Vec::new();
            Self::walk_scopes(&module.header.scope, &mut context, &mut stmts);
            self.stmts_per_module.insert(module.name.clone(), stmts);
        }

        // instantiate the module graph from the top, instance-major for ids,
        // statement-major for breakpoints so peer instances stay adjacent in
        // the execution order
        let mut provider = JsonSymbolTableProvider {
            breakpoints: Vec::new(),
            instances: Vec::new(),
            variables: Vec::new(),
            context_variables: Vec::new(),
            generator_variables: Vec::new(),
            annotations: document
                .annotations
                .iter()
                .map(|a| (a.name.clone(), a.value.clone()))
                .collect(),
            assignments: Vec::new(),
            execution_order: Vec::new(),
        };
        let mut instance_module: Vec<(u32, String)> = Vec::new();
        self.instantiate(
            &modules,
            top,
            document.top.clone(),
            &mut provider,
            &mut instance_module,
        )?;

        // breakpoints, statement-major across instances of the same module
        let mut next_bp_id = 0u32;
        let mut module_groups: Vec<(&str, Vec<u32>)> = Vec::new();
        for (instance_id, module_name) in &instance_module {
            match module_groups
                .iter_mut()
                .find(|(name, _)| *name == module_name.as_str())
            {
                Some((_, ids)) => ids.push(*instance_id),
                None => module_groups.push((module_name.as_str(), vec![*instance_id])),
            }
        }
        for (module_name, instance_ids) in module_groups {
            let stmts = &self.stmts_per_module[module_name];
            for stmt in stmts {
                for instance_id in &instance_ids {
                    let bp_id = next_bp_id;
                    next_bp_id += 1;
                    let instance_name = provider.instances[*instance_id as usize].name.clone();
                    provider.breakpoints.push(Breakpoint {
                        id: bp_id,
                        filename: stmt.filename.clone(),
                        line_num: stmt.line,
                        column_num: stmt.column,
                        condition: stmt.condition.clone(),
                        trigger: String::new(),
                        instance_id: Some(*instance_id),
                    });
                    provider.execution_order.push(bp_id);
                    for (name, value, is_rtl) in &stmt.context {
                        let variable_id = provider.variables.len() as u32;
                        let value = if *is_rtl {
                            format!("{instance_name}.{value}")
                        } else {
                            value.clone()
                        };
                        provider.variables.push(Variable {
                            id: variable_id,
                            value,
                            is_rtl: *is_rtl,
                        });
                        provider.context_variables.push(ContextVariable {
                            name: name.clone(),
                            breakpoint_id: bp_id,
                            variable_id,
                        });
                    }
                }
            }
        }
        Ok(provider)
    }

    /// Depth-first statement collection within one module definition.
    /// Declared variables accumulate into the context of the statements that
    /// follow them in the enclosing scopes.
    fn walk_scopes(
        scopes: &[ScopeNode],
        context: &mut Vec<(String, String, bool)>,
        out: &mut Vec<ModuleStmt>,
    ) {
        for node in scopes {
            match node {
                ScopeNode::Module(_) => {
                    // module definitions never nest inside statement scopes
                }
                ScopeNode::Block(block) => {
                    let depth = context.len();
                    Self::walk_scopes(&block.header.scope, context, out);
                    context.truncate(depth);
                }
                ScopeNode::Decl(stmt) | ScopeNode::Assign(stmt) => {
                    let var = (
                        stmt.variable.name.clone(),
                        stmt.variable.value.clone(),
                        stmt.variable.rtl,
                    );
                    if let (Some(filename), Some(line)) =
                        (&stmt.header.filename, stmt.header.line)
                    {
                        let mut visible = context.clone();
                        if !visible.iter().any(|(name, _, _)| *name == var.0) {
                            visible.push(var.clone());
                        }
                        out.push(ModuleStmt {
                            filename: filename.clone(),
                            line,
                            column: stmt.header.column.unwrap_or(0),
                            condition: stmt.condition.clone().unwrap_or_default(),
                            context: visible,
                        });
                    }
                    if !context.iter().any(|(name, _, _)| *name == var.0) {
                        context.push(var);
                    }
                    // statements may carry nested scopes in degenerate trees
                    let depth = context.len();
                    Self::walk_scopes(&stmt.header.scope, context, out);
                    context.truncate(depth);
                }
            }
        }
    }

    fn instantiate(
        &self,
        modules: &HashMap<String, &ModuleNode>,
        module: &ModuleNode,
        full_name: String,
        provider: &mut JsonSymbolTableProvider,
        instance_module: &mut Vec<(u32, String)>,
    ) -> Result<(), SymbolError> {
        let instance_id = provider.instances.len() as u32;
        provider.instances.push(super::Instance {
            id: instance_id,
            name: full_name.clone(),
        });
        instance_module.push((instance_id, module.name.clone()));

        for var in &module.variables {
            let variable_id = provider.variables.len() as u32;
            let value = if var.rtl {
                format!("{full_name}.{}", var.value)
            } else {
                var.value.clone()
            };
            provider.variables.push(Variable {
                id: variable_id,
                value,
                is_rtl: var.rtl,
            });
            provider.generator_variables.push(GeneratorVariable {
                name: var.name.clone(),
                instance_id,
                variable_id,
            });
        }

        for child in &module.instances {
            let child_module = modules.get(&child.module).ok_or_else(|| {
                SymbolError::Malformed(format!("module `{}` not defined", child.module))
            })?;
            self.instantiate(
                modules,
                child_module,
                format!("{full_name}.{}", child.name),
                provider,
                instance_module,
            )?;
        }
        Ok(())
    }
}

impl SymbolTableProvider for JsonSymbolTableProvider {
    fn breakpoints_in_file(&self, filename: &str) -> Vec<Breakpoint> {
        let mut bps: Vec<Breakpoint> = self
            .breakpoints
            .iter()
            .filter(|bp| bp.filename == filename)
            .cloned()
            .collect();
        bps.sort_by_key(|bp| (bp.line_num, bp.column_num, bp.id));
        bps
    }

    fn breakpoints_at(&self, filename: &str, line_num: u32, column_num: u32) -> Vec<Breakpoint> {
        let mut bps: Vec<Breakpoint> = self
            .breakpoints
            .iter()
            .filter(|bp| {
                bp.filename == filename
                    && bp.line_num == line_num
                    && (column_num == 0 || bp.column_num == column_num)
            })
            .cloned()
            .collect();
        bps.sort_by_key(|bp| (bp.column_num, bp.id));
        bps
    }

    fn breakpoint(&self, id: u32) -> Option<Breakpoint> {
        self.breakpoints.iter().find(|bp| bp.id == id).cloned()
    }

    fn instance_name(&self, instance_id: u32) -> Option<String> {
        self.instances
            .iter()
            .find(|inst| inst.id == instance_id)
            .map(|inst| inst.name.clone())
    }

    fn instance_name_from_bp(&self, breakpoint_id: u32) -> Option<String> {
        let instance_id = self.instance_id_from_bp(breakpoint_id)?;
        self.instance_name(instance_id)
    }

    fn instance_id(&self, name: &str) -> Option<u32> {
        self.instances
            .iter()
            .find(|inst| inst.name == name)
            .map(|inst| inst.id)
    }

    fn instance_id_from_bp(&self, breakpoint_id: u32) -> Option<u32> {
        self.breakpoint(breakpoint_id)?.instance_id
    }

    fn instance_names(&self) -> Vec<String> {
        self.instances.iter().map(|inst| inst.name.clone()).collect()
    }

    fn filenames(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .breakpoints
            .iter()
            .map(|bp| bp.filename.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn context_variables(&self, breakpoint_id: u32) -> Vec<ContextVariableInfo> {
        self.context_variables
            .iter()
            .filter(|cv| cv.breakpoint_id == breakpoint_id)
            .map(|cv| {
                (
                    cv.clone(),
                    self.variables[cv.variable_id as usize].clone(),
                )
            })
            .collect()
    }

    fn generator_variables(&self, instance_id: u32) -> Vec<GeneratorVariableInfo> {
        self.generator_variables
            .iter()
            .filter(|gv| gv.instance_id == instance_id)
            .map(|gv| {
                (
                    gv.clone(),
                    self.variables[gv.variable_id as usize].clone(),
                )
            })
            .collect()
    }

    fn annotation_values(&self, name: &str) -> Vec<String> {
        self.annotations
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn assigned_breakpoints(&self, var_name: &str, breakpoint_id: u32) -> Vec<AssignmentInfo> {
        let Some(instance_id) = self.instance_id_from_bp(breakpoint_id) else {
            return Vec::new();
        };
        self.assignments
            .iter()
            .filter(|(bp_id, name, _)| {
                name == var_name
                    && self.instance_id_from_bp(*bp_id) == Some(instance_id)
            })
            .cloned()
            .collect()
    }

    fn execution_bp_order(&self) -> Vec<u32> {
        self.execution_order.clone()
    }
}
