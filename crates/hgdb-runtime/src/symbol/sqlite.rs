//! Embedded SQLite symbol table.
//!
//! The schema is written by the upstream generator toolchain; the runtime
//! opens the database read-only. `scope.breakpoints` is a whitespace (or
//! comma) separated id list because the store has no array columns.

use rusqlite::{Connection, OpenFlags, Result as SqlResult};
use std::sync::Mutex;
use tracing::error;

use super::{
    parse_id_list, AssignmentInfo, Breakpoint, ContextVariable, ContextVariableInfo,
    GeneratorVariable, GeneratorVariableInfo, SymbolError, SymbolTableProvider, Variable,
};

/// DDL for the persisted schema. The runtime never executes this; it is
/// exported for the writer tooling and the test fixtures.
pub const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS instance (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS breakpoint (
    id INTEGER PRIMARY KEY,
    filename TEXT NOT NULL,
    line_num INTEGER NOT NULL,
    column_num INTEGER NOT NULL DEFAULT 0,
    condition TEXT NOT NULL DEFAULT '',
    \"trigger\" TEXT NOT NULL DEFAULT '',
    instance_id INTEGER REFERENCES instance (id)
);
CREATE TABLE IF NOT EXISTS scope (id INTEGER PRIMARY KEY, breakpoints TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS variable (id INTEGER PRIMARY KEY, value TEXT NOT NULL, is_rtl INTEGER NOT NULL);
CREATE TABLE IF NOT EXISTS context_variable (
    name TEXT NOT NULL,
    breakpoint_id INTEGER REFERENCES breakpoint (id),
    variable_id INTEGER REFERENCES variable (id)
);
CREATE TABLE IF NOT EXISTS generator_variable (
    name TEXT NOT NULL,
    instance_id INTEGER REFERENCES instance (id),
    variable_id INTEGER REFERENCES variable (id)
);
CREATE TABLE IF NOT EXISTS annotation (name TEXT NOT NULL, value TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS assignment (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    breakpoint_id INTEGER REFERENCES breakpoint (id),
    condition TEXT NOT NULL DEFAULT ''
);
";

/// Create the schema in a writable connection (test fixtures, writer tools).
pub fn create_schema(conn: &Connection) -> Result<(), SymbolError> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

pub struct SqliteSymbolTableProvider {
    conn: Mutex<Connection>,
}

impl SqliteSymbolTableProvider {
    /// Open an existing database read-only.
    pub fn open(path: &str) -> Result<Self, SymbolError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Wrap an already-open connection (used by in-memory fixtures).
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn query<T>(&self, f: impl FnOnce(&Connection) -> SqlResult<T>, default: T) -> T {
        let conn = self.conn.lock().unwrap();
        match f(&conn) {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "symbol table query failed");
                default
            }
        }
    }

    fn collect_breakpoints(conn: &Connection, sql: &str, params: &[&dyn rusqlite::ToSql]) -> SqlResult<Vec<Breakpoint>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok(Breakpoint {
                id: row.get(0)?,
                filename: row.get(1)?,
                line_num: row.get(2)?,
                column_num: row.get(3)?,
                condition: row.get(4)?,
                trigger: row.get(5)?,
                instance_id: row.get(6)?,
            })
        })?;
        rows.collect()
    }

    /// Prefix RTL variable values with the owning instance name.
    fn apply_prefix(prefix: Option<&str>, var: &mut Variable) {
        if var.is_rtl {
            if let Some(prefix) = prefix {
                var.value = format!("{prefix}.{}", var.value);
            }
        }
    }
}

const BP_COLUMNS: &str =
    "id, filename, line_num, column_num, condition, \"trigger\", instance_id";

impl SymbolTableProvider for SqliteSymbolTableProvider {
    fn breakpoints_in_file(&self, filename: &str) -> Vec<Breakpoint> {
        self.query(
            |conn| {
                Self::collect_breakpoints(
                    conn,
                    &format!(
                        "SELECT {BP_COLUMNS} FROM breakpoint WHERE filename = ?1 \
                         ORDER BY line_num, column_num, id"
                    ),
                    &[&filename],
                )
            },
            Vec::new(),
        )
    }

    fn breakpoints_at(&self, filename: &str, line_num: u32, column_num: u32) -> Vec<Breakpoint> {
        self.query(
            |conn| {
                if column_num == 0 {
                    Self::collect_breakpoints(
                        conn,
                        &format!(
                            "SELECT {BP_COLUMNS} FROM breakpoint \
                             WHERE filename = ?1 AND line_num = ?2 \
                             ORDER BY column_num, id"
                        ),
                        &[&filename, &line_num],
                    )
                } else {
                    Self::collect_breakpoints(
                        conn,
                        &format!(
                            "SELECT {BP_COLUMNS} FROM breakpoint \
                             WHERE filename = ?1 AND line_num = ?2 AND column_num = ?3 \
                             ORDER BY id"
                        ),
                        &[&filename, &line_num, &column_num],
                    )
                }
            },
            Vec::new(),
        )
    }

    fn breakpoint(&self, id: u32) -> Option<Breakpoint> {
        self.query(
            |conn| {
                let mut bps = Self::collect_breakpoints(
                    conn,
                    &format!("SELECT {BP_COLUMNS} FROM breakpoint WHERE id = ?1"),
                    &[&id],
                )?;
                Ok(bps.pop())
            },
            None,
        )
    }

    fn instance_name(&self, instance_id: u32) -> Option<String> {
        self.query(
            |conn| {
                conn.query_row(
                    "SELECT name FROM instance WHERE id = ?1",
                    [instance_id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(ignore_no_rows)
            },
            None,
        )
    }

    fn instance_name_from_bp(&self, breakpoint_id: u32) -> Option<String> {
        self.query(
            |conn| {
                conn.query_row(
                    "SELECT i.name FROM instance i \
                     JOIN breakpoint b ON b.instance_id = i.id WHERE b.id = ?1",
                    [breakpoint_id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(ignore_no_rows)
            },
            None,
        )
    }

    fn instance_id(&self, name: &str) -> Option<u32> {
        self.query(
            |conn| {
                conn.query_row("SELECT id FROM instance WHERE name = ?1", [name], |row| {
                    row.get(0)
                })
                .map(Some)
                .or_else(ignore_no_rows)
            },
            None,
        )
    }

    fn instance_id_from_bp(&self, breakpoint_id: u32) -> Option<u32> {
        self.query(
            |conn| {
                conn.query_row(
                    "SELECT instance_id FROM breakpoint WHERE id = ?1",
                    [breakpoint_id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(ignore_no_rows)
            },
            None,
        )
        .flatten()
    }

    fn instance_names(&self) -> Vec<String> {
        self.query(
            |conn| {
                let mut stmt = conn.prepare("SELECT name FROM instance ORDER BY id")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect()
            },
            Vec::new(),
        )
    }

    fn filenames(&self) -> Vec<String> {
        self.query(
            |conn| {
                let mut stmt =
                    conn.prepare("SELECT DISTINCT filename FROM breakpoint ORDER BY filename")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect()
            },
            Vec::new(),
        )
    }

    fn context_variables(&self, breakpoint_id: u32) -> Vec<ContextVariableInfo> {
        self.query(
            |conn| {
                let prefix: Option<String> = conn
                    .query_row(
                        "SELECT i.name FROM instance i \
                         JOIN breakpoint b ON b.instance_id = i.id WHERE b.id = ?1",
                        [breakpoint_id],
                        |row| row.get(0),
                    )
                    .map(Some)
                    .or_else(ignore_no_rows)?;
                let mut stmt = conn.prepare(
                    "SELECT cv.name, cv.breakpoint_id, cv.variable_id, v.value, v.is_rtl \
                     FROM context_variable cv JOIN variable v ON cv.variable_id = v.id \
                     WHERE cv.breakpoint_id = ?1 ORDER BY cv.variable_id",
                )?;
                let rows = stmt.query_map([breakpoint_id], |row| {
                    let context_var = ContextVariable {
                        name: row.get(0)?,
                        breakpoint_id: row.get(1)?,
                        variable_id: row.get(2)?,
                    };
                    let mut var = Variable {
                        id: row.get(2)?,
                        value: row.get(3)?,
                        is_rtl: row.get(4)?,
                    };
                    Self::apply_prefix(prefix.as_deref(), &mut var);
                    Ok((context_var, var))
                })?;
                rows.collect()
            },
            Vec::new(),
        )
    }

    fn generator_variables(&self, instance_id: u32) -> Vec<GeneratorVariableInfo> {
        self.query(
            |conn| {
                let prefix: Option<String> = conn
                    .query_row(
                        "SELECT name FROM instance WHERE id = ?1",
                        [instance_id],
                        |row| row.get(0),
                    )
                    .map(Some)
                    .or_else(ignore_no_rows)?;
                let mut stmt = conn.prepare(
                    "SELECT gv.name, gv.instance_id, gv.variable_id, v.value, v.is_rtl \
                     FROM generator_variable gv JOIN variable v ON gv.variable_id = v.id \
                     WHERE gv.instance_id = ?1 ORDER BY gv.variable_id",
                )?;
                let rows = stmt.query_map([instance_id], |row| {
                    let gen_var = GeneratorVariable {
                        name: row.get(0)?,
                        instance_id: row.get(1)?,
                        variable_id: row.get(2)?,
                    };
                    let mut var = Variable {
                        id: row.get(2)?,
                        value: row.get(3)?,
                        is_rtl: row.get(4)?,
                    };
                    Self::apply_prefix(prefix.as_deref(), &mut var);
                    Ok((gen_var, var))
                })?;
                rows.collect()
            },
            Vec::new(),
        )
    }

    fn annotation_values(&self, name: &str) -> Vec<String> {
        self.query(
            |conn| {
                let mut stmt = conn.prepare("SELECT value FROM annotation WHERE name = ?1")?;
                let rows = stmt.query_map([name], |row| row.get(0))?;
                rows.collect()
            },
            Vec::new(),
        )
    }

    fn assigned_breakpoints(&self, var_name: &str, breakpoint_id: u32) -> Vec<AssignmentInfo> {
        self.query(
            |conn| {
                // restrict to the instance owning the reference breakpoint
                let mut stmt = conn.prepare(
                    "SELECT a.breakpoint_id, a.name, a.condition \
                     FROM assignment a \
                     JOIN breakpoint b ON a.breakpoint_id = b.id \
                     WHERE a.name = ?1 AND b.instance_id = \
                       (SELECT instance_id FROM breakpoint WHERE id = ?2) \
                     ORDER BY a.breakpoint_id",
                )?;
                let rows = stmt.query_map(
                    rusqlite::params![var_name, breakpoint_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?;
                rows.collect()
            },
            Vec::new(),
        )
    }

    fn execution_bp_order(&self) -> Vec<u32> {
        self.query(
            |conn| {
                let mut stmt = conn.prepare("SELECT breakpoints FROM scope ORDER BY id")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                let mut order = Vec::new();
                for row in rows {
                    order.extend(parse_id_list(&row?));
                }
                if !order.is_empty() {
                    return Ok(order);
                }
                // scope table not provided: fall back to lexical order
                let mut stmt = conn.prepare(
                    "SELECT id FROM breakpoint ORDER BY filename, line_num, column_num, id",
                )?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect()
            },
            Vec::new(),
        )
    }
}

fn ignore_no_rows<T>(e: rusqlite::Error) -> SqlResult<Option<T>> {
    match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}
