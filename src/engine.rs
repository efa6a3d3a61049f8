//! Trace-query engine boundary.
//!
//! A loaded trace is a read-only relational database (thread, process,
//! thread_state, slice, track, counter, cpu_counter_track). The SQLite engine
//! opens databases produced by `trace_processor_shell -e`, and runs that
//! exporter itself when handed a raw trace.

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, OpenFlags, ToSql};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;

const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// A single value in a query result row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

/// A positional query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Text(String),
    Int(i64),
}

impl ToSql for Param {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Param::Text(s) => s.to_sql(),
            Param::Int(i) => i.to_sql(),
        }
    }
}

/// Column names plus all rows produced by a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

/// Errors from loading or querying a trace.
#[derive(Debug)]
pub enum EngineError {
    /// The trace could not be opened (corrupt, unreadable, export failed).
    Load { path: PathBuf, reason: String },
    /// The engine rejected or failed to run a query.
    Query { message: String },
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Load { path, reason } => {
                write!(f, "failed to load trace {}: {reason}", path.display())
            }
            EngineError::Query { message } => write!(f, "query failed: {message}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Read-only query access to one loaded trace.
pub trait TraceQueryEngine {
    fn query(&self, sql: &str, params: &[Param]) -> Result<QueryRows, EngineError>;
}

/// Opens trace files. Shared by all batch workers.
pub trait EngineLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn TraceQueryEngine>, EngineError>;
}

/// A trace opened through rusqlite.
pub struct SqliteEngine {
    conn: Connection,
    // Keeps an exported database alive for as long as the connection.
    _export_dir: Option<tempfile::TempDir>,
}

impl SqliteEngine {
    /// Open an existing trace database read-only and check that it is readable.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        Self::open_inner(path, None)
    }

    fn open_inner(path: &Path, export_dir: Option<tempfile::TempDir>) -> Result<Self, EngineError> {
        let load_err = |e: rusqlite::Error| EngineError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(load_err)?;

        // Opening is lazy; a corrupt file only fails on first read.
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(load_err)?;

        Ok(Self {
            conn,
            _export_dir: export_dir,
        })
    }
}

impl TraceQueryEngine for SqliteEngine {
    fn query(&self, sql: &str, params: &[Param]) -> Result<QueryRows, EngineError> {
        let query_err = |e: rusqlite::Error| EngineError::Query {
            message: e.to_string(),
        };
        let mut stmt = self.conn.prepare(sql).map_err(query_err)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        let width = columns.len();

        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter()))
            .map_err(query_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(query_err)? {
            let mut cells = Vec::with_capacity(width);
            for i in 0..width {
                cells.push(cell_from(row.get_ref(i).map_err(query_err)?));
            }
            out.push(cells);
        }

        Ok(QueryRows { columns, rows: out })
    }
}

fn cell_from(value: ValueRef<'_>) -> Cell {
    match value {
        ValueRef::Null => Cell::Null,
        ValueRef::Integer(i) => Cell::Integer(i),
        ValueRef::Real(r) => Cell::Real(r),
        ValueRef::Text(t) | ValueRef::Blob(t) => Cell::Text(String::from_utf8_lossy(t).into_owned()),
    }
}

/// Loads trace databases directly, exporting raw traces first when an
/// exporter command is configured.
#[derive(Debug, Clone)]
pub struct SqliteLoader {
    exporter: Vec<String>,
}

impl SqliteLoader {
    pub fn new(exporter: Vec<String>) -> Self {
        Self { exporter }
    }

    fn export(&self, trace: &Path) -> Result<SqliteEngine, EngineError> {
        let load_err = |reason: String| EngineError::Load {
            path: trace.to_path_buf(),
            reason,
        };
        let Some((program, rest)) = self.exporter.split_first() else {
            return Err(load_err(
                "not a SQLite trace database and no exporter is configured".to_string(),
            ));
        };

        let dir = tempfile::tempdir().map_err(|e| load_err(e.to_string()))?;
        let output = dir.path().join("trace.sqlite");
        let args = build_export_args(rest, trace, &output);

        tracing::debug!(program = %program, args = ?args, "exporting trace to sqlite");
        let result = Command::new(program)
            .args(&args)
            .output()
            .map_err(|e| load_err(format!("failed to run {program}: {e}")))?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(load_err(format!(
                "{program} exited with {}: {}",
                result.status,
                stderr.trim()
            )));
        }

        SqliteEngine::open_inner(&output, Some(dir))
    }
}

impl EngineLoader for SqliteLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn TraceQueryEngine>, EngineError> {
        let engine = if is_sqlite_database(path) {
            SqliteEngine::open(path)?
        } else {
            self.export(path)?
        };
        Ok(Box::new(engine))
    }
}

/// Substitute `{trace}` and `{output}` placeholders in exporter arguments.
fn build_export_args(args: &[String], trace: &Path, output: &Path) -> Vec<String> {
    let trace = trace.to_string_lossy();
    let output = output.to_string_lossy();
    args.iter()
        .map(|arg| arg.replace("{trace}", &trace).replace("{output}", &output))
        .collect()
}

fn is_sqlite_database(path: &Path) -> bool {
    let mut header = [0u8; 16];
    match std::fs::File::open(path) {
        Ok(mut f) => f.read_exact(&mut header).is_ok() && &header == SQLITE_MAGIC,
        Err(_) => false,
    }
}
