use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use thiserror::Error;
use tracing::info;

mod btree;
mod buffer;
mod catalog;
mod executor;
mod storage;

pub use btree::{BTreeIndex, IndexStats, DEFAULT_ORDER};
pub use catalog::{TableEntry, MAX_TABLES};
pub use storage::{Pager, MAX_RECORD_SIZE, PAGE_SIZE};

use crate::sql::{self, Command};

/// A value stored in a row: null, boolean, 64-bit float, or string.
///
/// Serializes as plain JSON, which is also the on-disk record format,
/// so a row round-trips the heap losslessly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    /// Numeric view of the value. Only numbers coerce; booleans and
    /// numeric-looking strings do not.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Textual form used for non-numeric comparison and LIKE matching.
    pub fn text_form(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Text(s) => s.clone(),
        }
    }

    /// The one comparison rule for the whole engine: numeric when both
    /// sides are numbers, lexicographic over textual forms otherwise.
    /// Predicates, ORDER BY, and the B-tree all go through here so
    /// heterogeneous values order the same way everywhere.
    pub fn compare(&self, other: &Value) -> Ordering {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        }
        self.text_form().cmp(&other.text_form())
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl From<&serde_json::Value> for Value {
    /// Scalar JSON maps onto the row model; arrays and objects have no
    /// place in a row and collapse to null.
    fn from(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::Text(s.clone()),
            _ => Value::Null,
        }
    }
}

/// A row: an ordered mapping from field name to value. Rows are
/// schemaless; two rows in one table may have disjoint field sets.
pub type Row = BTreeMap<String, Value>;

/// Everything that can go wrong inside the engine, by kind.
/// The server turns these into protocol error responses; nothing in
/// here ever tears down a connection or the process.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The query text could not be parsed.
    #[error("{0}")]
    Syntax(String),
    /// A referenced table does not exist.
    #[error("Kebun '{0}' tidak ditemukan.")]
    TableNotFound(String),
    /// A semantically invalid request (empty name, empty row, ...).
    #[error("{0}")]
    Invalid(String),
    /// The table directory or a record ran out of room.
    #[error("{0}")]
    Full(String),
    /// On-disk bytes that should be readable were not.
    #[error("halaman rusak: {0}")]
    Corrupt(String),
    /// The pager failed to read or write.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// An invariant broke or a query panicked; the query dies, the
    /// engine stays up.
    #[error("{0}")]
    Internal(String),
}

/// The visible result of one query.
///
/// Serializes untagged, so a message is a JSON string, rows are a
/// JSON array of objects, and so on, matching the wire format.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    /// A human-readable status message.
    Message(String),
    /// Rows from SELECT.
    Rows(Vec<Row>),
    /// A single record, as produced by ungrouped aggregation.
    Record(Row),
    /// Table names from SHOW TABLES.
    Tables(Vec<String>),
    /// Index summaries from SHOW INDEXES.
    Indexes(Vec<IndexStats>),
}

/// One open database: a pager over one file plus the in-memory
/// secondary indexes built against it.
///
/// The engine is strictly single-threaded: callers (the server wraps
/// each engine in a mutex) hand it one query at a time, and each
/// query runs to completion before the next starts. Indexes are keyed
/// `table.field` and live only as long as this value.
pub struct Engine {
    pager: Pager,
    indexes: HashMap<String, BTreeIndex>,
}

impl Engine {
    /// Opens the database file at `path`, creating it if missing.
    pub fn open<P: Into<std::path::PathBuf>>(path: P) -> Result<Self, EngineError> {
        let pager = Pager::open(path)?;
        info!(path = %pager.path().display(), "engine opened");
        Ok(Self {
            pager,
            indexes: HashMap::new(),
        })
    }

    /// Path of the underlying database file.
    pub fn path(&self) -> &Path {
        self.pager.path()
    }

    /// Closes the engine. Pages are flushed on every write, so there
    /// is nothing left to persist; in-memory indexes are discarded.
    pub fn close(self) {}

    /// Parses and executes one query.
    ///
    /// `params` fills `@name` placeholders in the query. Parse errors
    /// come back as `Syntax`; a panic anywhere in execution is caught
    /// here and surfaced as `Internal`, never to the caller's thread.
    pub fn query(
        &mut self,
        text: &str,
        params: Option<&HashMap<String, Value>>,
    ) -> Result<QueryResult, EngineError> {
        let command = match sql::parse(text, params) {
            Ok(command) => command,
            Err(e) => return Err(EngineError::Syntax(e.message)),
        };
        if command == Command::Empty {
            return Ok(QueryResult::Message(String::new()));
        }

        match panic::catch_unwind(AssertUnwindSafe(|| self.execute(command))) {
            Ok(result) => result,
            Err(_) => Err(EngineError::Internal(
                "query gagal karena kesalahan internal".to_string(),
            )),
        }
    }
}
