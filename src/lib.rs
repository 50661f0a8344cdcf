//! # SawitDB
//!
//! A small plantation-flavored database: one binary file of 4 KiB
//! pages per database, a bilingual SQL-like query language, and a
//! JSON-lines TCP protocol on top.
//!
//! ## Architecture Overview
//!
//! 1. **Server layer** (`server` module): TCP listener, the JSON-lines
//!    protocol, and the database-name to file mapping
//! 2. **Engine layer** (`engine` module): the pager, the master-page
//!    table directory, heap pages, B-tree indexes, and the executor
//! 3. **Query layer** (`sql` module): tokenizer and parser for the two
//!    keyword vocabularies
//!
//! The query language speaks two vocabularies for one command set, so
//! `LAHAN kebun` and `CREATE TABLE kebun` do the same thing, as do
//! `PANEN * DARI kebun` and `SELECT * FROM kebun`.
//!
//! ## Usage Example
//!
//! ```no_run
//! use sawitdb::engine::Engine;
//!
//! # fn main() -> Result<(), sawitdb::engine::EngineError> {
//! let mut db = Engine::open("plantation.sawit")?;
//! db.query("LAHAN sawit", None)?;
//! db.query("TANAM KE sawit (id, jenis) BIBIT (1, 'Tenera')", None)?;
//! let rows = db.query("PANEN * DARI sawit DIMANA jenis = 'Tenera'", None)?;
//! println!("{rows:?}");
//! # Ok(())
//! # }
//! ```

/// Blocking protocol client and connection-string parsing
pub mod client;

/// Storage engine: pager, directory, heap pages, indexes, executor
pub mod engine;

/// TCP server and JSON-lines protocol handling
pub mod server;

/// Tokenizer and parser for the bilingual query language
pub mod sql;

pub use engine::{Engine, EngineError, QueryResult, Row, Value};
