//! Relational store
//!
//! SQLite-backed persistence for the normalized records. Every batch is
//! written in one transaction, parents before children.

mod bulk;
mod loader;
mod schema;
mod sqlite;

pub use loader::StoreLoader;
pub use schema::{LOAD_ORDER, SCHEMA_VERSION, Table, initialise_schema};
pub use sqlite::{Store, TableCounts};
