//! SQLite target store for cloudrow.
//!
//! A target is the database that holds the user's declared infrastructure.
//! This crate owns the connection to it and the bookkeeping the reconciliation
//! core needs:
//!
//! - which modules are installed, and what they depend on
//! - which tables each module provides
//! - running schema migrations inside a single transaction
//!
//! Resource tables themselves are read and written by the db-side `Crud`
//! implementations of each module, through [`Database::with_connection`].
//!
//! All SQLite work is blocking, so every public async method moves it onto the
//! blocking pool with `tokio::task::spawn_blocking`.

mod database;
mod error;
pub mod metadata;

pub use database::Database;
pub use error::{DbError, DbResult};

pub use rusqlite;
pub use rusqlite::{Connection, Transaction, params};

/// Prefix reserved for cloudrow's own bookkeeping tables.
pub const METADATA_PREFIX: &str = "cloudrow_";
