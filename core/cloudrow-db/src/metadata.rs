//! Module bookkeeping tables.
//!
//! Three tables record the durable "module installed" facts:
//! - `cloudrow_module`: one row per installed module
//! - `cloudrow_dependencies`: module → dependency edges
//! - `cloudrow_tables`: which module provides which table
//!
//! Functions take a `&Connection` so they work both on a plain connection and
//! inside a `Transaction` (which derefs to one).

use crate::error::DbResult;
use rusqlite::{Connection, params};
use std::collections::BTreeMap;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cloudrow_module (
        name TEXT PRIMARY KEY NOT NULL
    );
    CREATE TABLE IF NOT EXISTS cloudrow_dependencies (
        module TEXT NOT NULL REFERENCES cloudrow_module(name) ON DELETE CASCADE,
        dependency TEXT NOT NULL REFERENCES cloudrow_module(name),
        PRIMARY KEY (module, dependency)
    );
    CREATE TABLE IF NOT EXISTS cloudrow_tables (
        table_name TEXT PRIMARY KEY NOT NULL,
        module TEXT NOT NULL REFERENCES cloudrow_module(name) ON DELETE CASCADE
    );
";

/// Creates the bookkeeping tables if they are missing.
pub fn ensure_schema(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Names of every installed module, sorted.
pub fn installed_modules(conn: &Connection) -> DbResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM cloudrow_module ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

/// Every installed module with its recorded dependencies.
pub fn installed_dependencies(conn: &Connection) -> DbResult<BTreeMap<String, Vec<String>>> {
    let mut out: BTreeMap<String, Vec<String>> = installed_modules(conn)?
        .into_iter()
        .map(|name| (name, Vec::new()))
        .collect();

    let mut stmt = conn.prepare(
        "SELECT module, dependency FROM cloudrow_dependencies ORDER BY module, dependency",
    )?;
    let edges = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (module, dependency) in edges {
        out.entry(module).or_default().push(dependency);
    }
    Ok(out)
}

/// User tables present in the target. SQLite internals and cloudrow's own
/// tables are left out.
pub fn existing_tables(conn: &Connection) -> DbResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table'
           AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
           AND name NOT LIKE 'cloudrow\\_%' ESCAPE '\\'
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

/// Tables registered to a module.
pub fn module_tables(conn: &Connection, module: &str) -> DbResult<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT table_name FROM cloudrow_tables WHERE module = ?1 ORDER BY table_name")?;
    let names = stmt
        .query_map(params![module], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

/// Records a module as installed, along with its dependencies and tables.
///
/// Dependencies must already be recorded, so callers install in dependency
/// order.
pub fn record_module(
    conn: &Connection,
    name: &str,
    dependencies: &[String],
    tables: &[String],
) -> DbResult<()> {
    conn.execute("INSERT INTO cloudrow_module (name) VALUES (?1)", params![name])?;
    for dependency in dependencies {
        conn.execute(
            "INSERT INTO cloudrow_dependencies (module, dependency) VALUES (?1, ?2)",
            params![name, dependency],
        )?;
    }
    for table in tables {
        conn.execute(
            "INSERT INTO cloudrow_tables (table_name, module) VALUES (?1, ?2)",
            params![table, name],
        )?;
    }
    Ok(())
}

/// Removes a module's rows. Dependents must be removed first.
pub fn remove_module(conn: &Connection, name: &str) -> DbResult<()> {
    conn.execute("DELETE FROM cloudrow_tables WHERE module = ?1", params![name])?;
    conn.execute("DELETE FROM cloudrow_dependencies WHERE module = ?1", params![name])?;
    conn.execute("DELETE FROM cloudrow_module WHERE name = ?1", params![name])?;
    Ok(())
}
