//! `RecordSource` over a `SQLite` database described by a [`Catalog`].

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use record_search_core::clean_string;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};

mod catalog;
mod source;
#[cfg(test)]
mod test_support;

pub use catalog::{Catalog, CatalogError, RecordTypeDef, RelationDef, TableDef};
pub use source::SqliteRecordSource;

/// Name of the SQL function folding values the way the search engine
/// compares them: text form, trimmed and lower-cased.
pub const SEARCH_FOLD_FUNCTION: &str = "search_fold";

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a `SQLite` database, configure runtime pragmas and register the
    /// search folding function.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened, pragmas cannot be
    /// applied, or the function cannot be registered.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        register_search_fold(&conn)?;
        tracing::debug!("opened sqlite database at {}", path.display());
        Ok(Self { conn })
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// A record source over the rows of `table`.
    ///
    /// # Errors
    /// Returns [`CatalogError::UnknownTable`] when the catalog does not declare `table`.
    pub fn source<'a>(
        &'a self,
        catalog: &'a Catalog,
        table: &str,
    ) -> Result<SqliteRecordSource<'a>, CatalogError> {
        catalog.table(table)?;
        Ok(SqliteRecordSource::new(&self.conn, catalog, table))
    }

    /// Verify that every table, column and relation key the catalog declares
    /// exists in the database.
    ///
    /// # Errors
    /// Returns an error naming the first missing table or column.
    pub fn check_catalog(&self, catalog: &Catalog) -> Result<()> {
        for (name, table) in &catalog.tables {
            if !table_exists(&self.conn, name)? {
                return Err(anyhow!("catalog table {name} does not exist in the database"));
            }
            let mut required = vec![(name.as_str(), table.pk.as_str())];
            required.extend(table.columns.keys().map(|column| (name.as_str(), column.as_str())));
            for relation in table.relations.values() {
                match relation {
                    RelationDef::ManyToOne { column, .. } => {
                        required.push((name.as_str(), column.as_str()));
                    }
                    RelationDef::OneToMany { target, remote_column } => {
                        required.push((target.as_str(), remote_column.as_str()));
                    }
                    RelationDef::ManyToMany { through, source_column, target_column, .. } => {
                        required.push((through.as_str(), source_column.as_str()));
                        required.push((through.as_str(), target_column.as_str()));
                    }
                }
            }
            for (table_name, column) in required {
                if !table_has_column(&self.conn, table_name, column)? {
                    return Err(anyhow!(
                        "catalog column {table_name}.{column} does not exist in the database"
                    ));
                }
            }
        }
        Ok(())
    }
}

fn register_search_fold(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        SEARCH_FOLD_FUNCTION,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            Ok(match ctx.get_raw(0) {
                ValueRef::Null => None,
                ValueRef::Integer(value) => Some(value.to_string()),
                ValueRef::Real(value) => Some(value.to_string()),
                ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                    Some(clean_string(&String::from_utf8_lossy(bytes)))
                }
            })
        },
    )
    .with_context(|| format!("failed to register sql function {SEARCH_FOLD_FUNCTION}"))
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    if !table_exists(conn, table)? {
        return Ok(false);
    }

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info(\"{table}\")"))
        .with_context(|| format!("failed to inspect table_info for {table}"))?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }

    Ok(false)
}
