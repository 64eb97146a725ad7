use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use rusqlite::{params_from_iter, types::Value, Connection, OpenFlags};
use tracing::debug;

use std::{
    collections::BTreeMap,
    path::Path,
    sync::{Arc, Mutex},
};

use crate::money::Dzd;

/// The one capability the statistics code needs from the database: run a
/// parameterized query and hand back its rows.
///
/// Placeholders in `sql` are positional `?` markers, bound from `params` in
/// order.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;
}

#[async_trait]
impl<T: DataStore + ?Sized> DataStore for Arc<T> {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        (**self).query(sql, params).await
    }
}

/// A result row, keyed by column name.
///
/// The typed accessors are NULL-safe: a `NULL` value, or a column the query
/// did not return, reads as zero (or empty text).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row(BTreeMap<String, Value>);

impl Row {
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// # Errors
    ///
    /// Returns an error if the column holds text or a blob.
    pub fn int(&self, column: &str) -> Result<i64> {
        match self.get(column) {
            None | Some(Value::Null) => Ok(0),
            Some(Value::Integer(n)) => Ok(*n),
            #[allow(clippy::cast_possible_truncation)]
            Some(Value::Real(n)) => Ok(n.round() as i64),
            Some(other) => bail!("column {column}: expected integer, got {other:?}"),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the column holds text or a blob.
    pub fn real(&self, column: &str) -> Result<f64> {
        match self.get(column) {
            None | Some(Value::Null) => Ok(0.0),
            #[allow(clippy::cast_precision_loss)]
            Some(Value::Integer(n)) => Ok(*n as f64),
            Some(Value::Real(n)) => Ok(*n),
            Some(other) => bail!("column {column}: expected number, got {other:?}"),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the column holds text or a blob.
    pub fn money(&self, column: &str) -> Result<Dzd> {
        match self.get(column) {
            None => Ok(Dzd::ZERO),
            Some(value) => Dzd::from_value(value)
                .map_err(|err| anyhow!("column {column}: {err}")),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the column holds a blob.
    pub fn text(&self, column: &str) -> Result<String> {
        Ok(self.opt_text(column)?.unwrap_or_default())
    }

    /// # Errors
    ///
    /// Returns an error if the column holds a blob.
    pub fn opt_text(&self, column: &str) -> Result<Option<String>> {
        match self.get(column) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Text(s)) => Ok(Some(s.clone())),
            Some(Value::Integer(n)) => Ok(Some(n.to_string())),
            Some(Value::Real(n)) => Ok(Some(n.to_string())),
            Some(Value::Blob(_)) => bail!("column {column}: expected text, got blob"),
        }
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Returns the first row, or an empty row (all zeroes) if there is none.
#[must_use]
pub fn first_row(rows: Vec<Row>) -> Row {
    rows.into_iter().next().unwrap_or_default()
}

/// [`DataStore`] backed by a SQLite database file.
///
/// The connection is shared behind a mutex, and every query runs on the
/// blocking thread pool so callers on the async runtime never stall.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens an existing database file for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or is not a database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("opening database {}", path.as_ref().display()))?;
        Ok(Self::from_connection(conn))
    }

    /// Opens an empty in-memory database.
    ///
    /// # Errors
    ///
    /// Returns any error from SQLite.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    #[must_use]
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Runs a batch of semicolon-separated statements, such as a schema.
    ///
    /// # Errors
    ///
    /// Returns any error from SQLite.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))?;
        conn.execute_batch(sql)?;
        Ok(())
    }
}

#[async_trait]
impl DataStore for SqliteStore {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        debug!(sql = sql.trim(), params = params.len(), "running query");
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_owned();
        let params = params.to_vec();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| anyhow!("database mutex poisoned"))?;
            query_blocking(&conn, &sql, &params)
        })
        .await
        .context("query task failed")?
    }
}

fn query_blocking(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let mut stmt = conn
        .prepare(sql)
        .with_context(|| format!("preparing query: {}", sql.trim()))?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = BTreeMap::new();
        for (i, name) in columns.iter().enumerate() {
            let value = Value::from(row.get_ref(i)?);
            record.insert(name.clone(), value);
        }
        result.push(Row(record));
    }
    Ok(result)
}

#[cfg(test)]
impl SqliteStore {
    /// In-memory database loaded with the reference schema and sample data.
    pub(crate) fn fixture() -> Result<Self> {
        let store = Self::open_in_memory()?;
        store.execute_batch(include_str!("../testdata/schema.sql"))?;
        store.execute_batch(include_str!("../testdata/seed.sql"))?;
        Ok(store)
    }
}
