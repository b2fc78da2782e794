//! The SQL backend interface.
//!
//! The front end never interprets SQL beyond the command verb. Statements are passed to
//! [`Backend::execute`], COPY targets are resolved with [`Backend::query_columns`] and
//! COPY rows are applied with [`Backend::write`].
use std::fmt;

use crate::{
    common::ByteStr,
    postgres::{Oid, PgType, SqlState},
};

mod memory;

pub use memory::MemoryBackend;

/// A connection to the SQL backend, owned by exactly one session.
pub trait Backend: Send {
    /// Execute a statement.
    fn execute(&mut self, sql: &str) -> impl Future<Output = Result<Outcome, BackendError>> + Send;

    /// List the columns of `table`, ordered by their ordinal position.
    ///
    /// An empty list means the table does not exist.
    fn query_columns(
        &mut self,
        table: &TableName,
    ) -> impl Future<Output = Result<Vec<ByteStr>, BackendError>> + Send {
        async move {
            let sql = columns_query(table);
            match self.execute(&sql).await? {
                Outcome::Rows(result) => Ok(result
                    .rows
                    .into_iter()
                    .filter_map(|row| row.into_iter().next().flatten())
                    .map(ByteStr::from)
                    .collect()),
                Outcome::UpdateCount(_) => Err(BackendError::new(
                    SqlState::INTERNAL_ERROR,
                    "catalog query did not return rows",
                )),
            }
        }
    }

    /// Apply a batch of row mutations as one backend call.
    fn write(&mut self, mutations: Vec<Mutation>) -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// Catalog query listing a table's columns.
fn columns_query(table: &TableName) -> String {
    let mut sql = String::from("SELECT column_name FROM information_schema.columns WHERE ");
    if let Some(schema) = &table.schema {
        sql.push_str("table_schema = ");
        push_literal(&mut sql, schema);
        sql.push_str(" AND ");
    }
    sql.push_str("table_name = ");
    push_literal(&mut sql, &table.name);
    sql.push_str(" ORDER BY ordinal_position");
    sql
}

fn push_literal(sql: &mut String, value: &str) {
    sql.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            sql.push('\'');
        }
        sql.push(ch);
    }
    sql.push('\'');
}

/// The result of [`Backend::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Number of rows affected.
    UpdateCount(u64),
    /// Tabular result.
    Rows(ResultSet),
}

/// Tabular result in text format.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    pub columns: Vec<Column>,
    /// Row values, [`None`] is sql NULL.
    pub rows: Vec<Vec<Option<String>>>,
}

/// A result column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: ByteStr,
    pub oid: Oid,
}

impl Column {
    pub fn new<T: PgType + ?Sized>(name: impl Into<ByteStr>) -> Self {
        Self { name: name.into(), oid: T::OID }
    }
}

/// Possibly schema qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub schema: Option<ByteStr>,
    pub name: ByteStr,
}

impl TableName {
    pub fn new(name: impl Into<ByteStr>) -> Self {
        Self { schema: None, name: name.into() }
    }

    pub fn with_schema(schema: impl Into<ByteStr>, name: impl Into<ByteStr>) -> Self {
        Self { schema: Some(schema.into()), name: name.into() }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(schema) = &self.schema {
            write!(f, "{schema}.")?;
        }
        f.write_str(&self.name)
    }
}

/// A single row level change, insert or update keyed by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub table: TableName,
    values: Vec<(ByteStr, String)>,
}

impl Mutation {
    pub fn new(table: TableName) -> Self {
        Self { table, values: vec![] }
    }

    /// Set a column value, replacing any previous value of the same column.
    pub fn set(&mut self, column: ByteStr, value: String) {
        match self.values.iter_mut().find(|(key, _)| *key == column) {
            Some((_, old)) => *old = value,
            None => self.values.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.iter().find(|(key, _)| key == column).map(|(_, value)| value.as_str())
    }

    /// Column and value pairs in the order they were set.
    pub fn values(&self) -> &[(ByteStr, String)] {
        &self.values
    }
}

/// An error reported by the backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    pub code: SqlState,
    pub message: String,
}

impl BackendError {
    pub fn new(code: SqlState, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}
