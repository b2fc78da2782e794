//! In-memory backend.
//!
//! Understands just enough SQL to create tables and read them back:
//!
//! - `CREATE TABLE name (column type, ...)`
//! - `DROP TABLE name`
//! - `SELECT * FROM name`
//! - `SELECT <integer>`
//! - `DELETE FROM name`
//!
//! Writes are upserts keyed by the first column of the table.
use std::{
    collections::BTreeMap,
    future::ready,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use super::{Backend, BackendError, Column, Mutation, Outcome, ResultSet, TableName};
use crate::{common::ByteStr, postgres::SqlState};

/// In-memory [`Backend`], clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    store: Arc<Mutex<Store>>,
}

#[derive(Debug, Default)]
struct Store {
    tables: BTreeMap<ByteStr, Table>,
    write_calls: usize,
}

#[derive(Debug)]
struct Table {
    columns: Vec<ByteStr>,
    rows: Vec<Vec<Option<String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or replace a table.
    pub fn create_table<I, C>(&self, name: &str, columns: I)
    where
        I: IntoIterator<Item = C>,
        C: Into<ByteStr>,
    {
        let table = Table {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: vec![],
        };
        self.store().tables.insert(ByteStr::copy_from_str(name), table);
    }

    /// Snapshot of all rows of a table, [`None`] if the table does not exist.
    pub fn rows(&self, name: &str) -> Option<Vec<Vec<Option<String>>>> {
        self.store().tables.get(name).map(|table| table.rows.clone())
    }

    /// Number of [`Backend::write`] calls received so far.
    pub fn write_calls(&self) -> usize {
        self.store().write_calls
    }

    fn run(&self, sql: &str) -> Result<Outcome, BackendError> {
        let sql = sql.trim().trim_end_matches(';').trim_end();
        let lower = sql.to_ascii_lowercase();
        let words = lower.split_whitespace().collect::<Vec<_>>();

        match words.as_slice() {
            ["create", "table", ..] => self.run_create(sql),
            ["drop", "table", name] => match self.store().tables.remove(*name) {
                Some(_) => Ok(Outcome::UpdateCount(0)),
                None => Err(undefined_table(name)),
            },
            ["select", "*", "from", name] => {
                let store = self.store();
                let table = store.tables.get(*name).ok_or_else(|| undefined_table(name))?;
                Ok(Outcome::Rows(ResultSet {
                    columns: table.columns.iter().map(|c| Column::new::<str>(c.clone())).collect(),
                    rows: table.rows.clone(),
                }))
            }
            ["select", value] if value.parse::<i32>().is_ok() => Ok(Outcome::Rows(ResultSet {
                columns: vec![Column::new::<i32>("?column?")],
                rows: vec![vec![Some(value.to_string())]],
            })),
            ["delete", "from", name] => {
                let mut store = self.store();
                let table = store.tables.get_mut(*name).ok_or_else(|| undefined_table(name))?;
                let n = table.rows.len();
                table.rows.clear();
                Ok(Outcome::UpdateCount(n as u64))
            }
            _ => Err(BackendError::new(
                SqlState::FEATURE_NOT_SUPPORTED,
                format!("statement not supported by memory backend: {sql}"),
            )),
        }
    }

    fn run_create(&self, sql: &str) -> Result<Outcome, BackendError> {
        let syntax = || BackendError::new(SqlState::SYNTAX_ERROR, "syntax error in CREATE TABLE");

        let (head, rest) = sql.split_once('(').ok_or_else(syntax)?;
        let body = rest.rsplit_once(')').ok_or_else(syntax)?.0;
        let name = head.split_whitespace().nth(2).ok_or_else(syntax)?.to_ascii_lowercase();

        let mut columns = Vec::<ByteStr>::new();
        for def in body.split(',') {
            let column = def.split_whitespace().next().ok_or_else(syntax)?.to_ascii_lowercase();
            if columns.iter().any(|c| *c == *column) {
                return Err(BackendError::new(
                    SqlState::DUPLICATE_COLUMN,
                    format!("column \"{column}\" specified more than once"),
                ));
            }
            columns.push(column.into());
        }

        self.create_table(&name, columns);
        Ok(Outcome::UpdateCount(0))
    }

    fn apply(&self, mutations: Vec<Mutation>) -> Result<(), BackendError> {
        let mut store = self.store();
        store.write_calls += 1;

        // validate the whole batch before touching any row
        for m in &mutations {
            let table = store.tables.get(&*m.table.name).ok_or_else(|| undefined_table(&m.table))?;
            for (column, _) in m.values() {
                if !table.columns.contains(column) {
                    return Err(BackendError::new(
                        SqlState::UNDEFINED_COLUMN,
                        format!("column \"{column}\" of relation \"{}\" does not exist", m.table),
                    ));
                }
            }
            let key = &table.columns[0];
            if m.get(key).is_none() {
                return Err(BackendError::new(
                    SqlState::NOT_NULL_VIOLATION,
                    format!("null value in column \"{key}\" of relation \"{}\" violates not-null constraint", m.table),
                ));
            }
        }

        for m in mutations {
            let Some(table) = store.tables.get_mut(&*m.table.name) else {
                continue;
            };
            let key = m.get(&table.columns[0]).map(str::to_owned);
            let position = table.rows.iter().position(|row| row[0] == key);
            let index = match position {
                Some(index) => index,
                None => {
                    table.rows.push(vec![None; table.columns.len()]);
                    table.rows.len() - 1
                }
            };
            for (column, value) in m.values() {
                if let Some(i) = table.columns.iter().position(|c| c == column) {
                    table.rows[index][i] = Some(value.clone());
                }
            }
        }

        Ok(())
    }
}

fn undefined_table(name: impl std::fmt::Display) -> BackendError {
    BackendError::new(SqlState::UNDEFINED_TABLE, format!("relation \"{name}\" does not exist"))
}

impl Backend for MemoryBackend {
    fn execute(&mut self, sql: &str) -> impl Future<Output = Result<Outcome, BackendError>> + Send {
        ready(self.run(sql))
    }

    fn query_columns(
        &mut self,
        table: &TableName,
    ) -> impl Future<Output = Result<Vec<ByteStr>, BackendError>> + Send {
        let columns = self
            .store()
            .tables
            .get(&*table.name)
            .map(|t| t.columns.clone())
            .unwrap_or_default();
        ready(Ok(columns))
    }

    fn write(&mut self, mutations: Vec<Mutation>) -> impl Future<Output = Result<(), BackendError>> + Send {
        ready(self.apply(mutations))
    }
}
