//! COPY FROM STDIN statement.
//!
//! A [`CopyStatement`] is created by a `COPY` query and stays active across the
//! CopyData messages that follow, until CopyDone or CopyFail.
//!
//! Each CopyData chunk is written to the backend as soon as it arrives, one
//! [`Backend::write`] call per chunk. A later CopyFail or failed chunk does not undo the
//! chunks already written.
use crate::{
    backend::{Backend, Mutation, TableName},
    common::{ByteStr, verbose},
    config::DEFAULT_MAX_MESSAGE_LEN,
    error::StatementError,
    postgres::SqlState,
    statement::{Statement, StatementResult, StatementState},
};

mod command;
mod text;

pub use command::{CopyCommand, CopyOptions, CopyParseError};
pub use text::{Record, RowFormatError, RowFormatKind, RowParser};

/// An active bulk load target.
#[derive(Debug)]
pub struct CopyStatement {
    statement: Statement,
    table: Option<TableName>,
    parser: Option<RowParser>,
    max_line_len: usize,
    update_count: u64,
}

impl CopyStatement {
    pub fn new(statement: Statement) -> Self {
        Self {
            statement,
            table: None,
            parser: None,
            max_line_len: DEFAULT_MAX_MESSAGE_LEN as usize,
            update_count: 0,
        }
    }

    /// Set the longest COPY line that may span CopyData messages.
    pub fn with_max_line_len(mut self, len: usize) -> Self {
        self.max_line_len = len;
        self
    }

    /// Parse the COPY statement and resolve its target columns.
    ///
    /// Backend rows are not touched.
    pub async fn execute<B: Backend>(&mut self, backend: &mut B) {
        match self.resolve(backend).await {
            Ok(()) => self.statement.executed(StatementResult::None),
            Err(err) => self.statement.fail(err),
        }
    }

    async fn resolve<B: Backend>(&mut self, backend: &mut B) -> Result<(), StatementError> {
        let command = CopyCommand::parse(self.statement.sql())?;
        let table = command.table;

        let catalog = backend
            .query_columns(&table)
            .await
            .map_err(|err| StatementError::schema(err.code, err.message))?;

        if catalog.is_empty() {
            return Err(StatementError::schema(
                SqlState::UNDEFINED_TABLE,
                format!("relation \"{table}\" does not exist"),
            ));
        }

        let columns = match command.columns {
            None => catalog,
            Some(columns) => {
                for (i, column) in columns.iter().enumerate() {
                    if !catalog.contains(column) {
                        return Err(StatementError::schema(
                            SqlState::UNDEFINED_COLUMN,
                            format!("column \"{column}\" of relation \"{table}\" does not exist"),
                        ));
                    }
                    if columns[..i].contains(column) {
                        return Err(StatementError::schema(
                            SqlState::DUPLICATE_COLUMN,
                            format!("column \"{column}\" specified more than once"),
                        ));
                    }
                }
                columns
            }
        };

        verbose!(id = %self.statement.id(), %table, columns = columns.len(), "copy in");

        self.parser = Some(RowParser::new(command.options, columns).with_max_line_len(self.max_line_len));
        self.table = Some(table);
        Ok(())
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    pub fn table(&self) -> Option<&TableName> {
        self.table.as_ref()
    }

    /// The resolved target columns, empty before a successful [`execute`][Self::execute].
    pub fn columns(&self) -> &[ByteStr] {
        self.parser.as_ref().map(RowParser::columns).unwrap_or_default()
    }

    pub fn column_count(&self) -> usize {
        self.columns().len()
    }

    /// Rows written to the backend so far.
    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    pub fn error(&self) -> Option<&StatementError> {
        self.statement.error()
    }

    pub fn is_errored(&self) -> bool {
        self.statement.state() == StatementState::Errored
    }

    /// Decode a CopyData chunk and write its records as one batch.
    ///
    /// After an error, every later chunk is discarded.
    pub async fn write_chunk<B: Backend>(&mut self, chunk: &[u8], backend: &mut B) {
        if self.is_errored() {
            return;
        }
        let Some(parser) = self.parser.as_mut() else {
            return;
        };
        match parser.feed(chunk) {
            Ok(records) => self.write_records(records, backend).await,
            Err(err) => {
                #[cfg(feature = "log")]
                log::debug!("COPY {}: {err} at line {}", self.statement.id(), err.line);
                self.statement.fail(err.into());
            }
        }
    }

    /// Flush the last unterminated line and produce the final update count.
    pub async fn finish<B: Backend>(&mut self, backend: &mut B) {
        if self.is_errored() {
            return;
        }
        let Some(parser) = self.parser.as_mut() else {
            return;
        };
        match parser.finish() {
            Ok(record) => self.write_records(record.into_iter().collect(), backend).await,
            Err(err) => self.statement.fail(err.into()),
        }
        if !self.is_errored() {
            self.statement.executed(StatementResult::UpdateCount(self.update_count));
        }
    }

    /// Abort with `error`, which replaces any earlier error.
    pub fn abort(&mut self, error: StatementError) {
        self.statement.abort(error);
    }

    async fn write_records<B: Backend>(&mut self, records: Vec<crate::copy::Record>, backend: &mut B) {
        if records.is_empty() {
            return;
        }
        let (Some(table), Some(parser)) = (&self.table, &self.parser) else {
            return;
        };

        let n = records.len() as u64;
        let mutations = records
            .into_iter()
            .map(|record| {
                let mut mutation = Mutation::new(table.clone());
                for (column, value) in parser.columns().iter().zip(record) {
                    if let Some(value) = value {
                        mutation.set(column.clone(), value);
                    }
                }
                mutation
            })
            .collect();

        match backend.write(mutations).await {
            Ok(()) => self.update_count += n,
            Err(err) => self.statement.fail(err.into()),
        }
    }
}
