//! Simple query protocol.
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Active, Flow, Session};
use crate::{
    Result,
    backend::{Backend, ResultSet},
    common::verbose,
    copy::CopyStatement,
    postgres::{
        PgFormat, ReadyForQuery, type_size,
        backend::{CommandComplete, CopyInResponse, DataRow, EmptyQueryResponse, FieldDescription, RowDescription},
        frontend::Query,
    },
    statement::{Statement, StatementResult},
    stream::PgStream,
};

impl<IO, B> Session<IO, B>
where
    IO: AsyncRead + AsyncWrite + Unpin,
    B: Backend,
{
    /// Handle `Q`.
    ///
    /// Only the command verb is inspected, `COPY` starts the copy in sub-protocol, anything
    /// else is executed by the backend.
    pub(super) async fn simple_query(&mut self, query: Query) -> Result<Flow> {
        let statement = Statement::new(self.ids.next(), query.sql);
        verbose!(id = %statement.id(), command = statement.command(), "query");

        if statement.is_empty() {
            self.stream.send(EmptyQueryResponse);
            self.stream.send(ReadyForQuery::IDLE);
            self.stream.flush().await?;
            return Ok(Flow::Continue);
        }

        let active = match statement.is_copy() {
            true => {
                let mut copy = CopyStatement::new(statement)
                    .with_max_line_len(self.config.max_message_len as usize);
                copy.execute(&mut self.backend).await;
                Active::Copy(copy)
            }
            false => {
                let mut statement = statement;
                statement.execute(&mut self.backend).await;
                Active::Simple(statement)
            }
        };

        self.add_active_statement(active);
        self.respond().await?;
        Ok(Flow::Continue)
    }

    /// Send the response of the active statement.
    ///
    /// In priority order: error, CopyInResponse, rows, update count. Only a COPY without
    /// error stays active.
    async fn respond(&mut self) -> Result<()> {
        let Some(active) = &self.active.slot else {
            return Ok(());
        };
        let statement = active.statement();

        if let Some(err) = statement.error() {
            self.stream.send(err.to_response());
            self.stream.send(ReadyForQuery::IDLE);
            self.remove_active_statement();
        } else if let Active::Copy(copy) = active {
            self.stream.send(CopyInResponse::text(copy.column_count()));
        } else {
            if let StatementResult::ResultSet(result) = statement.result() {
                send_rows(&mut self.stream, result);
            }
            self.stream.send(CommandComplete { tag: statement.command_tag(statement.row_count()) });
            self.stream.send(ReadyForQuery::IDLE);
            self.remove_active_statement();
        }

        self.stream.flush().await
    }
}

fn send_rows<IO>(stream: &mut PgStream<IO>, result: &ResultSet)
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let fields = result
        .columns
        .iter()
        .map(|column| FieldDescription {
            name: column.name.clone(),
            table_oid: 0,
            column_id: 0,
            type_oid: column.oid,
            type_size: type_size(column.oid),
            type_modifier: -1,
            format: PgFormat::Text,
        })
        .collect();
    stream.send(RowDescription { fields });

    for row in &result.rows {
        let values = row.iter().map(|value| value.clone().map(Bytes::from)).collect();
        stream.send(DataRow { values });
    }
}
