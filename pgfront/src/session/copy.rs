//! COPY FROM STDIN sub-protocol messages.
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Active, Flow, Session, log_partial_commit};
use crate::{
    Result,
    backend::Backend,
    common::verbose,
    error::StatementError,
    postgres::{
        ReadyForQuery,
        backend::CommandComplete,
        frontend::{CopyData, CopyFail},
    },
};

impl<IO, B> Session<IO, B>
where
    IO: AsyncRead + AsyncWrite + Unpin,
    B: Backend,
{
    /// Handle `d`, nothing is sent back.
    pub(super) async fn copy_data(&mut self, data: CopyData) -> Result<Flow> {
        verbose!(len = data.data.len(), data = %crate::ext::FmtExt::lossy(&data.data[..]), "copy data");
        if let Some(copy) = self.active.copy_mut() {
            copy.write_chunk(&data.data, &mut self.backend).await;
        }
        Ok(Flow::Continue)
    }

    /// Handle `c`, report the accumulated update count or the recorded error.
    pub(super) async fn copy_done(&mut self) -> Result<Flow> {
        let Some(Active::Copy(mut copy)) = self.remove_active_statement() else {
            return Ok(Flow::Continue);
        };

        copy.finish(&mut self.backend).await;

        match copy.error() {
            Some(err) => {
                log_partial_commit(self.process_id, &copy, "error in data");
                self.stream.send(err.to_response());
            }
            None => {
                let statement = copy.statement();
                self.stream.send(CommandComplete { tag: statement.command_tag(copy.update_count()) });
            }
        }
        self.stream.send(ReadyForQuery::IDLE);
        self.stream.flush().await?;

        Ok(Flow::Continue)
    }

    /// Handle `f`, the client text is reported back as the error message.
    pub(super) async fn copy_fail(&mut self, fail: CopyFail) -> Result<Flow> {
        #[cfg(feature = "log")]
        log::info!("session {}: COPY failed by client: {}", self.process_id, fail.message);

        self.abort_copy(StatementError::ClientAbort(fail.message)).await
    }

    /// End the active COPY with `err`, then answer ReadyForQuery.
    pub(super) async fn abort_copy(&mut self, err: StatementError) -> Result<Flow> {
        if let Some(Active::Copy(mut copy)) = self.remove_active_statement() {
            copy.abort(err);
            log_partial_commit(self.process_id, &copy, "aborted");
            if let Some(err) = copy.error() {
                self.stream.send(err.to_response());
            }
        }
        self.stream.send(ReadyForQuery::IDLE);
        self.stream.flush().await?;

        Ok(Flow::Continue)
    }
}
