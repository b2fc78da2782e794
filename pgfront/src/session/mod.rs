//! Client connection session.
//!
//! A [`Session`] owns one client stream and one backend handle. Messages are read and
//! handled strictly one at a time, so at most one statement is ever active.
use std::{
    hash::BuildHasher,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    Error, ErrorKind, Result,
    backend::Backend,
    common::verbose,
    config::Config,
    copy::CopyStatement,
    error::StatementError,
    postgres::{
        ErrorResponse, FrontendMessage, ProtocolError, ReadyForQuery, SqlState,
        backend::{AuthenticationOk, BackendKeyData, ParameterStatus},
        frontend::StartupPacket,
    },
    statement::{Statement, StatementIds},
    stream::PgStream,
};

mod copy;
mod query;

static NEXT_PROCESS_ID: AtomicU32 = AtomicU32::new(1);

/// Whether the read loop continues after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Terminate,
}

/// The statement currently owned by a session.
#[derive(Debug)]
pub enum Active {
    Simple(Statement),
    Copy(CopyStatement),
}

impl Active {
    pub fn statement(&self) -> &Statement {
        match self {
            Active::Simple(statement) => statement,
            Active::Copy(copy) => copy.statement(),
        }
    }
}

/// The active statement slot.
///
/// The protocol is strictly request and response, a second statement never becomes
/// active while another one is.
#[derive(Debug, Default)]
pub struct ActiveStatements {
    slot: Option<Active>,
}

impl ActiveStatements {
    pub fn get(&self) -> Option<&Active> {
        self.slot.as_ref()
    }

    /// The active COPY, if any.
    pub fn copy_mut(&mut self) -> Option<&mut CopyStatement> {
        match &mut self.slot {
            Some(Active::Copy(copy)) => Some(copy),
            _ => None,
        }
    }

    pub fn is_copy(&self) -> bool {
        matches!(self.slot, Some(Active::Copy(_)))
    }
}

/// One client connection.
#[derive(Debug)]
pub struct Session<IO, B> {
    stream: PgStream<IO>,
    backend: B,
    active: ActiveStatements,
    ids: StatementIds,
    config: Arc<Config>,
    process_id: u32,
    secret_key: u32,
}

impl<IO, B> Session<IO, B>
where
    IO: AsyncRead + AsyncWrite + Unpin,
    B: Backend,
{
    pub fn new(io: IO, backend: B, config: Arc<Config>) -> Self {
        let process_id = NEXT_PROCESS_ID.fetch_add(1, Ordering::Relaxed);
        let secret_key = std::hash::RandomState::new().hash_one(process_id) as u32;
        Self {
            stream: PgStream::new(io).with_max_message_len(config.max_message_len),
            backend,
            active: ActiveStatements::default(),
            ids: StatementIds::default(),
            config,
            process_id,
            secret_key,
        }
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub fn active_statement(&self) -> Option<&Active> {
        self.active.get()
    }

    pub fn add_active_statement(&mut self, statement: Active) {
        debug_assert!(self.active.slot.is_none(), "statement already active");
        self.active.slot = Some(statement);
    }

    pub fn remove_active_statement(&mut self) -> Option<Active> {
        self.active.slot.take()
    }

    pub fn backend_connection(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Run startup then the message loop until the client terminates.
    pub async fn run(mut self) -> Result<()> {
        if !self.startup().await? {
            return Ok(());
        }

        let result = self.message_loop().await;

        if let Some(Active::Copy(copy)) = self.remove_active_statement() {
            log_partial_commit(self.process_id, &copy, "session closed");
        }

        result
    }

    async fn message_loop(&mut self) -> Result<()> {
        while let Some(frame) = self.stream.recv_frame().await? {
            let flow = match FrontendMessage::decode(frame.msgtype, frame.body) {
                Ok(msg) => self.handle(msg).await?,
                Err(err) => self.protocol_error(err).await?,
            };
            if flow == Flow::Terminate {
                break;
            }
        }
        Ok(())
    }

    /// Answer the startup packet.
    ///
    /// Returns `false` when the connection should be closed without further messages.
    async fn startup(&mut self) -> Result<bool> {
        #[cfg_attr(not(feature = "log"), allow(unused_variables))]
        let startup = loop {
            let packet = match self.stream.recv_startup().await {
                Ok(Some(packet)) => packet,
                Ok(None) => return Ok(false),
                Err(err) => return Err(self.startup_error(err).await),
            };
            match packet {
                StartupPacket::SslRequest | StartupPacket::GssEncRequest => {
                    self.stream.deny_encryption();
                    self.stream.flush().await?;
                }
                StartupPacket::Cancel { .. } => return Ok(false),
                StartupPacket::Startup(startup) => break startup,
            }
        };

        #[cfg(feature = "log")]
        log::debug!(
            "session {} started, user {:?}",
            self.process_id,
            startup.param("user").map(|e|e.as_str()).unwrap_or_default(),
        );

        self.stream.send(AuthenticationOk);
        self.stream.send(ParameterStatus::new("server_version", self.config.server_version.clone()));
        self.stream.send(ParameterStatus::new("server_encoding", "UTF8"));
        self.stream.send(ParameterStatus::new("client_encoding", "UTF8"));
        self.stream.send(ParameterStatus::new("DateStyle", "ISO, MDY"));
        self.stream.send(ParameterStatus::new("integer_datetimes", "on"));
        self.stream.send(ParameterStatus::new("standard_conforming_strings", "on"));
        self.stream.send(BackendKeyData { process_id: self.process_id, secret_key: self.secret_key });
        self.stream.send(ReadyForQuery::IDLE);
        self.stream.flush().await?;

        Ok(true)
    }

    /// Report a malformed startup packet as FATAL before closing.
    async fn startup_error(&mut self, err: Error) -> Error {
        if let ErrorKind::Protocol(e) = err.kind() {
            let code = match e {
                ProtocolError::UnsupportedVersion { .. } => SqlState::FEATURE_NOT_SUPPORTED,
                _ => SqlState::PROTOCOL_VIOLATION,
            };
            self.stream.send(ErrorResponse::fatal(code, e.to_string()));
            if let Err(flush) = self.stream.flush().await {
                return flush.context("sending startup error");
            }
        }
        err
    }

    /// Dispatch one message.
    pub async fn handle(&mut self, msg: FrontendMessage) -> Result<Flow> {
        verbose!(msgtype = %msg.msgtype().escape_ascii(), copy = self.active.is_copy(), "handle");

        if self.active.is_copy() {
            return match msg {
                FrontendMessage::CopyData(data) => self.copy_data(data).await,
                FrontendMessage::CopyDone(_) => self.copy_done().await,
                FrontendMessage::CopyFail(fail) => self.copy_fail(fail).await,
                // ignored while copy in is active
                FrontendMessage::Sync(_) | FrontendMessage::Flush(_) => Ok(Flow::Continue),
                FrontendMessage::Terminate(_) => Ok(Flow::Terminate),
                other => {
                    let err = ProtocolError::unexpected_phase(other.msgtype(), other.name(), "during COPY from stdin");
                    self.abort_copy(err.into()).await
                }
            };
        }

        match msg {
            FrontendMessage::Query(query) => self.simple_query(query).await,
            FrontendMessage::CopyData(_) | FrontendMessage::CopyDone(_) | FrontendMessage::CopyFail(_) => {
                let err = ProtocolError::unexpected_phase(msg.msgtype(), msg.name(), "outside of COPY");
                self.report(&err.into()).await?;
                Ok(Flow::Continue)
            }
            FrontendMessage::Sync(_) => {
                self.stream.send(ReadyForQuery::IDLE);
                self.stream.flush().await?;
                Ok(Flow::Continue)
            }
            FrontendMessage::Flush(_) => {
                self.stream.flush().await?;
                Ok(Flow::Continue)
            }
            FrontendMessage::Terminate(_) => Ok(Flow::Terminate),
        }
    }

    /// A message body could not be decoded, its frame is consumed so the session continues.
    async fn protocol_error(&mut self, err: ProtocolError) -> Result<Flow> {
        #[cfg(feature = "log")]
        log::debug!("session {}: {err}", self.process_id);

        if self.active.is_copy() {
            return self.abort_copy(err.into()).await;
        }
        self.report(&err.into()).await?;
        Ok(Flow::Continue)
    }

    /// Send an error response and ReadyForQuery.
    async fn report(&mut self, err: &StatementError) -> Result<()> {
        self.stream.send(err.to_response());
        self.stream.send(ReadyForQuery::IDLE);
        self.stream.flush().await
    }
}

/// COPY writes every chunk as it arrives, an aborted COPY may leave rows behind.
#[cfg(feature = "log")]
fn log_partial_commit(process_id: u32, copy: &CopyStatement, reason: &str) {
    if let (Some(table), n @ 1..) = (copy.table(), copy.update_count()) {
        log::warn!(
            "session {process_id}: COPY {} into {table} aborted ({reason}), {n} rows were already written",
            copy.statement().id(),
        );
    }
}

#[cfg(not(feature = "log"))]
fn log_partial_commit(_: u32, _: &CopyStatement, _: &str) { }
