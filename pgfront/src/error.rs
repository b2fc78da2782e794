//! `pgfront` error types.
//!
//! [`Error`] is fatal to a session, the connection is closed.
//!
//! [`StatementError`] is recovered at the message boundary, it is reported to the client
//! as an [`ErrorResponse`] followed by `ReadyForQuery`.
use std::{backtrace::Backtrace, fmt, io};

use crate::{
    backend::BackendError,
    common::ByteStr,
    config::ParseError,
    copy::{CopyParseError, RowFormatError},
    postgres::{ErrorResponse, FramingError, ProtocolError, SqlState},
};

/// A specialized [`Result`] type for `pgfront` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible fatal error from `pgfront` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Add context to the error message.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

/// All possible fatal error kind from `pgfront` library.
pub enum ErrorKind {
    Config(ParseError),
    Protocol(ProtocolError),
    Framing(FramingError),
    Io(io::Error),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Config(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<FramingError>e => ErrorKind::Framing(e));
from!(<std::io::Error>e => ErrorKind::Io(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Framing(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// An error scoped to one statement.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StatementError {
    /// Backend execute, query or write failure.
    #[error("{0}")]
    Backend(BackendError),

    /// COPY statement could not be parsed or uses an unsupported option.
    #[error("{0}")]
    Copy(CopyParseError),

    /// COPY target table or columns could not be resolved.
    #[error("{message}")]
    SchemaResolution { code: SqlState, message: String },

    /// Malformed record in a COPY data stream.
    #[error("{0}")]
    RowFormat(RowFormatError),

    /// Message out of sequence or malformed message body.
    #[error("{0}")]
    Protocol(ProtocolError),

    /// Client sent CopyFail.
    #[error("COPY from stdin failed: {0}")]
    ClientAbort(ByteStr),
}

impl StatementError {
    pub(crate) fn schema(code: SqlState, message: impl Into<String>) -> StatementError {
        Self::SchemaResolution { code, message: message.into() }
    }

    /// The `SQLSTATE` reported to the client.
    pub fn code(&self) -> SqlState {
        match self {
            Self::Backend(e) => e.code.clone(),
            Self::Copy(e) => e.code.clone(),
            Self::SchemaResolution { code, .. } => code.clone(),
            Self::RowFormat(e) => e.code(),
            Self::Protocol(_) => SqlState::PROTOCOL_VIOLATION,
            Self::ClientAbort(_) => SqlState::QUERY_CANCELED,
        }
    }

    /// Translate into wire error response.
    pub fn to_response(&self) -> ErrorResponse {
        let response = ErrorResponse::new(self.code(), self.to_string());
        match self {
            Self::RowFormat(e) => response.detail(format!("COPY line {}", e.line)),
            _ => response,
        }
    }
}

macro_rules! from_stmt {
    ($($ty:ident => $variant:ident,)*) => {$(
        impl From<$ty> for StatementError {
            fn from(value: $ty) -> Self {
                Self::$variant(value)
            }
        }
    )*};
}

from_stmt! {
    BackendError => Backend,
    CopyParseError => Copy,
    RowFormatError => RowFormat,
    ProtocolError => Protocol,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn statement_error_response() {
        let err = StatementError::ClientAbort("aborted by user".into());
        let res = err.to_response();
        assert_eq!(res.code, SqlState::QUERY_CANCELED);
        assert_eq!(res.message, "COPY from stdin failed: aborted by user");

        let err = StatementError::schema(SqlState::UNDEFINED_TABLE, "relation \"nope\" does not exist");
        assert_eq!(err.code().code(), "42P01");
        assert_eq!(err.to_response().message, "relation \"nope\" does not exist");

        let err = StatementError::from(ProtocolError::unexpected_phase(b'd', "CopyData", "outside of COPY"));
        assert_eq!(err.code(), SqlState::PROTOCOL_VIOLATION);
    }

    #[test]
    fn error_context() {
        let err = Error::from(io::Error::from(io::ErrorKind::BrokenPipe)).context("flush");
        assert!(matches!(err.kind(), ErrorKind::Io(_)));
        assert!(err.to_string().starts_with("flush: "));
    }
}
