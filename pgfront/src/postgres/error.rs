//! Protocol error
use std::fmt;

/// An error when translating a message body.
///
/// The frame of a message that fails with [`ProtocolError`] has been fully consumed,
/// so the stream stays aligned and the session may continue.
///
/// Message names are resolved by the decoding side, the same type byte names a
/// different message in each direction.
#[derive(Clone, PartialEq, Eq)]
pub enum ProtocolError {
    Unexpected {
        msgtype: u8,
        /// [`None`] for an unknown message type.
        name: Option<&'static str>,
        phase: Option<&'static str>,
    },
    Malformed {
        name: Option<&'static str>,
        reason: &'static str,
    },
    UnsupportedVersion {
        major: u16,
        minor: u16,
    },
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProtocolError::Unexpected { msgtype, name, phase } => {
                match name {
                    Some(name) => write!(f, "unexpected message `{name}`")?,
                    None => write!(f, "unknown message type `{}`", msgtype.escape_ascii())?,
                }
                if let Some(phase) = phase {
                    write!(f, " {phase}")?
                }
                Ok(())
            },
            ProtocolError::Malformed { name, reason } => {
                match name {
                    Some(name) => write!(f, "invalid `{name}` message: ")?,
                    None => f.write_str("invalid message: ")?,
                }
                f.write_str(reason)
            },
            ProtocolError::UnsupportedVersion { major, minor } => {
                write!(f, "unsupported frontend protocol {major}.{minor}: server supports 3.0")
            },
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<bytes::TryGetError> for ProtocolError {
    fn from(_: bytes::TryGetError) -> Self {
        Self::malformed("message body too short")
    }
}

impl ProtocolError {
    pub(crate) fn unknown(msgtype: u8) -> ProtocolError {
        Self::Unexpected { msgtype, name: None, phase: None }
    }

    /// A known message arrived when it is not allowed.
    pub(crate) fn unexpected_phase(msgtype: u8, name: &'static str, phase: &'static str) -> ProtocolError {
        Self::Unexpected { msgtype, name: Some(name), phase: Some(phase) }
    }

    pub(crate) fn malformed(reason: &'static str) -> ProtocolError {
        Self::Malformed { name: None, reason }
    }

    /// Attach the name of the message whose body failed to decode.
    pub(crate) fn with_name(self, name: &'static str) -> ProtocolError {
        match self {
            Self::Malformed { name: None, reason } => Self::Malformed { name: Some(name), reason },
            me => me,
        }
    }
}

/// An error when reading a frame from the stream.
///
/// Stream alignment cannot be recovered after a [`FramingError`], the connection must be closed.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("invalid length {len} for message `{}`", tag(.msgtype))]
    InvalidLength { msgtype: u8, len: i32 },

    #[error("invalid startup packet length {len}")]
    InvalidStartupLength { len: i32 },

    #[error("message length {len} exceeds the limit of {max} bytes")]
    TooLarge { len: u32, max: u32 },

    #[error("unexpected end of stream: {missing} bytes missing from the last frame")]
    UnexpectedEof { missing: usize },
}

fn tag(msgtype: &u8) -> std::ascii::EscapeDefault {
    msgtype.escape_ascii()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_names_messages() {
        let err = ProtocolError::unexpected_phase(b'Q', "Query", "during COPY from stdin");
        assert_eq!(err.to_string(), "unexpected message `Query` during COPY from stdin");

        let err = ProtocolError::unknown(b'z');
        assert_eq!(err.to_string(), "unknown message type `z`");

        let err = ProtocolError::malformed("string is not nul terminated").with_name("CopyFail");
        assert_eq!(err.to_string(), "invalid `CopyFail` message: string is not nul terminated");
    }
}
