//! Postgres Frontend and Backend Protocol
//!
//! Docs here mostly quoted from the official postgres documentation.
//!
//! ## Messaging Overview
//!
//! All communication is through a stream of messages. The first byte of a message identifies the message type,
//! and the next four bytes specify the length of the rest of the message (this length count includes itself,
//! but not the message-type byte). The remaining contents of the message are determined by the message type.
//!
//! ```text
//! ┏━━━━┳━━━━━━━━━━━━━━━━━━━┳━━━━━━┓
//! ┃ Ty ┃       Length      ┃ Body ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━╋━━━━━━┫
//! ┃ u8 ┃        u32        ┃ [u8] ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━╋━━━━━━┫
//! ┃ 47 ┃ 00 | 00 | 00 | 0b ┃  ..  ┃
//! ┗━━━━┻━━━━━━━━━━━━━━━━━━━┻━━━━━━┛
//! ```
//!
//! For historical reasons, the very first message sent by the client (the startup message)
//! has no initial message-type byte, see [`frontend::StartupPacket`].
//!
//! This server reads [`FrontendMessage`] and writes [`BackendMessage`]. Every message
//! implements both directions of [`PgMessage`], so the same codec also serves as a client
//! in tests.
//!
//! ## COPY FROM STDIN
//!
//! ```text
//! frontend                         backend
//!    Q "COPY t FROM STDIN"   ──▶
//!                            ◀──   G CopyInResponse
//!    d CopyData (0..n)       ──▶
//!    c CopyDone / f CopyFail ──▶
//!                            ◀──   C CommandComplete / E ErrorResponse
//!                            ◀──   Z ReadyForQuery
//! ```
//!
//! <https://www.postgresql.org/docs/17/protocol-flow.html#PROTOCOL-COPY>
use bytes::{BufMut, Bytes, BytesMut};

macro_rules! size_of {
    ($self:tt.$field:ident) => {
        u32::try_from(size_of_val(&$self.$field)).expect("data type size too large for postgres")
    };
}

/// Generate a message enum which dispatch decoding by message type.
macro_rules! messages {
    ($(#[$doc:meta])* pub enum $name:ident { $($variant:ident,)* }) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq)]
        pub enum $name {
            $($variant($variant),)*
        }

        impl $name {
            /// Message type of the inner message.
            pub fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$variant(_) => <$variant as $crate::postgres::PgMessage>::MSGTYPE,)*
                }
            }

            /// Name of the inner message.
            pub fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => stringify!($variant),)*
                }
            }

            /// Get message name from message type.
            ///
            /// Returns `"Unknown"` for unknown message type.
            pub fn message_name(msgtype: u8) -> &'static str {
                $(
                    if msgtype == <$variant as $crate::postgres::PgMessage>::MSGTYPE {
                        return stringify!($variant);
                    }
                )*
                "Unknown"
            }

            /// Decode message body based on its message type.
            pub fn decode(msgtype: u8, body: bytes::Bytes) -> Result<Self, $crate::postgres::ProtocolError> {
                $(
                    if msgtype == <$variant as $crate::postgres::PgMessage>::MSGTYPE {
                        let message = <$variant as $crate::postgres::PgMessage>::decode(body)
                            .map_err(|err| err.with_name(stringify!($variant)))?;
                        return Ok(Self::$variant(message));
                    }
                )*
                Err($crate::postgres::ProtocolError::unknown(msgtype))
            }
        }

        $(
            impl From<$variant> for $name {
                fn from(value: $variant) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

/// Generate messages without body.
macro_rules! unit_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name;

        impl $crate::postgres::PgMessage for $name {
            const MSGTYPE: u8 = $ty;

            fn size_hint(&self) -> u32 { 0 }

            fn encode(&self, _: impl bytes::BufMut) { }

            fn decode(_: bytes::Bytes) -> Result<Self, $crate::postgres::ProtocolError> {
                Ok(Self)
            }
        }
    )*};
}

mod pg_type;
mod pg_format;
mod sqlstate;

pub mod frontend;
pub mod backend;

mod error;

pub use pg_type::{Oid, PgType, type_size};
pub use pg_format::PgFormat;
pub use sqlstate::SqlState;

pub use frontend::FrontendMessage;
pub use backend::{BackendMessage, ErrorResponse, ReadyForQuery, TransactionStatus};
pub use error::{FramingError, ProtocolError};

/// A postgres message with a message-type byte.
pub trait PgMessage: Sized {
    /// Message type.
    const MSGTYPE: u8;

    /// Size of the main body.
    ///
    /// Note that this is **only** the size of main body as oppose of actual postgres message length
    /// which include the length itself.
    ///
    /// This must be computed from the message fields alone, see [`write`].
    fn size_hint(&self) -> u32;

    /// Write the main body of the message.
    ///
    /// The length of body written must be equal to the
    /// length returned by [`size_hint`][PgMessage::size_hint].
    fn encode(&self, buf: impl BufMut);

    /// Decode the main body of the message, excluding message type and length.
    fn decode(body: Bytes) -> Result<Self, ProtocolError>;
}

/// The length field of a message, which include the length itself.
pub fn frame_len<M: PgMessage>(msg: &M) -> u32 {
    4 + msg.size_hint()
}

/// Write a message to `buf`.
///
/// # Panics
///
/// Panics if the encoded body does not match the [`size_hint`][PgMessage::size_hint].
pub fn write<M: PgMessage>(msg: &M, buf: &mut BytesMut) {
    // msgtype + length
    const PREFIX: usize = 1 + 4;

    let size_hint = msg.size_hint();
    buf.reserve(PREFIX + size_hint as usize);

    let offset = buf.len();
    buf.put_u8(M::MSGTYPE);
    buf.put_u32(frame_len(msg));

    msg.encode(&mut *buf);

    assert_eq!(
        buf.len() - offset,
        PREFIX + size_hint as usize,
        "message body size not equal to size hint"
    );
}
