//! Postgres Frontend Messages
//!
//! The messages a client sends and this server decodes.
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{PgMessage, ProtocolError};
use crate::{
    common::ByteStr,
    ext::{BufMutExt, BytesExt, StrExt, UsizeExt},
};

messages! {
    /// Every message a client may send after startup.
    pub enum FrontendMessage {
        Query,
        CopyData,
        CopyDone,
        CopyFail,
        Sync,
        Flush,
        Terminate,
    }
}

/// Postgres Startup frontend packet
///
/// For historical reasons, the very first message sent by the client has no initial
/// message-type byte, thus [`StartupPacket`] does not implement [`PgMessage`].
///
/// The body read by the stream starts after the length, with a 32 bit request code.
#[derive(Debug, Clone, PartialEq)]
pub enum StartupPacket {
    /// Regular startup message.
    Startup(Startup),
    /// Request to negotiate SSL encryption.
    SslRequest,
    /// Request to negotiate GSSAPI encryption.
    GssEncRequest,
    /// Out of band cancel request.
    Cancel {
        /// The process ID of the target backend.
        process_id: u32,
        /// The secret key for the target backend.
        secret_key: u32,
    },
}

/// The startup message parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Startup {
    pub major: u16,
    pub minor: u16,
    /// Parameter name and value pairs, such as `user` and `database`.
    pub params: Vec<(ByteStr, ByteStr)>,
}

impl Startup {
    /// Protocol 3.0, `196608`.
    pub const PROTOCOL_VERSION: u32 = 196_608;

    /// Get a startup parameter by name.
    pub fn param(&self, name: &str) -> Option<&ByteStr> {
        self.params.iter().find(|(key, _)| key == name).map(|(_, value)| value)
    }
}

impl StartupPacket {
    pub const SSL_REQUEST_CODE: u32 = 80_877_103;
    pub const GSSENC_REQUEST_CODE: u32 = 80_877_104;
    pub const CANCEL_REQUEST_CODE: u32 = 80_877_102;

    /// Decode packet body, excluding the length.
    pub fn decode(mut body: Bytes) -> Result<StartupPacket, ProtocolError> {
        let code = body.try_get_u32()?;
        match code {
            Self::SSL_REQUEST_CODE => Ok(Self::SslRequest),
            Self::GSSENC_REQUEST_CODE => Ok(Self::GssEncRequest),
            Self::CANCEL_REQUEST_CODE => Ok(Self::Cancel {
                process_id: body.try_get_u32()?,
                secret_key: body.try_get_u32()?,
            }),
            version => {
                let major = (version >> 16) as u16;
                let minor = (version & 0xffff) as u16;
                if major != 3 {
                    return Err(ProtocolError::UnsupportedVersion { major, minor });
                }

                let mut params = vec![];
                loop {
                    if body.first() == Some(&b'\0') {
                        break;
                    }
                    let key = body.get_nul_bytestr()?;
                    let value = body.get_nul_bytestr()?;
                    params.push((key, value));
                }

                Ok(Self::Startup(Startup { major, minor, params }))
            }
        }
    }

    /// Write the whole packet, including the length.
    pub fn write(&self, buf: &mut BytesMut) {
        let offset = buf.len();

        // reserve 4 bytes for length
        buf.put_u32(0);

        match self {
            Self::SslRequest => buf.put_u32(Self::SSL_REQUEST_CODE),
            Self::GssEncRequest => buf.put_u32(Self::GSSENC_REQUEST_CODE),
            Self::Cancel { process_id, secret_key } => {
                buf.put_u32(Self::CANCEL_REQUEST_CODE);
                buf.put_u32(*process_id);
                buf.put_u32(*secret_key);
            }
            Self::Startup(startup) => {
                buf.put_u16(startup.major);
                buf.put_u16(startup.minor);
                for (key, value) in &startup.params {
                    buf.put_nul_string(key);
                    buf.put_nul_string(value);
                }
                // A zero byte is required as a terminator after the last name/value pair.
                buf.put_u8(b'\0');
            }
        }

        // write the length
        let mut written_buf = &mut buf[offset..];
        written_buf.put_u32(written_buf.len().to_u32());
    }
}

/// Identifies the message as a simple query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// The query string itself.
    pub sql: ByteStr,
}

impl PgMessage for Query {
    const MSGTYPE: u8 = b'Q';

    fn size_hint(&self) -> u32 {
        self.sql.nul_string_len()
    }

    fn encode(&self, mut buf: impl BufMut) {
        buf.put_nul_string(&self.sql);
    }

    fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        // some clients omit the nul, the frame length already bounds the text
        Ok(Self { sql: body.get_nul_or_rest_bytestr()? })
    }
}

/// Identifies the message as COPY data.
///
/// Messages sent from the frontend may divide the data stream arbitrarily.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyData {
    /// Data that forms part of a COPY data stream.
    pub data: Bytes,
}

impl PgMessage for CopyData {
    const MSGTYPE: u8 = b'd';

    fn size_hint(&self) -> u32 {
        self.data.len().to_u32()
    }

    fn encode(&self, mut buf: impl BufMut) {
        buf.put_slice(&self.data);
    }

    fn decode(body: Bytes) -> Result<Self, ProtocolError> {
        Ok(Self { data: body })
    }
}

/// Identifies the message as a COPY-failure indicator.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyFail {
    /// An error message to report as the cause of failure.
    pub message: ByteStr,
}

impl PgMessage for CopyFail {
    const MSGTYPE: u8 = b'f';

    fn size_hint(&self) -> u32 {
        self.message.nul_string_len()
    }

    fn encode(&self, mut buf: impl BufMut) {
        buf.put_nul_string(&self.message);
    }

    fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let message = body.get_nul_bytestr()?;
        if body.has_remaining() {
            return Err(ProtocolError::malformed("trailing bytes after message"));
        }
        Ok(Self { message })
    }
}

unit_msg! {
    /// Identifies the message as a COPY-complete indicator.
    struct CopyDone, b'c';

    /// Identifies the message as a Sync command.
    struct Sync, b'S';

    /// Identifies the message as a Flush command.
    struct Flush, b'H';

    /// Identifies the message as a termination.
    struct Terminate, b'X';
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::postgres::write;

    fn frame<M: PgMessage>(msg: &M) -> (u8, Bytes) {
        let mut buf = BytesMut::new();
        write(msg, &mut buf);
        let msgtype = buf.get_u8();
        let len = buf.get_u32();
        assert_eq!(len as usize, 4 + buf.len());
        (msgtype, buf.freeze())
    }

    #[test]
    fn decode_query() {
        let (msgtype, body) = frame(&Query { sql: "SELECT 1".into() });
        assert_eq!(msgtype, b'Q');
        assert_eq!(&body[..], b"SELECT 1\0");

        let msg = FrontendMessage::decode(msgtype, body).unwrap();
        assert_eq!(msg, FrontendMessage::Query(Query { sql: "SELECT 1".into() }));

        // without nul terminator
        let msg = FrontendMessage::decode(b'Q', Bytes::from_static(b"SELECT 2")).unwrap();
        assert_eq!(msg, FrontendMessage::Query(Query { sql: "SELECT 2".into() }));
    }

    #[test]
    fn decode_copy_messages() {
        let (msgtype, body) = frame(&CopyData { data: Bytes::from_static(b"k1\tv1\n") });
        let msg = FrontendMessage::decode(msgtype, body).unwrap();
        assert_eq!(msg.msgtype(), b'd');
        assert_eq!(msg, FrontendMessage::CopyData(CopyData { data: Bytes::from_static(b"k1\tv1\n") }));

        let (msgtype, body) = frame(&CopyDone);
        assert!(body.is_empty());
        assert_eq!(FrontendMessage::decode(msgtype, body).unwrap(), FrontendMessage::CopyDone(CopyDone));

        let (msgtype, body) = frame(&CopyFail { message: "aborted by user".into() });
        let msg = FrontendMessage::decode(msgtype, body).unwrap();
        assert_eq!(msg, FrontendMessage::CopyFail(CopyFail { message: "aborted by user".into() }));
    }

    #[test]
    fn decode_errors() {
        let err = FrontendMessage::decode(b'f', Bytes::from_static(b"no nul")).unwrap_err();
        assert_eq!(err.to_string(), "invalid `CopyFail` message: string is not nul terminated");

        let err = FrontendMessage::decode(b'P', Bytes::new()).unwrap_err();
        assert_eq!(err, ProtocolError::unknown(b'P'));
    }

    #[test]
    fn startup_packet() {
        let packet = StartupPacket::Startup(Startup {
            major: 3,
            minor: 0,
            params: vec![("user".into(), "postgres".into()), ("database".into(), "db".into())],
        });

        let mut buf = BytesMut::new();
        packet.write(&mut buf);
        let len = buf.get_u32();
        assert_eq!(len as usize, 4 + buf.len());

        let decoded = StartupPacket::decode(buf.freeze()).unwrap();
        assert_eq!(decoded, packet);

        let StartupPacket::Startup(startup) = decoded else { unreachable!() };
        assert_eq!(startup.param("user").unwrap(), "postgres");
        assert!(startup.param("options").is_none());
    }

    #[test]
    fn startup_requests() {
        let mut buf = BytesMut::new();
        StartupPacket::SslRequest.write(&mut buf);
        assert_eq!(&buf[..], &[0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f]);

        let body = buf.split_off(4).freeze();
        assert_eq!(StartupPacket::decode(body).unwrap(), StartupPacket::SslRequest);

        let body = Bytes::from_static(&[0, 2, 0, 0, 0]);
        let err = StartupPacket::decode(body).unwrap_err();
        assert_eq!(err, ProtocolError::UnsupportedVersion { major: 2, minor: 0 });
    }
}
