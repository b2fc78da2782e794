//! Buffered postgres message stream.
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    Result,
    common::verbose,
    config::DEFAULT_MAX_MESSAGE_LEN,
    postgres::{FramingError, PgMessage, frontend::StartupPacket, write},
};

const DEFAULT_BUF_CAPACITY: usize = 1024;

/// One undecoded message.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub msgtype: u8,
    pub body: Bytes,
}

/// Buffered server side connection to a postgres client.
#[derive(Debug)]
pub struct PgStream<IO> {
    io: IO,
    read_buf: BytesMut,
    write_buf: BytesMut,
    max_message_len: u32,
}

impl<IO> PgStream<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: IO) -> Self {
        Self {
            io,
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }

    /// Set the largest accepted frame length.
    pub fn with_max_message_len(mut self, len: u32) -> Self {
        self.max_message_len = len;
        self
    }

    /// Read until `read_buf` holds at least `n` bytes.
    ///
    /// Returns `false` on end of stream with an empty buffer.
    async fn fill(&mut self, n: usize) -> Result<bool> {
        while self.read_buf.len() < n {
            self.read_buf.reserve(n - self.read_buf.len());
            if self.io.read_buf(&mut self.read_buf).await? == 0 {
                if self.read_buf.is_empty() {
                    return Ok(false);
                }
                let missing = n - self.read_buf.len();
                return Err(FramingError::UnexpectedEof { missing }.into());
            }
        }
        Ok(true)
    }

    fn check_len(&self, len: u32) -> Result<()> {
        if len > self.max_message_len {
            return Err(FramingError::TooLarge { len, max: self.max_message_len }.into());
        }
        Ok(())
    }

    /// Read one typed frame.
    ///
    /// Returns [`None`] when the client closed the stream between frames.
    pub async fn recv_frame(&mut self) -> Result<Option<Frame>> {
        // msgtype + length
        if !self.fill(5).await? {
            return Ok(None);
        }

        let mut header = &self.read_buf[..5];
        let msgtype = header.get_u8();
        let len = header.get_i32();

        if len < 4 {
            return Err(FramingError::InvalidLength { msgtype, len }.into());
        }
        self.check_len(len as u32)?;

        self.fill(1 + len as usize).await?;

        self.read_buf.advance(5);
        let body = self.read_buf.split_to(len as usize - 4).freeze();

        verbose!(msgtype = %msgtype.escape_ascii(), len, "recv");

        Ok(Some(Frame { msgtype, body }))
    }

    /// Read the untyped startup packet.
    ///
    /// Returns [`None`] when the client closed the stream without sending anything.
    pub async fn recv_startup(&mut self) -> Result<Option<StartupPacket>> {
        if !self.fill(4).await? {
            return Ok(None);
        }

        let len = (&self.read_buf[..4]).get_i32();

        // length + request code
        if len < 8 {
            return Err(FramingError::InvalidStartupLength { len }.into());
        }
        self.check_len(len as u32)?;

        self.fill(len as usize).await?;

        self.read_buf.advance(4);
        let body = self.read_buf.split_to(len as usize - 4).freeze();

        Ok(Some(StartupPacket::decode(body)?))
    }

    /// Buffer a message, call [`flush`][PgStream::flush] to actually send it.
    pub fn send<M: PgMessage>(&mut self, msg: M) {
        verbose!(msgtype = %(M::MSGTYPE).escape_ascii(), "send");
        write(&msg, &mut self.write_buf);
    }

    /// Buffer a startup packet, for the client side of the stream.
    pub fn send_startup(&mut self, packet: &StartupPacket) {
        packet.write(&mut self.write_buf);
    }

    /// Buffer the single byte answer rejecting SSL or GSSAPI encryption.
    pub fn deny_encryption(&mut self) {
        self.write_buf.extend_from_slice(b"N");
    }

    /// Write all buffered messages.
    pub async fn flush(&mut self) -> Result<()> {
        self.io.write_all_buf(&mut self.write_buf).await?;
        self.io.flush().await?;
        Ok(())
    }

    pub fn get_mut(&mut self) -> &mut IO {
        &mut self.io
    }
}
