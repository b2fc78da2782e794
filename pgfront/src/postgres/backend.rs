//! Postgres Backend Messages
//!
//! The messages this server writes. Every message also decodes, so the same types
//! read server output on the client side.
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use bytes::{Buf, BufMut, Bytes};

use super::{Oid, PgFormat, PgMessage, ProtocolError, SqlState};
use crate::{
    common::ByteStr,
    ext::{BufMutExt, BytesExt, StrExt, UsizeExt},
};

messages! {
    /// Every message this server may send.
    pub enum BackendMessage {
        AuthenticationOk,
        ParameterStatus,
        BackendKeyData,
        ReadyForQuery,
        CopyInResponse,
        RowDescription,
        DataRow,
        CommandComplete,
        EmptyQueryResponse,
        ErrorResponse,
    }
}

/// Specifies that the authentication was successful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticationOk;

impl PgMessage for AuthenticationOk {
    const MSGTYPE: u8 = b'R';

    fn size_hint(&self) -> u32 {
        4
    }

    fn encode(&self, mut buf: impl BufMut) {
        buf.put_u32(0);
    }

    fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        match body.try_get_u32()? {
            0 => Ok(Self),
            _ => Err(ProtocolError::malformed("unsupported authentication request")),
        }
    }
}

/// Identifies the message as a run-time parameter status report.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterStatus {
    /// The name of the run-time parameter being reported.
    pub name: ByteStr,
    /// The current value of the parameter.
    pub value: ByteStr,
}

impl ParameterStatus {
    pub fn new(name: impl Into<ByteStr>, value: impl Into<ByteStr>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

impl PgMessage for ParameterStatus {
    const MSGTYPE: u8 = b'S';

    fn size_hint(&self) -> u32 {
        self.name.nul_string_len() + self.value.nul_string_len()
    }

    fn encode(&self, mut buf: impl BufMut) {
        buf.put_nul_string(&self.name);
        buf.put_nul_string(&self.value);
    }

    fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            name: body.get_nul_bytestr()?,
            value: body.get_nul_bytestr()?,
        })
    }
}

/// Identifies the message as cancellation key data.
///
/// The frontend must save these values if it wishes to be able to issue CancelRequest messages later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: u32,
    /// The secret key of this backend.
    pub secret_key: u32,
}

impl PgMessage for BackendKeyData {
    const MSGTYPE: u8 = b'K';

    fn size_hint(&self) -> u32 {
        size_of!(self.process_id) + size_of!(self.secret_key)
    }

    fn encode(&self, mut buf: impl BufMut) {
        buf.put_u32(self.process_id);
        buf.put_u32(self.secret_key);
    }

    fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            process_id: body.try_get_u32()?,
            secret_key: body.try_get_u32()?,
        })
    }
}

/// Current backend transaction status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    /// Not in a transaction block.
    #[default]
    Idle,
    /// In a transaction block.
    Transaction,
    /// In a failed transaction block (queries will be rejected until block is ended).
    Failed,
}

impl TransactionStatus {
    pub fn as_byte(&self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::Transaction => b'T',
            TransactionStatus::Failed => b'E',
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            b'I' => Ok(TransactionStatus::Idle),
            b'T' => Ok(TransactionStatus::Transaction),
            b'E' => Ok(TransactionStatus::Failed),
            _ => Err(ProtocolError::malformed("unknown transaction status")),
        }
    }
}

/// Identifies the message type.
///
/// ReadyForQuery is sent whenever the backend is ready for a new query cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyForQuery {
    pub status: TransactionStatus,
}

impl ReadyForQuery {
    pub const IDLE: ReadyForQuery = ReadyForQuery { status: TransactionStatus::Idle };
}

impl PgMessage for ReadyForQuery {
    const MSGTYPE: u8 = b'Z';

    fn size_hint(&self) -> u32 {
        1
    }

    fn encode(&self, mut buf: impl BufMut) {
        buf.put_u8(self.status.as_byte());
    }

    fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        Ok(Self { status: TransactionStatus::from_byte(body.try_get_u8()?)? })
    }
}

/// Identifies the message as a Start Copy In response.
///
/// The frontend must now send copy-in data (if not prepared to do so, send a CopyFail message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyInResponse {
    /// [`Text`][PgFormat::Text] indicates the overall COPY format is textual
    /// (rows separated by newlines, columns separated by separator characters, etc.).
    pub format: PgFormat,
    /// The format codes to be used for each column.
    ///
    /// Each must presently be zero (text) if the overall copy format is textual.
    pub column_formats: Vec<PgFormat>,
}

impl CopyInResponse {
    /// Textual COPY of `column_count` columns.
    pub fn text(column_count: usize) -> Self {
        Self {
            format: PgFormat::Text,
            column_formats: vec![PgFormat::Text; column_count],
        }
    }
}

impl PgMessage for CopyInResponse {
    const MSGTYPE: u8 = b'G';

    fn size_hint(&self) -> u32 {
        // format + column count + format per column
        1 + 2 + 2 * self.column_formats.len().to_u32()
    }

    fn encode(&self, mut buf: impl BufMut) {
        buf.put_u8(self.format.format_code() as u8);
        buf.put_i16(self.column_formats.len().to_i16());
        for format in &self.column_formats {
            buf.put_u16(format.format_code());
        }
    }

    fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let format = PgFormat::from_code(body.try_get_u8()?.into())?;
        let len = body.try_get_i16()?;
        let mut column_formats = Vec::with_capacity(len.max(0) as usize);
        for _ in 0..len {
            column_formats.push(PgFormat::from_code(body.try_get_u16()?)?);
        }
        Ok(Self { format, column_formats })
    }
}

/// A single field in [`RowDescription`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescription {
    /// The field name.
    pub name: ByteStr,
    /// If the field can be identified as a column of a specific table,
    /// the object ID of the table; otherwise zero.
    pub table_oid: Oid,
    /// If the field can be identified as a column of a specific table,
    /// the attribute number of the column; otherwise zero.
    pub column_id: i16,
    /// The object ID of the field's data type.
    pub type_oid: Oid,
    /// The data type size (see pg_type.typlen).
    /// Note that negative values denote variable-width types.
    pub type_size: i16,
    /// The type modifier (see pg_attribute.atttypmod).
    pub type_modifier: i32,
    /// The format code being used for the field.
    pub format: PgFormat,
}

impl FieldDescription {
    fn size_hint(&self) -> u32 {
        self.name.nul_string_len()
            + size_of!(self.table_oid)
            + size_of!(self.column_id)
            + size_of!(self.type_oid)
            + size_of!(self.type_size)
            + size_of!(self.type_modifier)
            + 2
    }
}

/// Identifies the message as a row description.
#[derive(Debug, Clone, PartialEq)]
pub struct RowDescription {
    pub fields: Vec<FieldDescription>,
}

impl PgMessage for RowDescription {
    const MSGTYPE: u8 = b'T';

    fn size_hint(&self) -> u32 {
        2 + self.fields.iter().map(FieldDescription::size_hint).sum::<u32>()
    }

    fn encode(&self, mut buf: impl BufMut) {
        buf.put_i16(self.fields.len().to_i16());
        for field in &self.fields {
            buf.put_nul_string(&field.name);
            buf.put_u32(field.table_oid);
            buf.put_i16(field.column_id);
            buf.put_u32(field.type_oid);
            buf.put_i16(field.type_size);
            buf.put_i32(field.type_modifier);
            buf.put_u16(field.format.format_code());
        }
    }

    fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let len = body.try_get_i16()?;
        let mut fields = Vec::with_capacity(len.max(0) as usize);
        for _ in 0..len {
            fields.push(FieldDescription {
                name: body.get_nul_bytestr()?,
                table_oid: body.try_get_u32()?,
                column_id: body.try_get_i16()?,
                type_oid: body.try_get_u32()?,
                type_size: body.try_get_i16()?,
                type_modifier: body.try_get_i32()?,
                format: PgFormat::from_code(body.try_get_u16()?)?,
            });
        }
        Ok(Self { fields })
    }
}

/// Identifies the message as a data row.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRow {
    /// Column values in text format, [`None`] is sql NULL.
    pub values: Vec<Option<Bytes>>,
}

impl PgMessage for DataRow {
    const MSGTYPE: u8 = b'D';

    fn size_hint(&self) -> u32 {
        2 + self
            .values
            .iter()
            .map(|value| 4 + value.as_ref().map_or(0, |v| v.len().to_u32()))
            .sum::<u32>()
    }

    fn encode(&self, mut buf: impl BufMut) {
        buf.put_i16(self.values.len().to_i16());
        for value in &self.values {
            match value {
                // As a special case, -1 indicates a NULL column value.
                None => buf.put_i32(-1),
                Some(value) => {
                    buf.put_i32(value.len().to_u32() as i32);
                    buf.put_slice(value);
                }
            }
        }
    }

    fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let len = body.try_get_i16()?;
        let mut values = Vec::with_capacity(len.max(0) as usize);
        for _ in 0..len {
            let value = match body.try_get_i32()? {
                -1 => None,
                n if n < 0 => return Err(ProtocolError::malformed("negative column length")),
                n if n as usize > body.len() => return Err(ProtocolError::malformed("column value too short")),
                n => Some(body.split_to(n as usize)),
            };
            values.push(value);
        }
        Ok(Self { values })
    }
}

/// Identifies the message as a command-completed response.
///
/// For an INSERT command, the tag is `INSERT oid rows`, oid is always 0.
///
/// For a SELECT, UPDATE, DELETE, MERGE, MOVE, FETCH or COPY command, the tag is the verb
/// followed by the number of rows.
///
/// For other commands, the tag is the command name, such as `CREATE TABLE`.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandComplete {
    /// The command tag. This is usually a single word that identifies which SQL command was completed.
    pub tag: ByteStr,
}

impl PgMessage for CommandComplete {
    const MSGTYPE: u8 = b'C';

    fn size_hint(&self) -> u32 {
        self.tag.nul_string_len()
    }

    fn encode(&self, mut buf: impl BufMut) {
        buf.put_nul_string(&self.tag);
    }

    fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        Ok(Self { tag: body.get_nul_bytestr()? })
    }
}

unit_msg! {
    /// Identifies the message as a response to an empty query string.
    ///
    /// This substitutes for CommandComplete.
    struct EmptyQueryResponse, b'I';
}

/// Error severity sent in [`ErrorResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    /// The session is terminated after reporting.
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

/// Identifies the message as an error.
///
/// <https://www.postgresql.org/docs/current/protocol-error-fields.html>
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    pub severity: Severity,
    pub code: SqlState,
    /// The primary human-readable error message.
    pub message: ByteStr,
    /// An optional secondary error message carrying more detail about the problem.
    pub detail: Option<ByteStr>,
    /// An optional suggestion what to do about the problem.
    pub hint: Option<ByteStr>,
}

impl ErrorResponse {
    pub fn new(code: SqlState, message: impl Into<ByteStr>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
            detail: None,
            hint: None,
        }
    }

    pub fn fatal(code: SqlState, message: impl Into<ByteStr>) -> Self {
        Self { severity: Severity::Fatal, ..Self::new(code, message) }
    }

    pub fn detail(mut self, detail: impl Into<ByteStr>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn hint(mut self, hint: impl Into<ByteStr>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    fn fields(&self) -> impl Iterator<Item = (u8, &str)> {
        [
            (b'S', Some(self.severity.as_str())),
            (b'V', Some(self.severity.as_str())),
            (b'C', Some(self.code.code())),
            (b'M', Some(self.message.as_str())),
            (b'D', self.detail.as_deref()),
            (b'H', self.hint.as_deref()),
        ]
        .into_iter()
        .filter_map(|(ty, value)| Some((ty, value?)))
    }
}

impl PgMessage for ErrorResponse {
    const MSGTYPE: u8 = b'E';

    fn size_hint(&self) -> u32 {
        // field type + value, then the terminator
        self.fields().map(|(_, value)| 1 + value.nul_string_len()).sum::<u32>() + 1
    }

    fn encode(&self, mut buf: impl BufMut) {
        for (ty, value) in self.fields() {
            buf.put_u8(ty);
            buf.put_nul_string(value);
        }
        buf.put_u8(b'\0');
    }

    fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let mut severity = Severity::Error;
        let mut code = None;
        let mut message = None;
        let mut detail = None;
        let mut hint = None;

        loop {
            let ty = body.try_get_u8()?;
            if ty == b'\0' {
                break;
            }
            let value = body.get_nul_bytestr()?;
            match ty {
                b'V' | b'S' if value == "FATAL" => severity = Severity::Fatal,
                b'C' => code = Some(SqlState::from_code(value)),
                b'M' => message = Some(value),
                b'D' => detail = Some(value),
                b'H' => hint = Some(value),
                // frontends should silently ignore fields of unrecognized type
                _ => {}
            }
        }

        Ok(Self {
            severity,
            code: code.ok_or(ProtocolError::malformed("missing error code"))?,
            message: message.ok_or(ProtocolError::malformed("missing error message"))?,
            detail,
            hint,
        })
    }
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;

    use super::*;
    use crate::postgres::write;

    fn roundtrip<M: PgMessage + Into<BackendMessage>>(msg: M) -> (BytesMut, BackendMessage) {
        let mut buf = BytesMut::new();
        write(&msg, &mut buf);
        let frame = buf.clone();

        let msgtype = buf.get_u8();
        let len = buf.get_u32();
        assert_eq!(len, 4 + msg.size_hint());
        assert_eq!(len as usize, 4 + buf.len());

        let decoded = BackendMessage::decode(msgtype, buf.freeze()).unwrap();
        let expected: BackendMessage = msg.into();
        assert_eq!(decoded, expected);
        (frame, decoded)
    }

    #[test]
    fn copy_in_response_layout() {
        let (frame, _) = roundtrip(CopyInResponse::text(2));
        assert_eq!(&frame[..], &[b'G', 0, 0, 0, 11, 0, 0, 2, 0, 0, 0, 0]);

        for n in [0, 1, 7] {
            let msg = CopyInResponse::text(n);
            assert_eq!(crate::postgres::frame_len(&msg), 4 + 1 + 2 + 2 * n as u32);
        }
    }

    #[test]
    fn error_response_fields() {
        let msg = ErrorResponse::new(SqlState::QUERY_CANCELED, "COPY from stdin failed: aborted by user")
            .hint("retry the COPY");
        let (frame, decoded) = roundtrip(msg);

        assert!(frame.windows(6).any(|w| w == b"C57014"));
        let BackendMessage::ErrorResponse(err) = decoded else { unreachable!() };
        assert_eq!(err.message, "COPY from stdin failed: aborted by user");
        assert_eq!(err.detail, None);
        assert_eq!(err.severity, Severity::Error);

        let (_, decoded) = roundtrip(ErrorResponse::fatal(SqlState::PROTOCOL_VIOLATION, "bye"));
        assert_eq!(decoded.msgtype(), b'E');
    }

    #[test]
    fn data_row_null() {
        let msg = DataRow { values: vec![Some(Bytes::from_static(b"k1")), None] };
        let (frame, _) = roundtrip(msg);
        assert_eq!(&frame[5..], &[0, 2, 0, 0, 0, 2, b'k', b'1', 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn row_description() {
        roundtrip(RowDescription {
            fields: vec![FieldDescription {
                name: "key".into(),
                table_oid: 0,
                column_id: 0,
                type_oid: 25,
                type_size: -1,
                type_modifier: -1,
                format: PgFormat::Text,
            }],
        });
    }

    #[test]
    fn startup_responses() {
        roundtrip(AuthenticationOk);
        roundtrip(ParameterStatus::new("server_version", "16.0"));
        roundtrip(BackendKeyData { process_id: 7, secret_key: 42 });
        roundtrip(ReadyForQuery::IDLE);
        roundtrip(CommandComplete { tag: "COPY 2".into() });
        roundtrip(EmptyQueryResponse);
    }

    #[test]
    fn decode_errors_name_backend_messages() {
        let err = BackendMessage::decode(b'S', Bytes::from_static(b"server_version")).unwrap_err();
        assert!(err.to_string().starts_with("invalid `ParameterStatus` message: "), "{err}");

        let err = BackendMessage::decode(b'C', Bytes::from_static(b"COPY 2")).unwrap_err();
        assert!(err.to_string().starts_with("invalid `CommandComplete` message: "), "{err}");

        let err = BackendMessage::decode(b'Q', Bytes::new()).unwrap_err();
        assert_eq!(err.to_string(), "unknown message type `Q`");
    }
}
