//! COPY TEXT format decoding.
//!
//! Each record is one line, fields are separated by the delimiter character. Backslash
//! introduces an escape:
//!
//! | escape         | value                        |
//! |----------------|------------------------------|
//! | `\b`           | backspace                    |
//! | `\f`           | form feed                    |
//! | `\n`           | newline                      |
//! | `\r`           | carriage return              |
//! | `\t`           | tab                          |
//! | `\v`           | vertical tab                 |
//! | `\digits`      | one to three octal digits    |
//! | `\xdigits`     | one or two hex digits        |
//! | `\` other      | the character itself         |
//!
//! A field equal to the null string, before unescaping, is sql NULL. A line holding only
//! `\.` marks the end of data.
//!
//! <https://www.postgresql.org/docs/current/sql-copy.html#id-1.9.3.55.9.2>
use bytes::BytesMut;

use super::CopyOptions;
use crate::{common::ByteStr, config::DEFAULT_MAX_MESSAGE_LEN, postgres::SqlState};

/// One decoded record, [`None`] is sql NULL.
pub type Record = Vec<Option<String>>;

/// Malformed record in a COPY data stream.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}")]
pub struct RowFormatError {
    /// 1-based line number within the COPY stream.
    pub line: u64,
    pub kind: RowFormatKind,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RowFormatKind {
    #[error("missing data for column \"{0}\"")]
    MissingData(ByteStr),
    #[error("extra data after last expected column")]
    ExtraData,
    #[error("invalid byte sequence for encoding \"UTF8\"")]
    InvalidUtf8,
    #[error("literal carriage return found in data")]
    CarriageReturn,
    #[error("line is longer than {max} bytes")]
    LineTooLong { max: usize },
}

impl RowFormatError {
    pub fn code(&self) -> SqlState {
        match self.kind {
            RowFormatKind::InvalidUtf8 => SqlState::CHARACTER_NOT_IN_REPERTOIRE,
            _ => SqlState::BAD_COPY_FILE_FORMAT,
        }
    }
}

/// Incremental COPY TEXT parser.
///
/// CopyData messages may split the stream anywhere, a partial line is carried over
/// to the next [`feed`][RowParser::feed].
#[derive(Debug)]
pub struct RowParser {
    options: CopyOptions,
    columns: Vec<ByteStr>,
    pending: BytesMut,
    /// Bytes of `pending` known to hold no line terminator.
    scanned: usize,
    max_line_len: usize,
    line: u64,
    finished: bool,
}

impl RowParser {
    pub fn new(options: CopyOptions, columns: Vec<ByteStr>) -> Self {
        Self {
            options,
            columns,
            pending: BytesMut::new(),
            scanned: 0,
            max_line_len: DEFAULT_MAX_MESSAGE_LEN as usize,
            line: 0,
            finished: false,
        }
    }

    /// Set the longest line that may be carried over between chunks.
    pub fn with_max_line_len(mut self, len: usize) -> Self {
        self.max_line_len = len;
        self
    }

    pub fn columns(&self) -> &[ByteStr] {
        &self.columns
    }

    /// Number of lines consumed so far.
    pub fn line(&self) -> u64 {
        self.line
    }

    /// The end-of-data marker was seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decode every complete line in `chunk` and the carried over data.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Record>, RowFormatError> {
        if self.finished {
            return Ok(vec![]);
        }
        self.pending.extend_from_slice(chunk);

        let mut records = vec![];
        while let Some(pos) = self.pending[self.scanned..].iter().position(|&b| b == b'\n') {
            let end = self.scanned + pos;
            self.scanned = 0;
            let raw = self.pending.split_to(end + 1);
            if let Some(record) = self.decode_line(&raw[..end])? {
                records.push(record);
            }
            if self.finished {
                self.pending.clear();
                break;
            }
        }
        self.scanned = self.pending.len();

        if self.pending.len() > self.max_line_len {
            return Err(RowFormatError {
                line: self.line + 1,
                kind: RowFormatKind::LineTooLong { max: self.max_line_len },
            });
        }
        Ok(records)
    }

    /// Decode the final line that has no line terminator.
    pub fn finish(&mut self) -> Result<Option<Record>, RowFormatError> {
        if self.finished || self.pending.is_empty() {
            return Ok(None);
        }
        let raw = self.pending.split();
        self.scanned = 0;
        self.decode_line(&raw)
    }

    fn decode_line(&mut self, mut line: &[u8]) -> Result<Option<Record>, RowFormatError> {
        self.line += 1;
        if let [rest @ .., b'\r'] = line {
            line = rest;
        }
        if line == b"\\." {
            self.finished = true;
            return Ok(None);
        }
        if line.contains(&b'\r') {
            return Err(RowFormatError { line: self.line, kind: RowFormatKind::CarriageReturn });
        }
        self.record(line).map(Some)
    }

    fn record(&self, line: &[u8]) -> Result<Record, RowFormatError> {
        let error = |kind| RowFormatError { line: self.line, kind };
        let delimiter = self.options.delimiter;

        let mut fields = Vec::with_capacity(self.columns.len());
        let mut start = 0;
        let mut i = 0;
        while i < line.len() {
            match line[i] {
                b'\\' => i += 2,
                b if b == delimiter => {
                    fields.push(&line[start..i]);
                    i += 1;
                    start = i;
                }
                _ => i += 1,
            }
        }
        fields.push(&line[start..]);

        if fields.len() > self.columns.len() {
            return Err(error(RowFormatKind::ExtraData));
        }
        if let Some(column) = self.columns.get(fields.len()) {
            return Err(error(RowFormatKind::MissingData(column.clone())));
        }

        fields
            .into_iter()
            .map(|raw| match raw == self.options.null.as_bytes() {
                true => Ok(None),
                false => match String::from_utf8(unescape(raw)) {
                    Ok(value) if !value.contains('\0') => Ok(Some(value)),
                    _ => Err(error(RowFormatKind::InvalidUtf8)),
                },
            })
            .collect()
    }
}

fn unescape(raw: &[u8]) -> Vec<u8> {
    if !raw.contains(&b'\\') {
        return raw.to_vec();
    }

    let mut out = Vec::with_capacity(raw.len());
    let mut iter = raw.iter().copied().peekable();

    while let Some(b) = iter.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        let Some(c) = iter.next() else {
            // lone trailing backslash
            out.push(b'\\');
            break;
        };
        match c {
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'0'..=b'7' => {
                let mut value = u32::from(c - b'0');
                for _ in 0..2 {
                    match iter.peek() {
                        Some(&d) if (b'0'..=b'7').contains(&d) => {
                            value = value * 8 + u32::from(d - b'0');
                            iter.next();
                        }
                        _ => break,
                    }
                }
                out.push((value & 0xff) as u8);
            }
            b'x' if iter.peek().is_some_and(u8::is_ascii_hexdigit) => {
                let mut value = 0u8;
                for _ in 0..2 {
                    match iter.peek().and_then(|d| (*d as char).to_digit(16)) {
                        Some(d) => {
                            value = value * 16 + d as u8;
                            iter.next();
                        }
                        None => break,
                    }
                }
                out.push(value);
            }
            other => out.push(other),
        }
    }

    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn parser(columns: &[&'static str]) -> RowParser {
        RowParser::new(CopyOptions::default(), columns.iter().map(|&c| c.into()).collect())
    }

    fn some(values: &[&str]) -> Record {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    #[test]
    fn two_records() {
        let mut p = parser(&["key", "value"]);
        let records = p.feed(b"k1\tv1\nk2\tv2\n").unwrap();
        assert_eq!(records, vec![some(&["k1", "v1"]), some(&["k2", "v2"])]);
        assert_eq!(p.line(), 2);
        assert_eq!(p.finish().unwrap(), None);
    }

    #[test]
    fn carry_over_partial_line() {
        let mut p = parser(&["key", "value"]);
        assert!(p.feed(b"k1\tv").unwrap().is_empty());
        assert_eq!(p.feed(b"1\r\nk2").unwrap(), vec![some(&["k1", "v1"])]);
        assert_eq!(p.feed(b"\tv2").unwrap(), Vec::<Record>::new());
        assert_eq!(p.finish().unwrap(), Some(some(&["k2", "v2"])));
    }

    #[test]
    fn field_count() {
        let mut p = parser(&["key", "value"]);
        let err = p.feed(b"k1\n").unwrap_err();
        assert_eq!(err, RowFormatError { line: 1, kind: RowFormatKind::MissingData("value".into()) });
        assert_eq!(err.to_string(), "missing data for column \"value\"");
        assert_eq!(err.code(), SqlState::BAD_COPY_FILE_FORMAT);

        let mut p = parser(&["key", "value"]);
        let err = p.feed(b"k1\tv1\nk2\tv2\tv3\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.kind, RowFormatKind::ExtraData);

        // trailing delimiter is an empty last field
        let mut p = parser(&["key", "value"]);
        assert_eq!(p.feed(b"k1\t\n").unwrap(), vec![some(&["k1", ""])]);
    }

    #[test]
    fn null_and_escapes() {
        let mut p = parser(&["a", "b", "c", "d"]);
        let records = p.feed(b"\\N\ta\\tb\\\\c\t\\101\\x42\\q\tx\\\ty\n").unwrap();
        assert_eq!(
            records,
            vec![vec![
                None,
                Some("a\tb\\c".to_owned()),
                Some("ABq".to_owned()),
                Some("x\ty".to_owned()),
            ]]
        );

        // escaped null marker is data
        let mut p = parser(&["a"]);
        assert_eq!(p.feed(b"\\\\N\n").unwrap(), vec![some(&["\\N"])]);
    }

    #[test]
    fn custom_options() {
        let options = CopyOptions { delimiter: b',', null: String::new() };
        let mut p = RowParser::new(options, vec!["a".into(), "b".into()]);
        assert_eq!(p.feed(b"x,\n,y\n").unwrap(), vec![
            vec![Some("x".to_owned()), None],
            vec![None, Some("y".to_owned())],
        ]);
    }

    #[test]
    fn end_of_data() {
        let mut p = parser(&["a"]);
        assert_eq!(p.feed(b"1\n\\.\n2\n").unwrap(), vec![some(&["1"])]);
        assert!(p.is_finished());
        assert!(p.feed(b"3\n").unwrap().is_empty());
        assert_eq!(p.finish().unwrap(), None);

        let mut p = parser(&["a"]);
        p.feed(b"1\n\\.").unwrap();
        assert_eq!(p.finish().unwrap(), None);
        assert!(p.is_finished());
    }

    #[test]
    fn invalid_utf8() {
        let mut p = parser(&["a"]);
        let err = p.feed(b"\\xff\n").unwrap_err();
        assert_eq!(err.code(), SqlState::CHARACTER_NOT_IN_REPERTOIRE);

        let mut p = parser(&["a"]);
        assert!(p.feed(b"\xc3\x28\n").is_err());
        assert!(parser(&["a"]).feed(b"\\0\n").is_err());
    }

    #[test]
    fn carriage_return() {
        let mut p = parser(&["a", "b"]);
        assert_eq!(p.feed(b"x\\ry\tz\r\n").unwrap(), vec![some(&["x\ry", "z"])]);

        let err = p.feed(b"x\ry\tz\n").unwrap_err();
        assert_eq!(err, RowFormatError { line: 2, kind: RowFormatKind::CarriageReturn });
        assert_eq!(err.to_string(), "literal carriage return found in data");
        assert_eq!(err.code(), SqlState::BAD_COPY_FILE_FORMAT);
    }

    #[test]
    fn line_split_in_small_chunks() {
        let mut p = parser(&["key", "value"]).with_max_line_len(16);
        for chunk in [&b"k"[..], b"1", b"\t", b"v", b"1"] {
            assert!(p.feed(chunk).unwrap().is_empty());
        }
        assert_eq!(p.feed(b"\nk2\tv2\n").unwrap(), vec![some(&["k1", "v1"]), some(&["k2", "v2"])]);

        assert!(p.feed(b"0123456789abcdef").unwrap().is_empty());
        let err = p.feed(b"g").unwrap_err();
        assert_eq!(err, RowFormatError { line: 3, kind: RowFormatKind::LineTooLong { max: 16 } });
    }
}
