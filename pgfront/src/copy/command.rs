//! `COPY ... FROM STDIN` statement parsing.
//!
//! ```text
//! COPY [schema.]table [(column, ...)] FROM STDIN [[WITH] (option [value], ...)]
//! COPY [schema.]table [(column, ...)] FROM STDIN [[WITH] [BINARY] [DELIMITER [AS] 'c'] [NULL [AS] 'text'] [CSV]]
//! ```
use crate::{backend::TableName, common::ByteStr, postgres::SqlState};

/// Options of a textual COPY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOptions {
    /// Field separator, tab by default.
    pub delimiter: u8,
    /// The string that represents a null value, `\N` by default.
    pub null: String,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self { delimiter: b'\t', null: String::from("\\N") }
    }
}

/// A parsed `COPY ... FROM STDIN` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyCommand {
    pub table: TableName,
    /// Explicit column list, [`None`] means all columns in catalog order.
    pub columns: Option<Vec<ByteStr>>,
    pub options: CopyOptions,
}

/// COPY statement could not be parsed or is not supported.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct CopyParseError {
    pub code: SqlState,
    pub message: String,
}

impl CopyParseError {
    fn new(code: SqlState, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    fn syntax(near: impl std::fmt::Display) -> Self {
        Self::new(SqlState::SYNTAX_ERROR, format!("syntax error at or near \"{near}\""))
    }

    fn unsupported(message: impl Into<String>) -> Self {
        Self::new(SqlState::FEATURE_NOT_SUPPORTED, message)
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::new(SqlState::INVALID_PARAMETER_VALUE, message)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// Unquoted word, folded to lower case.
    Word(String),
    /// Double quoted identifier.
    Quoted(String),
    /// Single quoted string literal.
    Literal(String),
    Punct(char),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Word(w) => f.write_str(w),
            Token::Quoted(q) => write!(f, "\"{q}\""),
            Token::Literal(l) => write!(f, "'{l}'"),
            Token::Punct(p) => write!(f, "{p}"),
        }
    }
}

fn tokenize(sql: &str) -> Result<Vec<Token>, CopyParseError> {
    let mut tokens = vec![];
    let mut chars = sql.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            ch if ch.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | ',' | '.' | ';' => {
                chars.next();
                tokens.push(Token::Punct(ch));
            }
            '"' => {
                chars.next();
                let mut ident = String::new();
                loop {
                    match chars.next() {
                        Some('"') if chars.peek() == Some(&'"') => {
                            chars.next();
                            ident.push('"');
                        }
                        Some('"') => break,
                        Some(c) => ident.push(c),
                        None => {
                            return Err(CopyParseError::new(
                                SqlState::SYNTAX_ERROR,
                                "unterminated quoted identifier",
                            ));
                        }
                    }
                }
                tokens.push(Token::Quoted(ident));
            }
            '\'' => {
                chars.next();
                tokens.push(Token::Literal(literal(&mut chars, false)?));
            }
            ch if ch.is_alphanumeric() || ch == '_' => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if !(c.is_alphanumeric() || c == '_' || c == '$') {
                        break;
                    }
                    word.push(c.to_ascii_lowercase());
                    chars.next();
                }
                if word == "e" && chars.peek() == Some(&'\'') {
                    chars.next();
                    tokens.push(Token::Literal(literal(&mut chars, true)?));
                } else {
                    tokens.push(Token::Word(word));
                }
            }
            ch => return Err(CopyParseError::syntax(ch)),
        }
    }

    Ok(tokens)
}

/// Read a string literal after its opening quote.
fn literal(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    escapes: bool,
) -> Result<String, CopyParseError> {
    let mut value = String::new();
    loop {
        match chars.next() {
            Some('\'') if chars.peek() == Some(&'\'') => {
                chars.next();
                value.push('\'');
            }
            Some('\'') => return Ok(value),
            Some('\\') if escapes => match chars.next() {
                Some('n') => value.push('\n'),
                Some('r') => value.push('\r'),
                Some('t') => value.push('\t'),
                Some('b') => value.push('\x08'),
                Some('f') => value.push('\x0c'),
                Some(c) => value.push(c),
                None => break,
            },
            Some(c) => value.push(c),
            None => break,
        }
    }
    Err(CopyParseError::new(SqlState::SYNTAX_ERROR, "unterminated quoted string"))
}

struct Parser {
    tokens: std::vec::IntoIter<Token>,
    peeked: Option<Token>,
}

impl Parser {
    fn peek(&mut self) -> Option<&Token> {
        if self.peeked.is_none() {
            self.peeked = self.tokens.next();
        }
        self.peeked.as_ref()
    }

    fn next(&mut self) -> Option<Token> {
        self.peek();
        self.peeked.take()
    }

    fn unexpected(&mut self) -> CopyParseError {
        match self.next() {
            Some(token) => CopyParseError::syntax(token),
            None => CopyParseError::new(SqlState::SYNTAX_ERROR, "syntax error at end of input"),
        }
    }

    fn is_keyword(&mut self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w == keyword)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let found = self.is_keyword(keyword);
        if found {
            self.next();
        }
        found
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), CopyParseError> {
        match self.eat_keyword(keyword) {
            true => Ok(()),
            false => Err(self.unexpected()),
        }
    }

    fn eat_punct(&mut self, punct: char) -> bool {
        let found = self.peek() == Some(&Token::Punct(punct));
        if found {
            self.next();
        }
        found
    }

    fn expect_punct(&mut self, punct: char) -> Result<(), CopyParseError> {
        match self.eat_punct(punct) {
            true => Ok(()),
            false => Err(self.unexpected()),
        }
    }

    fn ident(&mut self) -> Result<ByteStr, CopyParseError> {
        match self.peek() {
            Some(Token::Word(_) | Token::Quoted(_)) => match self.next() {
                Some(Token::Word(ident) | Token::Quoted(ident)) => Ok(ident.into()),
                _ => Err(self.unexpected()),
            },
            _ => Err(self.unexpected()),
        }
    }

    fn string(&mut self) -> Result<String, CopyParseError> {
        match self.peek() {
            Some(Token::Literal(_)) => match self.next() {
                Some(Token::Literal(value)) => Ok(value),
                _ => Err(self.unexpected()),
            },
            _ => Err(self.unexpected()),
        }
    }

    /// Option value in the parenthesized form, an identifier or a literal.
    fn option_value(&mut self) -> Option<String> {
        match self.peek()? {
            Token::Word(_) | Token::Quoted(_) | Token::Literal(_) => match self.next()? {
                Token::Word(v) | Token::Quoted(v) | Token::Literal(v) => Some(v),
                Token::Punct(_) => None,
            },
            Token::Punct(_) => None,
        }
    }
}

#[derive(Default)]
struct OptionSet {
    format: Option<String>,
    delimiter: Option<String>,
    null: Option<String>,
    encoding: Option<String>,
}

impl OptionSet {
    fn set(&mut self, name: &str, value: Option<String>) -> Result<(), CopyParseError> {
        let slot = match name {
            "format" => &mut self.format,
            "delimiter" => &mut self.delimiter,
            "null" => &mut self.null,
            "encoding" => &mut self.encoding,
            "header" | "quote" | "escape" | "force_quote" | "force_not_null" | "force_null" => {
                return Err(CopyParseError::unsupported(format!(
                    "COPY option \"{name}\" is only available in CSV mode"
                )));
            }
            _ => {
                return Err(CopyParseError::new(
                    SqlState::SYNTAX_ERROR,
                    format!("option \"{name}\" not recognized"),
                ));
            }
        };
        if slot.is_some() {
            return Err(CopyParseError::new(SqlState::SYNTAX_ERROR, "conflicting or redundant options"));
        }
        let Some(value) = value else {
            return Err(CopyParseError::new(
                SqlState::SYNTAX_ERROR,
                format!("COPY option \"{name}\" requires a value"),
            ));
        };
        *slot = Some(value);
        Ok(())
    }

    fn build(self) -> Result<CopyOptions, CopyParseError> {
        let mut options = CopyOptions::default();

        if let Some(format) = self.format {
            match format.to_ascii_lowercase().as_str() {
                "text" => {}
                "csv" | "binary" => {
                    return Err(CopyParseError::unsupported(format!(
                        "COPY format \"{format}\" is not supported, only text"
                    )));
                }
                _ => {
                    return Err(CopyParseError::invalid(format!("COPY format \"{format}\" not recognized")));
                }
            }
        }

        if let Some(delimiter) = self.delimiter {
            let &[byte] = delimiter.as_bytes() else {
                return Err(CopyParseError::unsupported("COPY delimiter must be a single one-byte character"));
            };
            match byte {
                b'\n' | b'\r' => {
                    return Err(CopyParseError::invalid("COPY delimiter cannot be newline or carriage return"));
                }
                // backslash escapes and the end marker use these
                b'\\' | b'.' | b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' => {
                    return Err(CopyParseError::invalid(format!(
                        "COPY delimiter cannot be \"{}\"",
                        byte.escape_ascii(),
                    )));
                }
                _ => options.delimiter = byte,
            }
        }

        if let Some(null) = self.null {
            if null.contains(['\n', '\r']) {
                return Err(CopyParseError::invalid(
                    "COPY null representation cannot use newline or carriage return",
                ));
            }
            options.null = null;
        }

        if options.null.as_bytes().contains(&options.delimiter) {
            return Err(CopyParseError::invalid(
                "COPY delimiter character must not appear in the NULL specification",
            ));
        }

        if let Some(encoding) = self.encoding {
            let normalized = encoding.to_ascii_lowercase().replace(['-', '_'], "");
            if !matches!(normalized.as_str(), "utf8" | "unicode") {
                return Err(CopyParseError::unsupported(format!(
                    "COPY encoding \"{encoding}\" is not supported, only UTF8"
                )));
            }
        }

        Ok(options)
    }
}

impl CopyCommand {
    /// Parse a `COPY ... FROM STDIN` statement.
    pub fn parse(sql: &str) -> Result<CopyCommand, CopyParseError> {
        let mut p = Parser { tokens: tokenize(sql)?.into_iter(), peeked: None };

        p.expect_keyword("copy")?;

        if p.is_keyword("binary") {
            return Err(CopyParseError::unsupported("COPY format \"binary\" is not supported, only text"));
        }
        if p.peek() == Some(&Token::Punct('(')) {
            return Err(CopyParseError::unsupported("COPY from a query is not supported"));
        }

        let first = p.ident()?;
        let table = match p.eat_punct('.') {
            true => TableName { schema: Some(first), name: p.ident()? },
            false => TableName { schema: None, name: first },
        };

        let columns = match p.eat_punct('(') {
            true => {
                let mut columns = vec![p.ident()?];
                while p.eat_punct(',') {
                    columns.push(p.ident()?);
                }
                p.expect_punct(')')?;
                Some(columns)
            }
            false => None,
        };

        if p.is_keyword("to") {
            return Err(CopyParseError::unsupported("COPY TO is not supported, only COPY FROM STDIN"));
        }
        p.expect_keyword("from")?;

        match p.peek() {
            Some(Token::Word(w)) if w == "stdin" => {
                p.next();
            }
            Some(Token::Literal(_)) => {
                return Err(CopyParseError::unsupported("COPY from a file is not supported, only COPY FROM STDIN"));
            }
            Some(Token::Word(w)) if w == "program" => {
                return Err(CopyParseError::unsupported("COPY from a program is not supported, only COPY FROM STDIN"));
            }
            _ => return Err(p.unexpected()),
        }

        let mut set = OptionSet::default();
        p.eat_keyword("with");

        if p.eat_punct('(') {
            loop {
                let Some(Token::Word(name)) = p.next() else {
                    return Err(CopyParseError::new(SqlState::SYNTAX_ERROR, "expected COPY option name"));
                };
                let value = p.option_value();
                set.set(&name, value)?;
                if p.eat_punct(')') {
                    break;
                }
                p.expect_punct(',')?;
            }
        } else {
            loop {
                if p.eat_keyword("binary") {
                    set.set("format", Some("binary".into()))?;
                } else if p.eat_keyword("csv") {
                    set.set("format", Some("csv".into()))?;
                } else if p.eat_keyword("delimiter") {
                    p.eat_keyword("as");
                    set.set("delimiter", Some(p.string()?))?;
                } else if p.eat_keyword("null") {
                    p.eat_keyword("as");
                    set.set("null", Some(p.string()?))?;
                } else {
                    break;
                }
            }
        }

        p.eat_punct(';');
        if p.peek().is_some() {
            return Err(p.unexpected());
        }

        Ok(CopyCommand { table, columns, options: set.build()? })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_plain() {
        let cmd = CopyCommand::parse("COPY keyvalue FROM STDIN;").unwrap();
        assert_eq!(cmd.table, TableName::new("keyvalue"));
        assert_eq!(cmd.columns, None);
        assert_eq!(cmd.options, CopyOptions::default());
    }

    #[test]
    fn parse_qualified_columns_options() {
        let cmd = CopyCommand::parse(
            r#"copy Public."Key Value" (key, "Value") from stdin with (format text, delimiter ',', null 'NULL')"#,
        )
        .unwrap();
        assert_eq!(cmd.table, TableName::with_schema("public", "Key Value"));
        assert_eq!(cmd.columns.unwrap(), ["key", "Value"]);
        assert_eq!(cmd.options.delimiter, b',');
        assert_eq!(cmd.options.null, "NULL");
    }

    #[test]
    fn parse_legacy_options() {
        let cmd = CopyCommand::parse(r"COPY t FROM STDIN DELIMITER AS '|' NULL AS E'\\0'").unwrap();
        assert_eq!(cmd.options.delimiter, b'|');
        assert_eq!(cmd.options.null, "\\0");

        let cmd = CopyCommand::parse("COPY t FROM STDIN WITH NULL ''").unwrap();
        assert_eq!(cmd.options.null, "");
    }

    #[test]
    fn parse_unsupported() {
        let code = |sql| CopyCommand::parse(sql).unwrap_err().code;

        assert_eq!(code("COPY t TO STDOUT"), SqlState::FEATURE_NOT_SUPPORTED);
        assert_eq!(code("COPY t FROM '/tmp/data'"), SqlState::FEATURE_NOT_SUPPORTED);
        assert_eq!(code("COPY t FROM STDIN (FORMAT csv)"), SqlState::FEATURE_NOT_SUPPORTED);
        assert_eq!(code("COPY t FROM STDIN CSV"), SqlState::FEATURE_NOT_SUPPORTED);
        assert_eq!(code("COPY (SELECT 1) TO STDOUT"), SqlState::FEATURE_NOT_SUPPORTED);
        assert_eq!(code("COPY t FROM STDIN (ENCODING 'LATIN1')"), SqlState::FEATURE_NOT_SUPPORTED);
        assert_eq!(code("COPY t FROM STDIN (DELIMITER 'ab')"), SqlState::FEATURE_NOT_SUPPORTED);
    }

    #[test]
    fn parse_invalid() {
        let err = CopyCommand::parse("COPY t FROM STDIN (DELIMITER E'\\n')").unwrap_err();
        assert_eq!(err.code, SqlState::INVALID_PARAMETER_VALUE);

        let err = CopyCommand::parse("COPY t FROM STDIN (DELIMITER ',', DELIMITER ';')").unwrap_err();
        assert_eq!(err.message, "conflicting or redundant options");

        let err = CopyCommand::parse("COPY t (a,) FROM STDIN").unwrap_err();
        assert_eq!(err.to_string(), "syntax error at or near \")\"");

        let err = CopyCommand::parse("COPY t FROM").unwrap_err();
        assert_eq!(err.to_string(), "syntax error at end of input");

        let err = CopyCommand::parse("COPY t FROM STDIN (FOO 1)").unwrap_err();
        assert_eq!(err.to_string(), "option \"foo\" not recognized");

        assert!(CopyCommand::parse("COPY \"t FROM STDIN").is_err());

        for delimiter in ["x", "X", "n", "7", ".", "\\\\"] {
            let sql = format!("COPY t FROM STDIN DELIMITER E'{delimiter}'");
            let err = CopyCommand::parse(&sql).unwrap_err();
            assert_eq!(err.code, SqlState::INVALID_PARAMETER_VALUE, "{sql}");
        }
        let err = CopyCommand::parse("COPY t FROM STDIN DELIMITER 'x'").unwrap_err();
        assert_eq!(err.message, "COPY delimiter cannot be \"x\"");
        assert!(CopyCommand::parse("COPY t FROM STDIN DELIMITER '|'").is_ok());
    }
}
