use crate::common::ByteStr;

/// Postgres error code, the five character `SQLSTATE`.
///
/// <https://www.postgresql.org/docs/current/errcodes-appendix.html>
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SqlState(ByteStr);

macro_rules! sqlstate {
    ($($(#[$doc:meta])* $name:ident = $code:literal;)*) => {
        impl SqlState {
            $(
                $(#[$doc])*
                pub const $name: SqlState = SqlState(ByteStr::from_static($code));
            )*
        }
    };
}

sqlstate! {
    /// `08P01`
    PROTOCOL_VIOLATION = "08P01";
    /// `0A000`
    FEATURE_NOT_SUPPORTED = "0A000";
    /// `22021`
    CHARACTER_NOT_IN_REPERTOIRE = "22021";
    /// `22023`
    INVALID_PARAMETER_VALUE = "22023";
    /// `22P04`
    BAD_COPY_FILE_FORMAT = "22P04";
    /// `23502`
    NOT_NULL_VIOLATION = "23502";
    /// `42601`
    SYNTAX_ERROR = "42601";
    /// `42701`
    DUPLICATE_COLUMN = "42701";
    /// `42703`
    UNDEFINED_COLUMN = "42703";
    /// `42P01`
    UNDEFINED_TABLE = "42P01";
    /// `57014`, also used for `COPY from stdin failed`
    QUERY_CANCELED = "57014";
    /// `XX000`
    INTERNAL_ERROR = "XX000";
}

impl SqlState {
    /// Create error code from a backend provided string.
    pub fn from_code(code: impl Into<ByteStr>) -> SqlState {
        SqlState(code.into())
    }

    /// Returns the five character code.
    pub fn code(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for SqlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl std::fmt::Debug for SqlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SqlState").field(&self.code()).finish()
    }
}
