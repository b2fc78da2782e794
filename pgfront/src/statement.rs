//! Statement lifecycle.
use crate::{
    backend::{Backend, Outcome, ResultSet},
    common::{ByteStr, verbose},
    error::StatementError,
};

/// Per session statement identifier, `s00001`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct StatementId([u8; 6]);

impl StatementId {
    fn new(id: u16) -> Self {
        let mut buf = [b's', b'0', b'0', b'0', b'0', b'0'];
        let len = buf.len();

        let mut b = itoa::Buffer::new();
        let id = b.format(id);
        let i = id.as_bytes();
        buf[len - i.len()..].copy_from_slice(i);

        Self(buf)
    }

    pub fn as_str(&self) -> &str {
        // SAFETY: constructed only from ascii digits
        unsafe { std::str::from_utf8_unchecked(&self.0[..]) }
    }
}

impl std::fmt::Display for StatementId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Debug for StatementId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("StatementId").field(&self.as_str()).finish()
    }
}

/// Statement id generator, one per session.
#[derive(Debug, Default)]
pub struct StatementIds {
    next: u16,
}

impl StatementIds {
    pub fn next(&mut self) -> StatementId {
        self.next = self.next.wrapping_add(1);
        StatementId::new(self.next)
    }
}

/// Statement execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    Created,
    Executed,
    Errored,
}

/// Statement execution result.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum StatementResult {
    #[default]
    None,
    UpdateCount(u64),
    ResultSet(ResultSet),
}

/// One client submitted command and its execution outcome.
#[derive(Debug)]
pub struct Statement {
    id: StatementId,
    sql: ByteStr,
    command: String,
    state: StatementState,
    result: StatementResult,
    error: Option<StatementError>,
}

impl Statement {
    pub fn new(id: StatementId, sql: ByteStr) -> Self {
        let command = sql
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .trim_end_matches(';')
            .to_ascii_uppercase();
        Self {
            id,
            sql,
            command,
            state: StatementState::Created,
            result: StatementResult::None,
            error: None,
        }
    }

    pub fn id(&self) -> StatementId {
        self.id
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The command verb, first whitespace delimited token in upper case.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn is_copy(&self) -> bool {
        self.command == "COPY"
    }

    /// Query string contains only whitespace and semicolons.
    pub fn is_empty(&self) -> bool {
        self.sql.trim_matches(|c: char| c.is_whitespace() || c == ';').is_empty()
    }

    pub fn state(&self) -> StatementState {
        self.state
    }

    pub fn result(&self) -> &StatementResult {
        &self.result
    }

    pub fn error(&self) -> Option<&StatementError> {
        self.error.as_ref()
    }

    /// Execute against the backend, capturing the outcome or the error.
    pub async fn execute<B: Backend>(&mut self, backend: &mut B) {
        verbose!(id = %self.id, sql = %self.sql, "execute");
        match backend.execute(&self.sql).await {
            Ok(Outcome::UpdateCount(n)) => self.executed(StatementResult::UpdateCount(n)),
            Ok(Outcome::Rows(rows)) => self.executed(StatementResult::ResultSet(rows)),
            Err(err) => self.fail(err.into()),
        }
    }

    pub(crate) fn executed(&mut self, result: StatementResult) {
        self.state = StatementState::Executed;
        self.result = result;
    }

    /// Transition to [`Errored`][StatementState::Errored], the first error is kept.
    pub fn fail(&mut self, error: StatementError) {
        self.state = StatementState::Errored;
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Transition to [`Errored`][StatementState::Errored], replacing any earlier error.
    pub(crate) fn abort(&mut self, error: StatementError) {
        self.state = StatementState::Errored;
        self.error = Some(error);
    }

    /// Number of rows reported in the command tag.
    pub fn row_count(&self) -> u64 {
        match &self.result {
            StatementResult::None => 0,
            StatementResult::UpdateCount(n) => *n,
            StatementResult::ResultSet(rows) => rows.rows.len() as u64,
        }
    }

    /// The `CommandComplete` tag for `rows` affected rows.
    pub fn command_tag(&self, rows: u64) -> ByteStr {
        let mut b = itoa::Buffer::new();
        let n = b.format(rows);
        let verb = self.command.as_str();

        let tag = match verb {
            "INSERT" => format!("INSERT 0 {n}"),
            "SELECT" | "UPDATE" | "DELETE" | "COPY" | "MOVE" | "FETCH" | "MERGE" => format!("{verb} {n}"),
            "CREATE" | "DROP" | "ALTER" => match self.sql.split_whitespace().nth(1) {
                Some(object) => format!("{verb} {}", object.to_ascii_uppercase()),
                None => verb.to_owned(),
            },
            _ => verb.to_owned(),
        };
        tag.into()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{backend::MemoryBackend, postgres::SqlState};

    fn stmt(sql: &'static str) -> Statement {
        Statement::new(StatementIds::default().next(), sql.into())
    }

    #[test]
    fn statement_id() {
        let mut ids = StatementIds::default();
        assert_eq!(ids.next().as_str(), "s00001");
        assert_eq!(ids.next().to_string(), "s00002");
    }

    #[test]
    fn command_verb() {
        assert_eq!(stmt("  select 1").command(), "SELECT");
        assert_eq!(stmt("copy keyvalue from stdin").command(), "COPY");
        assert!(stmt("COPY;").is_copy());
        assert!(stmt(" ; ").is_empty());
        assert_eq!(stmt("").command(), "");
    }

    #[test]
    fn command_tags() {
        assert_eq!(stmt("insert into t values (1)").command_tag(3), "INSERT 0 3");
        assert_eq!(stmt("COPY t FROM STDIN").command_tag(2), "COPY 2");
        assert_eq!(stmt("create table t (a int)").command_tag(0), "CREATE TABLE");
        assert_eq!(stmt("BEGIN").command_tag(0), "BEGIN");
    }

    #[tokio::test]
    async fn execute_lifecycle() {
        let mut backend = MemoryBackend::new();

        let mut s = stmt("SELECT 1");
        assert_eq!(s.state(), StatementState::Created);
        s.execute(&mut backend).await;
        assert_eq!(s.state(), StatementState::Executed);
        assert_eq!(s.row_count(), 1);
        assert_eq!(s.command_tag(s.row_count()), "SELECT 1");

        let mut s = stmt("VACUUM");
        s.execute(&mut backend).await;
        assert_eq!(s.state(), StatementState::Errored);
        assert_eq!(s.error().unwrap().code(), SqlState::FEATURE_NOT_SUPPORTED);
    }
}
