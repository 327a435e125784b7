//! Safe, read-only SQL query gate.
//!
//! Every candidate query passes a validation pipeline that enforces
//! SELECT-only execution, blocks write/DDL keywords, and rejects injection
//! patterns before any statement reaches the database. The connection itself
//! is opened read-only, so the validator is defense in depth rather than the
//! sole safety boundary.

use std::sync::Mutex;

use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Failure modes of the query gate. Both are caller-recoverable: the engine
/// folds them back into the conversation as tool-result failures so the model
/// can retry with corrected SQL.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Static validation failed before execution.
    #[error("{reason}")]
    Rejected { reason: String },

    /// A validated query was rejected by the database engine (syntax error,
    /// unknown column, etc.).
    #[error("Query execution failed: {reason}")]
    ExecutionFailed { reason: String },
}

// ─── Gate ────────────────────────────────────────────────────────────────────

/// Write/DDL keywords that must never appear in a query.
/// Matched with word boundaries to avoid false positives on column names.
const BLOCKED_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "ATTACH", "DETACH", "PRAGMA",
    "GRANT", "REVOKE",
];

/// A single result row, column values in SELECT order.
pub type Row = Vec<serde_json::Value>;

/// Validates and executes read-only SQL against a read-only SQLite connection.
pub struct SafeQueryGate {
    conn: Mutex<Connection>,
}

impl SafeQueryGate {
    /// Open the tracking database read-only.
    pub fn open(path: &str) -> Result<Self, QueryError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| QueryError::ExecutionFailed {
            reason: format!("failed to open database at {path}: {e}"),
        })?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Wrap an existing connection. The caller is responsible for opening it
    /// read-only; validation still applies either way.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Validate and execute a read-only SQL query, returning all result rows.
    ///
    /// A single trailing `;` is stripped before validation (model output
    /// commonly includes one). First validation failure wins; nothing is
    /// executed unless every check passes.
    pub fn execute(&self, query: &str) -> Result<Vec<Row>, QueryError> {
        let mut normalized = query.trim();
        if let Some(stripped) = normalized.strip_suffix(';') {
            normalized = stripped.trim_end();
        }
        validate_query(normalized)?;
        self.run_query(normalized)
    }

    fn run_query(&self, safe_query: &str) -> Result<Vec<Row>, QueryError> {
        let conn = self.conn.lock().map_err(|_| QueryError::ExecutionFailed {
            reason: "database connection lock poisoned".to_string(),
        })?;

        let mut stmt = conn
            .prepare(safe_query)
            .map_err(|e| QueryError::ExecutionFailed {
                reason: e.to_string(),
            })?;
        let column_count = stmt.column_count();

        let rows = stmt
            .query_map([], |row| {
                let mut values = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    values.push(value_to_json(row.get_ref(i)?));
                }
                Ok(values)
            })
            .map_err(|e| QueryError::ExecutionFailed {
                reason: e.to_string(),
            })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| QueryError::ExecutionFailed {
                reason: e.to_string(),
            })?);
        }
        Ok(results)
    }
}

// ─── Validation ──────────────────────────────────────────────────────────────

/// Run the validation pipeline. First failure wins.
fn validate_query(query: &str) -> Result<(), QueryError> {
    let stripped = query.trim();

    // 1. Non-empty check
    if stripped.is_empty() {
        return Err(rejected("Query must not be empty or whitespace-only."));
    }

    // 2. SELECT-only check
    if !stripped
        .get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("SELECT"))
    {
        let first_word = stripped.split_whitespace().next().unwrap_or_default();
        return Err(rejected(&format!(
            "Only SELECT queries are allowed. Received query starting with: '{first_word}'"
        )));
    }

    // 3. No statement stacking (semicolons)
    if stripped.contains(';') {
        return Err(rejected(
            "Query must not contain semicolons. Multiple statements are not allowed.",
        ));
    }

    // 4. Block write/DDL keywords
    if let Some(keyword) = find_blocked_keyword(stripped) {
        return Err(rejected(&format!(
            "Query contains a blocked keyword: '{keyword}'. \
             Only read-only SELECT queries are permitted."
        )));
    }

    // 5. Block inline comments
    if stripped.contains("--") || stripped.contains("/*") {
        return Err(rejected(
            "Query must not contain SQL comments (-- or /*). \
             These are not allowed for security reasons.",
        ));
    }

    Ok(())
}

fn rejected(reason: &str) -> QueryError {
    QueryError::Rejected {
        reason: reason.to_string(),
    }
}

/// Scan for a denylisted keyword as a whole word, case-insensitive.
/// Returns the keyword as it appeared in the query.
fn find_blocked_keyword(query: &str) -> Option<&str> {
    let is_word_char = |c: char| c.is_alphanumeric() || c == '_';

    let mut rest = query;
    let mut offset = 0;
    while let Some(start_rel) = rest.find(is_word_char) {
        let start = offset + start_rel;
        let after = &query[start..];
        let end_rel = after.find(|c| !is_word_char(c)).unwrap_or(after.len());
        let word = &after[..end_rel];
        if BLOCKED_KEYWORDS
            .iter()
            .any(|kw| word.eq_ignore_ascii_case(kw))
        {
            return Some(word);
        }
        offset = start + end_rel;
        rest = &query[offset..];
    }
    None
}

/// Map a SQLite value to JSON. BLOBs are decoded as lossy UTF-8 rather than
/// failing the row (the tracking schema has no blob columns, but the gate
/// must not panic on unexpected data).
fn value_to_json(value: rusqlite::types::ValueRef<'_>) -> serde_json::Value {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(t) => serde_json::Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::from(String::from_utf8_lossy(b).into_owned()),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_gate() -> SafeQueryGate {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE entities (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                type TEXT NOT NULL
            );
            INSERT INTO entities (name, type) VALUES
                ('Ada', 'employee'),
                ('Grace', 'employee'),
                ('Forklift 3', 'asset');
            ",
        )
        .unwrap();
        SafeQueryGate::from_connection(conn)
    }

    #[test]
    fn test_select_returns_rows() {
        let gate = test_gate();
        let rows = gate
            .execute("SELECT COUNT(*) FROM entities WHERE type = 'employee'")
            .unwrap();
        assert_eq!(rows, vec![vec![serde_json::json!(2)]]);
    }

    #[test]
    fn test_trailing_semicolon_stripped() {
        let gate = test_gate();
        let rows = gate.execute("SELECT name FROM entities ORDER BY id;").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0], serde_json::json!("Ada"));
    }

    #[test]
    fn test_empty_query_rejected() {
        let gate = test_gate();
        let err = gate.execute("   ").unwrap_err();
        assert!(matches!(err, QueryError::Rejected { .. }));
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_non_select_rejected() {
        let gate = test_gate();
        let err = gate
            .execute("INSERT INTO entities (name, type) VALUES ('x', 'y')")
            .unwrap_err();
        assert!(matches!(err, QueryError::Rejected { .. }));
        assert!(err.to_string().contains("Only SELECT"));
        assert!(err.to_string().contains("INSERT"));
    }

    #[test]
    fn test_lowercase_select_allowed() {
        let gate = test_gate();
        let rows = gate.execute("select id from entities where name = 'Ada'").unwrap();
        assert_eq!(rows, vec![vec![serde_json::json!(1)]]);
    }

    #[test]
    fn test_stacked_statements_rejected() {
        let gate = test_gate();
        let err = gate
            .execute("SELECT * FROM entities; DROP TABLE entities")
            .unwrap_err();
        assert!(err.to_string().contains("semicolons"));
    }

    #[test]
    fn test_blocked_keyword_in_subquery_rejected() {
        let gate = test_gate();
        let err = gate
            .execute("SELECT name FROM entities WHERE name IN (SELECT DELETE FROM x)")
            .unwrap_err();
        assert!(err.to_string().contains("blocked keyword"));
        assert!(err.to_string().contains("DELETE"));
    }

    #[test]
    fn test_blocked_keyword_case_insensitive() {
        let gate = test_gate();
        let err = gate.execute("SELECT * FROM entities wHeRe DrOp = 1").unwrap_err();
        assert!(err.to_string().contains("'DrOp'"));
    }

    #[test]
    fn test_keyword_as_substring_allowed() {
        // "created_at" contains CREATE but is not a whole-word match
        let gate = test_gate();
        let result = gate.execute("SELECT id AS created_at_like FROM entities");
        assert!(result.is_ok());
    }

    #[test]
    fn test_comment_markers_rejected() {
        let gate = test_gate();
        let err = gate.execute("SELECT * FROM entities -- sneaky").unwrap_err();
        assert!(err.to_string().contains("comments"));

        let err = gate.execute("SELECT /* hidden */ * FROM entities").unwrap_err();
        assert!(err.to_string().contains("comments"));
    }

    #[test]
    fn test_pragma_rejected_before_execution() {
        let gate = test_gate();
        let err = gate.execute("PRAGMA table_info(entities)").unwrap_err();
        // Fails the SELECT-prefix check first
        assert!(err.to_string().contains("Only SELECT"));
    }

    #[test]
    fn test_engine_error_is_execution_failed() {
        let gate = test_gate();
        let err = gate.execute("SELECT nonexistent_column FROM entities").unwrap_err();
        assert!(matches!(err, QueryError::ExecutionFailed { .. }));
    }

    #[test]
    fn test_null_values_map_to_json_null() {
        let gate = test_gate();
        let rows = gate.execute("SELECT NULL, 1.5, 'txt'").unwrap();
        assert_eq!(
            rows,
            vec![vec![
                serde_json::Value::Null,
                serde_json::json!(1.5),
                serde_json::json!("txt")
            ]]
        );
    }

    #[test]
    fn test_read_only_connection_refuses_writes() {
        // Defense in depth: even a query that slipped past validation would
        // hit a read-only connection.
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);")
                .unwrap();
        }

        let gate = SafeQueryGate::open(&path).unwrap();
        let rows = gate.execute("SELECT x FROM t").unwrap();
        assert_eq!(rows, vec![vec![serde_json::json!(1)]]);

        let conn = gate.conn.lock().unwrap();
        let write = conn.execute("INSERT INTO t VALUES (2)", []);
        assert!(write.is_err(), "read-only connection must refuse writes");
    }
}
