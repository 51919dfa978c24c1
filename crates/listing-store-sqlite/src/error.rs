use std::path::PathBuf;

use listing_store_core::RecordError;
use rusqlite::{ffi, ErrorCode};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("failed to open sqlite database at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("column `{column}` is still undefined after schema repair")]
    UndefinedColumn { column: String },
    #[error("no row matches the identifier")]
    NotFound,
    #[error("identifier is not unique: {matches} rows match")]
    Ambiguous { matches: u64 },
    #[error("liveness check failed: {0}")]
    Liveness(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// `SQLite` reports a missing column as a generic error; only the message tells them apart.
#[must_use]
pub fn is_undefined_column(err: &rusqlite::Error) -> bool {
    undefined_column_name(err).is_some()
}

/// Name of the column a "no such column" / "has no column named" failure refers to.
#[must_use]
pub fn undefined_column_name(err: &rusqlite::Error) -> Option<String> {
    let (_, message) = failure(err)?;
    if let Some((_, column)) = message.split_once("no such column: ") {
        return Some(column.trim().to_string());
    }
    message
        .split_once("has no column named ")
        .map(|(_, column)| column.trim().to_string())
}

#[must_use]
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        failure(err),
        Some((code, _))
            if code.code == ErrorCode::ConstraintViolation
                && (code.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || code.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}

#[must_use]
pub fn is_duplicate_column(err: &rusqlite::Error) -> bool {
    matches!(failure(err), Some((_, message)) if message.contains("duplicate column name"))
}

fn failure(err: &rusqlite::Error) -> Option<(&ffi::Error, &str)> {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            Some((code, message.as_deref().unwrap_or_default()))
        }
        rusqlite::Error::SqlInputError { error, msg, .. } => Some((error, msg.as_str())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn conn() -> rusqlite::Result<Connection> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, url TEXT UNIQUE);")?;
        Ok(conn)
    }

    #[test]
    fn classifies_missing_columns_from_select_and_insert() -> rusqlite::Result<()> {
        let conn = conn()?;

        let select = conn.prepare("SELECT [rent] FROM [t] LIMIT 0").err();
        let select = select.ok_or(rusqlite::Error::InvalidQuery)?;
        assert_eq!(undefined_column_name(&select).as_deref(), Some("rent"));

        let insert = conn.execute("INSERT INTO [t] ([url], [rent]) VALUES (?1, ?2)", ("a", 1)).err();
        let insert = insert.ok_or(rusqlite::Error::InvalidQuery)?;
        assert_eq!(undefined_column_name(&insert).as_deref(), Some("rent"));
        assert!(!is_unique_violation(&insert));
        Ok(())
    }

    #[test]
    fn classifies_unique_violations_and_duplicate_columns() -> rusqlite::Result<()> {
        let conn = conn()?;
        conn.execute("INSERT INTO t (url) VALUES (?1)", ["a"])?;

        let duplicate = conn.execute("INSERT INTO t (url) VALUES (?1)", ["a"]).err();
        let duplicate = duplicate.ok_or(rusqlite::Error::InvalidQuery)?;
        assert!(is_unique_violation(&duplicate));
        assert!(!is_undefined_column(&duplicate));

        let column = conn.execute_batch("ALTER TABLE t ADD COLUMN url TEXT").err();
        let column = column.ok_or(rusqlite::Error::InvalidQuery)?;
        assert!(is_duplicate_column(&column));
        assert!(!is_undefined_column(&column));
        Ok(())
    }

    #[test]
    fn missing_table_is_not_a_missing_column() -> rusqlite::Result<()> {
        let conn = conn()?;
        let err = conn.prepare("SELECT [rent] FROM [nowhere]").err();
        let err = err.ok_or(rusqlite::Error::InvalidQuery)?;
        assert!(!is_undefined_column(&err));
        assert!(!is_unique_violation(&err));
        Ok(())
    }
}
