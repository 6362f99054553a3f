use crate::backup::dump::preview;
use crate::backup::dump::repair::{cast_blob_as_text, convert_using_utf8};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

/// The database a dump is replayed into.
///
/// Connection setup (which database, which credentials) happens before the
/// replay starts; the replay engine only drives statements and the
/// transaction around them.
pub trait Database {
    fn begin_transaction(&mut self) -> Result<()>;

    fn execute_non_query(&mut self, statement: &str) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    fn set_foreign_key_checks(&mut self, enabled: bool) -> Result<()>;

    /// Writes raw text bytes back as a literal of this SQL dialect. Used when
    /// a broken `REPLACE INTO` is rewritten.
    fn render_text_literal(&self, bytes: &[u8]) -> String {
        convert_using_utf8(bytes)
    }
}

pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self::new(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Connection::open_in_memory()?))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Database for SqliteDatabase {
    fn begin_transaction(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN").map_err(Error::from)
    }

    fn execute_non_query(&mut self, statement: &str) -> Result<()> {
        self.conn
            .execute_batch(statement)
            .map_err(|e| Error::StatementExecution(format!("{e}: {}", preview(statement))))
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT").map_err(Error::from)
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK").map_err(Error::from)
    }

    /// SQLite ignores this pragma inside a transaction, so callers switch it
    /// before `BEGIN` and after `COMMIT`.
    fn set_foreign_key_checks(&mut self, enabled: bool) -> Result<()> {
        let pragma = if enabled {
            "PRAGMA foreign_keys = ON"
        } else {
            "PRAGMA foreign_keys = OFF"
        };
        self.conn.execute_batch(pragma).map_err(Error::from)
    }

    fn render_text_literal(&self, bytes: &[u8]) -> String {
        cast_blob_as_text(bytes)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;

    /// Records every call and fails statements on demand.
    #[derive(Debug, Default)]
    pub struct RecordingDatabase {
        pub log: Vec<String>,
        /// statement text -> remaining failures
        pub failures: HashMap<String, usize>,
        /// statements that fail unless they contain this marker
        pub fail_unless_contains: Option<String>,
        /// commits that fail before one succeeds
        pub commit_failures: usize,
    }

    impl RecordingDatabase {
        pub fn failing(mut self, statement: &str, times: usize) -> Self {
            self.failures.insert(statement.to_string(), times);
            self
        }

        pub fn executed(&self) -> Vec<&str> {
            self.log
                .iter()
                .filter_map(|l| l.strip_prefix("EXEC "))
                .collect()
        }
    }

    impl Database for RecordingDatabase {
        fn begin_transaction(&mut self) -> Result<()> {
            self.log.push("BEGIN".into());
            Ok(())
        }

        fn execute_non_query(&mut self, statement: &str) -> Result<()> {
            self.log.push(format!("EXEC {statement}"));
            if let Some(remaining) = self.failures.get_mut(statement) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(Error::StatementExecution(format!("forced failure: {statement}")));
                }
            }
            if let Some(marker) = &self.fail_unless_contains {
                if !statement.contains(marker.as_str()) {
                    return Err(Error::StatementExecution(format!("rejected: {statement}")));
                }
            }
            Ok(())
        }

        fn commit(&mut self) -> Result<()> {
            self.log.push("COMMIT".into());
            if self.commit_failures > 0 {
                self.commit_failures -= 1;
                return Err(Error::IllegalState("database is busy".into()));
            }
            Ok(())
        }

        fn rollback(&mut self) -> Result<()> {
            self.log.push("ROLLBACK".into());
            Ok(())
        }

        fn set_foreign_key_checks(&mut self, enabled: bool) -> Result<()> {
            self.log.push(format!("FK {enabled}"));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn foreign_keys(db: &SqliteDatabase) -> bool {
        db.connection()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_sqlite_transaction_commit() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        db.execute_non_query("CREATE TABLE t (id INTEGER PRIMARY KEY);").unwrap();
        db.begin_transaction().unwrap();
        db.execute_non_query("INSERT INTO t VALUES (1);").unwrap();
        db.commit().unwrap();
        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_sqlite_rollback() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        db.execute_non_query("CREATE TABLE t (id INTEGER);").unwrap();
        db.begin_transaction().unwrap();
        db.execute_non_query("INSERT INTO t VALUES (1);").unwrap();
        db.rollback().unwrap();
        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_sqlite_foreign_key_toggle() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        db.set_foreign_key_checks(true).unwrap();
        assert!(foreign_keys(&db));
        db.set_foreign_key_checks(false).unwrap();
        assert!(!foreign_keys(&db));
    }

    #[test]
    fn test_sqlite_bad_statement_is_error() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        match db.execute_non_query("NOT SQL AT ALL;") {
            Err(Error::StatementExecution(msg)) => assert!(msg.contains("NOT SQL AT ALL;")),
            other => panic!("Expected StatementExecution, got {other:?}"),
        }
    }

    #[test]
    fn test_sqlite_renders_blob_cast_literal() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let literal = db.render_text_literal("a,é".as_bytes());
        assert_eq!(literal, "CAST(X'612cc3a9' AS TEXT)");
        let text: String = db
            .connection()
            .query_row(&format!("SELECT {literal}"), [], |r| r.get(0))
            .unwrap();
        assert_eq!(text, "a,é");
        db.execute_non_query("SELECT 1;").unwrap();
    }

    #[test]
    fn test_default_literal_rendering_is_convert_using() {
        let db = testing::RecordingDatabase::default();
        assert_eq!(db.render_text_literal(b"ab"), "CONVERT(0x6162 USING utf8)");
    }
}
