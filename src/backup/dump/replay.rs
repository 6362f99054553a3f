use crate::backup::dump::database::Database;
use crate::backup::dump::reader::DumpStatementReader;
use crate::backup::dump::repair::{is_replace_into, repair_replace_statement};
use crate::backup::dump::{preview, ReplayConfig, ReplayReport};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use std::io::BufRead;
use tracing::{debug, info, warn};

/// Replays a table dump into a database inside a single transaction.
///
/// Foreign key checks are off for the whole replay. A statement that fails is
/// repaired (`REPLACE INTO`) or retried once after a pause (anything else);
/// if that also fails it is logged and skipped. Nothing a single statement
/// does aborts the transaction: the dump is committed once at the end.
#[derive(Clone, Debug, Default)]
pub struct DumpReplayer {
    config: ReplayConfig,
}

impl DumpReplayer {
    pub fn new(config: ReplayConfig) -> Self {
        Self { config }
    }

    pub fn replay<R: BufRead, D: Database>(
        &self,
        stream: Option<R>,
        db: &mut D,
    ) -> Result<ReplayReport> {
        db.set_foreign_key_checks(false)?;
        db.begin_transaction()?;

        let res = stream
            .map_or(Ok(ReplayReport::default()), |s| self.replay_statements(s, db))
            .and_then(|report| db.commit().map(|_| report));
        match res {
            Ok(report) => {
                db.set_foreign_key_checks(true)?;
                info!(
                    "Replayed {} statements: {} ok, {} repaired, {} retried, {} failed",
                    report.statements(),
                    report.executed,
                    report.repaired,
                    report.retried,
                    report.failed
                );
                Ok(report)
            }
            Err(e) => {
                let e = match db.rollback() {
                    Ok(()) => e,
                    Err(rollback_err) => e.chain(rollback_err),
                };
                if let Err(fk_err) = db.set_foreign_key_checks(true) {
                    warn!("Failed to re-enable foreign key checks: {fk_err}");
                }
                Err(e.with_msg("Dump replay aborted, transaction rolled back"))
            }
        }
    }

    fn replay_statements<R: BufRead, D: Database>(
        &self,
        stream: R,
        db: &mut D,
    ) -> Result<ReplayReport> {
        let mut report = ReplayReport::default();
        for statement in DumpStatementReader::new(stream, Some(self.config.delimiter().clone())) {
            let statement = statement.with_msg("Reading dump stream failed")?;
            self.execute(db, &statement, &mut report);
        }
        Ok(report)
    }

    /// Runs one statement with the repair/retry policy. Never fails.
    pub fn execute<D: Database>(&self, db: &mut D, statement: &str, report: &mut ReplayReport) {
        match db.execute_non_query(statement) {
            Ok(()) => report.executed += 1,
            Err(e) if is_replace_into(statement) => self.repair(db, statement, e, report),
            Err(e) => self.retry(db, statement, e, report),
        }
    }

    fn repair<D: Database>(
        &self,
        db: &mut D,
        statement: &str,
        error: Error,
        report: &mut ReplayReport,
    ) {
        let Some(repaired) = repair_replace_statement(statement, self.config.delimiter(), |b| {
            db.render_text_literal(b)
        }) else {
            warn!("Statement failed and cannot be repaired: {error}\n  {}", preview(statement));
            report.failed += 1;
            return;
        };

        debug!("Retrying repaired statement {}", preview(&repaired));
        match db.execute_non_query(&repaired) {
            Ok(()) => report.repaired += 1,
            Err(e) => {
                warn!(
                    "Repaired statement failed: {e} (original error: {error})\n  {}",
                    preview(statement)
                );
                report.failed += 1;
            }
        }
    }

    fn retry<D: Database>(
        &self,
        db: &mut D,
        statement: &str,
        error: Error,
        report: &mut ReplayReport,
    ) {
        debug!(
            "Statement failed ({error}), retrying in {:?}: {}",
            self.config.retry_delay(),
            preview(statement)
        );
        std::thread::sleep(*self.config.retry_delay());
        match db.execute_non_query(statement) {
            Ok(()) => report.retried += 1,
            Err(e) => {
                warn!("Statement failed after retry: {e}\n  {}", preview(statement));
                report.failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::dump::database::testing::RecordingDatabase;
    use crate::backup::dump::database::SqliteDatabase;
    use std::io::{BufReader, Cursor, Read};
    use std::time::Duration;

    fn replayer() -> DumpReplayer {
        DumpReplayer::new(ReplayConfig::builder().retry_delay(Duration::ZERO).build())
    }

    fn stream(text: &str) -> Option<Cursor<Vec<u8>>> {
        Some(Cursor::new(text.as_bytes().to_vec()))
    }

    #[test]
    fn test_empty_stream_commits_without_executing() {
        let mut db = RecordingDatabase::default();
        let report = replayer().replay(stream(""), &mut db).unwrap();
        assert_eq!(report, ReplayReport::default());
        assert_eq!(db.log, vec!["FK false", "BEGIN", "COMMIT", "FK true"]);
    }

    #[test]
    fn test_absent_stream_commits_without_executing() {
        let mut db = RecordingDatabase::default();
        let report = replayer()
            .replay(None::<Cursor<Vec<u8>>>, &mut db)
            .unwrap();
        assert_eq!(report.statements(), 0);
        assert_eq!(db.log, vec!["FK false", "BEGIN", "COMMIT", "FK true"]);
    }

    #[test]
    fn test_statements_execute_in_order_inside_one_transaction() {
        let mut db = RecordingDatabase::default();
        let report = replayer()
            .replay(stream("DELETE FROM a;\nINSERT INTO a\nVALUES (1);\n"), &mut db)
            .unwrap();
        assert_eq!(report.executed, 2);
        assert_eq!(
            db.log,
            vec![
                "FK false",
                "BEGIN",
                "EXEC DELETE FROM a;",
                "EXEC INSERT INTO a\nVALUES (1);",
                "COMMIT",
                "FK true"
            ]
        );
    }

    #[test]
    fn test_broken_replace_into_is_repaired_once() {
        let statement = "REPLACE INTO t VALUES ('a,b', 1);";
        let mut db = RecordingDatabase {
            fail_unless_contains: Some("CONVERT(".into()),
            ..Default::default()
        };
        let report = replayer()
            .replay(stream(&format!("{statement}\n")), &mut db)
            .unwrap();
        assert_eq!(report.repaired, 1);
        assert_eq!(
            db.executed(),
            vec![statement, "REPLACE INTO t VALUES (CONVERT(0x612c62 USING utf8),1);"]
        );
    }

    #[test]
    fn test_failed_repair_does_not_stop_replay() {
        let mut db = RecordingDatabase {
            fail_unless_contains: Some("DELETE".into()),
            ..Default::default()
        };
        let report = replayer()
            .replay(stream("REPLACE INTO t VALUES ('x');\nDELETE FROM t;\n"), &mut db)
            .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.executed, 1);
        assert_eq!(db.executed().len(), 3);
        assert_eq!(db.log.last().map(String::as_str), Some("FK true"));
    }

    #[test]
    fn test_other_statement_is_retried_once_unmodified() {
        let failing = "INSERT INTO t VALUES (1);";
        let mut db = RecordingDatabase::default().failing(failing, 2);
        let report = replayer()
            .replay(stream(&format!("{failing}\nINSERT INTO t VALUES (2);\n")), &mut db)
            .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.executed, 1);
        assert_eq!(
            db.executed(),
            vec![failing, failing, "INSERT INTO t VALUES (2);"]
        );
        assert!(db.log.contains(&"COMMIT".to_string()));
    }

    #[test]
    fn test_transient_failure_succeeds_on_retry() {
        let failing = "UPDATE t SET x = 1;";
        let mut db = RecordingDatabase::default().failing(failing, 1);
        let report = replayer().replay(stream(failing), &mut db).unwrap();
        assert_eq!(report.retried, 1);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn test_failed_commit_rolls_back_and_restores_foreign_keys() {
        let mut db = RecordingDatabase {
            commit_failures: 1,
            ..Default::default()
        };
        let err = replayer()
            .replay(stream("DELETE FROM a;\n"), &mut db)
            .unwrap_err();
        assert!(err.to_string().contains("busy"));
        assert_eq!(
            db.log,
            vec!["FK false", "BEGIN", "EXEC DELETE FROM a;", "COMMIT", "ROLLBACK", "FK true"]
        );

        db.log.clear();
        let report = replayer()
            .replay(stream("DELETE FROM b;\n"), &mut db)
            .unwrap();
        assert_eq!(report.executed, 1);
        assert_eq!(
            db.log,
            vec!["FK false", "BEGIN", "EXEC DELETE FROM b;", "COMMIT", "FK true"]
        );
    }

    #[test]
    fn test_broken_replace_into_is_repaired_in_sqlite() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        db.execute_non_query("CREATE TABLE t (body TEXT, n INTEGER);").unwrap();
        let report = replayer()
            .replay(stream("REPLACE INTO t VALUES ('it\\'s, broken', 1);\n"), &mut db)
            .unwrap();
        assert_eq!(report.repaired, 1);
        assert_eq!(report.failed, 0);

        let body: String = db
            .connection()
            .query_row("SELECT body FROM t WHERE n = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(body, "it\\'s, broken");
    }

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk gone"))
        }
    }

    #[test]
    fn test_unreadable_stream_rolls_back() {
        let mut db = RecordingDatabase::default();
        let err = replayer()
            .replay(Some(BufReader::new(BrokenReader)), &mut db)
            .unwrap_err();
        assert!(err.to_string().contains("disk gone"));
        assert_eq!(db.log, vec!["FK false", "BEGIN", "ROLLBACK", "FK true"]);
    }

    #[test]
    fn test_replay_into_sqlite() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let dump = "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);\n\
                    INSERT INTO notes VALUES (1, 'line one\\nline two');\n\
                    INSERT INTO notes VALUES (2, 'second');\n\
                    THIS IS NOT SQL;\n\
                    INSERT INTO notes VALUES (3, 'after garbage');\n";
        let report = replayer().replay(stream(dump), &mut db).unwrap();
        assert_eq!(report.executed, 4);
        assert_eq!(report.failed, 1);

        let body: String = db
            .connection()
            .query_row("SELECT body FROM notes WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(body, "line one\nline two");
        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM notes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 3);
    }
}
