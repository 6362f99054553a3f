use crate::backup::dump::database::Database;
use crate::backup::dump::reader::{read_delimiter_directive, DumpStatementReader};
use crate::backup::dump::{preview, ReplayReport};
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WarnAndDiscard, WithMsg};
use std::io::BufRead;
use tracing::{debug, info};

const DELIMITER_KEYWORD: &str = "DELIMITER";

/// Loads stored-procedure files.
///
/// The first line must be `DELIMITER <token>`; without it the file is treated
/// as empty. Every following statement is split on that token, which stays
/// fixed for the whole file, and executed on its own without a surrounding
/// transaction.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcedureLoader;

impl ProcedureLoader {
    pub fn load_procedures<R: BufRead, D: Database>(
        &self,
        mut stream: R,
        db: &mut D,
    ) -> Result<ReplayReport> {
        let mut report = ReplayReport::default();
        let Some(delimiter) =
            read_delimiter_directive(&mut stream).with_msg("Reading procedure header failed")?
        else {
            info!("No DELIMITER header, nothing to load");
            return Ok(report);
        };
        debug!("Loading procedures with delimiter {:?}", delimiter);

        for statement in DumpStatementReader::new(stream, Some(delimiter.clone())) {
            let statement = statement.with_msg("Reading procedure stream failed")?;
            let Some(body) = strip_delimiter(&statement, &delimiter) else {
                report.skipped += 1;
                continue;
            };
            match db
                .execute_non_query(body)
                .warn_and_discard(format!("Procedure statement failed: {}", preview(body)))
            {
                Some(()) => report.executed += 1,
                None => report.failed += 1,
            }
        }

        info!(
            "Loaded {} procedure statements, {} failed",
            report.executed, report.failed
        );
        Ok(report)
    }
}

/// The statement without its trailing delimiter, or `None` for empty
/// statements and `DELIMITER` re-declarations.
fn strip_delimiter<'a>(statement: &'a str, delimiter: &str) -> Option<&'a str> {
    let trimmed = statement.trim();
    let body = trimmed.strip_suffix(delimiter).unwrap_or(trimmed).trim();
    let is_redeclaration = body
        .get(..DELIMITER_KEYWORD.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(DELIMITER_KEYWORD));
    if body.is_empty() || is_redeclaration {
        None
    } else {
        Some(body)
    }
}
