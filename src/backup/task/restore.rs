use crate::backup::dump::database::Database;
use crate::backup::dump::procedure::ProcedureLoader;
use crate::backup::dump::replay::DumpReplayer;
use crate::backup::dump::ReplayReport;
use crate::backup::progress::ProgressAccumulator;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WarnAndDiscard, WithMsg};
use crate::backup::tenant::TenantContext;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

pub const TABLES_DIR: &str = "tables";
pub const PROCEDURES_DIR: &str = "procedures";
const DUMP_EXT: &str = "sql";

#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Table dumps replayed, including those whose replay was rolled back
    pub tables: usize,
    pub procedure_files: usize,
    pub skipped_tables: Vec<Arc<str>>,
    pub statements: ReplayReport,
    /// Files that could not be opened or whose replay was rolled back
    pub errors: Vec<Error>,
}

/// Restores one tenant from a dump directory laid out as
/// `<dump_dir>/tables/<table>.sql` and `<dump_dir>/procedures/*.sql`.
///
/// Tables are replayed first (each in its own transaction), then procedure
/// files are loaded. Every file is one progress step.
pub struct RestoreTask<'a> {
    tenant: &'a TenantContext,
    replayer: DumpReplayer,
    procedures: ProcedureLoader,
    progress: Arc<ProgressAccumulator>,
}

impl<'a> RestoreTask<'a> {
    pub fn new(
        tenant: &'a TenantContext,
        replayer: DumpReplayer,
        progress: Arc<ProgressAccumulator>,
    ) -> Self {
        Self {
            tenant,
            replayer,
            procedures: ProcedureLoader,
            progress,
        }
    }

    pub fn run<D: Database>(&self, dump_dir: &Path, db: &mut D) -> Result<RestoreReport> {
        if !dump_dir.is_dir() {
            return Err(Error::InvalidArgument(format!(
                "dump directory {dump_dir:?} does not exist"
            )));
        }
        let tenant_id = *self.tenant.tenant_id();
        info!("Starting restore of tenant {tenant_id} from {dump_dir:?}");

        let mut report = RestoreReport::default();
        let mut tables = Vec::new();
        for path in list_dump_files(&dump_dir.join(TABLES_DIR))? {
            let table = file_stem(&path);
            if self.tenant.is_table_ignored(&table) {
                info!("Skipping ignored table {table}");
                report.skipped_tables.push(table);
            } else {
                tables.push(path);
            }
        }
        let procedures = list_dump_files(&dump_dir.join(PROCEDURES_DIR))?;

        let steps = (tables.len() + procedures.len()).max(1);
        self.progress
            .set_steps_count(u32::try_from(steps).unwrap_or(u32::MAX))?;

        for path in &tables {
            report.tables += 1;
            match self.open_tracked(path) {
                Ok(reader) => match self.replayer.replay(Some(reader), db) {
                    Ok(r) => report.statements += r,
                    Err(e) => self.record_failure(&mut report, path, e),
                },
                Err(e) => self.record_failure(&mut report, path, e),
            }
            self.progress.set_step_completed(1)?;
        }

        for path in &procedures {
            report.procedure_files += 1;
            match self
                .open_tracked(path)
                .and_then(|reader| self.procedures.load_procedures(reader, db))
            {
                Ok(r) => report.statements += r,
                Err(e) => self.record_failure(&mut report, path, e),
            }
            self.progress.set_step_completed(1)?;
        }

        self.progress.set_progress(100)?;
        info!(
            "Restore of tenant {tenant_id} done: {} tables, {} procedure files, {} statements ok, {} failed, {} files failed",
            report.tables,
            report.procedure_files,
            report.statements.succeeded(),
            report.statements.failed,
            report.errors.len()
        );
        Ok(report)
    }

    fn open_tracked(&self, path: &Path) -> Result<BufReader<ProgressReader<File>>> {
        let file = File::open(path)
            .map_err(Error::from)
            .with_msg(format!("Cannot open dump file {path:?}"))?;
        let total = file.metadata()?.len();
        Ok(BufReader::new(ProgressReader::new(
            file,
            total,
            self.progress.clone(),
        )))
    }

    fn record_failure(&self, report: &mut RestoreReport, path: &Path, error: Error) {
        warn!("Restoring {path:?} failed: {error}");
        report.errors.push(error.with_msg(format!("{path:?}")));
    }
}

fn list_dump_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|res| match res {
            Ok(de) => (de.file_type().is_file()
                && de.path().extension().is_some_and(|ext| ext == DUMP_EXT))
            .then(|| Ok(de.into_path())),
            Err(e) => Some(Err(Error::from(e))),
        })
        .collect()
}

fn file_stem(path: &Path) -> Arc<str> {
    path.file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default()
        .into()
}

/// Reports how far into the current file the replay has read. Stops at 99%,
/// completing the step is left to the task.
pub struct ProgressReader<R> {
    inner: R,
    total: u64,
    read: u64,
    progress: Arc<ProgressAccumulator>,
}

impl<R: Read> ProgressReader<R> {
    pub fn new(inner: R, total: u64, progress: Arc<ProgressAccumulator>) -> Self {
        Self {
            inner,
            total,
            read: 0,
            progress,
        }
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read += n as u64;
        if self.total > 0 {
            let percent = (self.read.saturating_mul(100) / self.total).min(99) as u8;
            self.progress
                .set_current_step_progress(percent)
                .warn_and_discard("Step progress update failed");
        }
        Ok(n)
    }
}
