use crate::backup::function_path;
use crate::backup::enumerate::{BackupFileInfo, ModuleFileEnumerator};
use crate::backup::module_registry::ModuleRegistry;
use crate::backup::progress::ProgressAccumulator;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use crate::backup::storage::{Storage, StorageProvider};
use crate::backup::tenant::TenantContext;
use function_name::named;
use itertools::Itertools;
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;
use tracing::{info, warn};

/// Backs up every file of one tenant into a tar archive.
///
/// Enumeration counts as the first progress step and each archived file as
/// one more. Modules or files that cannot be read do not abort the backup;
/// they are returned as a non-fatal error next to the finished archive.
pub struct BackupTask<'a, P: StorageProvider, R: ModuleRegistry> {
    tenant: &'a TenantContext,
    storage_provider: &'a P,
    registry: &'a R,
    progress: Arc<ProgressAccumulator>,
}

impl<'a, P: StorageProvider, R: ModuleRegistry> BackupTask<'a, P, R> {
    pub fn new(
        tenant: &'a TenantContext,
        storage_provider: &'a P,
        registry: &'a R,
        progress: Arc<ProgressAccumulator>,
    ) -> Self {
        Self {
            tenant,
            storage_provider,
            registry,
            progress,
        }
    }

    pub fn run<W: Write>(&self, writer: W) -> Result<(W, Option<Error>)> {
        let tenant_id = *self.tenant.tenant_id();
        info!("Starting backup of tenant {tenant_id}");

        let report = ModuleFileEnumerator::new(self.storage_provider, self.registry)
            .enumerate(tenant_id, self.tenant.ignored_modules());
        let mut errors = report.errors;

        self.progress
            .set_steps_count(u32::try_from(report.files.len() + 1).unwrap_or(u32::MAX))?;
        self.progress.set_step_completed(1)?;

        let mut builder = tar::Builder::new(writer);
        let by_module = report
            .files
            .into_iter()
            .into_group_map_by(|f| f.module().clone());

        let mut archived = 0usize;
        for (module, files) in by_module.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
            let storage = match self.storage_provider.open_scope(tenant_id, &module) {
                Ok(storage) => Some(storage),
                Err(e) => {
                    warn!("Cannot reopen module {module:?}: {e}");
                    errors.push(Error::storage_unavailable(module.clone(), e));
                    None
                }
            };

            for file in files.iter().sorted() {
                if let Some(storage) = &storage {
                    match append_file(&mut builder, storage.as_ref(), file) {
                        Ok(()) => archived += 1,
                        Err(e) => {
                            warn!("Ignoring {file}: {e}");
                            errors.push(e);
                        }
                    }
                }
                self.progress.set_step_completed(1)?;
            }
        }

        let writer = builder
            .into_inner()
            .map_err(Error::from)
            .with_msg(format!("Finishing archive of tenant {tenant_id} failed"))?;
        self.progress.set_progress(100)?;

        info!(
            "Backup of tenant {tenant_id} done: {archived} files archived, {} errors",
            errors.len()
        );
        Ok((writer, convert_error_vec(errors).err()))
    }
}

/// Spools the file to a temporary file first: tar headers need the size up
/// front and storage streams do not report it.
#[named]
fn append_file<W: Write>(
    builder: &mut tar::Builder<W>,
    storage: &dyn Storage,
    file: &BackupFileInfo,
) -> Result<()> {
    let mut reader = storage.open_read_stream(file.domain(), file.path())?;
    let mut spool = tempfile::tempfile()?;
    let size = std::io::copy(&mut reader, &mut spool)?;
    spool.seek(SeekFrom::Start(0))?;

    let mut header = tar::Header::new_gnu();
    header.set_size(size);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, file.archive_path(), spool)
        .map_err(Error::from)
        .with_debug_object_and_fn_name(file.clone(), function_path!())?;
    tracing::trace!("Archived {file} ({size} bytes)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::module_registry::{ModuleDescriptor, StaticModuleRegistry};
    use crate::backup::storage::disk::DiskStorageProvider;
    use std::io::{Cursor, Read};
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str, content: &str) {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, content).unwrap();
    }

    fn registry() -> StaticModuleRegistry {
        StaticModuleRegistry::new([
            ModuleDescriptor::builder()
                .name("files")
                .domains(vec!["photos".into()])
                .build(),
            ModuleDescriptor::builder().name("crm").build(),
        ])
    }

    fn archive_entries(bytes: Vec<u8>) -> Vec<(String, String)> {
        let mut archive = tar::Archive::new(Cursor::new(bytes));
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let path = e.path().unwrap().to_string_lossy().to_string();
                let mut content = String::new();
                e.read_to_string(&mut content).unwrap();
                (path, content)
            })
            .collect()
    }

    #[test]
    fn test_backup_archives_all_tenant_files() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "9/files/photos/a.jpg", "jpeg");
        touch(dir.path(), "9/files/docs/b.txt", "text");
        touch(dir.path(), "9/crm/deal.pdf", "pdf");
        let tenant = TenantContext::builder()
            .tenant_id(9)
            .storage_root(dir.path())
            .build();
        let provider = DiskStorageProvider::builder().storage_root(dir.path()).build();
        let registry = registry();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress = Arc::new(
            ProgressAccumulator::new().with_observer(move |p| sink.lock().unwrap().push(p)),
        );

        let (bytes, non_fatal) = BackupTask::new(&tenant, &provider, &registry, progress.clone())
            .run(Vec::new())
            .unwrap();

        assert!(non_fatal.is_none());
        assert_eq!(
            archive_entries(bytes),
            vec![
                ("crm/deal.pdf".to_string(), "pdf".to_string()),
                ("files/docs/b.txt".to_string(), "text".to_string()),
                ("files/photos/a.jpg".to_string(), "jpeg".to_string()),
            ]
        );
        assert_eq!(progress.percent(), 100);
        assert_eq!(*seen.lock().unwrap(), vec![25, 50, 75, 100]);
    }

    #[test]
    fn test_ignored_module_is_not_archived() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "9/files/a.txt", "a");
        touch(dir.path(), "9/crm/b.txt", "b");
        let mut tenant = TenantContext::builder()
            .tenant_id(9)
            .storage_root(dir.path())
            .build();
        tenant.ignore_module("crm");
        let provider = DiskStorageProvider::builder().storage_root(dir.path()).build();
        let registry = registry();

        let (bytes, _) = BackupTask::new(
            &tenant,
            &provider,
            &registry,
            Arc::new(ProgressAccumulator::new()),
        )
        .run(Vec::new())
        .unwrap();

        let entries = archive_entries(bytes);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "files/a.txt");
    }

    #[test]
    fn test_broken_module_is_reported_not_fatal() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "9/files/a.txt", "a");
        touch(dir.path(), "9/crm", "not a directory");
        let tenant = TenantContext::builder()
            .tenant_id(9)
            .storage_root(dir.path())
            .build();
        let provider = DiskStorageProvider::builder().storage_root(dir.path()).build();
        let registry = registry();

        let (bytes, non_fatal) = BackupTask::new(
            &tenant,
            &provider,
            &registry,
            Arc::new(ProgressAccumulator::new()),
        )
        .run(Vec::new())
        .unwrap();

        assert_eq!(archive_entries(bytes).len(), 1);
        let non_fatal = non_fatal.unwrap();
        assert!(non_fatal.into_iter().all(|e| e.is_storage_unavailable()));
    }

    #[test]
    fn test_empty_tenant_produces_empty_archive() {
        let dir = TempDir::new().unwrap();
        let tenant = TenantContext::builder()
            .tenant_id(3)
            .storage_root(dir.path())
            .build();
        let provider = DiskStorageProvider::builder().storage_root(dir.path()).build();
        let registry = registry();
        let progress = Arc::new(ProgressAccumulator::new());

        let (bytes, non_fatal) = BackupTask::new(&tenant, &provider, &registry, progress.clone())
            .run(Vec::new())
            .unwrap();

        assert!(non_fatal.is_none());
        assert!(archive_entries(bytes).is_empty());
        assert_eq!(progress.percent(), 100);
    }
}
