//! Per-tenant backup and restore tasks and the YAML config that drives them.

pub mod backup;
pub mod restore;

use crate::backup::function_path;
use crate::backup::dump::database::SqliteDatabase;
use crate::backup::dump::replay::DumpReplayer;
use crate::backup::dump::ReplayConfig;
use crate::backup::module_registry::StaticModuleRegistry;
use crate::backup::progress::ProgressAccumulator;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use crate::backup::storage::disk::DiskStorageProvider;
use crate::backup::task::backup::BackupTask;
use crate::backup::task::restore::{RestoreReport, RestoreTask};
use crate::backup::tenant::TenantContext;
use function_name::named;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, IntoInnerError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use validator::{Validate, ValidationError};

#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    #[validate(nested, length(min = 1), custom(function = validate_unique_tenants))]
    pub tenants: Vec<TenantContext>,
    #[serde(default)]
    #[validate(nested)]
    pub modules: StaticModuleRegistry,
    #[serde(default)]
    #[validate(nested)]
    pub replay: ReplayConfig,
    /// Worker threads for multi-tenant runs, rayon decides when absent
    #[validate(range(min = 1))]
    pub threads: Option<usize>,
}

fn validate_unique_tenants(tenants: &[TenantContext]) -> std::result::Result<(), ValidationError> {
    let mut seen = HashSet::new();
    match tenants.iter().find(|t| !seen.insert(*t.tenant_id())) {
        Some(dup) => Err(ValidationError::new("DuplicateTenant")
            .with_message(format!("tenant {} configured twice", dup.tenant_id()).into())),
        None => Ok(()),
    }
}

impl TaskConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        File::open(path)
            .map_err(Error::from)
            .and_then(|f| {
                serde_yml::from_reader::<_, TaskConfig>(f)
                    .map_err(Error::from)
                    .with_msg(format!("Parse YAML config failed: {path:?}"))
            })
            .and_then(|tc| {
                tc.validate()
                    .map_err(Error::from)
                    .map(|_| tc)
                    .with_msg(format!("Config validation failed: {path:?}"))
            })
    }

    pub fn tenant(&self, tenant_id: u32) -> Option<&TenantContext> {
        self.tenants.iter().find(|t| *t.tenant_id() == tenant_id)
    }

    pub fn build_thread_pool(&self) -> Result<ThreadPool> {
        let mut builder = ThreadPoolBuilder::new();
        if let Some(threads) = self.threads {
            builder = builder.num_threads(threads);
        }
        Ok(builder.build()?)
    }

    /// Backs up every configured tenant on `pool`, one archive per tenant.
    pub fn backup_all(
        &self,
        out_dir: &Path,
        pool: &ThreadPool,
    ) -> Vec<(u32, Result<(PathBuf, Option<Error>)>)> {
        pool.install(|| {
            self.tenants
                .par_iter()
                .map(|tenant| (*tenant.tenant_id(), self.backup_tenant(tenant, out_dir)))
                .collect()
        })
    }

    /// Writes `<out_dir>/tenant-<id>.tar` through a temporary file that only
    /// gets its final name once the archive is complete.
    #[named]
    pub fn backup_tenant(
        &self,
        tenant: &TenantContext,
        out_dir: &Path,
    ) -> Result<(PathBuf, Option<Error>)> {
        let tenant_id = *tenant.tenant_id();
        let file_path = out_dir.join(format!("tenant-{tenant_id}.tar"));
        let file_path_tmp = out_dir.join(format!("tenant-{tenant_id}.tar.tmp"));

        let provider = DiskStorageProvider::builder()
            .storage_root(tenant.storage_root().clone())
            .build();
        let task = BackupTask::new(tenant, &provider, &self.modules, logging_progress(tenant_id));

        let writer = File::create_new(&file_path_tmp)
            .map(BufWriter::new)
            .map_err(Error::from)
            .with_debug_object_and_fn_name(file_path_tmp.clone(), function_path!())?;

        task.run(writer)
            .and_then(|(w, non_fatal)| {
                w.into_inner()
                    .map_err(IntoInnerError::into_error)?
                    .sync_all()?;
                std::fs::rename(&file_path_tmp, &file_path)?;
                info!("Created backup file: {file_path:?}");
                Ok((file_path.clone(), non_fatal))
            })
            .map_err(|mut e| {
                if let Err(e2) = std::fs::remove_file(&file_path_tmp) {
                    e = e.chain(e2.into()).with_msg("Delete tmp file failed.");
                }
                e
            })
    }

    /// Restores one tenant into the SQLite database at `database`.
    pub fn restore_tenant(
        &self,
        tenant_id: u32,
        dump_dir: &Path,
        database: &Path,
    ) -> Result<RestoreReport> {
        let tenant = self
            .tenant(tenant_id)
            .ok_or_else(|| Error::InvalidArgument(format!("tenant {tenant_id} is not configured")))?;
        let mut db = SqliteDatabase::open(database)
            .with_msg(format!("Opening database {database:?} failed"))?;
        RestoreTask::new(
            tenant,
            DumpReplayer::new(self.replay.clone()),
            logging_progress(tenant_id),
        )
        .run(dump_dir, &mut db)
    }
}

fn logging_progress(tenant_id: u32) -> Arc<ProgressAccumulator> {
    Arc::new(ProgressAccumulator::new().with_observer(move |percent| {
        info!("Tenant {tenant_id}: {percent}%");
    }))
}
