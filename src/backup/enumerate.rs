use crate::backup::module_registry::{ModuleDescriptor, ModuleRegistry};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::storage::{Storage, StorageProvider, ALL_FILES, ROOT_MARKER};
use getset::Getters;
use std::collections::{BTreeSet, HashSet};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One file to back up. Identity is the full tuple.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Getters)]
#[getset(get = "pub")]
pub struct BackupFileInfo {
    domain: Arc<str>,
    module: Arc<str>,
    path: Arc<str>,
    tenant_id: u32,
}

impl BackupFileInfo {
    pub fn new<D: Into<Arc<str>>, M: Into<Arc<str>>, P: Into<Arc<str>>>(
        domain: D,
        module: M,
        path: P,
        tenant_id: u32,
    ) -> Self {
        Self {
            domain: domain.into(),
            module: module.into(),
            path: path.into(),
            tenant_id,
        }
    }

    /// Location of the file inside a backup archive: `<module>/<domain>/<path>`,
    /// the domain segment omitted when empty.
    pub fn archive_path(&self) -> String {
        if self.domain.is_empty() {
            format!("{}/{}", self.module, self.path)
        } else {
            format!("{}/{}/{}", self.module, self.domain, self.path)
        }
    }
}

impl Display for BackupFileInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "tenant {} {}", self.tenant_id, self.archive_path())
    }
}

/// Files found for a tenant plus the modules that could not be read.
#[derive(Debug, Default)]
pub struct EnumerationReport {
    pub files: Vec<BackupFileInfo>,
    pub errors: Vec<Error>,
}

pub struct ModuleFileEnumerator<'a, P: StorageProvider, R: ModuleRegistry> {
    storage_provider: &'a P,
    registry: &'a R,
}

impl<'a, P: StorageProvider, R: ModuleRegistry> ModuleFileEnumerator<'a, P, R> {
    pub fn new(storage_provider: &'a P, registry: &'a R) -> Self {
        Self {
            storage_provider,
            registry,
        }
    }

    /// Collects every file of `tenant_id` across the allowed, non-ignored
    /// modules. A module whose storage fails contributes no files and one
    /// [`Error::StorageUnavailable`] to the report; other modules are unaffected.
    pub fn enumerate(
        &self,
        tenant_id: u32,
        ignored_modules: &HashSet<Arc<str>>,
    ) -> EnumerationReport {
        let mut files = BTreeSet::new();
        let mut errors = Vec::new();

        for module in self.registry.all_modules() {
            if !module.allowed() || self.is_ignored(module, ignored_modules) {
                debug!("Skipping module {:?}", module.name());
                continue;
            }

            match self.module_files(tenant_id, module) {
                Ok(module_files) => {
                    debug!(
                        "Module {:?} has {} files for tenant {}",
                        module.name(),
                        module_files.len(),
                        tenant_id
                    );
                    files.extend(module_files);
                }
                Err(e) => {
                    warn!("Skipping module {:?} for tenant {}: {e}", module.name(), tenant_id);
                    errors.push(Error::storage_unavailable(module.name().clone(), e));
                }
            }
        }

        info!(
            "Found {} files for tenant {} ({} module errors)",
            files.len(),
            tenant_id,
            errors.len()
        );
        EnumerationReport {
            files: files.into_iter().collect(),
            errors,
        }
    }

    fn is_ignored(&self, module: &ModuleDescriptor, ignored_modules: &HashSet<Arc<str>>) -> bool {
        ignored_modules.contains(module.name())
            || self
                .registry
                .get_by_storage_module(module.name())
                .is_some_and(|owner| ignored_modules.contains(owner.name()))
    }

    fn module_files(&self, tenant_id: u32, module: &ModuleDescriptor) -> Result<Vec<BackupFileInfo>> {
        let storage = self
            .storage_provider
            .open_scope(tenant_id, module.name())?;
        let mut files = Vec::new();

        for domain in module.domains() {
            for path in list_all(storage.as_ref(), domain)? {
                files.push(BackupFileInfo::new(
                    (**domain).clone(),
                    module.name().clone(),
                    path,
                    tenant_id,
                ));
            }
        }

        let domain_prefixes: Vec<String> = module
            .domains()
            .iter()
            .map(|d| format!("{d}/"))
            .collect();
        for path in list_all(storage.as_ref(), "")? {
            if !is_outside_domains(&path, &domain_prefixes) {
                continue;
            }
            files.push(BackupFileInfo::new("", module.name().clone(), path, tenant_id));
        }

        Ok(files)
    }
}

fn list_all(storage: &dyn Storage, domain: &str) -> Result<Vec<Arc<str>>> {
    storage
        .list_files_relative(domain, ROOT_MARKER, ALL_FILES, true)?
        .collect()
}

/// Root-listing filter. This is a plain substring test, so `myphotos/x` is
/// treated as belonging to a `photos` domain as well.
fn is_outside_domains(path: &str, domain_prefixes: &[String]) -> bool {
    !domain_prefixes.iter().any(|prefix| path.contains(prefix.as_str()))
}
