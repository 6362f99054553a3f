pub mod disk;

use crate::backup::result_error::result::Result;
use dyn_iter::DynIter;
use std::io::Read;
use std::sync::Arc;

/// Marker for "list from the top of the domain".
pub const ROOT_MARKER: &str = "/";
/// Pattern matching every file name.
pub const ALL_FILES: &str = "*";

/// One tenant's view of one storage module.
///
/// Paths are `/`-separated and relative to `<domain>/<root>`; the empty domain
/// is the module root itself.
pub trait Storage {
    fn list_files_relative<'a>(
        &'a self,
        domain: &str,
        root: &str,
        pattern: &str,
        recursive: bool,
    ) -> Result<DynIter<'a, Result<Arc<str>>>>;

    fn open_read_stream(&self, domain: &str, path: &str) -> Result<Box<dyn Read + Send>>;
}

/// Opens per-module storage scopes for a tenant.
pub trait StorageProvider {
    fn open_scope(&self, tenant_id: u32, module: &str) -> Result<Box<dyn Storage>>;
}
