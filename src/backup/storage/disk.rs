use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use crate::backup::storage::{Storage, StorageProvider};
use crate::backup::validate::validate_dir_exist;

use bon::Builder;
use dyn_iter::{DynIter, IntoDynIterator};
use function_name::named;
use getset::Getters;
use globset::{GlobBuilder, GlobMatcher};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use validator::Validate;
use walkdir::{DirEntry, WalkDir};

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Filesystem storage laid out as `<storage_root>/<tenant_id>/<module>/<domain>/...`.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, PartialEq, Eq, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct DiskStorageProvider {
    #[validate(custom(function = validate_dir_exist))]
    #[builder(into)]
    storage_root: PathBuf,
}

impl StorageProvider for DiskStorageProvider {
    #[named]
    fn open_scope(&self, tenant_id: u32, module: &str) -> Result<Box<dyn Storage>> {
        if !self.storage_root.is_dir() {
            return Err(
                Error::from(std::io::Error::other("storage root is not a directory"))
                    .with_debug_object_and_fn_name(self.storage_root.clone(), function_path!()),
            );
        }

        let module_root = self
            .storage_root
            .join(tenant_id.to_string())
            .join(module);
        if module_root.exists() && !module_root.is_dir() {
            return Err(
                Error::from(std::io::Error::other("module root is not a directory"))
                    .with_debug_object_and_fn_name(module_root, function_path!()),
            );
        }

        tracing::debug!("Opened disk storage scope {:?}", module_root);
        Ok(Box::new(DiskStorage { module_root }))
    }
}

#[derive(Clone, Debug, Getters)]
#[getset(get = "pub")]
pub struct DiskStorage {
    module_root: PathBuf,
}

impl DiskStorage {
    fn base_dir(&self, domain: &str, root: &str) -> PathBuf {
        let mut base = self.module_root.clone();
        if !domain.is_empty() {
            base.push(domain);
        }
        let root = root.trim_matches('/');
        if !root.is_empty() {
            base.push(root);
        }
        base
    }
}

impl Storage for DiskStorage {
    #[named]
    fn list_files_relative<'a>(
        &'a self,
        domain: &str,
        root: &str,
        pattern: &str,
        recursive: bool,
    ) -> Result<DynIter<'a, Result<Arc<str>>>> {
        let matcher = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(Error::from)
            .with_msg(format!("Invalid file pattern {pattern:?}"))?
            .compile_matcher();

        let base = self.base_dir(domain, root);
        if !base.is_dir() {
            tracing::trace!("Nothing to list under {:?}", base);
            return Ok(std::iter::empty().into_dyn_iter());
        }

        tracing::debug!("Listing {:?} recursive={} pattern={:?}", base, recursive, pattern);
        let mut walk = WalkDir::new(&base)
            .follow_links(true)
            .min_depth(1)
            .sort_by_file_name();
        if !recursive {
            walk = walk.max_depth(1);
        }

        let entries = walk
            .into_iter()
            .filter_map(move |res| match res {
                Ok(de) => process_dir_entry(de, &base, &matcher),
                Err(e) => Some(Err(e.into())),
            })
            .map(move |res| {
                res.with_debug_object_and_fn_name(self.module_root.clone(), function_path!())
            });

        Ok(entries.into_dyn_iter())
    }

    fn open_read_stream(&self, domain: &str, path: &str) -> Result<Box<dyn Read + Send>> {
        let full_path = self.base_dir(domain, path);
        File::open(&full_path)
            .map(|f| Box::new(f) as Box<dyn Read + Send>)
            .map_err(Error::from)
            .with_msg(format!("Open {:?} failed", full_path))
    }
}

fn process_dir_entry<P: AsRef<Path>>(
    de: DirEntry,
    base_dir: P,
    matcher: &GlobMatcher,
) -> Option<Result<Arc<str>>> {
    if !de.file_type().is_file() {
        tracing::trace!("Skipping {:?} not a file", de.path());
        return None;
    }
    if !matcher.is_match(de.file_name()) {
        tracing::trace!("Skipping {:?}, pattern not match", de.path());
        return None;
    }

    let res = match de.path().strip_prefix(base_dir.as_ref()) {
        Ok(stripped) => Ok(stripped
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .join("/")
            .into()),
        Err(e) => Err(Error::from(std::io::Error::other(e)).with_msg(format!(
            "Stripping {:?} from {:?} failed",
            base_dir.as_ref(),
            de.path()
        ))),
    };
    Some(res)
}
