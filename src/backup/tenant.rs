use crate::backup::validate::{validate_dir_exist, validate_name_set};
use bon::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use validator::Validate;

/// Everything one backup or restore task knows about the tenant it works on.
///
/// Built once per task. The ignore sets may be extended while the task is
/// being prepared ([`TenantContext::ignore_module`], [`TenantContext::ignore_table`])
/// and are read-only once the task takes the context.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, PartialEq, Eq, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct TenantContext {
    #[validate(range(min = 1))]
    tenant_id: u32,
    /// Root of the storage layout, `<storage_root>/<tenant_id>/<module>/...`
    #[validate(custom(function = validate_dir_exist))]
    #[builder(into)]
    storage_root: PathBuf,
    #[serde(default)]
    #[validate(custom(function = validate_name_set))]
    #[builder(default)]
    ignored_modules: HashSet<Arc<str>>,
    #[serde(default)]
    #[builder(default)]
    ignored_tables: HashSet<Arc<str>>,
}

impl TenantContext {
    pub fn ignore_module<S: Into<Arc<str>>>(&mut self, module: S) -> &mut Self {
        self.ignored_modules.insert(module.into());
        self
    }

    pub fn ignore_table<S: Into<Arc<str>>>(&mut self, table: S) -> &mut Self {
        self.ignored_tables.insert(table.into());
        self
    }

    pub fn is_module_ignored(&self, module: &str) -> bool {
        self.ignored_modules.contains(module)
    }

    pub fn is_table_ignored(&self, table: &str) -> bool {
        self.ignored_tables.contains(table)
    }
}
