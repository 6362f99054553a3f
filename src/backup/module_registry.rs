//! Storage module catalogue: which modules exist, which are eligible for
//! backup, which domains they declare, and which product module owns them.

use crate::backup::validate::validate_name_segment;
use bon::Builder;
use derive_more::{Deref, Display, From};
use dyn_iter::{DynIter, IntoDynIterator};
use getset::Getters;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::sync::Arc;
use validator::{Validate, ValidationError};

/// A named sub-partition of a module's storage scope.
#[derive(Clone, Debug, Display, From, Deref, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct DomainDescriptor(Arc<str>);

impl From<&str> for DomainDescriptor {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, PartialEq, Eq, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct ModuleDescriptor {
    #[validate(custom(function = validate_name_segment))]
    #[builder(into)]
    name: Arc<str>,
    /// Membership in the backup allow-list
    #[serde(default = "default_allowed")]
    #[builder(default = true)]
    allowed: bool,
    #[serde(default)]
    #[validate(custom(function = validate_domains))]
    #[builder(default)]
    domains: Vec<DomainDescriptor>,
    /// Product module that owns this storage module; ignoring the owner
    /// ignores the storage module too.
    #[builder(into)]
    owner: Option<Arc<str>>,
}

fn default_allowed() -> bool {
    true
}

fn validate_domains(domains: &[DomainDescriptor]) -> Result<(), ValidationError> {
    domains
        .iter()
        .map(|d| d.0.as_ref())
        .try_for_each(validate_name_segment)
}

pub trait ModuleRegistry {
    fn all_modules(&self) -> DynIter<'_, &ModuleDescriptor>;

    /// Resolves the product module that owns the storage module `name`.
    fn get_by_storage_module(&self, name: &str) -> Option<&ModuleDescriptor>;
}

/// A registry fixed at configuration time.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, PartialEq, Eq)]
#[serde(transparent)]
pub struct StaticModuleRegistry {
    #[validate(nested, custom(function = validate_unique_names))]
    modules: Vec<ModuleDescriptor>,
}

fn validate_unique_names(modules: &[ModuleDescriptor]) -> Result<(), ValidationError> {
    match modules.iter().map(|m| &m.name).duplicates().next() {
        Some(dup) => Err(ValidationError::new("DuplicateModule")
            .with_message(format!("module {dup:?} declared more than once").into())),
        None => Ok(()),
    }
}

impl StaticModuleRegistry {
    pub fn new<I: IntoIterator<Item = ModuleDescriptor>>(modules: I) -> Self {
        Self {
            modules: modules.into_iter().collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.modules.iter().find(|m| m.name.as_ref() == name)
    }
}

impl Default for StaticModuleRegistry {
    fn default() -> Self {
        let storage = |name: &str, domains: &[&str], owner: Option<&str>| {
            ModuleDescriptor::builder()
                .name(name)
                .domains(domains.iter().map(|d| DomainDescriptor::from(*d)).collect())
                .maybe_owner(owner)
                .build()
        };
        let product = |name: &str| ModuleDescriptor::builder().name(name).allowed(false).build();

        Self::new([
            product("community"),
            product("core"),
            storage("files", &[], None),
            storage("crm", &["mail_messages", "voip", "export_import"], None),
            storage("projects", &[], None),
            storage("forum", &[], Some("community")),
            storage("photo", &[], Some("community")),
            storage("bookmarking", &[], Some("community")),
            storage("wiki", &[], Some("community")),
            storage("fckuploaders", &["forum", "blogs", "news", "wiki"], Some("community")),
            storage("talk", &[], None),
            storage("mailaggregator", &[], None),
            storage("logo", &[], Some("core")),
            storage("whitelabel", &[], Some("core")),
            storage("userPhotos", &[], Some("core")),
        ])
    }
}

impl ModuleRegistry for StaticModuleRegistry {
    fn all_modules(&self) -> DynIter<'_, &ModuleDescriptor> {
        self.modules.iter().into_dyn_iter()
    }

    fn get_by_storage_module(&self, name: &str) -> Option<&ModuleDescriptor> {
        let owner = self.get(name)?.owner.as_deref()?;
        self.get(owner)
    }
}
