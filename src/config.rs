//! Configuration for the bundler, the migration runner and the sled store.
//!
//! Every struct is built through `typed-builder`, with defaults suited to
//! migrating production data.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use typed_builder::TypedBuilder;

/// What the unbundler does when a reference or required field cannot be
/// resolved.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ReferencePolicy {
    /// Fail with `MissingReference` / `MissingXref` / `MissingField`.
    #[default]
    Strict,
    /// Log a warning, null out single references and drop dangling list or
    /// map entries. Meant for interactive tooling.
    Lenient,
}

/// Configuration for a [`Bundler`](crate::bundler::Bundler).
///
/// # Examples
///
/// ```
/// use bundle_store::config::{BundlerConfig, ReferencePolicy};
///
/// let config = BundlerConfig::builder()
///     .reference_policy(ReferencePolicy::Lenient)
///     .build();
/// assert!(!config.check_fields);
/// ```
#[derive(Debug, Clone, TypedBuilder)]
#[builder(doc)]
pub struct BundlerConfig {
    #[builder(default)]
    pub reference_policy: ReferencePolicy,

    /// Type check every record against the schema before unbundling it
    #[builder(default = false)]
    pub check_fields: bool,
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl BundlerConfig {
    /// Best-effort configuration for dev scripts.
    pub fn lenient() -> Self {
        Self::builder()
            .reference_policy(ReferencePolicy::Lenient)
            .build()
    }
}

/// Options for a [`MigrationRunner`](crate::migration::MigrationRunner).
///
/// # Examples
///
/// ```
/// use bundle_store::config::MigrationOptions;
///
/// let options = MigrationOptions::builder()
///     .validate_references(false)
///     .build();
/// assert!(options.check_fields);
/// ```
#[derive(Debug, Clone, TypedBuilder)]
#[builder(doc)]
pub struct MigrationOptions {
    /// Policy of the bundlers created for unbundled steps
    #[builder(default)]
    pub reference_policy: ReferencePolicy,

    /// Run `check_existing_references` after every step
    #[builder(default = true)]
    pub validate_references: bool,

    /// Type check the final bundle against the current schema
    #[builder(default = true)]
    pub check_fields: bool,

    /// Drop records unreachable from the root before the first step
    #[builder(default = false)]
    pub prune_unreachable: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MigrationOptions {
    pub fn bundler_config(&self) -> BundlerConfig {
        BundlerConfig::builder()
            .reference_policy(self.reference_policy)
            .build()
    }
}

/// Configuration for [`SledBundleStore`](crate::databases::sled_store::SledBundleStore).
///
/// # Examples
///
/// ```
/// use bundle_store::config::StoreConfig;
///
/// let config = StoreConfig::builder()
///     .path("bundles.db")
///     .cache_capacity(64 * 1024 * 1024)
///     .build();
/// ```
#[derive(Debug, Clone, TypedBuilder)]
#[builder(doc)]
pub struct StoreConfig {
    /// Directory of the sled database
    #[builder(setter(into))]
    pub path: PathBuf,

    /// Delete the database when the store is dropped
    #[builder(default = false)]
    pub temporary: bool,

    /// Page cache size in bytes
    #[builder(default = 256 * 1024 * 1024)]
    pub cache_capacity: u64,

    /// Background flush interval; `None` flushes only on demand
    #[builder(default = Some(500))]
    pub flush_every_ms: Option<u64>,
}

impl StoreConfig {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self::builder().path(path).build()
    }

    pub(crate) fn sled_config(&self) -> sled::Config {
        sled::Config::new()
            .path(&self.path)
            .temporary(self.temporary)
            .cache_capacity(self.cache_capacity)
            .flush_every_ms(self.flush_every_ms)
    }
}
