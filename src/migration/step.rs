use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::site::SiteRoots;
use super::version::MigrationVersion;
use crate::bundle::Bundle;
use crate::bundler::Bundler;
use crate::databases::{Entity, MigrationDb};
use crate::errors::BundleResult;
use crate::graph::{InstId, ObjectGraph};
use crate::schema::SchemaRegistry;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MigrationType {
    /// Operates on the raw record map.
    Bundled,
    /// Operates on the materialized object graph.
    Unbundled,
}

/// What every migration step gets to look at besides the bundle itself.
pub struct MigrationContext<'a> {
    pub db: &'a dyn MigrationDb,
    /// The persisted row the bundle belongs to.
    pub entity: &'a Entity,
    /// Version of the step being run.
    pub version: &'a MigrationVersion,
}

/// A step over the flat bundle. Receives the bundle by value and returns the
/// migrated one; the runner stamps the version afterwards.
pub trait BundledMigration: Send + Sync {
    fn migrate(&self, bundle: Bundle, ctx: &MigrationContext<'_>) -> anyhow::Result<Bundle>;
}

impl<F> BundledMigration for F
where
    F: Fn(Bundle, &MigrationContext<'_>) -> anyhow::Result<Bundle> + Send + Sync,
{
    fn migrate(&self, bundle: Bundle, ctx: &MigrationContext<'_>) -> anyhow::Result<Bundle> {
        self(bundle, ctx)
    }
}

/// The graph an unbundled step mutates: the step's own bundler, holding the
/// bundle and all its dependencies, plus the bundle's roots.
pub struct UnbundledSite<'b> {
    pub bundler: &'b mut Bundler,
    pub roots: SiteRoots,
}

impl UnbundledSite<'_> {
    pub fn site(&self) -> InstId {
        self.roots.site
    }

    pub fn root(&self) -> InstId {
        self.roots.site_or_project_dep
    }

    pub fn schema(&self) -> &SchemaRegistry {
        self.bundler.schema()
    }

    pub fn graph(&self) -> &ObjectGraph {
        self.bundler.graph()
    }

    pub fn graph_mut(&mut self) -> &mut ObjectGraph {
        self.bundler.graph_mut()
    }

    /// Whether `id` was unbundled from the bundle being migrated rather than
    /// from one of its dependencies.
    pub fn is_local(&self, id: InstId) -> bool {
        let owner = self.bundler.addr_of(self.root()).map(|a| a.uuid.as_str());
        match self.bundler.addr_of(id) {
            Some(addr) => Some(addr.uuid.as_str()) == owner,
            None => true,
        }
    }
}

/// A step over the object graph, unbundled with the schema as it was when
/// the step was written.
pub trait UnbundledMigration: Send + Sync {
    fn schema(&self) -> Arc<SchemaRegistry>;

    fn migrate(&self, site: &mut UnbundledSite<'_>, ctx: &MigrationContext<'_>)
    -> anyhow::Result<()>;
}

struct UnbundledFn<F> {
    schema: Arc<SchemaRegistry>,
    body: F,
}

impl<F> UnbundledMigration for UnbundledFn<F>
where
    F: Fn(&mut UnbundledSite<'_>, &MigrationContext<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn schema(&self) -> Arc<SchemaRegistry> {
        Arc::clone(&self.schema)
    }

    fn migrate(
        &self,
        site: &mut UnbundledSite<'_>,
        ctx: &MigrationContext<'_>,
    ) -> anyhow::Result<()> {
        (self.body)(site, ctx)
    }
}

#[derive(Clone)]
pub enum MigrationStep {
    Bundled(Arc<dyn BundledMigration>),
    Unbundled(Arc<dyn UnbundledMigration>),
}

/// One registered step.
#[derive(Clone)]
pub struct Migration {
    version: MigrationVersion,
    step: MigrationStep,
}

impl Migration {
    pub fn new(version: &str, step: MigrationStep) -> BundleResult<Self> {
        Ok(Self {
            version: MigrationVersion::parse(version)?,
            step,
        })
    }

    /// A bundled step from a closure.
    ///
    /// ```
    /// use bundle_store::migration::Migration;
    ///
    /// let step = Migration::bundled("12-rename-foo", |mut bundle, _ctx| {
    ///     bundle.rename_field("Widget", "foo", "bar");
    ///     Ok(bundle)
    /// })
    /// .unwrap();
    /// assert_eq!(step.version().index(), 12);
    /// ```
    pub fn bundled<F>(version: &str, body: F) -> BundleResult<Self>
    where
        F: Fn(Bundle, &MigrationContext<'_>) -> anyhow::Result<Bundle> + Send + Sync + 'static,
    {
        Self::new(version, MigrationStep::Bundled(Arc::new(body)))
    }

    /// An unbundled step from a closure and the schema it was written
    /// against.
    pub fn unbundled<F>(version: &str, schema: Arc<SchemaRegistry>, body: F) -> BundleResult<Self>
    where
        F: Fn(&mut UnbundledSite<'_>, &MigrationContext<'_>) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        Self::new(
            version,
            MigrationStep::Unbundled(Arc::new(UnbundledFn { schema, body })),
        )
    }

    pub fn version(&self) -> &MigrationVersion {
        &self.version
    }

    pub fn step(&self) -> &MigrationStep {
        &self.step
    }

    pub fn migration_type(&self) -> MigrationType {
        match self.step {
            MigrationStep::Bundled(_) => MigrationType::Bundled,
            MigrationStep::Unbundled(_) => MigrationType::Unbundled,
        }
    }
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version.key())
            .field("type", &self.migration_type())
            .finish()
    }
}
