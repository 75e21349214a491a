use std::sync::Arc;

use log::{debug, info};

use super::registry::MigrationRegistry;
use super::site::unbundle_site;
use super::step::{Migration, MigrationContext, MigrationStep, UnbundledMigration, UnbundledSite};
use super::version::MigrationVersion;
use crate::bundle::{Bundle, check_bundle_fields, check_existing_references, remove_unreachable_nodes};
use crate::bundler::Bundler;
use crate::config::MigrationOptions;
use crate::databases::{Entity, MigrationDb};
use crate::errors::{BundleError, BundleResult};
use crate::schema::SchemaRegistry;

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationOutcome {
    pub bundle: Bundle,
    /// Versions applied, in order.
    pub applied: Vec<MigrationVersion>,
}

impl MigrationOutcome {
    pub fn changed(&self) -> bool {
        !self.applied.is_empty()
    }
}

/// Accumulator threaded through the steps of one run.
struct MigrationState {
    bundle: Bundle,
    current: MigrationVersion,
    applied: Vec<MigrationVersion>,
}

/// Brings bundles forward to the latest registered version.
///
/// The runner holds no per-run state: one instance can migrate different
/// bundles from several threads at once.
#[derive(Debug, Clone)]
pub struct MigrationRunner {
    registry: Arc<MigrationRegistry>,
    schema: Arc<SchemaRegistry>,
    options: MigrationOptions,
}

impl MigrationRunner {
    /// `schema` is the current schema, the one bundles are checked against
    /// once fully migrated.
    pub fn new(registry: Arc<MigrationRegistry>, schema: Arc<SchemaRegistry>) -> Self {
        Self::with_options(registry, schema, MigrationOptions::default())
    }

    pub fn with_options(
        registry: Arc<MigrationRegistry>,
        schema: Arc<SchemaRegistry>,
        options: MigrationOptions,
    ) -> Self {
        Self {
            registry,
            schema,
            options,
        }
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn schema(&self) -> &Arc<SchemaRegistry> {
        &self.schema
    }

    pub fn options(&self) -> &MigrationOptions {
        &self.options
    }

    /// Applies every step after `bundle.version`, in order, stopping at the
    /// first failure.
    pub fn run(
        &self,
        bundle: Bundle,
        db: &dyn MigrationDb,
        entity: &Entity,
    ) -> BundleResult<MigrationOutcome> {
        let pending = self.registry.migrations_to_execute(&bundle.version)?;
        let mut state = MigrationState {
            current: MigrationVersion::parse(&bundle.version)?,
            bundle,
            applied: Vec::with_capacity(pending.len()),
        };
        if pending.is_empty() {
            debug!("Bundle {} is already at {}", entity.id(), state.current);
            return Ok(state.into_outcome());
        }

        if self.options.prune_unreachable {
            let removed = remove_unreachable_nodes(&mut state.bundle);
            debug!("Pruned {} unreachable records from {}", removed.len(), entity.id());
        }

        for migration in pending {
            state = self.apply(state, migration, db, entity)?;
        }

        if self.options.check_fields {
            check_bundle_fields(&state.bundle, &self.schema, None)?;
        }
        Ok(state.into_outcome())
    }

    fn apply(
        &self,
        state: MigrationState,
        migration: &Migration,
        db: &dyn MigrationDb,
        entity: &Entity,
    ) -> BundleResult<MigrationState> {
        let version = migration.version();
        info!(
            "Migrating {} from {} to {} ({})",
            entity.id(),
            state.current,
            version,
            migration.migration_type()
        );
        let ctx = MigrationContext {
            db,
            entity,
            version,
        };
        let failed = |source: anyhow::Error| BundleError::MigrationFailed {
            version: version.to_string(),
            source,
        };

        let mut bundle = match migration.step() {
            MigrationStep::Bundled(step) => step.migrate(state.bundle, &ctx).map_err(failed)?,
            MigrationStep::Unbundled(step) => self
                .apply_unbundled(step.as_ref(), &state.bundle, &ctx)
                .map_err(failed)?,
        };
        bundle.version = version.to_string();

        if self.options.validate_references {
            check_existing_references(&bundle).map_err(|e| failed(e.into()))?;
        }

        let mut applied = state.applied;
        applied.push(version.clone());
        Ok(MigrationState {
            bundle,
            current: version.clone(),
            applied,
        })
    }

    fn apply_unbundled(
        &self,
        step: &dyn UnbundledMigration,
        bundle: &Bundle,
        ctx: &MigrationContext<'_>,
    ) -> anyhow::Result<Bundle> {
        let mut bundler = Bundler::with_config(step.schema(), self.options.bundler_config());
        let roots = unbundle_site(&mut bundler, bundle, ctx.db, ctx.entity)?;
        let mut site = UnbundledSite {
            bundler: &mut bundler,
            roots,
        };
        step.migrate(&mut site, ctx)?;
        Ok(bundler.bundle(
            roots.site_or_project_dep,
            ctx.entity.id(),
            ctx.version.key(),
        )?)
    }
}

impl MigrationState {
    fn into_outcome(self) -> MigrationOutcome {
        MigrationOutcome {
            bundle: self.bundle,
            applied: self.applied,
        }
    }
}
