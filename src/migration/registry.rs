use super::step::Migration;
use super::version::MigrationVersion;
use crate::bundle::INITIAL_VERSION;
use crate::errors::{BundleError, BundleResult};

/// Append-only, strictly ordered list of migration steps.
///
/// The registry is built once at startup and then shared read-only between
/// concurrent runs.
#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    migrations: Vec<Migration>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step. Its index must be greater than every registered one.
    pub fn register(&mut self, migration: Migration) -> BundleResult<()> {
        if let Some(last) = self.migrations.last() {
            if migration.version() <= last.version() {
                return Err(BundleError::MigrationOrder {
                    previous: last.version().to_string(),
                    next: migration.version().to_string(),
                });
            }
        } else if migration.version().is_initial() {
            return Err(BundleError::MigrationOrder {
                previous: INITIAL_VERSION.to_string(),
                next: migration.version().to_string(),
            });
        }
        self.migrations.push(migration);
        Ok(())
    }

    pub fn with(mut self, migration: Migration) -> BundleResult<Self> {
        self.register(migration)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter()
    }

    pub fn get(&self, key: &str) -> Option<&Migration> {
        self.migrations.iter().find(|m| m.version().key() == key)
    }

    pub fn latest(&self) -> Option<&MigrationVersion> {
        self.migrations.last().map(Migration::version)
    }

    /// Version tag of a freshly created bundle.
    pub fn latest_key(&self) -> String {
        self.latest()
            .map_or_else(|| INITIAL_VERSION.to_string(), ToString::to_string)
    }

    /// Steps a bundle at `version` still has to go through, in order.
    ///
    /// Apart from the initial version, `version` must be the exact key of a
    /// registered step, the last one applied to the bundle.
    pub fn migrations_to_execute(&self, version: &str) -> BundleResult<&[Migration]> {
        let version = MigrationVersion::parse(version)?;
        let latest = self.latest().cloned().unwrap_or_else(MigrationVersion::initial);
        if version > latest {
            return Err(BundleError::VersionTooNew {
                found: version.to_string(),
                latest: latest.to_string(),
            });
        }
        if !version.is_initial() && self.get(version.key()).is_none() {
            return Err(BundleError::InvalidVersion(version.to_string()));
        }
        let start = self
            .migrations
            .partition_point(|m| m.version() <= &version);
        Ok(&self.migrations[start..])
    }
}
