use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{Entity, MigrationDb, Pkg, PkgVersion, ProjectRevision};
use crate::errors::{BundleError, BundleResult};

#[derive(Debug, Default)]
struct Tables {
    revisions: BTreeMap<String, ProjectRevision>,
    pkg_versions: BTreeMap<String, PkgVersion>,
    pkgs: BTreeMap<String, Pkg>,
}

/// [`MigrationDb`] over in-process maps, for tests and dev tooling.
#[derive(Debug, Default)]
pub struct InMemoryDb {
    tables: RwLock<Tables>,
}

impl InMemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> BundleResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| BundleError::Other("in-memory db lock poisoned".to_string()))
    }

    fn write(&self) -> BundleResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| BundleError::Other("in-memory db lock poisoned".to_string()))
    }

    /// Inserts or replaces an entity.
    pub fn insert_entity(&self, entity: Entity) -> BundleResult<()> {
        let mut tables = self.write()?;
        match entity {
            Entity::ProjectRevision(rev) => {
                tables.revisions.insert(rev.id.clone(), rev);
            }
            Entity::PkgVersion(pv) => {
                tables.pkg_versions.insert(pv.id.clone(), pv);
            }
        }
        Ok(())
    }

    pub fn insert_pkg(&self, pkg: Pkg) -> BundleResult<()> {
        self.write()?.pkgs.insert(pkg.id.clone(), pkg);
        Ok(())
    }

    /// Looks an entity up by id in either table.
    pub fn entity(&self, id: &str) -> BundleResult<Entity> {
        let tables = self.read()?;
        if let Some(rev) = tables.revisions.get(id) {
            return Ok(rev.clone().into());
        }
        tables
            .pkg_versions
            .get(id)
            .cloned()
            .map(Entity::from)
            .ok_or_else(|| BundleError::EntityNotFound(id.to_string()))
    }
}

impl MigrationDb for InMemoryDb {
    fn get_pkg_version(&self, id: &str) -> BundleResult<PkgVersion> {
        self.read()?
            .pkg_versions
            .get(id)
            .cloned()
            .ok_or_else(|| BundleError::EntityNotFound(format!("PkgVersion {id}")))
    }

    fn get_latest_project_rev(&self, project_id: &str) -> BundleResult<ProjectRevision> {
        self.read()?
            .revisions
            .values()
            .filter(|rev| rev.project_id == project_id)
            .max_by_key(|rev| rev.revision)
            .cloned()
            .ok_or_else(|| BundleError::EntityNotFound(format!("ProjectRevision of {project_id}")))
    }

    fn get_pkg_by_project_id(&self, project_id: &str) -> BundleResult<Option<Pkg>> {
        Ok(self
            .read()?
            .pkgs
            .values()
            .find(|pkg| pkg.project_id == project_id)
            .cloned())
    }

    fn list_pkg_versions(&self, pkg_id: &str) -> BundleResult<Vec<PkgVersion>> {
        Ok(self
            .read()?
            .pkg_versions
            .values()
            .filter(|pv| pv.pkg_id == pkg_id)
            .cloned()
            .collect())
    }
}
