//! Bundle persistence on the [sled](https://docs.rs/sled) embedded database.
//!
//! Each entity kind lives in its own tree, keyed by entity id, with values
//! encoded through bincode. Migrations write back with a compare-and-swap
//! against the bytes they read, so two processes migrating the same row
//! cannot silently overwrite each other, and a run that fails leaves the
//! stored row as it was.
//!
//! # Examples
//!
//! ```
//! use bundle_store::bundle::Bundle;
//! use bundle_store::databases::{Entity, sled_store::SledBundleStore};
//!
//! let store = SledBundleStore::temp().unwrap();
//! let bundle = Bundle::from_json(
//!     r#"{"root": "1", "map": {"1": {"__type": "Site"}}, "version": "0"}"#,
//! ).unwrap();
//! store.put_entity(&Entity::from_bundle("proj", &bundle).unwrap()).unwrap();
//! assert_eq!(store.entity("proj").unwrap().bundle().unwrap(), bundle);
//! ```

use std::collections::BTreeMap;

use log::{debug, info};

use super::{Entity, EntityKind, MigrationDb, Pkg, PkgVersion, ProjectRevision};
use crate::config::StoreConfig;
use crate::errors::{BundleError, BundleResult};
use crate::migration::dev::dependency_order;
use crate::migration::{MigrationOutcome, MigrationRunner};

const REVISIONS_TREE: &str = "project_revisions";
const PKG_VERSIONS_TREE: &str = "pkg_versions";
const PKGS_TREE: &str = "pkgs";

fn encode<T: bincode::Encode>(value: &T) -> BundleResult<Vec<u8>> {
    Ok(bincode::encode_to_vec(value, bincode::config::standard())?)
}

fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> BundleResult<T> {
    let (value, _) = bincode::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(value)
}

#[derive(Clone)]
pub struct SledBundleStore {
    db: sled::Db,
    revisions: sled::Tree,
    pkg_versions: sled::Tree,
    pkgs: sled::Tree,
}

impl SledBundleStore {
    pub fn open(config: &StoreConfig) -> BundleResult<Self> {
        Self::from_db(config.sled_config().open()?)
    }

    /// A store deleted when dropped.
    pub fn temp() -> BundleResult<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> BundleResult<Self> {
        Ok(Self {
            revisions: db.open_tree(REVISIONS_TREE)?,
            pkg_versions: db.open_tree(PKG_VERSIONS_TREE)?,
            pkgs: db.open_tree(PKGS_TREE)?,
            db,
        })
    }

    fn tree(&self, kind: EntityKind) -> &sled::Tree {
        match kind {
            EntityKind::ProjectRevision => &self.revisions,
            EntityKind::PkgVersion => &self.pkg_versions,
        }
    }

    fn encode_entity(entity: &Entity) -> BundleResult<Vec<u8>> {
        match entity {
            Entity::ProjectRevision(rev) => encode(rev),
            Entity::PkgVersion(pv) => encode(pv),
        }
    }

    fn decode_entity(kind: EntityKind, bytes: &[u8]) -> BundleResult<Entity> {
        Ok(match kind {
            EntityKind::ProjectRevision => Entity::ProjectRevision(decode(bytes)?),
            EntityKind::PkgVersion => Entity::PkgVersion(decode(bytes)?),
        })
    }

    /// Inserts or replaces an entity.
    pub fn put_entity(&self, entity: &Entity) -> BundleResult<()> {
        self.tree(entity.kind())
            .insert(entity.id(), Self::encode_entity(entity)?)?;
        Ok(())
    }

    pub fn put_pkg(&self, pkg: &Pkg) -> BundleResult<()> {
        self.pkgs.insert(pkg.id.as_str(), encode(pkg)?)?;
        Ok(())
    }

    pub fn entity(&self, id: &str) -> BundleResult<Entity> {
        for kind in [EntityKind::ProjectRevision, EntityKind::PkgVersion] {
            if let Some(bytes) = self.tree(kind).get(id)? {
                return Self::decode_entity(kind, &bytes);
            }
        }
        Err(BundleError::EntityNotFound(id.to_string()))
    }

    fn scan<T: bincode::Decode<()>>(tree: &sled::Tree) -> BundleResult<Vec<T>> {
        tree.iter()
            .values()
            .map(|bytes| decode(&bytes?))
            .collect()
    }

    pub fn project_revisions(&self) -> BundleResult<Vec<ProjectRevision>> {
        Self::scan(&self.revisions)
    }

    pub fn pkg_versions(&self) -> BundleResult<Vec<PkgVersion>> {
        Self::scan(&self.pkg_versions)
    }

    pub fn flush(&self) -> BundleResult<usize> {
        Ok(self.db.flush()?)
    }

    pub fn migrate_pkg_version(
        &self,
        id: &str,
        runner: &MigrationRunner,
    ) -> BundleResult<MigrationOutcome> {
        self.migrate_entity(EntityKind::PkgVersion, id, runner)
    }

    pub fn migrate_project_revision(
        &self,
        id: &str,
        runner: &MigrationRunner,
    ) -> BundleResult<MigrationOutcome> {
        self.migrate_entity(EntityKind::ProjectRevision, id, runner)
    }

    /// Migrates one stored row. The row is only written if the run succeeds
    /// and nobody else changed it in the meantime.
    fn migrate_entity(
        &self,
        kind: EntityKind,
        id: &str,
        runner: &MigrationRunner,
    ) -> BundleResult<MigrationOutcome> {
        let tree = self.tree(kind);
        let stored = tree
            .get(id)?
            .ok_or_else(|| BundleError::EntityNotFound(format!("{kind} {id}")))?;
        let entity = Self::decode_entity(kind, &stored)?;
        let outcome = runner.run(entity.bundle()?, self, &entity)?;
        if !outcome.changed() {
            return Ok(outcome);
        }

        let migrated = Self::encode_entity(&entity.with_bundle(&outcome.bundle)?)?;
        match tree.compare_and_swap(id, Some(&stored), Some(migrated))? {
            Ok(()) => {
                debug!("Stored {kind} {id} at {}", outcome.bundle.version);
                Ok(outcome)
            }
            Err(_) => Err(BundleError::ConcurrentModification(format!("{kind} {id}"))),
        }
    }

    /// Migrates every stored package version, each after the versions it
    /// depends on, then every project revision.
    pub fn migrate_all(
        &self,
        runner: &MigrationRunner,
    ) -> BundleResult<Vec<(String, MigrationOutcome)>> {
        let pkg_bundles = self
            .pkg_versions()?
            .into_iter()
            .map(|pv| Ok((pv.id.clone(), pv.bundle()?)))
            .collect::<BundleResult<BTreeMap<_, _>>>()?;

        let mut outcomes = Vec::new();
        for id in dependency_order(&pkg_bundles)? {
            let outcome = self.migrate_pkg_version(&id, runner)?;
            outcomes.push((id, outcome));
        }
        for rev in self.project_revisions()? {
            let outcome = self.migrate_project_revision(&rev.id, runner)?;
            outcomes.push((rev.id, outcome));
        }
        info!(
            "Migrated {} of {} stored bundles",
            outcomes.iter().filter(|(_, o)| o.changed()).count(),
            outcomes.len()
        );
        Ok(outcomes)
    }
}

impl MigrationDb for SledBundleStore {
    fn get_pkg_version(&self, id: &str) -> BundleResult<PkgVersion> {
        match self.pkg_versions.get(id)? {
            Some(bytes) => decode(&bytes),
            None => Err(BundleError::EntityNotFound(format!("PkgVersion {id}"))),
        }
    }

    fn get_latest_project_rev(&self, project_id: &str) -> BundleResult<ProjectRevision> {
        self.project_revisions()?
            .into_iter()
            .filter(|rev| rev.project_id == project_id)
            .max_by_key(|rev| rev.revision)
            .ok_or_else(|| BundleError::EntityNotFound(format!("ProjectRevision of {project_id}")))
    }

    fn get_pkg_by_project_id(&self, project_id: &str) -> BundleResult<Option<Pkg>> {
        Ok(Self::scan::<Pkg>(&self.pkgs)?
            .into_iter()
            .find(|pkg| pkg.project_id == project_id))
    }

    fn list_pkg_versions(&self, pkg_id: &str) -> BundleResult<Vec<PkgVersion>> {
        Ok(self
            .pkg_versions()?
            .into_iter()
            .filter(|pv| pv.pkg_id == pkg_id)
            .collect())
    }
}
