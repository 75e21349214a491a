//! Persisted entities and the database interface migrations consume.
//!
//! Projects store one bundle per [`ProjectRevision`]; published packages
//! store one per [`PkgVersion`]. A package version's id doubles as the uuid
//! of its bundle, so the `deps` of a bundle are package version ids.

pub mod memory;
pub mod sled_store;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::bundle::Bundle;
use crate::errors::{BundleError, BundleResult};
use crate::migration::site::{PROJECT_DEPENDENCY_CLASS, SITE_CLASS};

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct ProjectRevision {
    pub id: String,
    pub project_id: String,
    pub revision: u64,
    /// Bundle JSON.
    pub data: String,
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct PkgVersion {
    pub id: String,
    pub pkg_id: String,
    pub version: String,
    /// Bundle JSON.
    pub model: String,
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Pkg {
    pub id: String,
    pub project_id: String,
}

impl ProjectRevision {
    pub fn bundle(&self) -> BundleResult<Bundle> {
        Bundle::from_json(&self.data)
    }
}

impl PkgVersion {
    pub fn bundle(&self) -> BundleResult<Bundle> {
        Bundle::from_json(&self.model)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    ProjectRevision,
    PkgVersion,
}

/// A row holding a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    ProjectRevision(ProjectRevision),
    PkgVersion(PkgVersion),
}

impl Entity {
    /// Wraps a bundle in the entity its root class calls for: a `Site` root
    /// is a project revision, a `ProjectDependency` root a package version.
    pub fn from_bundle(id: &str, bundle: &Bundle) -> BundleResult<Self> {
        let root = bundle
            .root_inst()
            .ok_or_else(|| BundleError::MissingReference(bundle.root.clone()))?;
        let json = bundle.to_json()?;
        match root.type_name.as_str() {
            SITE_CLASS => Ok(Entity::ProjectRevision(ProjectRevision {
                id: id.to_string(),
                project_id: id.to_string(),
                revision: 1,
                data: json,
            })),
            PROJECT_DEPENDENCY_CLASS => {
                let text = |field: &str| root.get(field).and_then(|v| v.as_str()).map(str::to_string);
                Ok(Entity::PkgVersion(PkgVersion {
                    id: id.to_string(),
                    pkg_id: text("pkgId").unwrap_or_else(|| id.to_string()),
                    version: text("version").unwrap_or_else(|| "0.0.1".to_string()),
                    model: json,
                }))
            }
            other => Err(BundleError::UnexpectedRoot(other.to_string())),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Entity::ProjectRevision(rev) => &rev.id,
            Entity::PkgVersion(pv) => &pv.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::ProjectRevision(_) => EntityKind::ProjectRevision,
            Entity::PkgVersion(_) => EntityKind::PkgVersion,
        }
    }

    pub fn bundle_json(&self) -> &str {
        match self {
            Entity::ProjectRevision(rev) => &rev.data,
            Entity::PkgVersion(pv) => &pv.model,
        }
    }

    pub fn bundle(&self) -> BundleResult<Bundle> {
        Bundle::from_json(self.bundle_json())
    }

    /// The same row holding `bundle` instead.
    pub fn with_bundle(&self, bundle: &Bundle) -> BundleResult<Self> {
        let json = bundle.to_json()?;
        Ok(match self {
            Entity::ProjectRevision(rev) => Entity::ProjectRevision(ProjectRevision {
                data: json,
                ..rev.clone()
            }),
            Entity::PkgVersion(pv) => Entity::PkgVersion(PkgVersion {
                model: json,
                ..pv.clone()
            }),
        })
    }
}

impl From<ProjectRevision> for Entity {
    fn from(rev: ProjectRevision) -> Self {
        Entity::ProjectRevision(rev)
    }
}

impl From<PkgVersion> for Entity {
    fn from(pv: PkgVersion) -> Self {
        Entity::PkgVersion(pv)
    }
}

/// Read accessors unbundled migrations may call.
pub trait MigrationDb: Send + Sync {
    fn get_pkg_version(&self, id: &str) -> BundleResult<PkgVersion>;

    fn get_latest_project_rev(&self, project_id: &str) -> BundleResult<ProjectRevision>;

    fn get_pkg_by_project_id(&self, project_id: &str) -> BundleResult<Option<Pkg>>;

    /// Versions of package `pkg_id`, sorted by id.
    fn list_pkg_versions(&self, pkg_id: &str) -> BundleResult<Vec<PkgVersion>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn entity_kind_follows_root_class() {
        let site = Bundle::from_json(r#"{"root": "1", "map": {"1": {"__type": "Site"}}}"#).unwrap();
        let entity = Entity::from_bundle("p1", &site).unwrap();
        assert_eq!(entity.kind(), EntityKind::ProjectRevision);
        assert_eq!(entity.bundle().unwrap(), site);

        let dep = Bundle::from_json(
            r#"{"root": "1", "map": {"1": {"__type": "ProjectDependency", "pkgId": "pkg", "version": "2.0.0"}}}"#,
        )
        .unwrap();
        let Entity::PkgVersion(pv) = Entity::from_bundle("pv1", &dep).unwrap() else {
            panic!("expected a package version");
        };
        assert_eq!((pv.pkg_id.as_str(), pv.version.as_str()), ("pkg", "2.0.0"));

        let other = Bundle::from_json(r#"{"root": "1", "map": {"1": {"__type": "Tpl"}}}"#).unwrap();
        assert!(matches!(
            Entity::from_bundle("x", &other),
            Err(BundleError::UnexpectedRoot(_))
        ));
        assert_eq!(EntityKind::from_str("pkg_version").unwrap(), EntityKind::PkgVersion);
    }
}
