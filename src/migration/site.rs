use std::collections::HashSet;

use log::debug;

use crate::bundle::Bundle;
use crate::bundler::{Bundler, UnbundleOptions};
use crate::databases::{Entity, MigrationDb, PkgVersion};
use crate::errors::{BundleError, BundleResult};
use crate::graph::InstId;

pub const SITE_CLASS: &str = "Site";
pub const PROJECT_DEPENDENCY_CLASS: &str = "ProjectDependency";
/// Field of a `ProjectDependency` holding the imported package's site.
pub const PROJECT_DEPENDENCY_SITE_FIELD: &str = "site";

/// Roots of an unbundled project or package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteRoots {
    /// The `Site` itself, or the one a `ProjectDependency` wraps.
    pub site: InstId,
    /// The bundle's root instance.
    pub site_or_project_dep: InstId,
}

/// Loads the package versions `bundle` depends on, transitively. Every
/// package comes after the packages it depends on itself.
pub fn load_dep_packages(db: &dyn MigrationDb, bundle: &Bundle) -> BundleResult<Vec<PkgVersion>> {
    let mut loaded = Vec::new();
    let mut done = HashSet::new();
    let mut visiting = HashSet::new();
    for dep in &bundle.deps {
        visit_dep(db, dep, &mut visiting, &mut done, &mut loaded)?;
    }
    Ok(loaded)
}

fn visit_dep(
    db: &dyn MigrationDb,
    id: &str,
    visiting: &mut HashSet<String>,
    done: &mut HashSet<String>,
    loaded: &mut Vec<PkgVersion>,
) -> BundleResult<()> {
    if done.contains(id) {
        return Ok(());
    }
    if !visiting.insert(id.to_string()) {
        return Err(BundleError::DependencyCycle(id.to_string()));
    }
    let pkg_version = db.get_pkg_version(id)?;
    for dep in &pkg_version.bundle()?.deps {
        visit_dep(db, dep, visiting, done, loaded)?;
    }
    visiting.remove(id);
    done.insert(id.to_string());
    loaded.push(pkg_version);
    Ok(())
}

/// Unbundles `bundle` into `bundler`, after the package versions it depends
/// on, and finds its site.
///
/// Dependencies already unbundled into `bundler` are not loaded twice. They
/// are usually migrated further than `bundler`'s schema, so they are loaded
/// with [`UnbundleOptions::dependency`]. The bundle itself is addressed by
/// the entity's id.
pub fn unbundle_site(
    bundler: &mut Bundler,
    bundle: &Bundle,
    db: &dyn MigrationDb,
    entity: &Entity,
) -> BundleResult<SiteRoots> {
    for dep in load_dep_packages(db, bundle)? {
        if bundler.root_of(&dep.id).is_some() {
            continue;
        }
        debug!("Unbundling dependency {} for {}", dep.id, entity.id());
        bundler.unbundle_with(&dep.bundle()?, &dep.id, UnbundleOptions::dependency())?;
    }
    let root = bundler.unbundle(bundle, entity.id())?;
    site_roots(bundler, root)
}

pub fn site_roots(bundler: &Bundler, root: InstId) -> BundleResult<SiteRoots> {
    let class = bundler
        .graph()
        .class_of(root)
        .ok_or(BundleError::UnknownInstance(root.index()))?;
    let schema = bundler.schema();
    if schema.is_subclass(class, SITE_CLASS) {
        return Ok(SiteRoots {
            site: root,
            site_or_project_dep: root,
        });
    }
    if schema.is_subclass(class, PROJECT_DEPENDENCY_CLASS) {
        let site = bundler
            .graph()
            .ref_of(root, PROJECT_DEPENDENCY_SITE_FIELD)
            .ok_or_else(|| BundleError::MissingField {
                class: class.to_string(),
                field: PROJECT_DEPENDENCY_SITE_FIELD.to_string(),
                iid: bundler
                    .addr_of(root)
                    .map_or_else(String::new, |a| a.iid.clone()),
            })?;
        return Ok(SiteRoots {
            site,
            site_or_project_dep: root,
        });
    }
    Err(BundleError::UnexpectedRoot(class.to_string()))
}
