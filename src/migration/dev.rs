//! In-memory migration of a set of bundles, for dev scripts and tests.

use std::collections::{BTreeMap, HashSet};

use log::info;

use super::runner::MigrationRunner;
use crate::bundle::Bundle;
use crate::databases::{Entity, memory::InMemoryDb};
use crate::errors::{BundleError, BundleResult};

/// Orders bundle ids so that every bundle comes after the bundles of the set
/// it depends on. Dependencies outside the set are ignored here.
pub fn dependency_order(bundles: &BTreeMap<String, Bundle>) -> BundleResult<Vec<String>> {
    fn visit(
        id: &str,
        bundles: &BTreeMap<String, Bundle>,
        visiting: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> BundleResult<()> {
        if order.iter().any(|done| done == id) {
            return Ok(());
        }
        if !visiting.insert(id.to_string()) {
            return Err(BundleError::DependencyCycle(id.to_string()));
        }
        if let Some(bundle) = bundles.get(id) {
            for dep in bundle.deps.iter().filter(|dep| bundles.contains_key(*dep)) {
                visit(dep, bundles, visiting, order)?;
            }
        }
        visiting.remove(id);
        order.push(id.to_string());
        Ok(())
    }

    let mut order = Vec::with_capacity(bundles.len());
    let mut visiting = HashSet::new();
    for id in bundles.keys() {
        visit(id, bundles, &mut visiting, &mut order)?;
    }
    Ok(order)
}

/// Migrates every bundle of `bundles` (keyed by bundle uuid) to the latest
/// version, dependencies first, so each bundle is migrated against already
/// migrated dependencies.
pub fn migrate_in_memory(
    bundles: BTreeMap<String, Bundle>,
    runner: &MigrationRunner,
) -> BundleResult<BTreeMap<String, Bundle>> {
    let order = dependency_order(&bundles)?;
    let db = InMemoryDb::new();
    for (id, bundle) in &bundles {
        db.insert_entity(Entity::from_bundle(id, bundle)?)?;
    }

    let mut migrated = BTreeMap::new();
    for id in order {
        let entity = db.entity(&id)?;
        let outcome = runner.run(entity.bundle()?, &db, &entity)?;
        info!(
            "Migrated {id}: {} step(s), now at {}",
            outcome.applied.len(),
            outcome.bundle.version
        );
        db.insert_entity(entity.with_bundle(&outcome.bundle)?)?;
        migrated.insert(id, outcome.bundle);
    }
    Ok(migrated)
}
