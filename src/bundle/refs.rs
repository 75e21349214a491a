use std::collections::{BTreeSet, HashSet};

use serde_json::Value;

use super::{Addr, Bundle, BundledInst, RawRef};
use crate::errors::{BundleError, BundleResult};
use crate::schema::{FieldSchema, SchemaRegistry};

/// Recursively visits a bundled value looking for local and external refs.
pub fn visit_field_refs(value: &Value, visit: &mut impl FnMut(RawRef)) {
    match value {
        Value::Array(items) => {
            for item in items {
                visit_field_refs(item, visit);
            }
        }
        Value::Object(object) => {
            if let Some(raw) = RawRef::parse(value) {
                visit(raw);
            } else {
                for v in object.values() {
                    visit_field_refs(v, visit);
                }
            }
        }
        _ => {}
    }
}

/// Visits every reference held by `inst`, together with the schema field
/// holding it. `fields` restricts the visit to the named fields.
pub fn visit_refs_in_fields(
    inst: &BundledInst,
    schema: &SchemaRegistry,
    fields: Option<&[&str]>,
    visit: &mut impl FnMut(RawRef, &FieldSchema),
) -> BundleResult<()> {
    for field in schema.all_fields(&inst.type_name)? {
        if fields.is_some_and(|names| !names.contains(&field.name.as_str())) {
            continue;
        }
        if let Some(value) = inst.get(&field.name) {
            visit_field_refs(value, &mut |raw| visit(raw, field));
        }
    }
    Ok(())
}

/// Every `__ref` must be a key of the map and every `__xref` must point into
/// a bundle listed in `deps`.
pub fn check_existing_references(bundle: &Bundle) -> BundleResult<()> {
    let mut failure = None;
    for inst in bundle.map.values() {
        for value in inst.fields.values() {
            visit_field_refs(value, &mut |raw| {
                if failure.is_some() {
                    return;
                }
                match raw {
                    RawRef::Local(iid) if !bundle.map.contains_key(&iid) => {
                        failure = Some(BundleError::MissingReference(iid));
                    }
                    RawRef::External(addr) if !bundle.deps.contains(&addr.uuid) => {
                        let mut known = bundle.deps.clone();
                        known.sort();
                        failure = Some(BundleError::MissingXref { addr, known });
                    }
                    _ => {}
                }
            });
        }
    }
    failure.map_or(Ok(()), Err)
}

pub fn all_xrefs(bundle: &Bundle) -> Vec<Addr> {
    let mut xrefs = Vec::new();
    for inst in bundle.map.values() {
        for value in inst.fields.values() {
            visit_field_refs(value, &mut |raw| {
                if let RawRef::External(addr) = raw {
                    xrefs.push(addr);
                }
            });
        }
    }
    xrefs
}

/// Uuids of the bundles this bundle references, sorted and deduplicated.
pub fn extract_dependencies(bundle: &Bundle) -> Vec<String> {
    all_xrefs(bundle)
        .into_iter()
        .map(|addr| addr.uuid)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Deletes every record that cannot be reached from the root by following
/// local references. Returns the removed iids.
pub fn remove_unreachable_nodes(bundle: &mut Bundle) -> Vec<String> {
    let mut reachable = HashSet::from([bundle.root.clone()]);
    let mut queue = vec![bundle.root.clone()];
    while let Some(iid) = queue.pop() {
        let Some(inst) = bundle.map.get(&iid) else {
            continue;
        };
        for value in inst.fields.values() {
            visit_field_refs(value, &mut |raw| {
                if let RawRef::Local(child) = raw {
                    if reachable.insert(child.clone()) {
                        queue.push(child);
                    }
                }
            });
        }
    }

    let removed: Vec<String> = bundle
        .map
        .keys()
        .filter(|iid| !reachable.contains(*iid))
        .cloned()
        .collect();
    for iid in &removed {
        bundle.map.remove(iid);
    }
    removed
}
