use std::collections::{BTreeMap, HashSet};

use log::warn;
use serde_json::Value;

use super::{Addr, Bundle, RawRef, is_ref_value, visit_field_refs, visit_refs_in_fields};
use crate::errors::{BundleError, BundleResult, FieldTypeError};
use crate::schema::{FieldKind, FieldSchema, SchemaRegistry};

/// A field of a bundled record that holds a reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RefParent {
    pub iid: String,
    pub field: String,
}

/// Ownership problems found by [`check_refs_in_bundle`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefCheckReport {
    /// Records that are only weakly referenced, keyed by iid.
    pub weak_refs_to_unreachable: BTreeMap<String, Vec<RefParent>>,
    /// Strong references pointing into another bundle, keyed by address.
    pub strong_refs_to_xrefs: BTreeMap<Addr, Vec<RefParent>>,
}

impl RefCheckReport {
    pub fn is_clean(&self) -> bool {
        self.weak_refs_to_unreachable.is_empty() && self.strong_refs_to_xrefs.is_empty()
    }
}

/// Walks the bundle from its root and reports records that nothing owns but
/// something weakly references, plus owning references into dependencies.
pub fn check_refs_in_bundle(bundle: &Bundle, schema: &SchemaRegistry) -> BundleResult<RefCheckReport> {
    let mut weak_parents: BTreeMap<String, Vec<RefParent>> = BTreeMap::new();
    let mut strong_parents: BTreeMap<String, Vec<RefParent>> = BTreeMap::new();
    let mut report = RefCheckReport::default();

    let mut reachable = HashSet::from([bundle.root.clone()]);
    let mut queue = vec![bundle.root.clone()];
    while let Some(iid) = queue.pop() {
        let Some(inst) = bundle.map.get(&iid) else {
            continue;
        };
        visit_refs_in_fields(inst, schema, None, &mut |raw, field| {
            let parent = RefParent {
                iid: iid.clone(),
                field: field.name.clone(),
            };
            match raw {
                RawRef::Local(child) => {
                    if reachable.insert(child.clone()) {
                        queue.push(child.clone());
                    }
                    let parents = if field.is_weak_ref() {
                        &mut weak_parents
                    } else {
                        &mut strong_parents
                    };
                    parents.entry(child).or_default().push(parent);
                }
                RawRef::External(addr) if field.is_strong_ref() => {
                    report.strong_refs_to_xrefs.entry(addr).or_default().push(parent);
                }
                RawRef::External(_) => {}
            }
        })?;
    }

    let display = |iid: &str| {
        let type_name = bundle.map.get(iid).map_or("?", |inst| inst.type_name.as_str());
        format!("{type_name}[{iid}]")
    };
    for (iid, parents) in weak_parents {
        if strong_parents.contains_key(&iid) || !bundle.map.contains_key(&iid) {
            continue;
        }
        warn!(
            "Invalid weak ref to unreachable instance {}: {}",
            display(&iid),
            parents
                .iter()
                .map(|p| format!("{}.{}", display(&p.iid), p.field))
                .collect::<Vec<_>>()
                .join(", ")
        );
        report.weak_refs_to_unreachable.insert(iid, parents);
    }
    for addr in report.strong_refs_to_xrefs.keys() {
        warn!("Invalid strong ref to xref {}", addr.key());
    }
    Ok(report)
}

/// Type checks records against the schema. Only the listed iids are checked
/// when `iids` is given. Every failure is collected into one
/// [`BundleError::TypeCheck`].
pub fn check_bundle_fields(
    bundle: &Bundle,
    schema: &SchemaRegistry,
    iids: Option<&[String]>,
) -> BundleResult<()> {
    let all: Vec<String>;
    let iids = match iids {
        Some(iids) => iids,
        None => {
            all = bundle.map.keys().cloned().collect();
            &all
        }
    };

    let mut errors = Vec::new();
    for iid in iids {
        let Some(inst) = bundle.map.get(iid) else {
            continue;
        };
        let fields = schema.all_fields(&inst.type_name)?;
        let mut fail = |field: &str, message: String| {
            errors.push(FieldTypeError {
                iid: iid.clone(),
                field: field.to_string(),
                message,
            })
        };

        for key in inst.fields.keys() {
            match fields.iter().find(|f| &f.name == key) {
                None => fail(key, format!("unexpected field on {}", inst.type_name)),
                Some(f) if f.transient => fail(key, "transient field was persisted".to_string()),
                Some(_) => {}
            }
        }

        for field in fields.iter().filter(|f| f.is_persisted()) {
            match inst.get(&field.name) {
                None | Some(Value::Null) if field.optional => {}
                None => fail(&field.name, "missing required field".to_string()),
                Some(Value::Null) => fail(&field.name, "null is not allowed".to_string()),
                Some(value) => {
                    if let Err(message) = check_value(bundle, schema, field, value) {
                        fail(&field.name, message);
                    }
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(BundleError::TypeCheck(errors))
    }
}

fn check_value(
    bundle: &Bundle,
    schema: &SchemaRegistry,
    field: &FieldSchema,
    value: &Value,
) -> Result<(), String> {
    match field.kind {
        FieldKind::Scalar => {
            if field.value_type.accepts(value) {
                Ok(())
            } else {
                Err(format!("{value} is not a {}", field.value_type))
            }
        }
        FieldKind::Embedded => {
            let mut has_ref = false;
            visit_field_refs(value, &mut |_| has_ref = true);
            if has_ref {
                Err("embedded value contains a reference".to_string())
            } else {
                Ok(())
            }
        }
        FieldKind::Ref => check_ref(bundle, schema, field, value),
        FieldKind::RefList => {
            let items = value
                .as_array()
                .ok_or_else(|| format!("{value} is not an array"))?;
            items
                .iter()
                .try_for_each(|item| check_ref(bundle, schema, field, item))
        }
        FieldKind::RefMap => {
            let entries = value
                .as_object()
                .filter(|_| !is_ref_value(value))
                .ok_or_else(|| format!("{value} is not a plain object"))?;
            entries
                .values()
                .try_for_each(|item| check_ref(bundle, schema, field, item))
        }
    }
}

fn check_ref(
    bundle: &Bundle,
    schema: &SchemaRegistry,
    field: &FieldSchema,
    value: &Value,
) -> Result<(), String> {
    match RawRef::parse(value) {
        None => Err(format!("{value} is not a reference")),
        // cross-bundle targets are not loaded here
        Some(RawRef::External(_)) => Ok(()),
        Some(RawRef::Local(iid)) => {
            let Some(target) = bundle.map.get(&iid) else {
                return Err(format!("{value} points at a missing record"));
            };
            if !schema.contains_class(&target.type_name) {
                return Err(format!(
                    "{value} has unknown type \"{}\"",
                    target.type_name
                ));
            }
            match field.target.as_deref() {
                Some(want) if !schema.is_subclass(&target.type_name, want) => Err(format!(
                    "Wrong type (got {}, want {want})",
                    target.type_name
                )),
                _ => Ok(()),
            }
        }
    }
}
