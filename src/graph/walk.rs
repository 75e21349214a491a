//! Schema-driven traversal of an [`ObjectGraph`].
//!
//! These helpers let migrations walk a graph generically, without knowing
//! which classes hold which references.

use std::collections::HashSet;

use super::{FieldValue, InstId, ObjectGraph};
use crate::errors::{BundleError, BundleResult};
use crate::schema::{FieldSchema, SchemaRegistry};

/// Which references a traversal follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strength {
    /// Owning references only.
    Strong,
    /// Owning and weak references.
    All,
}

impl Strength {
    fn follows(&self, field: &FieldSchema) -> bool {
        match self {
            Strength::Strong => field.is_strong_ref(),
            Strength::All => field.kind.is_reference(),
        }
    }
}

/// Outgoing references of `id`, in schema field order. Transient fields are
/// skipped.
pub fn references<'s>(
    graph: &ObjectGraph,
    schema: &'s SchemaRegistry,
    id: InstId,
) -> BundleResult<Vec<(&'s FieldSchema, InstId)>> {
    let inst = graph
        .instance(id)
        .ok_or(BundleError::UnknownInstance(id.index()))?;
    let mut out = Vec::new();
    for field in schema.persisted_fields(inst.class())? {
        if !field.kind.is_reference() {
            continue;
        }
        if let Some(value) = inst.get(&field.name) {
            out.extend(value.referenced().into_iter().map(|child| (field, child)));
        }
    }
    Ok(out)
}

/// Instances reachable from `root` (root included), in depth-first preorder.
pub fn reachable(
    graph: &ObjectGraph,
    schema: &SchemaRegistry,
    root: InstId,
    strength: Strength,
) -> BundleResult<Vec<InstId>> {
    let mut seen = HashSet::from([root]);
    let mut order = Vec::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        order.push(id);
        let children = references(graph, schema, id)?;
        for (field, child) in children.into_iter().rev() {
            if strength.follows(field) && seen.insert(child) {
                stack.push(child);
            }
        }
    }
    Ok(order)
}

/// Reachable instances whose class is `class` or one of its subclasses.
pub fn instances_of(
    graph: &ObjectGraph,
    schema: &SchemaRegistry,
    root: InstId,
    class: &str,
) -> BundleResult<Vec<InstId>> {
    Ok(reachable(graph, schema, root, Strength::All)?
        .into_iter()
        .filter(|id| {
            graph
                .class_of(*id)
                .is_some_and(|c| schema.is_subclass(c, class))
        })
        .collect())
}

/// Every `(parent, field)` pair under `root` holding a reference to `target`.
pub fn parents_of(
    graph: &ObjectGraph,
    schema: &SchemaRegistry,
    root: InstId,
    target: InstId,
) -> BundleResult<Vec<(InstId, String)>> {
    let mut parents = Vec::new();
    for id in reachable(graph, schema, root, Strength::All)? {
        for (field, child) in references(graph, schema, id)? {
            if child == target {
                parents.push((id, field.name.clone()));
            }
        }
    }
    Ok(parents)
}

/// Sets every derived back-pointer field of the instances in `owners`'
/// children. Each owner's strong reference fields are scanned, and a child
/// whose class declares a field with `inverse_of` equal to the owning field's
/// name gets that field pointed at the owner.
pub fn recompute_inverse_fields(
    graph: &mut ObjectGraph,
    schema: &SchemaRegistry,
    owners: &[InstId],
) -> BundleResult<()> {
    for &owner in owners {
        let Some(class) = graph.class_of(owner) else {
            continue;
        };
        for field in schema.inverse_fields(class) {
            graph.set(owner, field.name.clone(), FieldValue::Null)?;
        }
    }

    for &owner in owners {
        for (field, child) in references(graph, schema, owner)? {
            if !field.is_strong_ref() {
                continue;
            }
            let Some(child_class) = graph.class_of(child) else {
                continue;
            };
            let inverse: Vec<String> = schema
                .inverse_fields(child_class)
                .into_iter()
                .filter(|f| f.inverse_of.as_deref() == Some(field.name.as_str()))
                .map(|f| f.name.clone())
                .collect();
            for name in inverse {
                graph.set(child, name, owner)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ClassSchema, FieldKind, ValueType};
    use serde_json::json;

    fn schema() -> SchemaRegistry {
        SchemaRegistry::builder("walk")
            .class_schema(
                ClassSchema::new("Component")
                    .field(FieldSchema::reference("tplTree", FieldKind::Ref, "Tpl"))
                    .field(FieldSchema::reference("owner", FieldKind::Ref, "Component").optional().weak()),
            )
            .class_schema(
                ClassSchema::new("Tpl")
                    .field(FieldSchema::scalar("name", ValueType::String))
                    .field(FieldSchema::reference("children", FieldKind::RefList, "Tpl"))
                    .field(FieldSchema::inverse("parent", "children", "Tpl")),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn walks_in_field_order_and_sets_back_pointers() {
        let schema = schema();
        let mut graph = ObjectGraph::new();
        let component = graph.create("Component");
        let root = graph.create("Tpl");
        let left = graph.create("Tpl");
        let right = graph.create("Tpl");
        graph.set(component, "tplTree", root).unwrap();
        graph.set(component, "owner", component).unwrap();
        graph.set(root, "children", vec![left, right]).unwrap();
        for (id, name) in [(root, "root"), (left, "left"), (right, "right")] {
            graph.set(id, "name", json!(name)).unwrap();
        }
        graph.set(left, "children", Vec::<InstId>::new()).unwrap();
        graph.set(right, "children", Vec::<InstId>::new()).unwrap();

        let order = reachable(&graph, &schema, component, Strength::Strong).unwrap();
        assert_eq!(order, vec![component, root, left, right]);

        let tpls = instances_of(&graph, &schema, component, "Tpl").unwrap();
        assert_eq!(tpls.len(), 3);

        let parents = parents_of(&graph, &schema, component, component).unwrap();
        assert_eq!(parents, vec![(component, "owner".to_string())]);

        recompute_inverse_fields(&mut graph, &schema, &[root, left, right]).unwrap();
        assert_eq!(graph.ref_of(left, "parent"), Some(root));
        assert_eq!(graph.ref_of(right, "parent"), Some(root));
        assert!(graph.get(root, "parent").unwrap().is_null());
    }
}
