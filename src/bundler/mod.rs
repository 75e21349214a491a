//! Conversion between an [`ObjectGraph`] and the flat [`Bundle`] format.
//!
//! A [`Bundler`] owns one graph arena plus the address book that maps each
//! arena instance to its `(uuid, iid)` address. Several bundles (a site and
//! the packages it depends on) are usually unbundled into the same
//! `Bundler`, so cross-bundle `__xref`s resolve to plain [`InstId`]s.

mod unbundle;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use log::debug;
use serde_json::{Map, Value};

use crate::bundle::{Addr, Bundle, BundledInst, RawRef};
use crate::config::BundlerConfig;
use crate::errors::{BundleError, BundleResult};
use crate::graph::{FieldValue, InstId, ObjectGraph};
use crate::schema::{FieldKind, FieldSchema, SchemaRegistry};

pub use unbundle::UnbundleOptions;

pub struct Bundler {
    schema: Arc<SchemaRegistry>,
    config: BundlerConfig,
    graph: ObjectGraph,
    inst_addrs: HashMap<InstId, Addr>,
    addr_insts: HashMap<Addr, InstId>,
    roots: BTreeMap<String, InstId>,
    next_iid: HashMap<String, u64>,
}

/// Traversal state of one `bundle` call.
struct BundleWalk<'a> {
    uuid: &'a str,
    seen: HashSet<InstId>,
    queue: VecDeque<InstId>,
    deps: BTreeSet<String>,
}

impl Bundler {
    pub fn new(schema: Arc<SchemaRegistry>) -> Self {
        Self::with_config(schema, BundlerConfig::default())
    }

    pub fn with_config(schema: Arc<SchemaRegistry>, config: BundlerConfig) -> Self {
        Self {
            schema,
            config,
            graph: ObjectGraph::new(),
            inst_addrs: HashMap::new(),
            addr_insts: HashMap::new(),
            roots: BTreeMap::new(),
            next_iid: HashMap::new(),
        }
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn config(&self) -> &BundlerConfig {
        &self.config
    }

    pub fn graph(&self) -> &ObjectGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut ObjectGraph {
        &mut self.graph
    }

    pub fn addr_of(&self, id: InstId) -> Option<&Addr> {
        self.inst_addrs.get(&id)
    }

    pub fn addr_slug_of(&self, id: InstId) -> Option<String> {
        self.addr_of(id).map(Addr::slug)
    }

    pub fn obj_by_addr(&self, addr: &Addr) -> Option<InstId> {
        self.addr_insts.get(addr).copied()
    }

    /// Iids known for bundle `uuid`, sorted.
    pub fn all_iids_by_uuid(&self, uuid: &str) -> Vec<String> {
        let mut iids: Vec<String> = self
            .addr_insts
            .keys()
            .filter(|addr| addr.uuid == uuid)
            .map(|addr| addr.iid.clone())
            .collect();
        iids.sort_by(|a, b| natural_iid_order(a, b));
        iids
    }

    /// Every bundle uuid this bundler holds instances of.
    pub fn all_uuids(&self) -> Vec<String> {
        self.inst_addrs
            .values()
            .map(|addr| addr.uuid.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn root_of(&self, uuid: &str) -> Option<InstId> {
        self.roots.get(uuid).copied()
    }

    /// Dependencies of `bundle` that have not been unbundled here yet.
    pub fn unloaded_dependencies(&self, bundle: &Bundle) -> Vec<String> {
        bundle
            .deps
            .iter()
            .filter(|uuid| !self.roots.contains_key(*uuid))
            .cloned()
            .collect()
    }

    /// Flattens everything reachable from `root` into a bundle owned by
    /// `uuid`.
    ///
    /// Instances that already have an address keep it, so re-bundling an
    /// unbundled graph produces the same iids. Instances owned by another
    /// bundle are written as `__xref`s and their uuids listed in `deps`.
    pub fn bundle(&mut self, root: InstId, uuid: &str, version: &str) -> BundleResult<Bundle> {
        if let Some(addr) = self.inst_addrs.get(&root) {
            if addr.uuid != uuid {
                return Err(BundleError::ForeignRoot {
                    uuid: uuid.to_string(),
                    owner: addr.uuid.clone(),
                });
            }
        }
        if !self.graph.contains(root) {
            return Err(BundleError::UnknownInstance(root.index()));
        }

        let schema = Arc::clone(&self.schema);
        let root_addr = self.ensure_addr(root, uuid);
        let mut bundle = Bundle::new(root_addr.iid, version);
        let mut walk = BundleWalk {
            uuid,
            seen: HashSet::from([root]),
            queue: VecDeque::from([root]),
            deps: BTreeSet::new(),
        };

        while let Some(id) = walk.queue.pop_front() {
            let class = self
                .graph
                .class_of(id)
                .ok_or(BundleError::UnknownInstance(id.index()))?
                .to_string();
            let mut record = BundledInst::new(class.as_str());
            for field in schema.persisted_fields(&class)? {
                let value = match self.graph.get(id, &field.name).cloned() {
                    None | Some(FieldValue::Null) => Value::Null,
                    Some(value) => self.encode_field(&class, field, value, &mut walk)?,
                };
                record.insert(field.name.clone(), value);
            }
            if let Some(inst) = self.graph.instance(id) {
                for name in inst.fields().keys() {
                    if schema.field(&class, name).is_none() {
                        debug!("Not bundling unknown field {class}.{name}");
                    }
                }
            }
            let iid = self.ensure_addr(id, uuid).iid;
            bundle.map.insert(iid, record);
        }

        bundle.deps = walk.deps.into_iter().collect();
        self.roots.insert(uuid.to_string(), root);
        Ok(bundle)
    }

    fn encode_field(
        &mut self,
        class: &str,
        field: &FieldSchema,
        value: FieldValue,
        walk: &mut BundleWalk<'_>,
    ) -> BundleResult<Value> {
        match (field.kind, value) {
            (FieldKind::Scalar | FieldKind::Embedded, FieldValue::Scalar(value)) => Ok(value),
            (FieldKind::Ref, FieldValue::Ref(child)) => self.encode_ref(child, walk),
            (FieldKind::RefList, FieldValue::RefList(children)) => children
                .into_iter()
                .map(|child| self.encode_ref(child, walk))
                .collect::<BundleResult<Vec<_>>>()
                .map(Value::Array),
            (FieldKind::RefMap, FieldValue::RefMap(children)) => {
                let mut object = Map::new();
                for (key, child) in children {
                    object.insert(key, self.encode_ref(child, walk)?);
                }
                Ok(Value::Object(object))
            }
            (kind, value) => Err(BundleError::FieldKindMismatch {
                class: class.to_string(),
                field: field.name.clone(),
                expected: kind.to_string(),
                found: describe_field_value(&value).to_string(),
            }),
        }
    }

    fn encode_ref(&mut self, child: InstId, walk: &mut BundleWalk<'_>) -> BundleResult<Value> {
        if !self.graph.contains(child) {
            return Err(BundleError::UnknownInstance(child.index()));
        }
        if let Some(addr) = self.inst_addrs.get(&child) {
            if addr.uuid != walk.uuid {
                walk.deps.insert(addr.uuid.clone());
                return Ok(RawRef::External(addr.clone()).to_value());
            }
        }
        let addr = self.ensure_addr(child, walk.uuid);
        if walk.seen.insert(child) {
            walk.queue.push_back(child);
        }
        Ok(RawRef::Local(addr.iid).to_value())
    }

    fn ensure_addr(&mut self, id: InstId, uuid: &str) -> Addr {
        if let Some(addr) = self.inst_addrs.get(&id) {
            return addr.clone();
        }
        let addr = Addr::new(uuid, self.alloc_iid(uuid));
        self.register(id, addr.clone());
        addr
    }

    /// Next unused decimal iid in `uuid`'s namespace.
    fn alloc_iid(&mut self, uuid: &str) -> String {
        let next = self.next_iid.entry(uuid.to_string()).or_insert(1);
        loop {
            let iid = next.to_string();
            *next += 1;
            if !self.addr_insts.contains_key(&Addr::new(uuid, iid.as_str())) {
                return iid;
            }
        }
    }

    fn register(&mut self, id: InstId, addr: Addr) {
        if let Ok(n) = addr.iid.parse::<u64>() {
            let next = self.next_iid.entry(addr.uuid.clone()).or_insert(1);
            *next = (*next).max(n + 1);
        }
        self.addr_insts.insert(addr.clone(), id);
        self.inst_addrs.insert(id, addr);
    }
}

fn natural_iid_order(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

fn describe_field_value(value: &FieldValue) -> &'static str {
    match value {
        FieldValue::Null => "null",
        FieldValue::Scalar(_) => "scalar",
        FieldValue::Ref(_) => "ref",
        FieldValue::RefList(_) => "ref-list",
        FieldValue::RefMap(_) => "ref-map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::check_existing_references;
    use crate::config::ReferencePolicy;
    use crate::schema::{ClassSchema, ValueType};
    use serde_json::json;

    fn schema() -> Arc<SchemaRegistry> {
        Arc::new(
            SchemaRegistry::builder("bundler")
                .class_schema(
                    ClassSchema::new("Site")
                        .field(FieldSchema::reference("components", FieldKind::RefList, "Component"))
                        .field(FieldSchema::reference("byName", FieldKind::RefMap, "Component").optional()),
                )
                .class_schema(
                    ClassSchema::new("Component")
                        .field(FieldSchema::scalar("name", ValueType::String))
                        .field(FieldSchema::reference("site", FieldKind::Ref, "Site").weak())
                        .field(FieldSchema::reference("superComp", FieldKind::Ref, "Component").optional().weak()),
                )
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn bundles_cycles_once_per_instance() {
        let mut bundler = Bundler::new(schema());
        let graph = bundler.graph_mut();
        let site = graph.create("Site");
        let button = graph.create("Component");
        graph.set(site, "components", vec![button]).unwrap();
        graph.set(button, "site", site).unwrap();
        graph.set(button, "name", json!("Button")).unwrap();

        let bundle = bundler.bundle(site, "proj", "3").unwrap();
        assert_eq!(bundle.map.len(), 2);
        assert_eq!(bundle.root, "1");
        assert_eq!(bundle.map["2"].get("site"), Some(&json!({"__ref": "1"})));
        assert_eq!(bundle.map["1"].get("byName"), Some(&Value::Null));
        check_existing_references(&bundle).unwrap();

        assert_eq!(bundler.addr_slug_of(button).as_deref(), Some("proj-2"));
        assert_eq!(bundler.root_of("proj"), Some(site));
        assert_eq!(bundler.all_iids_by_uuid("proj"), vec!["1", "2"]);
    }

    #[test]
    fn references_into_dependencies_become_xrefs() {
        let schema = schema();
        let mut bundler = Bundler::new(Arc::clone(&schema));
        let dep = Bundle::from_json(
            &json!({
                "root": "10",
                "map": {
                    "10": {"__type": "Site", "components": [{"__ref": "11"}], "byName": null},
                    "11": {"__type": "Component", "name": "Base", "site": {"__ref": "10"}, "superComp": null}
                },
                "version": "3"
            })
            .to_string(),
        )
        .unwrap();
        bundler.unbundle(&dep, "pkg").unwrap();
        let base = bundler.obj_by_addr(&Addr::new("pkg", "11")).unwrap();

        let graph = bundler.graph_mut();
        let site = graph.create("Site");
        let derived = graph.create("Component");
        graph.set(site, "components", vec![derived]).unwrap();
        graph.set(derived, "site", site).unwrap();
        graph.set(derived, "name", json!("Derived")).unwrap();
        graph.set(derived, "superComp", base).unwrap();

        let bundle = bundler.bundle(site, "proj", "3").unwrap();
        assert_eq!(bundle.deps, vec!["pkg".to_string()]);
        assert_eq!(
            bundle.map["2"].get("superComp"),
            Some(&json!({"__xref": {"uuid": "pkg", "iid": "11"}}))
        );
        assert_eq!(bundler.all_uuids(), vec!["pkg".to_string(), "proj".to_string()]);
        assert!(matches!(
            bundler.bundle(base, "proj", "3"),
            Err(BundleError::ForeignRoot { .. })
        ));
    }

    #[test]
    fn kind_mismatch_is_reported() {
        let mut bundler = Bundler::with_config(
            schema(),
            BundlerConfig::builder()
                .reference_policy(ReferencePolicy::Lenient)
                .build(),
        );
        let graph = bundler.graph_mut();
        let site = graph.create("Site");
        graph.set(site, "components", json!("oops")).unwrap();
        assert!(matches!(
            bundler.bundle(site, "proj", "1"),
            Err(BundleError::FieldKindMismatch { .. })
        ));
    }
}
