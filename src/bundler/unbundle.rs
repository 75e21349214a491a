use std::collections::{BTreeMap, HashSet};

use log::{debug, warn};
use serde_json::Value;

use super::Bundler;
use crate::bundle::{Addr, Bundle, RawRef, check_bundle_fields, remove_unreachable_nodes};
use crate::config::ReferencePolicy;
use crate::errors::{BundleError, BundleResult};
use crate::graph::walk::recompute_inverse_fields;
use crate::graph::{FieldValue, InstId};
use crate::schema::{FieldKind, FieldSchema};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnbundleOptions {
    /// Prune records unreachable from the root before unbundling, then
    /// recompute derived back-pointer fields of the unbundled instances.
    pub update_dynamic_bundle: bool,
    /// Load the bundle read-only, as a package the bundle being migrated
    /// depends on. Packages are migrated first, so their records may be newer
    /// than the schema: records of unknown classes are skipped, and dangling
    /// references, missing fields and mismatched field kinds are dropped with
    /// a warning whatever the bundler's policy.
    pub as_dependency: bool,
}

impl UnbundleOptions {
    pub fn dependency() -> Self {
        Self {
            as_dependency: true,
            ..Self::default()
        }
    }
}

/// Fields decoded for one instance, assigned once the whole bundle decoded.
type StagedFields = Vec<(InstId, Vec<(String, FieldValue)>)>;

impl Bundler {
    /// Materializes `bundle` under address namespace `uuid` and returns its
    /// root instance.
    pub fn unbundle(&mut self, bundle: &Bundle, uuid: &str) -> BundleResult<InstId> {
        self.unbundle_with(bundle, uuid, UnbundleOptions::default())
    }

    pub fn unbundle_with(
        &mut self,
        bundle: &Bundle,
        uuid: &str,
        options: UnbundleOptions,
    ) -> BundleResult<InstId> {
        let pruned;
        let bundle = if options.update_dynamic_bundle {
            let mut copy = bundle.clone();
            let removed = remove_unreachable_nodes(&mut copy);
            if !removed.is_empty() {
                debug!(
                    "Pruned {} unreachable records from bundle {uuid}",
                    removed.len()
                );
            }
            pruned = copy;
            &pruned
        } else {
            bundle
        };

        let local = self.unbundle_records(bundle, uuid, options.as_dependency)?;
        let root = *local
            .get(&bundle.root)
            .ok_or_else(|| BundleError::MissingReference(bundle.root.clone()))?;
        self.roots.insert(uuid.to_string(), root);

        if options.update_dynamic_bundle {
            let owners: Vec<InstId> = local.values().copied().collect();
            let schema = std::sync::Arc::clone(&self.schema);
            recompute_inverse_fields(&mut self.graph, &schema, &owners)?;
        }
        Ok(root)
    }

    /// Unbundles every record of `bundle` and returns the instance created
    /// (or reused) for each iid. Does not register a root.
    ///
    /// Records are first created empty so references resolve regardless of
    /// declaration order; fields are filled in a second pass. An address
    /// unbundled before is updated in place rather than duplicated. On error
    /// the bundler is left as it was before the call.
    pub fn unbundle_to_map(
        &mut self,
        bundle: &Bundle,
        uuid: &str,
    ) -> BundleResult<BTreeMap<String, InstId>> {
        self.unbundle_records(bundle, uuid, false)
    }

    fn unbundle_records(
        &mut self,
        bundle: &Bundle,
        uuid: &str,
        as_dependency: bool,
    ) -> BundleResult<BTreeMap<String, InstId>> {
        if self.config.check_fields && !as_dependency {
            check_bundle_fields(bundle, &self.schema, None)?;
        }

        let mut local = BTreeMap::new();
        let mut fresh = Vec::new();
        for (iid, record) in &bundle.map {
            if !self.schema.contains_class(&record.type_name) {
                if as_dependency {
                    warn!(
                        "Skipping record {iid} of {uuid}: unknown class {}",
                        record.type_name
                    );
                    continue;
                }
                return Err(BundleError::UnknownType(record.type_name.clone()));
            }
            let addr = Addr::new(uuid, iid.as_str());
            match self.addr_insts.get(&addr).copied() {
                Some(id) => {
                    let found = self.graph.class_of(id).unwrap_or_default();
                    if found != record.type_name {
                        return Err(BundleError::CachedTypeMismatch {
                            addr,
                            found: found.to_string(),
                            expected: record.type_name.clone(),
                        });
                    }
                    local.insert(iid.clone(), id);
                }
                None => fresh.push((iid, record.type_name.as_str(), addr)),
            }
        }

        let graph_len = self.graph.len();
        let next_iid = self.next_iid.get(uuid).copied();
        let mut created = Vec::with_capacity(fresh.len());
        for (iid, class, addr) in fresh {
            let id = self.graph.create(class);
            self.register(id, addr.clone());
            created.push(addr);
            local.insert(iid.clone(), id);
        }

        let policy = if as_dependency {
            ReferencePolicy::Lenient
        } else {
            self.config.reference_policy
        };
        let staged = match self.decode_records(bundle, &local, policy, as_dependency) {
            Ok(staged) => staged,
            Err(err) => {
                self.discard_created(uuid, graph_len, next_iid, created);
                return Err(err);
            }
        };

        for (id, fields) in staged {
            self.graph.clear_fields(id);
            for (name, value) in fields {
                self.graph.set(id, name, value)?;
            }
        }
        Ok(local)
    }

    fn decode_records(
        &self,
        bundle: &Bundle,
        local: &BTreeMap<String, InstId>,
        policy: ReferencePolicy,
        as_dependency: bool,
    ) -> BundleResult<StagedFields> {
        let mut staged = Vec::with_capacity(local.len());
        for (iid, record) in &bundle.map {
            let Some(&id) = local.get(iid) else {
                continue;
            };
            let fields = self.schema.all_fields(&record.type_name)?;
            let mut decoded = Vec::with_capacity(fields.len());
            for field in fields.iter().filter(|f| f.is_persisted()) {
                let value = match record.get(&field.name) {
                    Some(value) => {
                        match self.decode_field(local, &record.type_name, field, value, policy) {
                            Err(err @ BundleError::FieldKindMismatch { .. }) if as_dependency => {
                                warn!("{err}; dropping it from dependency record {iid}");
                                FieldValue::Null
                            }
                            other => other?,
                        }
                    }
                    None if field.optional => FieldValue::Null,
                    None => {
                        let missing = BundleError::MissingField {
                            class: record.type_name.clone(),
                            field: field.name.clone(),
                            iid: iid.clone(),
                        };
                        on_unresolved(policy, missing)?;
                        FieldValue::Null
                    }
                };
                decoded.push((field.name.clone(), value));
            }

            let known: HashSet<&str> = fields.iter().map(|f| f.name.as_str()).collect();
            for key in record.fields.keys() {
                if !known.contains(key.as_str()) {
                    debug!(
                        "Ignoring unknown field {}.{key} (IID {iid})",
                        record.type_name
                    );
                }
            }
            staged.push((id, decoded));
        }
        Ok(staged)
    }

    /// Forgets the instances and addresses a failed unbundle allocated.
    fn discard_created(
        &mut self,
        uuid: &str,
        graph_len: usize,
        next_iid: Option<u64>,
        created: Vec<Addr>,
    ) {
        for addr in created {
            if let Some(id) = self.addr_insts.remove(&addr) {
                self.inst_addrs.remove(&id);
            }
        }
        self.graph.truncate(graph_len);
        match next_iid {
            Some(next) => {
                self.next_iid.insert(uuid.to_string(), next);
            }
            None => {
                self.next_iid.remove(uuid);
            }
        }
    }

    fn decode_field(
        &self,
        local: &BTreeMap<String, InstId>,
        class: &str,
        field: &FieldSchema,
        value: &Value,
        policy: ReferencePolicy,
    ) -> BundleResult<FieldValue> {
        if value.is_null() {
            return Ok(FieldValue::Null);
        }
        let mismatch = || BundleError::FieldKindMismatch {
            class: class.to_string(),
            field: field.name.clone(),
            expected: field.kind.to_string(),
            found: value.to_string(),
        };
        let parse = |item: &Value| RawRef::parse(item).ok_or_else(mismatch);

        match field.kind {
            FieldKind::Scalar | FieldKind::Embedded => Ok(FieldValue::Scalar(value.clone())),
            FieldKind::Ref => Ok(self
                .resolve(local, parse(value)?, policy)?
                .map_or(FieldValue::Null, FieldValue::Ref)),
            FieldKind::RefList => {
                let items = value.as_array().ok_or_else(mismatch)?;
                let mut ids = Vec::with_capacity(items.len());
                for item in items {
                    ids.extend(self.resolve(local, parse(item)?, policy)?);
                }
                Ok(FieldValue::RefList(ids))
            }
            FieldKind::RefMap => {
                let entries = value.as_object().ok_or_else(mismatch)?;
                let mut ids = BTreeMap::new();
                for (key, item) in entries {
                    if let Some(id) = self.resolve(local, parse(item)?, policy)? {
                        ids.insert(key.clone(), id);
                    }
                }
                Ok(FieldValue::RefMap(ids))
            }
        }
    }

    /// Looks a reference up among this bundle's records or, for `__xref`s,
    /// among the bundles unbundled earlier. `None` means the reference was
    /// dropped under the lenient policy.
    fn resolve(
        &self,
        local: &BTreeMap<String, InstId>,
        raw: RawRef,
        policy: ReferencePolicy,
    ) -> BundleResult<Option<InstId>> {
        let found = match &raw {
            RawRef::Local(iid) => local.get(iid).copied(),
            RawRef::External(addr) => self.addr_insts.get(addr).copied(),
        };
        if found.is_some() {
            return Ok(found);
        }
        let missing = match raw {
            RawRef::Local(iid) => BundleError::MissingReference(iid),
            RawRef::External(addr) => BundleError::MissingXref {
                addr,
                known: self.all_uuids(),
            },
        };
        on_unresolved(policy, missing)?;
        Ok(None)
    }
}

fn on_unresolved(policy: ReferencePolicy, error: BundleError) -> BundleResult<()> {
    match policy {
        ReferencePolicy::Strict => Err(error),
        ReferencePolicy::Lenient => {
            warn!("{error}; continuing without it");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::BundlerConfig;
    use crate::schema::{ClassSchema, SchemaRegistry, ValueType};
    use serde_json::json;

    fn schema() -> Arc<SchemaRegistry> {
        Arc::new(
            SchemaRegistry::builder("unbundle")
                .class_schema(
                    ClassSchema::new("Component")
                        .field(FieldSchema::scalar("name", ValueType::String))
                        .field(FieldSchema::reference("tplTree", FieldKind::Ref, "Tpl")),
                )
                .class_schema(
                    ClassSchema::new("Tpl")
                        .field(FieldSchema::reference("children", FieldKind::RefList, "Tpl"))
                        .field(FieldSchema::inverse("parent", "children", "Tpl")),
                )
                .build()
                .unwrap(),
        )
    }

    fn bundle(map: Value) -> Bundle {
        Bundle::from_json(&json!({"root": "1", "map": map, "version": "0"}).to_string()).unwrap()
    }

    #[test]
    fn strict_policy_rejects_dangling_refs() {
        let b = bundle(json!({
            "1": {"__type": "Component", "name": "c", "tplTree": {"__ref": "2"}},
            "2": {"__type": "Tpl", "children": [{"__ref": "3"}]}
        }));
        let mut bundler = Bundler::new(schema());
        assert!(matches!(
            bundler.unbundle(&b, "p"),
            Err(BundleError::MissingReference(iid)) if iid == "3"
        ));
    }

    #[test]
    fn lenient_policy_drops_dangling_refs_and_missing_fields() {
        let b = bundle(json!({
            "1": {"__type": "Component", "tplTree": {"__xref": {"uuid": "gone", "iid": "1"}}, "legacy": 1},
            "2": {"__type": "Tpl", "children": [{"__ref": "3"}, {"__ref": "2"}]}
        }));
        let mut bundler = Bundler::with_config(schema(), BundlerConfig::lenient());
        let root = bundler.unbundle(&b, "p").unwrap();
        let graph = bundler.graph();
        assert!(graph.get(root, "name").unwrap().is_null());
        assert!(graph.get(root, "tplTree").unwrap().is_null());
        assert!(graph.get(root, "legacy").is_none());
        let tpl = bundler.obj_by_addr(&Addr::new("p", "2")).unwrap();
        assert_eq!(graph.refs_of(tpl, "children"), vec![tpl]);
    }

    #[test]
    fn declaration_order_does_not_matter_and_addresses_are_reused() {
        let b = bundle(json!({
            "9": {"__type": "Tpl", "children": []},
            "1": {"__type": "Component", "name": "c", "tplTree": {"__ref": "5"}},
            "5": {"__type": "Tpl", "children": [{"__ref": "9"}]}
        }));
        let mut bundler = Bundler::new(schema());
        let root = bundler.unbundle_with(&b, "p", UnbundleOptions { update_dynamic_bundle: true, ..Default::default() }).unwrap();
        let tree = bundler.graph().ref_of(root, "tplTree").unwrap();
        let leaf = bundler.graph().refs_of(tree, "children")[0];
        assert_eq!(bundler.graph().ref_of(leaf, "parent"), Some(tree));

        let count = bundler.graph().len();
        let again = bundler.unbundle(&b, "p").unwrap();
        assert_eq!(again, root);
        assert_eq!(bundler.graph().len(), count);

        // new instances continue after the largest numeric iid
        let fresh = bundler.graph_mut().create("Tpl");
        bundler.graph_mut().set(fresh, "children", Vec::<InstId>::new()).unwrap();
        bundler.graph_mut().push_ref(leaf, "children", fresh).unwrap();
        let out = bundler.bundle(root, "p", "0").unwrap();
        assert_eq!(bundler.addr_of(fresh).map(|a| a.iid.as_str()), Some("10"));
        assert_eq!(out.map.len(), 4);
    }

    #[test]
    fn cached_instance_with_other_type_is_rejected() {
        let mut bundler = Bundler::new(schema());
        bundler
            .unbundle(&bundle(json!({"1": {"__type": "Tpl", "children": []}})), "p")
            .unwrap();
        let err = bundler
            .unbundle(&bundle(json!({"1": {"__type": "Component", "name": "c", "tplTree": null}})), "p")
            .unwrap_err();
        assert!(matches!(err, BundleError::CachedTypeMismatch { .. }));
    }

    #[test]
    fn failed_reunbundle_leaves_cached_instances_untouched() {
        let mut bundler = Bundler::new(schema());
        let root = bundler
            .unbundle(
                &bundle(json!({
                    "1": {"__type": "Component", "name": "keep", "tplTree": null},
                    "2": {"__type": "Tpl", "children": []}
                })),
                "p",
            )
            .unwrap();
        let count = bundler.graph().len();

        let dangling = bundle(json!({
            "1": {"__type": "Component", "name": "new", "tplTree": {"__ref": "404"}},
            "3": {"__type": "Tpl", "children": []}
        }));
        assert!(matches!(
            bundler.unbundle(&dangling, "p"),
            Err(BundleError::MissingReference(iid)) if iid == "404"
        ));
        assert_eq!(bundler.graph().scalar_of(root, "name"), Some(&json!("keep")));
        assert_eq!(bundler.graph().len(), count);
        assert_eq!(bundler.obj_by_addr(&Addr::new("p", "3")), None);
        assert_eq!(bundler.all_iids_by_uuid("p"), vec!["1", "2"]);

        let retyped = bundle(json!({
            "1": {"__type": "Component", "name": "new", "tplTree": null},
            "2": {"__type": "Component", "name": "was a tpl", "tplTree": null}
        }));
        assert!(matches!(
            bundler.unbundle(&retyped, "p"),
            Err(BundleError::CachedTypeMismatch { .. })
        ));
        assert_eq!(bundler.graph().scalar_of(root, "name"), Some(&json!("keep")));

        // fresh iids continue where they did before the failures
        let tpl = bundler.graph_mut().create("Tpl");
        bundler.graph_mut().set(tpl, "children", Vec::<InstId>::new()).unwrap();
        bundler.graph_mut().set(root, "tplTree", tpl).unwrap();
        bundler.bundle(root, "p", "0").unwrap();
        assert_eq!(bundler.addr_of(tpl).map(|a| a.iid.as_str()), Some("3"));
    }

    #[test]
    fn dependencies_newer_than_the_schema_still_load() {
        let pkg = bundle(json!({
            "1": {"__type": "Component", "nameV2": "renamed", "tplTree": {"__ref": "2"}},
            "2": {"__type": "Tpl", "children": {"not": "a list"}},
            "3": {"__type": "AddedLater", "label": "x"}
        }));
        let mut bundler = Bundler::new(schema());
        assert!(bundler.unbundle(&pkg, "pkg").is_err());
        assert!(bundler.graph().is_empty());

        let root = bundler
            .unbundle_with(&pkg, "pkg", UnbundleOptions::dependency())
            .unwrap();
        let graph = bundler.graph();
        assert!(graph.get(root, "name").unwrap().is_null());
        let tree = graph.ref_of(root, "tplTree").unwrap();
        assert!(graph.get(tree, "children").unwrap().is_null());
        assert_eq!(bundler.obj_by_addr(&Addr::new("pkg", "3")), None);
        assert_eq!(bundler.root_of("pkg"), Some(root));
    }
}
