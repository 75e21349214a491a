//! The Bundle wire format.
//!
//! A [`Bundle`] is a flat, reference-indirected rendering of an object graph:
//!
//! ```json
//! {
//!   "root": "1",
//!   "map": {
//!     "1": { "__type": "Site", "components": [{ "__ref": "2" }] },
//!     "2": { "__type": "Component", "name": "Button",
//!            "base": { "__xref": { "uuid": "pkg-1", "iid": "7" } } }
//!   },
//!   "deps": ["pkg-1"],
//!   "version": "175-refactor-data-model"
//! }
//! ```
//!
//! `__ref` points at another key of the same `map`; `__xref` points into a
//! dependency bundle whose uuid is listed in `deps`.

mod check;
mod ops;
mod refs;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub use check::{RefCheckReport, RefParent, check_bundle_fields, check_refs_in_bundle};
pub use refs::{
    all_xrefs, check_existing_references, extract_dependencies, remove_unreachable_nodes,
    visit_field_refs, visit_refs_in_fields,
};

pub const REF_KEY: &str = "__ref";
pub const XREF_KEY: &str = "__xref";
pub const TYPE_KEY: &str = "__type";

/// Version tag of a bundle that no migration has touched yet.
pub const INITIAL_VERSION: &str = "0";

/// Global address of an instance: the bundle it belongs to plus its
/// instance id inside that bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Addr {
    pub uuid: String,
    pub iid: String,
}

impl Addr {
    pub fn new(uuid: impl Into<String>, iid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            iid: iid.into(),
        }
    }

    pub fn key(&self) -> String {
        format!("{} {}", self.uuid, self.iid)
    }

    pub fn from_key(key: &str) -> Option<Self> {
        let (uuid, iid) = key.split_once(' ')?;
        Some(Self::new(uuid, iid))
    }

    pub fn slug(&self) -> String {
        format!("{}-{}", self.uuid, self.iid)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.uuid, self.iid)
    }
}

/// A reference as it appears inside a bundled record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RawRef {
    Local(String),
    External(Addr),
}

impl RawRef {
    pub fn parse(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        if let Some(iid) = object.get(REF_KEY) {
            return match iid {
                Value::String(s) => Some(RawRef::Local(s.clone())),
                Value::Number(n) => Some(RawRef::Local(n.to_string())),
                _ => None,
            };
        }
        let addr = object.get(XREF_KEY)?;
        serde_json::from_value(addr.clone()).ok().map(RawRef::External)
    }

    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        match self {
            RawRef::Local(iid) => {
                object.insert(REF_KEY.to_string(), Value::String(iid.clone()));
            }
            RawRef::External(addr) => {
                let mut inner = Map::new();
                inner.insert("uuid".to_string(), Value::String(addr.uuid.clone()));
                inner.insert("iid".to_string(), Value::String(addr.iid.clone()));
                object.insert(XREF_KEY.to_string(), Value::Object(inner));
            }
        }
        Value::Object(object)
    }
}

/// Whether `value` is a `{ "__ref" }` or `{ "__xref" }` object.
pub fn is_ref_value(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|o| o.contains_key(REF_KEY) || o.contains_key(XREF_KEY))
}

/// One flattened instance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundledInst {
    #[serde(rename = "__type")]
    pub type_name: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl BundledInst {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Map::new(),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields.insert(field.into(), value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(field.into(), value)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub root: String,
    pub map: BTreeMap<String, BundledInst>,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default = "initial_version", deserialize_with = "version_string")]
    pub version: String,
}

fn initial_version() -> String {
    INITIAL_VERSION.to_string()
}

fn version_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Tag {
        Text(String),
        Number(u64),
    }
    Ok(match Tag::deserialize(deserializer)? {
        Tag::Text(s) => s,
        Tag::Number(n) => n.to_string(),
    })
}

impl Bundle {
    pub fn new(root: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            map: BTreeMap::new(),
            deps: Vec::new(),
            version: version.into(),
        }
    }

    pub fn from_json(source: &str) -> crate::errors::BundleResult<Self> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn to_json(&self) -> crate::errors::BundleResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> crate::errors::BundleResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn root_inst(&self) -> Option<&BundledInst> {
        self.map.get(&self.root)
    }

    pub fn root_type(&self) -> Option<&str> {
        self.root_inst().map(|inst| inst.type_name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_wire_json() {
        let bundle = Bundle::from_json(
            r#"{
                "root": "1",
                "map": {
                    "1": {"__type": "Site", "components": [{"__ref": "2"}]},
                    "2": {"__type": "Component", "base": {"__xref": {"uuid": "pkg", "iid": "9"}}}
                },
                "deps": ["pkg"],
                "version": "12-add-components"
            }"#,
        )
        .unwrap();

        assert_eq!(bundle.root_type(), Some("Site"));
        let component = &bundle.map["2"];
        assert_eq!(
            RawRef::parse(component.get("base").unwrap()),
            Some(RawRef::External(Addr::new("pkg", "9")))
        );
        assert_eq!(
            RawRef::parse(&bundle.map["1"].get("components").unwrap()[0]),
            Some(RawRef::Local("2".to_string()))
        );
    }

    #[test]
    fn numeric_versions_and_missing_deps_are_accepted() {
        let bundle =
            Bundle::from_json(r#"{"root": "1", "map": {"1": {"__type": "Site"}}, "version": 42}"#)
                .unwrap();
        assert_eq!(bundle.version, "42");
        assert!(bundle.deps.is_empty());
    }

    #[test]
    fn records_serialize_with_type_tag() {
        let inst = BundledInst::new("Widget").with("foo", json!(1));
        let value = serde_json::to_value(&inst).unwrap();
        assert_eq!(value, json!({"__type": "Widget", "foo": 1}));
    }

    #[test]
    fn ref_values_round_trip() {
        let local = RawRef::Local("5".into());
        let external = RawRef::External(Addr::new("u", "6"));
        assert_eq!(RawRef::parse(&local.to_value()), Some(local));
        assert_eq!(RawRef::parse(&external.to_value()), Some(external));
        assert!(!is_ref_value(&json!({"x": 1})));
        assert_eq!(Addr::from_key(&Addr::new("u", "6").key()), Some(Addr::new("u", "6")));
    }
}
