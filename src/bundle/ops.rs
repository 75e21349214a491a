//! Untyped helpers for bundled migrations.
//!
//! These operate on the flat record map directly and never consult a
//! schema, matching records on their `__type` tag only.

use std::collections::HashSet;

use serde_json::Value;

use super::{Bundle, BundledInst, RawRef};

impl Bundle {
    pub fn instances_of_type<'a>(
        &'a self,
        type_name: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a BundledInst)> + 'a {
        self.map
            .iter()
            .filter(move |(_, inst)| inst.type_name == type_name)
    }

    pub fn instances_of_type_mut<'a>(
        &'a mut self,
        type_name: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a mut BundledInst)> + 'a {
        self.map
            .iter_mut()
            .filter(move |(_, inst)| inst.type_name == type_name)
    }

    /// Re-tags every record of type `from` as `to`. Returns how many changed.
    pub fn rename_type(&mut self, from: &str, to: &str) -> usize {
        let mut renamed = 0;
        for (_, inst) in self.instances_of_type_mut(from) {
            inst.type_name = to.to_string();
            renamed += 1;
        }
        renamed
    }

    /// Moves field `from` to `to` on every record of `type_name`.
    pub fn rename_field(&mut self, type_name: &str, from: &str, to: &str) -> usize {
        let mut renamed = 0;
        for (_, inst) in self.instances_of_type_mut(type_name) {
            if let Some(value) = inst.remove(from) {
                inst.insert(to, value);
                renamed += 1;
            }
        }
        renamed
    }

    pub fn remove_field(&mut self, type_name: &str, field: &str) -> usize {
        self.instances_of_type_mut(type_name)
            .filter_map(|(_, inst)| inst.remove(field))
            .count()
    }

    /// Sets `field` to a copy of `value` on every record of `type_name` that
    /// does not have it yet.
    pub fn backfill_field(&mut self, type_name: &str, field: &str, value: Value) -> usize {
        let mut filled = 0;
        for (_, inst) in self.instances_of_type_mut(type_name) {
            if !inst.fields.contains_key(field) {
                inst.insert(field, value.clone());
                filled += 1;
            }
        }
        filled
    }

    /// Deletes every record of `type_name` and every local reference to one.
    /// Single references become `null`; list and map entries are dropped.
    /// Returns the deleted iids.
    pub fn delete_instances_of_type(&mut self, type_name: &str) -> Vec<String> {
        let doomed: Vec<String> = self
            .instances_of_type(type_name)
            .map(|(iid, _)| iid.clone())
            .collect();
        for iid in &doomed {
            self.map.remove(iid);
        }

        let doomed_set: HashSet<&str> = doomed.iter().map(String::as_str).collect();
        for inst in self.map.values_mut() {
            for value in inst.fields.values_mut() {
                strip_refs(value, &doomed_set);
            }
        }
        doomed
    }
}

fn points_into(value: &Value, doomed: &HashSet<&str>) -> bool {
    matches!(RawRef::parse(value), Some(RawRef::Local(iid)) if doomed.contains(iid.as_str()))
}

fn strip_refs(value: &mut Value, doomed: &HashSet<&str>) {
    if points_into(value, doomed) {
        *value = Value::Null;
        return;
    }
    match value {
        Value::Array(items) => {
            items.retain(|item| !points_into(item, doomed));
            items.iter_mut().for_each(|item| strip_refs(item, doomed));
        }
        Value::Object(object) => {
            object.retain(|_, item| !points_into(item, doomed));
            object.values_mut().for_each(|item| strip_refs(item, doomed));
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bundle() -> Bundle {
        Bundle::from_json(
            &json!({
                "root": "1",
                "map": {
                    "1": {"__type": "Site", "widgets": [{"__ref": "2"}, {"__ref": "3"}],
                          "legacy": {"__ref": "4"}, "byName": {"old": {"__ref": "4"}}},
                    "2": {"__type": "Widget", "foo": 1},
                    "3": {"__type": "Widget", "foo": 2},
                    "4": {"__type": "LegacyThing"}
                },
                "version": "0"
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn renames_and_backfills_by_type_tag() {
        let mut b = bundle();
        assert_eq!(b.rename_field("Widget", "foo", "bar"), 2);
        assert_eq!(b.map["2"].get("bar"), Some(&json!(1)));
        assert!(b.map["2"].get("foo").is_none());

        assert_eq!(b.backfill_field("Widget", "hidden", json!(false)), 2);
        assert_eq!(b.backfill_field("Widget", "hidden", json!(true)), 0);
        assert_eq!(b.remove_field("Widget", "hidden"), 2);

        assert_eq!(b.rename_type("Widget", "Gadget"), 2);
        assert_eq!(b.instances_of_type("Gadget").count(), 2);
    }

    #[test]
    fn deleting_a_type_strips_references_to_it() {
        let mut b = bundle();
        assert_eq!(b.delete_instances_of_type("LegacyThing"), vec!["4".to_string()]);
        let site = b.root_inst().unwrap();
        assert_eq!(site.get("legacy"), Some(&Value::Null));
        assert_eq!(site.get("byName"), Some(&json!({})));
        assert_eq!(site.get("widgets").unwrap().as_array().unwrap().len(), 2);
        crate::bundle::check_existing_references(&b).unwrap();
    }
}
