//! Arena-backed object graph.
//!
//! Every model instance lives in one [`ObjectGraph`] arena and is addressed by
//! an [`InstId`]. Relationships between instances are stored as ids rather
//! than pointers, so cycles (a child pointing back at its component, say) need
//! no special treatment and reference equality is plain id equality.

mod typed;
pub mod walk;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

use derive_more::{From, Into};
use serde_json::Value;

use crate::errors::{BundleError, BundleResult};

pub use typed::Ref;

/// Index of an instance inside its [`ObjectGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, From, Into)]
pub struct InstId(usize);

impl InstId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The value of one field of an unbundled instance.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Scalar(Value),
    Ref(InstId),
    RefList(Vec<InstId>),
    RefMap(BTreeMap<String, InstId>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_inst(&self) -> Option<InstId> {
        match self {
            FieldValue::Ref(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[InstId]> {
        match self {
            FieldValue::RefList(ids) => Some(ids),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, InstId>> {
        match self {
            FieldValue::RefMap(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            FieldValue::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_scalar().and_then(Value::as_str)
    }

    /// Every instance referenced by this value, in storage order.
    pub fn referenced(&self) -> Vec<InstId> {
        match self {
            FieldValue::Null | FieldValue::Scalar(_) => Vec::new(),
            FieldValue::Ref(id) => vec![*id],
            FieldValue::RefList(ids) => ids.clone(),
            FieldValue::RefMap(map) => map.values().copied().collect(),
        }
    }

    fn without(&mut self, target: InstId) -> usize {
        match self {
            FieldValue::Ref(id) if *id == target => {
                *self = FieldValue::Null;
                1
            }
            FieldValue::RefList(ids) => {
                let before = ids.len();
                ids.retain(|id| *id != target);
                before - ids.len()
            }
            FieldValue::RefMap(map) => {
                let before = map.len();
                map.retain(|_, id| *id != target);
                before - map.len()
            }
            _ => 0,
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        if value.is_null() {
            FieldValue::Null
        } else {
            FieldValue::Scalar(value)
        }
    }
}

impl From<InstId> for FieldValue {
    fn from(id: InstId) -> Self {
        FieldValue::Ref(id)
    }
}

impl From<Vec<InstId>> for FieldValue {
    fn from(ids: Vec<InstId>) -> Self {
        FieldValue::RefList(ids)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    class: String,
    fields: BTreeMap<String, FieldValue>,
}

impl Instance {
    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ObjectGraph {
    instances: Vec<Instance>,
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an uninitialized instance of `class`.
    pub fn create(&mut self, class: impl Into<String>) -> InstId {
        self.instances.push(Instance {
            class: class.into(),
            fields: BTreeMap::new(),
        });
        InstId(self.instances.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn contains(&self, id: InstId) -> bool {
        id.0 < self.instances.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = InstId> + '_ {
        (0..self.instances.len()).map(InstId)
    }

    pub fn instance(&self, id: InstId) -> Option<&Instance> {
        self.instances.get(id.0)
    }

    pub fn class_of(&self, id: InstId) -> Option<&str> {
        self.instance(id).map(Instance::class)
    }

    pub fn get(&self, id: InstId, field: &str) -> Option<&FieldValue> {
        self.instance(id).and_then(|inst| inst.get(field))
    }

    /// Sets a field, returning its previous value.
    pub fn set(
        &mut self,
        id: InstId,
        field: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> BundleResult<Option<FieldValue>> {
        let inst = self
            .instances
            .get_mut(id.0)
            .ok_or(BundleError::UnknownInstance(id.0))?;
        Ok(inst.fields.insert(field.into(), value.into()))
    }

    pub fn remove_field(&mut self, id: InstId, field: &str) -> Option<FieldValue> {
        self.instances
            .get_mut(id.0)
            .and_then(|inst| inst.fields.remove(field))
    }

    pub(crate) fn clear_fields(&mut self, id: InstId) {
        if let Some(inst) = self.instances.get_mut(id.0) {
            inst.fields.clear();
        }
    }

    /// Drops every instance allocated after the arena held `len` of them.
    /// Nothing may still reference the dropped instances.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.instances.truncate(len);
    }

    pub fn ref_of(&self, id: InstId, field: &str) -> Option<InstId> {
        self.get(id, field).and_then(FieldValue::as_inst)
    }

    pub fn refs_of(&self, id: InstId, field: &str) -> Vec<InstId> {
        self.get(id, field)
            .map(FieldValue::referenced)
            .unwrap_or_default()
    }

    pub fn scalar_of(&self, id: InstId, field: &str) -> Option<&Value> {
        self.get(id, field).and_then(FieldValue::as_scalar)
    }

    /// Appends `child` to the reference list stored in `field`.
    pub fn push_ref(&mut self, id: InstId, field: &str, child: InstId) -> BundleResult<()> {
        let inst = self
            .instances
            .get_mut(id.0)
            .ok_or(BundleError::UnknownInstance(id.0))?;
        match inst.fields.get_mut(field) {
            Some(FieldValue::RefList(ids)) => ids.push(child),
            Some(FieldValue::Null) | None => {
                inst.fields
                    .insert(field.to_string(), FieldValue::RefList(vec![child]));
            }
            Some(_) => {
                return Err(BundleError::FieldKindMismatch {
                    class: inst.class.clone(),
                    field: field.to_string(),
                    expected: "ref-list".to_string(),
                    found: "other value".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Removes every reference to `target` from every instance, returning the
    /// number of references removed. Once nothing points at `target` it is no
    /// longer reachable and will not be bundled.
    pub fn detach(&mut self, target: InstId) -> usize {
        self.instances
            .iter_mut()
            .flat_map(|inst| inst.fields.values_mut())
            .map(|value| value.without(target))
            .sum()
    }

    /// Whether the subgraph reachable from `root` has the same shape as the
    /// subgraph of `other` reachable from `other_root`: same classes, same
    /// scalar values and the same reference topology, ignoring ids.
    pub fn structurally_eq(&self, root: InstId, other: &ObjectGraph, other_root: InstId) -> bool {
        let mut forward: HashMap<InstId, InstId> = HashMap::new();
        let mut backward: HashMap<InstId, InstId> = HashMap::new();
        let mut queue = VecDeque::new();

        let mut bind = |a: InstId,
                        b: InstId,
                        queue: &mut VecDeque<(InstId, InstId)>|
         -> bool {
            match (forward.get(&a), backward.get(&b)) {
                (Some(&mapped), _) => mapped == b,
                (None, Some(_)) => false,
                (None, None) => {
                    forward.insert(a, b);
                    backward.insert(b, a);
                    queue.push_back((a, b));
                    true
                }
            }
        };

        if !bind(root, other_root, &mut queue) {
            return false;
        }

        while let Some((a, b)) = queue.pop_front() {
            let (Some(left), Some(right)) = (self.instance(a), other.instance(b)) else {
                return false;
            };
            if left.class != right.class || left.fields.len() != right.fields.len() {
                return false;
            }
            for (name, lv) in &left.fields {
                let Some(rv) = right.fields.get(name) else {
                    return false;
                };
                let matched = match (lv, rv) {
                    (FieldValue::Null, FieldValue::Null) => true,
                    (FieldValue::Scalar(x), FieldValue::Scalar(y)) => x == y,
                    (FieldValue::Ref(x), FieldValue::Ref(y)) => bind(*x, *y, &mut queue),
                    (FieldValue::RefList(xs), FieldValue::RefList(ys)) => {
                        xs.len() == ys.len()
                            && xs.iter().zip(ys).all(|(x, y)| bind(*x, *y, &mut queue))
                    }
                    (FieldValue::RefMap(xs), FieldValue::RefMap(ys)) => {
                        xs.len() == ys.len()
                            && xs.iter().all(|(k, x)| {
                                ys.get(k).is_some_and(|y| bind(*x, *y, &mut queue))
                            })
                    }
                    _ => false,
                };
                if !matched {
                    return false;
                }
            }
        }
        true
    }
}
