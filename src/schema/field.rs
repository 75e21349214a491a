use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// How a field's value is stored in a bundled record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum FieldKind {
    /// Primitive JSON value, stored verbatim.
    Scalar,
    /// Value-like sub-record stored inline; never contains references.
    Embedded,
    /// Single `{ "__ref" }` / `{ "__xref" }` pointer.
    Ref,
    /// Array of references.
    RefList,
    /// Object mapping string keys to references.
    RefMap,
}

impl FieldKind {
    pub fn is_reference(&self) -> bool {
        matches!(self, FieldKind::Ref | FieldKind::RefList | FieldKind::RefMap)
    }
}

/// Primitive type of a scalar field, used when type checking bundles.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ValueType {
    #[default]
    Any,
    String,
    Number,
    Bool,
}

impl ValueType {
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            ValueType::Any => true,
            ValueType::String => value.is_string(),
            ValueType::Number => value.is_number(),
            ValueType::Bool => value.is_boolean(),
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_any(v: &ValueType) -> bool {
    *v == ValueType::Any
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
    /// A weak reference does not own its target.
    #[serde(default, skip_serializing_if = "is_false")]
    pub weak: bool,
    /// Transient fields are never written to or read from a bundle.
    #[serde(default, skip_serializing_if = "is_false")]
    pub transient: bool,
    /// Class of the referenced instances, for reference kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Marks a derived back-pointer: this field points at whichever
    /// instance holds the current one in its field named `inverse_of`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse_of: Option<String>,
    #[serde(default, skip_serializing_if = "is_any")]
    pub value_type: ValueType,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            weak: false,
            transient: false,
            target: None,
            inverse_of: None,
            value_type: ValueType::Any,
        }
    }

    pub fn scalar(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            value_type,
            ..Self::new(name, FieldKind::Scalar)
        }
    }

    pub fn reference(name: impl Into<String>, kind: FieldKind, target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::new(name, kind)
        }
    }

    /// Derived back-pointer to the owner holding this instance in `forward_field`.
    pub fn inverse(
        name: impl Into<String>,
        forward_field: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            optional: true,
            transient: true,
            target: Some(target.into()),
            inverse_of: Some(forward_field.into()),
            ..Self::new(name, FieldKind::Ref)
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn weak(mut self) -> Self {
        self.weak = true;
        self
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    /// Whether this field holds an owning reference.
    pub fn is_strong_ref(&self) -> bool {
        self.kind.is_reference() && !self.weak
    }

    pub fn is_weak_ref(&self) -> bool {
        self.kind.is_reference() && self.weak
    }

    pub fn is_persisted(&self) -> bool {
        !self.transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn field_kind_string_forms() {
        assert_eq!(FieldKind::RefList.to_string(), "ref-list");
        assert_eq!(FieldKind::from_str("ref-map").unwrap(), FieldKind::RefMap);
        assert!(FieldKind::from_str("pointer").is_err());
    }

    #[test]
    fn inverse_fields_are_transient_and_optional() {
        let field = FieldSchema::inverse("parent", "children", "Tpl");
        assert!(field.transient);
        assert!(field.optional);
        assert!(!field.is_persisted());
        assert_eq!(field.inverse_of.as_deref(), Some("children"));
    }

    #[test]
    fn value_types_accept_matching_json() {
        assert!(ValueType::String.accepts(&serde_json::json!("x")));
        assert!(!ValueType::Number.accepts(&serde_json::json!("x")));
        assert!(ValueType::Any.accepts(&serde_json::json!({"a": 1})));
    }
}
