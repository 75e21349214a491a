use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::class::{ClassSchema, ModelClass};
use super::field::{FieldKind, FieldSchema};
use crate::errors::{BundleError, BundleResult};

/// Serializable description of every model class at one schema version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaDefinition {
    pub name: String,
    #[serde(default, rename = "class")]
    pub classes: Vec<ClassSchema>,
}

impl SchemaDefinition {
    pub fn to_toml(&self) -> BundleResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn from_toml(source: &str) -> BundleResult<Self> {
        Ok(toml::from_str(source)?)
    }
}

/// Validated lookup table over a [`SchemaDefinition`].
///
/// This is what the bundler and the generic graph walkers consult to learn
/// whether a field is a scalar, an embedded value or some kind of reference.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    definition: SchemaDefinition,
    index: HashMap<String, usize>,
    resolved: HashMap<String, Vec<FieldSchema>>,
}

impl SchemaRegistry {
    pub fn new(definition: SchemaDefinition) -> BundleResult<Self> {
        let mut index = HashMap::with_capacity(definition.classes.len());
        for (i, class) in definition.classes.iter().enumerate() {
            if index.insert(class.name.clone(), i).is_some() {
                return Err(BundleError::InvalidSchema(format!(
                    "class {} is declared twice",
                    class.name
                )));
            }
        }

        let mut registry = Self {
            definition,
            index,
            resolved: HashMap::new(),
        };

        let mut resolved = HashMap::with_capacity(registry.definition.classes.len());
        for class in &registry.definition.classes {
            resolved.insert(class.name.clone(), registry.resolve_fields(class)?);
        }
        registry.resolved = resolved;
        registry.validate_references()?;
        Ok(registry)
    }

    pub fn from_toml(source: &str) -> BundleResult<Self> {
        Self::new(SchemaDefinition::from_toml(source)?)
    }

    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &SchemaDefinition {
        &self.definition
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassSchema> {
        self.definition.classes.iter()
    }

    pub fn class(&self, name: &str) -> Option<&ClassSchema> {
        self.index.get(name).map(|&i| &self.definition.classes[i])
    }

    pub fn contains_class(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All fields of `class`, inherited ones first.
    pub fn all_fields(&self, class: &str) -> BundleResult<&[FieldSchema]> {
        self.resolved
            .get(class)
            .map(Vec::as_slice)
            .ok_or_else(|| BundleError::UnknownType(class.to_string()))
    }

    /// Fields that are written to and read from bundles.
    pub fn persisted_fields(
        &self,
        class: &str,
    ) -> BundleResult<impl Iterator<Item = &FieldSchema>> {
        Ok(self.all_fields(class)?.iter().filter(|f| f.is_persisted()))
    }

    pub fn field(&self, class: &str, field: &str) -> Option<&FieldSchema> {
        self.resolved
            .get(class)
            .and_then(|fields| fields.iter().find(|f| f.name == field))
    }

    pub fn field_kind_of(&self, class: &str, field: &str) -> Option<FieldKind> {
        self.field(class, field).map(|f| f.kind)
    }

    /// Derived back-pointer fields of `class`.
    pub fn inverse_fields(&self, class: &str) -> Vec<&FieldSchema> {
        self.resolved
            .get(class)
            .map(|fields| fields.iter().filter(|f| f.inverse_of.is_some()).collect())
            .unwrap_or_default()
    }

    pub fn is_subclass(&self, class: &str, ancestor: &str) -> bool {
        let mut current = Some(class);
        let mut hops = 0;
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            hops += 1;
            if hops > self.definition.classes.len() {
                return false;
            }
            current = self.class(name).and_then(|c| c.base.as_deref());
        }
        false
    }

    fn resolve_fields(&self, class: &ClassSchema) -> BundleResult<Vec<FieldSchema>> {
        let mut chain = vec![class];
        let mut visited = HashSet::from([class.name.as_str()]);
        let mut current = class;
        while let Some(base) = &current.base {
            let parent = self.class(base).ok_or_else(|| {
                BundleError::InvalidSchema(format!(
                    "class {} extends unknown class {}",
                    current.name, base
                ))
            })?;
            if !visited.insert(parent.name.as_str()) {
                return Err(BundleError::InvalidSchema(format!(
                    "inheritance cycle through {}",
                    parent.name
                )));
            }
            chain.push(parent);
            current = parent;
        }

        let mut fields: Vec<FieldSchema> = Vec::new();
        for ancestor in chain.iter().rev() {
            for field in &ancestor.fields {
                if fields.iter().any(|f| f.name == field.name) {
                    return Err(BundleError::InvalidSchema(format!(
                        "field {}.{} is declared twice",
                        class.name, field.name
                    )));
                }
                fields.push(field.clone());
            }
        }
        Ok(fields)
    }

    fn validate_references(&self) -> BundleResult<()> {
        let forward_names: HashSet<&str> = self
            .resolved
            .values()
            .flatten()
            .filter(|f| f.is_strong_ref() && f.is_persisted())
            .map(|f| f.name.as_str())
            .collect();

        for class in &self.definition.classes {
            for field in &class.fields {
                if let Some(target) = &field.target {
                    if !self.contains_class(target) {
                        return Err(BundleError::InvalidSchema(format!(
                            "field {}.{} targets unknown class {}",
                            class.name, field.name, target
                        )));
                    }
                }
                if field.kind.is_reference() && field.target.is_none() {
                    return Err(BundleError::InvalidSchema(format!(
                        "reference field {}.{} has no target class",
                        class.name, field.name
                    )));
                }
                if let Some(forward) = &field.inverse_of {
                    if field.kind != FieldKind::Ref || !field.transient {
                        return Err(BundleError::InvalidSchema(format!(
                            "derived field {}.{} must be a transient single reference",
                            class.name, field.name
                        )));
                    }
                    if !forward_names.contains(forward.as_str()) {
                        return Err(BundleError::InvalidSchema(format!(
                            "derived field {}.{} is the inverse of unknown field {}",
                            class.name, field.name, forward
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Collects class declarations into a [`SchemaRegistry`].
///
/// ```
/// use bundle_store::schema::{ClassSchema, FieldKind, FieldSchema, SchemaRegistry, ValueType};
///
/// let schema = SchemaRegistry::builder("v1")
///     .class_schema(
///         ClassSchema::new("Site")
///             .field(FieldSchema::reference("components", FieldKind::RefList, "Component")),
///     )
///     .class_schema(
///         ClassSchema::new("Component").field(FieldSchema::scalar("name", ValueType::String)),
///     )
///     .build()
///     .unwrap();
///
/// assert_eq!(schema.field_kind_of("Site", "components"), Some(FieldKind::RefList));
/// assert_eq!(schema.field_kind_of("Component", "name"), Some(FieldKind::Scalar));
/// ```
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    name: String,
    classes: Vec<ClassSchema>,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classes: Vec::new(),
        }
    }

    pub fn class<T: ModelClass>(self) -> Self {
        self.class_schema(T::class_schema())
    }

    pub fn class_schema(mut self, class: ClassSchema) -> Self {
        self.classes.push(class);
        self
    }

    pub fn definition(self) -> SchemaDefinition {
        SchemaDefinition {
            name: self.name,
            classes: self.classes,
        }
    }

    pub fn build(self) -> BundleResult<SchemaRegistry> {
        SchemaRegistry::new(self.definition())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ValueType;

    fn tpl_schema() -> SchemaBuilder {
        SchemaRegistry::builder("tpl")
            .class_schema(
                ClassSchema::new("Tpl")
                    .abstract_class()
                    .field(FieldSchema::scalar("uuid", ValueType::String))
                    .field(FieldSchema::inverse("parent", "children", "Tpl")),
            )
            .class_schema(
                ClassSchema::new("TplTag")
                    .with_base("Tpl")
                    .field(FieldSchema::reference("children", FieldKind::RefList, "Tpl")),
            )
            .class_schema(ClassSchema::new("TplText").with_base("Tpl"))
    }

    #[test]
    fn inherited_fields_come_first() {
        let schema = tpl_schema().build().unwrap();
        let names: Vec<_> = schema
            .all_fields("TplTag")
            .unwrap()
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, ["uuid", "parent", "children"]);
        assert!(schema.is_subclass("TplText", "Tpl"));
        assert!(!schema.is_subclass("Tpl", "TplText"));
        assert_eq!(schema.field_kind_of("TplText", "parent"), Some(FieldKind::Ref));
        assert_eq!(schema.field_kind_of("TplText", "children"), None);
    }

    #[test]
    fn rejects_unknown_base_and_cycles() {
        let unknown_base = SchemaRegistry::builder("bad")
            .class_schema(ClassSchema::new("A").with_base("Missing"))
            .build();
        assert!(matches!(unknown_base, Err(BundleError::InvalidSchema(_))));

        let cycle = SchemaRegistry::builder("bad")
            .class_schema(ClassSchema::new("A").with_base("B"))
            .class_schema(ClassSchema::new("B").with_base("A"))
            .build();
        assert!(matches!(cycle, Err(BundleError::InvalidSchema(_))));
    }

    #[test]
    fn rejects_dangling_targets_and_inverses() {
        let dangling = SchemaRegistry::builder("bad")
            .class_schema(
                ClassSchema::new("A").field(FieldSchema::reference("b", FieldKind::Ref, "B")),
            )
            .build();
        assert!(matches!(dangling, Err(BundleError::InvalidSchema(_))));

        let inverse = SchemaRegistry::builder("bad")
            .class_schema(ClassSchema::new("A").field(FieldSchema::inverse("owner", "items", "A")))
            .build();
        assert!(matches!(inverse, Err(BundleError::InvalidSchema(_))));
    }

    #[test]
    fn toml_round_trip_preserves_definition() {
        let definition = tpl_schema().definition();
        let text = definition.to_toml().unwrap();
        assert!(text.contains("[[class]]"));
        let parsed = SchemaDefinition::from_toml(&text).unwrap();
        assert_eq!(parsed, definition);
        SchemaRegistry::new(parsed).unwrap();
    }
}
