//! Model schema registry.
//!
//! Describes, for one code version, every model class, its fields and the
//! semantic kind of each field. The bundler uses it to flatten and rebuild
//! object graphs; unbundled migrations use it through the graph walkers.
//!
//! Schemas can be assembled from [`ModelClass`] declarations (usually via
//! `#[derive(ModelClass)]`), built by hand with [`ClassSchema`] and
//! [`FieldSchema`], or loaded from TOML.

mod class;
mod field;
mod registry;

pub use class::{ClassSchema, ModelClass};
pub use field::{FieldKind, FieldSchema, ValueType};
pub use registry::{SchemaBuilder, SchemaDefinition, SchemaRegistry};
