//! Prelude module for convenient imports.
//!
//! ```rust
//! use bundle_store::prelude::*;
//! ```

pub use crate::ModelClass;
pub use crate::bundle::{Addr, Bundle, BundledInst, RawRef};
pub use crate::bundler::{Bundler, UnbundleOptions};
pub use crate::config::{BundlerConfig, MigrationOptions, ReferencePolicy, StoreConfig};
pub use crate::databases::{Entity, EntityKind, MigrationDb, Pkg, PkgVersion, ProjectRevision};
pub use crate::errors::{BundleError, BundleResult};
pub use crate::graph::{FieldValue, InstId, ObjectGraph, Ref};
pub use crate::migration::{
    Migration, MigrationContext, MigrationOutcome, MigrationRegistry, MigrationRunner,
    MigrationType, MigrationVersion, UnbundledSite,
};
pub use crate::schema::{
    ClassSchema, FieldKind, FieldSchema, SchemaBuilder, SchemaRegistry, ValueType,
};
