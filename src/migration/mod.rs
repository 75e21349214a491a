//! Versioned, forward-only bundle migrations.
//!
//! Every schema change ships with a migration step identified by a
//! [`MigrationVersion`] such as `"175-refactor-data-model"`. Steps are
//! appended to a [`MigrationRegistry`] and never edited afterwards, because
//! bundles already persisted depend on their exact semantics.
//!
//! A step is either
//!
//! - **bundled**: a function over the raw [`Bundle`](crate::bundle::Bundle),
//!   for renames, deletions and default backfills that need no knowledge of
//!   the graph, or
//! - **unbundled**: a function over the materialized object graph, unbundled
//!   with the schema the step was written against and re-bundled afterwards.
//!
//! The [`MigrationRunner`] applies, in order, every step newer than the
//! bundle's `version`, passing the bundle by value from one step to the next
//! and stamping each step's version on the result.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bundle_store::bundle::Bundle;
//! use bundle_store::databases::{Entity, memory::InMemoryDb};
//! use bundle_store::migration::{Migration, MigrationRegistry, MigrationRunner};
//! use bundle_store::schema::{ClassSchema, FieldSchema, SchemaRegistry, ValueType};
//!
//! let schema = SchemaRegistry::builder("current")
//!     .class_schema(ClassSchema::new("Site").field(FieldSchema::scalar("title", ValueType::String)))
//!     .build()
//!     .unwrap();
//! let registry = MigrationRegistry::new()
//!     .with(Migration::bundled("1-rename-name", |mut bundle, _| {
//!         bundle.rename_field("Site", "name", "title");
//!         Ok(bundle)
//!     }).unwrap())
//!     .unwrap();
//! let runner = MigrationRunner::new(Arc::new(registry), Arc::new(schema));
//!
//! let bundle = Bundle::from_json(
//!     r#"{"root": "1", "map": {"1": {"__type": "Site", "name": "Home"}}, "version": "0"}"#,
//! ).unwrap();
//! let entity = Entity::from_bundle("proj", &bundle).unwrap();
//! let outcome = runner.run(bundle, &InMemoryDb::new(), &entity).unwrap();
//! assert_eq!(outcome.bundle.version, "1-rename-name");
//! assert_eq!(outcome.bundle.map["1"].get("title").unwrap(), "Home");
//! ```

pub mod dev;
mod registry;
mod runner;
pub mod site;
mod step;
mod version;

pub use dev::migrate_in_memory;
pub use registry::MigrationRegistry;
pub use runner::{MigrationOutcome, MigrationRunner};
pub use site::{SiteRoots, load_dep_packages, unbundle_site};
pub use step::{
    BundledMigration, Migration, MigrationContext, MigrationStep, MigrationType,
    UnbundledMigration, UnbundledSite,
};
pub use version::MigrationVersion;
