//! # Bundle Store
//!
//! Persistence and forward migration of a visual builder's design model.
//!
//! The design model (a `Site` with its components, template trees and
//! imported packages) is a cyclic object graph. It is stored as a
//! [`Bundle`](bundle::Bundle): a flat JSON map from instance id to record,
//! with references written as `{ "__ref": iid }` or, across bundles,
//! `{ "__xref": { "uuid", "iid" } }`.
//!
//! ## Features
//!
//! - **Schema registry**: a runtime description of every model class,
//!   declared with `#[derive(ModelClass)]` or loaded from TOML
//! - **Bundler**: cycle-safe conversion between an arena
//!   [`ObjectGraph`](graph::ObjectGraph) and bundles, with stable ids
//! - **Migrations**: an append-only registry of bundled and unbundled steps
//!   and a runner that applies them in order
//! - **Storage**: entities kept in sled and migrated with optimistic
//!   concurrency control
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use bundle_store::prelude::*;
//!
//! #[derive(ModelClass)]
//! struct Site {
//!     components: Vec<Ref<Component>>,
//! }
//!
//! #[derive(ModelClass)]
//! struct Component {
//!     name: String,
//!     #[model(weak)]
//!     site: Ref<Site>,
//! }
//!
//! let schema = Arc::new(
//!     SchemaRegistry::builder("demo")
//!         .class::<Site>()
//!         .class::<Component>()
//!         .build()?,
//! );
//!
//! let mut bundler = Bundler::new(Arc::clone(&schema));
//! let graph = bundler.graph_mut();
//! let site = graph.create_typed::<Site>();
//! let button = graph.create_typed::<Component>();
//! graph.set(site.id(), "components", vec![button.id()])?;
//! graph.set(button.id(), "site", site.id())?;
//! graph.set(button.id(), "name", serde_json::json!("Button"))?;
//!
//! let bundle = bundler.bundle(site.id(), "project-1", "0")?;
//! assert_eq!(bundle.map.len(), 2);
//!
//! let mut fresh = Bundler::new(schema);
//! let root = fresh.unbundle(&bundle, "project-1")?;
//! assert!(fresh.graph().structurally_eq(root, bundler.graph(), site.id()));
//! # Ok::<(), bundle_store::errors::BundleError>(())
//! ```

extern crate self as bundle_store;

pub mod bundle;
pub mod bundler;
pub mod config;
pub mod databases;
pub mod errors;
pub mod graph;
pub mod migration;
pub mod prelude;
pub mod schema;

pub use bundle_macros::ModelClass;
pub use schema::ModelClass;
