// Shared fixtures for the integration tests: two generations of a small
// design model, bundles built from them and the steps migrating between them.
#![allow(dead_code)]

use std::sync::Arc;

use bundle_store::bundle::INITIAL_VERSION;
use bundle_store::prelude::*;
use serde_json::json;

/// Model classes as they are today.
pub mod current {
    use super::*;

    #[derive(ModelClass)]
    pub struct Site {
        pub components: Vec<Ref<Component>>,
        pub widgets: Vec<Ref<Widget>>,
        #[model(weak)]
        pub project_dependencies: Vec<Ref<ProjectDependency>>,
    }

    #[derive(ModelClass)]
    pub struct Component {
        pub name: String,
        #[model(weak)]
        pub site: Ref<Site>,
        #[model(weak)]
        pub super_comp: Option<Ref<Component>>,
        pub tpl_tree: Option<Ref<TplNode>>,
    }

    #[derive(ModelClass)]
    #[model(name = "Tpl")]
    pub struct TplNode {
        pub name: String,
        pub children: Vec<Ref<TplNode>>,
        #[model(inverse_of = "children")]
        pub parent: Ref<TplNode>,
    }

    #[derive(ModelClass)]
    pub struct ProjectDependency {
        pub pkg_id: String,
        pub version: String,
        pub site: Ref<Site>,
    }

    #[derive(ModelClass)]
    pub struct Widget {
        pub bar: String,
    }
}

/// Model classes before the widget rename, when sites still carried legacy
/// things.
pub mod legacy {
    use super::current::{Component, ProjectDependency, TplNode};
    use super::*;

    #[derive(ModelClass)]
    pub struct Site {
        pub components: Vec<Ref<Component>>,
        pub widgets: Vec<Ref<Widget>>,
        #[model(weak)]
        pub project_dependencies: Vec<Ref<ProjectDependency>>,
        pub legacy_things: Option<Vec<Ref<LegacyThing>>>,
    }

    #[derive(ModelClass)]
    pub struct Widget {
        pub foo: String,
    }

    #[derive(ModelClass)]
    pub struct LegacyThing {
        pub label: String,
    }

    pub fn schema() -> Arc<SchemaRegistry> {
        Arc::new(
            SchemaRegistry::builder("legacy")
                .class::<Site>()
                .class::<Component>()
                .class::<TplNode>()
                .class::<ProjectDependency>()
                .class::<Widget>()
                .class::<LegacyThing>()
                .build()
                .unwrap(),
        )
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn current_schema() -> Arc<SchemaRegistry> {
    Arc::new(
        SchemaRegistry::builder("current")
            .class::<current::Site>()
            .class::<current::Component>()
            .class::<current::TplNode>()
            .class::<current::ProjectDependency>()
            .class::<current::Widget>()
            .build()
            .unwrap(),
    )
}

pub const DROP_LEGACY_THINGS: &str = "1-drop-legacy-things";
pub const RENAME_WIDGET_FOO: &str = "2-rename-widget-foo";

/// Unbundled step clearing `Site.legacyThings`; the things themselves become
/// unreachable and are not bundled again.
pub fn drop_legacy_things() -> Migration {
    Migration::unbundled(DROP_LEGACY_THINGS, legacy::schema(), |site, _ctx| {
        let root = site.site();
        site.graph_mut()
            .set(root, "legacyThings", Vec::<InstId>::new())?;
        Ok(())
    })
    .unwrap()
}

/// Bundled step renaming `Widget.foo` to `Widget.bar`.
pub fn rename_widget_foo() -> Migration {
    Migration::bundled(RENAME_WIDGET_FOO, |mut bundle, _ctx| {
        bundle.rename_field("Widget", "foo", "bar");
        bundle.remove_field("Site", "legacyThings");
        Ok(bundle)
    })
    .unwrap()
}

pub fn registry() -> MigrationRegistry {
    MigrationRegistry::new()
        .with(drop_legacy_things())
        .unwrap()
        .with(rename_widget_foo())
        .unwrap()
}

pub fn runner() -> MigrationRunner {
    MigrationRunner::new(Arc::new(registry()), current_schema())
}

/// A legacy site with `widgets` widgets, `things` legacy things and one
/// component holding a small template tree.
pub fn legacy_site(widgets: usize, things: usize) -> Bundle {
    let mut bundler = Bundler::new(legacy::schema());
    let site = build_legacy_site(&mut bundler, widgets, things);
    bundler.bundle(site, "proj", INITIAL_VERSION).unwrap()
}

fn build_legacy_site(bundler: &mut Bundler, widgets: usize, things: usize) -> InstId {
    let graph = bundler.graph_mut();
    let site = graph.create("Site");

    let root_tpl = graph.create("Tpl");
    let leaf_tpl = graph.create("Tpl");
    graph.set(root_tpl, "name", json!("root")).unwrap();
    graph.set(root_tpl, "children", vec![leaf_tpl]).unwrap();
    graph.set(leaf_tpl, "name", json!("leaf")).unwrap();
    graph.set(leaf_tpl, "children", Vec::<InstId>::new()).unwrap();

    let component = graph.create("Component");
    graph.set(component, "name", json!("Button")).unwrap();
    graph.set(component, "site", site).unwrap();
    graph.set(component, "tplTree", root_tpl).unwrap();

    let widget_ids: Vec<InstId> = (0..widgets)
        .map(|i| {
            let widget = graph.create("Widget");
            graph.set(widget, "foo", json!(format!("w{i}"))).unwrap();
            widget
        })
        .collect();
    let thing_ids: Vec<InstId> = (0..things)
        .map(|i| {
            let thing = graph.create("LegacyThing");
            graph.set(thing, "label", json!(format!("t{i}"))).unwrap();
            thing
        })
        .collect();

    graph.set(site, "components", vec![component]).unwrap();
    graph.set(site, "widgets", widget_ids).unwrap();
    graph
        .set(site, "projectDependencies", Vec::<InstId>::new())
        .unwrap();
    graph.set(site, "legacyThings", thing_ids).unwrap();
    site
}

/// A published package (`pv-1`) exporting one component, and a project
/// (`proj`) whose component extends it.
pub fn project_with_dependency() -> (Bundle, Bundle) {
    project_with_package_widgets(&[])
}

/// Like [`project_with_dependency`], with legacy widgets in the package site.
pub fn project_with_package_widgets(widgets: &[&str]) -> (Bundle, Bundle) {
    let mut bundler = Bundler::new(legacy::schema());

    let graph = bundler.graph_mut();
    let dep_root = graph.create("ProjectDependency");
    let dep_site = graph.create("Site");
    let dep_comp = graph.create("Component");
    graph.set(dep_root, "pkgId", json!("pkg")).unwrap();
    graph.set(dep_root, "version", json!("1.0.0")).unwrap();
    graph.set(dep_root, "site", dep_site).unwrap();
    graph.set(dep_comp, "name", json!("Card")).unwrap();
    graph.set(dep_comp, "site", dep_site).unwrap();
    graph.set(dep_site, "components", vec![dep_comp]).unwrap();
    let dep_widgets: Vec<InstId> = widgets
        .iter()
        .map(|foo| {
            let widget = graph.create("Widget");
            graph.set(widget, "foo", json!(foo)).unwrap();
            widget
        })
        .collect();
    graph.set(dep_site, "widgets", dep_widgets).unwrap();
    graph
        .set(dep_site, "projectDependencies", Vec::<InstId>::new())
        .unwrap();
    let dep = bundler.bundle(dep_root, "pv-1", INITIAL_VERSION).unwrap();

    let site = build_legacy_site(&mut bundler, 1, 1);
    let graph = bundler.graph_mut();
    let local_comp = graph.refs_of(site, "components")[0];
    graph.set(local_comp, "superComp", dep_comp).unwrap();
    graph.set(site, "projectDependencies", vec![dep_root]).unwrap();
    let project = bundler.bundle(site, "proj", INITIAL_VERSION).unwrap();

    (dep, project)
}

/// An in-memory database holding `bundles`, keyed by entity id.
pub fn memory_db<'a>(bundles: impl IntoIterator<Item = (&'a str, &'a Bundle)>) -> InMemoryDb {
    let db = InMemoryDb::new();
    for (id, bundle) in bundles {
        db.insert_entity(Entity::from_bundle(id, bundle).unwrap())
            .unwrap();
    }
    db
}

pub use bundle_store::databases::memory::InMemoryDb;

/// Widget records of `bundle`, sorted by iid.
pub fn widget_values(bundle: &Bundle, field: &str) -> Vec<String> {
    bundle
        .instances_of_type("Widget")
        .filter_map(|(_, inst)| inst.get(field).and_then(|v| v.as_str()).map(str::to_string))
        .collect()
}
