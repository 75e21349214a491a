use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{DeriveInput, parse_macro_input};

use crate::model::{FieldInfo, Kind, ModelInfo, Primitive};

mod model;

/// Derives `bundle_store::schema::ModelClass`, generating the class's field
/// table from its struct declaration.
///
/// Field kinds are read off the field types:
///
/// - `Ref<T>` is a single reference to a `T`
/// - `Vec<Ref<T>>` is a reference list
/// - `BTreeMap<String, Ref<T>>` / `HashMap<String, Ref<T>>` is a reference map
/// - `Option<_>` makes any of the above optional
/// - anything else is a scalar, typed `string`, `number` or `bool` when the
///   Rust type is one of those
///
/// Field names are converted to lowerCamelCase.
///
/// # Attributes
///
/// On the struct, `#[model(...)]` accepts:
/// - `name = "Class"` - class name, defaults to the struct name
/// - `base = "Base"` - superclass
/// - `is_abstract`
///
/// On fields:
/// - `rename = "name"`
/// - `weak` - the reference does not own its target
/// - `embedded` - an inline value record rather than a scalar
/// - `transient` - never bundled
/// - `optional`
/// - `inverse_of = "field"` - derived back-pointer to the owner holding this
///   instance in `field`; implies `optional` and `transient`
/// - `skip` - not part of the model
///
/// # Examples
///
/// ```ignore
/// use bundle_store::ModelClass;
/// use bundle_store::graph::Ref;
/// use bundle_store::schema::{FieldKind, ModelClass as _};
///
/// #[derive(ModelClass)]
/// struct Component {
///     name: String,
///     tpl_tree: Ref<TplNode>,
/// }
///
/// #[derive(ModelClass)]
/// #[model(name = "TplTag")]
/// struct TplNode {
///     children: Vec<Ref<TplNode>>,
///     #[model(inverse_of = "children")]
///     parent: Ref<TplNode>,
/// }
///
/// let class = Component::class_schema();
/// assert_eq!(class.name, "Component");
/// let tree = class.own_field("tplTree").unwrap();
/// assert_eq!(tree.kind, FieldKind::Ref);
/// assert_eq!(tree.target.as_deref(), Some("TplTag"));
/// ```
#[proc_macro_derive(ModelClass, attributes(model))]
pub fn model_class_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match ModelInfo::parse(&input) {
        Ok(info) => generate_model_class(&input, &info).into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn generate_model_class(input: &DeriveInput, info: &ModelInfo) -> TokenStream2 {
    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let class_name = &info.class_name;
    let base = match &info.base {
        Some(base) => quote!(::core::option::Option::Some(#base.to_string())),
        None => quote!(::core::option::Option::None),
    };
    let is_abstract = info.is_abstract;
    let fields = info.fields.iter().map(generate_field);

    quote! {
        impl #impl_generics ::bundle_store::schema::ModelClass for #ident #ty_generics #where_clause {
            const CLASS_NAME: &'static str = #class_name;

            fn class_schema() -> ::bundle_store::schema::ClassSchema {
                ::bundle_store::schema::ClassSchema {
                    name: #class_name.to_string(),
                    base: #base,
                    is_abstract: #is_abstract,
                    fields: ::std::vec![#(#fields),*],
                }
            }
        }
    }
}

fn generate_field(field: &FieldInfo) -> TokenStream2 {
    let name = &field.name;
    let kind = match field.kind {
        Kind::Scalar => quote!(Scalar),
        Kind::Embedded => quote!(Embedded),
        Kind::Ref => quote!(Ref),
        Kind::RefList => quote!(RefList),
        Kind::RefMap => quote!(RefMap),
    };
    let value_type = match field.primitive {
        Primitive::Any => quote!(Any),
        Primitive::String => quote!(String),
        Primitive::Number => quote!(Number),
        Primitive::Bool => quote!(Bool),
    };
    let target = match &field.target {
        Some(ty) => quote! {
            ::core::option::Option::Some(
                <#ty as ::bundle_store::schema::ModelClass>::CLASS_NAME.to_string()
            )
        },
        None => quote!(::core::option::Option::None),
    };
    let inverse_of = match &field.inverse_of {
        Some(forward) => quote!(::core::option::Option::Some(#forward.to_string())),
        None => quote!(::core::option::Option::None),
    };
    let optional = field.optional;
    let weak = field.weak;
    let transient = field.transient;

    quote! {
        ::bundle_store::schema::FieldSchema {
            name: #name.to_string(),
            kind: ::bundle_store::schema::FieldKind::#kind,
            optional: #optional,
            weak: #weak,
            transient: #transient,
            target: #target,
            inverse_of: #inverse_of,
            value_type: ::bundle_store::schema::ValueType::#value_type,
        }
    }
}
