//! Parsing of `#[derive(ModelClass)]` input into a field table.

use heck::ToLowerCamelCase;
use syn::{
    Attribute, Data, DeriveInput, Fields, GenericArgument, LitStr, PathArguments, Type,
    spanned::Spanned,
};

/// Semantic kind of a field, mirroring `bundle_store::schema::FieldKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Scalar,
    Embedded,
    Ref,
    RefList,
    RefMap,
}

/// Primitive type of a scalar field, mirroring `bundle_store::schema::ValueType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Any,
    String,
    Number,
    Bool,
}

pub struct FieldInfo {
    pub name: String,
    pub kind: Kind,
    pub optional: bool,
    pub weak: bool,
    pub transient: bool,
    /// Model type a reference field points at.
    pub target: Option<Type>,
    pub inverse_of: Option<String>,
    pub primitive: Primitive,
}

pub struct ModelInfo {
    pub class_name: String,
    pub base: Option<String>,
    pub is_abstract: bool,
    pub fields: Vec<FieldInfo>,
}

#[derive(Default)]
struct FieldAttrs {
    rename: Option<String>,
    embedded: bool,
    weak: bool,
    transient: bool,
    optional: bool,
    skip: bool,
    inverse_of: Option<String>,
}

impl ModelInfo {
    pub fn parse(input: &DeriveInput) -> syn::Result<Self> {
        let mut info = ModelInfo {
            class_name: input.ident.to_string(),
            base: None,
            is_abstract: false,
            fields: Vec::new(),
        };
        for attr in model_attrs(&input.attrs) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    info.class_name = meta.value()?.parse::<LitStr>()?.value();
                } else if meta.path.is_ident("base") {
                    info.base = Some(meta.value()?.parse::<LitStr>()?.value());
                } else if meta.path.is_ident("is_abstract") {
                    info.is_abstract = true;
                } else {
                    return Err(meta.error("expected `name`, `base` or `is_abstract`"));
                }
                Ok(())
            })?;
        }

        let fields = match &input.data {
            Data::Struct(data) => &data.fields,
            _ => {
                return Err(syn::Error::new(
                    input.span(),
                    "ModelClass can only be derived for structs",
                ));
            }
        };
        let named = match fields {
            Fields::Named(named) => named.named.iter().collect::<Vec<_>>(),
            Fields::Unit => Vec::new(),
            Fields::Unnamed(_) => {
                return Err(syn::Error::new(
                    fields.span(),
                    "ModelClass fields must be named",
                ));
            }
        };

        for field in named {
            let attrs = FieldAttrs::parse(&field.attrs)?;
            if attrs.skip {
                continue;
            }
            let Some(ident) = &field.ident else {
                continue;
            };
            let rust_name = ident.to_string();
            let name = attrs.rename.clone().unwrap_or_else(|| {
                rust_name
                    .trim_start_matches("r#")
                    .to_lower_camel_case()
            });
            info.fields.push(FieldInfo::from_type(name, &field.ty, attrs)?);
        }
        Ok(info)
    }
}

fn model_attrs(attrs: &[Attribute]) -> impl Iterator<Item = &Attribute> {
    attrs.iter().filter(|a| a.path().is_ident("model"))
}

impl FieldAttrs {
    fn parse(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut out = FieldAttrs::default();
        for attr in model_attrs(attrs) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("rename") {
                    out.rename = Some(meta.value()?.parse::<LitStr>()?.value());
                } else if meta.path.is_ident("inverse_of") {
                    out.inverse_of = Some(meta.value()?.parse::<LitStr>()?.value());
                } else if meta.path.is_ident("embedded") {
                    out.embedded = true;
                } else if meta.path.is_ident("weak") {
                    out.weak = true;
                } else if meta.path.is_ident("transient") {
                    out.transient = true;
                } else if meta.path.is_ident("optional") {
                    out.optional = true;
                } else if meta.path.is_ident("skip") {
                    out.skip = true;
                } else {
                    return Err(meta.error(
                        "expected one of `rename`, `inverse_of`, `embedded`, `weak`, `transient`, `optional`, `skip`",
                    ));
                }
                Ok(())
            })?;
        }
        Ok(out)
    }
}

impl FieldInfo {
    fn from_type(name: String, ty: &Type, attrs: FieldAttrs) -> syn::Result<Self> {
        let (optional, ty) = match generic_args("Option", ty).as_deref() {
            Some([inner]) => (true, *inner),
            _ => (false, ty),
        };

        let (kind, target) = if let Some(target) = ref_target(ty) {
            (Kind::Ref, Some(target))
        } else if let Some(target) = list_target(ty) {
            (Kind::RefList, Some(target))
        } else if let Some(target) = map_target(ty) {
            (Kind::RefMap, Some(target))
        } else if attrs.embedded {
            (Kind::Embedded, None)
        } else {
            (Kind::Scalar, None)
        };

        if attrs.embedded && kind != Kind::Embedded {
            return Err(syn::Error::new(
                ty.span(),
                "an embedded field cannot hold references",
            ));
        }
        if attrs.inverse_of.is_some() && kind != Kind::Ref {
            return Err(syn::Error::new(
                ty.span(),
                "`inverse_of` needs a single `Ref<T>` field",
            ));
        }
        let is_inverse = attrs.inverse_of.is_some();

        Ok(FieldInfo {
            name,
            kind,
            optional: optional || attrs.optional || is_inverse,
            weak: attrs.weak,
            transient: attrs.transient || is_inverse,
            target: target.cloned(),
            inverse_of: attrs.inverse_of,
            primitive: if kind == Kind::Scalar {
                primitive_of(ty)
            } else {
                Primitive::Any
            },
        })
    }
}

/// Generic arguments of `ty` when its last path segment is `wrapper`.
fn generic_args<'a>(wrapper: &str, ty: &'a Type) -> Option<Vec<&'a Type>> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident != wrapper {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    Some(
        args.args
            .iter()
            .filter_map(|arg| match arg {
                GenericArgument::Type(ty) => Some(ty),
                _ => None,
            })
            .collect(),
    )
}

fn ref_target(ty: &Type) -> Option<&Type> {
    match generic_args("Ref", ty)?.as_slice() {
        [target] => Some(*target),
        _ => None,
    }
}

fn list_target(ty: &Type) -> Option<&Type> {
    match generic_args("Vec", ty)?.as_slice() {
        [item] => ref_target(*item),
        _ => None,
    }
}

fn map_target(ty: &Type) -> Option<&Type> {
    let args = generic_args("BTreeMap", ty).or_else(|| generic_args("HashMap", ty))?;
    match args.as_slice() {
        [_, value] => ref_target(*value),
        _ => None,
    }
}

fn primitive_of(ty: &Type) -> Primitive {
    let ident = match ty {
        Type::Path(path) => path.path.segments.last().map(|s| s.ident.to_string()),
        Type::Reference(reference) => return primitive_of(&reference.elem),
        _ => None,
    };
    match ident.as_deref() {
        Some("String" | "str") => Primitive::String,
        Some("bool") => Primitive::Bool,
        Some(
            "u8" | "u16" | "u32" | "u64" | "u128" | "usize" | "i8" | "i16" | "i32" | "i64"
            | "i128" | "isize" | "f32" | "f64",
        ) => Primitive::Number,
        _ => Primitive::Any,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn infers_kinds_from_field_types() {
        let input: DeriveInput = parse_quote! {
            #[model(base = "Tpl")]
            struct TplTag {
                tag: String,
                is_hidden: Option<bool>,
                children: Vec<Ref<TplTag>>,
                slots: BTreeMap<String, Ref<TplTag>>,
                #[model(weak)]
                owner: Option<Ref<Component>>,
                #[model(inverse_of = "children")]
                parent: Ref<TplTag>,
                #[model(embedded)]
                style: serde_json::Value,
                #[model(skip)]
                cache: u32,
            }
        };
        let info = ModelInfo::parse(&input).unwrap();
        assert_eq!(info.class_name, "TplTag");
        assert_eq!(info.base.as_deref(), Some("Tpl"));

        let summary: Vec<(&str, Kind, bool)> = info
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.kind, f.optional))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("tag", Kind::Scalar, false),
                ("isHidden", Kind::Scalar, true),
                ("children", Kind::RefList, false),
                ("slots", Kind::RefMap, false),
                ("owner", Kind::Ref, true),
                ("parent", Kind::Ref, true),
                ("style", Kind::Embedded, false),
            ]
        );
        assert_eq!(info.fields[1].primitive, Primitive::Bool);
        assert!(info.fields[4].weak);
        assert!(info.fields[5].transient);
    }

    #[test]
    fn rejects_references_marked_embedded() {
        let input: DeriveInput = parse_quote! {
            struct Bad {
                #[model(embedded)]
                child: Ref<Bad>,
            }
        };
        assert!(ModelInfo::parse(&input).is_err());
    }
}
