//! Shared intermediate representation: canonical types, provider specs and
//! build directives flowing between the pipeline stages.

use proc_macro2::Span;

/// Canonical identity of the context type (spec: the one argument that
/// always sorts first and names `ctx`).
pub const CONTEXT_CANON: &str = "tokio_util::sync::CancellationToken";

/// A resolved type: the Oracle-resolved `syn::Type` (every path rewritten to
/// `self::Name` or its fully qualified form) together with its canonical
/// string, which is the sole identity key used by the pipeline.
#[derive(Debug, Clone)]
pub struct TypeRef {
    pub canon: String,
    pub ty: syn::Type,
}

impl TypeRef {
    pub fn new(ty: syn::Type) -> Self {
        Self {
            canon: render_canonical(&ty),
            ty,
        }
    }

    pub fn is_context(&self) -> bool {
        self.canon == CONTEXT_CANON
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.canon == other.canon
    }
}

impl Eq for TypeRef {}

/// How a provider is rendered at its call site.
#[derive(Debug, Clone)]
pub enum Callee {
    /// A function call; the path is Oracle-resolved.
    Function(syn::Path),
    /// A `value(expr)` provider; the expression is carried verbatim and
    /// alias-rewritten at emission.
    Value(syn::Expr),
}

/// One provider of a build directive after flattening: `Async` markers are
/// folded into `is_async`, `Bind` wrappers into `binds`.
#[derive(Debug, Clone)]
pub struct ProviderSpec {
    pub callee: Callee,
    /// Diagnostic name, also baked into generated error wrapping.
    pub label: String,
    /// Input types in declared parameter order.
    pub requires: Vec<TypeRef>,
    /// Output types in declared order; a tuple return contributes one slot
    /// per element. Never empty, never an error type.
    pub provides: Vec<TypeRef>,
    /// Interface types additionally provided through a concrete output slot
    /// (`bind`): `(slot, Arc<dyn Trait> type)`.
    pub binds: Vec<(usize, TypeRef)>,
    pub returns_error: bool,
    /// Scheduled onto an auxiliary task (explicit `async_` marker, or the
    /// provider is an `async fn`).
    pub is_async: bool,
    /// The call itself needs `.await`.
    pub awaits: bool,
    pub span: Span,
}

/// One `inject!` call, fully flattened.
#[derive(Debug, Clone)]
pub struct BuildDirective {
    pub injector_name: String,
    pub return_type: TypeRef,
    pub providers: Vec<ProviderSpec>,
    pub span: Span,
}

/// The single type argument of a path segment, e.g. `T` in `Arc<T>`.
pub fn single_type_argument(segment: &syn::PathSegment) -> Option<&syn::Type> {
    if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
        let mut types = args.args.iter().filter_map(|arg| match arg {
            syn::GenericArgument::Type(ty) => Some(ty),
            _ => None,
        });
        let first = types.next()?;
        if types.next().is_none() {
            return Some(first);
        }
    }
    None
}

/// Renders a type to its canonical string: fully qualified paths, normalized
/// whitespace, lifetimes erased. Two types are the same vertex iff their
/// canonical strings are equal.
pub fn render_canonical(ty: &syn::Type) -> String {
    match ty {
        syn::Type::Path(path) => render_path(&path.path),
        syn::Type::Reference(inner) => {
            let mutability = if inner.mutability.is_some() { "mut " } else { "" };
            format!("&{}{}", mutability, render_canonical(&inner.elem))
        }
        syn::Type::TraitObject(obj) => {
            let bounds: Vec<String> = obj
                .bounds
                .iter()
                .filter_map(|bound| match bound {
                    syn::TypeParamBound::Trait(t) => Some(render_path(&t.path)),
                    _ => None,
                })
                .collect();
            format!("dyn {}", bounds.join(" + "))
        }
        syn::Type::Tuple(tuple) => {
            let elems: Vec<String> = tuple.elems.iter().map(render_canonical).collect();
            format!("({})", elems.join(", "))
        }
        syn::Type::Slice(slice) => format!("[{}]", render_canonical(&slice.elem)),
        syn::Type::Array(array) => {
            let len = &array.len;
            format!(
                "[{}; {}]",
                render_canonical(&array.elem),
                compact_tokens(quote::quote!(#len))
            )
        }
        syn::Type::Ptr(ptr) => {
            let qualifier = if ptr.mutability.is_some() { "mut" } else { "const" };
            format!("*{} {}", qualifier, render_canonical(&ptr.elem))
        }
        syn::Type::Paren(inner) => render_canonical(&inner.elem),
        syn::Type::Group(inner) => render_canonical(&inner.elem),
        other => compact_tokens(quote::quote!(#other)),
    }
}

/// Renders a (type or expression) path canonically: `a::b::C<D, E>`.
pub fn render_path(path: &syn::Path) -> String {
    // Leading `::` anchors add nothing to identity and are dropped.
    let mut out = String::new();
    for (i, segment) in path.segments.iter().enumerate() {
        if i > 0 {
            out.push_str("::");
        }
        out.push_str(&segment.ident.to_string());
        match &segment.arguments {
            syn::PathArguments::None => {}
            syn::PathArguments::AngleBracketed(args) => {
                let rendered: Vec<String> = args
                    .args
                    .iter()
                    .filter_map(|arg| match arg {
                        syn::GenericArgument::Type(ty) => Some(render_canonical(ty)),
                        syn::GenericArgument::Const(expr) => {
                            Some(compact_tokens(quote::quote!(#expr)))
                        }
                        _ => None,
                    })
                    .collect();
                if !rendered.is_empty() {
                    out.push('<');
                    out.push_str(&rendered.join(", "));
                    out.push('>');
                }
            }
            syn::PathArguments::Parenthesized(args) => {
                let inputs: Vec<String> = args.inputs.iter().map(render_canonical).collect();
                out.push('(');
                out.push_str(&inputs.join(", "));
                out.push(')');
                if let syn::ReturnType::Type(_, ty) = &args.output {
                    out.push_str(" -> ");
                    out.push_str(&render_canonical(ty));
                }
            }
        }
    }
    out
}

fn compact_tokens(tokens: proc_macro2::TokenStream) -> String {
    tokens.to_string().split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon(tokens: &str) -> String {
        render_canonical(&syn::parse_str(tokens).unwrap())
    }

    #[test]
    fn canonical_paths_and_generics() {
        assert_eq!(canon("self::Config"), "self::Config");
        assert_eq!(canon("std::sync::Arc<dyn self::Repo>"), "std::sync::Arc<dyn self::Repo>");
        assert_eq!(canon("Vec < String >"), "Vec<String>");
    }

    #[test]
    fn canonical_erases_lifetimes() {
        assert_eq!(canon("&'static str"), "&str");
        assert_eq!(canon("&'a mut self::Buffer"), "&mut self::Buffer");
    }

    #[test]
    fn canonical_tuples_and_slices() {
        assert_eq!(canon("(u8, self::Db)"), "(u8, self::Db)");
        assert_eq!(canon("[u8]"), "[u8]");
    }

    #[test]
    fn identical_canon_is_same_vertex() {
        let a = TypeRef::new(syn::parse_str("& 'a str").unwrap());
        let b = TypeRef::new(syn::parse_str("&str").unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn context_detection() {
        let ctx = TypeRef::new(syn::parse_str("tokio_util::sync::CancellationToken").unwrap());
        assert!(ctx.is_context());
        let other = TypeRef::new(syn::parse_str("self::Config").unwrap());
        assert!(!other.is_context());
    }
}
