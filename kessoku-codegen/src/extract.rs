//! Directive extraction: finds every `inject!` invocation whose path
//! resolves to kessoku's macro and reifies it as a [`BuildDirective`].
//!
//! Provider arguments are parsed with a dedicated grammar rather than as
//! plain expressions, because `bind(dyn Repo, ...)` places a type in an
//! argument position. Set references are expanded inline, with a visited
//! stack so a set that transitively references itself is reported as a
//! cycle instead of recursing forever.

use std::collections::BTreeSet;

use proc_macro2::Span;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::Token;

use crate::error::{GenerateError, Location};
use crate::ir::{BuildDirective, Callee, ProviderSpec, TypeRef};
use crate::names::is_valid_ident;
use crate::oracle::Oracle;

/// Result of extracting one file: the clean directives plus every
/// directive-scoped error encountered on the way.
pub struct Extraction {
    pub directives: Vec<BuildDirective>,
    pub errors: Vec<GenerateError>,
}

/// A provider argument as written, before resolution.
enum RawProvider {
    Provide { path: syn::Path, span: Span },
    Async { inner: Box<RawProvider> },
    Bind { iface: syn::Type, inner: Box<RawProvider>, span: Span },
    Value { ty: Option<syn::Type>, expr: syn::Expr, span: Span },
    SetRef { path: syn::Path, span: Span },
    SetInline { items: Vec<RawProvider> },
}

fn last_ident(path: &syn::Path) -> String {
    path.segments
        .last()
        .map(|s| s.ident.to_string())
        .unwrap_or_default()
}

fn turbofish_type(path: &syn::Path) -> Option<syn::Type> {
    let segment = path.segments.last()?;
    crate::ir::single_type_argument(segment).cloned()
}

impl Parse for RawProvider {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let head: syn::ExprPath = input.parse()?;
        let path = head.path;
        let span = path.span();

        if input.peek(Token![!]) {
            // Inline `set!(..)` macro form.
            input.parse::<Token![!]>()?;
            if last_ident(&path) != "set" {
                return Err(syn::Error::new(
                    span,
                    "only `set!` may appear as a macro inside a directive",
                ));
            }
            let content;
            syn::parenthesized!(content in input);
            let items = Punctuated::<RawProvider, Token![,]>::parse_terminated(&content)?;
            return Ok(Self::SetInline {
                items: items.into_iter().collect(),
            });
        }

        if !input.peek(syn::token::Paren) {
            return Ok(Self::SetRef { path, span });
        }

        let content;
        syn::parenthesized!(content in input);
        match last_ident(&path).as_str() {
            "provide" => {
                let callee: syn::ExprPath = content.parse()?;
                Ok(Self::Provide {
                    path: callee.path,
                    span,
                })
            }
            "async_" => Ok(Self::Async {
                inner: Box::new(content.parse()?),
            }),
            "bind" => {
                let iface: syn::Type = content.parse()?;
                content.parse::<Token![,]>()?;
                let inner: RawProvider = content.parse()?;
                Ok(Self::Bind {
                    iface,
                    inner: Box::new(inner),
                    span,
                })
            }
            "value" => {
                let ty = turbofish_type(&path);
                let expr: syn::Expr = content.parse()?;
                Ok(Self::Value { ty, expr, span })
            }
            "set" => {
                let items = Punctuated::<RawProvider, Token![,]>::parse_terminated(&content)?;
                Ok(Self::SetInline {
                    items: items.into_iter().collect(),
                })
            }
            other => Err(syn::Error::new(
                span,
                format!(
                    "unsupported provider `{other}(..)`; expected provide, async_, bind, value or a set"
                ),
            )),
        }
    }
}

/// The token grammar of one `inject!(Type, "name", provider...)`.
struct DirectiveInput {
    return_type: syn::Type,
    name: syn::Expr,
    providers: Vec<RawProvider>,
}

impl Parse for DirectiveInput {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let return_type: syn::Type = input.parse()?;
        input.parse::<Token![,]>()?;
        let name: syn::Expr = input.parse()?;
        let mut providers = Vec::new();
        while !input.is_empty() {
            input.parse::<Token![,]>()?;
            if input.is_empty() {
                break;
            }
            providers.push(input.parse()?);
        }
        Ok(Self {
            return_type,
            name,
            providers,
        })
    }
}

struct SetBody(Vec<RawProvider>);

impl Parse for SetBody {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let items = Punctuated::<RawProvider, Token![,]>::parse_terminated(input)?;
        Ok(Self(items.into_iter().collect()))
    }
}

struct Flattener<'a> {
    oracle: &'a Oracle,
    /// `(set name, index)` pairs already expanded, so the same provider
    /// occurrence reached through multiple set paths is emitted once.
    expanded: BTreeSet<(String, usize)>,
    stack: Vec<String>,
}

impl<'a> Flattener<'a> {
    fn new(oracle: &'a Oracle) -> Self {
        Self {
            oracle,
            expanded: BTreeSet::new(),
            stack: Vec::new(),
        }
    }

    fn extract_err(&self, span: Span, message: impl Into<String>) -> GenerateError {
        GenerateError::extract(self.oracle.file(), span, message)
    }

    fn flatten(
        &mut self,
        raw: RawProvider,
        out: &mut Vec<ProviderSpec>,
    ) -> Result<(), GenerateError> {
        match raw {
            RawProvider::SetRef { path, span } => self.expand_set(&path, span, out),
            RawProvider::SetInline { items } => {
                for item in items {
                    self.flatten(item, out)?;
                }
                Ok(())
            }
            other => {
                let spec = self.single(other, false)?;
                out.push(spec);
                Ok(())
            }
        }
    }

    fn expand_set(
        &mut self,
        path: &syn::Path,
        span: Span,
        out: &mut Vec<ProviderSpec>,
    ) -> Result<(), GenerateError> {
        if path.segments.len() > 1 {
            tracing::warn!(
                set = %crate::ir::render_path(path),
                "skipping set reference from another package; cross-package sets are unsupported"
            );
            return Ok(());
        }
        let name = last_ident(path);
        if self.stack.contains(&name) {
            return Err(GenerateError::Cycle {
                location: Location::new(self.oracle.file(), span),
                ty: name,
            });
        }
        let Some(tokens) = self.oracle.declaration_of(&name) else {
            return Err(self.extract_err(
                span,
                format!("`{name}` is neither a provider nor a set declared in this file"),
            ));
        };
        let body: SetBody = syn::parse2(tokens.clone())
            .map_err(|err| self.extract_err(span, format!("invalid set `{name}`: {err}")))?;

        self.stack.push(name.clone());
        for (index, item) in body.0.into_iter().enumerate() {
            if !self.expanded.insert((name.clone(), index)) {
                continue;
            }
            self.flatten(item, out)?;
        }
        self.stack.pop();
        Ok(())
    }

    fn single(&mut self, raw: RawProvider, is_async: bool) -> Result<ProviderSpec, GenerateError> {
        match raw {
            RawProvider::Provide { path, span } => {
                let sig = self
                    .oracle
                    .signature(&path)
                    .map_err(|message| self.extract_err(span, message))?;
                Ok(ProviderSpec {
                    callee: Callee::Function(self.oracle.scope().resolve_path(&path)),
                    label: crate::ir::render_path(&path),
                    requires: sig.inputs,
                    provides: sig.outputs,
                    binds: Vec::new(),
                    returns_error: sig.returns_error,
                    is_async: is_async || sig.is_async,
                    awaits: sig.is_async,
                    span,
                })
            }
            RawProvider::Async { inner } => self.single(*inner, true),
            RawProvider::Bind { iface, inner, span } => {
                let mut spec = self.single(*inner, is_async)?;
                let (trait_canon, iface_ref) = self.bind_target(&iface, span)?;
                let mut bound = false;
                for (slot, provided) in spec.provides.iter().enumerate() {
                    if self.oracle.implements(provided, &trait_canon) {
                        spec.binds.push((slot, iface_ref.clone()));
                        bound = true;
                    }
                }
                if !bound {
                    tracing::warn!(
                        provider = %spec.label,
                        interface = %trait_canon,
                        "no provided type implements the bind target; the binding is dropped"
                    );
                }
                Ok(spec)
            }
            RawProvider::Value { ty, expr, span } => {
                let ty_ref = match ty {
                    Some(ty) => self.oracle.scope().resolve_type(&ty),
                    None => self.oracle.value_type_of(&expr).ok_or_else(|| {
                        self.extract_err(
                            span,
                            "cannot infer the type of value(..); spell it as value::<T>(..)",
                        )
                    })?,
                };
                Ok(ProviderSpec {
                    callee: Callee::Value(self.oracle.scope().resolve_expr(&expr)),
                    label: "value".to_string(),
                    requires: Vec::new(),
                    provides: vec![ty_ref],
                    binds: Vec::new(),
                    returns_error: false,
                    is_async,
                    awaits: false,
                    span,
                })
            }
            RawProvider::SetRef { span, .. } => {
                Err(self.extract_err(span, "a set cannot be wrapped by async_ or bind"))
            }
            RawProvider::SetInline { .. } => Err(self.extract_err(
                Span::call_site(),
                "a set cannot be wrapped by async_ or bind",
            )),
        }
    }

    /// Normalizes a bind target to `(trait canonical path, Arc<dyn Trait>)`.
    fn bind_target(
        &self,
        iface: &syn::Type,
        span: Span,
    ) -> Result<(String, TypeRef), GenerateError> {
        let object = match iface {
            syn::Type::TraitObject(_) => iface.clone(),
            syn::Type::Path(path) => {
                let arc = path
                    .path
                    .segments
                    .last()
                    .filter(|segment| segment.ident == "Arc")
                    .and_then(crate::ir::single_type_argument);
                match arc {
                    Some(inner @ syn::Type::TraitObject(_)) => inner.clone(),
                    _ => {
                        return Err(self.extract_err(
                            span,
                            "bind target must be a trait object: bind(dyn Trait, ..)",
                        ))
                    }
                }
            }
            _ => {
                return Err(self.extract_err(
                    span,
                    "bind target must be a trait object: bind(dyn Trait, ..)",
                ))
            }
        };

        let resolved_object = self.oracle.scope().resolve_type(&object);
        let trait_canon = match &resolved_object.ty {
            syn::Type::TraitObject(obj) => obj
                .bounds
                .iter()
                .find_map(|bound| match bound {
                    syn::TypeParamBound::Trait(t) => Some(crate::ir::render_path(&t.path)),
                    _ => None,
                })
                .ok_or_else(|| {
                    self.extract_err(span, "bind target has no trait bound")
                })?,
            _ => unreachable!("normalized bind target is always a trait object"),
        };
        let object_ty = resolved_object.ty;
        let arc_ty: syn::Type = syn::parse_quote!(std::sync::Arc<#object_ty>);
        Ok((trait_canon, TypeRef::new(arc_ty)))
    }
}

/// Walks the file and reifies every kessoku `inject!` invocation.
pub fn extract(oracle: &Oracle) -> Extraction {
    let mut directives: Vec<BuildDirective> = Vec::new();
    let mut errors = Vec::new();

    for item in &oracle.ast().items {
        let syn::Item::Macro(item) = item else {
            continue;
        };
        if !oracle.is_inject_macro(&item.mac.path) {
            continue;
        }
        let span = item.mac.path.span();

        let input = match syn::parse2::<DirectiveInput>(item.mac.tokens.clone()) {
            Ok(input) => input,
            Err(err) => {
                errors.push(GenerateError::extract(
                    oracle.file(),
                    err.span(),
                    format!("invalid inject! directive: {err}"),
                ));
                continue;
            }
        };

        let name = match directive_name(&input.name) {
            Ok(name) => name,
            Err(message) => {
                errors.push(GenerateError::extract(oracle.file(), span, message));
                continue;
            }
        };
        if directives.iter().any(|d| d.injector_name == name) {
            errors.push(GenerateError::extract(
                oracle.file(),
                span,
                format!("duplicate injector name `{name}`"),
            ));
            continue;
        }
        if input.providers.is_empty() {
            errors.push(GenerateError::extract(
                oracle.file(),
                span,
                "directive has no providers",
            ));
            continue;
        }

        let return_type = oracle.scope().resolve_type(&input.return_type);
        let mut providers = Vec::new();
        let mut flattener = Flattener::new(oracle);
        let mut failed = false;
        for raw in input.providers {
            if let Err(err) = flattener.flatten(raw, &mut providers) {
                errors.push(err);
                failed = true;
                break;
            }
        }
        if failed {
            continue;
        }

        directives.push(BuildDirective {
            injector_name: name,
            return_type,
            providers,
            span,
        });
    }

    Extraction { directives, errors }
}

fn directive_name(expr: &syn::Expr) -> Result<String, String> {
    let syn::Expr::Lit(lit) = expr else {
        return Err("injector name must be a string literal".to_string());
    };
    let syn::Lit::Str(name) = &lit.lit else {
        return Err("injector name must be a string literal".to_string());
    };
    let value = name.value();
    if !is_valid_ident(&value) {
        return Err(format!("injector name `{value}` is not a valid identifier"));
    }
    Ok(value)
}
