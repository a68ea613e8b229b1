//! The Syntax & Type Oracle adapter.
//!
//! Wraps `syn` parsing of one input file and answers the type questions the
//! extractor and graph builder ask: canonical types, provider function
//! signatures, trait implementations, set declarations and literal value
//! types. Resolution is purely syntactic: paths are resolved through the
//! file's `use` imports and top-level items, never by running the compiler.
//!
//! File-local items resolve to `self::Name`; imported symbols resolve to
//! their fully qualified path. That resolved form is both the canonical
//! identity key and the basis for alias rewriting at emission.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use proc_macro2::TokenStream;
use syn::parse::{Parse, ParseStream};
use syn::visit_mut::VisitMut;
use syn::Token;

use crate::error::GenerateError;
use crate::ir::TypeRef;

/// A provider function signature, normalized for graph construction.
#[derive(Debug, Clone)]
pub struct FnSig {
    pub inputs: Vec<TypeRef>,
    /// Non-error output slots; a tuple return contributes one per element.
    pub outputs: Vec<TypeRef>,
    pub returns_error: bool,
    pub is_async: bool,
}

/// Name-resolution scope of one file: `use` imports plus top-level items.
#[derive(Debug, Default)]
pub struct Scope {
    uses: BTreeMap<String, syn::Path>,
    glob_kessoku: bool,
    locals: BTreeSet<String>,
}

impl Scope {
    /// Resolves a path to its canonical form: file-local names gain a
    /// `self::` prefix, imported names are expanded through the use-map.
    pub fn resolve_path(&self, path: &syn::Path) -> syn::Path {
        if path.leading_colon.is_some() || path.segments.is_empty() {
            return path.clone();
        }
        let first = path.segments[0].ident.to_string();
        match first.as_str() {
            "crate" | "super" | "self" => path.clone(),
            _ => {
                if let Some(target) = self.uses.get(&first) {
                    return splice(target, path);
                }
                if self.locals.contains(&first) {
                    let mut resolved = path.clone();
                    resolved.segments.insert(
                        0,
                        syn::PathSegment::from(syn::Ident::new(
                            "self",
                            path.segments[0].ident.span(),
                        )),
                    );
                    return resolved;
                }
                path.clone()
            }
        }
    }

    /// Resolves every path inside a type and computes its canonical string.
    pub fn resolve_type(&self, ty: &syn::Type) -> TypeRef {
        let mut resolved = ty.clone();
        PathResolver { scope: self }.visit_type_mut(&mut resolved);
        TypeRef::new(resolved)
    }

    pub fn resolve_expr(&self, expr: &syn::Expr) -> syn::Expr {
        let mut resolved = expr.clone();
        PathResolver { scope: self }.visit_expr_mut(&mut resolved);
        resolved
    }

    fn is_kessoku_symbol(&self, path: &syn::Path, symbol: &str) -> bool {
        if path.segments.len() == 1 && self.glob_kessoku && path.segments[0].ident == symbol {
            return true;
        }
        let resolved = self.resolve_path(path);
        let segments: Vec<String> = resolved
            .segments
            .iter()
            .map(|s| s.ident.to_string())
            .collect();
        segments == ["kessoku", symbol]
    }
}

/// Splices a use-mapped target with the remainder of the written path,
/// carrying generic arguments of the written head onto the target's tail.
fn splice(target: &syn::Path, written: &syn::Path) -> syn::Path {
    let mut out = target.clone();
    if let Some(last) = out.segments.last_mut() {
        last.arguments = written.segments[0].arguments.clone();
    }
    for segment in written.segments.iter().skip(1) {
        out.segments.push(segment.clone());
    }
    out
}

struct PathResolver<'a> {
    scope: &'a Scope,
}

impl VisitMut for PathResolver<'_> {
    fn visit_path_mut(&mut self, path: &mut syn::Path) {
        *path = self.scope.resolve_path(path);
        syn::visit_mut::visit_path_mut(self, path);
    }
}

/// Parsed form of a top-level `set!(NAME, provider...)` declaration.
struct SetDecl {
    name: syn::Ident,
    providers: TokenStream,
}

impl Parse for SetDecl {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let name: syn::Ident = input.parse()?;
        let providers = if input.is_empty() {
            TokenStream::new()
        } else {
            input.parse::<Token![,]>()?;
            input.parse::<TokenStream>()?
        };
        Ok(Self { name, providers })
    }
}

/// The per-file Oracle: one parsed input plus its symbol tables.
#[derive(Debug)]
pub struct Oracle {
    file: PathBuf,
    stem: String,
    ast: syn::File,
    scope: Scope,
    fns: BTreeMap<String, syn::Signature>,
    assoc_fns: BTreeMap<(String, String), syn::Signature>,
    trait_impls: BTreeSet<(String, String)>,
    consts: BTreeMap<String, TypeRef>,
    sets: BTreeMap<String, TokenStream>,
}

impl Oracle {
    pub fn load(path: &Path) -> Result<Self, GenerateError> {
        let source = fs::read_to_string(path).map_err(|source| GenerateError::Io {
            file: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &source)
    }

    /// Parses already-read source; split out so tests can feed strings.
    pub fn parse(path: &Path, source: &str) -> Result<Self, GenerateError> {
        let ast = syn::parse_file(source).map_err(|err| {
            let start = err.span().start();
            GenerateError::Parse {
                file: path.to_path_buf(),
                message: format!("{err} (line {}, column {})", start.line, start.column + 1),
            }
        })?;

        let mut oracle = Self {
            file: path.to_path_buf(),
            stem: module_stem(path),
            ast,
            scope: Scope::default(),
            fns: BTreeMap::new(),
            assoc_fns: BTreeMap::new(),
            trait_impls: BTreeSet::new(),
            consts: BTreeMap::new(),
            sets: BTreeMap::new(),
        };
        oracle.index();
        Ok(oracle)
    }

    fn index(&mut self) {
        // First pass: names and imports, so the second pass can resolve.
        for item in &self.ast.items {
            match item {
                syn::Item::Use(item) => collect_use(&item.tree, &mut Vec::new(), &mut self.scope),
                syn::Item::Fn(item) => {
                    self.scope.locals.insert(item.sig.ident.to_string());
                }
                syn::Item::Struct(item) => {
                    self.scope.locals.insert(item.ident.to_string());
                }
                syn::Item::Enum(item) => {
                    self.scope.locals.insert(item.ident.to_string());
                }
                syn::Item::Trait(item) => {
                    self.scope.locals.insert(item.ident.to_string());
                }
                syn::Item::Type(item) => {
                    self.scope.locals.insert(item.ident.to_string());
                }
                syn::Item::Const(item) => {
                    self.scope.locals.insert(item.ident.to_string());
                }
                syn::Item::Static(item) => {
                    self.scope.locals.insert(item.ident.to_string());
                }
                syn::Item::Mod(item) => {
                    self.scope.locals.insert(item.ident.to_string());
                }
                _ => {}
            }
        }

        // Second pass: signatures, impl relations, consts, sets.
        let items: Vec<syn::Item> = self.ast.items.clone();
        for item in &items {
            match item {
                syn::Item::Fn(item) => {
                    self.fns
                        .insert(item.sig.ident.to_string(), item.sig.clone());
                }
                syn::Item::Impl(item) => {
                    let self_ty = self.scope.resolve_type(&item.self_ty);
                    if let Some((_, trait_path, _)) = &item.trait_ {
                        let trait_ref = crate::ir::render_path(&self.scope.resolve_path(trait_path));
                        self.trait_impls.insert((trait_ref, self_ty.canon.clone()));
                    } else {
                        for impl_item in &item.items {
                            if let syn::ImplItem::Fn(method) = impl_item {
                                self.assoc_fns.insert(
                                    (self_ty.canon.clone(), method.sig.ident.to_string()),
                                    method.sig.clone(),
                                );
                            }
                        }
                    }
                }
                syn::Item::Const(item) => {
                    let ty = self.scope.resolve_type(&item.ty);
                    self.consts.insert(item.ident.to_string(), ty);
                }
                syn::Item::Static(item) => {
                    let ty = self.scope.resolve_type(&item.ty);
                    self.consts.insert(item.ident.to_string(), ty);
                }
                syn::Item::Macro(item) => {
                    if self.scope.is_kessoku_symbol(&item.mac.path, "set") {
                        match syn::parse2::<SetDecl>(item.mac.tokens.clone()) {
                            Ok(decl) => {
                                self.scope.locals.insert(decl.name.to_string());
                                self.sets.insert(decl.name.to_string(), decl.providers);
                            }
                            Err(err) => {
                                tracing::warn!(
                                    file = %self.file.display(),
                                    "ignoring malformed set! declaration: {err}"
                                );
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// The input file's module name, used for `use super::<stem>::{..}` in
    /// the generated sibling.
    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn ast(&self) -> &syn::File {
        &self.ast
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Every identifier visible at the top level of the input file, for
    /// seeding the NameBook.
    pub fn top_level_names(&self) -> impl Iterator<Item = &str> {
        self.scope
            .locals
            .iter()
            .map(String::as_str)
            .chain(self.scope.uses.keys().map(String::as_str))
    }

    pub fn is_inject_macro(&self, path: &syn::Path) -> bool {
        self.scope.is_kessoku_symbol(path, "inject")
    }

    /// Follows a set-valued identifier back to its `set!` declaration.
    pub fn declaration_of(&self, name: &str) -> Option<&TokenStream> {
        self.sets.get(name)
    }

    /// Looks up and normalizes the signature of a provider function. The
    /// function must be declared in this file (a free fn or an associated fn
    /// of a local type); everything else is outside the Oracle's horizon.
    pub fn signature(&self, path: &syn::Path) -> Result<FnSig, String> {
        let resolved = self.scope.resolve_path(path);
        let segments: Vec<String> = resolved
            .segments
            .iter()
            .map(|s| s.ident.to_string())
            .collect();
        let sig = match segments.as_slice() {
            [first, name] if first == "self" => self.fns.get(name),
            [first, ty, name] if first == "self" => {
                self.assoc_fns.get(&(format!("self::{ty}"), name.clone()))
            }
            _ => None,
        };
        let Some(sig) = sig else {
            return Err(format!(
                "cannot resolve the signature of `{}`: provider functions must be declared in the file being generated",
                crate::ir::render_path(path)
            ));
        };
        self.normalize_signature(sig)
    }

    fn normalize_signature(&self, sig: &syn::Signature) -> Result<FnSig, String> {
        let mut inputs = Vec::new();
        for input in &sig.inputs {
            match input {
                syn::FnArg::Receiver(_) => {
                    return Err(format!(
                        "provider `{}` takes `self`; providers must be plain functions",
                        sig.ident
                    ));
                }
                syn::FnArg::Typed(arg) => inputs.push(self.scope.resolve_type(&arg.ty)),
            }
        }

        let output = match &sig.output {
            syn::ReturnType::Default => {
                return Err(format!("provider `{}` returns no value", sig.ident));
            }
            syn::ReturnType::Type(_, ty) => ty.as_ref().clone(),
        };

        let (payload, returns_error) = match unwrap_result(&output) {
            Some(inner) => (inner.clone(), true),
            None => (output, false),
        };

        let outputs: Vec<TypeRef> = match &payload {
            syn::Type::Tuple(tuple) if tuple.elems.is_empty() => Vec::new(),
            syn::Type::Tuple(tuple) => tuple
                .elems
                .iter()
                .map(|elem| self.scope.resolve_type(elem))
                .collect(),
            other => vec![self.scope.resolve_type(other)],
        };
        if outputs.is_empty() {
            return Err(format!("provider `{}` returns no value", sig.ident));
        }

        Ok(FnSig {
            inputs,
            outputs,
            returns_error,
            is_async: sig.asyncness.is_some(),
        })
    }

    /// Whether a concrete type has a local `impl Trait for Concrete`.
    pub fn implements(&self, concrete: &TypeRef, trait_canon: &str) -> bool {
        self.trait_impls
            .contains(&(trait_canon.to_string(), concrete.canon.clone()))
    }

    /// The type of a `value(..)` expression, when it is syntactically
    /// evident.
    pub fn value_type_of(&self, expr: &syn::Expr) -> Option<TypeRef> {
        match expr {
            syn::Expr::Struct(lit) => {
                let ty = syn::Type::Path(syn::TypePath {
                    qself: None,
                    path: lit.path.clone(),
                });
                Some(self.scope.resolve_type(&ty))
            }
            syn::Expr::Lit(lit) => {
                let ty: syn::Type = match &lit.lit {
                    syn::Lit::Str(_) => syn::parse_quote!(&str),
                    syn::Lit::Char(_) => syn::parse_quote!(char),
                    syn::Lit::Bool(_) => syn::parse_quote!(bool),
                    syn::Lit::Int(value) => match value.suffix() {
                        "" => syn::parse_quote!(i32),
                        suffix => syn::parse_str(suffix).ok()?,
                    },
                    syn::Lit::Float(value) => match value.suffix() {
                        "" => syn::parse_quote!(f64),
                        suffix => syn::parse_str(suffix).ok()?,
                    },
                    _ => return None,
                };
                Some(self.scope.resolve_type(&ty))
            }
            syn::Expr::Path(path) => {
                let ident = path.path.get_ident()?;
                self.consts.get(&ident.to_string()).cloned()
            }
            syn::Expr::Call(call) => {
                let syn::Expr::Path(func) = call.func.as_ref() else {
                    return None;
                };
                let sig = self.signature(&func.path).ok()?;
                if sig.outputs.len() == 1 && !sig.returns_error {
                    Some(sig.outputs[0].clone())
                } else {
                    None
                }
            }
            syn::Expr::Reference(reference) => {
                let inner = self.value_type_of(&reference.expr)?;
                let elem = inner.ty;
                Some(TypeRef::new(syn::parse_quote!(&#elem)))
            }
            _ => None,
        }
    }
}

/// `Result<T, E>` → `Some(T)`, anything else → `None`.
fn unwrap_result(ty: &syn::Type) -> Option<&syn::Type> {
    let syn::Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident != "Result" {
        return None;
    }
    crate::ir::single_type_argument(segment).or_else(|| {
        if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
            args.args.iter().find_map(|arg| match arg {
                syn::GenericArgument::Type(ty) => Some(ty),
                _ => None,
            })
        } else {
            None
        }
    })
}

fn collect_use(tree: &syn::UseTree, prefix: &mut Vec<syn::Ident>, scope: &mut Scope) {
    match tree {
        syn::UseTree::Path(path) => {
            prefix.push(path.ident.clone());
            collect_use(&path.tree, prefix, scope);
            prefix.pop();
        }
        syn::UseTree::Name(name) => {
            let mut segments = prefix.clone();
            segments.push(name.ident.clone());
            scope
                .uses
                .insert(name.ident.to_string(), path_from(&segments));
        }
        syn::UseTree::Rename(rename) => {
            let mut segments = prefix.clone();
            segments.push(rename.ident.clone());
            scope
                .uses
                .insert(rename.rename.to_string(), path_from(&segments));
        }
        syn::UseTree::Glob(_) => {
            if prefix.first().map(|ident| ident == "kessoku").unwrap_or(false) {
                scope.glob_kessoku = true;
            } else {
                tracing::debug!("glob imports other than `kessoku::*` are not resolved");
            }
        }
        syn::UseTree::Group(group) => {
            for tree in &group.items {
                collect_use(tree, prefix, scope);
            }
        }
    }
}

fn path_from(segments: &[syn::Ident]) -> syn::Path {
    let mut path = syn::Path {
        leading_colon: None,
        segments: syn::punctuated::Punctuated::new(),
    };
    for ident in segments {
        path.segments.push(syn::PathSegment::from(ident.clone()));
    }
    path
}

fn module_stem(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "generated".to_string());
    let mut out: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(true) {
        out.insert(0, '_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oracle(source: &str) -> Oracle {
        Oracle::parse(Path::new("app.rs"), source).unwrap()
    }

    #[test]
    fn local_items_resolve_to_self() {
        let oracle = oracle("pub struct Config;\nfn make(cfg: Config) -> Config { cfg }\n");
        let ty: syn::Type = syn::parse_str("Config").unwrap();
        assert_eq!(oracle.scope().resolve_type(&ty).canon, "self::Config");
    }

    #[test]
    fn imports_resolve_fully_qualified() {
        let oracle = oracle("use myapp::config::Config;\nuse myapp::db as database;\n");
        let ty: syn::Type = syn::parse_str("Config").unwrap();
        assert_eq!(oracle.scope().resolve_type(&ty).canon, "myapp::config::Config");
        let path: syn::Path = syn::parse_str("database::open").unwrap();
        assert_eq!(
            crate::ir::render_path(&oracle.scope().resolve_path(&path)),
            "myapp::db::open"
        );
    }

    #[test]
    fn signature_of_free_fn() {
        let oracle = oracle(
            "pub struct Db;\npub struct App;\n\
             fn new_app(db: Db) -> Result<App, std::io::Error> { unimplemented!() }\n",
        );
        let path: syn::Path = syn::parse_str("new_app").unwrap();
        let sig = oracle.signature(&path).unwrap();
        assert_eq!(sig.inputs.len(), 1);
        assert_eq!(sig.inputs[0].canon, "self::Db");
        assert_eq!(sig.outputs[0].canon, "self::App");
        assert!(sig.returns_error);
        assert!(!sig.is_async);
    }

    #[test]
    fn signature_of_associated_fn() {
        let oracle = oracle(
            "pub struct Config;\nimpl Config {\n    pub fn load() -> Config { Config }\n}\n",
        );
        let path: syn::Path = syn::parse_str("Config::load").unwrap();
        let sig = oracle.signature(&path).unwrap();
        assert!(sig.inputs.is_empty());
        assert_eq!(sig.outputs[0].canon, "self::Config");
    }

    #[test]
    fn signature_flattens_tuple_returns() {
        let oracle = oracle("pub struct A;\npub struct B;\nfn pair() -> (A, B) { (A, B) }\n");
        let path: syn::Path = syn::parse_str("pair").unwrap();
        let sig = oracle.signature(&path).unwrap();
        assert_eq!(sig.outputs.len(), 2);
        assert!(!sig.returns_error);
    }

    #[test]
    fn signature_rejects_foreign_fns() {
        let oracle = oracle("use myapp::db::open;\n");
        let path: syn::Path = syn::parse_str("open").unwrap();
        assert!(oracle.signature(&path).is_err());
    }

    #[test]
    fn async_fn_is_detected() {
        let oracle = oracle("pub struct Db;\nasync fn new_db() -> Db { Db }\n");
        let path: syn::Path = syn::parse_str("new_db").unwrap();
        assert!(oracle.signature(&path).unwrap().is_async);
    }

    #[test]
    fn implements_scans_local_impls() {
        let oracle = oracle(
            "pub trait Repo {}\npub struct PgRepo;\nimpl Repo for PgRepo {}\n",
        );
        let concrete = oracle
            .scope()
            .resolve_type(&syn::parse_str("PgRepo").unwrap());
        assert!(oracle.implements(&concrete, "self::Repo"));
        assert!(!oracle.implements(&concrete, "self::Other"));
    }

    #[test]
    fn set_declarations_are_indexed() {
        let oracle = oracle(
            "use kessoku::set;\nfn new_db() -> u8 { 0 }\nset!(DB_SET, provide(new_db));\n",
        );
        assert!(oracle.declaration_of("DB_SET").is_some());
        assert!(oracle.declaration_of("OTHER").is_none());
    }

    #[test]
    fn value_types_from_literals() {
        let oracle = oracle("pub struct Config { pub n: u32 }\n");
        let expr: syn::Expr = syn::parse_str("Config { n: 3 }").unwrap();
        assert_eq!(oracle.value_type_of(&expr).unwrap().canon, "self::Config");
        let expr: syn::Expr = syn::parse_str("42").unwrap();
        assert_eq!(oracle.value_type_of(&expr).unwrap().canon, "i32");
        let expr: syn::Expr = syn::parse_str("42u16").unwrap();
        assert_eq!(oracle.value_type_of(&expr).unwrap().canon, "u16");
        let expr: syn::Expr = syn::parse_str("\"hello\"").unwrap();
        assert_eq!(oracle.value_type_of(&expr).unwrap().canon, "&str");
        let expr: syn::Expr = syn::parse_str("some_unknown_call()").unwrap();
        assert!(oracle.value_type_of(&expr).is_none());
    }

    #[test]
    fn parse_error_carries_location() {
        let err = Oracle::parse(Path::new("bad.rs"), "fn broken( {").unwrap_err();
        assert!(matches!(err, GenerateError::Parse { .. }));
        assert!(err.to_string().contains("bad.rs"));
    }
}
