//! Identifier allocation for generated code.
//!
//! A [`NameBook`] hands out identifiers guaranteed not to collide with Rust
//! keywords, primitive type names, the input file's top-level names, or any
//! name already handed out in the same generation.

use std::collections::BTreeSet;

use crate::ir::{self, TypeRef};

const KEYWORDS: &[&str] = &[
    "as", "break", "const", "continue", "crate", "dyn", "else", "enum", "extern", "false", "fn",
    "for", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub", "ref",
    "return", "self", "Self", "static", "struct", "super", "trait", "true", "type", "unsafe",
    "use", "where", "while", "async", "await", "abstract", "become", "box", "do", "final",
    "macro", "override", "priv", "try", "typeof", "union", "unsized", "virtual", "yield",
];

const PRIMITIVES: &[&str] = &[
    "bool", "char", "str", "i8", "i16", "i32", "i64", "i128", "isize", "u8", "u16", "u32", "u64",
    "u128", "usize", "f32", "f64",
];

/// Set of identifiers already taken in the scope being generated into.
#[derive(Debug, Clone)]
pub struct NameBook {
    taken: BTreeSet<String>,
}

impl NameBook {
    /// A book seeded with Rust keywords and primitive type names only.
    pub fn new() -> Self {
        let mut taken = BTreeSet::new();
        for name in KEYWORDS.iter().chain(PRIMITIVES) {
            taken.insert((*name).to_string());
        }
        Self { taken }
    }

    /// Marks a name as taken without handing it out.
    pub fn observe(&mut self, name: &str) {
        self.taken.insert(name.to_string());
    }

    pub fn is_taken(&self, name: &str) -> bool {
        self.taken.contains(name)
    }

    /// Returns `base` if free, else `base0`, `base1`, ... The returned name
    /// is recorded as taken.
    pub fn acquire(&mut self, base: &str) -> String {
        if !self.taken.contains(base) {
            self.taken.insert(base.to_string());
            return base.to_string();
        }
        let mut n = 0usize;
        loop {
            let candidate = format!("{base}{n}");
            if !self.taken.contains(&candidate) {
                self.taken.insert(candidate.clone());
                return candidate;
            }
            n += 1;
        }
    }
}

impl Default for NameBook {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `name` can be used verbatim as the name of a generated function.
pub fn is_valid_ident(name: &str) -> bool {
    if name.is_empty() || KEYWORDS.contains(&name) {
        return false;
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap();
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Derives the base variable name for a value of the given type.
///
/// `CancellationToken` is the context type and always names `ctx`; smart
/// pointers and references recurse into their pointee; primitives map to
/// family names; named types use the snake_case of their short name.
pub fn base_name(ty: &TypeRef) -> String {
    if ty.is_context() {
        return "ctx".to_string();
    }
    base_name_of(&ty.ty)
}

fn base_name_of(ty: &syn::Type) -> String {
    match ty {
        syn::Type::Reference(inner) => base_name_of(&inner.elem),
        syn::Type::Paren(inner) => base_name_of(&inner.elem),
        syn::Type::Group(inner) => base_name_of(&inner.elem),
        syn::Type::Ptr(_) => "ptr".to_string(),
        syn::Type::TraitObject(obj) => obj
            .bounds
            .iter()
            .find_map(|bound| match bound {
                syn::TypeParamBound::Trait(t) => t.path.segments.last().map(|s| &s.ident),
                _ => None,
            })
            .map(|ident| snake_case(&ident.to_string()))
            .unwrap_or_else(|| "val".to_string()),
        syn::Type::Path(path) => {
            let Some(segment) = path.path.segments.last() else {
                return "val".to_string();
            };
            let ident = segment.ident.to_string();
            match ident.as_str() {
                "Box" | "Arc" | "Rc" => {
                    if let Some(inner) = ir::single_type_argument(segment) {
                        return base_name_of(inner);
                    }
                    snake_case(&ident)
                }
                "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16" | "u32" | "u64"
                | "u128" | "usize" | "f32" | "f64" => "num".to_string(),
                "bool" => "flag".to_string(),
                "String" | "str" | "char" => "s".to_string(),
                _ => snake_case(&ident),
            }
        }
        _ => "val".to_string(),
    }
}

/// `PascalCase` / `camelCase` to `snake_case`, keeping acronym runs
/// together (`PgRepo` → `pg_repo`, `DB` → `db`, `HTTPServer` → `http_server`).
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::new();
    for (i, c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev_lower = i > 0 && chars[i - 1].is_lowercase();
            let next_lower = i + 1 < chars.len() && chars[i + 1].is_lowercase();
            if i > 0 && chars[i - 1] != '_' && (prev_lower || next_lower) {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(*c);
        }
    }
    out
}
