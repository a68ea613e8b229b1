//! Source emission: renders each planned injector as an ordinary function
//! in a `<stem>_band.rs` companion file.
//!
//! The emitter is transactional: it renders into an in-memory buffer and
//! the caller writes the file only when the whole input succeeded. Output
//! is deterministic down to the byte: imports are sorted, names come from
//! the NameBook, and no map with nondeterministic iteration order is
//! consulted anywhere on the way.

use std::collections::{BTreeMap, BTreeSet};

use crate::graph::{InjectorGraph, NodeId, ValueSource};
use crate::ir::Callee;
use crate::names::NameBook;
use crate::oracle::Oracle;
use crate::plan::{ChainRole, Plan};

/// One injector ready for rendering.
pub struct Unit {
    pub graph: InjectorGraph,
    pub plan: Plan,
}

/// Renders the complete companion file for one input.
pub fn emit_file(oracle: &Oracle, units: &[Unit], book: &mut NameBook) -> String {
    let mut imports = Imports::new(oracle.stem().to_string(), book);
    let bodies: Vec<String> = units
        .iter()
        .map(|unit| emit_injector(&mut imports, &unit.graph, &unit.plan))
        .collect();

    let mut out = String::new();
    out.push_str("// Code generated by kessoku. DO NOT EDIT.\n");
    out.push('\n');
    let lines = imports.use_lines();
    if !lines.is_empty() {
        for line in &lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
    }
    for (i, body) in bodies.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(body);
    }
    out
}

// ---------------------------------------------------------------------------
// Imports
// ---------------------------------------------------------------------------

/// Tracks every symbol the generated file references and the aliases chosen
/// for them. File-local symbols are imported from the sibling module
/// (`use super::<stem>::{..}`); external symbols are imported by full path,
/// aliased through the NameBook when their natural name is taken.
struct Imports<'a> {
    stem: String,
    book: &'a mut NameBook,
    locals: BTreeSet<String>,
    external: BTreeMap<String, String>,
}

impl<'a> Imports<'a> {
    fn new(stem: String, book: &'a mut NameBook) -> Self {
        Self {
            stem,
            book,
            locals: BTreeSet::new(),
            external: BTreeMap::new(),
        }
    }

    /// Display form of a resolved path (generic arguments excluded),
    /// registering whatever import it needs.
    fn display_path(&mut self, path: &syn::Path) -> String {
        let segments: Vec<String> = path
            .segments
            .iter()
            .map(|segment| segment.ident.to_string())
            .collect();
        match segments.as_slice() {
            [] => String::new(),
            [first, rest @ ..] if first == "self" && !rest.is_empty() => {
                self.locals.insert(rest[0].clone());
                rest.join("::")
            }
            [only] => only.clone(),
            _ => {
                let key = segments.join("::");
                if let Some(alias) = self.external.get(&key) {
                    return alias.clone();
                }
                let alias = self.book.acquire(segments.last().unwrap());
                self.external.insert(key, alias.clone());
                alias
            }
        }
    }

    fn render_type(&mut self, ty: &syn::Type) -> String {
        match ty {
            syn::Type::Path(path) => {
                let base = self.display_path(&path.path);
                let args = path
                    .path
                    .segments
                    .last()
                    .map(|segment| self.render_generic_args(&segment.arguments))
                    .unwrap_or_default();
                format!("{base}{args}")
            }
            syn::Type::Reference(inner) => {
                let mutability = if inner.mutability.is_some() { "mut " } else { "" };
                format!("&{}{}", mutability, self.render_type(&inner.elem))
            }
            syn::Type::TraitObject(obj) => {
                let bounds: Vec<String> = obj
                    .bounds
                    .iter()
                    .filter_map(|bound| match bound {
                        syn::TypeParamBound::Trait(t) => {
                            let base = self.display_path(&t.path);
                            let args = t
                                .path
                                .segments
                                .last()
                                .map(|segment| self.render_generic_args(&segment.arguments))
                                .unwrap_or_default();
                            Some(format!("{base}{args}"))
                        }
                        _ => None,
                    })
                    .collect();
                format!("dyn {}", bounds.join(" + "))
            }
            syn::Type::Tuple(tuple) => {
                let elems: Vec<String> =
                    tuple.elems.iter().map(|elem| self.render_type(elem)).collect();
                if elems.len() == 1 {
                    format!("({},)", elems[0])
                } else {
                    format!("({})", elems.join(", "))
                }
            }
            syn::Type::Slice(slice) => format!("[{}]", self.render_type(&slice.elem)),
            syn::Type::Array(array) => {
                let len = &array.len;
                format!(
                    "[{}; {}]",
                    self.render_type(&array.elem),
                    quote::quote!(#len)
                )
            }
            syn::Type::Ptr(ptr) => {
                let qualifier = if ptr.mutability.is_some() { "mut" } else { "const" };
                format!("*{} {}", qualifier, self.render_type(&ptr.elem))
            }
            syn::Type::Paren(inner) => self.render_type(&inner.elem),
            syn::Type::Group(inner) => self.render_type(&inner.elem),
            other => crate::ir::render_canonical(other),
        }
    }

    fn render_generic_args(&mut self, arguments: &syn::PathArguments) -> String {
        let syn::PathArguments::AngleBracketed(args) = arguments else {
            return String::new();
        };
        let rendered: Vec<String> = args
            .args
            .iter()
            .filter_map(|arg| match arg {
                syn::GenericArgument::Type(ty) => Some(self.render_type(ty)),
                syn::GenericArgument::Const(expr) => Some(quote::quote!(#expr).to_string()),
                _ => None,
            })
            .collect();
        if rendered.is_empty() {
            String::new()
        } else {
            format!("<{}>", rendered.join(", "))
        }
    }

    /// Renders a value-provider expression, rewriting every path through the
    /// import table. Covers the expression shapes a `value(..)` reasonably
    /// contains; anything more exotic falls back to token text.
    fn render_expr(&mut self, expr: &syn::Expr) -> String {
        match expr {
            syn::Expr::Lit(lit) => quote::quote!(#lit).to_string(),
            syn::Expr::Path(path) => {
                let base = self.display_path(&path.path);
                let args = path
                    .path
                    .segments
                    .last()
                    .map(|segment| match &segment.arguments {
                        syn::PathArguments::AngleBracketed(_) => {
                            let rendered = self.render_generic_args(&segment.arguments);
                            if rendered.is_empty() {
                                rendered
                            } else {
                                format!("::{rendered}")
                            }
                        }
                        _ => String::new(),
                    })
                    .unwrap_or_default();
                format!("{base}{args}")
            }
            syn::Expr::Struct(lit) => {
                let base = self.display_path(&lit.path);
                let fields: Vec<String> = lit
                    .fields
                    .iter()
                    .map(|field| {
                        let name = member(&field.member);
                        if field.colon_token.is_none() {
                            name
                        } else {
                            format!("{}: {}", name, self.render_expr(&field.expr))
                        }
                    })
                    .collect();
                if fields.is_empty() {
                    format!("{base} {{}}")
                } else {
                    format!("{base} {{ {} }}", fields.join(", "))
                }
            }
            syn::Expr::Call(call) => {
                let args: Vec<String> =
                    call.args.iter().map(|arg| self.render_expr(arg)).collect();
                format!("{}({})", self.render_expr(&call.func), args.join(", "))
            }
            syn::Expr::MethodCall(call) => {
                let args: Vec<String> =
                    call.args.iter().map(|arg| self.render_expr(arg)).collect();
                format!(
                    "{}.{}({})",
                    self.render_expr(&call.receiver),
                    call.method,
                    args.join(", ")
                )
            }
            syn::Expr::Reference(reference) => {
                let mutability = if reference.mutability.is_some() { "mut " } else { "" };
                format!("&{}{}", mutability, self.render_expr(&reference.expr))
            }
            syn::Expr::Tuple(tuple) => {
                let elems: Vec<String> =
                    tuple.elems.iter().map(|elem| self.render_expr(elem)).collect();
                if elems.len() == 1 {
                    format!("({},)", elems[0])
                } else {
                    format!("({})", elems.join(", "))
                }
            }
            syn::Expr::Array(array) => {
                let elems: Vec<String> =
                    array.elems.iter().map(|elem| self.render_expr(elem)).collect();
                format!("[{}]", elems.join(", "))
            }
            syn::Expr::Binary(binary) => {
                let op = &binary.op;
                format!(
                    "{} {} {}",
                    self.render_expr(&binary.left),
                    quote::quote!(#op),
                    self.render_expr(&binary.right)
                )
            }
            syn::Expr::Unary(unary) => {
                let op = &unary.op;
                format!("{}{}", quote::quote!(#op), self.render_expr(&unary.expr))
            }
            syn::Expr::Field(field) => {
                format!("{}.{}", self.render_expr(&field.base), member(&field.member))
            }
            syn::Expr::Paren(paren) => format!("({})", self.render_expr(&paren.expr)),
            syn::Expr::Cast(cast) => {
                format!("{} as {}", self.render_expr(&cast.expr), self.render_type(&cast.ty))
            }
            syn::Expr::Index(index) => {
                format!(
                    "{}[{}]",
                    self.render_expr(&index.expr),
                    self.render_expr(&index.index)
                )
            }
            other => quote::quote!(#other).to_string(),
        }
    }

    /// The sorted import block.
    fn use_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if !self.locals.is_empty() {
            let names: Vec<String> = self.locals.iter().cloned().collect();
            lines.push(format!(
                "use super::{}::{{{}}};",
                self.stem,
                names.join(", ")
            ));
        }
        for (path, alias) in &self.external {
            let natural = path.rsplit("::").next().unwrap_or(path);
            if alias == natural {
                lines.push(format!("use {path};"));
            } else {
                lines.push(format!("use {path} as {alias};"));
            }
        }
        lines.sort();
        lines
    }
}

fn member(member: &syn::Member) -> String {
    match member {
        syn::Member::Named(ident) => ident.to_string(),
        syn::Member::Unnamed(index) => index.index.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

struct SourceWriter {
    out: String,
    indent: usize,
}

impl SourceWriter {
    fn new() -> Self {
        Self {
            out: String::new(),
            indent: 0,
        }
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn open(&mut self, text: &str) {
        self.line(text);
        self.indent += 1;
    }

    fn close(&mut self, text: &str) {
        self.indent -= 1;
        self.line(text);
    }
}

/// Move/clone accounting for one task scope. Every use but the last of a
/// multiply-consumed value appends `.clone()`.
struct UseScope {
    remaining: BTreeMap<String, usize>,
}

impl UseScope {
    fn new() -> Self {
        Self {
            remaining: BTreeMap::new(),
        }
    }

    fn declare(&mut self, name: &str, total: usize) {
        self.remaining.insert(name.to_string(), total);
    }

    fn use_of(&mut self, name: &str) -> String {
        match self.remaining.get_mut(name) {
            Some(count) if *count > 1 => {
                *count -= 1;
                format!("{name}.clone()")
            }
            Some(count) => {
                *count = count.saturating_sub(1);
                name.to_string()
            }
            None => name.to_string(),
        }
    }
}

/// Scope id 0 is the principal body; auxiliary chain `c` is scope `c + 1`.
fn scope_id(plan: &Plan, chain: usize) -> usize {
    if plan.chains[chain].role == ChainRole::Aux {
        chain + 1
    } else {
        0
    }
}

type UseTotals = BTreeMap<(usize, String), usize>;

/// Counts, per task scope, how many times each local binding is read. The
/// totals feed the clone-on-all-but-last-use rule and must mirror the render
/// pass exactly: call arguments, Arc coercions, channel sends, the final
/// return, and one capture per auxiliary chain per argument.
fn count_uses(graph: &InjectorGraph, plan: &Plan) -> UseTotals {
    let mut totals: UseTotals = BTreeMap::new();
    for (c, chain) in plan.chains.iter().enumerate() {
        let scope = scope_id(plan, c);
        for &node in &chain.nodes {
            for input in &graph.nodes[node].inputs {
                match input {
                    ValueSource::Param(param) => {
                        *totals
                            .entry((scope, graph.params[*param].name.clone()))
                            .or_insert(0) += 1;
                    }
                    ValueSource::Arg(arg) if !graph.args[*arg].is_context => {
                        *totals
                            .entry((scope, graph.args[*arg].name.clone()))
                            .or_insert(0) += 1;
                    }
                    ValueSource::Arg(_) => {}
                }
            }
            for &(slot, _) in &graph.nodes[node].bind_outputs {
                let concrete = graph.nodes[node].outputs[slot];
                *totals
                    .entry((scope, graph.params[concrete].name.clone()))
                    .or_insert(0) += 1;
            }
            for channel in plan.sends_of(node) {
                *totals
                    .entry((scope, graph.params[channel.param].name.clone()))
                    .or_insert(0) += 1;
            }
        }
    }
    if let ValueSource::Param(param) = graph.return_source {
        *totals
            .entry((0, graph.params[param].name.clone()))
            .or_insert(0) += 1;
    }
    // Each auxiliary chain captures every argument it reads exactly once.
    for (c, chain) in plan.chains.iter().enumerate() {
        if chain.role != ChainRole::Aux {
            continue;
        }
        let scope = c + 1;
        for arg in graph.args.iter().filter(|arg| !arg.is_context) {
            if totals.contains_key(&(scope, arg.name.clone())) {
                *totals.entry((0, arg.name.clone())).or_insert(0) += 1;
            }
        }
    }
    totals
}

fn total(totals: &UseTotals, scope: usize, name: &str) -> usize {
    totals
        .get(&(scope, name.to_string()))
        .copied()
        .unwrap_or(0)
}

fn emit_injector(imports: &mut Imports<'_>, graph: &InjectorGraph, plan: &Plan) -> String {
    let totals = count_uses(graph, plan);
    let mut w = SourceWriter::new();

    let params: Vec<String> = graph
        .arg_order
        .iter()
        .map(|&arg| {
            format!(
                "{}: {}",
                graph.args[arg].name,
                imports.render_type(&graph.args[arg].ty.ty)
            )
        })
        .collect();
    let ret = imports.render_type(&graph.directive.return_type.ty);
    let name = &graph.directive.injector_name;
    let head = if plan.has_async {
        format!(
            "pub async fn {name}({}) -> Result<{ret}, ::kessoku::InjectError> {{",
            params.join(", ")
        )
    } else if plan.returns_error {
        format!(
            "pub fn {name}({}) -> Result<{ret}, ::kessoku::InjectError> {{",
            params.join(", ")
        )
    } else {
        format!("pub fn {name}({}) -> {ret} {{", params.join(", "))
    };
    w.open(&head);

    let mut principal = UseScope::new();
    for arg in graph.args.iter().filter(|arg| !arg.is_context) {
        principal.declare(&arg.name, total(&totals, 0, &arg.name));
    }

    let return_name = match graph.return_source {
        ValueSource::Param(param) => graph.params[param].name.clone(),
        ValueSource::Arg(arg) => graph.args[arg].name.clone(),
    };

    if !plan.has_async {
        for &node in &plan.chains[0].nodes {
            emit_call(&mut w, imports, graph, plan, &mut principal, &totals, 0, node);
        }
        let value = principal.use_of(&return_name);
        if plan.returns_error {
            w.line(&format!("Ok({value})"));
        } else {
            w.line(&value);
        }
        w.close("}");
        return w.out;
    }

    let ctx = graph
        .args
        .iter()
        .find(|arg| arg.is_context)
        .map(|arg| arg.name.clone())
        .expect("asynchronous plans always carry a context argument");

    for channel in &plan.channels {
        w.line(&format!(
            "let ({}, {}) = ::kessoku::signal::<{}>();",
            channel.tx,
            channel.rx,
            imports.render_type(&graph.params[channel.param].ty.ty)
        ));
    }

    for (c, chain) in plan.chains.iter().enumerate() {
        if chain.role != ChainRole::InlineRoot {
            continue;
        }
        debug_assert!(plan.waits_of(c).next().is_none());
        for &node in &chain.nodes {
            emit_call(&mut w, imports, graph, plan, &mut principal, &totals, 0, node);
        }
    }

    w.line(&format!("let mut band = ::kessoku::Band::new(&{ctx});"));
    let any_ctx_input = graph.nodes.iter().any(|node| {
        node.inputs.iter().any(|input| {
            matches!(input, ValueSource::Arg(arg) if graph.args[*arg].is_context)
        })
    });
    let any_aux_wait = plan
        .chains
        .iter()
        .enumerate()
        .any(|(c, chain)| chain.role == ChainRole::Aux && plan.waits_of(c).next().is_some());
    if any_ctx_input || any_aux_wait {
        w.line(&format!("let {ctx} = band.context();"));
    }

    for (c, chain) in plan.chains.iter().enumerate() {
        if chain.role != ChainRole::Aux {
            continue;
        }
        emit_spawn(&mut w, imports, graph, plan, &mut principal, &totals, c, &ctx);
    }

    if let Some(pc) = plan.principal_chain() {
        for channel in plan.waits_of(pc) {
            let bound = &graph.params[channel.param].name;
            w.line(&format!("let {bound} = band.recv({}).await?;", channel.rx));
            principal.declare(bound, total(&totals, 0, bound));
        }
        for &node in &plan.chains[pc].nodes {
            emit_call(&mut w, imports, graph, plan, &mut principal, &totals, 0, node);
        }
    }

    if let Some(wait) = plan.return_wait {
        let channel = &plan.channels[wait];
        let bound = &graph.params[channel.param].name;
        w.line(&format!("let {bound} = band.recv({}).await?;", channel.rx));
        principal.declare(bound, total(&totals, 0, bound));
    }

    w.line("band.finish().await?;");
    w.line(&format!("Ok({})", principal.use_of(&return_name)));
    w.close("}");
    w.out
}

#[allow(clippy::too_many_arguments)]
fn emit_spawn(
    w: &mut SourceWriter,
    imports: &mut Imports<'_>,
    graph: &InjectorGraph,
    plan: &Plan,
    principal: &mut UseScope,
    totals: &UseTotals,
    chain: usize,
    ctx: &str,
) {
    let scope = chain + 1;
    let nodes = &plan.chains[chain].nodes;

    let needs_ctx = plan.waits_of(chain).next().is_some()
        || nodes.iter().any(|&node| {
            graph.nodes[node].inputs.iter().any(|input| {
                matches!(input, ValueSource::Arg(arg) if graph.args[*arg].is_context)
            })
        });

    // Arguments read inside the task are captured at spawn time: cloned when
    // the principal scope still needs them, moved otherwise.
    let mut captures: Vec<usize> = Vec::new();
    for &node in nodes {
        for input in &graph.nodes[node].inputs {
            if let ValueSource::Arg(arg) = input {
                if !graph.args[*arg].is_context && !captures.contains(arg) {
                    captures.push(*arg);
                }
            }
        }
    }

    let mut scope_uses = UseScope::new();
    let mut preludes: Vec<String> = Vec::new();
    if needs_ctx {
        preludes.push(format!("let {ctx} = {ctx}.clone();"));
    }
    for &arg in &captures {
        let name = &graph.args[arg].name;
        let captured = principal.use_of(name);
        if captured != *name {
            preludes.push(format!("let {name} = {captured};"));
        }
        scope_uses.declare(name, total(totals, scope, name));
    }

    let wrapped = !preludes.is_empty();
    if wrapped {
        w.open("{");
        for prelude in &preludes {
            w.line(prelude);
        }
    }
    w.open("band.spawn(async move {");
    for channel in plan.waits_of(chain) {
        let bound = &graph.params[channel.param].name;
        w.line(&format!(
            "let {bound} = ::kessoku::recv({}, &{ctx}).await?;",
            channel.rx
        ));
        scope_uses.declare(bound, total(totals, scope, bound));
    }
    for &node in nodes {
        emit_call(w, imports, graph, plan, &mut scope_uses, totals, scope, node);
    }
    w.line("Ok(())");
    w.close("});");
    if wrapped {
        w.close("}");
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_call(
    w: &mut SourceWriter,
    imports: &mut Imports<'_>,
    graph: &InjectorGraph,
    plan: &Plan,
    scope: &mut UseScope,
    totals: &UseTotals,
    scope_idx: usize,
    node: NodeId,
) {
    let spec = graph.spec(node);
    let data = &graph.nodes[node];

    let args: Vec<String> = data
        .inputs
        .iter()
        .map(|input| match input {
            ValueSource::Param(param) => scope.use_of(&graph.params[*param].name),
            ValueSource::Arg(arg) => {
                let arg = &graph.args[*arg];
                if arg.is_context {
                    format!("{}.clone()", arg.name)
                } else {
                    scope.use_of(&arg.name)
                }
            }
        })
        .collect();

    let mut call = match &spec.callee {
        Callee::Function(path) => {
            format!("{}({})", imports.display_path(path), args.join(", "))
        }
        Callee::Value(expr) => imports.render_expr(expr),
    };
    if spec.awaits {
        call.push_str(".await");
    }
    if spec.returns_error {
        call.push_str(&format!(
            ".map_err(|err| ::kessoku::InjectError::provider(\"{}\", err))?",
            spec.label
        ));
    }

    let bound: Vec<String> = data
        .outputs
        .iter()
        .map(|&param| {
            if graph.params[param].uses == 0 {
                "_".to_string()
            } else {
                graph.params[param].name.clone()
            }
        })
        .collect();
    let binding = if bound.len() == 1 {
        bound[0].clone()
    } else {
        format!("({})", bound.join(", "))
    };
    w.line(&format!("let {binding} = {call};"));
    for &param in &data.outputs {
        if graph.params[param].uses > 0 {
            let name = &graph.params[param].name;
            scope.declare(name, total(totals, scope_idx, name));
        }
    }

    for &(slot, iface_param) in &data.bind_outputs {
        let concrete = &graph.params[graph.nodes[node].outputs[slot]];
        let iface = &graph.params[iface_param];
        let arc_base = {
            let syn::Type::Path(path) = &iface.ty.ty else {
                unreachable!("bind interfaces are always Arc paths");
            };
            imports.display_path(&path.path)
        };
        let iface_ty = imports.render_type(&iface.ty.ty);
        let value = scope.use_of(&concrete.name);
        w.line(&format!(
            "let {}: {iface_ty} = {arc_base}::new({value});",
            iface.name
        ));
        scope.declare(&iface.name, total(totals, scope_idx, &iface.name));
    }

    for channel in plan.sends_of(node) {
        w.line(&format!(
            "{}.send({});",
            channel.tx,
            scope.use_of(&graph.params[channel.param].name)
        ));
    }
}
