//! Dependency-graph construction for one build directive.
//!
//! The graph is an arena of provider nodes indexed by integer handles;
//! edges store handles, so the bidirectional producer/consumer relations
//! carry no ownership cycles. Argument nodes are leaves: they become the
//! injector's parameters instead of being scheduled.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{GenerateError, Location};
use crate::ir::{BuildDirective, ProviderSpec, TypeRef};
use crate::names::{base_name, NameBook};

pub type NodeId = usize;
pub type ParamId = usize;

/// Where a provider input comes from: another provider's output slot, or an
/// injector argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Param(ParamId),
    Arg(usize),
}

/// An injector argument, user-visible in the generated signature.
#[derive(Debug)]
pub struct Argument {
    pub name: String,
    pub ty: TypeRef,
    pub is_context: bool,
    pub uses: usize,
}

/// A local variable bound to one provider output slot.
#[derive(Debug)]
pub struct InjectorParam {
    pub name: String,
    pub ty: TypeRef,
    pub owner: NodeId,
    /// Reference count over consumers, coercions and the final return. A
    /// slot whose count stays zero is bound to `_`.
    pub uses: usize,
}

#[derive(Debug)]
pub struct ProviderNode {
    /// Index into the directive's provider list.
    pub provider: usize,
    /// One source per required type, in declared order.
    pub inputs: Vec<ValueSource>,
    /// One param per provided slot, in declared order.
    pub outputs: Vec<ParamId>,
    /// Interface params materialized from `bind`: `(output slot, param)`.
    pub bind_outputs: Vec<(usize, ParamId)>,
}

/// The normalized result of graph construction, consumed read-only by the
/// planner and emitter.
#[derive(Debug)]
pub struct InjectorGraph {
    pub directive: BuildDirective,
    pub args: Vec<Argument>,
    /// Signature order: context arguments first, the rest sorted by
    /// canonical type string.
    pub arg_order: Vec<usize>,
    pub nodes: Vec<ProviderNode>,
    pub params: Vec<InjectorParam>,
    /// Kahn order over provider nodes with the deterministic tiebreaker.
    pub order: Vec<NodeId>,
    pub return_source: ValueSource,
    pub returns_error: bool,
    pub has_async: bool,
    /// Distinct consumer nodes per node.
    pub consumers: Vec<BTreeSet<NodeId>>,
    /// Distinct producer nodes per node.
    pub producers: Vec<BTreeSet<NodeId>>,
}

impl InjectorGraph {
    pub fn spec(&self, node: NodeId) -> &ProviderSpec {
        &self.directive.providers[self.nodes[node].provider]
    }

    pub fn node_is_async(&self, node: NodeId) -> bool {
        self.spec(node).is_async
    }
}

#[derive(Clone)]
struct ProvidedSlot {
    provider: usize,
    slot: usize,
    iface: Option<TypeRef>,
}

struct Builder<'a> {
    directive: &'a BuildDirective,
    book: &'a mut NameBook,
    nodes: Vec<ProviderNode>,
    params: Vec<InjectorParam>,
    args: Vec<Argument>,
    arg_of: BTreeMap<String, usize>,
    node_of: BTreeMap<usize, NodeId>,
    queue: VecDeque<NodeId>,
}

impl Builder<'_> {
    fn ensure_node(&mut self, provider: usize) -> NodeId {
        if let Some(&node) = self.node_of.get(&provider) {
            return node;
        }
        let node = self.nodes.len();
        let spec = &self.directive.providers[provider];
        let outputs: Vec<ParamId> = spec
            .provides
            .iter()
            .map(|ty| {
                let param = self.params.len();
                self.params.push(InjectorParam {
                    name: self.book.acquire(&base_name(ty)),
                    ty: ty.clone(),
                    owner: node,
                    uses: 0,
                });
                param
            })
            .collect();
        self.nodes.push(ProviderNode {
            provider,
            inputs: Vec::new(),
            outputs,
            bind_outputs: Vec::new(),
        });
        self.node_of.insert(provider, node);
        self.queue.push_back(node);
        node
    }

    /// The param satisfying one indexed type: the concrete output slot, or a
    /// lazily materialized interface coercion param.
    fn param_for(&mut self, entry: &ProvidedSlot) -> ParamId {
        let node = self.ensure_node(entry.provider);
        let Some(iface) = &entry.iface else {
            return self.nodes[node].outputs[entry.slot];
        };
        if let Some(&(_, param)) = self.nodes[node]
            .bind_outputs
            .iter()
            .find(|(slot, param)| *slot == entry.slot && self.params[*param].ty.canon == iface.canon)
        {
            return param;
        }
        let param = self.params.len();
        self.params.push(InjectorParam {
            name: self.book.acquire(&base_name(iface)),
            ty: iface.clone(),
            owner: node,
            uses: 0,
        });
        self.nodes[node].bind_outputs.push((entry.slot, param));
        // The coercion consumes the concrete value.
        let concrete = self.nodes[node].outputs[entry.slot];
        self.params[concrete].uses += 1;
        param
    }

    fn argument_for(&mut self, ty: &TypeRef) -> usize {
        if let Some(&arg) = self.arg_of.get(&ty.canon) {
            self.args[arg].uses += 1;
            return arg;
        }
        let arg = self.args.len();
        self.args.push(Argument {
            name: self.book.acquire(&base_name(ty)),
            ty: ty.clone(),
            is_context: ty.is_context(),
            uses: 1,
        });
        self.arg_of.insert(ty.canon.clone(), arg);
        arg
    }
}

/// Builds the typed DAG for one directive.
pub fn build(
    directive: BuildDirective,
    file: &std::path::Path,
    book: &mut NameBook,
) -> Result<InjectorGraph, GenerateError> {
    let location = || Location::new(file, directive.span);

    // Index providers by provided type; a canonical type provided twice is
    // fatal, interface types included.
    let mut index: BTreeMap<String, ProvidedSlot> = BTreeMap::new();
    for (provider, spec) in directive.providers.iter().enumerate() {
        for (slot, ty) in spec.provides.iter().enumerate() {
            let entry = ProvidedSlot {
                provider,
                slot,
                iface: None,
            };
            if index.insert(ty.canon.clone(), entry).is_some() {
                return Err(GenerateError::Conflict {
                    location: location(),
                    ty: ty.canon.clone(),
                });
            }
        }
        for (slot, iface) in &spec.binds {
            let entry = ProvidedSlot {
                provider,
                slot: *slot,
                iface: Some(iface.clone()),
            };
            if index.insert(iface.canon.clone(), entry).is_some() {
                return Err(GenerateError::Conflict {
                    location: location(),
                    ty: iface.canon.clone(),
                });
            }
        }
    }

    let mut builder = Builder {
        directive: &directive,
        book: &mut *book,
        nodes: Vec::new(),
        params: Vec::new(),
        args: Vec::new(),
        arg_of: BTreeMap::new(),
        node_of: BTreeMap::new(),
        queue: VecDeque::new(),
    };

    // Seed with the return type.
    let Some(root) = index.get(&directive.return_type.canon).cloned() else {
        return Err(GenerateError::Unreachable {
            location: location(),
            ty: directive.return_type.canon.clone(),
        });
    };
    let return_param = builder.param_for(&root);
    builder.params[return_param].uses += 1;

    // Backward expansion: satisfy every requirement of every reached node.
    while let Some(node) = builder.queue.pop_front() {
        let provider = builder.nodes[node].provider;
        let requires = directive.providers[provider].requires.clone();
        let mut inputs = Vec::with_capacity(requires.len());
        for required in &requires {
            let source = match index.get(&required.canon).cloned() {
                Some(entry) => {
                    let param = builder.param_for(&entry);
                    builder.params[param].uses += 1;
                    ValueSource::Param(param)
                }
                None => ValueSource::Arg(builder.argument_for(required)),
            };
            inputs.push(source);
        }
        builder.nodes[node].inputs = inputs;
    }

    let Builder {
        mut args,
        nodes,
        params,
        node_of,
        ..
    } = builder;

    for (provider, spec) in directive.providers.iter().enumerate() {
        if !node_of.contains_key(&provider) {
            tracing::warn!(
                provider = %spec.label,
                injector = %directive.injector_name,
                "provider is not reachable from the return type and will not be called"
            );
        }
    }

    let has_async = nodes
        .iter()
        .any(|node| directive.providers[node.provider].is_async);

    // Asynchronous plans always carry a context argument, explicit or not.
    if has_async && !args.iter().any(|arg| arg.is_context) {
        let ty = TypeRef::new(syn::parse_quote!(tokio_util::sync::CancellationToken));
        args.push(Argument {
            name: book.acquire("ctx"),
            ty,
            is_context: true,
            uses: 0,
        });
    }

    // Signature order: context first, the rest by canonical type string.
    let mut arg_order: Vec<usize> = (0..args.len()).filter(|&a| args[a].is_context).collect();
    let mut rest: Vec<usize> = (0..args.len()).filter(|&a| !args[a].is_context).collect();
    rest.sort_by(|&a, &b| args[a].ty.canon.cmp(&args[b].ty.canon));
    arg_order.extend(rest);

    // Producer/consumer relations over distinct nodes.
    let mut producers: Vec<BTreeSet<NodeId>> = vec![BTreeSet::new(); nodes.len()];
    let mut consumers: Vec<BTreeSet<NodeId>> = vec![BTreeSet::new(); nodes.len()];
    for (node, data) in nodes.iter().enumerate() {
        for input in &data.inputs {
            if let ValueSource::Param(param) = input {
                let owner = params[*param].owner;
                producers[node].insert(owner);
                consumers[owner].insert(node);
            }
        }
    }

    // Kahn sort; ready set ordered sync-first, then by first output name.
    let sort_key = |node: NodeId| {
        let is_async = directive.providers[nodes[node].provider].is_async;
        let name = params[nodes[node].outputs[0]].name.clone();
        (is_async, name, node)
    };
    let mut pending: Vec<BTreeSet<NodeId>> = producers.clone();
    let mut ready: BTreeSet<(bool, String, NodeId)> = (0..nodes.len())
        .filter(|&node| pending[node].is_empty())
        .map(sort_key)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(next) = ready.iter().next().cloned() {
        ready.remove(&next);
        let node = next.2;
        order.push(node);
        for &consumer in &consumers[node] {
            pending[consumer].remove(&node);
            if pending[consumer].is_empty() {
                ready.insert(sort_key(consumer));
            }
        }
    }
    if order.len() < nodes.len() {
        let unresolved = (0..nodes.len())
            .filter(|node| !order.contains(node))
            .map(|node| params[nodes[node].outputs[0]].ty.canon.clone())
            .min()
            .unwrap_or_else(|| directive.return_type.canon.clone());
        return Err(GenerateError::Cycle {
            location: location(),
            ty: unresolved,
        });
    }

    let returns_error = nodes
        .iter()
        .any(|node| directive.providers[node.provider].returns_error);

    Ok(InjectorGraph {
        directive,
        args,
        arg_order,
        nodes,
        params,
        order,
        return_source: ValueSource::Param(return_param),
        returns_error,
        has_async,
        consumers,
        producers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract;
    use crate::oracle::Oracle;
    use std::path::Path;

    fn graph_for(source: &str) -> Result<InjectorGraph, GenerateError> {
        let oracle = Oracle::parse(Path::new("app.rs"), source).unwrap();
        let extraction = extract(&oracle);
        assert!(extraction.errors.is_empty(), "{:?}", extraction.errors);
        let mut book = NameBook::new();
        for name in oracle.top_level_names() {
            book.observe(name);
        }
        let directive = extraction.directives.into_iter().next().unwrap();
        build(directive, oracle.file(), &mut book)
    }

    #[test]
    fn auto_argument_for_unprovided_type() {
        let graph = graph_for(
            "use kessoku::inject;\npub struct Config;\npub struct Service;\n\
             fn new_service(cfg: Config) -> Service { Service }\n\
             inject!(Service, \"initialize_service\", provide(new_service));\n",
        )
        .unwrap();
        assert_eq!(graph.args.len(), 1);
        assert_eq!(graph.args[0].name, "config");
        assert_eq!(graph.args[0].ty.canon, "self::Config");
        assert!(!graph.returns_error);
        assert!(!graph.has_async);
    }

    #[test]
    fn conflict_on_double_provider() {
        let err = graph_for(
            "use kessoku::inject;\npub struct Config;\n\
             fn a() -> Config { Config }\nfn b() -> Config { Config }\n\
             inject!(Config, \"initialize_config\", provide(a), provide(b));\n",
        )
        .unwrap_err();
        match err {
            GenerateError::Conflict { ty, .. } => assert_eq!(ty, "self::Config"),
            other => panic!("expected conflict, got {other}"),
        }
    }

    #[test]
    fn unreachable_return_type() {
        let err = graph_for(
            "use kessoku::inject;\npub struct Db;\npub struct App;\n\
             fn new_db() -> Db { Db }\n\
             inject!(App, \"initialize_app\", provide(new_db));\n",
        )
        .unwrap_err();
        match err {
            GenerateError::Unreachable { ty, .. } => assert_eq!(ty, "self::App"),
            other => panic!("expected unreachable, got {other}"),
        }
    }

    #[test]
    fn cycle_is_reported_distinctly() {
        let err = graph_for(
            "use kessoku::inject;\npub struct A;\npub struct B;\n\
             fn new_a(b: B) -> A { A }\nfn new_b(a: A) -> B { B }\n\
             inject!(A, \"initialize_a\", provide(new_a), provide(new_b));\n",
        )
        .unwrap_err();
        assert!(matches!(err, GenerateError::Cycle { .. }));
    }

    #[test]
    fn arguments_order_context_first_then_lexicographic() {
        let graph = graph_for(
            "use kessoku::inject;\nuse tokio_util::sync::CancellationToken;\n\
             pub struct Alpha;\npub struct Zeta;\npub struct App;\n\
             fn new_app(z: Zeta, ctx: CancellationToken, a: Alpha) -> App { App }\n\
             inject!(App, \"initialize_app\", provide(new_app));\n",
        )
        .unwrap();
        let ordered: Vec<&str> = graph
            .arg_order
            .iter()
            .map(|&a| graph.args[a].name.as_str())
            .collect();
        assert_eq!(ordered, ["ctx", "alpha", "zeta"]);
    }

    #[test]
    fn async_plan_synthesizes_context_argument() {
        let graph = graph_for(
            "use kessoku::inject;\npub struct Db;\n\
             async fn new_db() -> Db { Db }\n\
             inject!(Db, \"initialize_db\", provide(new_db));\n",
        )
        .unwrap();
        assert!(graph.has_async);
        assert_eq!(graph.args.len(), 1);
        assert!(graph.args[0].is_context);
        assert_eq!(graph.args[0].name, "ctx");
    }

    #[test]
    fn sync_ready_nodes_sort_before_async() {
        let graph = graph_for(
            "use kessoku::inject;\npub struct Db;\npub struct Cfg;\npub struct App;\n\
             async fn new_db() -> Db { Db }\n\
             fn new_cfg() -> Cfg { Cfg }\n\
             fn new_app(db: Db, cfg: Cfg) -> App { App }\n\
             inject!(App, \"initialize_app\", provide(new_db), provide(new_cfg), provide(new_app));\n",
        )
        .unwrap();
        let labels: Vec<&str> = graph
            .order
            .iter()
            .map(|&n| graph.spec(n).label.as_str())
            .collect();
        assert_eq!(labels, ["new_cfg", "new_db", "new_app"]);
    }

    #[test]
    fn returns_error_when_any_reachable_provider_errors() {
        let graph = graph_for(
            "use kessoku::inject;\npub struct Db;\npub struct App;\n\
             fn new_db() -> Result<Db, std::io::Error> { unimplemented!() }\n\
             fn new_app(db: Db) -> App { App }\n\
             inject!(App, \"initialize_app\", provide(new_db), provide(new_app));\n",
        )
        .unwrap();
        assert!(graph.returns_error);
    }

    #[test]
    fn bind_satisfies_interface_requirement() {
        let graph = graph_for(
            "use kessoku::inject;\nuse std::sync::Arc;\n\
             pub trait Repo {}\npub struct PgRepo;\nimpl Repo for PgRepo {}\npub struct Svc;\n\
             fn new_pg_repo() -> PgRepo { PgRepo }\n\
             fn new_svc(repo: Arc<dyn Repo>) -> Svc { Svc }\n\
             inject!(Svc, \"initialize_svc\", bind(dyn Repo, provide(new_pg_repo)), provide(new_svc));\n",
        )
        .unwrap();
        assert!(graph.args.is_empty());
        let repo_node = graph
            .nodes
            .iter()
            .position(|n| graph.directive.providers[n.provider].label == "new_pg_repo")
            .unwrap();
        assert_eq!(graph.nodes[repo_node].bind_outputs.len(), 1);
        // The concrete value is consumed once, by the Arc coercion.
        let concrete = graph.nodes[repo_node].outputs[0];
        assert_eq!(graph.params[concrete].uses, 1);
    }

    #[test]
    fn multi_output_marks_unused_slot() {
        let graph = graph_for(
            "use kessoku::inject;\npub struct A;\npub struct B;\npub struct App;\n\
             fn pair() -> (A, B) { (A, B) }\n\
             fn new_app(a: A) -> App { App }\n\
             inject!(App, \"initialize_app\", provide(pair), provide(new_app));\n",
        )
        .unwrap();
        let pair_node = graph
            .nodes
            .iter()
            .position(|n| graph.directive.providers[n.provider].label == "pair")
            .unwrap();
        let [a, b] = graph.nodes[pair_node].outputs[..] else {
            panic!("expected two outputs");
        };
        assert_eq!(graph.params[a].uses, 1);
        assert_eq!(graph.params[b].uses, 0);
    }

    #[test]
    fn param_names_avoid_top_level_collisions() {
        let graph = graph_for(
            "use kessoku::inject;\npub struct Service;\npub fn service() {}\n\
             fn new_service() -> Service { Service }\n\
             inject!(Service, \"initialize_service\", provide(new_service));\n",
        )
        .unwrap();
        // `service` is a top-level name in the file, so the param shifts.
        assert_eq!(graph.params[graph.nodes[0].outputs[0]].name, "service0");
    }
}
