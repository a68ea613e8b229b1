//! Execution planning: groups the topologically sorted providers into
//! chains, places each chain on the principal or an auxiliary task, and
//! allocates the one-shot channels carrying values across task boundaries.

use crate::graph::{InjectorGraph, NodeId, ParamId, ValueSource};
use crate::names::NameBook;

/// Where a chain executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainRole {
    /// Synchronous roots executed inline before the supervisor spawns.
    InlineRoot,
    /// The chain producing the return value, executed in the injector body.
    Principal,
    /// Spawned onto the supervisor.
    Aux,
}

#[derive(Debug)]
pub struct Chain {
    pub nodes: Vec<NodeId>,
    pub role: ChainRole,
}

/// A one-shot handoff of one produced value to one consuming chain.
/// `to_chain == None` is the principal body's read of the return value when
/// the return-producing chain is auxiliary.
#[derive(Debug)]
pub struct Channel {
    pub param: ParamId,
    pub from_node: NodeId,
    pub from_chain: usize,
    pub to_chain: Option<usize>,
    pub tx: String,
    pub rx: String,
}

#[derive(Debug)]
pub struct Plan {
    pub chains: Vec<Chain>,
    pub channels: Vec<Channel>,
    /// Channel index carrying the return value, when the return chain is
    /// auxiliary.
    pub return_wait: Option<usize>,
    pub has_async: bool,
    /// The effective error flag: asynchronous injectors always return a
    /// `Result`, even when no provider does.
    pub returns_error: bool,
}

impl Plan {
    pub fn waits_of(&self, chain: usize) -> impl Iterator<Item = &Channel> {
        self.channels
            .iter()
            .filter(move |ch| ch.to_chain == Some(chain))
    }

    pub fn sends_of(&self, node: NodeId) -> impl Iterator<Item = &Channel> {
        self.channels.iter().filter(move |ch| ch.from_node == node)
    }

    pub fn principal_chain(&self) -> Option<usize> {
        self.chains
            .iter()
            .position(|chain| chain.role == ChainRole::Principal)
    }
}

/// Plans one injector from its graph. A fully synchronous graph collapses
/// to a single principal sequence with no channels or supervisor.
pub fn plan(graph: &InjectorGraph, book: &mut NameBook) -> Plan {
    if !graph.has_async {
        return Plan {
            chains: vec![Chain {
                nodes: graph.order.clone(),
                role: ChainRole::Principal,
            }],
            channels: Vec::new(),
            return_wait: None,
            has_async: false,
            returns_error: graph.returns_error,
        };
    }

    let return_node = match graph.return_source {
        ValueSource::Param(param) => graph.params[param].owner,
        ValueSource::Arg(_) => unreachable!("the return value is always provider-produced"),
    };

    // Chain formation: greedily extend a chain by a unique single-parent
    // dependent child. A sync chain breaks before an async child; an async
    // chain keeps every child, except a synchronous return producer, which
    // must end up on the principal task.
    let mut chain_of = vec![usize::MAX; graph.nodes.len()];
    let mut chains: Vec<Vec<NodeId>> = Vec::new();
    let mut chain_async: Vec<bool> = Vec::new();
    for &node in &graph.order {
        let parents = &graph.producers[node];
        let mut joined = false;
        if parents.len() == 1 {
            let parent = *parents.iter().next().unwrap();
            let chain = chain_of[parent];
            let extend = chains[chain].last() == Some(&parent)
                && graph.consumers[parent].len() == 1
                && !(!chain_async[chain] && graph.node_is_async(node))
                && !(node == return_node && chain_async[chain] && !graph.node_is_async(node));
            if extend {
                chains[chain].push(node);
                chain_async[chain] |= graph.node_is_async(node);
                chain_of[node] = chain;
                joined = true;
            }
        }
        if !joined {
            chain_of[node] = chains.len();
            chain_async.push(graph.node_is_async(node));
            chains.push(vec![node]);
        }
    }

    // Task placement: async-first chains are auxiliary; a sync-first chain
    // that waits on an auxiliary chain is auxiliary too, unless it is the
    // return chain, which stays in the injector body.
    let return_chain = chain_of[return_node];
    let mut aux: Vec<bool> = chains
        .iter()
        .map(|chain| graph.node_is_async(chain[0]))
        .collect();
    loop {
        let mut changed = false;
        for chain in 0..chains.len() {
            if aux[chain] || chain == return_chain {
                continue;
            }
            let waits_on_aux = chains[chain].iter().any(|&node| {
                graph.nodes[node].inputs.iter().any(|input| match input {
                    ValueSource::Param(param) => aux[chain_of[graph.params[*param].owner]],
                    ValueSource::Arg(_) => false,
                })
            });
            if waits_on_aux {
                aux[chain] = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let roles: Vec<ChainRole> = (0..chains.len())
        .map(|chain| {
            if aux[chain] {
                ChainRole::Aux
            } else if chain == return_chain {
                ChainRole::Principal
            } else {
                ChainRole::InlineRoot
            }
        })
        .collect();

    // Channels: one per (produced value, consuming chain) pair whenever
    // either end runs on an auxiliary task. Edges within the principal task
    // stay plain variables.
    let mut channels: Vec<Channel> = Vec::new();
    for &node in &graph.order {
        let consumer_chain = chain_of[node];
        for input in &graph.nodes[node].inputs {
            let ValueSource::Param(param) = input else {
                continue;
            };
            let producer = graph.params[*param].owner;
            let producer_chain = chain_of[producer];
            if producer_chain == consumer_chain {
                continue;
            }
            let crosses_task = aux[producer_chain] || aux[consumer_chain];
            if !crosses_task {
                continue;
            }
            let exists = channels
                .iter()
                .any(|ch| ch.param == *param && ch.to_chain == Some(consumer_chain));
            if exists {
                continue;
            }
            let base = graph.params[*param].name.clone();
            channels.push(Channel {
                param: *param,
                from_node: producer,
                from_chain: producer_chain,
                to_chain: Some(consumer_chain),
                tx: book.acquire(&format!("{base}_tx")),
                rx: book.acquire(&format!("{base}_rx")),
            });
        }
    }

    let return_wait = if roles[return_chain] == ChainRole::Aux {
        let ValueSource::Param(param) = graph.return_source else {
            unreachable!();
        };
        let base = graph.params[param].name.clone();
        channels.push(Channel {
            param,
            from_node: return_node,
            from_chain: return_chain,
            to_chain: None,
            tx: book.acquire(&format!("{base}_tx")),
            rx: book.acquire(&format!("{base}_rx")),
        });
        Some(channels.len() - 1)
    } else {
        None
    };

    Plan {
        chains: chains
            .into_iter()
            .zip(roles)
            .map(|(nodes, role)| Chain { nodes, role })
            .collect(),
        channels,
        return_wait,
        has_async: true,
        returns_error: true,
    }
}
