//! Per-token trade graph construction and weight-decrement peeling.
//!
//! Nodes are dense trader IDs; a directed edge (seller → buyer) carries the
//! number of trades between that ordered pair on this token. The multigraph
//! of individual trades is collapsed at construction: parallel trades sum
//! into one edge weight, self-trades are skipped entirely.

use std::collections::HashMap;

use petgraph::algo::tarjan_scc;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};

/// Weighted simple digraph of one token's trades.
///
/// Backed by a stable graph so that peeling can remove edges and nodes in
/// place without invalidating the remaining indices.
pub struct TokenTradeGraph {
    graph: StableDiGraph<u32, u32>,
    id_to_ix: HashMap<u32, NodeIndex>,
}

impl TokenTradeGraph {
    /// Builds the graph from `(seller_id, buyer_id)` trade pairs.
    pub fn from_trades<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (u32, u32)>,
    {
        let mut graph = StableDiGraph::new();
        let mut id_to_ix: HashMap<u32, NodeIndex> = HashMap::new();

        for (seller, buyer) in pairs {
            if seller == buyer {
                continue;
            }
            let seller_ix = *id_to_ix
                .entry(seller)
                .or_insert_with(|| graph.add_node(seller));
            let buyer_ix = *id_to_ix
                .entry(buyer)
                .or_insert_with(|| graph.add_node(buyer));

            match graph.find_edge(seller_ix, buyer_ix) {
                Some(edge) => graph[edge] += 1,
                None => {
                    graph.add_edge(seller_ix, buyer_ix, 1);
                }
            }
        }

        Self { graph, id_to_ix }
    }

    /// Number of nodes currently in the graph.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of distinct directed edges currently in the graph.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// True once every node has been peeled away.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Sum of all remaining edge multiplicities.
    pub fn total_weight(&self) -> u64 {
        self.graph
            .edge_indices()
            .filter_map(|edge| self.graph.edge_weight(edge))
            .map(|weight| u64::from(*weight))
            .sum()
    }

    /// Strongly connected components with at least two members, each as a
    /// sorted list of trader IDs.
    pub fn non_trivial_sccs(&self) -> Vec<Vec<u32>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| {
                let mut members: Vec<u32> = scc.iter().map(|ix| self.graph[*ix]).collect();
                members.sort_unstable();
                members
            })
            .collect()
    }

    /// Removes one multiplicity layer: decrements every edge weight, drops
    /// edges that reach zero, then drops nodes left without any edge.
    pub fn peel(&mut self) {
        let edges: Vec<EdgeIndex> = self.graph.edge_indices().collect();
        for edge in edges {
            if let Some(weight) = self.graph.edge_weight_mut(edge) {
                *weight -= 1;
                if *weight == 0 {
                    self.graph.remove_edge(edge);
                }
            }
        }

        let isolated: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&node| self.graph.neighbors_undirected(node).next().is_none())
            .collect();
        for node in isolated {
            if let Some(id) = self.graph.remove_node(node) {
                self.id_to_ix.remove(&id);
            }
        }
    }
}
