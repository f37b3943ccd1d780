//! Local topology graph and the maximum-leaf spanning tree heuristic.
//!
//! The graph is an undirected adjacency structure with per-node last-seen
//! times. PrudentCaster extracts a 2-hop subgraph around the most recent
//! hop of an item and builds an MLST over it: the more leaves the tree has,
//! the fewer nodes re-broadcast. Determinism matters for reproducible runs,
//! so neighbor lists are sorted by (degree descending, id ascending) before
//! every tree construction.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::NodeId;
use crate::engine::SimTime;

#[derive(Debug, Clone, Default)]
pub struct Graph {
    adj: BTreeMap<NodeId, Vec<NodeId>>,
    node_time: BTreeMap<NodeId, SimTime>,
    root: Option<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Refresh the last-seen time of `node`.
    pub fn touch_node(&mut self, node: NodeId, now: SimTime) {
        self.node_time.insert(node, now);
    }

    pub fn node_times(&self) -> impl Iterator<Item = (NodeId, SimTime)> + '_ {
        self.node_time.iter().map(|(&n, &t)| (n, t))
    }

    pub fn add_edge(&mut self, a: NodeId, b: NodeId) {
        if a == b {
            return;
        }
        let a_list = self.adj.entry(a).or_default();
        if !a_list.contains(&b) {
            a_list.push(b);
        }
        let b_list = self.adj.entry(b).or_default();
        if !b_list.contains(&a) {
            b_list.push(a);
        }
    }

    pub fn remove_edge(&mut self, a: NodeId, b: NodeId) {
        if let Some(list) = self.adj.get_mut(&a) {
            list.retain(|&n| n != b);
        }
        if let Some(list) = self.adj.get_mut(&b) {
            list.retain(|&n| n != a);
        }
    }

    pub fn has_edge(&self, a: NodeId, b: NodeId) -> bool {
        self.adj
            .get(&a)
            .map(|list| list.contains(&b))
            .unwrap_or(false)
    }

    pub fn neighbors(&self, node: NodeId) -> &[NodeId] {
        self.adj.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.adj.keys().copied()
    }

    pub fn node_count(&self) -> usize {
        self.adj.len()
    }

    /// A node is a leaf iff it has at most one neighbor and is not the root.
    pub fn is_leaf(&self, node: NodeId) -> bool {
        if Some(node) == self.root {
            return false;
        }
        self.neighbors(node).len() <= 1
    }

    pub fn leaves(&self) -> Vec<NodeId> {
        self.nodes().filter(|&n| self.is_leaf(n)).collect()
    }

    /// Whether `path` is walkable edge by edge. In a rooted tree the walk
    /// must additionally start at the root.
    pub fn path_exists(&self, path: &[NodeId]) -> bool {
        if path.is_empty() {
            return false;
        }
        if let Some(root) = self.root {
            if path[0] != root {
                return false;
            }
        }
        path.windows(2).all(|pair| self.has_edge(pair[0], pair[1]))
    }

    /// Sort `nodes` by degree descending, id ascending.
    fn sorted_by_degree(&self, nodes: impl Iterator<Item = NodeId>) -> Vec<NodeId> {
        let mut sorted: Vec<NodeId> = nodes.collect();
        sorted.sort_by_key(|&n| (std::cmp::Reverse(self.neighbors(n).len()), n));
        sorted
    }

    /// Re-order every adjacency list by (degree descending, id ascending)
    /// so later scans are deterministic.
    fn sort_neighbor_lists(&mut self) {
        let order: BTreeMap<NodeId, Vec<NodeId>> = self
            .adj
            .keys()
            .map(|&n| (n, self.sorted_by_degree(self.neighbors(n).iter().copied())))
            .collect();
        self.adj = order;
    }

    /// Count the neighbors of `node` not yet in `connected`.
    fn unconnected_children(&self, node: NodeId, connected: &BTreeSet<NodeId>) -> Vec<NodeId> {
        self.neighbors(node)
            .iter()
            .copied()
            .filter(|n| !connected.contains(n))
            .collect()
    }

    /// The neighbor of `node` with the most already-connected neighbors.
    fn max_connected_neighbor(&self, node: NodeId, connected: &BTreeSet<NodeId>) -> Option<NodeId> {
        let mut best = None;
        let mut best_count = -1i64;
        for &neighbor in self.neighbors(node) {
            let count = self
                .neighbors(neighbor)
                .iter()
                .filter(|n| connected.contains(n))
                .count() as i64;
            if count > best_count {
                best_count = count;
                best = Some(neighbor);
            }
        }
        best
    }

    /// BFS-limited subgraph: every edge reachable within `max_hops` of
    /// `start`.
    pub fn subgraph_within_hops(&self, start: NodeId, max_hops: usize) -> Graph {
        let mut subgraph = Graph::new();
        let mut queue = VecDeque::new();
        queue.push_back((start, 0usize));

        while let Some((current, hops)) = queue.pop_front() {
            if hops >= max_hops {
                continue;
            }
            for &neighbor in self.neighbors(current) {
                if !subgraph.has_edge(current, neighbor) {
                    subgraph.add_edge(current, neighbor);
                    queue.push_back((neighbor, hops + 1));
                }
            }
        }
        subgraph
    }

    /// Maximum-leaf spanning tree heuristic rooted at `root`:
    ///
    /// 1. connect all direct neighbors of the root,
    /// 2. among 2-hop nodes pick the one whose inclusion connects the most
    ///    still-unconnected nodes (degree, then lower id, breaks ties via
    ///    the sorted scan order) and attach it with its children,
    /// 3. attach every remaining node to the neighbor that already has the
    ///    most connected neighbors.
    ///
    /// Returns the tree and its leaves.
    pub fn mlst(&mut self, root: NodeId) -> (Graph, Vec<NodeId>) {
        self.sort_neighbor_lists();

        let mut tree = Graph::new();
        tree.root = Some(root);
        let mut connected: BTreeSet<NodeId> = BTreeSet::new();
        connected.insert(root);

        for &neighbor in self.neighbors(root) {
            tree.add_edge(root, neighbor);
            connected.insert(neighbor);
        }
        if connected.len() == self.node_count() {
            let leaves = tree.leaves();
            return (tree, leaves);
        }

        // best 2-hop node: connects the most still-unconnected nodes
        let mut max_unconnected = -1i64;
        let mut selected = None;
        let mut parent = None;
        let mut children = Vec::new();
        for &node in self.neighbors(root) {
            for &candidate in self.neighbors(node) {
                if !connected.contains(&candidate) {
                    let unconnected = self.unconnected_children(candidate, &connected);
                    if unconnected.len() as i64 > max_unconnected {
                        max_unconnected = unconnected.len() as i64;
                        selected = Some(candidate);
                        parent = Some(node);
                        children = unconnected;
                    }
                }
            }
        }

        if let (Some(parent), Some(selected)) = (parent, selected) {
            tree.add_edge(root, parent);
            connected.insert(parent);
            tree.add_edge(parent, selected);
            connected.insert(selected);
            for child in children {
                tree.add_edge(selected, child);
                connected.insert(child);
            }
        }

        // remaining nodes hang off the best-connected neighbor
        for node in self.sorted_by_degree(self.nodes()) {
            if !connected.contains(&node) {
                if let Some(anchor) = self.max_connected_neighbor(node, &connected) {
                    tree.add_edge(anchor, node);
                    connected.insert(node);
                }
            }
        }

        let leaves = tree.leaves();
        (tree, leaves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: usize) -> Graph {
        let mut graph = Graph::new();
        for i in 0..n - 1 {
            graph.add_edge(i, i + 1);
        }
        graph
    }

    #[test]
    fn edges_are_undirected_and_deduplicated() {
        let mut graph = Graph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 1);
        graph.add_edge(1, 1);
        assert_eq!(graph.neighbors(1), &[2]);
        assert_eq!(graph.neighbors(2), &[1]);
        graph.remove_edge(1, 2);
        assert!(graph.neighbors(1).is_empty());
        assert!(graph.neighbors(2).is_empty());
    }

    #[test]
    fn subgraph_is_limited_to_two_hops() {
        let graph = chain(5);
        let subgraph = graph.subgraph_within_hops(0, 2);
        assert!(subgraph.has_edge(0, 1));
        assert!(subgraph.has_edge(1, 2));
        assert!(!subgraph.has_edge(2, 3));
    }

    #[test]
    fn rooted_path_must_start_at_the_root() {
        let mut graph = chain(4);
        let (tree, _) = graph.mlst(0);
        assert!(tree.path_exists(&[0, 1]));
        assert!(!tree.path_exists(&[1, 2]));
    }

    #[test]
    fn mlst_on_a_chain_keeps_interior_nodes_internal() {
        let mut graph = chain(5);
        // root at one end: the tree must reach everyone
        let (tree, leaves) = graph.mlst(0);
        assert_eq!(tree.root(), Some(0));
        assert_eq!(tree.node_count(), 5);
        // every leaf has exactly one tree neighbor, internal nodes at least two
        for node in tree.nodes() {
            if leaves.contains(&node) {
                assert_eq!(tree.neighbors(node).len(), 1);
            } else if Some(node) != tree.root() {
                assert!(tree.neighbors(node).len() >= 2);
            }
        }
        // the root is never reported as a leaf
        assert!(!leaves.contains(&0));
        assert!(!tree.is_leaf(0));
    }

    #[test]
    fn mlst_on_a_star_makes_every_spoke_a_leaf() {
        let mut graph = Graph::new();
        for spoke in 1..=4 {
            graph.add_edge(0, spoke);
        }
        let (tree, leaves) = graph.mlst(0);
        assert_eq!(leaves.len(), 4);
        assert!(!tree.is_leaf(0));
        assert_eq!(tree.neighbors(0).len(), 4);
    }

    #[test]
    fn mlst_prefers_the_two_hop_node_covering_the_most() {
        // root 0 - {1, 2}; 3 behind 1 covers {5, 6}; 4 behind 2 covers {7}
        let mut graph = Graph::new();
        graph.add_edge(0, 1);
        graph.add_edge(0, 2);
        graph.add_edge(1, 3);
        graph.add_edge(2, 4);
        graph.add_edge(3, 5);
        graph.add_edge(3, 6);
        graph.add_edge(4, 7);
        let (tree, _) = graph.mlst(0);
        // 3 was selected and carries its children
        assert!(tree.has_edge(1, 3));
        assert!(tree.has_edge(3, 5));
        assert!(tree.has_edge(3, 6));
        // 7 attaches through its only neighbor
        assert!(tree.has_edge(4, 7));
    }

    #[test]
    fn five_node_chain_mlst_marks_the_ends_as_leaves() {
        // the scenario behind broadcast suppression: a linear chain rooted
        // one hop in keeps the middle internal and the far end a leaf
        let mut graph = chain(5);
        let mut subgraph = graph.subgraph_within_hops(1, 2);
        let (tree, leaves) = subgraph.mlst(0);
        assert!(tree.path_exists(&[0, 1, 2]));
        assert!(!tree.is_leaf(1));
        assert!(leaves.contains(&3) || tree.is_leaf(3));
        let _ = graph.mlst(2);
    }
}
