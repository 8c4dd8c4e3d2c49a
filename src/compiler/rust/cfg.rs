// Copyright © 2023 Collabora, Ltd.
// SPDX-License-Identifier: MIT

use rustc_hash::FxHashMap;
use std::hash::Hash;
use std::ops::{Deref, DerefMut, Index, IndexMut};
use std::slice;

/// A [CFG] node
#[derive(Clone, Debug)]
pub struct CFGNode<N> {
    node: N,
    pred: Vec<usize>,
    succ: Vec<usize>,
}

impl<N> Deref for CFGNode<N> {
    type Target = N;

    fn deref(&self) -> &N {
        &self.node
    }
}

impl<N> DerefMut for CFGNode<N> {
    fn deref_mut(&mut self) -> &mut N {
        &mut self.node
    }
}

/// A container structure which represents a control-flow graph.
///
/// Nodes are stored in program order, the order in which they were handed to
/// [`CFG::from_blocks_edges`].  Node 0 is the entry.  Edges are kept as
/// predecessor and successor index lists on each node, in insertion order,
/// and may form arbitrary (including irreducible) graphs.
#[derive(Clone, Debug)]
pub struct CFG<N> {
    nodes: Vec<CFGNode<N>>,
}

impl<N> CFG<N> {
    /// Creates a new CFG from nodes and `(predecessor, successor)` edges.
    ///
    /// Panics if an edge refers to a node which does not exist.
    pub fn from_blocks_edges(
        nodes: impl IntoIterator<Item = N>,
        edges: impl IntoIterator<Item = (usize, usize)>,
    ) -> Self {
        let mut nodes = Vec::from_iter(nodes.into_iter().map(|n| CFGNode {
            node: n,
            pred: Vec::new(),
            succ: Vec::new(),
        }));

        for (p, s) in edges {
            assert!(
                p < nodes.len() && s < nodes.len(),
                "CFG edge {p} -> {s} refers to a missing block"
            );
            // Duplicate edges carry no extra information
            if !nodes[p].succ.contains(&s) {
                nodes[s].pred.push(p);
                nodes[p].succ.push(s);
            }
        }

        CFG { nodes }
    }

    /// Returns an iterator over the nodes.
    pub fn iter(&self) -> slice::Iter<'_, CFGNode<N>> {
        self.nodes.iter()
    }

    /// Returns a mutable iterator over the nodes.
    pub fn iter_mut(&mut self) -> slice::IterMut<'_, CFGNode<N>> {
        self.nodes.iter_mut()
    }

    /// Returns the number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the total number of edges.
    pub fn num_edges(&self) -> usize {
        self.nodes.iter().map(|n| n.succ.len()).sum()
    }

    /// Returns the indices of the successors of this node in the CFG.
    pub fn succ_indices(&self, idx: usize) -> &[usize] {
        &self.nodes[idx].succ[..]
    }

    /// Returns the indices of the predecessors of this node in the CFG.
    pub fn pred_indices(&self, idx: usize) -> &[usize] {
        &self.nodes[idx].pred[..]
    }
}

impl<N> Index<usize> for CFG<N> {
    type Output = N;

    fn index(&self, idx: usize) -> &N {
        &self.nodes[idx].node
    }
}

impl<N> IndexMut<usize> for CFG<N> {
    fn index_mut(&mut self, idx: usize) -> &mut N {
        &mut self.nodes[idx].node
    }
}

impl<'a, N> IntoIterator for &'a CFG<N> {
    type Item = &'a CFGNode<N>;
    type IntoIter = slice::Iter<'a, CFGNode<N>>;

    fn into_iter(self) -> slice::Iter<'a, CFGNode<N>> {
        self.iter()
    }
}

impl<'a, N> IntoIterator for &'a mut CFG<N> {
    type Item = &'a mut CFGNode<N>;
    type IntoIter = slice::IterMut<'a, CFGNode<N>>;

    fn into_iter(self) -> slice::IterMut<'a, CFGNode<N>> {
        self.iter_mut()
    }
}

/// A structure for building a [CFG].
///
/// Nodes and edges are added using any key type, typically a block label
/// chosen by whatever produced the blocks.  Nodes keep the order in which they
/// were added.  Call `as_cfg()` to get the final control-flow graph.
pub struct CFGBuilder<K, N> {
    nodes: Vec<N>,
    edges: Vec<(K, K)>,
    key_map: FxHashMap<K, usize>,
}

impl<K, N> CFGBuilder<K, N> {
    /// Creates a new CFG builder.
    pub fn new() -> Self {
        CFGBuilder {
            nodes: Vec::new(),
            edges: Vec::new(),
            key_map: Default::default(),
        }
    }
}

impl<K: Eq + Hash + std::fmt::Debug, N> CFGBuilder<K, N> {
    /// Adds a node to the CFG.
    ///
    /// Panics if a node with the same key was already added.
    pub fn add_node(&mut self, k: K, n: N) {
        assert!(!self.key_map.contains_key(&k), "CFG node {k:?} added twice");
        self.key_map.insert(k, self.nodes.len());
        self.nodes.push(n);
    }

    /// Adds an edge from `p` to `s` to the CFG.
    pub fn add_edge(&mut self, p: K, s: K) {
        self.edges.push((p, s));
    }

    /// Destroys this builder and returns a CFG.
    ///
    /// Panics if an edge names a key which was never added as a node.
    pub fn as_cfg(self) -> CFG<N> {
        let key_map = self.key_map;
        let idx = |k: &K| -> usize {
            *key_map
                .get(k)
                .unwrap_or_else(|| panic!("CFG edge to unknown node {k:?}"))
        };
        let edges: Vec<_> =
            self.edges.iter().map(|(p, s)| (idx(p), idx(s))).collect();
        CFG::from_blocks_edges(self.nodes, edges)
    }
}

impl<K, N> Default for CFGBuilder<K, N> {
    fn default() -> Self {
        CFGBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_order() {
        let mut builder = CFGBuilder::new();
        builder.add_node("entry", 10);
        builder.add_node("then", 20);
        builder.add_node("else", 30);
        builder.add_node("merge", 40);
        builder.add_edge("entry", "then");
        builder.add_edge("entry", "else");
        builder.add_edge("then", "merge");
        builder.add_edge("else", "merge");
        builder.add_edge("else", "merge");
        let cfg = builder.as_cfg();

        let vals: Vec<i32> = cfg.iter().map(|n| **n).collect();
        assert_eq!(vals, &[10, 20, 30, 40]);
        assert_eq!(cfg.succ_indices(0), &[1, 2]);
        assert_eq!(cfg.pred_indices(3), &[1, 2]);
        assert_eq!(cfg.num_edges(), 4);
    }

    #[test]
    fn test_self_loop() {
        let cfg = CFG::from_blocks_edges(["a", "b"], [(0, 1), (1, 1)]);
        assert_eq!(cfg.pred_indices(1), &[0, 1]);
        assert_eq!(cfg.succ_indices(1), &[1]);
        assert!(cfg.succ_indices(0).contains(&1));
    }

    #[test]
    #[should_panic(expected = "refers to a missing block")]
    fn test_bad_edge() {
        let _ = CFG::from_blocks_edges([()], [(0, 1)]);
    }

    #[test]
    #[should_panic(expected = "added twice")]
    fn test_builder_duplicate_key() {
        let mut builder = CFGBuilder::new();
        builder.add_node("loop", 1);
        builder.add_node("loop", 2);
    }

    #[test]
    #[should_panic(expected = "unknown node")]
    fn test_builder_unknown_key() {
        let mut builder = CFGBuilder::new();
        builder.add_node(0, ());
        builder.add_edge(0, 7);
        let _ = builder.as_cfg();
    }
}
