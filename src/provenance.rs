// src/provenance.rs

//! Commit-level provenance graph.
//!
//! Nodes are global commit sequence numbers (creation order across all repos);
//! an edge `a -> b` records that commit `b` was produced because of commit
//! `a`. Because a derived commit is always opened after its sources, every
//! edge points from a lower to a higher sequence number, which keeps the graph
//! acyclic by construction. [`ProvenanceGraph::add_edge`] still verifies this
//! and rejects anything that would close a cycle.
//!
//! The "source is finished" rule is enforced by the store, which calls
//! `add_edge` while holding the source repo's lock.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::{Bfs, Reversed};

use crate::errors::{CommitflowError, Result};
use crate::store::Commit;

#[derive(Debug, Default)]
struct GraphInner {
    edges: DiGraphMap<u64, ()>,
    commits: HashMap<u64, Commit>,
}

impl GraphInner {
    fn commit(&self, seq: u64) -> Option<(u64, Commit)> {
        self.commits.get(&seq).map(|c| (seq, c.clone()))
    }

    fn sorted(&self, mut seqs: Vec<u64>) -> Vec<(u64, Commit)> {
        seqs.sort_unstable();
        seqs.dedup();
        seqs.into_iter().filter_map(|s| self.commit(s)).collect()
    }
}

/// Internally synchronized provenance graph.
#[derive(Debug, Default)]
pub struct ProvenanceGraph {
    inner: RwLock<GraphInner>,
}

impl ProvenanceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, GraphInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GraphInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a node for a newly started commit.
    pub fn register(&self, seq: u64, commit: Commit) {
        let mut inner = self.write();
        inner.edges.add_node(seq);
        inner.commits.insert(seq, commit);
    }

    /// Remove nodes (and every edge touching them).
    pub fn unregister(&self, seqs: &[u64]) {
        let mut inner = self.write();
        for seq in seqs {
            inner.edges.remove_node(*seq);
            inner.commits.remove(seq);
        }
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.read().edges.contains_node(seq)
    }

    /// Record that `derived` was produced because of `source`.
    ///
    /// Returns `Ok(false)` if the edge already existed.
    pub fn add_edge(&self, source: u64, derived: u64) -> Result<bool> {
        let mut inner = self.write();

        for seq in [source, derived] {
            if !inner.edges.contains_node(seq) {
                return Err(CommitflowError::CommitNotFound(format!("commit #{seq}")));
            }
        }

        let describe = |inner: &GraphInner, seq: u64| {
            inner
                .commits
                .get(&seq)
                .map(|c| c.to_string())
                .unwrap_or_else(|| format!("#{seq}"))
        };

        if derived <= source || has_path_connecting(&inner.edges, derived, source, None) {
            return Err(CommitflowError::ProvenanceCycle(format!(
                "{} -> {}",
                describe(&*inner, source),
                describe(&*inner, derived)
            )));
        }

        Ok(inner.edges.add_edge(source, derived, ()).is_none())
    }

    /// Direct provenance parents of `seq`, in creation order.
    pub fn parents(&self, seq: u64) -> Vec<(u64, Commit)> {
        let inner = self.read();
        let seqs = inner
            .edges
            .neighbors_directed(seq, Direction::Incoming)
            .collect();
        inner.sorted(seqs)
    }

    /// Direct provenance children of `seq`, in creation order.
    pub fn children(&self, seq: u64) -> Vec<(u64, Commit)> {
        let inner = self.read();
        let seqs = inner
            .edges
            .neighbors_directed(seq, Direction::Outgoing)
            .collect();
        inner.sorted(seqs)
    }

    /// Every commit `seq` transitively derives from, in creation order.
    pub fn ancestors(&self, seq: u64) -> Vec<(u64, Commit)> {
        let inner = self.read();
        if !inner.edges.contains_node(seq) {
            return Vec::new();
        }
        let reversed = Reversed(&inner.edges);
        let mut bfs = Bfs::new(reversed, seq);
        let mut seqs = Vec::new();
        while let Some(node) = bfs.next(reversed) {
            if node != seq {
                seqs.push(node);
            }
        }
        inner.sorted(seqs)
    }

    /// Root commits `seq` derives from: ancestors with no parents of their
    /// own, or `seq` itself when it has no parents.
    pub fn origins(&self, seq: u64) -> Vec<(u64, Commit)> {
        let inner = self.read();
        if !inner.edges.contains_node(seq) {
            return Vec::new();
        }
        let reversed = Reversed(&inner.edges);
        let mut bfs = Bfs::new(reversed, seq);
        let mut seqs = Vec::new();
        while let Some(node) = bfs.next(reversed) {
            let is_root = inner
                .edges
                .neighbors_directed(node, Direction::Incoming)
                .next()
                .is_none();
            if is_root {
                seqs.push(node);
            }
        }
        inner.sorted(seqs)
    }

    /// Whether `seq` is `origin` or transitively derived from it.
    pub fn derives_from(&self, seq: u64, origin: u64) -> bool {
        if seq == origin {
            return true;
        }
        let inner = self.read();
        inner.edges.contains_node(seq)
            && inner.edges.contains_node(origin)
            && has_path_connecting(&inner.edges, origin, seq, None)
    }

    /// Every commit transitively derived from `seq`, in creation order.
    ///
    /// This is a snapshot: commits triggered after the call are not included.
    pub fn descendants(&self, seq: u64) -> Vec<(u64, Commit)> {
        let inner = self.read();
        if !inner.edges.contains_node(seq) {
            return Vec::new();
        }
        let mut bfs = Bfs::new(&inner.edges, seq);
        let mut seqs = Vec::new();
        while let Some(node) = bfs.next(&inner.edges) {
            if node != seq {
                seqs.push(node);
            }
        }
        inner.sorted(seqs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(n: u64) -> ProvenanceGraph {
        let graph = ProvenanceGraph::new();
        for seq in 1..=n {
            graph.register(seq, Commit::new(format!("repo{seq}"), format!("c{seq}")));
        }
        graph
    }

    #[test]
    fn children_and_parents_are_ordered() {
        let graph = graph_with(4);
        graph.add_edge(1, 3).unwrap();
        graph.add_edge(1, 2).unwrap();
        graph.add_edge(2, 4).unwrap();

        let children: Vec<u64> = graph.children(1).into_iter().map(|(s, _)| s).collect();
        assert_eq!(children, vec![2, 3]);
        let parents: Vec<u64> = graph.parents(4).into_iter().map(|(s, _)| s).collect();
        assert_eq!(parents, vec![2]);
    }

    #[test]
    fn transitive_walks() {
        let graph = graph_with(4);
        graph.add_edge(1, 2).unwrap();
        graph.add_edge(2, 3).unwrap();
        graph.add_edge(2, 4).unwrap();

        let desc: Vec<u64> = graph.descendants(1).into_iter().map(|(s, _)| s).collect();
        assert_eq!(desc, vec![2, 3, 4]);
        let anc: Vec<u64> = graph.ancestors(4).into_iter().map(|(s, _)| s).collect();
        assert_eq!(anc, vec![1, 2]);
    }

    #[test]
    fn origins_are_the_parentless_ancestors() {
        let graph = graph_with(5);
        graph.add_edge(1, 3).unwrap();
        graph.add_edge(2, 3).unwrap();
        graph.add_edge(3, 4).unwrap();

        let roots: Vec<u64> = graph.origins(4).into_iter().map(|(s, _)| s).collect();
        assert_eq!(roots, vec![1, 2]);
        let own: Vec<u64> = graph.origins(5).into_iter().map(|(s, _)| s).collect();
        assert_eq!(own, vec![5]);

        assert!(graph.derives_from(4, 1));
        assert!(graph.derives_from(1, 1));
        assert!(!graph.derives_from(1, 4));
        assert!(!graph.derives_from(4, 5));
    }

    #[test]
    fn backwards_edge_is_a_cycle() {
        let graph = graph_with(2);
        graph.add_edge(1, 2).unwrap();
        let err = graph.add_edge(2, 1).unwrap_err();
        assert!(matches!(err, CommitflowError::ProvenanceCycle(_)));
    }

    #[test]
    fn unregister_drops_edges() {
        let graph = graph_with(3);
        graph.add_edge(1, 2).unwrap();
        graph.add_edge(2, 3).unwrap();
        graph.unregister(&[2]);

        assert!(graph.children(1).is_empty());
        assert!(graph.parents(3).is_empty());
        assert!(graph.add_edge(1, 2).is_err());
    }
}
