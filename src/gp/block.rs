//! GP basic blocks (spec §3 "Block (GP)").
//!
//! A block owns an ordered list of *root* nodes (statements: store,
//! store-reg, the three `store_temp_load_off*` variants, and the two branch
//! forms); each root owns the expression DAG rooted at it. Non-root nodes
//! live only as someone's child and are reachable purely through the DAG.

use crate::bitset::BitSet;
use crate::entity::{entity_impl, EntityRef};
use crate::gp::node::{NodeArena, NodeRef};
use std::collections::HashMap;

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct BlockRef(u32);
entity_impl!(BlockRef, "block");

pub struct ScheduledBundle {
    pub nodes: Vec<NodeRef>,
}

pub struct Block {
    /// Ordered list of root nodes -- this block's statements, in program
    /// order.
    pub roots: Vec<NodeRef>,
    pub phis: Vec<NodeRef>,
    pub successors: Vec<BlockRef>,
    pub predecessors: Vec<BlockRef>,

    // --- dominance (populated by gp::ssa) ---
    pub idom: Option<BlockRef>,
    pub dom_frontier: Vec<BlockRef>,
    pub dom_children: Vec<BlockRef>,
    pub rpo_index: Option<u32>,

    // --- dep graph (populated by gp::dep_info) ---
    pub start_nodes: Vec<NodeRef>,
    pub end_nodes: Vec<NodeRef>,

    // --- liveness (populated by gp::liveness) ---
    pub live_in_phys: BitSet,
    pub live_in_virt: BitSet,

    // --- scheduling (populated by gp::scheduler) ---
    pub bundles: Vec<ScheduledBundle>,
}

impl Block {
    pub fn new() -> Self {
        Block {
            roots: Vec::new(),
            phis: Vec::new(),
            successors: Vec::new(),
            predecessors: Vec::new(),
            idom: None,
            dom_frontier: Vec::new(),
            dom_children: Vec::new(),
            rpo_index: None,
            start_nodes: Vec::new(),
            end_nodes: Vec::new(),
            live_in_phys: BitSet::new(),
            live_in_virt: BitSet::new(),
            bundles: Vec::new(),
        }
    }

    pub fn push_root(&mut self, n: NodeRef) {
        self.roots.push(n);
    }

    pub fn insert_root_before(&mut self, before: NodeRef, n: NodeRef) {
        let pos = self.roots.iter().position(|&r| r == before).unwrap();
        self.roots.insert(pos, n);
    }

    pub fn insert_root_after(&mut self, after: NodeRef, n: NodeRef) {
        let pos = self.roots.iter().position(|&r| r == after).unwrap();
        self.roots.insert(pos + 1, n);
    }

    fn root_positions(&self) -> HashMap<NodeRef, usize> {
        self.roots.iter().enumerate().map(|(i, &r)| (r, i)).collect()
    }

    /// Recompute `node`'s `successor` as the earliest root node reachable
    /// via any parent chain (spec §3 "A node's `successor` is the earliest
    /// root node reachable via any parent chain; recomputed on unlink").
    pub fn recompute_successor(&self, arena: &mut NodeArena, node: NodeRef) {
        let positions = self.root_positions();
        let candidate = self.compute_successor(arena, &positions, node);
        arena.get_mut(node).successor = candidate;
    }

    fn compute_successor(
        &self,
        arena: &NodeArena,
        positions: &HashMap<NodeRef, usize>,
        node: NodeRef,
    ) -> Option<NodeRef> {
        let parents: Vec<NodeRef> = arena.get(node).parents.iter().copied().collect();
        let mut best: Option<(usize, NodeRef)> = None;
        for p in parents {
            let candidate = if let Some(&pos) = positions.get(&p) {
                Some((pos, p))
            } else {
                arena
                    .get(p)
                    .successor
                    .and_then(|s| positions.get(&s).map(|&pos| (pos, s)))
            };
            if let Some(c) = candidate {
                if best.map_or(true, |b| c.0 < b.0) {
                    best = Some(c);
                }
            }
        }
        best.map(|(_, r)| r)
    }

    /// Recompute every non-root node's successor from scratch. Used after
    /// bulk edits (if-conversion block merges) where incremental
    /// maintenance would be error-prone.
    pub fn recompute_all_successors(&self, arena: &mut NodeArena) {
        let positions = self.root_positions();
        // Process in reverse program order so a node's parents (which must
        // appear no earlier than the node itself in def-use terms for a
        // DAG rooted at statements) have already been visited when later
        // nodes consult them transitively; since we recompute purely from
        // `parents`, any fixed order that is acyclic-consistent converges
        // in one pass for a DAG with the invariant that children never
        // postdate their parents' root position.
        for &root in self.roots.iter().rev() {
            self.recompute_from(arena, &positions, root);
        }
    }

    fn recompute_from(
        &self,
        arena: &mut NodeArena,
        positions: &HashMap<NodeRef, usize>,
        node: NodeRef,
    ) {
        let children = arena.get(node).children();
        for c in children {
            let candidate = self.compute_successor(arena, positions, c);
            arena.get_mut(c).successor = candidate;
            self.recompute_from(arena, positions, c);
        }
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::new()
    }
}
