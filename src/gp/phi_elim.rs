//! Phi elimination for the GP IR (spec §4.4).
//!
//! Ground: the two-step scheme (copy-insert-then-coalesce) avoids the
//! classic "lost copy" / "swap" problems of naive phi-to-move lowering
//! without needing a full SSA-destruction interference analysis; the
//! phi-web fusion step is implemented with a union-find over registers
//! rather than literal recursion, which satisfies the spec's note (§9,
//! "Phi-web coalescing") to bound stack depth while still "chasing
//! connected phi nodes" transitively through path compression.

use crate::entity::EntityRef;
use crate::gp::block::BlockRef;
use crate::gp::node::{GpOp, NodeRef, NodeVariant};
use crate::gp::program::Program;
use crate::gp::reg::RegRef;
use std::collections::HashMap;

struct DisjointSet {
    parent: HashMap<RegRef, RegRef>,
}

impl DisjointSet {
    fn new() -> Self {
        DisjointSet {
            parent: HashMap::new(),
        }
    }

    fn find(&mut self, r: RegRef) -> RegRef {
        let mut root = r;
        while let Some(&p) = self.parent.get(&root) {
            if p == root {
                break;
            }
            root = p;
        }
        self.parent.entry(r).or_insert(root);
        let mut cur = r;
        while let Some(&p) = self.parent.get(&cur) {
            if p == root {
                break;
            }
            self.parent.insert(cur, root);
            cur = p;
        }
        root
    }

    fn union(&mut self, a: RegRef, b: RegRef) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        // Canonical representative is the lower index, so the result is
        // deterministic regardless of union order.
        if ra.index() < rb.index() {
            self.parent.insert(rb, ra);
        } else {
            self.parent.insert(ra, rb);
        }
    }
}

fn mov_copy(prog: &mut Program, dest: RegRef, src: RegRef, size: u8) -> NodeRef {
    let load = prog.nodes.alloc(
        GpOp::LoadReg,
        size,
        NodeVariant::LoadReg {
            reg: src,
            component_offset: 0,
        },
    );
    prog.regs[src].add_use(load);
    let mov = prog.nodes.alloc(
        GpOp::Mov,
        size,
        NodeVariant::Alu {
            children: vec![load],
            src_negate: vec![false],
            dest_negate: false,
        },
    );
    prog.nodes.link(mov, load, None);
    let store = prog.nodes.alloc(GpOp::StoreReg, size, NodeVariant::StoreReg { reg: dest, child: mov });
    prog.nodes.link(store, mov, None);
    prog.regs[dest].add_def(store);
    store
}

fn insert_at_head(prog: &mut Program, b: BlockRef, n: NodeRef) {
    prog.blocks[b].roots.insert(0, n);
}

fn insert_before_terminator(prog: &mut Program, b: BlockRef, n: NodeRef) {
    let pos = prog.blocks[b]
        .roots
        .last()
        .filter(|&&last| prog.nodes.get(last).op.is_branch())
        .map(|_| prog.blocks[b].roots.len() - 1);
    match pos {
        Some(i) => prog.blocks[b].roots.insert(i, n),
        None => prog.blocks[b].roots.push(n),
    }
}

/// Eliminate every phi node in `prog`, leaving the invariant of spec §8
/// property 3 ("no GP phi node remains") satisfied.
pub fn eliminate(prog: &mut Program) {
    let blocks: Vec<BlockRef> = prog.blocks.keys().collect();

    // Step 1: give every phi a fresh destination, with a copy from it into
    // the original destination at the head of the phi's own block.
    let mut orig_dest_to_fresh: HashMap<RegRef, RegRef> = HashMap::new();
    let mut phi_fresh_dest: HashMap<NodeRef, RegRef> = HashMap::new();
    for &b in &blocks {
        let phis = prog.blocks[b].phis.clone();
        for &phi in &phis {
            let (orig_dest, size) = match &prog.nodes.get(phi).variant {
                NodeVariant::Phi { reg, .. } => (*reg, prog.nodes.get(phi).size),
                _ => continue,
            };
            let fresh = prog.new_reg(size);
            prog.regs[orig_dest].remove_def(phi);
            if let NodeVariant::Phi { reg, .. } = &mut prog.nodes.get_mut(phi).variant {
                *reg = fresh;
            }
            prog.regs[fresh].add_def(phi);
            let copy = mov_copy(prog, orig_dest, fresh, size);
            insert_at_head(prog, b, copy);
            orig_dest_to_fresh.insert(orig_dest, fresh);
            phi_fresh_dest.insert(phi, fresh);
        }
    }

    // Step 2: for each phi, insert a copy of each incoming source into a
    // fresh per-edge register at the end of the corresponding predecessor,
    // and rewrite the phi's source to read that register instead.
    let mut dsu = DisjointSet::new();
    for &b in &blocks {
        let preds = prog.blocks[b].predecessors.clone();
        let phis = prog.blocks[b].phis.clone();
        for &phi in &phis {
            let fresh_dest = match phi_fresh_dest.get(&phi) {
                Some(&f) => f,
                None => continue,
            };
            let (sources, size) = match &prog.nodes.get(phi).variant {
                NodeVariant::Phi { sources, .. } => (sources.clone(), prog.nodes.get(phi).size),
                _ => continue,
            };
            for (pred_idx, &pred) in preds.iter().enumerate() {
                let source_node = sources[pred_idx];
                let src_reg = match &prog.nodes.get(source_node).variant {
                    NodeVariant::LoadReg { reg, .. } => *reg,
                    _ => continue,
                };
                let fresh_source = prog.new_reg(size);
                let copy = mov_copy(prog, fresh_source, src_reg, size);
                insert_before_terminator(prog, pred, copy);

                if let NodeVariant::LoadReg { reg, .. } =
                    &mut prog.nodes.get_mut(source_node).variant
                {
                    prog.regs[src_reg].remove_use(source_node);
                    prog.regs[fresh_source].add_use(source_node);
                    *reg = fresh_source;
                }

                dsu.union(fresh_dest, fresh_source);
                if let Some(&other_fresh) = orig_dest_to_fresh.get(&src_reg) {
                    dsu.union(fresh_source, other_fresh);
                }
            }
        }
    }

    // Step 3: resolve canonical registers and rewrite every reference.
    let mut canonical: HashMap<RegRef, RegRef> = HashMap::new();
    let keys: Vec<RegRef> = dsu.parent.keys().copied().collect();
    for k in keys {
        let root = dsu.find(k);
        if root != k {
            canonical.insert(k, root);
        }
    }
    for (&from, &to) in &canonical {
        let defs: Vec<NodeRef> = prog.regs[from].defs.iter().copied().collect();
        let uses: Vec<NodeRef> = prog.regs[from].uses.iter().copied().collect();
        for d in defs {
            prog.regs[from].remove_def(d);
            prog.regs[to].add_def(d);
        }
        for u in uses {
            prog.regs[from].remove_use(u);
            prog.regs[to].add_use(u);
        }
    }
    for (_, slot) in prog.nodes.nodes_mut_for_remap() {
        if let Some(node) = slot {
            let target = match &node.variant {
                NodeVariant::LoadReg { reg, .. } => Some(*reg),
                NodeVariant::StoreReg { reg, .. } => Some(*reg),
                NodeVariant::Phi { reg, .. } => Some(*reg),
                _ => None,
            };
            if let Some(r) = target {
                if let Some(&to) = canonical.get(&r) {
                    match &mut node.variant {
                        NodeVariant::LoadReg { reg, .. } => *reg = to,
                        NodeVariant::StoreReg { reg, .. } => *reg = to,
                        NodeVariant::Phi { reg, .. } => *reg = to,
                        _ => {}
                    }
                }
            }
        }
    }

    // Step 4: every phi is now redundant bookkeeping -- the copies already
    // carry the merged value across every incoming edge -- so delete them.
    for &b in &blocks {
        let phis = std::mem::take(&mut prog.blocks[b].phis);
        for phi in phis {
            let (reg, sources) = match &prog.nodes.get(phi).variant {
                NodeVariant::Phi { reg, sources } => (*reg, sources.clone()),
                _ => continue,
            };
            prog.regs[reg].remove_def(phi);
            for s in sources {
                prog.nodes.unlink(phi, s);
            }
            prog.nodes.delete(phi);
        }
    }

    prog.compact_registers();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gp::node::GpOp;

    fn diamond_with_phi() -> (Program, BlockRef) {
        let mut prog = Program::new();
        let entry = prog.new_block();
        let then_b = prog.new_block();
        let else_b = prog.new_block();
        let join = prog.new_block();
        prog.blocks[entry].successors = vec![then_b, else_b];
        prog.blocks[then_b].predecessors = vec![entry];
        prog.blocks[else_b].predecessors = vec![entry];
        prog.blocks[then_b].successors = vec![join];
        prog.blocks[else_b].successors = vec![join];
        prog.blocks[join].predecessors = vec![then_b, else_b];

        let a = prog.new_reg(1);
        let b = prog.new_reg(1);
        let dest = prog.new_reg(1);

        let src_a = prog.nodes.alloc(GpOp::LoadReg, 1, NodeVariant::LoadReg { reg: a, component_offset: 0 });
        prog.regs[a].add_use(src_a);
        let src_b = prog.nodes.alloc(GpOp::LoadReg, 1, NodeVariant::LoadReg { reg: b, component_offset: 0 });
        prog.regs[b].add_use(src_b);
        let phi = prog.nodes.alloc(
            GpOp::Phi,
            1,
            NodeVariant::Phi {
                reg: dest,
                sources: vec![src_a, src_b],
            },
        );
        prog.nodes.link(phi, src_a, None);
        prog.nodes.link(phi, src_b, None);
        prog.regs[dest].add_def(phi);
        prog.blocks[join].phis.push(phi);

        (prog, join)
    }

    #[test]
    fn eliminate_removes_all_phis() {
        let (mut prog, join) = diamond_with_phi();
        eliminate(&mut prog);
        assert!(prog.blocks[join].phis.is_empty());
        for (_, node) in prog.nodes.nodes_mut_for_remap() {
            if let Some(n) = node {
                assert!(!matches!(n.variant, NodeVariant::Phi { .. }));
            }
        }
    }

    #[test]
    fn eliminate_inserts_copy_in_every_predecessor() {
        let (mut prog, _join) = diamond_with_phi();
        let then_b = prog.blocks.keys().nth(1).unwrap();
        let else_b = prog.blocks.keys().nth(2).unwrap();
        eliminate(&mut prog);
        assert_eq!(prog.blocks[then_b].roots.len(), 1);
        assert_eq!(prog.blocks[else_b].roots.len(), 1);
    }
}
