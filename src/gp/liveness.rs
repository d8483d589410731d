//! Per-component virtual-register liveness for the GP IR (spec §4.8).
//!
//! Ground: `examples/original_source/src/lima/gp_ir/gp_ir.h` declares
//! `lima_gp_ir_liveness_compute_prog`, called from `regalloc.c` and `ir.c`
//! before allocation runs; its definition is not present in this
//! retrieval pack, so the backward per-instruction sweep below is this
//! module's own construction rather than a transcription. Its output
//! shape matches `block.c`'s `live_virt_before`/`live_phys_before` fields
//! (printed per block and per node by `print_block_liveness`/
//! `print_node_liveness`): a live-virtual-registers bitset per block
//! entry. Each virtual register occupies four consecutive bit positions
//! (`reg.index() * 4 + component`), mirroring the register's own vec4
//! component layout.

use crate::bitset::BitSet;
use crate::entity::EntityRef;
use crate::gp::block::BlockRef;
use crate::gp::node::{NodeRef, NodeVariant};
use crate::gp::program::Program;
use std::collections::HashSet;

fn collect_uses(prog: &Program, n: NodeRef, out: &mut BitSet, visited: &mut HashSet<NodeRef>) {
    if !visited.insert(n) {
        return;
    }
    if let NodeVariant::LoadReg { reg, component_offset } = &prog.nodes.get(n).variant {
        let size = prog.nodes.get(n).size;
        let base = reg.index() * 4;
        for c in *component_offset as usize..(*component_offset as usize + size as usize) {
            out.insert(base + c);
        }
    }
    for c in prog.nodes.get(n).children() {
        collect_uses(prog, c, out, visited);
    }
}

fn collect_def(prog: &Program, root: NodeRef) -> Option<(usize, u8)> {
    match &prog.nodes.get(root).variant {
        NodeVariant::StoreReg { reg, .. } => Some((reg.index() * 4, prog.regs[*reg].size)),
        _ => None,
    }
}

fn process_block(prog: &Program, b: BlockRef, live_out: BitSet) -> BitSet {
    let mut live = live_out;
    for &root in prog.blocks[b].roots.iter().rev() {
        if let Some((base, size)) = collect_def(prog, root) {
            for c in 0..size as usize {
                live.set(base + c, false);
            }
        }
        let mut uses = BitSet::new();
        let mut visited = HashSet::new();
        collect_uses(prog, root, &mut uses, &mut visited);
        live.union(&uses);
    }
    live
}

/// Every incoming phi edge's source register is live at the end of the
/// corresponding predecessor, even though the phi itself is not a root and
/// so is invisible to `process_block`'s per-instruction sweep.
fn phi_contribution(prog: &Program, pred: BlockRef, succ: BlockRef, out: &mut BitSet) {
    let pred_idx = match prog.blocks[succ].predecessors.iter().position(|&p| p == pred) {
        Some(i) => i,
        None => return,
    };
    for &phi in &prog.blocks[succ].phis {
        let source = match &prog.nodes.get(phi).variant {
            NodeVariant::Phi { sources, .. } => sources[pred_idx],
            _ => continue,
        };
        if let NodeVariant::LoadReg { reg, component_offset } = &prog.nodes.get(source).variant {
            let size = prog.nodes.get(source).size;
            let base = reg.index() * 4;
            for c in *component_offset as usize..(*component_offset as usize + size as usize) {
                out.insert(base + c);
            }
        }
    }
}

/// Recompute every block's `live_in_virt` to a fixed point (spec §4.8).
pub fn run(prog: &mut Program) {
    let blocks: Vec<BlockRef> = prog.blocks.keys().collect();
    loop {
        let mut changed = false;
        for &b in blocks.iter().rev() {
            let succs = prog.blocks[b].successors.clone();
            let mut live_out = BitSet::new();
            for &s in &succs {
                live_out.union(&prog.blocks[s].live_in_virt);
                phi_contribution(prog, b, s, &mut live_out);
            }
            let new_live_in = process_block(prog, b, live_out);
            if new_live_in != prog.blocks[b].live_in_virt {
                prog.blocks[b].live_in_virt = new_live_in;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gp::node::GpOp;

    #[test]
    fn register_is_live_in_only_where_used_not_where_defined() {
        let mut prog = Program::new();
        let entry = prog.new_block();
        let exit = prog.new_block();
        prog.blocks[entry].successors = vec![exit];
        prog.blocks[exit].predecessors = vec![entry];

        let r = prog.new_reg(1);
        let c = prog.nodes.alloc(GpOp::Const, 1, NodeVariant::Const { value: [1.0; 4] });
        let store = prog.nodes.alloc(GpOp::StoreReg, 1, NodeVariant::StoreReg { reg: r, child: c });
        prog.nodes.link(store, c, None);
        prog.regs[r].add_def(store);
        prog.blocks[entry].push_root(store);

        let load = prog.nodes.alloc(GpOp::LoadReg, 1, NodeVariant::LoadReg { reg: r, component_offset: 0 });
        prog.regs[r].add_use(load);
        let out_reg = prog.new_reg(1);
        let consumer = prog.nodes.alloc(GpOp::StoreReg, 1, NodeVariant::StoreReg { reg: out_reg, child: load });
        prog.nodes.link(consumer, load, None);
        prog.regs[out_reg].add_def(consumer);
        prog.blocks[exit].push_root(consumer);

        run(&mut prog);

        let bit = r.index() * 4;
        assert!(prog.blocks[exit].live_in_virt.get(bit));
        assert!(!prog.blocks[entry].live_in_virt.get(bit));
    }

    #[test]
    fn phi_source_register_is_live_out_of_its_predecessor() {
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
        let src_b = prog.nodes.alloc(GpOp::LoadReg, 1, NodeVariant::LoadReg { reg: b, component_offset: 0 });
        let phi = prog.nodes.alloc(
            GpOp::Phi,
            1,
            NodeVariant::Phi { reg: dest, sources: vec![src_a, src_b] },
        );
        prog.blocks[join].phis.push(phi);

        run(&mut prog);

        assert!(prog.blocks[then_b].live_in_virt.get(a.index() * 4));
        assert!(prog.blocks[else_b].live_in_virt.get(b.index() * 4));
    }
}
