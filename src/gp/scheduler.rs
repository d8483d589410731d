//! GP bundle packing: linear root list -> scheduled VLIW bundles (spec
//! §4.11).
//!
//! Ground: `examples/original_source/src/lima/gp_ir/scheduler.h`'s
//! per-slot bundle layout (`mul_slots`, `add_slots`, `complex_slot`,
//! `pass_slot`, `branch_slot`, `uniform_slot`, `attr_reg_slot`,
//! `reg_slot`, `store_slot`) and `scheduler_helper.c`'s min/max-distance
//! rules this module's placement loop uses: two multiply slots, two add
//! slots, one complex unit, one passthrough, one branch, one uniform
//! load, one attribute/register load, one second register source, and
//! four store component slots. Priority among ready nodes comes from
//! [`crate::gp::dep_info`]'s critical-path `max_dist`.

use crate::gp::block::{BlockRef, ScheduledBundle};
use crate::gp::dep_info;
use crate::gp::node::{GpOp, NodeRef};
use crate::gp::program::Program;
use std::collections::HashSet;

#[derive(Default)]
struct BundleSlots {
    mul: [Option<NodeRef>; 2],
    add: [Option<NodeRef>; 2],
    complex: Option<NodeRef>,
    passthrough: Option<NodeRef>,
    branch: Option<NodeRef>,
    uniform: Option<NodeRef>,
    attrib_or_reg: Option<NodeRef>,
    reg: Option<NodeRef>,
    store: Vec<NodeRef>,
    pending_store_children: HashSet<NodeRef>,
}

impl BundleSlots {
    fn free_alu_slots(&self) -> usize {
        self.mul.iter().filter(|s| s.is_none()).count() + self.add.iter().filter(|s| s.is_none()).count()
    }

    fn all_nodes(&self) -> Vec<NodeRef> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut push = |n: Option<NodeRef>, out: &mut Vec<NodeRef>, seen: &mut HashSet<NodeRef>| {
            if let Some(n) = n {
                if seen.insert(n) {
                    out.push(n);
                }
            }
        };
        push(self.mul[0], &mut out, &mut seen);
        push(self.mul[1], &mut out, &mut seen);
        push(self.add[0], &mut out, &mut seen);
        push(self.add[1], &mut out, &mut seen);
        push(self.complex, &mut out, &mut seen);
        push(self.passthrough, &mut out, &mut seen);
        push(self.uniform, &mut out, &mut seen);
        push(self.attrib_or_reg, &mut out, &mut seen);
        push(self.reg, &mut out, &mut seen);
        push(self.branch, &mut out, &mut seen);
        for &s in &self.store {
            push(Some(s), &mut out, &mut seen);
        }
        out
    }
}

fn place_in_pair(pair: &mut [Option<NodeRef>; 2], n: NodeRef) -> bool {
    if pair[0].is_none() {
        pair[0] = Some(n);
        true
    } else if pair[1].is_none() {
        pair[1] = Some(n);
        true
    } else {
        false
    }
}

/// Reject placing a non-store-feeding ALU op if doing so would leave fewer
/// free ALU slots than this bundle's still-unscheduled store children need.
fn would_starve_store_children(slots: &BundleSlots, n: NodeRef, is_mul_pair: bool) -> bool {
    if slots.pending_store_children.contains(&n) {
        return false;
    }
    let occupied_pair_free = if is_mul_pair {
        slots.mul.iter().filter(|s| s.is_none()).count()
    } else {
        slots.add.iter().filter(|s| s.is_none()).count()
    };
    if occupied_pair_free == 0 {
        return false;
    }
    let free_after = slots.free_alu_slots() - 1;
    free_after < slots.pending_store_children.len()
}

fn try_insert_node(slots: &mut BundleSlots, prog: &Program, n: NodeRef) -> bool {
    let op = prog.nodes.get(n).op;
    match op {
        GpOp::Select | GpOp::Complex1 => {
            if slots.mul[0].is_none() && slots.mul[1].is_none() {
                slots.mul[0] = Some(n);
                slots.mul[1] = Some(n);
                true
            } else {
                false
            }
        }
        GpOp::Mul => {
            if would_starve_store_children(slots, n, true) {
                return false;
            }
            place_in_pair(&mut slots.mul, n)
        }
        GpOp::Mov | GpOp::Neg => {
            if !would_starve_store_children(slots, n, false) && place_in_pair(&mut slots.add, n) {
                true
            } else if !would_starve_store_children(slots, n, true) && place_in_pair(&mut slots.mul, n) {
                true
            } else {
                false
            }
        }
        GpOp::Add | GpOp::Floor | GpOp::Sign | GpOp::Ge | GpOp::Lt | GpOp::Min | GpOp::Max => {
            if would_starve_store_children(slots, n, false) {
                return false;
            }
            place_in_pair(&mut slots.add, n)
        }
        GpOp::Complex2 | GpOp::Exp2Impl | GpOp::Log2Impl | GpOp::RcpImpl | GpOp::RsqrtImpl => {
            if slots.complex.is_none() {
                slots.complex = Some(n);
                true
            } else {
                false
            }
        }
        GpOp::ClampConst | GpOp::Preexp2 | GpOp::Postlog2 => {
            if slots.passthrough.is_none() {
                slots.passthrough = Some(n);
                true
            } else {
                false
            }
        }
        GpOp::BranchCond | GpOp::BranchUncond => {
            if slots.branch.is_none() {
                slots.branch = Some(n);
                true
            } else {
                false
            }
        }
        GpOp::LoadUniform => {
            if slots.uniform.is_none() {
                slots.uniform = Some(n);
                true
            } else {
                false
            }
        }
        GpOp::LoadAttribute => {
            if slots.attrib_or_reg.is_none() {
                slots.attrib_or_reg = Some(n);
                true
            } else {
                false
            }
        }
        GpOp::LoadReg => {
            if slots.attrib_or_reg.is_none() {
                slots.attrib_or_reg = Some(n);
                true
            } else if slots.reg.is_none() {
                slots.reg = Some(n);
                true
            } else {
                false
            }
        }
        op if op.is_store() => {
            let size = prog.nodes.get(n).size.max(1);
            let used: u8 = slots.store.iter().map(|&s| prog.nodes.get(s).size.max(1)).sum();
            if used + size > 4 {
                return false;
            }
            slots.store.push(n);
            for c in prog.nodes.get(n).children() {
                slots.pending_store_children.insert(c);
            }
            true
        }
        _ => false,
    }
}

fn after_insert(slots: &mut BundleSlots, n: NodeRef) {
    slots.pending_store_children.remove(&n);
}

fn collect_all_nodes(prog: &Program, b: BlockRef) -> Vec<NodeRef> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    fn walk(prog: &Program, n: NodeRef, out: &mut Vec<NodeRef>, visited: &mut HashSet<NodeRef>) {
        if !visited.insert(n) {
            return;
        }
        out.push(n);
        for c in prog.nodes.get(n).children() {
            walk(prog, c, out, visited);
        }
    }
    for &root in &prog.blocks[b].roots {
        walk(prog, root, &mut out, &mut visited);
    }
    out
}

/// Pack one block's linear root list into scheduled VLIW bundles (spec
/// §4.11). Runs the dependency builder first so `max_dist`/`dep_preds` are
/// current.
pub fn run_block(prog: &mut Program, b: BlockRef) {
    dep_info::run_block(prog, b);

    let all_nodes = collect_all_nodes(prog, b);
    let mut scheduled: HashSet<NodeRef> = HashSet::new();
    let mut bundles: Vec<ScheduledBundle> = Vec::new();

    while scheduled.len() < all_nodes.len() {
        let mut slots = BundleSlots::default();
        let mut candidates: Vec<NodeRef> = all_nodes
            .iter()
            .copied()
            .filter(|n| !scheduled.contains(n))
            .filter(|n| prog.nodes.get(*n).dep_preds.iter().all(|(p, _)| scheduled.contains(p)))
            .collect();
        candidates.sort_by_key(|&n| std::cmp::Reverse(prog.nodes.get(n).max_dist));

        let mut placed_any = false;
        loop {
            let mut progressed = false;
            for &n in &candidates {
                if scheduled.contains(&n) {
                    continue;
                }
                if try_insert_node(&mut slots, prog, n) {
                    after_insert(&mut slots, n);
                    scheduled.insert(n);
                    placed_any = true;
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }

        if !placed_any {
            // Every remaining node was rejected by slot capacity; this
            // would be a scheduling failure (spec §7) in a real compile.
            break;
        }

        let instr_index = bundles.len() as u32;
        let members = slots.all_nodes();
        for &n in &members {
            prog.nodes.get_mut(n).sched_instr = Some(instr_index);
        }
        bundles.push(ScheduledBundle { nodes: members });
    }

    prog.blocks[b].bundles = bundles;
}

pub fn run(prog: &mut Program) {
    let blocks: Vec<BlockRef> = prog.blocks.keys().collect();
    for b in blocks {
        run_block(prog, b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gp::node::NodeVariant;

    #[test]
    fn two_independent_adds_pack_into_the_same_bundle() {
        let mut prog = Program::new();
        let block = prog.new_block();

        let c0 = prog.nodes.alloc(GpOp::Const, 4, NodeVariant::Const { value: [1.0; 4] });
        let c1 = prog.nodes.alloc(GpOp::Const, 4, NodeVariant::Const { value: [2.0; 4] });
        let add0 = prog.nodes.alloc(
            GpOp::Add,
            4,
            NodeVariant::Alu { children: vec![c0, c0], src_negate: vec![false, false], dest_negate: false },
        );
        prog.nodes.link(add0, c0, None);
        let add1 = prog.nodes.alloc(
            GpOp::Add,
            4,
            NodeVariant::Alu { children: vec![c1, c1], src_negate: vec![false, false], dest_negate: false },
        );
        prog.nodes.link(add1, c1, None);

        let r0 = prog.new_reg(4);
        let s0 = prog.nodes.alloc(GpOp::StoreReg, 4, NodeVariant::StoreReg { reg: r0, child: add0 });
        prog.nodes.link(s0, add0, None);
        prog.regs[r0].add_def(s0);
        prog.blocks[block].push_root(s0);

        let r1 = prog.new_reg(4);
        let s1 = prog.nodes.alloc(GpOp::StoreReg, 4, NodeVariant::StoreReg { reg: r1, child: add1 });
        prog.nodes.link(s1, add1, None);
        prog.regs[r1].add_def(s1);
        prog.blocks[block].push_root(s1);

        run_block(&mut prog, block);

        assert!(!prog.blocks[block].bundles.is_empty());
        let every_node_scheduled = [c0, c1, add0, add1, s0, s1]
            .iter()
            .all(|&n| prog.nodes.get(n).sched_instr.is_some());
        assert!(every_node_scheduled);
    }
}
