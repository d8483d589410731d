//! Dependency-info builder for the GP IR (spec §4.10).
//!
//! Ground: `examples/original_source/src/lima/gp_ir/dep_info.c`'s
//! `lima_gp_ir_dep_info_t` pred/succ edge records (`dep_info_insert`,
//! `is_child_dep`/`is_offset` tagging) and the scheduler's need for a single combined
//! predecessor/successor graph per block -- [`crate::gp::node::DepDist`]
//! already carries the min/max latency fields this builder fills in.
//!
//! Three kinds of edge land in the same `dep_preds`/`dep_succs` lists:
//! structural operand edges (`is_child_dep`), and the WAR/RAW/WAW memory
//! edges this module discovers by walking each block's roots in program
//! order. Temp addressing in this IR goes through `offset_reg` (a register
//! read, not a DAG child), so unlike the original C source there is no
//! separate "is address operand" node to tag.

use crate::entity::EntityRef;
use crate::gp::block::BlockRef;
use crate::gp::node::{DepDist, GpOp, NodeRef, NodeVariant};
use crate::gp::program::Program;
use crate::gp::reg::RegRef;
use std::collections::{HashMap, HashSet};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum ResourceKey {
    Reg(RegRef),
    Temp(u32),
    TempOffset(RegRef),
    Varying(u32),
}

struct MemOp {
    node: NodeRef,
    key: ResourceKey,
    mask: u8,
    is_store: bool,
}

fn add_edge(prog: &mut Program, pred: NodeRef, succ: NodeRef, dist: DepDist) {
    prog.nodes.get_mut(succ).dep_preds.push((pred, dist));
    prog.nodes.get_mut(pred).dep_succs.push((succ, dist));
}

fn mem_key_and_mask(op: GpOp, variant: &NodeVariant, size: u8) -> Option<(ResourceKey, u8, bool)> {
    match (op, variant) {
        (GpOp::LoadReg, NodeVariant::LoadReg { reg, component_offset }) => {
            let mask = ((1u8 << size) - 1) << component_offset;
            Some((ResourceKey::Reg(*reg), mask, false))
        }
        (GpOp::StoreReg, NodeVariant::StoreReg { reg, .. }) => {
            let mask = (1u8 << size) - 1;
            Some((ResourceKey::Reg(*reg), mask, true))
        }
        (GpOp::LoadTemp, NodeVariant::Load { index, offset_reg }) => {
            let key = offset_reg.map(ResourceKey::TempOffset).unwrap_or(ResourceKey::Temp(*index));
            Some((key, 0b1111, false))
        }
        (
            GpOp::StoreTemp | GpOp::StoreTempLoadOff0 | GpOp::StoreTempLoadOff1 | GpOp::StoreTempLoadOff2,
            NodeVariant::Store { mask, index, offset_reg, .. },
        ) => {
            let key = offset_reg.map(ResourceKey::TempOffset).unwrap_or(ResourceKey::Temp(*index));
            Some((key, *mask, true))
        }
        (GpOp::StoreVarying, NodeVariant::Store { mask, index, .. }) => {
            Some((ResourceKey::Varying(*index), *mask, true))
        }
        _ => None,
    }
}

fn collect_ops(prog: &Program, b: BlockRef) -> Vec<MemOp> {
    let mut ops = Vec::new();
    let mut visited = HashSet::new();
    fn walk(prog: &Program, n: NodeRef, ops: &mut Vec<MemOp>, visited: &mut HashSet<NodeRef>) {
        if !visited.insert(n) {
            return;
        }
        let node = prog.nodes.get(n);
        if let Some((key, mask, is_store)) = mem_key_and_mask(node.op, &node.variant, node.size) {
            ops.push(MemOp { node: n, key, mask, is_store });
        }
        for c in node.children() {
            walk(prog, c, ops, visited);
        }
    }
    for &root in &prog.blocks[b].roots {
        walk(prog, root, &mut ops, &mut visited);
    }
    ops
}

/// Structural operand edges: `(child, node)` for every `node` and direct
/// child `c`, with `is_child_dep = true`. Load-to-use is latency 0,
/// `complex1`'s result is ready 2 cycles after its operands, every other
/// ALU-to-ALU edge is 1.
fn add_child_deps(prog: &mut Program, b: BlockRef) {
    let mut visited = HashSet::new();
    let roots = prog.blocks[b].roots.clone();
    fn walk(prog: &mut Program, n: NodeRef, visited: &mut HashSet<NodeRef>) {
        if !visited.insert(n) {
            return;
        }
        let children = prog.nodes.get(n).children();
        for c in children {
            let child_op = prog.nodes.get(c).op;
            let dist = if child_op.is_load() {
                DepDist { min_dist: 0, max_dist: 0, is_child_dep: true }
            } else if child_op == GpOp::Complex1 {
                DepDist { min_dist: 2, max_dist: 2, is_child_dep: true }
            } else {
                DepDist { min_dist: 1, max_dist: 1, is_child_dep: true }
            };
            add_edge(prog, c, n, dist);
            walk(prog, c, visited);
        }
    }
    for root in roots {
        walk(prog, root, &mut visited);
    }
}

const STORE_TO_LOAD_MIN: u32 = 3;
const STORE_TO_LOAD_MAX: u32 = 4;

fn mem_dist() -> DepDist {
    DepDist { min_dist: STORE_TO_LOAD_MIN, max_dist: STORE_TO_LOAD_MAX, is_child_dep: false }
}

/// Write-after-read/read-after-write anti-dependencies for loads, and
/// write-after-write edges between stores with no intervening read of
/// the same resource (spec §4.10).
fn add_memory_deps(prog: &mut Program, ops: &[MemOp]) {
    let mut last_store: HashMap<ResourceKey, (NodeRef, u8)> = HashMap::new();
    let mut read_since: HashSet<ResourceKey> = HashSet::new();
    for op in ops {
        if op.is_store {
            if let Some(&(prev, prev_mask)) = last_store.get(&op.key) {
                if prev_mask & op.mask != 0 && !read_since.contains(&op.key) {
                    add_edge(prog, prev, op.node, mem_dist());
                }
            }
            last_store.insert(op.key, (op.node, op.mask));
            read_since.remove(&op.key);
        } else {
            if let Some(&(store, _)) = last_store.get(&op.key) {
                add_edge(prog, store, op.node, mem_dist());
            }
            read_since.insert(op.key);
        }
    }

    let mut next_store: HashMap<ResourceKey, NodeRef> = HashMap::new();
    for op in ops.iter().rev() {
        if op.is_store {
            next_store.insert(op.key, op.node);
        } else if let Some(&store) = next_store.get(&op.key) {
            add_edge(prog, op.node, store, mem_dist());
        }
    }
}

/// `store_varying 0` and unconditional branches must be the last thing
/// scheduled in their block; force this with edges from every other
/// currently-terminal node into them.
fn enforce_tail_policy(prog: &mut Program, b: BlockRef, all_nodes: &[NodeRef]) {
    let roots = prog.blocks[b].roots.clone();
    let specials: Vec<NodeRef> = roots
        .iter()
        .copied()
        .filter(|&n| {
            let node = prog.nodes.get(n);
            match (&node.variant, node.op) {
                (NodeVariant::Store { index, .. }, GpOp::StoreVarying) => *index == 0,
                (_, GpOp::BranchUncond) => true,
                _ => false,
            }
        })
        .collect();
    for &special in &specials {
        let ends: Vec<NodeRef> = all_nodes
            .iter()
            .copied()
            .filter(|&n| n != special && prog.nodes.get(n).dep_succs.is_empty())
            .collect();
        for end in ends {
            add_edge(prog, end, special, DepDist { min_dist: 0, max_dist: 0, is_child_dep: false });
        }
    }
}

fn recompute_start_end(prog: &mut Program, b: BlockRef, all_nodes: &[NodeRef]) {
    let starts: Vec<NodeRef> = all_nodes
        .iter()
        .copied()
        .filter(|&n| prog.nodes.get(n).dep_preds.is_empty())
        .collect();
    let ends: Vec<NodeRef> = all_nodes
        .iter()
        .copied()
        .filter(|&n| prog.nodes.get(n).dep_succs.is_empty())
        .collect();
    prog.blocks[b].start_nodes = starts;
    prog.blocks[b].end_nodes = ends;
}

/// Forward topo sort computing each node's critical-path distance from the
/// block's start nodes: `max_dist(n) = max over preds p of max_dist(p) +
/// min_dist(p -> n)`.
fn compute_critical_path(prog: &mut Program, all_nodes: &[NodeRef]) {
    let mut in_degree: HashMap<NodeRef, usize> =
        all_nodes.iter().map(|&n| (n, prog.nodes.get(n).dep_preds.len())).collect();
    let mut ready: Vec<NodeRef> = all_nodes.iter().copied().filter(|n| in_degree[n] == 0).collect();
    let mut order = Vec::with_capacity(all_nodes.len());
    while let Some(n) = ready.pop() {
        order.push(n);
        let succs: Vec<NodeRef> = prog.nodes.get(n).dep_succs.iter().map(|(s, _)| *s).collect();
        for s in succs {
            let deg = in_degree.get_mut(&s).unwrap();
            *deg -= 1;
            if *deg == 0 {
                ready.push(s);
            }
        }
    }
    for n in order {
        let preds = prog.nodes.get(n).dep_preds.clone();
        let dist = preds
            .iter()
            .map(|(p, d)| prog.nodes.get(*p).max_dist + d.min_dist)
            .max()
            .unwrap_or(0);
        prog.nodes.get_mut(n).max_dist = dist;
    }
}

/// Build the full dependency graph for one block: structural edges, memory
/// anti/output dependencies, the tail-ordering policy, and the critical
/// path (spec §4.10).
pub fn run_block(prog: &mut Program, b: BlockRef) {
    add_child_deps(prog, b);
    let ops = collect_ops(prog, b);
    add_memory_deps(prog, &ops);

    let mut all_nodes = Vec::new();
    let mut visited = HashSet::new();
    let roots = prog.blocks[b].roots.clone();
    fn walk(prog: &Program, n: NodeRef, out: &mut Vec<NodeRef>, visited: &mut HashSet<NodeRef>) {
        if !visited.insert(n) {
            return;
        }
        out.push(n);
        for c in prog.nodes.get(n).children() {
            walk(prog, c, out, visited);
        }
    }
    for root in roots {
        walk(prog, root, &mut all_nodes, &mut visited);
    }

    enforce_tail_policy(prog, b, &all_nodes);
    recompute_start_end(prog, b, &all_nodes);
    compute_critical_path(prog, &all_nodes);
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
    use crate::gp::node::GpOp;

    #[test]
    fn load_gets_raw_edge_from_the_preceding_store_of_the_same_register() {
        let mut prog = Program::new();
        let block = prog.new_block();
        let r = prog.new_reg(4);

        let c = prog.nodes.alloc(GpOp::Const, 4, NodeVariant::Const { value: [1.0; 4] });
        let store = prog.nodes.alloc(GpOp::StoreReg, 4, NodeVariant::StoreReg { reg: r, child: c });
        prog.nodes.link(store, c, None);
        prog.regs[r].add_def(store);
        prog.blocks[block].push_root(store);

        let load = prog.nodes.alloc(GpOp::LoadReg, 4, NodeVariant::LoadReg { reg: r, component_offset: 0 });
        prog.regs[r].add_use(load);
        let out = prog.new_reg(4);
        let consumer = prog.nodes.alloc(GpOp::StoreReg, 4, NodeVariant::StoreReg { reg: out, child: load });
        prog.nodes.link(consumer, load, None);
        prog.regs[out].add_def(consumer);
        prog.blocks[block].push_root(consumer);

        run_block(&mut prog, block);

        let preds: Vec<NodeRef> = prog.nodes.get(load).dep_preds.iter().map(|(p, _)| *p).collect();
        assert!(preds.contains(&store));
    }

    #[test]
    fn unconditional_branch_is_forced_last_via_a_policy_edge() {
        let mut prog = Program::new();
        let block = prog.new_block();
        let target = prog.new_block();

        let r = prog.new_reg(4);
        let c = prog.nodes.alloc(GpOp::Const, 4, NodeVariant::Const { value: [1.0; 4] });
        let store = prog.nodes.alloc(GpOp::StoreReg, 4, NodeVariant::StoreReg { reg: r, child: c });
        prog.nodes.link(store, c, None);
        prog.regs[r].add_def(store);
        prog.blocks[block].push_root(store);

        let branch = prog.nodes.alloc(GpOp::BranchUncond, 0, NodeVariant::Branch { cond: None, target });
        prog.blocks[block].push_root(branch);

        run_block(&mut prog, block);

        let preds: Vec<NodeRef> = prog.nodes.get(branch).dep_preds.iter().map(|(p, _)| *p).collect();
        assert!(preds.contains(&store));
    }
}
