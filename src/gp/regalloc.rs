//! Graph-coloring physical register allocation for the GP IR (spec §4.9).
//!
//! Ground: `examples/original_source/src/lima/gp_ir/regalloc.c`'s
//! Runeson-Nyström class-vector simplify/select scheme, transcribed with
//! the same `p`/`q` tables; the interference computation itself follows
//! the same backward per-instruction sweep as [`crate::gp::liveness`], just
//! at register (not per-component) granularity, since two registers
//! interfere as whole units regardless of which of their components
//! actually overlap in time.

use crate::entity::EntityRef;
use crate::gp::block::BlockRef;
use crate::gp::node::{GpOp, NodeRef, NodeVariant};
use crate::gp::program::Program;
use crate::gp::reg::{PhysReg, RegRef};
use std::collections::{HashMap, HashSet};

const P: [u32; 4] = [64, 48, 32, 16];

fn q(size_a: u8, size_b: u8) -> u32 {
    const TABLE: [[u32; 4]; 4] = [
        [1, 2, 3, 4],
        [2, 3, 3, 3],
        [2, 2, 2, 2],
        [1, 1, 1, 1],
    ];
    TABLE[size_a as usize - 1][size_b as usize - 1]
}

fn collect_used_regs(prog: &Program, n: NodeRef, out: &mut HashSet<RegRef>, visited: &mut HashSet<NodeRef>) {
    if !visited.insert(n) {
        return;
    }
    if let NodeVariant::LoadReg { reg, .. } = &prog.nodes.get(n).variant {
        out.insert(*reg);
    }
    for c in prog.nodes.get(n).children() {
        collect_used_regs(prog, c, out, visited);
    }
}

fn successor_live_out(
    prog: &Program,
    b: BlockRef,
    live_in: &HashMap<BlockRef, HashSet<RegRef>>,
) -> HashSet<RegRef> {
    let mut live = HashSet::new();
    for &s in &prog.blocks[b].successors {
        live.extend(live_in.get(&s).cloned().unwrap_or_default());
        if let Some(idx) = prog.blocks[s].predecessors.iter().position(|&p| p == b) {
            for &phi in &prog.blocks[s].phis {
                if let NodeVariant::Phi { sources, .. } = &prog.nodes.get(phi).variant {
                    if let NodeVariant::LoadReg { reg, .. } = &prog.nodes.get(sources[idx]).variant {
                        live.insert(*reg);
                    }
                }
            }
        }
    }
    live
}

fn compute_reg_liveness(prog: &Program, blocks: &[BlockRef]) -> HashMap<BlockRef, HashSet<RegRef>> {
    let mut live_in: HashMap<BlockRef, HashSet<RegRef>> = blocks.iter().map(|&b| (b, HashSet::new())).collect();
    loop {
        let mut changed = false;
        for &b in blocks.iter().rev() {
            let mut live = successor_live_out(prog, b, &live_in);
            for &root in prog.blocks[b].roots.iter().rev() {
                if let NodeVariant::StoreReg { reg, .. } = &prog.nodes.get(root).variant {
                    live.remove(reg);
                }
                let mut visited = HashSet::new();
                collect_used_regs(prog, root, &mut live, &mut visited);
            }
            if live != live_in[&b] {
                live_in.insert(b, live);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    live_in
}

fn build_interference(
    prog: &Program,
    blocks: &[BlockRef],
    live_in: &HashMap<BlockRef, HashSet<RegRef>>,
) -> HashMap<RegRef, HashSet<RegRef>> {
    let mut graph: HashMap<RegRef, HashSet<RegRef>> = HashMap::new();
    for &b in blocks {
        let mut live = successor_live_out(prog, b, live_in);
        for &root in prog.blocks[b].roots.iter().rev() {
            if let NodeVariant::StoreReg { reg, .. } = &prog.nodes.get(root).variant {
                for &other in &live {
                    if other != *reg {
                        graph.entry(*reg).or_default().insert(other);
                        graph.entry(other).or_default().insert(*reg);
                    }
                }
                graph.entry(*reg).or_default();
                live.remove(reg);
            }
            let mut visited = HashSet::new();
            collect_used_regs(prog, root, &mut live, &mut visited);
        }
    }
    graph
}

fn spill_cost(prog: &Program, reg: RegRef) -> f64 {
    if prog.regs[reg].phys.is_some() {
        return f64::INFINITY;
    }
    (prog.regs[reg].uses.len() + prog.regs[reg].defs.len()) as f64
}

fn try_color(prog: &Program, graph: &HashMap<RegRef, HashSet<RegRef>>, reg: RegRef) -> Option<PhysReg> {
    let size = prog.regs[reg].size;
    let empty = HashSet::new();
    let neighbors = graph.get(&reg).unwrap_or(&empty);
    for idx in 0u8..16 {
        for k in 0..=(4 - size) {
            let conflict = neighbors.iter().any(|&n| match prog.regs[n].phys {
                Some(p) if p.index == idx => {
                    let n_size = prog.regs[n].size;
                    k < p.offset + n_size && p.offset < k + size
                }
                _ => false,
            });
            if !conflict {
                return Some(PhysReg { index: idx, offset: k });
            }
        }
    }
    None
}

fn replace_root(prog: &mut Program, old: NodeRef, new: NodeRef) {
    let blocks: Vec<_> = prog.blocks.keys().collect();
    for b in blocks {
        if let Some(pos) = prog.blocks[b].roots.iter().position(|&r| r == old) {
            prog.blocks[b].roots[pos] = new;
            return;
        }
    }
}

/// Rewrite every use/def of `reg` to `load_temp`/`store_temp` against a
/// fresh slot (spec §4.9, "registers that end up with a physical index
/// >= 16 are spilled").
fn spill_register(prog: &mut Program, reg: RegRef) {
    let temp_index = prog.alloc_temp();

    let uses: Vec<NodeRef> = prog.regs[reg].uses.iter().copied().collect();
    for u in uses {
        let size = prog.nodes.get(u).size;
        let new = prog.nodes.alloc(GpOp::LoadTemp, size, NodeVariant::Load { index: temp_index, offset_reg: None });
        prog.nodes.replace(u, new);
    }

    let defs: Vec<NodeRef> = prog.regs[reg].defs.iter().copied().collect();
    for d in defs {
        let (child, size) = match &prog.nodes.get(d).variant {
            NodeVariant::StoreReg { child, .. } => (*child, prog.nodes.get(d).size),
            _ => continue,
        };
        let mask = (1u8 << size) - 1;
        let new = prog.nodes.alloc(
            GpOp::StoreTemp,
            size,
            NodeVariant::Store { child, mask, index: temp_index, offset_reg: None },
        );
        prog.nodes.link(new, child, None);
        replace_root(prog, d, new);
        prog.nodes.delete(d);
    }

    prog.regs[reg].defs.clear();
    prog.regs[reg].uses.clear();
}

/// Color every virtual register with a physical register, spilling to temp
/// memory where the interference graph doesn't fit in the 16 physical
/// banks (spec §4.9).
pub fn run(prog: &mut Program) {
    let blocks: Vec<BlockRef> = prog.blocks.keys().collect();
    let live_in = compute_reg_liveness(prog, &blocks);
    let graph = build_interference(prog, &blocks, &live_in);

    let mut remaining: HashSet<RegRef> = prog
        .regs
        .keys()
        .filter(|&r| prog.regs[r].phys.is_none())
        .collect();
    let mut stack: Vec<RegRef> = Vec::new();

    while !remaining.is_empty() {
        let mut picked = None;
        for &r in &remaining {
            let size = prog.regs[r].size;
            let cost: u32 = graph
                .get(&r)
                .map(|ns| {
                    ns.iter()
                        .filter(|n| remaining.contains(n))
                        .map(|&n| q(size, prog.regs[n].size))
                        .sum()
                })
                .unwrap_or(0);
            if cost < P[size as usize - 1] {
                picked = Some(r);
                break;
            }
        }
        let choice = picked.unwrap_or_else(|| {
            *remaining
                .iter()
                .min_by(|&&a, &&b| spill_cost(prog, a).partial_cmp(&spill_cost(prog, b)).unwrap())
                .unwrap()
        });
        remaining.remove(&choice);
        stack.push(choice);
    }

    let mut spilled = Vec::new();
    while let Some(reg) = stack.pop() {
        match try_color(prog, &graph, reg) {
            Some(p) => prog.regs[reg].phys = Some(p),
            None => spilled.push(reg),
        }
    }
    for reg in spilled {
        spill_register(prog, reg);
    }

    prog.compact_registers();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gp::node::GpOp;

    #[test]
    fn two_simultaneously_live_registers_get_distinct_physical_slots() {
        let mut prog = Program::new();
        let block = prog.new_block();
        let a = prog.new_reg(4);
        let b = prog.new_reg(4);

        let ca = prog.nodes.alloc(GpOp::Const, 4, NodeVariant::Const { value: [1.0; 4] });
        let store_a = prog.nodes.alloc(GpOp::StoreReg, 4, NodeVariant::StoreReg { reg: a, child: ca });
        prog.nodes.link(store_a, ca, None);
        prog.regs[a].add_def(store_a);
        prog.blocks[block].push_root(store_a);

        let cb = prog.nodes.alloc(GpOp::Const, 4, NodeVariant::Const { value: [2.0; 4] });
        let store_b = prog.nodes.alloc(GpOp::StoreReg, 4, NodeVariant::StoreReg { reg: b, child: cb });
        prog.nodes.link(store_b, cb, None);
        prog.regs[b].add_def(store_b);
        prog.blocks[block].push_root(store_b);

        let load_a = prog.nodes.alloc(GpOp::LoadReg, 4, NodeVariant::LoadReg { reg: a, component_offset: 0 });
        prog.regs[a].add_use(load_a);
        let load_b = prog.nodes.alloc(GpOp::LoadReg, 4, NodeVariant::LoadReg { reg: b, component_offset: 0 });
        prog.regs[b].add_use(load_b);
        let sum = prog.nodes.alloc(
            GpOp::Add,
            4,
            NodeVariant::Alu { children: vec![load_a, load_b], src_negate: vec![false, false], dest_negate: false },
        );
        prog.nodes.link(sum, load_a, None);
        prog.nodes.link(sum, load_b, None);
        let out = prog.new_reg(4);
        let store_out = prog.nodes.alloc(GpOp::StoreReg, 4, NodeVariant::StoreReg { reg: out, child: sum });
        prog.nodes.link(store_out, sum, None);
        prog.regs[out].add_def(store_out);
        prog.blocks[block].push_root(store_out);

        run(&mut prog);

        let pa = prog.regs[a].phys.expect("a colored");
        let pb = prog.regs[b].phys.expect("b colored");
        assert_ne!(pa.index, pb.index);
    }

    #[test]
    fn spilling_rewrites_to_temp_load_and_store() {
        let mut prog = Program::new();
        let block = prog.new_block();
        // Force a spill by making one 4-wide register interfere with 16
        // other simultaneously-live 4-wide registers, exceeding p[3]=16.
        let mut regs = Vec::new();
        for i in 0..17 {
            let r = prog.new_reg(4);
            let c = prog.nodes.alloc(GpOp::Const, 4, NodeVariant::Const { value: [i as f32; 4] });
            let store = prog.nodes.alloc(GpOp::StoreReg, 4, NodeVariant::StoreReg { reg: r, child: c });
            prog.nodes.link(store, c, None);
            prog.regs[r].add_def(store);
            prog.blocks[block].push_root(store);
            regs.push(r);
        }
        // A single tail instruction uses all of them at once, so they are
        // all simultaneously live right before it.
        let loads: Vec<NodeRef> = regs
            .iter()
            .map(|&r| {
                let l = prog.nodes.alloc(GpOp::LoadReg, 4, NodeVariant::LoadReg { reg: r, component_offset: 0 });
                prog.regs[r].add_use(l);
                l
            })
            .collect();
        let mut acc = loads[0];
        for &l in &loads[1..] {
            let next = prog.nodes.alloc(
                GpOp::Add,
                4,
                NodeVariant::Alu { children: vec![acc, l], src_negate: vec![false, false], dest_negate: false },
            );
            prog.nodes.link(next, acc, None);
            prog.nodes.link(next, l, None);
            acc = next;
        }
        let out = prog.new_reg(4);
        let store_out = prog.nodes.alloc(GpOp::StoreReg, 4, NodeVariant::StoreReg { reg: out, child: acc });
        prog.nodes.link(store_out, acc, None);
        prog.regs[out].add_def(store_out);
        prog.blocks[block].push_root(store_out);

        run(&mut prog);

        let has_temp_op = prog.blocks[block]
            .roots
            .iter()
            .any(|&r| matches!(prog.nodes.get(r).op, GpOp::StoreTemp));
        assert!(has_temp_op, "expected at least one spilled register rewritten to store_temp");
    }
}
