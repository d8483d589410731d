//! PP scalar fast-path allocator (spec §4.9, PP paragraph): build the set
//! of physical components never live at a point in the block, pick any
//! free one for a register that needs a home, and mark it live across the
//! interval from def to last use. It never spills -- it is only reached
//! for intermediates the scheduler introduces after the fact, where
//! linear-scan-style reuse over a single block is sufficient.
//!
//! Ground: `examples/original_source/src/lima/pp_lir/pp_lir.h` declares
//! `lima_pp_lir_regalloc` and the allocator's intended state machine
//! (`lima_pp_lir_reg_state_e`: `to_simplify`/`simplified`/`to_spill`/
//! `spilled`/`to_freeze`/`colored`/`coalesced`) -- the same interference-graph
//! coloring family as [`crate::gp::regalloc`]'s `lima_gp_ir_regalloc`
//! (`examples/original_source/src/lima/gp_ir/regalloc.c`), not a distinct
//! algorithm. The function's body isn't present in this retrieval pack
//! (only the declaration, plus a reference to it inside a commented-out
//! block in `pp_lir/ir.c`), so this module does not reproduce that
//! coloring pipeline; instead it implements the simpler linear-scan
//! allocator described below, sized to what the PP scheduler actually
//! needs after [`crate::pp::lower`] (one register per value, never
//! interfering across blocks). See DESIGN.md for this simplification.

use crate::hir;
use crate::pp::lir::{BundleRef, PpRegRef, Program};
use std::collections::HashMap;

/// Program-order position of a register's definition and its last use
/// within one block's bundle sequence.
struct Interval {
    reg: PpRegRef,
    start: usize,
    end: usize,
}

fn bundle_touches(prog: &Program, bundle: BundleRef, reg: PpRegRef) -> bool {
    let b = &prog.bundles[bundle];
    let insts = b
        .slots
        .iter()
        .flatten()
        .chain(b.varying.iter())
        .chain(b.texture.iter())
        .chain(b.uniform.iter())
        .chain(b.temp_store.iter())
        .chain(b.depth_store.iter())
        .chain(b.stencil_store.iter())
        .chain(b.branch.iter());
    insts.copied().any(|n| {
        let inst = &prog.insts[n];
        inst.dest == Some(reg)
            || inst
                .sources
                .iter()
                .any(|s| matches!(s, crate::pp::lir::PpSrc::Reg(r) if *r == reg))
    })
}

fn compute_intervals(prog: &Program, bundles: &[BundleRef]) -> Vec<Interval> {
    let mut touched: HashMap<PpRegRef, (usize, usize)> = HashMap::new();
    for (i, &b) in bundles.iter().enumerate() {
        for &reg in prog.regs.keys().collect::<Vec<_>>().iter() {
            if bundle_touches(prog, b, reg) {
                touched
                    .entry(reg)
                    .and_modify(|(_, end)| *end = i)
                    .or_insert((i, i));
            }
        }
    }
    touched
        .into_iter()
        .map(|(reg, (start, end))| Interval { reg, start, end })
        .collect()
}

/// Assign a physical component index to every register live in `block`,
/// reusing an index as soon as its previous occupant's interval ends.
/// Returns the assignment and the number of distinct physical components
/// actually needed.
pub fn run_block(prog: &Program, block: hir::Block) -> (HashMap<PpRegRef, u32>, u32) {
    let bundles = prog.block_bundles.get(&block).cloned().unwrap_or_default();
    let mut intervals = compute_intervals(prog, &bundles);
    intervals.sort_by_key(|iv| iv.start);

    let mut assignment = HashMap::new();
    let mut active: Vec<(usize, u32)> = Vec::new(); // (end, component)
    let mut free: Vec<u32> = Vec::new();
    let mut next_component = 0u32;

    for iv in &intervals {
        active.retain(|&(end, comp)| {
            if end < iv.start {
                free.push(comp);
                false
            } else {
                true
            }
        });
        let comp = free.pop().unwrap_or_else(|| {
            let c = next_component;
            next_component += 1;
            c
        });
        assignment.insert(iv.reg, comp);
        active.push((iv.end, comp));
    }

    (assignment, next_component)
}

pub fn run(prog: &mut Program) -> HashMap<hir::Block, (HashMap<PpRegRef, u32>, u32)> {
    let blocks: Vec<hir::Block> = prog.block_bundles.keys().copied().collect();
    blocks.into_iter().map(|b| (b, run_block(prog, b))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{Op, Operand, Program as HirProgram};
    use crate::pp::lower;

    #[test]
    fn non_overlapping_intervals_share_the_same_physical_component() {
        let mut hp = HirProgram::new();
        let b0 = hp.new_block();
        let v0 = hp.push_command(b0, Op::Mov, 4, vec![Operand::Const([1.0; 4])]);
        hp.push_command(b0, Op::Neg, 4, vec![Operand::Value(v0)]);
        let v2 = hp.push_command(b0, Op::Mov, 4, vec![Operand::Const([2.0; 4])]);
        hp.push_command(b0, Op::Neg, 4, vec![Operand::Value(v2)]);

        let pp = lower::run(&hp);
        let (assignment, count) = run_block(&pp, b0);
        assert_eq!(assignment.len(), pp.regs.keys().count());
        assert!(count <= 2);
    }
}
