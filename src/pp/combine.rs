//! PP bundle combining (spec §4.12): merge a source bundle's instructions
//! into a destination bundle when constants fit and every instruction can
//! be reassigned to a same-category slot without breaking pairing, unit
//! uniqueness, or anti-commutation.
//!
//! Ground: `examples/original_source/src/lima/pp_lir/instr_combine.c`'s
//! `lima_pp_lir_instr_combine_before`/`_after`/`_indep`.

use crate::pp::lir::{Bundle, BundleRef, InstRef, Instruction, PpOp, PpSrc, Program, CONST_FILE_CAPACITY};
use std::collections::{HashMap, HashSet};

/// Whether the caller wants `other` scheduled strictly before, strictly
/// after, or has no ordering requirement relative to the destination
/// bundle. The merge mechanics below are identical in all three cases; the
/// mode only affects which candidate pairs of bundles the scheduler or
/// peephole passes offer to [`try_combine`] in the first place.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CombineMode {
    Before,
    After,
    Indep,
}

fn regs_touched(inst: &Instruction) -> HashSet<crate::pp::lir::PpRegRef> {
    let mut s: HashSet<_> = inst
        .sources
        .iter()
        .filter_map(|src| if let PpSrc::Reg(r) = src { Some(*r) } else { None })
        .collect();
    if let Some(d) = inst.dest {
        s.insert(d);
    }
    s
}

/// Two instructions can trade places unless one reads or writes a register
/// the other writes.
pub fn can_swap(prog: &Program, a: InstRef, b: InstRef) -> bool {
    let ia = &prog.insts[a];
    let ib = &prog.insts[b];
    let ra = regs_touched(ia);
    let rb = regs_touched(ib);
    if let Some(da) = ia.dest {
        if rb.contains(&da) {
            return false;
        }
    }
    if let Some(db) = ib.dest {
        if ra.contains(&db) {
            return false;
        }
    }
    true
}

fn place_const(dst0: &mut Vec<[f32; 4]>, dst1: &mut Vec<[f32; 4]>, v: [f32; 4]) -> Option<(bool, u8)> {
    if let Some(i) = dst0.iter().position(|&x| x == v) {
        return Some((false, i as u8));
    }
    if let Some(i) = dst1.iter().position(|&x| x == v) {
        return Some((true, i as u8));
    }
    if dst0.len() < CONST_FILE_CAPACITY {
        dst0.push(v);
        return Some((false, (dst0.len() - 1) as u8));
    }
    if dst1.len() < CONST_FILE_CAPACITY {
        dst1.push(v);
        return Some((true, (dst1.len() - 1) as u8));
    }
    None
}

fn remap_consts(src: &Bundle, dst0: &mut Vec<[f32; 4]>, dst1: &mut Vec<[f32; 4]>) -> Option<HashMap<(bool, u8), (bool, u8)>> {
    let mut remap = HashMap::new();
    for (i, &v) in src.const0.iter().enumerate() {
        remap.insert((false, i as u8), place_const(dst0, dst1, v)?);
    }
    for (i, &v) in src.const1.iter().enumerate() {
        remap.insert((true, i as u8), place_const(dst0, dst1, v)?);
    }
    Some(remap)
}

fn any_unit_conflict(dst: &Bundle, src: &Bundle) -> bool {
    (dst.varying.is_some() && src.varying.is_some())
        || (dst.texture.is_some() && src.texture.is_some())
        || (dst.uniform.is_some() && src.uniform.is_some())
        || (dst.temp_store.is_some() && src.temp_store.is_some())
        || (dst.depth_store.is_some() && src.depth_store.is_some())
        || (dst.stencil_store.is_some() && src.stencil_store.is_some())
        || (dst.branch.is_some() && src.branch.is_some())
}

/// Try to merge `src`'s instructions into `dst`, per spec §4.12. Leaves
/// both bundles untouched and returns `false` if the merge cannot be made
/// to fit; on success `src`'s general slots and units are emptied (the
/// caller drops the now-unused bundle).
pub fn try_combine(prog: &mut Program, dst: BundleRef, src: BundleRef, _mode: CombineMode) -> bool {
    if any_unit_conflict(&prog.bundles[dst], &prog.bundles[src]) {
        return false;
    }

    let mut dst0 = prog.bundles[dst].const0.clone();
    let mut dst1 = prog.bundles[dst].const1.clone();
    let const_remap = match remap_consts(&prog.bundles[src], &mut dst0, &mut dst1) {
        Some(m) => m,
        None => return false,
    };

    let src_slots: Vec<(usize, InstRef)> =
        prog.bundles[src].slots.iter().enumerate().filter_map(|(i, s)| s.map(|n| (i, n))).collect();

    let mut assignment: Vec<(usize, usize)> = Vec::new();
    let mut used: [bool; 4] = [
        prog.bundles[dst].slots[0].is_some(),
        prog.bundles[dst].slots[1].is_some(),
        prog.bundles[dst].slots[2].is_some(),
        prog.bundles[dst].slots[3].is_some(),
    ];
    for &(old_pos, inst) in &src_slots {
        let mask = prog.insts[inst].possible_alu_instr_pos;
        let mut placed = false;
        for new_pos in 0..4 {
            if !used[new_pos] && (mask >> new_pos) & 1 == 1 {
                used[new_pos] = true;
                assignment.push((old_pos, new_pos));
                placed = true;
                break;
            }
        }
        if !placed {
            return false;
        }
    }

    // Pairing: if two src instructions cannot swap, they must land in the
    // same destination pair bucket as each other.
    for i in 0..src_slots.len() {
        for j in (i + 1)..src_slots.len() {
            let (_, inst_a) = src_slots[i];
            let (_, inst_b) = src_slots[j];
            if !can_swap(prog, inst_a, inst_b) {
                let new_a = assignment[i].1;
                let new_b = assignment[j].1;
                if Bundle::pair_of(new_a) != Bundle::pair_of(new_b) {
                    return false;
                }
            }
        }
    }

    // Everything fits; commit.
    prog.bundles[dst].const0 = dst0;
    prog.bundles[dst].const1 = dst1;
    for &(old_pos, new_pos) in &assignment {
        let inst = prog.bundles[src].slots[old_pos].take().unwrap();
        for src_ref in prog.insts[inst].sources.iter_mut() {
            if let PpSrc::Const(file, idx) = src_ref {
                if let Some(&(nf, ni)) = const_remap.get(&(*file, *idx)) {
                    *file = nf;
                    *idx = ni;
                }
            }
        }
        prog.insts[inst].possible_alu_instr_pos = 1 << new_pos;
        prog.bundles[dst].slots[new_pos] = Some(inst);
    }

    if let Some(v) = prog.bundles[src].varying.take() {
        prog.bundles[dst].varying = Some(v);
    }
    if let Some(t) = prog.bundles[src].texture.take() {
        prog.bundles[dst].texture = Some(t);
    }
    if let Some(u) = prog.bundles[src].uniform.take() {
        prog.bundles[dst].uniform = Some(u);
    }
    if let Some(s) = prog.bundles[src].temp_store.take() {
        prog.bundles[dst].temp_store = Some(s);
    }
    if let Some(s) = prog.bundles[src].depth_store.take() {
        prog.bundles[dst].depth_store = Some(s);
    }
    if let Some(s) = prog.bundles[src].stencil_store.take() {
        prog.bundles[dst].stencil_store = Some(s);
    }
    if let Some(b) = prog.bundles[src].branch.take() {
        prog.bundles[dst].branch = Some(b);
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::Op;

    #[test]
    fn independent_instructions_combine_into_free_slots() {
        let mut prog = Program::new();
        let ra = prog.new_reg(4);
        let rb = prog.new_reg(4);
        let inst_a = prog.new_inst(Instruction {
            op: PpOp::Alu(Op::Mov),
            size: 4,
            sources: vec![],
            dest: Some(ra),
            write_mask: 0b1111,
            possible_alu_instr_pos: 0b1111,
            const_value: None,
        });
        let inst_b = prog.new_inst(Instruction {
            op: PpOp::Alu(Op::Mov),
            size: 4,
            sources: vec![],
            dest: Some(rb),
            write_mask: 0b1111,
            possible_alu_instr_pos: 0b1111,
            const_value: None,
        });
        let mut bundle_a = Bundle::new();
        bundle_a.slots[0] = Some(inst_a);
        let dst = prog.bundles.push(bundle_a);
        let mut bundle_b = Bundle::new();
        bundle_b.slots[0] = Some(inst_b);
        let src = prog.bundles.push(bundle_b);

        assert!(try_combine(&mut prog, dst, src, CombineMode::Indep));
        assert!(prog.bundles[dst].slots.iter().any(|s| *s == Some(inst_b)));
        assert!(prog.bundles[src].slots.iter().all(|s| s.is_none()));
    }
}
