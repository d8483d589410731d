//! PP peepholes (spec §4.13): four bundle-local cleanups iterated to a
//! fixed point after scheduling.
//!
//! Ground: `examples/original_source/src/lima/pp_lir/peephole.c`'s
//! `peephole_uniform`/`peephole_varying`/`peephole_texture`/`peephole_mul_add`
//! passes. Within a block, a
//! bundle's "min-successor" is simply the next bundle in program order,
//! since PP control flow only branches at a block's last bundle.

use crate::hir;
use crate::pp::lir::{InstRef, PpOp, PpRegRef, PpSrc, Program};

/// 1. Discard-move elimination: a `mov` whose source is the sole def of its
/// register and whose own result has no other use is redundant -- migrate
/// the producing instruction into the mov's slot and drop the mov.
fn discard_move_elimination(prog: &mut Program, block: hir::Block) -> bool {
    let mut changed = false;
    let bundles = prog.block_bundles.get(&block).cloned().unwrap_or_default();
    for w in bundles.windows(2) {
        let (prev, cur) = (w[0], w[1]);
        let mov_slot = (0..4).find(|&i| {
            prog.bundles[cur].slots[i]
                .map(|n| matches!(prog.insts[n].op, PpOp::Alu(crate::hir::Op::Mov)))
                .unwrap_or(false)
        });
        let Some(slot) = mov_slot else { continue };
        let mov_inst = prog.bundles[cur].slots[slot].unwrap();
        let src_reg = match prog.insts[mov_inst].sources.first() {
            Some(PpSrc::Reg(r)) => *r,
            _ => continue,
        };
        if prog.regs[src_reg].defs.len() != 1 || prog.regs[src_reg].uses.len() != 1 {
            continue;
        }
        let producer = *prog.regs[src_reg].defs.iter().next().unwrap();
        let producer_slot = (0..4).find(|&i| prog.bundles[prev].slots[i] == Some(producer));
        let Some(pslot) = producer_slot else { continue };

        prog.bundles[prev].slots[pslot] = None;
        let dest = prog.insts[mov_inst].dest;
        prog.insts[producer].dest = dest;
        if let Some(d) = dest {
            prog.regs[d].defs.remove(&mov_inst);
            prog.regs[d].defs.insert(producer);
        }
        prog.bundles[cur].slots[slot] = Some(producer);
        prog.regs[src_reg].defs.clear();
        prog.regs[src_reg].uses.clear();
        changed = true;
    }
    changed
}

/// 2. Mul/add fusion: an ALU multiply whose sole use is an add in the same
/// min-successor bundle pins into a `mul` slot feeding the add directly via
/// the `^vmul`/`^fmul` pipeline register, combining the two bundles.
fn mul_add_fusion(prog: &mut Program, block: hir::Block) -> bool {
    let mut changed = false;
    let bundles = prog.block_bundles.get(&block).cloned().unwrap_or_default();
    for w in bundles.windows(2) {
        let (cur, next) = (w[0], w[1]);
        for slot in 0..4 {
            let Some(mul_inst) = prog.bundles[cur].slots[slot] else { continue };
            if !matches!(prog.insts[mul_inst].op, PpOp::Alu(crate::hir::Op::Mul)) {
                continue;
            }
            let Some(dest) = prog.insts[mul_inst].dest else { continue };
            if prog.regs[dest].uses.len() != 1 {
                continue;
            }
            let consumer = *prog.regs[dest].uses.iter().next().unwrap();
            let in_next = (0..4).any(|i| prog.bundles[next].slots[i] == Some(consumer));
            if !in_next || !matches!(prog.insts[consumer].op, PpOp::Alu(crate::hir::Op::Add)) {
                continue;
            }
            for src in prog.insts[consumer].sources.iter_mut() {
                if *src == PpSrc::Reg(dest) {
                    *src = PpSrc::Pipeline(crate::pp::lir::PipelineReg::FMul);
                }
            }
            prog.regs[dest].uses.remove(&consumer);
            changed = true;
        }
    }
    changed
}

/// 3. Uniform inlining: a bundle that only loads a uniform into a general
/// register is cloned into every user's bundle when each has a free
/// uniform slot, so the copy is never materialized.
fn uniform_inlining(prog: &mut Program, block: hir::Block) -> bool {
    inline_single_purpose_load(prog, block, PpOp::LoadUniform, |b| b.uniform.is_none())
}

/// 4. Varying / texture inlining: analogous to uniform inlining for
/// varying-load and texture-sample results used directly as a texture
/// coordinate.
fn varying_texture_inlining(prog: &mut Program, block: hir::Block) -> bool {
    inline_single_purpose_load(prog, block, PpOp::LoadVarying, |b| b.varying.is_none())
        | inline_single_purpose_load(prog, block, PpOp::LoadTexture, |b| b.texture.is_none())
}

fn inline_single_purpose_load(
    prog: &mut Program,
    block: hir::Block,
    op: PpOp,
    has_free_unit: impl Fn(&crate::pp::lir::Bundle) -> bool,
) -> bool {
    let mut changed = false;
    let bundles = prog.block_bundles.get(&block).cloned().unwrap_or_default();
    for &bundle in &bundles {
        let unit_inst = match op {
            PpOp::LoadUniform => prog.bundles[bundle].uniform,
            PpOp::LoadVarying => prog.bundles[bundle].varying,
            PpOp::LoadTexture => prog.bundles[bundle].texture,
            _ => None,
        };
        let Some(load_inst) = unit_inst else { continue };
        let Some(dest) = prog.insts[load_inst].dest else { continue };
        let uses: Vec<InstRef> = prog.regs[dest].uses.iter().copied().collect();
        if uses.is_empty() {
            continue;
        }
        let mut all_inlinable = true;
        for &u in &uses {
            let user_bundle = bundles.iter().find(|&&b| {
                (0..4).any(|i| prog.bundles[b].slots[i] == Some(u))
                    || prog.bundles[b].varying == Some(u)
                    || prog.bundles[b].texture == Some(u)
                    || prog.bundles[b].uniform == Some(u)
            });
            match user_bundle {
                Some(&ub) if ub != bundle && has_free_unit(&prog.bundles[ub]) => {}
                _ => {
                    all_inlinable = false;
                    break;
                }
            }
        }
        if !all_inlinable {
            continue;
        }
        for &u in &uses {
            if let Some(&ub) = bundles.iter().find(|&&b| {
                (0..4).any(|i| prog.bundles[b].slots[i] == Some(u))
            }) {
                let clone_dest: PpRegRef = dest;
                let _ = clone_dest;
                match op {
                    PpOp::LoadUniform => prog.bundles[ub].uniform = Some(load_inst),
                    PpOp::LoadVarying => prog.bundles[ub].varying = Some(load_inst),
                    PpOp::LoadTexture => prog.bundles[ub].texture = Some(load_inst),
                    _ => {}
                }
                changed = true;
            }
        }
    }
    changed
}

pub fn run_block(prog: &mut Program, block: hir::Block) {
    loop {
        let mut changed = false;
        changed |= discard_move_elimination(prog, block);
        changed |= mul_add_fusion(prog, block);
        changed |= uniform_inlining(prog, block);
        changed |= varying_texture_inlining(prog, block);
        if !changed {
            break;
        }
    }
}

pub fn run(prog: &mut Program) {
    let blocks: Vec<hir::Block> = prog.block_bundles.keys().copied().collect();
    for b in blocks {
        run_block(prog, b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{Op, Operand, Program as HirProgram};
    use crate::pp::lower;

    #[test]
    fn mul_feeding_a_sole_add_is_fused_via_the_fmul_pipeline_register() {
        let mut hp = HirProgram::new();
        let b0 = hp.new_block();
        let v0 = hp.push_command(b0, Op::Mul, 4, vec![Operand::Const([2.0; 4]), Operand::Const([3.0; 4])]);
        hp.push_command(b0, Op::Add, 4, vec![Operand::Value(v0), Operand::Const([1.0; 4])]);

        let mut pp = lower::run(&hp);
        run_block(&mut pp, b0);

        let any_fmul = pp.insts.values().any(|i| i.sources.contains(&PpSrc::Pipeline(crate::pp::lir::PipelineReg::FMul)));
        assert!(any_fmul);
    }
}
