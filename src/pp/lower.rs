//! Lowering from the shared HIR ([`crate::hir`]) into the PP LIR
//! ([`crate::pp::lir`]): one instruction (and initially one single-slot
//! bundle) per command, so later passes (`schedule`, `combine`, `peephole`)
//! have uniform single-instruction bundles to merge rather than special-case
//! a bulk initial packing.
//!
//! Ground: `examples/original_source/src/lima/pp_hir/lower.c`'s
//! `add_regs`/HIR-to-LIR walk, which builds one LIR register and
//! instruction per HIR value the same way before any scheduling runs.

use crate::hir;
use crate::pp::lir::{Bundle, BundleRef, InstRef, Instruction, PipelineReg, PpOp, PpRegRef, PpSrc, Program};
use std::collections::HashMap;

fn lower_operand(
    prog: &mut Program,
    values: &mut HashMap<hir::Value, PpRegRef>,
    operand: hir::Operand,
) -> PpSrc {
    match operand {
        hir::Operand::Value(v) => PpSrc::Reg(*values.entry(v).or_insert_with(|| prog.new_reg(4))),
        hir::Operand::Const(c) => {
            let r = prog.new_reg(4);
            let inst = prog.new_inst(Instruction {
                op: PpOp::Const,
                size: 4,
                sources: vec![],
                dest: Some(r),
                write_mask: 0b1111,
                possible_alu_instr_pos: 0b1111,
                const_value: Some(c),
            });
            prog.regs[r].defs.insert(inst);
            PpSrc::Reg(r)
        }
        hir::Operand::FramebufferColor => PpSrc::Pipeline(PipelineReg::FramebufferColor),
        hir::Operand::FramebufferDepth => PpSrc::Pipeline(PipelineReg::FramebufferDepth),
        hir::Operand::FramebufferStencil => PpSrc::Pipeline(PipelineReg::FramebufferStencil),
    }
}

/// Lower a single-value output slot (color, depth, or stencil) into its own
/// one-instruction bundle, the same shape [`run`] uses for the color output.
fn lower_output(
    prog: &mut Program,
    hir_prog: &hir::Program,
    values: &mut HashMap<hir::Value, PpRegRef>,
    out_cmd: hir::Command,
    op: PpOp,
    set_slot: fn(&mut Bundle, InstRef),
) -> BundleRef {
    let out_val = hir_prog.commands[out_cmd].result;
    let src_reg = *values.entry(out_val).or_insert_with(|| prog.new_reg(4));
    let inst = prog.new_inst(Instruction {
        op,
        size: 4,
        sources: vec![PpSrc::Reg(src_reg), PpSrc::Pipeline(PipelineReg::Discard)],
        dest: None,
        write_mask: 0b1111,
        possible_alu_instr_pos: 0,
        const_value: None,
    });
    prog.regs[src_reg].uses.insert(inst);
    let mut bundle = Bundle::new();
    set_slot(&mut bundle, inst);
    prog.bundles.push(bundle)
}

/// Lower every block in `hir_prog` into a [`Program`], producing one bundle
/// per lowered instruction in program order.
pub fn run(hir_prog: &hir::Program) -> Program {
    let mut prog = Program::new();
    let mut values: HashMap<hir::Value, PpRegRef> = HashMap::new();

    for block in hir_prog.block_order() {
        let data = &hir_prog.blocks[block];
        let mut bundles = Vec::new();

        for &cmd in &data.commands {
            let cmd_data = &hir_prog.commands[cmd];
            let dest = *values.entry(cmd_data.result).or_insert_with(|| prog.new_reg(cmd_data.size));
            let sources: Vec<PpSrc> = cmd_data
                .args
                .iter()
                .map(|&a| lower_operand(&mut prog, &mut values, a))
                .collect();
            let inst = prog.new_inst(Instruction {
                op: PpOp::Alu(cmd_data.op),
                size: cmd_data.size,
                sources,
                dest: Some(dest),
                write_mask: (1u8 << cmd_data.size) - 1,
                possible_alu_instr_pos: 0b1111,
                const_value: None,
            });
            let srcs = prog.insts[inst].sources.clone();
            for src in &srcs {
                if let PpSrc::Reg(r) = src {
                    prog.regs[*r].uses.insert(inst);
                }
            }
            prog.regs[dest].defs.insert(inst);

            let mut bundle = Bundle::new();
            bundle.slots[0] = Some(inst);
            bundles.push(prog.bundles.push(bundle));
        }

        if data.discards {
            let inst = prog.new_inst(Instruction {
                op: PpOp::Discard,
                size: 1,
                sources: vec![],
                dest: None,
                write_mask: 0,
                possible_alu_instr_pos: 0,
                const_value: None,
            });
            let mut bundle = Bundle::new();
            bundle.branch = Some(inst);
            bundles.push(prog.bundles.push(bundle));
        }

        if data.branch != hir::BranchCond::Always {
            let sources = data
                .cond_sources
                .iter()
                .flatten()
                .map(|&v| PpSrc::Reg(*values.entry(v).or_insert_with(|| prog.new_reg(1))))
                .collect();
            let inst = prog.new_inst(Instruction {
                op: PpOp::Branch,
                size: 1,
                sources,
                dest: None,
                write_mask: 0,
                possible_alu_instr_pos: 0,
                const_value: None,
            });
            let mut bundle = Bundle::new();
            bundle.branch = Some(inst);
            bundles.push(prog.bundles.push(bundle));
        }

        if let Some(out_cmd) = data.output {
            bundles.push(lower_output(&mut prog, hir_prog, &mut values, out_cmd, PpOp::StoreTemp, |b, i| {
                b.temp_store = Some(i);
            }));
        }
        if let Some(out_cmd) = data.output_depth {
            bundles.push(lower_output(&mut prog, hir_prog, &mut values, out_cmd, PpOp::StoreDepth, |b, i| {
                b.depth_store = Some(i);
            }));
        }
        if let Some(out_cmd) = data.output_stencil {
            bundles.push(lower_output(&mut prog, hir_prog, &mut values, out_cmd, PpOp::StoreStencil, |b, i| {
                b.stencil_store = Some(i);
            }));
        }

        prog.block_bundles.insert(block, bundles);
    }

    prog
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{Op, Operand, Program as HirProgram};

    #[test]
    fn lowers_one_bundle_per_command() {
        let mut hp = HirProgram::new();
        let b0 = hp.new_block();
        let v0 = hp.push_command(b0, Op::Mov, 4, vec![Operand::Const([1.0; 4])]);
        hp.push_command(b0, Op::Add, 4, vec![Operand::Value(v0), Operand::Value(v0)]);

        let pp = run(&hp);
        let bundles = &pp.block_bundles[&b0];
        assert_eq!(bundles.len(), 2);
    }
}
