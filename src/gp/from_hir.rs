//! Lowering from the shared HIR ([`crate::hir`]) into the GP node-DAG
//! (spec §4.2): the GP-specific front-end half of spec §2's "Dependency
//! order, leaves first" pipeline, upstream of SSA construction.
//!
//! Ground: `examples/original_source/src/lima/gp_ir/from_glsl.cpp`'s
//! expression-tree-to-node-DAG builders (`build_alu_single`/`build_alu_dual`
//! and friends), combined with `node.c`'s `load_reg`/`store_reg` node kinds
//! for the register-per-value construction this module uses before
//! optimization ever runs.
//!
//! Every HIR value gets its own GP register and is immediately stored to
//! it (`StoreReg`), with every later use reading it back (`LoadReg`). This
//! is the simplest correct starting point: it hands SSA construction a
//! program where every register already has exactly one def (so
//! [`crate::gp::ssa::construct`] has nothing to rename), and copy
//! elimination ([`crate::gp::reg_eliminate`]) is then responsible for
//! folding the resulting load/store pairs back into direct DAG edges
//! wherever a value is only ever used within its own block.

use crate::gp::node::{GpOp, NodeRef, NodeVariant};
use crate::gp::program::Program;
use crate::gp::reg::RegRef;
use crate::hir;
use std::collections::HashMap;

fn map_op(op: hir::Op) -> GpOp {
    use hir::Op as H;
    match op {
        H::Mov => GpOp::Mov,
        H::Add => GpOp::Add,
        H::Mul => GpOp::Mul,
        H::Neg => GpOp::Neg,
        H::Abs => GpOp::Abs,
        H::Not => GpOp::Not,
        H::Div => GpOp::Div,
        H::Mod => GpOp::Mod,
        H::Lrp => GpOp::Lrp,
        H::Floor => GpOp::Floor,
        H::Ceil => GpOp::Ceil,
        H::Fract => GpOp::Fract,
        H::Sign => GpOp::Sign,
        H::Min => GpOp::Min,
        H::Max => GpOp::Max,
        H::Ge => GpOp::Ge,
        H::Lt => GpOp::Lt,
        H::Eq => GpOp::Eq,
        H::Ne => GpOp::Ne,
        H::Rcp => GpOp::Rcp,
        H::Rsqrt => GpOp::Rsqrt,
        H::Exp2 => GpOp::Exp2,
        H::Log2 => GpOp::Log2,
        H::Sin => GpOp::Sin,
        H::Cos => GpOp::Cos,
        H::Tan => GpOp::Tan,
        H::Pow => GpOp::Pow,
        H::Sqrt => GpOp::Sqrt,
        H::Exp => GpOp::Exp,
        H::Log => GpOp::Log,
        H::F2b => GpOp::F2b,
        H::F2i => GpOp::F2i,
        H::Select => GpOp::Select,
    }
}

/// `a <cond> b` expressed with only `Ge`/`Lt`/`Eq`/`Ne`, per `GpOp`'s
/// hardware-primitive set: `Gt(a,b) = Lt(b,a)`, `Le(a,b) = Ge(b,a)`.
fn cmp_op(cond: hir::BranchCond) -> (GpOp, bool) {
    match cond {
        hir::BranchCond::Lt => (GpOp::Lt, false),
        hir::BranchCond::Ge => (GpOp::Ge, false),
        hir::BranchCond::Gt => (GpOp::Lt, true),
        hir::BranchCond::Le => (GpOp::Ge, true),
        hir::BranchCond::Eq => (GpOp::Eq, false),
        hir::BranchCond::Ne => (GpOp::Ne, false),
        hir::BranchCond::Always => unreachable!("Always has no comparison"),
    }
}

struct Ctx {
    regs: HashMap<hir::Value, RegRef>,
}

impl Ctx {
    fn reg(&self, v: hir::Value) -> RegRef {
        self.regs[&v]
    }
}

fn load(prog: &mut Program, ctx: &Ctx, v: hir::Value) -> NodeRef {
    let reg = ctx.reg(v);
    let size = prog.regs[reg].size;
    let n = prog.nodes.alloc(GpOp::LoadReg, size, NodeVariant::LoadReg { reg, component_offset: 0 });
    prog.regs[reg].add_use(n);
    n
}

fn operand(prog: &mut Program, ctx: &Ctx, op: hir::Operand) -> NodeRef {
    match op {
        hir::Operand::Value(v) => load(prog, ctx, v),
        hir::Operand::Const(c) => prog.nodes.alloc(GpOp::Const, 4, NodeVariant::Const { value: c }),
        hir::Operand::FramebufferColor | hir::Operand::FramebufferDepth | hir::Operand::FramebufferStencil => {
            panic!("framebuffer read reached the vertex (GP) lowering path")
        }
    }
}

/// Translate a whole HIR program into a fresh GP program, one register per
/// HIR value and one GP block per HIR block, preserving block order and
/// edges.
pub fn lower_program(hir_prog: &hir::Program) -> Program {
    let mut prog = Program::new();
    let block_order = hir_prog.block_order();
    let mut blocks = HashMap::new();
    for &b in &block_order {
        blocks.insert(b, prog.new_block());
    }

    let mut ctx = Ctx { regs: HashMap::new() };
    for &b in &block_order {
        let data = &hir_prog.blocks[b];
        for phi in &data.phis {
            ctx.regs.insert(phi.dest, prog.new_reg(4));
        }
        for &cmd in &data.commands {
            let cd = &hir_prog.commands[cmd];
            ctx.regs.insert(cd.result, prog.new_reg(cd.size));
        }
    }

    for (bi, &b) in block_order.iter().enumerate() {
        let gb = blocks[&b];
        let data = &hir_prog.blocks[b];

        for phi in &data.phis {
            let sources: Vec<NodeRef> = phi.sources.iter().map(|&v| load(&mut prog, &ctx, v)).collect();
            let dest_reg = ctx.reg(phi.dest);
            let phi_node = prog.nodes.alloc(
                GpOp::Phi,
                prog.regs[dest_reg].size,
                NodeVariant::Phi { reg: dest_reg, sources: sources.clone() },
            );
            for &s in &sources {
                prog.nodes.link(phi_node, s, None);
            }
            let store = prog.nodes.alloc(
                GpOp::StoreReg,
                prog.regs[dest_reg].size,
                NodeVariant::StoreReg { reg: dest_reg, child: phi_node },
            );
            prog.nodes.link(store, phi_node, None);
            prog.regs[dest_reg].add_def(store);
            prog.blocks[gb].phis.push(store);
            prog.blocks[gb].push_root(store);
        }

        for &cmd in &data.commands {
            let cd = &hir_prog.commands[cmd];
            let children: Vec<NodeRef> = cd.args.iter().map(|&a| operand(&mut prog, &ctx, a)).collect();
            let gp_op = map_op(cd.op);
            let negates = vec![false; children.len()];
            let node = prog.nodes.alloc(
                gp_op,
                cd.size,
                NodeVariant::Alu { children: children.clone(), src_negate: negates, dest_negate: false },
            );
            for &c in &children {
                prog.nodes.link(node, c, None);
            }
            let reg = ctx.reg(cd.result);
            let store = prog.nodes.alloc(GpOp::StoreReg, cd.size, NodeVariant::StoreReg { reg, child: node });
            prog.nodes.link(store, node, None);
            prog.regs[reg].add_def(store);
            prog.blocks[gb].push_root(store);
        }

        if data.discards {
            // Discard has no direct GP node counterpart in this op set; GP
            // vertex shaders never discard and PP owns the real lowering
            // ([`crate::pp::lir::PpOp::Discard`]), so this is a no-op here.
        }

        match data.branch {
            hir::BranchCond::Always => {
                if let Some(t) = data.next[0] {
                    let target = blocks[&t];
                    let br = prog.nodes.alloc(GpOp::BranchUncond, 1, NodeVariant::Branch { cond: None, target });
                    prog.blocks[gb].push_root(br);
                    prog.blocks[gb].successors.push(target);
                }
            }
            cond => {
                let (op, swap) = cmp_op(cond);
                let a = data.cond_sources[0].expect("conditional branch needs two operands");
                let bb = data.cond_sources[1].expect("conditional branch needs two operands");
                let (a, bb) = if swap { (bb, a) } else { (a, bb) };
                let na = load(&mut prog, &ctx, a);
                let nb = load(&mut prog, &ctx, bb);
                let cmp = prog.nodes.alloc(
                    op,
                    1,
                    NodeVariant::Alu { children: vec![na, nb], src_negate: vec![false, false], dest_negate: false },
                );
                prog.nodes.link(cmp, na, None);
                prog.nodes.link(cmp, nb, None);
                // `next[0]` is the taken edge; `next[1]` is the fallthrough,
                // reached by falling off the end of this block without a
                // second branch node (the scheduler lays blocks out in the
                // same order `block_order` gives them).
                let taken = blocks[&data.next[0].expect("conditional branch needs a taken target")];
                let br = prog.nodes.alloc(GpOp::BranchCond, 1, NodeVariant::Branch { cond: Some(cmp), target: taken });
                prog.nodes.link(br, cmp, None);
                prog.blocks[gb].push_root(br);
                prog.blocks[gb].successors.push(taken);
                if let Some(ft) = data.next[1] {
                    prog.blocks[gb].successors.push(blocks[&ft]);
                }
            }
        }

        for &pred in &data.preds {
            let gp_pred = blocks[&pred];
            prog.blocks[gb].predecessors.push(gp_pred);
        }
        let _ = bi;
    }

    prog
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{Op, Operand, Program as HirProgram};

    #[test]
    fn lowers_one_store_reg_per_command() {
        let mut hp = HirProgram::new();
        let b0 = hp.new_block();
        let v0 = hp.push_command(b0, Op::Mov, 4, vec![Operand::Const([1.0; 4])]);
        hp.push_command(b0, Op::Add, 4, vec![Operand::Value(v0), Operand::Value(v0)]);

        let prog = lower_program(&hp);
        let gb = *prog.blocks.keys().next().as_ref().unwrap();
        assert_eq!(prog.blocks[gb].roots.len(), 2);
        assert_eq!(prog.regs.len(), 2);
    }

    #[test]
    fn conditional_branch_carries_both_successors() {
        let mut hp = HirProgram::new();
        let b0 = hp.new_block();
        let b1 = hp.new_block();
        let b2 = hp.new_block();
        let v0 = hp.push_command(b0, Op::Mov, 1, vec![Operand::Const([1.0; 4])]);
        hp.blocks[b0].branch = crate::hir::BranchCond::Lt;
        hp.blocks[b0].cond_sources = [Some(v0), Some(v0)];
        hp.add_edge(b0, b1, 0);
        hp.add_edge(b0, b2, 1);

        let prog = lower_program(&hp);
        let gb0 = *prog.blocks.keys().next().as_ref().unwrap();
        assert_eq!(prog.blocks[gb0].successors.len(), 2);
    }
}
