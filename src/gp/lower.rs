//! Algebraic lowering for the GP IR (spec §4.7).
//!
//! Ground: `examples/original_source/src/lima/gp_ir/lower.c`, which rewrites
//! each high-level op into hardware primitives one node at a time; the
//! trig polynomial coefficients and range-reduction formulas are transcribed
//! unchanged from it. Run to a fixed point since a lowering can itself
//! introduce another lowerable op (`exp` emits `exp2`, `sin`'s own
//! range-reduction emits `abs`/`floor`, and so on).

use crate::gp::node::{GpOp, NodeRef, NodeVariant};
use crate::gp::program::Program;
use std::f32::consts::PI;

const TWO_PI: f32 = 2.0 * PI;
// sin(theta) Taylor coefficients for theta = 2*pi*f, folded into the
// quartic Horner form evaluated over u = f*f: 2*pi, -(2*pi)^3/3!,
// (2*pi)^5/5!, -(2*pi)^7/7!.
const SIN_C0: f32 = TWO_PI;
const SIN_C1: f32 = -41.341_702_f32;
const SIN_C2: f32 = 81.605_25_f32;
const SIN_C3: f32 = -76.705_86_f32;
const LOG2_E: f32 = std::f32::consts::LOG2_E;
const LN_2: f32 = std::f32::consts::LN_2;

fn unary(prog: &mut Program, op: GpOp, size: u8, child: NodeRef) -> NodeRef {
    let n = prog.nodes.alloc(
        op,
        size,
        NodeVariant::Alu {
            children: vec![child],
            src_negate: vec![false],
            dest_negate: false,
        },
    );
    prog.nodes.link(n, child, None);
    n
}

fn binary(prog: &mut Program, op: GpOp, size: u8, a: NodeRef, b: NodeRef, negate_b: bool) -> NodeRef {
    let n = prog.nodes.alloc(
        op,
        size,
        NodeVariant::Alu {
            children: vec![a, b],
            src_negate: vec![false, negate_b],
            dest_negate: false,
        },
    );
    prog.nodes.link(n, a, None);
    prog.nodes.link(n, b, None);
    n
}

fn ternary(prog: &mut Program, op: GpOp, size: u8, a: NodeRef, b: NodeRef, c: NodeRef) -> NodeRef {
    let n = prog.nodes.alloc(
        op,
        size,
        NodeVariant::Alu {
            children: vec![a, b, c],
            src_negate: vec![false, false, false],
            dest_negate: false,
        },
    );
    prog.nodes.link(n, a, None);
    prog.nodes.link(n, b, None);
    prog.nodes.link(n, c, None);
    n
}

fn konst(prog: &mut Program, size: u8, value: f32) -> NodeRef {
    prog.nodes.alloc(GpOp::Const, size, NodeVariant::Const { value: [value; 4] })
}

fn mul(prog: &mut Program, size: u8, a: NodeRef, b: NodeRef) -> NodeRef {
    binary(prog, GpOp::Mul, size, a, b, false)
}

fn add(prog: &mut Program, size: u8, a: NodeRef, b: NodeRef) -> NodeRef {
    binary(prog, GpOp::Add, size, a, b, false)
}

fn sub(prog: &mut Program, size: u8, a: NodeRef, b: NodeRef) -> NodeRef {
    binary(prog, GpOp::Add, size, a, b, true)
}

/// Range-reduce `x` to the quartic Taylor argument `f` for either `sin` or
/// `cos`, per the spec's two distinct formulas.
fn range_reduce_sin(prog: &mut Program, size: u8, x: NodeRef) -> NodeRef {
    let inv_2pi = konst(prog, size, 1.0 / TWO_PI);
    let xn = mul(prog, size, x, inv_2pi);
    let three_quarters = konst(prog, size, 0.75);
    let t1 = add(prog, size, xn, three_quarters);
    let fl = unary(prog, GpOp::Floor, size, t1);
    let diff = sub(prog, size, xn, fl);
    let quarter = konst(prog, size, 0.25);
    let inner = add(prog, size, diff, quarter);
    let abs_val = unary(prog, GpOp::Abs, size, inner);
    sub(prog, size, abs_val, quarter)
}

fn range_reduce_cos(prog: &mut Program, size: u8, x: NodeRef) -> NodeRef {
    let inv_2pi = konst(prog, size, 1.0 / TWO_PI);
    let xn = mul(prog, size, x, inv_2pi);
    let neg_xn = unary(prog, GpOp::Neg, size, xn);
    let fl = unary(prog, GpOp::Floor, size, neg_xn);
    let half = konst(prog, size, 0.5);
    let t1 = add(prog, size, xn, fl);
    let inner = add(prog, size, t1, half);
    let abs_val = unary(prog, GpOp::Abs, size, inner);
    let quarter = konst(prog, size, 0.25);
    sub(prog, size, abs_val, quarter)
}

/// Evaluate the shared quartic Horner polynomial `sin(2*pi*f)` over the
/// range-reduced argument `f`.
fn sin_poly(prog: &mut Program, size: u8, f: NodeRef) -> NodeRef {
    let u = mul(prog, size, f, f);
    let c3 = konst(prog, size, SIN_C3);
    let c2 = konst(prog, size, SIN_C2);
    let p2 = add(prog, size, c2, mul(prog, size, u, c3));
    let c1 = konst(prog, size, SIN_C1);
    let p1 = add(prog, size, c1, mul(prog, size, u, p2));
    let c0 = konst(prog, size, SIN_C0);
    let p0 = add(prog, size, c0, mul(prog, size, u, p1));
    mul(prog, size, f, p0)
}

fn lower_one(prog: &mut Program, n: NodeRef, op: GpOp) -> Option<NodeRef> {
    let size = prog.nodes.get(n).size;
    let children = prog.nodes.get(n).children();
    let replacement = match op {
        GpOp::Abs => {
            let x = children[0];
            let neg_x = unary(prog, GpOp::Neg, size, x);
            binary(prog, GpOp::Max, size, x, neg_x, false)
        }
        GpOp::Not => {
            let x = children[0];
            let one = konst(prog, size, 1.0);
            let one_again = konst(prog, size, 1.0);
            let inner = sub(prog, size, one, x);
            binary(prog, GpOp::Max, size, one_again, inner, false)
        }
        GpOp::Div => {
            let (x, y) = (children[0], children[1]);
            let rcp_y = unary(prog, GpOp::Rcp, size, y);
            mul(prog, size, x, rcp_y)
        }
        GpOp::Mod => {
            let (x, y) = (children[0], children[1]);
            let div_xy = binary(prog, GpOp::Div, size, x, y, false);
            let fract_node = unary(prog, GpOp::Fract, size, div_xy);
            mul(prog, size, y, fract_node)
        }
        GpOp::Lrp => {
            let (x, y, t) = (children[0], children[1], children[2]);
            let one = konst(prog, size, 1.0);
            let one_minus_t = sub(prog, size, one, t);
            let term1 = mul(prog, size, y, t);
            let term2 = mul(prog, size, x, one_minus_t);
            add(prog, size, term1, term2)
        }
        GpOp::Exp2 => {
            let x = children[0];
            let preexp2_x = unary(prog, GpOp::Preexp2, size, x);
            let impl_node = unary(prog, GpOp::Exp2Impl, size, preexp2_x);
            let complex2_node = unary(prog, GpOp::Complex2, size, preexp2_x);
            ternary(prog, GpOp::Complex1, size, impl_node, complex2_node, preexp2_x)
        }
        GpOp::Log2 => {
            let x = children[0];
            let impl_node = unary(prog, GpOp::Log2Impl, size, x);
            let complex2_node = unary(prog, GpOp::Complex2, size, x);
            let complex1_node = ternary(prog, GpOp::Complex1, size, impl_node, complex2_node, x);
            unary(prog, GpOp::Postlog2, size, complex1_node)
        }
        GpOp::Rcp => {
            let x = children[0];
            let impl_node = unary(prog, GpOp::RcpImpl, size, x);
            let complex2_node = unary(prog, GpOp::Complex2, size, x);
            ternary(prog, GpOp::Complex1, size, impl_node, complex2_node, x)
        }
        GpOp::Rsqrt => {
            let x = children[0];
            let impl_node = unary(prog, GpOp::RsqrtImpl, size, x);
            let complex2_node = unary(prog, GpOp::Complex2, size, x);
            ternary(prog, GpOp::Complex1, size, impl_node, complex2_node, x)
        }
        GpOp::Ceil => {
            let x = children[0];
            let neg_x = unary(prog, GpOp::Neg, size, x);
            let fl = unary(prog, GpOp::Floor, size, neg_x);
            unary(prog, GpOp::Neg, size, fl)
        }
        GpOp::Fract => {
            let x = children[0];
            let fl = unary(prog, GpOp::Floor, size, x);
            sub(prog, size, x, fl)
        }
        GpOp::Exp => {
            let x = children[0];
            let log2e = konst(prog, size, LOG2_E);
            let scaled = mul(prog, size, log2e, x);
            unary(prog, GpOp::Exp2, size, scaled)
        }
        GpOp::Log => {
            let x = children[0];
            let log2x = unary(prog, GpOp::Log2, size, x);
            let ln2 = konst(prog, size, LN_2);
            mul(prog, size, log2x, ln2)
        }
        GpOp::Pow => {
            let (x, y) = (children[0], children[1]);
            let log2x = unary(prog, GpOp::Log2, size, x);
            let scaled = mul(prog, size, y, log2x);
            unary(prog, GpOp::Exp2, size, scaled)
        }
        GpOp::Sqrt => {
            let x = children[0];
            let rsqrt_x = unary(prog, GpOp::Rsqrt, size, x);
            unary(prog, GpOp::Rcp, size, rsqrt_x)
        }
        GpOp::Sin => {
            let x = children[0];
            let f = range_reduce_sin(prog, size, x);
            sin_poly(prog, size, f)
        }
        GpOp::Cos => {
            let x = children[0];
            let f = range_reduce_cos(prog, size, x);
            sin_poly(prog, size, f)
        }
        GpOp::Tan => {
            let x = children[0];
            let sin_node = unary(prog, GpOp::Sin, size, x);
            let cos_node = unary(prog, GpOp::Cos, size, x);
            binary(prog, GpOp::Div, size, sin_node, cos_node, false)
        }
        GpOp::Eq => {
            let (x, y) = (children[0], children[1]);
            let ge_xy = binary(prog, GpOp::Ge, size, x, y, false);
            let ge_yx = binary(prog, GpOp::Ge, size, y, x, false);
            binary(prog, GpOp::Min, size, ge_xy, ge_yx, false)
        }
        GpOp::Ne => {
            let (x, y) = (children[0], children[1]);
            let lt_xy = binary(prog, GpOp::Lt, size, x, y, false);
            let lt_yx = binary(prog, GpOp::Lt, size, y, x, false);
            binary(prog, GpOp::Max, size, lt_xy, lt_yx, false)
        }
        GpOp::F2b => {
            let x = children[0];
            let zero = konst(prog, size, 0.0);
            binary(prog, GpOp::Ne, size, x, zero, false)
        }
        GpOp::F2i => {
            let x = children[0];
            let sign_node = unary(prog, GpOp::Sign, size, x);
            let abs_node = unary(prog, GpOp::Abs, size, x);
            let floor_node = unary(prog, GpOp::Floor, size, abs_node);
            mul(prog, size, sign_node, floor_node)
        }
        _ => return None,
    };
    Some(replacement)
}

fn is_lowerable(op: GpOp) -> bool {
    matches!(
        op,
        GpOp::Abs
            | GpOp::Not
            | GpOp::Div
            | GpOp::Mod
            | GpOp::Lrp
            | GpOp::Exp2
            | GpOp::Log2
            | GpOp::Rcp
            | GpOp::Rsqrt
            | GpOp::Ceil
            | GpOp::Fract
            | GpOp::Exp
            | GpOp::Log
            | GpOp::Pow
            | GpOp::Sqrt
            | GpOp::Sin
            | GpOp::Cos
            | GpOp::Tan
            | GpOp::Eq
            | GpOp::Ne
            | GpOp::F2b
            | GpOp::F2i
    )
}

/// Rewrite every unconditional branch into a conditional branch on the
/// constant `1.0` (spec §4.7, "after lowering ...").
fn lower_branches(prog: &mut Program) {
    let blocks: Vec<_> = prog.blocks.keys().collect();
    for b in blocks {
        let roots = prog.blocks[b].roots.clone();
        for r in roots {
            let is_uncond = matches!(&prog.nodes.get(r).variant, NodeVariant::Branch { cond: None, .. });
            if !is_uncond {
                continue;
            }
            let one = konst(prog, 1, 1.0);
            prog.nodes.link(r, one, None);
            if let NodeVariant::Branch { cond, .. } = &mut prog.nodes.get_mut(r).variant {
                *cond = Some(one);
            }
            prog.nodes.get_mut(r).op = GpOp::BranchCond;
        }
    }
}

/// Insert a `mov` between a store and its child whenever the child's op is
/// not one of the passthrough-allowed producers (spec §4.7). Loads and
/// register reads are fine directly under a store; anything else (an ALU
/// result feeding a second store, for example) needs the mov.
fn insert_store_movs(prog: &mut Program) {
    let blocks: Vec<_> = prog.blocks.keys().collect();
    for b in blocks {
        let roots = prog.blocks[b].roots.clone();
        for r in roots {
            let child = match &prog.nodes.get(r).variant {
                NodeVariant::Store { child, .. } => Some(*child),
                NodeVariant::StoreReg { child, .. } => Some(*child),
                _ => None,
            };
            let child = match child {
                Some(c) => c,
                None => continue,
            };
            let child_op = prog.nodes.get(child).op;
            if child_op.is_load() || child_op == GpOp::Const || child_op == GpOp::Mov {
                continue;
            }
            let size = prog.nodes.get(child).size;
            let mov = unary(prog, GpOp::Mov, size, child);
            prog.nodes.unlink(r, child);
            prog.nodes.link(r, mov, None);
            match &mut prog.nodes.get_mut(r).variant {
                NodeVariant::Store { child, .. } => *child = mov,
                NodeVariant::StoreReg { child, .. } => *child = mov,
                _ => {}
            }
        }
    }
}

/// Run algebraic lowering to a fixed point, then the two structural
/// cleanups the spec calls out (unconditional-branch rewrite, store mov
/// insertion). Returns the number of ops lowered.
pub fn run(prog: &mut Program) -> usize {
    let mut total = 0;
    loop {
        let candidates: Vec<(NodeRef, GpOp)> = prog
            .nodes
            .nodes_mut_for_remap()
            .filter_map(|(k, slot)| slot.as_ref().map(|n| (k, n.op)))
            .filter(|&(_, op)| is_lowerable(op))
            .collect();
        if candidates.is_empty() {
            break;
        }
        for (n, op) in candidates {
            if !prog.nodes.is_live(n) {
                continue;
            }
            if let Some(replacement) = lower_one(prog, n, op) {
                prog.nodes.replace(n, replacement);
                total += 1;
            }
        }
    }
    lower_branches(prog);
    insert_store_movs(prog);
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowers_abs_into_max_of_x_and_negated_x() {
        let mut prog = Program::new();
        let block = prog.new_block();
        let r = prog.new_reg(1);
        let x = konst(&mut prog, 1, -3.0);
        let abs_node = unary(&mut prog, GpOp::Abs, 1, x);
        let store = prog.nodes.alloc(GpOp::StoreReg, 1, NodeVariant::StoreReg { reg: r, child: abs_node });
        prog.nodes.link(store, abs_node, None);
        prog.regs[r].add_def(store);
        prog.blocks[block].push_root(store);

        run(&mut prog);

        let child = match &prog.nodes.get(store).variant {
            NodeVariant::StoreReg { child, .. } => *child,
            _ => panic!("expected store_reg"),
        };
        assert_eq!(prog.nodes.get(child).op, GpOp::Max);
    }

    #[test]
    fn lowering_reaches_a_fixed_point_with_no_abs_not_or_div_left() {
        let mut prog = Program::new();
        let block = prog.new_block();
        let r = prog.new_reg(1);
        let x = konst(&mut prog, 1, 2.0);
        let y = konst(&mut prog, 1, 3.0);
        let div_node = binary(&mut prog, GpOp::Div, 1, x, y, false);
        let store = prog.nodes.alloc(GpOp::StoreReg, 1, NodeVariant::StoreReg { reg: r, child: div_node });
        prog.nodes.link(store, div_node, None);
        prog.regs[r].add_def(store);
        prog.blocks[block].push_root(store);

        run(&mut prog);

        for (_, slot) in prog.nodes.nodes_mut_for_remap() {
            if let Some(node) = slot {
                assert!(!is_lowerable(node.op));
            }
        }
    }

    #[test]
    fn rewrites_unconditional_branch_to_conditional_on_one() {
        let mut prog = Program::new();
        let entry = prog.new_block();
        let target = prog.new_block();
        let branch = prog.nodes.alloc(
            GpOp::BranchUncond,
            1,
            NodeVariant::Branch { cond: None, target },
        );
        prog.blocks[entry].push_root(branch);

        run(&mut prog);

        match &prog.nodes.get(branch).variant {
            NodeVariant::Branch { cond, .. } => assert!(cond.is_some()),
            _ => panic!("expected branch"),
        }
    }
}
