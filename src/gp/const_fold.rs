//! Constant folding over the GP node DAG (spec §4.6).
//!
//! Ground: `examples/original_source/src/lima/gp_ir/const_fold.c` for the
//! op-by-op evaluation table, and spec §9's note that `f2b` must preserve
//! the *observed* (buggy) constant-folder behavior rather than the
//! mathematically obvious one, since reimplementations must not silently
//! "fix" it.

use crate::gp::node::{GpOp, NodeArena, NodeRef, NodeVariant};
use log::trace;

/// Run constant folding to a fixed point over every root's DAG in `roots`.
/// Returns the number of nodes folded.
pub fn run(arena: &mut NodeArena, roots: &[NodeRef]) -> usize {
    let mut total = 0;
    loop {
        let mut changed = false;
        let mut worklist: Vec<NodeRef> = Vec::new();
        for &r in roots {
            collect_reachable(arena, r, &mut worklist);
        }
        for n in worklist {
            if !arena.is_live(n) {
                continue;
            }
            if let Some(value) = try_fold(arena, n) {
                trace!("const-fold: {:?} -> {:?}", n, value);
                fold_in_place(arena, n, value);
                changed = true;
                total += 1;
            }
        }
        if !changed {
            break;
        }
    }
    total
}

fn collect_reachable(arena: &NodeArena, n: NodeRef, out: &mut Vec<NodeRef>) {
    out.push(n);
    for c in arena.get(n).children() {
        collect_reachable(arena, c, out);
    }
}

fn try_fold(arena: &NodeArena, n: NodeRef) -> Option<[f32; 4]> {
    let node = arena.get(n);
    let (children, src_negate, dest_negate) = match &node.variant {
        NodeVariant::Alu {
            children,
            src_negate,
            dest_negate,
        } => (children.clone(), src_negate.clone(), *dest_negate),
        _ => return None,
    };

    let mut operands = Vec::with_capacity(children.len());
    for (i, &c) in children.iter().enumerate() {
        let cn = arena.get(c);
        let value = match &cn.variant {
            NodeVariant::Const { value } => *value,
            _ => return None,
        };
        let negated = if src_negate.get(i).copied().unwrap_or(false) {
            neg4(value)
        } else {
            value
        };
        operands.push(negated);
    }

    let result = eval(node.op, &operands)?;
    Some(if dest_negate { neg4(result) } else { result })
}

/// Replace `n`'s own variant with a const carrying `value`, preserving its
/// identity (and thus every existing parent/root reference to it) rather
/// than allocating a fresh node and redirecting edges.
fn fold_in_place(arena: &mut NodeArena, n: NodeRef, value: [f32; 4]) {
    let children = arena.get(n).children();
    for c in children {
        arena.unlink(n, c);
    }
    let node = arena.get_mut(n);
    node.op = GpOp::Const;
    node.variant = NodeVariant::Const { value };
}

fn neg4(v: [f32; 4]) -> [f32; 4] {
    [-v[0], -v[1], -v[2], -v[3]]
}

fn map4(a: [f32; 4], f: impl Fn(f32) -> f32) -> [f32; 4] {
    [f(a[0]), f(a[1]), f(a[2]), f(a[3])]
}

fn zip4(a: [f32; 4], b: [f32; 4], f: impl Fn(f32, f32) -> f32) -> [f32; 4] {
    [f(a[0], b[0]), f(a[1], b[1]), f(a[2], b[2]), f(a[3], b[3])]
}

fn zip3(a: [f32; 4], b: [f32; 4], c: [f32; 4], f: impl Fn(f32, f32, f32) -> f32) -> [f32; 4] {
    [
        f(a[0], b[0], c[0]),
        f(a[1], b[1], c[1]),
        f(a[2], b[2], c[2]),
        f(a[3], b[3], c[3]),
    ]
}

/// Evaluate one op over already-negated constant operands using IEEE-754
/// float semantics, per the table in spec §4.6.
fn eval(op: GpOp, ops: &[[f32; 4]]) -> Option<[f32; 4]> {
    Some(match op {
        GpOp::Mov => ops[0],
        GpOp::Mul => zip4(ops[0], ops[1], |a, b| a * b),
        GpOp::Add => zip4(ops[0], ops[1], |a, b| a + b),
        GpOp::Neg => map4(ops[0], |a| -a),
        GpOp::Abs => map4(ops[0], f32::abs),
        GpOp::Not => map4(ops[0], |a| 1.0 - a),
        GpOp::Div => zip4(ops[0], ops[1], |a, b| a / b),
        GpOp::Mod => zip4(ops[0], ops[1], |a, b| b * (a / b).fract()),
        GpOp::Lrp => zip3(ops[0], ops[1], ops[2], |a, b, t| b * t + a * (1.0 - t)),
        GpOp::Floor => map4(ops[0], f32::floor),
        GpOp::Ceil => map4(ops[0], f32::ceil),
        GpOp::Fract => map4(ops[0], f32::fract),
        GpOp::Sign => map4(ops[0], |a| {
            if a > 0.0 {
                1.0
            } else if a < 0.0 {
                -1.0
            } else {
                0.0
            }
        }),
        GpOp::Min => zip4(ops[0], ops[1], f32::min),
        GpOp::Max => zip4(ops[0], ops[1], f32::max),
        GpOp::Ge => zip4(ops[0], ops[1], |a, b| bool_f(a >= b)),
        GpOp::Lt => zip4(ops[0], ops[1], |a, b| bool_f(a < b)),
        GpOp::Eq => zip4(ops[0], ops[1], |a, b| bool_f(a == b)),
        GpOp::Ne => zip4(ops[0], ops[1], |a, b| bool_f(a != b)),
        GpOp::Rcp | GpOp::RcpImpl => map4(ops[0], |a| 1.0 / a),
        GpOp::Rsqrt | GpOp::RsqrtImpl => map4(ops[0], |a| 1.0 / a.sqrt()),
        GpOp::Exp2 | GpOp::Exp2Impl | GpOp::Preexp2 => map4(ops[0], f32::exp2),
        GpOp::Log2 | GpOp::Log2Impl | GpOp::Postlog2 => map4(ops[0], f32::log2),
        GpOp::Sin => map4(ops[0], f32::sin),
        GpOp::Cos => map4(ops[0], f32::cos),
        GpOp::Tan => map4(ops[0], f32::tan),
        GpOp::Pow => zip4(ops[0], ops[1], f32::powf),
        GpOp::Sqrt => map4(ops[0], f32::sqrt),
        GpOp::Exp => map4(ops[0], f32::exp),
        GpOp::Log => map4(ops[0], f32::ln),
        // Matches the observed (bug-compatible) source behavior per spec
        // §9: 0 -> 1, else -> 0. This is the opposite of the op's name and
        // of the `ne(x, 0)` lowering used elsewhere; do not "fix" it.
        GpOp::F2b => map4(ops[0], |a| bool_f(a == 0.0)),
        GpOp::F2i => map4(ops[0], |a| a.signum() * a.abs().floor()),
        GpOp::ClampConst => ops[0],
        _ => return None,
    })
}

fn bool_f(b: bool) -> f32 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Re-usable sanity check: does `n` look like a const node carrying `v`?
pub fn is_const_value(arena: &NodeArena, n: NodeRef, v: [f32; 4]) -> bool {
    matches!(&arena.get(n).variant, NodeVariant::Const { value } if *value == v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gp::node::NodeArena;

    fn const_node(arena: &mut NodeArena, v: f32) -> NodeRef {
        arena.alloc(GpOp::Const, 1, NodeVariant::Const { value: [v; 4] })
    }

    fn alu2(arena: &mut NodeArena, op: GpOp, a: NodeRef, b: NodeRef) -> NodeRef {
        let n = arena.alloc(
            op,
            1,
            NodeVariant::Alu {
                children: vec![a, b],
                src_negate: vec![false, false],
                dest_negate: false,
            },
        );
        arena.link(n, a, None);
        arena.link(n, b, None);
        n
    }

    #[test]
    fn s3_mul_add_constants_collapse() {
        // mul(2.0, add(3.0, 4.0)) -> 14.0
        let mut arena = NodeArena::new();
        let two = const_node(&mut arena, 2.0);
        let three = const_node(&mut arena, 3.0);
        let four = const_node(&mut arena, 4.0);
        let add = alu2(&mut arena, GpOp::Add, three, four);
        let mul = alu2(&mut arena, GpOp::Mul, two, add);

        // mul is itself a root for this test's purposes.
        run(&mut arena, &[mul]);

        assert!(is_const_value(&arena, mul, [14.0; 4]));
    }

    #[test]
    fn idempotent() {
        let mut arena = NodeArena::new();
        let a = const_node(&mut arena, 1.0);
        let b = const_node(&mut arena, 2.0);
        let add = alu2(&mut arena, GpOp::Add, a, b);
        run(&mut arena, &[add]);
        let folded_once = match &arena.get(add).variant {
            NodeVariant::Const { value } => *value,
            _ => panic!("expected const"),
        };
        run(&mut arena, &[add]);
        let folded_twice = match &arena.get(add).variant {
            NodeVariant::Const { value } => *value,
            _ => panic!("expected const"),
        };
        assert_eq!(folded_once, folded_twice);
    }

    #[test]
    fn f2b_preserves_observed_bug() {
        let mut arena = NodeArena::new();
        let zero = const_node(&mut arena, 0.0);
        let n = arena.alloc(
            GpOp::F2b,
            1,
            NodeVariant::Alu {
                children: vec![zero],
                src_negate: vec![false],
                dest_negate: false,
            },
        );
        arena.link(n, zero, None);
        run(&mut arena, &[n]);
        assert!(is_const_value(&arena, n, [1.0; 4]));
    }
}
