//! Register elimination: copy propagation over GP virtual registers (spec
//! §2 item 7).
//!
//! Ground: this retires the register-to-register copies phi elimination
//! (`phi_elim.rs`) inserts unconditionally whenever coalescing them was
//! safe, the same way a real allocator's copy-coalescing pass follows a
//! naive out-of-SSA lowering. A register whose one definition is a bare
//! `reg = mov(other)` is folded away: every use of `reg` is redirected to
//! `other` and the copy chain is deleted.

use crate::gp::node::{NodeRef, NodeVariant};
use crate::gp::program::Program;
use crate::gp::reg::RegRef;

fn as_plain_copy(prog: &Program, def: NodeRef) -> Option<(NodeRef, RegRef)> {
    let (reg, child) = match &prog.nodes.get(def).variant {
        NodeVariant::StoreReg { reg, child } => (*reg, *child),
        _ => return None,
    };
    let (children, src_negate, dest_negate) = match &prog.nodes.get(child).variant {
        NodeVariant::Alu {
            children,
            src_negate,
            dest_negate,
        } => (children.clone(), src_negate.clone(), *dest_negate),
        _ => return None,
    };
    if dest_negate || src_negate.iter().any(|&n| n) || children.len() != 1 {
        return None;
    }
    let src = match &prog.nodes.get(children[0]).variant {
        NodeVariant::LoadReg { reg, component_offset: 0 } => *reg,
        _ => return None,
    };
    Some((def, src))
}

fn remove_root(prog: &mut Program, n: NodeRef) {
    let blocks: Vec<_> = prog.blocks.keys().collect();
    for b in blocks {
        if let Some(pos) = prog.blocks[b].roots.iter().position(|&r| r == n) {
            prog.blocks[b].roots.remove(pos);
            return;
        }
    }
}

/// Run copy propagation to a fixed point. Returns the number of registers
/// folded away.
pub fn run(prog: &mut Program) -> usize {
    let mut total = 0;
    loop {
        let mut changed = false;
        let candidates: Vec<(RegRef, NodeRef)> = prog
            .regs
            .iter()
            .filter(|(_, r)| !r.beginning && r.defs.len() == 1)
            .filter_map(|(k, r)| r.defs.iter().next().map(|&d| (k, d)))
            .collect();

        for (reg, def) in candidates {
            if !prog.nodes.is_live(def) {
                continue;
            }
            let (def, src) = match as_plain_copy(prog, def) {
                Some(v) => v,
                None => continue,
            };
            if src == reg {
                continue;
            }

            let uses: Vec<NodeRef> = prog.regs[reg].uses.iter().copied().collect();
            for u in uses {
                if let NodeVariant::LoadReg { reg: r, .. } = &mut prog.nodes.get_mut(u).variant {
                    *r = src;
                }
                prog.regs[reg].remove_use(u);
                prog.regs[src].add_use(u);
            }

            let child = match &prog.nodes.get(def).variant {
                NodeVariant::StoreReg { child, .. } => *child,
                _ => continue,
            };
            prog.regs[reg].remove_def(def);
            remove_root(prog, def);
            prog.nodes.unlink(def, child);
            prog.nodes.delete(def);
            changed = true;
            total += 1;
        }

        if !changed {
            break;
        }
    }
    prog.compact_registers();
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gp::node::GpOp;

    #[test]
    fn collapses_pure_copy_chain() {
        let mut prog = Program::new();
        let block = prog.new_block();
        let src = prog.new_reg(1);
        let copy_reg = prog.new_reg(1);

        let load_src = prog.nodes.alloc(GpOp::LoadReg, 1, NodeVariant::LoadReg { reg: src, component_offset: 0 });
        prog.regs[src].add_use(load_src);
        let mov = prog.nodes.alloc(
            GpOp::Mov,
            1,
            NodeVariant::Alu {
                children: vec![load_src],
                src_negate: vec![false],
                dest_negate: false,
            },
        );
        prog.nodes.link(mov, load_src, None);
        let store = prog.nodes.alloc(GpOp::StoreReg, 1, NodeVariant::StoreReg { reg: copy_reg, child: mov });
        prog.nodes.link(store, mov, None);
        prog.regs[copy_reg].add_def(store);
        prog.blocks[block].push_root(store);

        let use_n = prog.nodes.alloc(GpOp::LoadReg, 1, NodeVariant::LoadReg { reg: copy_reg, component_offset: 0 });
        prog.regs[copy_reg].add_use(use_n);
        let consumer = prog.nodes.alloc(
            GpOp::Mov,
            1,
            NodeVariant::Alu {
                children: vec![use_n],
                src_negate: vec![false],
                dest_negate: false,
            },
        );
        prog.nodes.link(consumer, use_n, None);
        let out_reg = prog.new_reg(1);
        let store_out = prog.nodes.alloc(GpOp::StoreReg, 1, NodeVariant::StoreReg { reg: out_reg, child: consumer });
        prog.nodes.link(store_out, consumer, None);
        prog.regs[out_reg].add_def(store_out);
        prog.blocks[block].push_root(store_out);

        run(&mut prog);

        match &prog.nodes.get(use_n).variant {
            NodeVariant::LoadReg { reg, .. } => assert_eq!(*reg, src),
            _ => panic!("expected load_reg"),
        }
    }
}
