//! Dead-code elimination over the GP IR (spec §2 item 7).
//!
//! A `store_reg` whose register ends up with no remaining uses (because
//! every consumer was itself eliminated, or never existed past lowering)
//! computes a value nobody reads; it is safe to drop. Stores to temp
//! memory, varyings, and branches are never dead by definition -- they are
//! the program's only externally observable effects (spec §3 "a node's
//! root-ness").

use crate::gp::node::NodeVariant;
use crate::gp::program::Program;

/// Remove dead `store_reg` statements to a fixed point. Returns the number
/// of statements removed.
pub fn run(prog: &mut Program) -> usize {
    let mut total = 0;
    loop {
        let mut changed = false;
        let blocks: Vec<_> = prog.blocks.keys().collect();
        for b in blocks {
            let roots = prog.blocks[b].roots.clone();
            for root in roots {
                let (reg, child) = match &prog.nodes.get(root).variant {
                    NodeVariant::StoreReg { reg, child } => (*reg, *child),
                    _ => continue,
                };
                if !prog.regs[reg].uses.is_empty() {
                    continue;
                }
                prog.regs[reg].remove_def(root);
                let pos = prog.blocks[b].roots.iter().position(|&r| r == root).unwrap();
                prog.blocks[b].roots.remove(pos);
                prog.nodes.unlink(root, child);
                prog.nodes.delete(root);
                changed = true;
                total += 1;
            }
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
    fn removes_unused_store_reg() {
        let mut prog = Program::new();
        let block = prog.new_block();
        let r = prog.new_reg(1);
        let c = prog.nodes.alloc(GpOp::Const, 1, NodeVariant::Const { value: [1.0; 4] });
        let store = prog.nodes.alloc(GpOp::StoreReg, 1, NodeVariant::StoreReg { reg: r, child: c });
        prog.nodes.link(store, c, None);
        prog.regs[r].add_def(store);
        prog.blocks[block].push_root(store);

        let removed = run(&mut prog);
        assert_eq!(removed, 1);
        assert!(prog.blocks[block].roots.is_empty());
    }

    #[test]
    fn keeps_store_with_use() {
        let mut prog = Program::new();
        let block = prog.new_block();
        let r = prog.new_reg(1);
        let c = prog.nodes.alloc(GpOp::Const, 1, NodeVariant::Const { value: [1.0; 4] });
        let store = prog.nodes.alloc(GpOp::StoreReg, 1, NodeVariant::StoreReg { reg: r, child: c });
        prog.nodes.link(store, c, None);
        prog.regs[r].add_def(store);
        prog.blocks[block].push_root(store);

        let use_n = prog.nodes.alloc(GpOp::LoadReg, 1, NodeVariant::LoadReg { reg: r, component_offset: 0 });
        prog.regs[r].add_use(use_n);

        run(&mut prog);
        assert_eq!(prog.blocks[block].roots.len(), 1);
    }
}
