//! If-conversion for the GP IR (spec §4.5).
//!
//! Ground: the pattern match and the "spill the condition into a one-bit
//! register, rewrite phis as select, then concatenate blocks" sequence
//! transcribe the spec's description directly; the side-effect exclusion
//! list (temp/varying/temp-offset stores) mirrors the dependency-info
//! builder's own notion of an "end node" with observable effects
//! (`dep_info.rs`).

use crate::gp::block::BlockRef;
use crate::gp::node::{GpOp, NodeRef, NodeVariant};
use crate::gp::program::Program;

fn has_side_effects(prog: &Program, b: BlockRef) -> bool {
    prog.blocks[b].roots.iter().any(|&r| {
        matches!(
            prog.nodes.get(r).op,
            GpOp::StoreTemp
                | GpOp::StoreVarying
                | GpOp::StoreTempLoadOff0
                | GpOp::StoreTempLoadOff1
                | GpOp::StoreTempLoadOff2
        )
    })
}

fn branch_of(prog: &Program, b: BlockRef) -> Option<(NodeRef, Option<NodeRef>, BlockRef)> {
    let last = *prog.blocks[b].roots.last()?;
    match &prog.nodes.get(last).variant {
        NodeVariant::Branch { cond, target } => Some((last, *cond, *target)),
        _ => None,
    }
}

/// Try a single if-conversion rewrite somewhere in `prog`. Returns true if
/// one was applied (callers should keep calling until this returns false).
pub fn run_once(prog: &mut Program) -> bool {
    let blocks: Vec<BlockRef> = prog.blocks.keys().collect();
    for entry in blocks {
        let succs = prog.blocks[entry].successors.clone();
        if succs.len() != 2 {
            continue;
        }
        let (_, cond, target) = match branch_of(prog, entry) {
            Some(v) => v,
            None => continue,
        };
        let cond = match cond {
            Some(c) => c,
            None => continue,
        };
        let fallthrough = if succs[0] == target { succs[1] } else { succs[0] };

        // Diamond with else: both paths carry code and converge.
        let then_succ = prog.blocks[target].successors.clone();
        let else_succ = prog.blocks[fallthrough].successors.clone();
        if then_succ.len() == 1
            && else_succ.len() == 1
            && then_succ[0] == else_succ[0]
            && prog.blocks[target].predecessors == [entry]
            && prog.blocks[fallthrough].predecessors == [entry]
            && prog.blocks[then_succ[0]].predecessors.len() == 2
            && !has_side_effects(prog, target)
            && !has_side_effects(prog, fallthrough)
        {
            let end = then_succ[0];
            convert(prog, entry, cond, Some(target), Some(fallthrough), end);
            return true;
        }

        // Diamond without else: the fallthrough path has no code of its
        // own and is itself the join block.
        if prog.blocks[target].successors == [fallthrough]
            && prog.blocks[target].predecessors == [entry]
            && prog.blocks[fallthrough].predecessors.len() == 2
            && !has_side_effects(prog, target)
        {
            convert(prog, entry, cond, Some(target), None, fallthrough);
            return true;
        }
    }
    false
}

/// Run if-conversion to a fixed point (spec §4.5, "run to fixed point").
pub fn run(prog: &mut Program) -> usize {
    let mut total = 0;
    while run_once(prog) {
        total += 1;
    }
    total
}

fn convert(
    prog: &mut Program,
    entry: BlockRef,
    cond: NodeRef,
    then_block: Option<BlockRef>,
    else_block: Option<BlockRef>,
    end: BlockRef,
) {
    // Spill the branch condition into a one-bit register at the point the
    // branch used to sit.
    let cond_reg = prog.new_reg(1);
    let cond_store = prog.nodes.alloc(
        GpOp::StoreReg,
        1,
        NodeVariant::StoreReg { reg: cond_reg, child: cond },
    );
    prog.nodes.link(cond_store, cond, None);
    prog.regs[cond_reg].add_def(cond_store);
    let branch_pos = prog.blocks[entry].roots.len() - 1;
    prog.blocks[entry].roots.insert(branch_pos, cond_store);

    // Rewrite every phi in `end` into select(cond, then_value, else_value).
    let phis = std::mem::take(&mut prog.blocks[end].phis);
    let then_idx = then_block.and_then(|b| prog.blocks[end].predecessors.iter().position(|&p| p == b));
    let else_idx = else_block.and_then(|b| prog.blocks[end].predecessors.iter().position(|&p| p == b));
    let entry_idx = prog.blocks[end].predecessors.iter().position(|&p| p == entry);

    let mut new_stores = Vec::new();
    for phi in phis {
        let (dest_reg, sources, size) = match &prog.nodes.get(phi).variant {
            NodeVariant::Phi { reg, sources } => (*reg, sources.clone(), prog.nodes.get(phi).size),
            _ => continue,
        };
        let then_val = then_idx.or(entry_idx).map(|i| sources[i]);
        let else_val = else_idx.map(|i| sources[i]).unwrap_or_else(|| entry_idx.map(|i| sources[i]).unwrap());
        let then_val = then_val.unwrap_or(else_val);

        let cond_load = prog.nodes.alloc(
            GpOp::LoadReg,
            1,
            NodeVariant::LoadReg { reg: cond_reg, component_offset: 0 },
        );
        prog.regs[cond_reg].add_use(cond_load);

        let select = prog.nodes.alloc(
            GpOp::Select,
            size,
            NodeVariant::Alu {
                children: vec![cond_load, then_val, else_val],
                src_negate: vec![false, false, false],
                dest_negate: false,
            },
        );
        prog.nodes.link(select, cond_load, None);
        prog.nodes.unlink(phi, then_val);
        prog.nodes.link(select, then_val, None);
        if else_val != then_val {
            prog.nodes.unlink(phi, else_val);
        }
        prog.nodes.link(select, else_val, None);

        let store = prog.nodes.alloc(GpOp::StoreReg, size, NodeVariant::StoreReg { reg: dest_reg, child: select });
        prog.nodes.link(store, select, None);
        prog.regs[dest_reg].remove_def(phi);
        prog.regs[dest_reg].add_def(store);
        new_stores.push(store);

        prog.nodes.delete(phi);
    }

    // Concatenate: entry's roots (minus its now-redundant branch) + the
    // then block's roots (minus its trailing jump) + the else block's
    // roots (if any) + the new selects + end's own remaining roots, all
    // into `entry`.
    prog.blocks[entry].roots.pop(); // the branch itself
    let mut merged = std::mem::take(&mut prog.blocks[entry].roots);
    if let Some(t) = then_block {
        let mut then_roots = std::mem::take(&mut prog.blocks[t].roots);
        if matches!(then_roots.last(), Some(&r) if prog.nodes.get(r).op.is_branch()) {
            then_roots.pop();
        }
        merged.extend(then_roots);
    }
    if let Some(e) = else_block {
        let mut else_roots = std::mem::take(&mut prog.blocks[e].roots);
        if matches!(else_roots.last(), Some(&r) if prog.nodes.get(r).op.is_branch()) {
            else_roots.pop();
        }
        merged.extend(else_roots);
    }
    merged.extend(new_stores);
    merged.extend(std::mem::take(&mut prog.blocks[end].roots));

    prog.blocks[entry].roots = merged;
    prog.blocks[entry].successors = prog.blocks[end].successors.clone();
    let end_successors = prog.blocks[entry].successors.clone();
    for s in end_successors {
        for p in prog.blocks[s].predecessors.iter_mut() {
            if *p == end {
                *p = entry;
            }
        }
    }

    // The then/else/end blocks are now empty shells; leave them in the
    // program's block arena (unreferenced, never walked again) rather
    // than compacting `BlockRef` indices, which nothing downstream needs.
    prog.blocks[entry].recompute_all_successors(&mut prog.nodes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gp::node::GpOp;

    #[test]
    fn converts_diamond_without_else() {
        let mut prog = Program::new();
        let entry = prog.new_block();
        let then_b = prog.new_block();
        let end = prog.new_block();

        let a = prog.new_reg(1);
        let b = prog.new_reg(1);
        let dest = prog.new_reg(1);

        let cond = prog.nodes.alloc(GpOp::Const, 1, NodeVariant::Const { value: [1.0; 4] });
        let branch = prog.nodes.alloc(GpOp::BranchCond, 1, NodeVariant::Branch { cond: Some(cond), target: then_b });
        prog.nodes.link(branch, cond, None);
        prog.blocks[entry].push_root(branch);
        prog.blocks[entry].successors = vec![end, then_b];

        let val_then = prog.nodes.alloc(GpOp::Const, 1, NodeVariant::Const { value: [1.0; 4] });
        let store_then = prog.nodes.alloc(GpOp::StoreReg, 1, NodeVariant::StoreReg { reg: a, child: val_then });
        prog.nodes.link(store_then, val_then, None);
        prog.regs[a].add_def(store_then);
        prog.blocks[then_b].push_root(store_then);
        prog.blocks[then_b].predecessors = vec![entry];
        prog.blocks[then_b].successors = vec![end];

        prog.blocks[end].predecessors = vec![entry, then_b];
        let src_entry = prog.nodes.alloc(GpOp::LoadReg, 1, NodeVariant::LoadReg { reg: b, component_offset: 0 });
        prog.regs[b].add_use(src_entry);
        let src_then = prog.nodes.alloc(GpOp::LoadReg, 1, NodeVariant::LoadReg { reg: a, component_offset: 0 });
        prog.regs[a].add_use(src_then);
        let phi = prog.nodes.alloc(
            GpOp::Phi,
            1,
            NodeVariant::Phi { reg: dest, sources: vec![src_entry, src_then] },
        );
        prog.nodes.link(phi, src_entry, None);
        prog.nodes.link(phi, src_then, None);
        prog.regs[dest].add_def(phi);
        prog.blocks[end].phis.push(phi);

        let did = run_once(&mut prog);
        assert!(did);
        assert!(prog.blocks[entry].phis.is_empty());
        assert!(prog.blocks[entry].roots.iter().any(|&r| prog.nodes.get(r).op == GpOp::Select));
    }
}
