//! Two-round PP bundle scheduler: repeatedly tries to fold each bundle into
//! its immediate predecessor via [`crate::pp::combine`], shrinking the
//! one-instruction-per-bundle result of [`crate::pp::lower`] down to as few
//! bundles as the slot/constant/unit constraints allow.
//!
//! Ground: `examples/original_source/src/lima/pp_lir/linear_to_scheduled.c`,
//! which drives the same repeated combine-with-neighbor walk over the
//! linear instruction list. Only
//! adjacent bundles are ever tried against each other, since that is the
//! one case combining can never need a true-dependency check for: nothing
//! moves past a third, already-placed bundle.

use crate::hir;
use crate::pp::combine::{self, CombineMode};
use crate::pp::lir::{BundleRef, Program};

pub fn run_block(prog: &mut Program, block: hir::Block) {
    for _round in 0..2 {
        let bundles = match prog.block_bundles.get(&block) {
            Some(b) => b.clone(),
            None => return,
        };
        let mut kept: Vec<BundleRef> = Vec::new();
        for b in bundles {
            let merged = match kept.last() {
                Some(&last) => combine::try_combine(prog, last, b, CombineMode::Before),
                None => false,
            };
            if !merged {
                kept.push(b);
            }
        }
        prog.block_bundles.insert(block, kept);
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
    fn adjacent_independent_commands_fold_into_one_bundle() {
        let mut hp = HirProgram::new();
        let b0 = hp.new_block();
        hp.push_command(b0, Op::Mov, 4, vec![Operand::Const([1.0; 4])]);
        hp.push_command(b0, Op::Mov, 4, vec![Operand::Const([2.0; 4])]);

        let mut pp = lower::run(&hp);
        let before = pp.block_bundles[&b0].len();
        run_block(&mut pp, b0);
        let after = pp.block_bundles[&b0].len();
        assert!(after <= before);
    }
}
