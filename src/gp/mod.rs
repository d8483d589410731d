//! The GP (geometry processor) IR pipeline (spec §3-4, GP column).
//!
//! Front-end lowering into this IR, algebraic lowering, scheduling, and
//! register allocation are separate passes over the shared [`program::Program`]
//! so each can be tested independently, mirroring how `cranelift-codegen`
//! splits its own mid-end into one file per pass over a shared `ir::Function`.

pub mod block;
pub mod const_fold;
pub mod dce;
pub mod dep_info;
pub mod from_hir;
pub mod if_conversion;
pub mod liveness;
pub mod lower;
pub mod node;
pub mod phi_elim;
pub mod program;
pub mod reg;
pub mod regalloc;
pub mod reg_eliminate;
pub mod scheduler;
pub mod ssa;

/// Run the full GP pipeline (spec §2's "dependency order, leaves first")
/// over a lowered HIR program: front-end lowering, SSA construction, phi
/// elimination, copy elimination, DCE, constant folding, if-conversion,
/// algebraic lowering, liveness, register allocation, dependency-info, and
/// bundle scheduling.
pub fn run(hir_prog: &crate::hir::Program) -> program::Program {
    let mut prog = from_hir::lower_program(hir_prog);

    if let Some(entry) = prog.blocks.keys().next() {
        ssa::construct(&mut prog, entry);
    }
    phi_elim::eliminate(&mut prog);
    reg_eliminate::run(&mut prog);
    dce::run(&mut prog);

    let block_refs: Vec<block::BlockRef> = prog.blocks.keys().collect();
    for &b in &block_refs {
        let roots = prog.blocks[b].roots.clone();
        const_fold::run(&mut prog.nodes, &roots);
    }

    if_conversion::run(&mut prog);
    lower::run(&mut prog);
    liveness::run(&mut prog);
    regalloc::run(&mut prog);
    dep_info::run(&mut prog);
    scheduler::run(&mut prog);

    prog
}
