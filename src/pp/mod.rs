//! Pixel processor backend: lowers the shared [`crate::hir`] straight into
//! bundled LIR, then combines, schedules, and peepholes it (spec §4.11-14,
//! PP column).
//!
//! Unlike the GP backend there is no separate node-DAG stage: the HIR's
//! commands are already in the dependency order the PP scheduler needs, so
//! [`lower`] goes directly from `hir::Program` to [`lir::Program`].

pub mod combine;
pub mod lir;
pub mod lower;
pub mod peephole;
pub mod regalloc;
pub mod schedule;

/// Run the full PP pipeline over a lowered HIR program, per spec §4.11-14.
pub fn run(hir_prog: &crate::hir::Program) -> lir::Program {
    let mut prog = lower::run(hir_prog);
    schedule::run(&mut prog);
    peephole::run(&mut prog);
    regalloc::run(&mut prog);
    prog
}
