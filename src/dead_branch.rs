//! Dead-branch analysis (spec §4.1).
//!
//! Ground: `examples/original_source/src/glsl/ir_dead_branches.{h,cpp}`. The
//! original runs a hierarchical visitor over the front-end's *structured*
//! statement tree (the one with real `if`/`loop` nesting, before it is
//! flattened into a basic-block CFG) and records, per `if`, whether control
//! can fall through the then/else arm to the statement after the `if`.
//!
//! This crate keeps that structured tree as its own small type
//! (`dead_branch::Stmt`) distinct from [`crate::hir`], mirroring the
//! original's separation between the GLSL AST and `lima_gp_ir`: the
//! front-end is expected to run this analysis on its own pre-CFG
//! representation and hand the `DeadBranches` result to the GP/PP lowering
//! step (which consults it when a front-end `if` has both arms structurally
//! present but one side is known dead).

use crate::entity::{entity_impl, EntityRef, SecondaryMap};

/// Reference to an `if` statement in the structured tree; the lowering
/// front-end mints these (e.g. one per AST node) and is responsible for
/// keeping them stable for the duration of the analysis.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IfId(u32);
entity_impl!(IfId, "if");

/// A structured statement, as produced by the (external) front-end prior to
/// CFG flattening. Only the shapes that affect reachability are modeled;
/// ordinary assignments and expression statements are represented uniformly
/// as `Other` since the analysis doesn't inspect them.
pub enum Stmt {
    If {
        id: IfId,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    Loop {
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Return,
    /// `discard` or `discard if (cond)`. `unconditional` is true for a bare
    /// `discard` or one whose condition is a known-nonzero constant; a
    /// `discard` guarded by a non-constant (or constant-zero) condition does
    /// not by itself make the branch dead, matching the original's check
    /// against `ir->condition->as_constant()->is_zero()`.
    Discard { unconditional: bool },
    Other,
}

/// Per-`if` dead-branch annotation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeadBranch {
    pub then_dead: bool,
    pub else_dead: bool,
    pub then_dead_return: bool,
    pub else_dead_return: bool,
}

/// Result of running the analysis: one [`DeadBranch`] per [`IfId`] that was
/// visited.
pub struct DeadBranches {
    table: SecondaryMap<IfId, DeadBranch>,
}

impl DeadBranches {
    pub fn get(&self, id: IfId) -> DeadBranch {
        self.table[id]
    }
}

/// Visitor state, threaded through the recursive walk exactly as the
/// original keeps `outer_db` / `in_loop` / `in_then` as visitor fields.
struct Visitor {
    table: SecondaryMap<IfId, DeadBranch>,
}

/// The enclosing-if context during the walk: which if we annotate into, and
/// whether we're on its then-side, and whether a loop intervenes.
#[derive(Clone, Copy)]
struct Outer {
    id: IfId,
    in_then: bool,
    in_loop: bool,
}

impl Visitor {
    fn visit_return_or_discard(&mut self, outer: Option<Outer>) {
        let Some(outer) = outer else { return };
        let db = &mut self.table[outer.id];
        if outer.in_then {
            db.then_dead = true;
            db.then_dead_return = true;
        } else {
            db.else_dead = true;
            db.else_dead_return = true;
        }
    }

    fn visit_jump(&mut self, outer: Option<Outer>) {
        let Some(outer) = outer else { return };
        let db = &mut self.table[outer.id];
        if outer.in_then {
            db.then_dead = true;
        } else {
            db.else_dead = true;
        }
    }

    fn visit_list(&mut self, stmts: &[Stmt], outer: Option<Outer>) {
        for s in stmts {
            self.visit_stmt(s, outer);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt, outer: Option<Outer>) {
        match stmt {
            Stmt::If {
                id,
                then_body,
                else_body,
            } => {
                self.table[*id] = DeadBranch::default();

                let then_outer = Some(Outer {
                    id: *id,
                    in_then: true,
                    in_loop: false,
                });
                self.visit_list(then_body, then_outer);

                let else_outer = Some(Outer {
                    id: *id,
                    in_then: false,
                    in_loop: false,
                });
                self.visit_list(else_body, else_outer);

                let db = self.table[*id];
                if db.then_dead && db.else_dead {
                    if let Some(outer) = outer {
                        if db.then_dead_return && db.else_dead_return {
                            let outer_db = &mut self.table[outer.id];
                            if outer.in_then {
                                outer_db.then_dead = true;
                                outer_db.then_dead_return = true;
                            } else {
                                outer_db.else_dead = true;
                                outer_db.else_dead_return = true;
                            }
                        } else if !outer.in_loop {
                            let outer_db = &mut self.table[outer.id];
                            if outer.in_then {
                                outer_db.then_dead = true;
                            } else {
                                outer_db.else_dead = true;
                            }
                        }
                    }
                }
            }
            Stmt::Loop { body } => {
                let loop_outer = outer.map(|o| Outer { in_loop: true, ..o });
                self.visit_list(body, loop_outer);
            }
            Stmt::Break | Stmt::Continue => self.visit_jump(outer),
            Stmt::Return => self.visit_return_or_discard(outer),
            Stmt::Discard { unconditional } => {
                if *unconditional {
                    self.visit_return_or_discard(outer);
                }
            }
            Stmt::Other => {}
        }
    }
}

/// Run the dead-branch analysis over a structured statement list (the body
/// of a shader's `main`), producing one [`DeadBranch`] per `if` encountered.
pub fn analyze(body: &[Stmt]) -> DeadBranches {
    let mut v = Visitor {
        table: SecondaryMap::new(),
    };
    v.visit_list(body, None);
    DeadBranches { table: v.table }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s2_return_then_discard_else() {
        // if (a) { return; } else { discard; }
        let if0 = IfId::new(0);
        let body = vec![Stmt::If {
            id: if0,
            then_body: vec![Stmt::Return],
            else_body: vec![Stmt::Discard { unconditional: true }],
        }];
        let result = analyze(&body);
        let db = result.get(if0);
        assert_eq!(
            db,
            DeadBranch {
                then_dead: true,
                else_dead: true,
                then_dead_return: true,
                else_dead_return: true,
            }
        );
    }

    #[test]
    fn loop_suppresses_propagation_through_continue() {
        // if (outer) {
        //   while (...) {
        //     if (inner) { continue; } else { return; }
        //   }
        // }
        let outer_if = IfId::new(0);
        let inner_if = IfId::new(1);
        let body = vec![Stmt::If {
            id: outer_if,
            then_body: vec![Stmt::Loop {
                body: vec![Stmt::If {
                    id: inner_if,
                    then_body: vec![Stmt::Continue],
                    else_body: vec![Stmt::Return],
                }],
            }],
            else_body: vec![],
        }];
        let result = analyze(&body);
        let inner = result.get(inner_if);
        assert!(inner.then_dead && inner.else_dead);
        assert!(!inner.then_dead_return);
        assert!(inner.else_dead_return);

        // Both branches of inner_if are dead, but not both "dead via
        // return" (continue isn't), and a loop intervenes, so propagation
        // into outer_if's then-branch is suppressed.
        let outer = result.get(outer_if);
        assert!(!outer.then_dead);
    }

    #[test]
    fn loop_does_not_suppress_when_both_dead_via_return() {
        let outer_if = IfId::new(0);
        let inner_if = IfId::new(1);
        let body = vec![Stmt::If {
            id: outer_if,
            then_body: vec![Stmt::Loop {
                body: vec![Stmt::If {
                    id: inner_if,
                    then_body: vec![Stmt::Return],
                    else_body: vec![Stmt::Discard { unconditional: true }],
                }],
            }],
            else_body: vec![],
        }];
        let result = analyze(&body);
        let outer = result.get(outer_if);
        // Both inner branches die via return, so the function can never
        // continue past the loop regardless of the loop itself.
        assert!(outer.then_dead);
        assert!(outer.then_dead_return);
    }
}
