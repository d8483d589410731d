//! Virtual and physical registers (spec §3 "Register (virtual)" / "Register
//! (physical)").
//!
//! Ground: `cranelift-codegen/src/regalloc/affinity.rs` (an allocation's
//! affinity is separate, secondary data keyed by `Value`, not a field
//! fighting for space on the value itself) and
//! `src/lima/gp_ir/reg.c`/`gp_ir.h` for the virtual register's def/use set
//! and the `beginning` (component-0 alignment) flag.

use crate::entity::{entity_impl, EntityRef};
use crate::gp::node::NodeRef;
use std::collections::HashSet;

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct RegRef(u32);
entity_impl!(RegRef, "r");

/// A physical GP register: one of 16 vec4 banks, 4 components each.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct PhysReg {
    pub index: u8,
    pub offset: u8,
}

pub struct Register {
    /// 1-4.
    pub size: u8,
    pub defs: HashSet<NodeRef>,
    pub uses: HashSet<NodeRef>,
    pub phys: Option<PhysReg>,
    /// Demands component-0 alignment within its allocated physical slot
    /// (e.g. varying/attribute sources that must start at lane 0).
    pub beginning: bool,
}

impl Register {
    pub fn new(size: u8) -> Self {
        Register {
            size,
            defs: HashSet::new(),
            uses: HashSet::new(),
            phys: None,
            beginning: false,
        }
    }

    pub fn add_def(&mut self, n: NodeRef) {
        self.defs.insert(n);
    }

    pub fn add_use(&mut self, n: NodeRef) {
        self.uses.insert(n);
    }

    pub fn remove_def(&mut self, n: NodeRef) {
        self.defs.remove(&n);
    }

    pub fn remove_use(&mut self, n: NodeRef) {
        self.uses.remove(&n);
    }

    pub fn is_unreferenced(&self) -> bool {
        self.defs.is_empty() && self.uses.is_empty()
    }
}
