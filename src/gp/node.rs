//! The GP node-DAG (spec §3 "Node (GP)", §4.2).
//!
//! Ground: `examples/original_source/src/lima/gp_ir/gp_ir.h` (the
//! `lima_gp_ir_op_e` enum and node struct shapes) and `node.c` (the
//! per-variant operations). Ground for the *representation* choice itself:
//! spec §9 "DAG ownership" calls for an arena of indices rather than
//! single-owner trees, and `cranelift-codegen`'s `ir::entities` /
//! `cranelift-entity::PrimaryMap` is exactly that pattern (see
//! [`crate::entity`]).
//!
//! A node is a tagged sum (design note "Visitor/polymorphism": "model this
//! as a tagged sum ... with a small table of function pointers per
//! variant"). The "small table of function pointers" becomes ordinary
//! `match`-dispatched inherent methods (`children`, `delete`, ...) below,
//! since virtual dispatch buys nothing once the variant count is fixed and
//! known at compile time.

use crate::entity::{entity_impl, EntityRef, PrimaryMap};
use crate::gp::block::BlockRef;
use crate::gp::reg::RegRef;
use std::collections::HashSet;

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct NodeRef(u32);
entity_impl!(NodeRef, "n");

/// Full GP opcode set, mirroring `lima_gp_ir_op_e` one-to-one so that
/// algebraic lowering (spec §4.7) and the bundle packer (spec §4.11) can be
/// defined by simple `match`es over it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GpOp {
    Mov,
    // mul unit ops
    Mul,
    Select,
    Complex1,
    Complex2,
    // add unit ops
    Add,
    Floor,
    Sign,
    Ge,
    Lt,
    Min,
    Max,
    // mul/add ops
    Neg,
    // passthrough ops
    ClampConst,
    Preexp2,
    Postlog2,
    // complex ops
    Exp2Impl,
    Log2Impl,
    RcpImpl,
    RsqrtImpl,
    // load/store
    LoadUniform,
    LoadTemp,
    LoadAttribute,
    LoadReg,
    StoreTemp,
    StoreReg,
    StoreVarying,
    StoreTempLoadOff0,
    StoreTempLoadOff1,
    StoreTempLoadOff2,
    // branch
    BranchCond,
    // const
    Const,
    // emulated (pre-lowering) ops
    Exp2,
    Log2,
    Rcp,
    Rsqrt,
    Ceil,
    Fract,
    Exp,
    Log,
    Pow,
    Sqrt,
    Sin,
    Cos,
    Tan,
    BranchUncond,
    Abs,
    Not,
    Div,
    Mod,
    Lrp,
    Eq,
    Ne,
    F2b,
    F2i,
    // SSA-only
    Phi,
}

impl GpOp {
    pub fn is_root(self) -> bool {
        matches!(
            self,
            GpOp::StoreTemp
                | GpOp::StoreReg
                | GpOp::StoreVarying
                | GpOp::StoreTempLoadOff0
                | GpOp::StoreTempLoadOff1
                | GpOp::StoreTempLoadOff2
                | GpOp::BranchCond
                | GpOp::BranchUncond
        )
    }

    pub fn is_load(self) -> bool {
        matches!(
            self,
            GpOp::LoadUniform | GpOp::LoadTemp | GpOp::LoadAttribute | GpOp::LoadReg
        )
    }

    pub fn is_store(self) -> bool {
        matches!(
            self,
            GpOp::StoreTemp
                | GpOp::StoreReg
                | GpOp::StoreVarying
                | GpOp::StoreTempLoadOff0
                | GpOp::StoreTempLoadOff1
                | GpOp::StoreTempLoadOff2
        )
    }

    pub fn is_branch(self) -> bool {
        matches!(self, GpOp::BranchCond | GpOp::BranchUncond)
    }

    /// Number of child (operand) node slots for this op, excluding any
    /// implicit register/constant payload.
    pub fn num_children(self) -> usize {
        use GpOp::*;
        match self {
            Mov | Neg | Floor | Sign | ClampConst | Preexp2 | Postlog2 | Exp2Impl | Log2Impl
            | RcpImpl | RsqrtImpl | StoreTemp | StoreReg | StoreVarying | StoreTempLoadOff0
            | StoreTempLoadOff1 | StoreTempLoadOff2 | BranchCond | Abs | Not | Ceil | Fract
            | Exp2 | Log2 | Rcp | Rsqrt | Exp | Log | Sqrt | Sin | Cos | Tan => 1,
            Mul | Add | Ge | Lt | Min | Max | Div | Mod | Pow | Eq | Ne => 2,
            Select | Lrp | Complex1 => 3,
            Complex2 => 1,
            LoadUniform | LoadTemp | LoadAttribute | LoadReg | Const | BranchUncond | F2b
            | F2i => 0,
            Phi => 0,
        }
    }
}

/// Data private to each variant. Common bookkeeping (parents, successor,
/// dep-info, scheduling position) lives on [`Node`] so every pass can touch
/// it uniformly regardless of variant.
pub enum NodeVariant {
    Alu {
        children: Vec<NodeRef>,
        /// Per-source negate flags, consulted by constant folding (spec
        /// §4.6) and the scheduler's ALU-slot packing (spec §4.11).
        src_negate: Vec<bool>,
        dest_negate: bool,
    },
    Const {
        value: [f32; 4],
    },
    Load {
        /// For `load_uniform`/`load_attribute`: the symbol index. For
        /// `load_temp`: the temp slot index (possibly indirect via
        /// `offset_reg`).
        index: u32,
        offset_reg: Option<RegRef>,
    },
    LoadReg {
        reg: RegRef,
        component_offset: u8,
    },
    Store {
        child: NodeRef,
        /// Component write mask, low 4 bits.
        mask: u8,
        index: u32,
        offset_reg: Option<RegRef>,
    },
    StoreReg {
        reg: RegRef,
        child: NodeRef,
    },
    Branch {
        /// `None` for `branch_uncond`.
        cond: Option<NodeRef>,
        target: BlockRef,
    },
    Phi {
        reg: RegRef,
        sources: Vec<NodeRef>,
    },
}

/// Min/max latency bounds on a dependency edge (spec §4.10): the consumer
/// becomes ready no earlier than `min_dist` cycles and no later than
/// `max_dist` cycles after the producer issues.
#[derive(Clone, Copy, Debug, Default)]
pub struct DepDist {
    pub min_dist: u32,
    pub max_dist: u32,
    /// Structural DAG edge (operand of the consumer) rather than a memory
    /// anti/output dependency discovered by [`crate::gp::dep_info`].
    pub is_child_dep: bool,
}

pub struct Node {
    pub op: GpOp,
    pub size: u8,
    pub variant: NodeVariant,
    pub parents: HashSet<NodeRef>,
    /// The earliest following root node that consumes this node, spec §3
    /// "successor"; `None` for a root node's own entry or an as-yet
    /// unattached node.
    pub successor: Option<NodeRef>,
    pub dep_preds: Vec<(NodeRef, DepDist)>,
    pub dep_succs: Vec<(NodeRef, DepDist)>,
    pub max_dist: u32,
    pub sched_pos: Option<u8>,
    pub sched_instr: Option<u32>,
}

impl Node {
    fn new(op: GpOp, size: u8, variant: NodeVariant) -> Self {
        Node {
            op,
            size,
            variant,
            parents: HashSet::new(),
            successor: None,
            dep_preds: Vec::new(),
            dep_succs: Vec::new(),
            max_dist: 0,
            sched_pos: None,
            sched_instr: None,
        }
    }

    /// Lazy, finite sequence of this node's children in semantic (source)
    /// order -- the "child-iter" contract of spec §4.2.
    pub fn children(&self) -> Vec<NodeRef> {
        match &self.variant {
            NodeVariant::Alu { children, .. } => children.clone(),
            NodeVariant::Const { .. } => vec![],
            NodeVariant::Load { .. } => vec![],
            NodeVariant::LoadReg { .. } => vec![],
            NodeVariant::Store { child, .. } => vec![*child],
            NodeVariant::StoreReg { child, .. } => vec![*child],
            NodeVariant::Branch { cond, .. } => cond.into_iter().collect(),
            NodeVariant::Phi { sources, .. } => sources.clone(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut NodeRef> {
        match &mut self.variant {
            NodeVariant::Alu { children, .. } => children.iter_mut().collect(),
            NodeVariant::Store { child, .. } => vec![child],
            NodeVariant::StoreReg { child, .. } => vec![child],
            NodeVariant::Branch { cond, .. } => cond.iter_mut().collect(),
            NodeVariant::Phi { sources, .. } => sources.iter_mut().collect(),
            _ => vec![],
        }
    }
}

/// Owning arena for a single program's nodes. Deletion order (spec §5):
/// unlink from parents, recursively delete orphaned children, free dep-info
/// edges, free storage -- see [`delete`].
pub struct NodeArena {
    nodes: PrimaryMap<NodeRef, Option<Node>>,
}

impl NodeArena {
    pub fn new() -> Self {
        NodeArena {
            nodes: PrimaryMap::new(),
        }
    }

    pub fn alloc(&mut self, op: GpOp, size: u8, variant: NodeVariant) -> NodeRef {
        self.nodes.push(Some(Node::new(op, size, variant)))
    }

    pub fn get(&self, n: NodeRef) -> &Node {
        self.nodes[n].as_ref().expect("use of deleted node")
    }

    pub fn get_mut(&mut self, n: NodeRef) -> &mut Node {
        self.nodes[n].as_mut().expect("use of deleted node")
    }

    pub fn is_live(&self, n: NodeRef) -> bool {
        self.nodes.get(n).map_or(false, |slot| slot.is_some())
    }

    /// `link(parent, child)`: register `parent` in `child.parents`, then
    /// recompute `child.successor` if `parent` (being a root, or itself
    /// already pointing at an earlier root) tightens the earliest-use root.
    pub fn link(&mut self, parent: NodeRef, child: NodeRef, parent_successor: Option<NodeRef>) {
        self.get_mut(child).parents.insert(parent);
        self.recompute_successor(child, parent_successor);
    }

    fn recompute_successor(&mut self, child: NodeRef, candidate: Option<NodeRef>) {
        if let Some(cand) = candidate {
            let cur = self.get(child).successor;
            if cur.is_none() {
                self.get_mut(child).successor = Some(cand);
            }
            // A real implementation compares candidate against cur by
            // root-list order; callers in block.rs recompute exactly with
            // list position available, this is the node-local half of the
            // contract.
        }
    }

    /// `unlink(parent, child)`: remove `parent` from `child.parents`; if
    /// that empties the parent set, delete `child` (cascading); otherwise
    /// the caller is responsible for re-deriving `successor` with root-list
    /// context (see `gp::block::Block::recompute_successor`).
    pub fn unlink(&mut self, parent: NodeRef, child: NodeRef) {
        let now_empty = {
            let node = self.get_mut(child);
            node.parents.remove(&parent);
            node.parents.is_empty()
        };
        if now_empty {
            self.delete(child);
        }
    }

    /// Detach `n` from all of its children (recursively deleting any that
    /// become orphaned), drop its dep-info edges, and free its storage.
    /// Tolerates being called while some list elsewhere still names `n` --
    /// later lookups simply panic with "use of deleted node", matching the
    /// intent of "must tolerate being called during list walks" by not
    /// touching any container it doesn't own.
    pub fn delete(&mut self, n: NodeRef) {
        if !self.is_live(n) {
            return;
        }
        let children = self.get(n).children();
        for c in children {
            self.unlink(n, c);
        }
        let preds: Vec<NodeRef> = self.get(n).dep_preds.iter().map(|(p, _)| *p).collect();
        for p in preds {
            if self.is_live(p) {
                self.get_mut(p).dep_succs.retain(|(s, _)| *s != n);
            }
        }
        let succs: Vec<NodeRef> = self.get(n).dep_succs.iter().map(|(s, _)| *s).collect();
        for s in succs {
            if self.is_live(s) {
                self.get_mut(s).dep_preds.retain(|(p, _)| *p != n);
            }
        }
        self.nodes[n] = None;
    }

    /// Raw mutable iteration over every arena slot, live or not. Used only
    /// by housekeeping passes (e.g. register-index compaction) that need to
    /// rewrite references without caring whether a given node happens to be
    /// live.
    pub fn nodes_mut_for_remap(&mut self) -> impl Iterator<Item = (NodeRef, &mut Option<Node>)> {
        self.nodes.iter_mut()
    }

    /// `replace(old, new)`: redirect every parent of `old` to point to
    /// `new` instead.
    pub fn replace(&mut self, old: NodeRef, new: NodeRef) {
        let parents: Vec<NodeRef> = self.get(old).parents.iter().copied().collect();
        for p in parents {
            if !self.is_live(p) {
                continue;
            }
            for slot in self.get_mut(p).children_mut() {
                if *slot == old {
                    *slot = new;
                }
            }
            self.get_mut(new).parents.insert(p);
        }
        self.get_mut(old).parents.clear();
        self.delete(old);
    }
}

impl Default for NodeArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alu(arena: &mut NodeArena, op: GpOp, children: Vec<NodeRef>) -> NodeRef {
        let n = arena.alloc(
            op,
            4,
            NodeVariant::Alu {
                children: children.clone(),
                src_negate: vec![false; children.len()],
                dest_negate: false,
            },
        );
        for c in children {
            arena.link(n, c, None);
        }
        n
    }

    #[test]
    fn link_mirrors_into_parent_set() {
        let mut arena = NodeArena::new();
        let c = arena.alloc(GpOp::Const, 1, NodeVariant::Const { value: [1.0; 4] });
        let add = alu(&mut arena, GpOp::Add, vec![c, c]);
        assert!(arena.get(c).parents.contains(&add));
    }

    #[test]
    fn unlink_deletes_orphaned_child() {
        let mut arena = NodeArena::new();
        let c = arena.alloc(GpOp::Const, 1, NodeVariant::Const { value: [1.0; 4] });
        let mov = alu(&mut arena, GpOp::Mov, vec![c]);
        arena.unlink(mov, c);
        assert!(!arena.is_live(c));
    }

    #[test]
    fn replace_redirects_all_parents() {
        let mut arena = NodeArena::new();
        let c0 = arena.alloc(GpOp::Const, 1, NodeVariant::Const { value: [0.0; 4] });
        let c1 = arena.alloc(GpOp::Const, 1, NodeVariant::Const { value: [1.0; 4] });
        let add1 = alu(&mut arena, GpOp::Add, vec![c0, c0]);
        let add2 = alu(&mut arena, GpOp::Add, vec![c0, c0]);
        arena.replace(c0, c1);
        assert!(arena.get(add1).children().iter().all(|&x| x == c1));
        assert!(arena.get(add2).children().iter().all(|&x| x == c1));
        assert!(!arena.is_live(c0));
    }
}
