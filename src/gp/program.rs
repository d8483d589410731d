//! GP program: the top-level container (spec §3 "Program (GP)").
//!
//! Ground: `cranelift-codegen::ir::Function` owns its `DataFlowGraph` and
//! `Layout`; here a single `Program` owns the node arena, the register
//! table, and the ordered block list, with monotonic counters for register
//! indices and spill temporaries (design note "Global mutable counters":
//! these must be fields of the program object, never a process-wide
//! singleton).

use crate::entity::{EntityRef, PrimaryMap};
use crate::gp::block::{Block, BlockRef};
use crate::gp::node::NodeArena;
use crate::gp::reg::{RegRef, Register};

pub struct Program {
    pub blocks: PrimaryMap<BlockRef, Block>,
    pub nodes: NodeArena,
    pub regs: PrimaryMap<RegRef, Register>,
    /// Monotonic counter for spill-temp slots, advanced by the register
    /// allocator (spec §4.9) and consulted by the MBS writer's `FSTA` stack
    /// size.
    pub temp_alloc: u32,
}

impl Program {
    pub fn new() -> Self {
        Program {
            blocks: PrimaryMap::new(),
            nodes: NodeArena::new(),
            regs: PrimaryMap::new(),
            temp_alloc: 0,
        }
    }

    pub fn new_block(&mut self) -> BlockRef {
        self.blocks.push(Block::new())
    }

    pub fn new_reg(&mut self, size: u8) -> RegRef {
        self.regs.push(Register::new(size))
    }

    pub fn alloc_temp(&mut self) -> u32 {
        let t = self.temp_alloc;
        self.temp_alloc += 1;
        t
    }

    pub fn block_at(&self, which: BlockInsertPos) -> Option<BlockRef> {
        match which {
            BlockInsertPos::Start => self.blocks.keys().next(),
            BlockInsertPos::End => self.blocks.keys().last(),
        }
    }

    /// Compact out registers with no remaining defs or uses, and renumber
    /// the survivors so indices stay contiguous. Spec §5: "When a register
    /// becomes unreferenced ... it is compacted out during the next cleanup
    /// pass rather than being freed inline."
    pub fn compact_registers(&mut self) {
        let mut new_regs: PrimaryMap<RegRef, Register> = PrimaryMap::new();
        let mut remap = std::collections::HashMap::new();
        for (old, reg) in self.regs.iter() {
            if reg.is_unreferenced() {
                continue;
            }
            let new_reg = Register {
                size: reg.size,
                defs: reg.defs.clone(),
                uses: reg.uses.clone(),
                phys: reg.phys,
                beginning: reg.beginning,
            };
            let new_ref = new_regs.push(new_reg);
            remap.insert(old, new_ref);
        }
        self.regs = new_regs;
        self.remap_reg_refs(&remap);
    }

    fn remap_reg_refs(&mut self, remap: &std::collections::HashMap<RegRef, RegRef>) {
        use crate::gp::node::NodeVariant;
        for (_, node_slot) in self.nodes.nodes_mut_for_remap() {
            if let Some(node) = node_slot {
                match &mut node.variant {
                    NodeVariant::LoadReg { reg, .. } => {
                        if let Some(&new_r) = remap.get(reg) {
                            *reg = new_r;
                        }
                    }
                    NodeVariant::StoreReg { reg, .. } => {
                        if let Some(&new_r) = remap.get(reg) {
                            *reg = new_r;
                        }
                    }
                    NodeVariant::Phi { reg, .. } => {
                        if let Some(&new_r) = remap.get(reg) {
                            *reg = new_r;
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

pub enum BlockInsertPos {
    Start,
    End,
}
