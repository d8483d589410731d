//! The common high-level IR (spec §2 item 2, §3 "Command (PP HIR)" / "Block
//! (PP HIR)"): a typed, SSA-capable basic-block IR with phi nodes, already
//! produced by the (external) GLSL front-end. Both backends consume it:
//!
//! - The PP backend ([`crate::pp`]) uses it close to verbatim as its HIR.
//! - The GP backend ([`crate::gp`]) lowers it into the node-DAG form
//!   described in spec §4.2 and then runs its own dominance-based SSA
//!   construction (spec §4.3) starting from the non-SSA register writes this
//!   IR's `Command::Assign` nodes represent.
//!
//! Grounded in `cranelift-codegen`'s `ir::Function`/`flowgraph` split: values
//! and instructions are entity references into arenas owned by the
//! `Program`, and per-block successor/predecessor bookkeeping lives
//! alongside the block rather than being recomputed ad hoc.

use crate::entity::{entity_impl, EntityRef, PrimaryMap, SecondaryMap};

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(u32);
entity_impl!(Value, "v");

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Command(u32);
entity_impl!(Command, "c");

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// The shared scalar/vector opcode set that both backends' algebraic
/// lowering (spec §4.7) and constant folding (spec §4.6) are defined over.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Mov,
    Add,
    Mul,
    Neg,
    Abs,
    Not,
    Div,
    Mod,
    Lrp,
    Floor,
    Ceil,
    Fract,
    Sign,
    Min,
    Max,
    Ge,
    Lt,
    Eq,
    Ne,
    Rcp,
    Rsqrt,
    Exp2,
    Log2,
    Sin,
    Cos,
    Tan,
    Pow,
    Sqrt,
    Exp,
    Log,
    F2b,
    F2i,
    Select,
}

impl Op {
    /// Number of source operands this op consumes.
    pub fn arity(self) -> usize {
        use Op::*;
        match self {
            Mov | Neg | Abs | Not | Floor | Ceil | Fract | Sign | Rcp | Rsqrt | Exp2 | Log2
            | Sin | Cos | Tan | Exp | Log | Sqrt | F2b | F2i => 1,
            Add | Mul | Div | Mod | Min | Max | Ge | Lt | Eq | Ne | Pow => 2,
            Lrp | Select => 3,
        }
    }
}

/// A source operand: either another command's result, a pipeline-local
/// constant, or a block parameter (phi destination treated uniformly with
/// ordinary values once renamed).
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Operand {
    Value(Value),
    Const([f32; 4]),
    /// The framebuffer's current contents at this fragment, read for
    /// blending (`FBUU` `reads_color` bit).
    FramebufferColor,
    /// The framebuffer's current depth value, read for a manual depth test.
    FramebufferDepth,
    /// The framebuffer's current stencil value.
    FramebufferStencil,
}

/// A single IR operation, producing a [`Value`] of a given component size
/// (1-4). Source operands may reference other commands (via [`Value`]) or
/// constants.
pub struct CommandData {
    pub op: Op,
    pub size: u8,
    pub args: Vec<Operand>,
    pub result: Value,
}

/// Phi node: sits at the head of a block, one source value per predecessor,
/// in the same order as `Block::preds`.
pub struct Phi {
    pub dest: Value,
    pub sources: Vec<Value>,
}

/// Branch-condition metadata terminating a block (spec §3 "Block (PP HIR)").
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BranchCond {
    Always,
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
}

pub struct BlockData {
    pub phis: Vec<Phi>,
    pub commands: Vec<Command>,
    pub branch: BranchCond,
    /// The two operands the branch condition compares, when `branch !=
    /// Always`.
    pub cond_sources: [Option<Value>; 2],
    /// Up to two successors; `next[1]` is `None` for an unconditional
    /// branch or a block with no successor (end of function).
    pub next: [Option<Block>; 2],
    pub preds: Vec<Block>,
    pub is_end: bool,
    pub discards: bool,
    /// The command (if any) whose result is this block's "output" --- e.g.
    /// the value driving a fragment's `store_varying`-equivalent, or (for a
    /// fragment shader) its color output.
    pub output: Option<Command>,
    /// A fragment shader's `gl_FragDepth` write, when present.
    pub output_depth: Option<Command>,
    /// A fragment shader's manual stencil write, when present.
    pub output_stencil: Option<Command>,
}

impl BlockData {
    fn new() -> Self {
        BlockData {
            phis: Vec::new(),
            commands: Vec::new(),
            branch: BranchCond::Always,
            cond_sources: [None, None],
            next: [None, None],
            preds: Vec::new(),
            is_end: false,
            discards: false,
            output: None,
            output_depth: None,
            output_stencil: None,
        }
    }
}

pub struct Program {
    pub blocks: PrimaryMap<Block, BlockData>,
    pub commands: PrimaryMap<Command, CommandData>,
    values: SecondaryMap<Value, ()>,
    next_value: u32,
}

impl Program {
    pub fn new() -> Self {
        Program {
            blocks: PrimaryMap::new(),
            commands: PrimaryMap::new(),
            values: SecondaryMap::new(),
            next_value: 0,
        }
    }

    pub fn new_value(&mut self) -> Value {
        let v = Value::new(self.next_value as usize);
        self.next_value += 1;
        v
    }

    pub fn new_block(&mut self) -> Block {
        self.blocks.push(BlockData::new())
    }

    pub fn push_command(&mut self, block: Block, op: Op, size: u8, args: Vec<Operand>) -> Value {
        let result = self.new_value();
        let cmd = self.commands.push(CommandData {
            op,
            size,
            args,
            result,
        });
        self.blocks[block].commands.push(cmd);
        result
    }

    pub fn add_edge(&mut self, from: Block, to: Block, slot: usize) {
        self.blocks[from].next[slot] = Some(to);
        self.blocks[to].preds.push(from);
    }

    /// All blocks in insertion order (the front-end is responsible for
    /// producing them in reverse-post-order, per the RPO contract in spec
    /// §9 "Back edges and dominator tree").
    pub fn block_order(&self) -> Vec<Block> {
        self.blocks.keys().collect()
    }

    /// One linear scan over every command's operands and every block's
    /// output slots, producing a fragment shader's `FBUU` read/write
    /// summary.
    pub fn fbuu_flags(&self) -> FbuuFlags {
        let mut flags = FbuuFlags::default();
        for block in self.blocks.values() {
            flags.writes_color |= block.output.is_some();
            flags.writes_depth |= block.output_depth.is_some();
            flags.writes_stencil |= block.output_stencil.is_some();
            for &cmd in &block.commands {
                for arg in &self.commands[cmd].args {
                    match arg {
                        Operand::FramebufferColor => flags.reads_color = true,
                        Operand::FramebufferDepth => flags.reads_depth = true,
                        Operand::FramebufferStencil => flags.reads_stencil = true,
                        Operand::Value(_) | Operand::Const(_) => {}
                    }
                }
            }
        }
        flags
    }
}

/// A fragment shader's framebuffer read/write summary, shipped in the
/// `FBUU` chunk.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FbuuFlags {
    pub reads_color: bool,
    pub writes_color: bool,
    pub reads_depth: bool,
    pub writes_depth: bool,
    pub reads_stencil: bool,
    pub writes_stencil: bool,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}
