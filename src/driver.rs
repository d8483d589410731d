//! Top-level driver (spec §6.3): the `create`/`parse`/`optimize`/`compile`
//! sequence external callers drive a `Shader` through.
//!
//! Ground: `examples/original_source/src/lima/shader.h`'s
//! `lima_shader_create`/`_parse`/`_optimize`/`_compile` object lifecycle.
//! Source-level parsing is owned
//! by an external GLSL front-end (spec §1 Non-goals: "support for
//! source-level compilation errors"); `parse` here takes the already
//! lowered [`crate::hir::Program`] the way [`crate::hir`]'s own module doc
//! comment describes it ("already produced by the (external) GLSL
//! front-end").

use crate::gp;
use crate::hir;
use crate::isa::{CoreVariant, Stage};
use crate::mbs::{self, Chunk};
use crate::pp;
use crate::symbols::types::{BaseType, Precision, Symbol};
use crate::symbols::{pack_align, pack_attribute, pack_std};
use log::{error as log_error, info};

pub struct Shader {
    pub stage: Stage,
    pub core_variant: CoreVariant,
    hir: Option<hir::Program>,
    uniforms: Vec<Symbol>,
    attributes: Vec<Symbol>,
    varyings: Vec<Symbol>,
    info_log: String,
    errored: bool,
    compiled: Option<Chunk>,
}

impl Shader {
    pub fn create(stage: Stage, core_variant: CoreVariant) -> Self {
        Shader {
            stage,
            core_variant,
            hir: None,
            uniforms: Vec::new(),
            attributes: Vec::new(),
            varyings: Vec::new(),
            info_log: String::new(),
            errored: false,
            compiled: None,
        }
    }

    pub fn set_symbols(&mut self, uniforms: Vec<Symbol>, attributes: Vec<Symbol>, varyings: Vec<Symbol>) {
        self.uniforms = uniforms;
        self.attributes = attributes;
        self.varyings = varyings;
    }

    /// Accept an already-lowered program from the external front-end.
    /// Returns `false` (and records an info-log entry) on an empty
    /// program, the one "front-end error" this stage can still detect on
    /// its own.
    pub fn parse(&mut self, hir_prog: hir::Program) -> bool {
        if hir_prog.block_order().is_empty() {
            self.errored = true;
            self.info_log.push_str("shader has no basic blocks\n");
            return false;
        }
        self.hir = Some(hir_prog);
        true
    }

    /// A no-op placeholder in this core: every optimization spec §4
    /// describes runs as part of [`gp::run`]/[`pp::run`] inside
    /// [`Shader::compile`]. Kept as a separate call so callers retain the
    /// same `create`/`parse`/`optimize`/`compile` sequence as the original
    /// driver interface.
    pub fn optimize(&mut self) -> bool {
        !self.errored && self.hir.is_some()
    }

    pub fn compile(&mut self) -> bool {
        if self.errored {
            return false;
        }
        let Some(hir_prog) = self.hir.as_ref() else {
            self.errored = true;
            self.info_log.push_str("compile() called before parse()\n");
            return false;
        };

        let chunk = match self.stage {
            Stage::Vertex => self.compile_vertex(hir_prog),
            Stage::Fragment => self.compile_fragment(hir_prog),
        };

        match chunk {
            Ok(c) => {
                info!("shader compiled successfully");
                self.compiled = Some(c);
                true
            }
            Err(reason) => {
                log_error!("shader compile failed: {reason}");
                self.errored = true;
                self.info_log.push_str(&reason);
                self.info_log.push('\n');
                false
            }
        }
    }

    /// Driver-inserted uniforms every vertex shader carries, regardless of
    /// what the front-end declared (spec §8 scenario S1). Run before
    /// packing, vertex stage only.
    fn lower_builtins(&self) -> Vec<Symbol> {
        let mut out: Vec<Symbol> = self.uniforms.clone();
        out.push(Symbol {
            name: "gl_mali_ViewportTransform".to_string(),
            base: BaseType::Matrix,
            precision: Precision::High,
            components: 4,
            rows: 4,
            array_size: 0,
            invariant: false,
            fields: Vec::new(),
        });
        out
    }

    fn compile_vertex(&self, hir_prog: &hir::Program) -> Result<Chunk, String> {
        let gp_prog = gp::run(hir_prog);

        let uniform_symbols = self.lower_builtins();

        // `zip` below assumes a flat (non-struct, non-array) symbol list, so
        // each input `Symbol` lines up 1:1 with its `PackedSymbol`; a table
        // containing structs or arrays would need to walk `pack*`'s output
        // by name instead, since those expand into more entries than they
        // were given (see DESIGN.md).
        let uniforms = pack_std::pack(&uniform_symbols).map_err(|e| e.to_string())?;
        let attributes = pack_attribute::pack(&self.attributes).map_err(|e| e.to_string())?;
        let varyings = pack_align::pack(&self.varyings, pack_align::VARYING_CAP_FLOATS, "varying")
            .map_err(|e| e.to_string())?;

        let uniform_entries: Vec<Chunk> = uniform_symbols
            .iter()
            .zip(uniforms.symbols.iter())
            .map(|(s, p)| mbs::uniform_variable_chunk(s, p, [0; 9], None))
            .collect();
        let attr_entries: Vec<Chunk> = self
            .attributes
            .iter()
            .zip(attributes.symbols.iter())
            .map(|(s, p)| mbs::attribute_variable_chunk(s, p))
            .collect();
        let varying_entries: Vec<Chunk> = self
            .varyings
            .iter()
            .zip(varyings.symbols.iter())
            .map(|(s, p)| mbs::varying_variable_chunk(s, p))
            .collect();

        let num_instructions: u32 =
            gp_prog.blocks.values().map(|b| b.bundles.len() as u32).sum();

        Ok(mbs::build_vertex_program(mbs::VertexSections {
            version: self.core_variant.version_code(Stage::Vertex),
            num_instructions,
            attrib_prefetch: 0,
            uniforms: mbs::symbol_table_chunk(b"SUNI", &uniform_entries, true),
            attributes: mbs::symbol_table_chunk(b"SATT", &attr_entries, false),
            varyings: mbs::symbol_table_chunk(b"SVAR", &varying_entries, false),
            code: mbs::dbin_chunk(&[]),
        }))
    }

    fn compile_fragment(&self, hir_prog: &hir::Program) -> Result<Chunk, String> {
        let pp_prog = pp::run(hir_prog);

        let uniforms = pack_align::pack(&self.uniforms, pack_align::PP_UNIFORM_CAP_COMPONENTS, "uniform")
            .map_err(|e| e.to_string())?;
        let varyings = pack_align::pack(&self.varyings, pack_align::VARYING_CAP_FLOATS, "varying")
            .map_err(|e| e.to_string())?;

        let uniform_entries: Vec<Chunk> = self
            .uniforms
            .iter()
            .zip(uniforms.symbols.iter())
            .map(|(s, p)| mbs::uniform_variable_chunk(s, p, [0; 9], None))
            .collect();
        let varying_entries: Vec<Chunk> = self
            .varyings
            .iter()
            .zip(varyings.symbols.iter())
            .map(|(s, p)| mbs::varying_variable_chunk(s, p))
            .collect();

        let has_discard = hir_prog.block_order().iter().any(|&b| hir_prog.blocks[b].discards);
        let fbuu = hir_prog.fbuu_flags();

        Ok(mbs::build_fragment_program(mbs::FragmentSections {
            version: self.core_variant.version_code(Stage::Fragment),
            stack_size: pp_prog.regs.len() as u32,
            stack_offset: 0,
            has_discard,
            reads_color: fbuu.reads_color,
            writes_color: fbuu.writes_color,
            reads_depth: fbuu.reads_depth,
            writes_depth: fbuu.writes_depth,
            reads_stencil: fbuu.reads_stencil,
            writes_stencil: fbuu.writes_stencil,
            uniforms: mbs::symbol_table_chunk(b"SUNI", &uniform_entries, true),
            varyings: mbs::symbol_table_chunk(b"SVAR", &varying_entries, false),
            code: mbs::dbin_chunk(&[]),
        }))
    }

    pub fn info_log(&self) -> &str {
        &self.info_log
    }

    pub fn error(&self) -> bool {
        self.errored
    }

    pub fn export_offline(&self) -> Option<&Chunk> {
        self.compiled.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{BranchCond, Op, Operand, Program as HirProgram};
    use crate::symbols::types::{BaseType, Precision};

    #[test]
    fn trivial_pass_through_vertex_shader_compiles() {
        let mut hp = HirProgram::new();
        let b0 = hp.new_block();
        let v0 = hp.push_command(b0, Op::Mov, 4, vec![Operand::Const([0.0; 4])]);
        let out_cmd = hir_result_command(&hp, v0);
        hp.blocks[b0].output = Some(out_cmd);
        hp.blocks[b0].branch = BranchCond::Always;

        let mut shader = Shader::create(Stage::Vertex, CoreVariant::Mali400);
        shader.set_symbols(
            vec![],
            vec![Symbol::vector("a_pos", BaseType::Float, 4, Precision::High)],
            vec![Symbol::vector("gl_Position", BaseType::Float, 4, Precision::High)],
        );
        assert!(shader.parse(hp));
        assert!(shader.optimize());
        assert!(shader.compile());
        assert!(!shader.error());
        assert!(shader.export_offline().is_some());
    }

    fn hir_result_command(hp: &HirProgram, v: crate::hir::Value) -> crate::hir::Command {
        hp.commands.keys().find(|&c| hp.commands[c].result == v).unwrap()
    }

    #[test]
    fn fragment_shader_reports_real_fbuu_flags_from_its_hir() {
        let mut hp = HirProgram::new();
        let b0 = hp.new_block();
        let color_in = hp.push_command(b0, Op::Mov, 4, vec![Operand::FramebufferColor]);
        let color_out = hp.push_command(b0, Op::Add, 4, vec![Operand::Value(color_in), Operand::Const([0.0; 4])]);
        let depth_out = hp.push_command(b0, Op::Mov, 1, vec![Operand::Const([1.0; 4])]);
        hp.blocks[b0].output = Some(hir_result_command(&hp, color_out));
        hp.blocks[b0].output_depth = Some(hir_result_command(&hp, depth_out));
        hp.blocks[b0].branch = BranchCond::Always;

        let mut shader = Shader::create(Stage::Fragment, CoreVariant::Mali200);
        shader.set_symbols(vec![], vec![], vec![]);
        assert!(shader.parse(hp));
        assert!(shader.optimize());
        assert!(shader.compile());

        let chunk = shader.export_offline().unwrap();
        let bytes = chunk.encode();
        let fbuu = find_fbuu_chunk(&bytes);
        assert_eq!(fbuu[0], 1, "reads_color");
        assert_eq!(fbuu[1], 1, "writes_color");
        assert_eq!(fbuu[2], 0, "reads_depth");
        assert_eq!(fbuu[3], 1, "writes_depth");
        assert_eq!(fbuu[4], 0, "reads_stencil");
        assert_eq!(fbuu[5], 0, "writes_stencil");
    }

    /// Scan an encoded MBS byte stream for the `FBUU` chunk tag and return
    /// its 8-byte flag payload.
    fn find_fbuu_chunk(bytes: &[u8]) -> [u8; 8] {
        let tag = b"FBUU";
        let pos = bytes
            .windows(4)
            .position(|w| w == tag)
            .expect("FBUU chunk present");
        let payload_start = pos + 8;
        bytes[payload_start..payload_start + 8].try_into().unwrap()
    }

    #[test]
    fn empty_program_fails_to_parse() {
        let mut shader = Shader::create(Stage::Fragment, CoreVariant::Mali200);
        assert!(!shader.parse(HirProgram::new()));
        assert!(shader.error());
    }
}
