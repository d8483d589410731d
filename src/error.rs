//! Error types for the compiler core.
//!
//! Ground: `failure`/`failure_derive` are the teacher's error-handling stack
//! (`cranelift-codegen/Cargo.toml`). The distilled spec's error kinds (§7)
//! map onto variants here; `OutOfMemory` and "invariant violation during
//! construction" are collapsed (see DESIGN.md, Open Question "OOM handling")
//! since Rust does not expose fallible-by-default allocation the way the
//! original C API did.

use failure::Fail;

#[derive(Debug, Fail)]
pub enum CompileError {
    /// The front-end reported invalid source; the info log carries the
    /// human-readable message. Compilation is aborted cleanly.
    #[fail(display = "shader source is invalid")]
    FrontendError,

    /// A symbol table exceeded its packing budget (§7: varyings > 64 floats,
    /// attributes > 16 vec4s, uniforms > 304 vec4s or 65536 components).
    #[fail(display = "{} table exceeds packing budget: {}", table, reason)]
    PackingOverflow { table: &'static str, reason: String },

    /// The scheduler could not find a legal bundle layout after exhausting
    /// the spill-and-retry path. Internal bug on well-typed input.
    #[fail(display = "scheduling failed in block {}: {}", block, reason)]
    SchedulingFailure { block: String, reason: String },

    /// An MBS chunk was malformed during import (wrong tag, truncated
    /// payload, length mismatch).
    #[fail(display = "malformed MBS chunk: {}", _0)]
    MalformedContainer(String),

    /// IR export/import round-trip failed to reproduce the original
    /// structure (see §8 property 10).
    #[fail(display = "IR deserialization failed: {}", _0)]
    MalformedIr(String),
}

pub type CompileResult<T> = Result<T, CompileError>;
