//! Alignment-based packing (spec §4.14): used for varyings (cap 64 floats)
//! and PP uniforms (cap 65536 components). Recurses into struct fields;
//! arrays multiply a symbol's occupancy by its element count.
//!
//! Ground: `examples/original_source/src/lima/symbols/pack.c`'s
//! `pack_align`/`pack_table_align` (the same alignment walk packs both
//! varyings, capped at 64 floats, and PP-stage uniforms, capped at 65536
//! components — GP-stage uniforms alone use [`crate::symbols::pack_std`]'s
//! two-sided vec4 grid instead, per `lima_shader_symbols_pack`).

use crate::error::{CompileError, CompileResult};
use crate::symbols::types::{round_up, PackResult, PackedSymbol, Symbol, NO_PARENT};

pub const VARYING_CAP_FLOATS: u32 = 64;
pub const PP_UNIFORM_CAP_COMPONENTS: u32 = 65536;

fn alignment(s: &Symbol) -> u32 {
    if s.is_struct() {
        s.fields.iter().map(alignment).max().unwrap_or(1)
    } else {
        match s.components {
            1 => 1,
            2 => 2,
            _ => 4,
        }
    }
}

/// Size, in floats, of one element of `s` (not multiplied by array size).
fn unit_size(s: &Symbol) -> u32 {
    if s.is_struct() {
        let mut cursor = 0u32;
        for f in &s.fields {
            cursor = round_up(cursor, alignment(f));
            cursor += unit_size(f) * f.array_size.max(1);
        }
        round_up(cursor, alignment(s))
    } else {
        s.components as u32 * s.rows.max(1) as u32
    }
}

fn pack_fields(parent: &Symbol, base_offset: u32, parent_index: u16, out: &mut Vec<PackedSymbol>) {
    let mut cursor = base_offset;
    for f in &parent.fields {
        cursor = round_up(cursor, alignment(f));
        let unit = unit_size(f);
        out.push(PackedSymbol {
            name: f.name.clone(),
            offset: cursor as u16,
            stride: unit as u16,
            parent_index,
        });
        if f.is_struct() {
            let idx = (out.len() - 1) as u16;
            pack_fields(f, cursor, idx, out);
        }
        cursor += unit * f.array_size.max(1);
    }
}

pub fn pack(symbols: &[Symbol], cap: u32, table: &'static str) -> CompileResult<PackResult> {
    let mut out = Vec::with_capacity(symbols.len());
    let mut cursor: u32 = 0;

    for s in symbols {
        let align = alignment(s);
        cursor = round_up(cursor, align);
        let unit = unit_size(s);
        let total = unit * s.array_size.max(1);
        if cursor + total > cap {
            return Err(CompileError::PackingOverflow {
                table,
                reason: format!("'{}' would exceed the {cap}-float budget", s.name),
            });
        }
        out.push(PackedSymbol {
            name: s.name.clone(),
            offset: cursor as u16,
            stride: unit as u16,
            parent_index: NO_PARENT,
        });
        if s.is_struct() {
            let idx = (out.len() - 1) as u16;
            pack_fields(s, cursor, idx, &mut out);
        }
        cursor += total;
    }

    Ok(PackResult { symbols: out, total_size: cursor })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::types::{BaseType, Precision};

    #[test]
    fn vec3_then_vec2_align_to_four_floats() {
        let syms = vec![
            Symbol::vector("v3", BaseType::Float, 3, Precision::High),
            Symbol::vector("v2", BaseType::Float, 2, Precision::High),
        ];
        let packed = pack(&syms, VARYING_CAP_FLOATS, "varying").unwrap();
        assert_eq!(packed.symbols[0].offset, 0);
        assert_eq!(packed.symbols[1].offset, 4);
    }

    #[test]
    fn struct_fields_get_parent_index() {
        let inner = Symbol {
            fields: vec![
                Symbol::scalar("x", BaseType::Float, Precision::High),
                Symbol::vector("y", BaseType::Float, 3, Precision::High),
            ],
            ..Symbol::scalar("s", BaseType::Float, Precision::High)
        };
        let packed = pack(&[inner], VARYING_CAP_FLOATS, "varying").unwrap();
        assert_eq!(packed.symbols.len(), 3);
        assert_eq!(packed.symbols[1].parent_index, 0);
        assert_eq!(packed.symbols[2].parent_index, 0);
    }

    #[test]
    fn exceeding_the_cap_overflows() {
        let syms = vec![Symbol::vector("big", BaseType::Float, 4, Precision::High).array(20)];
        assert!(pack(&syms, VARYING_CAP_FLOATS, "varying").is_err());
    }
}
