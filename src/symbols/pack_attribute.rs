//! Attribute table packing (spec §4.14): each symbol occupies a whole
//! vec4 range; arrays and structs are rejected outright.
//!
//! Ground: `examples/original_source/src/lima/symbols/pack.c`'s
//! `pack_attr`/`pack_table_attr` (fixed 16-vec4 cap, `assert`ing no arrays
//! or structs reach it at all).

use crate::error::{CompileError, CompileResult};
use crate::symbols::types::{PackResult, PackedSymbol, Symbol, NO_PARENT};

pub const MAX_VEC4S: u32 = 16;

pub fn pack(symbols: &[Symbol]) -> CompileResult<PackResult> {
    let mut out = Vec::with_capacity(symbols.len());
    let mut cursor: u32 = 0;

    for s in symbols {
        if s.array_size > 0 || s.is_struct() {
            return Err(CompileError::PackingOverflow {
                table: "attribute",
                reason: format!("'{}' is an array or struct, which attributes disallow", s.name),
            });
        }
        let rows = s.rows.max(1) as u32;
        if cursor + rows > MAX_VEC4S {
            return Err(CompileError::PackingOverflow {
                table: "attribute",
                reason: format!("'{}' would exceed the {}-vec4 attribute budget", s.name, MAX_VEC4S),
            });
        }
        out.push(PackedSymbol {
            name: s.name.clone(),
            offset: (cursor * 4) as u16,
            stride: (rows * 4) as u16,
            parent_index: NO_PARENT,
        });
        cursor += rows;
    }

    Ok(PackResult { symbols: out, total_size: cursor })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::types::{BaseType, Precision};

    #[test]
    fn sequential_attributes_get_contiguous_vec4_offsets() {
        let syms = vec![
            Symbol::vector("a_pos", BaseType::Float, 4, Precision::High),
            Symbol::vector("a_uv", BaseType::Float, 2, Precision::High),
        ];
        let packed = pack(&syms).unwrap();
        assert_eq!(packed.symbols[0].offset, 0);
        assert_eq!(packed.symbols[1].offset, 4);
        assert_eq!(packed.total_size, 2);
    }

    #[test]
    fn arrays_are_rejected() {
        let syms = vec![Symbol::vector("a", BaseType::Float, 4, Precision::High).array(2)];
        assert!(pack(&syms).is_err());
    }

    #[test]
    fn exceeding_the_budget_overflows() {
        let syms: Vec<Symbol> = (0..17)
            .map(|i| Symbol::vector(format!("a{i}"), BaseType::Float, 4, Precision::High))
            .collect();
        assert!(pack(&syms).is_err());
    }
}
