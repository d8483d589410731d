//! GLSL-ES standard uniform packing (spec §4.14, GP uniforms): a fixed
//! 4-column by `MAX_VEC4S`-row grid, filled from both ends at once — a
//! low-water cursor per column, plus a shared high-water cursor per column
//! used only as the 2-component fallback once a pair's low rows collide
//! with their sibling's.
//!
//! Ground: `examples/original_source/src/lima/symbols/pack.c`'s
//! `pack_std`/`pack_table_std` (called with `num_vec4s = 304` from
//! `symbols/pack.c:514`). `free_low`/`free_high` here are that function's
//! `std_pack_state_t` fields verbatim: wide symbols (2-4 components) are
//! tried flush against columns `0..components` first, and only a
//! 2-component symbol falls back to `high_pos - my_num_rows` against an
//! adjacent column pair when the low side is full; `total_size` becomes the
//! full `MAX_VEC4S` budget the moment any column's high side is ever
//! touched, matching `pack_table_std`'s all-or-nothing rule, rather than
//! shrinking to whatever was actually used.

use crate::error::{CompileError, CompileResult};
use crate::symbols::types::{BaseType, PackResult, PackedSymbol, Symbol, NO_PARENT};

pub const MAX_VEC4S: u32 = 304;

struct FixedGrid {
    free_low: [u32; 4],
    free_high: [u32; 4],
}

impl FixedGrid {
    fn new(cap: u32) -> Self {
        FixedGrid { free_low: [0; 4], free_high: [cap; 4] }
    }

    /// 2, 3 or 4 component symbol: first try flush against columns
    /// `0..components` (no sliding search — the real packer never tries
    /// starting past column 0), then, for width 2 only, the three adjacent
    /// column pairs' high-row fallback.
    fn place_wide(&mut self, components: u8, num_rows: u32) -> Option<(u32, u8)> {
        let n = components as usize;
        let low_pos = self.free_low[..n].iter().copied().max().unwrap();
        let high_pos = self.free_high[..n].iter().copied().min().unwrap();
        if low_pos + num_rows <= high_pos {
            for slot in self.free_low[..n].iter_mut() {
                *slot = low_pos + num_rows;
            }
            return Some((low_pos, 0));
        }

        if n != 2 {
            return None;
        }

        for col in 0..3 {
            let low_pos = self.free_low[col].max(self.free_low[col + 1]);
            let high_pos = self.free_high[col].min(self.free_high[col + 1]);
            if high_pos >= num_rows && high_pos - num_rows >= low_pos {
                let row = high_pos - num_rows;
                self.free_high[col] = row;
                self.free_high[col + 1] = row;
                return Some((row, col as u8));
            }
        }
        None
    }

    /// 1-component symbol: the column with the least remaining space that
    /// still fits, filled from its low side.
    fn place_scalar(&mut self, num_rows: u32) -> Option<(u32, u8)> {
        let mut best: Option<(usize, u32)> = None;
        for col in 0..4 {
            let space_left = self.free_high[col] - self.free_low[col];
            if space_left < num_rows {
                continue;
            }
            if best.map(|(_, s)| space_left < s).unwrap_or(true) {
                best = Some((col, space_left));
            }
        }
        let (col, _) = best?;
        let row = self.free_low[col];
        self.free_low[col] += num_rows;
        Some((row, col as u8))
    }

    /// Did any column's high side ever get touched by a fallback placement?
    fn high_side_touched(&self, cap: u32) -> bool {
        self.free_high.iter().any(|&h| h != cap)
    }
}

fn type_rank(s: &Symbol) -> (u8, u8, i32) {
    let sampler_rank = s.base.sampler_rank();
    let struct_rank: u8 = if s.is_struct() { 0 } else { 1 };
    let width = if s.is_struct() {
        0
    } else {
        -(s.components as i32 * s.rows.max(1) as i32)
    };
    (sampler_rank, struct_rank, width)
}

fn place_struct(
    grid: &mut FixedGrid,
    s: &Symbol,
    out: &mut Vec<PackedSymbol>,
    parent_index: u16,
) -> CompileResult<()> {
    // Align all four columns' low cursors to a common base row first, so
    // the struct (and each of its fields) has one consistent base offset.
    let offset = grid.free_low.iter().copied().max().unwrap();
    for col in 0..4 {
        if grid.free_high[col] < offset {
            return Err(overflow("struct base row exceeds the uniform budget"));
        }
        grid.free_low[col] = offset;
    }

    let idx = out.len();
    out.push(PackedSymbol { name: s.name.clone(), offset: (offset * 4) as u16, stride: 0, parent_index });

    for f in &s.fields {
        place_one(grid, f, out, idx as u16)?;
    }

    // Re-align to the end of the struct's fields, then reserve (without
    // re-packing) the space for any trailing array elements.
    let end_offset = grid.free_low.iter().copied().max().unwrap();
    let size = end_offset - offset;
    let extra = size * s.array_size.saturating_sub(1);
    for col in 0..4 {
        if grid.free_high[col] < end_offset + extra {
            return Err(overflow("struct array exceeds the uniform budget"));
        }
        grid.free_low[col] = end_offset + extra;
    }

    out[idx].stride = (size * 4) as u16;
    Ok(())
}

fn place_one(grid: &mut FixedGrid, s: &Symbol, out: &mut Vec<PackedSymbol>, parent_index: u16) -> CompileResult<()> {
    if s.is_struct() {
        return place_struct(grid, s, out, parent_index);
    }

    let components = s.components.max(1);
    let num_rows = s.rows.max(1) as u32 * s.array_size.max(1);

    let placed = if components == 1 {
        grid.place_scalar(num_rows)
    } else {
        grid.place_wide(components, num_rows)
    };
    let Some((row, col)) = placed else {
        return Err(overflow(&format!("'{}' does not fit in any column", s.name)));
    };

    out.push(PackedSymbol {
        name: s.name.clone(),
        offset: (row * 4 + col as u32) as u16,
        stride: (4 * s.rows.max(1) as u32) as u16,
        parent_index,
    });
    Ok(())
}

fn overflow(reason: &str) -> CompileError {
    CompileError::PackingOverflow { table: "uniform", reason: reason.to_string() }
}

pub fn pack(symbols: &[Symbol]) -> CompileResult<PackResult> {
    let mut ordered: Vec<&Symbol> = symbols.iter().collect();
    ordered.sort_by(|a, b| {
        type_rank(a)
            .cmp(&type_rank(b))
            .then_with(|| b.array_size.cmp(&a.array_size).then_with(|| a.name.cmp(&b.name)))
    });

    let mut grid = FixedGrid::new(MAX_VEC4S);
    let mut out = Vec::with_capacity(symbols.len());
    for s in ordered {
        place_one(&mut grid, s, &mut out, NO_PARENT)?;
    }

    let total_size = if grid.high_side_touched(MAX_VEC4S) {
        MAX_VEC4S
    } else {
        grid.free_low.iter().copied().max().unwrap()
    };

    Ok(PackResult { symbols: out, total_size })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::types::Precision;

    #[test]
    fn vec4_occupies_all_four_columns_of_one_row() {
        let syms = vec![Symbol::vector("mvp_row", BaseType::Float, 4, Precision::High)];
        let packed = pack(&syms).unwrap();
        assert_eq!(packed.symbols[0].offset, 0);
        assert_eq!(packed.total_size, 1);
    }

    #[test]
    fn scalar_prefers_the_column_that_leaves_the_least_space_left() {
        // The vec3 takes columns 0-2 of row 0, leaving column 3 empty and
        // columns 0-2 with one fewer free row than column 3. A scalar
        // fills whichever column leaves the *least* remaining space, i.e.
        // one of the already-touched columns, not the untouched one.
        let syms = vec![
            Symbol::vector("v", BaseType::Float, 3, Precision::High),
            Symbol::scalar("s", BaseType::Float, Precision::High),
        ];
        let packed = pack(&syms).unwrap();
        let s_entry = packed.symbols.iter().find(|p| p.name == "s").unwrap();
        assert_ne!(s_entry.offset % 4, 3);
    }

    #[test]
    fn vec2_falls_back_to_the_high_row_of_the_next_column_pair() {
        // Column 0 is already full, so the flush-low try against columns
        // (0, 1) fails; the fallback loop then tries (1, 2), which still
        // has room on both sides, and must consume from
        // `high_pos - num_rows` rather than column 1's low cursor.
        let mut grid = FixedGrid::new(10);
        grid.free_low[0] = 10;
        let placed = grid.place_wide(2, 1);
        assert_eq!(placed, Some((9, 1)));
        assert_eq!(grid.free_high[1], 9);
        assert_eq!(grid.free_high[2], 9);
        assert!(grid.high_side_touched(10));
    }

    #[test]
    fn total_size_jumps_to_the_full_budget_once_any_high_side_is_touched() {
        // Once any column's high side has been consumed, `pack_table_std`'s
        // rule reports the entire fixed budget, not `free_low`'s max.
        let mut grid = FixedGrid::new(MAX_VEC4S);
        grid.free_low[0] = MAX_VEC4S;
        grid.place_wide(2, 1).unwrap();
        assert!(grid.high_side_touched(MAX_VEC4S));

        // Ordinary input with room to spare never touches the high side,
        // so a fresh `pack()` call reports a proportional total_size.
        let syms = vec![
            Symbol::vector("v4", BaseType::Float, 4, Precision::High),
            Symbol::vector("pair", BaseType::Float, 2, Precision::High),
        ];
        let packed = pack(&syms).unwrap();
        assert!(packed.total_size < MAX_VEC4S);
    }

    #[test]
    fn exceeding_the_vec4_budget_overflows() {
        let syms: Vec<Symbol> = (0..400)
            .map(|i| Symbol::vector(format!("u{i}"), BaseType::Float, 4, Precision::High))
            .collect();
        assert!(pack(&syms).is_err());
    }
}
