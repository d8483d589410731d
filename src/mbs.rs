//! MBS binary container (spec §6.1): a little-endian, four-char-tag
//! nested-chunk format used to ship compiled shader binaries.
//!
//! Ground: `examples/original_source/src/lima/mbs/mbs.c`'s `mbs_chunk_t`
//! writer/reader pair (`mbs_chunk_export`/`mbs_chunk_create`); the generic
//! `Chunk::encode`/`Chunk::parse` pair below plays the same role as the
//! teacher's `bincode`-based IR serialization in spirit, carried over as a
//! hand-rolled reader/writer since the container's tag/size framing is
//! part of an external ABI, not something `serde` derives for us.

use crate::error::{CompileError, CompileResult};
use crate::symbols::types::{PackedSymbol, Symbol};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub tag: [u8; 4],
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn new(tag: &[u8; 4]) -> Self {
        Chunk { tag: *tag, data: Vec::new() }
    }

    pub fn push_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn push_u16(&mut self, v: u16) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn push_u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn push_chunk(&mut self, child: &Chunk) {
        self.data.extend(child.encode());
    }

    /// A NUL-terminated string chunk (`STRI`), padded to a 4-byte boundary.
    pub fn string_chunk(s: &str) -> Chunk {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        Chunk { tag: *b"STRI", data: bytes }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.data.len());
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Parse one chunk (and consume exactly its header + `size` bytes)
    /// from the front of `bytes`, returning the chunk and the remaining
    /// slice.
    pub fn parse(bytes: &[u8]) -> CompileResult<(Chunk, &[u8])> {
        if bytes.len() < 8 {
            return Err(CompileError::MalformedContainer("chunk header truncated".into()));
        }
        let tag = [bytes[0], bytes[1], bytes[2], bytes[3]];
        let size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        if bytes.len() < 8 + size {
            return Err(CompileError::MalformedContainer(format!(
                "chunk {:?} declares size {} but only {} bytes remain",
                tag,
                size,
                bytes.len() - 8
            )));
        }
        let data = bytes[8..8 + size].to_vec();
        Ok((Chunk { tag, data }, &bytes[8 + size..]))
    }

    /// Parse every chunk directly nested at top level of `self.data`.
    pub fn children(&self) -> CompileResult<Vec<Chunk>> {
        let mut rest = self.data.as_slice();
        let mut out = Vec::new();
        while !rest.is_empty() {
            let (c, r) = Chunk::parse(rest)?;
            out.push(c);
            rest = r;
        }
        Ok(out)
    }
}

/// The fixed 20-byte per-symbol payload struct (spec §6.1), common to
/// `VUNI`/`VVAR`/`VATT`.
fn symbol_payload(sym: &Symbol, packed: &PackedSymbol) -> Vec<u8> {
    let mut buf = Vec::with_capacity(20);
    buf.push(0u8); // zero
    buf.push(sym.type_code());
    buf.extend_from_slice(&(sym.components as u16).to_le_bytes());
    buf.extend_from_slice(&(sym.rows.max(1) as u16 * sym.components.max(1) as u16).to_le_bytes());
    buf.extend_from_slice(&(sym.array_size as u16).to_le_bytes());
    buf.extend_from_slice(&packed.stride.to_le_bytes());
    buf.push(0u8); // unknown
    buf.push(sym.precision.code());
    buf.extend_from_slice(&(sym.invariant as u32).to_le_bytes());
    buf.extend_from_slice(&packed.offset.to_le_bytes());
    buf.extend_from_slice(&packed.parent_index.to_le_bytes());
    buf
}

fn variable_chunk(tag: &[u8; 4], sym: &Symbol, packed: &PackedSymbol) -> Chunk {
    let mut c = Chunk::new(tag);
    c.push_chunk(&Chunk::string_chunk(&sym.name));
    c.push_bytes(&symbol_payload(sym, packed));
    c
}

/// Build a `VUNI` entry, including its mandatory `VIDX` sub-chunk and an
/// optional `VINI` constant initializer.
pub fn uniform_variable_chunk(sym: &Symbol, packed: &PackedSymbol, vidx: [u32; 9], initializer: Option<&[u8]>) -> Chunk {
    let mut c = variable_chunk(b"VUNI", sym, packed);
    let mut idx = Chunk::new(b"VIDX");
    for v in vidx {
        idx.push_u32(v);
    }
    c.push_chunk(&idx);
    if let Some(init) = initializer {
        let mut vini = Chunk::new(b"VINI");
        vini.push_bytes(init);
        c.push_chunk(&vini);
    }
    c
}

pub fn varying_variable_chunk(sym: &Symbol, packed: &PackedSymbol) -> Chunk {
    variable_chunk(b"VVAR", sym, packed)
}

pub fn attribute_variable_chunk(sym: &Symbol, packed: &PackedSymbol) -> Chunk {
    variable_chunk(b"VATT", sym, packed)
}

/// `SUNI`/`SVAR`/`SATT`: a `u32` count followed by that many child chunks.
/// The outer size for `SUNI` is rounded up to a multiple of four per spec.
pub fn symbol_table_chunk(tag: &[u8; 4], entries: &[Chunk], round_size_to_four: bool) -> Chunk {
    let mut c = Chunk::new(tag);
    c.push_u32(entries.len() as u32);
    for e in entries {
        c.push_chunk(e);
    }
    if round_size_to_four {
        while c.data.len() % 4 != 0 {
            c.data.push(0);
        }
    }
    c
}

pub fn dbin_chunk(machine_code: &[u8]) -> Chunk {
    let mut c = Chunk::new(b"DBIN");
    c.push_bytes(machine_code);
    c
}

pub struct VertexSections {
    pub version: u32,
    pub num_instructions: u32,
    pub attrib_prefetch: u32,
    pub uniforms: Chunk,
    pub attributes: Chunk,
    pub varyings: Chunk,
    pub code: Chunk,
}

pub fn build_vertex_program(s: VertexSections) -> Chunk {
    let mut fins = Chunk::new(b"FINS");
    fins.push_u32(0);
    fins.push_u32(s.num_instructions);
    fins.push_u32(s.attrib_prefetch);

    let mut cver = Chunk::new(b"CVER");
    cver.push_u32(s.version);
    cver.push_chunk(&fins);
    cver.push_chunk(&s.uniforms);
    cver.push_chunk(&s.attributes);
    cver.push_chunk(&s.varyings);
    cver.push_chunk(&s.code);

    let mut mbs1 = Chunk::new(b"MBS1");
    mbs1.push_chunk(&cver);
    mbs1
}

pub struct FragmentSections {
    pub version: u32,
    pub stack_size: u32,
    pub stack_offset: u32,
    pub has_discard: bool,
    pub reads_color: bool,
    pub writes_color: bool,
    pub reads_depth: bool,
    pub writes_depth: bool,
    pub reads_stencil: bool,
    pub writes_stencil: bool,
    pub uniforms: Chunk,
    pub varyings: Chunk,
    pub code: Chunk,
}

pub fn build_fragment_program(s: FragmentSections) -> Chunk {
    let mut fsta = Chunk::new(b"FSTA");
    fsta.push_u32(s.stack_size);
    fsta.push_u32(s.stack_offset);

    let mut fdis = Chunk::new(b"FDIS");
    fdis.push_u32(s.has_discard as u32);

    let mut fbuu = Chunk::new(b"FBUU");
    fbuu.push_u8(s.reads_color as u8);
    fbuu.push_u8(s.writes_color as u8);
    fbuu.push_u8(s.reads_depth as u8);
    fbuu.push_u8(s.writes_depth as u8);
    fbuu.push_u8(s.reads_stencil as u8);
    fbuu.push_u8(s.writes_stencil as u8);
    fbuu.push_u8(0);
    fbuu.push_u8(0);

    let mut cfra = Chunk::new(b"CFRA");
    cfra.push_u32(s.version);
    cfra.push_chunk(&fsta);
    cfra.push_chunk(&fdis);
    cfra.push_chunk(&fbuu);
    cfra.push_chunk(&s.uniforms);
    cfra.push_chunk(&s.varyings);
    cfra.push_chunk(&s.code);

    let mut mbs1 = Chunk::new(b"MBS1");
    mbs1.push_chunk(&cfra);
    mbs1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_round_trips_through_encode_and_parse() {
        let mut c = Chunk::new(b"TEST");
        c.push_u32(42);
        c.push_bytes(b"hi");
        let bytes = c.encode();
        let (parsed, rest) = Chunk::parse(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, c);
    }

    #[test]
    fn nested_chunks_parse_back_as_children() {
        let mut outer = Chunk::new(b"MBS1");
        let inner = Chunk::string_chunk("hello");
        outer.push_chunk(&inner);
        let children = outer.children().unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].tag, *b"STRI");
    }
}
