//! Symbol table packing (spec §4.14): three independent policies sharing
//! one typed symbol representation.

pub mod pack_align;
pub mod pack_attribute;
pub mod pack_std;
pub mod types;
