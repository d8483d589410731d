//! Mid/back-end code generator for the Utgard GP (geometry processor) and
//! PP (pixel processor) shader architecture.

#![deny(trivial_numeric_casts, unused_extern_crates)]
#![warn(missing_docs, unused_import_braces)]
#![cfg_attr(feature = "std", deny(unstable_features))]
#![no_std]

#[cfg(not(feature = "std"))]
#[macro_use]
extern crate alloc as std;
#[cfg(feature = "std")]
#[macro_use]
extern crate std;

pub use crate::driver::Shader;
pub use crate::error::{CompileError, CompileResult};

pub mod bitset;
pub mod dead_branch;
pub mod driver;
pub mod entity;
pub mod error;
pub mod gp;
pub mod hir;
pub mod isa;
pub mod mbs;
pub mod pp;
pub mod symbols;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
