//! relic-core
//!
//! Core library for building relocatable binary images incrementally.
//!
//! The centerpiece is the [`image`] module: growable byte buffers that can
//! hold fixed-width placeholder pointers to positions that do not exist yet,
//! merge with each other while keeping every placeholder correct, and bake
//! the resolved values into the byte stream at the end.
//!
//! On top of that core sit two thin producer layers: a tiny x86-64 line
//! assembler ([`asm`]) and a minimal ELF64 executable emitter ([`elf`]),
//! plus the serializable build summary ([`report`]).
//!
//! All substantive logic lives here so it is fully testable and reusable
//! from multiple frontends.

pub mod asm;
pub mod elf;
pub mod image;
pub mod report;

/// Returns the library version as encoded at compile time.
///
/// Useful for tests and for frontends to report consistent version info.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
