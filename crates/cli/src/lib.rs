use std::path::Path;

use anyhow::{bail, Result};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Infer a program name from a source path.
///
/// Uses the file stem; if the path has no usable final component, falls back
/// to `unnamed-program`.
pub fn infer_program_name(path: &Path) -> String {
    path.file_stem().and_then(|os_str| os_str.to_str()).unwrap_or("unnamed-program").to_string()
}

/// Compute the SHA-256 hash of a byte buffer and return it as a hex string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Header fields read back from an emitted executable.
///
/// This is the `inspect` command's view: just enough of the ELF64 header to
/// confirm what was built, not a general-purpose parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElfSummary {
    /// ELF class (1 = 32-bit, 2 = 64-bit).
    pub class: u8,
    /// Data encoding (1 = little-endian, 2 = big-endian).
    pub data: u8,
    /// Object file type (2 = executable).
    pub file_type: u16,
    /// Machine (0x3e = x86-64).
    pub machine: u16,
    /// Entry point virtual address.
    pub entry: u64,
    /// File offset of the program header table.
    pub phoff: u64,
    /// Number of program header entries.
    pub phnum: u16,
    /// Total file size in bytes.
    pub file_size: usize,
    /// SHA-256 of the file, hex encoded.
    pub sha256: String,
}

/// Read the ELF64 header out of an emitted file.
pub fn summarize_elf(bytes: &[u8]) -> Result<ElfSummary> {
    if bytes.len() < 64 {
        bail!("File is only {} bytes; an ELF64 header needs 64", bytes.len());
    }
    if &bytes[0..4] != b"\x7fELF" {
        bail!("File does not start with the ELF magic");
    }
    Ok(ElfSummary {
        class: bytes[4],
        data: bytes[5],
        file_type: LittleEndian::read_u16(&bytes[16..18]),
        machine: LittleEndian::read_u16(&bytes[18..20]),
        entry: LittleEndian::read_u64(&bytes[24..32]),
        phoff: LittleEndian::read_u64(&bytes[32..40]),
        phnum: LittleEndian::read_u16(&bytes[56..58]),
        file_size: bytes.len(),
        sha256: sha256_hex(bytes),
    })
}
