//! Minimal ELF64 executable emission.
//!
//! Container layer for [`crate::asm`] output: lays out a 64-byte ELF header,
//! one `PT_LOAD` program header mapping the whole file, the code image, and
//! the data image, joins them exclusively with `combine`, and resolves every
//! outstanding pointer to produce the flat on-disk artifact.
//!
//! Two header fields are written through placeholders minted before any
//! layout decision is final:
//!
//! - `e_phoff` is a full-width pointer minted at offset 0 of the
//!   program-header image; the combine shifts it to the real file offset.
//! - `e_entry` is the two-byte pointer minted at offset 0 of the code image
//!   plus the load base's high bytes as literals, same scheme as `@label`
//!   operands (see [`crate::asm`]).
//!
//! Only little-endian x86-64 static executables are produced; sections and
//! symbol tables are absent on purpose.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::asm::{AssembledProgram, ADDR_WIDTH};
use crate::image::{ImageArena, ImageError};

/// Virtual address the single `PT_LOAD` segment is mapped at.
///
/// 64 KiB aligned so that `vaddr = IMAGE_BASE + file offset` never carries
/// into the high half of a patched address.
pub const IMAGE_BASE: u32 = 0x40_0000;

/// Size of the ELF64 header.
pub const EHDR_SIZE: usize = 64;

/// Size of one ELF64 program header entry.
pub const PHDR_SIZE: usize = 56;

/// Largest artifact the two-byte address scheme can cover.
pub const MAX_ARTIFACT_SIZE: usize = 0x1_0000;

const ET_EXEC: u16 = 2;
const EM_X86_64: u16 = 0x3e;
const PT_LOAD: u32 = 1;
const PF_X: u32 = 0x1;
const PF_R: u32 = 0x4;
const PAGE_SIZE: u64 = 0x1000;

/// Error type for executable emission.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ElfError {
    /// The assembled program plus headers exceeds what two-byte address
    /// placeholders can express.
    #[error("Artifact is {size} bytes; the address scheme supports at most {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("Image error: {0}")]
    Image(#[from] ImageError),
}

/// Convenience result type for executable emission.
pub type ElfResult<T> = Result<T, ElfError>;

/// A finished executable: flat bytes plus the facts worth reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfArtifact {
    /// The complete file contents, ready to write verbatim.
    pub bytes: Vec<u8>,
    /// Entry point virtual address.
    pub entry: u64,
    /// Size of the code section in bytes.
    pub code_size: usize,
    /// Size of the data section in bytes.
    pub data_size: usize,
    /// Number of pointers resolved while linking.
    pub pointers_resolved: usize,
}

/// Link an assembled program into a static ELF64 executable.
///
/// The header, program-header, code, and data images are combined in file
/// order, then the entry pointer, the `e_phoff` pointer, and every label
/// pointer are resolved against the merged image.
pub fn build_executable(
    arena: &mut ImageArena,
    program: &AssembledProgram,
) -> ElfResult<ElfArtifact> {
    let code_size = arena.len(program.code)?;
    let data_size = arena.len(program.data)?;
    let total = EHDR_SIZE + PHDR_SIZE + code_size + data_size;
    if total > MAX_ARTIFACT_SIZE {
        return Err(ElfError::TooLarge { size: total, max: MAX_ARTIFACT_SIZE });
    }

    let phdr = arena.new_image(&[]);
    let phoff = arena.mint_pointer(phdr, 8, 0)?;
    let entry = arena.mint_pointer(program.code, ADDR_WIDTH, 0)?;

    let header = arena.new_image(&[]);
    // e_ident: magic, ELFCLASS64, little-endian data, version 1, SysV ABI.
    arena.append_bytes(
        header,
        &[0x7f, b'E', b'L', b'F', 2, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    )?;
    arena.append_bytes(header, &u16le(ET_EXEC))?;
    arena.append_bytes(header, &u16le(EM_X86_64))?;
    arena.append_bytes(header, &u32le(1))?;
    // e_entry: low half patched by the entry pointer, high half literal.
    arena.append_pointer(header, entry)?;
    arena.append_bytes(header, &u16le((IMAGE_BASE >> 16) as u16))?;
    arena.append_bytes(header, &[0; 4])?;
    // e_phoff: a plain file offset, so a full-width pointer covers it.
    arena.append_pointer(header, phoff)?;
    arena.append_bytes(header, &u64le(0))?; // e_shoff: no section table
    arena.append_bytes(header, &u32le(0))?; // e_flags
    arena.append_bytes(header, &u16le(EHDR_SIZE as u16))?;
    arena.append_bytes(header, &u16le(PHDR_SIZE as u16))?;
    arena.append_bytes(header, &u16le(1))?; // e_phnum
    arena.append_bytes(header, &u16le(0))?; // e_shentsize
    arena.append_bytes(header, &u16le(0))?; // e_shnum
    arena.append_bytes(header, &u16le(0))?; // e_shstrndx

    // One R+X segment mapping the file from its first byte, so every file
    // offset is also an offset from IMAGE_BASE in memory.
    arena.append_bytes(phdr, &u32le(PT_LOAD))?;
    arena.append_bytes(phdr, &u32le(PF_R | PF_X))?;
    arena.append_bytes(phdr, &u64le(0))?; // p_offset
    arena.append_bytes(phdr, &u64le(IMAGE_BASE as u64))?; // p_vaddr
    arena.append_bytes(phdr, &u64le(IMAGE_BASE as u64))?; // p_paddr
    arena.append_bytes(phdr, &u64le(total as u64))?; // p_filesz
    arena.append_bytes(phdr, &u64le(total as u64))?; // p_memsz
    arena.append_bytes(phdr, &u64le(PAGE_SIZE))?; // p_align

    arena.combine(header, phdr)?;
    arena.combine(header, program.code)?;
    arena.combine(header, program.data)?;

    arena.resolve(entry)?;
    arena.resolve(phoff)?;
    for label in &program.labels {
        arena.resolve(label.pointer)?;
    }
    let pointers_resolved = 2 + program.labels.len();

    let bytes = arena.into_bytes(header)?;
    let entry = IMAGE_BASE as u64 + (EHDR_SIZE + PHDR_SIZE) as u64;

    Ok(ElfArtifact { bytes, entry, code_size, data_size, pointers_resolved })
}

fn u16le(value: u16) -> [u8; 2] {
    let mut buf = [0u8; 2];
    LittleEndian::write_u16(&mut buf, value);
    buf
}

fn u32le(value: u32) -> [u8; 4] {
    let mut buf = [0u8; 4];
    LittleEndian::write_u32(&mut buf, value);
    buf
}

fn u64le(value: u64) -> [u8; 8] {
    let mut buf = [0u8; 8];
    LittleEndian::write_u64(&mut buf, value);
    buf
}
