//! Minimal x86-64 instruction encoder and line assembler.
//!
//! This is a producer layer on top of [`crate::image`]: it turns a tiny
//! line-oriented source format into a code image and a data image full of
//! placeholder pointers, and leaves consolidation and resolution to the
//! container layer (see [`crate::elf`]).
//!
//! The instruction selection is deliberately small, just enough to express a
//! static "write something and exit" program:
//!
//! - `mov <reg>, <imm>` for the eight classic 64-bit registers
//!   (`REX.W C7 /0`, 32-bit immediate)
//! - `mov <reg>, @<label>`: same encoding, but the immediate is the final
//!   load address of a label, patched in by pointer resolution
//! - `syscall`
//! - `label:` definitions and a `db` directive for strings and byte lists
//!
//! Address operands use a two-byte pointer for the low half of the immediate
//! and the load base's high half as literal bytes, so `base + file offset`
//! comes out of resolution without the image core ever doing addend
//! arithmetic. That trick requires a 64 KiB aligned base and a final artifact
//! under 64 KiB.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::image::{ImageArena, ImageError, ImageId, PointerId};

/// Byte width of the pointer backing an `@label` operand (and of the low
/// half of the entry-point field in the ELF layer).
pub const ADDR_WIDTH: usize = 2;

/// Error type for assembly.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AsmError {
    #[error("Line {line}: unknown mnemonic `{mnemonic}`")]
    UnknownMnemonic { line: usize, mnemonic: String },

    #[error("Line {line}: unknown register `{name}`")]
    UnknownRegister { line: usize, name: String },

    #[error("Line {line}: malformed operand `{operand}`")]
    BadOperand { line: usize, operand: String },

    #[error("Line {line}: `{value}` does not fit in the operand width")]
    ImmediateOutOfRange { line: usize, value: String },

    #[error("Line {line}: duplicate label `{name}`")]
    DuplicateLabel { line: usize, name: String },

    /// An `@label` operand whose label is never defined anywhere in the
    /// source. Reported after the whole source has been read.
    #[error("Label `{name}` is referenced but never defined")]
    UndefinedLabel { name: String },

    /// The load base must be 64 KiB aligned for the two-byte address scheme.
    #[error("Load base {base:#x} is not 64 KiB aligned")]
    MisalignedBase { base: u32 },

    #[error("Image error: {0}")]
    Image(#[from] ImageError),
}

/// Convenience result type for assembly.
pub type AsmResult<T> = Result<T, AsmError>;

/// The eight registers addressable by the `C7 /0` short form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Rax,
    Rcx,
    Rdx,
    Rbx,
    Rsp,
    Rbp,
    Rsi,
    Rdi,
}

impl Register {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "rax" => Some(Register::Rax),
            "rcx" => Some(Register::Rcx),
            "rdx" => Some(Register::Rdx),
            "rbx" => Some(Register::Rbx),
            "rsp" => Some(Register::Rsp),
            "rbp" => Some(Register::Rbp),
            "rsi" => Some(Register::Rsi),
            "rdi" => Some(Register::Rdi),
            _ => None,
        }
    }

    /// ModRM byte for register-direct addressing (`11 000 reg`).
    fn modrm(self) -> u8 {
        0xc0 + self as u8
    }
}

/// A named position in the assembled program.
///
/// The pointer is shared by every `@name` operand in the source; it is bound
/// to the label's image and offset when the definition line is reached, which
/// may be after some or all of its uses.
#[derive(Debug, Clone)]
pub struct LabelBinding {
    pub name: String,
    pub pointer: PointerId,
}

/// Output of one assembly run: a code image, a data image, and the label
/// pointers the container layer must resolve after combining everything.
#[derive(Debug)]
pub struct AssembledProgram {
    pub code: ImageId,
    pub data: ImageId,
    pub labels: Vec<LabelBinding>,
}

/// Tracks one label while assembling.
#[derive(Debug)]
struct LabelState {
    pointer: PointerId,
    defined: bool,
}

/// Line assembler producing relocatable images.
#[derive(Debug, Clone, Copy)]
pub struct Assembler {
    base: u32,
}

impl Assembler {
    /// Create an assembler targeting the given load base.
    pub fn new(base: u32) -> AsmResult<Self> {
        if base % 0x1_0000 != 0 {
            return Err(AsmError::MisalignedBase { base });
        }
        Ok(Self { base })
    }

    /// Assemble `source` into fresh code and data images inside `arena`.
    ///
    /// Nothing is resolved here: label pointers stay unconsolidated (their
    /// uses are in the code image, their destinations in the code or data
    /// image) until the caller combines the images and resolves them.
    pub fn assemble(&self, arena: &mut ImageArena, source: &str) -> AsmResult<AssembledProgram> {
        let code = arena.new_image(&[]);
        let data = arena.new_image(&[]);
        let mut labels: HashMap<String, LabelState> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for (index, raw_line) in source.lines().enumerate() {
            let line = index + 1;
            let text = strip_comment(raw_line);
            let mut rest = text.trim();
            if rest.is_empty() {
                continue;
            }

            // A leading `name:` binds the label to the current position of
            // whichever section the remainder of the line targets.
            let label = take_label(rest);
            if let Some((name, tail)) = label {
                rest = tail.trim();
                let section = if split_mnemonic(rest).0 == "db" { data } else { code };
                let offset = arena.len(section)?;
                let state = self.label_entry(arena, &mut labels, &mut order, name)?;
                if state.defined {
                    return Err(AsmError::DuplicateLabel { line, name: name.to_string() });
                }
                state.defined = true;
                let pointer = state.pointer;
                arena.bind_pointer(pointer, section, offset)?;
                if rest.is_empty() {
                    continue;
                }
            }

            let (mnemonic, args) = split_mnemonic(rest);
            match mnemonic {
                "mov" => self.emit_mov(arena, code, &mut labels, &mut order, line, args)?,
                "syscall" => arena.append_bytes(code, &[0x0f, 0x05])?,
                "db" => emit_db(arena, data, line, args)?,
                other => {
                    return Err(AsmError::UnknownMnemonic {
                        line,
                        mnemonic: other.to_string(),
                    })
                }
            }
        }

        for name in &order {
            if !labels[name].defined {
                return Err(AsmError::UndefinedLabel { name: name.clone() });
            }
        }

        let labels = order
            .into_iter()
            .map(|name| {
                let pointer = labels[&name].pointer;
                LabelBinding { name, pointer }
            })
            .collect();

        Ok(AssembledProgram { code, data, labels })
    }

    /// Encode `mov reg, imm32` or `mov reg, @label`.
    fn emit_mov(
        &self,
        arena: &mut ImageArena,
        code: ImageId,
        labels: &mut HashMap<String, LabelState>,
        order: &mut Vec<String>,
        line: usize,
        args: &str,
    ) -> AsmResult<()> {
        let mut parts = args.splitn(2, ',');
        let reg_text = parts.next().unwrap_or("").trim();
        let operand = parts.next().map(str::trim).unwrap_or("");
        if reg_text.is_empty() || operand.is_empty() {
            return Err(AsmError::BadOperand { line, operand: args.trim().to_string() });
        }

        let reg = Register::parse(reg_text).ok_or_else(|| AsmError::UnknownRegister {
            line,
            name: reg_text.to_string(),
        })?;
        arena.append_bytes(code, &[0x48, 0xc7, reg.modrm()])?;

        if let Some(name) = operand.strip_prefix('@') {
            // Low half of the immediate is the label's file offset, patched
            // at resolve time; high half is the load base, known now.
            let pointer = self.label_entry(arena, labels, order, name)?.pointer;
            arena.append_pointer(code, pointer)?;
            let mut high = [0u8; 2];
            LittleEndian::write_u16(&mut high, (self.base >> 16) as u16);
            arena.append_bytes(code, &high)?;
        } else {
            let value = parse_number(operand).ok_or_else(|| AsmError::BadOperand {
                line,
                operand: operand.to_string(),
            })?;
            let value = u32::try_from(value).map_err(|_| AsmError::ImmediateOutOfRange {
                line,
                value: operand.to_string(),
            })?;
            let mut imm = [0u8; 4];
            LittleEndian::write_u32(&mut imm, value);
            arena.append_bytes(code, &imm)?;
        }
        Ok(())
    }

    fn label_entry<'a>(
        &self,
        arena: &mut ImageArena,
        labels: &'a mut HashMap<String, LabelState>,
        order: &mut Vec<String>,
        name: &str,
    ) -> AsmResult<&'a mut LabelState> {
        match labels.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let pointer = arena.new_pointer(ADDR_WIDTH)?;
                order.push(name.to_string());
                Ok(entry.insert(LabelState { pointer, defined: false }))
            }
        }
    }
}

/// Encode a `db` directive: double-quoted strings and/or byte values,
/// comma separated.
fn emit_db(arena: &mut ImageArena, data: ImageId, line: usize, args: &str) -> AsmResult<()> {
    let mut bytes = Vec::new();
    for item in split_db_items(args) {
        let item = item.trim();
        if item.is_empty() {
            return Err(AsmError::BadOperand { line, operand: args.trim().to_string() });
        }
        if item.starts_with('"') {
            let unquoted = unescape_string(item)
                .ok_or_else(|| AsmError::BadOperand { line, operand: item.to_string() })?;
            bytes.extend_from_slice(&unquoted);
        } else {
            let value = parse_number(item)
                .ok_or_else(|| AsmError::BadOperand { line, operand: item.to_string() })?;
            let value = u8::try_from(value).map_err(|_| AsmError::ImmediateOutOfRange {
                line,
                value: item.to_string(),
            })?;
            bytes.push(value);
        }
    }
    if bytes.is_empty() {
        return Err(AsmError::BadOperand { line, operand: "db".to_string() });
    }
    arena.append_bytes(data, &bytes)?;
    Ok(())
}

/// Drop everything from the first `;` that is not inside a string literal.
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            ';' if !in_string => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Split a leading `name:` label off a line, if present.
///
/// Only identifier-shaped names count, so `mov rax, 1` is never mistaken for
/// a label.
fn take_label(text: &str) -> Option<(&str, &str)> {
    let colon = text.find(':')?;
    let name = &text[..colon];
    if name.is_empty() {
        return None;
    }
    let valid = name
        .chars()
        .enumerate()
        .all(|(i, c)| c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()));
    if valid {
        Some((name, &text[colon + 1..]))
    } else {
        None
    }
}

fn split_mnemonic(text: &str) -> (&str, &str) {
    match text.find(char::is_whitespace) {
        Some(i) => (&text[..i], text[i..].trim_start()),
        None => (text, ""),
    }
}

/// Parse a decimal or `0x` hexadecimal number.
fn parse_number(text: &str) -> Option<u64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        text.parse::<u64>().ok()
    }
}

/// Split `db` arguments on commas that are outside string literals.
fn split_db_items(args: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in args.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            ',' if !in_string => {
                items.push(&args[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&args[start..]);
    items
}

/// Decode a double-quoted string literal with `\n \t \0 \\ \"` escapes.
fn unescape_string(item: &str) -> Option<Vec<u8>> {
    let inner = item.strip_prefix('"')?.strip_suffix('"')?;
    let mut bytes = Vec::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '"' {
            // An unescaped quote can only be the terminator we stripped.
            return None;
        }
        if c != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next()? {
            'n' => bytes.push(b'\n'),
            't' => bytes.push(b'\t'),
            '0' => bytes.push(0),
            '\\' => bytes.push(b'\\'),
            '"' => bytes.push(b'"'),
            _ => return None,
        }
    }
    Some(bytes)
}
