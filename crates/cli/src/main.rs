use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use binforge::{infer_program_name, sha256_hex, summarize_elf};
use clap::{Parser, Subcommand};
use relic_core::asm::Assembler;
use relic_core::elf::{self, IMAGE_BASE};
use relic_core::image::ImageArena;
use relic_core::report::BuildReport;

/// Incremental binary image builder CLI.
///
/// This CLI is a thin wrapper around `relic-core` (exposed in code as
/// `relic_core`). All substantive logic lives in the library so it can be
/// tested thoroughly and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "binforge",
    version = relic_core::version(),
    about = "Builds static x86-64 executables from a tiny assembly dialect",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Assemble a source file and link it into a static ELF64 executable.
    ///
    /// The source is assembled into relocatable code and data images, the
    /// images are combined with the ELF header and program header, and every
    /// placeholder pointer is resolved before the flat bytes are written.
    Assemble {
        /// Path to the assembly source file.
        #[arg(long)]
        input: String,

        /// Path to write the executable to.
        #[arg(long)]
        output: String,

        /// Emit the build report as JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Read back an emitted executable and report its header fields.
    Inspect {
        /// Path to the executable to inspect.
        #[arg(long)]
        input: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Assemble { input, output, json } => assemble_command(&input, &output, json)?,
        Command::Inspect { input, json } => inspect_command(&input, json)?,
    }

    Ok(())
}

/// Assemble and link `input` into an executable at `output`.
fn assemble_command(input: &str, output: &str, json: bool) -> Result<()> {
    let source = fs::read_to_string(input)
        .with_context(|| format!("Failed to read source file: {input}"))?;

    let mut arena = ImageArena::new();
    let assembler = Assembler::new(IMAGE_BASE).context("Failed to configure assembler")?;
    let program = assembler
        .assemble(&mut arena, &source)
        .with_context(|| format!("Failed to assemble {input}"))?;
    let artifact = elf::build_executable(&mut arena, &program)
        .with_context(|| format!("Failed to link {input}"))?;

    fs::write(output, &artifact.bytes)
        .with_context(|| format!("Failed to write executable: {output}"))?;
    make_executable(output)?;

    let report = BuildReport::from_artifact(
        infer_program_name(Path::new(input)),
        output,
        &artifact,
        sha256_hex(&artifact.bytes),
    );

    if json {
        println!("{}", report.to_json_pretty().context("Failed to serialize build report")?);
    } else {
        println!("Built {}:", report.program);
        println!("  Output: {}", report.output);
        println!("  Entry: {:#x}", report.entry);
        println!("  Code: {} bytes", report.code_size);
        println!("  Data: {} bytes", report.data_size);
        println!("  Total: {} bytes", report.total_size);
        println!("  Pointers resolved: {}", report.pointers_resolved);
        println!("  SHA-256: {}", report.sha256);
    }

    Ok(())
}

/// Report the header fields of an emitted executable.
fn inspect_command(input: &str, json: bool) -> Result<()> {
    let bytes =
        fs::read(input).with_context(|| format!("Failed to read executable: {input}"))?;
    let summary =
        summarize_elf(&bytes).with_context(|| format!("Failed to parse {input} as ELF"))?;

    if json {
        let serialized = serde_json::to_string_pretty(&summary)
            .context("Failed to serialize ELF summary to JSON")?;
        println!("{}", serialized);
    } else {
        println!("ELF summary for {input}:");
        println!("  Class: {}", if summary.class == 2 { "ELF64" } else { "ELF32" });
        println!(
            "  Data: {}",
            if summary.data == 1 { "little-endian" } else { "big-endian" }
        );
        println!("  Type: {:#x}", summary.file_type);
        println!("  Machine: {:#x}", summary.machine);
        println!("  Entry: {:#x}", summary.entry);
        println!("  Program headers: {} at offset {:#x}", summary.phnum, summary.phoff);
        println!("  Size: {} bytes", summary.file_size);
        println!("  SHA-256: {}", summary.sha256);
    }

    Ok(())
}

/// Mark the written artifact executable where the platform supports it.
#[cfg(unix)]
fn make_executable(path: &str) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)
        .with_context(|| format!("Failed to stat output: {path}"))?
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)
        .with_context(|| format!("Failed to set permissions on {path}"))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &str) -> Result<()> {
    Ok(())
}
