use std::fs;

use predicates::prelude::*;
use tempfile::tempdir;

/// assemble should fail when the source file does not exist.
#[test]
fn assemble_fails_for_a_missing_source() {
    let dir = tempdir().expect("tempdir");
    let out = dir.path().join("out");

    assert_cmd::cargo::cargo_bin_cmd!("binforge")
        .arg("assemble")
        .arg("--input")
        .arg(dir.path().join("nope.asm"))
        .arg("--output")
        .arg(&out)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read source file"));
}

/// Assembly errors should surface with their line number.
#[test]
fn assemble_fails_on_an_unknown_mnemonic() {
    let dir = tempdir().expect("tempdir");
    let src = dir.path().join("bad.asm");
    let out = dir.path().join("out");
    fs::write(&src, "mov rax, 1\nfrobnicate\n").expect("write source");

    assert_cmd::cargo::cargo_bin_cmd!("binforge")
        .arg("assemble")
        .arg("--input")
        .arg(&src)
        .arg("--output")
        .arg(&out)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Line 2: unknown mnemonic `frobnicate`"));
}

/// A referenced-but-never-defined label should fail the whole build.
#[test]
fn assemble_fails_on_an_undefined_label() {
    let dir = tempdir().expect("tempdir");
    let src = dir.path().join("bad.asm");
    let out = dir.path().join("out");
    fs::write(&src, "mov rsi, @nowhere\nsyscall\n").expect("write source");

    assert_cmd::cargo::cargo_bin_cmd!("binforge")
        .arg("assemble")
        .arg("--input")
        .arg(&src)
        .arg("--output")
        .arg(&out)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Label `nowhere` is referenced but never defined"));
}

/// inspect should reject files that are not ELF at all.
#[test]
fn inspect_fails_on_a_non_elf_file() {
    let dir = tempdir().expect("tempdir");
    let not_elf = dir.path().join("notes.txt");
    fs::write(&not_elf, vec![0u8; 128]).expect("write file");

    assert_cmd::cargo::cargo_bin_cmd!("binforge")
        .arg("inspect")
        .arg("--input")
        .arg(&not_elf)
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not start with the ELF magic"));
}

/// inspect should reject files too short to hold an ELF64 header.
#[test]
fn inspect_fails_on_a_truncated_file() {
    let dir = tempdir().expect("tempdir");
    let short = dir.path().join("short.bin");
    fs::write(&short, b"\x7fELF").expect("write file");

    assert_cmd::cargo::cargo_bin_cmd!("binforge")
        .arg("inspect")
        .arg("--input")
        .arg(&short)
        .assert()
        .failure()
        .stderr(predicate::str::contains("an ELF64 header needs 64"));
}
