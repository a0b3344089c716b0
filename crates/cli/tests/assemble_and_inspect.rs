use std::fs;

use predicates::prelude::*;
use tempfile::tempdir;

const HELLO: &str = "\
mov rdi, 1
mov rsi, @msg
mov rdx, 14
mov rax, 1
syscall
mov rdi, 0
mov rax, 60
syscall

msg: db \"Hello, relic!\\n\"
";

/// Assemble a source file end to end and check the written artifact.
#[test]
fn assemble_writes_an_elf_executable() {
    let dir = tempdir().expect("tempdir");
    let src = dir.path().join("hello.asm");
    let out = dir.path().join("hello");
    fs::write(&src, HELLO).expect("write source");

    assert_cmd::cargo::cargo_bin_cmd!("binforge")
        .arg("assemble")
        .arg("--input")
        .arg(&src)
        .arg("--output")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("Built hello:"))
        .stdout(predicate::str::contains("Entry: 0x400078"))
        .stdout(predicate::str::contains("Pointers resolved: 3"));

    let bytes = fs::read(&out).expect("read artifact");
    assert_eq!(&bytes[0..4], b"\x7fELF");
    assert_eq!(bytes.len(), 64 + 56 + 46 + 14);
}

/// The JSON report should parse and carry the build facts.
#[test]
fn assemble_json_report_is_machine_readable() {
    let dir = tempdir().expect("tempdir");
    let src = dir.path().join("hello.asm");
    let out = dir.path().join("hello");
    fs::write(&src, HELLO).expect("write source");

    let assert = assert_cmd::cargo::cargo_bin_cmd!("binforge")
        .arg("assemble")
        .arg("--input")
        .arg(&src)
        .arg("--output")
        .arg(&out)
        .arg("--json")
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8");
    let report: serde_json::Value = serde_json::from_str(&stdout).expect("json");
    assert_eq!(report["program"], "hello");
    assert_eq!(report["total_size"], 180);
    assert_eq!(report["entry"], 0x400078);
    assert_eq!(report["pointers_resolved"], 3);
}

/// Inspect should read back what assemble wrote.
#[test]
fn inspect_reports_the_emitted_header() {
    let dir = tempdir().expect("tempdir");
    let src = dir.path().join("hello.asm");
    let out = dir.path().join("hello");
    fs::write(&src, HELLO).expect("write source");

    assert_cmd::cargo::cargo_bin_cmd!("binforge")
        .arg("assemble")
        .arg("--input")
        .arg(&src)
        .arg("--output")
        .arg(&out)
        .assert()
        .success();

    assert_cmd::cargo::cargo_bin_cmd!("binforge")
        .arg("inspect")
        .arg("--input")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("Class: ELF64"))
        .stdout(predicate::str::contains("Entry: 0x400078"))
        .stdout(predicate::str::contains("Program headers: 1 at offset 0x40"));
}

/// `--version` reports the library version the binary was built against.
#[test]
fn version_flag_reports_the_core_version() {
    assert_cmd::cargo::cargo_bin_cmd!("binforge")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(relic_core::version()));
}

/// Inspect's JSON mode should expose the raw header numbers.
#[test]
fn inspect_json_exposes_header_fields() {
    let dir = tempdir().expect("tempdir");
    let src = dir.path().join("hello.asm");
    let out = dir.path().join("hello");
    fs::write(&src, HELLO).expect("write source");

    assert_cmd::cargo::cargo_bin_cmd!("binforge")
        .arg("assemble")
        .arg("--input")
        .arg(&src)
        .arg("--output")
        .arg(&out)
        .assert()
        .success();

    let assert = assert_cmd::cargo::cargo_bin_cmd!("binforge")
        .arg("inspect")
        .arg("--input")
        .arg(&out)
        .arg("--json")
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8");
    let summary: serde_json::Value = serde_json::from_str(&stdout).expect("json");
    assert_eq!(summary["class"], 2);
    assert_eq!(summary["machine"], 0x3e);
    assert_eq!(summary["phoff"], 64);
    assert_eq!(summary["file_size"], 180);
}
