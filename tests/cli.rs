use assert_cmd::Command;
use predicates::prelude::*;
use std::{fs, path::Path};
use tempfile::{tempdir, TempDir};

const NATIVES: &str = "
function(assembly) printc(chr c) -> int { \"\" }
function(assembly) allocate(int n) -> chr[] { \"\" }
function(assembly) deallocate(chr[] p) -> int { \"\" }
";

fn flc() -> Command {
    Command::cargo_bin("flc").unwrap()
}

fn program(dir: &TempDir, name: &str, source: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, source).unwrap();

    path.to_str().unwrap().to_owned()
}

#[test]
fn interpreter_exit_status_is_the_result() {
    let dir = tempdir().unwrap();
    let input = program(
        &dir,
        "three.fl",
        "function spark(int argc, str[] argv) -> int { return 1 + 2; }",
    );

    flc()
        .args(["-r", input.as_str()])
        .assert()
        .code(3)
        .stdout(predicate::str::is_empty());
}

#[test]
fn arguments_reach_argc() {
    let dir = tempdir().unwrap();
    let input = program(
        &dir,
        "argc.fl",
        "function spark(int argc, str[] argv) -> int { return argc; }",
    );

    flc()
        .args(["-r", input.as_str(), "-a", "one", "-a", "-two"])
        .assert()
        .code(3);
}

#[test]
fn leak_report_lists_unfreed_blocks() {
    let dir = tempdir().unwrap();
    let source = format!(
        "{}
         function spark(int argc, str[] argv) -> int {{
             chr[] kept = allocate(4);
             chr[] freed = allocate(2);
             str greeting = \"hello\";
             str again = \"hello\";
             kept[0] = 'a';
             kept[1] = 'b';
             kept[2] = 'c';
             kept[3] = 0;
             deallocate(freed);

             int i = 0;
             while kept[i] != 0 {{
                 printc(kept[i]);
                 i++;
             }}

             return 0;
         }}",
        NATIVES
    );

    let input = program(&dir, "leak.fl", &source);
    let assert = flc()
        .args(["-r", "-l", input.as_str(), "-a", "extra"])
        .assert()
        .success()
        .stdout("abc");

    let stderr = String::from_utf8(assert.get_output().stderr.clone()).unwrap();
    let leaks: Vec<_> = stderr.lines().filter(|line| line.starts_with("Leak at:")).collect();

    assert_eq!(leaks.len(), 1);
    assert!(leaks[0].ends_with("with size 4"));
}

#[test]
fn includes_are_resolved_through_include_paths() {
    let dir = tempdir().unwrap();
    let lib = dir.path().join("lib");
    fs::create_dir(&lib).unwrap();
    fs::write(lib.join("answer.fl"), "function answer() -> int { return 42; }").unwrap();

    let input = program(
        &dir,
        "main.fl",
        "$include <answer.fl>
         function spark(int argc, str[] argv) -> int { return answer(); }",
    );

    flc()
        .args(["-r", "-i", lib.to_str().unwrap(), input.as_str()])
        .assert()
        .code(42);
}

#[test]
fn native_assembly_output() {
    let dir = tempdir().unwrap();
    let input = program(
        &dir,
        "asm.fl",
        "function spark(int argc, str[] argv) -> int { return 1 + 2; }
         function unused() -> int { return 0; }",
    );

    for (target, name) in [("x86_64-linux-nasm", "out.asm"), ("riscv64-linux-gnu", "out.ASM")] {
        let output = dir.path().join(name);
        flc()
            .args(["-t", target, "-o", output.to_str().unwrap(), input.as_str()])
            .assert()
            .success();

        let asm = fs::read_to_string(&output).unwrap();
        assert!(asm.contains("spark:"));
        assert!(asm.contains("main:"));
        assert!(!asm.contains("unused:"));
    }
}

#[test]
fn bytecode_image_header() {
    let dir = tempdir().unwrap();
    let input = program(
        &dir,
        "bc.fl",
        "function spark(int argc, str[] argv) -> int { return 1 + 2; }",
    );

    let output = dir.path().join("out.flbb");
    flc()
        .args(["-t", "bytecode", "-o", output.to_str().unwrap(), input.as_str()])
        .assert()
        .success();

    let image = fs::read(&output).unwrap();
    let globals = u64::from_le_bytes(image[8..16].try_into().unwrap());
    assert_eq!(globals, 24);
}

#[test]
fn dumps_are_written_next_to_output() {
    let dir = tempdir().unwrap();
    let input = program(
        &dir,
        "dump.fl",
        "function spark(int argc, str[] argv) -> int { return 0; }",
    );

    let output = dir.path().join("dump.flb");
    flc()
        .args(["--dump", "-t", "bytecode", "-o", output.to_str().unwrap(), input.as_str()])
        .assert()
        .success();

    assert!(Path::new(&format!("{}.tokens", output.display())).exists());
    let ast = fs::read_to_string(format!("{}.ast", output.display())).unwrap();
    assert!(ast.contains("spark"));
}

#[test]
fn source_errors_point_at_the_offending_line() {
    let dir = tempdir().unwrap();
    let input = program(&dir, "bad.fl", "int x;\nint @y;\n");

    flc()
        .args(["-r", input.as_str()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("bad.fl:2:5").and(predicate::str::contains("^")));
}

#[test]
fn bad_invocations_fail() {
    let dir = tempdir().unwrap();
    let input = program(
        &dir,
        "ok.fl",
        "function spark(int argc, str[] argv) -> int { return 0; }",
    );

    flc()
        .args(["-t", "mips64", "-o", "out.asm", input.as_str()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown target"));

    let output = dir.path().join("out.flbb");
    flc()
        .args(["-o", output.to_str().unwrap(), input.as_str()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not supported"));

    flc()
        .args(["-r", dir.path().join("missing.fl").to_str().unwrap()])
        .assert()
        .failure();
}

#[test]
fn runtime_errors_fail() {
    let dir = tempdir().unwrap();
    let input = program(
        &dir,
        "div.fl",
        "function spark(int argc, str[] argv) -> int { return argc / (argc - 1); }",
    );

    flc()
        .args(["-r", input.as_str()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Division by zero"));
}
