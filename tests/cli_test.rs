//! CLI integration tests

mod common;

use assert_cmd::Command;
use common::{pdf, pdf_page_labels, zip_archive};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn docmerge(scratch: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("docmerge").unwrap();
    cmd.env("DOCMERGE_SCRATCH_DIR", scratch.path()).env_remove("RUST_LOG");
    cmd
}

/// Working directory holding `chapters.zip` with three out-of-order parts
fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    let archive = zip_archive(&[
        ("book part3.pdf", pdf("c", 1)),
        ("book part1.pdf", pdf("a", 2)),
        ("book part2.pdf", pdf("b", 1)),
        ("readme.txt", b"scanned by the front desk".to_vec()),
    ]);
    fs::write(dir.path().join("chapters.zip"), archive).unwrap();
    dir
}

#[test]
fn test_help_lists_commands() {
    let scratch = TempDir::new().unwrap();
    docmerge(&scratch)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("merge"))
        .stdout(predicate::str::contains("order"))
        .stdout(predicate::str::contains("sweep"));
}

#[test]
fn test_merge_into_directory() {
    let scratch = TempDir::new().unwrap();
    let work = workspace();
    let out = work.path().join("out");
    fs::create_dir(&out).unwrap();

    docmerge(&scratch)
        .current_dir(work.path())
        .args(["merge", "chapters.zip", "-o"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("3 members"))
        .stdout(predicate::str::contains("4 pages"))
        .stderr(predicate::str::contains("UNSUPPORTED_MEMBER_DROPPED"));

    let merged = fs::read(out.join("merged_document.pdf")).unwrap();
    assert_eq!(pdf_page_labels(&merged), vec!["a-0", "a-1", "b-0", "c-0"]);
}

#[test]
fn test_merge_with_name_and_report() {
    let scratch = TempDir::new().unwrap();
    let work = workspace();

    docmerge(&scratch)
        .current_dir(work.path())
        .args(["-q", "merge", "chapters.zip", "--name", "Final Book", "--report", "report.json"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    assert!(work.path().join("Final Book.pdf").exists());
    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(work.path().join("report.json")).unwrap()).unwrap();
    assert_eq!(report["file_name"], "Final Book.pdf");
    assert_eq!(report["member_count"], 3);
    assert_eq!(report["page_count"], 4);
    assert_eq!(
        report["members"],
        serde_json::json!(["book part1.pdf", "book part2.pdf", "book part3.pdf"])
    );
    assert_eq!(report["sha256"].as_str().unwrap().len(), 64);
    assert_eq!(report["warnings"][0]["code"], "UNSUPPORTED_MEMBER_DROPPED");
}

#[test]
fn test_order_json() {
    let scratch = TempDir::new().unwrap();
    let work = workspace();

    let output = docmerge(&scratch)
        .current_dir(work.path())
        .args(["order", "chapters.zip", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(plan["archive_format"], "zip");
    assert_eq!(plan["kind"], "pdf");
    let names: Vec<&str> = plan["members"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["book part1.pdf", "book part2.pdf", "book part3.pdf"]);
    assert_eq!(plan["members"][0]["part_number"], 1);
}

#[test]
fn test_order_table() {
    let scratch = TempDir::new().unwrap();
    let work = workspace();

    docmerge(&scratch)
        .current_dir(work.path())
        .args(["order", "chapters.zip"])
        .assert()
        .success()
        .stdout(predicate::str::contains("zip archive, 3 pdf members"))
        .stdout(predicate::str::contains("part 2"));
}

#[test]
fn test_unsupported_archive_exit_code() {
    let scratch = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    fs::write(work.path().join("notes.bin"), b"just some bytes").unwrap();

    docmerge(&scratch)
        .current_dir(work.path())
        .args(["merge", "notes.bin"])
        .assert()
        .code(10)
        .stderr(predicate::str::contains("Unsupported archive format"));
}

#[test]
fn test_mixed_batch_exit_code() {
    let scratch = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let archive = zip_archive(&[
        ("part1.pdf", pdf("a", 1)),
        ("part2.docx", common::docx("b")),
    ]);
    fs::write(work.path().join("mixed.zip"), archive).unwrap();

    docmerge(&scratch)
        .current_dir(work.path())
        .args(["merge", "mixed.zip"])
        .assert()
        .code(12)
        .stderr(predicate::str::contains("mixes document types"));
    assert!(!work.path().join("merged_document.pdf").exists());
}

#[test]
fn test_missing_archive_fails() {
    let scratch = TempDir::new().unwrap();
    docmerge(&scratch)
        .args(["merge", "does-not-exist.zip"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to read archive"));
}

#[test]
fn test_sweep_empty_root() {
    let scratch = TempDir::new().unwrap();
    docmerge(&scratch)
        .args(["sweep", "--max-age-secs", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 0 stale scratch directories"));
}
