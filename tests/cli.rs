//! CLI test cases.
//!
//! Tests that invoke tesseract or Poppler are `#[ignore]`d so the default
//! suite runs on machines without the OCR toolchain installed. Run them
//! with `cargo test -- --ignored` on a host that has `tesseract` (with the
//! `fas` and `eng` packs) and `pdftocairo` on PATH.

use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    Command::cargo_bin("sanad-ocr").unwrap()
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_schema_extract_input() {
    cmd()
        .args(["schema", "ExtractInput"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"path\""));
}

#[test]
fn test_schema_extract_output() {
    cmd()
        .args(["schema", "ExtractOutput"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"bounding_boxes\""))
        .stdout(predicate::str::contains("\"structured_data\""));
}

#[test]
fn test_extract_rejects_missing_input_file() {
    cmd()
        .args(["extract", "does-not-exist.jsonl"])
        .assert()
        .failure();
}

#[test]
#[ignore = "Requires tesseract with fas+eng packs to be installed"]
fn test_check_passes_on_provisioned_host() {
    cmd().arg("check").assert().success();
}

#[test]
#[ignore = "Requires tesseract with fas+eng packs to be installed"]
fn test_extract_blank_scan_succeeds_with_empty_text() {
    // A blank page is not an input error: the run succeeds with zero
    // confidence and no winning strategy, and the record is flagged as a
    // low-confidence warning rather than a failure.
    cmd()
        .args(["extract", "--allowed-failure-rate", "0"])
        .write_stdin(r#"{"id": "blank", "path": "tests/fixtures/blank_scan.png"}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"success\":true"))
        .stdout(predicate::str::contains("\"status\":\"ok\""));
}

#[test]
#[ignore = "Requires tesseract and pdftocairo to be installed"]
fn test_extract_corrupt_pdf_is_a_failed_record() {
    // The rasterizer cannot parse the file, so the record fails; with a
    // failure budget of 1.0 the batch itself still exits cleanly.
    cmd()
        .args(["extract", "--allowed-failure-rate", "1.0"])
        .write_stdin(r#"{"id": "corrupt", "path": "tests/fixtures/corrupt.pdf"}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"success\":false"))
        .stdout(predicate::str::contains("\"status\":\"failed\""))
        .stdout(predicate::str::contains("\"bounding_boxes\":[]"));
}

#[test]
#[ignore = "Requires tesseract and pdftocairo to be installed"]
fn test_extract_corrupt_pdf_fails_the_batch_by_default() {
    // The default failure budget is 1%, so a batch consisting of a single
    // unreadable document exits non-zero.
    cmd()
        .arg("extract")
        .write_stdin(r#"{"id": "corrupt", "path": "tests/fixtures/corrupt.pdf"}"#)
        .assert()
        .failure();
}
