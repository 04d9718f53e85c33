use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn primeseg() -> Command {
    Command::cargo_bin("primeseg").unwrap()
}

#[test]
fn help_lists_subcommands() {
    primeseg()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("generate"))
        .stdout(predicate::str::contains("merge"));
}

#[test]
fn generate_writes_segments_and_log() {
    let dir = tempdir().unwrap();
    primeseg()
        .args(["generate", "100", "--threads", "2", "--segment-size", "50", "--no-progress"])
        .arg("--output-dir")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Total: 25 primes found"))
        .stdout(predicate::str::contains("Execution time:"));

    assert!(dir.path().join("7bit_primes_2_51.txt").exists());
    assert!(dir.path().join("7bit_primes_52_100.txt").exists());
    let log = fs::read_to_string(dir.path().join("execution_log.txt")).unwrap();
    assert!(log.contains("| 7bit | limit 100 | 2 threads | segment 50 | 25 primes |"));
}

#[test]
fn generate_by_bits_into_shared_file() {
    let dir = tempdir().unwrap();
    primeseg()
        .args(["generate", "--bits", "12", "--threads", "3", "--shared-file", "--no-progress"])
        .arg("--output-dir")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Total: 564 primes found"));

    let content = fs::read_to_string(dir.path().join("12bit_primes.txt")).unwrap();
    assert_eq!(content.lines().count(), 564);
    assert!(content.starts_with("2\n3\n5\n"));
    assert!(content.ends_with("4093\n"));
}

#[test]
fn limit_beyond_u64_is_accepted_by_the_parser() {
    // 2^64 + 20 parses; the zero segment size is what gets rejected.
    primeseg()
        .args(["generate", "18446744073709551636", "--segment-size", "0", "--no-progress"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("segment size must be at least 1"));
}

#[test]
fn invalid_limits_fail() {
    primeseg()
        .args(["generate", "1", "--no-progress"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("limit must be at least 2"));

    primeseg()
        .args(["generate", "12x4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid digit"));

    primeseg().arg("generate").assert().failure();
}

#[test]
fn merge_concatenates_in_order() {
    let dir = tempdir().unwrap();
    primeseg()
        .args(["generate", "1000", "--threads", "4", "--segment-size", "97", "--no-progress"])
        .arg("--output-dir")
        .arg(dir.path())
        .assert()
        .success();

    let merged = dir.path().join("merged.txt");
    primeseg()
        .args(["merge", "--label", "10", "--dir"])
        .arg(dir.path())
        .arg("--output")
        .arg(&merged)
        .assert()
        .success()
        .stderr(predicate::str::contains("Merged 168 primes"));

    let primes: Vec<u64> = fs::read_to_string(&merged)
        .unwrap()
        .lines()
        .map(|l| l.parse().unwrap())
        .collect();
    assert_eq!(primes.len(), 168);
    assert!(primes.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(primes.last(), Some(&997));
}

#[test]
fn merge_without_files_fails() {
    let dir = tempdir().unwrap();
    primeseg()
        .args(["merge", "--label", "10", "--dir"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("no 10-bit segment files"));
}
