mod common;

use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_rocksdb_fallback_warning() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("batch.csv");
    common::write_csv(&input, &[["alice", "100.0", "USD"]]).unwrap();

    let mut cmd = Command::new(cargo_bin!("bulkpay"));
    cmd.arg("run").arg(&input).arg("--db-path").arg(dir.path().join("some_db"));

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("'storage-rocksdb' feature is not enabled"))
        .stdout(predicate::str::contains("Completed"));
}

#[cfg(feature = "storage-rocksdb")]
#[test]
fn test_rocksdb_no_fallback_warning() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("batch.csv");
    common::write_csv(&input, &[["alice", "100.0", "USD"]]).unwrap();

    let mut cmd = Command::new(cargo_bin!("bulkpay"));
    cmd.arg("run").arg(&input).arg("--db-path").arg(dir.path().join("test_db"));

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("falling back").not());
}
