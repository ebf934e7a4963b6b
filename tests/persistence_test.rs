#![cfg(feature = "storage-rocksdb")]

use assert_cmd::cargo_bin;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

const HEADER: &str = "op,key,agent,property,tenant,amount,deposit,date,months,relationship,status,reason";

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // 1. First run: post March rent
    let mut csv1 = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv1, "{HEADER}").unwrap();
    writeln!(csv1, "payment,R-1,agent-1,prop-1,tenant-1,1000,,2025-03-01,,management,,").unwrap();

    let mut cmd1 = Command::new(cargo_bin!("commission-ledger"));
    cmd1.arg(csv1.path())
        .arg("--properties")
        .arg("tests/fixtures/properties.csv")
        .arg("--db-path")
        .arg(&db_path);

    let output1 = cmd1.output().expect("Failed to execute command");
    assert!(output1.status.success());
    let stdout1 = String::from_utf8_lossy(&output1.stdout);
    assert!(stdout1.contains("agent-1,58.2,0,0,0,58.2"));

    // 2. Second run: resubmit R-1 and post April against the same DB path
    let mut csv2 = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv2, "{HEADER}").unwrap();
    writeln!(csv2, "payment,R-1,agent-1,prop-1,tenant-1,1000,,2025-03-01,,management,,").unwrap();
    writeln!(csv2, "payment,R-2,agent-1,prop-1,tenant-1,1000,,2025-04-01,,management,,").unwrap();

    let mut cmd2 = Command::new(cargo_bin!("commission-ledger"));
    cmd2.arg(csv2.path())
        .arg("--properties")
        .arg("tests/fixtures/properties.csv")
        .arg("--db-path")
        .arg(&db_path);

    let output2 = cmd2.output().expect("Failed to execute command");
    assert!(output2.status.success());
    let stdout2 = String::from_utf8_lossy(&output2.stdout);

    // R-1 is recognised from the first run; only R-2 adds commission.
    assert!(stdout2.contains("agent-1,116.4,0,0,0,116.4"));
}

#[test]
fn test_rocksdb_reversal_across_runs() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    let mut csv1 = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv1, "{HEADER}").unwrap();
    writeln!(csv1, "payment,R-1,agent-1,prop-1,tenant-1,1000,,2025-03-01,,management,,").unwrap();
    let status = Command::new(cargo_bin!("commission-ledger"))
        .arg(csv1.path())
        .arg("--properties")
        .arg("tests/fixtures/properties.csv")
        .arg("--db-path")
        .arg(&db_path)
        .status()
        .expect("Failed to execute command");
    assert!(status.success());

    let mut csv2 = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv2, "{HEADER}").unwrap();
    writeln!(csv2, "reverse,R-1,,,,,,,,,,keyed twice").unwrap();
    let output = Command::new(cargo_bin!("commission-ledger"))
        .arg(csv2.path())
        .arg("--properties")
        .arg("tests/fixtures/properties.csv")
        .arg("--db-path")
        .arg(&db_path)
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("agent-1,0,0,0,0,0"));
}
