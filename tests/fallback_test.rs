mod common;

use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use commission_ledger::application::atomic::CommitMode;
use commission_ledger::domain::payment::PostingStatus;
use commission_ledger::domain::ports::Role;
use commission_ledger::infrastructure::in_memory::InMemoryStore;
use common::{Harness, actor, agent, rent_payment};
use predicates::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::process::Command;

#[tokio::test]
async fn test_store_without_transactions_commits_sequentially() {
    let store = InMemoryStore::without_transactions();
    assert!(!store.supports_transactions());
    let h = Harness::with_store(store);

    let payment = h
        .manager
        .create(rent_payment("prop-1", dec!(1000), (2025, 3)), &actor(Role::Agent))
        .await
        .unwrap()
        .into_payment();
    assert_eq!(payment.posting_status, PostingStatus::Posted);
    assert_eq!(
        h.manager.ledger().balance(&agent("agent-1")).await.unwrap().value(),
        dec!(58.2)
    );

    let outcome = h
        .manager
        .reverse(&payment.id, "wrong amount", &actor(Role::Finance))
        .await
        .unwrap();
    assert_eq!(outcome.commit_mode, CommitMode::Sequential);
    assert_eq!(outcome.original.posting_status, PostingStatus::Reversed);
    assert_eq!(
        h.manager.ledger().balance(&agent("agent-1")).await.unwrap().value(),
        Decimal::ZERO
    );
}

#[tokio::test]
async fn test_transactional_store_commits_atomically() {
    let h = Harness::new();
    let payment = h
        .manager
        .create(rent_payment("prop-1", dec!(1000), (2025, 3)), &actor(Role::Agent))
        .await
        .unwrap()
        .into_payment();

    let outcome = h
        .manager
        .reverse(&payment.id, "wrong amount", &actor(Role::Admin))
        .await
        .unwrap();
    assert_eq!(outcome.commit_mode, CommitMode::Atomic);
}

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_rocksdb_fallback_warning() {
    let mut cmd = Command::new(cargo_bin!("commission-ledger"));
    cmd.arg("tests/fixtures/commands.csv")
        .arg("--properties")
        .arg("tests/fixtures/properties.csv")
        .arg("--db-path")
        .arg("some_db")
        .env_remove("RUST_LOG");

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."));
}

#[cfg(feature = "storage-rocksdb")]
#[test]
fn test_rocksdb_no_fallback_warning() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    let mut cmd = Command::new(cargo_bin!("commission-ledger"));
    cmd.arg("tests/fixtures/commands.csv")
        .arg("--properties")
        .arg("tests/fixtures/properties.csv")
        .arg("--db-path")
        .arg(&db_path)
        .env_remove("RUST_LOG");

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Persistent storage requested").not());
}
