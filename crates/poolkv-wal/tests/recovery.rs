// Replay of the heap log after clean shutdowns and simulated crashes

mod common;

use common::WalTestFixture;
use poolkv_wal::{RecoveryManager, SyncMode, WalRecord};

fn committed_ids(fixture: &WalTestFixture) -> Vec<u64> {
    RecoveryManager::new(fixture.config(SyncMode::Sync))
        .expect("Failed to create recovery manager")
        .recover()
        .expect("Recovery must not fail on a damaged tail")
        .iter()
        .map(|tx| tx.tx_id)
        .collect()
}

#[test]
fn test_clean_shutdown_replays_everything() {
    let fixture = WalTestFixture::new();
    fixture.write_log(SyncMode::Sync, |wal| {
        for tx_id in 1..=5u64 {
            let addr = tx_id * 16;
            wal.append_transaction(
                tx_id,
                vec![
                    WalRecord::store(addr, format!("node{}", tx_id).into_bytes()),
                    WalRecord::set_root(addr),
                ],
            )
            .unwrap();
        }
    });

    let txs = RecoveryManager::new(fixture.config(SyncMode::Sync))
        .unwrap()
        .recover()
        .unwrap();
    assert_eq!(txs.len(), 5);
    assert_eq!(
        txs[4].records,
        vec![WalRecord::store(80, b"node5".to_vec()), WalRecord::set_root(80)]
    );
}

#[test]
fn test_torn_commit_is_rolled_back() {
    let fixture = WalTestFixture::new();
    fixture.write_log(SyncMode::Sync, |wal| {
        wal.append_transaction(1, vec![WalRecord::store(16, b"kept".to_vec())])
            .unwrap();
        wal.append_transaction(2, vec![WalRecord::store(32, vec![7u8; 256])])
            .unwrap();
    });

    // Crash partway through the second transaction's store
    fixture.truncate_last_segment(100);

    assert_eq!(committed_ids(&fixture), vec![1]);
}

#[test]
fn test_missing_commit_marker() {
    let fixture = WalTestFixture::new();
    fixture.write_log(SyncMode::Sync, |wal| {
        wal.append_transaction(1, vec![WalRecord::store(16, b"a".to_vec())])
            .unwrap();
        wal.append(WalRecord::begin_tx(2)).unwrap();
        wal.append(WalRecord::store(32, b"b".to_vec())).unwrap();
    });

    assert_eq!(committed_ids(&fixture), vec![1]);

    // The rolled-back transaction leaves nothing behind in tx 1
    let txs = RecoveryManager::new(fixture.config(SyncMode::Sync))
        .unwrap()
        .recover()
        .unwrap();
    assert_eq!(txs[0].records, vec![WalRecord::store(16, b"a".to_vec())]);
}

#[test]
fn test_checksum_failure_stops_replay() {
    let fixture = WalTestFixture::new();
    fixture.write_log(SyncMode::Sync, |wal| {
        for tx_id in 1..=3u64 {
            wal.append_transaction(tx_id, vec![WalRecord::store(tx_id, vec![tx_id as u8; 64])])
                .unwrap();
        }
    });

    // Inside the last transaction's store body
    fixture.corrupt_last_segment(40);

    assert_eq!(committed_ids(&fixture), vec![1, 2]);
}

#[test]
fn test_no_log_directory() {
    let fixture = WalTestFixture::new();
    assert!(committed_ids(&fixture).is_empty());
    assert!(!fixture.wal_path.exists());
}
