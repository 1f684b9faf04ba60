// Heap log replay
//
// Records are grouped by their BEGIN/COMMIT markers. Only groups whose COMMIT
// reached the log are returned, in commit order. Replay stops quietly at the
// first damaged frame.

use crate::record::RecordPayload;
use crate::{WalConfig, WalReader, WalRecord};
use poolkv_core::{Error, Result};

/// Reads committed transactions back out of a heap log
pub struct RecoveryManager {
    config: WalConfig,
}

/// A transaction whose COMMIT marker reached the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedTx {
    /// Transaction id from the BEGIN/COMMIT markers
    pub tx_id: u64,
    /// Mutation records in log order (markers stripped)
    pub records: Vec<WalRecord>,
}

impl RecoveryManager {
    /// Create a new recovery manager with the given configuration
    pub fn new(config: WalConfig) -> Result<Self> {
        Ok(Self { config })
    }

    /// Recover committed transactions from the WAL
    ///
    /// Transactions are returned in the order their COMMIT markers were
    /// written. A transaction without a COMMIT marker is rolled back by
    /// omission. Mutation records outside any transaction are ignored: the
    /// heap never writes them.
    pub fn recover(&self) -> Result<Vec<CommittedTx>> {
        self.recover_after(0)
    }

    /// Recover committed transactions with an id greater than `after`
    pub fn recover_after(&self, after: u64) -> Result<Vec<CommittedTx>> {
        let mut committed = Vec::new();
        let mut open: Option<CommittedTx> = None;

        for record in self.read_valid_records()? {
            match record.payload {
                RecordPayload::BeginTx { tx_id } => {
                    if let Some(dropped) = open.take() {
                        tracing::warn!(tx_id = dropped.tx_id, "discarding uncommitted transaction");
                    }
                    open = Some(CommittedTx {
                        tx_id,
                        records: Vec::new(),
                    });
                }
                RecordPayload::CommitTx { tx_id } => match open.take() {
                    Some(tx) if tx.tx_id == tx_id => {
                        if tx.tx_id > after {
                            committed.push(tx);
                        }
                    }
                    other => {
                        return Err(Error::Corruption(format!(
                            "COMMIT for tx {} does not match open transaction {:?}",
                            tx_id,
                            other.map(|tx| tx.tx_id)
                        )));
                    }
                },
                RecordPayload::Store { .. }
                | RecordPayload::Free { .. }
                | RecordPayload::SetRoot { .. } => {
                    if let Some(tx) = open.as_mut() {
                        tx.records.push(record);
                    }
                }
            }
        }

        if let Some(dropped) = open {
            tracing::warn!(
                tx_id = dropped.tx_id,
                records = dropped.records.len(),
                "rolling back transaction without COMMIT"
            );
        }

        Ok(committed)
    }

    /// Read records up to the first unreadable one
    fn read_valid_records(&self) -> Result<Vec<WalRecord>> {
        let mut reader = WalReader::new(&self.config.wal_dir)?;
        let mut records = Vec::new();

        loop {
            match reader.next_record() {
                Ok(Some(record)) => records.push(record),
                Ok(None) => break,
                Err(e) if Self::is_recoverable_error(&e) => {
                    // Records up to this point are still valid
                    tracing::warn!(error = %e, "stopping WAL replay at damaged record");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(records)
    }

    /// Damaged frames end replay; I/O failures do not
    fn is_recoverable_error(err: &Error) -> bool {
        matches!(err, Error::Corruption(_))
    }
}
