//! Background Broadcaster (§4.5): a bounded FIFO queue of delayed-send
//! jobs. Each job is broadcast through the Services collaborator once,
//! deduplicated against recent sends by a time-partitioned Bloom filter so
//! a retry storm doesn't resubmit the same txid every tick.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::beef;
use crate::config::DedupConfig;
use crate::dedup::DedupMap;
use crate::error::AppError;
use crate::services::{BroadcastOutcome, Services};
use crate::storage::repo;
use crate::storage::Store;
use crate::types::{ProvenTxReqStatus, TxId, TxStatus, UTXOStatus};

/// Maps a `BroadcastOutcome` (§4.2 `process`'s broadcast step) onto the
/// `ProvenTxReqStatus` its owning `KnownTx` row should move to. Shared by
/// `processAction`'s immediate broadcast and this worker's delayed one so
/// both paths advance the state machine identically.
pub fn known_status_for_outcome(outcome: BroadcastOutcome) -> ProvenTxReqStatus {
    match outcome {
        BroadcastOutcome::Success => ProvenTxReqStatus::Unmined,
        BroadcastOutcome::AlreadyMined => ProvenTxReqStatus::Completed,
        BroadcastOutcome::DoubleSpend => ProvenTxReqStatus::DoubleSpend,
        BroadcastOutcome::Invalid => ProvenTxReqStatus::Invalid,
    }
}

/// Companion to `known_status_for_outcome` for the owning `Transaction`'s
/// `TxStatus`.
pub fn tx_status_for_outcome(outcome: BroadcastOutcome) -> TxStatus {
    match outcome {
        BroadcastOutcome::Success => TxStatus::Unproven,
        BroadcastOutcome::AlreadyMined => TxStatus::Completed,
        BroadcastOutcome::DoubleSpend => TxStatus::Failed,
        BroadcastOutcome::Invalid => TxStatus::Invalid,
    }
}

/// `reviewResults`' diagnostic status string (§4.2 `process`).
pub fn review_status_str(outcome: BroadcastOutcome) -> &'static str {
    match outcome {
        BroadcastOutcome::Success | BroadcastOutcome::AlreadyMined => "success",
        BroadcastOutcome::DoubleSpend => "doubleSpend",
        BroadcastOutcome::Invalid => "invalidTx",
    }
}

/// Applies one `BroadcastOutcome` to every piece of state a single txid
/// touches: the `KnownTx` row (status, attempt count, history note), the
/// owning `Transaction` row(s), and — for an outcome the process table
/// marks `spendable: yes` — the transaction's own not-yet-spent outputs,
/// which are flipped spendable and, for change outputs, given a UTXO row
/// so a later `createAction` can fund from them.
pub fn apply_broadcast_outcome(store: &Store, tx_id: &TxId, outcome: BroadcastOutcome, note_prefix: &str) -> Result<(), AppError> {
    if let Some(mut known) = repo::get_known_tx(store, tx_id)? {
        known.status = known_status_for_outcome(outcome);
        known.attempts += 1;
        known.note(format!("{note_prefix}: outcome {outcome:?}"), chrono::Utc::now().timestamp());
        repo::save_known_tx(store, &known)?;
    }

    let new_status = tx_status_for_outcome(outcome);
    let spendable_utxo_status = match outcome {
        BroadcastOutcome::Success => Some(UTXOStatus::Unmined),
        BroadcastOutcome::AlreadyMined => Some(UTXOStatus::Mined),
        BroadcastOutcome::DoubleSpend | BroadcastOutcome::Invalid => None,
    };
    for mut tx in repo::find_transactions_by_tx_id(store, tx_id)? {
        if tx.status.is_terminal() {
            continue;
        }
        tx.status = new_status;
        tx.updated_at = chrono::Utc::now().timestamp();
        repo::save_transaction(store, &tx)?;
        if let Some(utxo_status) = spendable_utxo_status {
            repo::materialize_spendable_outputs(store, tx.id, utxo_status)?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct BroadcastJob {
    pub tx_ids: Vec<TxId>,
}

/// Handle for enqueueing broadcast work. Cloning shares the same bounded
/// channel, so every action-engine caller can hold one.
#[derive(Clone)]
pub struct Broadcaster {
    sender: mpsc::Sender<BroadcastJob>,
}

impl Broadcaster {
    /// Starts the worker loop and returns a handle plus its `JoinHandle`
    /// for orderly shutdown. `queue_capacity` bounds the backlog; once
    /// full, `enqueue` applies backpressure rather than growing unbounded.
    pub fn spawn(
        store: Arc<Store>,
        services: Arc<dyn Services>,
        dedup_config: &DedupConfig,
        queue_capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(queue_capacity);
        let dedup = Arc::new(DedupMap::new(dedup_config));
        // A single worker draining the channel gives us mutual exclusion
        // over broadcast jobs for free — no two jobs ever post BEEF
        // concurrently, matching §4.5's "single scan in flight" contract.
        let handle = tokio::spawn(run(receiver, store, services, dedup));
        (Self { sender }, handle)
    }

    pub async fn enqueue(&self, job: BroadcastJob) -> Result<(), AppError> {
        self.sender
            .send(job)
            .await
            .map_err(|_| AppError::Internal("broadcaster queue is closed".to_string()))
    }
}

async fn run(mut receiver: mpsc::Receiver<BroadcastJob>, store: Arc<Store>, services: Arc<dyn Services>, dedup: Arc<DedupMap>) {
    while let Some(job) = receiver.recv().await {
        if let Err(err) = broadcast_job(&store, services.as_ref(), &dedup, &job).await {
            warn!(error = %err, tx_ids = ?job.tx_ids, "broadcaster job failed");
        }
    }
}

async fn broadcast_job(store: &Store, services: &dyn Services, dedup: &DedupMap, job: &BroadcastJob) -> Result<(), AppError> {
    let mut fresh_ids = Vec::with_capacity(job.tx_ids.len());
    for tx_id in &job.tx_ids {
        if !dedup.check_and_insert(tx_id.as_bytes()).await {
            fresh_ids.push(tx_id.clone());
        }
    }
    if fresh_ids.is_empty() {
        return Ok(());
    }

    let beef = beef::get_beef_for_tx_ids(store, &fresh_ids, &HashSet::new())?;
    let aggregated = services
        .post_beef(&beef, &fresh_ids)
        .await
        .map_err(|e| AppError::Broadcast(e.to_string()))?;

    for result in &aggregated.results {
        apply_broadcast_outcome(store, &result.tx_id, result.outcome, "backgroundBroadcaster")?;
    }
    Ok(())
}

/// Guards against two broadcaster scans running at once when the caller
/// drives `broadcast_job` directly outside the worker loop (e.g. the
/// Monitor Daemon's `sendWaiting` job, §4.6).
pub type ScanGuard = Arc<Mutex<()>>;

pub fn new_scan_guard() -> ScanGuard {
    Arc::new(Mutex::new(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MockServices;
    use crate::types::KnownTx;

    fn sample_known_tx(tx_id: &str) -> KnownTx {
        KnownTx {
            tx_id: tx_id.to_string(),
            raw_tx: vec![0u8; 10],
            input_beef: None,
            merkle_path: None,
            status: ProvenTxReqStatus::Unsent,
            attempts: 0,
            batch: None,
            notes: vec![],
        }
    }

    #[tokio::test]
    async fn broadcast_job_moves_known_tx_to_unmined() {
        let store = Store::open_temporary();
        let tx_id = "aa".repeat(32);
        repo::save_known_tx(&store, &sample_known_tx(&tx_id)).unwrap();

        let services = MockServices::new();
        let dedup = DedupMap::new(&DedupConfig {
            window_secs: 60,
            bucket_secs: 1,
        });

        broadcast_job(&store, &services, &dedup, &BroadcastJob { tx_ids: vec![tx_id.clone()] })
            .await
            .unwrap();

        let known = repo::get_known_tx(&store, &tx_id).unwrap().unwrap();
        assert_eq!(known.status, ProvenTxReqStatus::Unmined);
        assert_eq!(known.attempts, 1);
    }

    #[tokio::test]
    async fn duplicate_job_within_window_is_skipped() {
        let store = Store::open_temporary();
        let tx_id = "bb".repeat(32);
        repo::save_known_tx(&store, &sample_known_tx(&tx_id)).unwrap();

        let services = MockServices::new();
        let dedup = DedupMap::new(&DedupConfig {
            window_secs: 60,
            bucket_secs: 1,
        });

        let job = BroadcastJob { tx_ids: vec![tx_id.clone()] };
        broadcast_job(&store, &services, &dedup, &job).await.unwrap();
        broadcast_job(&store, &services, &dedup, &job).await.unwrap();

        let known = repo::get_known_tx(&store, &tx_id).unwrap().unwrap();
        assert_eq!(known.attempts, 1);
    }
}
