//! Monitor Daemon (§4.6): four independently-ticking background jobs that
//! keep broadcast state honest without a caller ever having to poll —
//! `sendWaiting`, `unfail`, `escalateAttempts`, and `syncStatuses`. Each
//! runs to completion before its own next tick, which is enough mutual
//! exclusion for a single-process daemon with one Monitor instance.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broadcaster::{apply_broadcast_outcome, BroadcastJob, Broadcaster};
use crate::config::MonitorConfig;
use crate::error::AppError;
use crate::services::{BroadcastOutcome, Services};
use crate::storage::repo;
use crate::storage::Store;
use crate::types::{ProvenTxReqStatus, TxStatus};

pub struct Monitor {
    handles: Vec<JoinHandle<()>>,
}

impl Monitor {
    /// `shutdown_token` is the same token `ShutdownManager` cancels on
    /// SIGINT/SIGTERM; each tick loop selects on it so a cancelled Monitor
    /// finishes its in-flight tick rather than being forcibly killed.
    pub fn spawn(
        store: Arc<Store>,
        services: Arc<dyn Services>,
        broadcaster: Broadcaster,
        config: MonitorConfig,
        shutdown_token: CancellationToken,
    ) -> Self {
        let handles = vec![
            tokio::spawn(send_waiting_loop(
                store.clone(),
                broadcaster.clone(),
                config.clone(),
                shutdown_token.clone(),
            )),
            tokio::spawn(unfail_loop(store.clone(), services.clone(), config.clone(), shutdown_token.clone())),
            tokio::spawn(escalate_attempts_loop(store.clone(), config.clone(), shutdown_token.clone())),
            tokio::spawn(sync_statuses_loop(store, services, config, shutdown_token)),
        ];
        Self { handles }
    }

    /// Hands ownership of the tick-loop task handles to the caller (e.g.
    /// `ShutdownManager`, the same way the broadcaster's handle is
    /// registered) so they participate in the daemon's graceful shutdown
    /// sequence instead of being aborted after the fact.
    pub fn into_handles(self) -> Vec<JoinHandle<()>> {
        self.handles
    }
}

async fn send_waiting_tick(store: &Store, broadcaster: &Broadcaster, min_age_secs: i64) -> Result<(), AppError> {
    let now = Utc::now().timestamp();
    let candidates = repo::list_known_tx_by_status(store, &[ProvenTxReqStatus::Unsent, ProvenTxReqStatus::Sending])?;
    let due: Vec<String> = candidates
        .into_iter()
        .filter(|known| known.notes.first().map(|n| now - n.at >= min_age_secs).unwrap_or(true))
        .map(|known| known.tx_id)
        .collect();
    if due.is_empty() {
        return Ok(());
    }
    info!(count = due.len(), "sendWaiting: dispatching due transactions");
    broadcaster.enqueue(BroadcastJob { tx_ids: due }).await
}

async fn send_waiting_loop(store: Arc<Store>, broadcaster: Broadcaster, config: MonitorConfig, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(config.send_waiting_period_secs.max(1)));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("sendWaiting loop shutting down");
                return;
            }
            _ = ticker.tick() => {
                if let Err(err) = send_waiting_tick(&store, &broadcaster, config.send_waiting_min_age_secs).await {
                    warn!(error = %err, "sendWaiting tick failed");
                }
            }
        }
    }
}

/// §4.6 `unfail`: a `KnownTx` parked in `unfail` by `ListFailedActions` is
/// given one more chance against reality. If Services now reports a merkle
/// path for it, it was mined after all: recover it as `completed` and
/// materialize its spendable outputs. If no path has appeared, it reverts
/// to `invalid`.
async fn unfail_tick(store: &Store, services: &dyn Services) -> Result<(), AppError> {
    let candidates = repo::list_known_tx_by_status(store, &[ProvenTxReqStatus::Unfail])?;
    for known in candidates {
        match services.get_merkle_path(&known.tx_id).await {
            Ok(Some(_)) => {
                apply_broadcast_outcome(store, &known.tx_id, BroadcastOutcome::AlreadyMined, "unfail")?;
                info!(tx_id = %known.tx_id, "unfail: merkle path found, recovered as mined");
            }
            Ok(None) => {
                apply_broadcast_outcome(store, &known.tx_id, BroadcastOutcome::Invalid, "unfail")?;
                info!(tx_id = %known.tx_id, "unfail: no merkle path, reverted to invalid");
            }
            Err(err) => {
                warn!(tx_id = %known.tx_id, error = %err, "unfail: merkle path lookup failed, leaving parked");
            }
        }
    }
    Ok(())
}

async fn unfail_loop(store: Arc<Store>, services: Arc<dyn Services>, config: MonitorConfig, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(config.unfail_period_secs.max(1)));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("unfail loop shutting down");
                return;
            }
            _ = ticker.tick() => {
                if let Err(err) = unfail_tick(&store, services.as_ref()).await {
                    warn!(error = %err, "unfail tick failed");
                }
            }
        }
    }
}

async fn escalate_attempts_tick(store: &Store, max_attempts: u32) -> Result<(), AppError> {
    let candidates = repo::list_known_tx_by_status(
        store,
        &[ProvenTxReqStatus::Unsent, ProvenTxReqStatus::Sending, ProvenTxReqStatus::Unmined],
    )?;
    for mut known in candidates {
        if known.attempts < max_attempts {
            continue;
        }
        known.status = ProvenTxReqStatus::Invalid;
        known.note(
            format!("escalateAttempts: exceeded {max_attempts} attempts, giving up"),
            Utc::now().timestamp(),
        );
        repo::save_known_tx(store, &known)?;
        for mut tx in repo::find_transactions_by_tx_id(store, &known.tx_id)? {
            tx.status = TxStatus::Failed;
            tx.updated_at = Utc::now().timestamp();
            repo::save_transaction(store, &tx)?;
        }
        warn!(tx_id = %known.tx_id, attempts = known.attempts, "escalated to invalid after too many attempts");
    }
    Ok(())
}

async fn escalate_attempts_loop(store: Arc<Store>, config: MonitorConfig, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(config.escalate_attempts_period_secs.max(1)));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("escalateAttempts loop shutting down");
                return;
            }
            _ = ticker.tick() => {
                if let Err(err) = escalate_attempts_tick(&store, config.max_attempts).await {
                    warn!(error = %err, "escalateAttempts tick failed");
                }
            }
        }
    }
}

fn tx_status_for_known(status: ProvenTxReqStatus) -> Option<TxStatus> {
    match status {
        ProvenTxReqStatus::Completed => Some(TxStatus::Completed),
        ProvenTxReqStatus::DoubleSpend => Some(TxStatus::Failed),
        ProvenTxReqStatus::Invalid => Some(TxStatus::Invalid),
        ProvenTxReqStatus::Sending => Some(TxStatus::Sending),
        ProvenTxReqStatus::Unmined => Some(TxStatus::Unproven),
        _ => None,
    }
}

async fn sync_statuses_tick(store: &Store, services: &dyn Services) -> Result<(), AppError> {
    let pending = repo::list_known_tx_by_status(
        store,
        &[
            ProvenTxReqStatus::Sending,
            ProvenTxReqStatus::Unmined,
            ProvenTxReqStatus::Unsent,
        ],
    )?;

    for mut known in pending {
        if known.merkle_path.is_none() {
            match services.get_merkle_path(&known.tx_id).await {
                Ok(Some(path)) => {
                    known.merkle_path = Some(path);
                    known.status = ProvenTxReqStatus::Completed;
                    known.note("syncStatuses: merkle path found, transaction mined", Utc::now().timestamp());
                    repo::save_known_tx(store, &known)?;
                }
                Ok(None) => continue,
                Err(err) => {
                    warn!(tx_id = %known.tx_id, error = %err, "syncStatuses: merkle path lookup failed");
                    continue;
                }
            }
        }

        let Some(new_status) = tx_status_for_known(known.status) else {
            continue;
        };
        for mut tx in repo::find_transactions_by_tx_id(store, &known.tx_id)? {
            if tx.status == new_status || tx.status.is_terminal() {
                continue;
            }
            tx.status = new_status;
            tx.updated_at = Utc::now().timestamp();
            repo::save_transaction(store, &tx)?;
        }
    }
    Ok(())
}

async fn sync_statuses_loop(store: Arc<Store>, services: Arc<dyn Services>, config: MonitorConfig, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(config.sync_statuses_period_secs.max(1)));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("syncStatuses loop shutting down");
                return;
            }
            _ = ticker.tick() => {
                if let Err(err) = sync_statuses_tick(&store, services.as_ref()).await {
                    warn!(error = %err, "syncStatuses tick failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DedupConfig;
    use crate::services::MockServices;
    use crate::types::KnownTx;

    fn unsent_known_tx(tx_id: &str, age_secs: i64) -> KnownTx {
        let mut known = KnownTx {
            tx_id: tx_id.to_string(),
            raw_tx: vec![0u8; 10],
            input_beef: None,
            merkle_path: None,
            status: ProvenTxReqStatus::Unsent,
            attempts: 0,
            batch: None,
            notes: vec![],
        };
        known.note("queued", Utc::now().timestamp() - age_secs);
        known
    }

    #[tokio::test]
    async fn send_waiting_enqueues_transactions_past_minimum_age() {
        let store = Store::open_temporary();
        let tx_id = "aa".repeat(32);
        repo::save_known_tx(&store, &unsent_known_tx(&tx_id, 100)).unwrap();

        let services: Arc<dyn Services> = Arc::new(MockServices::new());
        let (broadcaster, handle) = Broadcaster::spawn(store.clone(), services, &DedupConfig::default(), 8);

        send_waiting_tick(&store, &broadcaster, 30).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let known = repo::get_known_tx(&store, &tx_id).unwrap().unwrap();
        assert_eq!(known.status, ProvenTxReqStatus::Unmined);
        handle.abort();
    }

    #[tokio::test]
    async fn unfail_recovers_transaction_when_merkle_path_reappears() {
        let store = Store::open_temporary();
        let user = repo::get_or_create_user(&store, "02abc").unwrap();
        let tx_id = "ee".repeat(32);

        let mut known = unsent_known_tx(&tx_id, 0);
        known.status = ProvenTxReqStatus::Unfail;
        repo::save_known_tx(&store, &known).unwrap();

        let id = store.alloc_tx_id();
        let now = Utc::now().timestamp();
        repo::save_transaction(
            &store,
            &crate::types::Transaction {
                id,
                user_id: user.id,
                tx_id: Some(tx_id.clone()),
                reference: "ref-unfail".to_string(),
                version: 1,
                lock_time: 0,
                status: TxStatus::Failed,
                is_outgoing: true,
                description: String::new(),
                satoshis: 100,
                input_beef: None,
                labels: vec![],
                batch: None,
                is_delayed: false,
                created_at: now,
                updated_at: now,
            },
        )
        .unwrap();

        let services = MockServices::new();
        services.merkle_paths.insert(
            tx_id.clone(),
            crate::types::MerklePath {
                block_height: 11,
                block_hash: "ff".repeat(32),
                merkle_root: "11".repeat(32),
                path: vec![],
                index: 0,
            },
        );

        unfail_tick(&store, &services).await.unwrap();

        let updated_known = repo::get_known_tx(&store, &tx_id).unwrap().unwrap();
        assert_eq!(updated_known.status, ProvenTxReqStatus::Completed);

        let updated_tx = repo::get_transaction_by_tx_id(&store, user.id, &tx_id).unwrap().unwrap();
        assert_eq!(updated_tx.status, TxStatus::Completed);
    }

    #[tokio::test]
    async fn unfail_reverts_to_invalid_without_a_merkle_path() {
        let store = Store::open_temporary();
        let tx_id = "ff".repeat(32);
        let mut known = unsent_known_tx(&tx_id, 0);
        known.status = ProvenTxReqStatus::Unfail;
        repo::save_known_tx(&store, &known).unwrap();

        let services = MockServices::new();
        unfail_tick(&store, &services).await.unwrap();

        let updated = repo::get_known_tx(&store, &tx_id).unwrap().unwrap();
        assert_eq!(updated.status, ProvenTxReqStatus::Invalid);
    }

    #[tokio::test]
    async fn escalate_attempts_marks_exhausted_jobs_invalid() {
        let store = Store::open_temporary();
        let tx_id = "bb".repeat(32);
        let mut known = unsent_known_tx(&tx_id, 0);
        known.attempts = 10;
        repo::save_known_tx(&store, &known).unwrap();

        escalate_attempts_tick(&store, 10).await.unwrap();

        let updated = repo::get_known_tx(&store, &tx_id).unwrap().unwrap();
        assert_eq!(updated.status, ProvenTxReqStatus::Invalid);
    }

    #[tokio::test]
    async fn sync_statuses_completes_transaction_once_merkle_path_appears() {
        let store = Store::open_temporary();
        let user = repo::get_or_create_user(&store, "02abc").unwrap();
        let tx_id = "cc".repeat(32);

        let known = KnownTx {
            tx_id: tx_id.clone(),
            raw_tx: vec![0u8; 10],
            input_beef: None,
            merkle_path: None,
            status: ProvenTxReqStatus::Unmined,
            attempts: 1,
            batch: None,
            notes: vec![],
        };
        repo::save_known_tx(&store, &known).unwrap();

        let id = store.alloc_tx_id();
        let now = Utc::now().timestamp();
        repo::save_transaction(
            &store,
            &crate::types::Transaction {
                id,
                user_id: user.id,
                tx_id: Some(tx_id.clone()),
                reference: "ref".to_string(),
                version: 1,
                lock_time: 0,
                status: TxStatus::Unproven,
                is_outgoing: true,
                description: String::new(),
                satoshis: 100,
                input_beef: None,
                labels: vec![],
                batch: None,
                is_delayed: false,
                created_at: now,
                updated_at: now,
            },
        )
        .unwrap();

        let services = MockServices::new();
        services.merkle_paths.insert(
            tx_id.clone(),
            crate::types::MerklePath {
                block_height: 10,
                block_hash: "dd".repeat(32),
                merkle_root: "ee".repeat(32),
                path: vec![],
                index: 0,
            },
        );

        sync_statuses_tick(&store, &services).await.unwrap();

        let tx = repo::get_transaction(&store, id).unwrap().unwrap();
        assert_eq!(tx.status, TxStatus::Completed);
    }
}
