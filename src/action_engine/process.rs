//! `process` (§4.2): broadcasts a signed transaction (and any batched
//! `sendWith` companions) through the Services collaborator and maps the
//! aggregated outcome back onto Transaction/KnownTx status.

use std::collections::HashSet;

use chrono::Utc;

use crate::action_engine::types::{
    ProcessActionArgs, ProcessActionResult, ReviewActionResult, SendWithResult, SendWithResultStatus,
};
use crate::beef;
use crate::broadcaster::{apply_broadcast_outcome, review_status_str, tx_status_for_outcome, BroadcastJob, Broadcaster};
use crate::error::AppError;
use crate::services::{BroadcastOutcome, Services};
use crate::storage::repo;
use crate::storage::Store;
use crate::types::{ProvenTxReqStatus, TxStatus, UTXOStatus, UserId};

/// §4.2 step 2 of the broadcast procedure: statuses a `sendWith` id can
/// already be in without needing (re-)broadcasting.
const ALREADY_SENT_STATUSES: [ProvenTxReqStatus; 5] = [
    ProvenTxReqStatus::Unsent,
    ProvenTxReqStatus::Sending,
    ProvenTxReqStatus::Unmined,
    ProvenTxReqStatus::Completed,
    ProvenTxReqStatus::NoSend,
];

fn utxo_status_for_already_sent(status: ProvenTxReqStatus) -> UTXOStatus {
    match status {
        ProvenTxReqStatus::Unmined | ProvenTxReqStatus::Completed => UTXOStatus::Mined,
        _ => UTXOStatus::Sending,
    }
}

fn send_with_status_for_already_sent(status: ProvenTxReqStatus) -> SendWithResultStatus {
    match status {
        ProvenTxReqStatus::Completed | ProvenTxReqStatus::Unmined => SendWithResultStatus::Unproven,
        _ => SendWithResultStatus::Sending,
    }
}

pub async fn process_action(
    store: &Store,
    services: &dyn Services,
    broadcaster: &Broadcaster,
    user_id: UserId,
    args: ProcessActionArgs,
) -> Result<ProcessActionResult, AppError> {
    let tx = repo::get_transaction_by_reference(store, user_id, &args.reference)?
        .ok_or_else(|| AppError::NotFound(format!("reference '{}'", args.reference)))?;

    if tx.status != TxStatus::Unprocessed {
        return Err(AppError::Validation(format!(
            "cannot process transaction in status {:?}",
            tx.status
        )));
    }
    let primary_tx_id = tx
        .tx_id
        .clone()
        .ok_or_else(|| AppError::Internal("unprocessed transaction has no txId".to_string()))?;

    let mut send_with_results = Vec::new();
    let mut review_results = Vec::new();

    // §4.2 broadcast step 2: ids already past the broadcast stage
    // (e.g. a `sendWith` companion posted by an earlier call) are not
    // re-posted — they just contribute a result entry and have their
    // spendable outputs materialized — and drop out of the ready set.
    let mut ready_ids = vec![primary_tx_id.clone()];
    for id in &args.send_with {
        let already_sent_status = repo::get_known_tx(store, id)?
            .map(|k| k.status)
            .filter(|s| ALREADY_SENT_STATUSES.contains(s));
        match already_sent_status {
            Some(status) => {
                let utxo_status = utxo_status_for_already_sent(status);
                for tx in repo::find_transactions_by_tx_id(store, id)? {
                    repo::materialize_spendable_outputs(store, tx.id, utxo_status)?;
                }
                send_with_results.push(SendWithResult {
                    tx_id: id.clone(),
                    status: send_with_status_for_already_sent(status),
                });
                review_results.push(ReviewActionResult {
                    tx_id: id.clone(),
                    status: "success".to_string(),
                    competing_tx_id: None,
                });
            }
            None => ready_ids.push(id.clone()),
        }
    }

    // §4.2 broadcast step 3: a multi-id ready set shares one random
    // batch tag so every member is broadcast together or not at all.
    if ready_ids.len() > 1 {
        let batch = repo::new_batch_tag();
        for id in &ready_ids {
            if let Some(mut known) = repo::get_known_tx(store, id)? {
                known.batch = Some(batch.clone());
                repo::save_known_tx(store, &known)?;
            }
            for mut tx in repo::find_transactions_by_tx_id(store, id)? {
                tx.batch = Some(batch.clone());
                repo::save_transaction(store, &tx)?;
            }
        }
    }

    // §4.2 broadcast step 5: `isDelayed` hands the ready set to the
    // Background Broadcaster instead of posting BEEF inline. The caller
    // gets back `unsent`/`sending` immediately and the real outcome
    // arrives later via `sendWaiting` (§4.6).
    if tx.is_delayed {
        for id in &ready_ids {
            if let Some(mut known) = repo::get_known_tx(store, id)? {
                if !known.status.is_beyond_broadcast_stage() {
                    known.status = ProvenTxReqStatus::Unsent;
                    known.note("processAction: queued for delayed send", Utc::now().timestamp());
                    repo::save_known_tx(store, &known)?;
                }
            }
            for mut row in repo::find_transactions_by_tx_id(store, id)? {
                if row.status.is_terminal() {
                    continue;
                }
                row.status = TxStatus::Sending;
                row.updated_at = Utc::now().timestamp();
                repo::save_transaction(store, &row)?;
            }
            if *id != primary_tx_id {
                send_with_results.push(SendWithResult {
                    tx_id: id.clone(),
                    status: SendWithResultStatus::Sending,
                });
            }
            review_results.push(ReviewActionResult {
                tx_id: id.clone(),
                status: "success".to_string(),
                competing_tx_id: None,
            });
        }
        broadcaster.enqueue(BroadcastJob { tx_ids: ready_ids }).await?;

        return Ok(ProcessActionResult {
            tx_id: primary_tx_id,
            status: TxStatus::Sending,
            send_with_results,
            review_results,
        });
    }

    let beef = beef::get_beef_for_tx_ids(store, &ready_ids, &HashSet::new())?;

    let aggregated = services
        .post_beef(&beef, &ready_ids)
        .await
        .map_err(|e| AppError::Broadcast(e.to_string()))?;

    let mut primary_status = TxStatus::Sending;

    for result in &aggregated.results {
        apply_broadcast_outcome(store, &result.tx_id, result.outcome, "processAction")?;

        if result.tx_id == primary_tx_id {
            primary_status = tx_status_for_outcome(result.outcome);
        } else {
            let send_with_status = match result.outcome {
                BroadcastOutcome::Success | BroadcastOutcome::AlreadyMined => SendWithResultStatus::Unproven,
                BroadcastOutcome::DoubleSpend | BroadcastOutcome::Invalid => SendWithResultStatus::Failed,
            };
            send_with_results.push(SendWithResult {
                tx_id: result.tx_id.clone(),
                status: send_with_status,
            });
        }

        review_results.push(ReviewActionResult {
            tx_id: result.tx_id.clone(),
            status: review_status_str(result.outcome).to_string(),
            competing_tx_id: result.competing_tx_id.clone(),
        });
    }

    Ok(ProcessActionResult {
        tx_id: primary_tx_id,
        status: primary_status,
        send_with_results,
        review_results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DedupConfig;
    use crate::services::MockServices;
    use crate::types::{KnownTx, ProvenTxReqStatus, Transaction};
    use std::sync::Arc;

    fn setup_tx(store: &Store, user_id: UserId, reference: &str, tx_id: &str) -> Transaction {
        let id = store.alloc_tx_id();
        let now = Utc::now().timestamp();
        let tx = Transaction {
            id,
            user_id,
            tx_id: Some(tx_id.to_string()),
            reference: reference.to_string(),
            version: 1,
            lock_time: 0,
            status: TxStatus::Unprocessed,
            is_outgoing: true,
            description: String::new(),
            satoshis: 1000,
            input_beef: None,
            labels: vec![],
            batch: None,
            is_delayed: false,
            created_at: now,
            updated_at: now,
        };
        repo::save_transaction(store, &tx).unwrap();
        repo::save_known_tx(
            store,
            &KnownTx {
                tx_id: tx_id.to_string(),
                raw_tx: vec![0u8; 10],
                input_beef: None,
                merkle_path: None,
                status: ProvenTxReqStatus::Unprocessed,
                attempts: 0,
                batch: None,
                notes: vec![],
            },
        )
        .unwrap();
        tx
    }

    #[tokio::test]
    async fn successful_broadcast_moves_transaction_to_unproven() {
        let store = Store::open_temporary();
        let user = repo::get_or_create_user(&store, "02abc").unwrap();
        let tx_id = "aa".repeat(32);
        setup_tx(&store, user.id, "ref-1", &tx_id);

        let services: Arc<dyn Services> = Arc::new(MockServices::new());
        let (broadcaster, handle) = Broadcaster::spawn(store.clone(), services.clone(), &DedupConfig::default(), 8);
        let result = process_action(
            &store,
            services.as_ref(),
            &broadcaster,
            user.id,
            ProcessActionArgs {
                reference: "ref-1".to_string(),
                send_with: vec![],
            },
        )
        .await
        .unwrap();

        assert_eq!(result.status, TxStatus::Unproven);
        let updated = repo::get_transaction_by_tx_id(&store, user.id, &tx_id).unwrap().unwrap();
        assert_eq!(updated.status, TxStatus::Unproven);
        handle.abort();
    }

    #[tokio::test]
    async fn double_spend_outcome_fails_the_transaction() {
        let store = Store::open_temporary();
        let user = repo::get_or_create_user(&store, "02abc").unwrap();
        let tx_id = "bb".repeat(32);
        setup_tx(&store, user.id, "ref-2", &tx_id);

        let services = MockServices::new();
        services.set_outcome(tx_id.clone(), BroadcastOutcome::DoubleSpend);
        let services: Arc<dyn Services> = Arc::new(services);
        let (broadcaster, handle) = Broadcaster::spawn(store.clone(), services.clone(), &DedupConfig::default(), 8);

        let result = process_action(
            &store,
            services.as_ref(),
            &broadcaster,
            user.id,
            ProcessActionArgs {
                reference: "ref-2".to_string(),
                send_with: vec![],
            },
        )
        .await
        .unwrap();

        assert_eq!(result.status, TxStatus::Failed);
        handle.abort();
    }

    #[tokio::test]
    async fn delayed_action_is_queued_instead_of_posted_immediately() {
        let store = Store::open_temporary();
        let user = repo::get_or_create_user(&store, "02abc").unwrap();
        let tx_id = "cc".repeat(32);
        let mut tx = setup_tx(&store, user.id, "ref-3", &tx_id);
        tx.is_delayed = true;
        repo::save_transaction(&store, &tx).unwrap();

        let services: Arc<dyn Services> = Arc::new(MockServices::new());
        let (broadcaster, handle) = Broadcaster::spawn(store.clone(), services.clone(), &DedupConfig::default(), 8);

        let result = process_action(
            &store,
            services.as_ref(),
            &broadcaster,
            user.id,
            ProcessActionArgs {
                reference: "ref-3".to_string(),
                send_with: vec![],
            },
        )
        .await
        .unwrap();

        assert_eq!(result.status, TxStatus::Sending);
        let known = repo::get_known_tx(&store, &tx_id).unwrap().unwrap();
        assert_eq!(known.status, ProvenTxReqStatus::Unsent);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let updated = repo::get_transaction_by_tx_id(&store, user.id, &tx_id).unwrap().unwrap();
        assert_eq!(updated.status, TxStatus::Sending);
        handle.abort();
    }
}
