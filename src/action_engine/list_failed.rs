//! `listFailedActions` (§4.2, §4.6, scenario S5): the caller-facing trigger
//! for recovery of `failed` transactions. Lists transactions in status
//! `Failed`, and when `unfail` is set, parks each listed transaction's
//! `KnownTx` row in `Unfail` — giving the monitor's `unfail` tick (see
//! `crate::monitor::unfail_tick`) one more chance to find a merkle path
//! for it before it is given up on for good.

use chrono::Utc;

use crate::action_engine::types::{ListFailedActionsArgs, ListFailedActionsResult};
use crate::error::AppError;
use crate::storage::repo::{self, Page};
use crate::storage::spec::Spec;
use crate::storage::Store;
use crate::types::{ProvenTxReqStatus, Transaction, TxStatus, UserId};

pub fn list_failed_actions(
    store: &Store,
    user_id: UserId,
    args: ListFailedActionsArgs,
) -> Result<ListFailedActionsResult, AppError> {
    let mut spec = Spec::<Transaction>::new().eq(|tx: &Transaction| tx.status, TxStatus::Failed);
    if !args.labels.is_empty() {
        spec = spec.tags_match(
            |tx: &Transaction| tx.labels.iter().cloned().collect(),
            args.labels.clone(),
            args.label_query_mode_all,
        );
    }

    let (actions, total_actions) = repo::list_and_count_actions(
        store,
        user_id,
        &spec,
        Page {
            offset: args.offset,
            limit: args.limit,
        },
    )?;

    let mut unfailed_tx_ids = Vec::new();
    if args.unfail {
        for tx in &actions {
            let Some(tx_id) = &tx.tx_id else { continue };
            let Some(mut known) = repo::get_known_tx(store, tx_id)? else {
                continue;
            };
            if !known.status.is_problematic() {
                continue;
            }
            known.status = ProvenTxReqStatus::Unfail;
            known.note("listFailedActions: parked for unfail by caller", Utc::now().timestamp());
            repo::save_known_tx(store, &known)?;
            unfailed_tx_ids.push(tx_id.clone());
        }
    }

    Ok(ListFailedActionsResult {
        total_actions,
        actions,
        unfailed_tx_ids,
    })
}
