//! `sign` (§4.2): attaches caller-supplied unlocking scripts to the
//! transaction `create` assembled, rebuilds the raw bytes, and moves the
//! row past `unsigned`.

use crate::action_engine::pending_cache::PendingSignCache;
use crate::action_engine::types::{SignActionArgs, SignActionResult};
use crate::error::AppError;
use crate::rawtx::{RawInput, RawOutput, RawTx};
use crate::storage::repo;
use crate::storage::Store;
use crate::types::{TxStatus, UserId};

pub fn sign_action(
    store: &Store,
    pending_cache: &PendingSignCache,
    user_id: UserId,
    args: SignActionArgs,
) -> Result<SignActionResult, AppError> {
    let pending = pending_cache
        .take(&args.reference)
        .ok_or_else(|| AppError::NotFound(format!("pending sign action '{}'", args.reference)))?;
    if pending.user_id != user_id {
        return Err(AppError::Permission("reference belongs to a different user".to_string()));
    }

    let tx = repo::get_transaction(store, pending.transaction_id)?
        .ok_or_else(|| AppError::NotFound(format!("transaction {}", pending.transaction_id)))?;
    if tx.status != TxStatus::Unsigned {
        return Err(AppError::Validation(format!(
            "transaction is in status {:?}, not unsigned",
            tx.status
        )));
    }

    let mut inputs = Vec::with_capacity(pending.vins.len());
    for (vin, outpoint) in pending.vins.iter().enumerate().map(|(i, v)| (i as u32, v.outpoint())) {
        let spend = args
            .spends
            .get(&vin)
            .ok_or_else(|| AppError::Validation(format!("missing unlocking script for vin {vin}")))?;
        inputs.push(RawInput {
            prev_tx_id: outpoint.tx_id.clone(),
            prev_vout: outpoint.vout,
            script: spend.unlocking_script.clone(),
            sequence: spend.sequence_number.unwrap_or(0xffff_ffff),
        });
    }

    for vout in &pending.vouts {
        if vout.verify_locking_script && vout.locking_script.is_empty() {
            return Err(AppError::Validation(
                "output requires a locking script but none was materialized".to_string(),
            ));
        }
    }
    let outputs: Vec<RawOutput> = pending
        .vouts
        .iter()
        .map(|v| RawOutput {
            satoshis: v.satoshis,
            script: v.locking_script.clone(),
        })
        .collect();

    let raw = RawTx {
        version: pending.version,
        inputs,
        outputs,
        lock_time: pending.lock_time,
    };

    if !raw.is_final() && pending.lock_time == 0 {
        return Err(AppError::Validation(
            "non-final sequence numbers with lockTime 0 have no effect".to_string(),
        ));
    }

    if let Some(vout) = pending.commission_vout {
        let commission = repo::get_commission(store, pending.transaction_id)?
            .ok_or_else(|| AppError::Validation("commission enabled but no commission row recorded".to_string()))?;
        let pending_vout = pending
            .vouts
            .get(vout as usize)
            .ok_or_else(|| AppError::Internal("commission vout index out of range".to_string()))?;
        if commission.locking_script != pending_vout.locking_script || commission.satoshis != pending_vout.satoshis {
            return Err(AppError::Validation(
                "commission output does not match the recorded commission row".to_string(),
            ));
        }
    }

    let tx_id = raw.tx_id();
    let new_status = if pending.is_no_send { TxStatus::NoSend } else { TxStatus::Unprocessed };

    let mut updated_tx = tx;
    updated_tx.tx_id = Some(tx_id.clone());
    updated_tx.status = new_status;
    let updated_tx = repo::spend_transaction(store, updated_tx, raw.encode(), "signed")?;

    Ok(SignActionResult {
        tx_id,
        status: updated_tx.status,
    })
}
