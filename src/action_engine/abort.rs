//! `abort` (§4.2): only valid from `unsigned` or `noSend`. Releases UTXO
//! reservations, recreates change outputs as spendable, and fails the
//! transaction.

use crate::action_engine::types::{AbortActionArgs, AbortActionResult};
use crate::error::AppError;
use crate::storage::repo;
use crate::storage::Store;
use crate::types::{TxStatus, UserId};

pub fn abort_action(store: &Store, user_id: UserId, args: AbortActionArgs) -> Result<AbortActionResult, AppError> {
    let tx = repo::get_transaction_by_reference(store, user_id, &args.reference)?
        .ok_or_else(|| AppError::NotFound(format!("reference '{}'", args.reference)))?;

    if !matches!(tx.status, TxStatus::Unsigned | TxStatus::NoSend) {
        return Err(AppError::Validation(format!(
            "cannot abort transaction in status {:?}",
            tx.status
        )));
    }

    repo::recreate_spent_outputs(store, tx.id)?;

    let mut updated = tx;
    updated.status = TxStatus::Failed;
    updated.updated_at = chrono::Utc::now().timestamp();
    repo::save_transaction(store, &updated)?;

    Ok(AbortActionResult {
        reference: args.reference,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Output, OutputBasket, OutputType, ProvidedBy, Transaction, Utxo, UTXOStatus, CHANGE_BASKET};

    fn setup() -> (std::sync::Arc<Store>, UserId) {
        let store = Store::open_temporary();
        let user = repo::get_or_create_user(&store, "02abc").unwrap();
        (store, user.id)
    }

    fn basket(store: &Store, user_id: UserId) -> OutputBasket {
        repo::get_basket(store, user_id, CHANGE_BASKET).unwrap().unwrap()
    }

    #[test]
    fn abort_releases_reservation_and_recreates_change_output() {
        let (store, user_id) = setup();
        let _ = basket(&store, user_id);

        let tx_id = store.alloc_tx_id();
        let now = chrono::Utc::now().timestamp();
        let tx = Transaction {
            id: tx_id,
            user_id,
            tx_id: None,
            reference: "ref-1".to_string(),
            version: 1,
            lock_time: 0,
            status: TxStatus::Unsigned,
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
        repo::save_transaction(&store, &tx).unwrap();

        let output_id = store.alloc_output_id();
        let output = Output {
            id: output_id,
            user_id,
            transaction_id: tx_id,
            spent_by: None,
            vout: 0,
            satoshis: 9000,
            locking_script: Some(vec![1, 2, 3]),
            custom_instructions: None,
            derivation_prefix: None,
            derivation_suffix: None,
            basket_name: Some(CHANGE_BASKET.to_string()),
            spendable: true,
            change: true,
            provided_by: ProvidedBy::Storage,
            purpose: "change".to_string(),
            output_type: OutputType::P2PKH,
            sender_identity_key: None,
            tags: Default::default(),
        };
        repo::save_output(&store, &output).unwrap();
        let utxo = Utxo {
            output_id,
            user_id,
            basket_name: CHANGE_BASKET.to_string(),
            satoshis: 9000,
            estimated_input_size: 148,
            reserved_by_id: Some(tx_id),
            status: UTXOStatus::Mined,
            created_at: now,
        };
        repo::save_utxo(&store, &utxo).unwrap();

        abort_action(
            &store,
            user_id,
            AbortActionArgs {
                reference: "ref-1".to_string(),
            },
        )
        .unwrap();

        let updated_tx = repo::get_transaction(&store, tx_id).unwrap().unwrap();
        assert_eq!(updated_tx.status, TxStatus::Failed);
        let updated_utxo = repo::get_utxo(&store, output_id).unwrap().unwrap();
        assert!(updated_utxo.reserved_by_id.is_none());
    }

    #[test]
    fn abort_rejects_transaction_past_unsigned_or_no_send() {
        let (store, user_id) = setup();
        let tx_id = store.alloc_tx_id();
        let now = chrono::Utc::now().timestamp();
        let tx = Transaction {
            id: tx_id,
            user_id,
            tx_id: Some("aa".repeat(32)),
            reference: "ref-2".to_string(),
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
        repo::save_transaction(&store, &tx).unwrap();

        let result = abort_action(
            &store,
            user_id,
            AbortActionArgs {
                reference: "ref-2".to_string(),
            },
        );
        assert!(result.is_err());
    }
}
