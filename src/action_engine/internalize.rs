//! `internalize` (§4.2): accepts an externally-built, self-proving BEEF and
//! adopts selected outputs into this wallet's storage, either as a fresh
//! incoming Transaction or merged into one already known by txid.

use std::collections::{BTreeSet, HashSet};

use chrono::Utc;

use crate::action_engine::types::{
    InternalizeActionArgs, InternalizeActionResult, InternalizeOutputProtocol, InternalizeProtocolKind,
};
use crate::beef::{self, Beef, BeefEntry};
use crate::crypto::WalletCrypto;
use crate::error::AppError;
use crate::rawtx::RawTx;
use crate::storage::repo;
use crate::storage::Store;
use crate::types::{
    checked_add_sat, KnownTx, OutPoint, Output, OutputBasket, OutputType, ProvenTxReqStatus, ProvidedBy, Satoshis,
    Transaction, TxStatus, UTXOStatus, UserId, Utxo,
};

/// The subject of an atomic BEEF is the one entry no other entry spends
/// from — i.e. the leaf of the dependency graph the caller is asking us
/// to internalize outputs of.
fn find_subject(beef: &Beef) -> Result<&BeefEntry, AppError> {
    let mut referenced: HashSet<String> = HashSet::new();
    for entry in &beef.entries {
        if let BeefEntry::RawTx { raw_tx, .. } = entry {
            referenced.extend(beef::input_tx_ids(raw_tx));
        }
    }
    beef.entries
        .iter()
        .find(|e| matches!(e, BeefEntry::RawTx { tx_id, .. } if !referenced.contains(tx_id)))
        .ok_or_else(|| AppError::BeefInvalid("atomic BEEF has no unreferenced subject transaction".to_string()))
}

fn ensure_basket(store: &Store, user_id: UserId, name: &str) -> Result<(), AppError> {
    if repo::get_basket(store, user_id, name)?.is_none() {
        repo::save_basket(
            store,
            &OutputBasket {
                user_id,
                name: name.to_string(),
                number_of_desired_utxos: 32,
                minimum_desired_utxo_value: 500,
            },
        )?;
    }
    Ok(())
}

struct Resolved {
    locking_script: Vec<u8>,
    basket_name: Option<String>,
    tags: BTreeSet<String>,
    custom_instructions: Option<String>,
    sender_identity_key: Option<String>,
    derivation_prefix: Option<String>,
    derivation_suffix: Option<String>,
}

fn resolve_protocol(
    crypto: &dyn WalletCrypto,
    root_key_hex: &str,
    raw: &crate::rawtx::RawOutput,
    proto: &InternalizeOutputProtocol,
) -> Result<Resolved, AppError> {
    match proto.kind {
        InternalizeProtocolKind::WalletPayment => {
            let sender = proto
                .sender_identity_key
                .clone()
                .ok_or_else(|| AppError::Validation("walletPayment requires senderIdentityKey".to_string()))?;
            let prefix = proto
                .derivation_prefix
                .clone()
                .ok_or_else(|| AppError::Validation("walletPayment requires derivationPrefix".to_string()))?;
            let suffix = proto
                .derivation_suffix
                .clone()
                .ok_or_else(|| AppError::Validation("walletPayment requires derivationSuffix".to_string()))?;

            let derived_pub = crypto.derive_public_key(root_key_hex, &prefix, &suffix, Some(&sender))?;
            let expected_script = crypto.p2pkh_locking_script(&derived_pub)?;
            if expected_script != raw.script {
                return Err(AppError::Validation(
                    "derived locking script does not match the claimed payment output".to_string(),
                ));
            }

            Ok(Resolved {
                locking_script: raw.script.clone(),
                basket_name: Some("default".to_string()),
                tags: BTreeSet::new(),
                custom_instructions: None,
                sender_identity_key: Some(sender),
                derivation_prefix: Some(prefix),
                derivation_suffix: Some(suffix),
            })
        }
        InternalizeProtocolKind::BasketInsertion => Ok(Resolved {
            locking_script: raw.script.clone(),
            basket_name: Some(proto.basket.clone().unwrap_or_else(|| "default".to_string())),
            tags: proto.tags.iter().cloned().collect(),
            custom_instructions: proto.custom_instructions.clone(),
            sender_identity_key: None,
            derivation_prefix: None,
            derivation_suffix: None,
        }),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn internalize_action(
    store: &Store,
    crypto: &dyn WalletCrypto,
    root_key_hex: &str,
    user_id: UserId,
    args: InternalizeActionArgs,
) -> Result<InternalizeActionResult, AppError> {
    let bundle = Beef::from_bytes(&args.atomic_beef)?;
    beef::verify_beef(&bundle)?;

    let subject = find_subject(&bundle)?;
    let (tx_id, raw_bytes, merkle_path) = match subject {
        BeefEntry::RawTx {
            tx_id,
            raw_tx,
            merkle_path,
        } => (tx_id.clone(), raw_tx.clone(), merkle_path.clone()),
        BeefEntry::TxIdOnly(_) => {
            return Err(AppError::BeefInvalid(
                "subject transaction carries no raw bytes".to_string(),
            ))
        }
    };
    let raw = RawTx::decode(&raw_bytes)
        .map_err(|_| AppError::BeefInvalid("subject transaction bytes do not decode".to_string()))?;

    let now = Utc::now().timestamp();
    let existing = repo::get_transaction_by_tx_id(store, user_id, &tx_id)?;
    let is_merge = existing.is_some();

    let transaction_id = match &existing {
        Some(tx) => tx.id,
        None => {
            let id = store.alloc_tx_id();
            let tx = Transaction {
                id,
                user_id,
                tx_id: Some(tx_id.clone()),
                reference: repo::new_reference(),
                version: raw.version,
                lock_time: raw.lock_time,
                status: TxStatus::Completed,
                is_outgoing: false,
                description: args.description.clone(),
                satoshis: 0,
                input_beef: None,
                labels: args.labels.clone(),
                batch: None,
                is_delayed: false,
                created_at: now,
                updated_at: now,
            };
            repo::save_transaction(store, &tx)?;
            id
        }
    };

    if repo::get_known_tx(store, &tx_id)?.is_none() {
        let mut known = KnownTx {
            tx_id: tx_id.clone(),
            raw_tx: raw_bytes,
            input_beef: None,
            merkle_path: merkle_path.clone(),
            status: if merkle_path.is_some() {
                ProvenTxReqStatus::Completed
            } else {
                ProvenTxReqStatus::Unmined
            },
            attempts: 0,
            batch: None,
            notes: vec![],
        };
        known.note(format!("internalized by user {user_id}"), now);
        repo::save_known_tx(store, &known)?;
    }

    let mut credited: Satoshis = 0;
    for proto in &args.outputs {
        let outpoint = OutPoint {
            tx_id: tx_id.clone(),
            vout: proto.vout,
        };
        if repo::find_output_by_outpoint(store, user_id, &outpoint)?.is_some() {
            continue;
        }
        let raw_out = raw
            .outputs
            .get(proto.vout as usize)
            .ok_or_else(|| AppError::Validation(format!("vout {} out of range", proto.vout)))?;

        let resolved = resolve_protocol(crypto, root_key_hex, raw_out, proto)?;
        if let Some(name) = &resolved.basket_name {
            ensure_basket(store, user_id, name)?;
        }

        credited = checked_add_sat(credited, raw_out.satoshis)
            .ok_or_else(|| AppError::Validation("internalized amount exceeds supply cap".to_string()))?;

        let output_id = store.alloc_output_id();
        let output = Output {
            id: output_id,
            user_id,
            transaction_id,
            spent_by: None,
            vout: proto.vout,
            satoshis: raw_out.satoshis,
            locking_script: Some(resolved.locking_script),
            custom_instructions: resolved.custom_instructions,
            derivation_prefix: resolved.derivation_prefix,
            derivation_suffix: resolved.derivation_suffix,
            basket_name: resolved.basket_name.clone(),
            spendable: true,
            change: false,
            provided_by: ProvidedBy::Storage,
            purpose: "internalized".to_string(),
            output_type: OutputType::P2PKH,
            sender_identity_key: resolved.sender_identity_key,
            tags: resolved.tags,
        };
        repo::save_output(store, &output)?;

        if let Some(basket_name) = resolved.basket_name {
            let utxo = Utxo {
                output_id,
                user_id,
                basket_name,
                satoshis: raw_out.satoshis,
                estimated_input_size: 148,
                reserved_by_id: None,
                status: if merkle_path.is_some() {
                    UTXOStatus::Mined
                } else {
                    UTXOStatus::Unmined
                },
                created_at: now,
            };
            repo::save_utxo(store, &utxo)?;
        }
    }

    if credited > 0 {
        let mut tx = repo::get_transaction(store, transaction_id)?
            .ok_or_else(|| AppError::Internal(format!("transaction {transaction_id} vanished mid-internalize")))?;
        tx.satoshis = checked_add_sat(tx.satoshis, credited).unwrap_or(tx.satoshis);
        tx.updated_at = now;
        repo::save_transaction(store, &tx)?;
    }

    Ok(InternalizeActionResult {
        accepted: true,
        is_merge,
        tx_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_engine::types::InternalizeOutputProtocol;
    use crate::crypto::Secp256k1Crypto;
    use crate::rawtx::{RawOutput, RawTx as RawTxBuilder};

    fn root_key() -> String {
        "01".repeat(32)
    }

    #[test]
    fn basket_insertion_credits_a_fresh_incoming_transaction() {
        let store = Store::open_temporary();
        let user = repo::get_or_create_user(&store, "02abc").unwrap();
        let crypto = Secp256k1Crypto::new();

        let raw = RawTxBuilder {
            version: 1,
            inputs: vec![],
            outputs: vec![RawOutput {
                satoshis: 5_000,
                script: vec![0x76, 0xa9, 0x14, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 0x88, 0xac],
            }],
            lock_time: 0,
        };
        let raw_bytes = raw.encode();
        let tx_id = raw.tx_id();
        let beef = Beef {
            entries: vec![BeefEntry::RawTx {
                tx_id: tx_id.clone(),
                raw_tx: raw_bytes,
                merkle_path: None,
            }],
        };

        let result = internalize_action(
            &store,
            &crypto,
            &root_key(),
            user.id,
            InternalizeActionArgs {
                atomic_beef: beef.to_bytes().unwrap(),
                outputs: vec![InternalizeOutputProtocol {
                    vout: 0,
                    kind: InternalizeProtocolKind::BasketInsertion,
                    derivation_prefix: None,
                    derivation_suffix: None,
                    sender_identity_key: None,
                    basket: Some("savings".to_string()),
                    tags: vec!["deposit".to_string()],
                    custom_instructions: None,
                }],
                description: "incoming payment".to_string(),
                labels: vec![],
            },
        )
        .unwrap();

        assert!(result.accepted);
        assert!(!result.is_merge);
        assert_eq!(result.tx_id, tx_id);

        let tx = repo::get_transaction_by_tx_id(&store, user.id, &tx_id).unwrap().unwrap();
        assert_eq!(tx.satoshis, 5_000);
    }

    #[test]
    fn internalizing_a_known_tx_id_merges_instead_of_duplicating() {
        let store = Store::open_temporary();
        let user = repo::get_or_create_user(&store, "02abc").unwrap();
        let crypto = Secp256k1Crypto::new();

        let raw = RawTxBuilder {
            version: 1,
            inputs: vec![],
            outputs: vec![RawOutput {
                satoshis: 1_000,
                script: vec![0x76, 0xa9, 0x14, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 0x88, 0xac],
            }],
            lock_time: 0,
        };
        let tx_id = raw.tx_id();
        let beef = Beef {
            entries: vec![BeefEntry::RawTx {
                tx_id: tx_id.clone(),
                raw_tx: raw.encode(),
                merkle_path: None,
            }],
        };
        let args = InternalizeActionArgs {
            atomic_beef: beef.to_bytes().unwrap(),
            outputs: vec![InternalizeOutputProtocol {
                vout: 0,
                kind: InternalizeProtocolKind::BasketInsertion,
                derivation_prefix: None,
                derivation_suffix: None,
                sender_identity_key: None,
                basket: Some("default".to_string()),
                tags: vec![],
                custom_instructions: None,
            }],
            description: String::new(),
            labels: vec![],
        };

        let first = internalize_action(&store, &crypto, &root_key(), user.id, args.clone()).unwrap();
        assert!(!first.is_merge);
        let second = internalize_action(&store, &crypto, &root_key(), user.id, args).unwrap();
        assert!(second.is_merge);
    }
}
