//! Action-engine lifecycle scenarios exercised end to end through the real
//! storage layer: funding a wallet via `internalize`, spending it through
//! `create`/`sign`/`process`, aborting an unsigned spend, and merging a
//! duplicate `internalize` of the same transaction.

use gebunden::action_engine::pending_cache::PendingSignCache;
use gebunden::action_engine::types::{
    AbortActionArgs, CreateActionArgs, CreateActionOptions, CreateActionOutput, InternalizeActionArgs,
    InternalizeOutputProtocol, InternalizeProtocolKind, ListOutputsArgs, ProcessActionArgs, SignActionArgs,
    SignActionSpend,
};
use gebunden::action_engine::{abort, create, internalize, list, process, sign};
use gebunden::beef::{Beef, BeefEntry};
use gebunden::broadcaster::Broadcaster;
use gebunden::config::{CommissionConfig, DedupConfig};
use gebunden::crypto::Secp256k1Crypto;
use gebunden::rawtx::{RawOutput, RawTx};
use gebunden::services::{BroadcastOutcome, MockServices, Services};
use gebunden::storage::repo;
use gebunden::storage::Store;
use gebunden::types::{TxStatus, CHANGE_BASKET};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn root_key() -> String {
    "11".repeat(32)
}

/// Funds a fresh user with one spendable change UTXO by internalizing an
/// incoming payment straight into the change basket, the way a deposit
/// from another wallet would arrive.
fn fund_user(store: &Store, crypto: &Secp256k1Crypto, user_id: u64, satoshis: i64) -> String {
    let raw = RawTx {
        version: 1,
        inputs: vec![],
        outputs: vec![RawOutput {
            satoshis,
            script: vec![0x76, 0xa9, 0x14, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 0x88, 0xac],
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

    let result = internalize::internalize_action(
        store,
        crypto,
        &root_key(),
        user_id,
        InternalizeActionArgs {
            atomic_beef: beef.to_bytes().unwrap(),
            outputs: vec![InternalizeOutputProtocol {
                vout: 0,
                kind: InternalizeProtocolKind::BasketInsertion,
                derivation_prefix: None,
                derivation_suffix: None,
                sender_identity_key: None,
                basket: Some(CHANGE_BASKET.to_string()),
                tags: vec![],
                custom_instructions: None,
            }],
            description: "incoming funding".to_string(),
            labels: vec![],
        },
    )
    .unwrap();
    assert!(result.accepted);
    tx_id
}

#[tokio::test]
async fn roundtrip_spend_reaches_unproven_after_broadcast() {
    let store = Store::open_temporary();
    let crypto = Secp256k1Crypto::new();
    let user = repo::get_or_create_user(&store, "02aaaa").unwrap();
    fund_user(&store, &crypto, user.id, 50_000);

    let pending_cache = PendingSignCache::new(Duration::from_secs(60));
    let commission = CommissionConfig::default();

    let create_result = create::create_action(
        &store,
        &crypto,
        &pending_cache,
        &commission,
        &root_key(),
        100,
        user.id,
        CreateActionArgs {
            version: 1,
            lock_time: 0,
            description: "pay a friend".to_string(),
            labels: vec!["payment".to_string()],
            outputs: vec![CreateActionOutput {
                locking_script: vec![0x76, 0xa9, 0x14, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 0x88, 0xac],
                satoshis: 10_000,
                output_description: "to a friend".to_string(),
                basket: None,
                custom_instructions: None,
                tags: vec![],
            }],
            inputs: vec![],
            input_beef: None,
            options: CreateActionOptions::default(),
        },
    )
    .unwrap();

    assert!(!create_result.inputs.is_empty());

    let mut spends = BTreeMap::new();
    for (vin, _) in create_result.inputs.iter().enumerate() {
        spends.insert(
            vin as u32,
            SignActionSpend {
                unlocking_script: vec![0xde, 0xad, 0xbe, 0xef],
                sequence_number: None,
            },
        );
    }

    let sign_result = sign::sign_action(
        &store,
        &pending_cache,
        user.id,
        SignActionArgs {
            reference: create_result.reference.clone(),
            spends,
        },
    )
    .unwrap();
    assert_eq!(sign_result.status, TxStatus::Unprocessed);

    let services: Arc<dyn Services> = Arc::new(MockServices::new());
    let (broadcaster, broadcaster_handle) = Broadcaster::spawn(store.clone(), services.clone(), &DedupConfig::default(), 8);
    let process_result = process::process_action(
        &store,
        services.as_ref(),
        &broadcaster,
        user.id,
        ProcessActionArgs {
            reference: create_result.reference.clone(),
            send_with: vec![],
        },
    )
    .await
    .unwrap();

    assert_eq!(process_result.tx_id, sign_result.tx_id);
    assert_eq!(process_result.status, TxStatus::Unproven);

    let outputs = list::list_outputs(
        &store,
        user.id,
        ListOutputsArgs {
            basket: Some(CHANGE_BASKET.to_string()),
            tags: vec![],
            tag_query_mode_all: false,
            offset: 0,
            limit: 50,
        },
    )
    .unwrap();
    assert!(outputs.total_outputs >= 1, "change output from the spend should remain spendable");
    assert!(
        outputs.total_value > 0,
        "change output's satoshis should count as spendable once the broadcast succeeds"
    );
    broadcaster_handle.abort();
}

#[tokio::test]
async fn double_spend_outcome_fails_the_transaction_after_broadcast() {
    let store = Store::open_temporary();
    let crypto = Secp256k1Crypto::new();
    let user = repo::get_or_create_user(&store, "02bbbb").unwrap();
    fund_user(&store, &crypto, user.id, 20_000);

    let pending_cache = PendingSignCache::new(Duration::from_secs(60));
    let commission = CommissionConfig::default();

    let create_result = create::create_action(
        &store,
        &crypto,
        &pending_cache,
        &commission,
        &root_key(),
        100,
        user.id,
        CreateActionArgs {
            version: 1,
            lock_time: 0,
            description: String::new(),
            labels: vec![],
            outputs: vec![CreateActionOutput {
                locking_script: vec![0x76, 0xa9, 0x14, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 0x88, 0xac],
                satoshis: 5_000,
                output_description: String::new(),
                basket: None,
                custom_instructions: None,
                tags: vec![],
            }],
            inputs: vec![],
            input_beef: None,
            options: CreateActionOptions::default(),
        },
    )
    .unwrap();

    let mut spends = BTreeMap::new();
    for (vin, _) in create_result.inputs.iter().enumerate() {
        spends.insert(
            vin as u32,
            SignActionSpend {
                unlocking_script: vec![0x01],
                sequence_number: None,
            },
        );
    }
    let sign_result = sign::sign_action(
        &store,
        &pending_cache,
        user.id,
        SignActionArgs {
            reference: create_result.reference.clone(),
            spends,
        },
    )
    .unwrap();

    let mock = MockServices::new();
    mock.set_outcome(sign_result.tx_id.clone(), BroadcastOutcome::DoubleSpend);
    let services: Arc<dyn Services> = Arc::new(mock);
    let (broadcaster, broadcaster_handle) = Broadcaster::spawn(store.clone(), services.clone(), &DedupConfig::default(), 8);

    let process_result = process::process_action(
        &store,
        services.as_ref(),
        &broadcaster,
        user.id,
        ProcessActionArgs {
            reference: create_result.reference.clone(),
            send_with: vec![],
        },
    )
    .await
    .unwrap();

    assert_eq!(process_result.status, TxStatus::Failed);
    broadcaster_handle.abort();
}

#[test]
fn aborting_an_unsigned_action_releases_its_reservation() {
    let store = Store::open_temporary();
    let crypto = Secp256k1Crypto::new();
    let user = repo::get_or_create_user(&store, "02cccc").unwrap();
    fund_user(&store, &crypto, user.id, 30_000);

    let pending_cache = PendingSignCache::new(Duration::from_secs(60));
    let commission = CommissionConfig::default();

    let create_result = create::create_action(
        &store,
        &crypto,
        &pending_cache,
        &commission,
        &root_key(),
        100,
        user.id,
        CreateActionArgs {
            version: 1,
            lock_time: 0,
            description: String::new(),
            labels: vec![],
            outputs: vec![CreateActionOutput {
                locking_script: vec![0x76, 0xa9, 0x14, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 0x88, 0xac],
                satoshis: 7_000,
                output_description: String::new(),
                basket: None,
                custom_instructions: None,
                tags: vec![],
            }],
            inputs: vec![],
            input_beef: None,
            options: CreateActionOptions::default(),
        },
    )
    .unwrap();

    abort::abort_action(
        &store,
        user.id,
        AbortActionArgs {
            reference: create_result.reference.clone(),
        },
    )
    .unwrap();

    let outputs = list::list_outputs(
        &store,
        user.id,
        ListOutputsArgs {
            basket: Some(CHANGE_BASKET.to_string()),
            tags: vec![],
            tag_query_mode_all: false,
            offset: 0,
            limit: 50,
        },
    )
    .unwrap();
    assert_eq!(outputs.total_value, 30_000, "aborting should restore the original funding amount untouched");
}

#[test]
fn internalizing_the_same_payment_twice_merges_instead_of_double_crediting() {
    let store = Store::open_temporary();
    let crypto = Secp256k1Crypto::new();
    let user = repo::get_or_create_user(&store, "02dddd").unwrap();

    let raw = RawTx {
        version: 1,
        inputs: vec![],
        outputs: vec![RawOutput {
            satoshis: 4_000,
            script: vec![0x76, 0xa9, 0x14, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 0x88, 0xac],
        }],
        lock_time: 0,
    };
    let beef = Beef {
        entries: vec![BeefEntry::RawTx {
            tx_id: raw.tx_id(),
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
            basket: Some("savings".to_string()),
            tags: vec![],
            custom_instructions: None,
        }],
        description: String::new(),
        labels: vec![],
    };

    let first = internalize::internalize_action(&store, &crypto, &root_key(), user.id, args.clone()).unwrap();
    let second = internalize::internalize_action(&store, &crypto, &root_key(), user.id, args).unwrap();

    assert!(!first.is_merge);
    assert!(second.is_merge);
    assert_eq!(first.tx_id, second.tx_id);

    let outputs = list::list_outputs(
        &store,
        user.id,
        ListOutputsArgs {
            basket: Some("savings".to_string()),
            tags: vec![],
            tag_query_mode_all: false,
            offset: 0,
            limit: 50,
        },
    )
    .unwrap();
    assert_eq!(outputs.total_outputs, 1, "re-internalizing the same tx must not create a duplicate output");
    assert_eq!(outputs.total_value, 4_000);
}
