//! Benchmarks for the hot paths of the action engine: change distribution,
//! UTXO reservation selection, and broadcast deduplication.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gebunden::config::DedupConfig;
use gebunden::dedup::DedupMap;
use gebunden::funder::distribute_change;
use gebunden::storage::repo;
use gebunden::storage::Store;
use gebunden::types::{Output, OutputType, ProvidedBy, Utxo, UTXOStatus, CHANGE_BASKET};
use std::collections::BTreeSet;

fn bench_distribute_change(c: &mut Criterion) {
    c.bench_function("distribute_change_32_outputs", |b| {
        b.iter(|| distribute_change(black_box(1_000_000), black_box(32), black_box(500)).unwrap())
    });
}

fn seeded_store_with_utxos(count: usize) -> (std::sync::Arc<Store>, u64) {
    let store = Store::open_temporary();
    let user = repo::get_or_create_user(&store, "02benchuser").unwrap();
    let tx_id = store.alloc_tx_id();
    for i in 0..count {
        let output_id = store.alloc_output_id();
        repo::save_output(
            &store,
            &Output {
                id: output_id,
                user_id: user.id,
                transaction_id: tx_id,
                spent_by: None,
                vout: i as u32,
                satoshis: 1_000 + i as i64,
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
            },
        )
        .unwrap();
        repo::save_utxo(
            &store,
            &Utxo {
                output_id,
                user_id: user.id,
                basket_name: CHANGE_BASKET.to_string(),
                satoshis: 1_000 + i as i64,
                estimated_input_size: 148,
                reserved_by_id: None,
                status: UTXOStatus::Mined,
                created_at: 0,
            },
        )
        .unwrap();
    }
    (store, user.id)
}

fn bench_reserve_utxos(c: &mut Criterion) {
    let (store, user_id) = seeded_store_with_utxos(500);
    let basket = repo::get_basket(&store, user_id, CHANGE_BASKET).unwrap().unwrap();

    c.bench_function("reserve_utxos_over_500_candidates", |b| {
        b.iter(|| {
            repo::reserve_utxos(
                &store,
                user_id,
                black_box(50_000),
                &basket,
                &BTreeSet::new(),
                &[],
                false,
                100,
                10,
            )
            .unwrap()
        })
    });
}

fn bench_dedup_check_and_insert(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let config = DedupConfig {
        window_secs: 60,
        bucket_secs: 1,
    };
    let dedup = DedupMap::new(&config);

    c.bench_function("dedup_check_and_insert_new_item", |b| {
        let mut counter: u64 = 0;
        b.iter(|| {
            counter += 1;
            let item = counter.to_be_bytes();
            runtime.block_on(dedup.check_and_insert(black_box(&item)))
        })
    });
}

criterion_group!(benches, bench_distribute_change, bench_reserve_utxos, bench_dedup_check_and_insert);
criterion_main!(benches);
