//! `create` (§4.2): assembles an unsigned transaction — funding it from the
//! change basket, distributing change, and handing back everything the
//! caller needs to produce unlocking scripts and call `sign`.

use std::collections::{BTreeSet, HashSet};

use rand::seq::SliceRandom;

use crate::action_engine::pending_cache::{PendingSignAction, PendingSignCache, PendingVin, PendingVout};
use crate::action_engine::types::{CreateActionArgs, CreateActionResult, ResultInputDescriptor, ResultOutputDescriptor};
use crate::beef::{self, Beef};
use crate::config::CommissionConfig;
use crate::constants::{P2PKH_UNLOCKING_SCRIPT_ESTIMATE, TX_BASE_SIZE_ESTIMATE};
use crate::crypto::WalletCrypto;
use crate::error::AppError;
use crate::funder;
use crate::storage::repo;
use crate::storage::Store;
use crate::types::{
    Commission, OutPoint, Output, OutputType, ProvidedBy, Satoshis, Transaction, TxStatus, UserId, CHANGE_BASKET,
};

struct ClassifiedInput {
    outpoint: OutPoint,
    unlocking_script_length: u32,
    sequence_number: Option<u32>,
    output_id: Option<u64>,
    satoshis: Option<Satoshis>,
    locking_script: Option<Vec<u8>>,
    derivation_prefix: Option<String>,
    derivation_suffix: Option<String>,
    sender_identity_key: Option<String>,
    provided_by: ProvidedBy,
}

fn varint_len(n: usize) -> u32 {
    if n < 0xfd {
        1
    } else if n <= 0xffff {
        3
    } else {
        5
    }
}

/// Resolves a caller-supplied input against our own storage first, then
/// against the supplied input BEEF, per §4.2 step 4's "from-args-and-known"
/// vs "from-args-and-unknown" classification.
fn classify_input(
    store: &Store,
    user_id: UserId,
    caller_beef: &Beef,
    input: &crate::action_engine::types::CreateActionInput,
) -> Result<ClassifiedInput, AppError> {
    if let Some(out) = repo::find_output_by_outpoint(store, user_id, &input.outpoint)? {
        if out.spendable {
            return Ok(ClassifiedInput {
                outpoint: input.outpoint.clone(),
                unlocking_script_length: input.unlocking_script_length,
                sequence_number: input.sequence_number,
                output_id: Some(out.id),
                satoshis: Some(out.satoshis),
                locking_script: out.locking_script.clone(),
                derivation_prefix: out.derivation_prefix.clone(),
                derivation_suffix: out.derivation_suffix.clone(),
                sender_identity_key: out.sender_identity_key.clone(),
                provided_by: ProvidedBy::YouAndStorage,
            });
        }
    }

    for entry in &caller_beef.entries {
        if let beef::BeefEntry::RawTx { tx_id, raw_tx, .. } = entry {
            if *tx_id == input.outpoint.tx_id {
                if let Ok(parsed) = crate::rawtx::RawTx::decode(raw_tx) {
                    if let Some(vout) = parsed.outputs.get(input.outpoint.vout as usize) {
                        return Ok(ClassifiedInput {
                            outpoint: input.outpoint.clone(),
                            unlocking_script_length: input.unlocking_script_length,
                            sequence_number: input.sequence_number,
                            output_id: None,
                            satoshis: Some(vout.satoshis),
                            locking_script: Some(vout.script.clone()),
                            derivation_prefix: None,
                            derivation_suffix: None,
                            sender_identity_key: None,
                            provided_by: ProvidedBy::You,
                        });
                    }
                }
            }
        }
    }

    Ok(ClassifiedInput {
        outpoint: input.outpoint.clone(),
        unlocking_script_length: input.unlocking_script_length,
        sequence_number: input.sequence_number,
        output_id: None,
        satoshis: None,
        locking_script: None,
        derivation_prefix: None,
        derivation_suffix: None,
        sender_identity_key: None,
        provided_by: ProvidedBy::You,
    })
}

#[allow(clippy::too_many_arguments)]
pub fn create_action(
    store: &Store,
    crypto: &dyn WalletCrypto,
    pending_cache: &PendingSignCache,
    commission: &CommissionConfig,
    root_key_hex: &str,
    sat_per_kb: u64,
    user_id: UserId,
    args: CreateActionArgs,
) -> Result<CreateActionResult, AppError> {
    // 1. Reference: caller-supplied or freshly generated, unique per user.
    let reference = match &args.options.reference {
        Some(r) => {
            if !repo::reference_is_unique(store, user_id, r)? {
                return Err(AppError::Validation(format!("reference '{r}' already in use")));
            }
            r.clone()
        }
        None => loop {
            let candidate = repo::new_reference();
            if repo::reference_is_unique(store, user_id, &candidate)? {
                break candidate;
            }
        },
    };

    // 2. Change basket.
    let basket = repo::get_basket(store, user_id, CHANGE_BASKET)?
        .ok_or_else(|| AppError::NotFound("change basket".to_string()))?;

    // 3. noSendChange: resolve named outpoints to owned, spendable change
    // outputs; they become priority inputs for the funder.
    let mut priority_outpoints = Vec::new();
    if args.options.no_send && !args.options.no_send_change.is_empty() {
        for outpoint in &args.options.no_send_change {
            let out = repo::find_output_by_outpoint(store, user_id, outpoint)?
                .ok_or_else(|| AppError::Validation(format!("noSendChange outpoint {outpoint} not found")))?;
            if !out.spendable || !out.change {
                return Err(AppError::Validation(format!(
                    "noSendChange outpoint {outpoint} is not a spendable change output"
                )));
            }
            priority_outpoints.push(out.id);
        }
    }

    // 4. Classify caller-supplied inputs against storage, then the input BEEF.
    let caller_beef = match &args.input_beef {
        Some(bytes) => Beef::from_bytes(bytes)?,
        None => Beef::default(),
    };
    let classified: Vec<ClassifiedInput> = args
        .inputs
        .iter()
        .map(|input| classify_input(store, user_id, &caller_beef, input))
        .collect::<Result<_, _>>()?;

    // 5. Commission output, if configured.
    let commission_output = if commission.enabled && commission.satoshis > 0 {
        let key_offset = repo::new_derivation_component();
        let pubkey = crypto.derive_public_key_for_counterparty(root_key_hex, &commission.public_key_hex, &key_offset)?;
        let locking_script = crypto.p2pkh_locking_script(&pubkey)?;
        Some((locking_script, commission.satoshis as Satoshis, key_offset))
    } else {
        None
    };

    // 6. Target satoshis and an initial size estimate.
    let outputs_sum: Satoshis = args.outputs.iter().map(|o| o.satoshis).sum();
    let commission_sum: Satoshis = commission_output.as_ref().map(|(_, sat, _)| *sat).unwrap_or(0);
    let provided_sum: Satoshis = classified.iter().filter_map(|c| c.satoshis).sum();
    let target_satoshis = (outputs_sum + commission_sum - provided_sum).max(0);

    let mut initial_tx_size = TX_BASE_SIZE_ESTIMATE;
    for input in &args.inputs {
        initial_tx_size += 36 + 4 + input.unlocking_script_length;
    }
    for output in &args.outputs {
        initial_tx_size += 8 + varint_len(output.locking_script.len()) + output.locking_script.len() as u32;
    }
    if let Some((script, ..)) = &commission_output {
        initial_tx_size += 8 + varint_len(script.len()) + script.len() as u32;
    }

    // 7. Fund: select and reserve UTXOs covering the target.
    let plan = funder::fund(
        store,
        user_id,
        target_satoshis,
        &basket,
        &BTreeSet::new(),
        &priority_outpoints,
        false,
        sat_per_kb,
        initial_tx_size,
    )?;

    // 9. Derivation prefix/suffixes.
    let derivation_prefix = repo::new_derivation_component();

    // 10. Materialize caller + commission + change outputs, then optionally
    // Fisher-Yates shuffle before assigning final vout indices.
    struct Materialized {
        output: Output,
        output_description: String,
    }

    let transaction_id = store.alloc_tx_id();
    let mut materialized: Vec<Materialized> = Vec::new();

    for out in &args.outputs {
        materialized.push(Materialized {
            output: Output {
                id: store.alloc_output_id(),
                user_id,
                transaction_id,
                spent_by: None,
                vout: 0,
                satoshis: out.satoshis,
                locking_script: Some(out.locking_script.clone()),
                custom_instructions: out.custom_instructions.clone(),
                derivation_prefix: None,
                derivation_suffix: None,
                basket_name: out.basket.clone(),
                spendable: false,
                change: false,
                provided_by: ProvidedBy::You,
                purpose: out.output_description.clone(),
                output_type: OutputType::Custom,
                sender_identity_key: None,
                tags: out.tags.iter().cloned().collect(),
            },
            output_description: out.output_description.clone(),
        });
    }

    let mut commission_output_id = None;
    if let Some((locking_script, satoshis, key_offset)) = &commission_output {
        let id = store.alloc_output_id();
        commission_output_id = Some(id);
        materialized.push(Materialized {
            output: Output {
                id,
                user_id,
                transaction_id,
                spent_by: None,
                vout: 0,
                satoshis: *satoshis,
                locking_script: Some(locking_script.clone()),
                custom_instructions: None,
                derivation_prefix: None,
                derivation_suffix: Some(key_offset.clone()),
                basket_name: None,
                spendable: false,
                change: false,
                provided_by: ProvidedBy::Storage,
                purpose: "commission".to_string(),
                output_type: OutputType::P2PKH,
                sender_identity_key: None,
                tags: BTreeSet::new(),
            },
            output_description: "commission".to_string(),
        });
    }

    let mut no_send_change_output_ids: Vec<u64> = Vec::new();
    for amount in &plan.change_amounts {
        let derivation_suffix = repo::new_derivation_component();
        let pubkey = crypto.derive_public_key(root_key_hex, &derivation_prefix, &derivation_suffix, None)?;
        let locking_script = crypto.p2pkh_locking_script(&pubkey)?;
        let id = store.alloc_output_id();
        if args.options.no_send {
            no_send_change_output_ids.push(id);
        }
        materialized.push(Materialized {
            output: Output {
                id,
                user_id,
                transaction_id,
                spent_by: None,
                vout: 0,
                satoshis: *amount,
                locking_script: Some(locking_script),
                custom_instructions: None,
                derivation_prefix: Some(derivation_prefix.clone()),
                derivation_suffix: Some(derivation_suffix),
                basket_name: Some(CHANGE_BASKET.to_string()),
                spendable: false,
                change: true,
                provided_by: ProvidedBy::Storage,
                purpose: "change".to_string(),
                output_type: OutputType::P2PKH,
                sender_identity_key: None,
                tags: BTreeSet::new(),
            },
            output_description: String::new(),
        });
    }

    if args.options.randomize_outputs {
        materialized.shuffle(&mut rand::thread_rng());
    }

    for (vout, m) in materialized.iter_mut().enumerate() {
        m.output.vout = vout as u32;
    }
    let commission_vout = commission_output_id
        .and_then(|id| materialized.iter().find(|m| m.output.id == id))
        .map(|m| m.output.vout);
    let no_send_change_output_vouts: Vec<u32> = materialized
        .iter()
        .filter(|m| no_send_change_output_ids.contains(&m.output.id))
        .map(|m| m.output.vout)
        .collect();

    // 11. Write the transaction row, reservation, outputs, and commission.
    let now = chrono::Utc::now().timestamp();
    let transaction = Transaction {
        id: transaction_id,
        user_id,
        tx_id: None,
        reference: reference.clone(),
        version: args.version,
        lock_time: args.lock_time,
        status: TxStatus::Unsigned,
        is_outgoing: true,
        description: args.description.clone(),
        satoshis: outputs_sum,
        input_beef: args.input_beef.clone(),
        labels: args.labels.clone(),
        batch: None,
        is_delayed: args.options.is_delayed,
        created_at: now,
        updated_at: now,
    };
    // Reserve before persisting the transaction row: if the reservation
    // commit fails (e.g. a concurrent `createAction` already claimed one of
    // these UTXOs), nothing has been written yet and there is no orphaned
    // `Unsigned` transaction left behind to clean up.
    repo::commit_reservation(store, &plan.reservation.allocated, transaction_id)?;
    repo::save_transaction(store, &transaction)?;

    for m in &materialized {
        repo::save_output(store, &m.output)?;
    }
    if let (Some((_, satoshis, key_offset)), Some(vout)) = (&commission_output, commission_vout) {
        let locking_script = materialized[vout as usize].output.locking_script.clone().unwrap_or_default();
        repo::save_commission(
            store,
            &Commission {
                user_id,
                transaction_id,
                satoshis: *satoshis,
                key_offset: key_offset.clone(),
                locking_script,
                is_redeemed: false,
            },
        )?;
    }

    // 12. Build input descriptors: caller-supplied first, then funder-selected.
    let mut result_inputs = Vec::with_capacity(classified.len() + plan.reservation.allocated.len());
    let mut pending_vins = Vec::with_capacity(result_inputs.capacity());
    for c in &classified {
        let known = c.locking_script.is_some();
        result_inputs.push(ResultInputDescriptor {
            outpoint: c.outpoint.clone(),
            provided_by: c.provided_by,
            source_satoshis: c.satoshis,
            locking_script_hex: c.locking_script.as_ref().map(hex::encode),
            estimated_unlocking_script_length: if known {
                P2PKH_UNLOCKING_SCRIPT_ESTIMATE
            } else {
                c.unlocking_script_length
            },
            derivation_prefix: c.derivation_prefix.clone(),
            derivation_suffix: c.derivation_suffix.clone(),
            sender_identity_key: c.sender_identity_key.clone(),
        });
        pending_vins.push(match (&c.locking_script, c.satoshis) {
            (Some(script), Some(satoshis)) => PendingVin::Known {
                outpoint: c.outpoint.clone(),
                output_id: c.output_id,
                locking_script: script.clone(),
                satoshis,
            },
            _ => PendingVin::Unknown {
                outpoint: c.outpoint.clone(),
            },
        });
    }

    let mut allocated_tx_ids: HashSet<crate::types::TxId> = HashSet::new();
    for utxo in &plan.reservation.allocated {
        let out = repo::get_output(store, utxo.output_id)?
            .ok_or_else(|| AppError::Internal(format!("allocated utxo {} has no output row", utxo.output_id)))?;
        let owning_tx = repo::get_transaction(store, out.transaction_id)?
            .ok_or_else(|| AppError::Internal(format!("output {} has no owning transaction", out.id)))?;
        let tx_id = owning_tx
            .tx_id
            .clone()
            .ok_or_else(|| AppError::Internal(format!("allocated output {} has no confirmed tx_id", out.id)))?;
        allocated_tx_ids.insert(tx_id.clone());
        result_inputs.push(ResultInputDescriptor {
            outpoint: OutPoint {
                tx_id: tx_id.clone(),
                vout: out.vout,
            },
            provided_by: ProvidedBy::Storage,
            source_satoshis: Some(out.satoshis),
            locking_script_hex: out.locking_script.as_ref().map(hex::encode),
            estimated_unlocking_script_length: P2PKH_UNLOCKING_SCRIPT_ESTIMATE,
            derivation_prefix: out.derivation_prefix.clone(),
            derivation_suffix: out.derivation_suffix.clone(),
            sender_identity_key: out.sender_identity_key.clone(),
        });
        pending_vins.push(PendingVin::Known {
            outpoint: OutPoint {
                tx_id,
                vout: out.vout,
            },
            output_id: Some(out.id),
            locking_script: out.locking_script.clone().unwrap_or_default(),
            satoshis: out.satoshis,
        });
    }

    // 13. Assemble the result BEEF: caller's input BEEF merged with a fresh
    // BEEF for every funder-selected and storage-known source transaction,
    // pruning anything the caller already has.
    let mut merged_beef = caller_beef.clone();
    for tx_id in &allocated_tx_ids {
        merged_beef.merge(beef::build_beef(store, tx_id)?);
    }
    for c in &classified {
        if c.provided_by == ProvidedBy::YouAndStorage {
            merged_beef.merge(beef::build_beef(store, &c.outpoint.tx_id)?);
        }
    }
    let known_tx_ids: HashSet<crate::types::TxId> = args.options.known_tx_ids.iter().cloned().collect();
    merged_beef.prune_known(&known_tx_ids);
    beef::verify_beef(&merged_beef)?;
    let input_beef_bytes = merged_beef.to_bytes()?;

    let result_outputs: Vec<ResultOutputDescriptor> = materialized
        .iter()
        .map(|m| ResultOutputDescriptor {
            vout: m.output.vout,
            satoshis: m.output.satoshis,
            output_description: m.output_description.clone(),
            basket: m.output.basket_name.clone(),
        })
        .collect();

    pending_cache.insert(
        reference.clone(),
        PendingSignAction {
            user_id,
            transaction_id,
            version: args.version,
            lock_time: args.lock_time,
            vins: pending_vins,
            vouts: materialized
                .iter()
                .map(|m| PendingVout {
                    locking_script: m.output.locking_script.clone().unwrap_or_default(),
                    satoshis: m.output.satoshis,
                    verify_locking_script: !m.output.change,
                })
                .collect(),
            is_no_send: args.options.no_send,
            is_delayed: args.options.is_delayed,
            commission_vout,
        },
    );

    Ok(CreateActionResult {
        reference,
        version: args.version,
        lock_time: args.lock_time,
        derivation_prefix,
        outputs: result_outputs,
        inputs: result_inputs,
        input_beef: input_beef_bytes,
        no_send_change_output_vouts,
    })
}
