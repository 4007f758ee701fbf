//! Storage repository: explicit write operations and read queries for the
//! action engine (§4.1). State-changing operations run inline on the
//! calling task against `sled`'s in-memory page cache (see
//! `storage::mod`'s module doc for why that doesn't need
//! `spawn_blocking` here); multi-step operations are sequences of ordered
//! tree writes rather than a single `sled::Transactional` call, since this
//! daemon has exactly one writer.

use std::collections::BTreeSet;

use chrono::Utc;
use rand::RngCore;

use crate::error::{AppError, StorageError};
use crate::storage::spec::Spec;
use crate::storage::{decode, encode, key_u64, Store};
use crate::types::*;

fn now() -> i64 {
    Utc::now().timestamp()
}

fn random_base64(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &bytes)
}

pub fn new_reference() -> String {
    random_base64(12)
}

pub fn new_derivation_component() -> String {
    random_base64(16)
}

pub fn new_batch_tag() -> String {
    random_base64(16)
}

// ---------------------------------------------------------------------
// Users & baskets
// ---------------------------------------------------------------------

pub fn get_or_create_user(store: &Store, identity_key: &str) -> Result<User, AppError> {
    for kv in store.users.iter() {
        let (_, v) = kv.map_err(StorageError::from)?;
        let user: User = decode(&v)?;
        if user.identity_key == identity_key {
            return Ok(user);
        }
    }
    let id = store.alloc_user_id();
    let user = User {
        id,
        identity_key: identity_key.to_string(),
        active_storage_id: "default".to_string(),
        created_at: now(),
        updated_at: now(),
    };
    store
        .users
        .insert(key_u64(id), encode(&user)?)
        .map_err(StorageError::from)?;

    let change = OutputBasket {
        user_id: id,
        name: CHANGE_BASKET.to_string(),
        number_of_desired_utxos: 32,
        minimum_desired_utxo_value: 500,
    };
    save_basket(store, &change)?;
    Ok(user)
}

fn basket_key(user_id: UserId, name: &str) -> Vec<u8> {
    let mut k = user_id.to_be_bytes().to_vec();
    k.extend_from_slice(name.as_bytes());
    k
}

pub fn save_basket(store: &Store, basket: &OutputBasket) -> Result<(), AppError> {
    store
        .baskets
        .insert(basket_key(basket.user_id, &basket.name), encode(basket)?)
        .map_err(StorageError::from)?;
    Ok(())
}

pub fn get_basket(store: &Store, user_id: UserId, name: &str) -> Result<Option<OutputBasket>, AppError> {
    match store
        .baskets
        .get(basket_key(user_id, name))
        .map_err(StorageError::from)?
    {
        Some(bytes) => Ok(Some(decode(&bytes)?)),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------

pub fn save_transaction(store: &Store, tx: &Transaction) -> Result<(), AppError> {
    store
        .transactions
        .insert(key_u64(tx.id), encode(tx)?)
        .map_err(StorageError::from)?;
    Ok(())
}

pub fn get_transaction(store: &Store, id: TransactionId) -> Result<Option<Transaction>, AppError> {
    match store.transactions.get(key_u64(id)).map_err(StorageError::from)? {
        Some(b) => Ok(Some(decode(&b)?)),
        None => Ok(None),
    }
}

pub fn get_transaction_by_reference(
    store: &Store,
    user_id: UserId,
    reference: &str,
) -> Result<Option<Transaction>, AppError> {
    for kv in store.transactions.iter() {
        let (_, v) = kv.map_err(StorageError::from)?;
        let tx: Transaction = decode(&v)?;
        if tx.user_id == user_id && tx.reference == reference {
            return Ok(Some(tx));
        }
    }
    Ok(None)
}

pub fn reference_is_unique(store: &Store, user_id: UserId, reference: &str) -> Result<bool, AppError> {
    Ok(get_transaction_by_reference(store, user_id, reference)?.is_none())
}

pub fn get_transaction_by_tx_id(
    store: &Store,
    user_id: UserId,
    tx_id: &str,
) -> Result<Option<Transaction>, AppError> {
    for kv in store.transactions.iter() {
        let (_, v) = kv.map_err(StorageError::from)?;
        let tx: Transaction = decode(&v)?;
        if tx.user_id == user_id && tx.tx_id.as_deref() == Some(tx_id) {
            return Ok(Some(tx));
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------
// Outputs & UTXOs
// ---------------------------------------------------------------------

pub fn save_output(store: &Store, output: &Output) -> Result<(), AppError> {
    output.assert_invariants();
    store
        .outputs
        .insert(key_u64(output.id), encode(output)?)
        .map_err(StorageError::from)?;
    Ok(())
}

pub fn get_output(store: &Store, id: OutputId) -> Result<Option<Output>, AppError> {
    match store.outputs.get(key_u64(id)).map_err(StorageError::from)? {
        Some(b) => Ok(Some(decode(&b)?)),
        None => Ok(None),
    }
}

pub fn all_outputs(store: &Store) -> Result<Vec<Output>, AppError> {
    let mut out = Vec::new();
    for kv in store.outputs.iter() {
        let (_, v) = kv.map_err(StorageError::from)?;
        out.push(decode(&v)?);
    }
    Ok(out)
}

/// Resolves an outpoint (external txid + vout) to an owned `Output` row.
/// Used by `create`'s caller-input classification and `noSendChange`
/// resolution (§4.2 steps 3-4) — there is no txid index on Output
/// directly, so this joins through the owning Transaction.
pub fn find_output_by_outpoint(
    store: &Store,
    user_id: UserId,
    outpoint: &crate::types::OutPoint,
) -> Result<Option<Output>, AppError> {
    let Some(tx) = get_transaction_by_tx_id(store, user_id, &outpoint.tx_id)? else {
        return Ok(None);
    };
    for out in all_outputs(store)? {
        if out.transaction_id == tx.id && out.vout == outpoint.vout {
            return Ok(Some(out));
        }
    }
    Ok(None)
}

/// `relinquishOutput` (§4.7): the wallet simply stops tracking an output
/// it still owns (no spend, no status change upstream) — drops the UTXO
/// row so it is no longer selectable for funding, and marks the output
/// non-spendable so it no longer appears in `listOutputs`.
pub fn relinquish_output(store: &Store, user_id: UserId, output_id: OutputId) -> Result<(), AppError> {
    let mut output = get_output(store, output_id)?
        .filter(|o| o.user_id == user_id)
        .ok_or_else(|| AppError::NotFound(format!("output {output_id}")))?;
    output.spendable = false;
    save_output(store, &output)?;
    store.utxos.remove(key_u64(output_id)).map_err(StorageError::from)?;
    Ok(())
}

pub fn save_utxo(store: &Store, utxo: &Utxo) -> Result<(), AppError> {
    store
        .utxos
        .insert(key_u64(utxo.output_id), encode(utxo)?)
        .map_err(StorageError::from)?;
    Ok(())
}

pub fn get_utxo(store: &Store, output_id: OutputId) -> Result<Option<Utxo>, AppError> {
    match store.utxos.get(key_u64(output_id)).map_err(StorageError::from)? {
        Some(b) => Ok(Some(decode(&b)?)),
        None => Ok(None),
    }
}

fn all_utxos(store: &Store) -> Result<Vec<Utxo>, AppError> {
    let mut out = Vec::new();
    for kv in store.utxos.iter() {
        let (_, v) = kv.map_err(StorageError::from)?;
        out.push(decode(&v)?);
    }
    Ok(out)
}

/// §4.1/§4.4 `reserveUTXOs`: select inputs to cover `target_sat + fee`,
/// reserving atomically. `priority_outpoints` (by output id) are taken
/// first, in the order given.
pub struct ReservationResult {
    pub allocated: Vec<Utxo>,
    pub change_amount: Satoshis,
    pub change_outputs_count: u32,
    pub fee: Satoshis,
}

pub fn reserve_utxos(
    store: &Store,
    user_id: UserId,
    target_sat: Satoshis,
    basket: &OutputBasket,
    already_reserved: &BTreeSet<OutputId>,
    priority_outpoints: &[OutputId],
    include_sending: bool,
    sat_per_kb: u64,
    base_tx_size: u32,
) -> Result<ReservationResult, AppError> {
    // Selection happens over a plain snapshot read; `commit_reservation`
    // re-checks each output's `reservedById` at write time, so a race
    // between two concurrent fundings is caught there rather than here.
    let mut candidates: Vec<Utxo> = Vec::new();
    for id in priority_outpoints {
        if let Some(u) = get_utxo(store, *id)? {
            if u.reserved_by_id.is_none() && u.user_id == user_id {
                candidates.push(u);
            }
        }
    }
    let mut rest: Vec<Utxo> = all_utxos(store)?
        .into_iter()
        .filter(|u| {
            u.user_id == user_id
                && u.basket_name == basket.name
                && u.reserved_by_id.is_none()
                && !already_reserved.contains(&u.output_id)
                && !priority_outpoints.contains(&u.output_id)
                && (u.status == UTXOStatus::Mined || (include_sending && u.status == UTXOStatus::Sending))
        })
        .collect();
    rest.sort_by_key(|u| std::cmp::Reverse(u.satoshis));
    candidates.extend(rest);

    let mut selected: Vec<Utxo> = Vec::new();
    let mut selected_sum: Satoshis = 0;
    let mut size = base_tx_size;
    let change_count = basket.number_of_desired_utxos.max(1).min(10);
    let mut fee = fee_for_size(size, change_count, sat_per_kb);

    for u in candidates {
        selected_sum += u.satoshis;
        size += u.estimated_input_size;
        selected.push(u);
        fee = fee_for_size(size, change_count, sat_per_kb);
        if selected_sum >= target_sat + fee {
            break;
        }
    }
    if selected_sum < target_sat + fee {
        return Err(AppError::Reservation(
            "no UTXO selection covers the target".to_string(),
        ));
    }

    let change_amount = selected_sum - target_sat - fee;
    let change_outputs_count = if change_amount <= 0 {
        0
    } else {
        let m = basket.minimum_desired_utxo_value.max(1);
        let max_by_value = (change_amount / m).max(1) as u32;
        change_count.min(max_by_value)
    };

    Ok(ReservationResult {
        allocated: selected,
        change_amount,
        change_outputs_count,
        fee,
    })
}

fn fee_for_size(size: u32, change_outputs: u32, sat_per_kb: u64) -> Satoshis {
    let total_size = size as u64 + (change_outputs as u64 * 34); // ~34 bytes per P2PKH output
    let fee = (total_size * sat_per_kb) / 1000;
    fee.max(1) as Satoshis
}

/// Marks the given UTXOs reserved by `transaction_id`; no-op (idempotent)
/// if already reserved by that same transaction.
pub fn commit_reservation(
    store: &Store,
    utxos: &[Utxo],
    transaction_id: TransactionId,
) -> Result<(), AppError> {
    for u in utxos {
        let mut u = get_utxo(store, u.output_id)?.unwrap_or_else(|| u.clone());
        if u.reserved_by_id == Some(transaction_id) {
            continue;
        }
        if u.reserved_by_id.is_some() {
            return Err(AppError::Reservation(format!(
                "output {} already reserved",
                u.output_id
            )));
        }
        u.reserved_by_id = Some(transaction_id);
        save_utxo(store, &u)?;
    }
    Ok(())
}

/// §4.1 `spendTransaction`: moves an `unsigned`/`unprocessed` transaction
/// to `updated_tx.status`, upserts the KnownTx with signed raw bytes,
/// flips reserved outputs to spent/non-spendable, clears `inputBEEF`, and
/// appends the history note.
pub fn spend_transaction(
    store: &Store,
    mut updated_tx: Transaction,
    raw_tx: Vec<u8>,
    note: &str,
) -> Result<Transaction, AppError> {
    let current = get_transaction(store, updated_tx.id)?
        .ok_or_else(|| AppError::NotFound(format!("transaction {}", updated_tx.id)))?;
    if !matches!(current.status, TxStatus::Unsigned | TxStatus::Unprocessed) {
        return Err(AppError::Validation(format!(
            "cannot spend transaction in status {:?}",
            current.status
        )));
    }

    updated_tx.input_beef = None;
    updated_tx.updated_at = now();
    save_transaction(store, &updated_tx)?;

    if let Some(tx_id) = &updated_tx.tx_id {
        let mut known = get_known_tx(store, tx_id)?.unwrap_or_else(|| KnownTx {
            tx_id: tx_id.clone(),
            raw_tx: raw_tx.clone(),
            input_beef: None,
            merkle_path: None,
            status: ProvenTxReqStatus::Unprocessed,
            attempts: 0,
            batch: None,
            notes: Vec::new(),
        });
        known.raw_tx = raw_tx;
        known.note(note, now());
        save_known_tx(store, &known)?;
    }

    for kv in store.utxos.iter() {
        let (_, v) = kv.map_err(StorageError::from)?;
        let u: Utxo = decode(&v)?;
        if u.reserved_by_id == Some(updated_tx.id) {
            if let Some(mut out) = get_output(store, u.output_id)? {
                out.spent_by = Some(updated_tx.id);
                out.spendable = false;
                save_output(store, &out)?;
            }
        }
    }

    Ok(updated_tx)
}

/// §4.1 `recreateSpentOutputs`: inverse of `spendTransaction` for abort —
/// restores change outputs as spendable and re-creates UTXO rows.
pub fn recreate_spent_outputs(store: &Store, spending_transaction_id: TransactionId) -> Result<(), AppError> {
    let parent = get_transaction(store, spending_transaction_id)?
        .ok_or_else(|| AppError::NotFound(format!("transaction {}", spending_transaction_id)))?;

    let status = match parent.status {
        TxStatus::Failed => UTXOStatus::Mined,
        _ => UTXOStatus::Unmined,
    };

    for kv in store.outputs.iter() {
        let (_, v) = kv.map_err(StorageError::from)?;
        let mut out: Output = decode(&v)?;

        // Outputs `spendTransaction` marked spent by this transaction (the
        // `noSend` path, which signs and persists before an abort can
        // still undo it) get their spendability restored.
        if out.spent_by == Some(spending_transaction_id) {
            out.spent_by = None;
            out.spendable = true;
            save_output(store, &out)?;

            if out.change {
                let existing = get_utxo(store, out.id)?;
                let utxo = Utxo {
                    output_id: out.id,
                    user_id: out.user_id,
                    basket_name: out.basket_name.clone().unwrap_or_else(|| CHANGE_BASKET.to_string()),
                    satoshis: out.satoshis,
                    estimated_input_size: existing.as_ref().map(|u| u.estimated_input_size).unwrap_or(148),
                    reserved_by_id: None,
                    status,
                    created_at: now(),
                };
                save_utxo(store, &utxo)?;
            }
        }

        // Release any reservation this transaction still holds — covers
        // the plain `unsigned` abort path, where `spendTransaction` never
        // ran and only the UTXO's `reservedById` needs clearing.
        if let Some(mut u) = get_utxo(store, out.id)? {
            if u.reserved_by_id == Some(spending_transaction_id) {
                u.reserved_by_id = None;
                save_utxo(store, &u)?;
            }
        }
    }

    Ok(())
}

/// §4.2 `process` broadcast step / §4.6 `unfail`: once a transaction's
/// outcome implies its outputs are spendable (a successful broadcast, a
/// recovered `unfail`, or an already-sent `sendWith` companion), flips
/// each of its own not-yet-spent outputs to `spendable = true` and, for
/// `change` outputs, creates the matching UTXO row so the funder can
/// select them for a later spend. Idempotent: re-materializing a
/// transaction that already has UTXO rows just refreshes their status.
pub fn materialize_spendable_outputs(
    store: &Store,
    transaction_id: TransactionId,
    utxo_status: UTXOStatus,
) -> Result<(), AppError> {
    for kv in store.outputs.iter() {
        let (_, v) = kv.map_err(StorageError::from)?;
        let mut out: Output = decode(&v)?;
        if out.transaction_id != transaction_id || out.spent_by.is_some() {
            continue;
        }
        if !out.spendable {
            out.spendable = true;
            save_output(store, &out)?;
        }
        if out.change {
            let existing = get_utxo(store, out.id)?;
            if existing.as_ref().map(|u| u.status) != Some(utxo_status) || existing.is_none() {
                let utxo = Utxo {
                    output_id: out.id,
                    user_id: out.user_id,
                    basket_name: out.basket_name.clone().unwrap_or_else(|| CHANGE_BASKET.to_string()),
                    satoshis: out.satoshis,
                    estimated_input_size: existing.as_ref().map(|u| u.estimated_input_size).unwrap_or(148),
                    reserved_by_id: existing.as_ref().and_then(|u| u.reserved_by_id),
                    status: utxo_status,
                    created_at: existing.map(|u| u.created_at).unwrap_or_else(now),
                };
                save_utxo(store, &utxo)?;
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------
// KnownTx
// ---------------------------------------------------------------------

pub fn save_known_tx(store: &Store, known: &KnownTx) -> Result<(), AppError> {
    store
        .known_tx
        .insert(known.tx_id.as_bytes(), encode(known)?)
        .map_err(StorageError::from)?;
    Ok(())
}

pub fn get_known_tx(store: &Store, tx_id: &str) -> Result<Option<KnownTx>, AppError> {
    match store.known_tx.get(tx_id.as_bytes()).map_err(StorageError::from)? {
        Some(b) => Ok(Some(decode(&b)?)),
        None => Ok(None),
    }
}

pub fn list_known_tx_by_status(store: &Store, statuses: &[ProvenTxReqStatus]) -> Result<Vec<KnownTx>, AppError> {
    let mut out = Vec::new();
    for kv in store.known_tx.iter() {
        let (_, v) = kv.map_err(StorageError::from)?;
        let k: KnownTx = decode(&v)?;
        if statuses.contains(&k.status) {
            out.push(k);
        }
    }
    Ok(out)
}

/// Cross-user scan used by the Monitor Daemon's `syncStatuses` job, which
/// reconciles every non-terminal Transaction against its KnownTx record
/// regardless of which user owns it.
pub fn list_transactions_by_status(store: &Store, statuses: &[TxStatus]) -> Result<Vec<Transaction>, AppError> {
    let mut out = Vec::new();
    for kv in store.transactions.iter() {
        let (_, v) = kv.map_err(StorageError::from)?;
        let tx: Transaction = decode(&v)?;
        if statuses.contains(&tx.status) {
            out.push(tx);
        }
    }
    Ok(out)
}

/// Every Transaction row (across all users) recorded against `tx_id`.
/// Used by the Monitor Daemon, which reconciles by txid and has no single
/// user in scope.
pub fn find_transactions_by_tx_id(store: &Store, tx_id: &str) -> Result<Vec<Transaction>, AppError> {
    let mut out = Vec::new();
    for kv in store.transactions.iter() {
        let (_, v) = kv.map_err(StorageError::from)?;
        let tx: Transaction = decode(&v)?;
        if tx.tx_id.as_deref() == Some(tx_id) {
            out.push(tx);
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------
// Commission
// ---------------------------------------------------------------------

pub fn save_commission(store: &Store, commission: &Commission) -> Result<(), AppError> {
    store
        .commissions
        .insert(key_u64(commission.transaction_id), encode(commission)?)
        .map_err(StorageError::from)?;
    Ok(())
}

pub fn get_commission(store: &Store, transaction_id: TransactionId) -> Result<Option<Commission>, AppError> {
    match store
        .commissions
        .get(key_u64(transaction_id))
        .map_err(StorageError::from)?
    {
        Some(b) => Ok(Some(decode(&b)?)),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------
// Certificates
// ---------------------------------------------------------------------

pub fn save_certificate(store: &Store, certificate: &Certificate) -> Result<(), AppError> {
    store
        .certificates
        .insert(key_u64(certificate.id), encode(certificate)?)
        .map_err(StorageError::from)?;
    Ok(())
}

pub fn get_certificate(store: &Store, id: CertificateId) -> Result<Option<Certificate>, AppError> {
    match store.certificates.get(key_u64(id)).map_err(StorageError::from)? {
        Some(b) => Ok(Some(decode(&b)?)),
        None => Ok(None),
    }
}

pub fn delete_certificate(store: &Store, id: CertificateId) -> Result<(), AppError> {
    store.certificates.remove(key_u64(id)).map_err(StorageError::from)?;
    Ok(())
}

pub fn list_certificates(
    store: &Store,
    user_id: UserId,
    certifiers: &[String],
    types: &[String],
) -> Result<Vec<Certificate>, AppError> {
    let mut out = Vec::new();
    for kv in store.certificates.iter() {
        let (_, v) = kv.map_err(StorageError::from)?;
        let cert: Certificate = decode(&v)?;
        if cert.user_id != user_id {
            continue;
        }
        if !certifiers.is_empty() && !certifiers.contains(&cert.certifier) {
            continue;
        }
        if !types.is_empty() && !types.contains(&cert.certificate_type) {
            continue;
        }
        out.push(cert);
    }
    Ok(out)
}

// ---------------------------------------------------------------------
// Read-side queries: listActions / listOutputs
// ---------------------------------------------------------------------

pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

pub fn list_and_count_actions(
    store: &Store,
    user_id: UserId,
    spec: &Spec<Transaction>,
    page: Page,
) -> Result<(Vec<Transaction>, usize), AppError> {
    let mut matched = Vec::new();
    for kv in store.transactions.iter() {
        let (_, v) = kv.map_err(StorageError::from)?;
        let tx: Transaction = decode(&v)?;
        if tx.user_id == user_id && spec.matches(&tx) {
            matched.push(tx);
        }
    }
    matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let total = matched.len();
    let page_items = matched.into_iter().skip(page.offset).take(page.limit).collect();
    Ok((page_items, total))
}

pub struct OutputsPage {
    pub items: Vec<Output>,
    pub total_count: usize,
    pub total_value: Satoshis,
}

pub fn list_and_count_outputs(
    store: &Store,
    user_id: UserId,
    spec: &Spec<Output>,
    page: Page,
) -> Result<OutputsPage, AppError> {
    let mut matched = Vec::new();
    for kv in store.outputs.iter() {
        let (_, v) = kv.map_err(StorageError::from)?;
        let out: Output = decode(&v)?;
        if out.user_id == user_id && spec.matches(&out) {
            matched.push(out);
        }
    }
    matched.sort_by_key(|o| o.id);
    let total_count = matched.len();
    let total_value: Satoshis = matched.iter().filter(|o| o.spendable).map(|o| o.satoshis).sum();
    let items = matched.into_iter().skip(page.offset).take(page.limit).collect();
    Ok(OutputsPage {
        items,
        total_count,
        total_value,
    })
}

/// §8 invariant 2: balance conservation over the change basket.
pub fn change_basket_balance(store: &Store, user_id: UserId) -> Result<Satoshis, AppError> {
    let mut total: Satoshis = 0;
    for kv in store.outputs.iter() {
        let (_, v) = kv.map_err(StorageError::from)?;
        let out: Output = decode(&v)?;
        if out.user_id == user_id
            && out.spendable
            && out.basket_name.as_deref() == Some(CHANGE_BASKET)
        {
            total += out.satoshis;
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_user_creates_change_basket() {
        let store = Store::open_temporary();
        let user = get_or_create_user(&store, "02abc").unwrap();
        let basket = get_basket(&store, user.id, CHANGE_BASKET).unwrap();
        assert!(basket.is_some());
    }

    #[test]
    fn get_or_create_user_is_idempotent() {
        let store = Store::open_temporary();
        let u1 = get_or_create_user(&store, "02abc").unwrap();
        let u2 = get_or_create_user(&store, "02abc").unwrap();
        assert_eq!(u1.id, u2.id);
    }

    #[test]
    fn reservation_rejects_double_reservation() {
        let store = Store::open_temporary();
        let user = get_or_create_user(&store, "02abc").unwrap();
        let basket = get_basket(&store, user.id, CHANGE_BASKET).unwrap().unwrap();

        let output_id = store.alloc_output_id();
        let utxo = Utxo {
            output_id,
            user_id: user.id,
            basket_name: CHANGE_BASKET.to_string(),
            satoshis: 10_000,
            estimated_input_size: 148,
            reserved_by_id: None,
            status: UTXOStatus::Mined,
            created_at: now(),
        };
        save_utxo(&store, &utxo).unwrap();

        let result = reserve_utxos(&store, user.id, 1_000, &basket, &BTreeSet::new(), &[], false, 100, 200)
            .unwrap();
        assert_eq!(result.allocated.len(), 1);

        commit_reservation(&store, &result.allocated, 99).unwrap();
        let reserved_again = commit_reservation(&store, &result.allocated, 100);
        assert!(reserved_again.is_err());
    }

    #[test]
    fn relinquish_output_drops_utxo_and_marks_unspendable() {
        let store = Store::open_temporary();
        let user = get_or_create_user(&store, "02abc").unwrap();
        let output_id = store.alloc_output_id();
        let output = Output {
            id: output_id,
            user_id: user.id,
            transaction_id: 1,
            spent_by: None,
            vout: 0,
            satoshis: 5_000,
            locking_script: Some(vec![1, 2, 3]),
            custom_instructions: None,
            derivation_prefix: None,
            derivation_suffix: None,
            basket_name: Some(CHANGE_BASKET.to_string()),
            spendable: true,
            change: true,
            provided_by: ProvidedBy::Storage,
            purpose: String::new(),
            output_type: OutputType::P2PKH,
            sender_identity_key: None,
            tags: Default::default(),
        };
        save_output(&store, &output).unwrap();
        save_utxo(
            &store,
            &Utxo {
                output_id,
                user_id: user.id,
                basket_name: CHANGE_BASKET.to_string(),
                satoshis: 5_000,
                estimated_input_size: 148,
                reserved_by_id: None,
                status: UTXOStatus::Mined,
                created_at: now(),
            },
        )
        .unwrap();

        relinquish_output(&store, user.id, output_id).unwrap();

        assert!(get_utxo(&store, output_id).unwrap().is_none());
        assert!(!get_output(&store, output_id).unwrap().unwrap().spendable);
    }
}
