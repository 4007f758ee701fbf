//! BEEF (BRC-96 "Background Evaluation Extended Format") assembly and
//! verification (§4.3).
//!
//! A BEEF is a self-contained proof object: a set of transactions where
//! each entry either carries a merkle path rooted in a known block
//! header, or is present only so that its dependents' inputs resolve.
//! The wire encoding here is an internal, versioned `bincode` framing
//! rather than the byte-for-byte BRC-96 layout — this daemon has no
//! network peer to interoperate with at that level, so the collaborator
//! boundary is kept but the bytes it produces are ours.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::AppError;
use crate::storage::repo;
use crate::storage::Store;
use crate::types::{KnownTx, MerklePath, TxId};

const MAX_DEPTH: u32 = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BeefEntry {
    /// Referenced only so a dependent's input resolves; no proof carried.
    TxIdOnly(TxId),
    /// Raw transaction bytes, with a merkle path if the transaction is mined.
    RawTx {
        tx_id: TxId,
        raw_tx: Vec<u8>,
        merkle_path: Option<MerklePath>,
    },
}

impl BeefEntry {
    pub fn tx_id(&self) -> &TxId {
        match self {
            BeefEntry::TxIdOnly(id) => id,
            BeefEntry::RawTx { tx_id, .. } => tx_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Beef {
    pub entries: Vec<BeefEntry>,
}

impl Beef {
    pub fn to_bytes(&self) -> Result<Vec<u8>, AppError> {
        bincode::serialize(self).map_err(|e| AppError::BeefInvalid(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AppError> {
        bincode::deserialize(bytes).map_err(|e| AppError::BeefInvalid(e.to_string()))
    }

    fn index(&self) -> HashMap<&TxId, &BeefEntry> {
        self.entries.iter().map(|e| (e.tx_id(), e)).collect()
    }

    /// Merges another BEEF into this one, deduplicating by txid and
    /// preferring a `RawTx` entry over a `TxIdOnly` entry for the same id.
    pub fn merge(&mut self, other: Beef) {
        let mut by_id: HashMap<TxId, BeefEntry> =
            std::mem::take(&mut self.entries).into_iter().map(|e| (e.tx_id().clone(), e)).collect();
        for entry in other.entries {
            let id = entry.tx_id().clone();
            match (by_id.get(&id), &entry) {
                (Some(BeefEntry::RawTx { .. }), BeefEntry::TxIdOnly(_)) => {}
                _ => {
                    by_id.insert(id, entry);
                }
            }
        }
        self.entries = by_id.into_values().collect();
    }

    /// Drops entries already known to the caller, demoting them to a
    /// `TxIdOnly` reference so downstream inputs can still resolve them.
    pub fn prune_known(&mut self, known_tx_ids: &HashSet<TxId>) {
        for entry in self.entries.iter_mut() {
            if known_tx_ids.contains(entry.tx_id()) {
                if let BeefEntry::RawTx { tx_id, .. } = entry {
                    *entry = BeefEntry::TxIdOnly(tx_id.clone());
                }
            }
        }
    }
}

/// Raw-transaction input-outpoint extraction, via the shared raw-tx
/// decoder. Malformed bytes (e.g. an opaque externally supplied payload
/// this daemon cannot parse) yield no inputs rather than an error — BEEF
/// closure then simply treats the transaction as depending on nothing.
pub fn input_tx_ids(raw_tx: &[u8]) -> Vec<TxId> {
    crate::rawtx::RawTx::decode(raw_tx)
        .map(|tx| tx.inputs.into_iter().map(|i| i.prev_tx_id).collect())
        .unwrap_or_default()
}

/// Recursive proof-graph assembly (`buildBEEF`). Stops descending into a
/// transaction's inputs once that transaction itself carries a merkle
/// path, or once `MAX_DEPTH` is reached.
pub fn build_beef(store: &Store, seed_tx_id: &TxId) -> Result<Beef, AppError> {
    let mut visited: HashMap<TxId, BeefEntry> = HashMap::new();
    let mut stack = vec![(seed_tx_id.clone(), 0u32)];

    while let Some((tx_id, depth)) = stack.pop() {
        if visited.contains_key(&tx_id) {
            continue;
        }
        let Some(known) = repo::get_known_tx(store, &tx_id)? else {
            visited.insert(tx_id.clone(), BeefEntry::TxIdOnly(tx_id));
            continue;
        };
        if depth >= MAX_DEPTH {
            visited.insert(tx_id.clone(), BeefEntry::TxIdOnly(tx_id));
            continue;
        }

        let has_proof = known.merkle_path.is_some();
        visited.insert(
            tx_id.clone(),
            BeefEntry::RawTx {
                tx_id: tx_id.clone(),
                raw_tx: known.raw_tx.clone(),
                merkle_path: known.merkle_path.clone(),
            },
        );

        if !has_proof {
            for input_id in input_tx_ids(&known.raw_tx) {
                stack.push((input_id, depth + 1));
            }
        }
    }

    Ok(Beef {
        entries: visited.into_values().collect(),
    })
}

/// Verification collaborator: every entry either carries a merkle path,
/// or is a bare txid reference, or all of its inputs resolve within the
/// same BEEF (§8 invariant 6, "BEEF closure").
pub fn verify_beef(beef: &Beef) -> Result<(), AppError> {
    let index = beef.index();
    for entry in &beef.entries {
        if let BeefEntry::RawTx {
            tx_id,
            raw_tx,
            merkle_path,
        } = entry
        {
            if merkle_path.is_some() {
                continue;
            }
            for input_id in input_tx_ids(raw_tx) {
                if !index.contains_key(&input_id) {
                    return Err(AppError::BeefInvalid(format!(
                        "transaction {tx_id} has unresolved input {input_id}"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// §4.1 `getBEEFForTxIDs`: assembles and merges BEEFs for a set of seed
/// txids, pruning any id the caller already has.
pub fn get_beef_for_tx_ids(
    store: &Store,
    tx_ids: &[TxId],
    known_tx_ids: &HashSet<TxId>,
) -> Result<Beef, AppError> {
    let mut merged = Beef::default();
    for tx_id in tx_ids {
        let beef = build_beef(store, tx_id)?;
        merged.merge(beef);
    }
    merged.prune_known(known_tx_ids);
    verify_beef(&merged)?;
    Ok(merged)
}

pub fn known_tx_is_mined(known: &KnownTx) -> bool {
    known.merkle_path.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::repo;
    use crate::types::ProvenTxReqStatus;

    fn raw_tx_spending(input_txid_hex: &str) -> Vec<u8> {
        let mut bytes = vec![0u8; 4]; // version
        bytes.push(1); // one input
        let mut txid_bytes = hex::decode(input_txid_hex).unwrap();
        txid_bytes.reverse();
        bytes.extend_from_slice(&txid_bytes);
        bytes.extend_from_slice(&0u32.to_le_bytes()); // vout
        bytes.push(0); // empty script
        bytes.extend_from_slice(&0xffffffffu32.to_le_bytes()); // sequence
        bytes
    }

    #[test]
    fn build_beef_stops_at_a_mined_ancestor() {
        let store = Store::open_temporary();
        let parent_txid = "aa".repeat(32);
        repo::save_known_tx(
            &store,
            &KnownTx {
                tx_id: parent_txid.clone(),
                raw_tx: vec![0u8; 10],
                input_beef: None,
                merkle_path: Some(MerklePath {
                    block_height: 1,
                    block_hash: "bb".repeat(32),
                    merkle_root: "cc".repeat(32),
                    path: vec![],
                    index: 0,
                }),
                status: ProvenTxReqStatus::Completed,
                attempts: 0,
                batch: None,
                notes: vec![],
            },
        )
        .unwrap();

        let child_txid = "dd".repeat(32);
        repo::save_known_tx(
            &store,
            &KnownTx {
                tx_id: child_txid.clone(),
                raw_tx: raw_tx_spending(&parent_txid),
                input_beef: None,
                merkle_path: None,
                status: ProvenTxReqStatus::Unmined,
                attempts: 0,
                batch: None,
                notes: vec![],
            },
        )
        .unwrap();

        let beef = build_beef(&store, &child_txid).unwrap();
        assert_eq!(beef.entries.len(), 2);
        verify_beef(&beef).unwrap();
    }

    #[test]
    fn verify_rejects_unresolved_input() {
        let beef = Beef {
            entries: vec![BeefEntry::RawTx {
                tx_id: "a".repeat(64),
                raw_tx: raw_tx_spending(&"b".repeat(64)),
                merkle_path: None,
            }],
        };
        assert!(verify_beef(&beef).is_err());
    }
}
