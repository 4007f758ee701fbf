//! Core data model: Users, Transactions, Outputs, UTXOs, KnownTx, and the
//! supporting label/tag/note/commission entities.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type UserId = u64;
pub type TransactionId = u64;
pub type OutputId = u64;
pub type TxId = String; // hex-encoded txid
pub type Satoshis = i64;

/// Hard ceiling mirroring the Bitcoin-family 21M-unit supply cap at 8
/// decimal places. Every satoshi-arithmetic boundary checks against this.
pub const MAX_SATOSHIS: Satoshis = 21_000_000 * 100_000_000;

/// Checked addition of satoshi amounts, rejecting overflow or results that
/// would exceed the supply ceiling.
pub fn checked_add_sat(a: Satoshis, b: Satoshis) -> Option<Satoshis> {
    let sum = a.checked_add(b)?;
    if sum.abs() > MAX_SATOSHIS {
        None
    } else {
        Some(sum)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub identity_key: String, // compressed pubkey hex
    pub active_storage_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Unsigned,
    Unprocessed,
    NoSend,
    Sending,
    Unproven,
    Completed,
    Failed,
    Unfail,
    Invalid,
}

impl TxStatus {
    /// §8 invariant 5: no Transaction may leave `completed` or `invalid`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Completed | TxStatus::Invalid)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub tx_id: Option<TxId>,
    pub reference: String, // random 12-byte base64, unique per user
    pub version: u32,
    pub lock_time: u32,
    pub status: TxStatus,
    pub is_outgoing: bool,
    pub description: String,
    pub satoshis: Satoshis,
    pub input_beef: Option<Vec<u8>>,
    pub labels: Vec<String>,
    pub batch: Option<String>,
    /// §4.2 `process`: carried from `createAction`'s `options.isDelayed`
    /// so `process` can route a freshly-signed transaction to the
    /// background broadcaster instead of posting it inline.
    pub is_delayed: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvidedBy {
    You,
    Storage,
    YouAndStorage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputType {
    P2PKH,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub id: OutputId,
    pub user_id: UserId,
    pub transaction_id: TransactionId,
    pub spent_by: Option<TransactionId>,
    pub vout: u32,
    pub satoshis: Satoshis,
    pub locking_script: Option<Vec<u8>>,
    pub custom_instructions: Option<String>,
    pub derivation_prefix: Option<String>,
    pub derivation_suffix: Option<String>,
    pub basket_name: Option<String>,
    pub spendable: bool,
    pub change: bool,
    pub provided_by: ProvidedBy,
    pub purpose: String,
    pub output_type: OutputType,
    pub sender_identity_key: Option<String>,
    pub tags: BTreeSet<String>,
}

impl Output {
    /// §3 invariant: `spentBy` non-null implies `spendable = false`.
    pub fn assert_invariants(&self) {
        debug_assert!(self.spent_by.is_none() || !self.spendable);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UTXOStatus {
    Mined,
    Sending,
    Unmined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utxo {
    pub output_id: OutputId, // primary key
    pub user_id: UserId,
    pub basket_name: String,
    pub satoshis: Satoshis,
    pub estimated_input_size: u32,
    pub reserved_by_id: Option<TransactionId>,
    pub status: UTXOStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputBasket {
    pub user_id: UserId,
    pub name: String,
    pub number_of_desired_utxos: u32,
    pub minimum_desired_utxo_value: Satoshis,
}

pub const CHANGE_BASKET: &str = "change";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvenTxReqStatus {
    Unprocessed,
    Unsent,
    Sending,
    Unmined,
    Completed,
    NoSend,
    DoubleSpend,
    Invalid,
    Unfail,
}

impl ProvenTxReqStatus {
    pub fn is_problematic(&self) -> bool {
        matches!(self, ProvenTxReqStatus::DoubleSpend | ProvenTxReqStatus::Invalid)
    }

    /// States beyond the broadcast stage that may not transition back to
    /// `sending` (§3 "ProvenTxReqBeyondBroadcastStageStatuses").
    pub fn is_beyond_broadcast_stage(&self) -> bool {
        matches!(
            self,
            ProvenTxReqStatus::Unmined
                | ProvenTxReqStatus::Completed
                | ProvenTxReqStatus::DoubleSpend
                | ProvenTxReqStatus::Invalid
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxNote {
    pub tx_id: TxId,
    pub at: i64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerklePath {
    pub block_height: u64,
    pub block_hash: String,
    pub merkle_root: String,
    pub path: Vec<String>, // sibling hashes, bottom to top
    pub index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownTx {
    pub tx_id: TxId, // primary key, content address
    pub raw_tx: Vec<u8>,
    pub input_beef: Option<Vec<u8>>,
    pub merkle_path: Option<MerklePath>,
    pub status: ProvenTxReqStatus,
    pub attempts: u32,
    pub batch: Option<String>,
    pub notes: Vec<TxNote>,
}

impl KnownTx {
    pub fn note(&mut self, text: impl Into<String>, now: i64) {
        self.notes.push(TxNote {
            tx_id: self.tx_id.clone(),
            at: now,
            text: text.into(),
        });
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commission {
    pub user_id: UserId,
    pub transaction_id: TransactionId,
    pub satoshis: Satoshis,
    pub key_offset: String,
    pub locking_script: Vec<u8>,
    pub is_redeemed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_id: TxId,
    pub vout: u32,
}

impl std::fmt::Display for OutPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.tx_id, self.vout)
    }
}

pub type CertificateId = u64;

/// Minimal BRC-103-style certificate record backing the façade's
/// `acquireCertificate`/`listCertificates`/`proveCertificate`/
/// `relinquishCertificate` methods (§4.7). A full overlay-network
/// certificate-discovery stack is out of scope (§1); this is just enough
/// storage to satisfy the wire contract against the local user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub id: CertificateId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub certificate_type: String, // base64, 32 bytes
    pub serial_number: String, // base64, 32 bytes
    pub certifier: String,     // compressed pubkey hex
    pub subject: String,       // compressed pubkey hex, usually the user's identityKey
    pub revocation_outpoint: String,
    pub signature: String, // hex DER
    pub fields: std::collections::BTreeMap<String, String>,
    pub keyring: std::collections::BTreeMap<String, String>,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_add_rejects_overflow_of_supply_cap() {
        assert_eq!(checked_add_sat(1, 2), Some(3));
        assert_eq!(checked_add_sat(MAX_SATOSHIS, 1), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(TxStatus::Completed.is_terminal());
        assert!(TxStatus::Invalid.is_terminal());
        assert!(!TxStatus::Unsigned.is_terminal());
    }
}
