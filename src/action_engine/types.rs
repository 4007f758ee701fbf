//! API-shaped argument and result types for the Action Engine's six
//! operations (§4.2). These mirror the BRC-100 wire shapes closely enough
//! that the façade (`crate::facade`) can deserialize JSON almost
//! directly into them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{OutPoint, ProvidedBy, Satoshis, TxId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustSelf {
    Known,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateActionOptions {
    #[serde(default)]
    pub randomize_outputs: bool,
    #[serde(default)]
    pub trust_self: Option<TrustSelf>,
    #[serde(default)]
    pub no_send: bool,
    #[serde(default)]
    pub no_send_change: Vec<OutPoint>,
    #[serde(default)]
    pub is_delayed: bool,
    #[serde(default)]
    pub known_tx_ids: Vec<TxId>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub send_with: Vec<TxId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateActionInput {
    pub outpoint: OutPoint,
    pub unlocking_script_length: u32,
    #[serde(default)]
    pub input_description: String,
    #[serde(default)]
    pub sequence_number: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateActionOutput {
    #[serde(with = "hex_vec")]
    pub locking_script: Vec<u8>,
    pub satoshis: Satoshis,
    #[serde(default)]
    pub output_description: String,
    #[serde(default)]
    pub basket: Option<String>,
    #[serde(default)]
    pub custom_instructions: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

mod hex_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateActionArgs {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub lock_time: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<CreateActionOutput>,
    #[serde(default)]
    pub inputs: Vec<CreateActionInput>,
    #[serde(default, with = "hex_vec_opt")]
    pub input_beef: Option<Vec<u8>>,
    #[serde(default)]
    pub options: CreateActionOptions,
}

fn default_version() -> u32 {
    1
}

mod hex_vec_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_str(&hex::encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let s: Option<String> = Option::deserialize(d)?;
        match s {
            Some(s) => hex::decode(&s).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultInputDescriptor {
    pub outpoint: OutPoint,
    pub provided_by: ProvidedBy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_satoshis: Option<Satoshis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locking_script_hex: Option<String>,
    pub estimated_unlocking_script_length: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivation_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivation_suffix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_identity_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultOutputDescriptor {
    pub vout: u32,
    pub satoshis: Satoshis,
    pub output_description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basket: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateActionResult {
    pub reference: String,
    pub version: u32,
    pub lock_time: u32,
    pub derivation_prefix: String,
    pub outputs: Vec<ResultOutputDescriptor>,
    pub inputs: Vec<ResultInputDescriptor>,
    #[serde(with = "hex_vec")]
    pub input_beef: Vec<u8>,
    pub no_send_change_output_vouts: Vec<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignActionSpend {
    #[serde(with = "hex_vec")]
    pub unlocking_script: Vec<u8>,
    #[serde(default)]
    pub sequence_number: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignActionArgs {
    pub reference: String,
    pub spends: BTreeMap<u32, SignActionSpend>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignActionResult {
    pub tx_id: TxId,
    pub status: crate::types::TxStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbortActionArgs {
    pub reference: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AbortActionResult {
    pub reference: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessActionArgs {
    pub reference: String,
    #[serde(default)]
    pub send_with: Vec<TxId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendWithResultStatus {
    Unproven,
    Sending,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendWithResult {
    pub tx_id: TxId,
    pub status: SendWithResultStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewActionResult {
    pub tx_id: TxId,
    pub status: String, // "success" | "doubleSpend" | "invalidTx" | "serviceError"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub competing_tx_id: Option<TxId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessActionResult {
    pub tx_id: TxId,
    pub status: crate::types::TxStatus,
    pub send_with_results: Vec<SendWithResult>,
    pub review_results: Vec<ReviewActionResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InternalizeOutputProtocol {
    pub vout: u32,
    #[serde(rename = "type")]
    pub kind: InternalizeProtocolKind,
    #[serde(default)]
    pub derivation_prefix: Option<String>,
    #[serde(default)]
    pub derivation_suffix: Option<String>,
    #[serde(default)]
    pub sender_identity_key: Option<String>,
    #[serde(default)]
    pub basket: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_instructions: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InternalizeProtocolKind {
    WalletPayment,
    BasketInsertion,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InternalizeActionArgs {
    #[serde(with = "hex_vec")]
    pub atomic_beef: Vec<u8>,
    pub outputs: Vec<InternalizeOutputProtocol>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InternalizeActionResult {
    pub accepted: bool,
    pub is_merge: bool,
    pub tx_id: TxId,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListActionsArgs {
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub label_query_mode_all: bool,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Clone, Serialize)]
pub struct ListActionsResult {
    pub total_actions: usize,
    pub actions: Vec<crate::types::Transaction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListOutputsArgs {
    #[serde(default)]
    pub basket: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tag_query_mode_all: bool,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListOutputsResult {
    pub total_outputs: usize,
    pub total_value: Satoshis,
    pub outputs: Vec<crate::types::Output>,
}

/// §4.2/§4.6, scenario S5: lists `failed` transactions and, when `unfail`
/// is set, parks their `KnownTx` rows in `Unfail` so the monitor's
/// `unfail` tick gives them one more chance against reality.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFailedActionsArgs {
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub label_query_mode_all: bool,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub unfail: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListFailedActionsResult {
    pub total_actions: usize,
    pub actions: Vec<crate::types::Transaction>,
    pub unfailed_tx_ids: Vec<TxId>,
}
