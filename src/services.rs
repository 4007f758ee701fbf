//! Services collaborator (§4.4a): broadcast, merkle-path lookup, raw-tx
//! fetch, and block-header lookup against an external network. Two
//! implementations are provided so the daemon can run fully offline.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::beef::Beef;
use crate::types::{MerklePath, TxId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Height(u64),
    Hash([u8; 32]),
}

#[derive(Debug, Clone)]
pub struct BlockHeader {
    pub height: u64,
    pub hash: String,
    pub merkle_root: String,
    pub time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastOutcome {
    Success,
    AlreadyMined,
    DoubleSpend,
    Invalid,
}

#[derive(Debug, Clone)]
pub struct TxBroadcastResult {
    pub tx_id: TxId,
    pub outcome: BroadcastOutcome,
    pub competing_tx_id: Option<TxId>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AggregatedBroadcastResult {
    pub results: Vec<TxBroadcastResult>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServicesError {
    #[error("network error: {0}")]
    Network(String),
    #[error("upstream returned malformed data: {0}")]
    Malformed(String),
}

pub type ServicesResult<T> = Result<T, ServicesError>;

#[async_trait]
pub trait Services: Send + Sync {
    async fn post_beef(&self, beef: &Beef, tx_ids: &[TxId]) -> ServicesResult<AggregatedBroadcastResult>;
    async fn get_merkle_path(&self, tx_id: &TxId) -> ServicesResult<Option<MerklePath>>;
    async fn get_raw_tx(&self, tx_id: &TxId) -> ServicesResult<Option<(Vec<u8>, Option<Vec<u8>>)>>;
    async fn get_block_header(&self, reference: BlockRef) -> ServicesResult<Option<BlockHeader>>;
    /// Current chain tip height, backing the façade's `getHeight` (§4.7).
    async fn get_chain_tip(&self) -> ServicesResult<u64>;
}

/// In-memory, deterministic implementation used by scenario tests and as
/// the default so the daemon runs fully offline until a real overlay
/// endpoint is configured.
#[derive(Default)]
pub struct MockServices {
    pub broadcast_outcomes: DashMap<TxId, BroadcastOutcome>,
    pub merkle_paths: DashMap<TxId, MerklePath>,
    pub raw_txs: DashMap<TxId, (Vec<u8>, Option<Vec<u8>>)>,
    pub headers: DashMap<u64, BlockHeader>,
}

impl MockServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_outcome(&self, tx_id: impl Into<TxId>, outcome: BroadcastOutcome) {
        self.broadcast_outcomes.insert(tx_id.into(), outcome);
    }
}

#[async_trait]
impl Services for MockServices {
    async fn post_beef(&self, _beef: &Beef, tx_ids: &[TxId]) -> ServicesResult<AggregatedBroadcastResult> {
        let results = tx_ids
            .iter()
            .map(|tx_id| {
                let outcome = self
                    .broadcast_outcomes
                    .get(tx_id)
                    .map(|r| *r)
                    .unwrap_or(BroadcastOutcome::Success);
                TxBroadcastResult {
                    tx_id: tx_id.clone(),
                    outcome,
                    competing_tx_id: None,
                    note: None,
                }
            })
            .collect();
        Ok(AggregatedBroadcastResult { results })
    }

    async fn get_merkle_path(&self, tx_id: &TxId) -> ServicesResult<Option<MerklePath>> {
        Ok(self.merkle_paths.get(tx_id).map(|r| r.clone()))
    }

    async fn get_raw_tx(&self, tx_id: &TxId) -> ServicesResult<Option<(Vec<u8>, Option<Vec<u8>>)>> {
        Ok(self.raw_txs.get(tx_id).map(|r| r.clone()))
    }

    async fn get_block_header(&self, reference: BlockRef) -> ServicesResult<Option<BlockHeader>> {
        match reference {
            BlockRef::Height(h) => Ok(self.headers.get(&h).map(|r| r.clone())),
            BlockRef::Hash(_) => Ok(None),
        }
    }

    async fn get_chain_tip(&self) -> ServicesResult<u64> {
        Ok(self.headers.iter().map(|r| *r.key()).max().unwrap_or(0))
    }
}

/// Thin `reqwest`-based client against a configurable overlay/broadcast
/// endpoint, used when the daemon is pointed at a real network.
pub struct HttpServices {
    client: reqwest::Client,
    base_url: String,
}

impl HttpServices {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Services for HttpServices {
    async fn post_beef(&self, beef: &Beef, tx_ids: &[TxId]) -> ServicesResult<AggregatedBroadcastResult> {
        #[derive(serde::Serialize)]
        struct Req<'a> {
            beef: &'a [u8],
            tx_ids: &'a [TxId],
        }
        let bytes = beef.to_bytes().map_err(|e| ServicesError::Malformed(e.to_string()))?;
        let resp = self
            .client
            .post(format!("{}/beef", self.base_url))
            .json(&Req { beef: &bytes, tx_ids })
            .send()
            .await
            .map_err(|e| ServicesError::Network(e.to_string()))?;
        let parsed: Vec<(TxId, String, Option<TxId>)> =
            resp.json().await.map_err(|e| ServicesError::Malformed(e.to_string()))?;
        let results = parsed
            .into_iter()
            .map(|(tx_id, outcome, competing)| {
                let outcome = match outcome.as_str() {
                    "success" => BroadcastOutcome::Success,
                    "alreadyMined" => BroadcastOutcome::AlreadyMined,
                    "doubleSpend" => BroadcastOutcome::DoubleSpend,
                    _ => BroadcastOutcome::Invalid,
                };
                TxBroadcastResult {
                    tx_id,
                    outcome,
                    competing_tx_id: competing,
                    note: None,
                }
            })
            .collect();
        Ok(AggregatedBroadcastResult { results })
    }

    async fn get_merkle_path(&self, tx_id: &TxId) -> ServicesResult<Option<MerklePath>> {
        let resp = self
            .client
            .get(format!("{}/merkle-path/{}", self.base_url, tx_id))
            .send()
            .await
            .map_err(|e| ServicesError::Network(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        resp.json()
            .await
            .map_err(|e| ServicesError::Malformed(e.to_string()))
    }

    async fn get_raw_tx(&self, tx_id: &TxId) -> ServicesResult<Option<(Vec<u8>, Option<Vec<u8>>)>> {
        let resp = self
            .client
            .get(format!("{}/raw-tx/{}", self.base_url, tx_id))
            .send()
            .await
            .map_err(|e| ServicesError::Network(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        resp.json()
            .await
            .map_err(|e| ServicesError::Malformed(e.to_string()))
    }

    async fn get_block_header(&self, reference: BlockRef) -> ServicesResult<Option<BlockHeader>> {
        #[derive(serde::Deserialize)]
        struct Raw {
            height: u64,
            hash: String,
            merkle_root: String,
            time: i64,
        }
        let path = match reference {
            BlockRef::Height(h) => format!("height/{h}"),
            BlockRef::Hash(h) => format!("hash/{}", hex::encode(h)),
        };
        let resp = self
            .client
            .get(format!("{}/block-header/{}", self.base_url, path))
            .send()
            .await
            .map_err(|e| ServicesError::Network(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let raw: Raw = resp.json().await.map_err(|e| ServicesError::Malformed(e.to_string()))?;
        Ok(Some(BlockHeader {
            height: raw.height,
            hash: raw.hash,
            merkle_root: raw.merkle_root,
            time: raw.time,
        }))
    }

    async fn get_chain_tip(&self) -> ServicesResult<u64> {
        let resp = self
            .client
            .get(format!("{}/chain-tip", self.base_url))
            .send()
            .await
            .map_err(|e| ServicesError::Network(e.to_string()))?;
        resp.json().await.map_err(|e| ServicesError::Malformed(e.to_string()))
    }
}

pub fn shared_mock() -> Arc<dyn Services> {
    Arc::new(MockServices::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_post_beef_defaults_to_success() {
        let services = MockServices::new();
        let beef = Beef::default();
        let result = services.post_beef(&beef, &["a".repeat(64)]).await.unwrap();
        assert_eq!(result.results[0].outcome, BroadcastOutcome::Success);
    }

    #[tokio::test]
    async fn mock_post_beef_honors_configured_outcome() {
        let services = MockServices::new();
        services.set_outcome("a".repeat(64), BroadcastOutcome::DoubleSpend);
        let beef = Beef::default();
        let result = services.post_beef(&beef, &["a".repeat(64)]).await.unwrap();
        assert_eq!(result.results[0].outcome, BroadcastOutcome::DoubleSpend);
    }
}
