//! Durable storage layer over `sled`, one tree per entity, with secondary
//! indexes maintained alongside primary writes. Tree access runs inline on
//! the calling task rather than behind `spawn_blocking`: every write in
//! this crate goes through `repo::*`, which only ever touches `sled`'s
//! in-memory page cache directly (no call here does a synchronous flush),
//! so there is no blocking syscall to shield the async runtime from. A
//! future caller that needs `flush_every_ms` disabled in favor of explicit
//! `flush()` calls would need to revisit this and push those behind
//! `spawn_blocking`.

pub mod repo;
pub mod spec;

use crate::error::{AppError, StorageError};
use crate::network_type::NetworkType;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct Store {
    pub db: sled::Db,
    pub users: sled::Tree,
    pub transactions: sled::Tree,
    pub outputs: sled::Tree,
    pub utxos: sled::Tree,
    pub known_tx: sled::Tree,
    pub baskets: sled::Tree,
    pub commissions: sled::Tree,
    pub certificates: sled::Tree,
    pub idx_user_status: sled::Tree,
    pub idx_user_txid: sled::Tree,
    next_user_id: AtomicU64,
    next_tx_id: AtomicU64,
    next_output_id: AtomicU64,
    next_certificate_id: AtomicU64,
}

impl Store {
    pub fn open(
        data_dir: &Path,
        identity_key: &str,
        network: NetworkType,
        cache_size_mb: usize,
    ) -> Result<Arc<Self>, AppError> {
        let file_name = format!("wallet-{}-{}.sqlite", identity_key, network.chain_tag());
        let path = data_dir.join(file_name);

        let config = sled::Config::new()
            .path(&path)
            .cache_capacity((cache_size_mb as u64) * 1024 * 1024)
            .flush_every_ms(Some(1000))
            .mode(sled::Mode::HighThroughput);

        let db = config
            .open()
            .map_err(|e| StorageError::DatabaseOpen {
                name: path.display().to_string(),
                source: e,
            })?;

        let users = db.open_tree("users").map_err(StorageError::from)?;
        let transactions = db.open_tree("transactions").map_err(StorageError::from)?;
        let outputs = db.open_tree("outputs").map_err(StorageError::from)?;
        let utxos = db.open_tree("utxos").map_err(StorageError::from)?;
        let known_tx = db.open_tree("known_tx").map_err(StorageError::from)?;
        let baskets = db.open_tree("baskets").map_err(StorageError::from)?;
        let commissions = db.open_tree("commissions").map_err(StorageError::from)?;
        let certificates = db.open_tree("certificates").map_err(StorageError::from)?;
        let idx_user_status = db.open_tree("idx_user_status").map_err(StorageError::from)?;
        let idx_user_txid = db.open_tree("idx_user_txid").map_err(StorageError::from)?;

        let next_user_id = AtomicU64::new(max_key(&users) + 1);
        let next_tx_id = AtomicU64::new(max_key(&transactions) + 1);
        let next_output_id = AtomicU64::new(max_key(&outputs) + 1);
        let next_certificate_id = AtomicU64::new(max_key(&certificates) + 1);

        Ok(Arc::new(Self {
            db,
            users,
            transactions,
            outputs,
            utxos,
            known_tx,
            baskets,
            commissions,
            certificates,
            idx_user_status,
            idx_user_txid,
            next_user_id,
            next_tx_id,
            next_output_id,
            next_certificate_id,
        }))
    }

    /// In-memory store for tests: a `sled::Config::new().temporary(true)`
    /// instance, avoiding any filesystem dependency in unit tests.
    pub fn open_temporary() -> Arc<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .expect("temporary sled db");
        let users = db.open_tree("users").unwrap();
        let transactions = db.open_tree("transactions").unwrap();
        let outputs = db.open_tree("outputs").unwrap();
        let utxos = db.open_tree("utxos").unwrap();
        let known_tx = db.open_tree("known_tx").unwrap();
        let baskets = db.open_tree("baskets").unwrap();
        let commissions = db.open_tree("commissions").unwrap();
        let certificates = db.open_tree("certificates").unwrap();
        let idx_user_status = db.open_tree("idx_user_status").unwrap();
        let idx_user_txid = db.open_tree("idx_user_txid").unwrap();
        Arc::new(Self {
            db,
            users,
            transactions,
            outputs,
            utxos,
            known_tx,
            baskets,
            commissions,
            certificates,
            idx_user_status,
            idx_user_txid,
            next_user_id: AtomicU64::new(1),
            next_tx_id: AtomicU64::new(1),
            next_output_id: AtomicU64::new(1),
            next_certificate_id: AtomicU64::new(1),
        })
    }

    pub fn alloc_user_id(&self) -> u64 {
        self.next_user_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn alloc_tx_id(&self) -> u64 {
        self.next_tx_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn alloc_output_id(&self) -> u64 {
        self.next_output_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn alloc_certificate_id(&self) -> u64 {
        self.next_certificate_id.fetch_add(1, Ordering::SeqCst)
    }
}

fn max_key(tree: &sled::Tree) -> u64 {
    tree.iter()
        .keys()
        .filter_map(|k| k.ok())
        .filter_map(|k| {
            if k.len() == 8 {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&k);
                Some(u64::from_be_bytes(buf))
            } else {
                None
            }
        })
        .max()
        .unwrap_or(0)
}

pub fn key_u64(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(value).map_err(StorageError::from)
}

pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    bincode::deserialize(bytes).map_err(StorageError::from)
}
