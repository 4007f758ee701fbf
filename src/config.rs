//! Configuration management for the wallet daemon.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::network_type::NetworkType;

/// Get the platform-specific data directory for the wallet daemon.
pub fn get_data_dir() -> PathBuf {
    if cfg!(windows) {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gebunden")
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".gebunden")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    pub rpc: RpcConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    #[serde(default)]
    pub fee: FeeConfig,
    #[serde(default)]
    pub commission: CommissionConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub permission_gate: PermissionGateConfig,
    #[serde(default)]
    pub services: ServicesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub version: String,
    #[serde(default = "default_network")]
    pub network: String,
}

fn default_network() -> String {
    "test".to_string()
}

impl NodeConfig {
    pub fn network_type(&self) -> NetworkType {
        NetworkType::parse(&self.network).unwrap_or(NetworkType::Test)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Plaintext loopback listener, §6 "Wire API".
    pub plaintext_address: String,
    /// TLS loopback listener, §6 "Wire API".
    pub tls_address: String,
    pub allow_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    pub cache_size_mb: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_true")]
    pub enable_tls: bool,
    pub cert_path: String,
    pub key_path: String,
}

fn default_true() -> bool {
    true
}

/// Fee model: satoshis per kilobyte, per §4.4's funder contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    #[serde(default = "default_sat_per_kb")]
    pub sat_per_kb: u64,
}

fn default_sat_per_kb() -> u64 {
    100
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            sat_per_kb: default_sat_per_kb(),
        }
    }
}

/// Commission enforcement, §3 "Commission".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub satoshis: u64,
    #[serde(default)]
    pub public_key_hex: String,
}

impl Default for CommissionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            satoshis: 0,
            public_key_hex: String::new(),
        }
    }
}

/// Monitor Daemon tick periods, §4.6. Defaults recorded in DESIGN.md's
/// Open Question resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_send_waiting_secs")]
    pub send_waiting_period_secs: u64,
    #[serde(default = "default_unfail_secs")]
    pub unfail_period_secs: u64,
    #[serde(default = "default_escalate_secs")]
    pub escalate_attempts_period_secs: u64,
    #[serde(default = "default_sync_secs")]
    pub sync_statuses_period_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_send_waiting_age_secs")]
    pub send_waiting_min_age_secs: i64,
}

fn default_send_waiting_secs() -> u64 {
    15
}
fn default_unfail_secs() -> u64 {
    30
}
fn default_escalate_secs() -> u64 {
    60
}
fn default_sync_secs() -> u64 {
    20
}
fn default_max_attempts() -> u32 {
    10
}
fn default_send_waiting_age_secs() -> i64 {
    30
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            send_waiting_period_secs: default_send_waiting_secs(),
            unfail_period_secs: default_unfail_secs(),
            escalate_attempts_period_secs: default_escalate_secs(),
            sync_statuses_period_secs: default_sync_secs(),
            max_attempts: default_max_attempts(),
            send_waiting_min_age_secs: default_send_waiting_age_secs(),
        }
    }
}

/// Time-partitioned dedup map parameters, §4.5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_dedup_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_dedup_bucket_secs")]
    pub bucket_secs: u64,
}

fn default_dedup_window_secs() -> u64 {
    60
}
fn default_dedup_bucket_secs() -> u64 {
    1
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_secs: default_dedup_window_secs(),
            bucket_secs: default_dedup_bucket_secs(),
        }
    }
}

/// Permission-gate HTTP bridge, §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGateConfig {
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,
    #[serde(default = "default_gate_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub auto_approve: bool,
}

fn default_bridge_url() -> String {
    "http://127.0.0.1:3322".to_string()
}
fn default_gate_timeout_secs() -> u64 {
    125
}

impl Default for PermissionGateConfig {
    fn default() -> Self {
        Self {
            bridge_url: default_bridge_url(),
            timeout_secs: default_gate_timeout_secs(),
            auto_approve: false,
        }
    }
}

/// Services collaborator endpoint (§4.4a): the external broadcaster/
/// chain-header node this daemon reaches `PostBEEF` and merkle-path
/// lookups through. Distinct from `permission_gate.bridge_url`, which
/// fronts consent prompts, not transaction broadcast.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// When set, the daemon dials `HttpServices` at this base URL instead
    /// of the in-memory `MockServices`. Left unset, the daemon runs fully
    /// offline.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Config {
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self {
            node: NodeConfig {
                name: "gebunden".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                network: "test".to_string(),
            },
            rpc: RpcConfig {
                plaintext_address: "127.0.0.1:3321".to_string(),
                tls_address: "127.0.0.1:2121".to_string(),
                allow_origins: vec!["*".to_string()],
            },
            storage: StorageConfig {
                data_dir: String::new(), // auto-configured
                cache_size_mb: 64,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
                output: "stdout".to_string(),
                file_path: "./logs/gebunden.log".to_string(),
            },
            security: SecurityConfig {
                enable_tls: true,
                cert_path: String::new(),
                key_path: String::new(),
            },
            fee: FeeConfig::default(),
            commission: CommissionConfig::default(),
            monitor: MonitorConfig::default(),
            dedup: DedupConfig::default(),
            permission_gate: PermissionGateConfig::default(),
            services: ServicesConfig::default(),
        }
    }

    pub fn load_from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn load_or_create(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let data_dir = get_data_dir();
        fs::create_dir_all(&data_dir)?;

        if fs::metadata(path).is_ok() {
            let mut config = Self::load_from_file(path)?;
            if config.storage.data_dir.is_empty() || config.storage.data_dir.starts_with("./") {
                config.storage.data_dir = data_dir.to_string_lossy().to_string();
            }
            Ok(config)
        } else {
            let mut config = Config::default();
            config.storage.data_dir = data_dir.to_string_lossy().to_string();
            config.save_to_file(path)?;
            Ok(config)
        }
    }

    pub fn save_to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrips_through_toml() {
        let cfg = Config::default();
        let s = toml::to_string_pretty(&cfg).unwrap();
        let back: Config = toml::from_str(&s).unwrap();
        assert_eq!(back.node.name, cfg.node.name);
        assert_eq!(back.fee.sat_per_kb, cfg.fee.sat_per_kb);
    }

    #[test]
    fn load_or_create_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path_str = path.to_str().unwrap();
        let cfg = Config::load_or_create(path_str).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.node.name, "gebunden");
    }
}
