//! External permission gate: an HTTP bridge the façade blocks on for
//! sensitive method calls (§4.7, §6, §9). A local operator (or another
//! process entirely) answers `approved`/`denied` out of band.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::PermissionGateConfig;
use crate::storage::repo;

#[derive(Debug, Clone, Serialize)]
pub struct PermissionRequest<'a> {
    pub id: &'a str,
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub app: &'a str,
    pub origin: &'a str,
    pub message: &'a str,
    pub amount: Option<i64>,
    pub timestamp: i64,
    #[serde(rename = "extraData")]
    pub extra_data: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PermissionResponse {
    pub id: String,
    pub approved: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PermissionGateError {
    #[error("permission bridge request failed: {0}")]
    Network(String),
    #[error("permission bridge returned malformed response: {0}")]
    Malformed(String),
    #[error("permission bridge timed out")]
    Timeout,
}

/// Blocks on the external gate's HTTP response; the bound is the gate's
/// configured timeout (≈130 s default, "slightly over 120 seconds").
pub struct PermissionGate {
    client: reqwest::Client,
    config: PermissionGateConfig,
}

impl PermissionGate {
    pub fn new(config: PermissionGateConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("reqwest client");
        Self { client, config }
    }

    /// §6 sensitive methods (`createAction`, `decrypt`,
    /// `revealCounterpartyKeyLinkage`, `revealSpecificKeyLinkage`,
    /// `proveCertificate`, `relinquishCertificate`) call this and block
    /// until `approved` or `denied` comes back. A non-2xx reply, a network
    /// failure, or a timeout are all treated as denied.
    pub async fn request_permission(
        &self,
        request_type: &str,
        app: &str,
        origin: &str,
        message: &str,
        amount: Option<i64>,
        extra_data: &str,
    ) -> Result<PermissionResponse, PermissionGateError> {
        let id = repo::new_reference();
        if self.config.auto_approve {
            return Ok(PermissionResponse {
                id,
                approved: true,
                reason: None,
            });
        }

        let request = PermissionRequest {
            id: &id,
            kind: request_type,
            app,
            origin,
            message,
            amount,
            timestamp: chrono::Utc::now().timestamp(),
            extra_data,
        };

        let resp = self
            .client
            .post(format!("{}/request-permission", self.config.bridge_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PermissionGateError::Timeout
                } else {
                    PermissionGateError::Network(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Ok(PermissionResponse {
                id,
                approved: false,
                reason: Some(format!("bridge returned status {}", resp.status())),
            });
        }

        resp.json()
            .await
            .map_err(|e| PermissionGateError::Malformed(e.to_string()))
    }
}

pub const SENSITIVE_METHODS: &[&str] = &[
    "createAction",
    "decrypt",
    "revealCounterpartyKeyLinkage",
    "revealSpecificKeyLinkage",
    "proveCertificate",
    "relinquishCertificate",
];

pub fn requires_permission(method: &str) -> bool {
    SENSITIVE_METHODS.contains(&method)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn auto_approve_short_circuits_the_network_call() {
        let gate = PermissionGate::new(PermissionGateConfig {
            bridge_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 1,
            auto_approve: true,
        });
        let decision = gate
            .request_permission("createAction", "wallet", "origin", "spend 1000 sats", Some(1000), "{}")
            .await
            .unwrap();
        assert!(decision.approved);
    }

    #[test]
    fn sensitive_methods_match_the_configured_list() {
        assert!(requires_permission("createAction"));
        assert!(!requires_permission("getVersion"));
    }
}
