//! Endpoint configuration consumed by the endorsement client, the membership
//! cache and the channel client.
//!
//! Only the in-memory shape lives here; resolving configuration files or
//! backends is left to the embedding application.

use crate::timeouts::TimeoutType;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid endpoint configuration: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid root key for MSP {msp_id}: {details}")]
    InvalidRootKey { msp_id: String, details: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Per-category timeout overrides in milliseconds.
    pub timeouts: HashMap<TimeoutType, u64>,
    /// Allow plaintext dialing for addresses without an explicit scheme.
    pub allow_insecure: bool,
    /// Additional PEM encoded CA certificates trusted for peer TLS.
    pub tls_ca_certs: Vec<String>,
    /// PEM encoded client certificate chain for mutual TLS.
    pub client_cert: Option<String>,
    /// PEM encoded private key matching `client_cert`.
    pub client_key: Option<String>,
    /// Extra hex encoded ed25519 root keys per MSP id.
    pub msp_roots: BTreeMap<String, Vec<String>>,
}

impl EndpointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(ConfigError::from)
    }

    pub fn with_timeout(mut self, kind: TimeoutType, timeout: Duration) -> Self {
        self.timeouts.insert(kind, timeout.as_millis() as u64);
        self
    }

    pub fn with_allow_insecure(mut self, allow: bool) -> Self {
        self.allow_insecure = allow;
        self
    }

    pub fn with_tls_ca_cert(mut self, pem: impl Into<String>) -> Self {
        self.tls_ca_certs.push(pem.into());
        self
    }

    pub fn with_msp_root(mut self, msp_id: impl Into<String>, root_key: &[u8; 32]) -> Self {
        self.msp_roots
            .entry(msp_id.into())
            .or_default()
            .push(hex::encode(root_key));
        self
    }

    /// Returns the configured timeout for `kind`, or the crate default when
    /// none (or zero) is configured.
    pub fn timeout_or_default(&self, kind: TimeoutType) -> Duration {
        match self.timeouts.get(&kind) {
            Some(ms) if *ms > 0 => Duration::from_millis(*ms),
            _ => kind.default_timeout(),
        }
    }

    /// Decodes the configured extra roots for `msp_id`.
    pub fn msp_root_keys(&self, msp_id: &str) -> Result<Vec<[u8; 32]>, ConfigError> {
        let Some(encoded) = self.msp_roots.get(msp_id) else {
            return Ok(Vec::new());
        };
        encoded
            .iter()
            .map(|value| {
                let bytes = hex::decode(value).map_err(|err| ConfigError::InvalidRootKey {
                    msp_id: msp_id.to_string(),
                    details: err.to_string(),
                })?;
                <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| ConfigError::InvalidRootKey {
                    msp_id: msp_id.to_string(),
                    details: format!("expected 32 bytes, found {}", bytes.len()),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_falls_back_to_default() {
        let config = EndpointConfig::new().with_timeout(TimeoutType::Query, Duration::ZERO);
        assert_eq!(
            config.timeout_or_default(TimeoutType::Query),
            TimeoutType::Query.default_timeout()
        );
        assert_eq!(
            config.timeout_or_default(TimeoutType::EndorserConnection),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn decodes_json_overrides() {
        let config = EndpointConfig::from_json(
            r#"{"timeouts":{"execute":2500,"discovery_greylist_expiry":50},"allow_insecure":true}"#,
        )
        .expect("config");
        assert!(config.allow_insecure);
        assert_eq!(
            config.timeout_or_default(TimeoutType::Execute),
            Duration::from_millis(2500)
        );
        assert_eq!(
            config.timeout_or_default(TimeoutType::DiscoveryGreylistExpiry),
            Duration::from_millis(50)
        );
    }

    #[test]
    fn rejects_short_root_keys() {
        let mut config = EndpointConfig::new();
        config
            .msp_roots
            .insert("Org1MSP".into(), vec!["abcd".into()]);
        let err = config.msp_root_keys("Org1MSP").unwrap_err();
        assert!(err.to_string().contains("expected 32 bytes"));
        assert!(config.msp_root_keys("Org2MSP").unwrap().is_empty());
    }
}
