//! Channel MSP definitions and identity checks.
//!
//! A member identity is a [`SerializedIdentity`] whose `id_bytes` hold a
//! [`MemberCertificate`]: the member's ed25519 public key signed by one of
//! its MSP's root keys.

use super::MembershipError;
use crate::config::EndpointConfig;
use crate::wire::{MemberCertificate, SerializedIdentity};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use prost::Message;
use std::collections::HashMap;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MspConfig {
    pub msp_id: String,
    pub root_keys: Vec<[u8; 32]>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelConfig {
    pub channel_id: String,
    pub msps: Vec<MspConfig>,
}

impl ChannelConfig {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            msps: Vec::new(),
        }
    }

    pub fn with_msp(mut self, msp_id: impl Into<String>, root_keys: Vec<[u8; 32]>) -> Self {
        self.msps.push(MspConfig {
            msp_id: msp_id.into(),
            root_keys,
        });
        self
    }
}

/// Trusted roots per MSP for one channel.
pub(crate) struct MspManager {
    roots: HashMap<String, Vec<VerifyingKey>>,
}

impl MspManager {
    /// Builds the manager from the channel's MSPs plus any extra roots the
    /// endpoint configuration adds for them.
    pub(crate) fn new(
        config: &ChannelConfig,
        endpoint: &EndpointConfig,
    ) -> Result<Self, MembershipError> {
        let mut roots: HashMap<String, Vec<VerifyingKey>> = HashMap::new();
        for msp in &config.msps {
            let extra = endpoint
                .msp_root_keys(&msp.msp_id)
                .map_err(|err| MembershipError::InvalidConfig(err.to_string()))?;
            let keys = roots.entry(msp.msp_id.clone()).or_default();
            for raw in msp.root_keys.iter().chain(extra.iter()) {
                let key = VerifyingKey::from_bytes(raw).map_err(|_| {
                    MembershipError::InvalidConfig(format!(
                        "invalid root key for MSP {}",
                        msp.msp_id
                    ))
                })?;
                keys.push(key);
            }
        }
        Ok(Self { roots })
    }

    pub(crate) fn msp_count(&self) -> usize {
        self.roots.len()
    }

    /// Checks the identity is well formed and issued by a trusted root,
    /// returning the member key.
    pub(crate) fn validate(&self, identity: &[u8]) -> Result<VerifyingKey, MembershipError> {
        let identity = SerializedIdentity::decode(identity)
            .map_err(|err| MembershipError::MalformedIdentity(err.to_string()))?;
        let roots = self
            .roots
            .get(&identity.mspid)
            .ok_or_else(|| MembershipError::UnknownMsp(identity.mspid.clone()))?;
        let certificate = MemberCertificate::decode(identity.id_bytes.as_slice())
            .map_err(|err| MembershipError::MalformedIdentity(err.to_string()))?;

        let key_bytes: [u8; 32] = certificate
            .public_key
            .as_slice()
            .try_into()
            .map_err(|_| MembershipError::MalformedIdentity("public key must be 32 bytes".into()))?;
        let member_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|_| MembershipError::MalformedIdentity("invalid public key".into()))?;
        let signature = signature_from(&certificate.issuer_signature)
            .ok_or_else(|| MembershipError::UntrustedIdentity(identity.mspid.clone()))?;

        if roots
            .iter()
            .any(|root| root.verify(&certificate.public_key, &signature).is_ok())
        {
            Ok(member_key)
        } else {
            Err(MembershipError::UntrustedIdentity(identity.mspid))
        }
    }

    pub(crate) fn verify(
        &self,
        identity: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), MembershipError> {
        let member_key = self.validate(identity)?;
        let signature = signature_from(signature)
            .ok_or_else(|| MembershipError::InvalidSignature("signature must be 64 bytes".into()))?;
        member_key
            .verify(message, &signature)
            .map_err(|err| MembershipError::InvalidSignature(err.to_string()))
    }
}

fn signature_from(bytes: &[u8]) -> Option<Signature> {
    let bytes: [u8; 64] = bytes.try_into().ok()?;
    Some(Signature::from_bytes(&bytes))
}

/// Issues a serialized identity for `member` under `root`.
pub fn issue_identity(msp_id: &str, root: &SigningKey, member: &VerifyingKey) -> Vec<u8> {
    let public_key = member.to_bytes().to_vec();
    let certificate = MemberCertificate {
        issuer_signature: root.sign(&public_key).to_bytes().to_vec(),
        public_key,
    };
    SerializedIdentity {
        mspid: msp_id.to_string(),
        id_bytes: certificate.encode_to_vec(),
    }
    .encode_to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (SigningKey, SigningKey, MspManager) {
        let root = SigningKey::from_bytes(&[7u8; 32]);
        let member = SigningKey::from_bytes(&[9u8; 32]);
        let config = ChannelConfig::new("mychannel")
            .with_msp("Org1MSP", vec![root.verifying_key().to_bytes()]);
        let manager = MspManager::new(&config, &EndpointConfig::new()).unwrap();
        (root, member, manager)
    }

    #[test]
    fn validates_and_verifies_member() {
        let (root, member, manager) = fixture();
        let identity = issue_identity("Org1MSP", &root, &member.verifying_key());
        assert!(manager.validate(&identity).is_ok());
        let signature = member.sign(b"payload").to_bytes();
        assert!(manager.verify(&identity, b"payload", &signature).is_ok());
        let err = manager.verify(&identity, b"tampered", &signature).unwrap_err();
        assert!(matches!(err, MembershipError::InvalidSignature(_)));
    }

    #[test]
    fn rejects_foreign_issuer_and_unknown_msp() {
        let (_, member, manager) = fixture();
        let rogue = SigningKey::from_bytes(&[3u8; 32]);
        let identity = issue_identity("Org1MSP", &rogue, &member.verifying_key());
        assert!(matches!(
            manager.validate(&identity),
            Err(MembershipError::UntrustedIdentity(_))
        ));
        let identity = issue_identity("Org2MSP", &rogue, &member.verifying_key());
        assert!(matches!(
            manager.validate(&identity),
            Err(MembershipError::UnknownMsp(msp)) if msp == "Org2MSP"
        ));
        assert!(matches!(
            manager.validate(b"\xff\xff"),
            Err(MembershipError::MalformedIdentity(_))
        ));
    }

    #[test]
    fn endpoint_roots_extend_channel_msps() {
        let (_, member, _) = fixture();
        let extra_root = SigningKey::from_bytes(&[5u8; 32]);
        let config = ChannelConfig::new("mychannel").with_msp("Org1MSP", Vec::new());
        let endpoint =
            EndpointConfig::new().with_msp_root("Org1MSP", &extra_root.verifying_key().to_bytes());
        let manager = MspManager::new(&config, &endpoint).unwrap();
        assert_eq!(manager.msp_count(), 1);
        let identity = issue_identity("Org1MSP", &extra_root, &member.verifying_key());
        assert!(manager.validate(&identity).is_ok());
    }
}
