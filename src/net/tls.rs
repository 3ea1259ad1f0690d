use super::{CertificateError, NetError};
use rustls::client::ServerName;
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore};
use rustls_pemfile::{certs, ec_private_keys, pkcs8_private_keys, rsa_private_keys};
use std::convert::TryFrom;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

/// Client-side TLS material for one peer target.
#[derive(Clone)]
pub struct TlsSettings {
    pub config: Arc<ClientConfig>,
    pub server_name: ServerName,
}

impl fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field("server_name", &self.server_name)
            .finish()
    }
}

/// Inputs needed to secure the connection to a peer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsInputs<'a> {
    /// PEM certificate the peer presents (or its issuing CA).
    pub peer_cert_pem: Option<&'a str>,
    /// Hostname the certificate is issued to, when it differs from the address.
    pub host_override: Option<&'a str>,
    pub extra_ca_pems: &'a [String],
    pub client_cert_pem: Option<&'a str>,
    pub client_key_pem: Option<&'a str>,
}

impl TlsSettings {
    pub fn build(address: &str, inputs: TlsInputs<'_>) -> Result<Self, NetError> {
        let roots = trust_roots(inputs.peer_cert_pem, inputs.extra_ca_pems)?;
        let builder = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots);
        let config = match (inputs.client_cert_pem, inputs.client_key_pem) {
            (Some(cert), Some(key)) => {
                let chain = load_certs_pem(cert)?;
                if chain.is_empty() {
                    return Err(CertificateError::IdentityChainEmpty.into());
                }
                builder.with_client_auth_cert(chain, load_private_key_pem(key)?)?
            }
            (None, Some(_)) => return Err(CertificateError::KeyWithoutCertificate.into()),
            _ => builder.with_no_client_auth(),
        };
        Ok(Self {
            config: Arc::new(config),
            server_name: server_name(address, inputs.host_override)?,
        })
    }
}

fn trust_roots(peer_cert_pem: Option<&str>, extra: &[String]) -> Result<RootCertStore, NetError> {
    let mut raw = Vec::new();
    for pem in peer_cert_pem.into_iter().chain(extra.iter().map(String::as_str)) {
        raw.extend(load_certs_pem(pem)?.into_iter().map(|cert| cert.0));
    }
    if raw.is_empty() {
        return Err(CertificateError::TrustBundleEmpty.into());
    }
    let mut store = RootCertStore::empty();
    let (added, _skipped) = store.add_parsable_certificates(&raw);
    if added == 0 {
        return Err(CertificateError::TrustBundleUnparsable.into());
    }
    Ok(store)
}

pub fn load_certs_pem(pem: &str) -> Result<Vec<Certificate>, NetError> {
    let mut reader = Cursor::new(pem.as_bytes());
    let raw = certs(&mut reader).map_err(|_| CertificateError::InvalidCertificatePem)?;
    Ok(raw.into_iter().map(Certificate).collect())
}

pub fn load_private_key_pem(pem: &str) -> Result<PrivateKey, NetError> {
    let mut reader = Cursor::new(pem.as_bytes());
    let keys = pkcs8_private_keys(&mut reader).map_err(|_| CertificateError::InvalidPkcs8Key)?;
    if let Some(key) = keys.into_iter().next() {
        return Ok(PrivateKey(key));
    }

    let mut reader = Cursor::new(pem.as_bytes());
    let keys = rsa_private_keys(&mut reader).map_err(|_| CertificateError::InvalidRsaKey)?;
    if let Some(key) = keys.into_iter().next() {
        return Ok(PrivateKey(key));
    }

    let mut reader = Cursor::new(pem.as_bytes());
    let keys = ec_private_keys(&mut reader).map_err(|_| CertificateError::InvalidEcKey)?;
    if let Some(key) = keys.into_iter().next() {
        return Ok(PrivateKey(key));
    }

    Err(CertificateError::MissingPrivateKey.into())
}

/// Resolves the name to verify the peer certificate against.
pub fn server_name(address: &str, host_override: Option<&str>) -> Result<ServerName, NetError> {
    let host = match host_override.filter(|host| !host.is_empty()) {
        Some(host) => host,
        None => host_of(address),
    };
    ServerName::try_from(host).map_err(|_| {
        CertificateError::InvalidDnsName {
            host: host.to_string(),
        }
        .into()
    })
}

fn host_of(address: &str) -> &str {
    if let Some(rest) = address.strip_prefix('[') {
        if let Some((host, _)) = rest.split_once(']') {
            return host;
        }
    }
    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            host
        }
        _ => address,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_is_taken_from_address() {
        assert_eq!(host_of("peer0.org1.example.com:7051"), "peer0.org1.example.com");
        assert_eq!(host_of("[::1]:7051"), "::1");
        assert_eq!(host_of("localhost"), "localhost");
    }

    #[test]
    fn override_wins_over_address() {
        let name = server_name("127.0.0.1:7051", Some("peer0.org1.example.com")).unwrap();
        assert_eq!(
            name,
            ServerName::try_from("peer0.org1.example.com").unwrap()
        );
    }

    #[test]
    fn missing_roots_are_rejected() {
        let err = TlsSettings::build("peer0:7051", TlsInputs::default()).unwrap_err();
        assert!(matches!(
            err,
            NetError::Certificate(CertificateError::TrustBundleEmpty)
        ));
    }
}
