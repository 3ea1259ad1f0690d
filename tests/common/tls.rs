#![allow(dead_code)]

use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair};
use rustls::server::AllowAnyAuthenticatedClient;
use rustls::{PrivateKey, RootCertStore, ServerConfig};
use std::error::Error;
use std::sync::Arc;

/// A CA plus server and client leaves issued by it, as PEM.
pub struct TlsFixtures {
    pub ca_pem: String,
    pub server_chain_pem: String,
    pub server_key_pem: String,
    pub client_chain_pem: String,
    pub client_key_pem: String,
}

pub fn generate_tls_materials(dns_names: &[&str]) -> Result<TlsFixtures, Box<dyn Error>> {
    let ca_key = KeyPair::generate()?;
    let ca_cert = ca_params().self_signed(&ca_key)?;
    let (server_chain_pem, server_key_pem) = issue(&ca_cert, &ca_key, dns_names)?;
    let (client_chain_pem, client_key_pem) = issue(&ca_cert, &ca_key, &["client"])?;
    Ok(TlsFixtures {
        ca_pem: ca_cert.pem(),
        server_chain_pem,
        server_key_pem,
        client_chain_pem,
        client_key_pem,
    })
}

impl TlsFixtures {
    /// Server config for the endorsing peer; `mutual` requires a client
    /// certificate issued by the same CA.
    pub fn server_config(&self, mutual: bool) -> Result<Arc<ServerConfig>, Box<dyn Error>> {
        let chain = fabcore::net::tls::load_certs_pem(&self.server_chain_pem)?;
        let key: PrivateKey = fabcore::net::tls::load_private_key_pem(&self.server_key_pem)?;
        let builder = ServerConfig::builder().with_safe_defaults();
        let config = if mutual {
            let mut roots = RootCertStore::empty();
            for cert in fabcore::net::tls::load_certs_pem(&self.ca_pem)? {
                roots.add(&cert)?;
            }
            builder
                .with_client_cert_verifier(Arc::new(AllowAnyAuthenticatedClient::new(roots)))
                .with_single_cert(chain, key)?
        } else {
            builder.with_no_client_auth().with_single_cert(chain, key)?
        };
        Ok(Arc::new(config))
    }
}

fn ca_params() -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = {
        let mut dn = rcgen::DistinguishedName::new();
        dn.push(DnType::CommonName, "test-ca");
        dn
    };
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
}

fn issue(
    ca_cert: &Certificate,
    ca_key: &KeyPair,
    dns_names: &[&str],
) -> Result<(String, String), Box<dyn Error>> {
    let mut params = CertificateParams::new(
        dns_names
            .iter()
            .map(|name| (*name).to_string())
            .collect::<Vec<_>>(),
    )?;
    if let Some(primary) = dns_names.first() {
        params.distinguished_name.push(DnType::CommonName, *primary);
    }
    let key = KeyPair::generate()?;
    let cert = params.signed_by(&key, ca_cert, ca_key)?;
    let mut chain = cert.pem();
    chain.push_str(&ca_cert.pem());
    Ok((chain, key.serialize_pem()))
}
