//! Peers and the endorsement client they own.

pub mod endorser;

use crate::config::EndpointConfig;
use crate::context::CallContext;
use crate::net::{ConnectionManager, NetError};
use crate::status::Status;
use crate::util::PinFuture;
use crate::wire::{ProposalResponse, SignedProposal};
use std::sync::Arc;
use thiserror::Error;

pub use endorser::{EndorserRequest, PeerEndorser};

#[derive(Debug, Error)]
pub enum EndorserError {
    #[error("target is required")]
    InvalidTarget,
    #[error("TLS configuration failed: {0}")]
    TlsConfig(#[source] NetError),
}

/// Signed proposal as sent to an endorser; opaque to the transport.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessProposalRequest {
    pub signed_proposal: SignedProposal,
}

/// Endorsement returned by one peer.
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionProposalResponse {
    pub proposal_response: ProposalResponse,
    /// Address of the peer that produced the response.
    pub endorser: String,
    /// Status reported by the chaincode itself.
    pub chaincode_status: i32,
    /// Top-level response status.
    pub status: i32,
}

/// A peer that can endorse proposals.
pub trait Peer: Send + Sync {
    fn url(&self) -> &str;

    fn msp_id(&self) -> &str;

    fn process_transaction_proposal<'a>(
        &'a self,
        ctx: &'a CallContext,
        request: &'a ProcessProposalRequest,
    ) -> PinFuture<'a, Result<TransactionProposalResponse, Status>>;
}

#[derive(Clone, Debug, Default)]
pub struct PeerConfig {
    pub url: String,
    pub msp_id: String,
    pub tls_cert_pem: Option<String>,
    pub server_host_override: Option<String>,
}

/// A peer reached over the network through a [`PeerEndorser`].
pub struct NetworkPeer {
    url: String,
    msp_id: String,
    endorser: PeerEndorser,
}

impl NetworkPeer {
    pub fn new(
        peer: PeerConfig,
        config: Arc<EndpointConfig>,
        comm_manager: Arc<dyn ConnectionManager>,
    ) -> Result<Self, EndorserError> {
        let mut request = EndorserRequest::new(peer.url.clone(), config, comm_manager);
        if let Some(pem) = peer.tls_cert_pem {
            request = request.with_certificate(pem);
        }
        if let Some(host) = peer.server_host_override {
            request = request.with_server_host_override(host);
        }
        Ok(Self {
            endorser: PeerEndorser::new(request)?,
            url: peer.url,
            msp_id: peer.msp_id,
        })
    }

    pub fn endorser(&self) -> &PeerEndorser {
        &self.endorser
    }
}

impl Peer for NetworkPeer {
    fn url(&self) -> &str {
        &self.url
    }

    fn msp_id(&self) -> &str {
        &self.msp_id
    }

    fn process_transaction_proposal<'a>(
        &'a self,
        ctx: &'a CallContext,
        request: &'a ProcessProposalRequest,
    ) -> PinFuture<'a, Result<TransactionProposalResponse, Status>> {
        Box::pin(self.endorser.process_transaction_proposal(ctx, request))
    }
}

impl std::fmt::Debug for NetworkPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkPeer")
            .field("url", &self.url)
            .field("msp_id", &self.msp_id)
            .field("secured", &self.endorser.is_secured())
            .finish()
    }
}
