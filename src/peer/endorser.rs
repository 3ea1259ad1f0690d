//! Endorsement client: one logical remote peer target.

use super::{EndorserError, ProcessProposalRequest, TransactionProposalResponse};
use crate::config::EndpointConfig;
use crate::context::{CallContext, ContextError};
use crate::net::frame::OP_PROCESS_PROPOSAL;
use crate::net::tls::TlsInputs;
use crate::net::{
    attempt_secured, to_address, ConnectionLease, ConnectionManager, DialError, DialOptions,
    RpcCode, RpcStatus, TlsSettings,
};
use crate::status::{decode_remote_error, ClientCode, Status};
use crate::timeouts::{TimeoutType, MAX_CALL_RECV_MSG_SIZE, MAX_CALL_SEND_MSG_SIZE};
use crate::wire::ProposalResponse;
use log::{debug, error};
use prost::Message;
use std::sync::Arc;
use std::time::Duration;

/// Target descriptor an endorser is built from.
#[derive(Clone)]
pub struct EndorserRequest {
    pub target: String,
    /// PEM certificate presented by the peer, or its issuing CA.
    pub certificate_pem: Option<String>,
    pub server_host_override: Option<String>,
    pub config: Arc<EndpointConfig>,
    pub allow_insecure: bool,
    pub comm_manager: Arc<dyn ConnectionManager>,
}

impl EndorserRequest {
    pub fn new(
        target: impl Into<String>,
        config: Arc<EndpointConfig>,
        comm_manager: Arc<dyn ConnectionManager>,
    ) -> Self {
        let allow_insecure = config.allow_insecure;
        Self {
            target: target.into(),
            certificate_pem: None,
            server_host_override: None,
            config,
            allow_insecure,
            comm_manager,
        }
    }

    pub fn with_certificate(mut self, pem: impl Into<String>) -> Self {
        self.certificate_pem = Some(pem.into());
        self
    }

    pub fn with_server_host_override(mut self, host: impl Into<String>) -> Self {
        self.server_host_override = Some(host.into());
        self
    }

    pub fn with_allow_insecure(mut self, allow: bool) -> Self {
        self.allow_insecure = allow;
        self
    }
}

/// Sends signed proposals to a single peer over a pooled connection.
pub struct PeerEndorser {
    target: String,
    dial_options: DialOptions,
    dial_timeout: Duration,
    comm_manager: Arc<dyn ConnectionManager>,
}

impl PeerEndorser {
    pub fn new(request: EndorserRequest) -> Result<Self, EndorserError> {
        if request.target.is_empty() {
            return Err(EndorserError::InvalidTarget);
        }
        let target = to_address(&request.target).to_string();
        if target.is_empty() {
            return Err(EndorserError::InvalidTarget);
        }

        let tls = if attempt_secured(&request.target, request.allow_insecure) {
            let inputs = TlsInputs {
                peer_cert_pem: request.certificate_pem.as_deref(),
                host_override: request.server_host_override.as_deref(),
                extra_ca_pems: &request.config.tls_ca_certs,
                client_cert_pem: request.config.client_cert.as_deref(),
                client_key_pem: request.config.client_key.as_deref(),
            };
            Some(TlsSettings::build(&target, inputs).map_err(EndorserError::TlsConfig)?)
        } else {
            None
        };

        Ok(Self {
            dial_options: DialOptions {
                tls,
                max_send_msg_size: MAX_CALL_SEND_MSG_SIZE,
                max_recv_msg_size: MAX_CALL_RECV_MSG_SIZE,
            },
            dial_timeout: request
                .config
                .timeout_or_default(TimeoutType::EndorserConnection),
            comm_manager: request.comm_manager,
            target,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_secured(&self) -> bool {
        self.dial_options.tls.is_some()
    }

    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    /// Sends the proposal and classifies the outcome. Failures carry the
    /// target address in [`Status::endpoint`].
    pub async fn process_transaction_proposal(
        &self,
        ctx: &CallContext,
        request: &ProcessProposalRequest,
    ) -> Result<TransactionProposalResponse, Status> {
        debug!("event=endorser_process_proposal target={}", self.target);
        match self.send_proposal(ctx, request).await {
            Ok(response) => Ok(TransactionProposalResponse {
                endorser: self.target.clone(),
                status: response.response_status(),
                chaincode_status: response.chaincode_status(),
                proposal_response: response,
            }),
            Err(status) => {
                error!(
                    "event=endorser_proposal_failed target={} error={}",
                    self.target, status
                );
                Err(status.with_endpoint(self.target.clone()))
            }
        }
    }

    async fn send_proposal(
        &self,
        ctx: &CallContext,
        request: &ProcessProposalRequest,
    ) -> Result<ProposalResponse, Status> {
        let payload = request.signed_proposal.encode_to_vec();
        let mut lease = self.connect(ctx).await?;
        let reply = match ctx.run(lease.call(OP_PROCESS_PROPOSAL, &payload)).await {
            Ok(reply) => reply,
            Err(err) => Err(context_status(err)),
        };
        drop(lease);

        let bytes = reply.map_err(|rpc| decode_remote_error(&rpc).into_status())?;
        ProposalResponse::decode(bytes.as_slice()).map_err(|err| {
            Status::from_rpc(&RpcStatus::new(
                RpcCode::Internal,
                format!("failed to decode proposal response: {err}"),
            ))
        })
    }

    /// Acquires a connection within `min(ctx deadline, now + dial timeout)`.
    async fn connect(&self, ctx: &CallContext) -> Result<ConnectionLease, Status> {
        let manager = ctx
            .comm_manager()
            .cloned()
            .unwrap_or_else(|| self.comm_manager.clone());
        let dial_ctx = ctx.child_with_timeout(self.dial_timeout);
        let dialed = dial_ctx
            .run(manager.dial(&self.target, &self.dial_options))
            .await;
        dial_ctx.cancel();
        match dialed {
            Ok(Ok(conn)) => Ok(ConnectionLease::new(manager, conn)),
            Ok(Err(DialError::Status(rpc))) => Err(Status::endorser_client(
                ClientCode::ConnectionFailed,
                format!("connection failed: {}", rpc.message),
            )
            .with_transport(rpc)),
            Ok(Err(err)) => Err(connection_failed(&self.target, &err.to_string())),
            Err(err) => Err(connection_failed(&self.target, &err.to_string())),
        }
    }
}

fn connection_failed(target: &str, details: &str) -> Status {
    Status::endorser_client(
        ClientCode::ConnectionFailed,
        format!("connection to {target} failed: {details}"),
    )
}

fn context_status(err: ContextError) -> RpcStatus {
    match err {
        ContextError::DeadlineExceeded => {
            RpcStatus::new(RpcCode::DeadlineExceeded, err.to_string())
        }
        ContextError::Cancelled => RpcStatus::new(RpcCode::Cancelled, err.to_string()),
    }
}
