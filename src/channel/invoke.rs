//! Handler chain run by each invocation attempt, and the default query and
//! execute chains.

use super::events::{EventService, TX_VALID};
use super::request::{Request, RequestOptions, Response};
use super::transactor::Transactor;
use crate::context::CallContext;
use crate::discovery::{DiscoveryService, PeerFilter, SelectionService};
use crate::membership::ChannelMembership;
use crate::peer::{Peer, ProcessProposalRequest, TransactionProposalResponse};
use crate::status::{ClientCode, Status, StatusGroup};
use crate::util::{ClientError, PinFuture};
use crate::wire::{ERROR_THRESHOLD, STATUS_SUCCESS};
use log::debug;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Working state of one attempt. A fresh value is built for every attempt
/// from the caller's request and options.
pub struct RequestContext {
    pub request: Request,
    pub opts: RequestOptions,
    pub response: Response,
    pub error: Option<ClientError>,
    pub ctx: CallContext,
    pub selection_filter: PeerFilter,
}

impl RequestContext {
    pub fn new(
        request: Request,
        opts: RequestOptions,
        ctx: CallContext,
        selection_filter: PeerFilter,
    ) -> Self {
        Self {
            request,
            opts,
            response: Response::default(),
            error: None,
            ctx,
            selection_filter,
        }
    }

    pub fn fail(&mut self, err: impl Into<ClientError>) {
        self.error = Some(err.into());
    }

    /// Consumes the attempt into its outcome.
    pub fn into_outcome(self) -> Result<Response, ClientError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.response),
        }
    }
}

/// Collaborators shared by every attempt of an invocation.
#[derive(Clone)]
pub struct ClientContext {
    pub selection: Arc<dyn SelectionService>,
    pub discovery: Arc<dyn DiscoveryService>,
    pub membership: Arc<dyn ChannelMembership>,
    pub transactor: Arc<dyn Transactor>,
    pub event_service: Arc<dyn EventService>,
}

/// One step of an invocation. Outcomes are recorded on the request
/// context.
pub trait Handler: Send + Sync {
    fn handle<'a>(
        &'a self,
        request_ctx: &'a mut RequestContext,
        client_ctx: &'a ClientContext,
    ) -> PinFuture<'a, ()>;
}

/// Runs handlers in order, stopping at the first recorded error.
#[derive(Clone, Default)]
pub struct HandlerChain {
    handlers: Vec<Arc<dyn Handler>>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, handler: impl Handler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Handler for HandlerChain {
    fn handle<'a>(
        &'a self,
        request_ctx: &'a mut RequestContext,
        client_ctx: &'a ClientContext,
    ) -> PinFuture<'a, ()> {
        Box::pin(async move {
            for handler in &self.handlers {
                handler.handle(request_ctx, client_ctx).await;
                if request_ctx.error.is_some() {
                    return;
                }
            }
        })
    }
}

/// Endorse, validate endorsements and verify endorser signatures.
pub fn query_handler() -> HandlerChain {
    HandlerChain::new()
        .then(EndorsementHandler)
        .then(EndorsementValidationHandler)
        .then(SignatureValidationHandler)
}

/// The query chain followed by transaction submission and commit wait.
pub fn execute_handler() -> HandlerChain {
    query_handler().then(CommitTxHandler)
}

/// Selects endorsers, creates the proposal and collects endorsements from
/// every target concurrently.
pub struct EndorsementHandler;

impl Handler for EndorsementHandler {
    fn handle<'a>(
        &'a self,
        request_ctx: &'a mut RequestContext,
        client_ctx: &'a ClientContext,
    ) -> PinFuture<'a, ()> {
        Box::pin(async move {
            if request_ctx.opts.targets.is_empty() {
                let chaincodes = request_ctx.request.chaincodes();
                match client_ctx
                    .selection
                    .get_endorsers_for_chaincode(&chaincodes, &request_ctx.selection_filter)
                {
                    Ok(endorsers) => request_ctx.opts.targets = endorsers,
                    Err(err) => return request_ctx.fail(err),
                }
            }
            if request_ctx.opts.targets.is_empty() {
                return request_ctx.fail(Status::client(
                    ClientCode::NoPeersFound,
                    "no endorsing peers found",
                ));
            }

            let proposal = match client_ctx.transactor.create_proposal(&request_ctx.request) {
                Ok(proposal) => proposal,
                Err(err) => return request_ctx.fail(err),
            };
            debug!(
                "event=endorsement_send tx_id={} targets={:?}",
                proposal.tx_id,
                request_ctx.opts.target_urls()
            );

            let (responses, errors) = send_proposal(
                &request_ctx.ctx,
                &request_ctx.opts.targets,
                ProcessProposalRequest {
                    signed_proposal: proposal.signed_proposal.clone(),
                },
            )
            .await;
            request_ctx.response.transaction_id = proposal.tx_id.clone();
            request_ctx.response.proposal = Some(proposal);
            request_ctx.response.responses = responses;
            if !errors.is_empty() {
                request_ctx.fail(ClientError::multiple(errors));
            }
        })
    }
}

async fn send_proposal(
    ctx: &CallContext,
    targets: &[Arc<dyn Peer>],
    request: ProcessProposalRequest,
) -> (Vec<TransactionProposalResponse>, Vec<ClientError>) {
    let request = Arc::new(request);
    let mut tasks = JoinSet::new();
    for (index, peer) in targets.iter().enumerate() {
        let peer = peer.clone();
        let ctx = ctx.clone();
        let request = request.clone();
        tasks.spawn(async move {
            let result = peer.process_transaction_proposal(&ctx, &request).await;
            (index, peer.url().to_string(), result)
        });
    }

    let mut results = Vec::with_capacity(targets.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(err) => results.push((
                usize::MAX,
                String::new(),
                Err(Status::client(
                    ClientCode::Unknown,
                    format!("endorsement task failed: {err}"),
                )),
            )),
        }
    }
    results.sort_by_key(|(index, _, _)| *index);

    let mut responses = Vec::new();
    let mut errors = Vec::new();
    for (_, url, result) in results {
        match result {
            Ok(response) => responses.push(response),
            Err(status) if status.endpoint().is_none() && !url.is_empty() => {
                errors.push(status.with_endpoint(url).into())
            }
            Err(status) => errors.push(status.into()),
        }
    }
    (responses, errors)
}

/// Checks every endorsement succeeded and all endorsers agree on the result.
pub struct EndorsementValidationHandler;

impl Handler for EndorsementValidationHandler {
    fn handle<'a>(
        &'a self,
        request_ctx: &'a mut RequestContext,
        _client_ctx: &'a ClientContext,
    ) -> PinFuture<'a, ()> {
        Box::pin(async move {
            if let Err(status) = validate_endorsements(&request_ctx.response.responses) {
                return request_ctx.fail(status);
            }
            if let Some(first) = request_ctx.response.responses.first() {
                let payload = first
                    .proposal_response
                    .response
                    .as_ref()
                    .map(|response| response.payload.clone())
                    .unwrap_or_default();
                let chaincode_status = first.chaincode_status;
                request_ctx.response.payload = payload;
                request_ctx.response.chaincode_status = chaincode_status;
            }
        })
    }
}

fn validate_endorsements(responses: &[TransactionProposalResponse]) -> Result<(), Status> {
    for response in responses {
        if response.status != STATUS_SUCCESS {
            let message = response
                .proposal_response
                .response
                .as_ref()
                .map(|r| r.message.clone())
                .unwrap_or_default();
            return Err(
                Status::new(StatusGroup::EndorserServer, response.status, message)
                    .with_endpoint(response.endorser.clone()),
            );
        }
        if response.chaincode_status >= ERROR_THRESHOLD {
            return Err(Status::new(
                StatusGroup::Chaincode,
                response.chaincode_status,
                "chaincode returned an error status",
            )
            .with_endpoint(response.endorser.clone()));
        }
    }

    let mut payloads = responses.iter().map(|r| &r.proposal_response.payload);
    if let Some(first) = payloads.next() {
        if payloads.any(|payload| payload != first) {
            return Err(Status::endorser_client(
                ClientCode::EndorsementMismatch,
                "proposal responses do not match",
            ));
        }
    }
    Ok(())
}

/// Validates each endorser identity and verifies its endorsement signature
/// against the channel membership.
pub struct SignatureValidationHandler;

impl Handler for SignatureValidationHandler {
    fn handle<'a>(
        &'a self,
        request_ctx: &'a mut RequestContext,
        client_ctx: &'a ClientContext,
    ) -> PinFuture<'a, ()> {
        Box::pin(async move {
            for response in &request_ctx.response.responses {
                if let Err(status) = verify_endorsement(client_ctx.membership.as_ref(), response) {
                    return request_ctx.fail(status);
                }
            }
        })
    }
}

fn verify_endorsement(
    membership: &dyn ChannelMembership,
    response: &TransactionProposalResponse,
) -> Result<(), Status> {
    let endorsement = response
        .proposal_response
        .endorsement
        .as_ref()
        .ok_or_else(|| {
            Status::endorser_client(ClientCode::MissingEndorsement, "missing endorsement")
                .with_endpoint(response.endorser.clone())
        })?;
    let failed = |err: crate::membership::MembershipError| {
        Status::client(
            ClientCode::SignatureVerificationFailed,
            format!("endorser validation failed: {err}"),
        )
        .with_endpoint(response.endorser.clone())
    };
    membership.validate(&endorsement.endorser).map_err(failed)?;

    let mut message = response.proposal_response.payload.clone();
    message.extend_from_slice(&endorsement.endorser);
    membership
        .verify(&endorsement.endorser, &message, &endorsement.signature)
        .map_err(failed)
}

/// Submits the endorsed transaction and waits for its commit status.
pub struct CommitTxHandler;

impl Handler for CommitTxHandler {
    fn handle<'a>(
        &'a self,
        request_ctx: &'a mut RequestContext,
        client_ctx: &'a ClientContext,
    ) -> PinFuture<'a, ()> {
        Box::pin(async move {
            let Some(proposal) = request_ctx.response.proposal.clone() else {
                return request_ctx.fail(ClientError::InvalidRequest(
                    "no proposal to commit".into(),
                ));
            };
            let (registration, status_rx) = match client_ctx
                .event_service
                .register_tx_status_event(&proposal.tx_id)
            {
                Ok(registered) => registered,
                Err(err) => return request_ctx.fail(err),
            };

            let outcome = commit(request_ctx, client_ctx, &proposal, status_rx).await;
            client_ctx.event_service.unregister(registration);
            match outcome {
                Ok(code) => request_ctx.response.tx_validation_code = code,
                Err(err) => request_ctx.fail(err),
            }
        })
    }
}

async fn commit(
    request_ctx: &RequestContext,
    client_ctx: &ClientContext,
    proposal: &super::transactor::TransactionProposal,
    status_rx: tokio::sync::oneshot::Receiver<super::events::TxStatusEvent>,
) -> Result<i32, ClientError> {
    client_ctx
        .transactor
        .send_transaction(&request_ctx.ctx, proposal, &request_ctx.response.responses)
        .await?;

    let event = match request_ctx.ctx.run(status_rx).await {
        Ok(Ok(event)) => event,
        Ok(Err(_)) => {
            return Err(Status::client(
                ClientCode::Unknown,
                format!(
                    "event service closed before transaction {} committed",
                    proposal.tx_id
                ),
            )
            .into())
        }
        Err(_) => {
            return Err(Status::timeout(format!(
                "timed out waiting for transaction {} to commit",
                proposal.tx_id
            ))
            .into())
        }
    };
    debug!(
        "event=commit_status tx_id={} code={} block={}",
        event.tx_id, event.validation_code, event.block_number
    );
    if event.validation_code != TX_VALID {
        return Err(Status::new(
            StatusGroup::EventServer,
            event.validation_code,
            format!("received invalid transaction {}", event.tx_id),
        )
        .into());
    }
    Ok(event.validation_code)
}
