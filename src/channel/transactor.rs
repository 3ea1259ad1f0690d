//! Proposal creation and transaction submission collaborators.

use super::request::Request;
use crate::context::CallContext;
use crate::peer::TransactionProposalResponse;
use crate::util::{ClientError, PinFuture};
use crate::wire::SignedProposal;
use std::sync::Arc;

/// A signed proposal ready to be sent to endorsers.
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionProposal {
    pub tx_id: String,
    pub signed_proposal: SignedProposal,
}

/// Builds proposals and submits endorsed transactions for one channel.
pub trait Transactor: Send + Sync {
    fn create_proposal(&self, request: &Request) -> Result<TransactionProposal, ClientError>;

    fn send_transaction<'a>(
        &'a self,
        ctx: &'a CallContext,
        proposal: &'a TransactionProposal,
        responses: &'a [TransactionProposalResponse],
    ) -> PinFuture<'a, Result<(), ClientError>>;
}

pub trait TransactorFactory: Send + Sync {
    fn create_channel_transactor(&self, channel_id: &str)
        -> Result<Arc<dyn Transactor>, ClientError>;
}
