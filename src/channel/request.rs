use super::transactor::TransactionProposal;
use crate::context::CallContext;
use crate::discovery::{ChaincodeCall, TargetFilter};
use crate::peer::{Peer, TransactionProposalResponse};
use crate::timeouts::TimeoutType;
use crate::util::RetryPolicy;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Chaincode invocation requested by the caller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Request {
    pub chaincode_id: String,
    pub fcn: String,
    pub args: Vec<Vec<u8>>,
    pub transient_map: HashMap<String, Vec<u8>>,
    /// Additional chaincodes the invocation calls into.
    pub invocation_chain: Vec<ChaincodeCall>,
}

impl Request {
    pub fn new(chaincode_id: impl Into<String>, fcn: impl Into<String>) -> Self {
        Self {
            chaincode_id: chaincode_id.into(),
            fcn: fcn.into(),
            ..Default::default()
        }
    }

    pub fn with_args(mut self, args: Vec<Vec<u8>>) -> Self {
        self.args = args;
        self
    }

    /// Chaincodes endorsement policies must be satisfied for.
    pub fn chaincodes(&self) -> Vec<ChaincodeCall> {
        let mut chaincodes = vec![ChaincodeCall::new(self.chaincode_id.clone())];
        chaincodes.extend(
            self.invocation_chain
                .iter()
                .filter(|call| call.id != self.chaincode_id)
                .cloned(),
        );
        chaincodes
    }
}

/// Outcome of a query or execute.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Response {
    pub proposal: Option<TransactionProposal>,
    pub responses: Vec<TransactionProposalResponse>,
    pub transaction_id: String,
    /// Validation code from the commit event; zero means valid.
    pub tx_validation_code: i32,
    pub chaincode_status: i32,
    pub payload: Vec<u8>,
}

/// Per-call options. Built with the `with_*` methods.
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Explicit endorsing peers; empty means select through discovery.
    pub targets: Vec<Arc<dyn Peer>>,
    pub target_filter: Option<Arc<dyn TargetFilter>>,
    /// `None` means a single attempt.
    pub retry: Option<RetryPolicy>,
    pub timeouts: HashMap<TimeoutType, Duration>,
    pub parent_context: Option<CallContext>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targets(mut self, targets: Vec<Arc<dyn Peer>>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_target_filter(mut self, filter: Arc<dyn TargetFilter>) -> Self {
        self.target_filter = Some(filter);
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn with_timeout(mut self, kind: TimeoutType, timeout: Duration) -> Self {
        self.timeouts.insert(kind, timeout);
        self
    }

    pub fn with_parent_context(mut self, parent: CallContext) -> Self {
        self.parent_context = Some(parent);
        self
    }

    /// Configured timeout for `kind`; zero counts as unset.
    pub fn timeout(&self, kind: TimeoutType) -> Option<Duration> {
        self.timeouts
            .get(&kind)
            .copied()
            .filter(|timeout| !timeout.is_zero())
    }

    pub fn target_urls(&self) -> Vec<&str> {
        self.targets.iter().map(|peer| peer.url()).collect()
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("targets", &self.target_urls())
            .field("target_filter", &self.target_filter.is_some())
            .field("retry", &self.retry)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chaincodes_start_with_the_invoked_chaincode() {
        let mut request = Request::new("mycc", "move");
        request.invocation_chain = vec![ChaincodeCall::new("mycc"), ChaincodeCall::new("othercc")];
        let ids: Vec<_> = request.chaincodes().into_iter().map(|call| call.id).collect();
        assert_eq!(ids, vec!["mycc", "othercc"]);
    }

    #[test]
    fn zero_timeout_counts_as_unset() {
        let options = RequestOptions::new().with_timeout(TimeoutType::Query, Duration::ZERO);
        assert_eq!(options.timeout(TimeoutType::Query), None);
    }
}
