#![allow(dead_code)]

use ed25519_dalek::{Signer, SigningKey};
use fabcore::channel::{
    ChaincodeEvent, ChannelContext, EventService, Registration, Request, TransactionProposal,
    Transactor, TransactorFactory, TxStatusEvent,
};
use fabcore::context::CallContext;
use fabcore::discovery::StaticDiscovery;
use fabcore::membership::{issue_identity, ChannelConfig, ConfigRef};
use fabcore::peer::{Peer, ProcessProposalRequest, TransactionProposalResponse};
use fabcore::util::{ClientError, PinFuture};
use fabcore::wire::{
    ChaincodeAction, Endorsement, ProposalResponse, ProposalResponsePayload, Response,
    SignedProposal,
};
use fabcore::Status;
use parking_lot::Mutex;
use prost::Message;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub const CHANNEL: &str = "mychannel";
pub const MSP: &str = "Org1MSP";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Root and member keys of the single MSP the test channel trusts.
pub struct Org {
    pub root: SigningKey,
    pub member: SigningKey,
}

impl Org {
    pub fn new(seed: u8) -> Self {
        Self {
            root: SigningKey::from_bytes(&[seed; 32]),
            member: SigningKey::from_bytes(&[seed.wrapping_add(1); 32]),
        }
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig::new(CHANNEL).with_msp(MSP, vec![self.root.verifying_key().to_bytes()])
    }

    /// A successful endorsement signed by this org's member.
    pub fn endorse(&self, endorser: &str, result: &[u8]) -> TransactionProposalResponse {
        let action = ChaincodeAction {
            response: Some(Response {
                status: 200,
                message: String::new(),
                payload: result.to_vec(),
            }),
            ..Default::default()
        };
        let payload = ProposalResponsePayload {
            proposal_hash: b"hash".to_vec(),
            extension: action.encode_to_vec(),
        }
        .encode_to_vec();
        let identity = issue_identity(MSP, &self.root, &self.member.verifying_key());
        let mut message = payload.clone();
        message.extend_from_slice(&identity);
        let proposal_response = ProposalResponse {
            version: 1,
            response: Some(Response {
                status: 200,
                message: "OK".into(),
                payload: result.to_vec(),
            }),
            payload,
            endorsement: Some(Endorsement {
                endorser: identity,
                signature: self.member.sign(&message).to_bytes().to_vec(),
            }),
        };
        TransactionProposalResponse {
            endorser: endorser.to_string(),
            status: proposal_response.response_status(),
            chaincode_status: proposal_response.chaincode_status(),
            proposal_response,
        }
    }
}

#[derive(Clone)]
pub enum Reply {
    Endorse,
    Fail(Status),
    Hang,
}

/// Peer answering from a script, falling back to a fixed reply.
pub struct FakePeer {
    url: String,
    org: Arc<Org>,
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: AtomicUsize,
}

impl FakePeer {
    pub fn new(url: &str, org: Arc<Org>, fallback: Reply) -> Arc<Self> {
        Self::scripted(url, org, Vec::new(), fallback)
    }

    pub fn scripted(url: &str, org: Arc<Org>, script: Vec<Reply>, fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            url: url.to_string(),
            org,
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Peer for FakePeer {
    fn url(&self) -> &str {
        &self.url
    }

    fn msp_id(&self) -> &str {
        MSP
    }

    fn process_transaction_proposal<'a>(
        &'a self,
        _ctx: &'a CallContext,
        _request: &'a ProcessProposalRequest,
    ) -> PinFuture<'a, Result<TransactionProposalResponse, Status>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self
                .script
                .lock()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());
            match reply {
                Reply::Endorse => Ok(self.org.endorse(&self.url, b"result")),
                Reply::Fail(status) => Err(status),
                Reply::Hang => std::future::pending().await,
            }
        })
    }
}

#[derive(Default)]
pub struct FakeTransactor {
    proposals: AtomicU64,
    pub sent: Mutex<Vec<String>>,
}

impl Transactor for FakeTransactor {
    fn create_proposal(&self, request: &Request) -> Result<TransactionProposal, ClientError> {
        let n = self.proposals.fetch_add(1, Ordering::SeqCst);
        Ok(TransactionProposal {
            tx_id: format!("tx-{n}"),
            signed_proposal: SignedProposal {
                proposal_bytes: request.fcn.as_bytes().to_vec(),
                signature: b"signature".to_vec(),
            },
        })
    }

    fn send_transaction<'a>(
        &'a self,
        _ctx: &'a CallContext,
        proposal: &'a TransactionProposal,
        _responses: &'a [TransactionProposalResponse],
    ) -> PinFuture<'a, Result<(), ClientError>> {
        Box::pin(async move {
            self.sent.lock().push(proposal.tx_id.clone());
            Ok(())
        })
    }
}

pub struct FakeTransactorFactory(pub Arc<FakeTransactor>);

impl TransactorFactory for FakeTransactorFactory {
    fn create_channel_transactor(
        &self,
        _channel_id: &str,
    ) -> Result<Arc<dyn Transactor>, ClientError> {
        Ok(self.0.clone())
    }
}

/// Reports every registered transaction as committed with `validation_code`.
pub struct FakeEvents {
    validation_code: i32,
    next: AtomicU64,
    pub active: Mutex<Vec<Registration>>,
    chaincode_senders: Mutex<Vec<mpsc::UnboundedSender<ChaincodeEvent>>>,
}

impl FakeEvents {
    pub fn new(validation_code: i32) -> Arc<Self> {
        Arc::new(Self {
            validation_code,
            next: AtomicU64::new(1),
            active: Mutex::new(Vec::new()),
            chaincode_senders: Mutex::new(Vec::new()),
        })
    }

    fn register(&self) -> Registration {
        let registration = Registration(self.next.fetch_add(1, Ordering::SeqCst));
        self.active.lock().push(registration);
        registration
    }

    pub fn emit(&self, event: ChaincodeEvent) {
        for sender in self.chaincode_senders.lock().iter() {
            let _ = sender.send(event.clone());
        }
    }
}

impl EventService for FakeEvents {
    fn register_tx_status_event(
        &self,
        tx_id: &str,
    ) -> Result<(Registration, oneshot::Receiver<TxStatusEvent>), ClientError> {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(TxStatusEvent {
            tx_id: tx_id.to_string(),
            validation_code: self.validation_code,
            block_number: 7,
        });
        Ok((self.register(), rx))
    }

    fn register_chaincode_event(
        &self,
        _chaincode_id: &str,
        _event_filter: &str,
    ) -> Result<(Registration, mpsc::UnboundedReceiver<ChaincodeEvent>), ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.chaincode_senders.lock().push(tx);
        Ok((self.register(), rx))
    }

    fn unregister(&self, registration: Registration) {
        self.active.lock().retain(|active| *active != registration);
    }
}

pub struct Harness {
    pub org: Arc<Org>,
    pub transactor: Arc<FakeTransactor>,
    pub events: Arc<FakeEvents>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_commit_code(0)
    }

    pub fn with_commit_code(code: i32) -> Self {
        init_logging();
        Self {
            org: Arc::new(Org::new(11)),
            transactor: Arc::new(FakeTransactor::default()),
            events: FakeEvents::new(code),
        }
    }

    pub fn context(&self, peers: Vec<Arc<dyn Peer>>) -> ChannelContext {
        ChannelContext::builder(CHANNEL)
            .discovery(Arc::new(StaticDiscovery::new(peers)))
            .channel_config(ConfigRef::fixed(self.org.channel_config()))
            .event_service(self.events.clone())
            .transactor_factory(Arc::new(FakeTransactorFactory(self.transactor.clone())))
            .build()
            .expect("channel context")
    }
}
