//! Event service collaborator.

use crate::util::ClientError;
use tokio::sync::{mpsc, oneshot};

/// Validation code of a committed transaction that passed validation.
pub const TX_VALID: i32 = 0;

/// Handle returned by a registration; pass it back to unregister.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Registration(pub u64);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxStatusEvent {
    pub tx_id: String,
    pub validation_code: i32,
    pub block_number: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChaincodeEvent {
    pub tx_id: String,
    pub chaincode_id: String,
    pub event_name: String,
    pub payload: Vec<u8>,
}

pub trait EventService: Send + Sync {
    /// Delivers the commit status of `tx_id` once.
    fn register_tx_status_event(
        &self,
        tx_id: &str,
    ) -> Result<(Registration, oneshot::Receiver<TxStatusEvent>), ClientError>;

    /// Streams chaincode events whose name matches `event_filter`.
    fn register_chaincode_event(
        &self,
        chaincode_id: &str,
        event_filter: &str,
    ) -> Result<(Registration, mpsc::UnboundedReceiver<ChaincodeEvent>), ClientError>;

    fn unregister(&self, registration: Registration);
}
