//! Protobuf messages exchanged with endorsing peers and carried inside
//! endorsements.

use prost::Message;

/// Response status reported by a peer for a successful simulation.
pub const STATUS_SUCCESS: i32 = 200;
/// Chaincode statuses at or above this value are failures.
pub const ERROR_THRESHOLD: i32 = 400;
/// Generic chaincode failure status.
pub const STATUS_ERROR: i32 = 500;

#[derive(Clone, PartialEq, Message)]
pub struct SignedProposal {
    #[prost(bytes = "vec", tag = "1")]
    pub proposal_bytes: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Response {
    #[prost(int32, tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(bytes = "vec", tag = "3")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Endorsement {
    /// Serialized identity of the endorser.
    #[prost(bytes = "vec", tag = "1")]
    pub endorser: Vec<u8>,
    /// Signature over `ProposalResponse.payload || endorser`.
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProposalResponse {
    #[prost(int32, tag = "1")]
    pub version: i32,
    #[prost(message, optional, tag = "4")]
    pub response: Option<Response>,
    /// Encoded [`ProposalResponsePayload`].
    #[prost(bytes = "vec", tag = "5")]
    pub payload: Vec<u8>,
    #[prost(message, optional, tag = "6")]
    pub endorsement: Option<Endorsement>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProposalResponsePayload {
    #[prost(bytes = "vec", tag = "1")]
    pub proposal_hash: Vec<u8>,
    /// Encoded [`ChaincodeAction`].
    #[prost(bytes = "vec", tag = "2")]
    pub extension: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChaincodeAction {
    #[prost(bytes = "vec", tag = "1")]
    pub results: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub events: Vec<u8>,
    #[prost(message, optional, tag = "3")]
    pub response: Option<Response>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SerializedIdentity {
    #[prost(string, tag = "1")]
    pub mspid: String,
    /// Encoded [`MemberCertificate`].
    #[prost(bytes = "vec", tag = "2")]
    pub id_bytes: Vec<u8>,
}

/// Member enrollment: an ed25519 public key signed by one of the MSP roots.
#[derive(Clone, PartialEq, Message)]
pub struct MemberCertificate {
    #[prost(bytes = "vec", tag = "1")]
    pub public_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub issuer_signature: Vec<u8>,
}

impl ProposalResponse {
    /// Top-level response status, zero when the response is absent.
    pub fn response_status(&self) -> i32 {
        self.response.as_ref().map(|r| r.status).unwrap_or_default()
    }

    /// The status reported by the chaincode itself.
    ///
    /// Peers always answer the top-level status with success once the
    /// simulation ran, so the real outcome lives in
    /// `payload -> extension -> response.status`. Falls back to the top-level
    /// status when the nested payload is absent or unparseable.
    pub fn chaincode_status(&self) -> i32 {
        if !self.payload.is_empty() {
            let action = ProposalResponsePayload::decode(self.payload.as_slice())
                .ok()
                .and_then(|payload| ChaincodeAction::decode(payload.extension.as_slice()).ok());
            if let Some(response) = action.and_then(|action| action.response) {
                return response.status;
            }
        }
        self.response_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with_payload(top: i32, payload: Vec<u8>) -> ProposalResponse {
        ProposalResponse {
            version: 1,
            response: Some(Response {
                status: top,
                message: String::new(),
                payload: Vec::new(),
            }),
            payload,
            endorsement: None,
        }
    }

    fn nested_payload(action: Option<ChaincodeAction>) -> Vec<u8> {
        ProposalResponsePayload {
            proposal_hash: vec![1, 2, 3],
            extension: action.map(|a| a.encode_to_vec()).unwrap_or_default(),
        }
        .encode_to_vec()
    }

    #[test]
    fn nested_chaincode_status_wins() {
        let action = ChaincodeAction {
            results: Vec::new(),
            events: Vec::new(),
            response: Some(Response {
                status: 500,
                message: "boom".into(),
                payload: Vec::new(),
            }),
        };
        let response = response_with_payload(200, nested_payload(Some(action)));
        assert_eq!(response.chaincode_status(), 500);
        assert_eq!(response.response_status(), 200);
    }

    #[test]
    fn falls_back_when_action_has_no_response() {
        let action = ChaincodeAction::default();
        let response = response_with_payload(200, nested_payload(Some(action)));
        assert_eq!(response.chaincode_status(), 200);
    }

    #[test]
    fn falls_back_when_payload_missing_or_garbage() {
        assert_eq!(response_with_payload(201, Vec::new()).chaincode_status(), 201);
        assert_eq!(
            response_with_payload(202, vec![0xff, 0xff, 0xff]).chaincode_status(),
            202
        );
    }
}
