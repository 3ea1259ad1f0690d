//! Domain status model shared by every component.
//!
//! A [`Status`] is the only error identity callers should match on: a group
//! telling which layer produced it, a group specific code, a message and,
//! when known, the peer endpoint it is attributable to.

use crate::net::{RpcCode, RpcStatus};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusGroup {
    Unknown,
    /// Transport level status reported by the RPC layer.
    Transport,
    /// Status carried in a peer's proposal response.
    EndorserServer,
    /// Status synthesised by the endorsement client.
    EndorserClient,
    /// Status synthesised by the channel client.
    Client,
    /// Status reported by chaincode.
    Chaincode,
    /// Transaction validation code delivered by the event service.
    EventServer,
}

impl fmt::Display for StatusGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StatusGroup::Unknown => "Unknown",
            StatusGroup::Transport => "Transport",
            StatusGroup::EndorserServer => "Endorser Server",
            StatusGroup::EndorserClient => "Endorser Client",
            StatusGroup::Client => "Client",
            StatusGroup::Chaincode => "Chaincode",
            StatusGroup::EventServer => "Event Server",
        };
        f.write_str(label)
    }
}

/// Codes shared by the `EndorserClient` and `Client` groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ClientCode {
    Ok = 0,
    Unknown = 1,
    ConnectionFailed = 2,
    EndorsementMismatch = 3,
    EmptyCert = 4,
    Timeout = 5,
    NoPeersFound = 6,
    MultipleErrors = 7,
    SignatureVerificationFailed = 8,
    MissingEndorsement = 9,
    PrematureChaincodeExecution = 21,
    ChaincodeAlreadyLaunching = 22,
    ChaincodeNameNotFound = 23,
}

impl ClientCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    group: StatusGroup,
    code: i32,
    message: String,
    endpoint: Option<String>,
    transport: Option<RpcStatus>,
}

impl Status {
    pub fn new(group: StatusGroup, code: i32, message: impl Into<String>) -> Self {
        Self {
            group,
            code,
            message: message.into(),
            endpoint: None,
            transport: None,
        }
    }

    pub fn client(code: ClientCode, message: impl Into<String>) -> Self {
        Self::new(StatusGroup::Client, code.as_i32(), message)
    }

    pub fn endorser_client(code: ClientCode, message: impl Into<String>) -> Self {
        Self::new(StatusGroup::EndorserClient, code.as_i32(), message)
    }

    /// Converts a transport status unchanged into the domain model.
    pub fn from_rpc(status: &RpcStatus) -> Self {
        Self::new(StatusGroup::Transport, status.code.as_i32(), status.message.clone())
    }

    /// A chaincode error recovered from a transport error message.
    pub fn from_extracted_chaincode_error(code: i32, message: impl Into<String>) -> Self {
        Self::new(StatusGroup::Chaincode, code, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::client(ClientCode::Timeout, message)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_transport(mut self, transport: RpcStatus) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn group(&self) -> StatusGroup {
        self.group
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Peer endpoint this status is attributable to.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Transport status preserved underneath a synthesised status.
    pub fn transport(&self) -> Option<&RpcStatus> {
        self.transport.as_ref()
    }

    pub fn is(&self, group: StatusGroup, code: ClientCode) -> bool {
        self.group == group && self.code == code.as_i32()
    }

    pub fn is_timeout(&self) -> bool {
        self.is(StatusGroup::Client, ClientCode::Timeout)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} status code {}: {}",
            self.group, self.code, self.message
        )?;
        if let Some(endpoint) = &self.endpoint {
            write!(f, " (endpoint {endpoint})")?;
        }
        if let Some(transport) = &self.transport {
            write!(f, " [transport {transport}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for Status {}

/// Application errors tunnelled through a transport error's message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// No application error could be recovered.
    Transport(RpcStatus),
    /// `status:<code>, message:<text>` was found in the message.
    Decoded { code: i32, message: String },
    /// The chaincode was invoked before it finished launching.
    PrematureExecution { message: String },
}

const STATUS_MARKER: &str = "status:";
const MESSAGE_MARKER: &str = "message:";
const PREMATURE_MARKER: &str = "premature execution";

/// Recovers the application error hidden inside `status`.
pub fn decode_remote_error(status: &RpcStatus) -> RemoteError {
    if let Some((code, message)) = extract_chaincode_error(status) {
        return RemoteError::Decoded { code, message };
    }
    if let Some(message) = extract_premature_execution(status) {
        return RemoteError::PrematureExecution { message };
    }
    RemoteError::Transport(status.clone())
}

impl RemoteError {
    pub fn into_status(self) -> Status {
        match self {
            RemoteError::Transport(status) => Status::from_rpc(&status),
            RemoteError::Decoded { code, message } => {
                Status::from_extracted_chaincode_error(code, message)
            }
            RemoteError::PrematureExecution { message } => {
                Status::endorser_client(ClientCode::PrematureChaincodeExecution, message)
            }
        }
    }
}

fn extract_chaincode_error(status: &RpcStatus) -> Option<(i32, String)> {
    if status.code != RpcCode::Unknown || status.message.is_empty() {
        return None;
    }
    let text = status.message.as_str();

    let mut code = 0;
    if let Some(start) = text.find(STATUS_MARKER) {
        let rest = &text[start..];
        if let Some(comma) = rest.find(',') {
            if comma > STATUS_MARKER.len() {
                code = rest[STATUS_MARKER.len()..comma].trim().parse::<i32>().ok()?;
            }
        }
    }

    let mut message = "";
    if let Some(start) = text.find(MESSAGE_MARKER) {
        let rest = &text[start..];
        if let Some(close) = rest.rfind(')') {
            if close > MESSAGE_MARKER.len() {
                let raw = rest[MESSAGE_MARKER.len()..close].trim();
                message = raw.strip_prefix('(').unwrap_or(raw).trim();
            }
        }
    }

    if code != 0 && !message.is_empty() {
        Some((code, message.to_string()))
    } else {
        None
    }
}

fn extract_premature_execution(status: &RpcStatus) -> Option<String> {
    if status.code != RpcCode::Unknown || status.message.is_empty() {
        return None;
    }
    status
        .message
        .find(PREMATURE_MARKER)
        .map(|index| status.message[index..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unknown(message: &str) -> RpcStatus {
        RpcStatus::new(RpcCode::Unknown, message)
    }

    #[test]
    fn decodes_status_and_message() {
        let decoded = decode_remote_error(&unknown(
            "chaincode error: status:42, message:(insufficient funds)",
        ));
        assert_eq!(
            decoded,
            RemoteError::Decoded {
                code: 42,
                message: "insufficient funds".into()
            }
        );
    }

    #[test]
    fn decodes_peer_formatted_message() {
        let decoded = decode_remote_error(&unknown(
            "transaction returned with failure (status: 500, message: asset not found)",
        ));
        assert_eq!(
            decoded,
            RemoteError::Decoded {
                code: 500,
                message: "asset not found".into()
            }
        );
    }

    #[test]
    fn premature_execution_keeps_remainder() {
        let decoded = decode_remote_error(&unknown(
            "failed to execute: premature execution - chaincode (mycc:1.0) is being launched",
        ));
        assert_eq!(
            decoded,
            RemoteError::PrematureExecution {
                message: "premature execution - chaincode (mycc:1.0) is being launched".into()
            }
        );
        let status = decoded.into_status();
        assert!(status.is(
            StatusGroup::EndorserClient,
            ClientCode::PrematureChaincodeExecution
        ));
    }

    #[test]
    fn non_numeric_code_falls_through() {
        let decoded = decode_remote_error(&unknown("status:abc, message:(nope)"));
        assert!(matches!(decoded, RemoteError::Transport(_)));
    }

    #[test]
    fn unrecognised_errors_pass_through_unchanged() {
        let raw = RpcStatus::new(RpcCode::Unavailable, "status:42, message:(x)");
        assert_eq!(decode_remote_error(&raw), RemoteError::Transport(raw.clone()));

        let raw = unknown("connection reset by peer");
        let status = decode_remote_error(&raw).into_status();
        assert_eq!(status.group(), StatusGroup::Transport);
        assert_eq!(status.code(), RpcCode::Unknown.as_i32());
        assert_eq!(status.message(), "connection reset by peer");
    }
}
