//! Transport plumbing for the endorsement client: framing, TLS setup, endpoint
//! helpers and the pooled connection manager.

use std::fmt;
use std::io;
use thiserror::Error;

pub mod conn;
pub mod endpoint;
pub mod frame;
pub mod tls;

pub use conn::{
    Connection, ConnectionLease, ConnectionManager, DialError, DialOptions,
    PooledConnectionManager,
};
pub use endpoint::{attempt_secured, to_address};
pub use tls::TlsSettings;

/// Errors emitted by the networking helpers.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("certificate error: {0}")]
    Certificate(#[from] CertificateError),
    #[error("invalid address `{address}`")]
    InvalidAddress { address: String },
}

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("invalid certificate PEM")]
    InvalidCertificatePem,
    #[error("trust bundle is empty")]
    TrustBundleEmpty,
    #[error("trust bundle does not contain parsable certificates")]
    TrustBundleUnparsable,
    #[error("identity certificate chain empty")]
    IdentityChainEmpty,
    #[error("invalid DNS name `{host}` for certificate")]
    InvalidDnsName { host: String },
    #[error("invalid PKCS#8 private key")]
    InvalidPkcs8Key,
    #[error("invalid RSA private key")]
    InvalidRsaKey,
    #[error("invalid SEC1 EC private key")]
    InvalidEcKey,
    #[error(
        "unsupported or missing private key material (expected PKCS#8, PKCS#1 RSA, or SEC1 EC)"
    )]
    MissingPrivateKey,
    #[error("client key provided without client certificate")]
    KeyWithoutCertificate,
}

/// Transport status codes, numbered like the peer network's RPC layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RpcCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl RpcCode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => RpcCode::Ok,
            1 => RpcCode::Cancelled,
            3 => RpcCode::InvalidArgument,
            4 => RpcCode::DeadlineExceeded,
            5 => RpcCode::NotFound,
            6 => RpcCode::AlreadyExists,
            7 => RpcCode::PermissionDenied,
            8 => RpcCode::ResourceExhausted,
            9 => RpcCode::FailedPrecondition,
            10 => RpcCode::Aborted,
            11 => RpcCode::OutOfRange,
            12 => RpcCode::Unimplemented,
            13 => RpcCode::Internal,
            14 => RpcCode::Unavailable,
            15 => RpcCode::DataLoss,
            16 => RpcCode::Unauthenticated,
            _ => RpcCode::Unknown,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_i32(self) -> i32 {
        i32::from(self as u8)
    }
}

/// Status reported by the transport for a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcStatus {
    pub code: RpcCode,
    pub message: String,
}

impl RpcStatus {
    pub fn new(code: RpcCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Classifies a local I/O failure the way the RPC layer reports it.
    pub fn from_io(err: &io::Error) -> Self {
        let code = match err.kind() {
            io::ErrorKind::TimedOut => RpcCode::DeadlineExceeded,
            io::ErrorKind::InvalidData => RpcCode::Internal,
            _ => RpcCode::Unavailable,
        };
        Self::new(code, err.to_string())
    }
}

impl fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc error: code = {:?} desc = {}", self.code, self.message)
    }
}

impl std::error::Error for RpcStatus {}
