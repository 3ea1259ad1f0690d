//! Timeout defaults per category and transport ceilings. Every category can
//! be overridden through [`crate::config::EndpointConfig`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum inbound message size accepted from a peer (matches the peer network).
pub const MAX_CALL_RECV_MSG_SIZE: usize = 100 * 1024 * 1024;
/// Maximum outbound message size sent to a peer (matches the peer network).
pub const MAX_CALL_SEND_MSG_SIZE: usize = 100 * 1024 * 1024;

/// Time allowed to establish a connection to an endorsing peer.
pub const DEFAULT_ENDORSER_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
/// Overall deadline of a query invocation.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(180);
/// Overall deadline of an execute invocation.
pub const DEFAULT_EXECUTE_TIMEOUT: Duration = Duration::from_secs(180);
/// How long a failing peer stays excluded from selection.
pub const DEFAULT_DISCOVERY_GREYLIST_EXPIRY: Duration = Duration::from_secs(10);
/// How long a channel membership snapshot is served before re-evaluation.
pub const DEFAULT_CHANNEL_MEMBERSHIP_REFRESH: Duration = Duration::from_secs(60);

/// Idle pooled connections older than this are closed on next checkout.
pub const CONNECTION_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
/// Idle connections kept per target.
pub const CONNECTION_POOL_MAX_IDLE_PER_TARGET: usize = 4;

/// Timeout categories understood by [`crate::config::EndpointConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutType {
    EndorserConnection,
    Query,
    Execute,
    DiscoveryGreylistExpiry,
    ChannelMembershipRefresh,
}

impl TimeoutType {
    pub fn default_timeout(self) -> Duration {
        match self {
            TimeoutType::EndorserConnection => DEFAULT_ENDORSER_CONNECTION_TIMEOUT,
            TimeoutType::Query => DEFAULT_QUERY_TIMEOUT,
            TimeoutType::Execute => DEFAULT_EXECUTE_TIMEOUT,
            TimeoutType::DiscoveryGreylistExpiry => DEFAULT_DISCOVERY_GREYLIST_EXPIRY,
            TimeoutType::ChannelMembershipRefresh => DEFAULT_CHANNEL_MEMBERSHIP_REFRESH,
        }
    }
}
