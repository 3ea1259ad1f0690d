//! Transaction-submission core of a ledger client SDK.
//! Sends signed proposals to endorsing peers, validates endorsements against
//! cached channel membership and runs query/execute invocations under a
//! deadline with greylisting retries.

pub mod channel;
pub mod config;
pub mod context;
pub mod discovery;
pub mod membership;
pub mod net;
pub mod peer;
pub mod status;
pub mod timeouts;
pub mod util;
pub mod wire;

pub use channel::{
    ChannelClient, ChannelContext, ChannelContextBuilder, InvocationPhase, Request,
    RequestOptions, Response,
};
pub use config::{ConfigError, EndpointConfig};
pub use context::{CallContext, ContextError};
pub use discovery::{Greylist, PeerFilter, TargetFilter};
pub use membership::{MembershipCache, MembershipCacheKey, MembershipError};
pub use peer::{EndorserRequest, NetworkPeer, Peer, PeerEndorser};
pub use status::{ClientCode, Status, StatusGroup};
pub use timeouts::TimeoutType;
pub use util::{ClientError, RetryPolicy, RetryableCodes};
