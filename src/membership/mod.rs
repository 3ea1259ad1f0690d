//! Per-channel membership: identity validation state built lazily from the
//! channel configuration and cached with bounded staleness.

pub mod cache;
pub mod msp;

use crate::config::EndpointConfig;
use crate::timeouts::TimeoutType;
use log::{info, warn};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use cache::{CacheKey, RefCache};
pub use msp::{issue_identity, ChannelConfig, MspConfig};

use msp::MspManager;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MembershipError {
    #[error("unexpected cache key")]
    UnexpectedKeyType,
    #[error("failed to create channel membership for {channel_id}: {cause}")]
    Initialization { channel_id: String, cause: String },
    #[error("MSP {0} is not defined on the channel")]
    UnknownMsp(String),
    #[error("malformed identity: {0}")]
    MalformedIdentity(String),
    #[error("identity is not issued by a trusted root of MSP {0}")]
    UntrustedIdentity(String),
    #[error("signature verification failed: {0}")]
    InvalidSignature(String),
    #[error("invalid channel configuration: {0}")]
    InvalidConfig(String),
}

/// Identity checks available for one channel.
pub trait ChannelMembership: Send + Sync {
    /// The identity is well formed and issued by a trusted MSP root.
    fn validate(&self, identity: &[u8]) -> Result<(), MembershipError>;

    /// `signature` over `message` was produced by `identity`.
    fn verify(&self, identity: &[u8], message: &[u8], signature: &[u8])
        -> Result<(), MembershipError>;
}

pub type ConfigRefError = Box<dyn std::error::Error + Send + Sync>;

type ConfigEvaluator = dyn Fn() -> Result<ChannelConfig, ConfigRefError> + Send + Sync;

/// Lazily evaluated channel configuration. Every evaluation calls the
/// underlying source again.
#[derive(Clone)]
pub struct ConfigRef {
    evaluate: Arc<ConfigEvaluator>,
}

impl ConfigRef {
    /// `evaluate` is synchronous and runs while the membership cache holds
    /// the channel's slot lock, so callers of the same channel wait on it.
    /// Invocations resolve membership on the blocking thread pool, where a
    /// slow evaluator delays the attempt but not the deadline.
    pub fn new<F>(evaluate: F) -> Self
    where
        F: Fn() -> Result<ChannelConfig, ConfigRefError> + Send + Sync + 'static,
    {
        Self {
            evaluate: Arc::new(evaluate),
        }
    }

    /// A reference that always yields `config`.
    pub fn fixed(config: ChannelConfig) -> Self {
        Self::new(move || Ok(config.clone()))
    }

    pub fn evaluate(&self) -> Result<ChannelConfig, ConfigRefError> {
        (self.evaluate)()
    }
}

#[derive(Clone, Default)]
pub struct MembershipContext {
    pub endpoint_config: Arc<EndpointConfig>,
}

impl MembershipContext {
    pub fn new(endpoint_config: Arc<EndpointConfig>) -> Self {
        Self { endpoint_config }
    }
}

/// Cache key for a channel's membership. Keys are equal when their channel
/// ids are, whichever configuration reference they carry.
#[derive(Clone)]
pub struct MembershipCacheKey {
    channel_id: String,
    context: MembershipContext,
    config_ref: ConfigRef,
}

impl MembershipCacheKey {
    pub fn new(
        context: MembershipContext,
        config_ref: ConfigRef,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            context,
            config_ref,
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }
}

impl CacheKey for MembershipCacheKey {
    fn string(&self) -> &str {
        &self.channel_id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Membership built from one evaluation of the channel configuration.
///
/// A failed evaluation still produces a value; every check on it fails
/// with the original cause until the cache entry is refreshed.
pub struct Membership {
    channel_id: String,
    state: Result<MspManager, MembershipError>,
}

impl Membership {
    pub fn build(key: &MembershipCacheKey) -> Self {
        let channel_id = key.channel_id.clone();
        let state = key
            .config_ref
            .evaluate()
            .map_err(|err| err.to_string())
            .and_then(|config| {
                MspManager::new(&config, &key.context.endpoint_config)
                    .map_err(|err| err.to_string())
            })
            .map_err(|cause| MembershipError::Initialization {
                channel_id: channel_id.clone(),
                cause,
            });
        match &state {
            Ok(manager) => info!(
                "event=membership_built channel={} msps={}",
                channel_id,
                manager.msp_count()
            ),
            Err(err) => warn!(
                "event=membership_poisoned channel={} error={}",
                channel_id, err
            ),
        }
        Self { channel_id, state }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn is_poisoned(&self) -> bool {
        self.state.is_err()
    }

    fn manager(&self) -> Result<&MspManager, MembershipError> {
        self.state.as_ref().map_err(Clone::clone)
    }
}

impl ChannelMembership for Membership {
    fn validate(&self, identity: &[u8]) -> Result<(), MembershipError> {
        self.manager()?.validate(identity).map(|_| ())
    }

    fn verify(
        &self,
        identity: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), MembershipError> {
        self.manager()?.verify(identity, message, signature)
    }
}

/// Channel memberships keyed by channel id, refreshed after `ttl`.
pub struct MembershipCache {
    cache: RefCache<Arc<Membership>>,
}

impl MembershipCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: RefCache::new(ttl),
        }
    }

    /// Uses the `ChannelMembershipRefresh` timeout from `config` as the TTL.
    pub fn from_config(config: &EndpointConfig) -> Self {
        Self::new(config.timeout_or_default(TimeoutType::ChannelMembershipRefresh))
    }

    /// Only fails when `key` is not a [`MembershipCacheKey`]; configuration
    /// failures surface through the returned membership.
    pub fn get(&self, key: &dyn CacheKey) -> Result<Arc<dyn ChannelMembership>, MembershipError> {
        let key = key
            .as_any()
            .downcast_ref::<MembershipCacheKey>()
            .ok_or(MembershipError::UnexpectedKeyType)?;
        let membership: Arc<dyn ChannelMembership> = self
            .cache
            .get_or_init(key.string(), || Arc::new(Membership::build(key)));
        Ok(membership)
    }
}
