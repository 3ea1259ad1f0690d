//! Channel client: query and execute chaincode through a handler chain with
//! deadline, retry and greylisting.

pub mod client;
pub mod events;
pub mod invoke;
pub mod request;
pub mod transactor;

use crate::config::EndpointConfig;
use crate::discovery::{DiscoverySelection, DiscoveryService, SelectionService};
use crate::membership::{
    ChannelMembership, ConfigRef, MembershipCache, MembershipCacheKey, MembershipContext,
};
use crate::util::ClientError;
use std::fmt;
use std::sync::Arc;

pub use client::ChannelClient;
pub use events::{ChaincodeEvent, EventService, Registration, TxStatusEvent};
pub use invoke::{ClientContext, Handler, HandlerChain, RequestContext};
pub use request::{Request, RequestOptions, Response};
pub use transactor::{TransactionProposal, Transactor, TransactorFactory};

/// Lifecycle of one invocation, used in logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvocationPhase {
    Prepared,
    Dispatching,
    Retrying,
    Completed,
    TimedOut,
}

impl fmt::Display for InvocationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InvocationPhase::Prepared => "PREPARED",
            InvocationPhase::Dispatching => "DISPATCHING",
            InvocationPhase::Retrying => "RETRYING",
            InvocationPhase::Completed => "COMPLETED",
            InvocationPhase::TimedOut => "TIMED_OUT",
        };
        f.write_str(label)
    }
}

/// Channel-scoped collaborators a [`ChannelClient`] is built from.
#[derive(Clone)]
pub struct ChannelContext {
    channel_id: String,
    endpoint_config: Arc<EndpointConfig>,
    discovery: Arc<dyn DiscoveryService>,
    selection: Arc<dyn SelectionService>,
    membership_cache: Arc<MembershipCache>,
    membership_key: MembershipCacheKey,
    event_service: Arc<dyn EventService>,
    transactor_factory: Arc<dyn TransactorFactory>,
}

impl ChannelContext {
    pub fn builder(channel_id: impl Into<String>) -> ChannelContextBuilder {
        ChannelContextBuilder::new(channel_id)
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn endpoint_config(&self) -> &Arc<EndpointConfig> {
        &self.endpoint_config
    }

    pub fn discovery(&self) -> &Arc<dyn DiscoveryService> {
        &self.discovery
    }

    pub fn selection(&self) -> &Arc<dyn SelectionService> {
        &self.selection
    }

    pub fn event_service(&self) -> &Arc<dyn EventService> {
        &self.event_service
    }

    /// Current membership of the channel from the shared cache.
    pub fn membership(&self) -> Result<Arc<dyn ChannelMembership>, ClientError> {
        Ok(self.membership_cache.get(&self.membership_key)?)
    }

    pub fn transactor_factory(&self) -> &Arc<dyn TransactorFactory> {
        &self.transactor_factory
    }
}

pub struct ChannelContextBuilder {
    channel_id: String,
    endpoint_config: Arc<EndpointConfig>,
    discovery: Option<Arc<dyn DiscoveryService>>,
    selection: Option<Arc<dyn SelectionService>>,
    membership_cache: Option<Arc<MembershipCache>>,
    channel_config: Option<ConfigRef>,
    event_service: Option<Arc<dyn EventService>>,
    transactor_factory: Option<Arc<dyn TransactorFactory>>,
}

impl ChannelContextBuilder {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            endpoint_config: Arc::new(EndpointConfig::default()),
            discovery: None,
            selection: None,
            membership_cache: None,
            channel_config: None,
            event_service: None,
            transactor_factory: None,
        }
    }

    pub fn endpoint_config(mut self, config: Arc<EndpointConfig>) -> Self {
        self.endpoint_config = config;
        self
    }

    pub fn discovery(mut self, discovery: Arc<dyn DiscoveryService>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Defaults to selecting every discovered peer.
    pub fn selection(mut self, selection: Arc<dyn SelectionService>) -> Self {
        self.selection = Some(selection);
        self
    }

    /// Shares a membership cache across channel contexts. A private cache
    /// refreshed per the endpoint configuration is used otherwise.
    pub fn membership_cache(mut self, cache: Arc<MembershipCache>) -> Self {
        self.membership_cache = Some(cache);
        self
    }

    /// Source of the channel configuration membership is built from.
    pub fn channel_config(mut self, config: ConfigRef) -> Self {
        self.channel_config = Some(config);
        self
    }

    pub fn event_service(mut self, events: Arc<dyn EventService>) -> Self {
        self.event_service = Some(events);
        self
    }

    pub fn transactor_factory(mut self, factory: Arc<dyn TransactorFactory>) -> Self {
        self.transactor_factory = Some(factory);
        self
    }

    pub fn build(self) -> Result<ChannelContext, ClientError> {
        if self.channel_id.is_empty() {
            return Err(ClientError::MissingCollaborator("a channel id"));
        }
        let discovery = self
            .discovery
            .ok_or(ClientError::MissingCollaborator("a discovery service"))?;
        let event_service = self
            .event_service
            .ok_or(ClientError::MissingCollaborator("an event service"))?;
        let transactor_factory = self
            .transactor_factory
            .ok_or(ClientError::MissingCollaborator("a transactor factory"))?;
        let channel_config = self
            .channel_config
            .ok_or(ClientError::MissingCollaborator("a channel configuration"))?;
        let selection = self
            .selection
            .unwrap_or_else(|| Arc::new(DiscoverySelection::new(discovery.clone())));
        let membership_cache = self
            .membership_cache
            .unwrap_or_else(|| Arc::new(MembershipCache::from_config(&self.endpoint_config)));
        let membership_key = MembershipCacheKey::new(
            MembershipContext::new(self.endpoint_config.clone()),
            channel_config,
            self.channel_id.clone(),
        );
        Ok(ChannelContext {
            channel_id: self.channel_id,
            endpoint_config: self.endpoint_config,
            discovery,
            selection,
            membership_cache,
            membership_key,
            event_service,
            transactor_factory,
        })
    }
}
