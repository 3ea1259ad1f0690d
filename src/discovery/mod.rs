//! Peer discovery and selection contracts, plus the filters applied to them.

pub mod filter;
pub mod greylist;

use crate::peer::Peer;
use crate::util::ClientError;
use std::sync::Arc;

pub use filter::FilteredDiscovery;
pub use greylist::Greylist;

/// Selection predicate handed to a [`SelectionService`].
pub type PeerFilter = Arc<dyn Fn(&dyn Peer) -> bool + Send + Sync>;

/// Chaincode (and private collections) a proposal touches.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChaincodeCall {
    pub id: String,
    pub collections: Vec<String>,
}

impl ChaincodeCall {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            collections: Vec::new(),
        }
    }
}

pub trait DiscoveryService: Send + Sync {
    fn get_peers(&self) -> Result<Vec<Arc<dyn Peer>>, ClientError>;
}

pub trait SelectionService: Send + Sync {
    /// Peers able to endorse `chaincodes` that pass `filter`.
    fn get_endorsers_for_chaincode(
        &self,
        chaincodes: &[ChaincodeCall],
        filter: &PeerFilter,
    ) -> Result<Vec<Arc<dyn Peer>>, ClientError>;
}

pub trait TargetFilter: Send + Sync {
    fn accept(&self, peer: &dyn Peer) -> bool;
}

/// Discovery over a fixed peer list.
#[derive(Clone, Default)]
pub struct StaticDiscovery {
    peers: Vec<Arc<dyn Peer>>,
}

impl StaticDiscovery {
    pub fn new(peers: Vec<Arc<dyn Peer>>) -> Self {
        Self { peers }
    }
}

impl DiscoveryService for StaticDiscovery {
    fn get_peers(&self) -> Result<Vec<Arc<dyn Peer>>, ClientError> {
        Ok(self.peers.clone())
    }
}

/// Selects every discovered peer accepted by the filter.
pub struct DiscoverySelection {
    discovery: Arc<dyn DiscoveryService>,
}

impl DiscoverySelection {
    pub fn new(discovery: Arc<dyn DiscoveryService>) -> Self {
        Self { discovery }
    }
}

impl SelectionService for DiscoverySelection {
    fn get_endorsers_for_chaincode(
        &self,
        _chaincodes: &[ChaincodeCall],
        filter: &PeerFilter,
    ) -> Result<Vec<Arc<dyn Peer>>, ClientError> {
        Ok(self
            .discovery
            .get_peers()?
            .into_iter()
            .filter(|peer| filter(peer.as_ref()))
            .collect())
    }
}
