use super::{DiscoveryService, TargetFilter};
use crate::peer::Peer;
use crate::util::ClientError;
use std::sync::Arc;

/// Discovery service whose peers are narrowed by a [`TargetFilter`].
pub struct FilteredDiscovery {
    target: Arc<dyn DiscoveryService>,
    filter: Arc<dyn TargetFilter>,
}

impl FilteredDiscovery {
    pub fn new(target: Arc<dyn DiscoveryService>, filter: Arc<dyn TargetFilter>) -> Self {
        Self { target, filter }
    }
}

impl DiscoveryService for FilteredDiscovery {
    fn get_peers(&self) -> Result<Vec<Arc<dyn Peer>>, ClientError> {
        Ok(self
            .target
            .get_peers()?
            .into_iter()
            .filter(|peer| self.filter.accept(peer.as_ref()))
            .collect())
    }
}
