use super::TargetFilter;
use crate::net::to_address;
use crate::peer::Peer;
use crate::util::ClientError;
use log::warn;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Time-bounded exclusion of peer endpoints that recently failed.
///
/// Entries are keyed by address without scheme. An entry stops excluding
/// its peer once it expires; expired entries are dropped on the next write.
pub struct Greylist {
    expiry: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl Greylist {
    pub fn new(expiry: Duration) -> Self {
        Self {
            expiry,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Excludes every endpoint `err` can be attributed to. Errors without
    /// an endpoint are ignored.
    pub fn greylist(&self, err: &ClientError) {
        let endpoints = err.endpoints();
        if endpoints.is_empty() {
            return;
        }
        let now = Instant::now();
        let until = now + self.expiry;
        let mut entries = self.entries.lock();
        entries.retain(|_, expires| *expires > now);
        for endpoint in endpoints {
            warn!(
                "event=greylist_add endpoint={} expiry_ms={} error={}",
                endpoint,
                self.expiry.as_millis(),
                err
            );
            entries.insert(to_address(endpoint).to_string(), until);
        }
    }

    pub fn accept(&self, peer: &dyn Peer) -> bool {
        self.accept_url(peer.url())
    }

    pub fn accept_url(&self, url: &str) -> bool {
        match self.entries.lock().get(to_address(url)) {
            Some(expires) => *expires <= Instant::now(),
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TargetFilter for Greylist {
    fn accept(&self, peer: &dyn Peer) -> bool {
        Greylist::accept(self, peer)
    }
}
