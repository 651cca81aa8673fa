//! In-memory routing table
//!
//! Maps domain names to [`Route`]s behind a single reader/writer lock.
//! Lookups and snapshots share the lock; upserts and deletes take it
//! exclusively. A route is replaced as a whole, so a reader never sees an
//! address paired with a handler built from a different address.

use crate::error::Result;
use crate::forward::ForwardHandler;
use crate::journal::Record;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// One routing entry: the backend address and the handler derived from it
#[derive(Debug, Clone)]
pub struct Route {
    pub address: String,
    pub handler: Arc<ForwardHandler>,
}

impl Route {
    /// Build a route, deriving its handler from `address`
    pub fn new(address: &str) -> Result<Self> {
        let handler = ForwardHandler::new(address)?;
        Ok(Self {
            address: address.to_string(),
            handler: Arc::new(handler),
        })
    }
}

/// Concurrent domain → route map
#[derive(Debug, Default)]
pub struct RoutingTable {
    entries: RwLock<HashMap<String, Route>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a table by applying `records` in order from an empty map
    ///
    /// Handlers are only built for the routes that survive the fold.
    pub fn from_records<I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut addresses: HashMap<String, String> = HashMap::new();
        for record in records {
            match record {
                Record::Upsert { domain, address } => {
                    addresses.insert(domain, address);
                }
                Record::Delete { domain } => {
                    addresses.remove(&domain);
                }
            }
        }

        let mut entries = HashMap::with_capacity(addresses.len());
        for (domain, address) in addresses {
            entries.insert(domain, Route::new(&address)?);
        }

        Ok(Self {
            entries: RwLock::new(entries),
        })
    }

    pub fn lookup(&self, domain: &str) -> Option<Route> {
        self.entries.read().get(domain).cloned()
    }

    /// Insert or replace the route for `domain`
    pub fn upsert(&self, domain: impl Into<String>, route: Route) {
        self.entries.write().insert(domain.into(), route);
    }

    /// Remove the route for `domain`; absent domains are ignored
    pub fn delete(&self, domain: &str) -> Option<Route> {
        self.entries.write().remove(domain)
    }

    /// Point-in-time copy of every domain and its address, sorted by domain
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .read()
            .iter()
            .map(|(domain, route)| (domain.clone(), route.address.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
