//! Route service: the only component that touches both the log and the table
//!
//! Mutations are serialized by the log mutex. Each one appends its record
//! (blocking I/O, table lock not held) and then applies the change to the
//! table while the log mutex is still held. The table therefore always equals
//! a replay of some prefix of the log, in log order.

use crate::error::{Result, RouteError};
use crate::forward::ForwardHandler;
use crate::journal::{Journal, Record};
use crate::table::{Route, RoutingTable};
use crate::validate;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Thread-safe routing table backed by an append-only log
#[derive(Debug)]
pub struct RouteService {
    journal: Mutex<Option<Journal>>,
    table: RoutingTable,
    log_path: PathBuf,
}

impl RouteService {
    /// Open (or create) the log at `log_path` and replay it into a fresh table
    ///
    /// A malformed log is an error; callers are expected to refuse to start.
    pub fn open<P: AsRef<Path>>(log_path: P) -> Result<Self> {
        let journal = Journal::open(&log_path)?;
        let records = journal.replay()?;
        let record_count = records.len();
        let table = RoutingTable::from_records(records)?;

        info!(
            "Replayed {} record(s) from {} into {} route(s)",
            record_count,
            journal.path().display(),
            table.len()
        );

        Ok(Self {
            log_path: journal.path().to_path_buf(),
            journal: Mutex::new(Some(journal)),
            table,
        })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Address routed for `domain`, if any
    pub fn get_address(&self, domain: &str) -> Option<String> {
        self.table.lookup(domain).map(|route| route.address)
    }

    /// Forwarding handler for `domain`, or [`RouteError::NotFound`]
    pub fn get_handler(&self, domain: &str) -> Result<Arc<ForwardHandler>> {
        self.table
            .lookup(domain)
            .map(|route| route.handler)
            .ok_or_else(|| RouteError::NotFound(domain.to_string()))
    }

    /// Snapshot of every route, sorted by domain name
    pub fn list_entries(&self) -> BTreeMap<String, String> {
        self.table.snapshot()
    }

    /// Route `domain` to `address`, replacing any existing route
    ///
    /// Nothing is written when validation fails.
    pub fn add_or_update_entry(&self, domain: &str, address: &str) -> Result<()> {
        validate::domain_name(domain)?;
        let route = Route::new(address)?;

        self.commit(Record::upsert(domain, address), |table| {
            table.upsert(domain, route);
        })?;

        info!("Routed {} to {}", domain, address);
        Ok(())
    }

    /// Remove the route for `domain`
    ///
    /// A tombstone is written even when the domain is unknown, so deleting
    /// twice is not an error.
    pub fn delete_entry(&self, domain: &str) -> Result<()> {
        validate::domain_name(domain)?;

        let mut existed = false;
        self.commit(Record::delete(domain), |table| {
            existed = table.delete(domain).is_some();
        })?;

        if existed {
            info!("Removed route for {}", domain);
        } else {
            debug!("Tombstoned unknown domain {}", domain);
        }
        Ok(())
    }

    /// Close the log after in-flight mutations finish
    ///
    /// Lookups keep answering from the last table state; mutations fail with
    /// [`RouteError::Closed`].
    pub fn close(&self) {
        if self.journal.lock().take().is_some() {
            info!("Closed route log {}", self.log_path.display());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.journal.lock().is_none()
    }

    fn commit(&self, record: Record, apply: impl FnOnce(&RoutingTable)) -> Result<()> {
        let mut guard = self.journal.lock();
        let journal = guard.as_mut().ok_or(RouteError::Closed)?;

        if let Err(e) = journal.append(&record) {
            if journal.is_broken() {
                error!("Route log {} is unusable, refusing further mutations", self.log_path.display());
                guard.take();
            }
            return Err(e);
        }

        apply(&self.table);
        Ok(())
    }
}
