//! tolinks - A domain-routed HTTP reverse proxy
//!
//! Provides:
//! - A routing table from domain name to backend address
//! - An append-only route log that rebuilds the table on restart
//! - A proxy listener that forwards by Host header or first path segment
//! - An admin listener to list, get, add and delete routes at runtime

pub mod admin;
pub mod error;
pub mod forward;
pub mod journal;
pub mod proxy;
pub mod response;
pub mod service;
pub mod table;
pub mod validate;

pub use admin::{AdminConfig, AdminServer};
pub use error::{Result, RouteError};
pub use forward::ForwardHandler;
pub use journal::{Journal, Record};
pub use proxy::{DomainSource, ProxyConfig, ProxyServer};
pub use service::RouteService;
pub use table::{Route, RoutingTable};
