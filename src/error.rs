//! Error types for the routing core

use thiserror::Error;

/// Result type for routing table operations
pub type Result<T> = std::result::Result<T, RouteError>;

/// Errors produced by the route log, the routing table and its service
#[derive(Debug, Error)]
pub enum RouteError {
    /// No route is registered for the domain
    #[error("domain name not found: {0}")]
    NotFound(String),

    /// The domain name cannot be used as a routing key
    #[error("invalid domain name '{domain}': {reason}")]
    InvalidDomain { domain: String, reason: String },

    /// The address is not a usable backend URL
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Reading or appending the route log failed
    #[error("route log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The route log contains a record that cannot be decoded
    #[error("malformed route log at line {line}: {reason}")]
    Format { line: usize, reason: String },

    /// The service has been shut down and no longer accepts mutations
    #[error("route service is closed")]
    Closed,
}

impl RouteError {
    #[inline]
    pub fn invalid_domain(domain: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDomain {
            domain: domain.into(),
            reason: reason.into(),
        }
    }

    #[inline]
    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    #[inline]
    pub fn format(line: usize, reason: impl Into<String>) -> Self {
        Self::Format {
            line,
            reason: reason.into(),
        }
    }

    /// True for errors caused by caller input rather than the service itself
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidDomain { .. } | Self::InvalidAddress { .. })
    }
}
