//! Syntax checks for domain names and backend addresses
//!
//! Both values end up on a single line of the route log, so anything that
//! would collide with the record separator or the line terminator is refused
//! here, before a record is ever written.

use crate::error::{Result, RouteError};
use crate::journal::{HEADER_PREFIX, SEPARATOR};
use url::Url;

/// Check that a domain name can be used as a routing key
pub fn domain_name(domain: &str) -> Result<()> {
    if domain.is_empty() {
        return Err(RouteError::invalid_domain(domain, "domain name is empty"));
    }
    if domain.contains(SEPARATOR) {
        return Err(RouteError::invalid_domain(
            domain,
            format!("domain name must not contain '{}'", SEPARATOR),
        ));
    }
    if domain.starts_with(HEADER_PREFIX) {
        return Err(RouteError::invalid_domain(
            domain,
            format!("domain name must not start with '{}'", HEADER_PREFIX),
        ));
    }
    if domain.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(RouteError::invalid_domain(
            domain,
            "domain name must not contain whitespace or control characters",
        ));
    }
    Ok(())
}

/// Parse a backend address into the URL requests are forwarded to
pub fn address(address: &str) -> Result<Url> {
    if address.contains(SEPARATOR) || address.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(RouteError::invalid_address(
            address,
            format!("address must not contain '{}' or whitespace", SEPARATOR),
        ));
    }

    let url = Url::parse(address).map_err(|e| RouteError::invalid_address(address, e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(RouteError::invalid_address(
                address,
                format!("unsupported scheme '{}'", other),
            ))
        }
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(RouteError::invalid_address(address, "address has no host"));
    }

    Ok(url)
}
