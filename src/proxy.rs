//! Proxy front door
//!
//! Accepts HTTP connections, works out which domain a request is for and
//! hands it to that domain's forwarding handler.

use crate::error::RouteError;
use crate::response::{text_response, ProxyBody};
use crate::service::RouteService;
use anyhow::{anyhow, Result};
use hyper::body::Incoming;
use hyper::header::HOST;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

/// Where the proxy reads the domain name of an incoming request from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DomainSource {
    /// The `Host` header, without its port and lowercased
    #[default]
    Host,
    /// The first path segment, which is removed before forwarding
    Path,
}

impl FromStr for DomainSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "host" => Ok(Self::Host),
            "path" => Ok(Self::Path),
            other => Err(format!("unknown domain source '{}' (expected 'host' or 'path')", other)),
        }
    }
}

impl fmt::Display for DomainSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Path => f.write_str("path"),
        }
    }
}

/// Proxy server configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub addr: SocketAddr,
    pub domain_source: DomainSource,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            domain_source: DomainSource::Host,
        }
    }
}

/// Proxy server
pub struct ProxyServer {
    config: ProxyConfig,
    routes: Arc<RouteService>,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig, routes: Arc<RouteService>) -> Self {
        Self { config, routes }
    }

    /// Bind the configured address and serve until an accept error
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.config.addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(
            "Proxy server listening on {} (domain from {})",
            listener.local_addr()?,
            self.config.domain_source
        );

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let server = self.clone();

            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, remote_addr).await {
                    debug!("Proxy connection error from {}: {}", remote_addr, e);
                }
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, remote_addr: SocketAddr) -> Result<()> {
        let io = TokioIo::new(stream);

        http1::Builder::new()
            .preserve_header_case(true)
            .serve_connection(
                io,
                service_fn(move |req| {
                    let server = self.clone();
                    async move { server.handle_request(req, remote_addr).await }
                }),
            )
            .await
            .map_err(|e| anyhow!("HTTP service error: {}", e))
    }

    async fn handle_request(
        &self,
        req: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> std::result::Result<Response<ProxyBody>, Infallible> {
        debug!("{} {} from {}", req.method(), req.uri(), remote_addr);

        let Some((domain, req)) = route_request(req, self.config.domain_source) else {
            return Ok(text_response(StatusCode::BAD_REQUEST, "Missing domain name"));
        };

        match self.routes.get_handler(&domain) {
            Ok(handler) => Ok(handler.forward(req, remote_addr).await),
            Err(RouteError::NotFound(_)) => {
                debug!("No route for domain {}", domain);
                Ok(text_response(StatusCode::NOT_FOUND, "No route for domain"))
            }
            Err(e) => {
                error!("Route lookup for {} failed: {}", domain, e);
                Ok(text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"))
            }
        }
    }
}

/// Extract the domain name and the request to forward
///
/// Host names are case-insensitive, so in host mode the domain is
/// lowercased; routes should be registered in lowercase. In path mode the
/// domain segment is taken verbatim and cut from the URI before forwarding.
pub fn route_request<B>(mut req: Request<B>, source: DomainSource) -> Option<(String, Request<B>)> {
    match source {
        DomainSource::Host => {
            let host = req.headers().get(HOST).and_then(|h| h.to_str().ok())?;
            let domain = strip_port(host);
            if domain.is_empty() {
                return None;
            }
            Some((domain.to_ascii_lowercase(), req))
        }
        DomainSource::Path => {
            let (domain, uri) = split_domain_segment(req.uri())?;
            *req.uri_mut() = uri;
            Some((domain, req))
        }
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // IPv6 literal
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    host.split(':').next().unwrap_or(host)
}

fn split_domain_segment(uri: &Uri) -> Option<(String, Uri)> {
    let path = uri.path().strip_prefix('/').unwrap_or(uri.path());
    let (domain, rest) = match path.find('/') {
        Some(idx) => (&path[..idx], &path[idx..]),
        None => (path, "/"),
    };
    if domain.is_empty() {
        return None;
    }

    let path_and_query = match uri.query() {
        Some(q) => format!("{}?{}", rest, q),
        None => rest.to_string(),
    };
    let uri = path_and_query.parse().ok()?;
    Some((domain.to_string(), uri))
}
