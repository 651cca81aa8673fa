//! Single-host forwarding handler
//!
//! A [`ForwardHandler`] is derived from one backend address and proxies any
//! request it is given to that backend. It holds no connection state, so a
//! route's handler can be rebuilt from its address at any time.

use crate::error::Result;
use crate::response::{text_response, ProxyBody};
use crate::validate;
use anyhow::{anyhow, Context};
use http_body_util::BodyExt;
use hyper::body::Body;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, HOST};
use hyper::{Request, Response, StatusCode, Uri, Version};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use rustls::pki_types::ServerName;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, error};
use url::Url;

/// Headers that only apply to a single transport hop
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

static TLS_CONNECTOR: Lazy<TlsConnector> = Lazy::new(|| {
    let roots = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect(),
    };
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
});

/// Reverse-proxy handler for one backend address
#[derive(Debug, Clone)]
pub struct ForwardHandler {
    address: String,
    target: Url,
}

impl ForwardHandler {
    /// Build a handler for `address`, which must be an absolute http(s) URL
    pub fn new(address: &str) -> Result<Self> {
        let target = validate::address(address)?;
        Ok(Self {
            address: address.to_string(),
            target,
        })
    }

    /// The address this handler was built from
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    fn is_tls(&self) -> bool {
        self.target.scheme() == "https"
    }

    /// Forward `req` to the backend and return its response
    ///
    /// Backend failures become a 502 response; this never returns an error.
    pub async fn forward<B>(&self, req: Request<B>, remote_addr: SocketAddr) -> Response<ProxyBody>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match self.try_forward(req, remote_addr).await {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to forward to {}: {:#}", self.address, e);
                text_response(StatusCode::BAD_GATEWAY, "Bad Gateway")
            }
        }
    }

    async fn try_forward<B>(&self, req: Request<B>, remote_addr: SocketAddr) -> anyhow::Result<Response<ProxyBody>>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let req = self.prepare_request(req, remote_addr)?;

        let host = self
            .target
            .host_str()
            .ok_or_else(|| anyhow!("backend address has no host"))?;
        let port = self
            .target
            .port_or_known_default()
            .ok_or_else(|| anyhow!("backend address has no port"))?;
        let authority = format!("{}:{}", host, port);

        debug!("Proxying {} to {}", req.uri(), authority);

        let stream = TcpStream::connect(&authority)
            .await
            .with_context(|| format!("failed to connect to backend {}", authority))?;

        let response = if self.is_tls() {
            let name = ServerName::try_from(host.trim_matches(|c| c == '[' || c == ']'))
                .map_err(|e| anyhow!("invalid TLS server name '{}': {}", host, e))?
                .to_owned();
            let stream = TLS_CONNECTOR
                .connect(name, stream)
                .await
                .with_context(|| format!("TLS handshake with {} failed", authority))?;
            send(stream, req).await?
        } else {
            send(stream, req).await?
        };

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, body.boxed()))
    }

    /// Rewrite an incoming request so it can be sent to the backend
    fn prepare_request<B>(&self, req: Request<B>, remote_addr: SocketAddr) -> anyhow::Result<Request<B>> {
        let (mut parts, body) = req.into_parts();

        parts.uri = self.outgoing_uri(&parts.uri)?;
        parts.version = Version::HTTP_11;

        let original_host = parts
            .headers
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);

        strip_hop_by_hop(&mut parts.headers);

        let forwarded_for = match parts.headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
            Some(prior) => format!("{}, {}", prior, remote_addr.ip()),
            None => remote_addr.ip().to_string(),
        };
        parts
            .headers
            .insert("x-forwarded-for", HeaderValue::from_str(&forwarded_for)?);
        parts
            .headers
            .insert("x-forwarded-proto", HeaderValue::from_static("http"));

        match original_host {
            Some(host) => {
                parts
                    .headers
                    .insert("x-forwarded-host", HeaderValue::from_str(&host)?);
            }
            None => {
                let authority = match self.target.port() {
                    Some(port) => format!("{}:{}", self.target.host_str().unwrap_or_default(), port),
                    None => self.target.host_str().unwrap_or_default().to_string(),
                };
                parts.headers.insert(HOST, HeaderValue::from_str(&authority)?);
            }
        }

        Ok(Request::from_parts(parts, body))
    }

    /// Join the target path with the request path and merge query strings
    fn outgoing_uri(&self, uri: &Uri) -> anyhow::Result<Uri> {
        let path = join_paths(self.target.path(), uri.path());

        let query = match (self.target.query().filter(|q| !q.is_empty()), uri.query().filter(|q| !q.is_empty())) {
            (Some(target), Some(request)) => Some(format!("{}&{}", target, request)),
            (Some(target), None) => Some(target.to_string()),
            (None, Some(request)) => Some(request.to_string()),
            (None, None) => None,
        };

        let path_and_query = match query {
            Some(q) => format!("{}?{}", path, q),
            None => path,
        };

        path_and_query.parse().context("Invalid URI")
    }
}

async fn send<S, B>(io: S, req: Request<B>) -> anyhow::Result<Response<hyper::body::Incoming>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .context("Failed to establish connection to backend")?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Backend connection error: {}", e);
        }
    });

    sender
        .send_request(req)
        .await
        .context("Failed to send request to backend")
}

fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
