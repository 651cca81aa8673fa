//! Admin front door
//!
//! Translates HTTP verbs and query parameters into route service calls:
//!
//! | Request | Operation |
//! |---|---|
//! | `GET /` | list every route, one `domain:address` per line |
//! | `GET /?domainName=d` | address for `d` |
//! | `POST /?domainName=d&address=a` | add or update |
//! | `DELETE /?domainName=d` | delete |
//! | `GET /health` | liveness check |

use crate::error::RouteError;
use crate::response::{empty_response, text_response, ProxyBody};
use crate::service::RouteService;
use anyhow::{anyhow, Result};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Admin server configuration
#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub addr: SocketAddr,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8090)),
        }
    }
}

/// Query parameters understood by the admin endpoint
#[derive(Debug, Default, PartialEq, Eq)]
struct AdminParams {
    domain_name: Option<String>,
    address: Option<String>,
    has_query: bool,
}

impl AdminParams {
    fn from_uri(uri: &Uri) -> Self {
        let mut params = Self::default();
        let Some(query) = uri.query().filter(|q| !q.is_empty()) else {
            return params;
        };

        params.has_query = true;
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "domainName" => params.domain_name = Some(value.into_owned()),
                "address" => params.address = Some(value.into_owned()),
                _ => {}
            }
        }
        params
    }
}

/// Admin server
pub struct AdminServer {
    config: AdminConfig,
    routes: Arc<RouteService>,
}

impl AdminServer {
    pub fn new(config: AdminConfig, routes: Arc<RouteService>) -> Self {
        Self { config, routes }
    }

    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.config.addr).await?;
        self.serve(listener).await
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!("Admin server listening on {}", listener.local_addr()?);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let server = self.clone();

            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, remote_addr).await {
                    debug!("Admin connection error from {}: {}", remote_addr, e);
                }
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, remote_addr: SocketAddr) -> Result<()> {
        let io = TokioIo::new(stream);

        http1::Builder::new()
            .serve_connection(
                io,
                service_fn(move |req: Request<Incoming>| {
                    let server = self.clone();
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    async move { Ok::<_, Infallible>(server.dispatch(method, uri, remote_addr).await) }
                }),
            )
            .await
            .map_err(|e| anyhow!("HTTP service error: {}", e))
    }

    /// Answer one admin request from an async context
    ///
    /// Mutations fsync the route log, so they run on the blocking pool.
    pub async fn dispatch(self: Arc<Self>, method: Method, uri: Uri, remote_addr: SocketAddr) -> Response<ProxyBody> {
        if !matches!(method, Method::POST | Method::DELETE) {
            return self.respond(&method, &uri, remote_addr);
        }

        match tokio::task::spawn_blocking(move || self.respond(&method, &uri, remote_addr)).await {
            Ok(response) => response,
            Err(e) => {
                error!("Admin request from {} did not complete: {}", remote_addr, e);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }

    /// Answer one admin request; request bodies are ignored
    pub fn respond(&self, method: &Method, uri: &Uri, remote_addr: SocketAddr) -> Response<ProxyBody> {
        if uri.path() == "/health" {
            return text_response(StatusCode::OK, "OK");
        }

        let params = AdminParams::from_uri(uri);

        match *method {
            Method::GET if !params.has_query => {
                debug!("Listing routes for {}", remote_addr);
                let mut body = String::new();
                for (domain, address) in self.routes.list_entries() {
                    let _ = writeln!(body, "{}:{}", domain, address);
                }
                text_response(StatusCode::OK, body)
            }
            Method::GET => {
                let domain = params.domain_name.unwrap_or_default();
                debug!("Getting address for {} from {}", domain, remote_addr);
                match self.routes.get_address(&domain) {
                    Some(address) => text_response(StatusCode::OK, format!("{}:{}", domain, address)),
                    None => text_response(
                        StatusCode::NOT_FOUND,
                        RouteError::NotFound(domain).to_string(),
                    ),
                }
            }
            Method::POST => {
                let domain = params.domain_name.unwrap_or_default();
                let address = params.address.unwrap_or_default();
                info!("Add/update {}:{} from {}", domain, address, remote_addr);
                match self.routes.add_or_update_entry(&domain, &address) {
                    Ok(()) => empty_response(StatusCode::OK),
                    Err(e) => failure("failed to add new entry", e),
                }
            }
            Method::DELETE => {
                let domain = params.domain_name.unwrap_or_default();
                info!("Delete {} from {}", domain, remote_addr);
                match self.routes.delete_entry(&domain) {
                    Ok(()) => empty_response(StatusCode::OK),
                    Err(e) => failure("failed to delete the entry", e),
                }
            }
            _ => text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"),
        }
    }
}

fn failure(context: &str, err: RouteError) -> Response<ProxyBody> {
    warn!("{}: {}", context, err);
    text_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("{}: {}", context, err),
    )
}
