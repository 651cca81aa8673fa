//! Integration tests for tolinks
//!
//! Tests the full server functionality including:
//! - Proxying by Host header and by path segment
//! - Runtime route changes through the admin listener
//! - Not-found and bad-gateway responses
//! - Routes surviving a restart

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::net::TcpListener;
use tolinks::{AdminConfig, AdminServer, DomainSource, ProxyConfig, ProxyServer, RouteService};

/// Backend that echoes what it received
async fn run_backend_server(response_body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = TokioIo::new(stream);

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| async move {
                    let header = |name: &str| {
                        req.headers()
                            .get(name)
                            .and_then(|h| h.to_str().ok())
                            .unwrap_or("none")
                            .to_string()
                    };
                    let response_text = format!(
                        "{}|uri={}|host={}|xff={}",
                        response_body,
                        req.uri(),
                        header("host"),
                        header("x-forwarded-for")
                    );

                    Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(response_text))))
                });

                let _ = http1::Builder::new().serve_connection(io, service).await;
            });
        }
    });

    addr
}

struct TestServer {
    proxy_addr: SocketAddr,
    admin_addr: SocketAddr,
    routes: Arc<RouteService>,
}

async fn start_server(log_path: &Path, domain_source: DomainSource) -> TestServer {
    let routes = Arc::new(RouteService::open(log_path).unwrap());

    let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let admin_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = proxy_listener.local_addr().unwrap();
    let admin_addr = admin_listener.local_addr().unwrap();

    let proxy = Arc::new(ProxyServer::new(
        ProxyConfig {
            addr: proxy_addr,
            domain_source,
        },
        routes.clone(),
    ));
    let admin = Arc::new(AdminServer::new(AdminConfig { addr: admin_addr }, routes.clone()));

    tokio::spawn(async move {
        let _ = proxy.serve(proxy_listener).await;
    });
    tokio::spawn(async move {
        let _ = admin.serve(admin_listener).await;
    });

    TestServer {
        proxy_addr,
        admin_addr,
        routes,
    }
}

async fn add_route(client: &reqwest::Client, admin_addr: SocketAddr, domain: &str, address: &str) {
    let mut url = reqwest::Url::parse(&format!("http://{}/", admin_addr)).unwrap();
    url.query_pairs_mut()
        .append_pair("domainName", domain)
        .append_pair("address", address);

    let response = client.post(url).send().await.unwrap();
    assert!(response.status().is_success());
}

#[tokio::test]
async fn test_proxy_by_host_header() {
    let dir = tempdir().unwrap();
    let backend = run_backend_server("BACKEND_RESPONSE").await;
    let server = start_server(&dir.path().join("routes.log"), DomainSource::Host).await;
    let client = reqwest::Client::new();

    add_route(&client, server.admin_addr, "a.com", &format!("http://{}", backend)).await;

    let response = client
        .get(format!("http://{}/test?x=1", server.proxy_addr))
        .header("Host", "a.com")
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    let body = response.text().await.unwrap();
    assert!(body.contains("BACKEND_RESPONSE"));
    assert!(body.contains("uri=/test?x=1"));
    assert!(body.contains("host=a.com"));
    assert!(body.contains("xff=127.0.0.1"));
}

#[tokio::test]
async fn test_proxy_by_path_segment() {
    let dir = tempdir().unwrap();
    let backend = run_backend_server("PATH_MODE").await;
    let server = start_server(&dir.path().join("routes.log"), DomainSource::Path).await;
    let client = reqwest::Client::new();

    add_route(&client, server.admin_addr, "docs", &format!("http://{}/base", backend)).await;

    let response = client
        .get(format!("http://{}/docs/page", server.proxy_addr))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    let body = response.text().await.unwrap();
    assert!(body.contains("PATH_MODE"));
    assert!(body.contains("uri=/base/page"));
}

#[tokio::test]
async fn test_proxy_no_route_404() {
    let dir = tempdir().unwrap();
    let server = start_server(&dir.path().join("routes.log"), DomainSource::Host).await;

    let response = reqwest::Client::new()
        .get(format!("http://{}/test", server.proxy_addr))
        .header("Host", "unknown.example.com")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn test_proxy_missing_host_400() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let dir = tempdir().unwrap();
    let server = start_server(&dir.path().join("routes.log"), DomainSource::Host).await;

    let mut stream = TcpStream::connect(server.proxy_addr).await.unwrap();
    stream.write_all(b"GET /test HTTP/1.1\r\n\r\n").await.unwrap();

    let mut response = vec![0u8; 1024];
    let n = stream.read(&mut response).await.unwrap();
    let response_str = String::from_utf8_lossy(&response[..n]);

    assert!(response_str.contains("400"));
}

#[tokio::test]
async fn test_backend_unreachable_502() {
    let dir = tempdir().unwrap();
    let server = start_server(&dir.path().join("routes.log"), DomainSource::Host).await;

    // Reserve a port, then free it so nothing is listening there
    let unused = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
    server
        .routes
        .add_or_update_entry("dead.com", &format!("http://{}", unused))
        .unwrap();

    let response = reqwest::Client::new()
        .get(format!("http://{}/", server.proxy_addr))
        .header("Host", "dead.com")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 502);
}

#[tokio::test]
async fn test_route_update_and_delete_take_effect() {
    let dir = tempdir().unwrap();
    let first = run_backend_server("FIRST").await;
    let second = run_backend_server("SECOND").await;
    let server = start_server(&dir.path().join("routes.log"), DomainSource::Host).await;
    let client = reqwest::Client::new();
    let proxy_url = format!("http://{}/", server.proxy_addr);

    add_route(&client, server.admin_addr, "x.com", &format!("http://{}", first)).await;
    let body = client.get(&proxy_url).header("Host", "x.com").send().await.unwrap().text().await.unwrap();
    assert!(body.contains("FIRST"));

    add_route(&client, server.admin_addr, "x.com", &format!("http://{}", second)).await;
    let body = client.get(&proxy_url).header("Host", "x.com").send().await.unwrap().text().await.unwrap();
    assert!(body.contains("SECOND"));

    let response = client
        .delete(format!("http://{}/?domainName=x.com", server.admin_addr))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let response = client.get(&proxy_url).header("Host", "x.com").send().await.unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn test_admin_list_and_get() {
    let dir = tempdir().unwrap();
    let server = start_server(&dir.path().join("routes.log"), DomainSource::Host).await;
    let client = reqwest::Client::new();

    add_route(&client, server.admin_addr, "b.com", "http://10.0.0.2").await;
    add_route(&client, server.admin_addr, "a.com", "http://10.0.0.1").await;

    let body = client
        .get(format!("http://{}/", server.admin_addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "a.com:http://10.0.0.1\nb.com:http://10.0.0.2\n");

    let body = client
        .get(format!("http://{}/?domainName=b.com", server.admin_addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "b.com:http://10.0.0.2");

    let response = client
        .get(format!("http://{}/?domainName=c.com", server.admin_addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn test_routes_survive_restart() {
    let dir = tempdir().unwrap();
    let log_path = dir.path().join("routes.log");
    let backend = run_backend_server("RESTORED").await;
    let client = reqwest::Client::new();

    let server = start_server(&log_path, DomainSource::Host).await;
    add_route(&client, server.admin_addr, "a.com", &format!("http://{}", backend)).await;
    add_route(&client, server.admin_addr, "gone.com", "http://10.0.0.9").await;
    client
        .delete(format!("http://{}/?domainName=gone.com", server.admin_addr))
        .send()
        .await
        .unwrap();
    server.routes.close();

    let restarted = start_server(&log_path, DomainSource::Host).await;
    assert_eq!(restarted.routes.list_entries().len(), 1);

    let body = client
        .get(format!("http://{}/", restarted.proxy_addr))
        .header("Host", "a.com")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("RESTORED"));
}

#[tokio::test]
async fn test_corrupt_log_refuses_to_start() {
    let dir = tempdir().unwrap();
    let log_path = dir.path().join("routes.log");
    std::fs::write(&log_path, "a.com|http://10.0.0.1\nbroken line\n").unwrap();

    assert!(RouteService::open(&log_path).is_err());
}
