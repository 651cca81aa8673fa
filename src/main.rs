//! tolinks - Main entry point
//!
//! Runs the proxy and admin listeners over one shared routing table.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tolinks::{AdminConfig, AdminServer, DomainSource, ProxyConfig, ProxyServer, RouteService};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// tolinks - A domain-routed HTTP reverse proxy
#[derive(Parser, Debug)]
#[command(name = "tolinks")]
#[command(author = "tolinks Contributors")]
#[command(version)]
#[command(about = "A domain-routed HTTP reverse proxy with a runtime-editable routing table")]
struct Args {
    /// Address both listeners bind to
    #[arg(long, env = "TOLINKS_BIND", default_value = "127.0.0.1")]
    bind: IpAddr,

    /// Port of the proxy listener
    #[arg(long, env = "TOLINKS_PROXY_PORT", default_value = "8080")]
    proxy_port: u16,

    /// Port of the admin listener
    #[arg(long, env = "TOLINKS_ADMIN_PORT", default_value = "8090")]
    admin_port: u16,

    /// Route log path
    #[arg(long, env = "TOLINKS_LOG_PATH", default_value = "./data/routes.log")]
    log_path: PathBuf,

    /// Where to read the domain name from: "host" or "path"
    #[arg(long, env = "TOLINKS_DOMAIN_FROM", default_value = "host")]
    domain_from: DomainSource,

    /// Log level (trace, debug, info, warn, error) or a tracing filter
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting tolinks v{}", env!("CARGO_PKG_VERSION"));

    // A corrupt route log is fatal: refuse to start rather than serve a partial table
    let routes = Arc::new(
        RouteService::open(&args.log_path)
            .with_context(|| format!("failed to load route log {}", args.log_path.display()))?,
    );
    info!("Route log opened at: {}", routes.log_path().display());

    let proxy = Arc::new(ProxyServer::new(
        ProxyConfig {
            addr: SocketAddr::new(args.bind, args.proxy_port),
            domain_source: args.domain_from,
        },
        routes.clone(),
    ));
    let admin = Arc::new(AdminServer::new(
        AdminConfig {
            addr: SocketAddr::new(args.bind, args.admin_port),
        },
        routes.clone(),
    ));

    let result = tokio::select! {
        res = proxy.run() => res.context("proxy server exited unexpectedly"),
        res = admin.run() => res.context("admin server exited unexpectedly"),
        res = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            res.context("failed to listen for shutdown signal")
        }
    };

    routes.close();
    result
}
