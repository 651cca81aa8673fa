//! CLI tool for managing tolinks routes through the admin listener
//!
//! Usage:
//!   tolinks-admin get <domain>
//!   tolinks-admin list [--json]
//!   tolinks-admin add <domain> <address>
//!   tolinks-admin delete <domain>

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use reqwest::{Client, Method, Response};
use serde::Serialize;

/// CLI tool for managing tolinks routes
#[derive(Parser, Debug)]
#[command(name = "tolinks-admin")]
#[command(author = "tolinks Contributors")]
#[command(version)]
#[command(about = "Manage the routes of a running tolinks server")]
struct Args {
    /// Admin server URL
    #[arg(short = 's', long, env = "TOLINKS_SERVER", default_value = "http://127.0.0.1:8090")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get the address of a domain name
    #[command(alias = "g")]
    Get {
        /// Domain name (e.g., api.example.com)
        domain: String,
    },

    /// List all domain:address entries
    #[command(alias = "l")]
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Add a route, or update the address of an existing one
    #[command(alias = "a")]
    Add {
        /// Domain name
        domain: String,

        /// Backend address (e.g., http://10.0.0.1:3000)
        address: String,
    },

    /// Delete the route of a domain name
    #[command(alias = "d")]
    Delete {
        /// Domain name
        domain: String,
    },
}

#[derive(Debug, Serialize)]
struct Entry<'a> {
    domain: &'a str,
    address: &'a str,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let client = Client::new();

    match args.command {
        Commands::Get { domain } => {
            let response = send(&client, Method::GET, &args.server, &[("domainName", domain.as_str())]).await?;
            println!("{}", response.text().await?);
        }

        Commands::List { json } => {
            let response = send(&client, Method::GET, &args.server, &[]).await?;
            let body = response.text().await?;
            let entries: Vec<Entry> = body.lines().filter_map(parse_entry).collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No routes found");
            } else {
                println!("{:<40} {:<40}", "DOMAIN", "ADDRESS");
                println!("{}", "-".repeat(80));
                for entry in &entries {
                    println!("{:<40} {:<40}", entry.domain, entry.address);
                }
                println!("\nTotal: {} route(s)", entries.len());
            }
        }

        Commands::Add { domain, address } => {
            send(
                &client,
                Method::POST,
                &args.server,
                &[("domainName", domain.as_str()), ("address", address.as_str())],
            )
            .await?;
            println!("Routed {} to {}", domain, address);
        }

        Commands::Delete { domain } => {
            send(&client, Method::DELETE, &args.server, &[("domainName", domain.as_str())]).await?;
            println!("Deleted route for {}", domain);
        }
    }

    Ok(())
}

/// Send one admin request and fail on any non-success status
async fn send(client: &Client, method: Method, server: &str, params: &[(&str, &str)]) -> Result<Response> {
    let mut url = reqwest::Url::parse(server)?;
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }

    let response = client.request(method, url).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("received status {} with message: {}", status.as_u16(), body.trim_end());
    }
    Ok(response)
}

/// Split a `domain:address` listing line at the first colon
fn parse_entry(line: &str) -> Option<Entry<'_>> {
    let (domain, address) = line.split_once(':')?;
    Some(Entry { domain, address })
}
