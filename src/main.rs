//! Hostname-translating reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────┐
//!                     │                 HOSTBRIDGE                    │
//!                     │                                               │
//!   Client Request    │  ┌────────┐   ┌──────────┐   ┌────────────┐ │
//!   ──────────────────┼─▶│  http  │──▶│ identity │──▶│  hostname  │ │
//!   (test hostname)   │  │ server │   │ rewrite  │   │  resolver  │ │
//!                     │  └────────┘   └──────────┘   └─────┬──────┘ │
//!                     │                                     │        │
//!                     │        ┌──────────┐   ┌─────────────▼─────┐ │
//!                     │        │  rules   │   │  loopback/LAN     │ │
//!                     │        │ (CORS +  │   │     guard         │ │
//!                     │        │hardcoded)│   └─────────┬─────────┘ │
//!                     │        └────┬─────┘             │           │
//!                     │             │                   ▼           │
//!   Client Response   │        ┌────▼─────────────────────────────┐ │
//!   ◀─────────────────┼────────│ forwarder (rewrite Location,     │─┼──▶ Production
//!   (rewritten back)  │        │ cookies, CORS on the way back)   │ │    Upstream
//!                     │        └──────────────────────────────────┘ │
//!                     │                                              │
//!                     │  Cross-cutting: config / observability /     │
//!                     │  admin / lifecycle                           │
//!                     └──────────────────────────────────────────────┘
//! ```

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hostbridge::config::loader::load_config;
use hostbridge::config::watcher::RuleWatcher;
use hostbridge::config::ProxyConfig;
use hostbridge::pipeline::Pipeline;
use hostbridge::resolver::AddressResolver;
use hostbridge::rules::store::RuleStore;
use hostbridge::{HttpServer, Shutdown};

#[derive(Parser, Debug)]
#[command(name = "hostbridge", version, about = "Hostname-translating reverse proxy")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    let default_filter = format!(
        "hostbridge={},tower_http=info",
        config.observability.log_level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "hostbridge starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        test_site_pattern = %config.hostname.test_site_pattern,
        production_apex = %config.hostname.production_apex,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => hostbridge::observability::metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let rules = Arc::new(RuleStore::new(&config.rules)?);

    // Keep the watcher handle alive for the life of the process.
    let _watcher = if config.rules.watch {
        Some(RuleWatcher::new(rules.clone()).run()?)
    } else {
        None
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(address = %local_addr, "Listening for connections");

    let bound: Vec<IpAddr> = vec![local_addr.ip()];
    let pipeline = Arc::new(Pipeline::from_config(
        &config,
        rules.clone(),
        AddressResolver::Dns,
        &bound,
    )?);

    let shutdown = Arc::new(Shutdown::new());
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.listen_for_signals().await });
    }

    if config.admin.enabled {
        let admin_router = hostbridge::admin::setup_admin_router(&config.admin, rules.clone());
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %admin_listener.local_addr()?, "Admin endpoints listening");
        let mut rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = axum::serve(admin_listener, admin_router)
                .with_graceful_shutdown(async move {
                    let _ = rx.recv().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Admin server failed");
            }
        });
    }

    let server = HttpServer::new(config, pipeline);
    server.run(listener, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
