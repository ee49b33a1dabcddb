//! dmap-node: one member of a DMap cluster.
//!
//! Usage:
//!   dmap-node --bind 127.0.0.1:3320
//!   dmap-node --bind 127.0.0.1:3321 --seed 127.0.0.1:3320
//!   dmap-node --config config/node.toml

use anyhow::{Context, Result};
use clap::Parser;
use dmap_cluster::config::{Config, ConfigOverrides};
use dmap_cluster::membership::NodeId;
use dmap_cluster::node::ClusterNode;
use dmap_cluster::storage::EngineRegistry;
use dmap_cluster::transport::handlers::app;
use dmap_cluster::transport::http::HttpTransport;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Partitioned, replicated in-memory DMap node.
#[derive(Parser, Debug)]
#[command(name = "dmap-node")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP bind address, also used as the member identity.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Existing member to join through (repeatable).
    #[arg(long = "seed")]
    seeds: Vec<SocketAddr>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_overrides(&ConfigOverrides {
        bind: cli.bind,
        seeds: cli.seeds,
        log_level: cli.log_level,
    });
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!("Starting node on {}", config.bind);
    if !config.seeds.is_empty() {
        tracing::info!("Seed nodes: {:?}", config.seeds);
    } else {
        tracing::info!("Starting as seed node (founder)");
    }

    // 1. Transport + storage engines:
    let transport = Arc::new(HttpTransport::new(config.replication.timeout()));
    let registry = EngineRegistry::with_defaults();

    // 2. Membership, routing, entry engine, locks:
    let node = ClusterNode::start(&config, registry, transport.clone())
        .context("failed to start node services")?;
    tracing::info!("Node ID: {}", node.membership.local_id());

    // 3. HTTP Router:
    let app = app(node.service.clone(), node.locks.clone());

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
    });

    // 4. Join the cluster through the seeds:
    for seed in &config.seeds {
        match transport.join(*seed, &node.membership.local_node).await {
            Ok(members) => {
                let added = node.membership.merge(members);
                tracing::info!("Joined via {} ({} members learned)", seed, added);
            }
            Err(e) => tracing::error!("Failed to join via {}: {}", seed, e),
        }
    }
    // Seeds only learned about us; announce ourselves to everyone else.
    for member in node.membership.get_alive_members() {
        if member.id == *node.membership.local_id() || config.seeds.contains(&member.addr) {
            continue;
        }
        if let Err(e) = transport.join(member.addr, &node.membership.local_node).await {
            tracing::warn!("Failed to announce to {}: {}", member.id, e);
        }
    }

    // 5. Spawn stats reporter:
    let stats_service = node.service.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;
            let stats = stats_service.stats(false);
            tracing::info!(
                "Cluster stats: {} alive nodes, routing v{}",
                stats_service.membership().get_alive_members().len(),
                stats.routing_version
            );
            tracing::info!(
                "  - partitions primary={} backup={} dmaps={} entries={} evicted={}",
                stats.partitions.primary,
                stats.partitions.backup,
                stats.dmaps,
                stats.entries,
                stats.evicted
            );
        }
    });

    tracing::info!("HTTP server listening on {}", config.bind);
    tracing::info!("Press Ctrl+C to shutdown");

    // 6. Serve until Ctrl+C:
    server.await??;

    tracing::info!("Shutting down");
    let local: NodeId = node.membership.local_id().clone();
    for member in node.membership.alive_ids() {
        if member == local {
            continue;
        }
        if let Err(e) = transport.leave(&member, &local).await {
            tracing::warn!("Failed to notify {} of departure: {}", member, e);
        }
    }
    node.shutdown();

    Ok(())
}
