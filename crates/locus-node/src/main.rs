//! Locus node - hosts capabilities over HTTP and takes part in discovery.
//!
//! `locus-node serve` registers the `echo` and `locator` (admin)
//! capabilities, serves each on its own port and advertises them.
//! `locus-node discover` listens to the multicast group and prints what it
//! hears.

mod echo;
mod node;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use locus_core::{Discovery, DiscoveryMode, LocusConfig, MulticastConfig, NetworkDiscovery};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "locus-node")]
#[command(about = "Capability host and discovery node for Locus")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Configuration file (JSON)
    #[arg(short, long, global = true, env = "LOCUS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the built-in capabilities
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,

        /// Port for the echo capability (0 = auto-assign)
        #[arg(short, long, default_value = "0")]
        port: u16,

        /// Discovery mode: local-only or network
        #[arg(long)]
        discovery: Option<DiscoveryMode>,

        /// SQLite cache database path
        #[arg(long)]
        cache_db: Option<PathBuf>,

        /// RAM tier capacity (entries)
        #[arg(long)]
        ram_capacity: Option<usize>,
    },

    /// Listen for announcements and print the descriptor table
    Discover {
        /// Seconds to listen
        #[arg(short, long, default_value = "5")]
        seconds: u64,
    },
}

fn init_logging(debug: bool, json: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug, args.json_logs);

    let mut config = match &args.config {
        Some(path) => LocusConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => LocusConfig::default(),
    };

    match args.command {
        Command::Serve {
            host,
            port,
            discovery,
            cache_db,
            ram_capacity,
        } => {
            if let Some(mode) = discovery {
                config.discovery.mode = mode;
            }
            if let Some(path) = cache_db {
                config.cache.db_path = Some(path);
            }
            if let Some(capacity) = ram_capacity {
                config.cache.ram_capacity = capacity;
            }

            info!("Starting Locus node ({} discovery)", config.discovery.mode);
            let node = node::start(config, host, port).await?;

            // Intentional stdout: launchers read the port from this line.
            if let Some(port) = node.primary_port() {
                println!("LOCUS_PORT={}", port);
            }
            for h in &node.hosts {
                info!("{} on {}", h.capability(), h.addr());
            }
            info!(
                "Registered {:?} with {} discovery",
                node.locator.registry().capabilities(),
                node.discovery.mode()
            );

            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received, exiting");
            for h in node.hosts {
                h.shutdown().await;
            }
        }
        Command::Discover { seconds } => {
            let discovery = NetworkDiscovery::start(MulticastConfig::from_config(&config))
                .await
                .context("Failed to start multicast discovery")?;
            info!("Listening for {}s", seconds);
            tokio::time::sleep(Duration::from_secs(seconds)).await;

            let descriptors = discovery.descriptors();
            println!("{}", serde_json::to_string_pretty(&descriptors)?);
            discovery.shutdown().await;
        }
    }

    Ok(())
}
