//! Mini-Messenger cluster node
//!
//! Command-line entrypoint for running one cluster connection manager.

use clap::{Parser, Subcommand};
use mini_messenger::cluster::{ClusterConfig, ClusterNode, SystemResolver};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "messenger")]
#[command(version = "0.1.0")]
#[command(about = "Federated instant-messaging cluster node", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the cluster connection manager
    Serve {
        /// This node's hostname, used as the stream identity
        #[arg(long)]
        local_host: String,

        /// Interface to bind the cluster listener on
        #[arg(long, default_value = "0.0.0.0")]
        bind_host: String,

        /// Cluster port for listening and dialing
        #[arg(long, default_value_t = mini_messenger::cluster::DEFAULT_PORT)]
        port: u16,

        /// Peer entries (host or node@host); repeat for each peer
        #[arg(long = "peer")]
        peers: Vec<String>,

        /// Shared secret proving cluster membership
        #[arg(long)]
        secret: String,

        /// Codec name the stored secret is decoded with
        #[arg(long, default_value = "plain")]
        secret_codec: String,

        /// Dial every peer instead of the hash tie-break
        #[arg(long)]
        connect_all: bool,

        /// Reconnect budget per remote host
        #[arg(long, default_value_t = mini_messenger::cluster::config::DEFAULT_MAX_RECONNECTS)]
        max_reconnects: u32,

        /// Seconds between reconnect attempts
        #[arg(long, default_value_t = 30)]
        reconnect_delay: u64,

        /// Identity membership announcements are addressed to
        #[arg(long, default_value = "")]
        controller_id: String,

        /// Seconds between published statistics snapshots
        #[arg(long, default_value_t = 60)]
        stats_interval: u64,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            local_host,
            bind_host,
            port,
            peers,
            secret,
            secret_codec,
            connect_all,
            max_reconnects,
            reconnect_delay,
            controller_id,
            stats_interval,
        } => {
            let config = ClusterConfig {
                local_host,
                bind_host,
                port,
                peers,
                secret,
                secret_codec,
                connect_all,
                max_reconnects,
                reconnect_delay: Duration::from_secs(reconnect_delay),
                controller_id,
                stats_interval: Duration::from_secs(stats_interval),
                ..Default::default()
            };

            let node = match ClusterNode::new(config, Arc::new(SystemResolver)) {
                Ok(node) => node,
                Err(e) => {
                    eprintln!("Configuration error: {}", e);
                    std::process::exit(1);
                }
            };
            if let Err(e) = node.start().await {
                eprintln!("Cluster node failed: {}", e);
                std::process::exit(1);
            }
        }
    }
}
