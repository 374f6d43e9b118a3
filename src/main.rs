use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use dynamo_cluster::admin;
use dynamo_cluster::config::{ClusterConfig, NodeList};
use dynamo_cluster::server::node::Server;
use dynamo_cluster::transport::tcp::TcpTransport;

const TICK_INTERVAL: Duration = Duration::from_millis(5);
const STATS_INTERVAL: Duration = Duration::from_secs(5);
/// How long a departed node keeps running once its notices are delivered.
const DEPARTURE_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(
    name = "dynamo-node",
    version,
    about = "Dynamo-style replicated key-value node"
)]
struct Cli {
    /// Node list file, one `hostname,external_port,internal_port` line per node.
    #[arg(short = 'i', long)]
    node_list: PathBuf,

    /// Hostname this node appears under in the node list.
    #[arg(short = 'd', long)]
    hostname: String,

    /// External port, when several listed nodes share the hostname.
    #[arg(short = 'p', long)]
    external_port: Option<u16>,

    /// Replicas per key.
    #[arg(short = 'r', long)]
    replicas: Option<usize>,

    /// Seconds to wait before the first membership probe.
    #[arg(short = 'w', long)]
    wait_time: Option<u64>,

    /// JSON file with protocol tunables.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address the listeners bind to.
    #[arg(long, default_value = "0.0.0.0")]
    listen: String,

    /// Serve `GET /status` on this port.
    #[arg(long)]
    admin_port: Option<u16>,

    /// Default log filter when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Seed for gossip target selection.
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    let mut config = match &cli.config {
        Some(path) => ClusterConfig::load(path)?,
        None => ClusterConfig::default(),
    };
    if let Some(replicas) = cli.replicas {
        config.num_replicas = replicas;
    }
    if let Some(wait_time) = cli.wait_time {
        config.wait_time_ms = wait_time * 1_000;
    }
    if cli.seed.is_some() {
        config.rng_seed = cli.seed;
    }

    let nodes = NodeList::load(&cli.node_list)?;
    let local = nodes
        .find_local(&cli.hostname, cli.external_port)
        .cloned()
        .with_context(|| {
            format!(
                "{} is not listed in {}",
                cli.hostname,
                cli.node_list.display()
            )
        })?;

    tracing::info!("Starting node {} ({} nodes listed)", local, nodes.nodes().len());

    let transport = TcpTransport::bind(
        &format!("{}:{}", cli.listen, local.external_port),
        &format!("{}:{}", cli.listen, local.internal_port),
    )
    .await?;
    let mut server = Server::new(local, nodes.nodes(), config, transport)?;

    let (status_tx, status_rx) = watch::channel(server.status());
    if let Some(port) = cli.admin_port {
        let listener = TcpListener::bind((cli.listen.as_str(), port)).await?;
        tokio::spawn(async move {
            if let Err(e) = admin::serve(listener, status_rx).await {
                tracing::error!("Admin endpoint stopped: {:?}", e);
            }
        });
    }

    let mut tick = tokio::time::interval(TICK_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut stats = tokio::time::interval(STATS_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut departed_at: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                server.process();
                let status = server.status();

                if !status.accepting_external && status.active_coordinators == 0 {
                    let since = *departed_at.get_or_insert_with(Instant::now);
                    if since.elapsed() >= DEPARTURE_GRACE {
                        tracing::info!("Left the ring, exiting");
                        break;
                    }
                }

                status_tx.send_replace(status);
            }
            _ = stats.tick() => {
                let status = server.status();
                tracing::info!(
                    "Cluster stats: {} ring members, {} keys, {} coordinators, {} clients",
                    status.ring.len(),
                    status.stored_keys,
                    status.active_coordinators,
                    status.client_connections
                );
            }
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted, closing all channels");
                server.immediate_shutdown();
                break;
            }
        }
    }

    Ok(())
}
