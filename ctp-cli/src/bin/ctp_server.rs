//! The CTP rendezvous server: binds a UDP socket, hosts a shared directory,
//! and answers join/manifest/crinfo/block requests for one or more
//! clusters.

use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Parser;

use ctp_cluster::server::Server;

/// How often the liveness sweep runs over every registered cluster (§4.7).
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(author, version, about = "CTP cluster server", long_about = None)]
struct Cli {
    /// Address to bind the UDP socket to.
    #[arg(long, default_value = "0.0.0.0:6969")]
    bind: SocketAddr,

    /// Directory the server hosts and serves content from.
    #[arg(long)]
    shared_dir: PathBuf,

    /// Cluster id(s) this server accepts joins for. Each must be exactly
    /// 32 ASCII characters.
    #[arg(long = "cluster", required = true)]
    clusters: Vec<String>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let server = Server::bind(cli.bind, &cli.shared_dir)?;
    for cluster_id in &cli.clusters {
        server.add_cluster(cluster_id.clone());
    }

    log::info!(
        "ctp-server listening on {} serving {} (clusters: {:?})",
        server.local_addr()?,
        cli.shared_dir.display(),
        cli.clusters
    );

    loop {
        thread::sleep(SWEEP_INTERVAL);
        server.expire_stale_peers();
    }
}
