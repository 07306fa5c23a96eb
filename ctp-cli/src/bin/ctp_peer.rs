//! A CTP peer: joins a cluster at a server, syncs its manifest and content,
//! then sits serving requests from its fellow peers.

use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread;

use clap::Parser;
use rand::Rng;

use ctp_cluster::peer::{workflow, Peer};

#[derive(Parser)]
#[command(author, version, about = "CTP cluster peer", long_about = None)]
struct Cli {
    /// Address to bind this peer's UDP socket to.
    #[arg(long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,

    /// Address of the cluster's rendezvous server.
    #[arg(long)]
    server: SocketAddr,

    /// Cluster id to join. Must be exactly 32 ASCII characters.
    #[arg(long)]
    cluster: String,

    /// This peer's id. Must be exactly 32 ASCII characters; a random one
    /// is generated if omitted.
    #[arg(long)]
    peer_id: Option<String>,

    /// Directory this peer shares content from and downloads content into.
    #[arg(long)]
    shared_dir: PathBuf,
}

fn random_peer_id() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..32).map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char).collect()
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let peer_id = cli.peer_id.unwrap_or_else(random_peer_id);
    let peer = Peer::bind(cli.bind, cli.cluster.clone(), peer_id.clone(), &cli.shared_dir)?;

    log::info!(
        "ctp-peer {} listening on {} (cluster {})",
        peer_id,
        peer.local_addr()?,
        cli.cluster
    );

    workflow::run_join_and_sync(&peer, cli.server)?;
    log::info!("ctp-peer {} finished initial sync", peer_id);

    loop {
        thread::sleep(workflow::SYNC_POLL_INTERVAL);
        if let Err(e) = workflow::sync_files(&peer) {
            log::warn!("ctp-peer {}: resync failed: {}", peer_id, e);
        }
    }
}
