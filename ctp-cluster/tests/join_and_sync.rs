//! End-to-end test over real loopback sockets: a server hosting one file,
//! and a peer that joins its cluster and downloads it, grounded on
//! `bip_utracker::test::test_client_full`'s pattern of driving the real
//! client/server pair instead of mocking the wire.

use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use ctp_cluster::peer::{workflow, Peer};
use ctp_cluster::server::Server;
use ctp_fs::{File, FileInfo, SharedDirectory};

const CLUSTER_ID: &str = "cluster-000000000000000000000000";
const PEER_A_ID: &str = "peer-a00000000000000000000000000";
const PEER_B_ID: &str = "peer-b00000000000000000000000000";

fn bind_addr() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

#[test]
fn positive_peer_joins_and_downloads_file_from_a_seeding_peer() {
    let server_dir = tempfile::tempdir().unwrap();
    let seeder_dir = tempfile::tempdir().unwrap();
    let joiner_dir = tempfile::tempdir().unwrap();

    let server = Server::bind(bind_addr(), server_dir.path()).unwrap();
    server.add_cluster(CLUSTER_ID);
    let server_addr = server.local_addr().unwrap();

    // The seeding peer already holds the file on disk before it joins; the
    // control server only ever tracks its descriptor, never its content.
    {
        let mut shared = SharedDirectory::open(seeder_dir.path()).unwrap();
        let data = b"hello from the cluster".to_vec();
        let info = FileInfo::new("greeting.txt".into(), md5::compute(&data).0, data.len() as u64, 1.0);
        shared.add_file(File::new_complete(info, &data)).unwrap();
        shared.persist_file("greeting.txt").unwrap();
    }
    let seeder = Peer::bind(bind_addr(), CLUSTER_ID, PEER_A_ID, seeder_dir.path()).unwrap();
    workflow::join_cluster(&seeder, server_addr).unwrap();
    workflow::announce_new_file(&seeder, server_addr, "greeting.txt").unwrap();

    // The joiner learns of the seeder through its join-time peerlist and
    // pulls the content from it, never from the server.
    let joiner = Peer::bind(bind_addr(), CLUSTER_ID, PEER_B_ID, joiner_dir.path()).unwrap();
    workflow::run_join_and_sync(&joiner, server_addr).unwrap();

    let downloaded = joiner_dir.path().join("greeting.txt");
    assert!(downloaded.is_file());
    assert_eq!(std::fs::read(&downloaded).unwrap(), b"hello from the cluster");
}

#[test]
fn positive_peer_announces_new_file_and_server_registers_it() {
    let server_dir = tempfile::tempdir().unwrap();
    let peer_dir = tempfile::tempdir().unwrap();

    let server = Server::bind(bind_addr(), server_dir.path()).unwrap();
    server.add_cluster(CLUSTER_ID);
    let server_addr = server.local_addr().unwrap();

    let peer = Peer::bind(bind_addr(), CLUSTER_ID, PEER_A_ID, peer_dir.path()).unwrap();
    workflow::run_join_and_sync(&peer, server_addr).unwrap();

    {
        let mut shared = peer.state.shared.lock().unwrap();
        let data = b"a brand new shared file".to_vec();
        let info = FileInfo::new("new.txt".into(), md5::compute(&data).0, data.len() as u64, 2.0);
        shared.add_file(File::new_complete(info, &data)).unwrap();
        shared.persist_file("new.txt").unwrap();
    }

    workflow::announce_new_file(&peer, server_addr, "new.txt").unwrap();

    // Give the server a moment to rebuild its manifest before we check it.
    thread::sleep(Duration::from_millis(50));

    let manifest_path = server_dir.path().join("CRMANIFEST");
    let manifest = std::fs::read(&manifest_path).unwrap();
    let names = ctp_fs::manifest::decode(&manifest);
    assert!(names.iter().any(|n| n == "new.txt"));
}

#[test]
fn positive_stale_peer_expires_from_cluster() {
    let server_dir = tempfile::tempdir().unwrap();
    let peer_dir = tempfile::tempdir().unwrap();

    let server = Server::bind(bind_addr(), server_dir.path()).unwrap();
    server.add_cluster(CLUSTER_ID);
    let server_addr = server.local_addr().unwrap();

    let peer = Peer::bind(bind_addr(), CLUSTER_ID, PEER_A_ID, peer_dir.path()).unwrap();
    workflow::join_cluster(&peer, server_addr).unwrap();

    // The join just registered the peer; an immediate sweep should not
    // expire it (liveness window is 30s, not instant).
    server.expire_stale_peers();
}
