//! The peer's join/sync/share workflow (§4.9, §4.10), grounded on
//! `client/client.py`'s join-then-sync sequencing, rebuilt over the
//! blocking `net::endpoint::send_request` rather than one-shot TCP
//! connections.

use std::net::SocketAddr;
use std::time::Duration;

use ctp_fs::{manifest, FileInfo};
use ctp_wire::{CTPMessage, MessageType};

use crate::error::{ClusterErrorKind, ClusterResult};
use crate::net::endpoint::send_request_default;
use crate::peer::handlers::{KnownPeer, Peer};
use crate::server::cluster::parse_peerlist;

fn next_seqnum() -> u32 {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

fn request(peer: &Peer, msg_type: MessageType, body: Vec<u8>) -> CTPMessage {
    CTPMessage::new(msg_type, next_seqnum(), peer.state.cluster_id.clone(), peer.state.peer_id.clone(), body)
        .expect("peer-constructed request always satisfies id/body invariants")
}

/// Join the cluster at `server_addr`, learning of the cluster's current
/// peers. Updates `peer`'s known-peer table and returns the same list.
pub fn join_cluster(peer: &Peer, server_addr: SocketAddr) -> ClusterResult<Vec<KnownPeer>> {
    let req = request(peer, MessageType::ClusterJoinRequest, Vec::new());
    let resp = send_request_default(&peer.listener, server_addr, &req)?;

    if resp.msg_type() != MessageType::ClusterJoinResponse {
        bail!(ClusterErrorKind::ServerError(format!(
            "unexpected response type to join: {:?}",
            resp.msg_type()
        )));
    }

    let body = String::from_utf8_lossy(resp.body());
    let parsed: Vec<KnownPeer> = parse_peerlist(&body)
        .into_iter()
        .filter(|(id, _)| id != &peer.state.peer_id)
        .map(|(peer_id, addr)| KnownPeer { peer_id, addr })
        .collect();

    *peer.state.known_peers.lock().unwrap() = parsed.clone();
    Ok(parsed)
}

/// Fetch the server's manifest descriptor, download its content if we
/// don't already have it, and return the sorted filename list it carries.
pub fn sync_manifest(peer: &Peer, server_addr: SocketAddr) -> ClusterResult<Vec<String>> {
    let req = request(peer, MessageType::ManifestRequest, Vec::new());
    let resp = send_request_default(&peer.listener, server_addr, &req)?;

    if resp.msg_type() != MessageType::ManifestResponse {
        bail!(ClusterErrorKind::ServerError(format!(
            "unexpected response type to manifest request: {:?}",
            resp.msg_type()
        )));
    }

    let remote_info = FileInfo::from_crinfo(manifest::MANIFEST_FILENAME, resp.body())?;

    let up_to_date = {
        let shared = peer.state.shared.lock().unwrap();
        shared.get(manifest::MANIFEST_FILENAME).map(|f| f.is_complete() && f.info().is_equal(&remote_info)).unwrap_or(false)
    };

    if !up_to_date {
        {
            let mut shared = peer.state.shared.lock().unwrap();
            shared.add_fileinfo(remote_info.clone())?;
        }
        download_file_from(peer, server_addr, manifest::MANIFEST_FILENAME)?;
    }

    let shared = peer.state.shared.lock().unwrap();
    let file = shared
        .get(manifest::MANIFEST_FILENAME)
        .ok_or_else(|| ClusterErrorKind::ServerError("manifest missing after sync".into()))?;
    Ok(manifest::decode(&file.into_bytes()))
}

/// For every filename in `filenames` we don't yet have a descriptor for,
/// fetch its `CRINFO` from the server and register it.
pub fn fetch_missing_descriptors(peer: &Peer, server_addr: SocketAddr, filenames: &[String]) -> ClusterResult<()> {
    for filename in filenames {
        let known = peer.state.shared.lock().unwrap().contains(filename);
        if known {
            continue;
        }

        let req = request(peer, MessageType::CrinfoRequest, filename.as_bytes().to_vec());
        let resp = send_request_default(&peer.listener, server_addr, &req)?;
        if resp.msg_type() != MessageType::CrinfoResponse {
            warn!("peer {}: server had no descriptor for {}", peer.state.peer_id, filename);
            continue;
        }

        let info = FileInfo::from_crinfo(filename, resp.body())?;
        let filehash = *info.filehash();
        let mut shared = peer.state.shared.lock().unwrap();
        shared.add_fileinfo(info)?;
        peer.state.filehash_index.lock().unwrap().insert(filehash, filename.clone());
    }
    Ok(())
}

/// Pick the next content source from the peermap, round-robin via the
/// peer's persistent request counter (§4.10 step 5: the control server
/// serves only the manifest, so content comes from fellow peers only).
/// Returns `None` if the peermap is currently empty.
fn next_peer_source(peer: &Peer) -> Option<SocketAddr> {
    let known = peer.state.known_peers.lock().unwrap();
    if known.is_empty() {
        return None;
    }
    let idx = peer.state.next_source.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % known.len();
    Some(known[idx].addr)
}

/// Drop a peer from the peermap after it fails to answer a content request
/// (§4.10: evict on a failed/timed-out response).
fn evict_peer(peer: &Peer, addr: SocketAddr) {
    peer.state.known_peers.lock().unwrap().retain(|p| p.addr != addr);
}

/// Download every still-missing block of every tracked file, selecting a
/// destination from the peermap each time (§4.9/§4.10's round-robin
/// selection). A source that fails to answer is evicted from the peermap.
pub fn sync_files(peer: &Peer) -> ClusterResult<()> {
    let filenames: Vec<String> = peer.state.shared.lock().unwrap().filenames();
    for filename in filenames {
        loop {
            let missing = {
                let shared = peer.state.shared.lock().unwrap();
                match shared.get(&filename) {
                    Some(file) if !file.is_complete() => file.missing_block_ids(),
                    _ => Vec::new(),
                }
            };
            if missing.is_empty() {
                break;
            }

            let mut progressed = false;
            for block_id in missing {
                let source = match next_peer_source(peer) {
                    Some(addr) => addr,
                    None => {
                        warn!("peer {}: no known peers to sync {} from", peer.state.peer_id, filename);
                        break;
                    }
                };
                match download_block(peer, source, &filename, block_id) {
                    Ok(()) => progressed = true,
                    Err(e) => {
                        warn!("peer {}: block {} of {} from {} failed, evicting peer: {}", peer.state.peer_id, block_id, filename, source, e);
                        evict_peer(peer, source);
                    }
                }
            }

            let shared = peer.state.shared.lock().unwrap();
            shared.persist_file(&filename)?;
            if shared.get(&filename).map(|f| f.is_complete()).unwrap_or(true) {
                break;
            }
            if !progressed {
                warn!("peer {}: made no progress syncing {} this sweep, retrying later", peer.state.peer_id, filename);
                break;
            }
        }
    }
    Ok(())
}

fn download_file_from(peer: &Peer, addr: SocketAddr, filename: &str) -> ClusterResult<()> {
    loop {
        let missing = {
            let shared = peer.state.shared.lock().unwrap();
            match shared.get(filename) {
                Some(file) if !file.is_complete() => file.missing_block_ids(),
                _ => Vec::new(),
            }
        };
        if missing.is_empty() {
            break;
        }
        for block_id in missing {
            download_block(peer, addr, filename, block_id)?;
        }
    }
    let shared = peer.state.shared.lock().unwrap();
    shared.persist_file(filename)?;
    Ok(())
}

fn download_block(peer: &Peer, addr: SocketAddr, filename: &str, block_id: u32) -> ClusterResult<()> {
    let filehash = {
        let shared = peer.state.shared.lock().unwrap();
        *shared
            .get(filename)
            .ok_or_else(|| ClusterErrorKind::ServerError(format!("no descriptor for {}", filename)))?
            .info()
            .filehash()
    };

    let ask = ctp_wire::Block::new(filehash, block_id, Vec::new());
    let req = request(peer, MessageType::BlockRequest, ask.pack());
    let resp = send_request_default(&peer.listener, addr, &req)?;

    if resp.msg_type() != MessageType::BlockResponse {
        bail!(ClusterErrorKind::ConnectionError(addr.to_string(), format!("unexpected reply to block request: {:?}", resp.msg_type())));
    }

    let block = ctp_wire::Block::unpack(resp.body())
        .ok_or_else(|| ClusterErrorKind::ConnectionError(addr.to_string(), "malformed block response".into()))?;

    if !block.downloaded() {
        bail!(ClusterErrorKind::ConnectionError(addr.to_string(), format!("{} has no block {}", filename, block_id)));
    }

    let mut shared = peer.state.shared.lock().unwrap();
    if let Some(file) = shared.get_mut(filename) {
        file.put_block(&block);
    }
    Ok(())
}

/// Announce a locally added file to the server, so other peers can learn
/// of it through the manifest (§4.10).
pub fn announce_new_file(peer: &Peer, server_addr: SocketAddr, filename: &str) -> ClusterResult<()> {
    let crinfo_bytes = {
        let shared = peer.state.shared.lock().unwrap();
        let file = shared
            .get(filename)
            .ok_or_else(|| ClusterErrorKind::ServerError(format!("no such local file: {}", filename)))?;
        file.info().to_crinfo_bytes()
    };

    let mut body = filename.as_bytes().to_vec();
    body.extend_from_slice(b"\r\n\r\n");
    body.extend_from_slice(&crinfo_bytes);

    let req = request(peer, MessageType::NewCrinfoNotif, body);
    let resp = send_request_default(&peer.listener, server_addr, &req)?;

    if resp.msg_type() != MessageType::NewCrinfoNotifAck {
        bail!(ClusterErrorKind::ServerError(format!(
            "unexpected response to new-crinfo notification: {:?}",
            resp.msg_type()
        )));
    }
    Ok(())
}

/// Run the full join-then-sync sequence documented in §4.9: join, pull the
/// manifest, fetch any descriptors we're missing, then download content.
pub fn run_join_and_sync(peer: &Peer, server_addr: SocketAddr) -> ClusterResult<()> {
    join_cluster(peer, server_addr)?;
    let filenames = sync_manifest(peer, server_addr)?;
    fetch_missing_descriptors(peer, server_addr, &filenames)?;
    sync_files(peer)?;
    Ok(())
}

/// How long to wait between `sync_files` sweeps when run in a loop by the
/// caller (e.g. a CLI's background sync thread).
pub const SYNC_POLL_INTERVAL: Duration = Duration::from_secs(5);
