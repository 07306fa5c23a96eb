//! The server's request dispatch, grounded on
//! `control-server/server.py`'s `ServerRequestHandler` and `Server` classes:
//! the same cluster validation, peerlist response, and CRINFO/manifest
//! bookkeeping, rebuilt over the synchronous `Listener`/`Cluster` types
//! instead of one-connection-per-request sockets.

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};

use ctp_fs::fileinfo::FILEHASH_LEN;
use ctp_fs::{manifest, FileInfo, SharedDirectory};
use ctp_wire::{CTPMessage, MessageType};

use crate::error::ClusterResult;
use crate::net::listener::Listener;
use crate::server::cluster::Cluster;
use crate::server::SERVER_ID;

/// Shared, lockable server data: the directory of files it hosts and the
/// clusters of peers registered against it.
pub struct ServerState {
    shared: Mutex<SharedDirectory>,
    filehash_index: Mutex<HashMap<[u8; FILEHASH_LEN], String>>,
    clusters: Mutex<HashMap<String, Cluster>>,
}

/// The running server: its shared data plus the listener reading requests
/// off the wire. Held behind an `Arc` so the listener's callback can look
/// itself back up without owning a strong cycle (`Arc::new_cyclic`).
pub struct Server {
    pub state: ServerState,
    pub listener: Listener,
}

impl Server {
    /// Bind `addr`, load `shared_dir_root` as the server's hosted
    /// directory, and start serving requests. Every cluster a peer may
    /// join must be registered up front with `add_cluster` (mirrors the
    /// original server's explicit `add_cluster` call before `listen`).
    pub fn bind(addr: impl ToSocketAddrs, shared_dir_root: impl Into<PathBuf>) -> ClusterResult<Arc<Server>> {
        let mut shared = SharedDirectory::open(shared_dir_root.into())?;
        shared.refresh()?;
        ensure_manifest(&mut shared)?;
        let filehash_index = build_filehash_index(&shared);

        let socket = std::net::UdpSocket::bind(addr)?;

        let state = ServerState {
            shared: Mutex::new(shared),
            filehash_index: Mutex::new(filehash_index),
            clusters: Mutex::new(HashMap::new()),
        };

        let server = Arc::new_cyclic(|weak: &Weak<Server>| {
            let weak = weak.clone();
            let listener = Listener::from_socket(socket, move |message, from| {
                if let Some(server) = weak.upgrade() {
                    dispatch(&server, message, from);
                }
            });
            Server { state, listener }
        });

        Ok(server)
    }

    pub fn add_cluster(&self, cluster_id: impl Into<String>) {
        self.state.clusters.lock().unwrap().entry(cluster_id.into()).or_insert_with(Cluster::new);
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Sweep every cluster for expired peers, republishing each affected
    /// cluster's peerlist to its remaining members (§4.7). Intended to be
    /// called periodically from a caller-owned loop or timer thread; kept
    /// as an explicit method rather than an internal thread so tests can
    /// drive it deterministically.
    pub fn expire_stale_peers(&self) {
        let mut republish = Vec::new();

        {
            let mut clusters = self.state.clusters.lock().unwrap();
            for (cluster_id, cluster) in clusters.iter_mut() {
                let expired = cluster.expire_stale_peers();
                if expired.is_empty() {
                    continue;
                }
                for peer_id in &expired {
                    info!("cluster {}: expired peer {}", cluster_id, peer_id);
                }
                let body = cluster.generate_peerlist().into_bytes();
                let targets: Vec<SocketAddr> = cluster.peer_ids().iter().filter_map(|id| cluster.get(id)).map(|e| e.addr).collect();
                republish.push((cluster_id.clone(), body, targets));
            }
        }

        for (cluster_id, body, targets) in republish {
            self.push_peerlist(&cluster_id, &body, &targets);
        }
    }

    /// Send a `PEERLIST_PUSH` carrying `body` to every address in `targets`.
    fn push_peerlist(&self, cluster_id: &str, body: &[u8], targets: &[SocketAddr]) {
        for &addr in targets {
            let push = match CTPMessage::new(MessageType::PeerlistPush, 0, cluster_id.to_string(), SERVER_ID, body.to_vec()) {
                Ok(m) => m,
                Err(e) => {
                    warn!("server: could not build peerlist push for {}: {}", cluster_id, e);
                    continue;
                }
            };
            if let Err(e) = self.listener.send_to(addr, &push) {
                warn!("server: failed pushing peerlist to {}: {}", addr, e);
            }
        }
    }
}

fn ensure_manifest(shared: &mut SharedDirectory) -> ClusterResult<()> {
    if !shared.contains(manifest::MANIFEST_FILENAME) {
        rebuild_manifest(shared)?;
    }
    Ok(())
}

fn rebuild_manifest(shared: &mut SharedDirectory) -> ClusterResult<()> {
    let filenames: Vec<String> = shared
        .filenames()
        .into_iter()
        .filter(|name| name != manifest::MANIFEST_FILENAME)
        .collect();
    let file = manifest::build_file(&filenames, now());
    shared.add_file(file)?;
    shared.persist_file(manifest::MANIFEST_FILENAME)?;
    Ok(())
}

fn build_filehash_index(shared: &SharedDirectory) -> HashMap<[u8; FILEHASH_LEN], String> {
    shared
        .filenames()
        .into_iter()
        .filter_map(|name| shared.get(&name).map(|f| (*f.info().filehash(), name)))
        .collect()
}

fn now() -> f64 {
    chrono::Utc::now().timestamp() as f64
}

fn response(request: &CTPMessage, msg_type: MessageType, body: Vec<u8>) -> CTPMessage {
    CTPMessage::new(msg_type, request.seqnum().wrapping_add(1), request.cluster_id(), SERVER_ID, body)
        .expect("server-constructed response always satisfies id/body invariants")
}

/// Dispatch one inbound request to its handler and send the reply, if the
/// type expects one.
pub fn dispatch(server: &Server, request: CTPMessage, from: SocketAddr) {
    touch_sender(server, &request, from);

    let reply = match request.msg_type() {
        MessageType::StatusRequest => Some(handle_status(&request)),
        MessageType::BlockRequest => Some(handle_block_request(server, &request)),
        MessageType::ClusterJoinRequest => Some(handle_cluster_join(server, &request, from)),
        MessageType::ManifestRequest => Some(handle_manifest_request(server, &request)),
        MessageType::CrinfoRequest => Some(handle_crinfo_request(server, &request)),
        MessageType::NewCrinfoNotif => Some(handle_new_crinfo_notif(server, &request)),
        MessageType::NoOp => None,
        _ => Some(response(&request, MessageType::UnexpectedReq, b"unexpected request type".to_vec())),
    };

    if let Some(reply) = reply {
        if let Err(e) = server.listener.send_to(from, &reply) {
            warn!("server: failed replying to {}: {}", from, e);
        }
    }
}

/// Reset the sender's liveness timer if it is already a known member of its
/// cluster (§4.8). Does not register unknown senders; that is `CLUSTER_JOIN_
/// REQUEST`'s job alone.
fn touch_sender(server: &Server, request: &CTPMessage, from: SocketAddr) {
    let mut clusters = server.state.clusters.lock().unwrap();
    if let Some(cluster) = clusters.get_mut(request.cluster_id()) {
        cluster.touch_peer(request.sender_id(), from);
    }
}

fn handle_status(request: &CTPMessage) -> CTPMessage {
    response(request, MessageType::StatusResponse, b"status: 1".to_vec())
}

fn handle_block_request(server: &Server, request: &CTPMessage) -> CTPMessage {
    let requested = match ctp_wire::Block::unpack(request.body()) {
        Some(b) => b,
        None => return response(request, MessageType::InvalidReq, b"malformed block request".to_vec()),
    };

    let filename = server
        .state
        .filehash_index
        .lock()
        .unwrap()
        .get(requested.filehash())
        .cloned();

    let filename = match filename {
        Some(name) => name,
        None => {
            let miss = ctp_wire::Block::new(*requested.filehash(), requested.block_id(), Vec::new());
            return response(request, MessageType::BlockResponse, miss.pack());
        }
    };

    let shared = server.state.shared.lock().unwrap();
    let block = shared
        .get(&filename)
        .and_then(|file| file.get_block(requested.block_id()))
        .unwrap_or_else(|| ctp_wire::Block::new(*requested.filehash(), requested.block_id(), Vec::new()));

    response(request, MessageType::BlockResponse, block.pack())
}

fn handle_cluster_join(server: &Server, request: &CTPMessage, from: SocketAddr) -> CTPMessage {
    let cluster_id = request.cluster_id().to_string();
    let peer_id = request.sender_id().to_string();

    let (peerlist, is_new, others) = {
        let mut clusters = server.state.clusters.lock().unwrap();
        let cluster = match clusters.get_mut(&cluster_id) {
            Some(c) => c,
            None => return response(request, MessageType::InvalidReq, b"no such cluster".to_vec()),
        };

        let is_new = cluster.add_peer(peer_id.clone(), from);
        let peerlist = cluster.generate_peerlist();
        let others: Vec<SocketAddr> = cluster
            .peer_ids()
            .iter()
            .filter_map(|id| cluster.get(id))
            .map(|entry| entry.addr)
            .filter(|addr| *addr != from)
            .collect();
        (peerlist, is_new, others)
    };

    if is_new {
        info!("cluster {}: added new peer {}", cluster_id, peer_id);
    }

    // Push the updated peer list to every other cluster member (§4.8) so
    // they learn of the joiner within one round-trip (S3, invariant 7).
    server.push_peerlist(&cluster_id, peerlist.as_bytes(), &others);

    response(request, MessageType::ClusterJoinResponse, peerlist.into_bytes())
}

fn handle_manifest_request(server: &Server, request: &CTPMessage) -> CTPMessage {
    let shared = server.state.shared.lock().unwrap();
    match shared.get(manifest::MANIFEST_FILENAME) {
        Some(file) => response(request, MessageType::ManifestResponse, file.info().to_crinfo_bytes()),
        None => response(request, MessageType::ServerError, b"no manifest available".to_vec()),
    }
}

fn handle_crinfo_request(server: &Server, request: &CTPMessage) -> CTPMessage {
    let filename = String::from_utf8_lossy(request.body()).trim().to_string();
    let shared = server.state.shared.lock().unwrap();
    match shared.get(&filename) {
        Some(file) => response(request, MessageType::CrinfoResponse, file.info().to_crinfo_bytes()),
        None => response(request, MessageType::InvalidReq, b"no such file".to_vec()),
    }
}

fn handle_new_crinfo_notif(server: &Server, request: &CTPMessage) -> CTPMessage {
    let (filename_bytes, crinfo_bytes) = match split_on_double_crlf(request.body()) {
        Some(pair) => pair,
        None => return response(request, MessageType::InvalidReq, b"error: corrupted CRINFO file or filename".to_vec()),
    };

    let filename = match std::str::from_utf8(filename_bytes) {
        Ok(s) => s.to_string(),
        Err(_) => return response(request, MessageType::InvalidReq, b"error: corrupted CRINFO file or filename".to_vec()),
    };

    let incoming = match FileInfo::from_crinfo(&filename, crinfo_bytes) {
        Ok(info) => info,
        Err(_) => return response(request, MessageType::InvalidReq, b"error: corrupted CRINFO file or filename".to_vec()),
    };

    let mut shared = server.state.shared.lock().unwrap();
    let already_known = shared.get(&filename).map(|f| f.info().is_equal(&incoming)).unwrap_or(false);

    if already_known {
        return response(request, MessageType::NewCrinfoNotifAck, b"error: exists".to_vec());
    }

    let filehash = *incoming.filehash();
    if shared.add_fileinfo(incoming).is_err() {
        return response(request, MessageType::ServerError, b"error: could not store descriptor".to_vec());
    }
    server.state.filehash_index.lock().unwrap().insert(filehash, filename);
    let _ = rebuild_manifest(&mut shared);

    info!("server: registered new descriptor for {:?}", filename_bytes);
    response(request, MessageType::NewCrinfoNotifAck, b"success".to_vec())
}

fn split_on_double_crlf(body: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = body.windows(4).position(|w| w == b"\r\n\r\n")?;
    Some((&body[..pos], &body[pos + 4..]))
}
