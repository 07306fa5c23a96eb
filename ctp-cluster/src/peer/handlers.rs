//! A peer's own request dispatch: every peer also answers the requests its
//! fellow cluster members send it, grounded on `ctp/peers.py`'s
//! `DefaultRequestHandler` (status echo, notification ack, block echo)
//! generalized to the content-addressed block model.

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, Weak};

use ctp_fs::fileinfo::FILEHASH_LEN;
use ctp_fs::SharedDirectory;
use ctp_wire::{CTPMessage, MessageType};

use crate::error::ClusterResult;
use crate::net::listener::Listener;
use crate::server::cluster::parse_peerlist;

/// A peer known through the cluster's peerlist, independent of whether we
/// have ever talked to it yet.
#[derive(Clone, Debug)]
pub struct KnownPeer {
    pub peer_id: String,
    pub addr: SocketAddr,
}

/// Shared, lockable peer data: the files it hosts (complete or partial),
/// an index from filehash to filename for answering `BLOCK_REQUEST`, and
/// its current view of the cluster's other members.
pub struct PeerState {
    pub peer_id: String,
    pub cluster_id: String,
    pub shared: Mutex<SharedDirectory>,
    pub filehash_index: Mutex<HashMap<[u8; FILEHASH_LEN], String>>,
    pub known_peers: Mutex<Vec<KnownPeer>>,
    /// Round-robin cursor over `known_peers` for content sync (§4.10 step
    /// 5): incremented once per `BLOCK_REQUEST` sent, never reset, so it
    /// keeps rotating through the peermap even as it shrinks or grows.
    pub next_source: AtomicUsize,
}

/// The running peer: its shared data plus the listener reading requests
/// off the wire.
pub struct Peer {
    pub state: PeerState,
    pub listener: Listener,
}

impl Peer {
    /// Bind `addr`, load `shared_dir_root`, and start serving requests
    /// from other members of `cluster_id`. Does not itself join the
    /// cluster or sync content — see `peer::workflow` for that.
    pub fn bind(
        addr: impl ToSocketAddrs,
        cluster_id: impl Into<String>,
        peer_id: impl Into<String>,
        shared_dir_root: impl Into<PathBuf>,
    ) -> ClusterResult<Arc<Peer>> {
        let peer_id = peer_id.into();
        let cluster_id = cluster_id.into();
        ctp_wire::message::validate_id(&cluster_id, "cluster_id")?;
        ctp_wire::message::validate_id(&peer_id, "peer_id")?;

        let mut shared = SharedDirectory::open(shared_dir_root.into())?;
        shared.refresh()?;
        let filehash_index = build_filehash_index(&shared);

        let socket = std::net::UdpSocket::bind(addr)?;

        let state = PeerState {
            peer_id,
            cluster_id,
            shared: Mutex::new(shared),
            filehash_index: Mutex::new(filehash_index),
            known_peers: Mutex::new(Vec::new()),
            next_source: AtomicUsize::new(0),
        };

        let peer = Arc::new_cyclic(|weak: &Weak<Peer>| {
            let weak = weak.clone();
            let listener = Listener::from_socket(socket, move |message, from| {
                if let Some(peer) = weak.upgrade() {
                    dispatch(&peer, message, from);
                }
            });
            Peer { state, listener }
        });

        Ok(peer)
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn known_peer_addrs(&self) -> Vec<KnownPeer> {
        self.state.known_peers.lock().unwrap().clone()
    }
}

pub(crate) fn build_filehash_index(shared: &SharedDirectory) -> HashMap<[u8; FILEHASH_LEN], String> {
    shared
        .filenames()
        .into_iter()
        .filter_map(|name| shared.get(&name).map(|f| (*f.info().filehash(), name)))
        .collect()
}

fn response(request: &CTPMessage, peer_id: &str, msg_type: MessageType, body: Vec<u8>) -> CTPMessage {
    CTPMessage::new(msg_type, request.seqnum().wrapping_add(1), request.cluster_id(), peer_id, body)
        .expect("peer-constructed response always satisfies id/body invariants")
}

/// Dispatch one inbound request to its handler and send the reply, if the
/// type expects one.
pub fn dispatch(peer: &Peer, request: CTPMessage, from: SocketAddr) {
    let reply = match request.msg_type() {
        MessageType::StatusRequest => Some(response(&request, &peer.state.peer_id, MessageType::StatusResponse, b"status: 1".to_vec())),
        MessageType::Notification => Some(response(&request, &peer.state.peer_id, MessageType::NotificationAck, request.body().to_vec())),
        MessageType::BlockRequest => Some(handle_block_request(peer, &request)),
        MessageType::PeerlistPush => {
            handle_peerlist_push(peer, &request);
            None
        }
        MessageType::NoOp => None,
        _ => Some(response(&request, &peer.state.peer_id, MessageType::UnexpectedReq, b"unexpected request type".to_vec())),
    };

    if let Some(reply) = reply {
        if let Err(e) = peer.listener.send_to(from, &reply) {
            warn!("peer {}: failed replying to {}: {}", peer.state.peer_id, from, e);
        }
    }
}

fn handle_block_request(peer: &Peer, request: &CTPMessage) -> CTPMessage {
    let requested = match ctp_wire::Block::unpack(request.body()) {
        Some(b) => b,
        None => return response(request, &peer.state.peer_id, MessageType::InvalidReq, b"malformed block request".to_vec()),
    };

    let filename = peer.state.filehash_index.lock().unwrap().get(requested.filehash()).cloned();
    let miss = || ctp_wire::Block::new(*requested.filehash(), requested.block_id(), Vec::new());

    let block = match filename {
        Some(name) => {
            let shared = peer.state.shared.lock().unwrap();
            shared
                .get(&name)
                .and_then(|file| file.get_block(requested.block_id()))
                .unwrap_or_else(miss)
        }
        None => miss(),
    };

    response(request, &peer.state.peer_id, MessageType::BlockResponse, block.pack())
}

fn handle_peerlist_push(peer: &Peer, request: &CTPMessage) {
    let body = String::from_utf8_lossy(request.body());
    let parsed = parse_peerlist(&body);

    let mut known = peer.state.known_peers.lock().unwrap();
    known.clear();
    for (peer_id, addr) in parsed {
        if peer_id != peer.state.peer_id {
            known.push(KnownPeer { peer_id, addr });
        }
    }
}
