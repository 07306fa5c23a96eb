//! Per-cluster peer table with liveness expiry (§4.7), grounded on the
//! original server's `Cluster`/`PeerInfo` pairing (`control-server/server.py`)
//! and on `bip_util::trans` for the "generation" idiom used to detect a
//! stale entry.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use crate::PEER_EXPIRY_SECS;

/// A single peer's registration within a cluster: where to reach it, and
/// when it last proved it was alive.
#[derive(Clone, Debug)]
pub struct PeerEntry {
    pub addr: SocketAddr,
    last_seen: Instant,
}

impl PeerEntry {
    pub fn new(addr: SocketAddr) -> PeerEntry {
        PeerEntry {
            addr,
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn is_expired(&self) -> bool {
        self.last_seen.elapsed().as_secs() >= PEER_EXPIRY_SECS
    }
}

/// The set of peers currently registered in one cluster.
#[derive(Default)]
pub struct Cluster {
    peers: HashMap<String, PeerEntry>,
}

impl Cluster {
    pub fn new() -> Cluster {
        Cluster {
            peers: HashMap::new(),
        }
    }

    /// Register or refresh a peer, returning `true` if this is a newly seen
    /// peer_id (as opposed to a liveness refresh of one already known).
    pub fn add_peer(&mut self, peer_id: String, addr: SocketAddr) -> bool {
        match self.peers.get_mut(&peer_id) {
            Some(entry) => {
                entry.addr = addr;
                entry.touch();
                false
            }
            None => {
                self.peers.insert(peer_id, PeerEntry::new(addr));
                true
            }
        }
    }

    pub fn remove_peer(&mut self, peer_id: &str) -> Option<PeerEntry> {
        self.peers.remove(peer_id)
    }

    /// Reset an already-known peer's liveness timer, without registering it
    /// if unknown. Called for every inbound message, not just joins (§4.8:
    /// "reset the sender's liveness timer if the sender is known").
    pub fn touch_peer(&mut self, peer_id: &str, addr: SocketAddr) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(entry) => {
                entry.addr = addr;
                entry.touch();
                true
            }
            None => false,
        }
    }

    /// Drop every peer whose liveness window has elapsed, returning the ids
    /// removed so the caller can republish the peerlist (§4.7).
    pub fn expire_stale_peers(&mut self) -> Vec<String> {
        let expired: Vec<String> = self
            .peers
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            self.peers.remove(id);
        }
        expired
    }

    /// The peerlist body as sent in `CLUSTER_JOIN_RESPONSE`/`PEERLIST_PUSH`:
    /// one `"{peer_id} {ip} {port}"` line per peer, peer ids in ascending
    /// order, lines joined by `\r\n` (mirrors
    /// `Cluster.generate_peerlist` in the original server).
    pub fn generate_peerlist(&self) -> String {
        let mut ids: Vec<&String> = self.peers.keys().collect();
        ids.sort();

        ids.into_iter()
            .map(|id| {
                let entry = &self.peers[id];
                format!("{} {} {}", id, entry.addr.ip(), entry.addr.port())
            })
            .collect::<Vec<_>>()
            .join("\r\n")
    }

    pub fn peer_ids(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    pub fn get(&self, peer_id: &str) -> Option<&PeerEntry> {
        self.peers.get(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Parse a peerlist body back into `(peer_id, addr)` pairs, tolerating a
/// trailing empty line from an empty cluster.
pub fn parse_peerlist(body: &str) -> Vec<(String, SocketAddr)> {
    body.split("\r\n")
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let peer_id = parts.next()?.to_string();
            let ip = parts.next()?;
            let port: u16 = parts.next()?.parse().ok()?;
            let addr: SocketAddr = format!("{}:{}", ip, port).parse().ok()?;
            Some((peer_id, addr))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_peerlist_roundtrip() {
        let mut cluster = Cluster::new();
        cluster.add_peer("peer-b".into(), "127.0.0.1:2000".parse().unwrap());
        cluster.add_peer("peer-a".into(), "127.0.0.1:1000".parse().unwrap());

        let body = cluster.generate_peerlist();
        assert_eq!(body, "peer-a 127.0.0.1 1000\r\npeer-b 127.0.0.1 2000");

        let parsed = parse_peerlist(&body);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, "peer-a");
    }

    #[test]
    fn positive_empty_peerlist_parses_to_empty() {
        assert!(parse_peerlist("").is_empty());
    }

    #[test]
    fn positive_add_peer_refresh_not_new() {
        let mut cluster = Cluster::new();
        assert!(cluster.add_peer("p".into(), "127.0.0.1:1".parse().unwrap()));
        assert!(!cluster.add_peer("p".into(), "127.0.0.1:2".parse().unwrap()));
        assert_eq!(cluster.get("p").unwrap().addr.port(), 2);
    }

    #[test]
    fn positive_touch_peer_refreshes_known_not_unknown() {
        let mut cluster = Cluster::new();
        cluster.add_peer("p".into(), "127.0.0.1:1".parse().unwrap());

        assert!(cluster.touch_peer("p", "127.0.0.1:2".parse().unwrap()));
        assert_eq!(cluster.get("p").unwrap().addr.port(), 2);

        assert!(!cluster.touch_peer("stranger", "127.0.0.1:3".parse().unwrap()));
        assert!(cluster.get("stranger").is_none());
    }
}
