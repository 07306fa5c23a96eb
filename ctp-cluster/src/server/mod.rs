//! The server role: a well-known rendezvous point that clusters of peers
//! join, fetch a manifest and per-file descriptors from, and announce new
//! content to (§4.7, §4.8).

pub mod cluster;
pub mod handlers;

pub use cluster::{Cluster, PeerEntry};
pub use handlers::{Server, ServerState};

/// Reserved sender_id the server identifies itself with in responses,
/// mirroring the original implementation's fixed `SERVER_PEER_ID` (§4.7).
pub const SERVER_ID: &str = "ctp-server-000000000000000000000";

#[cfg(test)]
mod tests {
    #[test]
    fn server_id_is_exactly_id_len() {
        assert_eq!(super::SERVER_ID.len(), ctp_wire::ID_LEN);
    }
}
