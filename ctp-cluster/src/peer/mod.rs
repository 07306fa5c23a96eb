//! The peer role: joins a cluster, syncs the manifest and descriptors,
//! downloads missing file content round-robin from its peers, and answers
//! the same requests of its own peers (§4.9, §4.10).

pub mod handlers;
pub mod workflow;

pub use handlers::{Peer, PeerState};
