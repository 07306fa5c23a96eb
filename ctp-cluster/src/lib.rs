//! Transport, peer role, and server role for the Cluster Transfer Protocol:
//! the UDP listener and response router (§4.5, §4.6), the server's
//! peer-table and liveness tracking (§4.7, §4.8), and the peer's join/sync
//! workflow (§4.9, §4.10).

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;

extern crate byteorder;
extern crate chrono;
extern crate ctp_fs;
extern crate ctp_wire;
extern crate rand;

pub mod error;
pub mod net;
pub mod peer;
pub mod server;

pub use error::{ClusterError, ClusterErrorKind, ClusterResult};

/// How long a peer may go without a liveness-refreshing message before the
/// server considers it gone (§4.7).
pub const PEER_EXPIRY_SECS: u64 = 30;

/// Default timeout on an individual outbound request before it is retried
/// (§4.6).
pub const REQUEST_TIMEOUT_MS: u64 = 2_000;

/// Default number of times `send_request` will retry before giving up
/// (§4.6).
pub const DEFAULT_RETRIES: u32 = 3;
