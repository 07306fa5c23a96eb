//! Wire format for the Cluster Transfer Protocol (CTP).
//!
//! A pure codec crate: packing and unpacking of CTP messages (§4.1) and of
//! the block request/response payload carried inside `BLOCK_REQUEST`/
//! `BLOCK_RESPONSE` bodies (§4.2). No sockets, no threads.

#[macro_use]
extern crate error_chain;
extern crate byteorder;

pub mod block;
pub mod error;
pub mod message;

pub use block::Block;
pub use error::{WireError, WireErrorKind, WireResult};
pub use message::{CTPMessage, MessageType};

/// Length in bytes of `cluster_id` and `sender_id` fields.
pub const ID_LEN: usize = 32;

/// Length in bytes of the fixed CTP header (type + seqnum + cluster_id + sender_id).
pub const HEADER_LEN: usize = 1 + 4 + ID_LEN + ID_LEN;

/// Maximum datagram size CTP will ever pack or accept.
pub const MAX_DATAGRAM: usize = 1400;

/// Maximum body size, i.e. `MAX_DATAGRAM - HEADER_LEN`.
pub const MAX_BODY: usize = MAX_DATAGRAM - HEADER_LEN;
