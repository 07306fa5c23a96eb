//! Error types for the transport, peer, and server roles (§7).

use std::io;

error_chain! {
    types {
        ClusterError, ClusterErrorKind, ClusterResultExt, ClusterResult;
    }

    links {
        Wire(ctp_wire::WireError, ctp_wire::WireErrorKind);
        Fs(ctp_fs::FsError, ctp_fs::FsErrorKind);
    }

    foreign_links {
        Io(io::Error);
    }

    errors {
        /// A peer-side request to another peer failed: timed out after
        /// exhausting retries, or the remote end sent back something that
        /// didn't parse.
        ConnectionError(peer: String, reason: String) {
            description("a peer-to-peer request failed")
            display("connection error talking to {:?}: {}", peer, reason)
        }
        /// A peer-side request to the server failed the same way.
        ServerConnectionError(reason: String) {
            description("a request to the server failed")
            display("server connection error: {}", reason)
        }
        /// The server rejected or could not process an otherwise
        /// well-formed request (unknown cluster, peer not registered, ...).
        ServerError(reason: String) {
            description("the server reported a request-level failure")
            display("server error: {}", reason)
        }
        /// A peer behaved outside the protocol (bad cluster_id, replied to
        /// a request it was never sent, announced an impossible manifest).
        PeerError(peer: String, reason: String) {
            description("a peer violated the protocol")
            display("peer error from {:?}: {}", peer, reason)
        }
    }
}
