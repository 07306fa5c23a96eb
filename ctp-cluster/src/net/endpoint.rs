//! Blocking request/response on top of a `Listener`, with bounded retry —
//! the counterpart to `bip_utracker::client::dispatcher::process_request`'s
//! retry/timeout bookkeeping, rewritten for a synchronous call rather than
//! an event loop.

use std::net::SocketAddr;
use std::time::Duration;

use ctp_wire::CTPMessage;

use crate::error::{ClusterErrorKind, ClusterResult};
use crate::net::listener::Listener;
use crate::{DEFAULT_RETRIES, REQUEST_TIMEOUT_MS};

/// A response's seqnum is always its request's seqnum plus one (§4.1). The
/// peer address a response arrives from is not part of the match: only the
/// seqnum is — a deliberate relaxation spelled out by the protocol, not an
/// oversight.
fn response_seqnum(request: &CTPMessage) -> u32 {
    request.seqnum().wrapping_add(1)
}

/// Send `request` to `addr` and wait for its matching response, retrying up
/// to `retries` times with `timeout` between attempts. Returns
/// `ConnectionError` if every attempt goes unanswered.
pub fn send_request(
    listener: &Listener,
    addr: SocketAddr,
    request: &CTPMessage,
    retries: u32,
    timeout: Duration,
) -> ClusterResult<CTPMessage> {
    let expected = response_seqnum(request);

    for attempt in 0..=retries {
        listener.begin_wait(expected);
        if let Err(e) = listener.send_to(addr, request) {
            listener.cancel_wait(expected);
            bail!(ClusterErrorKind::ConnectionError(addr.to_string(), format!("send failed: {}", e)));
        }

        if let Some(response) = listener.wait(expected, timeout) {
            return Ok(response);
        }

        debug!("endpoint: attempt {}/{} to {} timed out", attempt + 1, retries + 1, addr);
    }

    bail!(ClusterErrorKind::ConnectionError(
        addr.to_string(),
        format!("no response after {} attempts", retries + 1)
    ))
}

/// Send `request` with the default retry/timeout policy (§4.6).
pub fn send_request_default(listener: &Listener, addr: SocketAddr, request: &CTPMessage) -> ClusterResult<CTPMessage> {
    send_request(
        listener,
        addr,
        request,
        DEFAULT_RETRIES,
        Duration::from_millis(REQUEST_TIMEOUT_MS),
    )
}

/// Fire-and-forget send for request types that expect no response
/// (`PeerlistPush`, `NoOp`).
pub fn send_no_response(listener: &Listener, addr: SocketAddr, message: &CTPMessage) -> ClusterResult<()> {
    listener
        .send_to(addr, message)
        .map_err(|e| ClusterErrorKind::ConnectionError(addr.to_string(), e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctp_wire::MessageType;
    use std::net::SocketAddr;

    fn id(byte: u8) -> String {
        std::iter::repeat(byte as char).take(ctp_wire::ID_LEN).collect()
    }

    #[test]
    fn negative_times_out_with_no_peer() {
        let listener = Listener::bind("127.0.0.1:0", |_, _| {}).unwrap();
        let dead_addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let request = CTPMessage::new(MessageType::StatusRequest, 10, id('a'), id('b'), Vec::new()).unwrap();

        let result = send_request(&listener, dead_addr, &request, 0, Duration::from_millis(50));
        assert!(result.is_err());
    }
}
