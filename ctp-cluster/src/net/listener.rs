//! The listener owns the one UDP socket a peer or server binds, reading it
//! on a dedicated background thread the way `bip_utracker`'s dispatcher owns
//! its socket on a worker thread (`client::dispatcher::create_dispatcher`) —
//! restructured here over a plain blocking `UdpSocket` rather than `umio`,
//! since that event-loop crate has no maintained modern equivalent.

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use ctp_wire::CTPMessage;

/// How long a single `recv_from` call blocks before the listener thread
/// re-checks its shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

type PendingMap = Mutex<HashMap<u32, Option<CTPMessage>>>;

/// Called on the listener thread for every inbound message whose type is a
/// request (§4.1's request/response split, `MessageType::is_request`).
pub type RequestHandler = dyn Fn(CTPMessage, SocketAddr) + Send + Sync;

/// Owns a bound UDP socket and a background thread that reads it.
///
/// Inbound messages are split two ways: request-type messages are handed to
/// the caller-supplied `RequestHandler`; response-type messages are matched
/// against requests registered via `begin_wait` and delivered through the
/// shared pending map, which a `Mutex` + `Condvar` pair wakes the waiting
/// caller from (§5's "mutex... augmented with a... signal" requirement).
pub struct Listener {
    socket: Arc<UdpSocket>,
    pending: Arc<PendingMap>,
    signal: Arc<Condvar>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Listener {
    /// Bind to `addr` and start the background receive loop. `on_request`
    /// is invoked (on the listener thread) for each inbound request-type
    /// message.
    pub fn bind<A, F>(addr: A, on_request: F) -> std::io::Result<Listener>
    where
        A: ToSocketAddrs,
        F: Fn(CTPMessage, SocketAddr) + Send + Sync + 'static,
    {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        Ok(Listener::from_socket(socket, on_request))
    }

    /// Start the background receive loop over an already-bound socket.
    /// Split out from `bind` so callers that need to know their own address
    /// before constructing a handler closure that refers back to itself
    /// (e.g. via `Arc::new_cyclic`) can bind first and spawn second.
    pub fn from_socket<F>(socket: UdpSocket, on_request: F) -> Listener
    where
        F: Fn(CTPMessage, SocketAddr) + Send + Sync + 'static,
    {
        let _ = socket.set_read_timeout(Some(POLL_INTERVAL));

        let socket = Arc::new(socket);
        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
        let signal = Arc::new(Condvar::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let handler: Arc<RequestHandler> = Arc::new(on_request);

        let thread = {
            let socket = Arc::clone(&socket);
            let pending = Arc::clone(&pending);
            let signal = Arc::clone(&signal);
            let shutdown = Arc::clone(&shutdown);

            thread::spawn(move || receive_loop(socket, pending, signal, shutdown, handler))
        };

        Listener {
            socket,
            pending,
            signal,
            shutdown,
            thread: Some(thread),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Send a message to `addr`.
    pub fn send_to(&self, addr: SocketAddr, message: &CTPMessage) -> std::io::Result<()> {
        let packed = message
            .pack()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        self.socket.send_to(&packed, addr)?;
        Ok(())
    }

    /// Register interest in a response carrying seqnum `seqnum`, before
    /// sending the request that will provoke it. Avoids the race of a fast
    /// reply arriving before the waiter starts listening.
    pub fn begin_wait(&self, seqnum: u32) {
        self.pending.lock().unwrap().insert(seqnum, None);
    }

    /// Block until a response with `seqnum` arrives or `timeout` elapses.
    pub fn wait(&self, seqnum: u32, timeout: Duration) -> Option<CTPMessage> {
        let mut guard = self.pending.lock().unwrap();
        let deadline = std::time::Instant::now() + timeout;

        loop {
            if let Some(slot) = guard.get(&seqnum) {
                if slot.is_some() {
                    return guard.remove(&seqnum).unwrap();
                }
            } else {
                return None;
            }

            let now = std::time::Instant::now();
            if now >= deadline {
                guard.remove(&seqnum);
                return None;
            }

            let (g, result) = self.signal.wait_timeout(guard, deadline - now).unwrap();
            guard = g;
            if result.timed_out() {
                let got = guard.remove(&seqnum).unwrap_or(None);
                return got;
            }
        }
    }

    /// Drop interest in a response without waiting for it (used when a
    /// caller decides not to wait out a pending retry window).
    pub fn cancel_wait(&self, seqnum: u32) {
        self.pending.lock().unwrap().remove(&seqnum);
    }

    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn receive_loop(
    socket: Arc<UdpSocket>,
    pending: Arc<PendingMap>,
    signal: Arc<Condvar>,
    shutdown: Arc<AtomicBool>,
    on_request: Arc<RequestHandler>,
) {
    let mut buf = [0u8; ctp_wire::MAX_DATAGRAM];

    while !shutdown.load(Ordering::SeqCst) {
        let (n, from) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                continue;
            }
            Err(e) => {
                warn!("listener: recv_from failed: {}", e);
                continue;
            }
        };

        let message = match CTPMessage::unpack(&buf[..n]) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("listener: dropping malformed datagram from {}: {}", from, e);
                continue;
            }
        };

        if message.msg_type().is_request() {
            on_request(message, from);
        } else {
            let seqnum = message.seqnum();
            let mut guard = pending.lock().unwrap();
            if guard.contains_key(&seqnum) {
                guard.insert(seqnum, Some(message));
                drop(guard);
                signal.notify_all();
            } else {
                debug!("listener: dropping unmatched response (seqnum {}) from {}", seqnum, from);
            }
        }
    }
}
