//! UDP transport: a background-thread listener that demultiplexes inbound
//! datagrams into request callbacks and response wakeups (§4.5), and a
//! blocking request/response endpoint built on top of it (§4.6).

pub mod endpoint;
pub mod listener;

pub use endpoint::send_request;
pub use listener::Listener;
