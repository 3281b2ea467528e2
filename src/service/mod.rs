//! Display service client.

/// Request/reply handle with connection lifecycle.
pub mod client;
/// Command encoding and `info` reply decoding.
pub mod protocol;
/// REQ/REP framing over IPC streams.
pub mod transport;

pub use client::ServiceClient;
pub use protocol::{DeviceInfo, QuiltSettings, Request, Response};
