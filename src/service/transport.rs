//! Scalability-protocol (nng) REQ/REP framing over a byte stream.
//!
//! Connection header: `\0 S P \0`, protocol id (u16 BE), two reserved zero bytes. Each message
//! is `0x01`, payload length (u64 BE), payload. REQ payloads start with a 4-byte request id whose
//! high bit is set; the REP side echoes it back.

use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::time::Duration;

use crate::foundation::error::{HoloquiltError, HoloquiltResult};

pub const PROTO_REQ: u16 = 0x0030;
pub const PROTO_REP: u16 = 0x0031;

const MSG_TYPE: u8 = 0x01;
const MAX_MESSAGE_BYTES: u64 = 256 * 1024 * 1024;
const REQUEST_ID_FLAG: u32 = 0x8000_0000;

/// Byte stream a socket can run over.
pub trait Duplex: Read + Write + Send {}

impl<T: Read + Write + Send> Duplex for T {}

fn io_error(what: &str, e: std::io::Error) -> HoloquiltError {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => {
            HoloquiltError::service(format!("{what}: timed out"))
        }
        _ => HoloquiltError::service(format!("{what}: {e}")),
    }
}

fn header(proto: u16) -> [u8; 8] {
    let p = proto.to_be_bytes();
    [0, b'S', b'P', 0, p[0], p[1], 0, 0]
}

/// Send our header and check the peer's.
pub fn handshake<S: Read + Write + ?Sized>(
    stream: &mut S,
    ours: u16,
    expected_peer: u16,
) -> HoloquiltResult<()> {
    stream
        .write_all(&header(ours))
        .and_then(|()| stream.flush())
        .map_err(|e| io_error("send protocol header", e))?;

    let mut peer = [0u8; 8];
    stream
        .read_exact(&mut peer)
        .map_err(|e| io_error("read protocol header", e))?;
    if peer[..4] != [0, b'S', b'P', 0] {
        return Err(HoloquiltError::service(
            "peer is not a scalability-protocol endpoint",
        ));
    }
    let proto = u16::from_be_bytes([peer[4], peer[5]]);
    if proto != expected_peer {
        return Err(HoloquiltError::service(format!(
            "peer speaks protocol {proto:#06x}, expected {expected_peer:#06x}"
        )));
    }
    Ok(())
}

pub fn write_message<W: Write + ?Sized>(w: &mut W, parts: &[&[u8]]) -> HoloquiltResult<()> {
    let len: usize = parts.iter().map(|p| p.len()).sum();
    let mut head = [0u8; 9];
    head[0] = MSG_TYPE;
    head[1..].copy_from_slice(&(len as u64).to_be_bytes());
    w.write_all(&head)
        .map_err(|e| io_error("write message header", e))?;
    for p in parts {
        w.write_all(p).map_err(|e| io_error("write message", e))?;
    }
    w.flush().map_err(|e| io_error("flush message", e))
}

pub fn read_message<R: Read + ?Sized>(r: &mut R) -> HoloquiltResult<Vec<u8>> {
    let mut head = [0u8; 9];
    r.read_exact(&mut head)
        .map_err(|e| io_error("read message header", e))?;
    if head[0] != MSG_TYPE {
        return Err(HoloquiltError::service(format!(
            "unexpected message type {:#04x}",
            head[0]
        )));
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&head[1..]);
    let len = u64::from_be_bytes(len_bytes);
    if len > MAX_MESSAGE_BYTES {
        return Err(HoloquiltError::service(format!(
            "message of {len} bytes exceeds the {MAX_MESSAGE_BYTES} byte limit"
        )));
    }
    let mut body = vec![0u8; len as usize];
    r.read_exact(&mut body)
        .map_err(|e| io_error("read message body", e))?;
    Ok(body)
}

fn split_request_id(mut msg: Vec<u8>) -> HoloquiltResult<(u32, Vec<u8>)> {
    if msg.len() < 4 {
        return Err(HoloquiltError::service("message too short for a request id"));
    }
    let id = u32::from_be_bytes([msg[0], msg[1], msg[2], msg[3]]);
    if id & REQUEST_ID_FLAG == 0 {
        return Err(HoloquiltError::service(format!(
            "request id {id:#010x} lacks the end-of-header flag"
        )));
    }
    let body = msg.split_off(4);
    Ok((id, body))
}

/// Requesting side of a REQ/REP pair.
pub struct ReqSocket<S: ?Sized> {
    next_id: u32,
    stream: Box<S>,
}

impl<S: Duplex + ?Sized> ReqSocket<S> {
    /// Perform the protocol handshake on an open stream.
    pub fn connect(mut stream: Box<S>) -> HoloquiltResult<Self> {
        handshake(&mut *stream, PROTO_REQ, PROTO_REP)?;
        Ok(Self { next_id: 1, stream })
    }

    /// Send one request and wait for its reply. Replies to earlier, abandoned requests are
    /// discarded.
    pub fn request(&mut self, body: &[u8]) -> HoloquiltResult<Vec<u8>> {
        let id = self.next_id | REQUEST_ID_FLAG;
        self.next_id = self.next_id.wrapping_add(1) & !REQUEST_ID_FLAG;
        write_message(&mut *self.stream, &[&id.to_be_bytes(), body])?;

        loop {
            let (reply_id, reply) = split_request_id(read_message(&mut *self.stream)?)?;
            if reply_id == id {
                return Ok(reply);
            }
            tracing::debug!(expected = id, got = reply_id, "dropping stale reply");
        }
    }
}

/// Replying side of a REQ/REP pair.
pub struct RepSocket<S: ?Sized> {
    stream: Box<S>,
}

impl<S: Duplex + ?Sized> RepSocket<S> {
    pub fn accept(mut stream: Box<S>) -> HoloquiltResult<Self> {
        handshake(&mut *stream, PROTO_REP, PROTO_REQ)?;
        Ok(Self { stream })
    }

    /// Wait for the next request: `(request id, body)`.
    pub fn recv(&mut self) -> HoloquiltResult<(u32, Vec<u8>)> {
        split_request_id(read_message(&mut *self.stream)?)
    }

    pub fn reply(&mut self, id: u32, body: &[u8]) -> HoloquiltResult<()> {
        write_message(&mut *self.stream, &[&id.to_be_bytes(), body])
    }
}

/// Open a REQ socket to an IPC endpoint.
#[cfg(unix)]
pub fn dial_ipc(path: &Path, timeout: Duration) -> HoloquiltResult<ReqSocket<dyn Duplex>> {
    let stream = std::os::unix::net::UnixStream::connect(path)
        .map_err(|e| io_error(&format!("connect to '{}'", path.display()), e))?;
    let timeout = Some(timeout).filter(|t| !t.is_zero());
    stream
        .set_read_timeout(timeout)
        .and_then(|()| stream.set_write_timeout(timeout))
        .map_err(|e| io_error("configure socket timeouts", e))?;
    ReqSocket::connect(Box::new(stream) as Box<dyn Duplex>)
}

#[cfg(not(unix))]
pub fn dial_ipc(path: &Path, _timeout: Duration) -> HoloquiltResult<ReqSocket<dyn Duplex>> {
    Err(HoloquiltError::service(format!(
        "IPC endpoint '{}' is not supported on this platform",
        path.display()
    )))
}
