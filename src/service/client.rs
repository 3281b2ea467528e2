use parking_lot::Mutex;

use crate::compositor::QuiltTexture;
use crate::config::ServiceConfig;
use crate::foundation::error::{HoloquiltError, HoloquiltResult};
use crate::service::protocol::{DeviceInfo, QuiltSettings, Request, Response};
use crate::service::transport::{Duplex, ReqSocket, dial_ipc};

type Connection = ReqSocket<dyn Duplex>;

/// Shared handle to the display service.
///
/// The connection is opened lazily on the first request and can be dropped and re-dialed
/// explicitly. All lifecycle calls and requests go through one lock, so concurrent reconnects
/// run one after another and the last one wins.
pub struct ServiceClient {
    config: ServiceConfig,
    conn: Mutex<Option<Connection>>,
}

impl ServiceClient {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
        }
    }

    /// Client over an already-open stream. A later reconnect dials the configured socket.
    pub fn with_stream(config: ServiceConfig, stream: Box<dyn Duplex>) -> HoloquiltResult<Self> {
        let sock = ReqSocket::connect(stream)?;
        Ok(Self {
            config,
            conn: Mutex::new(Some(sock)),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.conn.lock().is_some()
    }

    #[tracing::instrument(skip(self), fields(socket = %self.config.socket_path.display()))]
    pub fn connect(&self) -> HoloquiltResult<()> {
        let mut conn = self.conn.lock();
        if conn.is_none() {
            *conn = Some(self.dial()?);
        }
        Ok(())
    }

    /// Drop any current connection and dial again.
    #[tracing::instrument(skip(self), fields(socket = %self.config.socket_path.display()))]
    pub fn reconnect(&self) -> HoloquiltResult<()> {
        let mut conn = self.conn.lock();
        *conn = None;
        *conn = Some(self.dial()?);
        Ok(())
    }

    pub fn disconnect(&self) {
        if self.conn.lock().take().is_some() {
            tracing::info!("disconnected from display service");
        }
    }

    fn dial(&self) -> HoloquiltResult<Connection> {
        let sock = dial_ipc(&self.config.socket_path, self.config.timeout())?;
        tracing::info!("connected to display service");
        Ok(sock)
    }

    /// Send a request and decode its reply. An I/O failure drops the connection so the next
    /// request dials again.
    pub fn send(&self, request: &Request) -> HoloquiltResult<Response> {
        let payload = request.encode()?;
        let mut conn = self.conn.lock();
        if conn.is_none() {
            *conn = Some(self.dial()?);
        }
        let Some(sock) = conn.as_mut() else {
            return Err(HoloquiltError::service("not connected"));
        };

        let reply = match sock.request(&payload) {
            Ok(r) => r,
            Err(e) => {
                *conn = None;
                return Err(e);
            }
        };
        drop(conn);

        tracing::debug!(
            command = request.name(),
            bytes = reply.len(),
            "service reply"
        );
        Response::decode(&reply)?.check(request.name())
    }

    /// Connected devices. An empty list is a valid answer.
    pub fn info(&self) -> HoloquiltResult<Vec<DeviceInfo>> {
        self.send(&Request::info())?.devices()
    }

    /// Upload and show a quilt. `aspect` is the displayed aspect of one view.
    pub fn show_quilt(&self, quilt: &QuiltTexture, aspect: f64) -> HoloquiltResult<()> {
        let settings = QuiltSettings::from_layout(quilt.layout(), aspect);
        self.send(&Request::show_quilt(quilt.encode_png()?, settings))?;
        Ok(())
    }

    pub fn cache_quilt(&self, name: &str, quilt: &QuiltTexture, aspect: f64) -> HoloquiltResult<()> {
        let settings = QuiltSettings::from_layout(quilt.layout(), aspect);
        self.send(&Request::cache_quilt(quilt.encode_png()?, name, settings))?;
        Ok(())
    }

    pub fn load_quilt(&self, name: &str, settings: Option<QuiltSettings>) -> HoloquiltResult<()> {
        self.send(&Request::load_quilt(name, settings))?;
        Ok(())
    }

    pub fn hide(&self) -> HoloquiltResult<()> {
        self.send(&Request::hide())?;
        Ok(())
    }

    pub fn wipe(&self) -> HoloquiltResult<()> {
        self.send(&Request::wipe())?;
        Ok(())
    }
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("socket_path", &self.config.socket_path)
            .field("connected", &self.is_connected())
            .finish()
    }
}
