use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::{Error, MemorySessionStore, PayloadParser, SessionStore};

/// Receive buffer size; longer datagrams are truncated by the socket.
pub const RECV_BUFFER_SIZE: usize = 4096;

/// How long a client waits for its reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// A trait for logging errors
pub trait Logger: Send + Sync {
    /// Log an error tied to a remote peer
    fn log_peer_error(&self, e: &Error, socket_addr: SocketAddr);

    /// Log an error that is not tied to a peer
    fn log_error(&self, e: &Error);

    /// Log a lifecycle notice
    fn log_info(&self, _message: &str) {}
}

impl<L: Logger + ?Sized> Logger for Arc<L> {
    fn log_peer_error(&self, e: &Error, socket_addr: SocketAddr) {
        (**self).log_peer_error(e, socket_addr);
    }

    fn log_error(&self, e: &Error) {
        (**self).log_error(e);
    }

    fn log_info(&self, message: &str) {
        (**self).log_info(message);
    }
}

/// A `Logger` that emits `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log_peer_error(&self, e: &Error, socket_addr: SocketAddr) {
        if e.is_validation() {
            tracing::debug!(target: "xml_datagram", peer = %socket_addr, "{e}");
        } else {
            tracing::warn!(target: "xml_datagram", peer = %socket_addr, "{e}");
        }
    }

    fn log_error(&self, e: &Error) {
        tracing::error!(target: "xml_datagram", "{e}");
    }

    fn log_info(&self, message: &str) {
        tracing::info!(target: "xml_datagram", "{message}");
    }
}

/// A configuration for creating a `Server`
#[derive(Clone)]
pub struct ServerConfig<P: PayloadParser, L: Logger> {
    /// Socket address to bind to; port 0 picks an ephemeral port
    pub socket_addr: SocketAddr,

    /// XSD that inbound payloads must satisfy; without one, any well-formed
    /// XML is accepted
    pub schema_path: Option<PathBuf>,

    /// Turns validated payloads into session data
    pub parser: P,

    /// Logging of errors
    pub logger: L,

    /// Session storage
    pub store: Arc<dyn SessionStore>,

    /// Upper bound on concurrently handled datagrams. When reached, the
    /// accept loop waits for a slot before reading the next datagram.
    pub max_in_flight: Option<usize>,

    pub recv_buffer_size: usize,

    /// Drop each session once the shutdown sweep has notified it
    pub forget_after_sweep: bool,
}

impl<P: PayloadParser, L: Logger> ServerConfig<P, L> {
    /// Configuration with an in-memory store and no schema
    pub fn new(socket_addr: SocketAddr, parser: P, logger: L) -> Self {
        ServerConfig {
            socket_addr,
            schema_path: None,
            parser,
            logger,
            store: Arc::new(MemorySessionStore::new()),
            max_in_flight: None,
            recv_buffer_size: RECV_BUFFER_SIZE,
            forget_after_sweep: false,
        }
    }
}

/// A configuration for creating a `Client`
#[derive(Debug, Clone)]
pub struct ClientConfig<L: Logger> {
    /// Where requests go
    pub server_addr: SocketAddr,

    /// XSD applied to both requests and replies
    pub schema_path: Option<PathBuf>,

    pub reply_timeout: Duration,

    pub recv_buffer_size: usize,

    /// Logging of errors
    pub logger: L,
}

impl<L: Logger> ClientConfig<L> {
    pub fn new(server_addr: SocketAddr, logger: L) -> Self {
        ClientConfig {
            server_addr,
            schema_path: None,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            recv_buffer_size: RECV_BUFFER_SIZE,
            logger,
        }
    }
}
