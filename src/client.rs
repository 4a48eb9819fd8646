use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout_at};

use crate::{ClientConfig, Element, Error, InnerError, Logger, SchemaValidator, load_validator};

/// Sends one request at a time and waits for its single reply
pub struct Client<L: Logger> {
    socket: Mutex<Option<UdpSocket>>,
    local_addr: SocketAddr,
    server_addr: SocketAddr,
    validator: Arc<dyn SchemaValidator>,
    reply_timeout: Duration,
    recv_buffer_size: usize,
    logger: L,
}

impl<L: Logger> Client<L> {
    /// Create a new client bound to an ephemeral local port
    pub async fn new(config: ClientConfig<L>) -> Result<Client<L>, Error> {
        let validator = load_validator(config.schema_path.as_deref())?;
        let socket = UdpSocket::bind(local_bind_addr(config.server_addr)).await?;
        let local_addr = socket.local_addr()?;

        Ok(Client {
            socket: Mutex::new(Some(socket)),
            local_addr,
            server_addr: config.server_addr,
            validator,
            reply_timeout: config.reply_timeout,
            recv_buffer_size: config.recv_buffer_size.max(1),
            logger: config.logger,
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Validate and send `message`, then wait for the server's reply.
    ///
    /// An invalid message is rejected before anything is sent. Every failure
    /// is also reported to the logger. There are no retries.
    pub async fn send(&self, message: &[u8]) -> Result<Element, Error> {
        if let Err(e) = self.validator.validate(message) {
            return Err(self.report(e));
        }

        let guard = self.socket.lock().await;
        let Some(socket) = guard.as_ref() else {
            return Err(self.report(InnerError::Closed.into_err()));
        };

        if let Err(e) = socket.send_to(message, self.server_addr).await {
            return Err(self.report(e.into()));
        }

        let reply = match self.recv_reply(socket).await {
            Ok(reply) => reply,
            Err(e) => return Err(self.report(e)),
        };
        drop(guard);

        if let Err(e) = self.validator.validate(&reply) {
            return Err(self.report(e));
        }
        Element::parse(&reply).map_err(|e| self.report(e))
    }

    /// Release the socket; later sends fail with `InnerError::Closed`
    pub async fn close(&self) {
        let _ = self.socket.lock().await.take();
    }

    async fn recv_reply(&self, socket: &UdpSocket) -> Result<Vec<u8>, Error> {
        let deadline = Instant::now() + self.reply_timeout;
        let mut buf = vec![0u8; self.recv_buffer_size];

        loop {
            match timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Err(_) => return Err(InnerError::Timeout(self.reply_timeout).into_err()),
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok((len, from))) if from == self.server_addr => {
                    return Ok(buf[..len].to_vec());
                }
                Ok(Ok((_, from))) => {
                    self.logger
                        .log_peer_error(&InnerError::UnexpectedPeer(from).into_err(), from);
                }
            }
        }
    }

    fn report(&self, e: Error) -> Error {
        self.logger.log_peer_error(&e, self.server_addr);
        e
    }
}

fn local_bind_addr(server_addr: SocketAddr) -> SocketAddr {
    let ip = match server_addr.ip() {
        IpAddr::V4(ip) if ip.is_loopback() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(ip) if ip.is_loopback() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}
