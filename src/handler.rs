use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use tokio::net::UdpSocket;
use tokio::task::spawn_blocking;

use crate::{Error, InnerError, Logger, PayloadParser, SchemaValidator, SessionData, SessionStore};

/// What a handler sees for one inbound datagram or one shutdown notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerEvent {
    /// Session data of the peer; `None` during shutdown if the peer is unknown
    pub session: Option<SessionData>,

    /// The peer this event is about, and where any reply goes
    pub peer: SocketAddr,

    /// The server is stopping and this is the last event for `peer`
    pub shutdown: bool,
}

/// Handler output: bytes to send back to the peer, if any.
pub type HandlerResult = Result<Option<Vec<u8>>, Error>;

type BoxedHandler = Arc<dyn Fn(&HandlerEvent) -> HandlerResult + Send + Sync>;

/// Ordered list of handlers. Registration order is invocation order.
///
/// Registering swaps in a new list, so a dispatch that already took its
/// snapshot finishes with the handlers it started with.
#[derive(Default)]
pub(crate) struct HandlerChain {
    handlers: RwLock<Arc<Vec<BoxedHandler>>>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to the end of the chain
    pub fn push<F>(&self, handler: F)
    where
        F: Fn(&HandlerEvent) -> HandlerResult + Send + Sync + 'static,
    {
        let mut guard = self
            .handlers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(Arc::new(handler));
        *guard = Arc::new(next);
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    fn snapshot(&self) -> Arc<Vec<BoxedHandler>> {
        let guard = self
            .handlers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(&guard)
    }
}

/// Run one handler on the blocking pool so a slow handler never holds up a
/// runtime worker, and the accept loop keeps reading.
async fn call_handler(handler: &BoxedHandler, event: &Arc<HandlerEvent>) -> HandlerResult {
    let handler = Arc::clone(handler);
    let event = Arc::clone(event);
    match spawn_blocking(move || handler(event.as_ref())).await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(e)) => Err(InnerError::Handler(e.to_string()).into_err()),
        Err(e) if e.is_panic() => {
            let panic = e.into_panic();
            let message = if let Some(s) = panic.downcast_ref::<&str>() {
                (*s).to_owned()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_owned()
            };
            Err(InnerError::HandlerPanic(message).into_err())
        }
        Err(e) => Err(e.into()),
    }
}

/// Everything a handling unit needs, shared by all of them.
pub(crate) struct Dispatcher<P: PayloadParser, L: Logger> {
    pub validator: Arc<dyn SchemaValidator>,
    pub parser: P,
    pub store: Arc<dyn SessionStore>,
    pub handlers: Arc<HandlerChain>,
    pub logger: L,
}

impl<P: PayloadParser, L: Logger> Dispatcher<P, L> {
    /// Handle one inbound datagram from `peer`.
    ///
    /// Invalid or unparsable payloads are dropped: no session update and no
    /// reply.
    pub async fn handle_datagram(&self, socket: &UdpSocket, data: &[u8], peer: SocketAddr) {
        if let Err(e) = self.validator.validate(data) {
            self.logger.log_peer_error(&e, peer);
            return;
        }

        let Some(session) = self.parser.parse(data) else {
            self.logger
                .log_peer_error(&InnerError::ParseFailure.into_err(), peer);
            return;
        };

        self.store.put(peer, session.clone());

        let event = HandlerEvent {
            session: Some(session),
            peer,
            shutdown: false,
        };
        self.run_chain(socket, event).await;
    }

    /// Give `peer` its final notification, using whatever session is stored.
    pub async fn handle_shutdown(&self, socket: &UdpSocket, peer: SocketAddr) {
        let event = HandlerEvent {
            session: self.store.get(&peer),
            peer,
            shutdown: true,
        };
        self.run_chain(socket, event).await;
    }

    async fn run_chain(&self, socket: &UdpSocket, event: HandlerEvent) {
        let handlers = self.handlers.snapshot();
        let event = Arc::new(event);
        for handler in handlers.iter() {
            match call_handler(handler, &event).await {
                Ok(Some(reply)) if !reply.is_empty() => {
                    if let Err(e) = socket.send_to(&reply, event.peer).await {
                        self.logger.log_peer_error(&Error::from(e), event.peer);
                    }
                }
                Ok(_) => {}
                Err(e) => self.logger.log_peer_error(&e, event.peer),
            }
        }
    }
}
