//! A session-tracking UDP transport for schema-validated XML
//!
//! The server keeps the latest parsed payload per peer address and runs every
//! valid datagram through an ordered chain of handlers, sending their replies
//! back to the peer. Stopping the server gives every known peer one last
//! event. The client sends one validated request and waits a bounded time for
//! one validated reply.
//!
//! NOTE: You must use Tokio as the async runtime in your `main()`

mod client;
pub use client::Client;

mod config;
pub use config::{
    ClientConfig, DEFAULT_REPLY_TIMEOUT, Logger, RECV_BUFFER_SIZE, ServerConfig, TracingLogger,
};

mod error;
pub use error::{Error, InnerError};

mod handler;
pub use handler::{HandlerEvent, HandlerResult};
use handler::{Dispatcher, HandlerChain};

mod parser;
pub use parser::{FieldParser, PayloadParser, SessionData};

mod store;
pub use store::{MemorySessionStore, SessionStore};

mod validation;
pub use validation::{SchemaValidator, WellFormed, XmlSchema, load_validator};

mod xml;
pub use xml::{Element, escape};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A datagram server tracking one session per peer address
pub struct Server<P: PayloadParser, L: Logger> {
    socket: Mutex<Option<Arc<UdpSocket>>>,
    local_addr: SocketAddr,
    dispatcher: Arc<Dispatcher<P, L>>,
    limiter: Option<Arc<Semaphore>>,
    recv_buffer_size: usize,
    forget_after_sweep: bool,
    started: AtomicBool,
    shutting_down: AtomicBool,
    cancel: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl<P: PayloadParser + 'static, L: Logger + 'static> Server<P, L> {
    /// Create a new server, binding its socket and loading its schema
    pub async fn new(config: ServerConfig<P, L>) -> Result<Arc<Server<P, L>>, Error> {
        let validator = load_validator(config.schema_path.as_deref())?;
        let socket = UdpSocket::bind(config.socket_addr).await?;
        let local_addr = socket.local_addr()?;

        Ok(Arc::new(Server {
            socket: Mutex::new(Some(Arc::new(socket))),
            local_addr,
            dispatcher: Arc::new(Dispatcher {
                validator,
                parser: config.parser,
                store: config.store,
                handlers: Arc::new(HandlerChain::new()),
                logger: config.logger,
            }),
            limiter: config
                .max_in_flight
                .map(|n| Arc::new(Semaphore::new(n.max(1)))),
            recv_buffer_size: config.recv_buffer_size.max(1),
            forget_after_sweep: config.forget_after_sweep,
            started: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            accept_task: Mutex::new(None),
        }))
    }

    /// The address actually bound, including an ephemeral port
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The session store shared with the handling units
    #[must_use]
    pub fn store(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.dispatcher.store)
    }

    /// Append a handler; it sees every event dispatched after this returns
    pub fn add_handler<F>(&self, handler: F)
    where
        F: Fn(&HandlerEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.dispatcher.handlers.push(handler);
    }

    /// Number of handlers registered so far
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.dispatcher.handlers.len()
    }

    /// Start the accept loop in the background and return
    pub fn start(&self) -> Result<(), Error> {
        if self.shutting_down.load(Ordering::Acquire) || self.started.swap(true, Ordering::AcqRel)
        {
            return Err(InnerError::AlreadyStarted.into_err());
        }

        let Some(socket) = self.current_socket() else {
            return Err(InnerError::Closed.into_err());
        };

        let task = tokio::spawn(accept_loop(
            socket,
            Arc::clone(&self.dispatcher),
            self.limiter.clone(),
            self.cancel.clone(),
            self.recv_buffer_size,
        ));
        *self
            .accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);

        self.dispatcher
            .logger
            .log_info(&format!("Running on {}", self.local_addr));
        Ok(())
    }

    /// Stop accepting datagrams, notify every known peer, release the socket.
    ///
    /// Handling units already running are not cancelled and may finish
    /// alongside the sweep. Calling `stop` again does nothing.
    pub async fn stop(&self) -> Result<(), Error> {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.dispatcher.logger.log_info("Stopping...");

        self.cancel.cancel();
        let task = self
            .accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                self.dispatcher.logger.log_error(&Error::from(e));
            }
        }

        let Some(socket) = self.current_socket() else {
            return Err(InnerError::Closed.into_err());
        };

        for peer in self.dispatcher.store.keys() {
            self.dispatcher.handle_shutdown(&socket, peer).await;
            if self.forget_after_sweep {
                let _ = self.dispatcher.store.remove(&peer);
            }
        }

        drop(socket);
        let _ = self
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }

    /// True once `stop` has been called
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn current_socket(&self) -> Option<Arc<UdpSocket>> {
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

async fn accept_loop<P: PayloadParser + 'static, L: Logger + 'static>(
    socket: Arc<UdpSocket>,
    dispatcher: Arc<Dispatcher<P, L>>,
    limiter: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
    recv_buffer_size: usize,
) {
    let mut buf = vec![0u8; recv_buffer_size];

    loop {
        let permit = match &limiter {
            Some(semaphore) => tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                permit = Arc::clone(semaphore).acquire_owned() => match permit {
                    Ok(p) => Some(p),
                    Err(_) => break,
                },
            },
            None => None,
        };

        let (len, peer) = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(r) => r,
                Err(e) => {
                    dispatcher.logger.log_error(&Error::from(e));
                    continue;
                }
            },
        };

        let data = buf[..len].to_vec();
        let socket = Arc::clone(&socket);
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            dispatcher.handle_datagram(&socket, &data, peer).await;
            drop(permit);
        });
    }
}
