use std::error::Error as StdError;
use std::net::SocketAddr;
use std::panic::Location;
use std::time::Duration;

/// An xml-datagram error
#[derive(Debug)]
pub struct Error {
    /// The error itself
    pub inner: InnerError,
    location: &'static Location<'static>,
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.inner)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}", self.inner, self.location)
    }
}

/// Errors that can occur in this crate
#[derive(Debug)]
pub enum InnerError {
    /// General error
    General(String),

    /// Payload is not well-formed XML
    MalformedXml(roxmltree::Error),

    /// Payload is not UTF-8
    Utf8(std::str::Utf8Error),

    /// Payload is well-formed but breaks a schema constraint
    SchemaViolation(String),

    /// The schema document itself could not be used
    InvalidSchema(String),

    /// The payload parser produced no session data
    ParseFailure,

    /// No reply arrived within the bound
    Timeout(Duration),

    /// I/O
    Io(std::io::Error),

    /// A handler returned an error
    Handler(String),

    /// A handler panicked
    HandlerPanic(String),

    /// The endpoint has been closed
    Closed,

    /// The server was already started or has been stopped
    AlreadyStarted,

    /// Datagram came from somewhere other than the expected peer
    UnexpectedPeer(SocketAddr),

    /// Tokio Join
    TokioJoin(tokio::task::JoinError),
}

impl std::fmt::Display for InnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InnerError::General(s) => write!(f, "General Error: {s}"),
            InnerError::MalformedXml(e) => write!(f, "Malformed XML: {e}"),
            InnerError::Utf8(e) => write!(f, "Payload is not UTF-8: {e}"),
            InnerError::SchemaViolation(s) => write!(f, "Schema violation: {s}"),
            InnerError::InvalidSchema(s) => write!(f, "Invalid schema: {s}"),
            InnerError::ParseFailure => write!(f, "Payload parser produced no session data"),
            InnerError::Timeout(d) => write!(f, "No reply within {}ms", d.as_millis()),
            InnerError::Io(e) => write!(f, "I/O: {e}"),
            InnerError::Handler(s) => write!(f, "Handler failed: {s}"),
            InnerError::HandlerPanic(s) => write!(f, "Handler panicked: {s}"),
            InnerError::Closed => write!(f, "Endpoint is closed"),
            InnerError::AlreadyStarted => write!(f, "Server already started or stopped"),
            InnerError::UnexpectedPeer(a) => write!(f, "Datagram from unexpected peer {a}"),
            InnerError::TokioJoin(e) => write!(f, "Tokio Join: {e}"),
        }
    }
}

impl StdError for InnerError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            InnerError::MalformedXml(e) => Some(e),
            InnerError::Utf8(e) => Some(e),
            InnerError::Io(e) => Some(e),
            InnerError::TokioJoin(e) => Some(e),
            _ => None,
        }
    }
}

// Note: we impl Into because our typical pattern is InnerError::Variant.into()
//       when we tried implementing From, the location was deep in rust code's
//       blanket into implementation, which wasn't the line number we wanted.
//
//       As for converting other error types, the try! macro uses From so it
//       is correct.
#[allow(clippy::from_over_into)]
impl Into<Error> for InnerError {
    #[track_caller]
    fn into(self) -> Error {
        Error {
            inner: self,
            location: Location::caller(),
        }
    }
}

// Use this to avoid complex type qualification
impl InnerError {
    /// Convert an `InnerError` into an `Error`
    #[track_caller]
    #[must_use]
    pub fn into_err(self) -> Error {
        Error {
            inner: self,
            location: Location::caller(),
        }
    }
}

impl Error {
    /// True for malformed XML, non UTF-8 payloads and schema violations
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self.inner,
            InnerError::MalformedXml(_) | InnerError::Utf8(_) | InnerError::SchemaViolation(_)
        )
    }
}

impl From<&str> for Error {
    #[track_caller]
    fn from(s: &str) -> Self {
        Error {
            inner: InnerError::General(s.to_owned()),
            location: Location::caller(),
        }
    }
}

impl From<String> for Error {
    #[track_caller]
    fn from(s: String) -> Self {
        Error {
            inner: InnerError::General(s),
            location: Location::caller(),
        }
    }
}

impl From<roxmltree::Error> for Error {
    #[track_caller]
    fn from(e: roxmltree::Error) -> Self {
        Error {
            inner: InnerError::MalformedXml(e),
            location: Location::caller(),
        }
    }
}

impl From<std::str::Utf8Error> for Error {
    #[track_caller]
    fn from(e: std::str::Utf8Error) -> Self {
        Error {
            inner: InnerError::Utf8(e),
            location: Location::caller(),
        }
    }
}

impl From<std::io::Error> for Error {
    #[track_caller]
    fn from(e: std::io::Error) -> Self {
        Error {
            inner: InnerError::Io(e),
            location: Location::caller(),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    #[track_caller]
    fn from(e: tokio::task::JoinError) -> Self {
        Error {
            inner: InnerError::TokioJoin(e),
            location: Location::caller(),
        }
    }
}
