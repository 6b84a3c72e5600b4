//! Error handling for the room hub

use std::fmt;

/// Result type alias for hub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced by the hub and its HTTP surface
#[derive(Debug, Clone)]
pub enum Error {
    /// Malformed or out-of-range input (room id, username)
    BadInput(String),
    /// Unknown room
    NotFound(String),
    /// Password or host-token mismatch
    Unauthorized(String),
    /// Worker pool rejection
    CapacityExhausted(String),
    /// Connection-level failure: read/write error, deadline, ping failure
    PeerGone(String),
    /// Unparseable inbound frame
    Malformed(String),
    /// Frame or payload over the size ceiling
    Oversize(String),
    /// Configuration error
    Config(String),
    /// Internal error
    Internal(String),
}

impl Error {
    /// HTTP-compatible status code for this error kind
    pub fn code(&self) -> u16 {
        match self {
            Error::BadInput(_) => 400,
            Error::NotFound(_) => 404,
            Error::Unauthorized(_) => 401,
            Error::CapacityExhausted(_) => 503,
            Error::PeerGone(_) => 500,
            Error::Malformed(_) => 400,
            Error::Oversize(_) => 413,
            Error::Config(_) => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Human-readable error message
    pub fn message(&self) -> &str {
        match self {
            Error::BadInput(msg) => msg,
            Error::NotFound(msg) => msg,
            Error::Unauthorized(msg) => msg,
            Error::CapacityExhausted(msg) => msg,
            Error::PeerGone(msg) => msg,
            Error::Malformed(msg) => msg,
            Error::Oversize(msg) => msg,
            Error::Config(msg) => msg,
            Error::Internal(msg) => msg,
        }
    }

    /// Create a bad-input error
    pub fn bad_input<T: Into<String>>(msg: T) -> Self {
        Error::BadInput(msg.into())
    }

    /// Create a not-found error
    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create an unauthorized error
    pub fn unauthorized<T: Into<String>>(msg: T) -> Self {
        Error::Unauthorized(msg.into())
    }

    /// Create a capacity-exhausted error
    pub fn capacity_exhausted<T: Into<String>>(msg: T) -> Self {
        Error::CapacityExhausted(msg.into())
    }

    /// Create a peer-gone error
    pub fn peer_gone<T: Into<String>>(msg: T) -> Self {
        Error::PeerGone(msg.into())
    }

    /// Create a malformed-frame error
    pub fn malformed<T: Into<String>>(msg: T) -> Self {
        Error::Malformed(msg.into())
    }

    /// Create an oversize error
    pub fn oversize<T: Into<String>>(msg: T) -> Self {
        Error::Oversize(msg.into())
    }

    /// Create a configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Error::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal<T: Into<String>>(msg: T) -> Self {
        Error::Internal(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadInput(msg) => write!(f, "bad input: {}", msg),
            Error::NotFound(msg) => write!(f, "not found: {}", msg),
            Error::Unauthorized(msg) => write!(f, "unauthorized: {}", msg),
            Error::CapacityExhausted(msg) => write!(f, "capacity exhausted: {}", msg),
            Error::PeerGone(msg) => write!(f, "peer gone: {}", msg),
            Error::Malformed(msg) => write!(f, "malformed frame: {}", msg),
            Error::Oversize(msg) => write!(f, "oversize: {}", msg),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::PeerGone(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Malformed(format!("JSON error: {}", err))
    }
}

impl From<axum::Error> for Error {
    fn from(err: axum::Error) -> Self {
        Error::PeerGone(format!("WebSocket error: {}", err))
    }
}

impl From<bcrypt::BcryptError> for Error {
    fn from(err: bcrypt::BcryptError) -> Self {
        Error::Internal(format!("bcrypt error: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Error::Unauthorized(format!("invalid token: {}", err))
    }
}
