//! Login client error types.

use thiserror::Error;

/// Coarse classification of a [`ClientError`], used by event consumers that
/// only care about the failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An event name outside the known vocabulary.
    UnknownEvent,
    /// The environment refuses the session cookie, so no session ID reaches the token.
    ThirdPartyCookiesBlocked,
    /// The server did not answer or the connection dropped before authenticating.
    ServerConnection,
    /// An HTTP request completed with a non-2xx status.
    Http,
    /// Request, socket or decoding failures below the protocol level.
    Network,
    /// The caller supplied something the client cannot act on.
    InvalidInput,
}

impl ErrorKind {
    /// Stable name used in serialized `error` events.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownEvent => "UnknownEvent",
            ErrorKind::ThirdPartyCookiesBlocked => "ThirdPartyCookiesBlocked",
            ErrorKind::ServerConnection => "ServerConnection",
            ErrorKind::Http => "Http",
            ErrorKind::Network => "Network",
            ErrorKind::InvalidInput => "InvalidInput",
        }
    }
}

/// Login client error type.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Event name not in the closed event vocabulary
    #[error("Event {0} does not exist.")]
    UnknownEvent(String),

    /// Third-party cookies are blocked, the token carries no session ID
    #[error("Connection is not possible because third-party cookies are blocked.")]
    ThirdPartyCookiesBlocked,

    /// Server connection problem (no reply, dropped before authentication)
    #[error("Server connection error: {0}")]
    ServerConnection(String),

    /// Non-2xx HTTP response
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    /// Transport-level send failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Token could not be decoded
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No user is logged in
    #[error("Not logged in")]
    NotLoggedIn,

    /// Empty or missing user name
    #[error("Name must not be empty")]
    InvalidName,

    /// Handshake input not valid in the current state
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Returns the coarse category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::UnknownEvent(_) => ErrorKind::UnknownEvent,
            ClientError::ThirdPartyCookiesBlocked => ErrorKind::ThirdPartyCookiesBlocked,
            ClientError::ServerConnection(_) => ErrorKind::ServerConnection,
            ClientError::Http { .. } => ErrorKind::Http,
            ClientError::Request(_)
            | ClientError::Transport(_)
            | ClientError::InvalidToken(_)
            | ClientError::Json(_)
            | ClientError::Io(_) => ErrorKind::Network,
            ClientError::NotLoggedIn
            | ClientError::InvalidName
            | ClientError::InvalidStateTransition(_)
            | ClientError::Config(_)
            | ClientError::InvalidUrl(_) => ErrorKind::InvalidInput,
        }
    }

    /// Returns the HTTP status code if this error came from a non-2xx response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            ClientError::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// Blocked third-party cookies are terminal for the current connection
    /// attempt; caller mistakes are never retried.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::ServerConnection(_)
            | ClientError::Transport(_)
            | ClientError::Io(_) => true,
            ClientError::Http { status, .. } => *status >= 500 || *status == 429,
            ClientError::Request(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                e.status().map(|s| s.is_server_error()).unwrap_or(true)
            }
            // The token endpoint occasionally answers with an HTML error page.
            ClientError::Json(_) | ClientError::InvalidToken(_) => true,
            _ => false,
        }
    }
}

/// Result type alias using ClientError.
pub type ClientResult<T> = Result<T, ClientError>;
