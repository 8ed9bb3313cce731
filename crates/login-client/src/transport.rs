//! Message transport seam.
//!
//! The client only needs a bidirectional text channel with open/close
//! notifications. [`crate::ws::WsTransport`] is the production implementation.

use tokio::sync::mpsc;

use crate::error::ClientResult;

/// Lifecycle and data notifications from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is ready for sending.
    Opened,
    /// A text frame arrived.
    Message(String),
    /// The connection is gone. Always the last event of a connection.
    Closed { reason: Option<String> },
}

/// Write half of a transport connection.
pub trait TransportSink: Send + Sync {
    fn is_open(&self) -> bool;

    /// Queue a text frame. Fails if the connection is not open.
    fn send(&self, text: String) -> ClientResult<()>;

    /// Start closing. A [`TransportEvent::Closed`] follows on the event stream.
    fn close(&self);
}

/// A freshly opened (or opening) connection.
pub struct TransportConnection {
    pub sink: Box<dyn TransportSink>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens connections to a URL.
///
/// `open` must return immediately; connecting happens in the background and
/// is reported through the event stream. Called from within a tokio runtime.
pub trait Transport: Send + Sync {
    fn open(&self, url: &str) -> TransportConnection;
}
