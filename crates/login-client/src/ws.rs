//! WebSocket transport over `tokio-tungstenite`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::transport::{Transport, TransportConnection, TransportEvent, TransportSink};

enum Outgoing {
    Text(String),
    Close,
}

/// Production [`Transport`]: one background task per connection.
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WsTransport {
    fn open(&self, url: &str) -> TransportConnection {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_socket(url.to_string(), open.clone(), out_rx, event_tx));

        TransportConnection {
            sink: Box::new(WsSink { open, out_tx }),
            events,
        }
    }
}

struct WsSink {
    open: Arc<AtomicBool>,
    out_tx: mpsc::UnboundedSender<Outgoing>,
}

impl TransportSink for WsSink {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, text: String) -> ClientResult<()> {
        if !self.is_open() {
            return Err(ClientError::Transport("socket is not open".to_string()));
        }
        self.out_tx
            .send(Outgoing::Text(text))
            .map_err(|_| ClientError::Transport("socket task has stopped".to_string()))
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.out_tx.send(Outgoing::Close);
    }
}

async fn run_socket(
    url: String,
    open: Arc<AtomicBool>,
    mut out_rx: mpsc::UnboundedReceiver<Outgoing>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    debug!(url = %url, "Opening socket");

    let stream = tokio::select! {
        result = connect_async(url.as_str()) => match result {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!(url = %url, error = %e, "Socket connect failed");
                let _ = event_tx.send(TransportEvent::Closed {
                    reason: Some(e.to_string()),
                });
                return;
            }
        },
        // Closed (or dropped) before the handshake finished.
        _ = out_rx.recv() => {
            let _ = event_tx.send(TransportEvent::Closed {
                reason: Some("closed before open".to_string()),
            });
            return;
        }
    };

    let (mut write, mut read) = stream.split();
    open.store(true, Ordering::SeqCst);
    info!(url = %url, "Socket open");
    let _ = event_tx.send(TransportEvent::Opened);

    let reason = loop {
        tokio::select! {
            outgoing = out_rx.recv() => match outgoing {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        warn!(error = %e, "Socket write failed");
                        break Some(e.to_string());
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    break None;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = event_tx.send(TransportEvent::Message(text.to_string()));
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame.map(|f| f.reason.to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Socket read failed");
                    break Some(e.to_string());
                }
                None => break None,
            },
        }
    };

    open.store(false, Ordering::SeqCst);
    info!(reason = ?reason, "Socket closed");
    let _ = event_tx.send(TransportEvent::Closed { reason });
}
