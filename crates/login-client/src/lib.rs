//! Persistent-session client for a login server.
//!
//! This crate provides:
//! - WebSocket connection with automatic reconnection and exponential backoff
//! - Cookie-to-token handshake over an HTTP side channel (FSM-based)
//! - Heartbeat liveness checking
//! - Session state (user, providers, server info, token) with change-only events
//! - Event listeners with a wildcard slot, plus a broadcast receiver

mod backoff;
mod client;
mod config;
mod error;
mod events;
mod handshake;
mod http;
mod liveness;
mod messages;
mod session;
mod timers;
mod token;
mod transport;
mod ws;

#[cfg(test)]
mod tests;

pub use backoff::Backoff;
pub use client::LoginClient;
pub use config::{
    ClientOptions, Endpoints, DEFAULT_HTTP_SETTLE_MS, DEFAULT_PING_INTERVAL_MS, DEFAULT_RETRY_MS,
    DEFAULT_RETRY_MS_MAX, DEFAULT_RETRY_MULT,
};
pub use error::{ClientError, ClientResult, ErrorKind};
pub use events::{Event, EventBus, EventName, Listener};
pub use handshake::handshake_machine;
pub use handshake::{Handshake, HandshakeInput, HandshakeMachine, HandshakeState};
pub use http::{
    fetch, Credentials, HttpFuture, HttpRequest, HttpRequester, HttpResponse, RedirectPolicy,
    ReqwestRequester,
};
pub use liveness::LivenessMonitor;
pub use messages::{AboutInfo, ClientMessage, Provider, ProviderList, ServerMessage, User};
pub use session::{ConnectionPhase, Session};
pub use token::{decode_claims, TokenClaims};
pub use transport::{Transport, TransportConnection, TransportEvent, TransportSink};
pub use ws::WsTransport;
