//! Cookie-to-token handshake state machine using rust-fsm.
//!
//! The socket only accepts a bearer token, but the token is minted from the
//! HTTP session cookie. Each socket connection runs this sequence once.
//!
//! ## State Diagram
//!
//! ```text
//!        Idle
//!          │ Start
//!          ▼
//! AwaitingLoginRefresh ──RequestFailed──┐
//!          │ LoginRefreshed             │
//!          ▼                            │
//!    AwaitingToken ─────RequestFailed───┤
//!          │ TokenReceived              │
//!          ▼                            ▼
//!      Decoding ───────DecodeFailed──► Retrying
//!          │
//!          ├── SessionMissing ───────► Blocked
//!          ├── AlreadyAuthenticated ─► Superseded
//!          └── SessionPresent ───────► Sent
//! ```

use rust_fsm::*;
use serde::Deserialize;
use tracing::debug;

use crate::config::Endpoints;
use crate::error::{ClientError, ClientResult};
use crate::http::{fetch, Credentials, HttpRequest, HttpRequester, RedirectPolicy};

state_machine! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub handshake_machine(Idle)

    Idle => {
        Start => AwaitingLoginRefresh
    },
    AwaitingLoginRefresh => {
        LoginRefreshed => AwaitingToken,
        RequestFailed => Retrying
    },
    AwaitingToken => {
        TokenReceived => Decoding,
        RequestFailed => Retrying
    },
    Decoding => {
        // Token carries a session and the socket still needs it
        SessionPresent => Sent,
        // Cookie never reached the server
        SessionMissing => Blocked,
        // The socket authenticated while we were fetching
        AlreadyAuthenticated => Superseded,
        DecodeFailed => Retrying
    }
}

pub use handshake_machine::Input as HandshakeInput;
pub use handshake_machine::State as HandshakeState;
pub use handshake_machine::StateMachine as HandshakeMachine;

impl HandshakeState {
    /// True once the handshake can make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HandshakeState::Sent
                | HandshakeState::Blocked
                | HandshakeState::Superseded
                | HandshakeState::Retrying
        )
    }
}

/// Handshake progress for one socket connection.
pub struct Handshake {
    machine: HandshakeMachine,
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            machine: HandshakeMachine::new(),
        }
    }

    pub fn state(&self) -> HandshakeState {
        *self.machine.state()
    }

    pub fn is_idle(&self) -> bool {
        self.state() == HandshakeState::Idle
    }

    /// Apply `input`, failing if the current state does not accept it.
    pub fn advance(&mut self, input: HandshakeInput) -> ClientResult<HandshakeState> {
        let from = self.state();
        self.machine.consume(&input).map_err(|_| {
            ClientError::InvalidStateTransition(format!(
                "Cannot apply {:?} in handshake state {:?}",
                input, from
            ))
        })?;

        let to = self.state();
        debug!(from = ?from, to = ?to, "Handshake transition");
        Ok(to)
    }

    /// Input that moves a failed request or decode into `Retrying` from the current state.
    pub fn failure_input(&self) -> HandshakeInput {
        match self.state() {
            HandshakeState::Decoding => HandshakeInput::DecodeFailed,
            _ => HandshakeInput::RequestFailed,
        }
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("state", &self.state())
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

/// Load the login page so the server sets or refreshes the session cookie.
///
/// Redirects are not followed; a 3xx counts as success.
pub async fn refresh_login(http: &dyn HttpRequester, endpoints: &Endpoints) -> ClientResult<()> {
    let request = HttpRequest::get(endpoints.http("login"))
        .with_credentials(Credentials::Include)
        .with_redirect(RedirectPolicy::Manual);

    let response = http.request(request).await?;
    if response.ok() || response.is_redirect() {
        Ok(())
    } else {
        Err(ClientError::Http {
            status: response.status,
            message: response.status_text,
        })
    }
}

/// Fetch a socket token for the current cookie session.
pub async fn request_token(http: &dyn HttpRequester, endpoints: &Endpoints) -> ClientResult<String> {
    let request = HttpRequest::get(endpoints.http("token")).with_credentials(Credentials::Include);
    let response = fetch(http, request).await?;
    let body: TokenResponse = response.json()?;
    Ok(body.token)
}
