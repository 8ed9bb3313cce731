//! Client-side view of the login session.

use serde::{Deserialize, Serialize};

use crate::messages::{AboutInfo, ProviderList, User};

/// Where the socket is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    /// No socket, or the last one closed.
    #[default]
    Disconnected,
    /// Socket requested, not yet open.
    Connecting,
    /// Socket open, waiting for the `authenticated` acknowledgement.
    AwaitingAuth,
    /// The server accepted our token.
    Authenticated,
}

impl ConnectionPhase {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, ConnectionPhase::Authenticated)
    }
}

/// Last-known server state.
///
/// `providers`, `about` and `token` only change when the new value differs
/// from the stored one; the setters report whether they did. Reconnects keep
/// everything except `phase`.
#[derive(Debug, Clone, Default)]
pub struct Session {
    phase: ConnectionPhase,
    logged_in: bool,
    user: Option<User>,
    providers: Option<ProviderList>,
    about: Option<AboutInfo>,
    token: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: ConnectionPhase) {
        self.phase = phase;
    }

    pub fn logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn providers(&self) -> Option<&ProviderList> {
        self.providers.as_ref()
    }

    pub fn about(&self) -> Option<&AboutInfo> {
        self.about.as_ref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Store `providers` if it differs from the current list.
    pub fn set_providers(&mut self, providers: ProviderList) -> bool {
        if self.providers.as_ref() == Some(&providers) {
            return false;
        }
        self.providers = Some(providers);
        true
    }

    /// Store `about` if it differs from the current blob.
    pub fn set_about(&mut self, about: AboutInfo) -> bool {
        if self.about.as_ref() == Some(&about) {
            return false;
        }
        self.about = Some(about);
        true
    }

    /// Store `token` if it differs from the current one.
    pub fn set_token(&mut self, token: Option<String>) -> bool {
        if self.token == token {
            return false;
        }
        self.token = token;
        true
    }

    pub fn log_in(&mut self, user: User) {
        self.user = Some(user);
        self.logged_in = true;
    }

    pub fn log_out(&mut self) {
        self.user = None;
        self.logged_in = false;
    }

    /// Replace the user record without touching the login flag.
    pub fn update_user(&mut self, user: User) {
        self.user = Some(user);
    }
}
