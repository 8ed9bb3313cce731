//! Login server wire messages.
//!
//! Everything on the socket is UTF-8 JSON. Outbound envelopes are
//! `{ "type": <kind>, ...fields }`; inbound envelopes carry `type` and, for
//! data-bearing kinds, a `data` object.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A user record as sent by the server. Opaque apart from a few well-known keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct User(pub Value);

impl User {
    /// Resource URI used for profile updates.
    pub fn uri(&self) -> Option<&str> {
        self.0.get("uri").and_then(Value::as_str)
    }

    /// Display name.
    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// A login provider descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Provider(pub Value);

impl Provider {
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }
}

/// Ordered provider list; order is significant for equality.
pub type ProviderList = Vec<Provider>;

/// Server metadata blob, replaced wholesale on every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AboutInfo(pub Value);

impl AboutInfo {
    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Server greeting after the socket opens.
    Open,
    Providers(ProviderList),
    About(AboutInfo),
    Token {
        token: Option<String>,
        expires_in: Option<Value>,
    },
    Updated {
        user: User,
    },
    LoggedIn {
        user: User,
    },
    LoggedOut,
    /// Acknowledgement of our `authenticate` message.
    Authenticated,
    /// The cookie session is close to expiry and should be refreshed.
    SessionAboutToExpire,
    Pong,
    /// Any `type` this client does not know, kept verbatim for logging.
    Unrecognized { kind: String, raw: String },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct ProvidersData {
    providers: ProviderList,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenData {
    token: Option<String>,
    #[serde(default)]
    expires_in: Option<Value>,
}

#[derive(Deserialize)]
struct UserData {
    user: User,
}

impl ServerMessage {
    /// Decode a raw text frame.
    ///
    /// Fails on malformed JSON, a missing `type`, or a data-bearing kind whose
    /// `data` lacks the expected fields.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let envelope: Envelope = serde_json::from_str(raw)?;
        let message = match envelope.kind.as_str() {
            "open" => ServerMessage::Open,
            "providers" => {
                let data: ProvidersData = serde_json::from_value(envelope.data)?;
                ServerMessage::Providers(data.providers)
            }
            "about" => {
                if envelope.data.is_null() {
                    return Err(serde::de::Error::missing_field("data"));
                }
                ServerMessage::About(AboutInfo(envelope.data))
            }
            "token" => {
                let data: TokenData = serde_json::from_value(envelope.data)?;
                ServerMessage::Token {
                    token: data.token,
                    expires_in: data.expires_in,
                }
            }
            "updated" => {
                let data: UserData = serde_json::from_value(envelope.data)?;
                ServerMessage::Updated { user: data.user }
            }
            "loggedIn" => {
                let data: UserData = serde_json::from_value(envelope.data)?;
                ServerMessage::LoggedIn { user: data.user }
            }
            "loggedOut" => ServerMessage::LoggedOut,
            "authenticated" => ServerMessage::Authenticated,
            "sessionAboutToExpire" => ServerMessage::SessionAboutToExpire,
            "pong" => ServerMessage::Pong,
            _ => ServerMessage::Unrecognized {
                kind: envelope.kind,
                raw: raw.to_string(),
            },
        };
        Ok(message)
    }

    /// Wire name of the message kind.
    pub fn kind(&self) -> &str {
        match self {
            ServerMessage::Open => "open",
            ServerMessage::Providers(_) => "providers",
            ServerMessage::About(_) => "about",
            ServerMessage::Token { .. } => "token",
            ServerMessage::Updated { .. } => "updated",
            ServerMessage::LoggedIn { .. } => "loggedIn",
            ServerMessage::LoggedOut => "loggedOut",
            ServerMessage::Authenticated => "authenticated",
            ServerMessage::SessionAboutToExpire => "sessionAboutToExpire",
            ServerMessage::Pong => "pong",
            ServerMessage::Unrecognized { kind, .. } => kind,
        }
    }
}

/// An outbound message: a `type` plus arbitrary top-level fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientMessage {
    kind: String,
    fields: Map<String, Value>,
}

impl ClientMessage {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    /// Create an `authenticate` message carrying the bearer token.
    pub fn authenticate(token: &str) -> Self {
        Self::new("authenticate").with_field("token", token)
    }

    /// Create a heartbeat `ping` message.
    pub fn ping() -> Self {
        Self::new("ping")
    }

    /// Add a top-level field. A field named `type` is ignored.
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        if key != "type" {
            self.fields.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Serialize for ClientMessage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry("type", &self.kind)?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
