//! Client events and the listener registry.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::{ClientError, ClientResult};
use crate::messages::{AboutInfo, ProviderList, User};

/// Capacity of the broadcast channel behind [`EventBus::receiver`].
const BROADCAST_CAPACITY: usize = 100;

/// The closed set of event names a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    Connect,
    Disconnect,
    Login,
    Logout,
    Update,
    Error,
    Providers,
    Token,
    About,
    MessageSent,
    MessageReceived,
}

impl EventName {
    pub const ALL: [EventName; 11] = [
        EventName::Connect,
        EventName::Disconnect,
        EventName::Login,
        EventName::Logout,
        EventName::Update,
        EventName::Error,
        EventName::Providers,
        EventName::Token,
        EventName::About,
        EventName::MessageSent,
        EventName::MessageReceived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::Connect => "connect",
            EventName::Disconnect => "disconnect",
            EventName::Login => "login",
            EventName::Logout => "logout",
            EventName::Update => "update",
            EventName::Error => "error",
            EventName::Providers => "providers",
            EventName::Token => "token",
            EventName::About => "about",
            EventName::MessageSent => "messageSent",
            EventName::MessageReceived => "messageReceived",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| ClientError::UnknownEvent(s.to_string()))
    }
}

/// An event published by the client.
///
/// Serializes as `{ "type": <event name>, ...data }`. The `about` blob is
/// merged next to `type` rather than nested.
#[derive(Debug, Clone)]
pub enum Event {
    /// The socket is authenticated.
    Connect,
    /// An authenticated socket went away.
    Disconnect,
    Login {
        user: User,
    },
    Logout,
    Update {
        user: User,
    },
    Error {
        error: Arc<ClientError>,
    },
    Providers {
        providers: ProviderList,
    },
    Token {
        token: Option<String>,
        expires_in: Option<Value>,
    },
    About {
        about: AboutInfo,
    },
    /// Raw JSON written to the socket.
    MessageSent {
        message: String,
    },
    /// Raw frame read from the socket, before decoding.
    MessageReceived {
        message: String,
    },
}

impl Event {
    pub fn error(error: ClientError) -> Self {
        Event::Error {
            error: Arc::new(error),
        }
    }

    pub fn name(&self) -> EventName {
        match self {
            Event::Connect => EventName::Connect,
            Event::Disconnect => EventName::Disconnect,
            Event::Login { .. } => EventName::Login,
            Event::Logout => EventName::Logout,
            Event::Update { .. } => EventName::Update,
            Event::Error { .. } => EventName::Error,
            Event::Providers { .. } => EventName::Providers,
            Event::Token { .. } => EventName::Token,
            Event::About { .. } => EventName::About,
            Event::MessageSent { .. } => EventName::MessageSent,
            Event::MessageReceived { .. } => EventName::MessageReceived,
        }
    }

    /// Serialize to a JSON value.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", self.name().as_str())?;
        match self {
            Event::Connect | Event::Disconnect | Event::Logout => {}
            Event::Login { user } | Event::Update { user } => {
                map.serialize_entry("user", user)?;
            }
            Event::Error { error } => {
                map.serialize_entry("error", &ErrorPayload(error.as_ref()))?;
            }
            Event::Providers { providers } => {
                map.serialize_entry("providers", providers)?;
            }
            Event::Token { token, expires_in } => {
                map.serialize_entry("token", token)?;
                if let Some(expires_in) = expires_in {
                    map.serialize_entry("expiresIn", expires_in)?;
                }
            }
            Event::About { about } => match about.as_value() {
                Value::Object(fields) => {
                    // The event name wins over a `type` field inside the blob.
                    for (key, value) in fields.iter().filter(|(key, _)| *key != "type") {
                        map.serialize_entry(key, value)?;
                    }
                }
                other => map.serialize_entry("about", other)?,
            },
            Event::MessageSent { message } | Event::MessageReceived { message } => {
                map.serialize_entry("message", message)?;
            }
        }
        map.end()
    }
}

struct ErrorPayload<'a>(&'a ClientError);

impl Serialize for ErrorPayload<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("kind", self.0.kind().as_str())?;
        map.serialize_entry("message", &self.0.to_string())?;
        if let Some(status) = self.0.status() {
            map.serialize_entry("status", &status)?;
        }
        map.end()
    }
}

/// Event callback.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct Registry {
    named: HashMap<EventName, Vec<Listener>>,
    wildcard: Vec<Listener>,
}

/// Listener registry with a wildcard slot and a broadcast mirror.
pub struct EventBus {
    registry: Mutex<Registry>,
    event_tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            registry: Mutex::new(Registry::default()),
            event_tx,
        }
    }

    /// Register a callback for a named event, or for every event when `name` is `None`.
    pub fn subscribe<F>(&self, name: Option<&str>, callback: F) -> ClientResult<()>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        match name {
            Some(name) => {
                let name = name.parse::<EventName>()?;
                self.subscribe_to(name, callback);
            }
            None => self.subscribe_all(callback),
        }
        Ok(())
    }

    pub fn subscribe_to<F>(&self, name: EventName, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.registry
            .lock()
            .named
            .entry(name)
            .or_default()
            .push(Arc::new(callback));
    }

    pub fn subscribe_all<F>(&self, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.registry.lock().wildcard.push(Arc::new(callback));
    }

    /// A receiver that sees every event published after this call.
    pub fn receiver(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Invoke exact-name listeners, then wildcard listeners, then forward to the broadcast channel.
    ///
    /// The registry lock is released before any callback runs, so callbacks may
    /// register further listeners. Those only see later events.
    pub fn publish(&self, event: &Event) {
        let listeners: Vec<Listener> = {
            let registry = self.registry.lock();
            registry
                .named
                .get(&event.name())
                .into_iter()
                .flatten()
                .chain(registry.wildcard.iter())
                .cloned()
                .collect()
        };

        for listener in listeners {
            listener(event);
        }

        // No receivers is fine.
        let _ = self.event_tx.send(event.clone());
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("EventBus")
            .field("named", &registry.named.values().map(Vec::len).sum::<usize>())
            .field("wildcard", &registry.wildcard.len())
            .finish()
    }
}
