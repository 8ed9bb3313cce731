//! Login client: socket lifecycle, handshake driving and message dispatch.
//!
//! All state lives in one [`Core`] behind a `parking_lot` mutex. Transport,
//! timer and HTTP callbacks take the lock for a short synchronous section,
//! collect the events they want to publish, release the lock and only then
//! invoke listeners. A second, reentrant lock is held from before the state
//! change until publication ends, so listeners see events in the order the
//! state changed even when the pump and a timer race on different threads.
//! Every socket connection gets a fresh epoch; callbacks carrying an older
//! epoch are dropped.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::backoff::Backoff;
use crate::config::{ClientOptions, Endpoints};
use crate::error::{ClientError, ClientResult};
use crate::events::{Event, EventBus, EventName};
use crate::handshake::{self, Handshake, HandshakeInput};
use crate::http::{fetch, Credentials, HttpRequest, HttpRequester, HttpResponse, ReqwestRequester};
use crate::liveness::LivenessMonitor;
use crate::messages::{AboutInfo, ClientMessage, Provider, ServerMessage, User};
use crate::session::{ConnectionPhase, Session};
use crate::timers::{TimerSlot, Timers};
use crate::token::{decode_claims, TokenClaims};
use crate::transport::{Transport, TransportEvent, TransportSink};
use crate::ws::WsTransport;

/// A send waiting for the socket to open.
struct QueuedSend {
    message: ClientMessage,
    backoff: Backoff,
}

struct Core {
    session: Session,
    epoch: u64,
    sink: Option<Box<dyn TransportSink>>,
    handshake: Handshake,
    liveness: LivenessMonitor,
    transport_backoff: Backoff,
    http_backoff: Backoff,
    timers: Timers,
    queue: BTreeMap<u64, QueuedSend>,
    next_send_id: u64,
}

impl Core {
    fn sink_open(&self) -> bool {
        self.sink.as_ref().map(|s| s.is_open()).unwrap_or(false)
    }

    /// Serialize and write `message`, recording a `messageSent` event on success.
    fn transmit(&mut self, message: &ClientMessage, events: &mut Vec<Event>) {
        let raw = match message.to_json() {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, kind = message.kind(), "Failed to serialize message");
                return;
            }
        };
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        match sink.send(raw.clone()) {
            Ok(()) => events.push(Event::MessageSent { message: raw }),
            Err(e) => error!(error = %e, kind = message.kind(), "Failed to send message"),
        }
    }

    /// Stop everything tied to the current socket and close it.
    ///
    /// Retry timers of queued sends keep running.
    fn teardown(&mut self, events: &mut Vec<Event>) {
        self.timers
            .cancel_where(|slot| !matches!(slot, TimerSlot::Send(_)));
        if let Some(sink) = self.sink.take() {
            sink.close();
        }
        self.liveness.reset();
        self.handshake = Handshake::new();
        if self.session.phase().is_authenticated() {
            events.push(Event::Disconnect);
        }
        self.session.set_phase(ConnectionPhase::Disconnected);
        self.epoch += 1;
    }
}

struct Shared {
    options: ClientOptions,
    endpoints: Endpoints,
    transport: Arc<dyn Transport>,
    http: Arc<dyn HttpRequester>,
    bus: EventBus,
    /// Taken before `core` by every handler that publishes.
    publish_order: ReentrantMutex<()>,
    core: Mutex<Core>,
}

/// Persistent-session client for a login server.
///
/// Construct with [`LoginClient::new`], register listeners, then call
/// [`LoginClient::connect`] from inside a tokio runtime. The client
/// reconnects on its own until [`LoginClient::disconnect`] is called or it is
/// dropped.
pub struct LoginClient {
    shared: Arc<Shared>,
}

impl LoginClient {
    /// Create a client for `server` (host and optional path, no scheme) using
    /// the WebSocket transport and a cookie-enabled `reqwest` client.
    pub fn new(server: &str, options: ClientOptions) -> ClientResult<Self> {
        let http = ReqwestRequester::new()?;
        Self::with_collaborators(server, options, Arc::new(WsTransport::new()), Arc::new(http))
    }

    /// Create a client with explicit transport and HTTP implementations.
    pub fn with_collaborators(
        server: &str,
        options: ClientOptions,
        transport: Arc<dyn Transport>,
        http: Arc<dyn HttpRequester>,
    ) -> ClientResult<Self> {
        options.validate()?;
        let endpoints = options.endpoints(server)?;
        let backoff = Backoff::new(options.retry_base(), options.retry_max(), options.retry_mult);

        let core = Core {
            session: Session::new(),
            epoch: 0,
            sink: None,
            handshake: Handshake::new(),
            liveness: LivenessMonitor::new(options.ping_interval()),
            transport_backoff: backoff.clone(),
            http_backoff: backoff,
            timers: Timers::new(),
            queue: BTreeMap::new(),
            next_send_id: 0,
        };

        debug!(base_url = %endpoints.base_url, ws_url = %endpoints.ws_url, "Login client created");

        Ok(Self {
            shared: Arc::new(Shared {
                options,
                endpoints,
                transport,
                http,
                bus: EventBus::new(),
                publish_order: ReentrantMutex::new(()),
                core: Mutex::new(core),
            }),
        })
    }

    /// HTTP base URL, ending with `/`.
    pub fn base_url(&self) -> &str {
        &self.shared.endpoints.base_url
    }

    /// Socket URL, ending with `/`.
    pub fn ws_url(&self) -> &str {
        &self.shared.endpoints.ws_url
    }

    pub fn options(&self) -> &ClientOptions {
        &self.shared.options
    }

    pub fn logged_in(&self) -> bool {
        self.shared.core.lock().session.logged_in()
    }

    pub fn user(&self) -> Option<User> {
        self.shared.core.lock().session.user().cloned()
    }

    /// Known login providers; empty until the server sends a list.
    pub fn providers(&self) -> Vec<Provider> {
        self.shared
            .core
            .lock()
            .session
            .providers()
            .cloned()
            .unwrap_or_default()
    }

    /// True while the socket is authenticated.
    pub fn connected(&self) -> bool {
        self.state().is_authenticated()
    }

    pub fn state(&self) -> ConnectionPhase {
        self.shared.core.lock().session.phase()
    }

    pub fn token(&self) -> Option<String> {
        self.shared.core.lock().session.token().map(str::to_string)
    }

    /// Claims of the current token, decoded on every call.
    pub fn decoded_token(&self) -> Option<ClientResult<TokenClaims>> {
        self.token().map(|token| decode_claims(&token))
    }

    pub fn about(&self) -> Option<AboutInfo> {
        self.shared.core.lock().session.about().cloned()
    }

    /// Register a listener for `name`, or for every event when `name` is `None`.
    ///
    /// Fails with [`ClientError::UnknownEvent`] for names outside the event vocabulary.
    pub fn add_event_listener<F>(&self, name: Option<&str>, callback: F) -> ClientResult<()>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.shared.bus.subscribe(name, callback)
    }

    pub fn on<F>(&self, name: EventName, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.shared.bus.subscribe_to(name, callback);
    }

    pub fn on_all<F>(&self, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.shared.bus.subscribe_all(callback);
    }

    /// Receiver for every event published from now on.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.shared.bus.receiver()
    }

    /// Drop any current socket and open a new one.
    pub fn connect(&self) {
        self.shared.connect();
    }

    /// Close the socket and stop all timers. No reconnect follows.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    /// Send `message` now if the socket is open, otherwise keep retrying until it is.
    pub fn send(&self, message: ClientMessage) {
        self.shared.send(message);
    }

    /// Rename the logged-in user.
    ///
    /// Fails without issuing a request when nobody is logged in or `name` is empty.
    pub async fn set_name(&self, name: &str) -> ClientResult<HttpResponse> {
        let uri = {
            let core = self.shared.core.lock();
            let user = core.session.user().ok_or(ClientError::NotLoggedIn)?;
            user.uri().unwrap_or_default().to_string()
        };
        if name.is_empty() {
            return Err(ClientError::InvalidName);
        }
        let url = Url::parse(&uri)?;

        let request = HttpRequest::patch(url.as_str())
            .with_json(&json!({ "name": name }))?
            .with_credentials(Credentials::Include);

        info!(url = %url, "Updating user name");
        fetch(self.shared.http.as_ref(), request).await
    }
}

impl Drop for LoginClient {
    fn drop(&mut self) {
        // Timer tasks hold the shared state; stop them so it can be freed.
        let mut events = Vec::new();
        let mut core = self.shared.core.lock();
        core.teardown(&mut events);
        core.timers.cancel_all();
    }
}

impl std::fmt::Debug for LoginClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginClient")
            .field("base_url", &self.shared.endpoints.base_url)
            .field("state", &self.state())
            .finish()
    }
}

impl Shared {
    fn publish_all(&self, events: Vec<Event>) {
        for event in events {
            self.bus.publish(&event);
        }
    }

    fn connect(self: &Arc<Self>) {
        let _order = self.publish_order.lock();
        let mut events = Vec::new();
        {
            let mut core = self.core.lock();
            core.teardown(&mut events);
            let epoch = core.epoch;

            info!(url = %self.endpoints.ws_url, epoch, "Connecting to login server");
            let connection = self.transport.open(&self.endpoints.ws_url);
            core.sink = Some(connection.sink);
            core.session.set_phase(ConnectionPhase::Connecting);

            let pump = tokio::spawn(self.clone().pump(epoch, connection.events));
            core.timers.set(TimerSlot::Pump, pump);

            let parked: Vec<u64> = core
                .queue
                .keys()
                .copied()
                .filter(|id| !core.timers.is_active(TimerSlot::Send(*id)))
                .collect();
            for id in parked {
                self.arm_send_retry(&mut core, id);
            }
        }
        self.publish_all(events);
    }

    fn disconnect(self: &Arc<Self>) {
        let _order = self.publish_order.lock();
        let mut events = Vec::new();
        {
            let mut core = self.core.lock();
            info!(epoch = core.epoch, "Disconnecting from login server");
            core.teardown(&mut events);
            // Queued sends stay queued until the next connect().
            core.timers.cancel_all();
        }
        self.publish_all(events);
    }

    fn send(self: &Arc<Self>, message: ClientMessage) {
        let _order = self.publish_order.lock();
        let mut events = Vec::new();
        {
            let mut core = self.core.lock();
            self.send_locked(&mut core, message, &mut events);
        }
        self.publish_all(events);
    }

    fn send_locked(self: &Arc<Self>, core: &mut Core, message: ClientMessage, events: &mut Vec<Event>) {
        if core.sink_open() {
            core.transmit(&message, events);
            return;
        }

        let id = core.next_send_id;
        core.next_send_id += 1;
        debug!(id, kind = message.kind(), "Socket not ready, queueing message");
        let backoff = Backoff::new(
            self.options.retry_base(),
            self.options.retry_max(),
            self.options.retry_mult,
        );
        core.queue.insert(id, QueuedSend { message, backoff });
        self.arm_send_retry(core, id);
    }

    fn arm_send_retry(self: &Arc<Self>, core: &mut Core, id: u64) {
        let Some(entry) = core.queue.get_mut(&id) else {
            return;
        };
        let delay = entry.backoff.next_delay();
        let shared = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.retry_send(id);
        });
        core.timers.set(TimerSlot::Send(id), handle);
    }

    fn retry_send(self: &Arc<Self>, id: u64) {
        let _order = self.publish_order.lock();
        let mut events = Vec::new();
        {
            let mut core = self.core.lock();
            core.timers.forget(TimerSlot::Send(id));
            if core.sink_open() {
                // Flush the whole queue so sends leave in the order they were made.
                let queue = std::mem::take(&mut core.queue);
                for (queued_id, entry) in queue {
                    core.timers.cancel(TimerSlot::Send(queued_id));
                    core.transmit(&entry.message, &mut events);
                }
            } else {
                self.arm_send_retry(&mut core, id);
            }
        }
        self.publish_all(events);
    }

    /// Feed one connection's transport events into the handlers, in order.
    async fn pump(self: Arc<Self>, epoch: u64, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Opened => self.handle_open(epoch),
                TransportEvent::Message(raw) => self.handle_message(epoch, raw),
                TransportEvent::Closed { reason } => {
                    self.handle_close(epoch, reason);
                    return;
                }
            }
        }
        self.handle_close(epoch, Some("transport event stream ended".to_string()));
    }

    fn handle_open(self: &Arc<Self>, epoch: u64) {
        let mut core = self.core.lock();
        if core.epoch != epoch {
            return;
        }
        debug!(epoch, "Socket open, starting handshake");
        core.session.set_phase(ConnectionPhase::AwaitingAuth);
        core.liveness.start(Instant::now());

        let heartbeat = tokio::spawn(self.clone().heartbeat(epoch));
        core.timers.set(TimerSlot::Heartbeat, heartbeat);

        self.start_handshake(&mut core, epoch);
    }

    fn handle_close(self: &Arc<Self>, epoch: u64, reason: Option<String>) {
        let _order = self.publish_order.lock();
        let mut events = Vec::new();
        {
            let mut core = self.core.lock();
            if core.epoch != epoch {
                return;
            }

            core.sink = None;
            for slot in [
                TimerSlot::Heartbeat,
                TimerSlot::Handshake,
                TimerSlot::Settle,
                TimerSlot::HttpBackoff,
                TimerSlot::SessionRefresh,
            ] {
                core.timers.cancel(slot);
            }
            core.liveness.reset();

            if core.session.phase().is_authenticated() {
                events.push(Event::Disconnect);
            } else {
                events.push(Event::error(ClientError::ServerConnection(
                    "No reply from server, trying to reconnect.".to_string(),
                )));
            }
            core.session.set_phase(ConnectionPhase::Disconnected);

            let delay = core.transport_backoff.next_delay();
            info!(reason = ?reason, delay_ms = delay.as_millis() as u64, "Socket closed, scheduling reconnect");

            let shared = self.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                shared.reconnect(epoch);
            });
            core.timers.set(TimerSlot::Reconnect, handle);
        }
        self.publish_all(events);
    }

    fn reconnect(self: &Arc<Self>, epoch: u64) {
        if self.core.lock().epoch != epoch {
            return;
        }
        self.connect();
    }

    fn handle_message(self: &Arc<Self>, epoch: u64, raw: String) {
        let _order = self.publish_order.lock();
        let mut events = Vec::new();
        {
            let mut core = self.core.lock();
            if core.epoch != epoch {
                return;
            }
            events.push(Event::MessageReceived {
                message: raw.clone(),
            });

            match ServerMessage::parse(&raw) {
                Ok(message) => self.dispatch(&mut core, epoch, message, &mut events),
                Err(e) => warn!(error = %e, "Could not handle message from socket"),
            }
        }
        self.publish_all(events);
    }

    fn dispatch(self: &Arc<Self>, core: &mut Core, epoch: u64, message: ServerMessage, events: &mut Vec<Event>) {
        match message {
            ServerMessage::Open => self.start_handshake(core, epoch),
            ServerMessage::Providers(providers) => {
                if core.session.set_providers(providers.clone()) {
                    events.push(Event::Providers { providers });
                }
            }
            ServerMessage::About(about) => {
                if core.session.set_about(about.clone()) {
                    events.push(Event::About { about });
                }
            }
            ServerMessage::Token { token, expires_in } => {
                if core.session.set_token(token.clone()) {
                    events.push(Event::Token { token, expires_in });
                }
            }
            ServerMessage::Updated { user } => {
                core.session.update_user(user.clone());
                events.push(Event::Update { user });
            }
            ServerMessage::LoggedIn { user } => {
                core.session.log_in(user.clone());
                events.push(Event::Login { user });
            }
            ServerMessage::LoggedOut => {
                core.session.log_out();
                events.push(Event::Logout);
            }
            ServerMessage::Authenticated => {
                if core.session.phase().is_authenticated() {
                    debug!("Duplicate authenticated message ignored");
                    return;
                }
                core.session.set_phase(ConnectionPhase::Authenticated);
                core.http_backoff.reset();
                core.transport_backoff.reset();
                info!(epoch, "Authenticated with login server");
                events.push(Event::Connect);
            }
            ServerMessage::SessionAboutToExpire => {
                let shared = self.clone();
                let handle = tokio::spawn(async move {
                    match handshake::refresh_login(shared.http.as_ref(), &shared.endpoints).await {
                        Ok(()) => debug!("Session cookie refreshed"),
                        Err(e) => warn!(error = %e, "Session refresh failed"),
                    }
                });
                core.timers.set(TimerSlot::SessionRefresh, handle);
            }
            ServerMessage::Pong => core.liveness.record_pong(Instant::now()),
            ServerMessage::Unrecognized { kind, .. } => {
                warn!(kind = %kind, "Received unknown message type");
            }
        }
    }

    async fn heartbeat(self: Arc<Self>, epoch: u64) {
        let period = self.options.ping_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if !self.heartbeat_tick(epoch) {
                return;
            }
        }
    }

    /// Returns false once the heartbeat should stop.
    fn heartbeat_tick(self: &Arc<Self>, epoch: u64) -> bool {
        let _order = self.publish_order.lock();
        let mut events = Vec::new();
        let keep_going = {
            let mut core = self.core.lock();
            if core.epoch != epoch {
                return false;
            }
            if !core.sink_open() {
                true
            } else {
                core.transmit(&ClientMessage::ping(), &mut events);
                if core.liveness.is_stale(Instant::now()) {
                    warn!(
                        stale_after_ms = core.liveness.stale_after().as_millis() as u64,
                        "No pong from server, closing socket"
                    );
                    if let Some(sink) = core.sink.as_ref() {
                        sink.close();
                    }
                    events.push(Event::error(ClientError::ServerConnection(
                        "No reply from server, trying to reconnect.".to_string(),
                    )));
                    false
                } else {
                    true
                }
            }
        };
        self.publish_all(events);
        keep_going
    }

    fn start_handshake(self: &Arc<Self>, core: &mut Core, epoch: u64) {
        if !core.handshake.is_idle() {
            debug!(state = ?core.handshake.state(), "Handshake already started");
            return;
        }
        if let Err(e) = core.handshake.advance(HandshakeInput::Start) {
            warn!(error = %e, "Could not start handshake");
            return;
        }
        let handle = tokio::spawn(self.clone().run_handshake(epoch));
        core.timers.set(TimerSlot::Handshake, handle);
    }

    async fn run_handshake(self: Arc<Self>, epoch: u64) {
        if let Err(e) = handshake::refresh_login(self.http.as_ref(), &self.endpoints).await {
            self.handshake_failed(epoch, e);
            return;
        }
        if !self.advance_handshake(epoch, HandshakeInput::LoginRefreshed) {
            return;
        }

        let token = match handshake::request_token(self.http.as_ref(), &self.endpoints).await {
            Ok(token) => token,
            Err(e) => {
                self.handshake_failed(epoch, e);
                return;
            }
        };
        if !self.advance_handshake(epoch, HandshakeInput::TokenReceived) {
            return;
        }

        self.complete_handshake(epoch, token);
    }

    /// Apply `input` if the connection is still current.
    fn advance_handshake(&self, epoch: u64, input: HandshakeInput) -> bool {
        let mut core = self.core.lock();
        if core.epoch != epoch {
            return false;
        }
        match core.handshake.advance(input) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Handshake aborted");
                false
            }
        }
    }

    fn complete_handshake(self: &Arc<Self>, epoch: u64, token: String) {
        let _order = self.publish_order.lock();
        let claims = match decode_claims(&token) {
            Ok(claims) => claims,
            Err(e) => {
                self.handshake_failed(epoch, e);
                return;
            }
        };

        let mut events = Vec::new();
        {
            let mut core = self.core.lock();
            if core.epoch != epoch {
                return;
            }

            if !claims.has_session() {
                if core.handshake.advance(HandshakeInput::SessionMissing).is_ok() {
                    error!("Connection is not possible because third-party cookies are blocked.");
                    events.push(Event::error(ClientError::ThirdPartyCookiesBlocked));
                }
            } else if core.session.phase().is_authenticated() {
                if core.handshake.advance(HandshakeInput::AlreadyAuthenticated).is_ok() {
                    debug!("Socket already authenticated, token not sent");
                }
            } else if core.handshake.advance(HandshakeInput::SessionPresent).is_ok() {
                debug!(expires_at = ?claims.expires_at(), "Token carries a session, authenticating");
                self.send_locked(&mut core, ClientMessage::authenticate(&token), &mut events);
                core.session.set_token(Some(token));
            }
        }
        self.publish_all(events);
    }

    /// Wait for the settle delay; if the socket still is not authenticated,
    /// report `error` and close it after the HTTP backoff delay.
    fn handshake_failed(self: &Arc<Self>, epoch: u64, error: ClientError) {
        let mut core = self.core.lock();
        if core.epoch != epoch {
            return;
        }
        let input = core.handshake.failure_input();
        if let Err(e) = core.handshake.advance(input) {
            debug!(error = %e, "Handshake failure after completion ignored");
            return;
        }
        warn!(error = %error, "Could not load token from API");

        let error = Arc::new(error);
        let settle = self.options.http_settle();
        let shared = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            shared.settle_expired(epoch, error);
        });
        core.timers.set(TimerSlot::Settle, handle);
    }

    fn settle_expired(self: &Arc<Self>, epoch: u64, error: Arc<ClientError>) {
        let _order = self.publish_order.lock();
        let mut events = Vec::new();
        {
            let mut core = self.core.lock();
            if core.epoch != epoch {
                return;
            }
            if core.session.phase().is_authenticated() {
                debug!(error = %error, "Token request failed but socket authenticated anyway");
                return;
            }

            let delay = core.http_backoff.next_delay();
            if error.is_transient() {
                warn!(
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Could not load token from API, retrying by closing the socket"
                );
            } else {
                error!(
                    error = %error,
                    status = ?error.status(),
                    delay_ms = delay.as_millis() as u64,
                    "Token request rejected, retrying by closing the socket"
                );
            }
            events.push(Event::Error { error });

            let shared = self.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                shared.close_for_retry(epoch);
            });
            core.timers.set(TimerSlot::HttpBackoff, handle);
        }
        self.publish_all(events);
    }

    fn close_for_retry(&self, epoch: u64) {
        let core = self.core.lock();
        if core.epoch != epoch {
            return;
        }
        if let Some(sink) = core.sink.as_ref() {
            sink.close();
        }
    }
}

/// Delay before the next reconnect attempt.
#[cfg(test)]
pub(crate) fn peek_reconnect_delay(client: &LoginClient) -> std::time::Duration {
    client.shared.core.lock().transport_backoff.peek()
}

/// Number of sends still waiting for an open socket.
#[cfg(test)]
pub(crate) fn queued_sends(client: &LoginClient) -> usize {
    client.shared.core.lock().queue.len()
}

/// Number of timer tasks still running.
#[cfg(test)]
pub(crate) fn active_timers(client: &LoginClient) -> usize {
    client.shared.core.lock().timers.active_count()
}

#[cfg(test)]
pub(crate) fn handshake_state(client: &LoginClient) -> crate::handshake::HandshakeState {
    client.shared.core.lock().handshake.state()
}
