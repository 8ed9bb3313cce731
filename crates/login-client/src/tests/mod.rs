//! Scenario tests for the login client, driven through mock transport and HTTP.
//!
//! - `harness.rs`    - Mock transport, mock HTTP and a recording test harness
//! - `handshake.rs`  - Cookie-to-token handshake, blocked cookies, HTTP failures
//! - `reconnect.rs`  - Close handling, reconnect backoff, disconnect
//! - `dispatch.rs`   - Inbound messages and change-only state events
//! - `heartbeat.rs`  - Ping cadence and stale connection detection
//! - `sends.rs`      - Immediate and queued sends, set_name
//! - `listeners.rs`  - Listener registration, ordering and re-entrancy

mod heartbeat;
mod sends;
