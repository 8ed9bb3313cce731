//! Named, cancellable background tasks owned by the client.

use std::collections::HashMap;

use tokio::task::JoinHandle;

/// What a timer is for. At most one task per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerSlot {
    /// Delayed `connect()` after a close.
    Reconnect,
    /// Wait after a failed token request before deciding to give up on the socket.
    Settle,
    /// Delayed close of an unauthenticated socket.
    HttpBackoff,
    Heartbeat,
    /// The running cookie/token handshake.
    Handshake,
    /// Cookie refresh requested by the server.
    SessionRefresh,
    /// Reads events from the current transport.
    Pump,
    /// Retry of one queued send.
    Send(u64),
}

/// Arena of task handles keyed by [`TimerSlot`].
#[derive(Debug, Default)]
pub struct Timers {
    handles: HashMap<TimerSlot, JoinHandle<()>>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle` in `slot`, aborting whatever was there.
    pub fn set(&mut self, slot: TimerSlot, handle: JoinHandle<()>) {
        if let Some(previous) = self.handles.insert(slot, handle) {
            previous.abort();
        }
    }

    /// Abort the task in `slot`. Returns false if the slot was empty.
    pub fn cancel(&mut self, slot: TimerSlot) -> bool {
        match self.handles.remove(&slot) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Drop the handle in `slot` without aborting it.
    ///
    /// Used by a task that is finishing on its own.
    pub fn forget(&mut self, slot: TimerSlot) {
        self.handles.remove(&slot);
    }

    /// Abort every task whose slot matches `predicate`.
    pub fn cancel_where<F>(&mut self, predicate: F)
    where
        F: Fn(&TimerSlot) -> bool,
    {
        self.handles.retain(|slot, handle| {
            if predicate(slot) {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }

    /// True if `slot` holds a task that has not finished.
    pub fn is_active(&self, slot: TimerSlot) -> bool {
        self.handles
            .get(&slot)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Number of tasks still running.
    pub fn active_count(&self) -> usize {
        self.handles.values().filter(|h| !h.is_finished()).count()
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
