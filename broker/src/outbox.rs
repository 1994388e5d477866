//! Outbound staging area serviced by the sender task.
//!
//! Unicast messages queue up FIFO, one entry per send. Broadcasts go into
//! a single-slot mailbox where a newer broadcast replaces an unsent older
//! one: broadcast payloads are snapshots of global state, so only the
//! newest matters.

use bytes::Bytes;
use log::debug;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::events::Queue;
use crate::registry::ClientId;

/// Staged outbound traffic, shared between the public send operations and
/// the sender task.
pub struct Outbox {
    unicast: Queue<(ClientId, Bytes)>,
    broadcast: Mutex<Option<Bytes>>,
    broadcast_notify: Notify,
}

impl Outbox {
    pub fn new() -> Self {
        Self {
            unicast: Queue::new(),
            broadcast: Mutex::new(None),
            broadcast_notify: Notify::new(),
        }
    }

    /// Stages one message for one client. Fire-and-forget: the buffer is
    /// owned by the outbox until it is written or the broker shuts down.
    pub fn queue_unicast(&self, client: ClientId, payload: Bytes) {
        self.unicast.push_back((client, payload));
    }

    /// Takes the oldest staged unicast, if any.
    pub fn pop_unicast(&self) -> Option<(ClientId, Bytes)> {
        self.unicast.pop_front()
    }

    /// Stages a broadcast, replacing any broadcast the sender has not yet
    /// picked up. The replaced buffer is released here.
    pub fn post_broadcast(&self, payload: Bytes) {
        let mut slot = self.broadcast.lock();
        if slot.replace(payload).is_some() {
            debug!("Broadcast coalesced over an unsent predecessor");
        }
        drop(slot);
        self.broadcast_notify.notify_one();
    }

    /// Atomically takes and clears the broadcast mailbox.
    pub fn take_broadcast(&self) -> Option<Bytes> {
        self.broadcast.lock().take()
    }

    /// True when nothing is staged in either lane.
    pub fn is_idle(&self) -> bool {
        self.unicast.is_empty() && self.broadcast.lock().is_none()
    }

    /// Completes once either lane may have something to deliver. The
    /// sender still has to check both lanes after waking.
    pub async fn ready(&self) {
        tokio::select! {
            _ = self.unicast.ready() => {}
            _ = self.broadcast_notify.notified() => {}
        }
    }

    /// Drops everything still staged. Run once at shutdown so no buffer
    /// outlives the broker.
    pub fn clear(&self) {
        let dropped = self.unicast.len();
        if dropped > 0 {
            debug!("Dropping {} unsent unicast messages at shutdown", dropped);
        }
        self.unicast.clear();
        self.broadcast.lock().take();
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}
