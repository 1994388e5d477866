//! Client connection registry and lifecycle state for the broker.
//!
//! This module tracks every connection the listener has ever accepted:
//! - Stable id assignment (ids are never reused, even after disconnect)
//! - Per-connection lifecycle status used for cooperative shutdown
//! - Write-half handles the sender borrows for unicast and broadcast
//! - Receiver task handles joined during broker teardown
//!
//! Entries are tombstoned rather than removed, so a stale id carried by an
//! in-flight event can never be confused with a later connection.

use log::debug;
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Stable handle for one accepted connection: an index into the registry's
/// grow-only entry table.
pub type ClientId = usize;

/// Lifecycle state of a connection.
///
/// `Running` entries are live. `StopRequested` is set by the sender when a
/// write fails (or implied for every client when the broker shuts down) and
/// tells the receiver to wind down. `Stopped` is set by the receiver right
/// before it exits and marks the entry as a tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Running,
    StopRequested,
    Stopped,
}

/// One accepted connection.
///
/// The write half lives behind its own lock so the sender can write without
/// holding the registry lock across socket I/O; the single sender task is
/// the only writer, so the lock is uncontended in practice.
struct ClientEntry {
    status: ClientStatus,
    writer: Option<Arc<Mutex<OwnedWriteHalf>>>,
    halt: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Copy of one entry's sendable state, taken by [`ClientRegistry::snapshot`].
///
/// Holding a snapshot does not hold the registry lock, which is what keeps
/// a slow socket write during broadcast from stalling unrelated registry
/// access (such as a new connection being registered).
#[derive(Clone)]
pub struct ClientHandle {
    pub id: ClientId,
    pub status: ClientStatus,
    pub writer: Option<Arc<Mutex<OwnedWriteHalf>>>,
}

/// Grow-only table of every connection accepted since the broker was
/// created.
///
/// All mutation happens behind the broker's `RwLock` around this type.
/// Appending is amortized O(1); entries are never removed or compacted.
#[derive(Default)]
pub struct ClientRegistry {
    entries: Vec<ClientEntry>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Adds a freshly accepted connection and returns its id.
    ///
    /// The id is the entry's index and stays valid for the lifetime of the
    /// registry. The receiver task handle is attached separately once it
    /// has been spawned.
    pub fn register(
        &mut self,
        writer: OwnedWriteHalf,
        halt: CancellationToken,
    ) -> ClientId {
        let id = self.entries.len();
        self.entries.push(ClientEntry {
            status: ClientStatus::Running,
            writer: Some(Arc::new(Mutex::new(writer))),
            halt,
            task: None,
        });
        id
    }

    /// Stores the receiver task handle for later joining.
    pub fn attach_task(&mut self, id: ClientId, task: JoinHandle<()>) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.task = Some(task);
        }
    }

    pub fn status(&self, id: ClientId) -> Option<ClientStatus> {
        self.entries.get(id).map(|entry| entry.status)
    }

    /// Asks one connection to wind down, typically after a failed write.
    ///
    /// Cancelling the entry's halt token wakes its receiver out of any
    /// pending read; the receiver then tombstones the entry itself.
    pub fn request_stop(&mut self, id: ClientId) {
        if let Some(entry) = self.entries.get_mut(id) {
            if entry.status == ClientStatus::Running {
                entry.status = ClientStatus::StopRequested;
                debug!("Client {} stop requested", id);
            }
            entry.halt.cancel();
        }
    }

    /// Tombstones an entry: final status, write half released.
    ///
    /// Called by the receiver immediately before it exits, so by the time a
    /// `Disconnected` event is observable the id already rejects sends.
    pub fn mark_stopped(&mut self, id: ClientId) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.status = ClientStatus::Stopped;
            entry.writer = None;
        }
    }

    /// Write-half handle for a client, only while it is still `Running`.
    ///
    /// Unicast traffic to any other state is silently dropped by the
    /// caller, matching fire-and-forget send semantics.
    pub fn running_writer(&self, id: ClientId) -> Option<Arc<Mutex<OwnedWriteHalf>>> {
        self.entries
            .get(id)
            .filter(|entry| entry.status == ClientStatus::Running)
            .and_then(|entry| entry.writer.clone())
    }

    /// Copies every entry's sendable state, in id order.
    ///
    /// The copy is taken under the lock; iterating it is lock-free. The
    /// broadcast fan-out uses this and skips entries that are not
    /// `Running`.
    pub fn snapshot(&self) -> Vec<ClientHandle> {
        self.entries
            .iter()
            .enumerate()
            .map(|(id, entry)| ClientHandle {
                id,
                status: entry.status,
                writer: entry.writer.clone(),
            })
            .collect()
    }

    /// Drains all receiver task handles for joining during shutdown.
    pub fn take_tasks(&mut self) -> Vec<JoinHandle<()>> {
        self.entries
            .iter_mut()
            .filter_map(|entry| entry.task.take())
            .collect()
    }

    /// Number of connections ever accepted, tombstones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
