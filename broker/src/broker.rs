//! Broker façade: lifecycle orchestration and the public operations the
//! application loop calls.

use bytes::Bytes;
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::{Event, Queue};
use crate::network::{self, EventQueue, SharedRegistry};
use crate::outbox::Outbox;
use crate::registry::{ClientId, ClientRegistry};

/// Why `start` refused to run.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// `start` was called while the broker was already running.
    #[error("broker is already running")]
    AlreadyRunning,
    /// The listening socket could not be set up.
    #[error("failed to bind listener: {0}")]
    Listen(#[from] std::io::Error),
}

/// Task handles and shared signals that only exist while running.
struct Active {
    stop: CancellationToken,
    local_addr: SocketAddr,
    listener: JoinHandle<()>,
    sender: JoinHandle<()>,
}

/// A connection/message broker for one game room.
///
/// Owns the client registry, the inbound event queue, and the outbound
/// staging area; while running it additionally owns the listener and
/// sender tasks plus one receiver task per live connection. Everything
/// hangs off this value, so independent brokers can coexist in one
/// process (and in one test).
///
/// Inbound payloads are handed out as [`Bytes`]; sending transfers
/// ownership of the buffer to the broker, which releases it when written,
/// superseded by a newer broadcast, or drained at shutdown. Dropping an
/// [`Event`] releases its payload.
pub struct Broker {
    addr: String,
    registry: SharedRegistry,
    events: EventQueue,
    outbox: Arc<Outbox>,
    active: Option<Active>,
}

impl Broker {
    /// Configures a broker that will listen on `addr`. Nothing is bound
    /// or spawned until [`Broker::start`].
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            registry: Arc::new(RwLock::new(ClientRegistry::new())),
            events: Arc::new(Queue::new()),
            outbox: Arc::new(Outbox::new()),
            active: None,
        }
    }

    /// Binds the listening socket and spawns the listener and sender
    /// tasks.
    ///
    /// Calling this on a running broker fails with
    /// [`BrokerError::AlreadyRunning`]. The bind happens before anything
    /// is spawned, so an error never leaves tasks behind.
    pub async fn start(&mut self) -> Result<(), BrokerError> {
        if self.active.is_some() {
            return Err(BrokerError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.addr).await?;
        let local_addr = listener.local_addr()?;
        let stop = CancellationToken::new();

        let listener_task = tokio::spawn(network::run_listener(
            listener,
            Arc::clone(&self.registry),
            Arc::clone(&self.events),
            stop.clone(),
        ));
        let sender_task = tokio::spawn(network::run_sender(
            Arc::clone(&self.registry),
            Arc::clone(&self.outbox),
            stop.clone(),
        ));

        self.active = Some(Active {
            stop,
            local_addr,
            listener: listener_task,
            sender: sender_task,
        });
        info!("Broker listening on {}", local_addr);
        Ok(())
    }

    /// Stops the broker and blocks until it is fully torn down.
    ///
    /// Cancels the stop token (which cascades to every per-connection halt
    /// token), then joins the listener, the sender, and every receiver, in
    /// that order; no new receiver can appear once the listener is gone.
    /// Staged outbound buffers and leftover inbound events are dropped.
    /// Calling this on a stopped broker is a no-op.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.stop.cancel();

        if active.listener.await.is_err() {
            warn!("Listener task panicked during shutdown");
        }
        if active.sender.await.is_err() {
            warn!("Sender task panicked during shutdown");
        }
        let receivers = self.registry.write().await.take_tasks();
        for task in receivers {
            if task.await.is_err() {
                warn!("Receiver task panicked during shutdown");
            }
        }

        self.outbox.clear();
        self.events.clear();
        info!("Broker stopped");
    }

    /// Queues one message for one client. Fire-and-forget: ownership of
    /// the buffer transfers, and a message to a client that is gone (or
    /// never existed) is dropped silently.
    pub fn send_to(&self, message: Bytes, client: ClientId) {
        self.outbox.queue_unicast(client, message);
    }

    /// Stages a broadcast to every connected client. Fire-and-forget;
    /// replaces (and releases) a previous broadcast the sender has not
    /// yet picked up.
    pub fn send_to_everyone(&self, message: Bytes) {
        self.outbox.post_broadcast(message);
    }

    /// Takes the next inbound event, waiting up to `timeout` for one.
    /// Returns [`Event::Empty`] if the deadline passes first.
    pub async fn take_message(&self, timeout: Duration) -> Event {
        self.events.wait_pop(timeout).await.unwrap_or(Event::Empty)
    }

    /// True when no inbound event is waiting. Non-blocking.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// The bound listening address, while running. Useful when binding to
    /// port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.active.as_ref().map(|active| active.local_addr)
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        // Joining is stop()'s job, but a running broker that gets dropped
        // should at least tell its tasks to wind down.
        if let Some(active) = &self.active {
            active.stop.cancel();
        }
    }
}
