//! Network layer: the accept loop, per-connection receive loops, and the
//! single shared sender task.
//!
//! One task per live connection reads frames and feeds the event queue;
//! the listener task turns accepted sockets into registered clients; the
//! sender task drains the outbox, preferring unicast deliveries and
//! fanning broadcasts out over a registry snapshot.

use bytes::Bytes;
use log::{debug, error, info, warn};
use shared::{read_frame, write_frame};
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::events::{Event, Queue};
use crate::outbox::Outbox;
use crate::registry::{ClientId, ClientRegistry, ClientStatus};

pub(crate) type SharedRegistry = Arc<RwLock<ClientRegistry>>;
pub(crate) type EventQueue = Arc<Queue<Event>>;

/// Accepts connections until the broker stops.
///
/// Each accepted socket is split, registered (which assigns its id), and
/// handed to a freshly spawned receiver task. Accept failures are logged
/// and the loop keeps going; only cancellation ends it.
pub(crate) async fn run_listener(
    listener: TcpListener,
    registry: SharedRegistry,
    events: EventQueue,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let (reader, writer) = stream.into_split();
                    let halt = stop.child_token();
                    let mut reg = registry.write().await;
                    let id = reg.register(writer, halt.clone());
                    let task = tokio::spawn(run_receiver(
                        id,
                        reader,
                        Arc::clone(&registry),
                        Arc::clone(&events),
                        halt,
                    ));
                    reg.attach_task(id, task);
                    info!("Client {} connected from {}", id, addr);
                }
                Err(e) => {
                    // Transient accept errors must not take the loop down.
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
    info!("Listener stopped");
}

/// Read loop for one connection, from registration to teardown.
///
/// The connected event goes out before the first read, so the application
/// always observes a connection before any message from that id. On exit,
/// for any reason, the entry is tombstoned first and the disconnect event
/// jumps ahead of other clients' queued traffic so it is observed
/// promptly (never ahead of this client's own events).
async fn run_receiver(
    id: ClientId,
    mut reader: OwnedReadHalf,
    registry: SharedRegistry,
    events: EventQueue,
    halt: CancellationToken,
) {
    events.push_back(Event::Connected { client: id });

    loop {
        tokio::select! {
            _ = halt.cancelled() => {
                debug!("Client {} receiver halted", id);
                break;
            }
            frame = read_frame(&mut reader) => match frame {
                Ok(Some(payload)) => {
                    events.push_back(Event::Message { client: id, payload });
                }
                Ok(None) => {
                    debug!("Client {} closed the connection", id);
                    break;
                }
                Err(e) => {
                    // Short frame, reset, oversize length: the connection
                    // is dropped and no partial message is surfaced.
                    warn!("Client {} read failed: {}", id, e);
                    break;
                }
            }
        }
    }

    registry.write().await.mark_stopped(id);
    events.push_disconnect(id);
    info!("Client {} disconnected", id);
}

/// Drains the outbox until the broker stops.
///
/// Unicast deliveries are preferred; a pending broadcast is only picked up
/// when the unicast lane is empty. On shutdown everything still staged is
/// dropped so no buffer outlives the broker.
pub(crate) async fn run_sender(
    registry: SharedRegistry,
    outbox: Arc<Outbox>,
    stop: CancellationToken,
) {
    loop {
        if stop.is_cancelled() {
            break;
        }
        if let Some((client, payload)) = outbox.pop_unicast() {
            send_to_client(&registry, client, payload).await;
            continue;
        }
        if let Some(payload) = outbox.take_broadcast() {
            fan_out(&registry, payload).await;
            continue;
        }
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = outbox.ready() => {}
        }
    }

    outbox.clear();
    info!("Sender stopped");
}

/// Writes one frame to one client, if that client is still running.
///
/// Anything else (unknown id, tombstoned entry, stop already requested)
/// drops the message silently: sends are fire-and-forget. A failed write
/// stops only this client.
async fn send_to_client(registry: &SharedRegistry, client: ClientId, payload: Bytes) {
    let writer = registry.read().await.running_writer(client);
    let Some(writer) = writer else {
        debug!("Dropping message for client {}", client);
        return;
    };
    if let Err(e) = write_locked(&writer, &payload).await {
        warn!("Write to client {} failed: {}", client, e);
        registry.write().await.request_stop(client);
    }
}

/// Delivers one shared buffer to every running client in a snapshot.
///
/// The snapshot is copied under the registry lock and iterated without it,
/// so a stalled socket cannot block registry access for anyone else. A
/// write failure marks that one client and the fan-out continues.
async fn fan_out(registry: &SharedRegistry, payload: Bytes) {
    let snapshot = registry.read().await.snapshot();
    let mut delivered = 0usize;
    for handle in snapshot {
        if handle.status != ClientStatus::Running {
            continue;
        }
        let Some(writer) = handle.writer else { continue };
        match write_locked(&writer, &payload).await {
            Ok(()) => delivered += 1,
            Err(e) => {
                warn!("Broadcast to client {} failed: {}", handle.id, e);
                registry.write().await.request_stop(handle.id);
            }
        }
    }
    debug!("Broadcast delivered to {} clients", delivered);
}

async fn write_locked(
    writer: &Arc<Mutex<OwnedWriteHalf>>,
    payload: &[u8],
) -> std::io::Result<()> {
    let mut writer = writer.lock().await;
    write_frame(&mut *writer, payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpStream;

    fn empty_state() -> (SharedRegistry, EventQueue) {
        (
            Arc::new(RwLock::new(ClientRegistry::new())),
            Arc::new(Queue::new()),
        )
    }

    /// Accepts one connection and wires a receiver for it, the same way
    /// the listener task does.
    async fn accept_one(
        listener: &TcpListener,
        registry: &SharedRegistry,
        events: &EventQueue,
        stop: &CancellationToken,
    ) -> ClientId {
        let (stream, _) = listener.accept().await.unwrap();
        let (reader, writer) = stream.into_split();
        let halt = stop.child_token();
        let mut reg = registry.write().await;
        let id = reg.register(writer, halt.clone());
        let task = tokio::spawn(run_receiver(
            id,
            reader,
            Arc::clone(registry),
            Arc::clone(events),
            halt,
        ));
        reg.attach_task(id, task);
        id
    }

    #[tokio::test]
    async fn receiver_brackets_messages_with_lifecycle_events() {
        let (registry, events) = empty_state();
        let stop = CancellationToken::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut peer = TcpStream::connect(addr).await.unwrap();
        let id = accept_one(&listener, &registry, &events, &stop).await;

        write_frame(&mut peer, b"hello").await.unwrap();
        drop(peer);

        let wait = Duration::from_secs(5);
        assert_eq!(
            events.wait_pop(wait).await,
            Some(Event::Connected { client: id })
        );
        assert_eq!(
            events.wait_pop(wait).await,
            Some(Event::Message {
                client: id,
                payload: Bytes::from_static(b"hello"),
            })
        );
        assert_eq!(
            events.wait_pop(wait).await,
            Some(Event::Disconnected { client: id })
        );

        // Receiver tombstoned its entry on the way out.
        assert_eq!(
            registry.read().await.status(id),
            Some(ClientStatus::Stopped)
        );
    }

    #[tokio::test]
    async fn receiver_halts_on_cancellation() {
        let (registry, events) = empty_state();
        let stop = CancellationToken::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _peer = TcpStream::connect(addr).await.unwrap();
        let id = accept_one(&listener, &registry, &events, &stop).await;

        stop.cancel();

        let wait = Duration::from_secs(5);
        assert_eq!(
            events.wait_pop(wait).await,
            Some(Event::Connected { client: id })
        );
        assert_eq!(
            events.wait_pop(wait).await,
            Some(Event::Disconnected { client: id })
        );
    }

    #[tokio::test]
    async fn send_to_unknown_client_is_silently_dropped() {
        let (registry, _events) = empty_state();

        // No registration ever happened for this id; nothing to assert
        // beyond "does not panic, does not hang".
        send_to_client(&registry, 42, Bytes::from_static(b"nobody home")).await;
    }

    #[tokio::test]
    async fn fan_out_with_no_clients_is_a_no_op() {
        let (registry, _events) = empty_state();
        fan_out(&registry, Bytes::from_static(b"to the void")).await;
    }

    #[tokio::test]
    async fn sender_delivers_a_staged_unicast() {
        let (registry, events) = empty_state();
        let outbox = Arc::new(Outbox::new());
        let stop = CancellationToken::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut peer = TcpStream::connect(addr).await.unwrap();
        let id = accept_one(&listener, &registry, &events, &stop).await;

        let sender = tokio::spawn(run_sender(
            Arc::clone(&registry),
            Arc::clone(&outbox),
            stop.clone(),
        ));

        outbox.queue_unicast(id, Bytes::from_static(b"direct"));

        let frame = tokio::time::timeout(Duration::from_secs(5), read_frame(&mut peer))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.as_deref(), Some(&b"direct"[..]));

        stop.cancel();
        sender.await.unwrap();
    }
}
