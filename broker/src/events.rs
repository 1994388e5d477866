//! Inbound events and the generic thread-safe queue that carries them.
//!
//! The same queue type backs the inbound event stream and the outbox's
//! unicast lane, so both get identical FIFO and wakeup semantics.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

use crate::registry::ClientId;

/// Events delivered to the application loop by [`crate::Broker::take_message`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A client connected. Always precedes any other event for that id.
    Connected { client: ClientId },
    /// A client's connection ended. Nothing further is delivered for the id;
    /// the id itself is never reassigned.
    Disconnected { client: ClientId },
    /// One complete framed payload received from a client.
    Message { client: ClientId, payload: Bytes },
    /// Sentinel returned when a bounded wait timed out with nothing
    /// available. Never stored in a queue.
    Empty,
}

/// Thread-safe FIFO paired with a wakeup signal.
///
/// Every push signals a waiter, which is what lets [`Queue::wait_pop`]
/// observe new items before its deadline. `push_front` exists for the one
/// place ordering is deliberately broken: a disconnect notification
/// overtaking other clients' already-queued traffic.
pub struct Queue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub fn push_back(&self, item: T) {
        self.items.lock().push_back(item);
        self.notify.notify_one();
    }

    pub fn push_front(&self, item: T) {
        self.items.lock().push_front(item);
        self.notify.notify_one();
    }

    /// Non-blocking pop; `None` when the queue is empty.
    pub fn pop_front(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Drops everything currently queued.
    pub fn clear(&self) {
        self.items.lock().clear();
    }

    /// Completes once a push may have made an item available. The caller
    /// must still pop, and must tolerate losing the race to another
    /// consumer.
    pub async fn ready(&self) {
        self.notify.notified().await;
    }

    /// Pops the front item, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` if the deadline passes with the queue still empty.
    pub async fn wait_pop(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            // Arm the wakeup before checking, so a push landing in between
            // is not lost.
            let notified = self.notify.notified();
            if let Some(item) = self.pop_front() {
                return Some(item);
            }
            if timeout_at(deadline, notified).await.is_err() {
                // Deadline hit; one last look in case the push and the
                // timeout raced.
                return self.pop_front();
            }
        }
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl Queue<Event> {
    /// Queues a disconnect notification with priority over other clients'
    /// already-queued traffic.
    ///
    /// The jump to the front only happens while none of the client's own
    /// events are still queued; otherwise the notification goes to the
    /// back, so a disconnect is never observed before that client's
    /// connect or any of its messages.
    pub fn push_disconnect(&self, client: ClientId) {
        let mut items = self.items.lock();
        let own_event_pending = items.iter().any(|event| match event {
            Event::Connected { client: c }
            | Event::Disconnected { client: c }
            | Event::Message { client: c, .. } => *c == client,
            Event::Empty => false,
        });
        if own_event_pending {
            items.push_back(Event::Disconnected { client });
        } else {
            items.push_front(Event::Disconnected { client });
        }
        drop(items);
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn pops_in_fifo_order() {
        let queue = Queue::new();
        queue.push_back(1);
        queue.push_back(2);
        queue.push_back(3);

        assert_eq!(queue.pop_front(), Some(1));
        assert_eq!(queue.pop_front(), Some(2));
        assert_eq!(queue.pop_front(), Some(3));
        assert_eq!(queue.pop_front(), None);
    }

    #[test]
    fn push_front_overtakes_queued_items() {
        let queue = Queue::new();
        queue.push_back("first");
        queue.push_back("second");
        queue.push_front("urgent");

        assert_eq!(queue.pop_front(), Some("urgent"));
        assert_eq!(queue.pop_front(), Some("first"));
        assert_eq!(queue.pop_front(), Some("second"));
    }

    #[test]
    fn empty_and_clear() {
        let queue = Queue::new();
        assert!(queue.is_empty());

        queue.push_back(42);
        assert!(!queue.is_empty());
        assert_eq!(queue.len(), 1);

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.pop_front(), None);
    }

    #[tokio::test]
    async fn wait_pop_returns_immediately_when_item_is_queued() {
        let queue = Queue::new();
        queue.push_back(7);

        let item = queue.wait_pop(Duration::from_secs(5)).await;
        assert_eq!(item, Some(7));
    }

    #[tokio::test]
    async fn wait_pop_times_out_on_empty_queue() {
        let queue: Queue<u32> = Queue::new();

        let started = Instant::now();
        let item = queue.wait_pop(Duration::from_millis(50)).await;

        assert_eq!(item, None);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn wait_pop_wakes_on_concurrent_push() {
        let queue = Arc::new(Queue::new());

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                queue.push_back("late arrival");
            })
        };

        let item = queue.wait_pop(Duration::from_secs(5)).await;
        assert_eq!(item, Some("late arrival"));
        producer.await.unwrap();
    }

    #[test]
    fn disconnect_overtakes_other_clients_backlog() {
        let queue = Queue::new();
        queue.push_back(Event::Message {
            client: 0,
            payload: bytes::Bytes::from_static(b"backlog"),
        });
        queue.push_back(Event::Message {
            client: 1,
            payload: bytes::Bytes::from_static(b"backlog"),
        });

        queue.push_disconnect(2);

        assert_eq!(queue.pop_front(), Some(Event::Disconnected { client: 2 }));
    }

    #[test]
    fn disconnect_never_overtakes_its_own_clients_events() {
        let queue = Queue::new();
        queue.push_back(Event::Connected { client: 5 });
        queue.push_back(Event::Message {
            client: 5,
            payload: bytes::Bytes::from_static(b"last words"),
        });

        queue.push_disconnect(5);

        assert_eq!(queue.pop_front(), Some(Event::Connected { client: 5 }));
        assert_eq!(
            queue.pop_front(),
            Some(Event::Message {
                client: 5,
                payload: bytes::Bytes::from_static(b"last words"),
            })
        );
        assert_eq!(queue.pop_front(), Some(Event::Disconnected { client: 5 }));
    }

    #[tokio::test]
    async fn zero_timeout_acts_as_a_non_blocking_pop() {
        let queue = Queue::new();
        assert_eq!(queue.wait_pop(Duration::ZERO).await, None::<u32>);

        queue.push_back(1);
        assert_eq!(queue.wait_pop(Duration::ZERO).await, Some(1));
    }
}
