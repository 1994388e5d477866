//! # Game Message Broker
//!
//! Connection and message broker for a small multiplayer-game backend.
//! The broker accepts many concurrent TCP clients, frames length-prefixed
//! messages, and multiplexes per-client unicast and whole-room broadcast
//! traffic, exposing inbound traffic to the application loop as a single
//! bounded-wait event stream.
//!
//! ## Architecture
//!
//! One task per live connection (the receiver), plus exactly one listener
//! task and one sender task:
//!
//! - The **listener** accepts sockets, registers them, and spawns their
//!   receivers.
//! - Each **receiver** emits a connect event, turns every well-formed
//!   frame into a message event, and emits a disconnect event when the
//!   connection ends for any reason.
//! - The **sender** drains the outbox: queued unicast messages first,
//!   then at most one pending broadcast, fanned out over a registry
//!   snapshot so no lock is held across socket I/O.
//!
//! Shutdown is cooperative: a cancellation token cascades from the broker
//! to every task, and [`Broker::stop`] joins them all before returning.
//!
//! ## Delivery semantics
//!
//! Best-effort over a live connection: a message is written once or
//! dropped. A client's inbound messages are delivered in send order and
//! bracketed by exactly one connect and one disconnect event; ordering
//! across different clients is unspecified. Broadcasts coalesce: a newer
//! room-state snapshot replaces an unsent older one.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use broker::{Broker, Event};
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut broker = Broker::new("127.0.0.1:5000");
//!     broker.start().await?;
//!
//!     loop {
//!         match broker.take_message(Duration::from_secs(1)).await {
//!             Event::Connected { client } => println!("client {} joined", client),
//!             Event::Message { client, payload } => {
//!                 // Echo the payload back to its sender.
//!                 broker.send_to(payload, client);
//!             }
//!             Event::Disconnected { client } => {
//!                 println!("client {} left", client);
//!                 break;
//!             }
//!             Event::Empty => { /* timed out; run other work */ }
//!         }
//!     }
//!
//!     broker.stop().await;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod events;
pub mod outbox;
pub mod registry;

mod network;

pub use broker::{Broker, BrokerError};
pub use events::{Event, Queue};
pub use registry::{ClientId, ClientStatus};
