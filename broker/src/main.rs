//! Demo host: runs a broker, broadcasts room state on an interval, and
//! echoes every received payload back to its sender. Ctrl-C is translated
//! into a single `stop()` call; the broker itself never sees a signal.

use broker::{Broker, Event};
use bytes::Bytes;
use clap::Parser;
use log::{info, warn};
use rand::seq::SliceRandom;
use std::time::Duration;
use tokio::time::interval;

const TEST_LINES: [&str; 4] = [
    "Test string1",
    "Second string to send to someone",
    "another one(third)",
    "Last one - fourth",
];

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Port to listen on
    #[clap(short, long, default_value = "5000")]
    port: u16,
    /// Milliseconds between room broadcasts
    #[clap(short, long, default_value = "500")]
    broadcast_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut broker = Broker::new(format!("{}:{}", args.host, args.port));
    broker.start().await?;

    let mut ticker = interval(Duration::from_millis(args.broadcast_ms));
    let mut rng = rand::thread_rng();
    let mut sent = 0usize;
    let mut received = 0usize;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
            _ = ticker.tick() => {
                let line = TEST_LINES.choose(&mut rng).copied().unwrap_or(TEST_LINES[0]);
                broker.send_to_everyone(Bytes::from_static(line.as_bytes()));
                sent += 1;

                // Drain whatever arrived since the last tick.
                while !broker.is_empty() {
                    match broker.take_message(Duration::ZERO).await {
                        Event::Connected { client } => info!("Client {} joined the room", client),
                        Event::Disconnected { client } => info!("Client {} left the room", client),
                        Event::Message { client, payload } => {
                            received += 1;
                            info!(
                                "Client {} says: {}",
                                client,
                                String::from_utf8_lossy(&payload)
                            );
                            // Echo back to the sender.
                            broker.send_to(payload, client);
                        }
                        Event::Empty => break,
                    }
                }
            }
        }
    }

    broker.stop().await;
    if received == 0 && sent > 0 {
        warn!("No client traffic was seen this run");
    }
    info!("Broadcasts sent: {}, messages received: {}", sent, received);
    Ok(())
}
