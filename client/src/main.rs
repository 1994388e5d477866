//! Demo client: connects to a broker, sends random test strings on an
//! interval, and prints whatever the room sends back.

use clap::Parser;
use client::Connection;
use log::{info, warn};
use rand::seq::SliceRandom;
use std::time::Duration;
use tokio::time::sleep;

const TEST_LINES: [&str; 4] = ["Client1", "123456789Client123456789", "420", "@"];

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Broker address to connect to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Broker port
    #[clap(short, long, default_value = "5000")]
    port: u16,
    /// Milliseconds between messages
    #[clap(short, long, default_value = "400")]
    interval_ms: u64,
    /// Number of messages to send before disconnecting (0 = until Ctrl+C)
    #[clap(short, long, default_value = "0")]
    count: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut connection = Connection::connect(&format!("{}:{}", args.host, args.port)).await?;
    info!("Connected from {}", connection.local_addr()?);

    let mut rng = rand::thread_rng();
    let mut sent = 0usize;
    let mut received = 0usize;

    loop {
        if args.count > 0 && sent >= args.count {
            break;
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, disconnecting");
                break;
            }
            _ = sleep(Duration::from_millis(args.interval_ms)) => {
                let line = TEST_LINES.choose(&mut rng).copied().unwrap_or(TEST_LINES[0]);
                connection.send(line.as_bytes()).await?;
                sent += 1;

                match connection.recv_timeout(Duration::from_millis(100)).await {
                    Ok(Some(payload)) => {
                        received += 1;
                        println!("Received: {}", String::from_utf8_lossy(&payload));
                    }
                    Ok(None) => {
                        warn!("Broker closed the connection");
                        break;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    connection.shutdown().await?;
    info!("Sent: {}, received: {}", sent, received);
    Ok(())
}
