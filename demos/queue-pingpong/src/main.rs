//! Several producers stream numbered messages into one queue while a single
//! consumer drains it with blocking pops. Reports delivered/dropped counts.
//!
//! ```text
//! RUST_LOG=shm_queue=debug cargo run -p shm-queue-pingpong -- --producers 4 --capacity 8
//! ```

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use shm_queue::{CondvarSemaphore, QueueConfig, QueueError, ShmQueue};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "queue-pingpong")]
#[command(about = "Stream messages through a bounded shm-queue")]
struct Args {
    /// Bytes per slot, including the 4-byte length prefix.
    #[arg(long, default_value_t = 64)]
    slot_size: u64,

    /// Number of slots in the ring.
    #[arg(long, default_value_t = 16)]
    capacity: u64,

    /// Number of producer threads.
    #[arg(long, default_value_t = 2)]
    producers: u32,

    /// Messages each producer attempts to send.
    #[arg(long, default_value_t = 100_000)]
    messages: u64,

    /// Retry dropped messages instead of counting them as lost.
    #[arg(long)]
    retry: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = QueueConfig::new(args.slot_size, args.capacity);
    let queue = match ShmQueue::with_config(config, CondvarSemaphore::new()) {
        Ok(queue) => Arc::new(queue),
        Err(err) => {
            tracing::error!(error = %err, "failed to open queue");
            std::process::exit(1);
        }
    };

    tracing::info!(
        slot_size = args.slot_size,
        capacity = args.capacity,
        producers = args.producers,
        messages = args.messages,
        "starting"
    );

    let started = Instant::now();
    let consumer = {
        let queue = queue.clone();
        let payload_capacity = queue.payload_capacity();
        thread::spawn(move || {
            let mut buf = vec![0u8; payload_capacity];
            let mut delivered = 0u64;
            let mut truncated = 0u64;
            loop {
                match queue.pop_blocking(&mut buf) {
                    Ok(popped) => {
                        delivered += 1;
                        if popped.truncated {
                            truncated += 1;
                        }
                    }
                    Err(QueueError::EndOfStream) => break,
                    Err(err) => {
                        tracing::warn!(error = %err, "pop failed");
                        break;
                    }
                }
            }
            (delivered, truncated)
        })
    };

    let producers: Vec<_> = (0..args.producers)
        .map(|id| {
            let queue = queue.clone();
            let messages = args.messages;
            let retry = args.retry;
            thread::spawn(move || {
                let mut sent = 0u64;
                for seq in 0..messages {
                    let message = format!("producer {id} message {seq}");
                    loop {
                        match queue.push(message.as_bytes()) {
                            Ok(()) => {
                                sent += 1;
                                break;
                            }
                            Err(QueueError::WouldBlockWrite) if retry => thread::yield_now(),
                            Err(_) => break,
                        }
                    }
                }
                sent
            })
        })
        .collect();

    let sent: u64 = producers
        .into_iter()
        .map(|p| p.join().unwrap_or(0))
        .sum();

    // Let the consumer drain what was accepted before closing.
    while !queue.is_empty() {
        thread::sleep(Duration::from_millis(1));
    }
    if let Err(err) = queue.destroy() {
        tracing::warn!(error = %err, "destroy failed");
    }
    let (delivered, truncated) = consumer.join().unwrap_or((0, 0));

    tracing::info!(
        sent,
        delivered,
        truncated,
        dropped = queue.drop_count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        status = %queue.status(),
        "done"
    );
}
