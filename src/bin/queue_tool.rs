//! Queue maintenance CLI
//!
//! Standalone binary for inspecting a pending-scrobbles queue file and for
//! draining one against the service without running a player.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use scrobble_relay::delivery::{Deliver, DeliveryOutcome, DeliveryTarget, HttpDelivery};
use scrobble_relay::queue::ScrobbleQueue;
use scrobble_relay::wire;

#[derive(Parser)]
#[command(name = "queue-tool")]
#[command(author, version, about = "Inspect and drain pending-scrobbles queue files")]
struct Args {
    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the pending scrobbles in a queue file
    Inspect {
        /// Queue file path
        file: PathBuf,
    },
    /// Submit the pending scrobbles in a queue file, removing each one the
    /// service acknowledges
    Drain {
        /// Queue file path
        file: PathBuf,

        /// Service API base URL
        #[arg(long, default_value = scrobble_relay::config::DEFAULT_ENDPOINT_URL)]
        url: String,

        /// Account username
        #[arg(long, env = "SCROBBLE_USERNAME")]
        username: String,

        /// Account password
        #[arg(long, env = "SCROBBLE_PASSWORD")]
        password: String,

        /// Per-request timeout in seconds
        #[arg(long, default_value = "20")]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match args.command {
        Command::Inspect { file } => inspect(&file),
        Command::Drain {
            file,
            url,
            username,
            password,
            timeout_secs,
        } => drain(&file, url, username, password, timeout_secs).await,
    }
}

fn inspect(file: &Path) -> Result<()> {
    let queue = ScrobbleQueue::open(file)
        .with_context(|| format!("could not open queue file {}", file.display()))?;

    if queue.is_empty() {
        println!("queue is empty");
        return Ok(());
    }

    for entry in queue.entries() {
        match wire::decode(entry.payload()) {
            Ok(info) => {
                let track = info.track();
                println!(
                    "{:>6}  {}  {} - {}",
                    entry.sequence(),
                    info.start().format("%Y-%m-%d %H:%M:%S"),
                    track.artists().join(", "),
                    track.title(),
                );
            }
            Err(e) => println!(
                "{:>6}  <undecodable: {e}> ({} bytes)",
                entry.sequence(),
                entry.payload().len(),
            ),
        }
    }
    println!("{} pending", queue.len());
    Ok(())
}

async fn drain(
    file: &Path,
    url: String,
    username: String,
    password: String,
    timeout_secs: u64,
) -> Result<()> {
    let mut queue = ScrobbleQueue::open(file)
        .with_context(|| format!("could not open queue file {}", file.display()))?;
    if queue.is_empty() {
        println!("queue is empty");
        return Ok(());
    }

    let transport = HttpDelivery::new(Duration::from_secs(timeout_secs))?;
    let target = DeliveryTarget {
        endpoint_url: url,
        username,
        password,
    };

    let mut submitted = 0usize;
    while let Some(entry) = queue.peek_head() {
        match transport.deliver(entry.payload(), &target).await {
            DeliveryOutcome::Accepted => {
                queue.remove_head(entry.sequence())?;
                submitted += 1;
            }
            DeliveryOutcome::Transient(reason) | DeliveryOutcome::Permanent(reason) => {
                bail!(
                    "delivery failed at entry {} after {} submitted: {}",
                    entry.sequence(),
                    submitted,
                    reason
                );
            }
        }
    }

    println!("{submitted} scrobbles submitted");
    Ok(())
}
