//! Event Store CLI Client
//!
//! Command-line interface for creating, writing and following streams.

use std::process;

use clap::{Parser, Subcommand};
use crossbeam::channel;
use eventstore_tcp::{supervisor, Config, Connection, RecordedEvent, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Event Store CLI
#[derive(Parser, Debug)]
#[command(name = "eventstore-cli")]
#[command(about = "CLI for the Event Store TCP protocol")]
#[command(version)]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "1113")]
    port: u16,

    /// Request timeout in milliseconds
    #[arg(short, long, default_value = "10000")]
    timeout_ms: u64,

    /// Retry the initial connection with backoff
    #[arg(long)]
    retry: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a stream (succeeds if it already exists)
    CreateStream {
        /// Stream name
        stream: String,
    },

    /// Append one event
    Write {
        /// Stream name
        stream: String,

        /// Event type
        event_type: String,

        /// Event data
        data: String,
    },

    /// Print every event in a stream
    Read {
        /// Stream name
        stream: String,
    },

    /// Print events appended from now on
    Subscribe {
        /// Stream name
        stream: String,
    },

    /// Print every existing event, then keep following new ones
    Follow {
        /// Stream name
        stream: String,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,eventstore_tcp=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .host(&args.host)
        .port(args.port)
        .request_timeout_ms(args.timeout_ms)
        .build();

    let connection = match connect(&config, args.retry) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to connect to {}: {}", config.addr(), e);
            process::exit(1);
        }
    };

    if let Err(e) = run(&connection, args.command) {
        tracing::error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn connect(config: &Config, retry: bool) -> Result<Connection> {
    if retry {
        supervisor::connect_with_retry(config)
    } else {
        Connection::connect(config.clone())
    }
}

fn run(connection: &Connection, command: Commands) -> Result<()> {
    match command {
        Commands::CreateStream { stream } => {
            connection.create_stream(&stream)?.wait()?;
            println!("Stream {} created", stream);
        }
        Commands::Write {
            stream,
            event_type,
            data,
        } => {
            let event_number = connection.create_event(&stream, &event_type, data)?.wait()?;
            println!("Event created with event number = {}", event_number);
        }
        Commands::Read { stream } => {
            for event in connection.read_stream(&stream)?.wait()? {
                print_event(&event);
            }
        }
        Commands::Subscribe { stream } => {
            let subscription = connection.subscribe_to_stream(&stream)?;
            for event in subscription.iter() {
                print_event(&event?);
            }
        }
        Commands::Follow { stream } => {
            // The callback runs on the reader thread; hand events to main
            let (tx, rx) = channel::unbounded();
            let _subscription = connection.read_and_subscribe_to_stream(&stream, move |event| {
                let _ = tx.send(event);
            })?;
            for event in rx.iter() {
                print_event(&event?);
            }
        }
    }
    Ok(())
}

fn print_event(event: &RecordedEvent) {
    println!(
        "{}#{} {} {}",
        event.event_stream_id,
        event.event_number,
        event.event_type,
        String::from_utf8_lossy(&event.data)
    );
}
