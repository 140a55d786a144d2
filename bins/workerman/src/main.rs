use clap::{Parser, Subcommand};
use tracing::debug;

use workerman_core::{Command, ListenerConfig, ServerConfig, Workerman};
use workerman_net::{Protocol, ServerCallbacks};

/// Multi-process socket server supervisor
#[derive(Parser, Debug)]
#[command(name = "workerman", author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (YAML)
    #[arg(short, long, value_name = "FILE", default_value = "workerman.yaml")]
    config: String,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Start the master and its workers
    Start {
        /// Fork and detach from the terminal
        #[arg(short, long)]
        daemon: bool,
    },
    /// Stop the running master
    Stop {
        /// Drain connections before exiting
        #[arg(short, long)]
        graceful: bool,
    },
    /// Fork-replace every worker
    Restart {
        /// Drain connections before replacing
        #[arg(short, long)]
        graceful: bool,
    },
    /// Show the aggregated worker status
    Status {
        /// Show column descriptions instead of querying a live master
        #[arg(short, long)]
        info: bool,
    },
}

fn main() {
    let args = Args::parse();
    initialize_logging(args.debug);

    let command = match args.command {
        CliCommand::Start { daemon } => Command::Start { daemon },
        CliCommand::Stop { graceful } => Command::Stop { graceful },
        CliCommand::Restart { graceful } => Command::Restart { graceful },
        CliCommand::Status { info } => Command::Status { info },
    };

    if let Err(error) = run(&args.config, command) {
        if error.is_lifecycle() {
            eprintln!("{error}");
        } else {
            eprintln!("error: {error}");
            let mut source = std::error::Error::source(&error);
            while let Some(cause) = source {
                eprintln!("caused by: {cause}");
                source = cause.source();
            }
        }
        std::process::exit(1);
    }
}

fn run(config_path: &str, command: Command) -> workerman_core::Result<()> {
    let config = ServerConfig::load_from_file(config_path)?;
    debug!(
        name = %config.name,
        listeners = config.listeners.len(),
        "configuration loaded"
    );
    Workerman::from_config(&config, demo_callbacks).run(command)
}

/// Built-in application behavior: a canned response for HTTP-tagged
/// listeners, byte echo for everything else.
fn demo_callbacks(config: &ListenerConfig) -> ServerCallbacks {
    match config.protocol {
        Protocol::Http => ServerCallbacks::new().on_message(|conn, _data| {
            let body = "workerman\n";
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = conn.send(response.as_bytes());
        }),
        _ => ServerCallbacks::new()
            .on_message(|conn, data| {
                let _ = conn.send(data);
            })
            .on_datagram(|mut datagram| {
                let data = datagram.data().to_vec();
                let _ = datagram.reply(&data);
            }),
    }
}

fn initialize_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
