//! Relaychat CLI - run a chat server or a terminal chat client.
//!
//! This is the main binary entry point. See the `relaychat` library for
//! the core functionality.

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use relaychat::config::parse_port;
use relaychat::{
    ChannelObserver, ChatClient, ChatServer, ClientEvent, Config, ServerObserver, User,
};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Prints operator lines with a timestamp.
#[derive(Debug)]
struct ConsoleObserver;

impl ServerObserver for ConsoleObserver {
    fn on_log(&self, message: &str) {
        println!("{} {message}", chrono::Local::now().format("%H:%M:%S"));
    }

    fn on_roster_changed(&self, users: &[User]) {
        println!("Users: {}", describe_roster(users));
    }

    fn on_error(&self, message: &str) {
        eprintln!("Error: {message}");
    }
}

fn describe_roster(users: &[User]) -> String {
    if users.is_empty() {
        return "(nobody registered)".to_string();
    }
    users
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn run_server(config: &Config) -> Result<()> {
    let server = ChatServer::start(&config.server, Arc::new(ConsoleObserver))?;

    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("Failed to install Ctrl-C handler")?;

    let _ = stop_rx.recv();
    log::info!("Received shutdown signal");
    server.stop();
    Ok(())
}

/// Print client events until the observer is dropped.
fn print_client_events(rx: Receiver<ClientEvent>) {
    for event in rx {
        match event {
            ClientEvent::Message(line) => println!("{line}"),
            ClientEvent::Roster(users) => println!("Online: {}", describe_roster(&users)),
            ClientEvent::ConnectionStatus(true) => println!("-- connected --"),
            ClientEvent::ConnectionStatus(false) => println!("-- disconnected --"),
            ClientEvent::Error(message) => eprintln!("Error: {message}"),
        }
    }
}

fn run_client(config: &Config, username: &str) -> Result<()> {
    let (observer, rx) = ChannelObserver::<ClientEvent>::new();
    let printer = std::thread::spawn(move || print_client_events(rx));

    let client = ChatClient::new(&config.client, Arc::new(observer));
    if !client.connect(&config.client.host, config.client.port, username) {
        drop(client);
        let _ = printer.join();
        anyhow::bail!(
            "Could not connect to {}:{}",
            config.client.host,
            config.client.port
        );
    }

    println!("Type messages; /status <value>, /reconnect, /quit");
    for line in std::io::stdin().lock().lines() {
        let line = line.context("Failed to read stdin")?;
        let input = line.trim();
        let result = match input {
            "/quit" => break,
            "/reconnect" => {
                client.reconnect_now();
                Ok(())
            }
            _ => match input.strip_prefix("/status ") {
                Some(value) => client.set_status(value),
                None => client.send(input),
            },
        };
        if let Err(e) = result {
            eprintln!("Error: {e:#}");
        }
    }

    client.disconnect();
    drop(client);
    let _ = printer.join();
    Ok(())
}

// CLI
#[derive(Parser)]
#[command(name = "relaychat")]
#[command(version)]
#[command(about = "Line-delimited TCP chat relay")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chat server until Ctrl-C
    Serve {
        /// Port to listen on
        #[arg(long)]
        port: Option<String>,
        /// Interface to bind
        #[arg(long)]
        bind: Option<String>,
    },
    /// Connect to a server and chat from the terminal
    Connect {
        /// Server host
        #[arg(long)]
        host: Option<String>,
        /// Server port
        #[arg(long)]
        port: Option<String>,
        /// Username to register
        #[arg(long, short)]
        username: String,
    },
    /// Print the effective configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        save: bool,
    },
}

fn main() -> Result<()> {
    // Logs go to RELAYCHAT_LOG_FILE when set so they don't interleave with chat output
    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if let Ok(path) = std::env::var("RELAYCHAT_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        logger
            .target(env_logger::Target::Pipe(Box::new(log_file)))
            .filter_level(log::LevelFilter::Info);
    }
    logger.format_timestamp_secs().init();

    let cli = Cli::parse();
    let mut config = Config::load()?;

    match cli.command {
        Commands::Serve { port, bind } => {
            if let Some(port) = port {
                config.server.port = parse_port(&port)?;
            }
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            run_server(&config)?;
        }
        Commands::Connect {
            host,
            port,
            username,
        } => {
            if let Some(port) = port {
                config.client.port = parse_port(&port)?;
            }
            if let Some(host) = host {
                config.client.host = host;
            }
            run_client(&config, &username)?;
        }
        Commands::Config { save } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                config.save()?;
            }
        }
    }

    Ok(())
}
