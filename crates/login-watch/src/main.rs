//! login-watch binary entry point.
//!
//! Usage: login-watch <server> [--options <file>] [--set-name <name>]
//!
//! Connects to a login server, keeps the session alive and prints every
//! client event to stdout as one JSON object per line. Logs go to stderr.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use login_client::{ClientOptions, Event, LoginClient};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

/// Watch a login server session from the command line.
#[derive(Parser, Debug)]
#[command(name = "login-watch")]
#[command(about = "Connects to a login server and prints client events as JSON lines")]
struct Args {
    /// Server host and optional path, without scheme (e.g. login.example.com/api).
    #[arg(env = "LOGIN_SERVER")]
    server: String,

    /// JSON file with client options. LOGIN_CLIENT_* variables override it.
    #[arg(long, env = "LOGIN_CLIENT_OPTIONS")]
    options: Option<PathBuf>,

    /// Use http/ws instead of https/wss.
    #[arg(long)]
    no_ssl: bool,

    /// Rename the user once the server reports a login.
    #[arg(long)]
    set_name: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format.
    #[arg(long, value_enum, default_value = "compact")]
    log_format: LogFormat,
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_options(args: &Args) -> anyhow::Result<ClientOptions> {
    let mut options = match &args.options {
        Some(path) => ClientOptions::load_from_file(path)
            .with_context(|| format!("failed to load options from {}", path.display()))?,
        None => ClientOptions::default(),
    };
    options
        .load_from_env()
        .context("invalid LOGIN_CLIENT_* environment variable")?;
    if args.no_ssl {
        options.ssl = false;
    }
    Ok(options)
}

fn print_event(event: &Event) {
    match event.to_value() {
        Ok(value) => println!("{value}"),
        Err(e) => warn!(error = %e, event = %event.name(), "Failed to serialize event"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.log_format);

    let options = load_options(&args)?;
    let client = LoginClient::new(&args.server, options).context("failed to create login client")?;
    info!(base_url = %client.base_url(), ws_url = %client.ws_url(), "login-watch starting");

    let mut events = client.events();
    let mut pending_name = args.set_name.clone();
    client.connect();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    print_event(&event);
                    if matches!(event, Event::Login { .. }) {
                        if let Some(name) = pending_name.take() {
                            match client.set_name(&name).await {
                                Ok(response) => info!(status = response.status, name = %name, "User renamed"),
                                Err(e) => error!(error = %e, name = %name, "Rename failed"),
                            }
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event output fell behind, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut ctrl_c => {
                info!("Received shutdown signal, exiting...");
                break;
            }
        }
    }

    client.disconnect();
    Ok(())
}
