//! Shallot VPN CLI
//!
//! One binary, two roles: `shallot server` terminates tunnels (exit node)
//! or splices them onward (relay, with `--forward`); `shallot client`
//! routes this host's traffic into a server. Both need root to manage
//! TUN devices, routes, and NAT.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use shallot_engine::{Client, ClientConfig, Server, ServerConfig};

/// How long shutdown waits for NAT/route cleanup before giving up
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shallot VPN - a TLS-tunneled IPv4 VPN with exit and relay server roles
#[derive(Parser)]
#[command(name = "shallot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as VPN server
    Server(ServerArgs),

    /// Run as VPN client
    Client(ClientArgs),
}

#[derive(Args)]
struct ServerArgs {
    /// Address to listen on (e.g. :443)
    #[arg(long, default_value = ":443")]
    listen: String,

    /// Next hop address (e.g. 1.2.3.4:443). Empty means exit node.
    #[arg(long, default_value = "")]
    forward: String,

    /// Path to the TLS certificate
    #[arg(long, default_value = "server.crt")]
    cert: PathBuf,

    /// Path to the TLS private key
    #[arg(long, default_value = "server.key")]
    key: PathBuf,

    /// Skip certificate verification when dialing the next hop
    #[arg(long)]
    insecure: bool,
}

#[derive(Args)]
struct ClientArgs {
    /// VPN server address (host:port)
    #[arg(long, default_value = "localhost:443")]
    server: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);
    ensure_root()?;

    match cli.command {
        Commands::Server(args) => run_server(args).await,
        Commands::Client(args) => run_client(args).await,
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn ensure_root() -> Result<()> {
    // SAFETY: geteuid has no preconditions
    if unsafe { libc::geteuid() } != 0 {
        bail!("must run as root to manage TUN devices, routes, and NAT");
    }
    Ok(())
}

async fn run_server(args: ServerArgs) -> Result<()> {
    info!("Starting shallot VPN server...");

    let config = ServerConfig {
        listen: args.listen,
        forward: (!args.forward.is_empty()).then_some(args.forward),
        cert_path: args.cert,
        key_path: args.key,
        insecure_next_hop: args.insecure,
    };

    let server = Server::new(config).context("invalid server configuration")?;
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let mut task = tokio::spawn(async move { server.run(shutdown_rx).await });

    tokio::select! {
        result = &mut task => {
            // The server only returns on its own for a fatal setup error
            result.context("server task panicked")??;
        }
        _ = wait_for_shutdown() => {
            info!("Shutting down server...");
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
                Ok(result) => result.context("server task panicked")??,
                Err(_) => error!("Timed out waiting for server shutdown"),
            }
        }
    }

    Ok(())
}

async fn run_client(args: ClientArgs) -> Result<()> {
    info!("Starting shallot VPN client...");

    let config = ClientConfig {
        server_addr: args.server,
    };

    let client = Client::new(config);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let mut task = tokio::spawn(async move { client.run(shutdown_rx).await });

    tokio::select! {
        result = &mut task => {
            result.context("client task panicked")??;
        }
        _ = wait_for_shutdown() => {
            info!("Shutting down client...");
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
                Ok(result) => result.context("client task panicked")??,
                Err(_) => error!("Timed out waiting for client shutdown"),
            }
        }
    }

    Ok(())
}

async fn wait_for_shutdown() {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("Failed to register SIGTERM handler");
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("Failed to register SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }
}
