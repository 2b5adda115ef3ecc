//! Impress Relay Binary
//!
//! `serve` runs the relay; `watch` joins a session and logs what happens in it.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use impress_collab::{Role, UserPresence};
use impress_relay::{
    serve_listener, spawn_idle_sweeper, ClientConfig, RelayClient, RelayConfig, RelayState,
};

#[derive(Parser)]
#[command(name = "impress-relay", version, about = "Real-time session relay")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay server
    Serve {
        /// Config file (defaults to ~/.impress/relay.toml)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Listen address, overrides config and environment
        #[arg(long)]
        addr: Option<String>,
        /// Unix socket for the admin endpoint
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// Join a session and log its events
    Watch {
        /// Relay base URL, e.g. ws://127.0.0.1:8787
        url: String,
        #[arg(long)]
        session: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_enum, default_value = "viewer")]
        role: RoleArg,
        #[arg(long, env = "IMPRESS_RELAY_TOKEN")]
        token: Option<String>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum RoleArg {
    Owner,
    Editor,
    Reviewer,
    Viewer,
}

impl From<RoleArg> for Role {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Owner => Role::Owner,
            RoleArg::Editor => Role::Editor,
            RoleArg::Reviewer => Role::Reviewer,
            RoleArg::Viewer => Role::Viewer,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            config,
            addr,
            socket,
        } => serve(config, addr, socket).await,
        Command::Watch {
            url,
            session,
            user,
            name,
            role,
            token,
        } => {
            let presence = UserPresence::new(user.clone(), name.unwrap_or(user), role.into());
            let mut config = ClientConfig::new(url, session, presence);
            if let Some(token) = token {
                config = config.with_token(token);
            }
            watch(config).await
        }
    }
}

async fn serve(
    config_path: Option<PathBuf>,
    addr: Option<String>,
    socket: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = RelayConfig::load(config_path.as_deref())?;
    if let Some(addr) = addr {
        config.server.addr = addr;
    }
    if socket.is_some() {
        config.server.socket_path = socket;
    }

    let state = Arc::new(RelayState::new(config));
    let sweeper = spawn_idle_sweeper(Arc::clone(&state));

    #[cfg(unix)]
    if let Some(path) = state.config.server.socket_path.clone() {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = impress_relay::socket::serve_unix_socket(path, state).await {
                tracing::error!("Admin socket failed: {}", e);
            }
        });
    }

    let listener = TcpListener::bind(&state.config.server.addr).await?;
    serve_listener(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down");
    })
    .await?;

    sweeper.abort();
    Ok(())
}

async fn watch(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = RelayClient::new(config);
    client.on_state_change(|state| tracing::info!(%state, "Connection state"));
    client.on_any(|relayed| {
        tracing::info!(
            sequence = relayed.sequence,
            sender = %relayed.sender,
            kind = %relayed.event.kind(),
            "Event"
        );
    });

    client.connect()?;
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                if !client.is_running() {
                    tracing::error!("Gave up reconnecting to relay");
                    break;
                }
            }
        }
    }
    client.close().await;
    Ok(())
}
