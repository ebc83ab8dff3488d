//! Hindsight server.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{error, info};

use hindsight::{
    config::Config,
    create_app,
    logging::{self, LogTarget},
    state::AppState,
};

/// Hindsight - read-only MCP server for Home Assistant recorder history
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serve newline-delimited JSON-RPC on stdin/stdout instead of HTTP
    #[arg(long)]
    stdio: bool,

    /// Port to listen on (overrides config file and MCP_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Additional config file, merged over the default locations
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_figment(args.port, args.config.as_deref())?;

    // stdout belongs to the protocol in stdio mode
    let target = if args.stdio {
        LogTarget::Stderr
    } else {
        LogTarget::Stdout
    };
    let _log_guard = logging::init(&config.logging, target)?;
    info!("Configuration loaded: {:?}", config.effective());

    run(args, config)
}

#[tokio::main]
async fn run(args: Args, config: Config) -> anyhow::Result<()> {
    let state = AppState::from_config(&config).await;
    if state.is_mock() {
        info!("Running in mock mode");
    }
    info!("Database pool: {:?}", state.pool_state());

    let result = if args.stdio {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        hindsight::stdio::serve(state.registry(), stdin, tokio::io::stdout()).await
    } else {
        serve_http(&state, config.server.port).await
    };

    state.shutdown().await;
    result
}

async fn serve_http(state: &AppState, port: u16) -> anyhow::Result<()> {
    let app = create_app(state.clone());

    // Bind to 0.0.0.0 to be accessible from all interfaces (Docker, network, etc.)
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    // Streaming sessions never end on their own, close them so the server can drain
    let sessions = state.sessions().clone();
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down gracefully...");
        sessions.shutdown().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shut down");
    Ok(())
}
