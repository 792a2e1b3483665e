//! streamwire server.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use streamwire::{config::Config, create_app_with_host, create_host, logging, mcp::SessionHost};

/// streamwire - Streamable HTTP transport for MCP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Route of the MCP endpoint
    #[arg(long)]
    path: Option<String>,

    /// Answer POSTed requests with a JSON body instead of an SSE stream
    #[arg(long)]
    json_response: bool,

    /// Run without sessions
    #[arg(long)]
    stateless: bool,

    /// Directory for per-session state files
    #[arg(long, env = "STREAMWIRE_SESSION_DIR")]
    session_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_figment(
        args.port,
        args.path,
        args.json_response.then_some(true),
        args.stateless.then_some(true),
        args.session_dir,
    )?;

    let _log_guard = logging::init(&config)?;
    info!("Starting streamwire server...");
    info!("Configuration loaded: {:?}", config);

    let host = create_host(&config);
    if !host.is_stateless() {
        spawn_session_sweeper(host.clone(), &config);
    }
    let app = create_app_with_host(host.clone(), &config.path);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {} (route {})", addr, config.path);

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Received Ctrl+C, shutting down gracefully...");
        host.close_all().await;
        info!("Server shutting down");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}

/// Periodically close sessions that have been idle too long.
fn spawn_session_sweeper(host: SessionHost, config: &Config) {
    let max_idle = config.max_idle();
    let mut ticker = tokio::time::interval(config.sweep_interval());

    tokio::spawn(async move {
        loop {
            ticker.tick().await;
            let removed = host.cleanup_stale(max_idle).await;
            if removed > 0 {
                info!("Removed {} stale session(s)", removed);
            }
        }
    });
}
