use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

mod app;
mod http;

/// Vespra — multi-tenant chat companion runtime.
#[derive(Parser, Debug)]
#[command(name = "vespra-gateway", version)]
struct Cli {
    /// Path to vespra.toml. Falls back to $VESPRA_CONFIG, then
    /// ~/.config/vespra/vespra.toml.
    #[arg(long)]
    config: Option<String>,

    /// Address to bind the management/status surface to.
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to bind the management/status surface to.
    #[arg(long, default_value_t = 8787)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vespra_gateway=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    let (state, inbound_rx) = app::AppState::new(cli.config.as_deref())?;
    let state = Arc::new(state);

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port).parse()?;
    let router = app::build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "vespra gateway listening");

    tokio::spawn(app::run_supervisor(Arc::clone(&state.supervisor), inbound_rx));

    axum::serve(listener, router).await?;

    Ok(())
}
