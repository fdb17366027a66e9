use claude_relay::{build_router, AppState, RelayConfig, SharedLogger};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "claude-relay",
    about = "Multi-upstream reverse proxy for the Claude Messages API",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Request log file path
    #[arg(long, default_value = "claude-relay.log")]
    log_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "claude_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (mut config, config_path) = RelayConfig::find_and_load(cli.config.as_deref())?;

    // Environment beats file for deployment-level settings.
    if let Ok(key) = std::env::var("PROXY_ACCESS_KEY") {
        config.proxy_access_key = key;
    }
    if let Some(port) = cli.port {
        config.port = port;
    } else if let Ok(port) = std::env::var("PORT") {
        config.port = port
            .parse()
            .map_err(|_| anyhow::anyhow!("PORT must be a number, got '{port}'"))?;
    }

    config.validate()?;

    let logger = SharedLogger::new(&cli.log_file)?;

    info!("claude-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("  Upstreams: {}", config.upstreams.len());
    if let Some(channel) = config.current_channel() {
        info!(
            "  Active:    {} ({}) {} keys",
            channel.name,
            channel.service_type.as_str(),
            channel.api_keys.len()
        );
    }
    info!("  Health:    {}", config.health_check_path);
    info!("  Port:      {}", config.port);
    info!("  Log file:  {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "starting claude-relay upstreams={} port={}",
            config.upstreams.len(),
            config.port
        ),
    );

    let port = config.port;
    let state = AppState::new(config, Some(config_path), logger)?;
    let app = build_router(state);

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{bind_addr}");
    info!("");
    info!("  To use with Claude Code:");
    info!("    ANTHROPIC_BASE_URL=http://localhost:{port} claude");
    info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
