use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};
use venturelab_api::Server;
use venturelab_core::Settings;

#[derive(Parser, Debug)]
#[command(name = "venturelab-api", version, about = "VentureLab edge API server")]
struct Cli {
    /// Directory holding default.toml, <env>.toml and local.toml
    #[arg(long, env = "VENTURELAB_CONFIG_DIR", default_value_os_t = Settings::default_config_dir())]
    config_dir: PathBuf,

    /// Environment overlay to load, e.g. development or production
    #[arg(long, env = "VENTURELAB_ENV", default_value = "development")]
    env: String,

    /// Override server.port
    #[arg(long)]
    port: Option<u16>,
}

/// Filter used until `logging.level` is known.
const STARTUP_FILTER: &str = "venturelab_api=info,venturelab_core=info,tower_http=info";

/// `RUST_LOG` when it is set, otherwise the startup filter.
fn startup_directives(rust_log: Option<String>) -> String {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .unwrap_or_else(|| STARTUP_FILTER.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Installed before config loading so its messages are not lost.
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let from_env = rust_log.as_deref().is_some_and(|d| !d.trim().is_empty());
    let (filter, filter_handle) =
        reload::Layer::new(EnvFilter::new(startup_directives(rust_log)));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut settings = Settings::load(&cli.config_dir, &cli.env)?;
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if !from_env {
        filter_handle.reload(EnvFilter::new(&settings.logging.level))?;
    }

    let server = Server::new(settings).await?;
    server.run().await?;
    Ok(())
}
