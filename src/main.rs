use anyhow::Context;
use sp_dev_proxy::{bootstrap, config::ServerConfig, init_dev_server, init_tracing, DevServerConfig};
use std::env;
use std::process;

#[tokio::main]
async fn main() {
    // Initialize tracing
    init_tracing();

    if let Err(e) = run().await {
        eprintln!("sp-dev-proxy error: {:#}", e);
        eprintln!("Usage: sp-dev-proxy [config_file]");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/private.json".to_string());

    let server = ServerConfig::from_env().context("Invalid server settings")?;
    let config = DevServerConfig {
        server,
        ..Default::default()
    };

    let config = bootstrap(config, &config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    init_dev_server(config).await?;
    Ok(())
}
