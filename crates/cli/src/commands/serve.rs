//! `chatforge serve`: Start the HTTP gateway.

use std::path::Path;

use anyhow::anyhow;

pub async fn run(
    config_path: Option<&Path>,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let mut config = super::load_config(config_path)?;
    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }

    println!("chatforge gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Default:   {}:{}", config.default_provider, config.default_model);

    chatforge_gateway::start(config)
        .await
        .map_err(|e| anyhow!("gateway failed: {e}"))
}
