pub mod chat;
pub mod config_cmd;
pub mod providers;
pub mod serve;

use std::path::Path;

use anyhow::Context;
use chatforge_config::AppConfig;

/// Load the configuration from `path`, or from the default location with
/// environment overrides applied.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => AppConfig::load().context("failed to load config"),
    }
}
