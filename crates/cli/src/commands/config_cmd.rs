//! `chatforge config`: Configuration management commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use chatforge_config::AppConfig;

fn target(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

/// Write the default configuration. Refuses to clobber an existing file
/// unless `force` is set.
pub fn init(config_path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let path = target(config_path);
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    std::fs::write(&path, AppConfig::default_toml())
        .with_context(|| format!("failed to write {}", path.display()))?;

    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

pub fn show(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    // Debug output redacts keys; TOML would not
    println!("{config:#?}");
    Ok(())
}
