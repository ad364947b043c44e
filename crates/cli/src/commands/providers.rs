//! `chatforge models` / `chatforge check`: Provider inspection.

use std::path::Path;

use chatforge_gateway::AppState;

fn state(config_path: Option<&Path>) -> anyhow::Result<AppState> {
    let config = super::load_config(config_path)?;
    Ok(AppState::from_config(config)?)
}

pub async fn models(config_path: Option<&Path>, provider: &str) -> anyhow::Result<()> {
    let state = state(config_path)?;
    let handle = state.controller.registry().resolve(provider)?;
    let models = handle.list_models().await?;

    if models.is_empty() {
        println!("{provider}: no models reported");
        return Ok(());
    }
    for model in models {
        match model.name {
            Some(name) => println!("{}  ({name})", model.id),
            None => println!("{}", model.id),
        }
    }
    Ok(())
}

pub async fn check(config_path: Option<&Path>, provider: &str) -> anyhow::Result<()> {
    let state = state(config_path)?;
    let handle = state.controller.registry().resolve(provider)?;
    let result = handle.check().await;

    match result.error {
        None => println!("{provider}: ok"),
        Some(error) => anyhow::bail!("{provider}: {error}"),
    }
    Ok(())
}
