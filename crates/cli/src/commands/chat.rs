//! `chatforge chat`: Run one turn and stream it to the terminal.
//!
//! Content goes to stdout, reasoning to stderr. The turn is a temporary chat:
//! nothing is persisted and no post-processing runs.

use std::io::Write;
use std::path::Path;

use anyhow::bail;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use chatforge_core::message::Message;
use chatforge_core::request::{ReasoningEffort, ReasoningRequest};
use chatforge_core::stream::UnifiedStreamEvent;
use chatforge_engine::ChatRequest;
use chatforge_gateway::AppState;

pub struct ChatOptions {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub reasoning: bool,
    pub effort: Option<String>,
}

fn parse_effort(raw: &str) -> ReasoningEffort {
    match raw.parse::<u64>() {
        Ok(budget) => ReasoningEffort::Budget(budget),
        Err(_) => ReasoningEffort::Level(raw.to_string()),
    }
}

fn build_request(message: String, options: ChatOptions) -> ChatRequest {
    let reasoning = options.reasoning.then(|| ReasoningRequest {
        effort: options.effort.as_deref().map(parse_effort),
        ..ReasoningRequest::enabled()
    });
    ChatRequest {
        messages: vec![Message::user(message)],
        provider: options.provider,
        model: options.model,
        reasoning,
        temp_chat: true,
        ..Default::default()
    }
}

pub async fn run(
    config_path: Option<&Path>,
    message: String,
    options: ChatOptions,
) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let state = AppState::from_config(config)?;
    let request = build_request(message, options);

    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let controller = state.controller.clone();
    let turn_cancel = cancel.clone();
    let turn = tokio::spawn(async move { controller.run("local", request, tx, turn_cancel).await });

    let mut stdout = std::io::stdout();
    let mut failure = None;
    loop {
        let event = tokio::select! {
            event = rx.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                continue;
            }
        };
        let Some(event) = event else { break };
        match event {
            UnifiedStreamEvent::ContentDelta { delta } => {
                print!("{delta}");
                stdout.flush()?;
            }
            UnifiedStreamEvent::ReasoningDelta { delta } => eprint!("{delta}"),
            UnifiedStreamEvent::Error { error } => failure = Some(error),
            _ => {}
        }
    }
    println!();

    let outcome = turn.await?;
    if let Some(error) = failure {
        bail!("{} ({})", error.message, error.kind);
    }
    let outcome = outcome?;
    tracing::debug!(
        prompt_tokens = outcome.usage.prompt_tokens,
        completion_tokens = outcome.usage.completion_tokens,
        tool_rounds = outcome.tool_rounds,
        "Turn finished"
    );
    Ok(())
}
