// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use loom_config::{AgentMode, ModelConfig, StorageConfig};
use loom_core::{AgentScheduler, AutoDenyApproval, EventPublisher, MessageQueue, QueuedMessage, SchedulerDeps};
use loom_model::{AuthStyle, InferenceClient, OpenAiCompatClient};
use loom_store::{ConversationStore, Entry};
use loom_subprocess::SubprocessAdapter;
use loom_tools::{ReadFileTool, ShellTool, ToolPolicy, ToolRegistry};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::Completions { shell } => {
            cli::print_completions(*shell);
            Ok(())
        }
        Commands::List { limit } => run_list(cli.config.as_deref(), *limit).await,
        Commands::Show { conversation } => run_show(cli.config.as_deref(), conversation).await,
        Commands::Run { conversation, message, mode } => {
            let code = run_turn(cli.config.as_deref(), conversation, message.clone(), *mode).await?;
            std::process::exit(code)
        }
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

async fn run_list(config_path: Option<&std::path::Path>, limit: usize) -> anyhow::Result<()> {
    let config = loom_config::load(config_path)?;
    let store = build_store(&config.storage)?;
    let rows = store.list(limit, 0).await.context("listing conversations")?;
    if rows.is_empty() {
        println!("No saved conversations found.");
        return Ok(());
    }
    println!("{:<38}  {:<20}  {:<5}  TITLE", "ID", "UPDATED", "TURNS");
    println!("{}", "-".repeat(85));
    for meta in &rows {
        let updated = meta.updated_at.format("%Y-%m-%d %H:%M");
        let title = if meta.title.is_empty() { "(untitled)" } else { meta.title.as_str() };
        println!("{:<38}  {:<20}  {:<5}  {}", meta.id, updated, meta.message_count, title);
    }
    println!("\nTotal: {} conversation(s)", rows.len());
    Ok(())
}

async fn run_show(config_path: Option<&std::path::Path>, conversation: &str) -> anyhow::Result<()> {
    let config = loom_config::load(config_path)?;
    let store = build_store(&config.storage)?;
    let (entries, metadata) = store.load(conversation).await.with_context(|| format!("loading conversation {conversation}"))?;
    println!("# {}\n", if metadata.title.is_empty() { conversation } else { &metadata.title });
    for entry in &entries {
        print_entry(entry);
    }
    Ok(())
}

fn print_entry(entry: &Entry) {
    use loom_model::Role;
    let label = match entry.role {
        Role::User => "User",
        Role::Assistant => "Assistant",
        Role::System => "System",
        Role::Tool => "Tool",
    };
    if entry.hidden {
        return;
    }
    if !entry.tool_calls.is_empty() {
        for call in &entry.tool_calls {
            println!("## {label} (tool call)\n{}({})\n", call.name, call.arguments);
        }
        return;
    }
    if let Some(exec) = &entry.tool_execution {
        println!("## Tool result: {} ({})\n{}\n", exec.name, if exec.success { "ok" } else { "failed" }, exec.output);
        return;
    }
    println!("## {label}\n{}\n", entry.content);
}

async fn run_turn(
    config_path: Option<&std::path::Path>,
    conversation: &str,
    message: Option<String>,
    mode_override: Option<AgentMode>,
) -> anyhow::Result<i32> {
    let mut config = loom_config::load(config_path)?;
    if let Some(mode) = mode_override {
        config.agent.default_mode = mode;
    }

    let message = match message {
        Some(m) => m,
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf).context("reading message from stdin")?;
            buf
        }
    };
    if message.trim().is_empty() {
        anyhow::bail!("no message given: pass one as an argument or pipe it on stdin");
    }

    let store = build_store(&config.storage)?;
    let mut registry = ToolRegistry::new();
    registry.register(ShellTool { timeout_secs: config.tools.timeout_secs });
    registry.register(ReadFileTool::default());
    let tool_set_nonempty = !registry.names().is_empty();

    let client = build_client(&config.model, &config.subprocess, config.agent.default_mode, tool_set_nonempty);
    let events = Arc::new(EventPublisher::new(256));
    let queue = Arc::new(MessageQueue::new());
    let tool_policy = ToolPolicy::from_config(&config.tools);

    let scheduler = Arc::new(AgentScheduler::new(SchedulerDeps {
        store,
        tools: Arc::new(registry),
        tool_policy,
        client,
        config: config.agent.clone(),
        model_config: config.model.clone(),
        events: events.clone(),
        queue,
        approval: Arc::new(AutoDenyApproval),
    }));

    let mut reader = events.subscribe();
    let printer = tokio::spawn(async move {
        let mut exit_code = 0i32;
        while let Some(event) = reader.recv().await {
            match event {
                loom_core::AgentEvent::TextDelta(text) => {
                    print!("{text}");
                    let _ = io::stdout().flush();
                }
                loom_core::AgentEvent::TurnCompleted { .. } => exit_code = 0,
                loom_core::AgentEvent::TurnFailed { message } => {
                    eprintln!("\nloom: turn failed: {message}");
                    exit_code = 1;
                }
                loom_core::AgentEvent::TurnCancelled { .. } => exit_code = 130,
                _ => {}
            }
        }
        exit_code
    });

    let request_id = uuid::Uuid::new_v4().to_string();
    let result = scheduler.run_request(conversation, QueuedMessage::new(message, request_id), CancellationToken::new()).await;
    println!();

    drop(scheduler);
    drop(events);
    let exit_code = printer.await.unwrap_or(1);
    result?;
    Ok(exit_code)
}

fn build_store(config: &StorageConfig) -> anyhow::Result<Arc<dyn ConversationStore>> {
    let directory = config
        .backend_specific
        .get("directory")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".loom/conversations"));
    loom_store::from_backend_tag(&config.backend, directory)
}

fn build_client(
    model: &ModelConfig,
    subprocess: &loom_config::SubprocessConfig,
    mode: AgentMode,
    tool_set_nonempty: bool,
) -> Arc<dyn InferenceClient> {
    if model.provider == "subprocess" {
        return Arc::new(SubprocessAdapter::new(subprocess.clone(), model.name.clone(), mode, tool_set_nonempty));
    }
    let api_key = model.api_key.clone().or_else(|| model.api_key_env.as_ref().and_then(|var| std::env::var(var).ok()));
    let base_url = model.base_url.clone().unwrap_or_else(|| "https://api.openai.com/v1".into());
    Arc::new(OpenAiCompatClient::new(
        driver_name(&model.provider),
        model.name.clone(),
        api_key,
        &base_url,
        model.max_tokens,
        model.temperature,
        Vec::new(),
        auth_style(&model.provider),
        model.driver_options.clone(),
    ))
}

fn driver_name(provider: &str) -> &'static str {
    match provider {
        "openai" => "openai",
        "deepseek" => "deepseek",
        "openrouter" => "openrouter",
        "groq" => "groq",
        "azure" => "azure",
        "local" | "llamacpp" | "ollama" => "local",
        _ => "custom",
    }
}

fn auth_style(provider: &str) -> AuthStyle {
    match provider {
        "azure" => AuthStyle::ApiKeyHeader("api-key"),
        "local" | "llamacpp" | "ollama" => AuthStyle::None,
        _ => AuthStyle::Bearer,
    }
}
