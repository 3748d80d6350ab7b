// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::{self, Read, Write};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use clap::Parser;
use cli::{Cli, Commands, OutputFormatArg};
use orc_core::{AgentEvent, ApprovalDecision, ApprovalRequest};
use orc_model::catalog::ModelCatalogEntry;
use orc_tools::{
    events::ToolEvent, ApplyPatchTool, AskQuestionTool, DeleteFileTool, EditFileTool,
    FindFileTool, GlobFileSearchTool, GrepTool, ListDirTool, ReadFileTool, ReadImageTool,
    ReadLintsTool, RunTerminalCommandTool, SearchCodebaseTool, SwitchModeTool, TodoItem,
    TodoWriteTool, ToolRegistry, UpdateMemoryTool, WebFetchTool, WebSearchTool, WriteTool,
};
use tokio::sync::{mpsc, Mutex};

/// Process exit codes. Kept small and closed, matching the orchestrator's
/// own closed `ErrorKind` vocabulary.
const EXIT_SUCCESS: i32 = 0;
const EXIT_AGENT_ERROR: i32 = 1;
const EXIT_VALIDATION_ERROR: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(cmd) = &cli.command {
        let code = match cmd {
            Commands::Completions { shell } => {
                cli::print_completions(*shell);
                EXIT_SUCCESS
            }
            Commands::ShowConfig => {
                let config = orc_config::load(cli.config.as_deref())?;
                println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
                EXIT_SUCCESS
            }
            Commands::ListModels {
                provider,
                refresh,
                json,
            } => {
                let config = orc_config::load(cli.config.as_deref())?;
                list_models_cmd(&config, provider.as_deref(), *refresh, *json).await?;
                EXIT_SUCCESS
            }
            Commands::ListProviders { verbose, json } => {
                list_providers_cmd(*verbose, *json)?;
                EXIT_SUCCESS
            }
        };
        std::process::exit(code);
    }

    let mut config = orc_config::load(cli.config.as_deref())?;

    // Sync the orchestration-loop limits that live at top level (shared by
    // every agent mode) into the per-agent config the `Agent` actually reads,
    // so the two never drift.
    config.agent.max_tool_rounds = cli
        .max_recursion_depth
        .unwrap_or(config.orchestrator.max_recursion_depth);
    config.agent.max_tool_concurrency = config.orchestrator.max_tool_concurrency;
    config.agent.require_tool_approval =
        cli.require_tool_approval || config.orchestrator.require_tool_approval;
    if let Some(model) = &cli.model {
        config.model = orc_model::resolve_model_from_config(&config, model);
    }

    let prompt = match &cli.prompt {
        Some(p) => p.clone(),
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("reading prompt from stdin")?;
            if buf.trim().is_empty() {
                eprintln!("[orcd] no prompt given as an argument or on stdin");
                std::process::exit(EXIT_VALIDATION_ERROR);
            }
            buf
        }
    };

    let code = run_once(cli, Arc::new(config), prompt).await?;
    std::process::exit(code);
}

/// Build the tool registry (builtins + any configured MCP servers), spawn an
/// agent, submit one prompt, and stream the resulting events to stdout.
///
/// Returns the process exit code to use; errors that cannot be classified
/// into one of [`AgentEvent::Error`]/[`AgentEvent::Aborted`] bubble up as
/// `anyhow::Error` instead.
async fn run_once(cli: Cli, config: Arc<orc_config::Config>, prompt: String) -> anyhow::Result<i32> {
    let model: Arc<dyn orc_model::ModelProvider> = Arc::from(orc_model::from_config(&config.model)?);
    let max_ctx = model.catalog_context_window().unwrap_or(128_000) as usize;

    let mode = Arc::new(Mutex::new(cli.mode));
    let (tool_tx, tool_rx) = mpsc::channel::<ToolEvent>(64);
    let todos: Arc<Mutex<Vec<TodoItem>>> = Arc::new(Mutex::new(Vec::new()));

    let mut registry = ToolRegistry::new();
    registry.register(RunTerminalCommandTool {
        timeout_secs: config.tools.timeout_secs,
    });
    registry.register(ReadFileTool);
    registry.register(ReadImageTool);
    registry.register(WriteTool);
    registry.register(EditFileTool);
    registry.register(ApplyPatchTool);
    registry.register(GlobFileSearchTool);
    registry.register(FindFileTool);
    registry.register(GrepTool);
    registry.register(ListDirTool);
    registry.register(DeleteFileTool);
    registry.register(SearchCodebaseTool);
    registry.register(WebFetchTool);
    registry.register(WebSearchTool {
        api_key: config.tools.web.search.api_key.clone(),
    });
    registry.register(ReadLintsTool);
    registry.register(UpdateMemoryTool {
        memory_file: config.tools.memory.memory_file.clone(),
    });
    registry.register(AskQuestionTool::new());
    registry.register(TodoWriteTool::new(todos, tool_tx.clone()));
    registry.register(SwitchModeTool::new(mode.clone(), tool_tx.clone()));

    let mcp_pool = orc_mcp::connect_and_register(&config, &mut registry).await;

    // `assign_task` needs to be handed the same abort signal the top-level
    // `Agent` will adopt below, so a parent-turn cancellation tears down any
    // in-flight delegated sub-agent too. The registry must own the tool
    // before it is frozen into the `Arc` `Agent::new` takes — `ToolRegistry`
    // has no interior mutability once built.
    let (abort_handle, abort_signal) = orc_tools::abort_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    let task_tool = orc_core::TaskTool::new(
        model.clone(),
        config.clone(),
        Arc::new(config.agent.clone()),
        depth,
        abort_signal.clone(),
        tool_tx,
    );
    registry.register(task_tool);

    let runtime = orc_core::AgentRuntimeContext::default();

    let mut agent = orc_core::Agent::new(
        model,
        Arc::new(registry),
        Arc::new(config.agent.clone()),
        runtime,
        mode.clone(),
        tool_rx,
        max_ctx,
    )
    .with_abort_handle(abort_handle, abort_signal);

    let mut approval_rx = None;
    if config.agent.require_tool_approval {
        let (approval_tx, rx) = mpsc::channel::<ApprovalRequest>(8);
        agent = agent.with_approval_channel(approval_tx);
        approval_rx = Some(rx);
    }

    let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);

    let approval_task = approval_rx.map(|rx| tokio::spawn(run_approval_prompt(rx)));

    let stream = !cli.no_stream;
    let jsonl = cli.output_format == OutputFormatArg::Jsonl;
    let printer = tokio::spawn(async move {
        let mut exit_code = EXIT_SUCCESS;
        let mut final_text = String::new();
        while let Some(event) = rx.recv().await {
            if jsonl {
                if let Ok(line) = serde_json::to_string(&JsonEvent::from(&event)) {
                    println!("{line}");
                }
            }
            match &event {
                AgentEvent::AssistantChunk(delta) => {
                    final_text.push_str(delta);
                    if stream && !jsonl {
                        print!("{delta}");
                        let _ = io::stdout().flush();
                    }
                }
                AgentEvent::AssistantMessage(text) => {
                    if !stream && !jsonl {
                        print!("{text}");
                        let _ = io::stdout().flush();
                    }
                }
                AgentEvent::ToolCalls(batch) if !jsonl => {
                    for call in batch {
                        eprintln!("[tool] {} {}", call.name, call.args);
                    }
                }
                AgentEvent::ToolResult {
                    tool_name, is_error, ..
                } if !jsonl => {
                    let marker = if *is_error { "error" } else { "ok" };
                    eprintln!("[tool:{marker}] {tool_name}");
                }
                AgentEvent::Error { message, reason } => {
                    eprintln!("[orcd:error] {reason:?}: {message}");
                    exit_code = EXIT_AGENT_ERROR;
                }
                AgentEvent::Aborted { .. } => {
                    eprintln!("[orcd] interrupted");
                    exit_code = EXIT_INTERRUPTED;
                }
                AgentEvent::Done => {
                    if stream && !jsonl {
                        println!();
                    }
                }
                _ => {}
            }
        }
        (exit_code, final_text)
    });

    let submit_result = agent.submit(&prompt, tx).await;
    let (mut exit_code, final_text) = printer.await.unwrap_or((EXIT_AGENT_ERROR, String::new()));
    if let Some(task) = approval_task {
        task.abort();
    }
    mcp_pool.close_all().await;

    if let Err(e) = submit_result {
        eprintln!("[orcd:error] {e:#}");
        exit_code = EXIT_AGENT_ERROR;
    }

    if let Some(path) = &cli.output_last_message {
        std::fs::write(path, &final_text)
            .with_context(|| format!("writing final message to {}", path.display()))?;
    }

    Ok(exit_code)
}

/// Drives the interactive (stdin-based) approval gate: prints each pending
/// tool call and reads a one-line decision. Runs for the lifetime of the
/// agent's turn; exits when the sender side is dropped.
async fn run_approval_prompt(mut rx: mpsc::Receiver<ApprovalRequest>) {
    use tokio::io::AsyncBufReadExt;
    let stdin = tokio::io::stdin();
    let mut reader = tokio::io::BufReader::new(stdin);

    while let Some(req) = rx.recv().await {
        eprintln!(
            "[approval] {} {} — approve? [y/N/a(ll)]: ",
            req.tool_name, req.arguments
        );
        let mut line = String::new();
        let decision = match reader.read_line(&mut line).await {
            Ok(_) => match line.trim().to_lowercase().as_str() {
                "y" | "yes" => ApprovalDecision::Approve,
                "a" | "all" => ApprovalDecision::ApproveAll,
                _ => ApprovalDecision::Deny,
            },
            Err(_) => ApprovalDecision::Deny,
        };
        let _ = req.decision_tx.send(decision);
    }
}

/// A flattened, `serde`-friendly projection of [`AgentEvent`] for `--output-format jsonl`.
#[derive(serde::Serialize)]
struct JsonEvent {
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_error: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    finish_reason: Option<String>,
}

impl From<&AgentEvent> for JsonEvent {
    fn from(event: &AgentEvent) -> Self {
        let mut e = JsonEvent {
            kind: "unknown",
            text: None,
            tool_name: None,
            tool_names: None,
            is_error: None,
            message: None,
            finish_reason: None,
        };
        match event {
            AgentEvent::MessageStarted => e.kind = "message_started",
            AgentEvent::AssistantChunk(t) => {
                e.kind = "assistant_chunk";
                e.text = Some(t.clone());
            }
            AgentEvent::AssistantMessage(t) => {
                e.kind = "assistant_message";
                e.text = Some(t.clone());
            }
            AgentEvent::ThinkingDelta(t) => {
                e.kind = "thinking_delta";
                e.text = Some(t.clone());
            }
            AgentEvent::ThinkingComplete(t) => {
                e.kind = "thinking_complete";
                e.text = Some(t.clone());
            }
            AgentEvent::ToolCalls(batch) => {
                e.kind = "tool_calls";
                e.tool_names = Some(batch.iter().map(|c| c.name.clone()).collect());
            }
            AgentEvent::ToolResult {
                tool_name, is_error, ..
            } => {
                e.kind = "tool_result";
                e.tool_name = Some(tool_name.clone());
                e.is_error = Some(*is_error);
            }
            AgentEvent::StreamFinish { finish_reason, .. } => {
                e.kind = "stream_finish";
                e.finish_reason = Some(finish_reason.clone());
            }
            AgentEvent::ToolApprovalRequired { tool_name, .. } => {
                e.kind = "tool_approval_required";
                e.tool_name = Some(tool_name.clone());
            }
            AgentEvent::ToolApprovalResponse { approved, .. } => {
                e.kind = "tool_approval_response";
                e.is_error = Some(!approved);
            }
            AgentEvent::ContextCompacted { .. } => e.kind = "context_compacted",
            AgentEvent::TokenUsage { .. } => e.kind = "token_usage",
            AgentEvent::Done => e.kind = "done",
            AgentEvent::Aborted { partial_text } => {
                e.kind = "aborted";
                e.text = Some(partial_text.clone());
            }
            AgentEvent::Error { message, .. } => {
                e.kind = "error";
                e.message = Some(message.clone());
            }
            AgentEvent::TodoUpdate(_) => e.kind = "todo_update",
            AgentEvent::ModeChanged(_) => e.kind = "mode_changed",
            AgentEvent::Question { .. } => e.kind = "question",
            AgentEvent::QuestionAnswer { .. } => e.kind = "question_answer",
            AgentEvent::SubAgentLifecycle(_) => e.kind = "sub_agent_lifecycle",
        }
        e
    }
}

/// List available models, optionally querying the provider API for live data.
async fn list_models_cmd(
    config: &orc_config::Config,
    provider_filter: Option<&str>,
    refresh: bool,
    as_json: bool,
) -> anyhow::Result<()> {
    if let Some(prov) = provider_filter {
        if orc_model::get_driver(prov).is_none() {
            eprintln!("Unknown provider: {prov:?}");
            eprintln!("\nAvailable providers (run `orcd list-providers` for details):");
            for d in orc_model::list_drivers() {
                eprintln!("  {:20} {}", d.id, d.name);
            }
            anyhow::bail!("Invalid provider: {prov}");
        }
    }

    let entries: Vec<ModelCatalogEntry> = if refresh {
        let model_cfg = if let Some(prov) = provider_filter {
            let mut c = config.model.clone();
            c.provider = prov.to_string();
            c
        } else {
            config.model.clone()
        };
        let model = orc_model::from_config(&model_cfg)?;
        let mut live = model.list_models().await?;
        if let Some(prov) = provider_filter {
            live.retain(|e| e.provider == prov);
        }
        live
    } else {
        let mut all = orc_model::catalog::static_catalog();
        if let Some(prov) = provider_filter {
            all.retain(|e| e.provider == prov);
        }
        all.sort_by(|a, b| a.provider.cmp(&b.provider).then(a.id.cmp(&b.id)));
        all
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No models found.");
        return Ok(());
    }

    let id_w = entries.iter().map(|e| e.id.len()).max().unwrap_or(10).max(10);
    let prov_w = entries
        .iter()
        .map(|e| e.provider.len())
        .max()
        .unwrap_or(8)
        .max(8);

    println!(
        "{:<id_w$}  {:<prov_w$}  {:>12}  {:>16}  DESCRIPTION",
        "ID",
        "PROVIDER",
        "CTX WINDOW",
        "MAX OUT TOKENS",
        id_w = id_w,
        prov_w = prov_w,
    );
    println!("{}", "-".repeat(id_w + prov_w + 50));

    for e in &entries {
        let ctx = if e.context_window == 0 {
            "  -".to_string()
        } else {
            format!("{:>12}", e.context_window)
        };
        let max_out = if e.max_output_tokens == 0 {
            "  -".to_string()
        } else {
            format!("{:>16}", e.max_output_tokens)
        };
        println!(
            "{:<id_w$}  {:<prov_w$}  {}  {}  {}",
            e.id,
            e.provider,
            ctx,
            max_out,
            e.description,
            id_w = id_w,
            prov_w = prov_w,
        );
    }
    println!("\nTotal: {} model(s)", entries.len());
    Ok(())
}

/// List all registered model providers.
fn list_providers_cmd(verbose: bool, as_json: bool) -> anyhow::Result<()> {
    let drivers = orc_model::list_drivers();

    if as_json {
        #[derive(serde::Serialize)]
        struct ProviderJson {
            id: &'static str,
            name: &'static str,
            description: &'static str,
            default_api_key_env: Option<&'static str>,
            default_base_url: Option<&'static str>,
            requires_api_key: bool,
        }
        let rows: Vec<ProviderJson> = drivers
            .iter()
            .map(|d| ProviderJson {
                id: d.id,
                name: d.name,
                description: d.description,
                default_api_key_env: d.default_api_key_env,
                default_base_url: d.default_base_url,
                requires_api_key: d.requires_api_key,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("Supported Model Providers ({} total)\n", drivers.len());

    if verbose {
        for d in drivers {
            println!("  {} — {}", d.id, d.name);
            println!("    {}", d.description);
            if let Some(env) = d.default_api_key_env {
                println!("    API key env : {env}");
            }
            if let Some(url) = d.default_base_url {
                println!("    Default URL : {url}");
            }
            if !d.requires_api_key {
                println!("    Auth        : none required");
            }
            println!();
        }
    } else {
        let id_w = drivers.iter().map(|d| d.id.len()).max().unwrap_or(10).max(10);
        let name_w = drivers
            .iter()
            .map(|d| d.name.len())
            .max()
            .unwrap_or(8)
            .max(8);
        println!("{:<id_w$}  {:<name_w$}  DESCRIPTION", "ID", "NAME");
        println!("{}", "-".repeat(id_w + name_w + 40));
        for d in drivers {
            println!("{:<id_w$}  {:<name_w$}  {}", d.id, d.name, d.description);
        }
        println!("\nUse `orcd list-providers --verbose` for API key and URL details.");
        println!("Use `orcd list-models --provider <ID>` to see models for a specific provider.");
    }
    Ok(())
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
