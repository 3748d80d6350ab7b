use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use orc_config::{AgentConfig, AgentMode, Config};
use orc_tools::{
    events::{SubAgentLifecycle, SubAgentStatus, TodoItem, ToolEvent},
    policy::ApprovalPolicy,
    tool::{Tool, ToolCall, ToolOutput},
    AskQuestionTool, ApplyPatchTool, DeleteFileTool, EditFileTool,
    GlobFileSearchTool, GrepTool, ListDirTool, ReadFileTool, ReadLintsTool,
    RunTerminalCommandTool, SearchCodebaseTool, SwitchModeTool, TodoWriteTool,
    UpdateMemoryTool, WebFetchTool, WebSearchTool, WriteTool,
    ToolRegistry,
};

use crate::agent::Agent;
use crate::events::AgentEvent;

const MAX_DEPTH: usize = 3;

pub struct TaskTool {
    model: Arc<dyn orc_model::ModelProvider>,
    config: Arc<Config>,
    agent_config: Arc<AgentConfig>,
    depth: Arc<AtomicUsize>,
    /// The spawning agent's abort signal. Cloned into every sub-agent so a
    /// parent-turn cancellation tears down in-flight delegated work too.
    parent_abort: orc_tools::AbortSignal,
    /// Forwards `ToolEvent::SubAgent` lifecycle updates to the parent's
    /// event bus, tagged with the originating tool-call id.
    tool_event_tx: mpsc::Sender<ToolEvent>,
}

impl TaskTool {
    pub fn new(
        model: Arc<dyn orc_model::ModelProvider>,
        config: Arc<Config>,
        agent_config: Arc<AgentConfig>,
        depth: Arc<AtomicUsize>,
        parent_abort: orc_tools::AbortSignal,
        tool_event_tx: mpsc::Sender<ToolEvent>,
    ) -> Self {
        Self { model, config, agent_config, depth, parent_abort, tool_event_tx }
    }

    fn build_sub_registry(&self) -> ToolRegistry {
        let todos: Arc<Mutex<Vec<TodoItem>>> = Arc::new(Mutex::new(Vec::new()));
        let mode: Arc<Mutex<AgentMode>> = Arc::new(Mutex::new(AgentMode::Agent));
        let (tx, _rx) = mpsc::channel::<ToolEvent>(64);

        let mut reg = ToolRegistry::new();
        reg.register(ReadFileTool);
        reg.register(ListDirTool);
        reg.register(GlobFileSearchTool);
        reg.register(GrepTool);
        reg.register(SearchCodebaseTool);
        reg.register(ReadLintsTool);
        reg.register(AskQuestionTool::new());
        reg.register(WebFetchTool);
        reg.register(WebSearchTool {
            api_key: self.config.tools.web.search.api_key.clone(),
        });
        reg.register(UpdateMemoryTool {
            memory_file: self.config.tools.memory.memory_file.clone(),
        });
        reg.register(TodoWriteTool::new(todos, tx.clone()));
        reg.register(SwitchModeTool::new(mode, tx.clone()));
        reg.register(WriteTool);
        reg.register(EditFileTool);
        reg.register(DeleteFileTool);
        reg.register(ApplyPatchTool);
        reg.register(RunTerminalCommandTool {
            timeout_secs: self.config.tools.timeout_secs,
        });
        // Note: TaskTool is intentionally NOT registered here to limit nesting
        reg
    }

    async fn emit_lifecycle(&self, call_id: &str, task_label: &str, status: SubAgentStatus) {
        let _ = self
            .tool_event_tx
            .send(ToolEvent::SubAgent(SubAgentLifecycle {
                tool_call_id: call_id.to_string(),
                task_label: task_label.to_string(),
                status,
            }))
            .await;
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str { "assign_task" }

    fn description(&self) -> &str {
        "Delegate a focused task to a nested sub-agent and return its final text output. \
         Useful for isolating a sub-task behind its own context window and tool-call budget. \
         The sub-agent has access to all standard tools. Maximum nesting depth is 3."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent": {
                    "type": "string",
                    "enum": ["research", "plan", "agent"],
                    "description": "Operating mode for the sub-agent (default: agent)"
                },
                "task": {
                    "type": "string",
                    "description": "Short label for the task, used for logging only"
                },
                "description": {
                    "type": "string",
                    "description": "The detailed task description given to the sub-agent as its prompt"
                },
                "max_rounds": {
                    "type": "integer",
                    "description": "Maximum tool-call rounds (default: from config)"
                }
            },
            "required": ["description"]
        })
    }

    fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Ask }

    fn modes(&self) -> &[AgentMode] { &[AgentMode::Agent] }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let prompt = match call.args.get("description").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'description'"),
        };
        let task_label = call.args.get("task").and_then(|v| v.as_str()).unwrap_or("(untitled)");
        let mode_str = call.args.get("agent").and_then(|v| v.as_str()).unwrap_or("agent");
        let mode = match mode_str {
            "research" => AgentMode::Research,
            "plan" => AgentMode::Plan,
            "agent" => AgentMode::Agent,
            other => return ToolOutput::err(&call.id, format!("unknown agent mode: {other}")),
        };

        let current_depth = self.depth.load(Ordering::Relaxed);
        if current_depth >= MAX_DEPTH {
            return ToolOutput::err(
                &call.id,
                format!("maximum sub-agent depth ({MAX_DEPTH}) reached"),
            );
        }

        self.depth.fetch_add(1, Ordering::Relaxed);
        debug!(task = %task_label, mode = %mode, depth = current_depth + 1, "assign_task: spawning sub-agent");

        let mut sub_config = (*self.agent_config).clone();
        if let Some(max_rounds) = call.args.get("max_rounds").and_then(|v| v.as_u64()) {
            sub_config.max_tool_rounds = max_rounds as u32;
        }

        let tools = Arc::new(self.build_sub_registry());
        let mode_lock = Arc::new(Mutex::new(mode));
        let (_sub_tool_tx, sub_tool_rx) = mpsc::channel::<ToolEvent>(64);

        let mut agent = Agent::new(
            self.model.clone(),
            tools,
            Arc::new(sub_config),
            crate::runtime_context::AgentRuntimeContext::default(),
            mode_lock,
            sub_tool_rx,
            128_000,
        );

        // Bridge the parent's abort signal into the oneshot `submit_with_cancel`
        // expects: a watcher task forwards the first trip it observes.
        let mut parent_abort = self.parent_abort.clone();
        let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel();
        let watcher = tokio::spawn(async move {
            parent_abort.aborted().await;
            let _ = cancel_tx.send(());
        });

        let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);

        self.emit_lifecycle(&call.id, task_label, SubAgentStatus::Started).await;

        // Drain concurrently with `submit_with_cancel` so the nested agent's
        // own `tx.send(...).await` calls never block on a full buffer.
        let drain = tokio::spawn(async move {
            let mut output = String::new();
            let mut aborted = false;
            while let Some(event) = rx.recv().await {
                match event {
                    AgentEvent::AssistantChunk(delta) => output.push_str(&delta),
                    AgentEvent::Aborted { partial_text } => {
                        aborted = true;
                        if output.is_empty() {
                            output = partial_text;
                        }
                    }
                    _ => {}
                }
            }
            (output, aborted)
        });

        let submit_result = agent.submit_with_cancel(&prompt, tx, cancel_rx).await;
        let (output, aborted) = drain.await.unwrap_or_default();

        watcher.abort();
        self.depth.fetch_sub(1, Ordering::Relaxed);

        let status = match (&submit_result, aborted) {
            (_, true) => SubAgentStatus::Aborted,
            (Err(e), false) => SubAgentStatus::Error { message: e.to_string() },
            (Ok(_), false) => SubAgentStatus::Finished,
        };
        self.emit_lifecycle(&call.id, task_label, status).await;

        match submit_result {
            _ if aborted => ToolOutput::err(&call.id, "sub-agent cancelled"),
            Ok(_) => {
                if output.is_empty() {
                    ToolOutput::ok(&call.id, "(sub-agent produced no text output)")
                } else {
                    ToolOutput::ok(&call.id, output)
                }
            }
            Err(e) => ToolOutput::err(&call.id, format!("sub-agent error: {e}")),
        }
    }
}
