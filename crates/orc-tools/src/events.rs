use orc_config::AgentMode;

/// A structured todo item managed by the todo_write tool.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    /// One of: "pending", "in_progress", "completed", "cancelled"
    pub status: String,
}

/// Events emitted by tools to communicate state changes back to the agent loop.
/// The agent translates these into `AgentEvent` variants for the UI.
#[derive(Debug)]
pub enum ToolEvent {
    TodoUpdate(Vec<TodoItem>),
    ModeChanged(AgentMode),
    SubAgent(SubAgentLifecycle),
}

/// Tags a sub-agent's lifecycle update with the `assign_task` call that
/// spawned it, so the parent event bus can attribute it correctly even when
/// several sub-agents are delegated in the same round.
#[derive(Debug, Clone)]
pub struct SubAgentLifecycle {
    pub tool_call_id: String,
    pub task_label: String,
    pub status: SubAgentStatus,
}

#[derive(Debug, Clone)]
pub enum SubAgentStatus {
    Started,
    Finished,
    Aborted,
    Error { message: String },
}
