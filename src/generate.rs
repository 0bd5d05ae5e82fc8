//! Task generation and import sub-flow.
//!
//! Two states: idle, and holding one proposed batch awaiting an import
//! command. Each generation overwrites the batch; the retention policy
//! decides whether a successful import empties it.

use crate::config::ImportRetention;
use crate::db::Database;
use crate::error::{CommandError, CommandResult};
use crate::llm::{ChatClient, ChatMessage};
use crate::types::{GeneratedTask, QueryResponse, TaskPriority};
use serde_json::{Value, json};

/// The system prompt for the generation step. The reply must be a bare JSON
/// object holding a tasks array.
const GENERATION_SYSTEM_PROMPT: &str = r#"You are a helpful task generation assistant that creates structured task lists from user queries.
When users ask for help or guidance, analyze their request and break it down into clear, actionable tasks.

Consider the following when generating tasks:
1. Break down complex activities into smaller, manageable tasks
2. Include both high-level and detailed tasks when appropriate
3. Assign priorities based on task importance and dependencies
4. Provide clear, actionable descriptions
5. Consider the logical order of tasks

You MUST format your response EXACTLY as a JSON object with the following structure:
{
    "tasks": [
        {
            "title": "Clear, concise task title",
            "description": "Detailed explanation of what needs to be done and why",
            "priority": "high|medium|low",
            "estimated_duration": "in minutes"
        }
    ]
}

Priority Guidelines:
- high: Critical tasks that block other tasks or are time-sensitive
- medium: Important tasks that contribute to the goal but aren't blocking
- low: Nice-to-have tasks or optional enhancements

IMPORTANT:
1. Your response MUST be ONLY the JSON object, with no additional text
2. Make task titles clear and actionable
3. Provide detailed descriptions that explain both what to do and why
4. Keep the number of tasks manageable (typically 5-10 tasks)
5. Ensure all JSON fields are properly formatted strings
6. For queries asking for advice or steps, convert them into actionable tasks
7. For queries like 'what are the top things to do', create tasks for each item"#;

const GENERATION_REMINDER: &str = "Remember to format your response as a JSON object containing \
     a tasks array, even for general queries like 'what are the top things to do'.";

/// The most recently proposed batch, not yet persisted.
#[derive(Debug, Clone)]
pub struct PendingImport {
    pub tasks: Vec<GeneratedTask>,
    /// The assistant reply the batch was parsed from.
    pub raw: String,
}

/// Per-session conversation state. One slot, last writer wins; owned by the
/// connection handler and passed in explicitly so sessions cannot leak into
/// each other.
#[derive(Debug, Default)]
pub struct SessionState {
    pending: Option<PendingImport>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Option<&PendingImport> {
        self.pending.as_ref()
    }

    /// Explicit conversation reset from the caller.
    pub fn reset(&mut self) {
        self.pending = None;
    }
}

/// The generation/import flow with its retention policy.
pub struct GenerationFlow {
    retention: ImportRetention,
}

impl GenerationFlow {
    pub fn new(retention: ImportRetention) -> Self {
        Self { retention }
    }

    /// Generation step: ask the model for a task batch and hold it for a
    /// later import. Overwrites any prior batch.
    pub async fn generate(
        &self,
        llm: &dyn ChatClient,
        query: &str,
        state: &mut SessionState,
    ) -> CommandResult<QueryResponse> {
        let messages = [
            ChatMessage::system(GENERATION_SYSTEM_PROMPT),
            ChatMessage::system(GENERATION_REMINDER),
            ChatMessage::user(query),
        ];

        let content = llm
            .complete(&messages)
            .await
            .map_err(CommandError::llm)?;
        tracing::debug!(len = content.len(), "generation reply received");

        let tasks = parse_generated_tasks(&content)?;
        let count = tasks.len();

        state.pending = Some(PendingImport {
            tasks: tasks.clone(),
            raw: content,
        });

        Ok(QueryResponse::ok(
            format!(
                "Generated {} tasks successfully. You can now add these tasks to your project.",
                count
            ),
            json!({ "tasks": tasks }),
        ))
    }

    /// Import step: persist the held batch, optionally under a named project.
    pub fn import(
        &self,
        db: &Database,
        state: &mut SessionState,
        project_name: Option<&str>,
        created_by: i64,
    ) -> CommandResult<QueryResponse> {
        let pending = state.pending.as_ref().ok_or_else(CommandError::no_pending_tasks)?;

        let (created, project) =
            db.import_generated_tasks(&pending.tasks, project_name, created_by)?;

        if self.retention == ImportRetention::Clear {
            state.pending = None;
        }

        let mut message = format!("Successfully imported {} tasks", created.len());
        if let Some(ref project) = project {
            message.push_str(&format!(" to project '{}'", project.name));
        }
        message.push_str(". You can now view, edit, or manage these tasks.");

        let project_data = project
            .map(|p| json!({ "id": p.project_id, "name": p.name }))
            .unwrap_or(Value::Null);

        Ok(QueryResponse::ok(
            message,
            json!({ "tasks": created, "project": project_data }),
        ))
    }
}

/// Validate a generation reply into a task batch. Shape violations fail the
/// whole batch; an out-of-range priority is coerced to medium.
pub fn parse_generated_tasks(content: &str) -> CommandResult<Vec<GeneratedTask>> {
    let trimmed = content.trim();
    if !trimmed.starts_with('{') {
        return Err(CommandError::malformed_response(
            "Response is not a valid JSON object",
        ));
    }

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| CommandError::malformed_response(format!("Invalid JSON: {}", e)))?;

    let items = value
        .get("tasks")
        .and_then(Value::as_array)
        .ok_or_else(|| CommandError::malformed_response("Missing tasks array"))?;
    if items.is_empty() {
        return Err(CommandError::malformed_response("Empty tasks array"));
    }

    let mut tasks = Vec::with_capacity(items.len());
    for item in items {
        let title = item.get("title").and_then(Value::as_str);
        let description = item.get("description").and_then(Value::as_str);
        let priority = item.get("priority").and_then(Value::as_str);

        let (Some(title), Some(description), Some(priority)) = (title, description, priority)
        else {
            return Err(CommandError::malformed_response(
                "Invalid task structure: missing required fields",
            ));
        };

        let estimated_duration = match item.get("estimated_duration") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        tasks.push(GeneratedTask {
            title: title.to_string(),
            description: description.to_string(),
            priority: TaskPriority::coerce(priority),
            estimated_duration,
        });
    }

    Ok(tasks)
}
