//! LLM intent fallback.
//!
//! Builds the fixed fallback prompt, validates the returned JSON shape, and
//! produces a normalized operation for the executor. Anything that deviates
//! from the contract is a classified failure, never silently ignored.

use crate::error::{CommandError, CommandResult};
use crate::llm::{ChatClient, ChatMessage};
use crate::ops::Operation;
use serde_json::Value;

/// System prompt enumerating the available operations and their shapes.
pub const INTENT_SYSTEM_PROMPT: &str = r#"You are a task management system that converts natural language queries into structured database operations.
Available operations: search_tasks, create_task, update_task, delete_task, create_project, search_projects, delete_project, update_tasks, list_tables, create_user, search_users, tag_task.

For create_task operation, return parameters in this format:
{
    "operation": "create_task",
    "parameters": {
        "title": "task title",
        "description": "task description (optional)",
        "priority": "high/medium/low",
        "due_date": "YYYY-MM-DD HH:mm:ss" or natural language date,
        "project_id": project id, or a project name to create/reuse (optional),
        "created_by": 1
    },
    "natural_response": "Human readable response"
}

For update_task operation, return parameters in this format:
{
    "operation": "update_task",
    "parameters": {
        "task_id": 123,
        "status": "pending/in_progress/completed (optional)",
        "priority": "high/medium/low (optional)",
        "due_date": "YYYY-MM-DD HH:mm:ss" or natural language date (optional),
        "assigned_to": user_id (optional),
        "project_id": project_id (optional),
        "title": "new title (optional)",
        "description": "new description (optional)"
    },
    "natural_response": "Human readable response"
}

For delete_task operation, return parameters in this format:
{
    "operation": "delete_task",
    "parameters": {
        "task_id": 123, or "delete_all": true to delete every task
    },
    "natural_response": "Human readable response"
}

For create_project operation, return parameters in this format:
{
    "operation": "create_project",
    "parameters": {
        "name": "project name",
        "description": "project description"
    },
    "natural_response": "Human readable response"
}

For search_projects operation, return parameters in this format:
{
    "operation": "search_projects",
    "parameters": {},
    "natural_response": "Here are all projects"
}

For list_tables operation, return parameters in this format:
{
    "operation": "list_tables",
    "parameters": {},
    "natural_response": "Here are all available tables"
}

For search_tasks operation, return parameters in this format:
{
    "operation": "search_tasks",
    "parameters": {
        "status": "pending/in_progress/completed (optional)",
        "priority": "high/medium/low (optional)",
        "search_term": "search term (optional)"
    },
    "natural_response": "Human readable response"
}

For create_user operation, return parameters in this format:
{
    "operation": "create_user",
    "parameters": {
        "username": "username",
        "email": "email@example.com"
    },
    "natural_response": "User has been created successfully"
}

For search_users operation, return parameters in this format:
{
    "operation": "search_users",
    "parameters": {
        "username": "username (optional)",
        "email": "email (optional)"
    },
    "natural_response": "Here are the matching users"
}

For tag_task operation, return parameters in this format:
{
    "operation": "tag_task",
    "parameters": {
        "task_id": 123,
        "tags": ["tag name", ...]
    },
    "natural_response": "Human readable response"
}

IMPORTANT:
1. Your response MUST be a valid JSON object with operation, parameters, and natural_response fields and no other fields
2. The operation field must be one of the available operations
3. The parameters must match the format for the specified operation
4. The natural_response should be a human-readable message describing what was done"#;

/// A validated structured intent.
#[derive(Debug, Clone)]
pub struct StructuredIntent {
    pub operation: Operation,
    pub parameters: Value,
    pub natural_response: String,
}

/// Ask the model to map free text onto an operation.
pub async fn resolve_intent(
    llm: &dyn ChatClient,
    query: &str,
) -> CommandResult<StructuredIntent> {
    let messages = [
        ChatMessage::system(INTENT_SYSTEM_PROMPT),
        ChatMessage::user(query),
    ];

    let content = llm.complete(&messages).await.map_err(CommandError::llm)?;
    tracing::debug!(len = content.len(), "intent reply received");

    parse_intent(&content)
}

/// Validate a fallback reply. The content must be a single JSON object with
/// exactly the keys `operation`, `parameters`, `natural_response`.
pub fn parse_intent(content: &str) -> CommandResult<StructuredIntent> {
    let trimmed = content.trim();
    if !trimmed.starts_with('{') {
        return Err(CommandError::malformed_response(
            "Invalid response format: Response must be a JSON object",
        ));
    }

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| CommandError::malformed_response(format!("Invalid JSON: {}", e)))?;
    let object = value.as_object().ok_or_else(|| {
        CommandError::malformed_response("Invalid response format: Response must be a JSON object")
    })?;

    for key in ["operation", "parameters", "natural_response"] {
        if !object.contains_key(key) {
            return Err(CommandError::malformed_response(format!(
                "Invalid response structure: missing {} field",
                key
            )));
        }
    }
    for key in object.keys() {
        if !matches!(key.as_str(), "operation" | "parameters" | "natural_response") {
            return Err(CommandError::malformed_response(format!(
                "Invalid response structure: unexpected {} field",
                key
            )));
        }
    }

    let operation = object["operation"]
        .as_str()
        .ok_or_else(|| {
            CommandError::malformed_response("Invalid response structure: operation must be a string")
        })?
        .parse::<Operation>()?;

    let parameters = object["parameters"].clone();
    if !parameters.is_object() {
        return Err(CommandError::malformed_response(
            "Invalid response structure: parameters must be an object",
        ));
    }

    let natural_response = object["natural_response"]
        .as_str()
        .ok_or_else(|| {
            CommandError::malformed_response(
                "Invalid response structure: natural_response must be a string",
            )
        })?
        .to_string();

    Ok(StructuredIntent {
        operation,
        parameters,
        natural_response,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn parses_a_valid_intent() {
        let content = r#"{
            "operation": "create_task",
            "parameters": {"title": "Buy milk"},
            "natural_response": "Created the task."
        }"#;

        let intent = parse_intent(content).unwrap();
        assert_eq!(intent.operation, Operation::CreateTask);
        assert_eq!(intent.parameters["title"], "Buy milk");
        assert_eq!(intent.natural_response, "Created the task.");
    }

    #[test]
    fn rejects_non_json_content() {
        let err = parse_intent("I created the task for you!").unwrap_err();
        assert_eq!(err.code, ErrorCode::MalformedResponse);
    }

    #[test]
    fn rejects_missing_keys() {
        let err = parse_intent(r#"{"operation": "search_tasks"}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::MalformedResponse);
        assert!(err.message.contains("parameters"));
    }

    #[test]
    fn rejects_extra_keys() {
        let content = r#"{
            "operation": "search_tasks",
            "parameters": {},
            "natural_response": "ok",
            "confidence": 0.9
        }"#;
        let err = parse_intent(content).unwrap_err();
        assert_eq!(err.code, ErrorCode::MalformedResponse);
    }

    #[test]
    fn rejects_unknown_operation() {
        let content = r#"{
            "operation": "drop_database",
            "parameters": {},
            "natural_response": "ok"
        }"#;
        let err = parse_intent(content).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownOperation);
    }
}
