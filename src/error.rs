//! Structured error types for command results.

use serde::Serialize;
use std::fmt;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors
    MissingRequiredField,
    InvalidFieldValue,
    UnknownField,
    UnknownOperation,
    MalformedResponse,

    // Not found errors
    TaskNotFound,
    ProjectNotFound,
    UserNotFound,
    NoPendingTasks,

    // Conflict errors
    AlreadyExists,

    // External service errors
    LlmError,
    Timeout,

    // Date resolution
    DateParseError,

    // Internal errors
    DatabaseError,
    InternalError,
}

impl ErrorCode {
    /// Errors outside the taxonomy that indicate a handling gap rather than
    /// bad input. The processor logs these at a higher severity.
    pub fn is_unexpected(self) -> bool {
        matches!(self, ErrorCode::DatabaseError | ErrorCode::InternalError)
    }
}

/// Structured error carried through command processing.
#[derive(Debug, Serialize)]
pub struct CommandError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl CommandError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
            details: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    // Convenience constructors

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("{} is required", field),
        )
        .with_field(field)
    }

    pub fn invalid_value(field: &str, reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidFieldValue, reason).with_field(field)
    }

    pub fn unknown_field(field: &str) -> Self {
        Self::new(ErrorCode::UnknownField, format!("Unknown field: {}", field))
            .with_field(field)
    }

    pub fn unknown_operation(name: &str) -> Self {
        Self::new(
            ErrorCode::UnknownOperation,
            format!("Unknown operation: {}", name),
        )
    }

    pub fn malformed_response(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::MalformedResponse, reason)
    }

    pub fn task_not_found(task_id: i64) -> Self {
        Self::new(
            ErrorCode::TaskNotFound,
            format!("Task with ID {} not found", task_id),
        )
    }

    pub fn project_not_found(project_id: i64) -> Self {
        Self::new(
            ErrorCode::ProjectNotFound,
            format!("Project with ID {} not found", project_id),
        )
    }

    pub fn user_not_found(user_id: i64) -> Self {
        Self::new(
            ErrorCode::UserNotFound,
            format!("User with ID {} not found", user_id),
        )
    }

    pub fn username_not_found(username: &str) -> Self {
        Self::new(
            ErrorCode::UserNotFound,
            format!("User '{}' not found", username),
        )
    }

    pub fn no_pending_tasks() -> Self {
        Self::new(
            ErrorCode::NoPendingTasks,
            "No tasks found to import. Please generate tasks first.",
        )
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AlreadyExists, message)
    }

    pub fn llm(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::LlmError, format!("Language model error: {}", err))
    }

    pub fn timeout(what: &str) -> Self {
        Self::new(ErrorCode::Timeout, format!("{} timed out", what))
    }

    pub fn date_parse(phrase: &str) -> Self {
        Self::new(
            ErrorCode::DateParseError,
            format!("Could not parse date: {}", phrase),
        )
    }

    pub fn database(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::DatabaseError, err.to_string())
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, err.to_string())
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CommandError {}

// Allow using ? with anyhow errors by converting them
impl From<anyhow::Error> for CommandError {
    fn from(err: anyhow::Error) -> Self {
        // Preserve structured errors raised inside the db layer
        match err.downcast::<CommandError>() {
            Ok(cmd_err) => cmd_err,
            Err(err) => match err.downcast::<rusqlite::Error>() {
                Ok(sql_err) => CommandError::database(sql_err),
                Err(err) => CommandError::internal(err),
            },
        }
    }
}

/// Result type for command processing.
pub type CommandResult<T> = std::result::Result<T, CommandError>;
