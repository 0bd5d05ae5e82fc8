//! Rule-based command classification.
//!
//! An ordered list of matcher/extractor pairs recognizes the high-confidence
//! command families before anything reaches the language model. First match
//! wins; a matched command that fails parameter extraction is an error, not a
//! fallthrough.

use crate::error::{CommandError, CommandResult, ErrorCode};
use crate::types::{TaskPriority, TaskSelection, TaskStatus};

/// The single update dimension of a bulk command.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkChange {
    Project(i64),
    Status(TaskStatus),
    Priority(TaskPriority),
    AssigneeId(i64),
    AssigneeName(String),
}

/// A recognized command family with its extracted parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BulkUpdate {
        selection: TaskSelection,
        change: BulkChange,
    },
    ListSchema,
    DeleteAllProjects,
    DeleteProjects(Vec<i64>),
    DeleteAllTasks,
    Generate,
    Import {
        project: Option<String>,
    },
}

/// Phrases that route a request to task generation.
const GENERATION_MARKERS: &[&str] = &[
    "how to",
    "what are the steps",
    "what do i need to do",
    "what are the",
    "list the tasks",
    "create a plan",
    "break down",
    "what are",
    "show me how to",
    "guide me through",
    "walk me through",
];

/// Phrases that route a request to importing the pending batch.
const IMPORT_MARKERS: &[&str] = &[
    "add these tasks",
    "import those tasks",
    "save these tasks",
    "create these tasks",
    "add all of these",
    "import all tasks",
    "save all tasks",
    "add these to tasks",
    "add all to tasks",
    "import all",
    "save all",
    "add all",
];

type Matcher = fn(&str) -> Option<CommandResult<Command>>;

/// Priority order is load-bearing: destructive and bulk commands are checked
/// before the creative families so they never depend on model output.
const MATCHERS: &[Matcher] = &[
    bulk_update,
    schema_listing,
    delete_all_projects,
    delete_specific_projects,
    delete_all_tasks,
    task_generation,
    task_import,
];

/// Classify a command. `Ok(None)` means no rule matched and the text should
/// go to the model fallback.
pub fn classify(query: &str) -> CommandResult<Option<Command>> {
    let q = query.trim().to_lowercase();
    for matcher in MATCHERS {
        if let Some(result) = matcher(&q) {
            return result.map(Some);
        }
    }
    Ok(None)
}

fn after<'a>(q: &'a str, marker: &str) -> Option<&'a str> {
    q.split_once(marker).map(|(_, rest)| rest)
}

fn first_token(text: &str) -> Option<&str> {
    text.split_whitespace().next()
}

fn parse_id(text: &str, field: &str) -> CommandResult<i64> {
    let token = first_token(text)
        .ok_or_else(|| CommandError::missing_field(field))?;
    token
        .parse()
        .map_err(|_| CommandError::invalid_value(field, format!("Invalid {}: {}", field, token)))
}

fn bulk_update(q: &str) -> Option<CommandResult<Command>> {
    let whole_table = q.starts_with("set all tasks") || q.starts_with("assign all tasks");
    if !whole_table && !q.starts_with("for tasks") {
        return None;
    }
    Some(parse_bulk_update(q, whole_table))
}

fn parse_bulk_update(q: &str, whole_table: bool) -> CommandResult<Command> {
    let selection = if whole_table {
        TaskSelection::All
    } else if let Some(rest) = after(q, "greater than") {
        TaskSelection::GreaterThan(parse_id(rest, "task ID")?)
    } else if let Some(rest) = after(q, "less than") {
        TaskSelection::LessThan(parse_id(rest, "task ID")?)
    } else if let Some(rest) = after(q, "between") {
        let (low, high) = rest.split_once("and").ok_or_else(|| {
            CommandError::invalid_value("selection", "Expected 'between N and M'")
        })?;
        TaskSelection::Between(parse_id(low, "task ID")?, parse_id(high, "task ID")?)
    } else {
        return Err(CommandError::invalid_value(
            "selection",
            "No task selection recognized. Use 'greater than N', 'less than N', \
             or 'between N and M'",
        ));
    };

    let change = parse_bulk_change(q)?;
    Ok(Command::BulkUpdate { selection, change })
}

/// Extract the single update dimension, in the same precedence order the
/// selection phrases use.
fn parse_bulk_change(q: &str) -> CommandResult<BulkChange> {
    if let Some(rest) = after(q, "to project").or_else(|| after(q, "set project to")) {
        let token = first_token(rest)
            .ok_or_else(|| CommandError::missing_field("project_id"))?;
        let id = token.parse().map_err(|_| {
            CommandError::invalid_value("project_id", format!("Invalid project ID: {}", token))
        })?;
        return Ok(BulkChange::Project(id));
    }

    if let Some(rest) = after(q, "set status to") {
        let token = first_token(rest)
            .ok_or_else(|| CommandError::missing_field("status"))?;
        let status = TaskStatus::parse(token).ok_or_else(|| {
            CommandError::invalid_value(
                "status",
                format!(
                    "Invalid status: {}. Must be one of: {}",
                    token,
                    TaskStatus::VALUES
                ),
            )
        })?;
        return Ok(BulkChange::Status(status));
    }

    if let Some(rest) = after(q, "set priority to") {
        let token = first_token(rest)
            .ok_or_else(|| CommandError::missing_field("priority"))?;
        let priority = TaskPriority::parse(token).ok_or_else(|| {
            CommandError::invalid_value(
                "priority",
                format!(
                    "Invalid priority: {}. Must be one of: {}",
                    token,
                    TaskPriority::VALUES
                ),
            )
        })?;
        return Ok(BulkChange::Priority(priority));
    }

    if q.contains("assign") {
        if let Some(rest) = after(q, "to user") {
            let token = first_token(rest)
                .ok_or_else(|| CommandError::missing_field("user_id"))?;
            let id = token.parse().map_err(|_| {
                CommandError::invalid_value("user_id", format!("Invalid user ID: {}", token))
            })?;
            return Ok(BulkChange::AssigneeId(id));
        }
        if let Some(idx) = q.rfind(" to ") {
            let username = q[idx + 4..].trim();
            if !username.is_empty() {
                return Ok(BulkChange::AssigneeName(username.to_string()));
            }
        }
    }

    Err(CommandError::new(
        ErrorCode::MissingRequiredField,
        "No valid update parameters provided",
    ))
}

fn schema_listing(q: &str) -> Option<CommandResult<Command>> {
    matches!(q, "show tables" | "show all tables" | "show schema")
        .then(|| Ok(Command::ListSchema))
}

fn delete_all_projects(q: &str) -> Option<CommandResult<Command>> {
    matches!(q, "delete all projects" | "delete all project")
        .then(|| Ok(Command::DeleteAllProjects))
}

fn delete_specific_projects(q: &str) -> Option<CommandResult<Command>> {
    let rest = q.strip_prefix("delete project")?;
    let rest = rest.strip_prefix('s').unwrap_or(rest);

    let ids: Vec<i64> = rest
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty() && t.chars().all(|c| c.is_ascii_digit()))
        .filter_map(|t| t.parse().ok())
        .collect();

    if ids.is_empty() {
        return Some(Err(CommandError::invalid_value(
            "project_ids",
            "No valid project IDs provided",
        )));
    }
    Some(Ok(Command::DeleteProjects(ids)))
}

fn delete_all_tasks(q: &str) -> Option<CommandResult<Command>> {
    (q == "delete all tasks").then(|| Ok(Command::DeleteAllTasks))
}

fn task_generation(q: &str) -> Option<CommandResult<Command>> {
    GENERATION_MARKERS
        .iter()
        .any(|m| q.contains(m))
        .then(|| Ok(Command::Generate))
}

fn task_import(q: &str) -> Option<CommandResult<Command>> {
    if !IMPORT_MARKERS.iter().any(|m| q.contains(m)) {
        return None;
    }

    let project = after(q, "to project")
        .map(|rest| rest.trim().trim_matches(['\'', '"']).to_string())
        .filter(|name| !name.is_empty());

    Some(Ok(Command::Import { project }))
}
