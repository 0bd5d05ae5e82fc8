//! Operation execution.
//!
//! Maps a normalized `{operation, parameters}` pair onto the store. Every
//! mutating operation runs inside its own transaction in the db layer, so a
//! failure leaves no partial writes.

use crate::dates;
use crate::db::Database;
use crate::db::tasks::{NewTask, ProjectRef, TaskFilter};
use crate::error::{CommandError, CommandResult};
use crate::types::{TaskPatch, TaskPriority, TaskStatus};
use serde_json::{Value, json};
use std::str::FromStr;

/// The operations a structured intent may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SearchTasks,
    CreateTask,
    UpdateTask,
    DeleteTask,
    CreateProject,
    SearchProjects,
    DeleteProject,
    UpdateTasks,
    ListTables,
    CreateUser,
    SearchUsers,
    TagTask,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::SearchTasks => "search_tasks",
            Operation::CreateTask => "create_task",
            Operation::UpdateTask => "update_task",
            Operation::DeleteTask => "delete_task",
            Operation::CreateProject => "create_project",
            Operation::SearchProjects => "search_projects",
            Operation::DeleteProject => "delete_project",
            Operation::UpdateTasks => "update_tasks",
            Operation::ListTables => "list_tables",
            Operation::CreateUser => "create_user",
            Operation::SearchUsers => "search_users",
            Operation::TagTask => "tag_task",
        }
    }
}

impl FromStr for Operation {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "search_tasks" => Ok(Operation::SearchTasks),
            "create_task" => Ok(Operation::CreateTask),
            "update_task" => Ok(Operation::UpdateTask),
            "delete_task" => Ok(Operation::DeleteTask),
            "create_project" => Ok(Operation::CreateProject),
            "search_projects" => Ok(Operation::SearchProjects),
            "delete_project" => Ok(Operation::DeleteProject),
            "update_tasks" => Ok(Operation::UpdateTasks),
            "list_tables" => Ok(Operation::ListTables),
            "create_user" => Ok(Operation::CreateUser),
            "search_users" => Ok(Operation::SearchUsers),
            "tag_task" => Ok(Operation::TagTask),
            _ => Err(CommandError::unknown_operation(s)),
        }
    }
}

// Parameter helpers. Models are loose about numeric types, so IDs accept
// either a JSON number or a numeric string.

fn get_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

fn get_bool(params: &Value, key: &str) -> Option<bool> {
    params.get(key).and_then(Value::as_bool)
}

fn get_id(params: &Value, key: &str) -> CommandResult<Option<i64>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Ok(Some(id_from_value(value, key)?)),
    }
}

fn id_from_value(value: &Value, key: &str) -> CommandResult<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| CommandError::invalid_value(key, format!("Invalid {}: {}", key, n))),
        Value::String(s) => s
            .parse()
            .map_err(|_| CommandError::invalid_value(key, format!("Invalid {}: {}", key, s))),
        other => Err(CommandError::invalid_value(
            key,
            format!("Invalid {}: {}", key, other),
        )),
    }
}

fn require_str<'a>(params: &'a Value, key: &str) -> CommandResult<&'a str> {
    get_str(params, key).ok_or_else(|| CommandError::missing_field(key))
}

fn parse_status_param(s: &str) -> CommandResult<TaskStatus> {
    TaskStatus::parse(s).ok_or_else(|| {
        CommandError::invalid_value(
            "status",
            format!("Invalid status: {}. Must be one of: {}", s, TaskStatus::VALUES),
        )
    })
}

fn parse_priority_param(s: &str) -> CommandResult<TaskPriority> {
    TaskPriority::parse(s).ok_or_else(|| {
        CommandError::invalid_value(
            "priority",
            format!(
                "Invalid priority: {}. Must be one of: {}",
                s, TaskPriority::VALUES
            ),
        )
    })
}

/// Reject parameter names outside the operation's whitelist.
fn check_fields(params: &Value, allowed: &[&str]) -> CommandResult<()> {
    let Some(object) = params.as_object() else {
        return Err(CommandError::invalid_value(
            "parameters",
            "parameters must be a JSON object",
        ));
    };
    for key in object.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(CommandError::unknown_field(key));
        }
    }
    Ok(())
}

/// Decode the patch fields shared by single and bulk task updates.
fn decode_patch(params: &Value) -> CommandResult<TaskPatch> {
    let mut patch = TaskPatch {
        title: get_str(params, "title").map(String::from),
        description: get_str(params, "description").map(String::from),
        ..Default::default()
    };

    if let Some(s) = get_str(params, "status") {
        patch.status = Some(parse_status_param(s)?);
    }
    if let Some(s) = get_str(params, "priority") {
        patch.priority = Some(parse_priority_param(s)?);
    }
    if let Some(s) = get_str(params, "due_date") {
        patch.due_date = Some(dates::resolve(s)?);
    }
    patch.project_id = get_id(params, "project_id")?;
    patch.assigned_to = get_id(params, "assigned_to")?;

    Ok(patch)
}

/// Executes normalized operations against the store.
pub struct OperationExecutor {
    db: Database,
    default_user: i64,
}

impl OperationExecutor {
    pub fn new(db: Database, default_user: i64) -> Self {
        Self { db, default_user }
    }

    /// Run one operation. Returns the `data` payload of the response.
    pub fn execute(&self, operation: Operation, params: &Value) -> CommandResult<Value> {
        tracing::debug!(operation = operation.as_str(), "executing operation");
        match operation {
            Operation::SearchTasks => self.search_tasks(params),
            Operation::CreateTask => self.create_task(params),
            Operation::UpdateTask => self.update_task(params),
            Operation::DeleteTask => self.delete_task(params),
            Operation::CreateProject => self.create_project(params),
            Operation::SearchProjects => self.search_projects(),
            Operation::DeleteProject => self.delete_project(params),
            Operation::UpdateTasks => self.update_tasks(params),
            Operation::ListTables => self.list_tables(),
            Operation::CreateUser => self.create_user(params),
            Operation::SearchUsers => self.search_users(params),
            Operation::TagTask => self.tag_task(params),
        }
    }

    fn search_tasks(&self, params: &Value) -> CommandResult<Value> {
        check_fields(params, &["status", "priority", "search_term"])?;

        let mut filter = TaskFilter {
            search_term: get_str(params, "search_term").map(String::from),
            ..Default::default()
        };
        if let Some(s) = get_str(params, "status") {
            filter.status = Some(parse_status_param(s)?);
        }
        if let Some(s) = get_str(params, "priority") {
            filter.priority = Some(parse_priority_param(s)?);
        }

        let tasks = self.db.search_tasks(&filter)?;
        Ok(json!({ "tasks": tasks }))
    }

    fn create_task(&self, params: &Value) -> CommandResult<Value> {
        check_fields(
            params,
            &[
                "title",
                "description",
                "status",
                "priority",
                "due_date",
                "project_id",
                "assigned_to",
                "created_by",
            ],
        )?;

        let title = require_str(params, "title")?;
        let mut spec = NewTask::new(
            title,
            get_id(params, "created_by")?.unwrap_or(self.default_user),
        );
        spec.description = get_str(params, "description").map(String::from);
        if let Some(s) = get_str(params, "status") {
            spec.status = Some(parse_status_param(s)?);
        }
        if let Some(s) = get_str(params, "priority") {
            spec.priority = Some(parse_priority_param(s)?);
        }
        if let Some(s) = get_str(params, "due_date") {
            spec.due_date = Some(dates::resolve(s)?);
        }
        spec.assigned_to = get_id(params, "assigned_to")?;

        // A textual project reference is a name; a numeric one is an id.
        spec.project = match params.get("project_id") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => Some(ProjectRef::Id(id_from_value(
                &Value::Number(n.clone()),
                "project_id",
            )?)),
            Some(Value::String(s)) => match s.parse::<i64>() {
                Ok(id) => Some(ProjectRef::Id(id)),
                Err(_) => Some(ProjectRef::Name(s.clone())),
            },
            Some(other) => {
                return Err(CommandError::invalid_value(
                    "project_id",
                    format!("Invalid project_id: {}", other),
                ));
            }
        };

        let created = self.db.create_task(&spec)?;
        serde_json::to_value(created).map_err(|e| CommandError::internal(e))
    }

    fn update_task(&self, params: &Value) -> CommandResult<Value> {
        check_fields(
            params,
            &[
                "task_id",
                "title",
                "description",
                "status",
                "priority",
                "due_date",
                "project_id",
                "assigned_to",
            ],
        )?;

        let task_id =
            get_id(params, "task_id")?.ok_or_else(|| CommandError::missing_field("task_id"))?;
        let patch = decode_patch(params)?;

        let updated = self.db.update_task(task_id, &patch)?;
        serde_json::to_value(updated).map_err(|e| CommandError::internal(e))
    }

    fn update_tasks(&self, params: &Value) -> CommandResult<Value> {
        check_fields(
            params,
            &[
                "task_ids",
                "title",
                "description",
                "status",
                "priority",
                "due_date",
                "project_id",
                "assigned_to",
            ],
        )?;

        let ids = params
            .get("task_ids")
            .and_then(Value::as_array)
            .ok_or_else(|| CommandError::missing_field("task_ids"))?;
        let task_ids = ids
            .iter()
            .map(|v| id_from_value(v, "task_ids"))
            .collect::<CommandResult<Vec<i64>>>()?;

        let patch = decode_patch(params)?;
        let updated = self.db.update_tasks(&task_ids, &patch)?;
        Ok(json!({ "updated_tasks": updated }))
    }

    fn delete_task(&self, params: &Value) -> CommandResult<Value> {
        check_fields(params, &["delete_all", "task_id"])?;

        if get_bool(params, "delete_all").unwrap_or(false) {
            let count = self.db.delete_all_tasks()?;
            return Ok(json!({ "deleted_tasks": count }));
        }

        let task_id =
            get_id(params, "task_id")?.ok_or_else(|| CommandError::missing_field("task_id"))?;
        let deleted = self.db.delete_task(task_id)?;
        Ok(json!({ "deleted_task_id": deleted }))
    }

    fn create_project(&self, params: &Value) -> CommandResult<Value> {
        check_fields(params, &["name", "description"])?;

        let name = require_str(params, "name")?;
        let description = get_str(params, "description");
        let project = self.db.create_project(name, description)?;
        serde_json::to_value(project).map_err(|e| CommandError::internal(e))
    }

    fn search_projects(&self) -> CommandResult<Value> {
        let projects = self.db.list_projects()?;
        Ok(json!({ "projects": projects }))
    }

    fn delete_project(&self, params: &Value) -> CommandResult<Value> {
        check_fields(params, &["delete_all", "project_id", "project_ids"])?;

        if get_bool(params, "delete_all").unwrap_or(false) {
            let count = self.db.delete_all_projects()?;
            return Ok(json!({ "deleted_projects": count }));
        }

        if let Some(ids) = params.get("project_ids").and_then(Value::as_array) {
            let project_ids = ids
                .iter()
                .map(|v| id_from_value(v, "project_ids"))
                .collect::<CommandResult<Vec<i64>>>()?;
            if project_ids.is_empty() {
                return Err(CommandError::missing_field("project_ids"));
            }
            let (deleted, skipped) = self.db.delete_projects(&project_ids)?;
            return Ok(json!({
                "deleted_projects": deleted.len(),
                "deleted_ids": deleted,
                "skipped_ids": skipped,
            }));
        }

        let project_id = get_id(params, "project_id")?
            .ok_or_else(|| CommandError::missing_field("project_id"))?;
        let deleted = self.db.delete_project(project_id)?;
        Ok(json!({ "deleted_project_id": deleted }))
    }

    fn list_tables(&self) -> CommandResult<Value> {
        let tables = self.db.list_tables()?;
        Ok(json!({ "tables": tables }))
    }

    fn create_user(&self, params: &Value) -> CommandResult<Value> {
        check_fields(params, &["username", "email"])?;

        let username = require_str(params, "username")?;
        let email = require_str(params, "email")?;
        let user = self.db.create_user(username, email)?;
        serde_json::to_value(user).map_err(|e| CommandError::internal(e))
    }

    fn search_users(&self, params: &Value) -> CommandResult<Value> {
        check_fields(params, &["username", "email"])?;

        let users = self
            .db
            .search_users(get_str(params, "username"), get_str(params, "email"))?;
        Ok(json!({ "users": users }))
    }

    fn tag_task(&self, params: &Value) -> CommandResult<Value> {
        check_fields(params, &["task_id", "tags", "created_by"])?;

        let task_id =
            get_id(params, "task_id")?.ok_or_else(|| CommandError::missing_field("task_id"))?;
        let tags: Vec<String> = params
            .get("tags")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .ok_or_else(|| CommandError::missing_field("tags"))?;
        if tags.is_empty() {
            return Err(CommandError::missing_field("tags"));
        }

        let created_by = get_id(params, "created_by")?.unwrap_or(self.default_user);
        let attached = self.db.tag_task(task_id, &tags, created_by)?;
        Ok(json!({ "task_id": task_id, "tags": attached }))
    }
}
