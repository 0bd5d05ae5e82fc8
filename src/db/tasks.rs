//! Task CRUD, search, and bulk update.

use super::projects::{get_or_create_project_internal, get_project_internal};
use super::users::get_user_internal;
use super::{Database, now, ts_from_sql, ts_to_sql};
use crate::error::CommandError;
use crate::types::{Task, TaskPatch, TaskPriority, TaskSelection, TaskStatus, TaskWithProject};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};

/// Reference to the project a new task belongs to. A textual reference is a
/// project name, resolved by lookup and created when absent.
#[derive(Debug, Clone)]
pub enum ProjectRef {
    Id(i64),
    Name(String),
}

/// Input for creating a task. Omitted status and priority take the store
/// defaults.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_date: Option<DateTime<Utc>>,
    pub project: Option<ProjectRef>,
    pub assigned_to: Option<i64>,
    pub created_by: i64,
}

impl NewTask {
    pub fn new(title: impl Into<String>, created_by: i64) -> Self {
        Self {
            title: title.into(),
            description: None,
            status: None,
            priority: None,
            due_date: None,
            project: None,
            assigned_to: None,
            created_by,
        }
    }
}

/// Filters for task search. All filters are optional and combined with AND;
/// the search term matches title or description, case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub search_term: Option<String>,
}

fn parse_status(idx: usize, s: String) -> rusqlite::Result<TaskStatus> {
    TaskStatus::parse(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid status: {}", s).into(),
        )
    })
}

fn parse_priority(idx: usize, s: String) -> rusqlite::Result<TaskPriority> {
    TaskPriority::parse(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid priority: {}", s).into(),
        )
    })
}

pub(crate) fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let due_date: Option<String> = row.get("due_date")?;
    let due_date = due_date.map(|s| ts_from_sql(5, s)).transpose()?;

    Ok(Task {
        task_id: row.get("task_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: parse_status(3, row.get("status")?)?,
        priority: parse_priority(4, row.get("priority")?)?,
        due_date,
        created_at: ts_from_sql(6, row.get("created_at")?)?,
        project_id: row.get("project_id")?,
        assigned_to: row.get("assigned_to")?,
        created_by: row.get("created_by")?,
    })
}

fn parse_task_with_project_row(row: &Row) -> rusqlite::Result<TaskWithProject> {
    Ok(TaskWithProject {
        task: parse_task_row(row)?,
        project_name: row.get("project_name")?,
    })
}

/// Internal helper to get a task using an existing connection.
pub(crate) fn get_task_internal(conn: &Connection, task_id: i64) -> Result<Option<Task>> {
    let mut stmt = conn.prepare("SELECT * FROM tasks WHERE task_id = ?1")?;

    match stmt.query_row(params![task_id], parse_task_row) {
        Ok(task) => Ok(Some(task)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn require_user(conn: &Connection, user_id: i64) -> Result<()> {
    if get_user_internal(conn, user_id)?.is_none() {
        return Err(CommandError::user_not_found(user_id).into());
    }
    Ok(())
}

/// Insert one task row. The caller owns the transaction.
pub(crate) fn insert_task_internal(conn: &Connection, spec: &NewTask) -> Result<TaskWithProject> {
    let (project_id, project_name) = match &spec.project {
        Some(ProjectRef::Id(id)) => {
            let project = get_project_internal(conn, *id)?
                .ok_or_else(|| CommandError::project_not_found(*id))?;
            (Some(project.project_id), Some(project.name))
        }
        Some(ProjectRef::Name(name)) => {
            let description = format!("Project created for task: {}", spec.title);
            let (project, _created) = get_or_create_project_internal(conn, name, &description)?;
            (Some(project.project_id), Some(project.name))
        }
        None => (None, None),
    };

    if let Some(user_id) = spec.assigned_to {
        require_user(conn, user_id)?;
    }
    require_user(conn, spec.created_by)?;

    let status = spec.status.unwrap_or(TaskStatus::Pending);
    let priority = spec.priority.unwrap_or(TaskPriority::Medium);
    let created_at = now();

    conn.execute(
        "INSERT INTO tasks (
            title, description, status, priority, due_date,
            created_at, project_id, assigned_to, created_by
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            &spec.title,
            &spec.description,
            status.as_str(),
            priority.as_str(),
            spec.due_date.as_ref().map(ts_to_sql),
            ts_to_sql(&created_at),
            project_id,
            spec.assigned_to,
            spec.created_by,
        ],
    )?;

    Ok(TaskWithProject {
        task: Task {
            task_id: conn.last_insert_rowid(),
            title: spec.title.clone(),
            description: spec.description.clone(),
            status,
            priority,
            due_date: spec.due_date,
            created_at,
            project_id,
            assigned_to: spec.assigned_to,
            created_by: spec.created_by,
        },
        project_name,
    })
}

/// Apply a patch to one task. The caller owns the transaction; the task must
/// already exist.
fn apply_patch_internal(conn: &Connection, task: &Task, patch: &TaskPatch) -> Result<Task> {
    let title = patch.title.clone().unwrap_or_else(|| task.title.clone());
    let description = patch
        .description
        .clone()
        .or_else(|| task.description.clone());
    let status = patch.status.unwrap_or(task.status);
    let priority = patch.priority.unwrap_or(task.priority);
    let due_date = patch.due_date.or(task.due_date);
    let project_id = patch.project_id.or(task.project_id);
    let assigned_to = patch.assigned_to.or(task.assigned_to);

    conn.execute(
        "UPDATE tasks SET
            title = ?1, description = ?2, status = ?3, priority = ?4,
            due_date = ?5, project_id = ?6, assigned_to = ?7
         WHERE task_id = ?8",
        params![
            &title,
            &description,
            status.as_str(),
            priority.as_str(),
            due_date.as_ref().map(ts_to_sql),
            project_id,
            assigned_to,
            task.task_id,
        ],
    )?;

    Ok(Task {
        task_id: task.task_id,
        title,
        description,
        status,
        priority,
        due_date,
        created_at: task.created_at,
        project_id,
        assigned_to,
        created_by: task.created_by,
    })
}

/// Validate patch references (assignee, project) before any row is touched.
fn check_patch_refs(conn: &Connection, patch: &TaskPatch) -> Result<()> {
    if let Some(user_id) = patch.assigned_to {
        require_user(conn, user_id)?;
    }
    if let Some(project_id) = patch.project_id
        && get_project_internal(conn, project_id)?.is_none()
    {
        return Err(CommandError::project_not_found(project_id).into());
    }
    Ok(())
}

impl Database {
    /// Create a task, resolving its project reference. A textual project
    /// reference is looked up by name and auto-created when unknown.
    pub fn create_task(&self, spec: &NewTask) -> Result<TaskWithProject> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let created = insert_task_internal(&tx, spec)?;
            tx.commit()?;
            Ok(created)
        })
    }

    /// Get a task by ID.
    pub fn get_task(&self, task_id: i64) -> Result<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, task_id))
    }

    /// Get a task by ID with its project name attached.
    pub fn get_task_with_project(&self, task_id: i64) -> Result<Option<TaskWithProject>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.*, p.name AS project_name
                 FROM tasks t
                 LEFT JOIN projects p ON t.project_id = p.project_id
                 WHERE t.task_id = ?1",
            )?;

            match stmt.query_row(params![task_id], parse_task_with_project_row) {
                Ok(task) => Ok(Some(task)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Search tasks with optional filters, joining project names.
    pub fn search_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskWithProject>> {
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT t.*, p.name AS project_name
                 FROM tasks t
                 LEFT JOIN projects p ON t.project_id = p.project_id",
            );
            let mut conds: Vec<&str> = Vec::new();
            let mut values: Vec<String> = Vec::new();

            if let Some(status) = filter.status {
                conds.push("t.status = ?");
                values.push(status.as_str().to_string());
            }
            if let Some(priority) = filter.priority {
                conds.push("t.priority = ?");
                values.push(priority.as_str().to_string());
            }
            if let Some(ref term) = filter.search_term {
                conds.push("(LOWER(t.title) LIKE ? OR LOWER(t.description) LIKE ?)");
                let pattern = format!("%{}%", term.to_lowercase());
                values.push(pattern.clone());
                values.push(pattern);
            }
            if !conds.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&conds.join(" AND "));
            }
            sql.push_str(" ORDER BY t.task_id");

            let mut stmt = conn.prepare(&sql)?;
            let tasks = stmt
                .query_map(
                    rusqlite::params_from_iter(values.iter()),
                    parse_task_with_project_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(tasks)
        })
    }

    /// Update a single task. Missing ID is an error; only fields present in
    /// the patch change.
    pub fn update_task(&self, task_id: i64, patch: &TaskPatch) -> Result<Task> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let task = get_task_internal(&tx, task_id)?
                .ok_or_else(|| CommandError::task_not_found(task_id))?;
            check_patch_refs(&tx, patch)?;
            let updated = apply_patch_internal(&tx, &task, patch)?;
            tx.commit()?;
            Ok(updated)
        })
    }

    /// Apply one patch to a set of tasks in a single transaction. An empty
    /// ID set, or a set matching no rows, is an error.
    pub fn update_tasks(&self, task_ids: &[i64], patch: &TaskPatch) -> Result<Vec<Task>> {
        if task_ids.is_empty() {
            return Err(CommandError::missing_field("task_ids").into());
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let mut tasks = Vec::new();
            for &id in task_ids {
                if let Some(task) = get_task_internal(&tx, id)? {
                    tasks.push(task);
                }
            }
            if tasks.is_empty() {
                return Err(CommandError::new(
                    crate::error::ErrorCode::TaskNotFound,
                    format!("No tasks found with IDs {:?}", task_ids),
                )
                .into());
            }

            check_patch_refs(&tx, patch)?;

            let mut updated = Vec::new();
            for task in &tasks {
                updated.push(apply_patch_internal(&tx, task, patch)?);
            }

            tx.commit()?;
            Ok(updated)
        })
    }

    /// Persist a generated batch in one transaction, optionally attaching
    /// every task to a named project (created when absent). Nothing is
    /// written if any row fails.
    pub fn import_generated_tasks(
        &self,
        tasks: &[crate::types::GeneratedTask],
        project_name: Option<&str>,
        created_by: i64,
    ) -> Result<(Vec<TaskWithProject>, Option<crate::types::Project>)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let project = match project_name {
                Some(name) => {
                    let description = format!("Project created for tasks: {}", name);
                    let (project, _created) =
                        get_or_create_project_internal(&tx, name, &description)?;
                    Some(project)
                }
                None => None,
            };

            let mut created = Vec::new();
            for task in tasks {
                let mut spec = NewTask::new(task.title.clone(), created_by);
                spec.description = Some(task.description.clone());
                spec.priority = Some(task.priority);
                spec.project = project.as_ref().map(|p| ProjectRef::Id(p.project_id));
                created.push(insert_task_internal(&tx, &spec)?);
            }

            tx.commit()?;
            Ok((created, project))
        })
    }

    /// Delete a single task by ID. Missing ID is an error and leaves the
    /// store unchanged.
    pub fn delete_task(&self, task_id: i64) -> Result<i64> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let count = tx.execute("DELETE FROM tasks WHERE task_id = ?1", params![task_id])?;
            if count == 0 {
                return Err(CommandError::task_not_found(task_id).into());
            }
            tx.commit()?;
            Ok(task_id)
        })
    }

    /// Delete every task. Returns the number of rows removed.
    pub fn delete_all_tasks(&self) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let count = tx.execute("DELETE FROM tasks", [])?;
            tx.commit()?;
            Ok(count)
        })
    }

    /// Resolve a bulk-update selection to concrete task IDs.
    pub fn select_task_ids(&self, selection: TaskSelection) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let (sql, bounds): (&str, Vec<i64>) = match selection {
                TaskSelection::All => ("SELECT task_id FROM tasks ORDER BY task_id", vec![]),
                TaskSelection::GreaterThan(min) => (
                    "SELECT task_id FROM tasks WHERE task_id > ?1 ORDER BY task_id",
                    vec![min],
                ),
                TaskSelection::LessThan(max) => (
                    "SELECT task_id FROM tasks WHERE task_id < ?1 ORDER BY task_id",
                    vec![max],
                ),
                TaskSelection::Between(min, max) => (
                    "SELECT task_id FROM tasks WHERE task_id BETWEEN ?1 AND ?2 ORDER BY task_id",
                    vec![min, max],
                ),
            };

            let mut stmt = conn.prepare(sql)?;
            let ids = stmt
                .query_map(rusqlite::params_from_iter(bounds.iter()), |row| row.get(0))?
                .collect::<Result<Vec<i64>, _>>()?;

            Ok(ids)
        })
    }

    /// Total number of task rows.
    pub fn count_tasks(&self) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
            Ok(count)
        })
    }
}
