//! Project CRUD and name resolution.

use super::{Database, now, ts_from_sql, ts_to_sql};
use crate::error::CommandError;
use crate::types::Project;
use anyhow::Result;
use rusqlite::{Connection, Row, params};

fn parse_project_row(row: &Row) -> rusqlite::Result<Project> {
    Ok(Project {
        project_id: row.get("project_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        created_at: ts_from_sql(3, row.get("created_at")?)?,
    })
}

/// Internal helper to get a project using an existing connection.
pub(crate) fn get_project_internal(conn: &Connection, project_id: i64) -> Result<Option<Project>> {
    let mut stmt = conn.prepare("SELECT * FROM projects WHERE project_id = ?1")?;

    match stmt.query_row(params![project_id], parse_project_row) {
        Ok(project) => Ok(Some(project)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Internal helper to find a project by exact name.
pub(crate) fn find_project_by_name_internal(
    conn: &Connection,
    name: &str,
) -> Result<Option<Project>> {
    let mut stmt = conn.prepare("SELECT * FROM projects WHERE name = ?1 ORDER BY project_id LIMIT 1")?;

    match stmt.query_row(params![name], parse_project_row) {
        Ok(project) => Ok(Some(project)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Internal insert used by task creation and import when a named project is
/// missing.
pub(crate) fn create_project_internal(
    conn: &Connection,
    name: &str,
    description: Option<&str>,
) -> Result<Project> {
    let created_at = now();
    conn.execute(
        "INSERT INTO projects (name, description, created_at) VALUES (?1, ?2, ?3)",
        params![name, description, ts_to_sql(&created_at)],
    )?;

    Ok(Project {
        project_id: conn.last_insert_rowid(),
        name: name.to_string(),
        description: description.map(String::from),
        created_at,
    })
}

/// Resolve a project name, creating the project with the given description
/// when absent. Returns the project and whether it was created.
pub(crate) fn get_or_create_project_internal(
    conn: &Connection,
    name: &str,
    description: &str,
) -> Result<(Project, bool)> {
    if let Some(project) = find_project_by_name_internal(conn, name)? {
        return Ok((project, false));
    }
    let project = create_project_internal(conn, name, Some(description))?;
    Ok((project, true))
}

impl Database {
    /// Create a project. Names are not required to be unique.
    pub fn create_project(&self, name: &str, description: Option<&str>) -> Result<Project> {
        self.with_conn(|conn| create_project_internal(conn, name, description))
    }

    /// Get a project by ID.
    pub fn get_project(&self, project_id: i64) -> Result<Option<Project>> {
        self.with_conn(|conn| get_project_internal(conn, project_id))
    }

    /// Find a project by exact name.
    pub fn find_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        self.with_conn(|conn| find_project_by_name_internal(conn, name))
    }

    /// List all projects.
    pub fn list_projects(&self) -> Result<Vec<Project>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM projects ORDER BY project_id")?;
            let projects = stmt
                .query_map([], parse_project_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(projects)
        })
    }

    /// Delete every project. Tasks referencing them have project_id nulled
    /// by the schema. Returns the number of rows removed.
    pub fn delete_all_projects(&self) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let count = tx.execute("DELETE FROM projects", [])?;
            tx.commit()?;
            Ok(count)
        })
    }

    /// Delete a single project by ID. Missing ID is an error.
    pub fn delete_project(&self, project_id: i64) -> Result<i64> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let count = tx.execute(
                "DELETE FROM projects WHERE project_id = ?1",
                params![project_id],
            )?;
            if count == 0 {
                return Err(CommandError::project_not_found(project_id).into());
            }
            tx.commit()?;
            Ok(project_id)
        })
    }

    /// Delete a specific set of projects. Missing IDs are skipped but
    /// reported so the caller can surface them. Returns (deleted, skipped).
    pub fn delete_projects(&self, project_ids: &[i64]) -> Result<(Vec<i64>, Vec<i64>)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut deleted = Vec::new();
            let mut skipped = Vec::new();

            for &id in project_ids {
                let count =
                    tx.execute("DELETE FROM projects WHERE project_id = ?1", params![id])?;
                if count > 0 {
                    deleted.push(id);
                } else {
                    skipped.push(id);
                }
            }

            tx.commit()?;
            Ok((deleted, skipped))
        })
    }
}
