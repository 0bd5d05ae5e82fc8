//! Tag creation and the task↔tag association.

use super::tasks::get_task_internal;
use super::users::get_user_internal;
use super::Database;
use crate::error::CommandError;
use crate::types::Tag;
use anyhow::Result;
use rusqlite::{Connection, Row, params};

fn parse_tag_row(row: &Row) -> rusqlite::Result<Tag> {
    Ok(Tag {
        tag_id: row.get("tag_id")?,
        name: row.get("name")?,
        created_by: row.get("created_by")?,
    })
}

/// Resolve a tag name for a creator, creating it on first use. Tag names are
/// unique per creator.
fn get_or_create_tag_internal(conn: &Connection, name: &str, created_by: i64) -> Result<Tag> {
    let mut stmt =
        conn.prepare("SELECT * FROM tags WHERE name = ?1 AND created_by = ?2")?;
    match stmt.query_row(params![name, created_by], parse_tag_row) {
        Ok(tag) => return Ok(tag),
        Err(rusqlite::Error::QueryReturnedNoRows) => {}
        Err(e) => return Err(e.into()),
    }

    conn.execute(
        "INSERT INTO tags (name, created_by) VALUES (?1, ?2)",
        params![name, created_by],
    )?;

    Ok(Tag {
        tag_id: conn.last_insert_rowid(),
        name: name.to_string(),
        created_by,
    })
}

impl Database {
    /// Attach tags to a task, creating missing tags on demand. Returns the
    /// full tag set now on the task.
    pub fn tag_task(&self, task_id: i64, names: &[String], created_by: i64) -> Result<Vec<Tag>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if get_task_internal(&tx, task_id)?.is_none() {
                return Err(CommandError::task_not_found(task_id).into());
            }
            if get_user_internal(&tx, created_by)?.is_none() {
                return Err(CommandError::user_not_found(created_by).into());
            }

            for name in names {
                let tag = get_or_create_tag_internal(&tx, name, created_by)?;
                tx.execute(
                    "INSERT OR IGNORE INTO task_tags (task_id, tag_id) VALUES (?1, ?2)",
                    params![task_id, tag.tag_id],
                )?;
            }

            let mut stmt = tx.prepare(
                "SELECT g.* FROM tags g
                 INNER JOIN task_tags tt ON g.tag_id = tt.tag_id
                 WHERE tt.task_id = ?1
                 ORDER BY g.tag_id",
            )?;
            let tags = stmt
                .query_map(params![task_id], parse_tag_row)?
                .collect::<Result<Vec<_>, _>>()?;
            drop(stmt);

            tx.commit()?;
            Ok(tags)
        })
    }

    /// List the tags attached to a task.
    pub fn tags_for_task(&self, task_id: i64) -> Result<Vec<Tag>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT g.* FROM tags g
                 INNER JOIN task_tags tt ON g.tag_id = tt.tag_id
                 WHERE tt.task_id = ?1
                 ORDER BY g.tag_id",
            )?;
            let tags = stmt
                .query_map(params![task_id], parse_tag_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tags)
        })
    }
}
