//! Schema introspection over the live database.

use super::Database;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Information about a table column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
}

/// Information about a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

impl Database {
    /// List every user table with its columns, reflecting the persisted
    /// schema. Tables are ordered by name, columns in declaration order, so
    /// consecutive calls yield identical output.
    pub fn list_tables(&self) -> Result<Vec<TableInfo>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table'
                 AND name NOT LIKE 'sqlite_%'
                 AND name NOT LIKE 'refinery_%'
                 ORDER BY name",
            )?;

            let table_names: Vec<String> = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;

            let mut tables = Vec::new();
            for name in table_names {
                let columns = get_table_columns(conn, &name)?;
                tables.push(TableInfo { name, columns });
            }

            Ok(tables)
        })
    }
}

/// Column information via PRAGMA table_info, in declaration order.
fn get_table_columns(conn: &rusqlite::Connection, table_name: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info('{}')", table_name))?;

    let columns: Vec<ColumnInfo> = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                data_type: row.get::<_, String>(2)?.to_uppercase(),
                nullable: row.get::<_, i32>(3)? == 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(columns)
}
