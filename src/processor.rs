//! Top-level command processing.
//!
//! One entry point: free text in, response envelope out. Rule-matched
//! commands run directly against the store; everything else goes through the
//! model fallback. Errors are mapped to failed responses here and never
//! propagate to the transport.

use crate::classify::{BulkChange, Command, classify};
use crate::config::ImportRetention;
use crate::db::Database;
use crate::error::{CommandError, CommandResult, ErrorCode};
use crate::generate::{GenerationFlow, SessionState};
use crate::intent::resolve_intent;
use crate::llm::ChatClient;
use crate::ops::{Operation, OperationExecutor};
use crate::types::{QueryResponse, TaskPatch, TaskSelection};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub struct Processor {
    db: Database,
    llm: Arc<dyn ChatClient>,
    executor: OperationExecutor,
    flow: GenerationFlow,
    /// Deadline for one model round-trip.
    llm_deadline: Duration,
    default_user: i64,
}

impl Processor {
    pub fn new(
        db: Database,
        llm: Arc<dyn ChatClient>,
        retention: ImportRetention,
        llm_deadline: Duration,
        default_user: i64,
    ) -> Self {
        let executor = OperationExecutor::new(db.clone(), default_user);
        Self {
            db,
            llm,
            executor,
            flow: GenerationFlow::new(retention),
            llm_deadline,
            default_user,
        }
    }

    /// Process one command against the session's state.
    pub async fn process(&self, query: &str, state: &mut SessionState) -> QueryResponse {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return QueryResponse::failure("Invalid query: Query must be a non-empty string");
        }

        match self.dispatch(trimmed, state).await {
            Ok(response) => response,
            Err(err) => {
                if err.code.is_unexpected() {
                    tracing::error!(
                        code = ?err.code,
                        error = %err,
                        "unexpected error processing command"
                    );
                } else {
                    tracing::debug!(code = ?err.code, error = %err, "command failed");
                }
                QueryResponse::from(err)
            }
        }
    }

    async fn dispatch(
        &self,
        query: &str,
        state: &mut SessionState,
    ) -> CommandResult<QueryResponse> {
        match classify(query)? {
            Some(command) => self.run_command(command, query, state).await,
            None => self.fallback(query).await,
        }
    }

    async fn run_command(
        &self,
        command: Command,
        query: &str,
        state: &mut SessionState,
    ) -> CommandResult<QueryResponse> {
        match command {
            Command::BulkUpdate { selection, change } => self.bulk_update(selection, change),

            Command::ListSchema => {
                let data = self.executor.execute(Operation::ListTables, &json!({}))?;
                Ok(QueryResponse::ok(
                    "Here are the database tables and their schema:",
                    data,
                ))
            }

            Command::DeleteAllProjects => {
                let count = self.db.delete_all_projects()?;
                Ok(QueryResponse::ok(
                    "All projects have been deleted successfully.",
                    json!({ "deleted_projects": count }),
                ))
            }

            Command::DeleteProjects(ids) => {
                let (deleted, skipped) = self.db.delete_projects(&ids)?;
                Ok(QueryResponse::ok(
                    format!("Successfully deleted {} project(s).", deleted.len()),
                    json!({
                        "deleted_projects": deleted.len(),
                        "deleted_ids": deleted,
                        "skipped_ids": skipped,
                    }),
                ))
            }

            Command::DeleteAllTasks => {
                let count = self.db.delete_all_tasks()?;
                Ok(QueryResponse::ok(
                    "All tasks have been deleted successfully.",
                    json!({ "deleted_tasks": count }),
                ))
            }

            Command::Generate => {
                self.with_deadline(self.flow.generate(self.llm.as_ref(), query, state))
                    .await?
            }

            Command::Import { project } => {
                self.flow
                    .import(&self.db, state, project.as_deref(), self.default_user)
            }
        }
    }

    fn bulk_update(
        &self,
        selection: TaskSelection,
        change: BulkChange,
    ) -> CommandResult<QueryResponse> {
        let ids = self.db.select_task_ids(selection)?;
        if ids.is_empty() {
            return Err(CommandError::new(
                ErrorCode::TaskNotFound,
                "No tasks found matching the specified criteria",
            ));
        }

        let mut patch = TaskPatch::default();
        match change {
            BulkChange::Project(id) => patch.project_id = Some(id),
            BulkChange::Status(status) => patch.status = Some(status),
            BulkChange::Priority(priority) => patch.priority = Some(priority),
            BulkChange::AssigneeId(id) => patch.assigned_to = Some(id),
            BulkChange::AssigneeName(username) => {
                let user = self
                    .db
                    .get_user_by_username(&username)?
                    .ok_or_else(|| CommandError::username_not_found(&username))?;
                patch.assigned_to = Some(user.user_id);
            }
        }

        let updated = self.db.update_tasks(&ids, &patch)?;
        Ok(QueryResponse::ok(
            format!("Successfully updated {} tasks.", updated.len()),
            json!({ "updated_tasks": updated }),
        ))
    }

    /// Model fallback: ask for a structured intent, then execute it.
    async fn fallback(&self, query: &str) -> CommandResult<QueryResponse> {
        let intent = self
            .with_deadline(resolve_intent(self.llm.as_ref(), query))
            .await??;

        let data = self.executor.execute(intent.operation, &intent.parameters)?;
        Ok(QueryResponse::ok(intent.natural_response, data))
    }

    async fn with_deadline<T>(
        &self,
        fut: impl Future<Output = T>,
    ) -> CommandResult<T> {
        tokio::time::timeout(self.llm_deadline, fut)
            .await
            .map_err(|_| CommandError::timeout("Language model request"))
    }
}
