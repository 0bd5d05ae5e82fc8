//! End-to-end tests for command processing.
//!
//! The model client is stubbed at the `ChatClient` seam: a panicking stub
//! proves the rule-based path never reaches the model, and a scripted stub
//! drives the generation and fallback flows.

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskspeak::config::ImportRetention;
use taskspeak::db::Database;
use taskspeak::db::tasks::{NewTask, TaskFilter};
use taskspeak::generate::SessionState;
use taskspeak::llm::{ChatClient, ChatMessage, LlmError};
use taskspeak::processor::Processor;
use taskspeak::types::{TaskPriority, TaskStatus};

/// Fails the test if any rule-matched command reaches the model.
struct PanicClient;

#[async_trait]
impl ChatClient for PanicClient {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
        panic!("the language model must not be reached for rule-matched commands");
    }
}

/// Returns canned replies in order.
struct ScriptedClient {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedClient {
    fn new<S: AsRef<str>>(replies: &[S]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|s| s.as_ref().to_string()).collect()),
        }
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::Request("no scripted reply left".to_string()))
    }
}

fn setup(llm: Arc<dyn ChatClient>, retention: ImportRetention) -> (Processor, Database) {
    let db = Database::open_in_memory().unwrap();
    let user = db.ensure_default_user("admin", "admin@localhost").unwrap();
    let processor = Processor::new(
        db.clone(),
        llm,
        retention,
        Duration::from_secs(5),
        user.user_id,
    );
    (processor, db)
}

fn seed_tasks(db: &Database, count: usize) {
    let user = db.get_user_by_username("admin").unwrap().unwrap().user_id;
    for i in 1..=count {
        db.create_task(&NewTask::new(format!("Task {}", i), user))
            .unwrap();
    }
}

const GENERATION_REPLY: &str = r#"{
    "tasks": [
        {"title": "Pick a domain", "description": "Choose and register a domain name",
         "priority": "high", "estimated_duration": "30"},
        {"title": "Set up hosting", "description": "Provision a web server",
         "priority": "urgent", "estimated_duration": "45"},
        {"title": "Write content", "description": "Draft the landing page copy",
         "priority": "low"}
    ]
}"#;

mod rule_path {
    use super::*;

    #[tokio::test]
    async fn rule_matched_commands_never_reach_the_model() {
        let (processor, db) = setup(Arc::new(PanicClient), ImportRetention::Retain);
        seed_tasks(&db, 3);
        let mut state = SessionState::new();

        // Every one of these must resolve without touching the stub.
        for command in [
            "show tables",
            "set all tasks set status to completed",
            "for tasks between 1 and 2 set priority to high",
            "delete project 99",
            "delete all tasks",
            "delete all projects",
        ] {
            processor.process(command, &mut state).await;
        }
    }

    #[tokio::test]
    async fn bulk_update_between_is_inclusive_of_both_bounds() {
        let (processor, db) = setup(Arc::new(PanicClient), ImportRetention::Retain);
        seed_tasks(&db, 12);
        let mut state = SessionState::new();

        let response = processor
            .process("for tasks between 5 and 10 set status to completed", &mut state)
            .await;

        assert!(response.success, "{}", response.response);
        assert_eq!(response.response, "Successfully updated 6 tasks.");

        for id in 1..=12 {
            let task = db.get_task(id).unwrap().unwrap();
            let expected = if (5..=10).contains(&id) {
                TaskStatus::Completed
            } else {
                TaskStatus::Pending
            };
            assert_eq!(task.status, expected, "task {}", id);
        }
    }

    #[tokio::test]
    async fn bulk_update_empty_selection_fails() {
        let (processor, _db) = setup(Arc::new(PanicClient), ImportRetention::Retain);
        let mut state = SessionState::new();

        let response = processor
            .process("set all tasks set status to completed", &mut state)
            .await;

        assert!(!response.success);
        assert_eq!(
            response.response,
            "No tasks found matching the specified criteria"
        );
    }

    #[tokio::test]
    async fn bulk_update_invalid_enum_value_fails() {
        let (processor, db) = setup(Arc::new(PanicClient), ImportRetention::Retain);
        seed_tasks(&db, 2);
        let mut state = SessionState::new();

        let response = processor
            .process("set all tasks set status to finished", &mut state)
            .await;

        assert!(!response.success);
        assert!(response.response.contains("Invalid status: finished"));
        assert_eq!(
            db.get_task(1).unwrap().unwrap().status,
            TaskStatus::Pending
        );
    }

    #[tokio::test]
    async fn bulk_assign_resolves_usernames() {
        let (processor, db) = setup(Arc::new(PanicClient), ImportRetention::Retain);
        seed_tasks(&db, 2);
        let bob = db.create_user("bob", "bob@example.com").unwrap();
        let mut state = SessionState::new();

        let response = processor
            .process("assign all tasks to bob", &mut state)
            .await;

        assert!(response.success, "{}", response.response);
        for id in 1..=2 {
            let task = db.get_task(id).unwrap().unwrap();
            assert_eq!(task.assigned_to, Some(bob.user_id));
        }

        let response = processor
            .process("assign all tasks to nobody", &mut state)
            .await;
        assert!(!response.success);
        assert_eq!(response.response, "User 'nobody' not found");
    }

    #[tokio::test]
    async fn delete_specific_projects_reports_skipped_ids() {
        let (processor, db) = setup(Arc::new(PanicClient), ImportRetention::Retain);
        db.create_project("A", None).unwrap();
        db.create_project("B", None).unwrap();
        let mut state = SessionState::new();

        let response = processor.process("delete project 1, 2, 99", &mut state).await;

        assert!(response.success);
        assert_eq!(response.response, "Successfully deleted 2 project(s).");
        let data = response.data.unwrap();
        assert_eq!(data["deleted_projects"], 2);
        assert_eq!(data["skipped_ids"], json!([99]));
    }

    #[tokio::test]
    async fn schema_listing_is_stable_across_calls() {
        let (processor, _db) = setup(Arc::new(PanicClient), ImportRetention::Retain);
        let mut state = SessionState::new();

        let first = processor.process("show tables", &mut state).await;
        let second = processor.process("show schema", &mut state).await;

        assert!(first.success);
        assert_eq!(first.data, second.data);

        let tables = first.data.unwrap();
        let names: Vec<&str> = tables["tables"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["projects", "tags", "task_tags", "tasks", "users"]);
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let (processor, _db) = setup(Arc::new(PanicClient), ImportRetention::Retain);
        let mut state = SessionState::new();

        let response = processor.process("   ", &mut state).await;
        assert!(!response.success);
        assert!(response.response.contains("non-empty"));
    }
}

mod generation_flow {
    use super::*;

    #[tokio::test]
    async fn generation_then_import_persists_the_batch() {
        let llm = Arc::new(ScriptedClient::new(&[GENERATION_REPLY]));
        let (processor, db) = setup(llm, ImportRetention::Retain);
        let mut state = SessionState::new();

        let response = processor
            .process("how to launch a website", &mut state)
            .await;
        assert!(response.success, "{}", response.response);
        assert_eq!(response.data.unwrap()["tasks"].as_array().unwrap().len(), 3);
        // Nothing persisted yet.
        assert_eq!(db.count_tasks().unwrap(), 0);

        let response = processor
            .process("add these tasks to project 'launch'", &mut state)
            .await;
        assert!(response.success, "{}", response.response);
        assert!(response.response.contains("imported 3 tasks"));
        assert!(response.response.contains("'launch'"));

        assert_eq!(db.count_tasks().unwrap(), 3);
        let project = db.find_project_by_name("launch").unwrap().unwrap();
        let tasks = db.search_tasks(&TaskFilter::default()).unwrap();
        assert!(tasks.iter().all(|t| t.task.project_id == Some(project.project_id)));
        assert!(tasks.iter().all(|t| t.task.status == TaskStatus::Pending));
    }

    #[tokio::test]
    async fn invalid_priority_is_coerced_before_persistence() {
        let llm = Arc::new(ScriptedClient::new(&[GENERATION_REPLY]));
        let (processor, db) = setup(llm, ImportRetention::Retain);
        let mut state = SessionState::new();

        processor.process("how to launch a website", &mut state).await;
        processor.process("add these tasks", &mut state).await;

        let tasks = db.search_tasks(&TaskFilter::default()).unwrap();
        let hosting = tasks
            .iter()
            .find(|t| t.task.title == "Set up hosting")
            .unwrap();
        // "urgent" is outside the enum and lands as medium.
        assert_eq!(hosting.task.priority, TaskPriority::Medium);
    }

    #[tokio::test]
    async fn import_without_generation_fails_and_persists_nothing() {
        let (processor, db) = setup(Arc::new(PanicClient), ImportRetention::Retain);
        let mut state = SessionState::new();

        let response = processor.process("add these tasks", &mut state).await;

        assert!(!response.success);
        assert!(response.response.contains("generate tasks first"));
        assert_eq!(db.count_tasks().unwrap(), 0);
    }

    #[tokio::test]
    async fn retain_policy_allows_reimporting_the_same_batch() {
        let llm = Arc::new(ScriptedClient::new(&[GENERATION_REPLY]));
        let (processor, db) = setup(llm, ImportRetention::Retain);
        let mut state = SessionState::new();

        processor.process("how to launch a website", &mut state).await;
        processor.process("add these tasks", &mut state).await;
        let response = processor.process("add these tasks", &mut state).await;

        assert!(response.success);
        assert_eq!(db.count_tasks().unwrap(), 6);
    }

    #[tokio::test]
    async fn clear_policy_empties_the_buffer_after_import() {
        let llm = Arc::new(ScriptedClient::new(&[GENERATION_REPLY]));
        let (processor, db) = setup(llm, ImportRetention::Clear);
        let mut state = SessionState::new();

        processor.process("how to launch a website", &mut state).await;
        processor.process("add these tasks", &mut state).await;
        let response = processor.process("add these tasks", &mut state).await;

        assert!(!response.success);
        assert_eq!(db.count_tasks().unwrap(), 3);
    }

    #[tokio::test]
    async fn session_reset_clears_the_pending_batch() {
        let llm = Arc::new(ScriptedClient::new(&[GENERATION_REPLY]));
        let (processor, db) = setup(llm, ImportRetention::Retain);
        let mut state = SessionState::new();

        processor.process("how to launch a website", &mut state).await;
        state.reset();
        let response = processor.process("add these tasks", &mut state).await;

        assert!(!response.success);
        assert_eq!(db.count_tasks().unwrap(), 0);
    }

    #[tokio::test]
    async fn malformed_generation_reply_fails_without_buffering() {
        let llm = Arc::new(ScriptedClient::new(&[
            "Here are some great tasks for you!",
        ]));
        let (processor, db) = setup(llm, ImportRetention::Retain);
        let mut state = SessionState::new();

        let response = processor
            .process("how to launch a website", &mut state)
            .await;
        assert!(!response.success);

        let response = processor.process("add these tasks", &mut state).await;
        assert!(!response.success);
        assert_eq!(db.count_tasks().unwrap(), 0);
    }

    #[tokio::test]
    async fn a_new_generation_overwrites_the_pending_batch() {
        let second_reply = r#"{"tasks": [
            {"title": "Only task", "description": "The replacement batch",
             "priority": "medium"}
        ]}"#;
        let llm = Arc::new(ScriptedClient::new(&[GENERATION_REPLY, second_reply]));
        let (processor, db) = setup(llm, ImportRetention::Retain);
        let mut state = SessionState::new();

        processor.process("how to launch a website", &mut state).await;
        processor.process("how to bake bread", &mut state).await;
        let response = processor.process("add these tasks", &mut state).await;

        assert!(response.success);
        assert_eq!(db.count_tasks().unwrap(), 1);
        let tasks = db.search_tasks(&TaskFilter::default()).unwrap();
        assert_eq!(tasks[0].task.title, "Only task");
    }
}

mod fallback_path {
    use super::*;

    fn intent_reply(operation: &str, parameters: serde_json::Value, message: &str) -> String {
        json!({
            "operation": operation,
            "parameters": parameters,
            "natural_response": message,
        })
        .to_string()
    }

    #[tokio::test]
    async fn create_task_round_trip_with_date_phrase() {
        let reply = intent_reply(
            "create_task",
            json!({"title": "Ship release", "priority": "high", "due_date": "tomorrow"}),
            "Created the release task.",
        );
        let llm = Arc::new(ScriptedClient::new(&[&reply]));
        let (processor, db) = setup(llm, ImportRetention::Retain);
        let mut state = SessionState::new();

        let before = chrono::Utc::now();
        let response = processor
            .process("remind me to ship the release", &mut state)
            .await;

        assert!(response.success, "{}", response.response);
        assert_eq!(response.response, "Created the release task.");

        let task = db.get_task(1).unwrap().unwrap();
        assert_eq!(task.priority, TaskPriority::High);
        assert!(task.due_date.unwrap() > before);
    }

    #[tokio::test]
    async fn string_project_reference_creates_the_project_exactly_once() {
        let reply = |title: &str| {
            intent_reply(
                "create_task",
                json!({"title": title, "project_id": "Website"}),
                "Done.",
            )
        };
        let first = reply("Design header");
        let second = reply("Design footer");
        let llm = Arc::new(ScriptedClient::new(&[&first, &second]));
        let (processor, db) = setup(llm, ImportRetention::Retain);
        let mut state = SessionState::new();

        processor.process("add a header design task", &mut state).await;
        processor.process("add a footer design task", &mut state).await;

        assert_eq!(db.list_projects().unwrap().len(), 1);
        assert_eq!(db.count_tasks().unwrap(), 2);
    }

    #[tokio::test]
    async fn delete_of_unknown_task_fails_and_preserves_rows() {
        let reply = intent_reply("delete_task", json!({"task_id": 42}), "Deleted it.");
        let llm = Arc::new(ScriptedClient::new(&[&reply]));
        let (processor, db) = setup(llm, ImportRetention::Retain);
        seed_tasks(&db, 2);
        let mut state = SessionState::new();

        let response = processor.process("remove task 42", &mut state).await;

        assert!(!response.success);
        assert_eq!(response.response, "Task with ID 42 not found");
        assert_eq!(db.count_tasks().unwrap(), 2);
    }

    #[tokio::test]
    async fn unknown_update_field_is_rejected() {
        let reply = intent_reply(
            "update_task",
            json!({"task_id": 1, "color": "red"}),
            "Updated.",
        );
        let llm = Arc::new(ScriptedClient::new(&[&reply]));
        let (processor, db) = setup(llm, ImportRetention::Retain);
        seed_tasks(&db, 1);
        let mut state = SessionState::new();

        let response = processor.process("make task 1 red", &mut state).await;

        assert!(!response.success);
        assert_eq!(response.response, "Unknown field: color");
    }

    #[tokio::test]
    async fn malformed_model_replies_are_classified_failures() {
        for reply in [
            "Sure, I'll create that task for you.",
            r#"{"operation": "create_task"}"#,
            r#"{"operation": "drop_database", "parameters": {}, "natural_response": "ok"}"#,
            r#"{"operation": "create_task", "parameters": {}, "natural_response": "ok", "extra": 1}"#,
        ] {
            let llm = Arc::new(ScriptedClient::new(&[reply]));
            let (processor, db) = setup(llm, ImportRetention::Retain);
            let mut state = SessionState::new();

            let response = processor.process("do something odd", &mut state).await;

            assert!(!response.success, "reply should fail: {}", reply);
            assert_eq!(db.count_tasks().unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn model_transport_errors_surface_as_failures() {
        // Empty script: the stub errors on the first call.
        let llm = Arc::new(ScriptedClient::new::<&str>(&[]));
        let (processor, _db) = setup(llm, ImportRetention::Retain);
        let mut state = SessionState::new();

        let response = processor.process("do something odd", &mut state).await;

        assert!(!response.success);
        assert!(response.response.contains("Language model error"));
    }

    #[tokio::test]
    async fn search_results_surface_the_natural_response() {
        let reply = intent_reply(
            "search_tasks",
            json!({"status": "pending"}),
            "Here are your pending tasks.",
        );
        let llm = Arc::new(ScriptedClient::new(&[&reply]));
        let (processor, db) = setup(llm, ImportRetention::Retain);
        seed_tasks(&db, 2);
        let mut state = SessionState::new();

        let response = processor.process("what's still open?", &mut state).await;

        assert!(response.success);
        assert_eq!(response.response, "Here are your pending tasks.");
        assert_eq!(
            response.data.unwrap()["tasks"].as_array().unwrap().len(),
            2
        );
    }
}
