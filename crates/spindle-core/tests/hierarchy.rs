// ABOUTME: Integration tests for the task hierarchy manager.
// ABOUTME: Tests inheritance, cascading deletion, duplication and forking against an in-memory store.

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use spindle_core::{
    ContentPart, ContextFile, CoreError, CreateTaskParams, ManagerOptions, MemoryTaskStore,
    Message, ModelSelection, ProjectEnvironment, SettingsOverride, TaskEvent, TaskManager,
    TaskStore, TaskUpdate, WorkingMode, Worktree, INTERNAL_TASK_ID,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

struct FakeProject {
    worktrees_resolved: AtomicUsize,
}

#[async_trait]
impl ProjectEnvironment for FakeProject {
    async fn resolve_worktree(&self, task_id: &str) -> AnyResult<Worktree> {
        self.worktrees_resolved.fetch_add(1, Ordering::SeqCst);
        Ok(Worktree {
            path: PathBuf::from("/worktrees").join(task_id),
            base_branch: Some("main".to_string()),
        })
    }

    async fn default_model(&self) -> AnyResult<ModelSelection> {
        Ok(ModelSelection::new("anthropic", "default-model"))
    }
}

struct Harness {
    manager: TaskManager,
    store: Arc<MemoryTaskStore>,
    project: Arc<FakeProject>,
    events: mpsc::UnboundedReceiver<TaskEvent>,
}

fn harness_with(options: ManagerOptions) -> Harness {
    let store = Arc::new(MemoryTaskStore::default());
    let project = Arc::new(FakeProject {
        worktrees_resolved: AtomicUsize::new(0),
    });
    let (tx, rx) = mpsc::unbounded_channel();
    let manager = TaskManager::new(
        "/project",
        store.clone(),
        project.clone(),
        Arc::new(tx),
        options,
    );
    Harness {
        manager,
        store,
        project,
        events: rx,
    }
}

fn harness() -> Harness {
    harness_with(ManagerOptions::default())
}

fn drain(rx: &mut mpsc::UnboundedReceiver<TaskEvent>) -> Vec<TaskEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn deleted_ids(events: &[TaskEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            TaskEvent::TaskDeleted { task_id } => Some(task_id.clone()),
            _ => None,
        })
        .collect()
}

fn created_count(events: &[TaskEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, TaskEvent::TaskCreated(_)))
        .count()
}

fn with_model(provider: &str, model: &str) -> SettingsOverride {
    SettingsOverride {
        model: Some(ModelSelection::new(provider, model)),
        ..Default::default()
    }
}

// ============================================================================
// Loading Tests
// ============================================================================

#[tokio::test]
async fn test_fresh_project_gets_internal_task() {
    let h = harness();
    assert!(h.manager.get_tasks().await.unwrap().is_empty());

    let internal = h.manager.get_internal_task().await.unwrap();
    assert_eq!(internal.lock().await.id(), INTERNAL_TASK_ID);
    assert!(h.store.task(INTERNAL_TASK_ID).is_some());
}

#[tokio::test]
async fn test_existing_tasks_are_loaded_from_store() {
    let store = Arc::new(MemoryTaskStore::default());
    let mut data = spindle_core::TaskData::new("persisted", None);
    data.name = "From disk".to_string();
    store.save_task(&data).await.unwrap();
    store
        .save_messages("persisted", &[Message::user("hello")])
        .await
        .unwrap();

    let manager = TaskManager::new(
        "/project",
        store.clone(),
        Arc::new(FakeProject {
            worktrees_resolved: AtomicUsize::new(0),
        }),
        Arc::new(spindle_core::NoopSink),
        ManagerOptions::default(),
    );

    let tasks = manager.get_tasks().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].name, "From disk");

    let handle = manager.get_task("persisted").await.unwrap().unwrap();
    assert_eq!(handle.lock().await.messages().len(), 1);
}

// ============================================================================
// Creation Tests
// ============================================================================

#[tokio::test]
async fn test_first_root_task_uses_default_model() {
    let mut h = harness();
    let task = h
        .manager
        .create_task(CreateTaskParams::default().named("First"))
        .await
        .unwrap();

    assert!(task.is_root());
    assert_eq!(task.name, "First");
    assert_eq!(
        task.settings.model,
        ModelSelection::new("anthropic", "default-model")
    );
    assert_eq!(created_count(&drain(&mut h.events)), 1);
    assert!(h.store.task(&task.id).is_some());
}

#[tokio::test]
async fn test_empty_parent_id_creates_root_task() {
    let h = harness();
    let task = h
        .manager
        .create_task(CreateTaskParams {
            parent_id: Some(String::new()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(task.parent_id.is_none());
}

#[tokio::test]
async fn test_subtask_inherits_parent_model_and_worktree() {
    let h = harness();
    let parent = h
        .manager
        .create_task(CreateTaskParams {
            overrides: SettingsOverride {
                model: Some(ModelSelection::new("openai", "gpt-4o")),
                working_mode: Some(WorkingMode::Worktree),
                ..Default::default()
            },
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(parent.worktree.is_some());

    let child = h
        .manager
        .create_task(CreateTaskParams::subtask_of(&parent.id))
        .await
        .unwrap();

    assert_eq!(child.parent_id.as_deref(), Some(parent.id.as_str()));
    assert_eq!(child.settings.model, ModelSelection::new("openai", "gpt-4o"));
    assert_eq!(child.working_mode, WorkingMode::Worktree);
    assert_eq!(child.worktree, parent.worktree);
    // The shared worktree is reused, not resolved again
    assert_eq!(h.project.worktrees_resolved.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_subtask_resolves_worktree_of_parent_without_one() {
    let h = harness();
    let parent = h
        .manager
        .create_task(CreateTaskParams::default())
        .await
        .unwrap();
    let parent = h
        .manager
        .update_task(
            &parent.id,
            TaskUpdate {
                settings: SettingsOverride {
                    working_mode: Some(WorkingMode::Worktree),
                    ..Default::default()
                },
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(parent.worktree.is_none());

    let child = h
        .manager
        .create_task(CreateTaskParams::subtask_of(&parent.id))
        .await
        .unwrap();

    assert_eq!(child.working_mode, WorkingMode::Worktree);
    assert_eq!(
        child.worktree.map(|w| w.path),
        Some(PathBuf::from("/worktrees").join(&parent.id))
    );
}

#[tokio::test]
async fn test_root_task_never_inherits_worktree_from_recent_task() {
    let h = harness();
    let recent = h
        .manager
        .create_task(CreateTaskParams {
            overrides: SettingsOverride {
                model: Some(ModelSelection::new("openai", "gpt-4o")),
                working_mode: Some(WorkingMode::Worktree),
                ..Default::default()
            },
            ..Default::default()
        })
        .await
        .unwrap();

    let root = h
        .manager
        .create_task(CreateTaskParams::default())
        .await
        .unwrap();

    assert_eq!(root.settings.model, recent.settings.model);
    assert_eq!(root.working_mode, WorkingMode::Local);
    assert!(root.worktree.is_none());
}

#[tokio::test]
async fn test_root_task_inherits_from_most_recently_updated() {
    let h = harness();
    let older = h
        .manager
        .create_task(CreateTaskParams {
            overrides: with_model("a", "older"),
            ..Default::default()
        })
        .await
        .unwrap();
    h.manager
        .create_task(CreateTaskParams {
            overrides: with_model("b", "newer"),
            ..Default::default()
        })
        .await
        .unwrap();

    let root = h
        .manager
        .create_task(CreateTaskParams::default())
        .await
        .unwrap();
    assert_eq!(root.settings.model, ModelSelection::new("b", "newer"));

    // Touching the older task makes it the inheritance source
    h.manager
        .update_task(
            &older.id,
            TaskUpdate {
                state: Some("IN_PROGRESS".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let root = h
        .manager
        .create_task(CreateTaskParams::default())
        .await
        .unwrap();
    assert_eq!(root.settings.model, ModelSelection::new("a", "older"));
}

#[tokio::test]
async fn test_explicit_overrides_beat_inherited_values() {
    let h = harness();
    let parent = h
        .manager
        .create_task(CreateTaskParams {
            overrides: with_model("openai", "gpt-4o"),
            ..Default::default()
        })
        .await
        .unwrap();

    let child = h
        .manager
        .create_task(CreateTaskParams {
            parent_id: Some(parent.id.clone()),
            overrides: with_model("anthropic", "opus"),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(child.settings.model, ModelSelection::new("anthropic", "opus"));
}

#[tokio::test]
async fn test_locked_auto_approve_is_forced() {
    let h = harness_with(ManagerOptions {
        auto_approve_locked: true,
        ..Default::default()
    });
    let task = h
        .manager
        .create_task(CreateTaskParams {
            overrides: SettingsOverride {
                auto_approve: Some(false),
                ..Default::default()
            },
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(task.settings.auto_approve);
}

#[tokio::test]
async fn test_missing_parent_creates_nothing() {
    let mut h = harness();
    let err = h
        .manager
        .create_task(CreateTaskParams::subtask_of("nope"))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::ParentNotFound(ref id) if id == "nope"));
    assert_eq!(err.to_string(), "Parent task with id nope not found");
    assert!(h.manager.get_tasks().await.unwrap().is_empty());
    assert_eq!(created_count(&drain(&mut h.events)), 0);
}

#[tokio::test]
async fn test_internal_task_cannot_be_a_parent() {
    let h = harness();
    let err = h
        .manager
        .create_task(CreateTaskParams::subtask_of(INTERNAL_TASK_ID))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ParentNotFound(_)));
}

#[tokio::test]
async fn test_creation_event_can_be_suppressed() {
    let mut h = harness();
    h.manager
        .create_task(CreateTaskParams {
            send_event: false,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(created_count(&drain(&mut h.events)), 0);
    assert_eq!(h.manager.get_tasks().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_default_context_files_are_copied_forward() {
    let h = harness();
    h.manager
        .add_default_context_file(ContextFile {
            path: "CONVENTIONS.md".to_string(),
            read_only: true,
        })
        .await
        .unwrap();

    let task = h
        .manager
        .create_task(CreateTaskParams::default())
        .await
        .unwrap();
    assert_eq!(task.context_files.len(), 1);
    assert_eq!(task.context_files[0].path, "CONVENTIONS.md");

    // Later changes to the defaults do not reach existing tasks
    h.manager
        .drop_default_context_file("CONVENTIONS.md")
        .await
        .unwrap();
    let handle = h.manager.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(handle.lock().await.context_files().len(), 1);
}

// ============================================================================
// Deletion Tests
// ============================================================================

async fn chain(h: &Harness) -> (String, String, String) {
    let a = h
        .manager
        .create_task(CreateTaskParams::default().named("A"))
        .await
        .unwrap();
    let b = h
        .manager
        .create_task(CreateTaskParams::subtask_of(&a.id).named("B"))
        .await
        .unwrap();
    let c = h
        .manager
        .create_task(CreateTaskParams::subtask_of(&b.id).named("C"))
        .await
        .unwrap();
    (a.id, b.id, c.id)
}

#[tokio::test]
async fn test_delete_root_removes_whole_chain() {
    let mut h = harness();
    let (a, b, c) = chain(&h).await;
    drain(&mut h.events);

    h.manager.delete_task(&a).await.unwrap();

    let deleted = deleted_ids(&drain(&mut h.events));
    assert_eq!(deleted, vec![c.clone(), b.clone(), a.clone()]);
    assert!(h.manager.get_tasks().await.unwrap().is_empty());
    for id in [&a, &b, &c] {
        assert!(h.store.task(id).is_none());
    }
}

#[tokio::test]
async fn test_delete_emits_one_event_per_descendant_plus_one() {
    let mut h = harness();
    let root = h
        .manager
        .create_task(CreateTaskParams::default())
        .await
        .unwrap();
    for _ in 0..3 {
        let child = h
            .manager
            .create_task(CreateTaskParams::subtask_of(&root.id))
            .await
            .unwrap();
        h.manager
            .create_task(CreateTaskParams::subtask_of(&child.id))
            .await
            .unwrap();
    }
    let bystander = h
        .manager
        .create_task(CreateTaskParams::default())
        .await
        .unwrap();
    drain(&mut h.events);

    h.manager.delete_task(&root.id).await.unwrap();

    assert_eq!(deleted_ids(&drain(&mut h.events)).len(), 7);
    let remaining = h.manager.get_tasks().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, bystander.id);
}

#[tokio::test]
async fn test_delete_middle_task_leaves_ancestor() {
    let h = harness();
    let (a, b, c) = chain(&h).await;

    h.manager.delete_task(&b).await.unwrap();

    assert!(h.manager.get_task(&a).await.unwrap().is_some());
    assert!(h.manager.get_task(&b).await.unwrap().is_none());
    assert!(h.manager.get_task(&c).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_unknown_task_is_noop() {
    let mut h = harness();
    h.manager
        .create_task(CreateTaskParams::default())
        .await
        .unwrap();
    drain(&mut h.events);

    h.manager.delete_task("ghost").await.unwrap();
    assert!(deleted_ids(&drain(&mut h.events)).is_empty());
    assert_eq!(h.manager.get_tasks().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_internal_task_survives_delete() {
    let h = harness();
    h.manager.delete_task(INTERNAL_TASK_ID).await.unwrap();
    assert!(h.manager.get_internal_task().await.is_ok());
}

#[tokio::test]
async fn test_delete_failure_keeps_already_deleted_tasks_deleted() {
    let mut h = harness();
    let (a, b, c) = chain(&h).await;
    h.store.fail_removal_of(&b);
    drain(&mut h.events);

    let err = h.manager.delete_task(&a).await.unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)));

    assert_eq!(deleted_ids(&drain(&mut h.events)), vec![c.clone()]);
    assert!(h.manager.get_task(&c).await.unwrap().is_none());
    assert!(h.manager.get_task(&b).await.unwrap().is_some());
    assert!(h.manager.get_task(&a).await.unwrap().is_some());
}

#[tokio::test]
async fn test_failed_delete_leaves_task_usable() {
    let mut h = harness();
    let task = h
        .manager
        .create_task(CreateTaskParams::default())
        .await
        .unwrap();
    h.store.fail_removal_of(&task.id);
    drain(&mut h.events);

    assert!(h.manager.delete_task(&task.id).await.is_err());
    assert!(deleted_ids(&drain(&mut h.events)).is_empty());
    assert_eq!(h.manager.get_tasks().await.unwrap().len(), 1);

    let handle = h.manager.get_task(&task.id).await.unwrap().unwrap();
    let mut live = handle.lock().await;
    assert!(!live.aggregator().is_shut_down());
    assert!(live.messages().autosave_enabled());
    live.append_message(Message::user("still here"));
    assert!(live.complete_response("m1", "answer", spindle_core::CompletionDetails::default()));
    assert_eq!(live.messages().len(), 2);
}

#[tokio::test]
async fn test_orphans_are_listed_and_removed_with_their_missing_parent() {
    let store = Arc::new(MemoryTaskStore::default());
    for (id, parent) in [("orphan-a", "gone"), ("orphan-b", "gone"), ("stray", "elsewhere")] {
        let orphan = spindle_core::TaskData::new(id, Some(parent.to_string()));
        store.save_task(&orphan).await.unwrap();
    }

    let manager = TaskManager::new(
        "/project",
        store,
        Arc::new(FakeProject {
            worktrees_resolved: AtomicUsize::new(0),
        }),
        Arc::new(spindle_core::NoopSink),
        ManagerOptions::default(),
    );
    assert_eq!(manager.get_tasks().await.unwrap().len(), 3);

    // An orphan can be deleted on its own
    manager.delete_task("orphan-b").await.unwrap();
    assert_eq!(manager.get_tasks().await.unwrap().len(), 2);

    // Deleting the absent parent id still cascades to its remaining children
    manager.delete_task("gone").await.unwrap();
    let remaining = manager.get_tasks().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "stray");
}

// ============================================================================
// Duplicate / Fork Tests
// ============================================================================

async fn task_with_history(h: &Harness, parent_id: Option<String>) -> (String, Vec<String>) {
    let task = h
        .manager
        .create_task(CreateTaskParams {
            parent_id,
            name: Some("Source".to_string()),
            overrides: with_model("openai", "gpt-4o"),
            ..Default::default()
        })
        .await
        .unwrap();

    let history = vec![
        Message::user("first"),
        Message::assistant(vec![ContentPart::text("answer one")]),
        Message::user("second"),
        Message::assistant(vec![ContentPart::text("answer two")]),
    ];
    let ids = history.iter().map(|m| m.id.clone()).collect();

    let handle = h.manager.get_task(&task.id).await.unwrap().unwrap();
    let mut source = handle.lock().await;
    for message in history {
        source.append_message(message);
    }
    (task.id, ids)
}

#[tokio::test]
async fn test_duplicate_copies_configuration_and_history() {
    let mut h = harness();
    let (source_id, ids) = task_with_history(&h, None).await;
    drain(&mut h.events);

    let copy = h.manager.duplicate_task(&source_id).await.unwrap();

    assert_ne!(copy.id, source_id);
    assert!(copy.parent_id.is_none());
    assert_eq!(copy.settings.model, ModelSelection::new("openai", "gpt-4o"));
    assert_eq!(created_count(&drain(&mut h.events)), 1);

    let handle = h.manager.get_task(&copy.id).await.unwrap().unwrap();
    let mut copied = handle.lock().await;
    assert_eq!(copied.messages().len(), ids.len());

    // Independent from the source after the copy
    copied.remove_message(&ids[3]).unwrap();
    drop(copied);
    let source = h.manager.get_task(&source_id).await.unwrap().unwrap();
    assert_eq!(source.lock().await.messages().len(), ids.len());
}

#[tokio::test]
async fn test_duplicate_and_fork_honour_locked_auto_approve() {
    let h = harness_with(ManagerOptions {
        auto_approve_locked: true,
        ..Default::default()
    });
    let (source_id, ids) = task_with_history(&h, None).await;
    h.manager
        .update_task(
            &source_id,
            TaskUpdate {
                settings: SettingsOverride {
                    auto_approve: Some(false),
                    ..Default::default()
                },
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let copy = h.manager.duplicate_task(&source_id).await.unwrap();
    assert!(copy.settings.auto_approve);

    let fork = h.manager.fork_task(&source_id, &ids[0]).await.unwrap();
    assert!(fork.settings.auto_approve);
}

#[tokio::test]
async fn test_fork_of_root_attaches_below_it() {
    let h = harness();
    let (source_id, ids) = task_with_history(&h, None).await;

    let fork = h.manager.fork_task(&source_id, &ids[1]).await.unwrap();

    assert_eq!(fork.parent_id.as_deref(), Some(source_id.as_str()));
    let handle = h.manager.get_task(&fork.id).await.unwrap().unwrap();
    let forked = handle.lock().await;
    let forked_ids: Vec<&str> = forked
        .messages()
        .get_messages()
        .iter()
        .map(|m| m.id.as_str())
        .collect();
    assert_eq!(forked_ids, vec![ids[0].as_str(), ids[1].as_str()]);
}

#[tokio::test]
async fn test_fork_of_subtask_attaches_next_to_it() {
    let h = harness();
    let root = h
        .manager
        .create_task(CreateTaskParams::default())
        .await
        .unwrap();
    let (sub_id, ids) = task_with_history(&h, Some(root.id.clone())).await;

    let fork = h.manager.fork_task(&sub_id, &ids[2]).await.unwrap();
    assert_eq!(fork.parent_id.as_deref(), Some(root.id.as_str()));
}

#[tokio::test]
async fn test_duplicate_and_fork_unknown_task_fail() {
    let h = harness();
    let err = h.manager.duplicate_task("missing").await.unwrap_err();
    assert!(err.is_not_found());

    let err = h.manager.fork_task("missing", "m1").await.unwrap_err();
    assert!(matches!(err, CoreError::TaskNotFound(_)));
}

#[tokio::test]
async fn test_fork_from_unknown_message_fails() {
    let h = harness();
    let (source_id, _) = task_with_history(&h, None).await;
    let before = h.manager.get_tasks().await.unwrap().len();

    let err = h.manager.fork_task(&source_id, "missing").await.unwrap_err();
    assert!(matches!(err, CoreError::MessageNotFound(_)));
    assert_eq!(h.manager.get_tasks().await.unwrap().len(), before);
}

// ============================================================================
// Listing Tests
// ============================================================================

#[tokio::test]
async fn test_archived_tasks_can_be_filtered() {
    let h = harness();
    let first = h
        .manager
        .create_task(CreateTaskParams::default().named("first"))
        .await
        .unwrap();
    h.manager
        .create_task(CreateTaskParams::default().named("second"))
        .await
        .unwrap();
    h.manager
        .update_task(
            &first.id,
            TaskUpdate {
                archived: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let all = h.manager.get_tasks().await.unwrap();
    assert_eq!(
        all.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
        vec!["first", "second"]
    );
    let active = h.manager.get_tasks_filtered(false).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].name, "second");
}

#[tokio::test]
async fn test_close_shuts_down_streaming() {
    let h = harness();
    let task = h
        .manager
        .create_task(CreateTaskParams::default())
        .await
        .unwrap();
    h.manager.close().await;

    let handle = h.manager.get_task(&task.id).await.unwrap().unwrap();
    assert!(handle.lock().await.aggregator().is_shut_down());
}
