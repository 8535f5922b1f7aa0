mod common;

use common::{project, task, titles, Call, FakeGateway};
use desklight_core::{
    decode_push_payload, GatewayError, LoadOutcome, ProjectId, PushEvent, SyncController,
    SyncError, TaskId, TaskStatus, ValidationError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn board() -> Arc<FakeGateway> {
    Arc::new(FakeGateway::new(
        vec![project(9, "Website"), project(10, "Ops")],
        vec![
            task(1, "draft copy", Some(9)),
            task(2, "publish", Some(9)),
            task(3, "rotate keys", Some(10)),
            task(4, "inbox", None),
        ],
    ))
}

async fn loaded(gateway: &Arc<FakeGateway>) -> SyncController<FakeGateway> {
    let mut controller = SyncController::new(Arc::clone(gateway));
    controller.load_projects().await.unwrap();
    controller.load_tasks().await.unwrap();
    controller
}

#[tokio::test]
async fn initial_load_replaces_collections() {
    let gateway = board();
    let controller = loaded(&gateway).await;

    assert_eq!(controller.projects().len(), 2);
    assert_eq!(controller.tasks().len(), 4);
    assert_eq!(controller.selection(), None);
    assert_eq!(
        gateway.calls(),
        vec![Call::FetchProjects, Call::FetchTasks(None)]
    );
}

#[tokio::test]
async fn upsert_for_unknown_id_appends_exactly_one_task() {
    let gateway = board();
    let mut controller = loaded(&gateway).await;
    let before = controller.tasks().len();

    controller.apply_push_event(PushEvent::Upsert(task(42, "new one", Some(10))));

    assert_eq!(controller.tasks().len(), before + 1);
    assert_eq!(controller.tasks().last().unwrap().id, TaskId(42));
}

#[tokio::test]
async fn upsert_for_known_id_replaces_in_place() {
    let gateway = board();
    let mut controller = loaded(&gateway).await;
    let before = controller.tasks().len();

    let mut replacement = task(2, "publish v2", Some(9));
    replacement.status = TaskStatus::Done;
    replacement.description = Some("after review".to_string());
    controller.apply_push_event(PushEvent::Upsert(replacement.clone()));

    assert_eq!(controller.tasks().len(), before);
    let stored = controller
        .tasks()
        .iter()
        .find(|t| t.id == TaskId(2))
        .unwrap();
    assert_eq!(stored, &replacement);
    assert_eq!(controller.tasks()[1].id, TaskId(2));
}

#[tokio::test]
async fn upsert_enqueues_update_notification() {
    let gateway = board();
    let mut controller = loaded(&gateway).await;

    controller.apply_push_event(PushEvent::Upsert(task(1, "draft copy", Some(9))));

    let messages: Vec<String> = controller
        .notifications()
        .map(|n| n.message.clone())
        .collect();
    assert_eq!(messages, vec!["task updated: draft copy".to_string()]);
}

#[tokio::test]
async fn deletion_is_idempotent() {
    let gateway = board();
    let mut controller = loaded(&gateway).await;
    let before = controller.tasks().len();

    controller.apply_push_event(PushEvent::Deletion(TaskId(3)));
    assert_eq!(controller.tasks().len(), before - 1);

    controller.apply_push_event(PushEvent::Deletion(TaskId(3)));
    assert_eq!(controller.tasks().len(), before - 1);
}

#[tokio::test]
async fn legacy_deletion_payload_removes_task_without_notification() {
    let gateway = board();
    let mut controller = loaded(&gateway).await;

    let event = decode_push_payload("\"deleted:2\"").unwrap();
    controller.apply_push_event(event);

    assert!(controller.tasks().iter().all(|t| t.id != TaskId(2)));
    assert_eq!(controller.notifications().count(), 0);
}

#[tokio::test]
async fn selection_filters_to_exactly_matching_tasks() {
    let gateway = board();
    let mut controller = loaded(&gateway).await;
    let all = controller.tasks().to_vec();

    controller.set_selection(Some(ProjectId(9))).await.unwrap();

    assert_eq!(titles(controller.tasks()), vec!["draft copy", "publish"]);
    assert!(controller.tasks().iter().all(|t| all.contains(t)));
    assert!(controller
        .tasks()
        .iter()
        .all(|t| t.project_id() == Some(ProjectId(9))));

    controller.set_selection(None).await.unwrap();
    assert_eq!(controller.tasks().len(), 4);
}

#[tokio::test]
async fn upsert_outside_selection_is_not_inserted_and_moves_out() {
    let gateway = board();
    let mut controller = loaded(&gateway).await;
    controller.set_selection(Some(ProjectId(9))).await.unwrap();

    controller.apply_push_event(PushEvent::Upsert(task(50, "elsewhere", Some(10))));
    assert_eq!(titles(controller.tasks()), vec!["draft copy", "publish"]);

    controller.apply_push_event(PushEvent::Upsert(task(1, "draft copy", Some(10))));
    assert_eq!(titles(controller.tasks()), vec!["publish"]);
    assert_eq!(controller.notifications().count(), 2);
}

#[tokio::test]
async fn status_update_then_reload_changes_only_status() {
    let gateway = Arc::new(FakeGateway::new(
        vec![project(9, "Website")],
        vec![
            task(1, "draft copy", Some(9)),
            {
                let mut done = task(2, "publish", Some(9));
                done.status = TaskStatus::Done;
                done
            },
        ],
    ));
    let mut controller = loaded(&gateway).await;
    controller.set_selection(Some(ProjectId(9))).await.unwrap();
    assert_eq!(controller.tasks().len(), 2);
    let before = controller.tasks()[0].clone();

    let status: TaskStatus = "IN_PROGRESS".parse().unwrap();
    controller.update_task_status(TaskId(1), status).await.unwrap();

    let after = controller
        .tasks()
        .iter()
        .find(|t| t.id == TaskId(1))
        .unwrap();
    assert_eq!(after.status, TaskStatus::InProgress);
    assert_eq!(after.title, before.title);
    assert_eq!(after.description, before.description);
    assert_eq!(after.project, before.project);
    assert_eq!(
        gateway.calls().last(),
        Some(&Call::FetchTasks(Some(ProjectId(9))))
    );
}

#[tokio::test]
async fn create_task_notifies_and_reloads() {
    let gateway = board();
    let mut controller = loaded(&gateway).await;

    controller
        .create_task("write tests", None, Some(ProjectId(9)))
        .await
        .unwrap();

    assert!(controller.tasks().iter().any(|t| t.title == "write tests"));
    let messages: Vec<&str> = controller
        .notifications()
        .map(|n| n.message.as_str())
        .collect();
    assert_eq!(messages, vec!["task created: write tests"]);
    let calls = gateway.calls();
    assert_eq!(
        calls[calls.len() - 2..],
        [
            Call::CreateTask("write tests".to_string(), Some(ProjectId(9))),
            Call::FetchTasks(None)
        ]
    );
}

#[tokio::test]
async fn create_project_reloads_projects() {
    let gateway = board();
    let mut controller = loaded(&gateway).await;

    controller
        .create_project("Research", Some("  ".to_string()))
        .await
        .unwrap();

    assert_eq!(controller.projects().len(), 3);
    assert_eq!(controller.projects()[2].name, "Research");
    assert_eq!(controller.projects()[2].description, None);
    assert_eq!(controller.notifications().count(), 0);
}

#[tokio::test]
async fn blank_input_is_rejected_before_any_request() {
    let gateway = board();
    let mut controller = loaded(&gateway).await;
    let calls_before = gateway.calls().len();

    let err = controller.create_project("   ", None).await.unwrap_err();
    assert_eq!(err, SyncError::Validation(ValidationError::EmptyProjectName));
    let err = controller.create_task("", None, None).await.unwrap_err();
    assert_eq!(err, SyncError::Validation(ValidationError::EmptyTaskTitle));

    assert_eq!(gateway.calls().len(), calls_before);
}

#[tokio::test]
async fn gateway_failure_keeps_prior_state() {
    let gateway = board();
    let mut controller = loaded(&gateway).await;
    let snapshot = controller.snapshot();
    let failure = GatewayError::Server {
        status: 500,
        body: "boom".to_string(),
    };
    gateway.fail_with(Some(failure.clone()));

    assert_eq!(controller.load_tasks().await, Err(failure.clone()));
    assert_eq!(controller.load_projects().await, Err(failure.clone()));
    let err = controller
        .create_task("never", None, None)
        .await
        .unwrap_err();
    assert_eq!(err, SyncError::Gateway(failure));

    assert_eq!(controller.snapshot(), snapshot);
}

#[tokio::test]
async fn superseded_task_load_is_discarded() {
    let gateway = board();
    let mut controller = SyncController::new(Arc::clone(&gateway));

    let stale = controller.begin_task_load();
    let fresh = controller.select(Some(ProjectId(10)));

    let applied = controller
        .finish_task_load(fresh, Ok(vec![task(3, "rotate keys", Some(10))]))
        .unwrap();
    assert_eq!(applied, LoadOutcome::Applied);

    let discarded = controller
        .finish_task_load(stale, Ok(vec![task(1, "draft copy", Some(9))]))
        .unwrap();
    assert_eq!(discarded, LoadOutcome::Superseded);
    assert_eq!(titles(controller.tasks()), vec!["rotate keys"]);

    let late_error = controller.finish_task_load(
        stale,
        Err(GatewayError::Transport("timeout".to_string())),
    );
    assert_eq!(late_error, Ok(LoadOutcome::Superseded));
}

#[tokio::test]
async fn superseded_project_load_is_discarded() {
    let gateway = board();
    let mut controller = SyncController::new(Arc::clone(&gateway));

    let first = controller.begin_project_load();
    let second = controller.begin_project_load();
    controller
        .finish_project_load(second, Ok(vec![project(1, "new")]))
        .unwrap();
    let outcome = controller
        .finish_project_load(first, Ok(vec![project(2, "old")]))
        .unwrap();

    assert_eq!(outcome, LoadOutcome::Superseded);
    assert_eq!(controller.projects()[0].name, "new");
}

#[tokio::test]
async fn shutdown_discards_results_events_and_commands() {
    let gateway = board();
    let mut controller = loaded(&gateway).await;
    let ticket = controller.begin_task_load();
    let snapshot = controller.snapshot();

    controller.shutdown();

    assert_eq!(
        controller.finish_task_load(ticket, Ok(Vec::new())),
        Ok(LoadOutcome::Defunct)
    );
    controller.apply_push_event(PushEvent::Deletion(TaskId(1)));
    controller.apply_push_event(PushEvent::Upsert(task(77, "late", None)));
    assert_eq!(
        controller.create_project("late", None).await,
        Err(SyncError::Defunct)
    );
    assert_eq!(controller.snapshot(), snapshot);
    assert!(!controller.is_alive());
}

#[tokio::test]
async fn fetched_duplicates_collapse_to_one_task() {
    let gateway = board();
    let mut controller = SyncController::new(Arc::clone(&gateway));
    let ticket = controller.begin_task_load();

    controller
        .finish_task_load(
            ticket,
            Ok(vec![task(1, "a", None), task(1, "b", None), task(2, "c", None)]),
        )
        .unwrap();

    assert_eq!(titles(controller.tasks()), vec!["b", "c"]);
}

#[tokio::test]
async fn snapshots_are_published_on_change() {
    let gateway = board();
    let mut controller = SyncController::new(Arc::clone(&gateway));
    let mut view = controller.subscribe();

    controller.load_tasks().await.unwrap();
    assert!(view.has_changed().unwrap());
    let snapshot = view.borrow_and_update().clone();
    assert_eq!(snapshot.tasks.len(), 4);
    assert!(snapshot.revision > 0);

    controller.apply_push_event(PushEvent::Deletion(TaskId(999)));
    assert!(!view.has_changed().unwrap());
}

#[tokio::test(start_paused = true)]
async fn notifications_expire_after_ttl() {
    let gateway = board();
    let mut controller = SyncController::with_notification_ttl(gateway, Duration::from_secs(5));
    let start = Instant::now();

    controller.apply_push_event_at(PushEvent::Upsert(task(1, "a", None)), start);

    controller.expire_notifications(start + Duration::from_secs(1));
    assert_eq!(controller.notifications().count(), 1);
    assert_eq!(
        controller.next_notification_expiry(),
        Some(start + Duration::from_secs(5))
    );

    controller.expire_notifications(start + Duration::from_secs(6));
    assert_eq!(controller.notifications().count(), 0);
    assert_eq!(controller.next_notification_expiry(), None);
}
