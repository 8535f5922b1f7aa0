mod common;

use common::{project, task, titles, Call, FakeGateway};
use desklight_core::{
    ChannelState, Command, GatewayError, ProjectId, PushEvent, Runtime, SyncController,
    SyncError, TaskId, TaskStatus, ValidationError, OUTCOME_BUFFER,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

fn board() -> Arc<FakeGateway> {
    Arc::new(FakeGateway::new(
        vec![project(9, "Website"), project(10, "Ops")],
        vec![
            task(1, "draft copy", Some(9)),
            task(2, "publish", Some(9)),
            task(3, "rotate keys", Some(10)),
        ],
    ))
}

#[tokio::test]
async fn loads_on_start_and_applies_commands() {
    let gateway = board();
    let (runtime, mut handle) = Runtime::new(SyncController::new(Arc::clone(&gateway)));
    let join = tokio::spawn(runtime.run());
    let mut view = handle.view();

    view.wait_for(|s| s.projects.len() == 2 && s.tasks.len() == 3)
        .await
        .unwrap();

    handle
        .send(Command::SelectProject(Some(ProjectId(10))))
        .await
        .unwrap();
    view.wait_for(|s| s.selection == Some(ProjectId(10)) && titles(&s.tasks) == ["rotate keys"])
        .await
        .unwrap();

    handle
        .send(Command::CreateTask {
            title: "renew certs".to_string(),
            description: None,
            project_id: Some(ProjectId(10)),
        })
        .await
        .unwrap();
    let outcome = handle.next_outcome().await.unwrap();
    assert_eq!(outcome.command, "create_task");
    assert_eq!(outcome.result, Ok(()));

    let snapshot = view
        .wait_for(|s| s.tasks.iter().any(|t| t.title == "renew certs"))
        .await
        .unwrap()
        .clone();
    assert!(snapshot
        .notifications
        .iter()
        .any(|n| n.message == "task created: renew certs"));

    handle.send(Command::Shutdown).await.unwrap();
    let controller = join.await.unwrap();
    assert!(!controller.is_alive());
    assert!(gateway
        .calls()
        .contains(&Call::CreateTask("renew certs".to_string(), Some(ProjectId(10)))));
}

#[tokio::test]
async fn reports_rejected_and_failed_commands() {
    let gateway = board();
    let (runtime, mut handle) = Runtime::new(SyncController::new(Arc::clone(&gateway)));
    let join = tokio::spawn(runtime.run());

    handle
        .send(Command::CreateProject {
            name: "  ".to_string(),
            description: None,
        })
        .await
        .unwrap();
    let outcome = handle.next_outcome().await.unwrap();
    assert_eq!(
        outcome.result,
        Err(SyncError::Validation(ValidationError::EmptyProjectName))
    );

    let failure = GatewayError::Transport("connection reset".to_string());
    gateway.fail_with(Some(failure.clone()));
    handle
        .send(Command::UpdateTaskStatus {
            task_id: TaskId(1),
            status: TaskStatus::Done,
        })
        .await
        .unwrap();
    let outcome = handle.next_outcome().await.unwrap();
    assert_eq!(outcome.command, "update_task_status");
    assert_eq!(outcome.result, Err(SyncError::Gateway(failure)));

    handle.shutdown();
    join.await.unwrap();
    assert!(handle.send(Command::Reload).await.is_err());
}

#[tokio::test]
async fn applies_push_events_and_reloads_after_resubscribe() {
    let gateway = board();
    let (mut runtime, handle) = Runtime::new(SyncController::new(Arc::clone(&gateway)));
    let (events_tx, events_rx) = mpsc::channel(8);
    let (state_tx, state_rx) = watch::channel(ChannelState::Subscribed);
    runtime.attach_push(events_rx, state_rx);
    let join = tokio::spawn(runtime.run());
    let mut view = handle.view();

    view.wait_for(|s| s.tasks.len() == 3).await.unwrap();

    events_tx.send(PushEvent::Deletion(TaskId(2))).await.unwrap();
    view.wait_for(|s| s.tasks.len() == 2).await.unwrap();

    // Missed while disconnected; only a reload can surface it.
    gateway.put_task(task(8, "missed", Some(9)));
    state_tx.send(ChannelState::Disconnected).unwrap();
    state_tx.send(ChannelState::Subscribed).unwrap();
    view.wait_for(|s| s.tasks.iter().any(|t| t.title == "missed"))
        .await
        .unwrap();

    handle.shutdown();
    join.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn expires_notifications_on_the_runtime_timer() {
    let gateway = board();
    let controller = SyncController::with_notification_ttl(gateway, Duration::from_secs(5));
    let (mut runtime, handle) = Runtime::new(controller);
    let (events_tx, events_rx) = mpsc::channel(8);
    let (_state_tx, state_rx) = watch::channel(ChannelState::Subscribed);
    runtime.attach_push(events_rx, state_rx);
    let join = tokio::spawn(runtime.run());
    let mut view = handle.view();
    view.wait_for(|s| s.tasks.len() == 3).await.unwrap();

    let start = Instant::now();
    events_tx
        .send(PushEvent::Upsert(task(1, "draft copy v2", Some(9))))
        .await
        .unwrap();
    view.wait_for(|s| s.notifications.len() == 1).await.unwrap();
    view.wait_for(|s| s.notifications.is_empty()).await.unwrap();

    assert!(Instant::now() >= start + Duration::from_secs(5));
    assert_eq!(
        titles(&view.borrow().tasks),
        vec!["draft copy v2", "publish", "rotate keys"]
    );

    handle.shutdown();
    join.await.unwrap();
}

#[tokio::test]
async fn unread_outcomes_do_not_stall_the_loop() {
    let gateway = board();
    let (runtime, mut handle) = Runtime::new(SyncController::new(Arc::clone(&gateway)));
    let join = tokio::spawn(runtime.run());
    let mut view = handle.view();
    view.wait_for(|s| s.tasks.len() == 3).await.unwrap();

    let updates = OUTCOME_BUFFER + 8;
    for _ in 0..updates {
        handle
            .send(Command::UpdateTaskStatus {
                task_id: TaskId(1),
                status: TaskStatus::Done,
            })
            .await
            .unwrap();
    }
    handle
        .send(Command::CreateTask {
            title: "after the flood".to_string(),
            description: None,
            project_id: Some(ProjectId(9)),
        })
        .await
        .unwrap();
    view.wait_for(|s| s.tasks.iter().any(|t| t.title == "after the flood"))
        .await
        .unwrap();

    let status_calls = gateway
        .calls()
        .iter()
        .filter(|call| matches!(call, Call::UpdateStatus(TaskId(1), TaskStatus::Done)))
        .count();
    assert_eq!(status_calls, updates);

    handle.send(Command::Shutdown).await.unwrap();
    join.await.unwrap();
    let mut delivered = 0;
    while handle.next_outcome().await.is_some() {
        delivered += 1;
    }
    assert_eq!(delivered, OUTCOME_BUFFER);
}

#[test]
fn only_mutating_commands_report_outcomes() {
    assert!(Command::CreateProject {
        name: "Ops".to_string(),
        description: None,
    }
    .reports_outcome());
    assert!(Command::UpdateTaskStatus {
        task_id: TaskId(1),
        status: TaskStatus::Todo,
    }
    .reports_outcome());
    assert!(!Command::Reload.reports_outcome());
    assert!(!Command::SelectProject(None).reports_outcome());
    assert!(!Command::Shutdown.reports_outcome());
}
