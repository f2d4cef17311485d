//! End-to-end scheduler scenarios on the in-memory store: the happy path
//! through every role, bounce-back routing, FIFO sweeps, and failure
//! tolerance of best-effort side effects.

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::{
    events::{EventBus, EventChannel},
    models::{AgentStatus, NewAgent, NewTask, TaskStatus},
    pipeline::PipelineConfig,
    ports::PushMessage,
    repository::{AgentStore, TaskStore},
    DispatchError, Event, InProcessEventBus,
};
use mocks::{AgentBuilder, MockDispatchStore, RecordingAgentNotifier, RecordingRoleNotifier, TaskBuilder};
use scheduler::{AgentLifecycle, KeyedLocks, Scheduler, StoreDistributor};

struct Harness {
    store: Arc<MockDispatchStore>,
    agent_notifier: Arc<RecordingAgentNotifier>,
    role_notifier: Arc<RecordingRoleNotifier>,
    bus: Arc<InProcessEventBus>,
    dispatcher: Scheduler,
    lifecycle: AgentLifecycle,
}

fn harness() -> Harness {
    let store = Arc::new(MockDispatchStore::new());
    let agent_notifier = Arc::new(RecordingAgentNotifier::new());
    let role_notifier = Arc::new(RecordingRoleNotifier::new());
    let bus = Arc::new(InProcessEventBus::new());

    let tasks: Arc<dyn TaskStore> = store.clone();
    let agents: Arc<dyn AgentStore> = store.clone();
    let dispatcher = Scheduler::new(
        tasks,
        agents.clone(),
        Arc::new(StoreDistributor::new(agents)),
        agent_notifier.clone(),
        role_notifier.clone(),
        bus.clone(),
        Arc::new(KeyedLocks::new()),
        PipelineConfig::standard(),
    );
    let lifecycle = AgentLifecycle::new(dispatcher.clone());

    Harness {
        store,
        agent_notifier,
        role_notifier,
        bus,
        dispatcher,
        lifecycle,
    }
}

/// Let detached background work (scheduled sweeps) run to completion.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

async fn task_by_id(store: &MockDispatchStore, id: i64) -> dispatch_core::Task {
    TaskStore::get_by_id(store, id).await.unwrap().unwrap()
}

async fn agent_by_id(store: &MockDispatchStore, id: i64) -> dispatch_core::Agent {
    AgentStore::get_by_id(store, id).await.unwrap().unwrap()
}

#[tokio::test(start_paused = true)]
async fn happy_path_routes_task_through_every_role() {
    let h = harness();
    let mut completions = h.bus.subscribe(EventChannel::Task);

    let coder = h.lifecycle.register(NewAgent::new("proj-1", "coder", "alice", "m")).await.unwrap();
    let qa = h.lifecycle.register(NewAgent::new("proj-1", "qa", "quinn", "m")).await.unwrap();
    let reviewer = h.lifecycle.register(NewAgent::new("proj-1", "reviewer", "rose", "m")).await.unwrap();
    settle().await;

    let task = h
        .dispatcher
        .create_task(NewTask::new("proj-1", "Fix login", "The login form 500s"))
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Backlog);

    // Scheduling hands the task to the idle coder
    let task = h.dispatcher.update_status(task.id, TaskStatus::Backlog, TaskStatus::Ready).await.unwrap();
    assert_eq!(task.assigned_agent_id, Some(coder.id));
    assert_eq!(
        h.agent_notifier.pushes_for(coder.id),
        vec![PushMessage::TaskAssigned { task_id: task.id }]
    );

    // The coder starts work: timestamps and authorship are captured
    let task = h.dispatcher.update_status(task.id, TaskStatus::Ready, TaskStatus::InProgress).await.unwrap();
    assert!(task.started_at.is_some());
    assert_eq!(task.coder_id, Some(coder.id));

    // Hand-off to QA
    let task = h.dispatcher.update_status(task.id, TaskStatus::InProgress, TaskStatus::InQa).await.unwrap();
    h.lifecycle.set_idle(coder.id).await.unwrap();
    assert_eq!(task.assigned_agent_id, Some(qa.id));
    assert_eq!(
        h.agent_notifier.pushes_for(qa.id),
        vec![PushMessage::TaskAssigned { task_id: task.id }]
    );

    // Hand-off to review
    let task = h.dispatcher.update_status(task.id, TaskStatus::InQa, TaskStatus::InReview).await.unwrap();
    h.lifecycle.set_idle(qa.id).await.unwrap();
    assert_eq!(task.assigned_agent_id, Some(reviewer.id));

    // Merge: completion timestamp, completion event, role broadcast
    let task = h.dispatcher.update_status(task.id, TaskStatus::InReview, TaskStatus::Merged).await.unwrap();
    assert!(task.completed_at.is_some());

    let broadcasts = h.role_notifier.broadcasts_for("proj-1", "coder");
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0].event, "main_updated");
    assert_eq!(broadcasts[0].merged_task_id, task.id);

    let mut saw_completion = false;
    while let Ok(event) = completions.try_recv() {
        if let Event::TaskCompleted { task_id, .. } = event {
            assert_eq!(task_id, task.id);
            saw_completion = true;
        }
    }
    assert!(saw_completion, "merge must publish a completion event");
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn bounce_back_returns_task_to_its_original_coder() {
    let h = harness();

    let coder = h.lifecycle.register(NewAgent::new("proj-1", "coder", "alice", "m")).await.unwrap();
    let qa = h.lifecycle.register(NewAgent::new("proj-1", "qa", "quinn", "m")).await.unwrap();
    settle().await;

    let task = h.dispatcher.create_task(NewTask::new("proj-1", "T", "d")).await.unwrap();
    h.dispatcher.update_status(task.id, TaskStatus::Backlog, TaskStatus::Ready).await.unwrap();
    h.dispatcher.update_status(task.id, TaskStatus::Ready, TaskStatus::InProgress).await.unwrap();
    h.dispatcher.update_status(task.id, TaskStatus::InProgress, TaskStatus::InQa).await.unwrap();
    h.lifecycle.set_idle(coder.id).await.unwrap();

    // QA rejects the work
    let task = h.dispatcher.update_status(task.id, TaskStatus::InQa, TaskStatus::InProgress).await.unwrap();

    assert_eq!(task.assigned_agent_id, Some(coder.id));
    assert_eq!(
        h.agent_notifier.pushes_for(coder.id).last(),
        Some(&PushMessage::TaskReturned { task_id: task.id })
    );
    let coder = agent_by_id(&h.store, coder.id).await;
    assert_eq!(coder.status, AgentStatus::Working);
    assert_eq!(coder.current_task_id, Some(task.id));

    // QA stays on its own record; nothing was pushed to it beyond the
    // original assignment
    assert_eq!(h.agent_notifier.pushes_for(qa.id).len(), 1);
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn bounce_back_prefers_original_coder_over_older_idle_coders() {
    let h = harness();

    // An older idle coder exists, but the task's author gets it back
    h.store.seed_agent(
        AgentBuilder::new().with_id(1).with_role("coder").with_name("older").created_secs_ago(3600).build(),
    );
    h.store.seed_agent(AgentBuilder::new().with_id(2).with_role("coder").with_name("author").build());
    h.store.seed_task(
        TaskBuilder::new().with_id(10).with_status(TaskStatus::InQa).with_coder(2).build(),
    );

    let task = h.dispatcher.update_status(10, TaskStatus::InQa, TaskStatus::InProgress).await.unwrap();
    assert_eq!(task.assigned_agent_id, Some(2));
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn bounce_back_falls_back_to_any_idle_coder_when_author_is_busy() {
    let h = harness();

    let author = h.lifecycle.register(NewAgent::new("proj-1", "coder", "alice", "m")).await.unwrap();
    settle().await;

    let task = h.dispatcher.create_task(NewTask::new("proj-1", "T", "d")).await.unwrap();
    h.dispatcher.update_status(task.id, TaskStatus::Backlog, TaskStatus::Ready).await.unwrap();
    h.dispatcher.update_status(task.id, TaskStatus::Ready, TaskStatus::InProgress).await.unwrap();
    h.dispatcher.update_status(task.id, TaskStatus::InProgress, TaskStatus::InQa).await.unwrap();

    // The author picked up something else in the meantime
    let other = h.dispatcher.create_task(NewTask::new("proj-1", "Other", "d")).await.unwrap();
    h.lifecycle.set_working(author.id, other.id).await.unwrap();

    let fallback = h.lifecycle.register(NewAgent::new("proj-1", "coder", "bob", "m")).await.unwrap();
    settle().await;

    let task = h.dispatcher.update_status(task.id, TaskStatus::InQa, TaskStatus::InProgress).await.unwrap();
    assert_eq!(task.assigned_agent_id, Some(fallback.id));
    assert_eq!(
        h.agent_notifier.pushes_for(fallback.id),
        vec![PushMessage::TaskAssigned { task_id: task.id }]
    );
    // Authorship is preserved even though someone else now holds the task
    assert_eq!(task.coder_id, Some(author.id));
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn failed_bounce_back_is_recovered_by_the_next_coder_sweep() {
    let h = harness();

    // No idle coders at all: the bounce-back strands the task InProgress
    // and unassigned
    h.store.seed_task(
        TaskBuilder::new().with_id(10).with_status(TaskStatus::InQa).with_coder(99).build(),
    );

    let task = h.dispatcher.update_status(10, TaskStatus::InQa, TaskStatus::InProgress).await.unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert!(task.assigned_agent_id.is_none());
    settle().await;

    // A coder coming online triggers the sweep that picks the stray up;
    // "coder" only appears as the freed role of InProgress, so this is the
    // dual-match path
    let coder = h.lifecycle.register(NewAgent::new("proj-1", "coder", "alice", "m")).await.unwrap();
    settle().await;

    let task = task_by_id(&h.store, 10).await;
    assert_eq!(task.assigned_agent_id, Some(coder.id));
    assert_eq!(
        h.agent_notifier.pushes_for(coder.id),
        vec![PushMessage::TaskAssigned { task_id: 10 }]
    );
}

#[tokio::test(start_paused = true)]
async fn sweep_assigns_oldest_unassigned_task_first() {
    let h = harness();

    // Three QA-stage tasks of increasing age, one QA agent busy on the first
    h.store.seed_task(
        TaskBuilder::new().with_id(1).with_status(TaskStatus::InQa).with_assignee(7).created_secs_ago(300).build(),
    );
    h.store.seed_task(
        TaskBuilder::new().with_id(2).with_status(TaskStatus::InQa).created_secs_ago(200).build(),
    );
    h.store.seed_task(
        TaskBuilder::new().with_id(3).with_status(TaskStatus::InQa).created_secs_ago(100).build(),
    );
    h.store.seed_agent(
        AgentBuilder::new().with_id(7).with_role("qa").with_status(AgentStatus::Working).with_current_task(1).build(),
    );

    // QA finishes the first task, freeing its slot
    h.dispatcher.update_status(1, TaskStatus::InQa, TaskStatus::InReview).await.unwrap();
    h.lifecycle.set_idle(7).await.unwrap();
    settle().await;

    // The sweep scheduled by the transition places the older of the two
    // waiting tasks; the newest keeps waiting
    assert_eq!(task_by_id(&h.store, 2).await.assigned_agent_id, Some(7));
    assert!(task_by_id(&h.store, 3).await.assigned_agent_id.is_none());
}

#[tokio::test(start_paused = true)]
async fn sweep_skips_tasks_with_unmerged_dependencies() {
    let h = harness();

    h.store.seed_task(TaskBuilder::new().with_id(1).with_status(TaskStatus::InProgress).build());
    h.store.seed_task(
        TaskBuilder::new().with_id(2).with_status(TaskStatus::InQa).created_secs_ago(100).build(),
    );
    h.store.seed_task(TaskBuilder::new().with_id(3).with_status(TaskStatus::InQa).build());
    h.store.seed_agent(AgentBuilder::new().with_id(7).with_role("qa").build());

    // The older QA task is blocked on unmerged work
    h.store.add_dependency(2, 1).await.unwrap();

    h.dispatcher.sweep_unassigned("proj-1", "qa").await.unwrap();

    assert!(task_by_id(&h.store, 2).await.assigned_agent_id.is_none());
    assert_eq!(task_by_id(&h.store, 3).await.assigned_agent_id, Some(7));
}

#[tokio::test(start_paused = true)]
async fn invalid_transition_is_rejected_without_side_effects() {
    let h = harness();
    let mut events = h.bus.subscribe(EventChannel::Task);

    h.store.seed_task(TaskBuilder::new().with_id(10).with_status(TaskStatus::Merged).build());

    let result = h.dispatcher.update_status(10, TaskStatus::Merged, TaskStatus::InProgress).await;
    assert_eq!(
        result.unwrap_err(),
        DispatchError::invalid_transition(TaskStatus::Merged, TaskStatus::InProgress)
    );

    // No state change, no events, no pushes
    assert_eq!(task_by_id(&h.store, 10).await.status, TaskStatus::Merged);
    assert!(events.try_recv().is_err());
    assert!(h.agent_notifier.pushes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stale_concurrent_transition_loses_with_cas_failure() {
    let h = harness();
    h.store.seed_task(TaskBuilder::new().with_id(10).with_status(TaskStatus::InProgress).build());

    let first = h.dispatcher.update_status(10, TaskStatus::InProgress, TaskStatus::InQa).await;
    assert!(first.is_ok());

    // The second client raced on the same transition and lost
    let second = h.dispatcher.update_status(10, TaskStatus::InProgress, TaskStatus::InQa).await;
    assert_eq!(
        second.unwrap_err(),
        DispatchError::cas_failed(10, TaskStatus::InProgress)
    );
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_identical_transitions_produce_one_winner() {
    let h = harness();
    h.store.seed_task(TaskBuilder::new().with_id(10).with_status(TaskStatus::InProgress).build());

    let mut handles = Vec::new();
    for _ in 0..2 {
        let dispatcher = h.dispatcher.clone();
        handles.push(tokio::spawn(async move {
            dispatcher.update_status(10, TaskStatus::InProgress, TaskStatus::InQa).await
        }));
    }

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(e) if e.is_cas_failed())));
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn no_idle_agent_leaves_task_unassigned_for_later_sweep() {
    let h = harness();

    let task = h.dispatcher.create_task(NewTask::new("proj-1", "T", "d")).await.unwrap();
    let task = h.dispatcher.update_status(task.id, TaskStatus::Backlog, TaskStatus::Ready).await.unwrap();
    assert!(task.assigned_agent_id.is_none());
    settle().await;

    // A coder registering later picks the task up through the sweep
    let coder = h.lifecycle.register(NewAgent::new("proj-1", "coder", "alice", "m")).await.unwrap();
    settle().await;
    assert_eq!(task_by_id(&h.store, task.id).await.assigned_agent_id, Some(coder.id));
}

#[tokio::test(start_paused = true)]
async fn push_failures_never_fail_the_transition() {
    let h = harness();

    h.lifecycle.register(NewAgent::new("proj-1", "coder", "alice", "m")).await.unwrap();
    settle().await;

    let task = h.dispatcher.create_task(NewTask::new("proj-1", "T", "d")).await.unwrap();

    h.agent_notifier.fail_next();
    let task = h.dispatcher.update_status(task.id, TaskStatus::Backlog, TaskStatus::Ready).await.unwrap();

    // The push was dropped but the assignment is authoritative
    assert!(task.assigned_agent_id.is_some());
    assert!(h.agent_notifier.pushes().is_empty());
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn broadcast_failures_never_fail_the_merge() {
    let h = harness();
    h.store.seed_task(TaskBuilder::new().with_id(10).with_status(TaskStatus::InReview).build());

    h.role_notifier.fail_next();
    let task = h.dispatcher.update_status(10, TaskStatus::InReview, TaskStatus::Merged).await.unwrap();

    assert_eq!(task.status, TaskStatus::Merged);
    assert!(task.completed_at.is_some());
    assert!(h.role_notifier.broadcasts().is_empty());
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn projects_do_not_share_agents() {
    let h = harness();

    // An idle coder in another project must not receive this project's work
    h.lifecycle.register(NewAgent::new("proj-2", "coder", "stranger", "m")).await.unwrap();
    settle().await;

    let task = h.dispatcher.create_task(NewTask::new("proj-1", "T", "d")).await.unwrap();
    let task = h.dispatcher.update_status(task.id, TaskStatus::Backlog, TaskStatus::Ready).await.unwrap();
    assert!(task.assigned_agent_id.is_none());
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn pr_url_updates_are_recorded_and_announced() {
    let h = harness();
    let mut events = h.bus.subscribe(EventChannel::Task);

    let task = h.dispatcher.create_task(NewTask::new("proj-1", "T", "d")).await.unwrap();
    let task = h.dispatcher.set_pr_url(task.id, "https://git.example/pr/1").await.unwrap();
    assert_eq!(task.pr_url.as_deref(), Some("https://git.example/pr/1"));

    let mut saw_update = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, Event::TaskUpdated { task_id, .. } if task_id == task.id) {
            saw_update = true;
        }
    }
    assert!(saw_update, "pr url changes must be announced on the bus");
}

#[tokio::test(start_paused = true)]
async fn heartbeats_touch_the_agent_record() {
    let h = harness();
    let agent = h.lifecycle.register(NewAgent::new("proj-1", "coder", "alice", "m")).await.unwrap();
    settle().await;

    let touched = h.lifecycle.heartbeat(agent.id).await.unwrap();
    assert!(touched.last_heartbeat_at >= agent.last_heartbeat_at);
    assert_eq!(touched.status, agent.status);
}

#[tokio::test(start_paused = true)]
async fn coder_id_is_captured_once_and_survives_the_pipeline() {
    let h = harness();

    let coder = h.lifecycle.register(NewAgent::new("proj-1", "coder", "alice", "m")).await.unwrap();
    let qa = h.lifecycle.register(NewAgent::new("proj-1", "qa", "quinn", "m")).await.unwrap();
    let reviewer = h.lifecycle.register(NewAgent::new("proj-1", "reviewer", "rose", "m")).await.unwrap();
    settle().await;

    let task = h.dispatcher.create_task(NewTask::new("proj-1", "T", "d")).await.unwrap();
    let id = task.id;

    h.dispatcher.update_status(id, TaskStatus::Backlog, TaskStatus::Ready).await.unwrap();
    h.dispatcher.update_status(id, TaskStatus::Ready, TaskStatus::InProgress).await.unwrap();
    h.dispatcher.update_status(id, TaskStatus::InProgress, TaskStatus::InQa).await.unwrap();
    h.lifecycle.set_idle(coder.id).await.unwrap();

    // Bounce back and forth; every observation of coder_id is the author
    h.dispatcher.update_status(id, TaskStatus::InQa, TaskStatus::InProgress).await.unwrap();
    h.lifecycle.set_idle(qa.id).await.unwrap();
    assert_eq!(task_by_id(&h.store, id).await.coder_id, Some(coder.id));

    h.dispatcher.update_status(id, TaskStatus::InProgress, TaskStatus::InQa).await.unwrap();
    h.lifecycle.set_idle(coder.id).await.unwrap();
    h.dispatcher.update_status(id, TaskStatus::InQa, TaskStatus::InReview).await.unwrap();
    h.lifecycle.set_idle(qa.id).await.unwrap();
    let task = h.dispatcher.update_status(id, TaskStatus::InReview, TaskStatus::Merged).await.unwrap();
    let _ = reviewer;

    assert_eq!(task.coder_id, Some(coder.id));
    settle().await;
}
