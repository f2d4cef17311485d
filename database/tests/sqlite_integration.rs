//! Integration tests exercising the SQLite adapter under concurrency and
//! against a file-backed database.

use database::SqliteDispatchStore;
use dispatch_core::{
    models::{AgentStatus, NewAgent, NewTask, TaskStatus},
    repository::{AgentStore, TaskStore},
};

async fn file_backed_store(dir: &tempfile::TempDir) -> SqliteDispatchStore {
    let path = dir.path().join("dispatch.sqlite");
    let store = SqliteDispatchStore::new(&format!("sqlite://{}", path.display()))
        .await
        .unwrap();
    store.migrate().await.unwrap();
    store
}

#[tokio::test]
async fn concurrent_claims_take_distinct_agents() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_backed_store(&dir).await;

    for name in ["a", "b", "c"] {
        AgentStore::create(&store, NewAgent::new("proj-1", "coder", name, "m"))
            .await
            .unwrap();
    }

    // Five concurrent claims race for three idle coders
    let mut handles = Vec::new();
    for _ in 0..5 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.claim_agent("proj-1", "coder").await.unwrap()
        }));
    }

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let claimed: Vec<i64> = results.iter().flatten().map(|agent| agent.id).collect();
    assert_eq!(claimed.len(), 3, "exactly the three idle agents get claimed");
    let mut unique = claimed.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), 3, "no agent is handed out twice");
    assert_eq!(results.iter().filter(|r| r.is_none()).count(), 2);
}

#[tokio::test]
async fn concurrent_cas_lets_exactly_one_transition_win() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_backed_store(&dir).await;

    let task = TaskStore::create(&store, NewTask::new("proj-1", "T", "d"))
        .await
        .unwrap();
    TaskStore::update_status(&store, task.id, TaskStatus::Backlog, TaskStatus::Ready)
        .await
        .unwrap();
    TaskStore::update_status(&store, task.id, TaskStatus::Ready, TaskStatus::InProgress)
        .await
        .unwrap();

    // Two stale clients both try InProgress → InQA
    let mut handles = Vec::new();
    for _ in 0..2 {
        let store = store.clone();
        let id = task.id;
        handles.push(tokio::spawn(async move {
            TaskStore::update_status(&store, id, TaskStatus::InProgress, TaskStatus::InQa).await
        }));
    }

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1, "exactly one CAS wins");
    let loss = results.into_iter().find(|r| r.is_err()).unwrap().unwrap_err();
    assert!(loss.is_cas_failed());
}

#[tokio::test]
async fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let task_id = {
        let store = file_backed_store(&dir).await;
        let agent = AgentStore::create(&store, NewAgent::new("proj-1", "qa", "quinn", "m"))
            .await
            .unwrap();
        let task = TaskStore::create(&store, NewTask::new("proj-1", "T", "d"))
            .await
            .unwrap();
        TaskStore::update_status(&store, task.id, TaskStatus::Backlog, TaskStatus::Ready)
            .await
            .unwrap();
        TaskStore::assign(&store, task.id, agent.id).await.unwrap();
        AgentStore::update_status(&store, agent.id, AgentStatus::Offline)
            .await
            .unwrap();
        task.id
    };

    // A fresh process finds the offline holder through the orphan scan view
    let store = file_backed_store(&dir).await;
    let task = TaskStore::get_by_id(&store, task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Ready);
    assert!(task.assigned_agent_id.is_some());
}
