mod common;

use std::time::Duration;

use chrono::Utc;
use ulid::Ulid;
use warden_core::domain::{
    Command, CommandId, CommandOutcome, CommandType, ExecutionStatus, HostId, ParameterMap,
    Priority, Task, TaskGuard, TaskId, TaskTransition,
};
use warden_core::impls::InMemoryTaskStore;
use warden_core::ports::TaskStore;

use common::{lasting, request, Cluster};

#[tokio::test(start_paused = true)]
async fn crashed_instance_work_moves_to_survivor() {
    let cluster = Cluster::new(2, 1);
    cluster.start().await;
    let id = cluster
        .node(0)
        .submit(lasting(request("jdbc", "postgresql"), 60_000))
        .await
        .unwrap();
    let running = cluster.wait_for_status(id, ExecutionStatus::RunningExecution).await;
    let dead = running.execute_host.clone().unwrap();
    let (crashed, survivor) = if cluster.node(0).host() == &dead {
        (cluster.node(0), cluster.node(1))
    } else {
        (cluster.node(1), cluster.node(0))
    };

    assert_eq!(crashed.halt().await, vec![id]);
    cluster.registry.evict(&dead);

    let moved = cluster
        .wait_for(id, Duration::from_secs(5), |t| {
            t.status == ExecutionStatus::RunningExecution
                && t.execute_host.as_ref() == Some(survivor.host())
        })
        .await;
    assert_eq!(moved.failover_count, 1);

    let starts: Vec<Priority> = cluster
        .store
        .commands_for_task(id)
        .await
        .unwrap()
        .into_iter()
        .filter(|c| c.command_type == CommandType::Start)
        .map(|c| c.priority)
        .collect();
    assert_eq!(starts.len(), 2);
    assert!(starts.contains(&Priority::High));
    assert_eq!(
        cluster.log.hosts_of(id),
        vec![Some(dead.clone()), Some(survivor.host().clone())]
    );

    survivor.cancel(id).await.unwrap();
    cluster.wait_for_status(id, ExecutionStatus::Killed).await;
    survivor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn crash_leaves_live_instances_alone() {
    let cluster = Cluster::new(3, 1);
    cluster.start().await;
    let mut ids = Vec::new();
    for n in 0..3 {
        ids.push(
            cluster
                .node(n)
                .submit(lasting(request("jdbc", "postgresql"), 60_000))
                .await
                .unwrap(),
        );
    }
    for id in &ids {
        cluster.wait_for_status(*id, ExecutionStatus::RunningExecution).await;
    }

    let crashed = cluster.node(0);
    let left = crashed.halt().await;
    assert_eq!(left.len(), 1);
    let orphan = left[0];
    cluster.registry.evict(crashed.host());

    // every survivor is full, so the requeued task waits
    let requeued = cluster
        .wait_for(orphan, Duration::from_secs(5), |t| {
            t.status == ExecutionStatus::SubmittedSuccess
        })
        .await;
    assert_eq!(requeued.failover_count, 1);
    assert!(requeued.execute_host.is_none());

    for id in ids.iter().filter(|id| **id != orphan) {
        let t = cluster.task(*id).await;
        assert_eq!(t.status, ExecutionStatus::RunningExecution);
        assert_eq!(t.failover_count, 0);
        assert_ne!(t.execute_host.as_ref(), Some(crashed.host()));
    }

    for node in &cluster.nodes[1..] {
        node.shutdown().await;
    }
}

#[tokio::test(start_paused = true)]
async fn startup_sweep_recovers_tasks_of_unknown_hosts() {
    let store = InMemoryTaskStore::new();
    let ghost = HostId::new("ghost");
    let orphan = running_on(&store, &ghost).await;

    let cluster = Cluster::over(store, 1, 1);
    cluster.start().await;

    let done = cluster.wait_for_status(orphan, ExecutionStatus::Success).await;
    assert_eq!(done.failover_count, 1);
    assert!(done.execute_host.is_none());
    assert_eq!(
        cluster.log.hosts_of(orphan),
        vec![Some(cluster.node(0).host().clone())]
    );
    cluster.shutdown().await;
}

/// A task left RUNNING_EXECUTION on `host`, its START already resolved.
async fn running_on(store: &InMemoryTaskStore, host: &HostId) -> TaskId {
    let now = Utc::now();
    let task = Task::submitted(
        TaskId::from_ulid(Ulid::new()),
        request("jdbc", "postgresql"),
        ParameterMap::new(),
        now,
    );
    let start = Command::new(
        CommandId::from_ulid(Ulid::new()),
        CommandType::Start,
        Priority::Medium,
        task.id,
        now,
    );
    let (task_id, command_id) = (task.id, start.id);
    store.insert_task(task, start).await.unwrap();
    assert!(store.claim_command(command_id, host, now).await.unwrap());
    store
        .transition(
            task_id,
            TaskGuard::status(ExecutionStatus::SubmittedSuccess),
            TaskTransition::Dispatch { host: host.clone() },
        )
        .await
        .unwrap()
        .unwrap();
    store
        .transition(
            task_id,
            TaskGuard::owned_by(ExecutionStatus::Dispatched, host.clone()),
            TaskTransition::Start { at: now },
        )
        .await
        .unwrap()
        .unwrap();
    assert!(store
        .complete_command(command_id, host, CommandOutcome::Applied)
        .await
        .unwrap());
    task_id
}
