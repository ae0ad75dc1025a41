use std::sync::Arc;
use std::time::Duration;

use codebox::{ExecutionRequest, Executor, Outcome};
use tokio::task::JoinSet;

use super::{start, start_on, test_config};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_more_tasks_than_workers() {
    let mut config = test_config(5.0, 10.0);
    config.dispatcher.workers = 2;
    let (dispatcher, backend) = start(&config);
    let dispatcher = Arc::new(dispatcher);

    let mut tasks = JoinSet::new();
    for i in 0..8 {
        let dispatcher = dispatcher.clone();
        tasks.spawn(async move {
            let code = format!("sleep 30\nprint task-{i}");
            let result = dispatcher
                .submit(ExecutionRequest::new(code, "python").unwrap())
                .await;
            (i, result)
        });
    }

    let mut seen = 0;
    while let Some(joined) = tasks.join_next().await {
        let (i, result) = joined.unwrap();
        assert_eq!(result.outcome, Outcome::Succeeded);
        assert_eq!(result.output, format!("task-{i}\n"));
        seen += 1;
    }

    assert_eq!(seen, 8);
    assert_eq!(backend.runs(), 8);
    assert!(backend.peak() <= 2, "peak concurrency {}", backend.peak());
    assert_eq!(backend.removed().len(), 8);
}

#[tokio::test]
async fn test_correlation_ids_are_unique() {
    let (dispatcher, _backend) = start(&test_config(5.0, 10.0));

    let mut ids = Vec::new();
    for _ in 0..5 {
        let handle = dispatcher
            .enqueue(ExecutionRequest::new("print x", "ruby").unwrap())
            .await
            .unwrap();
        ids.push(handle.id());
        handle.wait(Duration::from_secs(5)).await;
    }

    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5);
}

#[tokio::test]
async fn test_worker_panic_is_contained() {
    let mut config = test_config(5.0, 10.0);
    config.dispatcher.workers = 1;
    let (dispatcher, backend) = start(&config);

    let crashed = dispatcher
        .submit(ExecutionRequest::new("panic", "python").unwrap())
        .await;
    assert_eq!(crashed.outcome, Outcome::Aborted);

    // The environment is still reclaimed
    let name = format!("codebox-{}", crashed.task_id.unwrap());
    assert!(
        backend
            .wait_for_removal(&name, Duration::from_secs(2))
            .await
    );

    // The only worker keeps serving
    let result = dispatcher
        .submit(ExecutionRequest::new("print alive", "python").unwrap())
        .await;
    assert_eq!(result.output, "alive\n");
}

#[tokio::test]
async fn test_shutdown_drains_queue() {
    let mut config = test_config(5.0, 10.0);
    config.dispatcher.workers = 1;
    let (dispatcher, backend) = start(&config);

    let mut handles = Vec::new();
    for i in 0..3 {
        let request = ExecutionRequest::new(format!("print {i}"), "python").unwrap();
        handles.push(dispatcher.enqueue(request).await.unwrap());
    }

    dispatcher.shutdown().await;
    assert_eq!(backend.runs(), 3);

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.wait(Duration::from_millis(100)).await;
        assert_eq!(result.output, format!("{i}\n"));
    }
}

#[tokio::test]
async fn test_reap_at_start_up_spares_running_peer() {
    let config = test_config(5.0, 10.0);
    let (running, backend) = start(&config);

    let handle = running
        .enqueue(ExecutionRequest::new("hang", "python").unwrap())
        .await
        .unwrap();
    while backend.runs() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // A second process starting against the same daemon
    let starting = Executor::new(backend.clone(), &config);
    assert_eq!(starting.reap_orphans().await.unwrap(), 0);
    assert_eq!(backend.live(), 1);
    assert!(backend.removed().is_empty());

    let second = start_on(&config, backend.clone());
    let result = second
        .submit(ExecutionRequest::new("print side by side", "ruby").unwrap())
        .await;
    assert_eq!(result.output, "side by side\n");

    handle.cancel();
    running.shutdown().await;
    assert_eq!(backend.live(), 0);
}
