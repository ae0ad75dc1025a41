use std::time::Duration;

use codebox::{ExecutionRequest, Outcome};

use super::{start, test_config};

#[tokio::test]
async fn test_infinite_loop_times_out_and_cleans_up() {
    let (dispatcher, backend) = start(&test_config(0.2, 5.0));

    let result = dispatcher
        .submit(ExecutionRequest::new("hang", "python").unwrap())
        .await;

    assert_eq!(result.outcome, Outcome::TimedOut);
    assert_eq!(result.output, "Execution timed out (limit: 0.2 seconds)");

    let id = result.task_id.unwrap();
    assert!(backend.removed().contains(&format!("codebox-{id}")));

    let paths = backend.source_paths();
    assert_eq!(paths.len(), 1);
    assert!(!paths[0].parent().unwrap().exists());
}

#[tokio::test]
async fn test_caller_timeout_tears_down_environment() {
    let (dispatcher, backend) = start(&test_config(5.0, 0.2));

    let result = dispatcher
        .submit(ExecutionRequest::new("hang", "ruby").unwrap())
        .await;

    assert_eq!(result.outcome, Outcome::DispatcherTimeout);
    assert_eq!(
        result.output,
        "Execution did not complete within 0.2 seconds."
    );

    let name = format!("codebox-{}", result.task_id.unwrap());
    assert!(
        backend
            .wait_for_removal(&name, Duration::from_secs(2))
            .await,
        "environment should be removed once the caller gives up"
    );
    assert_eq!(backend.live(), 0);
}

#[tokio::test]
async fn test_explicit_cancel_tears_down_environment() {
    let (dispatcher, backend) = start(&test_config(5.0, 10.0));

    let handle = dispatcher
        .enqueue(ExecutionRequest::new("hang", "python").unwrap())
        .await
        .unwrap();
    let name = format!("codebox-{}", handle.id());

    // Let a worker pick the task up before giving up on it
    while backend.runs() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle.cancel();

    assert!(
        backend
            .wait_for_removal(&name, Duration::from_secs(2))
            .await
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!backend.source_paths()[0].exists());
    assert_eq!(backend.live(), 0);
}

#[tokio::test]
async fn test_handle_wait_bound() {
    let (dispatcher, _backend) = start(&test_config(5.0, 10.0));

    let handle = dispatcher
        .enqueue(ExecutionRequest::new("sleep 2000\nprint late", "python").unwrap())
        .await
        .unwrap();
    let id = handle.id();
    let result = handle.wait(Duration::from_millis(100)).await;

    assert_eq!(result.outcome, Outcome::DispatcherTimeout);
    assert_eq!(result.task_id, Some(id));
}
