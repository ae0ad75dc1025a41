use codebox::{ExecutionRequest, Outcome};

use super::{dispatcher, fixture_source, test_config};

#[tokio::test]
#[ignore = "requires docker"]
async fn test_infinite_loop_times_out() {
    let mut config = test_config();
    config.default_limits.wall_time_limit = Some(2.0);
    let dispatcher = dispatcher(&config);

    let request = ExecutionRequest::new(fixture_source("infinite_loop.py"), "python").unwrap();
    let result = dispatcher.submit(request).await;

    assert_eq!(result.outcome, Outcome::TimedOut);
    assert_eq!(result.output, "Execution timed out (limit: 2 seconds)");
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_network_is_disabled() {
    let dispatcher = dispatcher(&test_config());

    let request = ExecutionRequest::new(fixture_source("network.py"), "python").unwrap();
    let result = dispatcher.submit(request).await;

    assert_eq!(result.outcome, Outcome::Failed);
    assert!(!result.output.contains("connected"));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_memory_limit_kills_program() {
    let dispatcher = dispatcher(&test_config());

    let request = ExecutionRequest::new(fixture_source("memory_hog.py"), "python").unwrap();
    let result = dispatcher.submit(request).await;

    assert_eq!(result.outcome, Outcome::Failed);
}
