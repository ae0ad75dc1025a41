use codebox::{ExecutionRequest, Outcome};

use super::{start, test_config};

#[tokio::test]
async fn test_hello_world() {
    let (dispatcher, _backend) = start(&test_config(5.0, 10.0));

    let request = ExecutionRequest::new("print hello", "python").unwrap();
    let result = dispatcher.submit(request).await;

    assert_eq!(result.outcome, Outcome::Succeeded);
    assert_eq!(result.output, "hello\n");
    assert_eq!(result.exit_code, Some(0));
}

#[tokio::test]
async fn test_every_language_echoes_output() {
    let (dispatcher, backend) = start(&test_config(5.0, 10.0));

    for language in ["python", "javascript", "ruby"] {
        let request = ExecutionRequest::new(format!("print from {language}"), language).unwrap();
        let result = dispatcher.submit(request).await;
        assert_eq!(result.output.trim_end(), format!("from {language}"));
    }
    assert_eq!(backend.runs(), 3);
}

#[tokio::test]
async fn test_language_is_case_insensitive() {
    let (dispatcher, _backend) = start(&test_config(5.0, 10.0));

    let request = ExecutionRequest::new("print hi", "PyThOn").unwrap();
    let result = dispatcher.submit(request).await;

    assert_eq!(result.outcome, Outcome::Succeeded);
}

#[tokio::test]
async fn test_unsupported_language_never_reaches_backend() {
    let (dispatcher, backend) = start(&test_config(5.0, 10.0));

    let request = ExecutionRequest::new("DISPLAY 'HELLO'.", "cobol").unwrap();
    let result = dispatcher.submit(request).await;

    assert_eq!(result.outcome, Outcome::UnsupportedLanguage);
    assert_eq!(result.output, "Language 'cobol' is not supported yet.");
    assert_eq!(backend.runs(), 0);
    assert!(backend.removed().is_empty());
}

#[tokio::test]
async fn test_runtime_error_returns_stderr() {
    let (dispatcher, backend) = start(&test_config(5.0, 10.0));

    let code = "print partial\nerror ZeroDivisionError: division by zero";
    let result = dispatcher
        .submit(ExecutionRequest::new(code, "python").unwrap())
        .await;

    assert_eq!(result.outcome, Outcome::Failed);
    assert_eq!(result.output, "ZeroDivisionError: division by zero\n");
    assert_eq!(result.exit_code, Some(1));

    // The environment is removed after a failure too
    let id = result.task_id.unwrap();
    assert!(backend.removed().contains(&format!("codebox-{id}")));
}

#[tokio::test]
async fn test_resubmission_yields_same_outcome() {
    let (dispatcher, _backend) = start(&test_config(5.0, 10.0));

    for code in ["print same", "error boom"] {
        let first = dispatcher
            .submit(ExecutionRequest::new(code, "ruby").unwrap())
            .await;
        let second = dispatcher
            .submit(ExecutionRequest::new(code, "ruby").unwrap())
            .await;

        assert_eq!(first.outcome, second.outcome);
        assert_eq!(first.output, second.output);
        assert_ne!(first.task_id, second.task_id);
    }
}

#[tokio::test]
async fn test_artifacts_removed_after_success() {
    let (dispatcher, backend) = start(&test_config(5.0, 10.0));

    let result = dispatcher
        .submit(ExecutionRequest::new("print done", "javascript").unwrap())
        .await;
    assert!(result.is_success());

    let paths = backend.source_paths();
    assert_eq!(paths.len(), 1);
    assert!(paths[0].ends_with("main.js"));
    assert!(!paths[0].exists());
    assert!(!paths[0].parent().unwrap().exists());
}
