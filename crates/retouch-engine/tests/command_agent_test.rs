#![cfg(unix)]

use retouch_engine::agent::{Agent, AgentError};
use retouch_engine::command_agent::CommandAgent;
use retouch_engine::config::schema::AgentConfig;

#[tokio::test]
async fn test_instruction_is_last_argument_and_runs_in_workdir() {
    let dir = tempfile::tempdir().unwrap();
    let mut agent = CommandAgent::new("sh", dir.path())
        .with_args(["-c", "printf '%s' \"$1\" > applied.txt", "agent"]);

    agent.submit("make the button purple").await.unwrap();

    let written = std::fs::read_to_string(dir.path().join("applied.txt")).unwrap();
    assert_eq!(written, "make the button purple");
}

#[tokio::test]
async fn test_nonzero_exit_is_task_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut agent = CommandAgent::new("sh", dir.path())
        .with_args(["-c", "echo 'no such element' >&2; exit 3", "agent"]);

    let err = agent.submit("x").await.unwrap_err();
    assert_eq!(
        err,
        AgentError::TaskFailed {
            code: Some(3),
            detail: "no such element".into()
        }
    );
}

#[tokio::test]
async fn test_missing_program_is_process_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut agent = CommandAgent::new("retouch-definitely-not-installed", dir.path());
    let err = agent.submit("x").await.unwrap_err();
    assert!(matches!(err, AgentError::Process(_)));
}

#[test]
fn test_empty_program_is_not_configured() {
    let config = AgentConfig {
        program: "  ".into(),
        ..Default::default()
    };
    let err = CommandAgent::from_config(&config, ".").unwrap_err();
    assert_eq!(err.code(), "AGENT_NOT_CONFIGURED");
}
