//! Agent subprocess: stdin feed, stdout fold, crash reporting.

#![cfg(unix)]

use std::path::PathBuf;

use warelay::engine::agent::{run_agent, AgentError, ReplyFragment, SharedChild};

fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_owned(), "-c".to_owned(), script.to_owned()]
}

#[tokio::test]
async fn stdin_payload_reaches_the_agent() {
    let shared = SharedChild::default();
    let reply = run_agent(&sh("cat"), "ping from the peer", &shared, |_| {})
        .await
        .expect("agent run");
    assert_eq!(reply.body, "ping from the peer");
}

#[tokio::test]
async fn media_markers_are_folded_into_attachments() {
    let shared = SharedChild::default();
    let script = "printf 'first line\\nMEDIA:/tmp/generated.png\\nsecond line\\n'";
    let reply = run_agent(&sh(script), "", &shared, |_| {})
        .await
        .expect("agent run");
    assert_eq!(reply.body, "first line\nsecond line");
    assert_eq!(reply.media, vec![PathBuf::from("/tmp/generated.png")]);
}

#[tokio::test]
async fn fragments_stream_in_order() {
    let shared = SharedChild::default();
    let script = "printf 'a\\n\\360\\237\\224\\247 tool\\nMEDIA:/tmp/m.bin\\nb\\n'";
    let mut kinds = Vec::new();
    let _ = run_agent(&sh(script), "", &shared, |fragment| {
        kinds.push(match fragment {
            ReplyFragment::Text(_) => "text",
            ReplyFragment::Tool(_) => "tool",
            ReplyFragment::Media(_) => "media",
        });
    })
    .await
    .expect("agent run");
    assert_eq!(kinds, vec!["text", "tool", "media", "text"]);
}

#[tokio::test]
async fn nonzero_exit_is_a_crash() {
    let shared = SharedChild::default();
    let outcome = run_agent(&sh("echo doomed >&2; exit 3"), "", &shared, |_| {}).await;
    match outcome {
        Err(AgentError::Crashed { stderr_tail, .. }) => {
            assert!(stderr_tail.contains("doomed"));
        }
        other => panic!("expected Crashed, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_program_is_a_spawn_error() {
    let shared = SharedChild::default();
    let argv = vec!["warelay-no-such-agent-binary".to_owned()];
    assert!(matches!(
        run_agent(&argv, "", &shared, |_| {}).await,
        Err(AgentError::Spawn { .. })
    ));
}

#[tokio::test]
async fn empty_command_is_rejected() {
    let shared = SharedChild::default();
    assert!(run_agent(&[], "", &shared, |_| {}).await.is_err());
}
