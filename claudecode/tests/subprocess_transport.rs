//! Process-level tests for SubprocessTransport against fake CLI scripts.
//!
//! Each test writes a small `/bin/sh` script that speaks the stream-json
//! protocol and points the transport at it.

#![cfg(unix)]

mod common;

use bmad_claudecode::transport::subprocess::TERMINATION_TIMEOUT;
use bmad_claudecode::{
    ClaudeCodeOptions, ContentBlock, Message, SdkError, StreamMessage, SubprocessTransport,
    Transport, TransportState,
};
use common::{HELLO_SCRIPT, drain, fake_cli, init_tracing};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn streaming(cli: std::path::PathBuf) -> SubprocessTransport {
    SubprocessTransport::new(cli, ClaudeCodeOptions::default(), false, "sdk-rust-test")
}

fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[tokio::test]
async fn test_happy_path_single_query() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let transport = streaming(fake_cli(&dir, HELLO_SCRIPT));
    let cancel = CancellationToken::new();

    transport.connect(&cancel).await.unwrap();
    assert_eq!(transport.state().await, TransportState::Connected);

    transport
        .send_message(&cancel, StreamMessage::user("hi", ""))
        .await
        .unwrap();

    let (messages, errors) = transport.receive_messages().await;
    let received = drain(&messages, 10).await;
    assert_eq!(received.len(), 2);
    assert_eq!(
        received[0].content(),
        &[ContentBlock::Text {
            text: "Hello".to_string()
        }]
    );
    assert!(matches!(
        &received[1],
        Message::Result { is_error: false, session_id, .. } if session_id == "default"
    ));
    assert!(drain(&errors, 1).await.is_empty());

    transport.close().await.unwrap();
    assert_eq!(transport.state().await, TransportState::Closed);
}

#[tokio::test]
async fn test_envelope_written_as_single_line() {
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("stdin.jsonl");
    let cli = fake_cli(&dir, &format!("head -n 1 > '{}'", capture.display()));
    let transport = streaming(cli);
    let cancel = CancellationToken::new();

    transport.connect(&cancel).await.unwrap();
    transport
        .send_message(&cancel, StreamMessage::user("what is\nthis?", "s-42"))
        .await
        .unwrap();

    let (messages, _errors) = transport.receive_messages().await;
    assert!(drain(&messages, 10).await.is_empty());
    transport.close().await.unwrap();

    let written = std::fs::read_to_string(&capture).unwrap();
    assert!(written.ends_with('\n'));
    assert_eq!(written.lines().count(), 1);

    let decoded: serde_json::Value = serde_json::from_str(written.trim_end()).unwrap();
    assert_eq!(
        decoded,
        serde_json::json!({
            "type": "user",
            "message": {"role": "user", "content": "what is\nthis?"},
            "parent_tool_use_id": null,
            "session_id": "s-42"
        })
    );
}

#[tokio::test]
async fn test_close_stdin_after_first_message() {
    let dir = tempfile::tempdir().unwrap();
    // cat exits only once stdin reaches EOF
    let cli = fake_cli(
        &dir,
        r#"cat >/dev/null
printf '%s\n' '{"type":"system","subtype":"stdin_closed"}'"#,
    );
    let transport = SubprocessTransport::new(cli, ClaudeCodeOptions::default(), true, "test");
    let cancel = CancellationToken::new();

    transport.connect(&cancel).await.unwrap();
    transport
        .send_message(&cancel, StreamMessage::user("only one", ""))
        .await
        .unwrap();

    let (messages, _errors) = transport.receive_messages().await;
    let received = drain(&messages, 10).await;
    assert!(matches!(
        received.as_slice(),
        [Message::System { subtype, .. }] if subtype == "stdin_closed"
    ));

    let err = transport
        .send_message(&cancel, StreamMessage::user("too late", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::NotConnected));
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_entrypoint_and_cwd() {
    let dir = tempfile::tempdir().unwrap();
    let workdir = tempfile::tempdir().unwrap();
    let cli = fake_cli(
        &dir,
        r#"printf '{"type":"system","subtype":"env","entrypoint":"%s","cwd":"%s"}\n' "$CLAUDE_CODE_ENTRYPOINT" "$(pwd)""#,
    );
    let options = ClaudeCodeOptions::builder().cwd(workdir.path()).build();
    let transport = SubprocessTransport::new(cli, options, false, "sdk-rust-client");
    let cancel = CancellationToken::new();

    transport.connect(&cancel).await.unwrap();
    let (messages, _errors) = transport.receive_messages().await;
    let received = drain(&messages, 10).await;
    transport.close().await.unwrap();

    let Message::System { data, .. } = &received[0] else {
        panic!("expected system message, got {received:?}");
    };
    assert_eq!(data["entrypoint"], "sdk-rust-client");
    let reported = std::path::PathBuf::from(data["cwd"].as_str().unwrap());
    assert_eq!(
        std::fs::canonicalize(reported).unwrap(),
        std::fs::canonicalize(workdir.path()).unwrap()
    );
    assert!(std::env::var("CLAUDE_CODE_ENTRYPOINT").is_err());
}

#[tokio::test]
async fn test_large_message_delivered_intact() {
    let dir = tempfile::tempdir().unwrap();
    let cli = fake_cli(
        &dir,
        r#"printf '%s' '{"type":"assistant","message":{"content":[{"type":"text","text":"'
head -c 5242880 /dev/zero | tr '\0' 'a'
printf '%s\n' '"}]}}'"#,
    );
    let transport = streaming(cli);
    let cancel = CancellationToken::new();

    transport.connect(&cancel).await.unwrap();
    let (messages, errors) = transport.receive_messages().await;
    let received = drain(&messages, 30).await;
    transport.close().await.unwrap();

    assert!(drain(&errors, 1).await.is_empty());
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].text().len(), 5 * 1024 * 1024);
}

#[tokio::test]
async fn test_oversized_line_overflows_once() {
    let dir = tempfile::tempdir().unwrap();
    let cli = fake_cli(
        &dir,
        r#"head -c 11000000 /dev/zero | tr '\0' 'a'
printf '\n%s\n' '{"type":"system","subtype":"after"}'"#,
    );
    let transport = streaming(cli);
    let cancel = CancellationToken::new();

    transport.connect(&cancel).await.unwrap();
    let (messages, errors) = transport.receive_messages().await;

    let errors = drain(&errors, 30).await;
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], SdkError::BufferOverflow { .. }));
    assert!(drain(&messages, 5).await.is_empty());

    // the writer dies of SIGPIPE or SIGTERM; either way the transport ends closed
    let _ = transport.close().await;
    assert_eq!(transport.state().await, TransportState::Closed);
}

#[tokio::test]
async fn test_invalid_utf8_line_is_reported_and_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let cli = fake_cli(
        &dir,
        r#"printf '\377\376 garbage\n'
printf '%s\n' '{"type":"system","subtype":"after"}'"#,
    );
    let transport = streaming(cli);
    let cancel = CancellationToken::new();

    transport.connect(&cancel).await.unwrap();
    let (messages, errors) = transport.receive_messages().await;
    let received = drain(&messages, 10).await;
    let errors = drain(&errors, 1).await;
    transport.close().await.unwrap();

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code(), "json_decode_error");
    assert!(matches!(
        received.as_slice(),
        [Message::System { subtype, .. }] if subtype == "after"
    ));
}

#[tokio::test]
async fn test_order_preserved_across_many_lines() {
    let dir = tempfile::tempdir().unwrap();
    let cli = fake_cli(
        &dir,
        r#"i=0
while [ $i -lt 50 ]; do
  printf '{"type":"system","subtype":"s%d"}\n' $i
  i=$((i+1))
done"#,
    );
    let transport = streaming(cli);
    let cancel = CancellationToken::new();

    transport.connect(&cancel).await.unwrap();
    let (messages, _errors) = transport.receive_messages().await;
    let subtypes: Vec<String> = drain(&messages, 10)
        .await
        .into_iter()
        .map(|m| match m {
            Message::System { subtype, .. } => subtype,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    transport.close().await.unwrap();

    assert_eq!(subtypes, (0..50).map(|i| format!("s{i}")).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_close_is_idempotent_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let transport = streaming(fake_cli(&dir, "cat >/dev/null"));
    let cancel = CancellationToken::new();

    transport.connect(&cancel).await.unwrap();
    let stderr_path = transport.stderr_path().await.unwrap();
    let file_name = stderr_path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(file_name.starts_with("claude_stderr_"));
    assert!(file_name.ends_with(".log"));
    assert!(stderr_path.exists());
    let pid = transport.pid().await.unwrap();

    transport.close().await.unwrap();
    transport.close().await.unwrap();

    assert_eq!(transport.state().await, TransportState::Closed);
    assert!(!stderr_path.exists());
    assert!(!process_alive(pid));
    assert!(transport.stderr_path().await.is_none());
}

#[tokio::test]
async fn test_close_kills_child_ignoring_sigterm() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cli = fake_cli(&dir, "trap '' TERM\nwhile :; do sleep 1; done");
    let transport = streaming(cli);
    let cancel = CancellationToken::new();

    transport.connect(&cancel).await.unwrap();
    let stderr_path = transport.stderr_path().await.unwrap();
    let pid = transport.pid().await.unwrap();
    let (messages, errors) = transport.receive_messages().await;
    // let the shell install its trap
    tokio::time::sleep(Duration::from_millis(300)).await;

    let start = Instant::now();
    transport.close().await.unwrap();
    let elapsed = start.elapsed();

    assert!(
        elapsed >= TERMINATION_TIMEOUT - Duration::from_millis(500),
        "close returned after {elapsed:?}"
    );
    assert!(elapsed < TERMINATION_TIMEOUT * 2, "close took {elapsed:?}");
    assert!(messages.recv().await.is_none());
    assert!(errors.recv().await.is_none());
    assert!(!stderr_path.exists());
    assert!(!process_alive(pid));
}

#[tokio::test]
async fn test_parent_cancellation_closes_channels() {
    let dir = tempfile::tempdir().unwrap();
    let transport = streaming(fake_cli(&dir, "while :; do sleep 1; done"));
    let cancel = CancellationToken::new();

    transport.connect(&cancel).await.unwrap();
    let pid = transport.pid().await.unwrap();
    let (messages, errors) = transport.receive_messages().await;
    cancel.cancel();

    assert!(drain(&messages, 5).await.is_empty());
    assert!(drain(&errors, 5).await.is_empty());

    // the child is killed and reaped without waiting for close
    let deadline = Instant::now() + Duration::from_secs(2);
    while process_alive(pid) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!process_alive(pid), "child {pid} outlived its cancelled token");

    // the caller's token is already cancelled, so no SIGTERM grace period
    let start = Instant::now();
    transport.close().await.unwrap();
    assert!(start.elapsed() < TERMINATION_TIMEOUT);
}

#[tokio::test]
async fn test_prompt_mode_ignores_send() {
    let dir = tempfile::tempdir().unwrap();
    let cli = fake_cli(
        &dir,
        r#"printf '{"type":"system","subtype":"argv","argv":"%s"}\n' "$*""#,
    );
    let transport = SubprocessTransport::with_prompt(cli, ClaudeCodeOptions::default(), "hello there");
    let cancel = CancellationToken::new();

    transport.connect(&cancel).await.unwrap();
    transport
        .send_message(&cancel, StreamMessage::user("ignored", ""))
        .await
        .unwrap();

    let (messages, _errors) = transport.receive_messages().await;
    let received = drain(&messages, 10).await;
    transport.close().await.unwrap();

    let Message::System { data, .. } = &received[0] else {
        panic!("expected system message, got {received:?}");
    };
    let argv = data["argv"].as_str().unwrap();
    assert!(argv.starts_with("--output-format stream-json --verbose"));
    assert!(argv.ends_with("--print hello there"));
}
