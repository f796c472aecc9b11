//! Shared helpers for process-level tests
#![allow(dead_code)]

use bmad_claudecode::Inbound;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// Install a test subscriber honouring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Write an executable shell script standing in for the Claude CLI
#[cfg(unix)]
pub fn fake_cli(dir: &TempDir, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.path().join("claude");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Script that answers one stdin line with the canonical hello exchange
pub const HELLO_SCRIPT: &str = r#"read -r line
printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":"Hello"}],"model":"m","id":"1"}}'
printf '%s\n' '{"type":"result","subtype":"success","duration_ms":10,"duration_api_ms":5,"is_error":false,"num_turns":1,"session_id":"default"}'"#;

/// Collect everything until the channel closes, failing after `secs`
pub async fn drain<T>(inbound: &Inbound<T>, secs: u64) -> Vec<T> {
    tokio::time::timeout(Duration::from_secs(secs), async {
        let mut items = Vec::new();
        while let Some(item) = inbound.recv().await {
            items.push(item);
        }
        items
    })
    .await
    .expect("channel should close")
}
