//! Pipe sessions end to end: FIFO front-end, injection order, shutdown.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use voxherd::models::session::TransportType;
use voxherd::registry::SessionRegistry;
use voxherd::session::{SessionEnd, SessionManager, SessionOptions};
use voxherd::transport::{inject_into_session, TransportOptions};

use super::test_helpers::{wait_until, FakeMultiplexer};

fn pipe_options(kind: &str, script: &str) -> SessionOptions {
    let mut options = SessionOptions::new(
        kind,
        TransportType::Pipe,
        vec!["sh".into(), "-c".into(), script.into()],
    );
    options.echo_injected = false;
    options
}

fn capture_script(out: &Path) -> String {
    format!("cat > '{}'", out.display())
}

async fn wait_for_contents(path: &PathBuf, expected: &str) -> bool {
    wait_until(Duration::from_secs(3), || {
        std::fs::read_to_string(path)
            .map(|text| text == expected)
            .unwrap_or(false)
    })
    .await
}

#[tokio::test]
async fn injected_commands_reach_the_program_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("received.txt");
    let registry = SessionRegistry::open(dir.path().join("registry")).expect("registry");
    let manager = SessionManager::new(registry.clone(), FakeMultiplexer::default());

    let handle = manager
        .create_session(&pipe_options("notes", &capture_script(&out)))
        .await
        .expect("create");
    let fifo = PathBuf::from(&handle.record().transport.address);
    assert!(fifo.starts_with(registry.dir()));
    assert!(fifo.ends_with(format!("notes-{}.fifo", std::process::id())));

    let cancel = CancellationToken::new();
    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { handle.run_with_input(None::<tokio::io::Empty>, &cancel).await })
    };

    let options = TransportOptions::default();
    inject_into_session(&registry, "notes", "a", &options).await.expect("inject a");
    inject_into_session(&registry, "notes", "b", &options).await.expect("inject b");
    assert!(wait_for_contents(&out, "a\nb\n").await);

    cancel.cancel();
    let end = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("session stops")
        .expect("task joins")
        .expect("run succeeds");

    assert_eq!(end, SessionEnd::Cancelled);
    assert!(registry.list_all().expect("list").is_empty());
    assert!(!fifo.exists());
}

#[tokio::test]
async fn program_exit_ends_the_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = SessionRegistry::open(dir.path()).expect("registry");
    let manager = SessionManager::new(registry.clone(), FakeMultiplexer::default());

    let handle = manager
        .create_session(&pipe_options("oneshot", "read line; exit 3"))
        .await
        .expect("create");
    let cancel = CancellationToken::new();
    let task = tokio::spawn(async move {
        handle
            .run_with_input(None::<tokio::io::Empty>, &cancel)
            .await
    });

    inject_into_session(&registry, "oneshot", "go", &TransportOptions::default())
        .await
        .expect("inject");
    let end = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("session ends")
        .expect("task joins")
        .expect("run succeeds");

    assert_eq!(end, SessionEnd::ProgramExited(Some(3)));
    assert!(registry.list_all().expect("list").is_empty());
}

#[tokio::test]
async fn typed_and_injected_input_share_the_program() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("received.txt");
    let registry = SessionRegistry::open(dir.path().join("registry")).expect("registry");
    let manager = SessionManager::new(registry.clone(), FakeMultiplexer::default());

    let handle = manager
        .create_session(&pipe_options("shared", &capture_script(&out)))
        .await
        .expect("create");
    let cancel = CancellationToken::new();
    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            handle
                .run_with_input(Some(&b"typed by hand\n"[..]), &cancel)
                .await
        })
    };

    let typed = wait_until(Duration::from_secs(3), || {
        std::fs::read_to_string(&out)
            .map(|text| text.contains("typed by hand"))
            .unwrap_or(false)
    })
    .await;
    assert!(typed);

    inject_into_session(&registry, "shared", "spoken aloud", &TransportOptions::default())
        .await
        .expect("inject after typed input closed");
    assert!(wait_for_contents(&out, "typed by hand\nspoken aloud\n").await);

    cancel.cancel();
    let end = task.await.expect("join").expect("run");
    assert_eq!(end, SessionEnd::Cancelled);
}
