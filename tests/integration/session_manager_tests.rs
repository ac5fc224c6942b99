//! Session singleton enforcement, stale reaping, and release on every exit
//! path, using the in-memory multiplexer.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use voxherd::models::session::TransportType;
use voxherd::process::is_alive;
use voxherd::registry::SessionRegistry;
use voxherd::session::{SessionEnd, SessionManager, SessionOptions};
use voxherd::AppError;

use super::test_helpers::{dead_pid, kill_quietly, spawn_sleeper, wait_until, FakeMultiplexer};

fn options(kind: &str) -> SessionOptions {
    let mut options = SessionOptions::new(kind, TransportType::Multiplexer, vec!["claude".into()]);
    options.reclaim_grace = Duration::from_millis(500);
    options.poll_interval = Duration::from_millis(20);
    options
}

fn manager(dir: &std::path::Path, mux: &FakeMultiplexer) -> SessionManager<FakeMultiplexer> {
    SessionManager::new(SessionRegistry::open(dir).expect("registry"), mux.clone())
}

#[tokio::test]
async fn create_publishes_record_and_starts_program() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mux = FakeMultiplexer::default();
    let manager = manager(dir.path(), &mux);

    let handle = manager.create_session(&options("claude")).await.expect("create");

    let expected = format!("claude-{}", std::process::id());
    assert_eq!(handle.record().transport.address, expected);
    assert_eq!(handle.record().owner_pid, std::process::id());
    assert_eq!(mux.sessions(), vec![expected.clone()]);
    assert_eq!(mux.command_of(&expected), Some(vec!["claude".to_owned()]));
    let records = manager.registry().list_kind("claude").expect("list");
    assert_eq!(records, vec![handle.record().clone()]);

    handle.release().expect("release");
    assert!(manager.registry().list_kind("claude").expect("list").is_empty());
    assert!(mux.sessions().is_empty());
}

#[tokio::test]
async fn second_create_supersedes_the_first() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mux = FakeMultiplexer::default();
    let previous_owner = spawn_sleeper();

    let first = manager(dir.path(), &mux)
        .with_owner_pid(previous_owner)
        .create_session(&options("claude"))
        .await
        .expect("first create");
    let second = manager(dir.path(), &mux)
        .create_session(&options("claude"))
        .await
        .expect("second create");

    let records = SessionRegistry::open(dir.path())
        .expect("registry")
        .list_kind("claude")
        .expect("list");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].owner_pid, std::process::id());
    assert_eq!(mux.sessions(), vec![second.record().transport.address.clone()]);
    assert!(wait_until(Duration::from_secs(2), || !is_alive(previous_owner)).await);

    // The superseded guard finds nothing left to clean up.
    drop(first);
    assert_eq!(mux.sessions().len(), 1);
    drop(second);
    assert!(mux.sessions().is_empty());
}

#[tokio::test]
async fn recreating_from_one_owner_keeps_the_successor_on_drop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mux = FakeMultiplexer::default();
    let manager = manager(dir.path(), &mux);

    let first = manager.create_session(&options("claude")).await.expect("first create");
    let second = manager.create_session(&options("claude")).await.expect("second create");
    let address = second.record().transport.address.clone();

    drop(first);

    let records = manager.registry().list_kind("claude").expect("list");
    assert_eq!(records, vec![second.record().clone()]);
    assert_eq!(mux.sessions(), vec![address]);

    drop(second);
    assert!(manager.registry().list_kind("claude").expect("list").is_empty());
    assert!(mux.sessions().is_empty());
}

#[tokio::test]
async fn concurrent_creates_of_one_kind_leave_one_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mux = FakeMultiplexer::default();
    let left = manager(dir.path(), &mux).with_owner_pid(spawn_sleeper());
    let right = manager(dir.path(), &mux).with_owner_pid(spawn_sleeper());
    let opts = options("claude");

    let (a, b) = tokio::join!(left.create_session(&opts), right.create_session(&opts));
    let (a, b) = (a.expect("left create"), b.expect("right create"));

    let records = left.registry().list_kind("claude").expect("list");
    assert_eq!(records.len(), 1);
    let survivor = if records[0] == *a.record() { &a } else { &b };
    assert_eq!(records[0], *survivor.record());
    assert_eq!(mux.sessions(), vec![survivor.record().transport.address.clone()]);

    kill_quietly(a.record().owner_pid);
    kill_quietly(b.record().owner_pid);
}

#[tokio::test]
async fn crashed_manager_leaves_stale_record_that_is_reaped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mux = FakeMultiplexer::default();
    let crashed_owner = dead_pid();

    let crashed = manager(dir.path(), &mux)
        .with_owner_pid(crashed_owner)
        .create_session(&options("claude"))
        .await
        .expect("create");
    let stale_session = crashed.record().transport.address.clone();
    std::mem::forget(crashed);
    assert_eq!(mux.sessions(), vec![stale_session.clone()]);

    let registry = SessionRegistry::open(dir.path()).expect("registry");
    {
        let lock = registry.try_lock_kind("claude").expect("lock").expect("uncontended");
        assert!(registry.find_live(&lock).expect("lookup").is_none());
    }

    let fresh = manager(dir.path(), &mux)
        .create_session(&options("claude"))
        .await
        .expect("create after crash");

    assert!(!mux.sessions().contains(&stale_session));
    let records = registry.list_kind("claude").expect("list");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].owner_pid, fresh.record().owner_pid);
}

#[tokio::test]
async fn dropping_the_handle_releases_everything() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mux = FakeMultiplexer::default();
    let manager = manager(dir.path(), &mux);

    {
        let _handle = manager.create_session(&options("claude")).await.expect("create");
        assert_eq!(mux.sessions().len(), 1);
    }

    assert!(mux.sessions().is_empty());
    assert!(manager.registry().list_all().expect("list").is_empty());
}

#[tokio::test]
async fn panic_unwinding_releases_the_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mux = FakeMultiplexer::default();
    let handle = manager(dir.path(), &mux)
        .create_session(&options("claude"))
        .await
        .expect("create");

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
        let _guard = handle;
        panic!("session program crashed");
    }));

    assert!(result.is_err());
    assert!(mux.sessions().is_empty());
    assert!(SessionRegistry::open(dir.path())
        .expect("registry")
        .list_all()
        .expect("list")
        .is_empty());
}

#[tokio::test]
async fn run_ends_when_multiplexer_session_closes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mux = FakeMultiplexer::default();
    let handle = manager(dir.path(), &mux)
        .create_session(&options("claude"))
        .await
        .expect("create");
    let name = handle.record().transport.address.clone();

    let closer = mux.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        closer.close(&name);
    });
    let end = tokio::time::timeout(
        Duration::from_secs(2),
        handle.run_with_input(None::<tokio::io::Empty>, &CancellationToken::new()),
    )
    .await
    .expect("run ends")
    .expect("run succeeds");

    assert_eq!(end, SessionEnd::Closed);
    assert!(SessionRegistry::open(dir.path())
        .expect("registry")
        .list_all()
        .expect("list")
        .is_empty());
}

#[tokio::test]
async fn cancellation_releases_the_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mux = FakeMultiplexer::default();
    let handle = manager(dir.path(), &mux)
        .create_session(&options("claude"))
        .await
        .expect("create");
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });
    let end = handle
        .run_with_input(None::<tokio::io::Empty>, &cancel)
        .await
        .expect("run");

    assert_eq!(end, SessionEnd::Cancelled);
    assert!(mux.sessions().is_empty());
}

#[tokio::test]
async fn kinds_are_independent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mux = FakeMultiplexer::default();
    let manager = manager(dir.path(), &mux);

    let claude = manager.create_session(&options("claude")).await.expect("claude");
    let notes = manager.create_session(&options("notes")).await.expect("notes");

    assert_eq!(mux.sessions().len(), 2);
    assert_eq!(manager.registry().list_all().expect("list").len(), 2);
    drop((claude, notes));
}

#[tokio::test]
async fn surviving_transport_fails_reclaim() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mux = FakeMultiplexer::default();
    let stuck = manager(dir.path(), &mux)
        .with_owner_pid(dead_pid())
        .create_session(&options("claude"))
        .await
        .expect("create");
    std::mem::forget(stuck);

    mux.set_stubborn(true);
    let result = manager(dir.path(), &mux)
        .create_session(&options("claude"))
        .await;

    assert!(matches!(result, Err(AppError::SessionReclaim(_))), "{result:?}");
    mux.set_stubborn(false);
}

#[tokio::test]
async fn invalid_options_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mux = FakeMultiplexer::default();
    let manager = manager(dir.path(), &mux);

    assert!(matches!(
        manager.create_session(&options("bad kind")).await,
        Err(AppError::Config(_))
    ));
    let empty = SessionOptions::new("claude", TransportType::Multiplexer, Vec::new());
    assert!(matches!(
        manager.create_session(&empty).await,
        Err(AppError::Config(_))
    ));
    assert!(mux.sessions().is_empty());
}
