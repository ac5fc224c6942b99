//! Liveness probing and process-table matching against real processes.

use std::process::Command;
use std::time::Duration;

use regex::Regex;
use voxherd::models::process::Liveness;
use voxherd::process::{is_alive, probe_pid, table};

#[test]
fn own_process_is_alive() {
    assert!(is_alive(std::process::id()));
    assert_eq!(probe_pid(std::process::id()), Liveness::Alive);
}

#[test]
fn reaped_process_is_exited() {
    let mut child = Command::new("true").spawn().expect("spawn");
    let pid = child.id();
    child.wait().expect("wait");
    assert_eq!(probe_pid(pid), Liveness::Exited);
}

#[test]
fn snapshot_finds_spawned_process_by_command_line() {
    let mut child = Command::new("sleep").arg("27.1828").spawn().expect("spawn sleep");
    std::thread::sleep(Duration::from_millis(100));

    let pattern = Regex::new(r"sleep 27\.1828").expect("regex");
    let matches = table::find_matching(&pattern).expect("scan");

    child.kill().expect("kill");
    child.wait().expect("reap");

    assert!(matches.iter().any(|entry| entry.pid == child.id()));
}

#[test]
fn find_matching_never_returns_own_process() {
    let pattern = Regex::new(".").expect("regex");
    let matches = table::find_matching(&pattern).expect("scan");
    assert!(matches.iter().all(|entry| entry.pid != std::process::id()));
}

#[test]
fn find_matching_skips_parent_and_its_own_scan() {
    let pattern = Regex::new(".").expect("regex");
    let matches = table::find_matching(&pattern).expect("scan");
    let parent = u32::try_from(nix::unistd::getppid().as_raw()).expect("parent pid");

    assert!(matches.iter().all(|entry| entry.pid != parent));
    assert!(matches
        .iter()
        .all(|entry| !entry.command.starts_with("ps -axo pid=,command=")));
}
