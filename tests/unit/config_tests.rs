use std::path::Path;
use std::time::Duration;

use voxherd::models::session::TransportType;
use voxherd::{config::GlobalConfig, AppError};

const SAMPLE: &str = r#"
registry_dir = "/tmp/voxherd-test-registry"
poll_interval_seconds = 5
stop_grace_seconds = 4
stop_poll_seconds = 2
inject_timeout_ms = 1500
tmux_binary = "/usr/local/bin/tmux"

[sessions.claude]
transport = "multiplexer"
command = ["claude", "--continue"]

[sessions.notes]
transport = "pipe"
command = ["cat"]
echo_injected = false
reclaim_grace_seconds = 1

[[processes]]
name = "speech-server"
command = ["python3", "audio/vosk_server.py"]
settle_seconds = 3
pid_file = "/tmp/voxherd/speech-server.pid"
log_file = "/tmp/voxherd/speech-server.log"
stop_pattern = "vosk_server\\.py"
auxiliary_patterns = ["vosk_websocket_client"]
ready = { tcp = "127.0.0.1:8765", timeout_seconds = 20 }

[[processes]]
name = "assistant"
session = "claude"
"#;

fn with_processes(processes: &str) -> String {
    format!(
        r#"
[sessions.claude]
command = ["claude"]

{processes}
"#
    )
}

fn config_error(raw: &str) -> String {
    match GlobalConfig::from_toml_str(raw) {
        Err(AppError::Config(msg)) => msg,
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn parses_full_config() {
    let config = GlobalConfig::from_toml_str(SAMPLE).expect("config parses");

    assert_eq!(config.registry_dir(), Path::new("/tmp/voxherd-test-registry"));
    assert_eq!(config.poll_interval(), Duration::from_secs(5));
    assert_eq!(config.stop_policy().grace, Duration::from_secs(4));
    assert_eq!(config.stop_policy().poll, Duration::from_secs(2));

    let transport = config.transport_options();
    assert_eq!(transport.tmux_binary, "/usr/local/bin/tmux");
    assert_eq!(transport.inject_timeout, Duration::from_millis(1500));
    assert_eq!(config.processes.len(), 2);
}

#[test]
fn defaults_apply_when_omitted() {
    let config = GlobalConfig::from_toml_str(
        r#"
[[processes]]
name = "voice-client"
command = ["voice-client"]
"#,
    )
    .expect("minimal config parses");

    assert_eq!(config.poll_interval(), Duration::from_secs(10));
    assert_eq!(config.stop_policy().grace, Duration::from_secs(10));
    assert_eq!(config.stop_policy().poll, Duration::from_secs(1));
    assert_eq!(config.transport_options().inject_timeout, Duration::from_secs(2));
    assert_eq!(config.tmux_binary, "tmux");
    assert_eq!(config.processes[0].settle_seconds, 0);
}

#[test]
fn session_process_reinvokes_the_binary() {
    let config = GlobalConfig::from_toml_str(SAMPLE).expect("config parses");
    let specs = config.process_specs(Path::new("/opt/voxherd"), Path::new("/etc/voxherd.toml"));

    assert_eq!(specs.len(), 2);
    let speech = &specs[0];
    assert_eq!(speech.name, "speech-server");
    assert_eq!(speech.settle, Duration::from_secs(3));
    assert!(speech.session_kind.is_none());
    assert_eq!(
        speech.ready.as_ref().map(|probe| probe.tcp.port()),
        Some(8765)
    );
    assert_eq!(
        speech.pid_file.as_deref(),
        Some(Path::new("/tmp/voxherd/speech-server.pid"))
    );

    let assistant = &specs[1];
    assert_eq!(assistant.session_kind.as_deref(), Some("claude"));
    assert_eq!(
        assistant.command,
        vec!["/opt/voxherd", "--config", "/etc/voxherd.toml", "session", "claude"]
    );
}

#[test]
fn session_options_follow_session_table() {
    let config = GlobalConfig::from_toml_str(SAMPLE).expect("config parses");

    let claude = config.session_options("claude").expect("claude");
    assert_eq!(claude.transport, TransportType::Multiplexer);
    assert_eq!(claude.command, vec!["claude", "--continue"]);
    assert!(claude.echo_injected);
    assert_eq!(claude.reclaim_grace, Duration::from_secs(3));

    let notes = config.session_options("notes").expect("notes");
    assert_eq!(notes.transport, TransportType::Pipe);
    assert!(!notes.echo_injected);
    assert_eq!(notes.reclaim_grace, Duration::from_secs(1));

    assert!(matches!(
        config.session_options("missing"),
        Err(AppError::NotFound(_))
    ));
}

#[test]
fn daemon_target_compiles_patterns() {
    let config = GlobalConfig::from_toml_str(SAMPLE).expect("config parses");

    let target = config.daemon_target("speech-server").expect("target");
    assert!(target.pid_file.is_some());
    let pattern = target.pattern.expect("pattern");
    assert!(pattern.is_match("python3 audio/vosk_server.py --port 8765"));
    assert_eq!(target.auxiliary.len(), 1);

    assert!(matches!(
        config.daemon_target("nope"),
        Err(AppError::NotFound(_))
    ));
}

#[test]
fn rejects_empty_process_list() {
    assert!(config_error("").contains("at least one process"));
}

#[test]
fn rejects_duplicate_names() {
    let raw = with_processes(
        r#"
[[processes]]
name = "a"
command = ["sleep", "1"]

[[processes]]
name = "a"
command = ["sleep", "2"]
"#,
    );
    assert!(config_error(&raw).contains("duplicate process name"));
}

#[test]
fn rejects_command_and_session_together() {
    let raw = with_processes(
        r#"
[[processes]]
name = "both"
command = ["claude"]
session = "claude"
"#,
    );
    assert!(config_error(&raw).contains("exactly one of command or session"));
}

#[test]
fn rejects_neither_command_nor_session() {
    let raw = with_processes(
        r#"
[[processes]]
name = "empty"
"#,
    );
    assert!(config_error(&raw).contains("exactly one of command or session"));
}

#[test]
fn rejects_unknown_session_reference() {
    let raw = with_processes(
        r#"
[[processes]]
name = "assistant"
session = "gemini"
"#,
    );
    assert!(config_error(&raw).contains("unknown session 'gemini'"));
}

#[test]
fn rejects_invalid_kind_name() {
    let raw = r#"
[sessions."bad kind"]
command = ["claude"]

[[processes]]
name = "a"
command = ["sleep", "1"]
"#;
    assert!(config_error(raw).contains("must match"));
}

#[test]
fn rejects_invalid_pattern() {
    let raw = with_processes(
        r#"
[[processes]]
name = "a"
command = ["sleep", "1"]
stop_pattern = "(unclosed"
"#,
    );
    assert!(config_error(&raw).contains("invalid pattern"));
}

#[test]
fn rejects_zero_poll_interval() {
    let raw = format!("poll_interval_seconds = 0\n{}", with_processes(
        r#"
[[processes]]
name = "a"
command = ["sleep", "1"]
"#,
    ));
    assert!(config_error(&raw).contains("poll_interval_seconds"));
}

#[test]
fn rejects_malformed_toml() {
    assert!(config_error("processes = [").contains("invalid config"));
}

#[test]
fn loads_from_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("voxherd.toml");
    std::fs::write(&path, SAMPLE).expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("load");
    assert_eq!(config.processes[0].name, "speech-server");

    assert!(matches!(
        GlobalConfig::load_from_path(dir.path().join("missing.toml")),
        Err(AppError::Config(_))
    ));
}

#[test]
#[serial_test::serial]
fn default_registry_dir_prefers_runtime_dir() {
    let previous = std::env::var_os("XDG_RUNTIME_DIR");
    std::env::set_var("XDG_RUNTIME_DIR", "/run/user/4242");

    let config = GlobalConfig::from_toml_str(&with_processes(
        r#"
[[processes]]
name = "a"
command = ["sleep", "1"]
"#,
    ))
    .expect("config parses");
    let dir = config.registry_dir();

    match previous {
        Some(value) => std::env::set_var("XDG_RUNTIME_DIR", value),
        None => std::env::remove_var("XDG_RUNTIME_DIR"),
    }
    assert_eq!(dir, Path::new("/run/user/4242/voxherd"));
}
